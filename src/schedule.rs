// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Schedule builder: conflict graph, topological ordering, and greedy
//! stage packing.
//!
//! A `Schedule` holds every system registered under one label (`Startup`,
//! `PreUpdate`, `Update`, `PostUpdate`, `Shutdown`, ...). Building it derives
//! a conflict edge between any two systems whose `AccessPolicy`s overlap,
//! folds in explicit `.after()/.before()/.in_set()` constraints, topologically
//! sorts with Kahn's algorithm, and greedily packs the sorted order into
//! stages of mutually non-conflicting systems the executor can run in
//! parallel.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::error::{EcsError, Result};
use crate::system::{AccessPolicy, BoxedSystem, SystemConfig, SystemId, SystemLabel};

/// A named point in a schedule's run order, the unit Startup/PreUpdate/
/// Update/PostUpdate/Shutdown are each an instance of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleLabel(pub &'static str);

impl ScheduleLabel {
    pub const STARTUP: ScheduleLabel = ScheduleLabel("Startup");
    pub const PRE_UPDATE: ScheduleLabel = ScheduleLabel("PreUpdate");
    pub const UPDATE: ScheduleLabel = ScheduleLabel("Update");
    pub const POST_UPDATE: ScheduleLabel = ScheduleLabel("PostUpdate");
    pub const SHUTDOWN: ScheduleLabel = ScheduleLabel("Shutdown");
}

#[derive(Debug, Clone)]
struct SystemNode {
    id: SystemId,
    name: String,
    access: AccessPolicy,
    config: SystemConfig,
}

struct SystemGraph {
    nodes: Vec<SystemNode>,
    edges: FxHashMap<SystemId, Vec<SystemId>>,
    reverse_edges: FxHashMap<SystemId, Vec<SystemId>>,
}

impl SystemGraph {
    fn build(nodes: Vec<SystemNode>) -> Result<Self> {
        let mut edges: FxHashMap<SystemId, Vec<SystemId>> = FxHashMap::default();
        let mut reverse_edges: FxHashMap<SystemId, Vec<SystemId>> = FxHashMap::default();

        for node in &nodes {
            edges.insert(node.id, Vec::new());
            reverse_edges.insert(node.id, Vec::new());
        }

        // Conflict edges: deterministic, lower index runs first.
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if nodes[i].access.conflicts_with(&nodes[j].access) {
                    edges.get_mut(&nodes[i].id).unwrap().push(nodes[j].id);
                    reverse_edges.get_mut(&nodes[j].id).unwrap().push(nodes[i].id);
                }
            }
        }

        // Explicit ordering constraints, resolved via label/set membership.
        let label_owner = |label: &SystemLabel, nodes: &[SystemNode]| -> Vec<SystemId> {
            nodes
                .iter()
                .filter(|n| n.config.label.as_ref() == Some(label) || n.config.sets.contains(label))
                .map(|n| n.id)
                .collect()
        };

        for node in &nodes {
            for after in &node.config.after {
                for &pred in &label_owner(after, &nodes) {
                    if pred != node.id && !edges[&pred].contains(&node.id) {
                        edges.get_mut(&pred).unwrap().push(node.id);
                        reverse_edges.get_mut(&node.id).unwrap().push(pred);
                    }
                }
            }
            for before in &node.config.before {
                for &succ in &label_owner(before, &nodes) {
                    if succ != node.id && !edges[&node.id].contains(&succ) {
                        edges.get_mut(&node.id).unwrap().push(succ);
                        reverse_edges.get_mut(&succ).unwrap().push(node.id);
                    }
                }
            }
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
        })
    }

    fn node(&self, id: SystemId) -> &SystemNode {
        &self.nodes[id.0 as usize]
    }

    /// Kahn's algorithm. On a cycle, returns the names of every system with
    /// nonzero in-degree once the queue drains — every system left over is
    /// on (or depends only on) a cycle.
    fn topological_sort(&self) -> Result<Vec<SystemId>> {
        let mut in_degree: FxHashMap<SystemId, usize> = FxHashMap::default();
        let mut queue = VecDeque::new();
        let mut result = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            in_degree.insert(node.id, self.reverse_edges[&node.id].len());
        }
        for node in &self.nodes {
            if in_degree[&node.id] == 0 {
                queue.push_back(node.id);
            }
        }

        while let Some(id) = queue.pop_front() {
            result.push(id);
            for &neighbor in &self.edges[&id] {
                let degree = in_degree.get_mut(&neighbor).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() != self.nodes.len() {
            let stuck: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| in_degree[&n.id] > 0)
                .map(|n| n.name.clone())
                .collect();
            return Err(EcsError::SystemCycleDetected(stuck));
        }

        Ok(result)
    }
}

/// A set of systems that can run concurrently: no two members' declared
/// access policies conflict.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    pub(crate) systems: Vec<SystemId>,
}

impl Stage {
    fn try_add(&mut self, id: SystemId, access: &AccessPolicy, graph: &SystemGraph) -> bool {
        for &existing in &self.systems {
            if access.conflicts_with(&graph.node(existing).access) {
                return false;
            }
        }
        self.systems.push(id);
        true
    }
}

/// One labeled run order (e.g. `Update`): systems, their built stage plan,
/// and the conflict graph, rebuilt lazily whenever a system is added.
#[derive(Default)]
pub struct Schedule {
    pub(crate) systems: Vec<BoxedSystem>,
    names: Vec<String>,
    configs: Vec<SystemConfig>,
    stages: Vec<Stage>,
    built: bool,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system with default (unordered, unlabeled) config.
    pub fn add_system(&mut self, system: BoxedSystem) -> SystemId {
        self.add_system_with(system, SystemConfig::new())
    }

    pub fn add_system_with(&mut self, system: BoxedSystem, config: SystemConfig) -> SystemId {
        let id = SystemId(self.systems.len() as u32);
        self.names.push(system.name().to_string());
        self.systems.push(system);
        self.configs.push(config);
        self.built = false;
        id
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn ensure_built(&mut self) -> Result<()> {
        if !self.built {
            self.rebuild()?;
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let nodes = self
            .systems
            .iter()
            .enumerate()
            .map(|(i, sys)| SystemNode {
                id: SystemId(i as u32),
                name: sys.name().to_string(),
                access: sys.access(),
                config: self.configs[i].clone(),
            })
            .collect();

        let graph = SystemGraph::build(nodes)?;
        let sorted = graph.topological_sort()?;

        let mut stages: Vec<Stage> = Vec::new();
        for id in sorted {
            let access = &graph.node(id).access;
            let placed = stages
                .last_mut()
                .is_some_and(|stage| stage.try_add(id, access, &graph));
            if !placed {
                let mut stage = Stage::default();
                stage.systems.push(id);
                stages.push(stage);
            }
        }

        self.stages = stages;
        self.built = true;
        Ok(())
    }

    pub(crate) fn stage_plan(&self) -> &[Stage] {
        &self.stages
    }

    pub(crate) fn system_mut_by_id(&mut self, id: SystemId) -> &mut BoxedSystem {
        &mut self.systems[id.0 as usize]
    }

    pub fn system_names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{SystemContext, System};

    struct MockSystem {
        name: &'static str,
        access: AccessPolicy,
    }

    impl System for MockSystem {
        fn run(&mut self, _ctx: &mut SystemContext<'_>) -> crate::error::Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            self.name
        }
        fn access(&self) -> AccessPolicy {
            self.access.clone()
        }
    }

    #[test]
    fn lazy_rebuild_invalidates_on_add() {
        let mut schedule = Schedule::new();
        schedule.add_system(Box::new(MockSystem {
            name: "a",
            access: AccessPolicy::empty(),
        }));
        assert!(!schedule.built);
        schedule.ensure_built().unwrap();
        assert!(schedule.built);
        schedule.add_system(Box::new(MockSystem {
            name: "b",
            access: AccessPolicy::empty(),
        }));
        assert!(!schedule.built);
    }

    #[test]
    fn disjoint_systems_pack_into_one_stage() {
        let mut schedule = Schedule::new();
        schedule.add_system(Box::new(MockSystem {
            name: "a",
            access: AccessPolicy::empty().writes_component::<i32>(),
        }));
        schedule.add_system(Box::new(MockSystem {
            name: "b",
            access: AccessPolicy::empty().writes_component::<f32>(),
        }));
        schedule.ensure_built().unwrap();
        assert_eq!(schedule.stage_count(), 1);
        assert_eq!(schedule.stage_plan()[0].systems.len(), 2);
    }

    #[test]
    fn conflicting_systems_land_in_separate_stages() {
        let mut schedule = Schedule::new();
        schedule.add_system(Box::new(MockSystem {
            name: "a",
            access: AccessPolicy::empty().writes_component::<i32>(),
        }));
        schedule.add_system(Box::new(MockSystem {
            name: "b",
            access: AccessPolicy::empty().writes_component::<i32>(),
        }));
        schedule.ensure_built().unwrap();
        assert_eq!(schedule.stage_count(), 2);
    }

    #[test]
    fn cycle_names_every_involved_system() {
        let mut schedule = Schedule::new();
        schedule.add_system_with(
            Box::new(MockSystem {
                name: "a",
                access: AccessPolicy::empty(),
            }),
            SystemConfig::new().labeled("a").after("c"),
        );
        schedule.add_system_with(
            Box::new(MockSystem {
                name: "b",
                access: AccessPolicy::empty(),
            }),
            SystemConfig::new().labeled("b").after("a"),
        );
        schedule.add_system_with(
            Box::new(MockSystem {
                name: "c",
                access: AccessPolicy::empty(),
            }),
            SystemConfig::new().labeled("c").after("b"),
        );
        let err = schedule.ensure_built().unwrap_err();
        match err {
            EcsError::SystemCycleDetected(names) => {
                assert_eq!(names.len(), 3);
                for n in ["a", "b", "c"] {
                    assert!(names.iter().any(|x| x == n));
                }
            }
            other => panic!("expected SystemCycleDetected, got {other:?}"),
        }
    }
}
