//! Cycle and blocked-task detection over the diagnostic dependency graph.

use crate::monitor::TaskMonitor;
use foreman_core::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

/// Why a monitored task is considered blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// A declared dependency is flagged stuck
    DependencyStuck,
    /// A declared dependency has been running past its own timeout
    DependencyOverrun,
}

/// A monitored task blocked on one of its declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    /// The blocked task
    pub task_id: TaskId,
    /// The dependency it is blocked on
    pub blocked_on: TaskId,
    /// Why the dependency counts as blocking
    pub reason: BlockReason,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

struct Frame {
    node: TaskId,
    deps: Vec<TaskId>,
    next: usize,
}

/// Find dependency cycles with an iterative depth-first traversal.
///
/// An explicit frame stack plus a gray/black coloring stands in for
/// recursion, so adversarial graphs cannot overflow the call stack. A
/// back-edge into a gray node identifies a cycle; disjoint cycles are
/// deduplicated by their member set.
pub(crate) fn detect_cycles(monitors: &HashMap<TaskId, TaskMonitor>) -> Vec<Vec<TaskId>> {
    let mut color: HashMap<TaskId, Color> =
        monitors.keys().map(|id| (*id, Color::White)).collect();
    let mut cycles = Vec::new();
    let mut seen: HashSet<BTreeSet<TaskId>> = HashSet::new();

    // Sorted start order keeps the output deterministic.
    let mut starts: Vec<TaskId> = monitors.keys().copied().collect();
    starts.sort();

    for start in starts {
        if color[&start] != Color::White {
            continue;
        }

        let mut stack = vec![new_frame(start, monitors)];
        let mut path = vec![start];
        color.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.deps.len() {
                let dep = frame.deps[frame.next];
                frame.next += 1;

                match color.get(&dep) {
                    // Edges out of the monitored set are ignored.
                    None | Some(Color::Black) => {}
                    Some(Color::White) => {
                        color.insert(dep, Color::Gray);
                        path.push(dep);
                        stack.push(new_frame(dep, monitors));
                    }
                    Some(Color::Gray) => {
                        // Back-edge: the cycle is the path suffix
                        // starting at the revisited node.
                        if let Some(pos) = path.iter().position(|id| *id == dep) {
                            let cycle = path[pos..].to_vec();
                            let key: BTreeSet<TaskId> = cycle.iter().copied().collect();
                            if seen.insert(key) {
                                cycles.push(cycle);
                            }
                        }
                    }
                }
            } else {
                color.insert(frame.node, Color::Black);
                stack.pop();
                path.pop();
            }
        }
    }

    cycles
}

fn new_frame(node: TaskId, monitors: &HashMap<TaskId, TaskMonitor>) -> Frame {
    let mut deps: Vec<TaskId> = monitors
        .get(&node)
        .map(|m| m.dependencies.iter().copied().collect())
        .unwrap_or_default();
    deps.sort();
    Frame {
        node,
        deps,
        next: 0,
    }
}

/// Find monitored tasks whose declared dependencies are stuck or have
/// been running longer than their own timeout threshold.
pub(crate) fn detect_blocked(
    monitors: &HashMap<TaskId, TaskMonitor>,
    stuck: &HashSet<TaskId>,
    now: Instant,
) -> Vec<BlockedTask> {
    let mut blocked = Vec::new();

    for (task_id, monitor) in monitors {
        for dep in &monitor.dependencies {
            if stuck.contains(dep) {
                blocked.push(BlockedTask {
                    task_id: *task_id,
                    blocked_on: *dep,
                    reason: BlockReason::DependencyStuck,
                });
            } else if let Some(dep_monitor) = monitors.get(dep) {
                if now.saturating_duration_since(dep_monitor.start_time)
                    > dep_monitor.timeout_threshold
                {
                    blocked.push(BlockedTask {
                        task_id: *task_id,
                        blocked_on: *dep,
                        reason: BlockReason::DependencyOverrun,
                    });
                }
            }
        }
    }

    blocked.sort_by_key(|b| (b.task_id, b.blocked_on));
    blocked
}
