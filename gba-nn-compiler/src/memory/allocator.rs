//! Offset assignment in the shared scratch buffer.

use std::collections::HashMap;

use crate::config::AllocStrategy;
use crate::ir::TensorId;

use super::liveness::{Interval, Lifetime, Moment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub tensor: TensorId,
    pub offset: usize,
    pub size: usize,
    pub interval: Interval,
}

impl Allocation {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPlan {
    allocations: Vec<Allocation>,
    index: HashMap<TensorId, usize>,
    pub total_size: usize,
    /// Size the buffer would need without any reuse.
    pub sequential_size: usize,
}

impl MemoryPlan {
    pub fn offset(&self, tensor: TensorId) -> Option<usize> {
        self.allocation(tensor).map(|a| a.offset)
    }

    pub fn allocation(&self, tensor: TensorId) -> Option<&Allocation> {
        self.index.get(&tensor).map(|&i| &self.allocations[i])
    }

    /// Allocations in birth order.
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// First pair of simultaneously live tensors whose regions intersect.
    /// Zero-sized tensors occupy nothing and never conflict.
    pub fn first_conflict(&self) -> Option<(&Allocation, &Allocation)> {
        for (i, a) in self.allocations.iter().enumerate() {
            for b in &self.allocations[i + 1..] {
                if a.size == 0 || b.size == 0 || !a.interval.overlaps(&b.interval) {
                    continue;
                }
                if a.offset < b.end() && b.offset < a.end() {
                    return Some((a, b));
                }
            }
        }
        None
    }

    pub fn check_disjoint(&self) -> bool {
        self.first_conflict().is_none()
    }

    fn push(&mut self, allocation: Allocation) {
        self.index.insert(allocation.tensor, self.allocations.len());
        self.total_size = self.total_size.max(allocation.end());
        self.allocations.push(allocation);
    }
}

/// Free regions sorted by offset, never adjacent after `coalesce`.
#[derive(Debug, Default)]
struct FreeList {
    blocks: Vec<(usize, usize)>,
}

impl FreeList {
    /// Best fit: the block with the least leftover space, lowest offset on
    /// ties. The remainder stays at the tail of the block.
    fn take(&mut self, size: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, &(_, len)) in self.blocks.iter().enumerate() {
            if len < size {
                continue;
            }
            let gap = len - size;
            if best.map_or(true, |(_, best_gap)| gap < best_gap) {
                best = Some((i, gap));
            }
        }
        let (i, gap) = best?;
        let (offset, _) = self.blocks[i];
        if gap == 0 {
            self.blocks.remove(i);
        } else {
            self.blocks[i] = (offset + size, gap);
        }
        Some(offset)
    }

    fn release(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let at = self.blocks.partition_point(|&(o, _)| o < offset);
        self.blocks.insert(at, (offset, size));
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.blocks.len());
        for &(offset, size) in &self.blocks {
            match merged.last_mut() {
                Some((last_off, last_size)) if *last_off + *last_size == offset => {
                    *last_size += size;
                }
                _ => merged.push((offset, size)),
            }
        }
        self.blocks = merged;
    }
}

pub fn allocate(lifetimes: &[Lifetime], strategy: AllocStrategy) -> MemoryPlan {
    let plan = match strategy {
        AllocStrategy::Reuse => allocate_with_reuse(lifetimes),
        AllocStrategy::Sequential => allocate_sequentially(lifetimes),
    };
    log::info!(
        "scratch buffer: {} bytes ({} without reuse, {} tensors)",
        plan.total_size,
        plan.sequential_size,
        plan.allocations.len()
    );
    for a in &plan.allocations {
        log::debug!(
            "  tensor #{}: [{}, {}) live {:?}..={:?}",
            a.tensor,
            a.offset,
            a.end(),
            a.interval.birth,
            a.interval.death
        );
    }
    plan
}

fn sequential_size(lifetimes: &[Lifetime]) -> usize {
    lifetimes.iter().map(|l| l.size).sum()
}

/// Every tensor gets its own region, in birth order.
fn allocate_sequentially(lifetimes: &[Lifetime]) -> MemoryPlan {
    let mut plan = MemoryPlan {
        sequential_size: sequential_size(lifetimes),
        ..MemoryPlan::default()
    };
    let mut cursor = 0;
    for l in lifetimes {
        plan.push(Allocation {
            tensor: l.tensor,
            offset: cursor,
            size: l.size,
            interval: l.interval,
        });
        cursor += l.size;
    }
    plan
}

/// Walk the timeline; at each moment allocate that moment's births, then
/// release its deaths and merge neighbouring free blocks.
fn allocate_with_reuse(lifetimes: &[Lifetime]) -> MemoryPlan {
    let mut plan = MemoryPlan {
        sequential_size: sequential_size(lifetimes),
        ..MemoryPlan::default()
    };

    let last = lifetimes
        .iter()
        .map(|l| l.interval.death)
        .max()
        .unwrap_or(Moment::BeforeSchedule);
    let len = match last {
        Moment::BeforeSchedule => 0,
        Moment::At(p) => p + 1,
    };

    let mut births: HashMap<Moment, Vec<&Lifetime>> = HashMap::new();
    let mut deaths: HashMap<Moment, Vec<&Lifetime>> = HashMap::new();
    for l in lifetimes {
        births.entry(l.interval.birth).or_default().push(l);
        deaths.entry(l.interval.death).or_default().push(l);
    }

    let mut free = FreeList::default();
    let mut end = 0;
    for moment in Moment::timeline(len) {
        for l in births.get(&moment).into_iter().flatten() {
            let offset = match free.take(l.size) {
                Some(offset) => offset,
                None => {
                    let offset = end;
                    end += l.size;
                    offset
                }
            };
            plan.push(Allocation {
                tensor: l.tensor,
                offset,
                size: l.size,
                interval: l.interval,
            });
        }

        let dying = deaths.get(&moment).map(Vec::as_slice).unwrap_or_default();
        if dying.is_empty() {
            continue;
        }
        for l in dying {
            if let Some(offset) = plan.offset(l.tensor) {
                free.release(offset, l.size);
            }
        }
        free.coalesce();
    }

    plan.total_size = end;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::ir::builder::{families, mixed_families, GraphBuilder};
    use crate::ir::{Graph, OpKind};
    use crate::memory::classify::{classify, ElementWidth};
    use crate::memory::liveness::lifetimes;
    use crate::schedule::schedule;

    fn plan(graph: &Graph, strategy: AllocStrategy) -> (MemoryPlan, Vec<Lifetime>) {
        let c = classify(graph, ElementWidth::Fixed(1), &mut Diagnostics::new());
        let s = schedule(graph).unwrap();
        let lt = lifetimes(graph, &s, &c);
        (allocate(&lt, strategy), lt)
    }

    fn lifetime(tensor: TensorId, size: usize, birth: Moment, death: Moment) -> Lifetime {
        Lifetime {
            tensor,
            size,
            interval: Interval { birth, death },
        }
    }

    #[test]
    fn two_node_chain_reuses_input_region() {
        let mut b = GraphBuilder::new();
        let i = b.input("I", &[10]);
        let o1 = b.tensor("O1", &[10]);
        let o2 = b.output("O2", &[5]);
        b.node("N1", OpKind::Relu, &[i], &[o1]);
        b.node("N2", OpKind::Relu, &[o1], &[o2]);
        let graph = b.build();

        let (reuse, _) = plan(&graph, AllocStrategy::Reuse);
        assert_eq!(reuse.offset(i), Some(0));
        assert_eq!(reuse.offset(o1), Some(10));
        assert_eq!(reuse.offset(o2), Some(0));
        assert_eq!(reuse.total_size, 20);
        assert_eq!(reuse.sequential_size, 25);
        assert!(reuse.check_disjoint());

        let (seq, _) = plan(&graph, AllocStrategy::Sequential);
        assert_eq!(seq.offset(o2), Some(20));
        assert_eq!(seq.total_size, 25);
    }

    #[test]
    fn best_fit_prefers_tightest_block() {
        use Moment::{At, BeforeSchedule};
        // Frees a 8-byte block at 0 and a 4-byte block at 12 at position 0,
        // keeping an 8-byte separator alive in between.
        let lts = [
            lifetime(0, 8, BeforeSchedule, At(0)),
            lifetime(1, 4, BeforeSchedule, At(1)),
            lifetime(2, 4, BeforeSchedule, At(0)),
            lifetime(3, 4, At(1), At(1)),
            lifetime(4, 8, At(1), At(1)),
        ];
        // Layout before position 1: [0,8) free, [8,12) live, [12,16) free.
        let plan = allocate(&lts, AllocStrategy::Reuse);
        assert_eq!(plan.offset(3), Some(12));
        assert_eq!(plan.offset(4), Some(0));
        assert_eq!(plan.total_size, 16);
        assert!(plan.check_disjoint());
    }

    #[test]
    fn ties_go_to_lowest_offset() {
        use Moment::{At, BeforeSchedule};
        let lts = [
            lifetime(0, 4, BeforeSchedule, At(0)),
            lifetime(1, 4, BeforeSchedule, At(1)),
            lifetime(2, 4, BeforeSchedule, At(0)),
            lifetime(3, 4, At(1), At(1)),
        ];
        let plan = allocate(&lts, AllocStrategy::Reuse);
        assert_eq!(plan.offset(3), Some(0));
    }

    #[test]
    fn neighbouring_frees_coalesce() {
        use Moment::{At, BeforeSchedule};
        let lts = [
            lifetime(0, 4, BeforeSchedule, At(0)),
            lifetime(1, 4, BeforeSchedule, At(0)),
            lifetime(2, 8, At(1), At(1)),
        ];
        let plan = allocate(&lts, AllocStrategy::Reuse);
        assert_eq!(plan.offset(2), Some(0));
        assert_eq!(plan.total_size, 8);
    }

    #[test]
    fn empty_plan() {
        let plan = allocate(&[], AllocStrategy::Reuse);
        assert_eq!(plan.total_size, 0);
        assert!(plan.allocations().is_empty());
    }

    #[test]
    fn conflict_detection() {
        use Moment::At;
        let mut plan = MemoryPlan::default();
        plan.push(Allocation {
            tensor: 0,
            offset: 0,
            size: 8,
            interval: Interval {
                birth: At(0),
                death: At(1),
            },
        });
        plan.push(Allocation {
            tensor: 1,
            offset: 4,
            size: 8,
            interval: Interval {
                birth: At(1),
                death: At(2),
            },
        });
        assert!(!plan.check_disjoint());
        let (a, b) = plan.first_conflict().unwrap();
        assert_eq!((a.tensor, b.tensor), (0, 1));
    }

    #[test]
    fn generated_graphs_stay_disjoint_and_within_baseline() {
        for (name, graph) in families() {
            let (reuse, lt) = plan(&graph, AllocStrategy::Reuse);
            assert!(reuse.check_disjoint(), "{name}: {:?}", reuse.first_conflict());
            assert!(reuse.total_size <= reuse.sequential_size, "{name}");

            let (seq, _) = plan(&graph, AllocStrategy::Sequential);
            assert!(seq.check_disjoint(), "{name}");
            assert_eq!(seq.total_size, reuse.sequential_size, "{name}");

            // Uniform sizes: any region freed early is refilled by a later birth.
            let last = lt.iter().map(|l| l.interval.death).max().unwrap();
            if lt.iter().any(|l| l.interval.death < last) {
                assert!(reuse.total_size < reuse.sequential_size, "{name}");
            }
        }
    }

    #[test]
    fn uneven_sizes_stay_disjoint_and_within_baseline() {
        for (name, graph) in mixed_families() {
            let (reuse, lt) = plan(&graph, AllocStrategy::Reuse);
            assert_eq!(reuse.allocations().len(), lt.len(), "{name}");
            assert!(reuse.first_conflict().is_none(), "{name}: {:?}", reuse.first_conflict());
            assert!(reuse.total_size <= reuse.sequential_size, "{name}");

            // Pairwise check independent of `first_conflict`.
            let all = reuse.allocations();
            for (i, a) in all.iter().enumerate() {
                assert!(a.end() <= reuse.total_size, "{name}");
                for b in &all[i + 1..] {
                    if a.interval.overlaps(&b.interval) {
                        assert!(
                            a.end() <= b.offset || b.end() <= a.offset,
                            "{name}: {a:?} overlaps {b:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn small_freed_block_is_preferred_over_large_one() {
        use Moment::{At, BeforeSchedule};
        // Holes of 64 and 2 bytes, kept apart by a live tensor. The 2-byte
        // birth takes the small hole and leaves the large one for 48 bytes.
        let lts = [
            lifetime(0, 64, BeforeSchedule, At(0)),
            lifetime(2, 8, BeforeSchedule, At(2)),
            lifetime(1, 2, BeforeSchedule, At(0)),
            lifetime(3, 2, At(1), At(2)),
            lifetime(4, 48, At(1), At(2)),
        ];
        let plan = allocate(&lts, AllocStrategy::Reuse);
        assert_eq!(plan.offset(1), Some(72));
        assert_eq!(plan.offset(3), Some(72));
        assert_eq!(plan.offset(4), Some(0));
        assert_eq!(plan.total_size, 74);
        assert!(plan.check_disjoint());
    }
}
