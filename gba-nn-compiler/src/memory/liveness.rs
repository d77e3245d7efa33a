//! Birth and death of every RAM tensor along a schedule.

use std::collections::{HashMap, HashSet};

use crate::ir::{Graph, TensorId};
use crate::schedule::Schedule;

use super::classify::Classification;

/// A point on the schedule timeline. Graph inputs exist before the first
/// node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Moment {
    BeforeSchedule,
    At(usize),
}

impl Moment {
    /// Every moment of a schedule with `len` positions, in order.
    pub fn timeline(len: usize) -> impl Iterator<Item = Moment> {
        std::iter::once(Moment::BeforeSchedule).chain((0..len).map(Moment::At))
    }
}

/// Inclusive range of moments during which a tensor must stay intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub birth: Moment,
    pub death: Moment,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.birth <= other.death && other.birth <= self.death
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifetime {
    pub tensor: TensorId,
    pub size: usize,
    pub interval: Interval,
}

/// Lifetimes of the RAM tensors in birth order: graph inputs as declared,
/// then node outputs in schedule order.
pub fn lifetimes(graph: &Graph, schedule: &Schedule, classification: &Classification) -> Vec<Lifetime> {
    let mut births: Vec<(TensorId, Moment)> = Vec::new();
    let mut born: HashSet<TensorId> = HashSet::new();
    for &input in &graph.inputs {
        if classification.ram_bytes(input).is_some() && born.insert(input) {
            births.push((input, Moment::BeforeSchedule));
        }
    }

    let mut last_use: HashMap<TensorId, Moment> = HashMap::new();
    for (pos, &id) in schedule.order.iter().enumerate() {
        let node = graph.node(id);
        for (slot, &input) in node.inputs.iter().enumerate() {
            if !node.op.reads_activation(slot) || classification.ram_bytes(input).is_none() {
                continue;
            }
            let entry = last_use.entry(input).or_insert(Moment::At(pos));
            *entry = (*entry).max(Moment::At(pos));
        }
        for &output in &node.outputs {
            if classification.ram_bytes(output).is_some() && born.insert(output) {
                births.push((output, Moment::At(pos)));
            }
        }
    }

    let end = match schedule.len() {
        0 => Moment::BeforeSchedule,
        n => Moment::At(n - 1),
    };

    for (id, _) in classification.ram() {
        if !born.contains(&id) {
            log::warn!(
                "tensor '{}' is neither produced nor a graph input, not allocated",
                graph.tensor(id).name
            );
        }
    }

    births
        .into_iter()
        .filter_map(|(tensor, birth)| {
            let size = classification.ram_bytes(tensor)?;
            let mut death = last_use.get(&tensor).copied().unwrap_or(birth).max(birth);
            if graph.is_output(tensor) {
                death = death.max(end);
            }
            Some(Lifetime {
                tensor,
                size,
                interval: Interval { birth, death },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::ir::builder::{fan_out, GraphBuilder};
    use crate::ir::{OpKind, QuantSlots};
    use crate::memory::classify::{classify, ElementWidth};
    use crate::schedule::schedule;

    fn lifetimes_of(graph: &Graph) -> Vec<Lifetime> {
        let c = classify(graph, ElementWidth::Fixed(1), &mut Diagnostics::new());
        let s = schedule(graph).unwrap();
        lifetimes(graph, &s, &c)
    }

    fn interval_of(lifetimes: &[Lifetime], tensor: TensorId) -> Interval {
        lifetimes
            .iter()
            .find(|l| l.tensor == tensor)
            .map(|l| l.interval)
            .unwrap()
    }

    #[test]
    fn chain_intervals() {
        let mut b = GraphBuilder::new();
        let i = b.input("I", &[10]);
        let o1 = b.tensor("O1", &[10]);
        let o2 = b.output("O2", &[5]);
        b.node("N1", OpKind::Relu, &[i], &[o1]);
        b.node("N2", OpKind::Relu, &[o1], &[o2]);
        let graph = b.build();

        let lt = lifetimes_of(&graph);
        assert_eq!(lt.iter().map(|l| l.tensor).collect::<Vec<_>>(), vec![i, o1, o2]);
        assert_eq!(
            interval_of(&lt, i),
            Interval {
                birth: Moment::BeforeSchedule,
                death: Moment::At(0)
            }
        );
        assert_eq!(
            interval_of(&lt, o1),
            Interval {
                birth: Moment::At(0),
                death: Moment::At(1)
            }
        );
        assert_eq!(
            interval_of(&lt, o2),
            Interval {
                birth: Moment::At(1),
                death: Moment::At(1)
            }
        );
    }

    #[test]
    fn outputs_live_until_the_end() {
        let graph = fan_out(3, 4);
        let lt = lifetimes_of(&graph);
        for &out in &graph.outputs {
            assert_eq!(interval_of(&lt, out).death, Moment::At(2));
        }
    }

    #[test]
    fn unconsumed_tensor_dies_at_birth() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[4]);
        let dead = b.tensor("dead", &[4]);
        let y = b.output("y", &[4]);
        b.node("a", OpKind::Relu, &[x], &[dead]);
        b.node("b", OpKind::Relu, &[x], &[y]);
        let graph = b.build();

        let lt = lifetimes_of(&graph);
        assert_eq!(
            interval_of(&lt, dead),
            Interval {
                birth: Moment::At(0),
                death: Moment::At(0)
            }
        );
        assert_eq!(interval_of(&lt, x).death, Moment::At(1));
    }

    #[test]
    fn fused_quant_operands_do_not_extend_liveness() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[4]);
        let t = b.tensor("t", &[4]);
        let w = b.tensor("w_act", &[4]);
        let y = b.output("y", &[2]);
        let last = b.tensor("last", &[2]);
        b.node("pre", OpKind::Relu, &[x], &[t]);
        b.node("pre_w", OpKind::Relu, &[x], &[w]);
        // `w_act` occupies an operand slot the fused kernel reads as a constant.
        b.node(
            "fc",
            OpKind::QGemm(QuantSlots::packed(6)),
            &[t, w, x, x, x, x],
            &[last],
        );
        b.node("post", OpKind::Relu, &[last], &[y]);
        let graph = b.build();

        let lt = lifetimes_of(&graph);
        assert_eq!(interval_of(&lt, t).death, Moment::At(2));
        assert_eq!(interval_of(&lt, w).death, Moment::At(1));
        assert_eq!(interval_of(&lt, x).death, Moment::At(1));
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = Interval {
            birth: Moment::BeforeSchedule,
            death: Moment::At(0),
        };
        let b = Interval {
            birth: Moment::At(0),
            death: Moment::At(1),
        };
        let c = Interval {
            birth: Moment::At(1),
            death: Moment::At(1),
        };
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn timeline_starts_before_schedule() {
        let moments: Vec<_> = Moment::timeline(2).collect();
        assert_eq!(
            moments,
            vec![Moment::BeforeSchedule, Moment::At(0), Moment::At(1)]
        );
    }
}
