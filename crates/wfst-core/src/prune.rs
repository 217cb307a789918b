//! Weight- and state-count pruning for natural-order semirings.

use tracing::error;

use crate::connect::connect;
use crate::dfs::AnyArcFilter;
use crate::fst::{Arc, ExpandedFst, Fst, MutableFst, StateId, VectorFst, EPSILON, NO_STATE};
use crate::properties::ERROR;
use crate::queue::ShortestFirstQueue;
use crate::semiring::{natural_less, Semiring, PATH};
use crate::shortest_distance::{shortest_distance, ShortestDistanceConfig};

/// Removes states and arcs lying only on paths worse than
/// `best ⊗ weight_threshold`; with `state_threshold` set, additionally keeps
/// at most that many best states.
///
/// Requires the `PATH` property (a total natural order); otherwise the FST is
/// marked `ERROR` and left untouched.
pub fn prune<W: Semiring>(
    fst: &mut VectorFst<W>,
    weight_threshold: W,
    state_threshold: StateId,
    delta: f32,
) {
    if W::PROPERTIES & PATH == 0 {
        error!("prune: semiring has no total natural order");
        fst.set_properties(ERROR, ERROR);
        return;
    }
    if weight_threshold.is_zero() && state_threshold == NO_STATE {
        return;
    }
    let n = fst.num_states() as usize;
    let start = fst.start();
    if start == NO_STATE || n == 0 {
        return;
    }

    let config = ShortestDistanceConfig { delta };
    let forward = match shortest_distance(fst, start, AnyArcFilter, ShortestFirstQueue::new(), config)
    {
        Ok(d) => d,
        Err(_) => {
            fst.set_properties(ERROR, ERROR);
            return;
        }
    };

    // Distance to a final state, computed on the reversed graph hung off a
    // super-source whose arcs carry the final weights.
    let mut rev: VectorFst<W> = VectorFst::new();
    rev.reserve_states(n + 1);
    for _ in 0..n {
        rev.add_state();
    }
    let super_source = rev.add_state();
    rev.set_start(super_source);
    for s in 0..n as StateId {
        for arc in fst.arcs(s) {
            rev.add_arc(
                arc.nextstate,
                Arc::new(arc.ilabel, arc.olabel, arc.weight.reverse(), s),
            );
        }
        let final_weight = fst.final_weight(s);
        if !final_weight.is_zero() {
            rev.add_arc(super_source, Arc::new(EPSILON, EPSILON, final_weight.reverse(), s));
        }
    }
    let backward =
        match shortest_distance(&rev, super_source, AnyArcFilter, ShortestFirstQueue::new(), config)
        {
            Ok(d) => d,
            Err(_) => {
                fst.set_properties(ERROR, ERROR);
                return;
            }
        };
    let backward_at = |s: StateId| -> W {
        backward
            .get(s as usize)
            .cloned()
            .unwrap_or_else(W::zero)
            .reverse()
    };

    let forward_at = |s: StateId| -> W {
        forward.get(s as usize).cloned().unwrap_or_else(W::zero)
    };

    // Best full-path weight and the pruning bound.
    let best = backward_at(start);
    let bound = if weight_threshold.is_zero() {
        None
    } else {
        Some(best.times(&weight_threshold))
    };

    let through = |s: StateId| forward_at(s).times(&backward_at(s));

    let over_bound = |w: &W| match &bound {
        Some(b) => natural_less(b, w),
        None => false,
    };

    let mut keep: Vec<bool> = (0..n as StateId)
        .map(|s| {
            let t = through(s);
            !t.is_zero() && !over_bound(&t)
        })
        .collect();

    if state_threshold != NO_STATE
        && (state_threshold as usize) < keep.iter().filter(|&&k| k).count()
    {
        // Keep the state_threshold best states by through-weight.
        let mut ranked: Vec<StateId> = (0..n as StateId).filter(|&s| keep[s as usize]).collect();
        ranked.sort_by(|&a, &b| {
            if natural_less(&through(a), &through(b)) {
                std::cmp::Ordering::Less
            } else if natural_less(&through(b), &through(a)) {
                std::cmp::Ordering::Greater
            } else {
                a.cmp(&b)
            }
        });
        for &s in ranked.iter().skip(state_threshold as usize) {
            keep[s as usize] = false;
        }
    }

    // Drop arcs whose own through-weight breaks the bound, then trim.
    for s in 0..n as StateId {
        if !keep[s as usize] {
            continue;
        }
        let fwd = forward_at(s);
        let retained: Vec<Arc<W>> = fst
            .arcs(s)
            .filter(|arc| {
                keep[arc.nextstate as usize]
                    && !over_bound(&fwd.times(&arc.weight).times(&backward_at(arc.nextstate)))
            })
            .collect();
        if retained.len() != fst.num_arcs(s) {
            fst.delete_arcs(s);
            for arc in retained {
                fst.add_arc(s, arc);
            }
        }
    }
    fst.retain_states(&keep);
    connect(fst);
}
