//! Removal of states that are unreachable from the start or cannot reach a
//! final state.

use std::collections::VecDeque;

use crate::fst::{ExpandedFst, Fst, MutableFst, StateId, VectorFst, NO_STATE};
use crate::properties::{ACCESSIBLE, COACCESSIBLE, NOT_ACCESSIBLE, NOT_COACCESSIBLE};
use crate::semiring::Semiring;

/// Trims `fst` to its accessible and coaccessible part, renumbering states
/// contiguously.
pub fn connect<W: Semiring>(fst: &mut VectorFst<W>) {
    let n = fst.num_states() as usize;
    if n == 0 {
        return;
    }

    // Forward reachability from the start.
    let mut accessible = vec![false; n];
    let mut queue: VecDeque<StateId> = VecDeque::new();
    let start = fst.start();
    if start != NO_STATE {
        accessible[start as usize] = true;
        queue.push_back(start);
    }
    while let Some(s) = queue.pop_front() {
        for arc in fst.arcs(s) {
            if !accessible[arc.nextstate as usize] {
                accessible[arc.nextstate as usize] = true;
                queue.push_back(arc.nextstate);
            }
        }
    }

    // Backward reachability from the final states.
    let mut rev: Vec<Vec<StateId>> = vec![Vec::new(); n];
    let mut coaccessible = vec![false; n];
    for s in 0..n as StateId {
        for arc in fst.arcs(s) {
            rev[arc.nextstate as usize].push(s);
        }
        if !fst.final_weight(s).is_zero() {
            coaccessible[s as usize] = true;
            queue.push_back(s);
        }
    }
    while let Some(s) = queue.pop_front() {
        for &p in &rev[s as usize] {
            if !coaccessible[p as usize] {
                coaccessible[p as usize] = true;
                queue.push_back(p);
            }
        }
    }

    let keep: Vec<bool> = (0..n)
        .map(|s| accessible[s] && coaccessible[s])
        .collect();
    fst.retain_states(&keep);
    fst.set_properties(
        ACCESSIBLE | COACCESSIBLE,
        ACCESSIBLE | NOT_ACCESSIBLE | COACCESSIBLE | NOT_COACCESSIBLE,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::{Arc, MutableFst};
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    fn w(v: f32) -> W {
        TropicalWeight(v)
    }

    #[test]
    fn test_connect_removes_unreachable_and_dead() {
        let mut fst: VectorFst<W> = VectorFst::new();
        for _ in 0..4 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.set_final(1, w(0.0));
        fst.add_arc(0, Arc::new(1, 1, w(1.0), 1));
        // State 2: reachable, but dead (no path to a final state)
        fst.add_arc(0, Arc::new(2, 2, w(1.0), 2));
        // State 3: coaccessible but unreachable
        fst.add_arc(3, Arc::new(3, 3, w(1.0), 1));

        connect(&mut fst);
        assert_eq!(fst.num_states(), 2);
        assert_eq!(fst.start(), 0);
        assert_eq!(fst.num_arcs(0), 1);
        assert_eq!(fst.final_weight(1), w(0.0));
    }

    #[test]
    fn test_connect_empty_start() {
        let mut fst: VectorFst<W> = VectorFst::new();
        fst.add_state();
        fst.add_state();
        connect(&mut fst);
        assert_eq!(fst.num_states(), 0);
        assert_eq!(fst.start(), NO_STATE);
    }

    #[test]
    fn test_connect_noop_when_trim() {
        let mut fst: VectorFst<W> = VectorFst::new();
        for _ in 0..2 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.set_final(1, w(0.0));
        fst.add_arc(0, Arc::new(1, 1, w(1.0), 1));
        connect(&mut fst);
        assert_eq!(fst.num_states(), 2);
        assert_eq!(fst.num_arcs(0), 1);
    }
}
