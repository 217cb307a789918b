//! Isomorphism test: are two FSTs equal up to a state and arc reordering?
//! The inputs must be deterministic when viewed as unweighted automata over
//! `(ilabel, olabel, weight)` triples.

use std::cell::Cell;
use std::collections::VecDeque;

use tracing::error;

use crate::errors::FstError;
use crate::fst::{Arc, Fst, StateId, NO_STATE};
use crate::semiring::{natural_less, Semiring, IDEMPOTENT};

// Weight order used for pairing arcs: the natural order when one exists,
// otherwise quantized hashes with collision detection.
fn weight_less<W: Semiring>(w1: &W, w2: &W, delta: f32, collision: &Cell<bool>) -> bool {
    if W::PROPERTIES & IDEMPOTENT != 0 {
        natural_less(w1, w2)
    } else {
        let q1 = w1.quantize(delta);
        let q2 = w2.quantize(delta);
        let h1 = q1.weight_hash();
        let h2 = q2.weight_hash();
        if h1 == h2 && q1 != q2 {
            error!("isomorphic: weight hash collision");
            collision.set(true);
        }
        h1 < h2
    }
}

fn arc_less<W: Semiring>(
    a1: &Arc<W>,
    a2: &Arc<W>,
    delta: f32,
    collision: &Cell<bool>,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match a1.ilabel.cmp(&a2.ilabel).then(a1.olabel.cmp(&a2.olabel)) {
        Ordering::Equal => {
            if weight_less(&a1.weight, &a2.weight, delta, collision) {
                Ordering::Less
            } else if weight_less(&a2.weight, &a1.weight, delta, collision) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        ord => ord,
    }
}

struct Isomorphism<'a, W: Semiring, F1: Fst<W>, F2: Fst<W>> {
    fst1: &'a F1,
    fst2: &'a F2,
    delta: f32,
    // pair[s1] is the state of fst2 matched to s1, NO_STATE if unseen.
    pair: Vec<StateId>,
    queue: VecDeque<(StateId, StateId)>,
    collision: Cell<bool>,
    nondet: Cell<bool>,
    arcs1: Vec<Arc<W>>,
    arcs2: Vec<Arc<W>>,
}

impl<'a, W: Semiring, F1: Fst<W>, F2: Fst<W>> Isomorphism<'a, W, F1, F2> {
    fn new(fst1: &'a F1, fst2: &'a F2, delta: f32) -> Self {
        Isomorphism {
            fst1,
            fst2,
            delta,
            pair: Vec::new(),
            queue: VecDeque::new(),
            collision: Cell::new(false),
            nondet: Cell::new(false),
            arcs1: Vec::new(),
            arcs2: Vec::new(),
        }
    }

    // Extends the pairing with (s1, s2); false if s1 is already matched to
    // a different state.
    fn pair_state(&mut self, s1: StateId, s2: StateId) -> bool {
        if self.pair.len() <= s1 as usize {
            self.pair.resize(s1 as usize + 1, NO_STATE);
        }
        if self.pair[s1 as usize] == s2 {
            return true;
        }
        if self.pair[s1 as usize] != NO_STATE {
            return false;
        }
        self.pair[s1 as usize] = s2;
        self.queue.push_back((s1, s2));
        true
    }

    fn isomorphic_state(&mut self, s1: StateId, s2: StateId) -> bool {
        if !self
            .fst1
            .final_weight(s1)
            .approx_eq(&self.fst2.final_weight(s2), self.delta)
        {
            return false;
        }
        if self.fst1.num_arcs(s1) != self.fst2.num_arcs(s2) {
            return false;
        }

        self.arcs1.clear();
        self.arcs2.clear();
        self.arcs1.extend(self.fst1.arcs(s1));
        self.arcs2.extend(self.fst2.arcs(s2));

        let delta = self.delta;
        let collision = &self.collision;
        self.arcs1.sort_by(|a, b| arc_less(a, b, delta, collision));
        self.arcs2.sort_by(|a, b| arc_less(a, b, delta, collision));

        let arcs1 = std::mem::take(&mut self.arcs1);
        let arcs2 = std::mem::take(&mut self.arcs2);
        let mut ok = true;
        for i in 0..arcs1.len() {
            let arc1 = &arcs1[i];
            let arc2 = &arcs2[i];
            if arc1.ilabel != arc2.ilabel
                || arc1.olabel != arc2.olabel
                || !arc1.weight.approx_eq(&arc2.weight, self.delta)
                || !self.pair_state(arc1.nextstate, arc2.nextstate)
            {
                ok = false;
                break;
            }
            // Two sort-adjacent arcs with equal triples make the pairing
            // ambiguous: the inputs were not deterministic as unweighted
            // automata.
            if i > 0 {
                let prev = &arcs1[i - 1];
                if arc1.ilabel == prev.ilabel
                    && arc1.olabel == prev.olabel
                    && arc1.weight.approx_eq(&prev.weight, self.delta)
                {
                    error!("isomorphic: non-determinism as an unweighted automaton");
                    self.nondet.set(true);
                    ok = false;
                    break;
                }
            }
        }
        self.arcs1 = arcs1;
        self.arcs2 = arcs2;
        ok
    }

    fn run(&mut self) -> bool {
        let start1 = self.fst1.start();
        let start2 = self.fst2.start();
        if start1 == NO_STATE && start2 == NO_STATE {
            return true;
        }
        if start1 == NO_STATE || start2 == NO_STATE {
            return false;
        }
        self.pair_state(start1, start2);
        while let Some((s1, s2)) = self.queue.pop_front() {
            if !self.isomorphic_state(s1, s2) {
                return false;
            }
            if self.collision.get() || self.nondet.get() {
                return false;
            }
        }
        true
    }
}

/// Tests whether two FSTs have the same states and arcs up to reordering,
/// with weights compared at tolerance `delta`.
///
/// An indeterminate comparison (unweighted non-determinism, or a weight
/// hash collision in a semiring without a natural order) returns an error,
/// which supersedes the boolean answer.
pub fn isomorphic<W: Semiring, F1: Fst<W>, F2: Fst<W>>(
    fst1: &F1,
    fst2: &F2,
    delta: f32,
) -> Result<bool, FstError> {
    let mut iso = Isomorphism::new(fst1, fst2, delta);
    let result = iso.run();
    if iso.collision.get() {
        Err(FstError::WeightHashCollision { delta })
    } else if iso.nondet.get() {
        Err(FstError::NondeterministicUnweighted)
    } else {
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::{MutableFst, VectorFst};
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    fn w(v: f32) -> W {
        TropicalWeight(v)
    }

    /// Three-state cycle fixture; `perm` renumbers the states.
    fn cycle_fst(perm: [StateId; 3]) -> VectorFst<W> {
        let mut fst = VectorFst::new();
        for _ in 0..3 {
            fst.add_state();
        }
        fst.set_start(perm[0]);
        fst.add_arc(perm[0], Arc::new(1, 1, w(1.0), perm[1]));
        fst.add_arc(perm[1], Arc::new(2, 2, w(2.0), perm[2]));
        fst.add_arc(perm[2], Arc::new(3, 3, w(3.0), perm[0]));
        fst.set_final(perm[2], w(0.5));
        fst
    }

    #[test]
    fn test_isomorphic_under_renumbering() {
        let a = cycle_fst([0, 1, 2]);
        let b = cycle_fst([2, 0, 1]);
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(true));
    }

    #[test]
    fn test_reflexive() {
        let a = cycle_fst([0, 1, 2]);
        assert_eq!(isomorphic(&a, &a, 1e-4), Ok(true));
    }

    #[test]
    fn test_symmetric() {
        let a = cycle_fst([0, 1, 2]);
        let b = cycle_fst([1, 2, 0]);
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(true));
        assert_eq!(isomorphic(&b, &a, 1e-4), Ok(true));
    }

    #[test]
    fn test_weight_difference_detected() {
        let a = cycle_fst([0, 1, 2]);
        let mut b = cycle_fst([0, 1, 2]);
        b.delete_arcs(1);
        b.add_arc(1, Arc::new(2, 2, w(2.5), 2));
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(false));
    }

    #[test]
    fn test_structure_difference_detected() {
        let a = cycle_fst([0, 1, 2]);
        let mut b = cycle_fst([0, 1, 2]);
        b.add_arc(2, Arc::new(4, 4, w(1.0), 1));
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(false));
    }

    #[test]
    fn test_empty_fsts() {
        let a: VectorFst<W> = VectorFst::new();
        let b: VectorFst<W> = VectorFst::new();
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(true));
        let c = cycle_fst([0, 1, 2]);
        assert_eq!(isomorphic(&a, &c, 1e-4), Ok(false));
    }

    #[test]
    fn test_duplicate_arcs_report_error() {
        // Two identical (ilabel, olabel, weight) arcs from the start state:
        // the sort-based pairing is ambiguous, so this must error even
        // against an exact copy.
        let mut a: VectorFst<W> = VectorFst::new();
        for _ in 0..2 {
            a.add_state();
        }
        a.set_start(0);
        a.add_arc(0, Arc::new(1, 1, w(1.0), 1));
        a.add_arc(0, Arc::new(1, 1, w(1.0), 1));
        a.set_final(1, w(0.0));
        let b = a.clone();
        assert_eq!(
            isomorphic(&a, &b, 1e-4),
            Err(FstError::NondeterministicUnweighted)
        );
    }

    #[test]
    fn test_final_weight_mismatch() {
        let a = cycle_fst([0, 1, 2]);
        let mut b = cycle_fst([0, 1, 2]);
        b.set_final(2, w(0.75));
        assert_eq!(isomorphic(&a, &b, 1e-4), Ok(false));
    }
}
