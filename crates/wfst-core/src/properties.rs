//! Per-FST property bits.
//!
//! Binary structural facts are stored as (positive, negative) bit pairs so
//! that "unknown" is distinguishable from "false": a pair with neither bit
//! set is unknown, with exactly one bit set it is known. `EXPANDED`,
//! `MUTABLE` and `ERROR` are intrinsic single bits.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::fst::{ExpandedFst, StateId, EPSILON, NO_STATE};
use crate::semiring::Semiring;

pub const EXPANDED: u64 = 1 << 0;
pub const MUTABLE: u64 = 1 << 1;
/// Sticky and contagious: every FST derived from an erroneous one carries it.
pub const ERROR: u64 = 1 << 2;

pub const ACCEPTOR: u64 = 1 << 3;
pub const NOT_ACCEPTOR: u64 = 1 << 4;
pub const I_DETERMINISTIC: u64 = 1 << 5;
pub const NON_I_DETERMINISTIC: u64 = 1 << 6;
pub const O_DETERMINISTIC: u64 = 1 << 7;
pub const NON_O_DETERMINISTIC: u64 = 1 << 8;
/// Some arc has epsilon on both sides.
pub const EPSILONS: u64 = 1 << 9;
pub const NO_EPSILONS: u64 = 1 << 10;
pub const I_EPSILONS: u64 = 1 << 11;
pub const NO_I_EPSILONS: u64 = 1 << 12;
pub const O_EPSILONS: u64 = 1 << 13;
pub const NO_O_EPSILONS: u64 = 1 << 14;
pub const I_LABEL_SORTED: u64 = 1 << 15;
pub const NOT_I_LABEL_SORTED: u64 = 1 << 16;
pub const O_LABEL_SORTED: u64 = 1 << 17;
pub const NOT_O_LABEL_SORTED: u64 = 1 << 18;
pub const WEIGHTED: u64 = 1 << 19;
pub const UNWEIGHTED: u64 = 1 << 20;
pub const CYCLIC: u64 = 1 << 21;
pub const ACYCLIC: u64 = 1 << 22;
pub const INITIAL_CYCLIC: u64 = 1 << 23;
pub const INITIAL_ACYCLIC: u64 = 1 << 24;
/// Arcs go from lower to higher state ids.
pub const TOP_SORTED: u64 = 1 << 25;
pub const NOT_TOP_SORTED: u64 = 1 << 26;
pub const ACCESSIBLE: u64 = 1 << 27;
pub const NOT_ACCESSIBLE: u64 = 1 << 28;
pub const COACCESSIBLE: u64 = 1 << 29;
pub const NOT_COACCESSIBLE: u64 = 1 << 30;

const PAIRS: [(u64, u64); 14] = [
    (ACCEPTOR, NOT_ACCEPTOR),
    (I_DETERMINISTIC, NON_I_DETERMINISTIC),
    (O_DETERMINISTIC, NON_O_DETERMINISTIC),
    (EPSILONS, NO_EPSILONS),
    (I_EPSILONS, NO_I_EPSILONS),
    (O_EPSILONS, NO_O_EPSILONS),
    (I_LABEL_SORTED, NOT_I_LABEL_SORTED),
    (O_LABEL_SORTED, NOT_O_LABEL_SORTED),
    (WEIGHTED, UNWEIGHTED),
    (CYCLIC, ACYCLIC),
    (INITIAL_CYCLIC, INITIAL_ACYCLIC),
    (TOP_SORTED, NOT_TOP_SORTED),
    (ACCESSIBLE, NOT_ACCESSIBLE),
    (COACCESSIBLE, NOT_COACCESSIBLE),
];

/// All positive bits of the binary pairs.
pub const POS_PROPERTIES: u64 = ACCEPTOR
    | I_DETERMINISTIC
    | O_DETERMINISTIC
    | EPSILONS
    | I_EPSILONS
    | O_EPSILONS
    | I_LABEL_SORTED
    | O_LABEL_SORTED
    | WEIGHTED
    | CYCLIC
    | INITIAL_CYCLIC
    | TOP_SORTED
    | ACCESSIBLE
    | COACCESSIBLE;

/// All negative bits of the binary pairs.
pub const NEG_PROPERTIES: u64 = NOT_ACCEPTOR
    | NON_I_DETERMINISTIC
    | NON_O_DETERMINISTIC
    | NO_EPSILONS
    | NO_I_EPSILONS
    | NO_O_EPSILONS
    | NOT_I_LABEL_SORTED
    | NOT_O_LABEL_SORTED
    | UNWEIGHTED
    | ACYCLIC
    | INITIAL_ACYCLIC
    | NOT_TOP_SORTED
    | NOT_ACCESSIBLE
    | NOT_COACCESSIBLE;

pub const BINARY_PROPERTIES: u64 = POS_PROPERTIES | NEG_PROPERTIES;
pub const ALL_PROPERTIES: u64 = BINARY_PROPERTIES | EXPANDED | MUTABLE | ERROR;

/// Mask of bits whose truth value is established in `props`: intrinsic bits
/// plus every pair with at least one side set.
pub fn known_props(props: u64) -> u64 {
    let mut known = EXPANDED | MUTABLE | ERROR;
    for &(pos, neg) in &PAIRS {
        if props & (pos | neg) != 0 {
            known |= pos | neg;
        }
    }
    known
}

/// Properties of the concatenation of FSTs with properties `p1` and `p2`.
///
/// Positive conjunctive facts need both operands; negative facts survive
/// from whichever operand exhibits them. The epsilon-free bits are never
/// preserved: every final state of the first operand grows an
/// epsilon/epsilon bridge arc onto the second's start.
pub fn concat_properties(p1: u64, p2: u64) -> u64 {
    let mut out = ERROR & (p1 | p2);
    out |= (ACCEPTOR | UNWEIGHTED | ACYCLIC) & p1 & p2;
    out |= INITIAL_ACYCLIC & p1;
    out |= (NOT_ACCEPTOR | WEIGHTED | CYCLIC | EPSILONS | I_EPSILONS | O_EPSILONS) & (p1 | p2);
    out
}

/// Properties of epsilon removal applied to an FST with properties `p`.
pub fn rm_epsilon_properties(p: u64) -> u64 {
    let mut out = ERROR & p;
    out |= (ACCEPTOR | ACYCLIC | INITIAL_ACYCLIC) & p;
    out |= NO_EPSILONS;
    if p & ACCEPTOR != 0 {
        // An acceptor's input-side epsilons are exactly its epsilon/epsilon
        // arcs, all of which are gone.
        out |= NO_I_EPSILONS | NO_O_EPSILONS;
    }
    out
}

/// Properties of synchronization applied to an FST with properties `p`.
pub fn synchronize_properties(p: u64) -> u64 {
    let mut out = ERROR & p;
    // An acceptor never builds residuals, so its structure is untouched.
    out |= (ACCEPTOR | UNWEIGHTED | ACYCLIC) & p;
    if p & ACCEPTOR != 0 {
        out |= (EPSILONS | NO_EPSILONS | I_EPSILONS | NO_I_EPSILONS | O_EPSILONS | NO_O_EPSILONS)
            & p;
    }
    out
}

/// Structurally computes every binary property of an expanded FST.
///
/// The result has each pair fully decided; intrinsic bits are not included.
pub fn compute_properties<W: Semiring, F: ExpandedFst<W>>(fst: &F) -> u64 {
    let n = fst.num_states() as usize;

    let mut acceptor = true;
    let mut i_det = true;
    let mut o_det = true;
    let mut epsilons = false;
    let mut i_epsilons = false;
    let mut o_epsilons = false;
    let mut i_sorted = true;
    let mut o_sorted = true;
    let mut weighted = false;
    let mut top_sorted = true;

    let mut ilabels: FxHashSet<u32> = FxHashSet::default();
    let mut olabels: FxHashSet<u32> = FxHashSet::default();

    for s in 0..n as StateId {
        let final_weight = fst.final_weight(s);
        if !final_weight.is_zero() && final_weight != W::one() {
            weighted = true;
        }
        ilabels.clear();
        olabels.clear();
        let mut prev_ilabel = 0;
        let mut prev_olabel = 0;
        let mut first = true;
        for arc in fst.arcs(s) {
            if arc.ilabel != arc.olabel {
                acceptor = false;
            }
            if arc.ilabel == EPSILON {
                i_epsilons = true;
                if arc.olabel == EPSILON {
                    epsilons = true;
                }
            }
            if arc.olabel == EPSILON {
                o_epsilons = true;
            }
            if !ilabels.insert(arc.ilabel) {
                i_det = false;
            }
            if !olabels.insert(arc.olabel) {
                o_det = false;
            }
            if !first {
                if arc.ilabel < prev_ilabel {
                    i_sorted = false;
                }
                if arc.olabel < prev_olabel {
                    o_sorted = false;
                }
            }
            prev_ilabel = arc.ilabel;
            prev_olabel = arc.olabel;
            first = false;
            if arc.weight != W::one() {
                weighted = true;
            }
            if arc.nextstate <= s {
                top_sorted = false;
            }
        }
    }

    let (cyclic, initial_cyclic) = find_cycles(fst);
    let (accessible, coaccessible) = reachability(fst);

    let mut props = 0;
    props |= if acceptor { ACCEPTOR } else { NOT_ACCEPTOR };
    props |= if i_det { I_DETERMINISTIC } else { NON_I_DETERMINISTIC };
    props |= if o_det { O_DETERMINISTIC } else { NON_O_DETERMINISTIC };
    props |= if epsilons { EPSILONS } else { NO_EPSILONS };
    props |= if i_epsilons { I_EPSILONS } else { NO_I_EPSILONS };
    props |= if o_epsilons { O_EPSILONS } else { NO_O_EPSILONS };
    props |= if i_sorted { I_LABEL_SORTED } else { NOT_I_LABEL_SORTED };
    props |= if o_sorted { O_LABEL_SORTED } else { NOT_O_LABEL_SORTED };
    props |= if weighted { WEIGHTED } else { UNWEIGHTED };
    props |= if cyclic { CYCLIC } else { ACYCLIC };
    props |= if initial_cyclic { INITIAL_CYCLIC } else { INITIAL_ACYCLIC };
    props |= if top_sorted && !cyclic { TOP_SORTED } else { NOT_TOP_SORTED };
    props |= if accessible { ACCESSIBLE } else { NOT_ACCESSIBLE };
    props |= if coaccessible { COACCESSIBLE } else { NOT_COACCESSIBLE };
    props
}

// Iterative three-color DFS over every state; reports (cyclic, cycle
// through the start state).
fn find_cycles<W: Semiring, F: ExpandedFst<W>>(fst: &F) -> (bool, bool) {
    let n = fst.num_states() as usize;
    let start = fst.start();
    let mut color = vec![0u8; n]; // 0 white, 1 grey, 2 black
    let mut cyclic = false;
    let mut initial_cyclic = false;

    for root in 0..n as StateId {
        if color[root as usize] != 0 {
            continue;
        }
        let mut stack: Vec<(StateId, F::ArcIter<'_>)> = vec![(root, fst.arcs(root))];
        color[root as usize] = 1;
        loop {
            let next = match stack.last_mut() {
                None => break,
                Some((_, iter)) => iter.next(),
            };
            match next {
                Some(arc) => {
                    let t = arc.nextstate;
                    match color[t as usize] {
                        0 => {
                            color[t as usize] = 1;
                            stack.push((t, fst.arcs(t)));
                        }
                        1 => {
                            cyclic = true;
                            if t == start && start != NO_STATE {
                                initial_cyclic = true;
                            }
                        }
                        _ => {}
                    }
                }
                None => {
                    let (s, _) = stack.pop().unwrap();
                    color[s as usize] = 2;
                }
            }
        }
    }
    (cyclic, initial_cyclic)
}

// (all states reachable from start, all states reach a final state).
fn reachability<W: Semiring, F: ExpandedFst<W>>(fst: &F) -> (bool, bool) {
    let n = fst.num_states() as usize;
    if n == 0 {
        return (true, true);
    }
    let start = fst.start();

    let mut fwd = vec![false; n];
    let mut queue: VecDeque<StateId> = VecDeque::new();
    if start != NO_STATE {
        fwd[start as usize] = true;
        queue.push_back(start);
    }
    while let Some(s) = queue.pop_front() {
        for arc in fst.arcs(s) {
            if !fwd[arc.nextstate as usize] {
                fwd[arc.nextstate as usize] = true;
                queue.push_back(arc.nextstate);
            }
        }
    }

    let mut rev_adj: Vec<Vec<StateId>> = vec![Vec::new(); n];
    let mut bwd = vec![false; n];
    for s in 0..n as StateId {
        for arc in fst.arcs(s) {
            rev_adj[arc.nextstate as usize].push(s);
        }
        if !fst.final_weight(s).is_zero() {
            bwd[s as usize] = true;
            queue.push_back(s);
        }
    }
    while let Some(s) = queue.pop_front() {
        for &p in &rev_adj[s as usize] {
            if !bwd[p as usize] {
                bwd[p as usize] = true;
                queue.push_back(p);
            }
        }
    }

    (fwd.iter().all(|&v| v), bwd.iter().all(|&v| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::{Arc, MutableFst, VectorFst};
    use crate::semiring::TropicalWeight;

    fn linear_fst() -> VectorFst<TropicalWeight> {
        // 0 --(1:1/1.0)--> 1 --(2:3/0.0)--> 2(final)
        let mut fst = VectorFst::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        let s2 = fst.add_state();
        fst.set_start(s0);
        fst.add_arc(s0, Arc::new(1, 1, TropicalWeight(1.0), s1));
        fst.add_arc(s1, Arc::new(2, 3, TropicalWeight(0.0), s2));
        fst.set_final(s2, TropicalWeight(0.5));
        fst
    }

    #[test]
    fn test_known_props() {
        assert_eq!(known_props(0), EXPANDED | MUTABLE | ERROR);
        let k = known_props(ACYCLIC);
        assert_ne!(k & CYCLIC, 0);
        assert_ne!(k & ACYCLIC, 0);
        assert_eq!(k & (TOP_SORTED | NOT_TOP_SORTED), 0);
    }

    #[test]
    fn test_compute_properties_linear() {
        let fst = linear_fst();
        let p = compute_properties(&fst);
        assert_ne!(p & NOT_ACCEPTOR, 0);
        assert_ne!(p & ACYCLIC, 0);
        assert_ne!(p & TOP_SORTED, 0);
        assert_ne!(p & NO_EPSILONS, 0);
        assert_ne!(p & WEIGHTED, 0);
        assert_ne!(p & ACCESSIBLE, 0);
        assert_ne!(p & COACCESSIBLE, 0);
        assert_ne!(p & I_DETERMINISTIC, 0);
    }

    #[test]
    fn test_compute_properties_cycle() {
        let mut fst = linear_fst();
        fst.add_arc(2, Arc::new(4, 4, TropicalWeight(0.0), 0));
        let p = compute_properties(&fst);
        assert_ne!(p & CYCLIC, 0);
        assert_ne!(p & INITIAL_CYCLIC, 0);
        assert_ne!(p & NOT_TOP_SORTED, 0);
    }

    #[test]
    fn test_compute_properties_epsilons() {
        let mut fst = linear_fst();
        fst.add_arc(0, Arc::new(0, 0, TropicalWeight(0.0), 1));
        fst.add_arc(1, Arc::new(0, 5, TropicalWeight(0.0), 2));
        let p = compute_properties(&fst);
        assert_ne!(p & EPSILONS, 0);
        assert_ne!(p & I_EPSILONS, 0);
        assert_ne!(p & NO_O_EPSILONS, 0);
        assert_ne!(p & NON_I_DETERMINISTIC, 0);
    }

    #[test]
    fn test_concat_properties_table() {
        let p = concat_properties(ACCEPTOR | ACYCLIC, ACCEPTOR | ACYCLIC);
        assert_ne!(p & ACCEPTOR, 0);
        assert_ne!(p & ACYCLIC, 0);
        let p = concat_properties(ACCEPTOR | ACYCLIC, CYCLIC);
        assert_eq!(p & ACYCLIC, 0);
        assert_ne!(p & CYCLIC, 0);
        assert_ne!(concat_properties(ERROR, 0) & ERROR, 0);
    }

    #[test]
    fn test_concat_properties_never_epsilon_free() {
        // The bridge arcs from the first operand's finals are epsilon on
        // both sides, so epsilon-free inputs do not give an epsilon-free
        // result.
        let eps_free = NO_EPSILONS | NO_I_EPSILONS | NO_O_EPSILONS;
        let p = concat_properties(eps_free, eps_free);
        assert_eq!(p & eps_free, 0);
    }

    #[test]
    fn test_rm_epsilon_properties_table() {
        let p = rm_epsilon_properties(ACCEPTOR | EPSILONS);
        assert_ne!(p & NO_EPSILONS, 0);
        assert_ne!(p & NO_I_EPSILONS, 0);
        assert_ne!(p & ACCEPTOR, 0);
        assert_eq!(p & EPSILONS, 0);
    }
}
