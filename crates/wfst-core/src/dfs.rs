//! Arc filters and depth-first traversals: topological ordering and
//! strongly-connected-component decomposition, both under an arc filter so
//! they can run on e.g. the epsilon subgraph alone.

use crate::fst::{Arc, ExpandedFst, StateId, EPSILON};
use crate::semiring::Semiring;

/// Predicate selecting which arcs participate in a traversal.
pub trait ArcFilter<W>: Copy {
    fn keep(&self, arc: &Arc<W>) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct AnyArcFilter;

impl<W> ArcFilter<W> for AnyArcFilter {
    fn keep(&self, _arc: &Arc<W>) -> bool {
        true
    }
}

/// Keeps arcs with epsilon on both sides.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonArcFilter;

impl<W> ArcFilter<W> for EpsilonArcFilter {
    fn keep(&self, arc: &Arc<W>) -> bool {
        arc.ilabel == EPSILON && arc.olabel == EPSILON
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputEpsilonArcFilter;

impl<W> ArcFilter<W> for InputEpsilonArcFilter {
    fn keep(&self, arc: &Arc<W>) -> bool {
        arc.ilabel == EPSILON
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputEpsilonArcFilter;

impl<W> ArcFilter<W> for OutputEpsilonArcFilter {
    fn keep(&self, arc: &Arc<W>) -> bool {
        arc.olabel == EPSILON
    }
}

/// Topological order of the filtered graph.
///
/// `order[s]` is the rank of state `s` (sources low); `acyclic` reports
/// whether the filtered subgraph had no back arc. Ranks are meaningless when
/// `acyclic` is false.
pub struct TopOrder {
    pub order: Vec<StateId>,
    pub acyclic: bool,
}

/// DFS over every state (roots in id order) computing reverse-finish-time
/// ranks, i.e. a topological order when the filtered graph is acyclic.
pub fn top_order<W: Semiring, F: ExpandedFst<W>, A: ArcFilter<W>>(fst: &F, filter: A) -> TopOrder {
    let n = fst.num_states() as usize;
    let mut color = vec![0u8; n]; // 0 white, 1 grey, 2 black
    let mut finish: Vec<StateId> = Vec::with_capacity(n);
    let mut acyclic = true;

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
                    if !filter.keep(&arc) {
                        continue;
                    }
                    let t = arc.nextstate;
                    match color[t as usize] {
                        0 => {
                            color[t as usize] = 1;
                            stack.push((t, fst.arcs(t)));
                        }
                        1 => acyclic = false,
                        _ => {}
                    }
                }
                None => {
                    let (s, _) = stack.pop().unwrap();
                    color[s as usize] = 2;
                    finish.push(s);
                }
            }
        }
    }

    // Reverse finish time: the last state to finish is a source.
    let mut order = vec![0; n];
    for (i, &s) in finish.iter().rev().enumerate() {
        order[s as usize] = i as StateId;
    }
    TopOrder { order, acyclic }
}

/// SCC decomposition of the filtered graph.
///
/// `scc[s]` is the component of `s`; component ids are numbered in
/// topological order of the condensation (sources low), so processing
/// components in increasing id order respects dependency direction.
pub struct SccDecomposition {
    pub scc: Vec<u32>,
    pub num_sccs: u32,
}

/// Iterative Tarjan under an arc filter.
pub fn scc_decompose<W: Semiring, F: ExpandedFst<W>, A: ArcFilter<W>>(
    fst: &F,
    filter: A,
) -> SccDecomposition {
    let n = fst.num_states() as usize;
    const UNSET: u32 = u32::MAX;

    let mut index = vec![UNSET; n];
    let mut lowlink = vec![0u32; n];
    let mut on_stack = vec![false; n];
    let mut scc = vec![UNSET; n];
    let mut tarjan_stack: Vec<StateId> = Vec::new();
    let mut next_index = 0u32;
    let mut next_scc = 0u32;

    for root in 0..n as StateId {
        if index[root as usize] != UNSET {
            continue;
        }
        let mut stack: Vec<(StateId, F::ArcIter<'_>)> = Vec::new();
        index[root as usize] = next_index;
        lowlink[root as usize] = next_index;
        next_index += 1;
        on_stack[root as usize] = true;
        tarjan_stack.push(root);
        stack.push((root, fst.arcs(root)));

        loop {
            let (s, next) = match stack.last_mut() {
                None => break,
                Some((s, iter)) => (*s, iter.next()),
            };
            match next {
                Some(arc) => {
                    if !filter.keep(&arc) {
                        continue;
                    }
                    let t = arc.nextstate;
                    if index[t as usize] == UNSET {
                        index[t as usize] = next_index;
                        lowlink[t as usize] = next_index;
                        next_index += 1;
                        on_stack[t as usize] = true;
                        tarjan_stack.push(t);
                        stack.push((t, fst.arcs(t)));
                    } else if on_stack[t as usize] {
                        lowlink[s as usize] = lowlink[s as usize].min(index[t as usize]);
                    }
                }
                None => {
                    stack.pop();
                    if let Some((p, _)) = stack.last() {
                        let p = *p;
                        lowlink[p as usize] = lowlink[p as usize].min(lowlink[s as usize]);
                    }
                    if lowlink[s as usize] == index[s as usize] {
                        // Root of an SCC: pop its members.
                        loop {
                            let v = tarjan_stack.pop().unwrap();
                            on_stack[v as usize] = false;
                            scc[v as usize] = next_scc;
                            if v == s {
                                break;
                            }
                        }
                        next_scc += 1;
                    }
                }
            }
        }
    }

    // Tarjan emits components in reverse topological order; flip the ids so
    // callers can iterate sources first.
    for c in scc.iter_mut() {
        *c = next_scc - 1 - *c;
    }
    SccDecomposition {
        scc,
        num_sccs: next_scc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::{Arc, MutableFst, VectorFst};
    use crate::semiring::TropicalWeight;

    fn w(v: f32) -> TropicalWeight {
        TropicalWeight(v)
    }

    fn chain() -> VectorFst<TropicalWeight> {
        // 0 -> 1 -> 2, plus a 2 -> 0 non-epsilon back arc
        let mut fst = VectorFst::new();
        for _ in 0..3 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.add_arc(0, Arc::new(0, 0, w(0.0), 1));
        fst.add_arc(1, Arc::new(0, 0, w(0.0), 2));
        fst.add_arc(2, Arc::new(5, 5, w(0.0), 0));
        fst.set_final(2, w(0.0));
        fst
    }

    #[test]
    fn test_top_order_epsilon_filter() {
        let fst = chain();
        // Under the epsilon filter the back arc disappears and the graph
        // is a chain.
        let t = top_order(&fst, EpsilonArcFilter);
        assert!(t.acyclic);
        assert!(t.order[0] < t.order[1]);
        assert!(t.order[1] < t.order[2]);

        let t = top_order(&fst, AnyArcFilter);
        assert!(!t.acyclic);
    }

    #[test]
    fn test_scc_single_cycle() {
        let fst = chain();
        let d = scc_decompose(&fst, AnyArcFilter);
        assert_eq!(d.num_sccs, 1);
        assert!(d.scc.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_scc_topological_numbering() {
        // Two components: {0, 1} cycling, then {2} downstream.
        let mut fst: VectorFst<TropicalWeight> = VectorFst::new();
        for _ in 0..3 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.add_arc(0, Arc::new(1, 1, w(0.0), 1));
        fst.add_arc(1, Arc::new(1, 1, w(0.0), 0));
        fst.add_arc(1, Arc::new(2, 2, w(0.0), 2));
        let d = scc_decompose(&fst, AnyArcFilter);
        assert_eq!(d.num_sccs, 2);
        assert_eq!(d.scc[0], d.scc[1]);
        assert!(d.scc[0] < d.scc[2]);
    }

    #[test]
    fn test_filters() {
        let eps = Arc::new(0, 0, w(0.0), 0);
        let ieps = Arc::new(0, 3, w(0.0), 0);
        let full = Arc::new(2, 3, w(0.0), 0);
        assert!(<EpsilonArcFilter as ArcFilter<TropicalWeight>>::keep(&EpsilonArcFilter, &eps));
        assert!(!<EpsilonArcFilter as ArcFilter<TropicalWeight>>::keep(&EpsilonArcFilter, &ieps));
        assert!(<InputEpsilonArcFilter as ArcFilter<TropicalWeight>>::keep(
            &InputEpsilonArcFilter,
            &ieps
        ));
        assert!(<AnyArcFilter as ArcFilter<TropicalWeight>>::keep(&AnyArcFilter, &full));
    }
}
