use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::properties::{
    self, compute_properties, known_props, ALL_PROPERTIES, ERROR, EXPANDED, MUTABLE,
};
use crate::semiring::Semiring;

pub type StateId = u32;
pub type Label = u32;

/// Absent state, e.g. the start of an empty FST.
pub const NO_STATE: StateId = u32::MAX;
/// The empty label: no symbol consumed or emitted.
pub const EPSILON: Label = 0;
/// Reserved label used internally by label reachability for finality.
pub const NO_LABEL: Label = u32::MAX;

/// A labeled, weighted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Arc<W> {
    pub ilabel: Label,
    pub olabel: Label,
    pub weight: W,
    pub nextstate: StateId,
}

impl<W> Arc<W> {
    pub fn new(ilabel: Label, olabel: Label, weight: W, nextstate: StateId) -> Self {
        Arc {
            ilabel,
            olabel,
            weight,
            nextstate,
        }
    }
}

/// Read-only weighted transducer.
///
/// State ids are dense non-negative integers assigned by the implementation.
/// Delayed implementations materialize states and arcs on demand behind this
/// interface; their caches are filled during read queries, so sharing one
/// value across threads requires external synchronization.
pub trait Fst<W: Semiring> {
    type ArcIter<'a>: Iterator<Item = Arc<W>> + 'a
    where
        Self: 'a;

    /// Start state, or `NO_STATE` for the empty relation.
    fn start(&self) -> StateId;

    /// Final weight of `s`; `W::zero()` iff `s` is not final.
    fn final_weight(&self, s: StateId) -> W;

    fn num_arcs(&self, s: StateId) -> usize;

    fn num_input_epsilons(&self, s: StateId) -> usize;

    fn num_output_epsilons(&self, s: StateId) -> usize;

    /// Outgoing arcs of `s`, in a fixed order for the life of the FST.
    fn arcs(&self, s: StateId) -> Self::ArcIter<'_>;

    /// Property bits under `mask`. With `test` set, unknown bits in the mask
    /// are computed structurally where the implementation supports it;
    /// otherwise only known bits are returned.
    fn properties(&self, mask: u64, test: bool) -> u64;

    fn input_symbols(&self) -> Option<&SymbolTable>;

    fn output_symbols(&self) -> Option<&SymbolTable>;
}

// A borrowed FST is still an FST; lets delayed wrappers hold either an owned
// input or a shared handle.
impl<'f, W: Semiring, F: Fst<W>> Fst<W> for &'f F {
    type ArcIter<'a>
        = F::ArcIter<'a>
    where
        Self: 'a;

    fn start(&self) -> StateId {
        (**self).start()
    }

    fn final_weight(&self, s: StateId) -> W {
        (**self).final_weight(s)
    }

    fn num_arcs(&self, s: StateId) -> usize {
        (**self).num_arcs(s)
    }

    fn num_input_epsilons(&self, s: StateId) -> usize {
        (**self).num_input_epsilons(s)
    }

    fn num_output_epsilons(&self, s: StateId) -> usize {
        (**self).num_output_epsilons(s)
    }

    fn arcs(&self, s: StateId) -> Self::ArcIter<'_> {
        (**self).arcs(s)
    }

    fn properties(&self, mask: u64, test: bool) -> u64 {
        (**self).properties(mask, test)
    }

    fn input_symbols(&self) -> Option<&SymbolTable> {
        (**self).input_symbols()
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        (**self).output_symbols()
    }
}

/// FST whose state count is known in O(1); states are `0..num_states()`.
pub trait ExpandedFst<W: Semiring>: Fst<W> {
    fn num_states(&self) -> StateId;
}

/// FST owned and modifiable by its holder. Mutation invalidates every
/// iterator into the FST.
pub trait MutableFst<W: Semiring>: ExpandedFst<W> {
    fn add_state(&mut self) -> StateId;

    fn add_arc(&mut self, s: StateId, arc: Arc<W>);

    fn set_start(&mut self, s: StateId);

    fn set_final(&mut self, s: StateId, weight: W);

    fn delete_arcs(&mut self, s: StateId);

    fn reserve_states(&mut self, n: usize);

    fn reserve_arcs(&mut self, s: StateId, n: usize);

    /// Overwrites the bits selected by `mask` with `props`.
    fn set_properties(&mut self, props: u64, mask: u64);

    fn set_input_symbols(&mut self, symbols: Option<Rc<SymbolTable>>);

    fn set_output_symbols(&mut self, symbols: Option<Rc<SymbolTable>>);
}

#[derive(Debug, Clone)]
struct VectorState<W> {
    final_weight: W,
    arcs: Vec<Arc<W>>,
    niepsilons: usize,
    noepsilons: usize,
}

/// General-purpose mutable FST backed by per-state arc vectors.
#[derive(Debug, Clone)]
pub struct VectorFst<W: Semiring> {
    states: Vec<VectorState<W>>,
    start: StateId,
    // Interior mutability: properties(test: true) caches computed bits.
    props: Cell<u64>,
    isymbols: Option<Rc<SymbolTable>>,
    osymbols: Option<Rc<SymbolTable>>,
}

impl<W: Semiring> VectorFst<W> {
    pub fn new() -> Self {
        VectorFst {
            states: Vec::new(),
            start: NO_STATE,
            props: Cell::new(EXPANDED | MUTABLE),
            isymbols: None,
            osymbols: None,
        }
    }

    /// Direct slice access to the arcs of `s`.
    pub fn arcs_slice(&self, s: StateId) -> &[Arc<W>] {
        &self.states[s as usize].arcs
    }

    /// In-place arc rewrite; recounts epsilons and drops cached properties.
    pub fn map_arcs(&mut self, s: StateId, f: impl FnMut(&mut Arc<W>)) {
        self.states[s as usize].arcs.iter_mut().for_each(f);
        let st = &mut self.states[s as usize];
        st.niepsilons = st.arcs.iter().filter(|a| a.ilabel == EPSILON).count();
        st.noepsilons = st.arcs.iter().filter(|a| a.olabel == EPSILON).count();
        self.invalidate_props();
    }

    fn invalidate_props(&self) {
        self.props
            .set(self.props.get() & (EXPANDED | MUTABLE | ERROR));
    }

    /// Drops every state whose `keep` slot is false, renumbering the rest
    /// contiguously. Arcs into dropped states are discarded; a dropped start
    /// leaves the FST empty.
    pub fn retain_states(&mut self, keep: &[bool]) {
        let n = self.states.len();
        debug_assert_eq!(keep.len(), n);
        let mut old_to_new = vec![NO_STATE; n];
        let mut next = 0;
        for (old, &k) in keep.iter().enumerate() {
            if k {
                old_to_new[old] = next;
                next += 1;
            }
        }
        if next as usize == n {
            return;
        }

        let old_states = std::mem::take(&mut self.states);
        for (old, mut st) in old_states.into_iter().enumerate() {
            if old_to_new[old] == NO_STATE {
                continue;
            }
            st.arcs.retain(|a| old_to_new[a.nextstate as usize] != NO_STATE);
            for arc in &mut st.arcs {
                arc.nextstate = old_to_new[arc.nextstate as usize];
            }
            st.niepsilons = st.arcs.iter().filter(|a| a.ilabel == EPSILON).count();
            st.noepsilons = st.arcs.iter().filter(|a| a.olabel == EPSILON).count();
            self.states.push(st);
        }

        self.start = if self.start == NO_STATE {
            NO_STATE
        } else {
            old_to_new[self.start as usize]
        };
        self.invalidate_props();
    }
}

impl<W: Semiring> Default for VectorFst<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Semiring> Fst<W> for VectorFst<W> {
    type ArcIter<'a>
        = std::iter::Cloned<std::slice::Iter<'a, Arc<W>>>
    where
        Self: 'a;

    fn start(&self) -> StateId {
        self.start
    }

    fn final_weight(&self, s: StateId) -> W {
        self.states[s as usize].final_weight.clone()
    }

    fn num_arcs(&self, s: StateId) -> usize {
        self.states[s as usize].arcs.len()
    }

    fn num_input_epsilons(&self, s: StateId) -> usize {
        self.states[s as usize].niepsilons
    }

    fn num_output_epsilons(&self, s: StateId) -> usize {
        self.states[s as usize].noepsilons
    }

    fn arcs(&self, s: StateId) -> Self::ArcIter<'_> {
        self.states[s as usize].arcs.iter().cloned()
    }

    fn properties(&self, mask: u64, test: bool) -> u64 {
        let props = self.props.get();
        if !test || known_props(props) & mask == mask {
            return props & mask;
        }
        let computed = compute_properties(self);
        let merged = (props & (EXPANDED | MUTABLE | ERROR)) | computed;
        self.props.set(merged);
        merged & mask
    }

    fn input_symbols(&self) -> Option<&SymbolTable> {
        self.isymbols.as_deref()
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        self.osymbols.as_deref()
    }
}

impl<W: Semiring> ExpandedFst<W> for VectorFst<W> {
    fn num_states(&self) -> StateId {
        self.states.len() as StateId
    }
}

impl<W: Semiring> MutableFst<W> for VectorFst<W> {
    fn add_state(&mut self) -> StateId {
        let id = self.states.len() as StateId;
        self.states.push(VectorState {
            final_weight: W::zero(),
            arcs: Vec::new(),
            niepsilons: 0,
            noepsilons: 0,
        });
        self.invalidate_props();
        id
    }

    fn add_arc(&mut self, s: StateId, arc: Arc<W>) {
        let st = &mut self.states[s as usize];
        if arc.ilabel == EPSILON {
            st.niepsilons += 1;
        }
        if arc.olabel == EPSILON {
            st.noepsilons += 1;
        }
        st.arcs.push(arc);
        self.invalidate_props();
    }

    fn set_start(&mut self, s: StateId) {
        self.start = s;
        self.invalidate_props();
    }

    fn set_final(&mut self, s: StateId, weight: W) {
        self.states[s as usize].final_weight = weight;
        self.invalidate_props();
    }

    fn delete_arcs(&mut self, s: StateId) {
        let st = &mut self.states[s as usize];
        st.arcs.clear();
        st.niepsilons = 0;
        st.noepsilons = 0;
        self.invalidate_props();
    }

    fn reserve_states(&mut self, n: usize) {
        self.states.reserve(n);
    }

    fn reserve_arcs(&mut self, s: StateId, n: usize) {
        self.states[s as usize].arcs.reserve(n);
    }

    fn set_properties(&mut self, props: u64, mask: u64) {
        let kept = self.props.get() & !mask;
        self.props
            .set(kept | (props & mask & ALL_PROPERTIES) | EXPANDED | MUTABLE);
    }

    fn set_input_symbols(&mut self, symbols: Option<Rc<SymbolTable>>) {
        self.isymbols = symbols;
    }

    fn set_output_symbols(&mut self, symbols: Option<Rc<SymbolTable>>) {
        self.osymbols = symbols;
    }
}

/// Stable sort of every state's arcs by input (or output) label, setting the
/// corresponding sorted property bit.
///
/// The opposite side's order is disturbed by the sort, so its sorted pair
/// becomes unknown again; on an acceptor both orders coincide and both
/// sorted bits are set.
pub fn arc_sort<W: Semiring>(fst: &mut VectorFst<W>, by_input: bool) {
    let acceptor = fst.properties(properties::ACCEPTOR, false) != 0;
    for s in 0..fst.num_states() {
        let st = &mut fst.states[s as usize];
        if by_input {
            st.arcs.sort_by(|a, b| {
                a.ilabel.cmp(&b.ilabel).then(a.olabel.cmp(&b.olabel))
            });
        } else {
            st.arcs.sort_by(|a, b| {
                a.olabel.cmp(&b.olabel).then(a.ilabel.cmp(&b.ilabel))
            });
        }
    }
    let mask = properties::I_LABEL_SORTED
        | properties::NOT_I_LABEL_SORTED
        | properties::O_LABEL_SORTED
        | properties::NOT_O_LABEL_SORTED;
    let mut props = if by_input {
        properties::I_LABEL_SORTED
    } else {
        properties::O_LABEL_SORTED
    };
    if acceptor {
        props |= properties::I_LABEL_SORTED | properties::O_LABEL_SORTED;
    }
    fst.set_properties(props, mask);
}

/// Breadth-first copy of any FST into a `VectorFst`, visiting only states
/// reachable from the start. States are renumbered in discovery order, so
/// copying a delayed FST with a `gc_limit = 0` cache streams through it.
pub fn materialize<W: Semiring, F: Fst<W>>(fst: &F) -> VectorFst<W> {
    let mut out = VectorFst::new();
    let start = fst.start();
    if start == NO_STATE {
        let props = fst.properties(ERROR, false);
        out.set_properties(props, ERROR);
        return out;
    }

    let mut map: rustc_hash::FxHashMap<StateId, StateId> = rustc_hash::FxHashMap::default();
    let mut queue: VecDeque<StateId> = VecDeque::new();
    let out_start = out.add_state();
    map.insert(start, out_start);
    out.set_start(out_start);
    queue.push_back(start);

    while let Some(s) = queue.pop_front() {
        let os = map[&s];
        out.set_final(os, fst.final_weight(s));
        for arc in fst.arcs(s) {
            let od = match map.get(&arc.nextstate) {
                Some(&od) => od,
                None => {
                    let od = out.add_state();
                    map.insert(arc.nextstate, od);
                    queue.push_back(arc.nextstate);
                    od
                }
            };
            out.add_arc(os, Arc::new(arc.ilabel, arc.olabel, arc.weight, od));
        }
    }

    // Only facts stable under restriction to the accessible part and BFS
    // renumbering may be copied. Negative witnesses can live in trimmed
    // states, so most negative bits are dropped.
    let copy_mask = ERROR
        | properties::ACCEPTOR
        | properties::NO_EPSILONS
        | properties::NO_I_EPSILONS
        | properties::NO_O_EPSILONS
        | properties::ACYCLIC
        | properties::UNWEIGHTED
        | properties::I_DETERMINISTIC
        | properties::O_DETERMINISTIC
        | properties::I_LABEL_SORTED
        | properties::O_LABEL_SORTED
        | properties::INITIAL_CYCLIC
        | properties::INITIAL_ACYCLIC
        | properties::COACCESSIBLE;
    let props = fst.properties(copy_mask, false);
    out.set_properties(props | properties::ACCESSIBLE, copy_mask | properties::ACCESSIBLE);
    out
}

/// Opaque symbol mapping attached to an FST side. Labels index the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    name: String,
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn new(name: impl Into<String>) -> Self {
        SymbolTable {
            name: name.into(),
            // Label 0 is reserved for epsilon.
            symbols: vec!["<eps>".to_string()],
        }
    }

    pub fn add_symbol(&mut self, symbol: impl Into<String>) -> Label {
        self.symbols.push(symbol.into());
        (self.symbols.len() - 1) as Label
    }

    pub fn find(&self, label: Label) -> Option<&str> {
        self.symbols.get(label as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.len() <= 1
    }
}

/// Compatibility oracle for multi-operand operations: tables are compatible
/// when either is absent or both define the same mapping.
pub fn compat_symbols(a: Option<&SymbolTable>, b: Option<&SymbolTable>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.symbols == b.symbols,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    #[test]
    fn test_empty_fst() {
        let fst: VectorFst<W> = VectorFst::new();
        assert_eq!(fst.start(), NO_STATE);
        assert_eq!(fst.num_states(), 0);
    }

    #[test]
    fn test_build_and_query() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        fst.set_start(s0);
        fst.set_final(s1, TropicalWeight(2.0));
        fst.add_arc(s0, Arc::new(1, 2, TropicalWeight(1.0), s1));
        fst.add_arc(s0, Arc::new(0, 0, TropicalWeight(0.5), s1));

        assert_eq!(fst.start(), s0);
        assert_eq!(fst.num_arcs(s0), 2);
        assert_eq!(fst.num_input_epsilons(s0), 1);
        assert_eq!(fst.num_output_epsilons(s0), 1);
        assert!(fst.final_weight(s0).is_zero());
        assert_eq!(fst.final_weight(s1), TropicalWeight(2.0));

        let arcs: Vec<_> = fst.arcs(s0).collect();
        assert_eq!(arcs[0].ilabel, 1);
        assert_eq!(arcs[1].nextstate, s1);
    }

    #[test]
    fn test_delete_arcs_resets_epsilon_counts() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        fst.add_arc(s0, Arc::new(0, 0, TropicalWeight(0.0), s0));
        assert_eq!(fst.num_input_epsilons(s0), 1);
        fst.delete_arcs(s0);
        assert_eq!(fst.num_arcs(s0), 0);
        assert_eq!(fst.num_input_epsilons(s0), 0);
    }

    #[test]
    fn test_properties_compute_and_cache() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        fst.set_start(s0);
        fst.set_final(s1, TropicalWeight(0.0));
        fst.add_arc(s0, Arc::new(1, 1, TropicalWeight(0.0), s1));

        // Unknown until tested
        assert_eq!(fst.properties(properties::ACYCLIC, false), 0);
        assert_ne!(fst.properties(properties::ACYCLIC, true), 0);
        // Cached now
        assert_ne!(fst.properties(properties::ACYCLIC, false), 0);
        // Mutation drops the cache
        fst.add_arc(s1, Arc::new(2, 2, TropicalWeight(0.0), s0));
        assert_eq!(fst.properties(properties::ACYCLIC, false), 0);
        assert_ne!(fst.properties(properties::CYCLIC, true), 0);
    }

    #[test]
    fn test_arc_sort() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        fst.set_start(s0);
        fst.add_arc(s0, Arc::new(3, 1, TropicalWeight(0.0), s0));
        fst.add_arc(s0, Arc::new(1, 2, TropicalWeight(0.0), s0));
        fst.add_arc(s0, Arc::new(2, 3, TropicalWeight(0.0), s0));
        arc_sort(&mut fst, true);
        let ilabels: Vec<_> = fst.arcs(s0).map(|a| a.ilabel).collect();
        assert_eq!(ilabels, vec![1, 2, 3]);
        assert_ne!(fst.properties(properties::I_LABEL_SORTED, false), 0);
    }

    #[test]
    fn test_arc_sort_drops_opposite_side_knowledge() {
        // Output labels 1, 2, 3 are sorted before the by-input sort and
        // scrambled by it; the cached bit must not survive.
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        fst.set_start(s0);
        fst.add_arc(s0, Arc::new(3, 1, TropicalWeight(0.0), s0));
        fst.add_arc(s0, Arc::new(1, 2, TropicalWeight(0.0), s0));
        fst.add_arc(s0, Arc::new(2, 3, TropicalWeight(0.0), s0));
        assert_ne!(fst.properties(properties::O_LABEL_SORTED, true), 0);

        arc_sort(&mut fst, true);
        assert_eq!(
            fst.properties(
                properties::O_LABEL_SORTED | properties::NOT_O_LABEL_SORTED,
                false
            ),
            0
        );
        assert_ne!(fst.properties(properties::NOT_O_LABEL_SORTED, true), 0);
    }

    #[test]
    fn test_arc_sort_acceptor_sorts_both_sides() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        fst.set_start(s0);
        fst.add_arc(s0, Arc::new(2, 2, TropicalWeight(0.0), s0));
        fst.add_arc(s0, Arc::new(1, 1, TropicalWeight(0.0), s0));
        fst.properties(properties::ACCEPTOR, true);
        arc_sort(&mut fst, true);
        assert_ne!(fst.properties(properties::I_LABEL_SORTED, false), 0);
        assert_ne!(fst.properties(properties::O_LABEL_SORTED, false), 0);
    }

    #[test]
    fn test_materialize_reaches_only_accessible() {
        let mut fst: VectorFst<W> = VectorFst::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        let _orphan = fst.add_state();
        fst.set_start(s0);
        fst.set_final(s1, TropicalWeight(1.0));
        fst.add_arc(s0, Arc::new(1, 1, TropicalWeight(0.0), s1));

        let copy = materialize(&fst);
        assert_eq!(copy.num_states(), 2);
        assert_eq!(copy.final_weight(1), TropicalWeight(1.0));
    }

    #[test]
    fn test_compat_symbols() {
        let mut a = SymbolTable::new("letters");
        a.add_symbol("a");
        let b = a.clone();
        let mut c = SymbolTable::new("letters");
        c.add_symbol("b");
        assert!(compat_symbols(None, None));
        assert!(compat_symbols(Some(&a), None));
        assert!(compat_symbols(Some(&a), Some(&b)));
        assert!(!compat_symbols(Some(&a), Some(&c)));
    }
}
