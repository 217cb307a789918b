//! Concatenation: if `A` transduces `x → y` with weight `a` and `B`
//! transduces `u → v` with weight `b`, the result transduces `xu → yv` with
//! weight `a ⊗ b`. Eager forms grow either operand in place; the delayed
//! form presents the same structure lazily.

use std::cell::{Cell, RefCell};

use tracing::error;

use crate::cache::{CacheArcIterator, CacheOptions, StateCache, StateTable};
use crate::fst::{
    compat_symbols, Arc, ExpandedFst, Fst, MutableFst, StateId, SymbolTable, VectorFst, EPSILON,
    NO_STATE,
};
use crate::properties::{concat_properties, ALL_PROPERTIES, ERROR};
use crate::semiring::Semiring;

fn check_symbols<W: Semiring, F1: Fst<W>, F2: Fst<W>>(fst1: &F1, fst2: &F2) -> bool {
    compat_symbols(fst1.input_symbols(), fst2.input_symbols())
        && compat_symbols(fst1.output_symbols(), fst2.output_symbols())
}

/// Eager concatenation growing the first operand: appends a copy of `fst2`
/// to `fst1`, then turns each final state of `fst1` into an epsilon bridge
/// onto the copy's start, weighted by the old final weight.
pub fn concat<W: Semiring, F: ExpandedFst<W>>(fst1: &mut VectorFst<W>, fst2: &F) {
    if !check_symbols(fst1, fst2) {
        error!("concat: incompatible input/output symbol tables");
        fst1.set_properties(ERROR, ERROR);
        return;
    }

    let props1 = fst1.properties(ALL_PROPERTIES, false);
    let props2 = fst2.properties(ALL_PROPERTIES, false);

    let start1 = fst1.start();
    if start1 == NO_STATE {
        if props2 & ERROR != 0 {
            fst1.set_properties(ERROR, ERROR);
        }
        return;
    }

    let numstates1 = fst1.num_states();
    fst1.reserve_states(numstates1 as usize + fst2.num_states() as usize);

    for s2 in 0..fst2.num_states() {
        let s1 = fst1.add_state();
        fst1.set_final(s1, fst2.final_weight(s2));
        fst1.reserve_arcs(s1, fst2.num_arcs(s2));
        for mut arc in fst2.arcs(s2) {
            arc.nextstate += numstates1;
            fst1.add_arc(s1, arc);
        }
    }

    let start2 = fst2.start();
    for s1 in 0..numstates1 {
        let final_weight = fst1.final_weight(s1);
        if !final_weight.is_zero() {
            fst1.set_final(s1, W::zero());
            if start2 != NO_STATE {
                fst1.add_arc(s1, Arc::new(EPSILON, EPSILON, final_weight, start2 + numstates1));
            }
        }
    }
    if start2 != NO_STATE {
        fst1.set_properties(concat_properties(props1, props2), ALL_PROPERTIES);
    }
}

/// Eager concatenation growing the second operand: prepends a copy of `fst1`
/// whose final states bridge to the old start of `fst2`.
pub fn concat_right<W: Semiring, F: ExpandedFst<W>>(fst1: &F, fst2: &mut VectorFst<W>) {
    if !check_symbols(fst1, fst2) {
        error!("concat: incompatible input/output symbol tables");
        fst2.set_properties(ERROR, ERROR);
        return;
    }

    let props1 = fst1.properties(ALL_PROPERTIES, false);
    let props2 = fst2.properties(ALL_PROPERTIES, false);

    let start2 = fst2.start();
    if start2 == NO_STATE {
        if props1 & ERROR != 0 {
            fst2.set_properties(ERROR, ERROR);
        }
        return;
    }

    let numstates2 = fst2.num_states();
    fst2.reserve_states(numstates2 as usize + fst1.num_states() as usize);

    for s1 in 0..fst1.num_states() {
        let s2 = fst2.add_state();
        let final_weight = fst1.final_weight(s1);
        fst2.reserve_arcs(
            s2,
            fst1.num_arcs(s1) + if final_weight.is_zero() { 0 } else { 1 },
        );
        if !final_weight.is_zero() {
            fst2.add_arc(s2, Arc::new(EPSILON, EPSILON, final_weight, start2));
        }
        for mut arc in fst1.arcs(s1) {
            arc.nextstate += numstates2;
            fst2.add_arc(s2, arc);
        }
    }

    let start1 = fst1.start();
    match start1 {
        NO_STATE => {
            let s = fst2.add_state();
            fst2.set_start(s);
        }
        _ => {
            fst2.set_start(start1 + numstates2);
            fst2.set_properties(concat_properties(props1, props2), ALL_PROPERTIES);
        }
    }
}

// Composite state of the delayed form: which operand, and its state there.
type Operand = u8;

/// Delayed concatenation of two FSTs.
///
/// Composite states `(operand, state)` are interned on first sight; the
/// first operand's side is expanded with epsilon bridges onto the second's
/// start wherever the first is final.
pub struct ConcatFst<W: Semiring, F1: Fst<W>, F2: Fst<W>> {
    fst1: F1,
    fst2: F2,
    cache: RefCell<StateCache<W>>,
    table: RefCell<StateTable<(Operand, StateId)>>,
    props: Cell<u64>,
}

impl<W: Semiring, F1: Fst<W>, F2: Fst<W>> ConcatFst<W, F1, F2> {
    pub fn new(fst1: F1, fst2: F2) -> Self {
        Self::with_options(fst1, fst2, CacheOptions::default())
    }

    pub fn with_options(fst1: F1, fst2: F2, cache_opts: CacheOptions) -> Self {
        let mut props = concat_properties(
            fst1.properties(ALL_PROPERTIES, false),
            fst2.properties(ALL_PROPERTIES, false),
        );
        if !check_symbols(&fst1, &fst2) {
            error!("concat: incompatible input/output symbol tables");
            props |= ERROR;
        }
        ConcatFst {
            fst1,
            fst2,
            cache: RefCell::new(StateCache::new(cache_opts)),
            table: RefCell::new(StateTable::new()),
            props: Cell::new(props),
        }
    }

    fn find_state(&self, operand: Operand, s: StateId) -> StateId {
        self.table.borrow_mut().find_state(&(operand, s))
    }

    fn expand(&self, s: StateId) {
        let (operand, inner) = *self.table.borrow().element(s);
        let mut arcs = Vec::new();
        match operand {
            0 => {
                for arc in self.fst1.arcs(inner) {
                    let next = self.find_state(0, arc.nextstate);
                    arcs.push(Arc::new(arc.ilabel, arc.olabel, arc.weight, next));
                }
                let final1 = self.fst1.final_weight(inner);
                if !final1.is_zero() {
                    let start2 = self.fst2.start();
                    if start2 != NO_STATE {
                        let bridge = self.find_state(1, start2);
                        arcs.push(Arc::new(EPSILON, EPSILON, final1, bridge));
                    }
                }
            }
            _ => {
                for arc in self.fst2.arcs(inner) {
                    let next = self.find_state(1, arc.nextstate);
                    arcs.push(Arc::new(arc.ilabel, arc.olabel, arc.weight, next));
                }
            }
        }
        self.cache.borrow_mut().set_arcs(s, arcs);
    }

    fn ensure_arcs(&self, s: StateId) {
        if !self.cache.borrow().has_arcs(s) {
            self.expand(s);
        }
    }
}

impl<W: Semiring, F1: Fst<W>, F2: Fst<W>> Fst<W> for ConcatFst<W, F1, F2> {
    type ArcIter<'a>
        = CacheArcIterator<W>
    where
        Self: 'a;

    fn start(&self) -> StateId {
        {
            let cache = self.cache.borrow();
            if cache.has_start() {
                return cache.start();
            }
        }
        // Either operand missing a start empties the whole relation.
        let start = if self.fst1.start() == NO_STATE || self.fst2.start() == NO_STATE {
            NO_STATE
        } else {
            self.find_state(0, self.fst1.start())
        };
        self.cache.borrow_mut().set_start(start);
        start
    }

    fn final_weight(&self, s: StateId) -> W {
        {
            let cache = self.cache.borrow();
            if cache.has_final(s) {
                return cache.final_weight(s);
            }
        }
        let (operand, inner) = *self.table.borrow().element(s);
        // First-operand finality is consumed by the epsilon bridge.
        let weight = match operand {
            0 => W::zero(),
            _ => self.fst2.final_weight(inner),
        };
        self.cache.borrow_mut().set_final(s, weight.clone());
        weight
    }

    fn num_arcs(&self, s: StateId) -> usize {
        self.ensure_arcs(s);
        self.cache.borrow().num_arcs(s)
    }

    fn num_input_epsilons(&self, s: StateId) -> usize {
        self.ensure_arcs(s);
        self.cache.borrow().num_input_epsilons(s)
    }

    fn num_output_epsilons(&self, s: StateId) -> usize {
        self.ensure_arcs(s);
        self.cache.borrow().num_output_epsilons(s)
    }

    fn arcs(&self, s: StateId) -> Self::ArcIter<'_> {
        self.ensure_arcs(s);
        CacheArcIterator::new(self.cache.borrow().arcs(s))
    }

    fn properties(&self, mask: u64, _test: bool) -> u64 {
        if mask & ERROR != 0
            && (self.fst1.properties(ERROR, false) != 0 || self.fst2.properties(ERROR, false) != 0)
        {
            self.props.set(self.props.get() | ERROR);
        }
        self.props.get() & mask
    }

    fn input_symbols(&self) -> Option<&SymbolTable> {
        self.fst1.input_symbols().or_else(|| self.fst2.input_symbols())
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        self.fst1.output_symbols().or_else(|| self.fst2.output_symbols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::materialize;
    use crate::isomorphic::isomorphic;
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    fn w(v: f32) -> W {
        TropicalWeight(v)
    }

    fn single_arc_fst(label: u32, arc_weight: f32, final_weight: f32) -> VectorFst<W> {
        let mut fst = VectorFst::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        fst.set_start(s0);
        fst.add_arc(s0, Arc::new(label, label, w(arc_weight), s1));
        fst.set_final(s1, w(final_weight));
        fst
    }

    fn path_weight(fst: &VectorFst<W>, labels: &[u32]) -> Option<W> {
        let mut s = fst.start();
        let mut total = W::one();
        for &l in labels {
            // Follow epsilons transparently for these deterministic fixtures.
            loop {
                if let Some(arc) = fst.arcs(s).find(|a| a.ilabel == l) {
                    total = total.times(&arc.weight);
                    s = arc.nextstate;
                    break;
                }
                let eps = fst.arcs(s).find(|a| a.ilabel == EPSILON)?;
                total = total.times(&eps.weight);
                s = eps.nextstate;
            }
        }
        loop {
            let f = fst.final_weight(s);
            if !f.is_zero() {
                return Some(total.times(&f));
            }
            let eps = fst.arcs(s).find(|a| a.ilabel == EPSILON)?;
            total = total.times(&eps.weight);
            s = eps.nextstate;
        }
    }

    #[test]
    fn test_concat_scenario() {
        // A: (a,a)/1.0 final 2.0; B: (b,b)/3.0 final 4.0.
        // Concat accepts (ab, ab) with weight 10.0.
        let mut a = single_arc_fst(1, 1.0, 2.0);
        let b = single_arc_fst(2, 3.0, 4.0);
        concat(&mut a, &b);

        assert_eq!(a.num_states(), 4);
        assert_eq!(path_weight(&a, &[1, 2]), Some(w(10.0)));
        assert_eq!(path_weight(&a, &[1]), None);
        assert_eq!(path_weight(&a, &[2]), None);
    }

    #[test]
    fn test_concat_right_matches_left() {
        let a = single_arc_fst(1, 1.0, 2.0);
        let b = single_arc_fst(2, 3.0, 4.0);

        let mut left = a.clone();
        concat(&mut left, &b);

        let mut right = b;
        concat_right(&a, &mut right);

        assert_eq!(isomorphic(&left, &right, 1e-4), Ok(true));
    }

    #[test]
    fn test_concat_empty_operand() {
        let mut a = single_arc_fst(1, 1.0, 2.0);
        let empty: VectorFst<W> = VectorFst::new();
        concat(&mut a, &empty);
        // No bridge was added: the result accepts nothing.
        assert_eq!(path_weight(&a, &[1]), None);

        let mut b: VectorFst<W> = VectorFst::new();
        concat(&mut b, &single_arc_fst(1, 1.0, 2.0));
        assert_eq!(b.start(), NO_STATE);
    }

    #[test]
    fn test_delayed_matches_eager() {
        let a = single_arc_fst(1, 1.0, 2.0);
        let b = single_arc_fst(2, 3.0, 4.0);

        let delayed = ConcatFst::new(a.clone(), b.clone());
        let delayed_copy = materialize(&delayed);

        let mut eager = a;
        concat(&mut eager, &b);

        assert_eq!(isomorphic(&delayed_copy, &eager, 1e-4), Ok(true));
    }

    #[test]
    fn test_delayed_empty_start() {
        let empty: VectorFst<W> = VectorFst::new();
        let b = single_arc_fst(2, 3.0, 4.0);
        let delayed = ConcatFst::new(empty, b);
        assert_eq!(delayed.start(), NO_STATE);
    }

    #[test]
    fn test_concat_identity_with_empty_string() {
        // Empty-string FST: single final state with weight 1̄.
        let mut empty_string: VectorFst<W> = VectorFst::new();
        let s = empty_string.add_state();
        empty_string.set_start(s);
        empty_string.set_final(s, W::one());

        let a = single_arc_fst(1, 1.0, 2.0);
        let mut grown = a.clone();
        concat(&mut grown, &empty_string);
        assert_eq!(path_weight(&grown, &[1]), Some(w(3.0)));
        assert_eq!(path_weight(&a, &[1]), Some(w(3.0)));
    }

    #[test]
    fn test_symbol_mismatch_sets_error() {
        use std::rc::Rc;
        let mut table1 = SymbolTable::new("t1");
        table1.add_symbol("a");
        let mut table2 = SymbolTable::new("t2");
        table2.add_symbol("b");

        let mut a = single_arc_fst(1, 1.0, 2.0);
        a.set_input_symbols(Some(Rc::new(table1)));
        let mut b = single_arc_fst(2, 3.0, 4.0);
        b.set_input_symbols(Some(Rc::new(table2)));

        concat(&mut a, &b);
        assert_ne!(a.properties(ERROR, false), 0);
    }
}
