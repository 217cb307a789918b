//! Synchronization: rewrites a bounded-delay transducer so that along every
//! path the delay (non-epsilon output count minus non-epsilon input count)
//! is zero or strictly increasing, by emitting matched label pairs eagerly
//! and buffering unmatched residuals in the state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::cache::{CacheArcIterator, CacheOptions, StateCache, StateTable};
use crate::fst::{
    materialize, Arc, Fst, Label, StateId, SymbolTable, VectorFst, EPSILON, NO_STATE,
};
use crate::properties::{synchronize_properties, ALL_PROPERTIES, ERROR};
use crate::semiring::Semiring;

/// Interned residual label string. Ids are dense and content-stable, so
/// composite-state identity reduces to integer comparison.
type StrId = u32;

const EMPTY_STR: StrId = 0;

struct StringSet {
    ids: FxHashMap<Rc<[Label]>, StrId>,
    strings: Vec<Rc<[Label]>>,
}

impl StringSet {
    fn new() -> Self {
        let mut set = StringSet {
            ids: FxHashMap::default(),
            strings: Vec::new(),
        };
        let empty: Rc<[Label]> = Vec::new().into();
        set.ids.insert(Rc::clone(&empty), EMPTY_STR);
        set.strings.push(empty);
        set
    }

    fn intern(&mut self, labels: Vec<Label>) -> StrId {
        if let Some(&id) = self.ids.get(labels.as_slice()) {
            return id;
        }
        let id = self.strings.len() as StrId;
        let rc: Rc<[Label]> = labels.into();
        self.ids.insert(Rc::clone(&rc), id);
        self.strings.push(rc);
        id
    }

    fn get(&self, id: StrId) -> &[Label] {
        &self.strings[id as usize]
    }
}

/// Composite state: input-FST state (`NO_STATE` once only residuals remain
/// to drain) plus the residual input and output strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Element {
    state: StateId,
    istring: StrId,
    ostring: StrId,
}

/// Delayed synchronization of a transducer.
///
/// A composite state is final iff the underlying state is final and both
/// residuals are empty; a final underlying state with pending residuals
/// drains them through `NO_STATE` pseudo-states. Termination requires the
/// input to have bounded delay; this is not detected here.
pub struct SynchronizeFst<W: Semiring, F: Fst<W>> {
    fst: F,
    cache: RefCell<StateCache<W>>,
    table: RefCell<StateTable<Element>>,
    strings: RefCell<StringSet>,
    props: Cell<u64>,
}

impl<W: Semiring, F: Fst<W>> SynchronizeFst<W, F> {
    pub fn new(fst: F) -> Self {
        Self::with_options(fst, CacheOptions::default())
    }

    pub fn with_options(fst: F, cache_opts: CacheOptions) -> Self {
        let props = synchronize_properties(fst.properties(ALL_PROPERTIES, false));
        SynchronizeFst {
            fst,
            cache: RefCell::new(StateCache::new(cache_opts)),
            table: RefCell::new(StateTable::new()),
            strings: RefCell::new(StringSet::new()),
            props: Cell::new(props),
        }
    }

    /// First label of the string `s · l`, epsilon if both are absent.
    fn car(&self, s: StrId, l: Label) -> Label {
        let strings = self.strings.borrow();
        let labels = strings.get(s);
        if let Some(&first) = labels.first() {
            first
        } else {
            l
        }
    }

    /// The string `s · l` without its first label.
    fn cdr(&self, s: StrId, l: Label) -> StrId {
        let mut strings = self.strings.borrow_mut();
        let labels = strings.get(s);
        let mut rest: Vec<Label> = labels.iter().skip(1).copied().collect();
        if l != EPSILON && !labels.is_empty() {
            rest.push(l);
        }
        strings.intern(rest)
    }

    /// The string `s · l`.
    fn concat_label(&self, s: StrId, l: Label) -> StrId {
        if l == EPSILON {
            return s;
        }
        let mut strings = self.strings.borrow_mut();
        let mut labels = strings.get(s).to_vec();
        labels.push(l);
        strings.intern(labels)
    }

    /// Is `s · l` empty?
    fn is_empty(&self, s: StrId, l: Label) -> bool {
        s == EMPTY_STR && l == EPSILON
    }

    fn str_len(&self, s: StrId) -> usize {
        self.strings.borrow().get(s).len()
    }

    fn find_state(&self, e: Element) -> StateId {
        self.table.borrow_mut().find_state(&e)
    }

    // Final weight of the underlying half of an element: 1̄ for the drain
    // pseudo-state.
    fn inner_final(&self, e: Element) -> W {
        if e.state == NO_STATE {
            W::one()
        } else {
            self.fst.final_weight(e.state)
        }
    }

    fn expand(&self, s: StateId) {
        let e = *self.table.borrow().element(s);
        let mut arcs = Vec::new();

        if e.state != NO_STATE {
            for arc in self.fst.arcs(e.state) {
                if !self.is_empty(e.istring, arc.ilabel) && !self.is_empty(e.ostring, arc.olabel) {
                    // Both sides can emit: pop the heads, push the tails.
                    let istring = self.cdr(e.istring, arc.ilabel);
                    let ostring = self.cdr(e.ostring, arc.olabel);
                    let dest = self.find_state(Element {
                        state: arc.nextstate,
                        istring,
                        ostring,
                    });
                    arcs.push(Arc::new(
                        self.car(e.istring, arc.ilabel),
                        self.car(e.ostring, arc.olabel),
                        arc.weight,
                        dest,
                    ));
                } else {
                    // One side still starved: buffer and emit nothing.
                    let istring = self.concat_label(e.istring, arc.ilabel);
                    let ostring = self.concat_label(e.ostring, arc.olabel);
                    let dest = self.find_state(Element {
                        state: arc.nextstate,
                        istring,
                        ostring,
                    });
                    arcs.push(Arc::new(EPSILON, EPSILON, arc.weight, dest));
                }
            }
        }

        // A final underlying state with residuals pending cannot finalize
        // here; drain one label pair per step through pseudo-states.
        let final_weight = self.inner_final(e);
        if !final_weight.is_zero() && self.str_len(e.istring) + self.str_len(e.ostring) > 0 {
            let istring = self.cdr(e.istring, EPSILON);
            let ostring = self.cdr(e.ostring, EPSILON);
            let dest = self.find_state(Element {
                state: NO_STATE,
                istring,
                ostring,
            });
            arcs.push(Arc::new(
                self.car(e.istring, EPSILON),
                self.car(e.ostring, EPSILON),
                final_weight,
                dest,
            ));
        }

        self.cache.borrow_mut().set_arcs(s, arcs);
    }

    fn ensure_arcs(&self, s: StateId) {
        if !self.cache.borrow().has_arcs(s) {
            self.expand(s);
        }
    }
}

impl<W: Semiring, F: Fst<W>> Fst<W> for SynchronizeFst<W, F> {
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
        let inner_start = self.fst.start();
        let start = if inner_start == NO_STATE {
            NO_STATE
        } else {
            self.find_state(Element {
                state: inner_start,
                istring: EMPTY_STR,
                ostring: EMPTY_STR,
            })
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
        let e = *self.table.borrow().element(s);
        let inner = self.inner_final(e);
        let weight = if !inner.is_zero() && e.istring == EMPTY_STR && e.ostring == EMPTY_STR {
            inner
        } else {
            W::zero()
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
        if mask & ERROR != 0 && self.fst.properties(ERROR, false) != 0 {
            self.props.set(self.props.get() | ERROR);
        }
        self.props.get() & mask
    }

    fn input_symbols(&self) -> Option<&SymbolTable> {
        self.fst.input_symbols()
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        self.fst.output_symbols()
    }
}

/// Eager synchronization: materializes the delayed form with a streaming
/// cache that only retains the state being copied.
pub fn synchronize<W: Semiring, F: Fst<W>>(ifst: &F) -> VectorFst<W> {
    let opts = CacheOptions {
        gc: true,
        gc_limit: 0,
    };
    materialize(&SynchronizeFst::with_options(ifst, opts))
}
