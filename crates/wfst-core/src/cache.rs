//! Shared infrastructure for delayed FSTs: a per-state cache of expansion
//! results and an interning table from composite state descriptors to dense
//! state ids.

use std::hash::Hash;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::fst::{Arc, StateId, EPSILON};
use crate::semiring::Semiring;

/// Cache behavior of a delayed FST.
///
/// With `gc` set, only the arcs of the last `gc_limit.max(1)` expanded states
/// are retained; `gc_limit = 0` keeps just the most recent expansion, the
/// right mode for streaming copies. Evicted states are re-expanded on the
/// next query; expansion is deterministic, so the recomputed arcs are
/// identical and previously handed-out arc blocks stay valid.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub gc: bool,
    pub gc_limit: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            gc: false,
            gc_limit: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedState<W> {
    final_weight: Option<W>,
    arcs: Option<Rc<[Arc<W>]>>,
    niepsilons: usize,
    noepsilons: usize,
}

impl<W> CachedState<W> {
    fn new() -> Self {
        CachedState {
            final_weight: None,
            arcs: None,
            niepsilons: 0,
            noepsilons: 0,
        }
    }
}

/// Memo table for on-demand state expansion.
///
/// Tracks, per state, whether the final weight and the arc block have been
/// computed, so absence of information is distinguishable from an empty
/// answer. Arc blocks are reference-counted slices: eviction drops the
/// cache's reference, never the block under a live iterator.
#[derive(Debug)]
pub struct StateCache<W: Semiring> {
    start: Option<StateId>,
    states: Vec<CachedState<W>>,
    expanded_order: Vec<StateId>,
    opts: CacheOptions,
}

impl<W: Semiring> StateCache<W> {
    pub fn new(opts: CacheOptions) -> Self {
        StateCache {
            start: None,
            states: Vec::new(),
            expanded_order: Vec::new(),
            opts,
        }
    }

    fn ensure(&mut self, s: StateId) {
        if self.states.len() <= s as usize {
            self.states.resize_with(s as usize + 1, CachedState::new);
        }
    }

    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }

    pub fn start(&self) -> StateId {
        self.start.expect("start queried before set")
    }

    pub fn set_start(&mut self, s: StateId) {
        self.start = Some(s);
    }

    pub fn has_final(&self, s: StateId) -> bool {
        self.states
            .get(s as usize)
            .is_some_and(|st| st.final_weight.is_some())
    }

    pub fn final_weight(&self, s: StateId) -> W {
        self.states[s as usize]
            .final_weight
            .clone()
            .expect("final weight queried before set")
    }

    pub fn set_final(&mut self, s: StateId, weight: W) {
        self.ensure(s);
        self.states[s as usize].final_weight = Some(weight);
    }

    pub fn has_arcs(&self, s: StateId) -> bool {
        self.states
            .get(s as usize)
            .is_some_and(|st| st.arcs.is_some())
    }

    pub fn arcs(&self, s: StateId) -> Rc<[Arc<W>]> {
        Rc::clone(
            self.states[s as usize]
                .arcs
                .as_ref()
                .expect("arcs queried before expansion"),
        )
    }

    pub fn num_arcs(&self, s: StateId) -> usize {
        self.states[s as usize].arcs.as_ref().map_or(0, |a| a.len())
    }

    pub fn num_input_epsilons(&self, s: StateId) -> usize {
        self.states[s as usize].niepsilons
    }

    pub fn num_output_epsilons(&self, s: StateId) -> usize {
        self.states[s as usize].noepsilons
    }

    /// Records the complete arc block of `s` and marks it expanded.
    pub fn set_arcs(&mut self, s: StateId, arcs: Vec<Arc<W>>) {
        self.ensure(s);
        let st = &mut self.states[s as usize];
        st.niepsilons = arcs.iter().filter(|a| a.ilabel == EPSILON).count();
        st.noepsilons = arcs.iter().filter(|a| a.olabel == EPSILON).count();
        st.arcs = Some(arcs.into());
        self.expanded_order.push(s);
        self.gc(s);
    }

    /// Number of states the cache has allocated slots for.
    pub fn num_known_states(&self) -> usize {
        self.states.len()
    }

    fn gc(&mut self, keep: StateId) {
        if !self.opts.gc {
            return;
        }
        let limit = self.opts.gc_limit.max(1);
        while self.expanded_order.len() > limit {
            let victim = self.expanded_order.remove(0);
            if victim != keep {
                let st = &mut self.states[victim as usize];
                st.arcs = None;
                st.niepsilons = 0;
                st.noepsilons = 0;
            }
        }
    }
}

/// Positioned cursor over a cached arc block.
///
/// Holds its own reference to the block, so it remains valid for its whole
/// lifetime even if the owning cache evicts or recomputes the state.
#[derive(Debug, Clone)]
pub struct CacheArcIterator<W> {
    arcs: Rc<[Arc<W>]>,
    pos: usize,
}

impl<W: Semiring> CacheArcIterator<W> {
    pub fn new(arcs: Rc<[Arc<W>]>) -> Self {
        CacheArcIterator { arcs, pos: 0 }
    }

    pub fn done(&self) -> bool {
        self.pos >= self.arcs.len()
    }

    pub fn value(&self) -> &Arc<W> {
        &self.arcs[self.pos]
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }
}

impl<W: Semiring> Iterator for CacheArcIterator<W> {
    type Item = Arc<W>;

    fn next(&mut self) -> Option<Arc<W>> {
        let arc = self.arcs.get(self.pos).cloned();
        if arc.is_some() {
            self.pos += 1;
        }
        arc
    }
}

/// Bidirectional map between composite state descriptors and dense ids.
///
/// Ids are assigned on first sight and never change, so interning is how a
/// delayed FST keeps its state numbering stable across cache evictions.
#[derive(Debug)]
pub struct StateTable<T> {
    ids: FxHashMap<T, StateId>,
    elements: Vec<T>,
}

impl<T: Hash + Eq + Clone> StateTable<T> {
    pub fn new() -> Self {
        StateTable {
            ids: FxHashMap::default(),
            elements: Vec::new(),
        }
    }

    /// Id of `element`, allocating the next dense id on first sight.
    pub fn find_state(&mut self, element: &T) -> StateId {
        if let Some(&id) = self.ids.get(element) {
            return id;
        }
        let id = self.elements.len() as StateId;
        self.elements.push(element.clone());
        self.ids.insert(element.clone(), id);
        id
    }

    pub fn element(&self, s: StateId) -> &T {
        &self.elements[s as usize]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: Hash + Eq + Clone> Default for StateTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    #[test]
    fn test_cache_tri_state() {
        let mut cache: StateCache<W> = StateCache::new(CacheOptions::default());
        assert!(!cache.has_start());
        cache.set_start(3);
        assert_eq!(cache.start(), 3);

        assert!(!cache.has_final(0));
        cache.set_final(0, TropicalWeight(1.0));
        assert!(cache.has_final(0));
        assert!(!cache.has_arcs(0));

        cache.set_arcs(0, vec![Arc::new(0, 1, TropicalWeight(0.0), 1)]);
        assert!(cache.has_arcs(0));
        assert_eq!(cache.num_arcs(0), 1);
        assert_eq!(cache.num_input_epsilons(0), 1);
        assert_eq!(cache.num_output_epsilons(0), 0);
    }

    #[test]
    fn test_cache_gc_keeps_last() {
        let mut cache: StateCache<W> = StateCache::new(CacheOptions { gc: true, gc_limit: 0 });
        cache.set_arcs(0, vec![Arc::new(1, 1, TropicalWeight(0.0), 1)]);
        cache.set_arcs(1, vec![Arc::new(2, 2, TropicalWeight(0.0), 2)]);
        assert!(!cache.has_arcs(0));
        assert!(cache.has_arcs(1));
        // An evicted state can be re-expanded
        cache.set_arcs(0, vec![Arc::new(1, 1, TropicalWeight(0.0), 1)]);
        assert!(cache.has_arcs(0));
        assert!(!cache.has_arcs(1));
    }

    #[test]
    fn test_iterator_survives_eviction() {
        let mut cache: StateCache<W> = StateCache::new(CacheOptions { gc: true, gc_limit: 0 });
        cache.set_arcs(0, vec![Arc::new(1, 2, TropicalWeight(0.5), 7)]);
        let mut iter = CacheArcIterator::new(cache.arcs(0));
        cache.set_arcs(1, vec![]);
        assert!(!cache.has_arcs(0));
        assert!(!iter.done());
        assert_eq!(iter.value().nextstate, 7);
        iter.advance();
        assert!(iter.done());
    }

    #[test]
    fn test_cursor_seek() {
        let arcs: Rc<[Arc<W>]> = vec![
            Arc::new(1, 1, TropicalWeight(0.0), 1),
            Arc::new(2, 2, TropicalWeight(0.0), 2),
            Arc::new(3, 3, TropicalWeight(0.0), 3),
        ]
        .into();
        let mut iter = CacheArcIterator::new(arcs);
        iter.seek(2);
        assert_eq!(iter.position(), 2);
        assert_eq!(iter.value().ilabel, 3);
        iter.seek(0);
        assert_eq!(iter.next().map(|a| a.ilabel), Some(1));
    }

    #[test]
    fn test_state_table_interns() {
        let mut table: StateTable<(u8, StateId)> = StateTable::new();
        let a = table.find_state(&(0, 5));
        let b = table.find_state(&(1, 5));
        let c = table.find_state(&(0, 5));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, a);
        assert_eq!(*table.element(b), (1, 5));
        assert_eq!(table.len(), 2);
    }
}
