//! Epsilon removal: replaces every path of epsilon/epsilon arcs by direct
//! arcs carrying the closure distance, in an eager (in-place) and a delayed
//! (on-demand, cached) form.

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;
use tracing::error;

use crate::cache::{CacheArcIterator, CacheOptions, StateCache};
use crate::connect::connect;
use crate::dfs::{scc_decompose, top_order, ArcFilter, EpsilonArcFilter};
use crate::fst::{Arc, ExpandedFst, Fst, Label, MutableFst, StateId, SymbolTable, VectorFst, NO_STATE};
use crate::properties::{self, rm_epsilon_properties, ACYCLIC, ERROR, TOP_SORTED};
use crate::prune::prune;
use crate::queue::{AutoQueue, FifoQueue, StateQueue};
use crate::semiring::{Semiring, DELTA};
use crate::shortest_distance::{ShortestDistanceConfig, ShortestDistanceState};

/// Per-state expansion engine shared by the eager and delayed variants.
///
/// `expand` computes the epsilon-closure of a source state through the
/// shortest-distance engine, then re-emits every non-epsilon arc of the
/// closure weighted by its closure distance. Duplicate `(ilabel, olabel,
/// nextstate)` triples are ⊕-combined through a hash map whose entries carry
/// an expansion id, so the map is reused across expansions without clearing.
pub struct RmEpsilonState<W: Semiring, Q> {
    sd: ShortestDistanceState<W, Q>,
    element_map: FxHashMap<(Label, Label, StateId), (u32, usize)>,
    visited: Vec<bool>,
    visited_states: Vec<StateId>,
    eps_queue: Vec<StateId>,
    arcs: Vec<Arc<W>>,
    final_weight: W,
    expand_id: u32,
}

impl<W: Semiring, Q: StateQueue<W>> RmEpsilonState<W, Q> {
    pub fn new(queue: Q, config: ShortestDistanceConfig) -> Self {
        RmEpsilonState {
            sd: ShortestDistanceState::new(queue, config),
            element_map: FxHashMap::default(),
            visited: Vec::new(),
            visited_states: Vec::new(),
            eps_queue: Vec::new(),
            arcs: Vec::new(),
            final_weight: W::zero(),
            expand_id: 0,
        }
    }

    pub fn error(&self) -> bool {
        self.sd.error()
    }

    /// Expanded arcs, in emission order. Drained by the caller.
    pub fn arcs_mut(&mut self) -> &mut Vec<Arc<W>> {
        &mut self.arcs
    }

    pub fn final_weight(&self) -> W {
        self.final_weight.clone()
    }

    pub fn expand<F: Fst<W>>(&mut self, fst: &F, source: StateId) {
        self.final_weight = W::zero();
        self.arcs.clear();
        self.sd.shortest_distance(fst, source, EpsilonArcFilter);
        if self.sd.error() {
            return;
        }

        let eps_filter = EpsilonArcFilter;
        self.eps_queue.push(source);
        while let Some(state) = self.eps_queue.pop() {
            if self.visited.len() <= state as usize {
                self.visited.resize(state as usize + 1, false);
            }
            if self.visited[state as usize] {
                continue;
            }
            self.visited[state as usize] = true;
            self.visited_states.push(state);

            let distance = self.sd.distance(state);
            for mut arc in fst.arcs(state) {
                if eps_filter.keep(&arc) {
                    if self.visited.len() <= arc.nextstate as usize {
                        self.visited.resize(arc.nextstate as usize + 1, false);
                    }
                    if !self.visited[arc.nextstate as usize] {
                        self.eps_queue.push(arc.nextstate);
                    }
                    continue;
                }
                arc.weight = distance.times(&arc.weight);
                let key = (arc.ilabel, arc.olabel, arc.nextstate);
                match self.element_map.get_mut(&key) {
                    Some(entry) if entry.0 == self.expand_id => {
                        let existing = &mut self.arcs[entry.1];
                        existing.weight = existing.weight.plus(&arc.weight);
                    }
                    Some(entry) => {
                        entry.0 = self.expand_id;
                        entry.1 = self.arcs.len();
                        self.arcs.push(arc);
                    }
                    None => {
                        self.element_map
                            .insert(key, (self.expand_id, self.arcs.len()));
                        self.arcs.push(arc);
                    }
                }
            }
            self.final_weight = self
                .final_weight
                .plus(&distance.times(&fst.final_weight(state)));
        }

        // Reset the visited bitmap through the trail, not a full clear.
        for state in self.visited_states.drain(..) {
            self.visited[state as usize] = false;
        }
        self.expand_id = self.expand_id.wrapping_add(1);
    }
}

/// Options for eager epsilon removal.
#[derive(Debug, Clone)]
pub struct RmEpsilonConfig<W> {
    /// Trim the result to its connected part.
    pub connect: bool,
    /// Prune paths worse than best ⊗ this bound; `0̄` disables.
    pub weight_threshold: W,
    /// Keep at most this many states; `NO_STATE` disables.
    pub state_threshold: StateId,
    pub delta: f32,
}

impl<W: Semiring> Default for RmEpsilonConfig<W> {
    fn default() -> Self {
        RmEpsilonConfig {
            connect: true,
            weight_threshold: W::zero(),
            state_threshold: NO_STATE,
            delta: DELTA,
        }
    }
}

/// Removes epsilon/epsilon arcs in place, leaving an equivalent FST.
///
/// States are processed from the sinks of the epsilon subgraph upward:
/// natural order when the FST is known top-sorted, an epsilon-filtered
/// topological order when known acyclic, and SCC grouping otherwise. An
/// `ACYCLIC` bit contradicted by the epsilon-filtered DFS is reported as an
/// inconsistent property and aborts with `ERROR`.
pub fn rm_epsilon<W: Semiring>(fst: &mut VectorFst<W>, config: RmEpsilonConfig<W>) {
    if fst.start() == NO_STATE {
        return;
    }
    let n = fst.num_states() as usize;

    // True iff the state is the start or admits a non-epsilon incoming arc;
    // other states become unreachable once epsilons are gone.
    let mut noneps_in = vec![false; n];
    noneps_in[fst.start() as usize] = true;
    for s in 0..n as StateId {
        for arc in fst.arcs(s) {
            if arc.ilabel != 0 || arc.olabel != 0 {
                noneps_in[arc.nextstate as usize] = true;
            }
        }
    }

    let mut states: Vec<StateId> = Vec::with_capacity(n);
    if fst.properties(TOP_SORTED, false) != 0 {
        states.extend(0..n as StateId);
    } else if fst.properties(ACYCLIC, false) != 0 {
        let t = top_order(fst, EpsilonArcFilter);
        if !t.acyclic {
            error!("rm_epsilon: inconsistent acyclic property bit");
            fst.set_properties(ERROR, ERROR);
            return;
        }
        states.resize(n, 0);
        for s in 0..n {
            states[t.order[s] as usize] = s as StateId;
        }
    } else {
        // Group states by strongly-connected component of the epsilon
        // subgraph, components in topological order.
        let d = scc_decompose(fst, EpsilonArcFilter);
        let mut first: Vec<StateId> = vec![NO_STATE; d.num_sccs as usize];
        let mut next: Vec<StateId> = vec![NO_STATE; n];
        for s in (0..n as StateId).rev() {
            let c = d.scc[s as usize] as usize;
            next[s as usize] = first[c];
            first[c] = s;
        }
        for c in 0..d.num_sccs as usize {
            let mut s = first[c];
            while s != NO_STATE {
                states.push(s);
                s = next[s as usize];
            }
        }
    }

    let pruning = !config.weight_threshold.is_zero() || config.state_threshold != NO_STATE;
    let sd_config = ShortestDistanceConfig { delta: config.delta };
    let queue = AutoQueue::new(fst, EpsilonArcFilter);
    let mut rmeps_state = RmEpsilonState::new(queue, sd_config);

    while let Some(state) = states.pop() {
        if !noneps_in[state as usize] && (config.connect || pruning) {
            continue;
        }
        rmeps_state.expand(&*fst, state);
        let final_weight = rmeps_state.final_weight();
        fst.set_final(state, final_weight);
        fst.delete_arcs(state);
        fst.reserve_arcs(state, rmeps_state.arcs_mut().len());
        while let Some(arc) = rmeps_state.arcs_mut().pop() {
            fst.add_arc(state, arc);
        }
    }

    if config.connect || pruning {
        for s in 0..n as StateId {
            if !noneps_in[s as usize] {
                fst.delete_arcs(s);
            }
        }
    }

    if rmeps_state.error() {
        fst.set_properties(ERROR, ERROR);
    }
    let props = fst.properties(properties::ALL_PROPERTIES, false);
    fst.set_properties(rm_epsilon_properties(props), properties::ALL_PROPERTIES);

    if pruning {
        prune(fst, config.weight_threshold, config.state_threshold, config.delta);
    } else if config.connect {
        connect(fst);
    }
}

/// Delayed epsilon removal: states expand on first visit and the results are
/// memoized. State ids coincide with the input's.
pub struct RmEpsilonFst<W: Semiring, F: Fst<W>> {
    fst: F,
    cache: RefCell<StateCache<W>>,
    rmeps: RefCell<RmEpsilonState<W, FifoQueue>>,
    props: Cell<u64>,
}

impl<W: Semiring, F: Fst<W>> RmEpsilonFst<W, F> {
    pub fn new(fst: F) -> Self {
        Self::with_options(fst, CacheOptions::default(), DELTA)
    }

    pub fn with_options(fst: F, cache_opts: CacheOptions, delta: f32) -> Self {
        let input_props = fst.properties(properties::ALL_PROPERTIES, false);
        RmEpsilonFst {
            fst,
            cache: RefCell::new(StateCache::new(cache_opts)),
            rmeps: RefCell::new(RmEpsilonState::new(
                FifoQueue::new(),
                ShortestDistanceConfig { delta },
            )),
            props: Cell::new(rm_epsilon_properties(input_props)),
        }
    }

    fn expand(&self, s: StateId) {
        let mut rmeps = self.rmeps.borrow_mut();
        rmeps.expand(&self.fst, s);
        if rmeps.error() {
            self.props.set(self.props.get() | ERROR);
        }
        let final_weight = rmeps.final_weight();
        let arcs = std::mem::take(rmeps.arcs_mut());
        drop(rmeps);
        let mut cache = self.cache.borrow_mut();
        cache.set_final(s, final_weight);
        cache.set_arcs(s, arcs);
    }

    fn ensure_arcs(&self, s: StateId) {
        if !self.cache.borrow().has_arcs(s) {
            self.expand(s);
        }
    }
}

impl<W: Semiring, F: Fst<W>> Fst<W> for RmEpsilonFst<W, F> {
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
        let start = self.fst.start();
        self.cache.borrow_mut().set_start(start);
        start
    }

    fn final_weight(&self, s: StateId) -> W {
        if !self.cache.borrow().has_final(s) {
            self.expand(s);
        }
        self.cache.borrow().final_weight(s)
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
