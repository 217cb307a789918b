//! Single-source shortest distance under an arc filter and a queue
//! discipline: the substrate for epsilon closures and pruning.

use crate::dfs::ArcFilter;
use crate::fst::{Fst, StateId, NO_STATE};
use crate::queue::StateQueue;
use crate::semiring::{Semiring, DELTA};

#[derive(Debug, Clone, Copy)]
pub struct ShortestDistanceConfig {
    /// Relaxations below this tolerance do not re-enqueue.
    pub delta: f32,
}

impl Default for ShortestDistanceConfig {
    fn default() -> Self {
        ShortestDistanceConfig { delta: DELTA }
    }
}

/// Reusable computation state for repeated single-source runs.
///
/// Distances are valid only for the most recent source; a generation counter
/// per state avoids clearing the tables between runs, so a caller expanding
/// many closures (epsilon removal) pays O(closure) per run, not O(V).
pub struct ShortestDistanceState<W: Semiring, Q> {
    distance: Vec<W>,
    residual: Vec<W>,
    enqueued: Vec<bool>,
    generation: Vec<u32>,
    current: u32,
    queue: Q,
    delta: f32,
    error: bool,
}

impl<W: Semiring, Q: StateQueue<W>> ShortestDistanceState<W, Q> {
    pub fn new(queue: Q, config: ShortestDistanceConfig) -> Self {
        ShortestDistanceState {
            distance: Vec::new(),
            residual: Vec::new(),
            enqueued: Vec::new(),
            generation: Vec::new(),
            current: 0,
            queue,
            delta: config.delta,
            error: false,
        }
    }

    pub fn error(&self) -> bool {
        self.error
    }

    /// Distance from the last run's source to `s`; `0̄` for unvisited states.
    pub fn distance(&self, s: StateId) -> W {
        match self.generation.get(s as usize) {
            Some(&gen) if gen == self.current => self.distance[s as usize].clone(),
            _ => W::zero(),
        }
    }

    fn ensure(&mut self, s: StateId) {
        let needed = s as usize + 1;
        if self.distance.len() < needed {
            self.distance.resize(needed, W::zero());
            self.residual.resize(needed, W::zero());
            self.enqueued.resize(needed, false);
            self.generation.resize(needed, 0);
        }
    }

    // Resets a state lazily on first touch in this run.
    fn touch(&mut self, s: StateId) {
        self.ensure(s);
        if self.generation[s as usize] != self.current {
            self.generation[s as usize] = self.current;
            self.distance[s as usize] = W::zero();
            self.residual[s as usize] = W::zero();
            self.enqueued[s as usize] = false;
        }
    }

    /// Runs the engine from `source` over `filter`-admitted arcs, leaving
    /// per-state sums readable through `distance`.
    ///
    /// Termination is guaranteed for idempotent semirings with a natural
    /// order, and for acyclic (or converging) filtered subgraphs otherwise.
    /// A non-member weight encountered during relaxation sets the error flag
    /// and aborts the run.
    pub fn shortest_distance<F: Fst<W>, A: ArcFilter<W>>(
        &mut self,
        fst: &F,
        source: StateId,
        filter: A,
    ) {
        self.current = self.current.wrapping_add(1);
        self.queue.clear();
        if source == NO_STATE {
            return;
        }

        self.touch(source);
        self.distance[source as usize] = W::one();
        self.residual[source as usize] = W::one();
        self.enqueued[source as usize] = true;
        self.queue.enqueue(source, &W::one());

        while let Some(s) = self.queue.dequeue() {
            self.enqueued[s as usize] = false;
            let r = self.residual[s as usize].clone();
            self.residual[s as usize] = W::zero();
            if !r.is_member() {
                self.error = true;
                return;
            }
            for arc in fst.arcs(s) {
                if !filter.keep(&arc) {
                    continue;
                }
                let t = arc.nextstate;
                self.touch(t);
                let mass = r.times(&arc.weight);
                let relaxed = self.distance[t as usize].plus(&mass);
                if !self.distance[t as usize].approx_eq(&relaxed, self.delta) {
                    if !relaxed.is_member() {
                        self.error = true;
                        return;
                    }
                    self.distance[t as usize] = relaxed;
                    self.residual[t as usize] = self.residual[t as usize].plus(&mass);
                    let d = self.distance[t as usize].clone();
                    if self.enqueued[t as usize] {
                        self.queue.update(t, &d);
                    } else {
                        self.enqueued[t as usize] = true;
                        self.queue.enqueue(t, &d);
                    }
                }
            }
        }
    }
}

/// One-shot distance from `source` to every reachable state.
pub fn shortest_distance<W, F, A, Q>(
    fst: &F,
    source: StateId,
    filter: A,
    queue: Q,
    config: ShortestDistanceConfig,
) -> Result<Vec<W>, crate::errors::FstError>
where
    W: Semiring,
    F: Fst<W>,
    A: ArcFilter<W>,
    Q: StateQueue<W>,
{
    let mut state = ShortestDistanceState::new(queue, config);
    state.shortest_distance(fst, source, filter);
    if state.error() {
        return Err(crate::errors::FstError::NonConvergence);
    }
    let n = state.distance.len();
    Ok((0..n as StateId).map(|s| state.distance(s)).collect())
}
