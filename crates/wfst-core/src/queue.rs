//! Queue disciplines for the shortest-distance engine.
//!
//! The engine hands the current distance of a state to `enqueue`/`update`, so
//! priority queues never need a back-reference into the distance table.

use std::collections::BinaryHeap;
use std::collections::VecDeque;

use crate::dfs::{scc_decompose, ArcFilter};
use crate::fst::{ExpandedFst, StateId};
use crate::semiring::{natural_less, Semiring, IDEMPOTENT};

pub trait StateQueue<W: Semiring> {
    fn enqueue(&mut self, s: StateId, d: &W);

    /// Signals that the priority of an already-queued state changed.
    fn update(&mut self, s: StateId, d: &W);

    fn dequeue(&mut self) -> Option<StateId>;

    fn clear(&mut self);
}

/// Breadth-first discipline.
#[derive(Debug, Default)]
pub struct FifoQueue {
    queue: VecDeque<StateId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        FifoQueue {
            queue: VecDeque::new(),
        }
    }
}

impl<W: Semiring> StateQueue<W> for FifoQueue {
    fn enqueue(&mut self, s: StateId, _d: &W) {
        self.queue.push_back(s);
    }

    fn update(&mut self, _s: StateId, _d: &W) {}

    fn dequeue(&mut self) -> Option<StateId> {
        self.queue.pop_front()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Depth-first discipline.
#[derive(Debug, Default)]
pub struct LifoQueue {
    stack: Vec<StateId>,
}

impl LifoQueue {
    pub fn new() -> Self {
        LifoQueue { stack: Vec::new() }
    }
}

impl<W: Semiring> StateQueue<W> for LifoQueue {
    fn enqueue(&mut self, s: StateId, _d: &W) {
        self.stack.push(s);
    }

    fn update(&mut self, _s: StateId, _d: &W) {}

    fn dequeue(&mut self) -> Option<StateId> {
        self.stack.pop()
    }

    fn clear(&mut self) {
        self.stack.clear();
    }
}

struct HeapEntry<W> {
    state: StateId,
    weight: W,
    seq: u64,
}

impl<W: Semiring> PartialEq for HeapEntry<W> {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state && self.seq == other.seq
    }
}

impl<W: Semiring> Eq for HeapEntry<W> {}

impl<W: Semiring> Ord for HeapEntry<W> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert the natural order so the least
        // weight pops first. Ties break on insertion sequence for
        // determinism.
        if natural_less(&self.weight, &other.weight) {
            std::cmp::Ordering::Greater
        } else if natural_less(&other.weight, &self.weight) {
            std::cmp::Ordering::Less
        } else {
            other.seq.cmp(&self.seq)
        }
    }
}

impl<W: Semiring> PartialOrd for HeapEntry<W> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra discipline for idempotent semirings with a natural order.
///
/// Updated states are re-pushed; stale heap entries are discarded on pop by
/// comparing against the newest sequence number recorded for the state.
pub struct ShortestFirstQueue<W: Semiring> {
    heap: BinaryHeap<HeapEntry<W>>,
    latest: rustc_hash::FxHashMap<StateId, u64>,
    seq: u64,
}

impl<W: Semiring> ShortestFirstQueue<W> {
    pub fn new() -> Self {
        debug_assert!(W::PROPERTIES & IDEMPOTENT != 0);
        ShortestFirstQueue {
            heap: BinaryHeap::new(),
            latest: rustc_hash::FxHashMap::default(),
            seq: 0,
        }
    }

    fn push(&mut self, s: StateId, d: &W) {
        self.seq += 1;
        self.latest.insert(s, self.seq);
        self.heap.push(HeapEntry {
            state: s,
            weight: d.clone(),
            seq: self.seq,
        });
    }
}

impl<W: Semiring> Default for ShortestFirstQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Semiring> StateQueue<W> for ShortestFirstQueue<W> {
    fn enqueue(&mut self, s: StateId, d: &W) {
        self.push(s, d);
    }

    fn update(&mut self, s: StateId, d: &W) {
        self.push(s, d);
    }

    fn dequeue(&mut self) -> Option<StateId> {
        while let Some(entry) = self.heap.pop() {
            if self.latest.get(&entry.state) == Some(&entry.seq) {
                self.latest.remove(&entry.state);
                return Some(entry.state);
            }
        }
        None
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.latest.clear();
    }
}

/// Single-pass discipline over a precomputed topological order.
pub struct TopOrderQueue {
    order: Vec<StateId>,
    slots: Vec<Option<StateId>>,
    front: usize,
}

impl TopOrderQueue {
    /// `order[s]` is the topological rank of `s`.
    pub fn new(order: Vec<StateId>) -> Self {
        let n = order.len();
        TopOrderQueue {
            order,
            slots: vec![None; n],
            front: 0,
        }
    }
}

impl<W: Semiring> StateQueue<W> for TopOrderQueue {
    fn enqueue(&mut self, s: StateId, _d: &W) {
        let rank = self.order[s as usize] as usize;
        self.slots[rank] = Some(s);
        if rank < self.front {
            self.front = rank;
        }
    }

    fn update(&mut self, _s: StateId, _d: &W) {}

    fn dequeue(&mut self) -> Option<StateId> {
        while self.front < self.slots.len() {
            if let Some(s) = self.slots[self.front].take() {
                return Some(s);
            }
            self.front += 1;
        }
        None
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.front = 0;
    }
}

enum InnerQueue<W: Semiring> {
    Trivial(Option<StateId>),
    Fifo(FifoQueue),
    ShortestFirst(ShortestFirstQueue<W>),
}

impl<W: Semiring> InnerQueue<W> {
    fn enqueue(&mut self, s: StateId, d: &W) {
        match self {
            InnerQueue::Trivial(slot) => *slot = Some(s),
            InnerQueue::Fifo(q) => q.enqueue(s, d),
            InnerQueue::ShortestFirst(q) => q.enqueue(s, d),
        }
    }

    fn update(&mut self, s: StateId, d: &W) {
        match self {
            InnerQueue::Trivial(_) => {}
            InnerQueue::Fifo(q) => StateQueue::<W>::update(q, s, d),
            InnerQueue::ShortestFirst(q) => q.update(s, d),
        }
    }

    fn dequeue(&mut self) -> Option<StateId> {
        match self {
            InnerQueue::Trivial(slot) => slot.take(),
            InnerQueue::Fifo(q) => StateQueue::<W>::dequeue(q),
            InnerQueue::ShortestFirst(q) => q.dequeue(),
        }
    }

    fn clear(&mut self) {
        match self {
            InnerQueue::Trivial(slot) => *slot = None,
            InnerQueue::Fifo(q) => StateQueue::<W>::clear(q),
            InnerQueue::ShortestFirst(q) => q.clear(),
        }
    }
}

/// Per-SCC discipline chosen from the graph shape and semiring.
///
/// Components are processed in topological order of the condensation. A
/// trivial component holds a single slot; a non-trivial one gets the
/// shortest-first discipline when the semiring is idempotent, FIFO
/// otherwise. On an acyclic graph this degenerates to a topological sweep.
pub struct AutoQueue<W: Semiring> {
    scc: Vec<u32>,
    queues: Vec<InnerQueue<W>>,
    front: usize,
}

impl<W: Semiring> AutoQueue<W> {
    pub fn new<F: ExpandedFst<W>, A: ArcFilter<W>>(fst: &F, filter: A) -> Self {
        let n = fst.num_states() as usize;
        let decomposition = scc_decompose(fst, filter);
        let nsccs = decomposition.num_sccs as usize;

        let mut member_count = vec![0usize; nsccs];
        for s in 0..n {
            member_count[decomposition.scc[s] as usize] += 1;
        }
        // A single-state component still needs a real queue if it carries a
        // filtered self-loop.
        let mut has_self_loop = vec![false; nsccs];
        for s in 0..n as StateId {
            for arc in fst.arcs(s) {
                if filter.keep(&arc) && arc.nextstate == s {
                    has_self_loop[decomposition.scc[s as usize] as usize] = true;
                }
            }
        }

        let queues = (0..nsccs)
            .map(|c| {
                if member_count[c] <= 1 && !has_self_loop[c] {
                    InnerQueue::Trivial(None)
                } else if W::PROPERTIES & IDEMPOTENT != 0 {
                    InnerQueue::ShortestFirst(ShortestFirstQueue::new())
                } else {
                    InnerQueue::Fifo(FifoQueue::new())
                }
            })
            .collect();

        AutoQueue {
            scc: decomposition.scc,
            queues,
            front: 0,
        }
    }

}

impl<W: Semiring> StateQueue<W> for AutoQueue<W> {
    fn enqueue(&mut self, s: StateId, d: &W) {
        let c = self.scc[s as usize] as usize;
        self.queues[c].enqueue(s, d);
        if c < self.front {
            self.front = c;
        }
    }

    fn update(&mut self, s: StateId, d: &W) {
        self.queues[self.scc[s as usize] as usize].update(s, d);
    }

    fn dequeue(&mut self) -> Option<StateId> {
        while self.front < self.queues.len() {
            if let Some(s) = self.queues[self.front].dequeue() {
                return Some(s);
            }
            self.front += 1;
        }
        None
    }

    fn clear(&mut self) {
        self.queues.iter_mut().for_each(InnerQueue::clear);
        self.front = 0;
    }
}
