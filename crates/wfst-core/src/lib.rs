//! Core weighted finite-state transducer algorithms.
//!
//! Generic algorithms over directed, labeled, weighted graphs parameterized
//! by an algebraic [`Semiring`]: delayed (on-demand, cached) FSTs, epsilon
//! removal, concatenation, synchronization, isomorphism and label
//! reachability, with the shortest-distance engine underneath.

pub mod cache;
pub mod concat;
pub mod connect;
pub mod dfs;
pub mod errors;
pub mod fst;
pub mod interval_set;
pub mod isomorphic;
pub mod label_reachable;
pub mod properties;
pub mod prune;
pub mod queue;
pub mod rmepsilon;
pub mod semiring;
pub mod shortest_distance;
pub mod state_reachable;
pub mod synchronize;

pub use crate::cache::{CacheArcIterator, CacheOptions};
pub use crate::concat::{concat, concat_right, ConcatFst};
pub use crate::connect::connect;
pub use crate::errors::FstError;
pub use crate::interval_set::{Interval, IntervalSet};
pub use crate::fst::{
    arc_sort, compat_symbols, materialize, Arc, ExpandedFst, Fst, Label, MutableFst, StateId,
    SymbolTable, VectorFst, EPSILON, NO_LABEL, NO_STATE,
};
pub use crate::isomorphic::isomorphic;
pub use crate::label_reachable::{
    Accumulator, DefaultAccumulator, LabelReachable, LabelReachableData,
};
pub use crate::prune::prune;
pub use crate::queue::{
    AutoQueue, FifoQueue, LifoQueue, ShortestFirstQueue, StateQueue, TopOrderQueue,
};
pub use crate::rmepsilon::{rm_epsilon, RmEpsilonConfig, RmEpsilonFst};
pub use crate::semiring::{
    natural_less, BooleanWeight, Log64Weight, LogWeight, ProbabilityWeight, ProductWeight,
    Semiring, StringWeight, TropicalWeight, DELTA,
};
pub use crate::shortest_distance::{shortest_distance, ShortestDistanceConfig};
pub use crate::synchronize::{synchronize, SynchronizeFst};
