use thiserror::Error;

use crate::fst::StateId;

/// Failure classes reported by the core algorithms.
///
/// Algorithms that mutate or produce an FST report errors through the
/// `ERROR` property bit (sticky, propagated to derived FSTs); query-style
/// entry points return `Result` with one of these values, where the error
/// supersedes any boolean answer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FstError {
    #[error("input/output symbol tables are incompatible")]
    IncompatibleSymbols,

    #[error("arcs are not sorted on the required side")]
    UnsortedArcs,

    #[error("inconsistent property bit: {0}")]
    InconsistentProperties(&'static str),

    #[error("weight hash collision at delta {delta}")]
    WeightHashCollision { delta: f32 },

    #[error("non-determinism as an unweighted automaton")]
    NondeterministicUnweighted,

    #[error("shortest distance did not converge")]
    NonConvergence,

    #[error("semiring has no natural order")]
    NoNaturalOrder,

    #[error("state id {0} out of range")]
    StateOutOfRange(StateId),
}
