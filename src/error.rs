use thiserror::Error;

use crate::term::MetavarId;

/// Failure modes of the calculus. None of these are recoverable: each one
/// signals a defect in the caller (typically the elaborator driving this
/// core), so callers should propagate rather than retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown metavariable {0}")]
    UnknownMetavar(MetavarId),
    #[error("metavariable {0} is already assigned")]
    AlreadyAssigned(MetavarId),
    #[error("malformed chain: free variable #{index} occurs in the range lowered by ({cutoff}, {amount})")]
    MalformedChain {
        index: usize,
        cutoff: usize,
        amount: usize,
    },
    #[error("instantiate requires at least one replacement term")]
    ArityMismatch,
    #[error("metavariable {0} is assigned to a term that mentions itself")]
    CyclicMetavar(MetavarId),
}
