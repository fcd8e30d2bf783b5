use crate::graph::VertexId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the index structures. All of them abort the current operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vertex {0} not found")]
    VertexNotFound(VertexId),

    #[error("no order list for core level {0}")]
    LevelNotFound(usize),

    #[error("position {position} is out of range for a list of {len} vertices")]
    InvalidRange { position: usize, len: usize },

    #[error("query on an empty tree")]
    TreeEmpty,

    #[error("vertex {0} is already present")]
    Duplicate(VertexId),

    /// A special marker other than `[` or `]`, or an unknown wire tag.
    #[error("unknown verification object token: {0}")]
    UnknownToken(String),

    #[error("malformed verification object: {0}")]
    MalformedVo(String),

    /// Diagnostic checks only; never relied upon in the hot path.
    #[error("structural invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} has not been built")]
    IndexNotBuilt(&'static str),

    #[error("malformed edge list at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replaying a verification object did not prove the claimed answer.
///
/// Kept apart from [`Error`] so that a forged or corrupted proof can never be
/// mistaken for a usage error such as an unknown vertex.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("proof invalid: computed root {computed} does not match trusted root {expected}")]
    DigestMismatch { expected: String, computed: String },

    #[error("proof invalid: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Malformed(#[from] Error),
}

/// Decrements a counter of the maintenance algorithm, reporting underflow.
pub(crate) fn decrement(counter: &mut usize, what: &str, v: VertexId) -> Result<()> {
    *counter = counter
        .checked_sub(1)
        .ok_or_else(|| Error::InvariantViolation(format!("{what} of vertex {v} underflows")))?;
    Ok(())
}
