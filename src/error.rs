use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or driving the collision engine.
///
/// Missing collisions and stale queue entries are ordinary control flow and
/// never show up here.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration that cannot describe a valid periodic hard-sphere gas.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The particle store or grid cell array could not be reserved.
    #[error("allocation failed for {what} ({count} entries)")]
    Allocation { what: &'static str, count: usize },

    /// A particle with non-finite state or a negative radius.
    #[error("invalid particle: {0}")]
    InvalidParticle(String),

    /// An event time that cannot be ordered (NaN).
    #[error("invalid event time: {0}")]
    InvalidTime(f64),

    /// Operation not permitted in the driver's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
