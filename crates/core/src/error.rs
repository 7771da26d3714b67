//! Error of iris_core

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in iris-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("identifier space of {space} bits is not a whole number of {base} bit digits")]
    UnevenSpace { space: usize, base: usize },

    #[error("malformed overlay identifier: {0}")]
    MalformedId(String),

    #[error("identifier {0} outside the configured space")]
    IdOverflow(String),

    #[error("peer link broken")]
    LinkBroken,

    #[error("peer link closed")]
    LinkClosed,

    #[error("stale state exchange: version {got} not beyond {seen}")]
    StaleState { got: u64, seen: u64 },

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("identity {0} is already monitored")]
    AlreadyMonitored(String),

    #[error("identity {0} is not monitored")]
    NotMonitored(String),

    #[error("no bootstrap seed acquired within the deadline")]
    BootstrapStarvation,

    #[error("overlay already {0}, operation needs an earlier lifecycle state")]
    LateLifecycle(&'static str),

    #[error("none of the advertised endpoints are reachable: {0}")]
    Unreachable(String),

    #[error("oversized frame of {0} bytes")]
    OversizedFrame(usize),

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire serialization error")]
    Serialize(#[source] bincode::Error),

    #[error("wire deserialization error")]
    Deserialize(#[source] bincode::Error),
}
