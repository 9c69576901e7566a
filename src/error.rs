//! Error taxonomy shared across the whole crate.
//!
//! Every fallible operation in this crate returns [`Error`] rather than a
//! per-module type, the way a small set of call sites (DLSAP, ring buffer,
//! LAPB) all need to interoperate without a pile of `From` impls.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds, one per failure mode named in the error handling design.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or missing configuration setting. Fatal to loading.
    #[error("config error in {module}.{function}: {message} ({parameter})")]
    Config {
        /// Module that raised the error.
        module: &'static str,
        /// Function that raised the error.
        function: &'static str,
        /// Human-readable message.
        message: String,
        /// Parameter or setting name involved.
        parameter: String,
    },

    /// Name lookup failed (DLSAP, plugin, symbol).
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Bad primitive protocol/cmd, null handle, negative length: a
    /// programming error in the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A DLSAP call arrived at the wrong endpoint, e.g. after a reload.
    /// Non-fatal; the caller drops the primitive and logs.
    #[error("channel disruption: {0}")]
    ChannelDisruption(String),

    /// Allocator failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The endpoint did not supply this vtable capability.
    #[error("not provided: {0}")]
    NotProvided(&'static str),

    /// Primitive payload exceeds the 32 KiB limit.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// A blocking-only caller hit a would-block condition.
    #[error("would block")]
    WouldBlock,

    /// Non-blocking write didn't fit.
    #[error("not enough space: need {need}, have {have}")]
    NotEnoughSpace {
        /// Bytes requested.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A single write/read request is larger than the buffer itself.
    #[error("too big: {0} exceeds buffer capacity")]
    TooBig(usize),

    /// LAPB N2 retries exhausted.
    #[error("timeout: N2 retries exhausted")]
    Timeout,

    /// LAPB decoded an impossible control field.
    #[error("frame reject: {0}")]
    FrameReject(String),

    /// Wraps `std::io::Error` for transport implementations.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
