//! Internal error vocabulary.
//!
//! `CoreError` is what every fallible helper inside this crate returns.
//! [`crate::dispatch::api_call`] is the single place that folds a
//! `CoreError` down into a [`crate::status::Status`] word and an
//! [`crate::status::Exit`] — no other module writes a status word
//! directly.

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why an internal operation failed, before it has been mapped to a PXENV
/// status word.
pub enum CoreError {
    /// `ensure_state` could not reach the readiness a handler required.
    InvalidState,

    /// Opcode-specific parameter validation failed. The payload names the
    /// field, for trace output; it carries no user data.
    InvalidParameter(&'static str),

    /// The requested feature is explicitly out of scope (multicast,
    /// packet-filter reconfiguration, statistics, hot-plug, ...).
    Unsupported,

    /// A transport (TFTP/UDP/ARP) reported failure; the status is the
    /// transport's own, passed through verbatim.
    Transport(Status),

    /// A base-memory or I/O-buffer allocation could not be satisfied.
    OutOfResources,

    /// Unrecoverable: an interrupt hook or E820 mangler could not be
    /// removed, or a driver region could not be reclaimed. The stack must
    /// stay latched in `KEEP_ALL` rather than silently losing the hook.
    Fatal(&'static str),

    /// An inbound packet violated its protocol's framing badly enough that
    /// no other recovery is meaningful.
    BadResponse,
}

impl CoreError {
    /// The PXENV status word this error maps to. Handlers generally don't
    /// need to call this directly -- `api_call` does it for every handler
    /// return -- but it is exposed so handlers whose status differs from
    /// the blanket mapping (e.g. `STOP_UNDI` returning `KEEP_UNDI` instead
    /// of `FAILURE`) can start from it and override.
    pub const fn status(self) -> Status {
        match self {
            CoreError::InvalidState => Status::UndiInvalidState,
            CoreError::InvalidParameter(_) => Status::UndiInvalidParameter,
            CoreError::Unsupported => Status::Unsupported,
            CoreError::Transport(s) => s,
            CoreError::OutOfResources => Status::OutOfResources,
            CoreError::Fatal(_) => Status::KeepAll,
            CoreError::BadResponse => Status::Failure,
        }
    }
}
