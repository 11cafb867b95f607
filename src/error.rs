//! Failure taxonomy for the bridge.
//!
//! Missing toolchain and subprocess timeout are distinct reportable
//! conditions: the client's troubleshooting guidance depends on telling
//! "desktop unreachable" apart from "compiler rejected the code". A
//! compiler's own non-zero exit is not an error here — it travels as a
//! regular response with `ok: false` and the diagnostics attached.

use std::time::Duration;

use thiserror::Error;

use crate::mailbox::codec::DecodeError;

/// Everything that can go wrong between publishing a command and acting on
/// its response.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Mailbox directory unwritable/unreadable, or readback verification
    /// kept failing after retries.
    #[error("mailbox transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No response appeared within the configured budget. Ambiguous between
    /// "desktop offline" and "desktop slow".
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Decoding failed even after the lenient recovery pass.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] DecodeError),

    /// Required compiler or runtime binary is not resolvable.
    #[error("{tool} not found")]
    ToolchainMissing { tool: String },

    /// Subprocess exceeded its wall-clock budget and was killed.
    #[error("compilation timeout after {0:?}")]
    SubprocessTimeout(Duration),

    /// I/O failure outside the conditions above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
