use std::fmt;

use serde::{Deserialize, Serialize};

/// Close code for a stream the server finished normally.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for an unexpected server-side failure.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Application close code for a stream finished because it was cancelled.
pub const CLOSE_CANCELLED: u16 = 4001;

/// Outcome the server attaches when it finishes a receive stream.
///
/// The status travels in the WebSocket close frame: the code selects the
/// variant and the reason text carries the detail for [`StreamStatus::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Ok,
    Cancelled,
    Unknown(String),
}

impl StreamStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StreamStatus::Ok)
    }

    pub fn close_code(&self) -> u16 {
        match self {
            StreamStatus::Ok => CLOSE_NORMAL,
            StreamStatus::Cancelled => CLOSE_CANCELLED,
            StreamStatus::Unknown(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            StreamStatus::Ok => "",
            StreamStatus::Cancelled => "cancelled",
            StreamStatus::Unknown(reason) => reason,
        }
    }

    /// Rebuilds the status from a received close frame. Codes outside the
    /// ones this crate emits are reported as [`StreamStatus::Unknown`].
    pub fn from_close(code: u16, reason: &str) -> Self {
        match code {
            CLOSE_NORMAL => StreamStatus::Ok,
            CLOSE_CANCELLED => StreamStatus::Cancelled,
            _ if reason.is_empty() => StreamStatus::Unknown(format!("closed with code {code}")),
            _ => StreamStatus::Unknown(reason.to_string()),
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Ok => f.write_str("OK"),
            StreamStatus::Cancelled => f.write_str("CANCELLED"),
            StreamStatus::Unknown(reason) => write!(f, "UNKNOWN: {reason}"),
        }
    }
}
