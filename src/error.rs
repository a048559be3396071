// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! The error taxonomy surfaced to callers (spec §7).
//!
//! Transient conditions - a dropped byte, a single bad CRC, a lone
//! unexpected sequence number - never reach here; they are absorbed by
//! retries and S-block recovery inside [`crate::session::Session`]. Only
//! the terminal outcomes of that recovery machinery are represented.

use core::fmt;

use crate::frame::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Open/read/write failed past the transport's own retry budget.
    Transport,
    /// A malformed inbound block survived past the RNACK budget.
    Framing(FrameError),
    /// The peer kept sending an unexpected I-block sequence past the
    /// recovery budget.
    Sequencing,
    /// The peer requested more waiting-time extensions than
    /// `wtx_counter_limit`, and the follow-up reset also failed.
    WtxExhaustion,
    /// A hard reset request went unacknowledged, or its response failed
    /// CRC, past the recovery budget.
    RecoveryFailure,
    /// The assembled response would exceed the caller's buffer capacity.
    BufferOverflow,
    /// Transceive called while not Idle, a zero-length I-block attempt,
    /// or a response buffer too small to hold even an empty assembly.
    Usage,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport => write!(f, "transport error past retry budget"),
            Error::Framing(e) => write!(f, "framing error: {e:?}"),
            Error::Sequencing => write!(f, "sequencing error escalated"),
            Error::WtxExhaustion => write!(f, "WTX budget exhausted and reset failed"),
            Error::RecoveryFailure => write!(f, "hard recovery request failed"),
            Error::BufferOverflow => write!(f, "response exceeds caller buffer capacity"),
            Error::Usage => write!(f, "invalid use of the session API"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Error {
        Error::Framing(e)
    }
}

impl From<crate::context::Overflow> for Error {
    fn from(_: crate::context::Overflow) -> Error {
        Error::BufferOverflow
    }
}
