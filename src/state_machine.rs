// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! C4: the decode decision table (spec §4.4).
//!
//! This module is deliberately I/O-free: it consumes what was decoded (or
//! why decoding failed) plus the session's recovery bookkeeping, and
//! returns the next step the transceive loop in [`crate::session`] should
//! take. Keeping it pure makes the whole decision table unit-testable
//! without a mock transport.

use crate::context::{Kind, LastReceived, NextStep};
use crate::dialect::{Dialect, SType};
use crate::error::Error;
use crate::frame::{Block, Pcb, RBlockError, Seq};
use crate::recovery::RecoveryPolicy;

/// What the previous read attempt produced.
pub enum RxOutcome<'a> {
    Block(Block<'a>),
    /// A frame with a bad CRC but otherwise sane framing.
    CrcFailure,
    /// Any other malformed frame (bad length, unknown PCB).
    FramingFailure,
    /// The transport returned no bytes, or an error.
    ReadFailure,
}

/// The outcome of one decode step.
pub struct Decision {
    pub next: NextStep,
    /// Only meaningful when `next == SendIFrame`: whether to advance to
    /// the next fragment (an R-ACK was received) or resend the one just
    /// sent (recovering from a lost acknowledgement).
    pub advance_iframe: bool,
    /// Set when `next == Idle` because the transceive failed rather than
    /// completed.
    pub error: Option<Error>,
    /// INF payload to append to the assembly this round, if any.
    pub append: Option<AppendInf>,
}

pub enum AppendInf {
    FromBlock,
}

impl Decision {
    fn idle_ok() -> Decision {
        Decision {
            next: NextStep::Idle,
            advance_iframe: false,
            error: None,
            append: None,
        }
    }

    fn idle_err(e: Error) -> Decision {
        Decision {
            next: NextStep::Idle,
            advance_iframe: false,
            error: Some(e),
            append: None,
        }
    }

    fn step(next: NextStep) -> Decision {
        Decision {
            next,
            advance_iframe: false,
            error: None,
            append: None,
        }
    }
}

/// What we transmitted immediately before this decode step.
#[derive(Debug, Clone, Copy)]
pub struct LastSent {
    pub kind: Kind,
    /// Sequence number of the last I-block sent (regardless of whether
    /// the most recent transmission was itself that I-block or a
    /// recovery R/S-block sent while repairing it).
    pub i_seq: Option<Seq>,
    /// `true` if the last R-block we sent was a NACK (as opposed to an
    /// ACK) - needed to disambiguate the R-error sub-cases of §4.4.
    pub r_was_nack: bool,
}

/// Runs one decode/decide step. `last_received.i` etc. are updated in
/// place to reflect `rx` when it is a successfully decoded block.
pub fn decide(
    dialect: Dialect,
    rx: RxOutcome<'_>,
    last_sent: LastSent,
    last_received: &mut LastReceived,
    recovery: &mut RecoveryPolicy,
) -> Decision {
    match rx {
        RxOutcome::Block(block) => decide_block(dialect, block, last_sent, last_received, recovery),
        RxOutcome::CrcFailure => {
            let exhausted = recovery.bump_rnack();
            last_received.r = None;
            if exhausted {
                error!("RNACK budget exhausted on repeated bad CRC");
                Decision::idle_err(Error::Framing(crate::frame::FrameError::BadCrc))
            } else {
                warn!("Got bad crc, sending R-NACK");
                Decision::step(NextStep::SendRNack(RBlockError::ParityOrCrc))
            }
        }
        RxOutcome::FramingFailure => {
            let exhausted = recovery.bump_recovery();
            if exhausted {
                error!("Recovery budget exhausted on repeated malformed frame");
                Decision::idle_err(Error::Framing(crate::frame::FrameError::UnknownPcb))
            } else {
                warn!("Got malformed frame, sending R-NACK");
                Decision::step(NextStep::SendRNack(RBlockError::Other))
            }
        }
        RxOutcome::ReadFailure => decide_read_failure(last_sent, recovery),
    }
}

fn decide_read_failure(last_sent: LastSent, recovery: &mut RecoveryPolicy) -> Decision {
    // ISO-7816-3 Rule 7.1 analog: a missing reply to a WTX-RSP or
    // Resync-RSP is treated as if the peer wants another R-NACK, not a
    // verbatim S-block replay.
    match last_sent.kind {
        Kind::S => {
            let exhausted = recovery.bump_rnack();
            if exhausted {
                Decision::idle_err(Error::RecoveryFailure)
            } else {
                Decision::step(NextStep::SendRNack(RBlockError::Other))
            }
        }
        Kind::I => {
            let exhausted = recovery.bump_rnack();
            if exhausted {
                Decision::idle_err(Error::Sequencing)
            } else {
                Decision::step(NextStep::SendRNack(RBlockError::ParityOrCrc))
            }
        }
        Kind::R | Kind::Unknown => {
            let exhausted = recovery.bump_timeout();
            if exhausted {
                Decision::idle_err(Error::Transport)
            } else {
                Decision::step(NextStep::Retransmit)
            }
        }
    }
}

fn decide_block(
    dialect: Dialect,
    block: Block<'_>,
    last_sent: LastSent,
    last_received: &mut LastReceived,
    recovery: &mut RecoveryPolicy,
) -> Decision {
    match block.pcb {
        Pcb::I(seq, chaining) => {
            let expected = last_received.i.map(|(s, _)| s != seq).unwrap_or(true);
            last_received.i = Some((seq, chaining));
            if expected {
                recovery.reset_transient();
                let append = Some(AppendInf::FromBlock);
                if chaining {
                    Decision {
                        next: NextStep::SendRAck,
                        advance_iframe: false,
                        error: None,
                        append,
                    }
                } else {
                    Decision {
                        next: NextStep::Idle,
                        advance_iframe: false,
                        error: None,
                        append,
                    }
                }
            } else {
                let exhausted = recovery.bump_recovery();
                if exhausted {
                    error!("Got unexpected I-block sequence past recovery budget");
                    Decision::idle_err(Error::Sequencing)
                } else {
                    warn!("Got unexpected I-block sequence, sending R-NACK");
                    Decision::step(NextStep::SendRNack(RBlockError::Other))
                }
            }
        }

        Pcb::R(seq, RBlockError::None) => {
            last_received.r = Some((seq, RBlockError::None));
            recovery.reset_transient();
            let lost = last_sent.i_seq == Some(seq);
            Decision {
                next: NextStep::SendIFrame,
                advance_iframe: !lost,
                error: None,
                append: None,
            }
        }

        Pcb::R(seq, err @ (RBlockError::ParityOrCrc | RBlockError::Other)) => {
            last_received.r = Some((seq, err));
            let exhausted = recovery.bump_recovery();
            if exhausted {
                error!("Got error R-block past recovery budget");
                return Decision::idle_err(Error::RecoveryFailure);
            }
            match last_sent.kind {
                Kind::I => Decision {
                    next: NextStep::SendIFrame,
                    advance_iframe: false,
                    error: None,
                    append: None,
                },
                Kind::R => {
                    if last_sent.r_was_nack && last_sent.i_seq == Some(seq) {
                        Decision {
                            next: NextStep::SendIFrame,
                            advance_iframe: false,
                            error: None,
                            append: None,
                        }
                    } else if !last_sent.r_was_nack {
                        Decision::step(NextStep::SendRAck)
                    } else {
                        Decision::step(NextStep::SendRNack(RBlockError::Other))
                    }
                }
                Kind::S | Kind::Unknown => Decision::step(NextStep::Retransmit),
            }
        }

        Pcb::R(seq, RBlockError::SofMissedOrUndefined) => {
            last_received.r = Some((seq, RBlockError::SofMissedOrUndefined));
            let exhausted = recovery.bump_recovery();
            if exhausted {
                Decision::idle_err(Error::RecoveryFailure)
            } else {
                Decision::step(NextStep::Retransmit)
            }
        }

        Pcb::S(stype) => decide_s(dialect, stype, block.inf, last_received, recovery),
    }
}

fn decide_s(
    dialect: Dialect,
    stype: SType,
    inf: &[u8],
    last_received: &mut LastReceived,
    recovery: &mut RecoveryPolicy,
) -> Decision {
    last_received.s = Some(stype);

    if stype == SType::WtxReq {
        let multiplier = inf.first().copied().unwrap_or(1);
        let exhausted = recovery.bump_wtx(multiplier);
        debug!("Got WtxRequest, mult={multiplier}, counter={}", recovery.wtx_counter);
        return if exhausted {
            warn!("WTX budget exhausted, escalating to hard reset");
            recovery.reset_wtx();
            Decision::step(match dialect {
                Dialect::A => NextStep::SendSIntfReset,
                Dialect::B => NextStep::SendSSoftReset,
            })
        } else {
            Decision::step(NextStep::SendSWtxRsp)
        };
    }

    let is_terminal_response = matches!(
        stype,
        SType::ResyncRsp
            | SType::InterfaceResetRsp
            | SType::SoftResetRsp
            | SType::ChipResetRsp
            | SType::ColdResetRsp
            | SType::AtrRsp
            | SType::CipRsp
            | SType::ReleaseRsp
            | SType::PropEndApduRsp
            | SType::DeepPwrDownRsp
            | SType::IfsRsp
            | SType::AbortRsp
    );

    if is_terminal_response {
        recovery.reset_transient();
        Decision {
            next: NextStep::Idle,
            advance_iframe: false,
            error: None,
            append: if matches!(stype, SType::AtrRsp | SType::CipRsp) {
                Some(AppendInf::FromBlock)
            } else {
                None
            },
        }
    } else {
        error!("Got unexpected S-block subtype {:?}, terminating", stype);
        Decision::idle_err(Error::Usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Seq;

    fn policy() -> RecoveryPolicy {
        RecoveryPolicy::new(3, 3, 2)
    }

    #[test]
    fn expected_final_iframe_completes() {
        let mut last_received = LastReceived::default();
        let mut recovery = policy();
        let block = Block {
            pcb: Pcb::I(Seq(false), false),
            inf: &[0x90, 0x00],
        };
        let last_sent = LastSent {
            kind: Kind::I,
            i_seq: Some(Seq(true)),
            r_was_nack: false,
        };
        let decision = decide(
            Dialect::A,
            RxOutcome::Block(block),
            last_sent,
            &mut last_received,
            &mut recovery,
        );
        assert_eq!(decision.next, NextStep::Idle);
        assert!(decision.error.is_none());
    }

    #[test]
    fn unexpected_iframe_sequence_nacks_then_escalates() {
        let mut last_received = LastReceived::default();
        last_received.i = Some((Seq(false), false));
        let mut recovery = RecoveryPolicy::new(3, 3, 2);
        recovery.recovery_limit = 1;
        let block = Block {
            pcb: Pcb::I(Seq(false), false),
            inf: &[],
        };
        let last_sent = LastSent {
            kind: Kind::I,
            i_seq: Some(Seq(true)),
            r_was_nack: false,
        };
        let decision = decide(
            Dialect::A,
            RxOutcome::Block(block),
            last_sent,
            &mut last_received,
            &mut recovery,
        );
        assert_eq!(decision.next, NextStep::Idle);
        assert_eq!(decision.error, Some(Error::Sequencing));
    }

    #[test]
    fn wtx_within_budget_replies() {
        let mut last_received = LastReceived::default();
        let mut recovery = RecoveryPolicy::new(3, 3, 2);
        let block = Block {
            pcb: Pcb::S(SType::WtxReq),
            inf: &[0x01],
        };
        let last_sent = LastSent {
            kind: Kind::I,
            i_seq: Some(Seq(false)),
            r_was_nack: false,
        };
        let decision = decide(
            Dialect::A,
            RxOutcome::Block(block),
            last_sent,
            &mut last_received,
            &mut recovery,
        );
        assert_eq!(decision.next, NextStep::SendSWtxRsp);
        assert_eq!(recovery.wtx_counter, 1);
    }

    #[test]
    fn wtx_exhausted_escalates_to_interface_reset() {
        let mut last_received = LastReceived::default();
        let mut recovery = RecoveryPolicy::new(1, 3, 2);
        let block = Block {
            pcb: Pcb::S(SType::WtxReq),
            inf: &[0x01],
        };
        let last_sent = LastSent {
            kind: Kind::I,
            i_seq: Some(Seq(false)),
            r_was_nack: false,
        };
        let decision = decide(
            Dialect::A,
            RxOutcome::Block(block),
            last_sent,
            &mut last_received,
            &mut recovery,
        );
        assert_eq!(decision.next, NextStep::SendSIntfReset);
        assert_eq!(recovery.wtx_counter, 0);
    }
}
