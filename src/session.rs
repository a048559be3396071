// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! C6: the session API.
//!
//! Per the REDESIGN FLAGS, this replaces the original firmware's
//! process-wide protocol struct with an explicit object the caller owns
//! and threads through every call - there is no global state anywhere in
//! this crate.

use crate::atr::{Atr, Cip};
use crate::context::{IFrameContext, Kind, LastReceived, NextStep, ReceiveAssembly};
use crate::dialect::{Dialect, SType};
use crate::embedded_hal::{i2c, Delay};
use crate::error::Error;
use crate::frame::{self, FrameError, Pcb, RBlockError, Seq};
use crate::recovery::RecoveryPolicy;
use crate::state_machine::{self, Decision, LastSent, RxOutcome};
use crate::transport::{self, NackError, Transport};

/// Large enough for a Dialect-B header (NAD+PCB+2-byte LEN), an IFSC=254
/// payload, and the CRC trailer.
pub const MAX_FRAME_LEN: usize = 4 + 254 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Transceiving,
    Deinit,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub wtx_counter_limit: u32,
    pub rnack_retry_limit: u32,
    pub interface_reset: bool,
    pub initial_ifsc: usize,
    pub error_recovery_delay_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            wtx_counter_limit: 10,
            rnack_retry_limit: 5,
            interface_reset: true,
            initial_ifsc: 254,
            error_recovery_delay_ms: 2,
        }
    }
}

pub struct Session<Twi, D> {
    transport: Transport<Twi, D>,
    dialect: Dialect,
    state: SessionState,
    recovery: RecoveryPolicy,
    ifsc_send: usize,
    last_received: LastReceived,
    last_sent_kind: Kind,
    last_sent_i_seq: Option<Seq>,
    last_sent_r_was_nack: bool,
    /// The sequence number the *last successfully acknowledged* I-block
    /// carried; the next one sent is its complement (invariant 2).
    last_i_seq: Seq,
    /// Echoed back verbatim in the next `WTX_RSP` (spec scenario 3).
    last_wtx_inf: u8,
    /// INF payload of the most recently decoded block, copied out of
    /// `rx_buf` immediately so later calls needing it (assembly append,
    /// ATR/CIP parsing) don't have to keep a borrow of `rx_buf` alive
    /// across the next mutable use of `self`.
    last_inf_buf: [u8; MAX_FRAME_LEN],
    last_inf_len: usize,
    /// Length of the frame currently sitting in `tx_buf`, so [`Session::retransmit`]
    /// can replay it verbatim without re-encoding.
    last_sent_len: usize,
    tx_buf: [u8; MAX_FRAME_LEN],
    rx_buf: [u8; MAX_FRAME_LEN],
}

impl<Twi, D, E> Session<Twi, D>
where
    Twi: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
    D: Delay,
    E: NackError,
{
    /// Opens a session: resets protocol state, waits for the secure
    /// element to leave initialization, clears stale bytes, and
    /// optionally performs a dialect-appropriate hard reset, writing the
    /// resulting ATR/CIP into `out`.
    ///
    /// ```no_run
    /// use t1oi2c::doc_utils::{get_delay, get_i2c};
    /// use t1oi2c::{Dialect, Session, SessionConfig};
    ///
    /// let mut atr = [0u8; 32];
    /// let (mut session, _atr_len) = Session::open(
    ///     get_i2c(),
    ///     get_delay(),
    ///     0x48,
    ///     Dialect::A,
    ///     SessionConfig::default(),
    ///     &mut atr,
    /// )?;
    ///
    /// let mut rsp = [0u8; 256];
    /// let _n = session.transceive(&[0x00, 0xA4, 0x04, 0x00, 0x00], &mut rsp)?;
    /// session.close()?;
    /// # Ok::<(), t1oi2c::Error>(())
    /// ```
    pub fn open(
        bus: Twi,
        delay: D,
        address: u8,
        dialect: Dialect,
        config: SessionConfig,
        out: &mut [u8],
    ) -> Result<(Session<Twi, D>, usize), Error> {
        let mut session = Session {
            transport: Transport::new(bus, delay, address),
            dialect,
            state: SessionState::Idle,
            recovery: RecoveryPolicy::new(
                config.wtx_counter_limit,
                config.rnack_retry_limit,
                config.error_recovery_delay_ms,
            ),
            ifsc_send: config.initial_ifsc,
            last_received: LastReceived::default(),
            last_sent_kind: Kind::Unknown,
            last_sent_i_seq: None,
            last_sent_r_was_nack: false,
            last_i_seq: Seq(true),
            last_wtx_inf: 0,
            last_inf_buf: [0; MAX_FRAME_LEN],
            last_inf_len: 0,
            last_sent_len: 0,
            tx_buf: [0; MAX_FRAME_LEN],
            rx_buf: [0; MAX_FRAME_LEN],
        };

        trace!("Opening session, dialect={:?}", dialect);
        session.transport.wait_for_ready();
        let mut scratch = [0u8; MAX_FRAME_LEN];
        session.transport.clear_read_buffer(&mut scratch);

        let mut written = 0;
        if config.interface_reset {
            session.resync()?;
            written = match dialect {
                Dialect::A => session.get_atr(out)?,
                Dialect::B => session.get_cip(out)?,
            };
            debug_now!("Session open, got {} bytes of ATR/CIP", written);
        }
        Ok((session, written))
    }

    /// Transmits the dialect-appropriate end-of-session request.
    pub fn close(mut self) -> Result<(), Error> {
        trace!("Closing session");
        let stype = self.dialect.close_request();
        let decision = self.step(Pcb::S(stype), &[], Kind::S, None, false)?;
        self.state = SessionState::Deinit;
        decision.error.map_or(Ok(()), Err)
    }

    pub fn reset(&mut self) {
        let wtx_limit = self.recovery.wtx_counter_limit;
        let rnack_limit = self.recovery.rnack_retry_limit;
        let delay_ms = self.recovery.error_recovery_delay_ms;
        self.recovery = RecoveryPolicy::new(wtx_limit, rnack_limit, delay_ms);
        self.last_received = LastReceived::default();
        self.last_sent_kind = Kind::Unknown;
        self.last_sent_i_seq = None;
        self.last_sent_r_was_nack = false;
        self.last_i_seq = Seq(true);
    }

    pub fn set_ifsc_size(&mut self, n: usize) {
        self.ifsc_send = n;
    }

    /// One full host-initiated APDU exchange (spec §4.6).
    pub fn transceive(&mut self, cmd: &[u8], rsp: &mut [u8]) -> Result<usize, Error> {
        if self.state != SessionState::Idle {
            return Err(Error::Usage);
        }
        if cmd.is_empty() {
            return Err(Error::Usage);
        }
        if rsp.is_empty() {
            return Err(Error::Usage);
        }
        self.state = SessionState::Transceiving;
        let result = self.run_transceive(cmd, rsp);
        self.state = SessionState::Idle;
        result
    }

    fn run_transceive(&mut self, cmd: &[u8], rsp: &mut [u8]) -> Result<usize, Error> {
        let mut assembly = ReceiveAssembly::new(rsp);
        let mut iframe = IFrameContext::first(cmd, self.ifsc_send, !self.last_i_seq);
        let mut next = NextStep::SendIFrame;

        loop {
            next = match next {
                NextStep::Idle => return Ok(assembly.bytes_received()),

                NextStep::SendIFrame => {
                    let pcb = Pcb::I(iframe.seq, iframe.chaining());
                    let frame = iframe.fragment();
                    let decision = self.step(pcb, frame, Kind::I, Some(iframe.seq), false)?;
                    if decision.next == NextStep::SendRAck || decision.next == NextStep::Idle {
                        self.last_i_seq = iframe.seq;
                    }
                    if matches!(decision.next, NextStep::SendIFrame) {
                        if decision.advance_iframe {
                            if let Some(advanced) = iframe.next() {
                                iframe = advanced;
                            }
                        }
                    }
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendRAck => {
                    let seq = self.last_received.i.map(|(s, _)| s).unwrap_or(Seq(false));
                    let pcb = Pcb::R(!seq, RBlockError::None);
                    let decision = self.step(pcb, &[], Kind::R, self.last_sent_i_seq, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendRNack(cause) => {
                    let seq = self.last_received.i.map(|(s, _)| s).unwrap_or(Seq(false));
                    let pcb = Pcb::R(!seq, cause);
                    let decision = self.step(pcb, &[], Kind::R, self.last_sent_i_seq, true)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::Retransmit => {
                    let decision = self.retransmit()?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSWtxRsp => {
                    let inf = [self.last_wtx_inf];
                    let decision = self.step(Pcb::S(SType::WtxRsp), &inf, Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSResync => {
                    let decision = self.step(Pcb::S(SType::ResyncReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendDeepPwrDown => {
                    let decision =
                        self.step(Pcb::S(SType::DeepPwrDownReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSIntfReset => {
                    let decision =
                        self.step(Pcb::S(SType::InterfaceResetReq), &[], Kind::S, None, false)?;
                    self.reset();
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSSoftReset => {
                    let decision =
                        self.step(Pcb::S(SType::SoftResetReq), &[], Kind::S, None, false)?;
                    self.reset();
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSChipReset => {
                    let decision =
                        self.step(Pcb::S(SType::ChipResetReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSColdReset => {
                    let decision =
                        self.step(Pcb::S(SType::ColdResetReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSAtr => {
                    let decision = self.step(Pcb::S(SType::AtrReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSCip => {
                    let decision = self.step(Pcb::S(SType::CipReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSEndOfApdu => {
                    let decision =
                        self.step(Pcb::S(SType::PropEndApduReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }

                NextStep::SendSRelease => {
                    let decision = self.step(Pcb::S(SType::ReleaseReq), &[], Kind::S, None, false)?;
                    self.apply(&decision, &mut assembly)?
                }
            };
        }
    }

    /// Applies a `Decision`: appends INF when requested, translates a
    /// terminal error into `Err`, otherwise yields the next `NextStep`.
    fn apply(&mut self, decision: &Decision, assembly: &mut ReceiveAssembly<'_>) -> Result<NextStep, Error> {
        if decision.append.is_some() {
            assembly.append(&self.last_inf_buf[..self.last_inf_len])?;
        }
        if decision.next == NextStep::Idle {
            if let Some(err) = decision.error {
                return Err(err);
            }
        }
        Ok(decision.next)
    }

    /// Sends one block and reads the peer's reply, running it through the
    /// decode decision table. The decoded block's INF (if any) is copied
    /// into `last_inf_buf` before this returns, so callers needing it
    /// (assembly append, WTX echo, ATR/CIP TLV) read it back from there
    /// instead of holding a borrow into `rx_buf` across later calls.
    fn step(
        &mut self,
        pcb: Pcb,
        inf: &[u8],
        kind: Kind,
        i_seq: Option<Seq>,
        r_is_nack: bool,
    ) -> Result<Decision, Error> {
        let total = frame::encode(self.dialect, pcb, inf, &mut self.tx_buf).map_err(Error::from)?;
        self.last_sent_len = total;
        self.write_and_decide(total, kind, i_seq, r_is_nack)
    }

    /// Resends the frame currently sitting in `tx_buf` byte-for-byte,
    /// reusing the bookkeeping from the transmission it replaces. Spec
    /// §4.4's exact-retransmission recovery sub-cases require replaying
    /// the identical last-sent block rather than substituting a fresh
    /// Resync or R-ACK, confirmed by the original firmware's
    /// `phNxpEseNextTx_Cntx = phNxpEseLastTx_Cntx` context copy.
    fn retransmit(&mut self) -> Result<Decision, Error> {
        let total = self.last_sent_len;
        let kind = self.last_sent_kind;
        let i_seq = self.last_sent_i_seq;
        let r_is_nack = self.last_sent_r_was_nack;
        debug!("Retransmitting last {:?} frame verbatim", kind);
        self.write_and_decide(total, kind, i_seq, r_is_nack)
    }

    fn write_and_decide(
        &mut self,
        total: usize,
        kind: Kind,
        i_seq: Option<Seq>,
        r_is_nack: bool,
    ) -> Result<Decision, Error> {
        debug!("Sending {:?} frame", kind);
        self.transport.write(&mut self.tx_buf[..total]).map_err(|_| {
            error!("Transport write failed past retry budget");
            Error::Transport
        })?;

        self.last_sent_kind = kind;
        if i_seq.is_some() {
            self.last_sent_i_seq = i_seq;
        }
        self.last_sent_r_was_nack = r_is_nack;

        let max_retries = self
            .recovery
            .wtx_read_retries(transport::MAX_RETRY_COUNT as u32)
            .min(u8::MAX as u32) as u8;
        let read_result = self.transport.read(&mut self.rx_buf, max_retries);
        self.last_inf_len = 0;
        let outcome = match read_result {
            Err(_) => {
                warn!("Transport read failed, last sent was {:?}", kind);
                RxOutcome::ReadFailure
            }
            Ok(()) => match frame::decode(self.dialect, &self.rx_buf) {
                Ok(block) => {
                    if let Pcb::S(SType::WtxReq) = block.pcb {
                        self.last_wtx_inf = block.inf.first().copied().unwrap_or(0);
                        debug!("Got WtxRequest, mult={}", self.last_wtx_inf);
                    }
                    let n = core::cmp::min(block.inf.len(), self.last_inf_buf.len());
                    self.last_inf_buf[..n].copy_from_slice(&block.inf[..n]);
                    self.last_inf_len = n;
                    RxOutcome::Block(block)
                }
                Err(FrameError::BadCrc) => RxOutcome::CrcFailure,
                Err(_) => RxOutcome::FramingFailure,
            },
        };

        let last_sent = LastSent {
            kind: self.last_sent_kind,
            i_seq: self.last_sent_i_seq,
            r_was_nack: self.last_sent_r_was_nack,
        };

        let decision = state_machine::decide(
            self.dialect,
            outcome,
            last_sent,
            &mut self.last_received,
            &mut self.recovery,
        );
        self.transport.sleep_ms(self.recovery.error_recovery_delay_ms);
        Ok(decision)
    }

    /// Sends a single Resync S-block and resets local protocol state -
    /// one of the direct single-S-block helpers spec §4.6 describes for
    /// application-level error recovery.
    pub fn resync(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::ResyncReq), &[], Kind::S, None, false)?;
        self.reset();
        decision.error.map_or(Ok(()), Err)
    }

    pub fn intf_reset(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::InterfaceResetReq), &[], Kind::S, None, false)?;
        self.reset();
        decision.error.map_or(Ok(()), Err)
    }

    pub fn chip_reset(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::ChipResetReq), &[], Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)
    }

    pub fn soft_reset(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::SoftResetReq), &[], Kind::S, None, false)?;
        self.reset();
        decision.error.map_or(Ok(()), Err)
    }

    pub fn cold_reset(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::ColdResetReq), &[], Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)
    }

    pub fn get_atr(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let decision = self.step(Pcb::S(SType::AtrReq), &[], Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)?;
        let atr = Atr::parse(&self.last_inf_buf[..self.last_inf_len])
            .map_err(|_| Error::Framing(FrameError::UnknownPcb))?;
        let n = core::cmp::min(atr.historical_bytes.len(), out.len());
        out[..n].copy_from_slice(&atr.historical_bytes[..n]);
        Ok(n)
    }

    pub fn get_cip(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let decision = self.step(Pcb::S(SType::CipReq), &[], Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)?;
        let cip = Cip::parse(&self.last_inf_buf[..self.last_inf_len])
            .map_err(|_| Error::Framing(FrameError::UnknownPcb))?;
        let n = core::cmp::min(cip.vendor_data.len(), out.len());
        out[..n].copy_from_slice(&cip.vendor_data[..n]);
        Ok(n)
    }

    pub fn deep_power_down(&mut self) -> Result<(), Error> {
        let decision = self.step(Pcb::S(SType::DeepPwrDownReq), &[], Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)
    }

    pub fn wtx_rsp(&mut self) -> Result<(), Error> {
        let inf = [self.last_wtx_inf];
        let decision = self.step(Pcb::S(SType::WtxRsp), &inf, Kind::S, None, false)?;
        decision.error.map_or(Ok(()), Err)
    }
}
