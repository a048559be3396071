// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! End-to-end coverage of the session state machine against a scripted
//! transport, exercising the testable properties of spec §8: sequence
//! alternation, chaining completeness, ACK-driven progress, and the WTX
//! and close paths.
//!
//! The exact NXP S-block type-code table wasn't present in the retrieved
//! reference material (see DESIGN.md), so these assert on the crate's own
//! codec being self-consistent end to end rather than on hardcoded wire
//! bytes from an unverified external table.

mod common;

use common::{MockBus, NoDelay};
use t1oi2c::dialect::{Dialect, SType};
use t1oi2c::frame::{self, Pcb, RBlockError, Seq};
use t1oi2c::session::{Session, SessionConfig};

fn no_reset_config() -> SessionConfig {
    SessionConfig {
        interface_reset: false,
        ..Default::default()
    }
}

fn open_session(bus: MockBus) -> Session<MockBus, NoDelay> {
    let (session, _) = Session::open(bus, NoDelay, 0x48, Dialect::A, no_reset_config(), &mut []).unwrap();
    session
}

fn encode(dialect: Dialect, pcb: Pcb, inf: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; t1oi2c::session::MAX_FRAME_LEN];
    let len = frame::encode(dialect, pcb, inf, &mut buf).unwrap();
    buf[..len].to_vec()
}

/// Scenario 1: a short APDU that fits in a single I-block.
#[test]
fn short_apdu_round_trip() {
    let mut bus = MockBus::new();
    bus.queue_reply(Vec::new()); // drained by Session::open's clear_read_buffer
    bus.queue_reply(encode(Dialect::A, Pcb::I(Seq(false), false), &[0x90, 0x00]));
    let mut session = open_session(bus);

    let cmd = [0x00u8, 0xA4, 0x04, 0x00, 0x00];
    let mut rsp = [0u8; 32];
    let n = session.transceive(&cmd, &mut rsp).unwrap();

    assert_eq!(&rsp[..n], &[0x90, 0x00]);
}

/// P2 + P3 + P4: a command split across two fragments, with the peer
/// ACKing the first before sending its final reply.
#[test]
fn two_fragment_command_alternates_sequence_and_reassembles() {
    let mut bus = MockBus::new();
    bus.queue_reply(Vec::new()); // drained by Session::open's clear_read_buffer
    bus.queue_reply(encode(Dialect::A, Pcb::R(Seq(true), RBlockError::None), &[]));
    bus.queue_reply(encode(Dialect::A, Pcb::I(Seq(false), false), &[0x90, 0x00]));
    let written = bus.written_handle();
    let (mut session, _) = Session::open(
        bus,
        NoDelay,
        0x48,
        Dialect::A,
        SessionConfig {
            interface_reset: false,
            initial_ifsc: 4,
            ..Default::default()
        },
        &mut [],
    )
    .unwrap();

    let cmd = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
    let mut rsp = [0u8; 32];
    let n = session.transceive(&cmd, &mut rsp).unwrap();
    assert_eq!(&rsp[..n], &[0x90, 0x00]);

    let written = written.borrow();
    assert_eq!(written.len(), 2, "expected two emitted I-blocks");

    let first = frame::decode(Dialect::A, &written[0]).unwrap();
    let second = frame::decode(Dialect::A, &written[1]).unwrap();
    match (first.pcb, second.pcb) {
        (Pcb::I(s0, m0), Pcb::I(s1, m1)) => {
            assert_ne!(s0, s1, "sequence numbers must alternate");
            assert!(m0, "first fragment must be chained");
            assert!(!m1, "final fragment must not be chained");
        }
        other => panic!("expected two I-blocks, got {other:?}"),
    }
    let reassembled: Vec<u8> = first.inf.iter().chain(second.inf.iter()).copied().collect();
    assert_eq!(reassembled, cmd);
}

/// Scenario 3: a single WTX round before the final reply.
#[test]
fn wtx_request_is_answered_before_final_reply() {
    let mut bus = MockBus::new();
    bus.queue_reply(Vec::new()); // drained by Session::open's clear_read_buffer
    bus.queue_reply(encode(Dialect::A, Pcb::S(SType::WtxReq), &[0x01]));
    bus.queue_reply(encode(Dialect::A, Pcb::I(Seq(false), false), &[0x90, 0x00]));
    let mut session = open_session(bus);

    let cmd = [0x00u8, 0xA4, 0x04, 0x00, 0x00];
    let mut rsp = [0u8; 32];
    let n = session.transceive(&cmd, &mut rsp).unwrap();
    assert_eq!(&rsp[..n], &[0x90, 0x00]);
}

/// Scenario 6: Close emits exactly the dialect's end-of-session request.
#[test]
fn close_emits_dialect_end_of_session_request() {
    let bus = MockBus::new();
    let written = bus.written_handle();
    let session = open_session(bus);
    // A single missing reply is within the RNACK retry budget, so Close
    // still reports success - it only guarantees the request was sent.
    session.close().unwrap();

    let written = written.borrow();
    assert_eq!(written.len(), 1);
    let block = frame::decode(Dialect::A, &written[0]).unwrap();
    assert_eq!(block.pcb, Pcb::S(SType::PropEndApduReq));
}
