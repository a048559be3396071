// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! C3: the frame codec.
//!
//! A block is `NAD | PCB | LEN | INF | CRC`, with `LEN` one byte wide in
//! Dialect-A and two (big-endian) in Dialect-B. The PCB byte's top two bits
//! select the block category; [`Pcb`] folds that selection and the
//! category-specific payload into one tagged union instead of the
//! "flags plus a bag of optional fields" struct the wire format tempts you
//! toward - decoding produces a `Pcb` you can match on exhaustively, and
//! there's no way to construct an R-block that also claims a sequence-chain
//! bit.

use core::convert::TryFrom;
use core::ops::Not;

use crate::dialect::{Dialect, SType};
use crate::macros::enum_u8;

pub const NAD: u8 = 0x5A;

const PCB_CATEGORY_MASK: u8 = 0b1100_0000;
const PCB_I_MASK: u8 = 0b0000_0000;
const PCB_R_MASK: u8 = 0b1000_0000;
const PCB_S_MASK: u8 = 0b1100_0000;

const I_SEQ_BIT: u8 = 0b0100_0000;
const I_MORE_BIT: u8 = 0b0010_0000;
const R_SEQ_BIT: u8 = 0b0001_0000;

/// The alternating sequence number carried in I- and R-block PCBs.
///
/// `Not` implements the strict 0/1 flip the protocol requires on every
/// accepted I-block - there is no "add 1 mod 2", only "the other value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Seq(pub bool);

impl Not for Seq {
    type Output = Seq;
    fn not(self) -> Seq {
        Seq(!self.0)
    }
}

enum_u8! {
    /// Error condition reported in an R-block's low bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RBlockError {
        #![mask(0b11)]
        None = 0b00,
        ParityOrCrc = 0b01,
        Other = 0b10,
        SofMissedOrUndefined = 0b11,
    }
}

/// The decoded contents of a block's PCB byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pcb {
    /// Information block: carries `seq`, and whether more chained blocks follow.
    I(Seq, bool),
    /// Receive-ready / receive-not-ready block, reporting the error (if any)
    /// and the sequence number of the block it acknowledges or rejects.
    R(Seq, RBlockError),
    /// Supervisory block.
    S(SType),
}

impl Pcb {
    pub fn to_byte(self) -> u8 {
        match self {
            Pcb::I(seq, more) => {
                let mut b = PCB_I_MASK;
                if seq.0 {
                    b |= I_SEQ_BIT;
                }
                if more {
                    b |= I_MORE_BIT;
                }
                b
            }
            Pcb::R(seq, err) => {
                let mut b = PCB_R_MASK | u8::from(err);
                if seq.0 {
                    b |= R_SEQ_BIT;
                }
                b
            }
            Pcb::S(stype) => stype.to_byte(),
        }
    }

    pub fn parse(dialect: Dialect, byte: u8) -> Option<Pcb> {
        match byte & PCB_CATEGORY_MASK {
            PCB_S_MASK => SType::from_byte(dialect, byte).map(Pcb::S),
            PCB_R_MASK => {
                let seq = Seq(byte & R_SEQ_BIT != 0);
                let err = RBlockError::try_from(byte).ok()?;
                Some(Pcb::R(seq, err))
            }
            _ => {
                let seq = Seq(byte & I_SEQ_BIT != 0);
                let more = byte & I_MORE_BIT != 0;
                Some(Pcb::I(seq, more))
            }
        }
    }

    pub fn is_chained(self) -> bool {
        matches!(self, Pcb::I(_, true))
    }
}

/// Header layout derived from a dialect: where LEN starts, how wide it is,
/// and where INF begins.
struct Layout {
    len_offset: usize,
    len_width: usize,
}

impl Layout {
    fn of(dialect: Dialect) -> Layout {
        Layout {
            len_offset: 2,
            len_width: dialect.len_width(),
        }
    }

    fn inf_offset(&self) -> usize {
        self.len_offset + self.len_width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort,
    UnknownPcb,
    BadCrc,
    InfTooLarge,
}

/// A decoded block, borrowing its INF field from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    pub pcb: Pcb,
    pub inf: &'a [u8],
}

/// Encodes `pcb` plus `inf` into `out`, appending the CRC trailer, and
/// returns the total frame length. `out` must be large enough for
/// `1 (NAD) + 1 (PCB) + len_width + inf.len() + 2 (CRC)`.
pub fn encode(dialect: Dialect, pcb: Pcb, inf: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    let layout = Layout::of(dialect);
    let header_len = layout.inf_offset();
    let total_before_crc = header_len + inf.len();
    if out.len() < total_before_crc + crate::crc::CRC_LEN {
        return Err(FrameError::TooShort);
    }
    if inf.len() > u16::MAX as usize {
        return Err(FrameError::InfTooLarge);
    }

    out[0] = NAD;
    out[1] = pcb.to_byte();
    match layout.len_width {
        1 => out[layout.len_offset] = inf.len() as u8,
        2 => {
            let bytes = (inf.len() as u16).to_be_bytes();
            out[layout.len_offset..layout.len_offset + 2].copy_from_slice(&bytes);
        }
        _ => unreachable!("dialect len_width is always 1 or 2"),
    }
    out[header_len..total_before_crc].copy_from_slice(inf);

    Ok(crate::crc::append(dialect, out, total_before_crc))
}

/// Decodes a complete framed block (header, INF, and trailer all present).
pub fn decode(dialect: Dialect, data: &[u8]) -> Result<Block<'_>, FrameError> {
    let layout = Layout::of(dialect);
    let header_len = layout.inf_offset();
    if data.len() < header_len + crate::crc::CRC_LEN {
        warn!("Short frame: {} bytes", data.len());
        return Err(FrameError::TooShort);
    }

    let inf_len = match layout.len_width {
        1 => data[layout.len_offset] as usize,
        2 => u16::from_be_bytes([data[layout.len_offset], data[layout.len_offset + 1]]) as usize,
        _ => unreachable!("dialect len_width is always 1 or 2"),
    };

    let total = header_len + inf_len + crate::crc::CRC_LEN;
    if data.len() < total {
        warn!("Declared LEN {} exceeds {} received bytes", inf_len, data.len());
        return Err(FrameError::TooShort);
    }
    if !crate::crc::verify(dialect, &data[..total]) {
        error!("Got bad crc in {:02x?}", &data[..total]);
        return Err(FrameError::BadCrc);
    }

    let pcb = Pcb::parse(dialect, data[1]).ok_or(FrameError::UnknownPcb).map_err(|e| {
        error!("Got bad PCB: {:02x}", data[1]);
        e
    })?;
    Ok(Block {
        pcb,
        inf: &data[header_len..header_len + inf_len],
    })
}

/// Number of bytes a fully framed block of `inf_len` INF bytes occupies.
pub fn framed_len(dialect: Dialect, inf_len: usize) -> usize {
    Layout::of(dialect).inf_offset() + inf_len + crate::crc::CRC_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_not_flips() {
        assert_eq!(!Seq(false), Seq(true));
        assert_eq!(!Seq(true), Seq(false));
    }

    #[test]
    fn i_block_round_trip() {
        for &(seq, more) in &[(false, false), (false, true), (true, false), (true, true)] {
            let pcb = Pcb::I(Seq(seq), more);
            let byte = pcb.to_byte();
            assert_eq!(Pcb::parse(Dialect::A, byte), Some(pcb));
        }
    }

    #[test]
    fn r_block_round_trip() {
        let pcb = Pcb::R(Seq(true), RBlockError::ParityOrCrc);
        let byte = pcb.to_byte();
        assert_eq!(Pcb::parse(Dialect::A, byte), Some(pcb));
    }

    #[test]
    fn encode_decode_dialect_a() {
        let mut buf = [0u8; 32];
        let inf = [0x00, 0xA4, 0x04, 0x00];
        let len = encode(Dialect::A, Pcb::I(Seq(false), false), &inf, &mut buf).unwrap();
        assert_eq!(len, 1 + 1 + 1 + inf.len() + 2);
        let block = decode(Dialect::A, &buf[..len]).unwrap();
        assert_eq!(block.pcb, Pcb::I(Seq(false), false));
        assert_eq!(block.inf, &inf);
    }

    #[test]
    fn encode_decode_dialect_b_two_byte_len() {
        let mut buf = [0u8; 32];
        let inf = [0xAAu8; 10];
        let len = encode(Dialect::B, Pcb::I(Seq(true), true), &inf, &mut buf).unwrap();
        assert_eq!(len, 1 + 1 + 2 + inf.len() + 2);
        let block = decode(Dialect::B, &buf[..len]).unwrap();
        assert_eq!(block.pcb, Pcb::I(Seq(true), true));
        assert_eq!(block.inf, &inf);
    }

    #[test]
    fn truncated_frame_is_too_short() {
        let mut buf = [0u8; 32];
        let len = encode(Dialect::A, Pcb::S(SType::ResyncReq), &[], &mut buf).unwrap();
        assert_eq!(decode(Dialect::A, &buf[..len - 1]), Err(FrameError::TooShort));
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut buf = [0u8; 32];
        let len = encode(Dialect::A, Pcb::S(SType::ResyncReq), &[], &mut buf).unwrap();
        buf[len - 1] ^= 0xFF;
        assert_eq!(decode(Dialect::A, &buf[..len]), Err(FrameError::BadCrc));
    }
}
