// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! C1: the transport port.
//!
//! Wraps an `embedded-hal` I2C bus and delay provider with the bus-busy
//! open retry, the NACK-on-address read/write retry, and the defensive NAD
//! overwrite that `phNxpEsePal_i2c.c` performs in the original firmware -
//! `pBuffer[0] = 0x5A; // Recovery if stack forgot to add NAD byte.`

use crate::embedded_hal::{i2c, Delay};
use crate::frame::NAD;

/// Bus errors that can report "the peer NACKed our address" distinctly
/// from any other bus failure. Implemented by the HAL wrapper error types
/// so the retry loop below can tell a busy device apart from a wedged bus.
pub trait NackError {
    fn is_address_nack(&self) -> bool;
}

pub const MAX_RETRY_COUNT: u8 = 10;
const RETRY_DELAY_US: u32 = 1_000;
const READY_WAIT_US: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError<E> {
    /// NACKed past `MAX_RETRY_COUNT` attempts.
    Nack,
    Bus(E),
}

pub struct Transport<Twi, D> {
    bus: Twi,
    delay: D,
    address: u8,
}

impl<Twi, D, E> Transport<Twi, D>
where
    Twi: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
    D: Delay,
    E: NackError,
{
    pub fn new(bus: Twi, delay: D, address: u8) -> Transport<Twi, D> {
        Transport { bus, delay, address }
    }

    /// Bus-busy retry loop used at session Open. `probe` is the bus
    /// operation to attempt (typically a zero-length write).
    pub fn open_retrying<F>(&mut self, mut probe: F) -> Result<(), TransportError<E>>
    where
        F: FnMut(&mut Twi, u8) -> Result<(), E>,
    {
        let mut attempt = 0;
        loop {
            match probe(&mut self.bus, self.address) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_address_nack() && attempt + 1 < MAX_RETRY_COUNT => {
                    attempt += 1;
                    trace!("Bus busy, retry {attempt}/{MAX_RETRY_COUNT}");
                    self.delay.delay_us(RETRY_DELAY_US);
                }
                Err(e) => {
                    error!("Open failed past retry budget");
                    return Err(TransportError::Bus(e));
                }
            }
        }
    }

    /// Writes `frame`, forcing byte 0 to [`NAD`] first regardless of what
    /// the caller placed there, and retrying on address NACK.
    pub fn write(&mut self, frame: &mut [u8]) -> Result<(), TransportError<E>> {
        if let Some(first) = frame.first_mut() {
            *first = NAD;
        }
        trace!("Writing: {:02x?}", frame);
        let mut attempt = 0;
        loop {
            match self.bus.write(self.address, frame) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_address_nack() && attempt + 1 < MAX_RETRY_COUNT => {
                    attempt += 1;
                    warn!("Write NACKed, retry {attempt}/{MAX_RETRY_COUNT}");
                    self.delay.delay_us(RETRY_DELAY_US);
                }
                Err(e) => {
                    error!("Write failed past retry budget");
                    return Err(TransportError::Bus(e));
                }
            }
        }
    }

    /// Reads up to `buf.len()` bytes, retrying on address NACK up to
    /// `max_retries` times. Callers pass a WTX-multiplier-scaled budget
    /// (see [`crate::recovery::RecoveryPolicy::wtx_read_retries`]) so a
    /// peer that has granted itself more processing time also gets more
    /// patience on the read side, rather than a fixed retry count.
    pub fn read(&mut self, buf: &mut [u8], max_retries: u8) -> Result<(), TransportError<E>> {
        let mut attempt = 0;
        loop {
            match self.bus.read(self.address, buf) {
                Ok(()) => {
                    debug!("Read: {:02x?}", buf);
                    return Ok(());
                }
                Err(e) if e.is_address_nack() && attempt + 1 < max_retries => {
                    attempt += 1;
                    warn!("Read NACKed, retry {attempt}/{max_retries}");
                    self.delay.delay_us(RETRY_DELAY_US);
                }
                Err(e) => {
                    error!("Read failed past retry budget");
                    return Err(TransportError::Bus(e));
                }
            }
        }
    }

    /// Drains and discards any bytes the peer has queued, e.g. stale ATR
    /// bytes left over from a previous, abandoned Open.
    pub fn clear_read_buffer(&mut self, scratch: &mut [u8]) {
        let _ = self.bus.read(self.address, scratch);
    }

    /// Per spec §4.6: wait at least 5 ms for the secure element to leave
    /// its initialization state after power-on.
    pub fn wait_for_ready(&mut self) {
        self.delay.delay_us(READY_WAIT_US);
    }

    pub fn sleep_ms(&mut self, ms: u32) {
        self.delay.delay_us(ms.saturating_mul(1_000));
    }
}
