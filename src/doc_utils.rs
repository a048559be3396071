// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Fixtures for doctests and the integration suite: a bus and delay that
//! panic if actually driven, for examples that only need to type-check,
//! plus re-exports used by `tests/`.

use crate::embedded_hal::{i2c, Delay};

pub struct DummyI2c;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyI2cError;

impl crate::transport::NackError for DummyI2cError {
    fn is_address_nack(&self) -> bool {
        false
    }
}

impl i2c::Read for DummyI2c {
    type Error = DummyI2cError;
    fn read(&mut self, _address: u8, _buffer: &mut [u8]) -> Result<(), Self::Error> {
        unimplemented!()
    }
}

impl i2c::Write for DummyI2c {
    type Error = DummyI2cError;
    fn write(&mut self, _address: u8, _bytes: &[u8]) -> Result<(), Self::Error> {
        unimplemented!()
    }
}

impl i2c::WriteRead for DummyI2c {
    type Error = DummyI2cError;
    fn write_read(&mut self, _address: u8, _bytes: &[u8], _buffer: &mut [u8]) -> Result<(), Self::Error> {
        unimplemented!()
    }
}

pub struct DummyDelay;

impl Delay for DummyDelay {
    fn delay_us(&mut self, _us: u32) {
        unimplemented!()
    }
}

pub fn get_i2c() -> DummyI2c {
    DummyI2c
}

pub fn get_delay() -> DummyDelay {
    DummyDelay
}
