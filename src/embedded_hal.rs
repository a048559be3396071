// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Thin, version-agnostic traits this crate needs from `embedded-hal`.
//!
//! Two generations of `embedded-hal` are in active use (0.2.7's split
//! blocking traits, 1.0's unified [`i2c::I2c`](embedded_hal_v1_0::i2c::I2c)).
//! Rather than picking one, the protocol core is written against the small
//! traits below and a wrapper per generation implements them.

pub mod i2c {
    pub trait Read<Addr = u8> {
        type Error;
        fn read(&mut self, address: Addr, buffer: &mut [u8]) -> Result<(), Self::Error>;
    }

    pub trait Write<Addr = u8> {
        type Error;
        fn write(&mut self, address: Addr, bytes: &[u8]) -> Result<(), Self::Error>;
    }

    pub trait WriteRead<Addr = u8> {
        type Error;
        fn write_read(
            &mut self,
            address: Addr,
            bytes: &[u8],
            buffer: &mut [u8],
        ) -> Result<(), Self::Error>;
    }
}

/// A blocking, microsecond-granularity delay provider.
pub trait Delay {
    fn delay_us(&mut self, us: u32);
}

#[cfg(feature = "embedded-hal-v0.2.7")]
pub struct Hal027<T>(pub T);

#[cfg(feature = "embedded-hal-v0.2.7")]
impl<T, E> i2c::Read for Hal027<T>
where
    T: embedded_hal_v0_2_7::blocking::i2c::Read<Error = E>,
{
    type Error = E;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), E> {
        self.0.read(address, buffer)
    }
}

#[cfg(feature = "embedded-hal-v0.2.7")]
impl<T, E> i2c::Write for Hal027<T>
where
    T: embedded_hal_v0_2_7::blocking::i2c::Write<Error = E>,
{
    type Error = E;
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), E> {
        self.0.write(address, bytes)
    }
}

#[cfg(feature = "embedded-hal-v0.2.7")]
impl<T, E> i2c::WriteRead for Hal027<T>
where
    T: embedded_hal_v0_2_7::blocking::i2c::WriteRead<Error = E>,
{
    type Error = E;
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), E> {
        self.0.write_read(address, bytes, buffer)
    }
}

#[cfg(feature = "embedded-hal-v0.2.7")]
impl<T> Delay for Hal027<T>
where
    T: embedded_hal_v0_2_7::blocking::delay::DelayUs<u32>,
{
    fn delay_us(&mut self, us: u32) {
        self.0.delay_us(us)
    }
}

#[cfg(feature = "embedded-hal-v1.0")]
pub struct Hal10<T>(pub T);

#[cfg(feature = "embedded-hal-v1.0")]
impl<T, E> i2c::Read for Hal10<T>
where
    T: embedded_hal_v1_0::i2c::I2c<Error = E>,
{
    type Error = E;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), E> {
        self.0.read(address, buffer)
    }
}

#[cfg(feature = "embedded-hal-v1.0")]
impl<T, E> i2c::Write for Hal10<T>
where
    T: embedded_hal_v1_0::i2c::I2c<Error = E>,
{
    type Error = E;
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), E> {
        self.0.write(address, bytes)
    }
}

#[cfg(feature = "embedded-hal-v1.0")]
impl<T, E> i2c::WriteRead for Hal10<T>
where
    T: embedded_hal_v1_0::i2c::I2c<Error = E>,
{
    type Error = E;
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), E> {
        self.0.write_read(address, bytes, buffer)
    }
}

#[cfg(feature = "embedded-hal-v1.0")]
impl<T> Delay for Hal10<T>
where
    T: embedded_hal_v1_0::delay::DelayNs,
{
    fn delay_us(&mut self, us: u32) {
        self.0.delay_ns(us.saturating_mul(1000))
    }
}
