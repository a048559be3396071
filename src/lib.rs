// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! A host-side driver for the ISO/IEC 7816-3 T=1 block protocol carried
//! over I2C, used to talk to NXP SE05x-class secure elements.
//!
//! The crate is generic over an [`embedded-hal`](embedded_hal) I2C bus and
//! delay provider (both the 0.2.7 and 1.0 generations are supported behind
//! Cargo features) and never allocates. Two wire dialects exist in the
//! field - NXP's UM11225 profile and GlobalPlatform's GP 1.0 profile - and
//! are modeled as a runtime [`dialect::Dialect`] value rather than a
//! compile-time choice, so one build can talk to either kind of element.
//!
//! Start at [`session::Session::open`].

#![cfg_attr(not(test), no_std)]
#![cfg_attr(
    not(any(feature = "embedded-hal-v0.2.7", feature = "embedded-hal-v1.0")),
    allow(dead_code, unused_imports)
)]

delog::generate_macros!();

mod macros;

pub mod atr;
pub mod context;
pub mod crc;
pub mod dialect;
pub mod doc_utils;
pub mod embedded_hal;
pub mod error;
pub mod frame;
pub mod recovery;
pub mod session;
pub mod state_machine;
pub mod transport;

pub use dialect::{Dialect, SType};
pub use error::Error;
pub use session::{Session, SessionConfig};
