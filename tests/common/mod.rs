// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! A scripted in-memory transport, generalized from `doc_utils::DummyI2c`'s
//! `unimplemented!()` stub into something that actually records writes and
//! replays queued reads, the way a real secure element would.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use t1oi2c::embedded_hal::{i2c, Delay};
use t1oi2c::transport::NackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError;

impl NackError for MockBusError {
    fn is_address_nack(&self) -> bool {
        false
    }
}

pub struct MockBus {
    written: Rc<RefCell<Vec<Vec<u8>>>>,
    replies: VecDeque<Vec<u8>>,
}

impl MockBus {
    pub fn new() -> MockBus {
        MockBus {
            written: Rc::new(RefCell::new(Vec::new())),
            replies: VecDeque::new(),
        }
    }

    pub fn queue_reply(&mut self, bytes: Vec<u8>) {
        self.replies.push_back(bytes);
    }

    /// A handle onto the frames written so far, readable after the bus has
    /// been moved into a `Session`.
    pub fn written_handle(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        self.written.clone()
    }
}

impl i2c::Write for MockBus {
    type Error = MockBusError;
    fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), MockBusError> {
        self.written.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}

impl i2c::Read for MockBus {
    type Error = MockBusError;
    fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), MockBusError> {
        let reply = self.replies.pop_front().ok_or(MockBusError)?;
        buffer[..reply.len()].copy_from_slice(&reply);
        Ok(())
    }
}

impl i2c::WriteRead for MockBus {
    type Error = MockBusError;
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), MockBusError> {
        i2c::Write::write(self, address, bytes)?;
        i2c::Read::read(self, address, buffer)
    }
}

pub struct NoDelay;

impl Delay for NoDelay {
    fn delay_us(&mut self, _us: u32) {}
}
