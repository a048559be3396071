// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! C5: recovery counters and the WTX budget (spec §4.5).
//!
//! The three counters here are independent budgets, not one shared retry
//! count: `recovery_counter` gates protocol-level repair (bad sequence,
//! error R-frames), `rnack_retry_counter` gates how many R-NACKs the host
//! is willing to emit on malformed or missing responses, and
//! `timeout_counter` gates plain retransmission when the transport itself
//! times out. All three are bumped *before* the caller decides whether the
//! budget is exhausted, so the escalating attempt itself counts against the
//! limit - this mirrors the original firmware's counter bookkeeping and is
//! preserved for compatibility (see DESIGN.md).

pub const DEFAULT_RECOVERY_LIMIT: u8 = 3;
pub const DEFAULT_TIMEOUT_LIMIT: u8 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub recovery_counter: u8,
    pub recovery_limit: u8,

    pub wtx_counter: u32,
    pub wtx_counter_limit: u32,
    /// WTX multiplier carried in the most recent `WTX_REQ` INF byte, used
    /// only to widen the transport's own read timeout - the state machine
    /// still counts requests against `wtx_counter_limit` alone.
    pub wtx_multiplier: u8,

    pub rnack_retry_counter: u32,
    pub rnack_retry_limit: u32,

    pub timeout_counter: u8,
    pub timeout_limit: u8,

    /// Delay observed before a recovery retransmission, in milliseconds.
    /// The original source sleeps `DELAY_ERROR_RECOVERY / 1000` with
    /// ambiguous units; this crate resolves it as whole milliseconds.
    pub error_recovery_delay_ms: u32,
}

impl RecoveryPolicy {
    pub fn new(wtx_counter_limit: u32, rnack_retry_limit: u32, error_recovery_delay_ms: u32) -> Self {
        RecoveryPolicy {
            recovery_counter: 0,
            recovery_limit: DEFAULT_RECOVERY_LIMIT,
            wtx_counter: 0,
            wtx_counter_limit,
            wtx_multiplier: 1,
            rnack_retry_counter: 0,
            rnack_retry_limit,
            timeout_counter: 0,
            timeout_limit: DEFAULT_TIMEOUT_LIMIT,
            error_recovery_delay_ms,
        }
    }

    /// Invariant 6: all retry counters reset when a valid, expected frame
    /// is decoded.
    pub fn reset_transient(&mut self) {
        self.recovery_counter = 0;
        self.rnack_retry_counter = 0;
        self.timeout_counter = 0;
    }

    /// Bumps `recovery_counter` and reports whether the budget is now
    /// exhausted (inclusive of this attempt).
    pub fn bump_recovery(&mut self) -> bool {
        self.recovery_counter = self.recovery_counter.saturating_add(1);
        self.recovery_counter >= self.recovery_limit
    }

    pub fn bump_rnack(&mut self) -> bool {
        self.rnack_retry_counter = self.rnack_retry_counter.saturating_add(1);
        self.rnack_retry_counter >= self.rnack_retry_limit
    }

    pub fn bump_timeout(&mut self) -> bool {
        self.timeout_counter = self.timeout_counter.saturating_add(1);
        self.timeout_counter >= self.timeout_limit
    }

    /// Records a `WTX_REQ`, returning `true` once `wtx_counter_limit`
    /// consecutive requests have been seen.
    pub fn bump_wtx(&mut self, multiplier: u8) -> bool {
        self.wtx_multiplier = multiplier.max(1);
        self.wtx_counter = self.wtx_counter.saturating_add(1);
        self.wtx_counter >= self.wtx_counter_limit
    }

    pub fn reset_wtx(&mut self) {
        self.wtx_counter = 0;
    }

    /// Derived read-retry budget for a bus read following a WTX grant,
    /// grounded on the original's `(bwt * mult) / mpot + 1`. `bwt`/`mpot`
    /// are expressed here as milliseconds already resolved by the
    /// transport, so this just scales by the multiplier.
    pub fn wtx_read_retries(&self, base_retries: u32) -> u32 {
        base_retries.saturating_mul(self.wtx_multiplier as u32) + 1
    }
}
