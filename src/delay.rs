//! Cycle-counted delay loops
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! The bus is timed by counting CPU cycles rather than by a timer peripheral. A `DelayLoop`
//! implementation provides the busy loop itself along with its calibration constants, which are
//! used once at configuration time to convert a bus frequency and timeout into loop counts.
//!
//! The constants of a given target are approximations and should be validated with a logic
//! analyzer on real hardware.

/// A calibrated busy-wait loop.
pub trait DelayLoop {
    /// CPU cycles spent per iteration of [`DelayLoop::spin`].
    const CYCLES_PER_LOOP: u32;

    /// Fixed CPU cycles spent per half bit-period outside of the loop iterations (call, return
    /// and the pin accesses surrounding the delay).
    const OVERHEAD_CYCLES: u32;

    /// CPU cycles spent per SCL sample while waiting out clock stretching.
    const POLL_CYCLES: u32;

    /// Busy-wait for `loops` iterations.
    fn spin(&mut self, loops: u32);
}

/// Delay loop for Cortex-M cores built on `cortex_m::asm::delay`.
#[derive(Clone, Default)]
pub struct AsmDelay;

impl AsmDelay {
    pub fn new() -> AsmDelay {
        AsmDelay
    }
}

impl DelayLoop for AsmDelay {
    // `asm::delay` blocks for at least the requested number of cycles.
    const CYCLES_PER_LOOP: u32 = 1;
    const OVERHEAD_CYCLES: u32 = 12;
    const POLL_CYCLES: u32 = 8;

    fn spin(&mut self, loops: u32) {
        cortex_m::asm::delay(loops)
    }
}
