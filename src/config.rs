//! Bus configuration and derived timing
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! A `BusConfig` captures everything about a bus that is decided when the bus is constructed. It
//! is converted once into a `DelayProfile`, which holds the loop counts the protocol engine
//! actually spins on.
use crate::delay::DelayLoop;
use crate::error::ConfigError;
use fugit::{HertzU32, MillisDurationU32};

/// The longest supported clock-stretch timeout.
pub const MAX_TIMEOUT_MS: u32 = 10_000;

/// Upper bound of the outer clock-stretch poll counter.
pub const MAX_STRETCH_LOOPS: u16 = 60_000;

/// Inner iterations per outer clock-stretch poll iteration.
pub const STRETCH_INNER_LOOPS: u32 = 256;

/// Target speed of the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusSpeed {
    /// At most 25 kHz, for long or otherwise problematic buses.
    Slow,
    /// 100 kHz standard mode.
    Standard,
    /// 400 kHz fast mode. Not every slave supports this.
    Fast,
    /// An explicit frequency of at most 400 kHz.
    Custom(HertzU32),
}

impl BusSpeed {
    /// Get the nominal frequency of the bus clock.
    pub const fn frequency(&self) -> HertzU32 {
        match self {
            BusSpeed::Slow => HertzU32::kHz(25),
            BusSpeed::Standard => HertzU32::kHz(100),
            BusSpeed::Fast => HertzU32::kHz(400),
            BusSpeed::Custom(frequency) => *frequency,
        }
    }
}

/// Construction-time configuration of a bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub speed: BusSpeed,
    pub cpu_frequency: HertzU32,

    /// Maximum time a slave may stretch the clock. Zero waits forever.
    pub timeout: MillisDurationU32,

    /// Disable interrupts from a start condition until the matching stop condition.
    pub no_interrupt: bool,
}

impl BusConfig {
    /// Construct a standard-mode configuration without timeout or interrupt suppression.
    ///
    /// # Args
    /// * `cpu_frequency` - The frequency the CPU executes the delay loops at.
    pub const fn new(cpu_frequency: HertzU32) -> Self {
        Self {
            speed: BusSpeed::Standard,
            cpu_frequency,
            timeout: MillisDurationU32::from_ticks(0),
            no_interrupt: false,
        }
    }

    pub const fn speed(mut self, speed: BusSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub const fn timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn no_interrupt(mut self, no_interrupt: bool) -> Self {
        self.no_interrupt = no_interrupt;
        self
    }
}

/// Loop counts derived from a [`BusConfig`] for a specific [`DelayLoop`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DelayProfile {
    cpu_frequency: HertzU32,
    half_period_loops: u32,
    half_period_cycles: u32,
    stretch_limit: Option<u16>,
}

impl DelayProfile {
    /// Derive the timing of a bus.
    ///
    /// # Args
    /// * `config` - The configuration of the bus.
    ///
    /// # Returns
    /// The loop counts for the delay loop `D`.
    pub fn new<D: DelayLoop>(config: &BusConfig) -> Result<Self, ConfigError> {
        let cpu_hz = config.cpu_frequency.to_Hz();
        let bus_hz = config.speed.frequency().to_Hz();
        let timeout_ms = config.timeout.to_millis();

        if cpu_hz == 0 {
            return Err(ConfigError::ZeroCpuFrequency);
        }

        if bus_hz == 0 {
            return Err(ConfigError::ZeroBusFrequency);
        }

        if bus_hz > BusSpeed::Fast.frequency().to_Hz() {
            return Err(ConfigError::BusFrequencyTooHigh);
        }

        if timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::TimeoutTooLong);
        }

        let cycles_per_loop = D::CYCLES_PER_LOOP.max(1);
        let half_period_loops =
            (cpu_hz / bus_hz / 2).saturating_sub(D::OVERHEAD_CYCLES) / cycles_per_loop;

        let stretch_limit = if timeout_ms == 0 {
            None
        } else {
            let cycles_per_outer = (STRETCH_INNER_LOOPS * D::POLL_CYCLES.max(1)) as u64;
            let loops = (cpu_hz / 1000) as u64 * timeout_ms as u64 / cycles_per_outer;
            Some(loops.clamp(1, MAX_STRETCH_LOOPS as u64) as u16)
        };

        Ok(Self {
            cpu_frequency: config.cpu_frequency,
            half_period_loops,
            half_period_cycles: D::OVERHEAD_CYCLES + half_period_loops * cycles_per_loop,
            stretch_limit,
        })
    }

    /// Iterations of the delay loop per half bit-period. Zero means the delay is skipped.
    pub fn half_period_loops(&self) -> u32 {
        self.half_period_loops
    }

    /// Approximate CPU cycles of one half bit-period.
    pub fn half_period_cycles(&self) -> u32 {
        self.half_period_cycles
    }

    /// Outer bound of the clock-stretch poll loop, if a timeout is configured.
    pub fn stretch_limit(&self) -> Option<u16> {
        self.stretch_limit
    }

    /// The bus clock frequency this profile approximately achieves.
    pub fn bus_frequency(&self) -> HertzU32 {
        let period = 2 * self.half_period_cycles.max(1);
        HertzU32::from_raw(self.cpu_frequency.to_Hz() / period)
    }
}
