//! Error type definitions for the software I2C master
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// An enumeration of possible errors on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// SDA or SCL did not read high after being released.
    BusNotReady,
    /// The addressed device did not acknowledge.
    NoAck(NoAcknowledgeSource),
    /// A slave held SCL low longer than the configured timeout.
    Timeout,
    /// A GPIO operation on SDA or SCL failed.
    Pin,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::BusNotReady => ErrorKind::Bus,
            Error::NoAck(source) => ErrorKind::NoAcknowledge(*source),
            Error::Timeout | Error::Pin => ErrorKind::Other,
        }
    }
}

/// Errors detected while deriving timing from a [`crate::BusConfig`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCpuFrequency,
    ZeroBusFrequency,
    /// Speeds above fast mode (400 kHz) are not supported.
    BusFrequencyTooHigh,
    /// Timeouts are limited to 10 seconds.
    TimeoutTooLong,
}
