//! Software I2C master
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! A single-master I2C bus emulated in software on two arbitrary GPIO lines, for devices without
//! (or not using) an I2C peripheral. The bus is timed with calibrated delay loops, supports
//! slow (25 kHz), standard (100 kHz) and fast (400 kHz) speeds, tolerates clock stretching with
//! an optional timeout, and can keep interrupts masked for the duration of a transaction.
//!
//! Each bus is an independent [`SoftI2c`] value parameterized over its pins, so any number of
//! buses can exist side by side.
//!
//! ```ignore
//! let config = BusConfig::new(168.MHz()).timeout(10.millis());
//! let mut i2c = SoftI2c::new(scl, sda, AsmDelay::new(), CriticalSection, config)?;
//! i2c.init()?;
//! if i2c.start(address_byte(0x50, Direction::Write))? {
//!     i2c.write_byte(0x00)?;
//! }
//! i2c.stop()?;
//! ```
#![no_std]
#![deny(warnings)]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate log;

pub mod bus;
pub mod config;
pub mod delay;
pub mod error;
mod hal;
pub mod interrupt;
pub mod pins;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use bus::{address_byte, Direction, SoftI2c};
pub use config::{BusConfig, BusSpeed, DelayProfile};
pub use delay::{AsmDelay, DelayLoop};
pub use error::{ConfigError, Error};
pub use interrupt::{CriticalSection, InterruptControl};
pub use pins::OpenDrain;
