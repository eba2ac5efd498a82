//! I2C Bitbanging Driver
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! A single-master I2C bus driven by toggling two open-drain GPIO lines. Timing is produced by
//! calibrated delay loops, so the bus runs at the configured speed independent of any timer
//! peripheral.
//!
//! A transaction is `start()` followed by any number of `write_byte()`/`read_byte()` calls and
//! finally `stop()`. `repeated_start()` re-addresses the bus without releasing it in between.
//! Nothing enforces this ordering: the caller owns the protocol sequence.
//!
//! # Special Notes
//! Most of the bitbanging mechanism is attributed to M-Labs:
//! * ARTIQ: https://github.com/m-labs/artiq/blob/master/artiq/firmware/libboard_misoc/i2c.rs
//! * zynq-rs: https://git.m-labs.hk/M-Labs/zynq-rs/src/branch/master/libboard_zynq/src/i2c/mod.rs
use bit_field::BitField;
use embedded_hal::i2c::NoAcknowledgeSource;
use fugit::HertzU32;

use crate::config::{BusConfig, DelayProfile, STRETCH_INNER_LOOPS};
use crate::delay::DelayLoop;
use crate::interrupt::{InterruptControl, InterruptGuard};
use crate::pins::OpenDrain;
use crate::{ConfigError, Error};

/// Direction of a transfer, encoded in the lowest bit of the addressing byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

/// Combine a 7-bit address and a transfer direction into an addressing byte.
///
/// # Args
/// * `address` - The 7-bit address of the device.
/// * `direction` - Whether the master writes to or reads from the device.
pub const fn address_byte(address: u8, direction: Direction) -> u8 {
    (address << 1) | direction as u8
}

/// I2C Bitbanging Driver
pub struct SoftI2c<SCL, SDA, D, I>
where
    I: InterruptControl,
{
    scl: SCL,
    sda: SDA,
    delay: D,
    interrupts: InterruptGuard<I>,
    config: BusConfig,
    profile: DelayProfile,
}

impl<SCL, SDA, D, I> SoftI2c<SCL, SDA, D, I>
where
    SCL: OpenDrain,
    SDA: OpenDrain,
    D: DelayLoop,
    I: InterruptControl,
{
    /// Construct a bus on a pair of open-drain pins.
    ///
    /// # Note
    /// The lines are not touched. Call `init()` before the first transaction.
    ///
    /// # Args
    /// * `scl` - The pin attached to the clock line.
    /// * `sda` - The pin attached to the data line.
    /// * `delay` - The delay loop used to time the bus.
    /// * `interrupts` - Used to mask interrupts during transactions if `config.no_interrupt` is set.
    /// * `config` - The speed, timeout and interrupt behavior of the bus.
    pub fn new(
        scl: SCL,
        sda: SDA,
        delay: D,
        interrupts: I,
        config: BusConfig,
    ) -> Result<Self, ConfigError> {
        let profile = DelayProfile::new::<D>(&config)?;

        Ok(Self {
            scl,
            sda,
            delay,
            interrupts: InterruptGuard::new(interrupts),
            config,
            profile,
        })
    }

    /// Release the hardware resources of the bus.
    ///
    /// # Note
    /// Interrupts still masked by an unterminated transaction are restored.
    pub fn free(self) -> (SCL, SDA, D, I) {
        (self.scl, self.sda, self.delay, self.interrupts.into_inner())
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn profile(&self) -> &DelayProfile {
        &self.profile
    }

    /// Recompute the bus timing after the CPU clock was changed.
    ///
    /// # Args
    /// * `frequency` - The new CPU clock frequency.
    pub fn set_cpu_frequency(&mut self, frequency: HertzU32) -> Result<(), ConfigError> {
        let config = BusConfig {
            cpu_frequency: frequency,
            ..self.config
        };

        self.profile = DelayProfile::new::<D>(&config)?;
        self.config = config;
        Ok(())
    }

    /// Release both lines and check that the bus is idle.
    ///
    /// # Returns
    /// `Error::BusNotReady` if SDA or SCL stays low, which indicates a bus lockup or missing
    /// pull-up resistors. No transaction may be started in that case.
    pub fn init(&mut self) -> Result<(), Error> {
        self.sda.release()?;
        self.scl.release()?;

        if self.sda.is_high()? && self.scl.is_high()? {
            Ok(())
        } else {
            warn!("I2C bus not idle after releasing SDA and SCL");
            Err(Error::BusNotReady)
        }
    }

    /// Attempt to free a bus on which a slave holds SDA low.
    ///
    /// # Note
    /// A slave interrupted in the middle of transmitting a byte keeps driving SDA until it has
    /// shifted out the rest of the byte. Clocking SCL up to nine times lets it finish, after which
    /// a stop condition returns it to idle.
    pub fn recover(&mut self) -> Result<(), Error> {
        self.sda.release()?;
        self.scl.release()?;
        self.wait_scl_high()?;
        self.half_period();

        for _ in 0..9 {
            if self.sda.is_high()? {
                break;
            }

            self.scl.drive_low()?;
            self.half_period();
            self.scl.release()?;
            self.wait_scl_high()?;
            self.half_period();
        }

        self.stop()?;
        self.init()
    }

    /// Issue a start condition and address a device.
    ///
    /// # Note
    /// With `no_interrupt` configured, interrupts stay masked until `stop()`. `stop()` must follow
    /// even if addressing fails.
    ///
    /// # Args
    /// * `address` - The addressing byte: 7-bit address and R/W bit, see [`address_byte`].
    ///
    /// # Returns
    /// True if the device acknowledged its address.
    pub fn start(&mut self, address: u8) -> Result<bool, Error> {
        if self.config.no_interrupt {
            self.interrupts.enter();
        }

        self.wait_scl_high()?;
        self.sda.drive_low()?;
        self.half_period();
        self.write_byte(address)
    }

    /// Issue a repeated start condition on a claimed bus and address a device.
    ///
    /// # Args
    /// * `address` - The addressing byte: 7-bit address and R/W bit.
    ///
    /// # Returns
    /// True if the device acknowledged its address.
    pub fn repeated_start(&mut self, address: u8) -> Result<bool, Error> {
        if self.config.no_interrupt {
            self.interrupts.enter();
        }

        trace!("I2C repeated start to {:#04x}", address);

        self.scl.drive_low()?;
        self.half_period();
        self.sda.release()?;
        self.half_period();
        self.scl.release()?;
        self.half_period();
        self.wait_scl_high()?;
        self.sda.drive_low()?;
        self.half_period();
        self.write_byte(address)
    }

    /// Address a device until it acknowledges.
    ///
    /// # Note
    /// Devices with an internal write cycle, such as EEPROMs, do not acknowledge while busy. Each
    /// unacknowledged attempt is terminated with a stop condition before retrying. This never
    /// returns if the device never acknowledges; see `start_wait_for()` for a bounded variant.
    ///
    /// # Args
    /// * `address` - The addressing byte: 7-bit address and R/W bit.
    pub fn start_wait(&mut self, address: u8) -> Result<(), Error> {
        self.poll_ack(address, None)
    }

    /// Address a device until it acknowledges, giving up after a number of attempts.
    ///
    /// # Args
    /// * `address` - The addressing byte: 7-bit address and R/W bit.
    /// * `attempts` - The maximum number of addressing attempts. Zero leaves the bus untouched.
    ///
    /// # Returns
    /// `Error::NoAck` if the device did not acknowledge any attempt. The bus is released then.
    pub fn start_wait_for(&mut self, address: u8, attempts: u32) -> Result<(), Error> {
        if attempts == 0 {
            return Err(Error::NoAck(NoAcknowledgeSource::Address));
        }

        self.poll_ack(address, Some(attempts))
    }

    fn poll_ack(&mut self, address: u8, attempts: Option<u32>) -> Result<(), Error> {
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);

            match self.start(address) {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    debug!("I2C device {:#04x} busy (attempt {})", address, attempt);
                    self.stop()?;
                }
                Err(error) => {
                    self.stop().ok();
                    return Err(error);
                }
            }

            if attempts.map_or(false, |max| attempt >= max) {
                return Err(Error::NoAck(NoAcknowledgeSource::Address));
            }
        }
    }

    /// Issue a stop condition, freeing the bus.
    ///
    /// # Note
    /// SDA is released and interrupts are restored even if the clock-stretch wait times out.
    pub fn stop(&mut self) -> Result<(), Error> {
        let result = self.stop_condition();
        self.interrupts.exit();
        result
    }

    fn stop_condition(&mut self) -> Result<(), Error> {
        trace!("I2C stop");

        self.scl.drive_low()?;
        self.sda.drive_low()?;
        self.half_period();
        self.scl.release()?;
        self.half_period();
        let stretch = self.wait_scl_high();
        self.sda.release()?;
        self.half_period();

        stretch
    }

    /// Write one byte to the addressed device.
    ///
    /// # Args
    /// * `value` - The byte to send, MSB first.
    ///
    /// # Returns
    /// True if the device acknowledged the byte.
    pub fn write_byte(&mut self, value: u8) -> Result<bool, Error> {
        let ack = self.shift_out(value);

        // Keep the high phase of the final clock short.
        self.scl.drive_low()?;

        ack
    }

    fn shift_out(&mut self, value: u8) -> Result<bool, Error> {
        // MSB first
        for bit in (0..8).rev() {
            self.scl.drive_low()?;
            if value.get_bit(bit) {
                self.sda.release()?;
            } else {
                self.sda.drive_low()?;
            }
            self.half_period();
            self.scl.release()?;
            self.wait_scl_high()?;
            self.half_period();
        }

        // Read ack/nack
        self.scl.drive_low()?;
        self.sda.release()?;
        self.half_period();
        self.scl.release()?;
        self.wait_scl_high()?;
        let ack = !self.sda.is_high()?;
        self.half_period();

        if !ack {
            debug!("I2C NACK after {:#04x}", value);
        }

        Ok(ack)
    }

    /// Read one byte from the addressed device.
    ///
    /// # Args
    /// * `last` - True for the final byte of a read, which is answered with a NACK. Otherwise the
    ///   byte is acknowledged and the device prepares the next one.
    ///
    /// # Returns
    /// The received byte.
    pub fn read_byte(&mut self, last: bool) -> Result<u8, Error> {
        let byte = self.shift_in(last);

        // Keep the high phase of the final clock short.
        self.scl.drive_low()?;

        byte
    }

    fn shift_in(&mut self, last: bool) -> Result<u8, Error> {
        let mut byte: u8 = 0;

        // MSB first
        for bit in (0..8).rev() {
            self.scl.drive_low()?;
            self.sda.release()?;
            self.half_period();
            self.scl.release()?;
            self.half_period();
            self.wait_scl_high()?;
            byte.set_bit(bit, self.sda.is_high()?);
        }

        // Send ack/nack
        self.scl.drive_low()?;
        if last {
            self.sda.release()?;
        } else {
            self.sda.drive_low()?;
        }
        self.half_period();
        self.scl.release()?;
        self.wait_scl_high()?;
        self.half_period();

        Ok(byte)
    }

    #[inline]
    fn half_period(&mut self) {
        let loops = self.profile.half_period_loops();
        if loops > 0 {
            self.delay.spin(loops);
        }
    }

    /// Wait until no slave stretches the clock any more.
    fn wait_scl_high(&mut self) -> Result<(), Error> {
        let Some(limit) = self.profile.stretch_limit() else {
            while !self.scl.is_high()? {}
            return Ok(());
        };

        for _ in 0..limit {
            for _ in 0..STRETCH_INNER_LOOPS {
                if self.scl.is_high()? {
                    return Ok(());
                }
            }
        }

        warn!(
            "I2C SCL held low for more than {} ms",
            self.config.timeout.to_millis()
        );
        Err(Error::Timeout)
    }
}
