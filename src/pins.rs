//! Open-drain line access
//!
//! # Description
//! I2C lines are open-drain: any participant may pull a line low, but nobody ever drives it high.
//! Releasing a line lets the external pull-up restore the high level. `OpenDrain` reduces a GPIO
//! pin to exactly these operations so the protocol code cannot drive a line high by accident.
//!
//! Any `embedded-hal` pin that is both an input and an output can be used, as long as the HAL has
//! configured it for open-drain operation (so that `set_high()` releases the line).
use embedded_hal::digital::{InputPin, OutputPin};

use crate::Error;

/// A GPIO pin attached to one line of the bus.
pub trait OpenDrain {
    /// Stop pulling the line low.
    fn release(&mut self) -> Result<(), Error>;

    /// Pull the line low.
    fn drive_low(&mut self) -> Result<(), Error>;

    /// Sample the level of the line.
    fn is_high(&mut self) -> Result<bool, Error>;
}

impl<P> OpenDrain for P
where
    P: OutputPin + InputPin,
{
    fn release(&mut self) -> Result<(), Error> {
        self.set_high().map_err(|_| Error::Pin)
    }

    fn drive_low(&mut self) -> Result<(), Error> {
        self.set_low().map_err(|_| Error::Pin)
    }

    fn is_high(&mut self) -> Result<bool, Error> {
        InputPin::is_high(self).map_err(|_| Error::Pin)
    }
}
