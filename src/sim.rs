//! Cycle-counting bus simulator
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! Models both open-drain lines of a bus together with a single slave device, so that the
//! protocol engine can be exercised on the host. Every pin access and delay loop advances a
//! simulated CPU cycle counter, which makes bit periods and timeouts measurable.
//!
//! The slave reacts to line edges exactly like a hardware slave would: it detects start and stop
//! conditions, samples SDA on rising SCL edges, and changes SDA only while SCL is low. It may hold
//! SCL low after each acknowledge bit to stretch the clock.
use core::cell::RefCell;
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use heapless::Vec;

use crate::delay::DelayLoop;
use crate::interrupt::InterruptControl;

/// CPU cycles per pin access.
pub const PIN_CYCLES: u64 = 2;

/// Number of transaction events retained.
pub const EVENT_CAPACITY: usize = 128;

/// Number of rising SCL edge timestamps retained.
pub const EDGE_CAPACITY: usize = 128;

/// A protocol event observed by the simulated slave.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Start { repeated: bool },
    Address { byte: u8, ack: bool },
    Write { byte: u8, ack: bool },
    /// A byte sent to the master, along with the master's acknowledge.
    Read { byte: u8, ack: bool },
    Stop,
}

/// How long a slave holds SCL low after an acknowledge bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stretch {
    None,
    Cycles(u64),
    Forever,
}

/// Behavior of the simulated slave.
pub trait Device {
    /// Handle an addressing byte (7-bit address and R/W bit).
    ///
    /// # Returns
    /// True to acknowledge.
    fn address(&mut self, byte: u8) -> bool;

    /// Handle a byte written by the master.
    ///
    /// # Returns
    /// True to acknowledge.
    fn write(&mut self, _byte: u8) -> bool {
        true
    }

    /// Provide the next byte read by the master.
    fn read(&mut self) -> u8 {
        0xFF
    }

    /// The master issued a stop condition.
    fn stop(&mut self) {}

    /// Clock stretching applied after each acknowledged byte.
    fn stretch(&mut self) -> Stretch {
        Stretch::None
    }
}

/// A register-file slave in the style of a small serial EEPROM.
///
/// The first byte written after addressing sets the register pointer, further writes store data
/// and advance the pointer. Reads return data from the pointer. After a stop that ends a write,
/// the device is busy for `write_cycle_polls` addressing attempts and does not acknowledge them.
pub struct Memory<const N: usize> {
    address: u8,
    pointer: usize,
    pointer_set: bool,
    written: bool,
    busy: u32,
    pub data: [u8; N],
    pub write_cycle_polls: u32,
    pub stretch: Stretch,
}

impl<const N: usize> Memory<N> {
    /// Construct a memory device.
    ///
    /// # Args
    /// * `address` - The 7-bit address the device responds to.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            pointer: 0,
            pointer_set: false,
            written: false,
            busy: 0,
            data: [0; N],
            write_cycle_polls: 0,
            stretch: Stretch::None,
        }
    }
}

impl<const N: usize> Device for Memory<N> {
    fn address(&mut self, byte: u8) -> bool {
        if byte >> 1 != self.address {
            return false;
        }

        if self.busy > 0 {
            self.busy -= 1;
            return false;
        }

        self.pointer_set = byte & 1 == 1;
        true
    }

    fn write(&mut self, byte: u8) -> bool {
        if !self.pointer_set {
            self.pointer = byte as usize % N;
            self.pointer_set = true;
        } else {
            self.data[self.pointer] = byte;
            self.pointer = (self.pointer + 1) % N;
            self.written = true;
        }
        true
    }

    fn read(&mut self) -> u8 {
        let byte = self.data[self.pointer];
        self.pointer = (self.pointer + 1) % N;
        byte
    }

    fn stop(&mut self) {
        if self.written {
            self.written = false;
            self.busy = self.write_cycle_polls;
        }
    }

    fn stretch(&mut self) -> Stretch {
        self.stretch
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    /// Not addressed. Clocks are ignored until the next start condition.
    Idle,
    /// Shifting in an address (`address == true`) or data byte.
    Receive { address: bool, shift: u8, bits: u8 },
    /// Driving the acknowledge bit of a received byte.
    AckOut { ack: bool, read: bool },
    /// Shifting out a data byte.
    Transmit { byte: u8, bits: u8 },
    /// Waiting for the master to acknowledge a transmitted byte.
    AckIn { byte: u8, ack: Option<bool> },
}

#[derive(Copy, Clone)]
enum Line {
    Scl,
    Sda,
}

struct State<D> {
    device: D,
    phase: Phase,
    cycles: u64,
    busy: bool,

    master_scl_low: bool,
    master_sda_low: bool,
    slave_sda_low: bool,
    stretch_until: Option<u64>,
    forced_scl_low: bool,
    forced_sda_low: bool,

    scl: bool,
    sda: bool,

    interrupts_masked: bool,
    interrupt_disables: u32,

    events: Vec<Event, EVENT_CAPACITY>,
    scl_rises: Vec<u64, EDGE_CAPACITY>,
}

impl<D: Device> State<D> {
    fn scl_level(&self) -> bool {
        let stretching = self.stretch_until.map_or(false, |until| self.cycles < until);
        !(self.master_scl_low || self.forced_scl_low || stretching)
    }

    fn sda_level(&self) -> bool {
        !(self.master_sda_low || self.slave_sda_low || self.forced_sda_low)
    }

    fn advance(&mut self, cycles: u64) {
        self.cycles = self.cycles.saturating_add(cycles);
        self.settle();
    }

    fn record(&mut self, event: Event) {
        self.events.push(event).ok();
    }

    /// Propagate line changes to the slave until both lines are stable.
    fn settle(&mut self) {
        loop {
            let scl = self.scl_level();
            let sda = self.sda_level();

            if scl != self.scl {
                self.scl = scl;
                if scl {
                    self.scl_rises.push(self.cycles).ok();
                    self.on_scl_rise(sda);
                } else {
                    self.on_scl_fall();
                }
                continue;
            }

            if sda != self.sda {
                self.sda = sda;
                if scl {
                    if sda {
                        self.on_stop();
                    } else {
                        self.on_start();
                    }
                }
                continue;
            }

            break;
        }
    }

    fn on_start(&mut self) {
        self.record(Event::Start {
            repeated: self.busy,
        });
        self.busy = true;
        self.slave_sda_low = false;
        self.phase = Phase::Receive {
            address: true,
            shift: 0,
            bits: 0,
        };
    }

    fn on_stop(&mut self) {
        self.record(Event::Stop);
        self.busy = false;
        self.slave_sda_low = false;
        self.phase = Phase::Idle;
        self.device.stop();
    }

    fn on_scl_rise(&mut self, sda: bool) {
        match self.phase {
            Phase::Receive {
                address,
                shift,
                bits,
            } if bits < 8 => {
                self.phase = Phase::Receive {
                    address,
                    shift: (shift << 1) | sda as u8,
                    bits: bits + 1,
                };
            }
            Phase::Transmit { byte, bits } if bits < 8 => {
                self.phase = Phase::Transmit {
                    byte,
                    bits: bits + 1,
                };
            }
            Phase::AckIn { byte, ack: None } => {
                let ack = !sda;
                self.record(Event::Read { byte, ack });
                self.phase = Phase::AckIn {
                    byte,
                    ack: Some(ack),
                };
            }
            _ => {}
        }
    }

    fn on_scl_fall(&mut self) {
        match self.phase {
            Phase::Receive {
                address,
                shift,
                bits: 8,
            } => {
                let ack = if address {
                    let ack = self.device.address(shift);
                    self.record(Event::Address { byte: shift, ack });
                    ack
                } else {
                    let ack = self.device.write(shift);
                    self.record(Event::Write { byte: shift, ack });
                    ack
                };
                self.slave_sda_low = ack;
                self.phase = Phase::AckOut {
                    ack,
                    read: address && shift & 1 == 1,
                };
            }
            Phase::AckOut { ack, read } => {
                self.slave_sda_low = false;
                if !ack {
                    self.phase = Phase::Idle;
                    return;
                }

                self.stretch();
                if read {
                    self.transmit();
                } else {
                    self.phase = Phase::Receive {
                        address: false,
                        shift: 0,
                        bits: 0,
                    };
                }
            }
            Phase::Transmit { byte, bits: 8 } => {
                self.slave_sda_low = false;
                self.phase = Phase::AckIn { byte, ack: None };
            }
            Phase::Transmit { byte, bits } => {
                self.slave_sda_low = byte & (0x80 >> bits) == 0;
            }
            Phase::AckIn {
                ack: Some(true), ..
            } => {
                self.stretch();
                self.transmit();
            }
            Phase::AckIn {
                ack: Some(false), ..
            } => {
                self.phase = Phase::Idle;
            }
            _ => {}
        }
    }

    fn transmit(&mut self) {
        let byte = self.device.read();
        self.slave_sda_low = byte & 0x80 == 0;
        self.phase = Phase::Transmit { byte, bits: 0 };
    }

    fn stretch(&mut self) {
        self.stretch_until = match self.device.stretch() {
            Stretch::None => None,
            Stretch::Cycles(cycles) => Some(self.cycles + cycles),
            Stretch::Forever => Some(u64::MAX),
        };
    }
}

/// A simulated bus with one attached slave device.
pub struct Simulator<D> {
    state: RefCell<State<D>>,
}

impl<D: Device> Simulator<D> {
    /// Construct an idle bus.
    ///
    /// # Args
    /// * `device` - The slave attached to the bus.
    pub fn new(device: D) -> Self {
        Self {
            state: RefCell::new(State {
                device,
                phase: Phase::Idle,
                cycles: 0,
                busy: false,
                master_scl_low: false,
                master_sda_low: false,
                slave_sda_low: false,
                stretch_until: None,
                forced_scl_low: false,
                forced_sda_low: false,
                scl: true,
                sda: true,
                interrupts_masked: false,
                interrupt_disables: 0,
                events: Vec::new(),
                scl_rises: Vec::new(),
            }),
        }
    }

    /// Get a pin attached to SCL.
    pub fn scl(&self) -> SimPin<'_, D> {
        SimPin {
            sim: self,
            line: Line::Scl,
        }
    }

    /// Get a pin attached to SDA.
    pub fn sda(&self) -> SimPin<'_, D> {
        SimPin {
            sim: self,
            line: Line::Sda,
        }
    }

    /// Get a delay loop that advances the cycle counter.
    pub fn delay(&self) -> SimDelay<'_, D> {
        SimDelay { sim: self }
    }

    /// Get an interrupt controller recording the mask state.
    pub fn interrupts(&self) -> SimInterrupts<'_, D> {
        SimInterrupts { sim: self }
    }

    /// Elapsed CPU cycles.
    pub fn cycles(&self) -> u64 {
        self.state.borrow().cycles
    }

    /// Current (SCL, SDA) line levels.
    pub fn lines(&self) -> (bool, bool) {
        let state = self.state.borrow();
        (state.scl_level(), state.sda_level())
    }

    /// Whether the master currently pulls either line low.
    pub fn master_released(&self) -> bool {
        let state = self.state.borrow();
        !state.master_scl_low && !state.master_sda_low
    }

    /// Hold SCL low regardless of the master and slave.
    pub fn force_scl_low(&self, low: bool) {
        let mut state = self.state.borrow_mut();
        state.forced_scl_low = low;
        state.settle();
    }

    /// Hold SDA low regardless of the master and slave.
    pub fn force_sda_low(&self, low: bool) {
        let mut state = self.state.borrow_mut();
        state.forced_sda_low = low;
        state.settle();
    }

    pub fn interrupts_masked(&self) -> bool {
        self.state.borrow().interrupts_masked
    }

    pub fn interrupt_disables(&self) -> u32 {
        self.state.borrow().interrupt_disables
    }

    /// Events observed by the slave so far.
    pub fn events(&self) -> Vec<Event, EVENT_CAPACITY> {
        self.state.borrow().events.clone()
    }

    /// Timestamps of rising SCL edges so far.
    pub fn scl_rises(&self) -> Vec<u64, EDGE_CAPACITY> {
        self.state.borrow().scl_rises.clone()
    }

    /// Forget recorded events and edges.
    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.scl_rises.clear();
    }

    /// Inspect or modify the attached device.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.state.borrow_mut().device)
    }
}

/// One line of a simulated bus.
pub struct SimPin<'a, D> {
    sim: &'a Simulator<D>,
    line: Line,
}

impl<D: Device> SimPin<'_, D> {
    fn set_master_low(&mut self, low: bool) {
        let mut state = self.sim.state.borrow_mut();
        state.advance(PIN_CYCLES);
        match self.line {
            Line::Scl => state.master_scl_low = low,
            Line::Sda => state.master_sda_low = low,
        }
        state.settle();
    }
}

impl<D> ErrorType for SimPin<'_, D> {
    type Error = Infallible;
}

impl<D: Device> OutputPin for SimPin<'_, D> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set_master_low(true);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set_master_low(false);
        Ok(())
    }
}

impl<D: Device> InputPin for SimPin<'_, D> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let mut state = self.sim.state.borrow_mut();
        state.advance(PIN_CYCLES);
        Ok(match self.line {
            Line::Scl => state.scl_level(),
            Line::Sda => state.sda_level(),
        })
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// A delay loop with the calibration of a classic 8-bit AVR core.
pub struct SimDelay<'a, D> {
    sim: &'a Simulator<D>,
}

impl<D: Device> DelayLoop for SimDelay<'_, D> {
    const CYCLES_PER_LOOP: u32 = 3;
    const OVERHEAD_CYCLES: u32 = 19;
    const POLL_CYCLES: u32 = PIN_CYCLES as u32;

    fn spin(&mut self, loops: u32) {
        let cycles = Self::OVERHEAD_CYCLES as u64 + loops as u64 * Self::CYCLES_PER_LOOP as u64;
        self.sim.state.borrow_mut().advance(cycles);
    }
}

/// Records the global interrupt mask of the simulated CPU.
pub struct SimInterrupts<'a, D> {
    sim: &'a Simulator<D>,
}

impl<D: Device> InterruptControl for SimInterrupts<'_, D> {
    type State = bool;

    fn disable(&mut self) -> bool {
        let mut state = self.sim.state.borrow_mut();
        state.interrupt_disables += 1;
        core::mem::replace(&mut state.interrupts_masked, true)
    }

    fn restore(&mut self, masked: bool) {
        self.sim.state.borrow_mut().interrupts_masked = masked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Eeprom = Memory<256>;

    #[test]
    fn idle_bus_is_high() {
        let sim = Simulator::new(Eeprom::new(0x50));
        assert_eq!(sim.lines(), (true, true));

        sim.force_sda_low(true);
        assert_eq!(sim.lines(), (true, false));
        sim.force_sda_low(false);
        sim.force_scl_low(true);
        assert_eq!(sim.lines(), (false, true));
    }

    #[test]
    fn start_and_stop_are_detected() {
        let sim = Simulator::new(Eeprom::new(0x50));
        let mut scl = sim.scl();
        let mut sda = sim.sda();

        sda.set_low().unwrap();
        scl.set_low().unwrap();
        scl.set_high().unwrap();
        sda.set_high().unwrap();

        assert_eq!(
            sim.events().as_slice(),
            &[Event::Start { repeated: false }, Event::Stop]
        );
    }

    #[test]
    fn pin_accesses_cost_cycles() {
        let sim = Simulator::new(Eeprom::new(0x50));
        let mut scl = sim.scl();
        scl.set_low().unwrap();
        scl.is_high().unwrap();
        assert_eq!(sim.cycles(), 2 * PIN_CYCLES);

        sim.delay().spin(10);
        assert_eq!(sim.cycles(), 2 * PIN_CYCLES + 19 + 30);
    }

    #[test]
    fn stretch_releases_after_deadline() {
        let mut eeprom = Eeprom::new(0x50);
        eeprom.stretch = Stretch::Cycles(100);
        let sim = Simulator::new(eeprom);
        {
            let mut state = sim.state.borrow_mut();
            state.stretch();
        }
        assert_eq!(sim.lines(), (false, true));
        sim.delay().spin(30);
        assert_eq!(sim.lines(), (true, true));
    }
}
