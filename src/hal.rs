//! `embedded-hal` I2C master on top of the bitbanged bus
//!
//! # Description
//! Lets device drivers written against `embedded_hal::i2c::I2c` run on a `SoftI2c`. A
//! transaction starts with the direction of its first operation, issues a repeated start whenever
//! the direction changes, and always ends with a stop condition, even after an error. A read that
//! transfers no bytes still clocks in one discarded byte answered with a NACK, since the device
//! would otherwise keep SDA low.
use embedded_hal::i2c::{ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};

use crate::bus::{address_byte, Direction, SoftI2c};
use crate::delay::DelayLoop;
use crate::interrupt::InterruptControl;
use crate::pins::OpenDrain;
use crate::Error;

impl<SCL, SDA, D, I> ErrorType for SoftI2c<SCL, SDA, D, I>
where
    I: InterruptControl,
{
    type Error = Error;
}

impl<SCL, SDA, D, I> I2c<SevenBitAddress> for SoftI2c<SCL, SDA, D, I>
where
    SCL: OpenDrain,
    SDA: OpenDrain,
    D: DelayLoop,
    I: InterruptControl,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }

        let result = self.run_operations(address, operations);

        // Send STOP
        let stop = self.stop();

        result.and(stop)
    }
}

fn direction(operation: &Operation<'_>) -> Direction {
    match operation {
        Operation::Write(_) => Direction::Write,
        Operation::Read(_) => Direction::Read,
    }
}

/// Check if more bytes are read before the direction changes or the transaction ends.
fn read_continues(following: &[Operation<'_>]) -> bool {
    following
        .iter()
        .take_while(|operation| matches!(operation, Operation::Read(_)))
        .any(|operation| matches!(operation, Operation::Read(buffer) if !buffer.is_empty()))
}

impl<SCL, SDA, D, I> SoftI2c<SCL, SDA, D, I>
where
    SCL: OpenDrain,
    SDA: OpenDrain,
    D: DelayLoop,
    I: InterruptControl,
{
    /// Address the device and execute all operations, without the final STOP.
    fn run_operations(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        let mut previous: Option<Direction> = None;
        let mut received = false;

        for index in 0..operations.len() {
            let (current, following) = operations[index..].split_at_mut(1);
            let operation = &mut current[0];
            let dir = direction(operation);

            if previous != Some(dir) {
                let addressed = match previous {
                    None => self.start(address_byte(address, dir))?,
                    Some(_) => self.repeated_start(address_byte(address, dir))?,
                };

                if !addressed {
                    return Err(Error::NoAck(NoAcknowledgeSource::Address));
                }
                previous = Some(dir);
                received = false;
            }

            match operation {
                Operation::Write(bytes) => {
                    for byte in bytes.iter() {
                        if !self.write_byte(*byte)? {
                            return Err(Error::NoAck(NoAcknowledgeSource::Data));
                        }
                    }
                }
                Operation::Read(buffer) => {
                    let more = read_continues(following);
                    // NACK the final byte of the read so the device releases SDA.
                    if let Some((last, buffer)) = buffer.split_last_mut() {
                        for byte in buffer {
                            *byte = self.read_byte(false)?;
                        }
                        *last = self.read_byte(!more)?;
                        received = true;
                    }

                    // A device acknowledging a read address drives SDA until it sees a NACK.
                    let run_ends = !matches!(following.first(), Some(Operation::Read(_)));
                    if run_ends && !received {
                        self.read_byte(true)?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::sim::{Event, Memory, Simulator};
    use embedded_hal::i2c::{Error as _, ErrorKind};
    use fugit::RateExtU32;

    type Eeprom = Memory<256>;

    const DEVICE: u8 = 0x50;

    fn eeprom() -> Eeprom {
        let mut eeprom = Eeprom::new(DEVICE);
        for (index, byte) in eeprom.data.iter_mut().enumerate() {
            *byte = index as u8 ^ 0xFF;
        }
        eeprom
    }

    macro_rules! sim_bus {
        ($sim:expr) => {{
            let mut bus = SoftI2c::new(
                $sim.scl(),
                $sim.sda(),
                $sim.delay(),
                $sim.interrupts(),
                BusConfig::new(16.MHz()),
            )
            .unwrap();
            bus.init().unwrap();
            bus
        }};
    }

    #[test]
    fn write_read_uses_repeated_start() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        let mut buffer = [0u8; 3];
        i2c.write_read(DEVICE, &[0x10], &mut buffer).unwrap();
        assert_eq!(buffer, [0xEF, 0xEE, 0xED]);

        assert_eq!(
            sim.events().as_slice(),
            &[
                Event::Start { repeated: false },
                Event::Address {
                    byte: 0xA0,
                    ack: true
                },
                Event::Write {
                    byte: 0x10,
                    ack: true
                },
                Event::Start { repeated: true },
                Event::Address {
                    byte: 0xA1,
                    ack: true
                },
                Event::Read {
                    byte: 0xEF,
                    ack: true
                },
                Event::Read {
                    byte: 0xEE,
                    ack: true
                },
                Event::Read {
                    byte: 0xED,
                    ack: false
                },
                Event::Stop,
            ]
        );
        assert_eq!(sim.lines(), (true, true));
    }

    #[test]
    fn write_stores_data() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        i2c.write(DEVICE, &[0x20, 1, 2, 3]).unwrap();
        assert_eq!(
            sim.with_device(|eeprom| [eeprom.data[0x20], eeprom.data[0x21], eeprom.data[0x22]]),
            [1, 2, 3]
        );
        assert_eq!(sim.events().last(), Some(&Event::Stop));
    }

    #[test]
    fn adjacent_operations_are_merged() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        let mut first = [0u8; 2];
        let mut second = [0u8; 1];
        i2c.transaction(
            DEVICE,
            &mut [
                Operation::Write(&[0x30]),
                Operation::Write(&[0xAA]),
                Operation::Read(&mut []),
                Operation::Read(&mut first),
                Operation::Read(&mut second),
            ],
        )
        .unwrap();

        // The write stored 0xAA at 0x30, the read continues at 0x31.
        assert_eq!(first, [0xCE, 0xCD]);
        assert_eq!(second, [0xCC]);

        let events = sim.events();
        let starts = events
            .iter()
            .filter(|event| matches!(event, Event::Start { .. }))
            .count();
        assert_eq!(starts, 2);

        let acks: heapless::Vec<bool, 4> = events
            .iter()
            .filter_map(|event| match event {
                Event::Read { ack, .. } => Some(*ack),
                _ => None,
            })
            .collect();
        assert_eq!(acks.as_slice(), &[true, true, false]);
    }

    #[test]
    fn address_nack_is_reported() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        let error = i2c.write(0x51, &[0x00]).unwrap_err();
        assert_eq!(error, Error::NoAck(NoAcknowledgeSource::Address));
        assert_eq!(
            error.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );

        // The bus is released even though the transaction failed.
        assert_eq!(sim.events().last(), Some(&Event::Stop));
        assert_eq!(sim.lines(), (true, true));
    }

    #[test]
    fn empty_write_probes_device() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        assert_eq!(i2c.write(DEVICE, &[]), Ok(()));
        assert!(i2c.write(0x3C, &[]).is_err());
    }

    #[test]
    fn empty_transaction_leaves_bus_alone() {
        let sim = Simulator::new(eeprom());
        let mut i2c = sim_bus!(sim);

        assert_eq!(i2c.transaction(DEVICE, &mut []), Ok(()));
        assert!(sim.events().is_empty());
    }

    #[test]
    fn empty_read_releases_the_bus() {
        let mut eeprom = eeprom();
        eeprom.data[0x80] = 0x7F;
        let sim = Simulator::new(eeprom);
        let mut i2c = sim_bus!(sim);

        let result = i2c.transaction(
            DEVICE,
            &mut [Operation::Write(&[0x80]), Operation::Read(&mut [])],
        );
        assert_eq!(result, Ok(()));
        assert_eq!(sim.lines(), (true, true));

        let events = sim.events();
        assert_eq!(
            &events[events.len() - 2..],
            &[
                Event::Read {
                    byte: 0x7F,
                    ack: false
                },
                Event::Stop,
            ]
        );
        assert_eq!(i2c.init(), Ok(()));
    }

    #[test]
    fn empty_read_probes_device() {
        let mut eeprom = eeprom();
        eeprom.data[0] = 0x00;
        let sim = Simulator::new(eeprom);
        let mut i2c = sim_bus!(sim);

        assert_eq!(i2c.read(DEVICE, &mut []), Ok(()));
        assert_eq!(sim.lines(), (true, true));
        assert_eq!(sim.events().last(), Some(&Event::Stop));
    }

    #[test]
    fn read_continues_over_empty_buffers() {
        let mut empty: [u8; 0] = [];
        let mut data = [0u8; 1];
        assert!(read_continues(&[
            Operation::Read(&mut empty),
            Operation::Read(&mut data)
        ]));

        let mut empty: [u8; 0] = [];
        assert!(!read_continues(&[Operation::Read(&mut empty)]));
        assert!(!read_continues(&[Operation::Write(&[1])]));
        assert!(!read_continues(&[]));
    }
}
