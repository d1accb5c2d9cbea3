//! PCA9685-based motor HAT backend.
//!
//! Each HAT carries a PCA9685 16-channel PWM controller driving two TB6612
//! H-bridges, giving two stepper outputs per board. The two boards share the
//! Pi's I2C bus at addresses 0x60 and 0x61 (the second board needs its
//! address jumper set). Stepping is full-step, both coils energized.

use anyhow::{anyhow, Context, Result};
use embedded_hal::i2c::I2c;
use std::time::Duration;

use super::MotorBank;
use crate::protocol::{Direction, HatId, MotorId};

/// I2C address of the first HAT (factory default).
pub const HAT1_ADDR: u8 = 0x60;
/// I2C address of the second HAT (address jumper A0 set).
pub const HAT2_ADDR: u8 = 0x61;

/// Default I2C bus device on the Pi.
pub const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";

// PCA9685 registers
const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;
const ALL_LED_ON_L: u8 = 0xFA;

// MODE1 bits
const MODE1_RESTART: u8 = 0x80;
const MODE1_AI: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;

/// Prescale value for ~1.6 kHz PWM (25 MHz oscillator / 4096 counts).
const PRESCALE_1600HZ: u8 = 3;

/// Minimal PCA9685 driver: channels are only ever fully on or fully off,
/// which is all the H-bridge inputs need for full-step drive.
struct Pca9685<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pca9685<I2C> {
    fn new(i2c: I2C, address: u8) -> Result<Self> {
        let mut dev = Self { i2c, address };

        // All channels off before touching the mode registers
        dev.write_reg(&[ALL_LED_ON_L, 0x00, 0x00, 0x00, 0x10])?;

        // Prescale can only be written while the oscillator sleeps
        dev.write_reg(&[MODE1, MODE1_AI | MODE1_SLEEP])?;
        dev.write_reg(&[PRESCALE, PRESCALE_1600HZ])?;
        dev.write_reg(&[MODE1, MODE1_AI])?;
        std::thread::sleep(Duration::from_millis(1));
        dev.write_reg(&[MODE1, MODE1_AI | MODE1_RESTART])?;

        Ok(dev)
    }

    fn write_reg(&mut self, bytes: &[u8]) -> Result<()> {
        self.i2c
            .write(self.address, bytes)
            .map_err(|e| anyhow!("I2C write to 0x{:02x} failed: {:?}", self.address, e))
    }

    fn set_channel(&mut self, channel: u8, on: bool) -> Result<()> {
        let reg = LED0_ON_L + 4 * channel;
        if on {
            self.write_reg(&[reg, 0x00, 0x10, 0x00, 0x00])
        } else {
            self.write_reg(&[reg, 0x00, 0x00, 0x00, 0x10])
        }
    }
}

/// PCA9685 channel assignment for one stepper output.
struct StepperChannels {
    pwm_a: u8,
    ain1: u8,
    ain2: u8,
    pwm_b: u8,
    bin1: u8,
    bin2: u8,
}

fn channels_for(motor: MotorId) -> StepperChannels {
    match motor {
        // Stepper 1 = motor terminals M1 + M2
        MotorId::Motor1 => StepperChannels {
            pwm_a: 8,
            ain2: 9,
            ain1: 10,
            bin1: 11,
            bin2: 12,
            pwm_b: 13,
        },
        // Stepper 2 = motor terminals M3 + M4
        MotorId::Motor2 => StepperChannels {
            pwm_a: 2,
            ain2: 3,
            ain1: 4,
            bin1: 5,
            bin2: 6,
            pwm_b: 7,
        },
    }
}

/// Full-step sequence, both coils driven. Each entry is the polarity of
/// (coil A, coil B): `true` forward, `false` reversed.
const STEP_SEQUENCE: [(bool, bool); 4] = [
    (true, true),
    (false, true),
    (false, false),
    (true, false),
];

/// One driver board: a PCA9685 and the phase position of its two steppers.
pub struct MotorHat<I2C> {
    pwm: Pca9685<I2C>,
    positions: [usize; 2],
}

impl<I2C: I2c> MotorHat<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Result<Self> {
        Ok(Self {
            pwm: Pca9685::new(i2c, address)?,
            positions: [0; 2],
        })
    }

    pub fn step(&mut self, motor: MotorId, direction: Direction) -> Result<()> {
        let idx = (motor.number() - 1) as usize;
        let position = match direction {
            Direction::Cw => (self.positions[idx] + 1) % STEP_SEQUENCE.len(),
            Direction::Ccw => {
                (self.positions[idx] + STEP_SEQUENCE.len() - 1) % STEP_SEQUENCE.len()
            }
        };

        let ch = channels_for(motor);
        let (a_forward, b_forward) = STEP_SEQUENCE[position];

        self.pwm.set_channel(ch.pwm_a, true)?;
        self.pwm.set_channel(ch.pwm_b, true)?;
        self.pwm.set_channel(ch.ain1, a_forward)?;
        self.pwm.set_channel(ch.ain2, !a_forward)?;
        self.pwm.set_channel(ch.bin1, b_forward)?;
        self.pwm.set_channel(ch.bin2, !b_forward)?;

        self.positions[idx] = position;
        Ok(())
    }

    pub fn release(&mut self, motor: MotorId) -> Result<()> {
        let ch = channels_for(motor);
        for channel in [ch.pwm_a, ch.ain1, ch.ain2, ch.pwm_b, ch.bin1, ch.bin2] {
            self.pwm.set_channel(channel, false)?;
        }
        Ok(())
    }
}

/// The two driver boards, opened once at startup and handed to the executor.
pub struct HatBank {
    hats: [MotorHat<linux_embedded_hal::I2cdev>; 2],
}

impl HatBank {
    /// Open both HATs on the given I2C bus device.
    pub fn open(bus_path: &str) -> Result<Self> {
        let open_hat = |address: u8| -> Result<MotorHat<linux_embedded_hal::I2cdev>> {
            let bus = linux_embedded_hal::I2cdev::new(bus_path)
                .with_context(|| format!("Failed to open I2C bus: {}", bus_path))?;
            MotorHat::new(bus, address)
                .with_context(|| format!("Failed to initialize motor HAT at 0x{:02x}", address))
        };

        Ok(Self {
            hats: [open_hat(HAT1_ADDR)?, open_hat(HAT2_ADDR)?],
        })
    }

    fn hat(&mut self, hat: HatId) -> &mut MotorHat<linux_embedded_hal::I2cdev> {
        &mut self.hats[(hat.number() - 1) as usize]
    }
}

impl MotorBank for HatBank {
    fn step(&mut self, hat: HatId, motor: MotorId, direction: Direction) -> Result<()> {
        self.hat(hat).step(motor, direction)
    }

    fn release(&mut self, hat: HatId, motor: MotorId) -> Result<()> {
        self.hat(hat).release(motor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, Operation};

    /// Records every register write so tests can inspect the bus traffic.
    #[derive(Default)]
    struct BusLog {
        writes: Vec<(u8, Vec<u8>)>,
    }

    impl ErrorType for BusLog {
        type Error = core::convert::Infallible;
    }

    impl I2c for BusLog {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations.iter() {
                if let Operation::Write(bytes) = op {
                    self.writes.push((address, bytes.to_vec()));
                }
            }
            Ok(())
        }
    }

    fn channel_writes(log: &BusLog) -> Vec<(u8, bool)> {
        log.writes
            .iter()
            .filter(|(_, bytes)| bytes.len() == 5 && bytes[0] >= LED0_ON_L && bytes[0] < ALL_LED_ON_L)
            .map(|(_, bytes)| ((bytes[0] - LED0_ON_L) / 4, bytes[2] == 0x10))
            .collect()
    }

    #[test]
    fn test_init_sets_prescale_while_asleep() {
        let hat = MotorHat::new(BusLog::default(), HAT1_ADDR).unwrap();
        let writes = &hat.pwm.i2c.writes;

        assert!(writes.iter().all(|(addr, _)| *addr == HAT1_ADDR));
        let sleep_idx = writes
            .iter()
            .position(|(_, b)| b[0] == MODE1 && b[1] & MODE1_SLEEP != 0)
            .expect("sleep mode write");
        let prescale_idx = writes
            .iter()
            .position(|(_, b)| b[0] == PRESCALE)
            .expect("prescale write");
        assert!(sleep_idx < prescale_idx);
        assert_eq!(writes[prescale_idx].1[1], PRESCALE_1600HZ);
    }

    #[test]
    fn test_step_energizes_both_coils() {
        let mut hat = MotorHat::new(BusLog::default(), HAT1_ADDR).unwrap();
        hat.pwm.i2c.writes.clear();

        hat.step(MotorId::Motor1, Direction::Cw).unwrap();
        let writes = channel_writes(&hat.pwm.i2c);

        // Both PWM channels of stepper 1 full on
        assert!(writes.contains(&(8, true)));
        assert!(writes.contains(&(13, true)));
        // Each H-bridge gets exactly one input high
        let high = |ch: u8| writes.iter().any(|w| *w == (ch, true));
        assert!(high(10) ^ high(9), "coil A must be driven one way");
        assert!(high(11) ^ high(12), "coil B must be driven one way");
    }

    #[test]
    fn test_opposite_steps_return_to_phase() {
        let mut hat = MotorHat::new(BusLog::default(), HAT1_ADDR).unwrap();
        hat.step(MotorId::Motor1, Direction::Cw).unwrap();
        hat.step(MotorId::Motor1, Direction::Ccw).unwrap();
        assert_eq!(hat.positions[0], 0);

        // Steppers track phase independently
        hat.step(MotorId::Motor2, Direction::Ccw).unwrap();
        assert_eq!(hat.positions[0], 0);
        assert_eq!(hat.positions[1], 3);
    }

    #[test]
    fn test_release_turns_all_channels_off() {
        let mut hat = MotorHat::new(BusLog::default(), HAT1_ADDR).unwrap();
        hat.step(MotorId::Motor1, Direction::Cw).unwrap();
        hat.pwm.i2c.writes.clear();

        hat.release(MotorId::Motor1).unwrap();
        let writes = channel_writes(&hat.pwm.i2c);

        assert_eq!(writes.len(), 6);
        assert!(writes.iter().all(|(_, on)| !on));
    }
}
