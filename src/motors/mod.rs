//! Motor actuation seam.
//!
//! The executor never talks to hardware directly; it drives a [`MotorBank`],
//! the owned device context created once at startup. The real backend (two
//! PCA9685-based driver HATs) lives in [`hat`] behind the `hardware` feature;
//! [`SimulatedBank`] stands in when no motors are attached.

#[cfg(feature = "hardware")]
pub mod hat;

use anyhow::Result;
use std::time::Duration;

use crate::protocol::{Direction, HatId, MotorId};

/// Minimum interval between single-step actuations, per the driver board's
/// step timing.
pub const STEP_INTERVAL: Duration = Duration::from_millis(10);

/// Two driver HATs with two stepper outputs each, addressed by
/// (hat, motor) pair.
pub trait MotorBank {
    /// Issue one single-step actuation on the addressed motor.
    fn step(&mut self, hat: HatId, motor: MotorId, direction: Direction) -> Result<()>;

    /// De-energize the addressed motor's coils so it does not heat up
    /// while idle.
    fn release(&mut self, hat: HatId, motor: MotorId) -> Result<()>;
}

impl<B: MotorBank + ?Sized> MotorBank for Box<B> {
    fn step(&mut self, hat: HatId, motor: MotorId, direction: Direction) -> Result<()> {
        (**self).step(hat, motor, direction)
    }

    fn release(&mut self, hat: HatId, motor: MotorId) -> Result<()> {
        (**self).release(hat, motor)
    }
}

/// A bank that logs actuations instead of driving hardware. Used by
/// `serve --simulate` for bench testing the protocol end to end.
#[derive(Debug, Default)]
pub struct SimulatedBank {
    steps_since_release: u64,
}

impl MotorBank for SimulatedBank {
    fn step(&mut self, hat: HatId, motor: MotorId, direction: Direction) -> Result<()> {
        self.steps_since_release += 1;
        log::debug!("hat {} motor {}: step {}", hat, motor, direction);
        Ok(())
    }

    fn release(&mut self, hat: HatId, motor: MotorId) -> Result<()> {
        log::info!(
            "hat {} motor {}: released after {} step(s)",
            hat,
            motor,
            self.steps_since_release
        );
        self.steps_since_release = 0;
        Ok(())
    }
}
