//! Device-side command executor.
//!
//! Reads command lines off the serial connection, dispatches them against the
//! motor bank, and writes exactly one reply line per command. The loop never
//! terminates on a bad command; only the interrupt flag stops it.

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::motors::{MotorBank, STEP_INTERVAL};
use crate::protocol::{Command, Direction, HatId, MotorId, ParseError, Reply};
use crate::serial::SerialConnection;

/// Dispatches decoded commands against a motor bank.
pub struct Executor<B> {
    bank: B,
    step_interval: Duration,
}

impl<B: MotorBank> Executor<B> {
    pub fn new(bank: B) -> Self {
        Self {
            bank,
            step_interval: STEP_INTERVAL,
        }
    }

    /// Override the inter-step delay. Tests use zero to avoid real pacing.
    #[cfg(test)]
    fn with_step_interval(mut self, step_interval: Duration) -> Self {
        self.step_interval = step_interval;
        self
    }

    /// Decode one command line and execute it, producing the reply to send
    /// back. Verb and field-count mismatches get the fixed `Invalid command`
    /// reply; field conversion and actuation failures get `Error: <message>`.
    pub fn dispatch(&mut self, line: &str) -> Reply {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(ParseError::Unrecognized) => return Reply::Invalid,
            Err(e) => return Reply::Error(e.to_string()),
        };

        match command {
            Command::Rotate {
                hat,
                motor,
                steps,
                direction,
            } => match self.rotate(hat, motor, steps, direction) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::Error(e.to_string()),
            },
        }
    }

    fn rotate(
        &mut self,
        hat: HatId,
        motor: MotorId,
        steps: u32,
        direction: Direction,
    ) -> Result<()> {
        log::info!(
            "rotate: hat {} motor {} steps {} direction {}",
            hat,
            motor,
            steps,
            direction
        );

        let mut result = Ok(());
        for _ in 0..steps {
            if let Err(e) = self.bank.step(hat, motor, direction) {
                result = Err(e);
                break;
            }
            thread::sleep(self.step_interval);
        }

        // Always de-energize the coils, even after a failed step
        let released = self.bank.release(hat, motor);
        result.and(released)
    }
}

/// Run the executor loop until the interrupt flag clears.
///
/// A blocking read with timeout stands in for the naive "any bytes waiting?"
/// poll: a timed-out read just means no command arrived yet. Read errors are
/// logged and the loop keeps serving.
pub fn run<B: MotorBank>(
    connection: &mut SerialConnection,
    executor: &mut Executor<B>,
    log_file: Option<&str>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut log_writer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path))?;
            println!("{} Logging to: {}", "[LOG]".cyan().bold(), path.white());
            Some(BufWriter::new(file))
        }
        None => None,
    };

    println!(
        "{} Serving on {} at {} baud",
        "[OK]".green().bold(),
        connection.config().port_path.white().bold(),
        connection.config().baud_rate
    );
    println!("{}", "Press Ctrl+C to stop".yellow());

    while running.load(Ordering::SeqCst) {
        let line = match connection.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                log::error!("read error: {}", e);
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        };

        log::debug!("<- {}", line);
        let reply = executor.dispatch(&line);
        if let Err(e) = connection.write_line(&reply.to_string()) {
            log::error!("write error: {}", e);
            continue;
        }
        log::debug!("-> {}", reply);

        record_exchange(&mut log_writer, &line, &reply);
    }

    println!("\n{}", "Executor stopped".yellow());
    Ok(())
}

/// Append one exchange to the traffic log. A write failure disables the log
/// rather than terminating the serve loop.
fn record_exchange<W: Write>(log_writer: &mut Option<W>, line: &str, reply: &Reply) {
    if let Some(mut writer) = log_writer.take() {
        match log_traffic(&mut writer, line, reply) {
            Ok(()) => *log_writer = Some(writer),
            Err(e) => log::error!("traffic log write failed, disabling log: {}", e),
        }
    }
}

fn log_traffic<W: Write>(writer: &mut W, line: &str, reply: &Reply) -> io::Result<()> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    writeln!(writer, "[{}] <- {}", timestamp, line)?;
    writeln!(writer, "[{}] -> {}", timestamp, reply)?;
    writer.flush()
}
