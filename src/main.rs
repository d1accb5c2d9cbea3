//! stepper-bridge
//!
//! A two-sided serial bridge for manual stepper-motor control: the control
//! side runs an interactive prompt and sends `ROTATE` commands over a serial
//! line; the serve side interprets them and drives stepper motors through two
//! PCA9685-based driver HATs.
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! stepper-bridge ports
//!
//! # Interactive control prompt (host side)
//! stepper-bridge control -p /dev/ttyACM0
//!
//! # Command executor (device side, needs --features hardware for real motors)
//! stepper-bridge serve -p /dev/serial0
//!
//! # Executor without hardware, logging actuations instead
//! stepper-bridge serve --simulate -v
//! ```

mod control;
mod executor;
mod motors;
mod protocol;
mod serial;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use control::MotorController;
use executor::Executor;
use motors::{MotorBank, SimulatedBank};
use serial::port::{default_control_port, default_serve_port};
use serial::{PortConfig, SerialConnection, DEFAULT_BAUD};

/// Two-sided serial bridge for manual stepper-motor control
#[derive(Parser)]
#[command(name = "stepper-bridge")]
#[command(version)]
#[command(about = "Manual stepper-motor control over a serial line")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive command prompt (host side)
    Control {
        /// Serial port path (default: COM3 on Windows, /dev/ttyACM0 elsewhere)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long, default_value_t = DEFAULT_BAUD)]
        baud: u32,

        /// Reply timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Command executor loop (device side)
    Serve(ServeArgs),

    /// List available serial ports
    Ports,
}

#[derive(Args)]
struct ServeArgs {
    /// Serial port path (default: /dev/serial0)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Log motor actuations instead of driving hardware
    #[arg(long)]
    simulate: bool,

    /// Log command/reply traffic to a file
    #[arg(short, long)]
    log: Option<String>,

    /// I2C bus device the motor HATs are on
    #[cfg(feature = "hardware")]
    #[arg(long, default_value = motors::hat::DEFAULT_I2C_BUS)]
    i2c_bus: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Control {
            port,
            baud,
            timeout_ms,
        } => handle_control(port, baud, timeout_ms),
        Commands::Serve(args) => handle_serve(args),
        Commands::Ports => serial::port::print_ports(),
    }
}

/// Install the interrupt handler both loops poll to know when to stop.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

fn handle_control(port: Option<String>, baud: u32, timeout_ms: u64) -> Result<()> {
    let running = interrupt_flag()?;

    let path = port.unwrap_or_else(|| default_control_port().to_string());
    let config = PortConfig::new(&path)
        .with_baud_rate(baud)
        .with_timeout(Duration::from_millis(timeout_ms));

    let controller = MotorController::connect(config)?;
    control::run_prompt(controller, running)
}

fn handle_serve(args: ServeArgs) -> Result<()> {
    let running = interrupt_flag()?;

    let path = args
        .port
        .clone()
        .unwrap_or_else(|| default_serve_port().to_string());
    let config = PortConfig::new(&path)
        .with_baud_rate(args.baud)
        .with_timeout(Duration::from_millis(200));
    let mut connection = SerialConnection::open(config)?;

    if args.simulate {
        let mut exec = Executor::new(SimulatedBank::default());
        executor::run(&mut connection, &mut exec, args.log.as_deref(), running)
    } else {
        let mut exec = Executor::new(open_hardware_bank(&args)?);
        executor::run(&mut connection, &mut exec, args.log.as_deref(), running)
    }
}

#[cfg(feature = "hardware")]
fn open_hardware_bank(args: &ServeArgs) -> Result<Box<dyn MotorBank>> {
    let bank = motors::hat::HatBank::open(&args.i2c_bus)?;
    log::info!("motor HATs initialized on {}", args.i2c_bus);
    Ok(Box::new(bank))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware_bank(_args: &ServeArgs) -> Result<Box<dyn MotorBank>> {
    anyhow::bail!(
        "this build has no motor HAT backend; run with --simulate \
         or rebuild with --features hardware"
    )
}
