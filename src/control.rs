//! Host-side command sender.
//!
//! Presents an interactive prompt, validates operator input locally, and
//! performs one request/reply exchange per accepted command. Bad parameters
//! never touch the transport.

use anyhow::Result;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{Command, Direction, HatId, MotorId, Reply};
use crate::serial::{PortConfig, SerialConnection};

/// Why a request/reply exchange failed.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    /// The device produced no reply line within the read timeout. Kept
    /// distinct from an empty reply so the operator can tell the difference.
    #[error("no reply from device before timeout")]
    Timeout,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Owns the single serial session to the executor.
pub struct MotorController {
    connection: Option<SerialConnection>,
}

impl MotorController {
    /// Open the serial session. A failure here is terminal: the caller
    /// reports it once and exits without retrying.
    pub fn connect(config: PortConfig) -> Result<Self> {
        let mut connection = SerialConnection::open(config)?;
        // Drop any stale bytes from a previous session
        connection.clear_buffers()?;

        println!(
            "{} Connected to {} at {} baud",
            "[OK]".green().bold(),
            connection.config().port_path.white().bold(),
            connection.config().baud_rate
        );

        Ok(Self {
            connection: Some(connection),
        })
    }

    /// Send one rotate command and block for its reply line, bounded by the
    /// connection's read timeout.
    pub fn rotate(&mut self, command: &Command) -> Result<String, SendError> {
        let connection = self.connection.as_mut().ok_or(SendError::NotConnected)?;

        // Discard any late reply left over from a timed-out exchange
        connection.clear_buffers()?;
        connection.write_line(&command.encode())?;
        match connection.read_line()? {
            Some(reply) => Ok(reply),
            None => Err(SendError::Timeout),
        }
    }

    /// Release the transport. Safe to call more than once, or if the
    /// connection was never opened.
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            log::debug!("serial connection closed");
        }
    }

    #[cfg(test)]
    fn disconnected() -> Self {
        Self { connection: None }
    }

    #[cfg(test)]
    fn with_connection(connection: SerialConnection) -> Self {
        Self {
            connection: Some(connection),
        }
    }
}

impl Drop for MotorController {
    fn drop(&mut self) {
        self.close();
    }
}

/// What one line of prompt input asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum PromptLine {
    Empty,
    Quit,
    Rotate(Command),
    /// Rejected locally; the message explains what was wrong.
    Invalid(String),
}

/// Parse a prompt line. The input is expected to be trimmed and lowercased
/// already, matching how the prompt loop reads it.
pub fn parse_prompt_line(line: &str) -> PromptLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.as_slice() {
        [] => PromptLine::Empty,
        ["quit"] => PromptLine::Quit,
        ["rotate", hat, motor, steps, direction] => {
            let (hat_id, motor_id) = match (
                hat.parse::<u8>().ok().and_then(HatId::from_number),
                motor.parse::<u8>().ok().and_then(MotorId::from_number),
            ) {
                (Some(h), Some(m)) => (h, m),
                _ => {
                    return PromptLine::Invalid(
                        "Invalid hat_id or motor_id. Must be 1 or 2.".to_string(),
                    )
                }
            };

            let steps = match steps.parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    return PromptLine::Invalid(
                        "Invalid step count. Must be a non-negative integer.".to_string(),
                    )
                }
            };

            let direction = match Direction::parse(direction) {
                Some(d) => d,
                None => {
                    return PromptLine::Invalid(
                        "Invalid direction. Must be 'cw' or 'ccw'.".to_string(),
                    )
                }
            };

            PromptLine::Rotate(Command::Rotate {
                hat: hat_id,
                motor: motor_id,
                steps,
                direction,
            })
        }
        _ => PromptLine::Invalid(
            "Invalid command. Use 'rotate <hat_id> <motor_id> <steps> <direction>' or 'quit'"
                .to_string(),
        ),
    }
}

fn print_banner() {
    println!("\n{}", "Stepper Motor Control".cyan().bold());
    println!("{}", "-".repeat(21));
    println!("Commands:");
    println!("rotate <hat_id> <motor_id> <steps> <direction>");
    println!("  hat_id: 1 or 2");
    println!("  motor_id: 1 or 2");
    println!("  steps: number of steps");
    println!("  direction: cw (clockwise) or ccw (counter-clockwise)");
    println!("quit - Exit program");
}

/// How often the prompt loop wakes up to poll the interrupt flag while
/// waiting for input.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the interactive prompt until `quit`, end of input, or interrupt.
/// Teardown happens exactly once on every exit path.
pub fn run_prompt(controller: MotorController, running: Arc<AtomicBool>) -> Result<()> {
    prompt_loop(controller, running, spawn_stdin_reader())
}

/// Feed stdin lines through a channel so the prompt loop can wait on input
/// without blocking the thread that observes the interrupt flag.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt_loop(
    mut controller: MotorController,
    running: Arc<AtomicBool>,
    lines: mpsc::Receiver<String>,
) -> Result<()> {
    print_banner();
    let mut show_prompt = true;

    while running.load(Ordering::SeqCst) {
        if show_prompt {
            print!("\nEnter command: ");
            io::stdout().flush()?;
            show_prompt = false;
        }

        // Bounded wait, so Ctrl+C takes effect even while the prompt is idle
        let line = match lines.recv_timeout(INPUT_POLL_INTERVAL) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break, // end of input
        };
        show_prompt = true;

        let line = line.trim().to_lowercase();
        match parse_prompt_line(&line) {
            PromptLine::Empty => continue,
            PromptLine::Quit => break,
            PromptLine::Invalid(message) => println!("{}", message.yellow()),
            PromptLine::Rotate(command) => match controller.rotate(&command) {
                Ok(reply) => print_reply(&reply),
                Err(e) => println!("{} {}", "[ERROR]".red().bold(), e),
            },
        }
    }

    println!("\n{}", "Exiting...".yellow());
    controller.close();
    Ok(())
}

/// Print the device's reply verbatim, colored by its classification.
fn print_reply(reply: &str) {
    let colored_reply = match Reply::parse(reply) {
        Some(Reply::Ok) => reply.green().to_string(),
        Some(Reply::Invalid) | Some(Reply::Error(_)) => reply.red().to_string(),
        None => reply.to_string(),
    };
    println!("Response: {}", colored_reply);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotate() {
        assert_eq!(
            parse_prompt_line("rotate 1 2 100 cw"),
            PromptLine::Rotate(Command::Rotate {
                hat: HatId::Hat1,
                motor: MotorId::Motor2,
                steps: 100,
                direction: Direction::Cw,
            })
        );
    }

    #[test]
    fn test_parse_quit_and_empty() {
        assert_eq!(parse_prompt_line("quit"), PromptLine::Quit);
        assert_eq!(parse_prompt_line(""), PromptLine::Empty);
        assert_eq!(parse_prompt_line("   "), PromptLine::Empty);
    }

    #[test]
    fn test_out_of_range_hat_rejected_locally() {
        // No transport involved: validation happens before any encoding
        assert_eq!(
            parse_prompt_line("rotate 3 1 10 cw"),
            PromptLine::Invalid("Invalid hat_id or motor_id. Must be 1 or 2.".to_string())
        );
    }

    #[test]
    fn test_bad_direction_rejected_locally() {
        assert_eq!(
            parse_prompt_line("rotate 1 1 10 up"),
            PromptLine::Invalid("Invalid direction. Must be 'cw' or 'ccw'.".to_string())
        );
    }

    #[test]
    fn test_negative_steps_rejected_locally() {
        assert!(matches!(
            parse_prompt_line("rotate 1 1 -5 cw"),
            PromptLine::Invalid(_)
        ));
    }

    #[test]
    fn test_wrong_token_count_gets_usage() {
        assert!(matches!(
            parse_prompt_line("rotate 1 1 10"),
            PromptLine::Invalid(_)
        ));
        assert!(matches!(
            parse_prompt_line("spin fast"),
            PromptLine::Invalid(_)
        ));
    }

    #[test]
    fn test_interrupt_flag_stops_prompt_loop() {
        let (_tx, rx) = mpsc::channel::<String>();
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });

        // Returns without any input having arrived
        prompt_loop(MotorController::disconnected(), running, rx).unwrap();
        stopper.join().unwrap();
    }

    #[test]
    fn test_quit_stops_prompt_loop() {
        let (tx, rx) = mpsc::channel();
        tx.send("quit".to_string()).unwrap();

        // The sender stays alive, so only `quit` can end the loop
        let running = Arc::new(AtomicBool::new(true));
        prompt_loop(MotorController::disconnected(), running, rx).unwrap();
        drop(tx);
    }

    #[test]
    fn test_end_of_input_stops_prompt_loop() {
        let (tx, rx) = mpsc::channel::<String>();
        drop(tx);

        let running = Arc::new(AtomicBool::new(true));
        prompt_loop(MotorController::disconnected(), running, rx).unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut controller = MotorController::disconnected();
        controller.close();
        controller.close();
        assert!(matches!(
            controller.rotate(&Command::Rotate {
                hat: HatId::Hat1,
                motor: MotorId::Motor1,
                steps: 1,
                direction: Direction::Cw,
            }),
            Err(SendError::NotConnected)
        ));
    }

    #[cfg(unix)]
    mod pty {
        use super::*;
        use crate::serial::PortConfig;
        use serialport::{SerialPort, TTYPort};
        use std::io::{Read, Write as _};

        fn pty_controller(timeout: Duration) -> (MotorController, TTYPort) {
            let (mut master, slave) = TTYPort::pair().unwrap();
            master.set_timeout(Duration::from_secs(2)).unwrap();
            let config = PortConfig::new("pty").with_timeout(timeout);
            let connection = SerialConnection::from_port(Box::new(slave), config).unwrap();
            (MotorController::with_connection(connection), master)
        }

        fn read_request(master: &mut TTYPort) -> String {
            let mut buffer = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                master.read_exact(&mut byte).unwrap();
                if byte[0] == b'\n' {
                    break;
                }
                buffer.push(byte[0]);
            }
            String::from_utf8(buffer).unwrap()
        }

        #[test]
        fn test_stale_reply_discarded_before_next_exchange() {
            let (mut controller, mut master) = pty_controller(Duration::from_millis(500));

            // A reply that arrived after its own exchange had timed out
            master.write_all(b"Invalid command\n").unwrap();
            thread::sleep(Duration::from_millis(50));

            let responder = thread::spawn(move || {
                let request = read_request(&mut master);
                master.write_all(b"OK\n").unwrap();
                request
            });

            let command = Command::Rotate {
                hat: HatId::Hat1,
                motor: MotorId::Motor1,
                steps: 5,
                direction: Direction::Cw,
            };
            let reply = controller.rotate(&command).unwrap();

            assert_eq!(reply, "OK");
            assert_eq!(responder.join().unwrap(), "ROTATE,1,1,5,cw");
        }

        #[test]
        fn test_no_reply_surfaces_as_timeout() {
            let (mut controller, _master) = pty_controller(Duration::from_millis(100));

            let command = Command::Rotate {
                hat: HatId::Hat2,
                motor: MotorId::Motor2,
                steps: 1,
                direction: Direction::Ccw,
            };
            assert!(matches!(
                controller.rotate(&command),
                Err(SendError::Timeout)
            ));
        }
    }
}
