//! Serial transport for the bridge.
//!
//! Both sides speak over a single exclusively-owned serial connection:
//! the control side opens the operator-facing port, the executor opens the
//! Pi's UART. This module provides the connection wrapper, line-oriented
//! reads/writes, and port enumeration.

pub mod port;

pub use port::{PortConfig, SerialConnection, DEFAULT_BAUD};
