#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Command frames sent by a controller.
pub mod command;

/// The two endpoints a session talks to, and reading them without blocking.
pub mod channel;

/// The initialization handshake with the dongle.
pub mod handshake;

/// A controller session: waits for commands and dispatches them.
pub mod bridge;

/// The pseudo-terminal the tutor software opens.
pub mod device;

/// Code relating to setting up the server which accepts controllers one at a time.
pub mod server;

/// The controller side of the protocol.
pub mod client;

/// The command line interface.
pub mod cli;

/// Mocked dongle.
pub mod mock;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
