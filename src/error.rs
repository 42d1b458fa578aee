use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    Io(#[from] io::Error),

    /// A system call made while setting up the device node failed.
    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    /// The peer on the other side of an endpoint went away.
    #[error("The peer closed the connection")]
    Disconnected,

    /// The configuration is not valid.
    #[error("The configuration is not valid. Problem: `{0}`")]
    BadConfig(String),

    /// The virtual device node could not be published.
    #[error("Could not provision the virtual device. Problem: `{0}`")]
    Provision(String),

    /// The controller socket could not be bound.
    #[error("Could not listen on {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: SocketAddr,

        /// The underlying problem.
        source: io::Error,
    },

    /// A command does not fit in a single frame.
    #[error("A command of {0} bytes does not fit in a command frame")]
    FrameTooLong(usize),

    /// The emulator answered a handshake with something other than a status byte.
    #[error("Unexpected handshake status byte: {0:#04x}")]
    UnexpectedStatus(u8),
}

impl Error {
    /// Get the problem description if this is a bad configuration error.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }

    /// Whether this error means the other side of an endpoint is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }
}

pub(crate) fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
