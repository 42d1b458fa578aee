use std::fmt::Display;

use crate::error::Error;

/// The size of every command frame sent by a controller.
pub const FRAME_LEN: usize = 16;

/// Starts the device initialization handshake.
pub const INIT: &[u8] = b"_init";

/// Ends the controller session.
pub const QUIT: &[u8] = b"quit";

/// De-initializes the device. Currently does nothing.
pub const UNINIT: &[u8] = b"uninit";

/// The default token a controller sends to abort a running handshake.
pub const STOP_INIT: &str = "stop_init";

/// A command read from the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the handshake and reply with a status byte.
    Init,

    /// Close the session without replying.
    Quit,

    /// Accepted and ignored.
    Uninit,

    /// Anything else. Forwarded to the device verbatim.
    Payload(Vec<u8>),
}

/// Strip the zero padding a frame was filled up with.
pub fn trim_padding(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|&byte| byte != 0)
        .map_or(0, |last| last + 1);

    &frame[..end]
}

/// Pad `bytes` with zeroes up to a full frame.
pub fn pad(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    if bytes.len() > FRAME_LEN {
        return Err(Error::FrameTooLong(bytes.len()));
    }

    let mut frame = bytes.to_vec();
    frame.resize(FRAME_LEN, 0);

    Ok(frame)
}

impl Command {
    /// Interpret a frame as received from a controller.
    ///
    /// Control words are matched after stripping padding.
    /// Payloads keep the frame exactly as it arrived, padding included.
    pub fn parse(frame: &[u8]) -> Self {
        match trim_padding(frame) {
            INIT => Self::Init,
            QUIT => Self::Quit,
            UNINIT => Self::Uninit,
            _ => Self::Payload(frame.to_vec()),
        }
    }

    /// The padded frame a controller sends for this command.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Init => pad(INIT),
            Self::Quit => pad(QUIT),
            Self::Uninit => pad(UNINIT),
            Self::Payload(payload) => pad(payload),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Init => write!(f, "init"),
            Command::Quit => write!(f, "quit"),
            Command::Uninit => write!(f, "uninit"),
            Command::Payload(payload) => {
                write!(f, "payload {:?}", String::from_utf8_lossy(trim_padding(payload)))
            }
        }
    }
}
