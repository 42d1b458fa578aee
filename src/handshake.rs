//! The dongle's initialization handshake.
//!
//! The device is probed until it answers with the acknowledgement marker.
//! Answers are accumulated across rounds, since the marker may arrive
//! split, late, or mixed with echoed probes.

use std::fmt::Display;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::{
    channel::{ControlChannel, DeviceChannel, NonBlockingRead, ReadOutcome},
    command::trim_padding,
    config::HandshakeConfig,
    error::Error,
};

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The device answered with the marker.
    Acknowledged,

    /// The controller asked to stop.
    Cancelled,

    /// The configured number of rounds passed without an answer.
    TimedOut,
}

impl HandshakeOutcome {
    /// The byte reported to the controller.
    pub fn status_byte(self) -> u8 {
        match self {
            HandshakeOutcome::Acknowledged => 1,
            HandshakeOutcome::Cancelled | HandshakeOutcome::TimedOut => 0,
        }
    }
}

impl Display for HandshakeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeOutcome::Acknowledged => write!(f, "acknowledged"),
            HandshakeOutcome::Cancelled => write!(f, "cancelled"),
            HandshakeOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// How the accumulated answer matched the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerMatch {
    /// The whole marker is in there.
    Full,

    /// Only some byte of the marker showed up.
    /// Happens when a drained echo swallowed the rest.
    Partial,
}

/// A single handshake, created when a controller asks for initialization.
#[derive(Debug)]
pub struct Handshake<'a> {
    settings: &'a HandshakeConfig,
    response: BytesMut,
    rounds: u32,
}

impl<'a> Handshake<'a> {
    /// A fresh handshake with nothing heard from the device yet.
    pub fn new(settings: &'a HandshakeConfig) -> Self {
        Self {
            settings,
            response: BytesMut::new(),
            rounds: 0,
        }
    }

    /// Everything the device answered so far.
    pub fn response(&self) -> &[u8] {
        &self.response
    }

    /// How many probe rounds have been done.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Add device output to the accumulated answer.
    pub fn absorb(&mut self, bytes: &[u8]) {
        self.response.extend_from_slice(bytes);
    }

    /// Look for the marker in the accumulated answer.
    pub fn inspect(&self) -> Option<MarkerMatch> {
        let marker = self.settings.marker.as_bytes();

        if self
            .response
            .windows(marker.len())
            .any(|window| window == marker)
        {
            return Some(MarkerMatch::Full);
        }

        if self.settings.accept_partial_marker
            && self.response.iter().any(|byte| marker.contains(byte))
        {
            return Some(MarkerMatch::Partial);
        }

        None
    }

    fn is_cancel(&self, bytes: &[u8]) -> bool {
        self.settings
            .cancel_token
            .as_ref()
            .map_or(false, |token| trim_padding(bytes) == token.as_bytes())
    }

    /// Probe `device` until it acknowledges.
    ///
    /// If a cancel token is configured, `control` is polled for it before every probe.
    /// Only whole frames are compared with the token.
    pub async fn run<D, C>(
        mut self,
        device: &mut DeviceChannel<D>,
        control: &mut ControlChannel<C>,
    ) -> Result<HandshakeOutcome, Error>
    where
        D: AsyncRead + AsyncWrite + Unpin + Send,
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let poll_timeout = self.settings.poll_timeout();

        loop {
            if let Some(max_rounds) = self.settings.max_rounds {
                if self.rounds >= max_rounds {
                    warn!(rounds = self.rounds, "Device never acknowledged");
                    return Ok(HandshakeOutcome::TimedOut);
                }
            }

            if self.settings.cancel_token.is_some() {
                match control.poll_frame(poll_timeout).await? {
                    ReadOutcome::Bytes(bytes) if self.is_cancel(&bytes) => {
                        info!(rounds = self.rounds, "Handshake cancelled by controller");
                        return Ok(HandshakeOutcome::Cancelled);
                    }
                    ReadOutcome::Bytes(bytes) => {
                        warn!(?bytes, "Ignoring controller input during handshake")
                    }
                    ReadOutcome::Nothing => {}
                    ReadOutcome::Closed => return Err(Error::Disconnected),
                }
            }

            device.write_drain(self.settings.probe.as_bytes()).await?;
            tokio::time::sleep(self.settings.settle()).await;

            match device
                .read_nonblocking(self.settings.read_len, poll_timeout)
                .await?
            {
                ReadOutcome::Bytes(bytes) => {
                    debug!(response = ?String::from_utf8_lossy(&bytes), "Device answered");
                    self.absorb(&bytes);
                }
                ReadOutcome::Nothing => {}
                ReadOutcome::Closed => return Err(Error::Disconnected),
            }

            self.rounds += 1;

            if let Some(found) = self.inspect() {
                if found == MarkerMatch::Partial {
                    debug!(
                        response = ?String::from_utf8_lossy(&self.response),
                        "Accepting partial marker"
                    );
                }

                device.write_drain(self.settings.marker.as_bytes()).await?;
                info!(rounds = self.rounds, "Handshake acknowledged");

                return Ok(HandshakeOutcome::Acknowledged);
            }
        }
    }
}
