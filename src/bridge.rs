//! The command loop between one controller and the device.
//!
//! A [`Session`] owns both endpoints for as long as the controller is connected.
//! It waits for a command, dispatches it, and goes back to waiting,
//! until the controller quits, goes away, or something breaks.
//! Whichever way it ends, both endpoints are released before [`Session::run`] returns.

use std::fmt::Display;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, Instrument};

use crate::{
    channel::{ControlChannel, DeviceChannel, NonBlockingRead, ReadOutcome},
    command::Command,
    config::Config,
    error::Error,
    handshake::Handshake,
};

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The controller sent `quit`.
    Quit,

    /// The controller (or the device) went away.
    Disconnected,

    /// The emulator is shutting down.
    Shutdown,

    /// Reading or writing an endpoint failed.
    Failed(Error),
}

impl From<Error> for CloseReason {
    fn from(error: Error) -> Self {
        if error.is_disconnect() {
            Self::Disconnected
        } else {
            Self::Failed(error)
        }
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Quit => write!(f, "controller quit"),
            CloseReason::Disconnected => write!(f, "disconnected"),
            CloseReason::Shutdown => write!(f, "shutting down"),
            CloseReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

enum State {
    WaitCommand,
    Closing(CloseReason),
}

/// One controller connected to the device.
pub struct Session<'a, D, C> {
    device: DeviceChannel<D>,
    control: ControlChannel<C>,
    config: &'a Config,
    shutdown: CancellationToken,
}

impl<'a, D, C> Session<'a, D, C>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Set up a session between a device endpoint and a controller connection.
    pub fn new(device: D, control: C, config: &'a Config) -> Self {
        Self {
            device: DeviceChannel::new(device, config.bridge.drain_timeout()),
            control: ControlChannel::new(control, config.bridge.framing),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// End the session (as [`CloseReason::Shutdown`]) when this token is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Serve the controller until the session closes, then release both endpoints.
    pub async fn run(mut self) -> CloseReason {
        let mut state = State::WaitCommand;

        let reason = loop {
            state = match state {
                State::WaitCommand => self.next_command().await,
                State::Closing(reason) => break reason,
            };
        };

        info!(%reason, "Closing session");
        self.release().await;

        reason
    }

    async fn next_command(&mut self) -> State {
        let frame = tokio::select! {
            _ = self.shutdown.cancelled() => return State::Closing(CloseReason::Shutdown),
            frame = self.control.read_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return State::Closing(CloseReason::Disconnected),
            Err(e) => return State::Closing(e.into()),
        };

        let command = Command::parse(&frame);
        debug!(%command, "Command");

        match self.dispatch(command).await {
            Ok(state) => state,
            Err(e) => State::Closing(e.into()),
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<State, Error> {
        match command {
            Command::Init => {
                let handshake = Handshake::new(&self.config.handshake)
                    .run(&mut self.device, &mut self.control)
                    .instrument(debug_span!("handshake"));

                let outcome = tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        return Ok(State::Closing(CloseReason::Shutdown))
                    }
                    outcome = handshake => outcome?,
                };

                info!(%outcome, "Handshake complete");
                self.control.send_status(outcome.status_byte()).await?;
            }
            Command::Quit => return Ok(State::Closing(CloseReason::Quit)),
            Command::Uninit => {
                debug!("Nothing to do for uninit");
            }
            Command::Payload(payload) => self.forward(&payload).await?,
        }

        Ok(State::WaitCommand)
    }

    async fn forward(&mut self, payload: &[u8]) -> Result<(), Error> {
        let bridge = &self.config.bridge;

        self.device.write_drain(payload).await?;
        tokio::time::sleep(bridge.forward_settle()).await;

        match self
            .device
            .read_nonblocking(bridge.response_read_len, bridge.poll_timeout())
            .await?
        {
            ReadOutcome::Bytes(response) => {
                info!(response = ?String::from_utf8_lossy(&response), "Hardware response")
            }
            ReadOutcome::Nothing => {}
            ReadOutcome::Closed => return Err(Error::Disconnected),
        }

        Ok(())
    }

    async fn release(self) {
        self.control.release().await;
        self.device.release().await;
    }
}
