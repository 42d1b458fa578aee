use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use crate::{
    command::{pad, INIT, QUIT, STOP_INIT, UNINIT},
    error::{is_disconnect_kind, Error},
};

/// The controller side of a session: sends command frames, reads status bytes.
#[derive(Debug)]
pub struct ControllerClient {
    stream: TcpStream,
    cancel_token: String,
}

impl ControllerClient {
    /// Connect to an emulator listening at the given address and port.
    pub async fn connect(address: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((address, port)).await?;
        debug!(address, port, "Connected");

        Ok(Self {
            stream,
            cancel_token: STOP_INIT.into(),
        })
    }

    /// Use another token to cancel handshakes.
    /// Must match the emulator's configured cancel token.
    pub fn with_cancel_token(mut self, token: &str) -> Self {
        self.cancel_token = token.into();
        self
    }

    async fn send_frame(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write_all(&pad(bytes)?).await?;
        Ok(())
    }

    /// Ask for a handshake and wait for its outcome.
    /// `true` if the device acknowledged.
    pub async fn init(&mut self) -> Result<bool, Error> {
        self.start_init().await?;
        self.status().await
    }

    /// Ask for a handshake without waiting for the outcome.
    /// Use [`ControllerClient::status`] to get it.
    pub async fn start_init(&mut self) -> Result<(), Error> {
        self.send_frame(INIT).await
    }

    /// Wait for the status byte of a handshake.
    pub async fn status(&mut self) -> Result<bool, Error> {
        match self.stream.read_u8().await {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(other) => Err(Error::UnexpectedStatus(other)),
            Err(e) if is_disconnect_kind(e.kind()) => Err(Error::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask for a handshake, cancelling it if the device has not acknowledged within `after`.
    /// `true` if the device acknowledged in time.
    pub async fn init_or_cancel(&mut self, after: Duration) -> Result<bool, Error> {
        self.start_init().await?;

        tokio::select! {
            status = self.status() => return status,
            _ = tokio::time::sleep(after) => {}
        }

        debug!(?after, "Device too slow, cancelling handshake");
        self.cancel_init().await?;
        self.status().await
    }

    /// Abort the handshake this client started.
    ///
    /// Frames from other connections are only read once this one is done,
    /// so a handshake can only be cancelled by the controller that asked for it.
    pub async fn cancel_init(&mut self) -> Result<(), Error> {
        let token = self.cancel_token.clone();
        self.send_frame(token.as_bytes()).await
    }

    /// Send `uninit`.
    pub async fn uninit(&mut self) -> Result<(), Error> {
        self.send_frame(UNINIT).await
    }

    /// Forward a payload to the device.
    /// Payloads longer than a frame are rejected.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send_frame(payload).await
    }

    /// End the session.
    pub async fn quit(mut self) -> Result<(), Error> {
        self.send_frame(QUIT).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Read everything the emulator sends until it closes the connection.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let mut rest = vec![];
        self.stream.read_to_end(&mut rest).await?;
        Ok(rest)
    }
}
