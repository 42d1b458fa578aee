//! The device side of the bridge.
//!
//! Whatever is written to a pseudo-terminal master is echoed back to it
//! by the slave's line discipline. Writes therefore always drain that echo,
//! otherwise it would show up as the device's answer to the next read.

use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tracing::{debug, trace};

use super::{read_with_timeout, NonBlockingRead, ReadOutcome};
use crate::error::Error;

/// The emulated hardware's serial interface.
#[derive(Debug)]
pub struct DeviceChannel<D> {
    device: D,
    drain_timeout: Duration,
}

impl<D> DeviceChannel<D>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a device endpoint.
    /// Echoed bytes are waited for at most `drain_timeout` after each write.
    pub fn new(device: D, drain_timeout: Duration) -> Self {
        Self {
            device,
            drain_timeout,
        }
    }

    /// Write `bytes` to the device, then drain its echo.
    ///
    /// At most `bytes.len()` echoed bytes are consumed, and only those
    /// arriving within the drain timeout.
    /// The drained bytes are returned.
    pub async fn write_drain(&mut self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        self.device.write_all(bytes).await?;
        self.device.flush().await?;

        let deadline = Instant::now() + self.drain_timeout;
        let mut drained = Vec::with_capacity(bytes.len());

        while drained.len() < bytes.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match read_with_timeout(&mut self.device, bytes.len() - drained.len(), remaining)
                .await?
            {
                ReadOutcome::Bytes(echo) => drained.extend_from_slice(&echo),
                ReadOutcome::Nothing => break,
                ReadOutcome::Closed => return Err(Error::Disconnected),
            }
        }

        trace!(
            written = ?String::from_utf8_lossy(bytes),
            drained = ?String::from_utf8_lossy(&drained),
            "Wrote to device"
        );

        Ok(drained)
    }

    /// Let go of the device endpoint.
    pub async fn release(mut self) {
        if let Err(e) = self.device.flush().await {
            debug!(?e, "Could not flush device on release");
        }
    }
}

impl<D> NonBlockingRead for DeviceChannel<D>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn read_nonblocking(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ReadOutcome, Error>> {
        async move { Ok(read_with_timeout(&mut self.device, max, timeout).await?) }.boxed()
    }
}
