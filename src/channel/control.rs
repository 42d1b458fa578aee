//! The controller side of the bridge.

use std::{io, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{read_with_timeout, NonBlockingRead, ReadOutcome};
use crate::{
    command::FRAME_LEN,
    config::Framing,
    error::{is_disconnect_kind, Error},
};

/// The connection to the remote test controller.
///
/// Under fixed framing, bytes of a frame that has not fully arrived yet are kept
/// until the rest shows up, whichever read asked for them.
#[derive(Debug)]
pub struct ControlChannel<C> {
    stream: C,
    framing: Framing,
    pending: Vec<u8>,
}

fn closed_to_outcome(result: io::Result<ReadOutcome>) -> Result<ReadOutcome, Error> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if is_disconnect_kind(e.kind()) => {
            debug!(?e, "Controller connection dropped");
            Ok(ReadOutcome::Closed)
        }
        Err(e) => Err(e.into()),
    }
}

impl<C> ControlChannel<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted controller connection.
    pub fn new(stream: C, framing: Framing) -> Self {
        Self {
            stream,
            framing,
            pending: Vec::with_capacity(FRAME_LEN),
        }
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < FRAME_LEN {
            return None;
        }

        let rest = self.pending.split_off(FRAME_LEN);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    fn missing(&self) -> usize {
        match self.framing {
            Framing::Fixed => FRAME_LEN - self.pending.len(),
            Framing::Segment => FRAME_LEN,
        }
    }

    /// Wait for the next command frame.
    ///
    /// This is the only read which waits indefinitely.
    /// `None` means the controller went away.
    ///
    /// Cancel safe: bytes of a partly read frame stay buffered.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            let mut buf = vec![0; self.missing()];
            let len = self.stream.read(&mut buf).await?;

            if len == 0 {
                if !self.pending.is_empty() {
                    warn!(
                        filled = self.pending.len(),
                        "Controller left in the middle of a frame"
                    );
                }
                return Ok(None);
            }

            if self.framing == Framing::Segment {
                buf.truncate(len);
                return Ok(Some(buf));
            }

            self.pending.extend_from_slice(&buf[..len]);
        }
    }

    /// Wait at most `timeout` for a whole command frame.
    ///
    /// A frame which is only partly there yields [`ReadOutcome::Nothing`],
    /// its bytes are kept for the next call.
    pub async fn poll_frame(&mut self, timeout: Duration) -> Result<ReadOutcome, Error> {
        if let Some(frame) = self.take_frame() {
            return Ok(ReadOutcome::Bytes(frame));
        }

        let missing = self.missing();
        let outcome =
            closed_to_outcome(read_with_timeout(&mut self.stream, missing, timeout).await)?;

        match (outcome, self.framing) {
            (ReadOutcome::Bytes(bytes), Framing::Segment) => Ok(ReadOutcome::Bytes(bytes)),
            (ReadOutcome::Bytes(bytes), Framing::Fixed) => {
                self.pending.extend_from_slice(&bytes);
                Ok(self
                    .take_frame()
                    .map_or(ReadOutcome::Nothing, ReadOutcome::Bytes))
            }
            (outcome, _) => Ok(outcome),
        }
    }

    /// Send a handshake status byte.
    pub async fn send_status(&mut self, status: u8) -> Result<(), Error> {
        self.stream.write_all(&[status]).await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Close both directions of the connection.
    pub async fn release(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(?e, "Controller connection already gone on release");
        }
    }
}

impl<C> NonBlockingRead for ControlChannel<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn read_nonblocking(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ReadOutcome, Error>> {
        async move {
            if !self.pending.is_empty() && max > 0 {
                let rest = self.pending.split_off(max.min(self.pending.len()));
                let buffered = std::mem::replace(&mut self.pending, rest);
                return Ok(ReadOutcome::Bytes(buffered));
            }

            closed_to_outcome(read_with_timeout(&mut self.stream, max, timeout).await)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::pad;

    #[tokio::test]
    async fn fixed_frames_are_reassembled() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);

        let frame = pad(b"_init").unwrap();
        controller.write_all(&frame[..3]).await.unwrap();

        let reader = tokio::spawn(async move { channel.read_frame().await.unwrap() });

        tokio::task::yield_now().await;
        controller.write_all(&frame[3..]).await.unwrap();

        assert_eq!(reader.await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn fixed_frames_do_not_merge() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);

        let mut both = pad(b"one").unwrap();
        both.extend(pad(b"two").unwrap());
        controller.write_all(&both).await.unwrap();

        assert_eq!(channel.read_frame().await.unwrap(), Some(pad(b"one").unwrap()));
        assert_eq!(channel.read_frame().await.unwrap(), Some(pad(b"two").unwrap()));
    }

    #[tokio::test]
    async fn partial_frame_then_close_is_closed() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);

        controller.write_all(b"_in").await.unwrap();
        drop(controller);

        assert_eq!(channel.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn segments_are_taken_as_they_come() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Segment);

        controller.write_all(b"_init").await.unwrap();

        assert_eq!(channel.read_frame().await.unwrap(), Some(b"_init".to_vec()));
    }

    #[tokio::test]
    async fn release_closes_the_connection() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let channel = ControlChannel::new(stream, Framing::Fixed);

        channel.release().await;

        let mut rest = vec![];
        controller.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn split_frame_is_polled_whole() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);
        let frame = pad(b"stop_init").unwrap();

        controller.write_all(&frame[..6]).await.unwrap();
        assert_eq!(
            channel.poll_frame(Duration::from_millis(1)).await.unwrap(),
            ReadOutcome::Nothing
        );

        controller.write_all(&frame[6..]).await.unwrap();
        assert_eq!(
            channel.poll_frame(Duration::from_millis(1)).await.unwrap(),
            ReadOutcome::Bytes(frame)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn partly_polled_frame_is_finished_by_read_frame() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);
        let frame = pad(b"quit").unwrap();

        controller.write_all(&frame[..10]).await.unwrap();
        assert_eq!(
            channel.poll_frame(Duration::from_millis(1)).await.unwrap(),
            ReadOutcome::Nothing
        );

        controller.write_all(&frame[10..]).await.unwrap();
        controller.write_all(&pad(b"uninit").unwrap()).await.unwrap();

        assert_eq!(channel.read_frame().await.unwrap(), Some(frame));
        assert_eq!(channel.read_frame().await.unwrap(), Some(pad(b"uninit").unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn polled_frames_stay_aligned() {
        let (stream, mut controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);

        let mut both = pad(b"hello").unwrap();
        both.extend(pad(b"stop_init").unwrap());
        controller.write_all(&both).await.unwrap();

        assert_eq!(
            channel.poll_frame(Duration::from_millis(1)).await.unwrap(),
            ReadOutcome::Bytes(pad(b"hello").unwrap())
        );
        assert_eq!(
            channel.poll_frame(Duration::from_millis(1)).await.unwrap(),
            ReadOutcome::Bytes(pad(b"stop_init").unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polling_a_closed_controller_is_closed() {
        let (stream, controller) = tokio::io::duplex(64);
        let mut channel = ControlChannel::new(stream, Framing::Fixed);
        drop(controller);

        let outcome = channel
            .read_nonblocking(FRAME_LEN, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(outcome, ReadOutcome::Closed);
    }
}
