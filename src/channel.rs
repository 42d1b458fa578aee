use std::{io, time::Duration};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;

pub mod control;
pub mod device;

pub use control::ControlChannel;
pub use device::DeviceChannel;

/// What a polling read found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Some bytes were available.
    Bytes(Vec<u8>),

    /// Nothing arrived within the timeout.
    /// This is the normal "not yet" case, not an error.
    Nothing,

    /// The endpoint was readable but yielded no bytes: the peer is gone.
    Closed,
}

impl ReadOutcome {
    /// The bytes read, if any.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ReadOutcome::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Endpoints which can be polled for data without blocking indefinitely.
pub trait NonBlockingRead {
    /// Return up to `max` bytes that arrive within `timeout`.
    fn read_nonblocking(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ReadOutcome, Error>>;
}

/// Wait at most `timeout` for `reader` to produce up to `max` bytes.
///
/// Cancel safe as long as the reader's `read` is.
pub(crate) async fn read_with_timeout<R>(
    reader: &mut R,
    max: usize,
    timeout: Duration,
) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if max == 0 {
        return Ok(ReadOutcome::Nothing);
    }

    let mut buf = vec![0; max];

    match tokio::time::timeout(timeout, reader.read(&mut buf)).await {
        Err(_elapsed) => Ok(ReadOutcome::Nothing),
        Ok(Ok(0)) => Ok(ReadOutcome::Closed),
        Ok(Ok(len)) => {
            buf.truncate(len);
            Ok(ReadOutcome::Bytes(buf))
        }
        Ok(Err(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    use super::*;

    const WAIT: Duration = Duration::from_millis(5);

    #[tokio::test(start_paused = true)]
    async fn nothing_available_is_not_an_error() {
        let (mut ours, _theirs) = tokio::io::duplex(64);

        let outcome = read_with_timeout(&mut ours, 4, WAIT).await.unwrap();

        assert_eq!(outcome, ReadOutcome::Nothing);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_at_most_max() {
        let (mut ours, mut theirs) = tokio::io::duplex(64);
        theirs.write_all(b"abcdef").await.unwrap();

        let first = read_with_timeout(&mut ours, 4, WAIT).await.unwrap();
        let rest = read_with_timeout(&mut ours, 4, WAIT).await.unwrap();

        assert_eq!(first, ReadOutcome::Bytes(b"abcd".to_vec()));
        assert_eq!(rest, ReadOutcome::Bytes(b"ef".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_peer_is_closed() {
        let (mut ours, theirs) = tokio::io::duplex(64);
        drop(theirs);

        let outcome = read_with_timeout(&mut ours, 4, WAIT).await.unwrap();

        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_data_is_read_before_closure() {
        let (mut ours, mut theirs) = tokio::io::duplex(64);
        theirs.write_all(b"x").await.unwrap();
        drop(theirs);

        assert_eq!(
            read_with_timeout(&mut ours, 4, WAIT).await.unwrap(),
            ReadOutcome::Bytes(b"x".to_vec())
        );
        assert_eq!(
            read_with_timeout(&mut ours, 4, WAIT).await.unwrap(),
            ReadOutcome::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_reads_nothing() {
        let (mut ours, mut theirs) = tokio::io::duplex(64);
        theirs.write_all(b"x").await.unwrap();

        let outcome = read_with_timeout(&mut ours, 0, WAIT).await.unwrap();

        assert_eq!(outcome, ReadOutcome::Nothing);
    }
}
