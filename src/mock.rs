//! A mock dongle, useful to test the emulator without a pseudo-terminal.
//!
//! The mock sits on the far end of an in-memory duplex stream.
//! By default it behaves like a pseudo-terminal master does:
//! everything written to it is looped back.
//! On top of that it can be told to answer probes with an acknowledgement.

use std::fmt::Display;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Something that happened on the mock's wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// The emulator wrote these bytes to the mock.
    Received(Vec<u8>),

    /// The mock wrote these bytes back to the emulator.
    Sent(Vec<u8>),
}

impl MockEvent {
    /// Get the received bytes.
    /// Panics if not a received event.
    pub fn into_received(self) -> Vec<u8> {
        match self {
            MockEvent::Received(bytes) => bytes,
            MockEvent::Sent(_) => panic!("Expected a received event, got {self}"),
        }
    }

    /// Get the sent bytes.
    /// Panics if not a sent event.
    pub fn into_sent(self) -> Vec<u8> {
        match self {
            MockEvent::Sent(bytes) => bytes,
            MockEvent::Received(_) => panic!("Expected a sent event, got {self}"),
        }
    }
}

impl Display for MockEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockEvent::Received(bytes) => {
                write!(f, "received {:?}", String::from_utf8_lossy(bytes))
            }
            MockEvent::Sent(bytes) => write!(f, "sent {:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Builder for a mock dongle.
#[derive(Debug)]
pub struct MockDeviceBuilder {
    name: String,
    echo: bool,
    probe: u8,
    acknowledge_after: Option<usize>,
    acknowledgement: Vec<u8>,
}

impl MockDeviceBuilder {
    /// Start a new builder.
    /// The name only shows up in logs.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            echo: true,
            probe: b'n',
            acknowledge_after: None,
            acknowledgement: b"bt".to_vec(),
        }
    }

    /// Whether written bytes are looped back. Defaults to `true`.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// The byte counted as a probe. Defaults to `n`.
    pub fn probe(mut self, probe: u8) -> Self {
        self.probe = probe;
        self
    }

    /// Answer with the acknowledgement once this many probes have arrived.
    /// The count starts over after each acknowledgement.
    /// Without this the mock never acknowledges.
    pub fn acknowledge_after(mut self, probes: usize) -> Self {
        self.acknowledge_after = Some(probes);
        self
    }

    /// The bytes sent as acknowledgement. Defaults to `bt`.
    pub fn acknowledgement(mut self, bytes: &[u8]) -> Self {
        self.acknowledgement = bytes.to_vec();
        self
    }

    /// Start the mock.
    /// Returns the stream the emulator should use as its device endpoint.
    #[must_use]
    pub fn build(self) -> (DuplexStream, MockDeviceHandle) {
        info!(%self.name, "Running mock device");

        let (emulator_side, mut mock_side) = tokio::io::duplex(1024);

        // Outsiders will be getting observing events from this broadcast.
        let (broadcast_sender, _) = broadcast::channel(1024);
        let events = broadcast_sender.clone();

        let span = info_span!("mock", name = %self.name);

        let handle = tokio::spawn(
            async move {
                let mut buf = [0; 256];
                let mut probes = 0;

                loop {
                    let len = match mock_side.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(len) => len,
                        Err(e) => {
                            warn!(?e, "Mock read error");
                            break;
                        }
                    };
                    let received = buf[..len].to_vec();

                    trace!(?received, "Mock received");
                    probes += received.iter().filter(|&&byte| byte == self.probe).count();
                    let _ = events.send(MockEvent::Received(received.clone()));

                    let mut reply = vec![];

                    if self.echo {
                        reply.extend_from_slice(&received);
                    }

                    if let Some(after) = self.acknowledge_after {
                        if probes >= after {
                            debug!(probes, "Mock acknowledging");
                            probes = 0;
                            reply.extend_from_slice(&self.acknowledgement);
                        }
                    }

                    if reply.is_empty() {
                        continue;
                    }

                    if let Err(e) = mock_side.write_all(&reply).await {
                        warn!(?e, "Mock write error");
                        break;
                    }
                    let _ = events.send(MockEvent::Sent(reply));
                }

                debug!("Mock device stopped");
            }
            .instrument(span),
        );

        (
            emulator_side,
            MockDeviceHandle {
                broadcast_sender,
                handle,
            },
        )
    }
}

/// Observes a running mock dongle.
#[derive(Debug)]
pub struct MockDeviceHandle {
    // Used for giving out receivers (via subscribe)
    broadcast_sender: broadcast::Sender<MockEvent>,

    handle: JoinHandle<()>,
}

impl MockDeviceHandle {
    /// Subscribe to what happens on the mock's wire from now on.
    pub fn events(&self) -> broadcast::Receiver<MockEvent> {
        self.broadcast_sender.subscribe()
    }

    /// Whether the mock stopped, i.e. the emulator side was dropped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for MockDeviceHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Collect every byte the emulator wrote to the mock that is already on the broadcast.
pub fn collect_received(events: &mut broadcast::Receiver<MockEvent>) -> Vec<u8> {
    let mut received = vec![];

    while let Ok(event) = events.try_recv() {
        if let MockEvent::Received(bytes) = event {
            received.extend(bytes);
        }
    }

    received
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    async fn read_some(stream: &mut DuplexStream) -> Vec<u8> {
        let mut buf = [0; 64];
        let len = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();

        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn loopback() {
        let (mut stream, mock) = MockDeviceBuilder::new("loopback").build();
        let mut events = mock.events();

        stream.write_all(b"Hi").await.unwrap();

        assert_eq!(read_some(&mut stream).await, b"Hi");
        assert_eq!(events.recv().await.unwrap().into_received(), b"Hi");
        assert_eq!(events.recv().await.unwrap().into_sent(), b"Hi");
    }

    #[tokio::test]
    async fn acknowledges_after_probes() {
        let (mut stream, _mock) = MockDeviceBuilder::new("ack")
            .echo(false)
            .acknowledge_after(2)
            .build();

        stream.write_all(b"n").await.unwrap();
        stream.write_all(b"n").await.unwrap();

        assert_eq!(read_some(&mut stream).await, b"bt");
    }

    #[tokio::test]
    async fn echo_comes_before_acknowledgement() {
        let (mut stream, _mock) = MockDeviceBuilder::new("both")
            .acknowledge_after(1)
            .acknowledgement(b"t")
            .build();

        stream.write_all(b"n").await.unwrap();

        assert_eq!(read_some(&mut stream).await, b"nt");
    }

    #[tokio::test]
    async fn other_bytes_are_not_probes() {
        let (mut stream, mock) = MockDeviceBuilder::new("picky")
            .echo(false)
            .acknowledge_after(1)
            .build();
        let mut events = mock.events();

        stream.write_all(b"xyz").await.unwrap();
        assert_eq!(events.recv().await.unwrap().into_received(), b"xyz");

        let nothing = tokio::time::timeout(Duration::from_millis(20), read_some(&mut stream)).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn stops_when_emulator_side_is_dropped() {
        let (stream, mock) = MockDeviceBuilder::new("dropped").build();

        drop(stream);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(mock.is_finished());
    }
}
