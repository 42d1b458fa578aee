#![allow(dead_code)]

use std::time::Duration;

use bwt_emulator::{
    client::ControllerClient,
    config::Config,
    error::Error,
    mock::{MockDeviceBuilder, MockDeviceHandle},
    server,
};
use color_eyre::Result;
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running emulator bridged to a mock dongle.
pub struct Emulator {
    pub port: u16,
    pub mock: MockDeviceHandle,
    pub shutdown: CancellationToken,
    pub server: JoinHandle<Result<(), Error>>,
}

impl Emulator {
    pub async fn connect(&self) -> Result<ControllerClient> {
        info!("Connecting to emulator on port {}", self.port);
        Ok(ControllerClient::connect("127.0.0.1", self.port).await?)
    }

    /// Wait for the server to stop by itself.
    pub async fn stopped(self) -> Result<()> {
        timeout(Duration::from_secs(5), self.server).await???;
        Ok(())
    }
}

/// Timings short enough for tests, but long enough for the mock to answer in time.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.handshake.settle_ms = 20;
    config.bridge.forward_settle_ms = 20;
    config
}

pub async fn start(config: Config, mock: MockDeviceBuilder) -> Result<Emulator> {
    let (mut device, mock) = mock.build();
    let (port_tx, port_rx) = oneshot::channel();
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        server::run_any_port(&config, &mut device, port_tx, token).await
    });
    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    Ok(Emulator {
        port,
        mock,
        shutdown,
        server,
    })
}

pub fn single_session(mut config: Config) -> Config {
    config.single_session = true;
    config
}
