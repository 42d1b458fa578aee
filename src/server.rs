use std::net::SocketAddr;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    bridge::{CloseReason, Session},
    config::Config,
    error::Error,
};

async fn run<D>(
    config: &Config,
    device: &mut D,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
{
    config.validate()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    let addr = listener.local_addr()?;

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody is waiting for the allocated port");
        }
    }

    info!("listening on {}", addr);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(?e, "Accept failed");
                continue;
            }
        };

        let reason = Session::new(&mut *device, stream, config)
            .with_shutdown(shutdown.child_token())
            .run()
            .instrument(info_span!("session", %peer))
            .await;

        if matches!(reason, CloseReason::Shutdown) || config.single_session {
            break;
        }
    }

    info!("Server stopped");

    Ok(())
}

/// Serve controllers on an arbitrary available port until `shutdown` is cancelled.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port<D>(
    config: &Config,
    device: &mut D,
    allocated_port: oneshot::Sender<u16>,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
{
    run(config, device, None, Some(allocated_port), shutdown).await
}

/// Serve controllers on the given port until `shutdown` is cancelled.
///
/// Controllers are served one at a time, each getting the device for as long as it stays connected.
pub async fn run_on_port<D>(
    config: &Config,
    device: &mut D,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
{
    run(config, device, Some(port), None, shutdown).await
}
