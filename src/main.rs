use bwt_emulator::{cli, config::Config, device::VirtualDeviceBuilder, logging, server};
use clap::Parser;
use color_eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(cli.log_level, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    let mut config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    config.single_session |= cli.once;
    config.validate()?;

    let mut device = VirtualDeviceBuilder::from_config(&config.device).build()?;
    info!(link = ?device.link(), "Tutor software can now open the device");

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let shutdown = CancellationToken::new();

    let signalled = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C, quitting"),
            _ = hangup.recv() => info!("Told to hang up, quitting"),
            _ = terminate.recv() => info!("Terminated, quitting"),
        }
    };

    let result = {
        let server =
            server::run_on_port(&config, device.endpoint(), config.port, shutdown.clone());
        tokio::pin!(server);

        tokio::select! {
            _ = signalled => {
                shutdown.cancel();
                server.await
            }
            result = &mut server => result,
        }
    };

    if let Err(e) = &result {
        error!(%e, "Server stopped");
    }

    drop(device);
    logging::shutdown();

    Ok(result?)
}
