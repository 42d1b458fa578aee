use std::time::Duration;

use bwt_emulator::client::ControllerClient;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{info, Level};

/// Drives a running emulator the way a controller would.
/// Sends a single command and exits.
#[derive(Parser, Debug)]
struct Args {
    /// Emulator address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Emulator port.
    #[arg(short, long, default_value_t = bwt_emulator::config::DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the handshake and print whether the device acknowledged.
    Init {
        /// Cancel the handshake if the device has not acknowledged after this many milliseconds.
        #[arg(long)]
        cancel_after: Option<u64>,
    },

    /// Send uninit.
    Uninit,

    /// End the session.
    Quit,

    /// Forward text to the device.
    Send {
        /// At most 16 bytes.
        text: String,
    },
}

async fn run(args: Args) -> Result<()> {
    let mut client = ControllerClient::connect(&args.address, args.port).await?;

    match args.command {
        Command::Init { cancel_after } => {
            let acknowledged = match cancel_after {
                Some(ms) => client.init_or_cancel(Duration::from_millis(ms)).await?,
                None => client.init().await?,
            };
            info!(acknowledged, "Handshake done");
            println!("{}", u8::from(acknowledged));
        }
        Command::Uninit => client.uninit().await?,
        Command::Quit => client.quit().await?,
        Command::Send { text } => client.send(text.as_bytes()).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    bwt_emulator::logging::init(Level::INFO, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        result = run(args) => result,
    }
}
