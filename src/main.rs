use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use nxdt_host::codec::Struct;
use nxdt_host::file_transfer::{DirectorySinks, ProgressObserver, SinkFactory, TracingObserver, TransferObserver};
use nxdt_host::infrastructure::{init_logging, AppConfig};
use nxdt_host::transport::PacketStream;
use nxdt_host::utils::format_size;
use nxdt_host::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept devices over a TCP packet bridge and store what they send
    Serve {
        /// Path to a JSON configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Address to listen on
        #[arg(short, long)]
        address: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory received files are written to
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Packet size advertised to devices
        #[arg(long)]
        packet_size: Option<usize>,
    },
    /// Decode hex bytes with a struct format string
    Decode {
        /// Format string, e.g. "<4sIH6x"
        #[arg(short, long)]
        format: String,

        /// Input bytes as hex; must hold a whole number of records
        #[arg(long)]
        hex: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            address,
            port,
            output_dir,
            packet_size,
        } => {
            let mut config = AppConfig::load_or_default(config.as_deref());
            if let Some(address) = address {
                config.listen_address = address;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(output_dir) = output_dir {
                config.output_directory = output_dir;
            }
            if let Some(packet_size) = packet_size {
                config.max_packet_size = packet_size;
            }
            config.validate()?;
            config.ensure_directories()?;

            // This guard needs to stay in scope, otherwise logs stop writing.
            let _guard = init_logging(&config.log_dir_path(), "nxdt_host")?;
            serve(config).await?;
        }
        Commands::Decode { format, hex } => decode(&format, &hex)?,
    }

    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.listen_address.as_str(), config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!("Writing received files to {}", config.output_directory);

    let sinks: Arc<dyn SinkFactory> = Arc::new(DirectorySinks::new(config.output_dir_path()));
    let observer: Arc<dyn TransferObserver> = if config.show_progress {
        Arc::new(ProgressObserver::new())
    } else {
        Arc::new(TracingObserver)
    };
    let options = config.session_options();

    loop {
        let (socket, peer) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        info!("Device bridge connected from {}", peer);

        let transport = PacketStream::new(socket, config.max_packet_size);
        let session = Session::with_options(transport, sinks.clone(), observer.clone(), options);
        tokio::spawn(async move {
            match session.run().await {
                Ok(report) => {
                    info!(
                        "Session with {} ended: {} files, {}",
                        peer,
                        report.files_received,
                        format_size(report.bytes_received)
                    );
                    match serde_json::to_string(&report) {
                        Ok(json) => info!("Session report: {}", json),
                        Err(e) => warn!("Failed to serialize session report: {}", e),
                    }
                }
                Err(e) => error!("Session with {} failed: {}", peer, e),
            }
        });
    }
}

fn decode(format: &str, input: &str) -> anyhow::Result<()> {
    let layout: Struct = format.parse()?;
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(cleaned.trim_start_matches("0x"))?;

    println!("{} ({} bytes per record)", layout.format(), layout.size());
    for (index, record) in layout.iter_unpack(&bytes)?.enumerate() {
        let values = record
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("[{}] {}", index, values);
    }
    Ok(())
}
