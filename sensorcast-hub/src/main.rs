use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use sensorcast_hub::{Registry, ReconnectPolicy, Server, ServerConfig, acquisition};
use sensorcast_link::{BDAddr, LinkConfig, SensorLink};
use sensorcast_proto::ble;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(clap::Parser)]
#[command(name = "sensorcast-hub")]
#[command(about = "Streams BLE sensor readings to browser dashboards")]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List nearby BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Read the sensor and serve viewers
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Sensor address, e.g. A4:C1:38:BF:0B:36
    #[arg(short, long, env = "SENSORCAST_ADDRESS")]
    address: String,

    /// Characteristic holding the reading
    #[arg(long, default_value_t = ble::READING_CHARACTERISTIC_UUID)]
    characteristic: uuid::Uuid,

    #[arg(short, long, env = "SENSORCAST_LISTEN", default_value = "0.0.0.0:20088")]
    listen: SocketAddr,

    /// Directory with index.html and the dashboard assets
    #[arg(long, env = "SENSORCAST_STATIC", default_value = "static")]
    static_dir: PathBuf,

    #[arg(long, default_value = "30")]
    connect_timeout_secs: u64,

    /// Pause between characteristic reads
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Reconnect attempts after the link is lost or fails to connect
    #[arg(long, default_value = "0")]
    reconnect_attempts: u32,

    /// Events buffered per viewer before it is dropped as too slow
    #[arg(long, default_value = "16")]
    subscriber_capacity: usize,
}

#[tokio::main]
async fn main() {
    let cli: Cli = clap::Parser::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Scan { duration } => scan(duration).await,
        Commands::Run(args) => run(args).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn scan(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    info!("Scanning for BLE devices ({duration} seconds)...");
    let devices = sensorcast_link::scan(Duration::from_secs(duration)).await?;

    println!("Found {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        println!("  {} ({}) RSSI: {}", device.name, device.address, rssi);
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let address: BDAddr = args.address.parse()?;
    let link_config = LinkConfig {
        address,
        characteristic: args.characteristic,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        interval: Duration::from_millis(args.interval_ms),
    };
    let policy = ReconnectPolicy {
        max_attempts: args.reconnect_attempts,
        ..Default::default()
    };

    // Built before either side starts, shared by both
    let registry = Registry::new();

    let server = Server::bind(
        ServerConfig {
            listen: args.listen,
            static_dir: args.static_dir,
            subscriber_capacity: args.subscriber_capacity,
        },
        registry.clone(),
    )
    .await?;

    let device = link_config.ble_device();
    info!("Reading sensor {}", device.address());
    let link = SensorLink::new(device, &link_config);
    let acquisition = acquisition::spawn(link, registry.clone(), policy);

    let (stop_server, stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(server.run(stop_rx));

    let server_result = tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            info!("Shutting down");
            None
        }
        r = &mut server => Some(r),
    };

    stop_server.send_replace(true);
    acquisition.shutdown();

    let report = acquisition.join().await?;
    info!(
        "Acquisition ended ({:?}) after {} readings",
        report.outcome, report.readings
    );

    match server_result {
        Some(r) => r?,
        None => server.await?,
    }
    Ok(())
}
