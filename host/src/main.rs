use clap::Parser;
use host::{Host, HostConfig, HostEvent};
use log::{info, warn};
use shared::{DEFAULT_SESSION_PORT, DISCOVERY_PORT, HOST_MISS_THRESHOLD};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Display name announced to peers
    #[arg(short = 'n', long, default_value = "Host")]
    name: String,

    /// Address to bind the session socket to
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Session port
    #[arg(short = 'p', long, default_value_t = DEFAULT_SESSION_PORT)]
    port: u16,

    /// Broadcast address advertisements are sent to
    #[arg(long, default_value = "255.255.255.255")]
    broadcast: IpAddr,

    /// Discovery port advertisements are sent to
    #[arg(long, default_value_t = DISCOVERY_PORT)]
    discovery_port: u16,

    /// Do not advertise on the discovery channel
    #[arg(long)]
    no_advertise: bool,

    /// Missed heartbeat checks before a peer is dropped
    #[arg(long, default_value_t = HOST_MISS_THRESHOLD)]
    miss_threshold: u32,

    /// Meeting countdown in seconds
    #[arg(long, default_value = "60")]
    meeting_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = HostConfig {
        name: args.name.clone(),
        bind_addr: SocketAddr::new(args.bind, args.port),
        advertise_to: (!args.no_advertise)
            .then(|| SocketAddr::new(args.broadcast, args.discovery_port)),
        miss_threshold: args.miss_threshold,
        meeting_countdown: Duration::from_secs(args.meeting_secs),
        ..HostConfig::default()
    };

    let (mut host, mut events) = Host::bind(config).await?;
    host.start().await?;
    info!("Hosting as {} on {}", args.name, host.identity());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HostEvent::Fault(reason)) => {
                    warn!("Host stopped: {}", reason);
                    break;
                }
                Some(HostEvent::AdvertisingStopped(reason)) => {
                    warn!("No longer advertising ({}); peers must join by address", reason);
                }
                Some(event) => info!("{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    host.shutdown().await?;
    Ok(())
}
