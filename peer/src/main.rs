use clap::Parser;
use log::{info, warn};
use peer::{DiscoveryListener, Peer, PeerConfig, PeerEvent};
use shared::protocol::BallotTarget;
use shared::{Identity, RunFlag, StateUpdate, DISCOVERY_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Display name announced to the host
    #[arg(short = 'n', long, default_value = "Player")]
    name: String,

    /// Join this host directly instead of listening for advertisements
    #[arg(short = 's', long)]
    host: Option<SocketAddr>,

    /// Discovery port to listen on
    #[arg(long, default_value_t = DISCOVERY_PORT)]
    discovery_port: u16,

    /// Seconds to listen for advertisements
    #[arg(long, default_value = "3")]
    discover_secs: u64,

    /// Which discovered host to join
    #[arg(long, default_value = "0")]
    pick: usize,
}

/// One line typed on stdin.
#[derive(Debug, PartialEq)]
enum Command {
    Move(f32, f32),
    Vote(BallotTarget),
    Report(Option<Identity>),
    Say(String),
    List,
    Quit,
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match word {
            "move" => {
                let mut coords = rest.split_whitespace().map(str::parse::<f32>);
                match (coords.next(), coords.next()) {
                    (Some(Ok(x)), Some(Ok(y))) => Ok(Command::Move(x, y)),
                    _ => Err("usage: move <x> <y>".to_string()),
                }
            }
            "vote" => rest
                .parse()
                .map(Command::Vote)
                .map_err(|_| "usage: vote <ip:port|skip>".to_string()),
            "report" if rest.is_empty() => Ok(Command::Report(None)),
            "report" => rest
                .parse()
                .map(|victim| Command::Report(Some(victim)))
                .map_err(|_| "usage: report [ip:port]".to_string()),
            "say" if !rest.is_empty() => Ok(Command::Say(rest.to_string())),
            "list" => Ok(Command::List),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(format!("unknown command: {}", line)),
        }
    }
}

async fn discover(args: &Args) -> Result<Option<Identity>, Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.discovery_port);
    let listener = DiscoveryListener::bind(addr).await?;
    let candidates = listener.candidates();

    let running = RunFlag::new();
    let handle = tokio::spawn(listener.run(running.clone()));

    info!("Looking for hosts for {}s...", args.discover_secs);
    tokio::time::sleep(Duration::from_secs(args.discover_secs)).await;
    let found = candidates.refresh();

    running.stop();
    handle.await??;

    for (index, candidate) in found.iter().enumerate() {
        println!(
            "[{}] {} at {}",
            index,
            candidate.name,
            candidate.identity()
        );
    }

    Ok(candidates.select(args.pick).map(|candidate| candidate.identity()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let host = match args.host {
        Some(addr) => Identity::new(addr),
        None => match discover(&args).await? {
            Some(host) => host,
            None => {
                eprintln!("No host found");
                return Ok(());
            }
        },
    };

    let (mut peer, mut events) = Peer::connect(PeerConfig::named(&args.name), host).await?;
    peer.start();
    info!("Commands: move x y | vote <ip:port|skip> | report [ip:port] | say text | list | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let result = match line.parse::<Command>() {
                    Ok(Command::Move(x, y)) => {
                        if !peer.set_local_state(StateUpdate::at(x, y)).await {
                            eprintln!("position must be finite");
                        }
                        Ok(())
                    }
                    Ok(Command::Vote(target)) => peer.cast_vote(target).await,
                    Ok(Command::Report(victim)) => peer.report(victim).await,
                    Ok(Command::Say(text)) => peer.chat(&text).await,
                    Ok(Command::List) => peer.request_roster().await,
                    Ok(Command::Quit) => break,
                    Err(usage) => {
                        eprintln!("{}", usage);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("{}", e);
                }
            }
            event = events.recv() => match event {
                Some(PeerEvent::Fault(reason)) => {
                    warn!("Session stopped: {}", reason);
                    break;
                }
                Some(PeerEvent::Chat(line)) => println!("{}", line),
                Some(PeerEvent::Roster(roster)) => println!("{}", roster),
                Some(event) => info!("{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    peer.shutdown().await?;
    Ok(())
}
