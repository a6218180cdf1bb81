use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use rendezvous_rtc::config::{
    EngineConfig, PeerConfig, RelayConfig, SessionConfig, DEFAULT_RELAY_URL,
    DEFAULT_STUN_SERVER,
};
use rendezvous_rtc::model::media::MediaConstraints;
use rendezvous_rtc::{peer, server, util::init_log};

/// Rendezvous RTC
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the signaling relay
    Relay(RelayArgs),
    /// Start a peer that negotiates through a relay
    Peer(PeerArgs),
}

#[derive(Args)]
struct RelayArgs {
    /// WebSocket listen address
    #[arg(long, default_value_t = RelayConfig::default().listen)]
    listen: SocketAddr,

    /// Serve a small HTTP status page on this address
    #[arg(long)]
    status_listen: Option<SocketAddr>,
}

#[derive(Args)]
struct PeerArgs {
    /// Relay WebSocket URL
    #[arg(long, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    /// Place a call as soon as the relay connection is up
    #[arg(long)]
    call: bool,

    /// Fail a negotiation that is not connected after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    no_audio: bool,

    #[arg(long)]
    no_video: bool,

    /// Allow a loopback host candidate (both peers on one machine)
    #[arg(long)]
    loopback: bool,

    /// STUN server used to discover a server-reflexive candidate (repeatable)
    #[arg(long = "stun", value_name = "HOST:PORT", default_value = DEFAULT_STUN_SERVER)]
    stun_servers: Vec<String>,

    /// Advertise host candidates only
    #[arg(long)]
    no_stun: bool,
}

impl From<RelayArgs> for RelayConfig {
    fn from(args: RelayArgs) -> Self {
        RelayConfig {
            listen: args.listen,
            status_listen: args.status_listen,
        }
    }
}

impl From<PeerArgs> for PeerConfig {
    fn from(args: PeerArgs) -> Self {
        PeerConfig {
            relay_url: args.relay,
            call: args.call,
            session: SessionConfig {
                constraints: MediaConstraints {
                    audio: !args.no_audio,
                    video: !args.no_video,
                },
                negotiation_timeout: args.timeout_secs.map(Duration::from_secs),
            },
            engine: EngineConfig {
                include_loopback: args.loopback,
                ice_servers: if args.no_stun { vec![] } else { args.stun_servers },
                ..EngineConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();

    match Cli::parse().command {
        Command::Relay(args) => server::run(args.into()).await,
        Command::Peer(args) => peer::client::run(args.into()).await,
    }
}
