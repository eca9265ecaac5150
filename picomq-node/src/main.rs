use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use log::{debug, info, warn};
use picomq::{codec::PicoCodec, Config, MalformedPolicy, PicoMq};
use picomq_node::{bind_multicast, TokioMulticast};
use std::net::Ipv4Addr;
use tokio::signal;
use tokio_util::udp::UdpFramed;

#[derive(Parser)]
#[command(name = "picomq-node")]
#[command(about = "Publish and subscribe on a PicoMQ multicast group")]
struct Cli {
    #[command(flatten)]
    network: NetworkArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NetworkArgs {
    /// Multicast group address
    #[arg(long, global = true, default_value_t = picomq::DEFAULT_GROUP)]
    group: Ipv4Addr,

    /// UDP port
    #[arg(long, global = true, default_value_t = picomq::DEFAULT_PORT)]
    port: u16,

    /// Multicast time-to-live for published messages
    #[arg(long, global = true, default_value_t = picomq::DEFAULT_TTL)]
    ttl: u8,

    /// Local interface address to join the group on and send from
    #[arg(long, global = true, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// Keep reading after a malformed datagram instead of waiting for the next cycle
    #[arg(long, global = true)]
    skip_malformed: bool,
}

impl NetworkArgs {
    fn config(&self) -> Config {
        let malformed = if self.skip_malformed {
            MalformedPolicy::SkipFrame
        } else {
            MalformedPolicy::AbortCycle
        };

        Config::default()
            .with_group(self.group)
            .with_port(self.port)
            .with_ttl(self.ttl)
            .with_interface(self.interface)
            .with_malformed_policy(malformed)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log every message matching one of the filters
    Listen {
        /// Topic filters, `+` and `#` wildcards allowed
        #[arg(default_value = "#")]
        filters: Vec<String>,
    },
    /// Send a single message
    Publish { topic: String, payload: String },
    /// Print every frame on the group, including our own and malformed ones
    Sniff,
}

async fn listen(config: Config, filters: Vec<String>) -> Result<()> {
    let mut node = PicoMq::new(TokioMulticast::new(config.interface), config);
    node.begin().context("Couldn't join multicast group")?;

    for filter in filters {
        info!("Subscribing to {}", filter);
        node.subscribe_str(filter, |topic, payload| {
            info!("{}: {}", topic, payload);
        });
    }

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            ready = node.transport().readable() => ready?,
            _ = &mut shutdown => break,
        }

        let stats = node.poll_once();
        debug!("Poll cycle: {:?}", stats);
    }

    info!("Shutting down");
    Ok(())
}

async fn publish(config: Config, topic: &str, payload: &str) -> Result<()> {
    let mut node = PicoMq::new(TokioMulticast::new(config.interface), config);
    node.begin().context("Couldn't join multicast group")?;
    node.transport().writable().await?;
    node.publish(topic, payload)?;

    info!("Published {} bytes to {}", payload.len(), topic);
    Ok(())
}

async fn sniff(config: Config) -> Result<()> {
    let socket = bind_multicast(config.interface, config.group, config.port)
        .context("Couldn't join multicast group")?;
    info!("Sniffing on {}", config.multicast_addr());

    let mut frames = UdpFramed::new(socket, PicoCodec::new());

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok((message, source))) => {
                    println!("{} {} {:?}", source, message.topic, message.payload);
                },
                Some(Err(e)) => warn!("Malformed datagram - {}", e),
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.network.config();

    match cli.command {
        Commands::Listen { filters } => listen(config, filters).await,
        Commands::Publish { topic, payload } => publish(config, &topic, &payload).await,
        Commands::Sniff => sniff(config).await,
    }
}
