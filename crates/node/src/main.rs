use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use crypto::IdentityKeys;
use p2p::{EventSink, NetworkEvent, NetworkHandle, PeerId, StopMode};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use node::{Command, NodeConfig, render_event, render_failures, render_peers, stdin_lines};

#[derive(Parser)]
#[command(author, version, about = "Parley peer-to-peer chat node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listening and chat from the terminal.
    Run(RunArgs),
    /// Print a fresh peer id and key pair for the configuration file.
    Keygen,
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Optional path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listening port (overrides config file).
    #[arg(long)]
    port: Option<u16>,

    /// Nickname shown to peers (overrides config file).
    #[arg(long)]
    nick: Option<String>,

    /// Peer to contact on startup, as ip:port. May be repeated.
    #[arg(long = "connect", value_name = "ADDR")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_node(args).await?,
        Commands::Keygen => {
            let keys = IdentityKeys::generate();
            println!("peer_id = \"{}\"", PeerId::random());
            println!("secret_key = \"{}\"", keys.secret_hex().as_str());
            println!("# public key {}", hex::encode(keys.public_key()));
        }
    }
    Ok(())
}

async fn run_node(args: RunArgs) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(nick) = args.nick {
        config.nickname = nick;
    }
    config.peers.extend(args.connect);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let identity = Arc::new(config.identity()?);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<NetworkEvent>();
    let events: Arc<dyn EventSink> = Arc::new(events_tx);
    let network = NetworkHandle::new(config.p2p_config(), Arc::clone(&identity), events);
    network.start().await?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            println!("{}", render_event(&event));
        }
    });

    info!(
        id = %identity.id(),
        nickname = %identity.nickname(),
        port = network.advertised_port(),
        "node started"
    );

    for peer in &config.peers {
        if let Err(err) = network.connect_to_remote(peer).await {
            warn!(peer = %peer, error = ?err, "initial connect failed");
        }
    }

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            interrupt = signal::ctrl_c() => {
                if let Err(err) = interrupt {
                    error!(error = ?err, "failed to install ctrl-c handler");
                }
                info!("shutdown requested");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        error!(error = ?err, "failed to read stdin");
                        break;
                    }
                };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&network, command).await,
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                }
            }
        }
    }

    network.shutdown().await;
    printer.abort();
    let _ = printer.await;
    Ok(())
}

async fn execute(network: &NetworkHandle, command: Command) {
    match command {
        Command::Connect(address) => {
            if let Err(err) = network.connect_to_remote(&address).await {
                println!("connect {address}: {err}");
            }
        }
        Command::Nick(nickname) => {
            let report = network.change_nick(nickname).await;
            if let Some(summary) = render_failures(&report) {
                println!("{summary}");
            }
        }
        Command::Peers => println!("{}", render_peers(&network.peers())),
        Command::Stop => network.stop(StopMode::Background).await,
        Command::Start => {
            if let Err(err) = network.start().await {
                println!("start failed: {err}");
            }
        }
        Command::Say(text) => {
            let report = network.send_message(&text).await;
            if let Some(summary) = render_failures(&report) {
                println!("{summary}");
            }
        }
        Command::Quit => {}
    }
}
