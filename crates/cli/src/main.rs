use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand},
    clawlink_chat::{ChatAggregator, IdempotencyKey, Role, SessionKey, TurnUpdate, sessions},
    clawlink_config::ClawlinkConfig,
    clawlink_deploy::{
        ComposeBridge, DeploymentControl, DeploymentState, SetupConfig, StatusPoller,
    },
    clawlink_gateway::{Backoff, ConnectOptions, GatewayClient, Reconnector, WsConnector},
    clawlink_protocol::subscriptions,
    tracing::{info, warn},
};

/// Talk to an agent gateway and manage its local deployment.
#[derive(Parser, Debug)]
#[command(name = "clawlink", version)]
struct Cli {
    /// Configuration file. Defaults to ~/.config/clawlink/clawlink.toml.
    #[arg(long, global = true, env = "CLAWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message to an agent and stream the reply to stdout.
    Chat {
        agent: String,
        message: String,
        /// Full session key (`agent:<name>:<instance>`). Defaults to the
        /// agent's main session.
        #[arg(long, conflicts_with = "new")]
        session: Option<String>,
        /// Start a new conversation instead of using the main session.
        #[arg(long)]
        new: bool,
    },
    /// Print the transcript of a session.
    History { session: String },
    /// List sessions, optionally for one agent.
    Sessions {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Print gateway events as JSON lines, reconnecting when the link drops.
    Events,
    /// Manage the local gateway deployment.
    Deploy {
        #[command(subcommand)]
        action: DeployCommand,
    },
    /// Poll deployment status and print every change until Ctrl-C.
    Watch,
}

#[derive(Subcommand, Debug)]
enum DeployCommand {
    /// Check the container runtime on this host.
    Check,
    /// Register with the backend, render the deployment and bring it up.
    Install {
        #[arg(long, env = "CLAWLINK_BOT_TOKEN", hide_env_values = true)]
        bot_token: String,
        #[arg(long, default_value = "gemini-3-flash")]
        model: String,
        /// Skip the token-saving gateway settings.
        #[arg(long)]
        no_optimize: bool,
    },
    /// Apply token-saving gateway settings for a model.
    Optimize { model: String },
    Status,
    Logs {
        /// Number of lines. Defaults to `deploy.log_lines`.
        #[arg(long)]
        lines: Option<u32>,
    },
    Start,
    Stop,
    Restart,
    /// Stop the stack and delete its volumes.
    Teardown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config =
        clawlink_config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Chat {
            agent,
            message,
            session,
            new,
        } => {
            let key = match session {
                Some(raw) => raw.parse::<SessionKey>()?,
                None if new => SessionKey::fresh(agent),
                None => SessionKey::main(agent),
            };
            chat(&config, &key, &message).await
        },
        Command::History { session } => history(&config, &session).await,
        Command::Sessions { agent } => list_sessions(&config, agent.as_deref()).await,
        Command::Events => events(&config).await,
        Command::Deploy { action } => deploy(&config, action).await,
        Command::Watch => watch(&config).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries command output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────────

async fn connect(config: &ClawlinkConfig) -> Result<GatewayClient> {
    if !config.gateway.has_token() {
        warn!("no gateway token configured, connecting unauthenticated");
    }
    let client = GatewayClient::new(ConnectOptions::from_config(&config.gateway));
    client
        .connect_ws()
        .await
        .with_context(|| format!("failed to connect to {}", config.gateway.url))?;
    info!(
        url = %config.gateway.url,
        protocol = client.negotiated_protocol(),
        "gateway session ready"
    );
    Ok(client)
}

async fn chat(config: &ClawlinkConfig, key: &SessionKey, message: &str) -> Result<()> {
    let client = connect(config).await?;
    let aggregator = ChatAggregator::attach(&client);
    let mut turn = aggregator
        .begin_turn(&key.to_string(), message, IdempotencyKey::new())
        .await?;

    let mut stdout = std::io::stdout();
    let mut printed = String::new();
    let outcome = loop {
        match turn.next().await {
            Some(TurnUpdate::Delta { fragment, .. }) => {
                stdout.write_all(fragment.as_bytes())?;
                stdout.flush()?;
                printed.push_str(&fragment);
            },
            Some(TurnUpdate::Final { text }) => {
                // The final text is authoritative; print the part not yet shown.
                match text.strip_prefix(printed.as_str()) {
                    Some(rest) => stdout.write_all(rest.as_bytes())?,
                    None if printed.is_empty() => stdout.write_all(text.as_bytes())?,
                    None => write!(stdout, "\n\n{text}")?,
                }
                writeln!(stdout)?;
                break Ok(());
            },
            Some(TurnUpdate::Interrupted(interrupted)) => {
                writeln!(stdout)?;
                break Err(anyhow::Error::new(interrupted));
            },
            None => break Ok(()),
        }
    };
    client.close();
    outcome
}

async fn history(config: &ClawlinkConfig, session: &str) -> Result<()> {
    let key: SessionKey = session.parse()?;
    let client = connect(config).await?;
    let entries = sessions::load_history(&client, &key.to_string()).await;
    client.close();

    for entry in entries? {
        let who = match entry.role {
            Role::User => "you",
            Role::Assistant => key.agent(),
        };
        println!("{who}> {}\n", entry.text);
    }
    Ok(())
}

async fn list_sessions(config: &ClawlinkConfig, agent: Option<&str>) -> Result<()> {
    let client = connect(config).await?;
    let list = sessions::list_sessions(&client, agent).await;
    client.close();

    for session in list?.sessions {
        let title = session
            .display_name
            .or(session.derived_title)
            .unwrap_or_default();
        println!("{}\t{title}", session.key);
    }
    Ok(())
}

async fn events(config: &ClawlinkConfig) -> Result<()> {
    let client = GatewayClient::new(ConnectOptions::from_config(&config.gateway));
    client.subscribe(subscriptions::WILDCARD, |event| {
        let line = serde_json::json!({
            "event": event.event,
            "seq": event.seq,
            "payload": event.payload,
        });
        println!("{line}");
    });
    client.on_disconnect(|reason| warn!(%reason, "gateway connection lost"));

    client
        .connect_ws()
        .await
        .with_context(|| format!("failed to connect to {}", config.gateway.url))?;

    let reconnector = config.gateway.reconnect.enabled.then(|| {
        Reconnector::spawn(
            client.clone(),
            Arc::new(WsConnector),
            Backoff::from_config(&config.gateway.reconnect),
        )
    });

    tokio::signal::ctrl_c().await.context("failed to wait for Ctrl-C")?;
    if let Some(reconnector) = &reconnector {
        reconnector.stop();
    }
    client.close();
    if let Some(reconnector) = reconnector {
        reconnector.join().await;
    }
    Ok(())
}

// ── Deployment ───────────────────────────────────────────────────────────────

fn control(config: &ClawlinkConfig) -> (DeploymentControl, PathBuf) {
    let bridge = ComposeBridge::from_config(&config.deploy);
    let dir = bridge.dir().to_path_buf();
    (DeploymentControl::new(Arc::new(bridge)), dir)
}

async fn deploy(config: &ClawlinkConfig, action: DeployCommand) -> Result<()> {
    let (control, dir) = control(config);
    match action {
        DeployCommand::Check => {
            let host = control.check_host_prerequisites().await?;
            if !host.installed {
                bail!("{} is not installed", config.deploy.runtime_cli);
            }
            println!("{}", host.version);
            println!("compose:  {}", if host.compose_available { "available" } else { "missing" });
            println!("daemon:   {}", if host.runtime_active { "running" } else { "not running" });
            if !host.ready() {
                bail!("host is not ready for deployment");
            }
        },
        DeployCommand::Install {
            bot_token,
            model,
            no_optimize,
        } => install(&control, &dir, &bot_token, &model, !no_optimize).await?,
        DeployCommand::Optimize { model } => {
            println!("{}", control.apply_optimizations(&model).await?.message);
        },
        DeployCommand::Status => print_state(&control.status().await?),
        DeployCommand::Logs { lines } => {
            let lines = lines.unwrap_or(config.deploy.log_lines);
            print!("{}", control.logs(lines).await?);
        },
        DeployCommand::Start => println!("{}", control.start().await?),
        DeployCommand::Stop => println!("{}", control.stop().await?),
        DeployCommand::Restart => println!("{}", control.restart().await?),
        DeployCommand::Teardown => println!("{}", control.teardown().await?.message),
    }
    Ok(())
}

async fn install(
    control: &DeploymentControl,
    dir: &Path,
    bot_token: &str,
    model: &str,
    optimize: bool,
) -> Result<()> {
    let host = control.check_host_prerequisites().await?;
    if !host.ready() {
        bail!("container runtime is not ready, run `clawlink deploy check`");
    }

    let registration = control.register_deployment(bot_token, model).await?;
    let setup = SetupConfig::from_registration(&registration, bot_token, model);
    let deployed = control.configure_and_deploy(&setup).await?;
    println!("{} ({})", deployed.message, dir.display());

    if optimize {
        match control.apply_optimizations(model).await {
            Ok(result) => println!("{}", result.message),
            Err(e) => warn!(error = %e, "optimizations were not applied"),
        }
    }
    Ok(())
}

async fn watch(config: &ClawlinkConfig) -> Result<()> {
    let (control, _) = control(config);
    let poller = StatusPoller::from_config(Arc::new(control), &config.deploy);
    let mut snapshots = poller.subscribe();
    let mut errors = poller.errors();
    poller.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = snapshots.borrow_and_update().clone();
                if let Some(state) = state {
                    print_state(&state);
                }
            },
            err = errors.recv() => {
                if let Ok(err) = err {
                    eprintln!("status unavailable: {}", err.message());
                }
            },
        }
    }
    poller.stop().await;
    Ok(())
}

fn print_state(state: &DeploymentState) {
    println!("gateway: {}", if state.running { "running" } else { "stopped" });
    for container in &state.containers {
        println!(
            "  {:<18} {:<10} {}",
            container.name, container.runtime_state, container.status_text
        );
    }
}
