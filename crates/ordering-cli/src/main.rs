// ============================================================================
// zayup - command-line driver for the Zayup ordering desk
// ============================================================================
// Usage:
//   zayup replay SCRIPT [--agent intro|demo] [--session ID]   Replay a call script
//   zayup proxy ACTION --session ID [--payload JSON]          Send one cart command
//   zayup cart SESSION [--watch]                              Show a backend cart
//   zayup clear-cart SESSION                                  Delete a backend cart
//
// Settings come from the environment (a .env file is loaded first).
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ordering_core::backend::{BackendConfig, CartCommands, CartFeed, CartProxy, ProxyAction};
use ordering_core::cart::RemoteCart;
use ordering_core::{Agent, CartLineItem, DeskConfig, LogEntry, OrderDesk, ScriptedTransport, SessionEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Zayup voice-ordering desk tools
#[derive(Parser)]
#[command(name = "zayup", version, about = "Drive and inspect Zayup voice-ordering sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded voice event script through the ordering desk
    Replay {
        /// JSON array of `{ "delay_ms": N, "event": ... }` steps
        script: PathBuf,

        /// Agent for the call (intro or demo)
        #[arg(long, value_parser = parse_agent)]
        agent: Option<Agent>,

        /// Use the backend cart of this session instead of a local cart
        #[arg(long)]
        session: Option<String>,

        /// Voice SDK key; overrides VAPI_PUBLIC_KEY
        #[arg(long)]
        public_key: Option<String>,

        /// Print the final order state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send one action to the cart proxy and print the reply
    Proxy {
        /// start-session, export-menu, add-item, modify-item, remove-item, validate-order
        action: String,

        #[arg(long)]
        session: String,

        /// JSON object merged into the request payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Print the backend cart of a session
    Cart {
        session: String,

        /// Keep following realtime changes until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Delete every cart row of a session
    ClearCart { session: String },
}

fn parse_agent(s: &str) -> Result<Agent, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ordering_core=debug,zayup=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DeskConfig::from_env();

    match cli.command {
        Commands::Replay {
            script,
            agent,
            session,
            public_key,
            json,
        } => cmd_replay(config, script, agent, session, public_key, json).await,
        Commands::Proxy {
            action,
            session,
            payload,
        } => cmd_proxy(&config, &action, &session, &payload).await,
        Commands::Cart { session, watch } => cmd_cart(&config, &session, watch).await,
        Commands::ClearCart { session } => cmd_clear_cart(&config, &session).await,
    }
}

fn backend(config: &DeskConfig) -> Result<BackendConfig> {
    config
        .backend()
        .ok_or_else(|| anyhow!("SUPABASE_URL and SUPABASE_ANON_KEY must be set"))
}

async fn cmd_replay(
    mut config: DeskConfig,
    script: PathBuf,
    agent: Option<Agent>,
    session: Option<String>,
    public_key: Option<String>,
    json: bool,
) -> Result<()> {
    if public_key.is_some() {
        config.voice_public_key = public_key;
    }
    let remote = match session {
        Some(session_id) => Some((session_id, backend(&config)?)),
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport::from_file(tx.clone(), &script)?);
    let mut desk = OrderDesk::new(config, transport, tx);
    if let Some(agent) = agent {
        desk.select_agent(agent);
    }

    let mut feed = None;
    if let Some((session_id, backend)) = &remote {
        desk = desk.with_remote_cart(session_id.clone(), Arc::new(CartProxy::new(backend)));
        feed = Some(CartFeed::new(backend.clone()));
    }

    let mut observer = desk.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = observer.recv().await {
            print_event(&event);
        }
    });

    desk.start_call().await?;

    let mut subscription = None;
    if let (Some(feed), Some((session_id, _))) = (&feed, &remote) {
        match feed.snapshot(session_id).await {
            Ok(items) => desk.load_cart_snapshot(items),
            Err(e) => warn!("Cart snapshot unavailable: {}", e),
        }
        match feed.subscribe(session_id).await {
            Ok(sub) => subscription = Some(sub),
            Err(e) => warn!("Realtime cart feed unavailable: {}", e),
        }
    }

    let changes = subscription.as_mut().map(|sub| sub.changes_mut());
    desk.run(&mut rx, changes).await;

    desk.shutdown();
    // Observers are dropped by shutdown, which ends the printer
    let _ = printer.await;
    let snapshot = desk.last_order().cloned().unwrap_or_else(|| desk.snapshot());

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("\n=== Activity Log ===");
    for entry in snapshot.logs.entries() {
        print_log(entry);
    }
    println!("\n=== Cart ({}) ===", if snapshot.remote_cart { "backend" } else { "local" });
    print_cart(&snapshot.items);
    Ok(())
}

async fn cmd_proxy(config: &DeskConfig, action: &str, session: &str, payload: &str) -> Result<()> {
    let action: ProxyAction = action.parse().map_err(|e: String| anyhow!(e))?;
    let payload: Value = serde_json::from_str(payload).context("Payload must be valid JSON")?;
    if !payload.is_object() {
        anyhow::bail!("Payload must be a JSON object");
    }

    let proxy = CartProxy::new(&backend(config)?);
    info!("Calling {} via {}", action, proxy.endpoint());
    let reply = proxy.call(action, session, payload).await?;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn cmd_cart(config: &DeskConfig, session: &str, watch: bool) -> Result<()> {
    let backend = backend(config)?;
    let feed = CartFeed::new(backend.clone());

    let mut cart = RemoteCart::new(session, Arc::new(CartProxy::new(&backend)));
    cart.load_snapshot(feed.snapshot(session).await?);
    print_cart(cart.items());

    if !watch {
        return Ok(());
    }

    let mut subscription = feed.subscribe(session).await?;
    println!("\nWatching cart {} (Ctrl-C to stop)", session);

    loop {
        tokio::select! {
            change = subscription.recv() => match change {
                Some(change) => {
                    println!("\n{}", serde_json::to_string(&change)?);
                    cart.apply(change);
                    print_cart(cart.items());
                }
                None => {
                    warn!("Realtime feed closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn cmd_clear_cart(config: &DeskConfig, session: &str) -> Result<()> {
    let feed = CartFeed::new(backend(config)?);
    feed.clear(session).await?;
    println!("Cleared cart for session {}", session);
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::CallStarted => println!("-- call started"),
        SessionEvent::CallEnded => println!("-- call ended"),
        SessionEvent::SpeechStarted => println!("-- speaking"),
        SessionEvent::SpeechEnded => println!("-- processing"),
        SessionEvent::Message(message) => {
            if let Some((role, text)) = message.final_transcript() {
                println!("{:?}: {}", role, text);
            }
        }
        SessionEvent::FunctionCall { name, params } => {
            println!("-> {}({})", name, Value::Object(params.clone()));
        }
        SessionEvent::Error { message } => println!("!! {}", message),
    }
}

fn print_log(entry: &LogEntry) {
    println!(
        "{}  {:<6}  {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.kind.tag(),
        entry.message
    );
}

fn print_cart(items: &[CartLineItem]) {
    if items.is_empty() {
        println!("Cart is empty.");
        return;
    }

    println!("{:<4}  {:<30}  {:<24}  {:>8}", "QTY", "ITEM", "MODIFICATION", "PRICE");
    println!("{}", "-".repeat(72));
    for item in items {
        let name: String = item.name.chars().take(30).collect();
        let modification: String = item.modification.as_deref().unwrap_or("-").chars().take(24).collect();
        println!(
            "{:<4}  {:<30}  {:<24}  {:>8.2}",
            item.quantity,
            name,
            modification,
            item.line_total()
        );
    }
    let total: f64 = items.iter().map(CartLineItem::line_total).sum();
    println!("{}", "-".repeat(72));
    println!("{:<64}  {:>6.2}", "TOTAL", total);
}
