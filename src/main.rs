//! treestream CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use treestream::config::Config;
use treestream::demo::{self, DemoModules};
use treestream::lazy::LazyResolver;
use treestream::server::RenderServer;
use treestream::streaming::pipeline::{settled, SessionCache, ViewState};
use treestream::streaming::protocol::decode_props;
use treestream::transport::TcpTransport;
use treestream::view::{render_settled, render_state};
use treestream::Props;

/// treestream - stream UI trees with deferred subtrees
#[derive(Parser)]
#[command(name = "treestream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/treestream/config.toml)
    #[arg(long, global = true, env = "TREESTREAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo components
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Render a component from a server and print the settled HTML
    Fetch {
        /// Component name, e.g. List or Detail
        component: String,
        /// Props as a JSON object
        #[arg(long, default_value = "{}")]
        props: String,
        /// Server address (overrides config)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}

fn init_logging(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter).with_context(|| format!("Invalid log filter {:?}", filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn parse_props(json: &str) -> Result<Props> {
    match serde_json::from_str::<Value>(json).context("Props are not valid JSON")? {
        Value::Object(map) => Ok(decode_props(map)?),
        other => bail!("Props must be a JSON object, got {}", other),
    }
}

async fn serve(config: &Config, addr: Option<SocketAddr>) -> Result<()> {
    let addr = addr.unwrap_or(config.server.addr);
    let registry = demo::registry(Duration::from_millis(config.server.demo_delay_ms));
    let server = RenderServer::bind(addr, Arc::new(registry)).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn fetch(config: &Config, component: &str, props: Props, addr: Option<SocketAddr>) -> Result<()> {
    let addr = addr.unwrap_or(config.server.addr);
    let sessions = SessionCache::new(Arc::new(TcpTransport::new(addr)));
    let view = settled(sessions.mount(component, props)?).await;

    let resolver = LazyResolver::new(Arc::new(DemoModules {
        delay: Duration::from_millis(config.server.demo_delay_ms / 4),
    }));
    match &view {
        ViewState::Ready(tree) => {
            println!("{}", render_settled(tree, &resolver).await);
            Ok(())
        }
        ViewState::Loading | ViewState::Failed(_) => {
            println!("{}", render_state(&view, &resolver).html);
            bail!("Session for {} did not complete", component)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.log.filter)?;

    match cli.command {
        Commands::Serve { addr } => serve(&config, addr).await,
        Commands::Fetch {
            component,
            props,
            addr,
        } => {
            let props = parse_props(&props)?;
            fetch(&config, &component, props, addr).await
        }
    }
}
