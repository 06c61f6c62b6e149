#![forbid(unsafe_code)]

//! S4T node binary.
//!
//! Runs one board or gateway: loads its identity from the certificate
//! directory, registers its procedures on the router and keeps the session
//! alive until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use s4t_crypto::{CryptoEngine, KeyStore};
use s4t_node::config::{Cli, CommonArgs, Role};
use s4t_node::{Board, Gateway, InfluxSink, LogSink, RandomSensor, Sink};
use s4t_wamp::{ProcedureMap, Supervisor, WebSocketConnector};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = cli.role.common().clone();

    s4t_common::init_tracing_with_default(&common.log_level);
    info!("Starting s4t-node v{}", env!("CARGO_PKG_VERSION"));

    let name = common.identity_name()?;
    let keystore = Arc::new(KeyStore::new(&common.cert_dir));
    let identity = Arc::new(
        keystore
            .load_identity(&name)
            .with_context(|| format!("loading identity {name} from {}", common.cert_dir.display()))?,
    );
    let engine = Arc::new(CryptoEngine::with_mode(keystore, common.mode));
    info!(identity = %name, mode = %common.mode, "identity loaded");

    let procedures: ProcedureMap = match &cli.role {
        Role::Gateway(args) => {
            let sink: Arc<dyn Sink> = match &args.influx_url {
                Some(url) => {
                    let token = args.influx_token.as_deref().unwrap_or_default();
                    if token.is_empty() {
                        warn!("no InfluxDB token configured, writes will likely be rejected");
                    }
                    info!(url = %url, org = %args.influx_org, "writing readings to InfluxDB");
                    Arc::new(InfluxSink::new(url, &args.influx_org, token)?)
                }
                None => {
                    warn!("no InfluxDB URL configured, readings will only be logged");
                    Arc::new(LogSink)
                }
            };
            Arc::new(Gateway::new(identity, engine, sink, args.buckets())).procedures()
        }
        Role::Board(args) => {
            info!(gateway = %args.gateway, "sending readings to gateway");
            Arc::new(Board::new(
                identity,
                engine,
                args.gateway.clone(),
                Arc::new(RandomSensor),
            ))
            .procedures()
        }
    };

    let supervisor = start(&common, &name, procedures)?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutting down");

    tokio::task::spawn_blocking(move || supervisor.shutdown()).await?;
    Ok(())
}

fn start(common: &CommonArgs, name: &str, procedures: ProcedureMap) -> Result<Supervisor> {
    let connector = WebSocketConnector::new(common.transport_config())?;
    let supervisor = Supervisor::start(common.supervisor_config()?, name, procedures, connector)?;
    Ok(supervisor)
}
