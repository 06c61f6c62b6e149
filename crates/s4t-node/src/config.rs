//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use s4t_common::{Error, Result, DEFAULT_NAMESPACE, DEFAULT_REALM};
use s4t_crypto::{ProtocolMode, DEFAULT_CERT_DIR};
use s4t_wamp::websocket::DEFAULT_ROUTER_URL;
use s4t_wamp::{BackoffConfig, Serializer, SupervisorConfig, TlsPolicy, TransportConfig};

use crate::handlers::Buckets;

pub const DEFAULT_GATEWAY: &str = "Board_1_GT";

#[derive(Parser, Debug)]
#[command(name = "s4t-node", version)]
#[command(about = "S4T node - exchanges sensor readings over a WAMP router")]
pub struct Cli {
    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug)]
pub enum Role {
    /// Receive readings from boards and store them
    Gateway(GatewayArgs),
    /// Sample a sensor and send readings to the gateway
    Board(BoardArgs),
}

impl Role {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Role::Gateway(args) => &args.common,
            Role::Board(args) => &args.common,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// WAMP router WebSocket URL
    #[arg(long, env = "S4T_ROUTER_URL", default_value = DEFAULT_ROUTER_URL)]
    pub router_url: String,

    #[arg(long, env = "S4T_REALM", default_value = DEFAULT_REALM)]
    pub realm: String,

    /// Procedure namespace prefix
    #[arg(long, env = "S4T_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Identity of this node (defaults to the hostname)
    #[arg(long, env = "S4T_NAME")]
    pub name: Option<String>,

    /// Directory holding `{name}.key.pem` / `{name}.pub.pem`
    #[arg(long, env = "S4T_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    pub cert_dir: PathBuf,

    /// Envelope mode: legacy (deployed boards) or hardened
    #[arg(long, env = "S4T_MODE", default_value = "legacy")]
    pub mode: ProtocolMode,

    /// Router certificate check: verify, insecure, or ca:<path>
    #[arg(long, env = "S4T_TLS", default_value = "verify")]
    pub tls: TlsPolicy,

    /// Serializers offered to the router, in order
    #[arg(long, value_delimiter = ',', default_value = "json,msgpack")]
    pub serializers: Vec<Serializer>,

    #[arg(long, default_value_t = 30)]
    pub call_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub join_timeout_secs: u64,

    /// First reconnect delay
    #[arg(long, default_value_t = 500)]
    pub backoff_base_ms: u64,

    /// Reconnect delay cap
    #[arg(long, default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl CommonArgs {
    /// The configured name, else the hostname.
    pub fn identity_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        if let Ok(host) = std::env::var("HOSTNAME") {
            if !host.trim().is_empty() {
                return Ok(host.trim().to_string());
            }
        }
        let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map_err(|e| Error::config(format!("no --name given and hostname unavailable: {e}")))?;
        Ok(host.trim().to_string())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.router_url.clone(),
            tls: self.tls.clone(),
            serializers: self.serializers.clone(),
            ..TransportConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(Error::config(format!(
                "backoff base {}ms must be positive and not above the cap {}ms",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(SupervisorConfig {
            realm: self.realm.clone(),
            namespace: self.namespace.clone(),
            backoff: BackoffConfig {
                initial: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                jitter: true,
            },
            join_timeout: Duration::from_secs(self.join_timeout_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// InfluxDB base URL; readings are only logged when unset
    #[arg(long, env = "S4T_INFLUX_URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "S4T_INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    #[arg(long, env = "S4T_INFLUX_ORG", default_value = "S4T")]
    pub influx_org: String,

    #[arg(long, default_value = "clear_communication")]
    pub clear_bucket: String,

    #[arg(long, default_value = "secure_communication")]
    pub secure_bucket: String,
}

impl GatewayArgs {
    pub fn buckets(&self) -> Buckets {
        Buckets {
            clear: self.clear_bucket.clone(),
            secure: self.secure_bucket.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BoardArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Identity of the gateway readings are sent to
    #[arg(long, env = "S4T_GATEWAY", default_value = DEFAULT_GATEWAY)]
    pub gateway: String,
}
