//! S4T CLI tools: key generation, offline seal and open.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use s4t_common::helpers::is_valid_identity_name;
use s4t_common::Reading;
use s4t_crypto::{CryptoEngine, Identity, KeyStore, ProtocolMode, DEFAULT_CERT_DIR};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "s4t")]
#[command(about = "S4T operator tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA key pair for a node identity
    Keygen {
        /// Identity name, e.g. Board_2
        #[arg(short, long)]
        name: String,

        #[arg(long, env = "S4T_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
        cert_dir: PathBuf,

        #[arg(long, default_value_t = 2048)]
        bits: usize,

        /// Replace an existing key pair
        #[arg(long)]
        force: bool,
    },

    /// Seal a reading from one identity to another
    Seal {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        value: f64,

        #[arg(long, env = "S4T_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
        cert_dir: PathBuf,

        #[arg(long, env = "S4T_MODE", default_value = "legacy")]
        mode: ProtocolMode,
    },

    /// Open a token addressed to an identity and print the reading
    Open {
        /// Receiving identity
        #[arg(long = "as")]
        receiver: String,

        #[arg(long)]
        token: String,

        #[arg(long, env = "S4T_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
        cert_dir: PathBuf,

        #[arg(long, env = "S4T_MODE", default_value = "legacy")]
        mode: ProtocolMode,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    s4t_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Keygen {
            name,
            cert_dir,
            bits,
            force,
        } => {
            let keystore = KeyStore::new(cert_dir);
            let (private_path, public_path) = keygen(&keystore, &name, bits, force)?;
            println!("Private key: {}", private_path.display());
            println!("Public key:  {}", public_path.display());
        }
        Command::Seal {
            from,
            to,
            value,
            cert_dir,
            mode,
        } => {
            println!("{}", seal(KeyStore::new(cert_dir), mode, &from, &to, value)?);
        }
        Command::Open {
            receiver,
            token,
            cert_dir,
            mode,
        } => {
            let reading = open(KeyStore::new(cert_dir), mode, &receiver, &token)?;
            println!("{}", reading.to_plaintext());
        }
        Command::Version => {
            println!("s4t {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn keygen(keystore: &KeyStore, name: &str, bits: usize, force: bool) -> Result<(PathBuf, PathBuf)> {
    if !is_valid_identity_name(name) {
        bail!("invalid identity name {name:?}");
    }
    if bits < 1024 {
        bail!("refusing to generate a {bits}-bit key");
    }

    let private_path = keystore.private_key_path(name);
    let public_path = keystore.public_key_path(name);
    if !force && (private_path.exists() || public_path.exists()) {
        bail!(
            "key pair for {name} already exists in {} (use --force to replace it)",
            keystore.dir().display()
        );
    }

    info!(name, bits, "generating RSA key pair");
    let identity = Identity::generate(name, bits)?;
    keystore
        .save_identity(&identity)
        .with_context(|| format!("saving key pair to {}", keystore.dir().display()))?;

    Ok((private_path, public_path))
}

fn seal(keystore: KeyStore, mode: ProtocolMode, from: &str, to: &str, value: f64) -> Result<String> {
    let sender = keystore
        .load_identity(from)
        .with_context(|| format!("loading identity {from}"))?;
    let engine = CryptoEngine::with_mode(Arc::new(keystore), mode);
    let token = engine.seal(&Reading::new(value, from), &sender, to)?;
    Ok(token.into_string())
}

fn open(keystore: KeyStore, mode: ProtocolMode, receiver: &str, token: &str) -> Result<Reading> {
    let identity = keystore
        .load_identity(receiver)
        .with_context(|| format!("loading identity {receiver}"))?;
    let engine = CryptoEngine::with_mode(Arc::new(keystore), mode);
    Ok(engine.open(token.trim(), &identity)?)
}
