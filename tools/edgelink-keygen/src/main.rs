//! # Edgelink Keygen
//!
//! Mints a network identity: a secp256k1 keypair with its canonical
//! `0xai_` address, printed as hex and PEM and optionally written to a
//! JSON keystore file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use edgelink_crypto::EdgeIdentity;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "edgelink-keygen", about = "Edgelink identity mint")]
struct Cli {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Generate a keypair and print it; optionally write a JSON keystore.
    Generate {
        /// File to write the JSON keystore to.
        filename: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // Unknown actions exit with code 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.action {
        Action::Generate { filename } => generate(filename),
    }
}

fn generate(filename: Option<PathBuf>) -> anyhow::Result<()> {
    let identity = EdgeIdentity::generate();
    let address = identity.address();
    let public_key = identity.public_key_hex();
    let private_key = identity
        .to_pkcs8_der_hex()
        .context("private key export failed")?;
    let pem = identity.to_pkcs8_pem().context("PEM export failed")?;

    println!("address:     {address}");
    println!("public key:  {public_key}");
    println!("private key: {private_key}");
    println!("{pem}");

    if let Some(path) = filename {
        let keystore = json!({
            "publicKey": public_key,
            "privateKey": private_key,
            "address": address.as_str(),
            "pem": pem,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&keystore)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("keystore written to {}", path.display());
    }
    Ok(())
}
