// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Parser, Subcommand};

use crate::{
    crypto::{self, SignatureAlgorithm},
    ota::verify,
};

pub fn key_main(cli: &KeyCli) -> Result<()> {
    match &cli.command {
        KeyCommand::GenerateKey(c) => {
            let private_key =
                crypto::generate_rsa_key(c.bits).context("Failed to generate RSA keypair")?;

            crypto::write_pem_key_file(&c.output, &private_key)
                .with_context(|| format!("Failed to write private key: {:?}", c.output))?;
        }
        KeyCommand::ExtractPublic(c) => {
            let private_key = crypto::read_pem_key_file(&c.key)
                .with_context(|| format!("Failed to load key: {:?}", c.key))?;

            crypto::write_pem_public_key_file(&c.output, &private_key.to_public_key())
                .with_context(|| format!("Failed to write public key: {:?}", c.output))?;
        }
        KeyCommand::Sign(c) => {
            let private_key = crypto::read_pem_key_file(&c.key)
                .with_context(|| format!("Failed to load key: {:?}", c.key))?;

            let data = fs::read(&c.input)
                .with_context(|| format!("Failed to read image: {:?}", c.input))?;
            let digest = verify::sha256(&data);

            let signature = crypto::sign_digest(&private_key, c.algorithm, &digest)
                .with_context(|| format!("Failed to sign image: {:?}", c.input))?;

            println!("binary_hash: {}", hex::encode(digest));
            println!("binary_size: {}", data.len());
            println!("signature: {}", STANDARD.encode(signature));
        }
    }

    Ok(())
}

/// Generate an RSA private key.
///
/// The output is saved in the standard PKCS8 format.
#[derive(Debug, Parser)]
struct GenerateKeyCli {
    /// Path to output private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Key size in bits.
    #[arg(short, long, default_value = "4096")]
    bits: usize,
}

/// Extract the public key from a private key.
///
/// This is the key that devices are configured with.
#[derive(Debug, Parser)]
struct ExtractPublicCli {
    /// Path to input private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    key: PathBuf,

    /// Path to output PKCS8-encoded public key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,
}

/// Sign a firmware image.
///
/// Prints the digest, size, and base64-encoded signature to publish in the
/// update descriptor.
#[derive(Debug, Parser)]
struct SignCli {
    /// Path to firmware image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    key: PathBuf,

    /// Signature algorithm.
    #[arg(long, value_name = "ALGORITHM", default_value_t, value_enum)]
    algorithm: SignatureAlgorithm,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    GenerateKey(GenerateKeyCli),
    ExtractPublic(ExtractPublicCli),
    Sign(SignCli),
}

/// Generate keys and sign images.
#[derive(Debug, Parser)]
pub struct KeyCli {
    #[command(subcommand)]
    command: KeyCommand,
}
