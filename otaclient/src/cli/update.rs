// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser};
use tracing::{info, warn};

use crate::{
    config::{self, Config},
    crypto::{self, SignatureAlgorithm},
    ota::{
        DownloadedPayload, ErrorCode,
        checker::UpdateChecker,
        fetch::{BasicProgressDisplay, ProgressDisplay},
        install::FileInstaller,
        session::Updater,
        transport::HttpTransport,
        verify::IntegrityVerifier,
    },
};

fn load_config(group: &ConfigGroup) -> Result<Config> {
    let mut config = config::load_config(&group.config)
        .with_context(|| format!("Failed to load config: {:?}", group.config))?;

    if let Some(url) = &group.server_url {
        config.server_url.clone_from(url);
    }
    if let Some(id) = &group.device_id {
        config.device_id.clone_from(id);
    }
    if group.insecure_skip_signature {
        warn!("Signature verification disabled from the command line");
        config.verify_signature = false;
    }

    config.validate()?;

    Ok(config)
}

fn load_verifier(
    public_key: Option<&Path>,
    algorithm: SignatureAlgorithm,
    required: bool,
) -> Result<IntegrityVerifier> {
    if !required {
        return Ok(IntegrityVerifier::digest_only());
    }

    let path = public_key.context("A public key is required to verify signatures")?;
    let key = crypto::read_pem_public_key_file(path)
        .with_context(|| format!("Failed to load public key: {path:?}"))?;

    Ok(IntegrityVerifier::new(key, algorithm))
}

fn load_transport(config: &Config) -> Result<HttpTransport> {
    let options = config.http_options()?;

    HttpTransport::new(&options).context("Failed to initialize HTTP client")
}

pub fn update_main(cli: &UpdateCli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let transport = load_transport(&config)?;
    let installer = FileInstaller::new(&config.install.target);
    let verifier = load_verifier(
        config.public_key.as_deref(),
        config.signature_algorithm,
        config.verify_signature,
    )?;

    let mut updater = Updater::new(transport, installer, verifier, config.updater_options());

    let mut progress = BasicProgressDisplay::new(Duration::from_millis(50));
    let display: Option<&mut dyn ProgressDisplay> = if cli.no_progress {
        None
    } else {
        Some(&mut progress)
    };

    let report = updater.check_and_update(display);

    if report.is_completed() {
        let release = report
            .release
            .as_ref()
            .map_or("", |r| r.release_id.as_str());
        info!(
            "Installed release {release:?} to {:?}",
            updater.installer().target(),
        );
    } else if report.is_no_update() {
        info!("No update available for device {:?}", config.device_id);
    } else {
        match &report.error {
            Some(e) => bail!("Update failed in state {}: {e}", report.state),
            None => bail!("Update failed in state {}", report.state),
        }
    }

    Ok(())
}

pub fn check_main(cli: &CheckCli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let transport = load_transport(&config)?;
    let checker = UpdateChecker::new(&transport, &config.server_url);

    let descriptor = match checker.check_for_update(&config.device_id) {
        Ok(d) => d,
        Err(e) if e.code() == ErrorCode::NoUpdateAvailable => {
            info!("No update available for device {:?}", config.device_id);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to check for update"),
    };

    println!("Release ID: {}", descriptor.release_id);
    println!("Version: {}", descriptor.version);
    println!("URL: {}", descriptor.binary_url);
    println!("Size: {}", descriptor.expected_size);
    println!("SHA-256: {}", descriptor.expected_hash);
    println!(
        "Signature: {}",
        descriptor.signature.as_deref().unwrap_or("<none>"),
    );
    if !descriptor.release_notes.is_empty() {
        println!("Release notes: {}", descriptor.release_notes);
    }

    Ok(())
}

pub fn verify_main(cli: &VerifyCli) -> Result<()> {
    let verifier = load_verifier(
        cli.public_key.as_deref(),
        cli.algorithm,
        cli.public_key.is_some(),
    )?;

    let data =
        fs::read(&cli.input).with_context(|| format!("Failed to read image: {:?}", cli.input))?;
    let payload = DownloadedPayload::from_local(data);

    let verified = verifier
        .verify(payload, &cli.hash, cli.signature.as_deref())
        .with_context(|| format!("Failed to verify image: {:?}", cli.input))?;

    info!("Image is valid: {} bytes", verified.len());

    Ok(())
}

#[derive(Debug, Args)]
pub struct ConfigGroup {
    /// Path to client config.
    #[arg(short, long, value_name = "FILE", value_parser)]
    config: PathBuf,

    /// Override the control plane URL from the config.
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,

    /// Override the device ID from the config.
    #[arg(long, value_name = "ID")]
    device_id: Option<String>,

    /// (For development only) Do not verify firmware signatures.
    ///
    /// Only the image digest is checked. Anyone who can tamper with the update
    /// descriptor can then install arbitrary firmware.
    #[arg(long)]
    insecure_skip_signature: bool,
}

/// Check for an update and install it.
///
/// Exits with an error unless the update was installed or there was no update
/// available.
#[derive(Debug, Parser)]
pub struct UpdateCli {
    #[command(flatten)]
    config: ConfigGroup,

    /// Do not show download progress.
    #[arg(long)]
    no_progress: bool,
}

/// Ask the control plane for an update and print it without installing.
#[derive(Debug, Parser)]
pub struct CheckCli {
    #[command(flatten)]
    config: ConfigGroup,
}

/// Verify a local firmware image.
///
/// If no public key is given, only the SHA-256 digest is checked.
#[derive(Debug, Parser)]
pub struct VerifyCli {
    /// Path to firmware image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Expected SHA-256 digest in hex.
    #[arg(long, value_name = "HEX")]
    hash: String,

    /// Base64-encoded signature.
    #[arg(long, value_name = "BASE64", requires = "public_key")]
    signature: Option<String>,

    /// Path to PEM-encoded public key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    public_key: Option<PathBuf>,

    /// Signature algorithm.
    #[arg(long, value_name = "ALGORITHM", default_value_t, value_enum)]
    algorithm: SignatureAlgorithm,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use base64::{Engine, engine::general_purpose::STANDARD};

    use crate::ota::verify;

    use super::*;

    fn write_config(dir: &Path, extra: &str) -> PathBuf {
        let path = dir.join("otaclient.toml");
        let contents = format!(
            r#"
            server_url = "https://ota.example.com"
            device_id = "dev1"
            {extra}

            [install]
            target = "slot.bin"
            "#,
        );
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"public_key = "release.pub.pem""#);

        let config = load_config(&ConfigGroup {
            config: path,
            server_url: Some("https://staging.example.com".to_owned()),
            device_id: Some("dev2".to_owned()),
            insecure_skip_signature: true,
        })
        .unwrap();

        assert_eq!(config.server_url, "https://staging.example.com");
        assert_eq!(config.device_id, "dev2");
        assert!(!config.verify_signature);
    }

    #[test]
    fn config_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");

        let err = load_config(&ConfigGroup {
            config: path,
            server_url: None,
            device_id: None,
            insecure_skip_signature: false,
        })
        .unwrap_err();

        assert_matches!(
            err.downcast_ref::<config::Error>(),
            Some(config::Error::Invalid(_))
        );
    }

    #[test]
    fn verify_local_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.bin");
        let key_path = dir.path().join("release.pub.pem");
        fs::write(&image, b"firmware").unwrap();

        let key = verify::tests::test_key();
        crypto::write_pem_public_key_file(&key_path, &key.to_public_key()).unwrap();

        let digest = verify::sha256(b"firmware");
        let signature =
            crypto::sign_digest(key, SignatureAlgorithm::Sha256WithRsaPss, &digest).unwrap();

        let mut cli = VerifyCli {
            input: image,
            hash: hex::encode(digest),
            signature: Some(STANDARD.encode(signature)),
            public_key: Some(key_path),
            algorithm: SignatureAlgorithm::Sha256WithRsaPss,
        };
        verify_main(&cli).unwrap();

        cli.signature = None;
        assert!(verify_main(&cli).is_err());

        cli.public_key = None;
        verify_main(&cli).unwrap();

        cli.hash = "0".repeat(64);
        assert!(verify_main(&cli).is_err());
    }
}
