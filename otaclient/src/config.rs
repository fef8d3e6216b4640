// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    crypto::SignatureAlgorithm,
    ota::{
        fetch::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SIZE},
        session::UpdaterOptions,
        transport::HttpOptions,
    },
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Failed to read trusted root certificate: {0:?}")]
    ReadRootCert(PathBuf, #[source] io::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, Error>;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Http {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Download {
    pub chunk_size: usize,
    pub max_image_size: u64,
}

impl Default for Download {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_image_size: DEFAULT_MAX_SIZE,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Install {
    /// Firmware slot written by the file-backed installer.
    pub target: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server_url: String,
    pub device_id: String,
    /// PEM-encoded RSA public key used to verify firmware signatures.
    #[serde(default)]
    pub public_key: Option<PathBuf>,
    /// PEM-encoded root certificate to trust for the control plane.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Disable TLS certificate validation. Never use in production.
    #[serde(default)]
    pub insecure: bool,
    /// Disable firmware signature verification. Never use in production.
    #[serde(default = "default_true")]
    pub verify_signature: bool,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub download: Download,
    pub install: Install,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(Error::Invalid("server_url is empty".to_owned()));
        } else if self.device_id.trim().is_empty() {
            return Err(Error::Invalid("device_id is empty".to_owned()));
        } else if self.device_id.contains('/') {
            return Err(Error::Invalid(format!(
                "device_id contains '/': {:?}",
                self.device_id,
            )));
        } else if self.verify_signature && self.public_key.is_none() {
            return Err(Error::Invalid(
                "public_key is required when verify_signature is enabled".to_owned(),
            ));
        } else if self.download.chunk_size == 0 {
            return Err(Error::Invalid("download.chunk_size must be positive".to_owned()));
        }

        Ok(())
    }

    pub fn http_options(&self) -> Result<HttpOptions> {
        let root_cert = self
            .ca_cert
            .as_ref()
            .map(|p| fs::read(p).map_err(|e| Error::ReadRootCert(p.clone(), e)))
            .transpose()?;

        Ok(HttpOptions {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            root_cert,
            insecure: self.insecure,
        })
    }

    pub fn updater_options(&self) -> UpdaterOptions {
        UpdaterOptions {
            server_url: self.server_url.clone(),
            device_id: self.device_id.clone(),
            chunk_size: self.download.chunk_size,
            max_image_size: self.download.max_image_size,
        }
    }
}

pub fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let config: Config =
        toml_edit::de::from_str(contents).map_err(|e| Error::Parse(path.to_owned(), e))?;

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

    parse_config(path, &contents)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MINIMAL: &str = r#"
        server_url = "https://ota.example.com"
        device_id = "dev1"
        public_key = "/etc/otaclient/release.pub.pem"

        [install]
        target = "/var/lib/otaclient/slot.bin"
    "#;

    #[test]
    fn defaults() {
        let config = parse_config(Path::new("test.toml"), MINIMAL).unwrap();
        config.validate().unwrap();

        assert!(config.verify_signature);
        assert!(!config.insecure);
        assert_eq!(config.ca_cert, None);
        assert_eq!(
            config.signature_algorithm,
            SignatureAlgorithm::Sha256WithRsaPss,
        );
        assert_eq!(config.http, Http::default());
        assert_eq!(config.download, Download::default());

        let options = config.updater_options();
        assert_eq!(options.server_url, "https://ota.example.com");
        assert_eq!(options.device_id, "dev1");
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);

        let http = config.http_options().unwrap();
        assert_eq!(http.connect_timeout, Duration::from_secs(10));
        assert_eq!(http.root_cert, None);
    }

    #[test]
    fn full() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("ca.pem");
        fs::write(&cert, b"-----BEGIN CERTIFICATE-----\n").unwrap();

        let contents = format!(
            r#"
            server_url = "https://ota.example.com"
            device_id = "dev1"
            ca_cert = {cert:?}
            verify_signature = false
            signature_algorithm = "sha256-with-rsa-pkcs1v15"

            [http]
            connect_timeout_secs = 1
            read_timeout_secs = 2

            [download]
            chunk_size = 128
            max_image_size = 1048576

            [install]
            target = "slot.bin"
            "#,
        );

        let config = parse_config(Path::new("test.toml"), &contents).unwrap();
        config.validate().unwrap();

        assert_eq!(config.download.chunk_size, 128);
        assert_eq!(config.download.max_image_size, 1048576);

        let http = config.http_options().unwrap();
        assert_eq!(http.read_timeout, Duration::from_secs(2));
        assert_eq!(
            http.root_cert.as_deref(),
            Some(b"-----BEGIN CERTIFICATE-----\n".as_slice()),
        );
    }

    #[test]
    fn signature_requires_key() {
        let mut config = parse_config(Path::new("test.toml"), MINIMAL).unwrap();
        config.public_key = None;

        assert_matches!(config.validate(), Err(Error::Invalid(_)));

        config.verify_signature = false;
        config.validate().unwrap();
    }

    #[test]
    fn invalid_values() {
        let mut config = parse_config(Path::new("test.toml"), MINIMAL).unwrap();
        config.device_id = "../dev".to_owned();
        assert_matches!(config.validate(), Err(Error::Invalid(_)));

        let mut config = parse_config(Path::new("test.toml"), MINIMAL).unwrap();
        config.server_url = " ".to_owned();
        assert_matches!(config.validate(), Err(Error::Invalid(_)));

        let mut config = parse_config(Path::new("test.toml"), MINIMAL).unwrap();
        config.download.chunk_size = 0;
        assert_matches!(config.validate(), Err(Error::Invalid(_)));
    }

    #[test]
    fn unknown_field() {
        let contents = format!("{MINIMAL}\nretries = 3\n");

        assert_matches!(
            parse_config(Path::new("test.toml"), &contents),
            Err(Error::Parse(..))
        );
    }
}
