// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey, traits::PublicKeyParts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("RSA key size ({} bits) not supported", .0 * 8)]
    UnsupportedKeySize(usize),
    #[error("Invalid digest length ({0} bytes) for {1:?}")]
    InvalidDigestLength(usize, SignatureAlgorithm),
    #[error("Failed to load RSA private key")]
    LoadKey(#[source] pkcs8::Error),
    #[error("Failed to save RSA private key")]
    SaveKey(#[source] pkcs8::Error),
    #[error("Failed to load RSA public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to save RSA public key")]
    SavePubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to generate RSA key")]
    RsaGenerate(#[source] Box<rsa::Error>),
    #[error("Failed to RSA sign digest")]
    RsaSign(#[source] Box<rsa::Error>),
    #[error("Failed to RSA verify signature")]
    RsaVerify(#[source] Box<rsa::Error>),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Signature schemes accepted for firmware images. Both sign the SHA-256
/// digest of the image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    /// RSASSA-PSS with SHA-256 and a salt as long as the digest. This is what
    /// the control plane's signer produces.
    #[default]
    Sha256WithRsaPss,
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Sha256WithRsaPkcs1v15,
}

impl SignatureAlgorithm {
    /// Length of digest required by the signing algorithm.
    pub fn digest_len(self) -> usize {
        Sha256::output_size()
    }
}

/// Largest supported key size in bytes. This is also the largest valid
/// signature size.
pub const MAX_KEY_SIZE: usize = 4096 / 8;

fn check_key_size(size: usize) -> Result<()> {
    // RustCrypto does not support 8192-bit keys.
    if size > MAX_KEY_SIZE {
        return Err(Error::UnsupportedKeySize(size));
    }

    Ok(())
}

/// Largest PSS salt that fits in an encoded message for a modulus of
/// `modulus_bits` bits.
fn pss_max_salt_len(modulus_bits: usize, digest_len: usize) -> usize {
    let em_len = modulus_bits.saturating_sub(1).div_ceil(8);
    em_len.saturating_sub(digest_len + 2)
}

pub trait RsaPublicKeyExt {
    fn verify_sig(&self, algo: SignatureAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()>;
}

impl RsaPublicKeyExt for RsaPublicKey {
    /// Verify the signature against the specified key.
    fn verify_sig(&self, algo: SignatureAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()> {
        // Check this explicitly so we can provide a better error message.
        if digest.len() != algo.digest_len() {
            return Err(Error::InvalidDigestLength(digest.len(), algo));
        }

        check_key_size(self.size())?;

        let result = match algo {
            // Accept both the digest-length salt and the maximum salt length,
            // which is the default for Go's crypto/rsa signer.
            SignatureAlgorithm::Sha256WithRsaPss => self
                .verify(Pss::new::<Sha256>(), digest, signature)
                .or_else(|_| {
                    let salt_len = pss_max_salt_len(self.n().bits(), algo.digest_len());
                    self.verify(Pss::new_with_salt::<Sha256>(salt_len), digest, signature)
                }),
            SignatureAlgorithm::Sha256WithRsaPkcs1v15 => {
                self.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            }
        };

        result.map_err(|e| Error::RsaVerify(Box::new(e)))
    }
}

/// Sign a digest. This is only used for producing test and development images.
/// Devices never hold a private key.
pub fn sign_digest(key: &RsaPrivateKey, algo: SignatureAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
    if digest.len() != algo.digest_len() {
        return Err(Error::InvalidDigestLength(digest.len(), algo));
    }

    check_key_size(key.size())?;

    let result = match algo {
        SignatureAlgorithm::Sha256WithRsaPss => {
            let mut rng = rand::thread_rng();
            key.sign_with_rng(&mut rng, Pss::new::<Sha256>(), digest)
        }
        SignatureAlgorithm::Sha256WithRsaPkcs1v15 => {
            key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)
        }
    };

    result.map_err(|e| Error::RsaSign(Box::new(e)))
}

/// Generate an RSA private key with the specified number of bits.
pub fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey> {
    check_key_size(bits / 8)?;

    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, bits).map_err(|e| Error::RsaGenerate(Box::new(e)))?;

    Ok(key)
}

/// Parse a PEM-encoded PKCS8 (SPKI) public key.
pub fn parse_pem_public_key(data: &str) -> Result<RsaPublicKey> {
    let key = RsaPublicKey::from_public_key_pem(data).map_err(Error::LoadPubKey)?;

    check_key_size(key.size())?;

    Ok(key)
}

/// Read PEM-encoded PKCS8 public key from a reader.
pub fn read_pem_public_key(path: &Path, mut reader: impl Read) -> Result<RsaPublicKey> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    parse_pem_public_key(&data)
}

/// Read PEM-encoded PKCS8 public key from a file.
pub fn read_pem_public_key_file(path: &Path) -> Result<RsaPublicKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_public_key(path, reader)
}

/// Write PEM-encoded PKCS8 public key to a file.
pub fn write_pem_public_key_file(path: &Path, key: &RsaPublicKey) -> Result<()> {
    let data = key
        .to_public_key_pem(LineEnding::LF)
        .map_err(Error::SavePubKey)?;

    fs::write(path, data).map_err(|e| Error::WriteFile(path.to_owned(), e))
}

/// Read PEM-encoded unencrypted PKCS8 private key from a file.
pub fn read_pem_key_file(path: &Path) -> Result<RsaPrivateKey> {
    let data = fs::read_to_string(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    RsaPrivateKey::from_pkcs8_pem(&data).map_err(Error::LoadKey)
}

/// Save PEM-encoded unencrypted PKCS8 private key to a file.
pub fn write_pem_key_file(path: &Path, key: &RsaPrivateKey) -> Result<()> {
    let data = key.to_pkcs8_pem(LineEnding::LF).map_err(Error::SaveKey)?;

    let mut options = OpenOptions::new();
    options.write(true);
    options.create(true);
    options.truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut writer = options
        .open(path)
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    writer
        .write_all(data.as_bytes())
        .map_err(|e| Error::WriteFile(path.to_owned(), e))
}
