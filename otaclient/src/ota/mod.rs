// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Device-side firmware update pipeline.
//!
//! The pipeline is strictly sequential: [`checker`] asks the control plane
//! whether there is a release for this device, [`fetch`] streams the image
//! into memory, [`verify`] checks the digest and signature, and [`install`]
//! hands the verified bytes to the firmware installer. [`session`] drives the
//! stages and [`report`] tells the control plane what happened.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod checker;
pub mod fetch;
pub mod install;
pub mod report;
pub mod session;
pub mod transport;
pub mod verify;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Coarse classification of a pipeline failure. This is what callers branch
/// on. The detailed cause is in [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not a failure. The control plane has nothing for this device.
    NoUpdateAvailable,
    NetworkError,
    DownloadError,
    VerificationError,
    InstallationError,
    InvalidResponse,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoUpdateAvailable => "no update available",
            Self::NetworkError => "network error",
            Self::DownloadError => "download error",
            Self::VerificationError => "verification error",
            Self::InstallationError => "installation error",
            Self::InvalidResponse => "invalid response",
        };

        f.write_str(s)
    }
}

/// Why a signature check failed. Both causes map to
/// [`ErrorCode::VerificationError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureFailure {
    Decode,
    Crypto,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No update available for device: {0:?}")]
    NoUpdateAvailable(String),
    #[error("Update check failed with HTTP status {0}")]
    CheckStatus(u16),
    #[error("Failed to send update check request")]
    CheckRequest(#[source] transport::Error),
    #[error("Failed to parse update descriptor")]
    DescriptorParse(#[source] serde_json::Error),
    #[error("Update descriptor is missing required field: {0}")]
    DescriptorMissingField(&'static str),
    #[error("Update descriptor has invalid field {0}: {1}")]
    DescriptorInvalidField(&'static str, String),
    #[error("Download failed with HTTP status {0}")]
    DownloadStatus(u16),
    #[error("Failed to start download")]
    DownloadRequest(#[source] transport::Error),
    #[error("Download failed: invalid length: {0:?}")]
    DownloadInvalidLength(Option<u64>),
    #[error("Download failed: declared length {declared} exceeds limit of {limit} bytes")]
    DownloadTooLarge { declared: u64, limit: u64 },
    #[error("Download failed after {received} bytes")]
    DownloadRead {
        received: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("Download failed: size mismatch: expected {expected} bytes, but received {actual}")]
    DownloadSizeMismatch { expected: u64, actual: u64 },
    #[error("Verification failed: hash mismatch: expected {expected}, but have {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("Verification failed: signature invalid: {0}")]
    SignatureInvalid(String, SignatureFailure),
    #[error("Verification failed: signature is {0} bytes, but at most {1} bytes are allowed")]
    SignatureTooLarge(usize, usize),
    #[error("Verification failed: signature required, but none was supplied")]
    SignatureMissing,
    #[error("Verification failed: signature required, but no public key is configured")]
    PublicKeyMissing,
    #[error("Installation failed: {0}")]
    Installation(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoUpdateAvailable(_) => ErrorCode::NoUpdateAvailable,
            Self::CheckStatus(_) | Self::CheckRequest(_) => ErrorCode::NetworkError,
            Self::DescriptorParse(_)
            | Self::DescriptorMissingField(_)
            | Self::DescriptorInvalidField(..) => ErrorCode::InvalidResponse,
            Self::DownloadStatus(_)
            | Self::DownloadRequest(_)
            | Self::DownloadInvalidLength(_)
            | Self::DownloadTooLarge { .. }
            | Self::DownloadRead { .. }
            | Self::DownloadSizeMismatch { .. } => ErrorCode::DownloadError,
            Self::HashMismatch { .. }
            | Self::SignatureInvalid(..)
            | Self::SignatureTooLarge(..)
            | Self::SignatureMissing
            | Self::PublicKeyMissing => ErrorCode::VerificationError,
            Self::Installation(_) => ErrorCode::InstallationError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The last failure of an update attempt, as seen by the caller of
/// [`session::Updater::check_and_update`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorState {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorState {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Metadata for a firmware image that the control plane wants this device to
/// install. Only [`checker::parse_descriptor`] constructs these, so every
/// instance has passed validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirmwareUpdateDescriptor {
    pub release_id: String,
    pub version: String,
    pub binary_url: String,
    pub expected_size: u64,
    /// Lowercase hex SHA-256 digest.
    pub expected_hash: String,
    /// Base64-encoded signature. Empty strings from the server are treated as
    /// absent.
    pub signature: Option<String>,
    pub release_notes: String,
}

/// Firmware bytes that were fully received, but not yet verified.
pub struct DownloadedPayload {
    data: Vec<u8>,
}

impl DownloadedPayload {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Wrap bytes that came from somewhere other than [`fetch`], like a local
    /// file. They still have to go through [`verify`] before installation.
    pub fn from_local(data: Vec<u8>) -> Self {
        Self::new(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for DownloadedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedPayload")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Firmware bytes whose digest (and signature, if required) checked out. This
/// can only be obtained from [`verify::IntegrityVerifier::verify`], which is
/// what keeps unverified data away from the installer.
pub struct VerifiedPayload {
    data: Vec<u8>,
}

impl VerifiedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for VerifiedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedPayload")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            Error::NoUpdateAvailable("dev".into()).code(),
            ErrorCode::NoUpdateAvailable,
        );
        assert_eq!(Error::CheckStatus(500).code(), ErrorCode::NetworkError);
        assert_eq!(
            Error::DescriptorMissingField("release_id").code(),
            ErrorCode::InvalidResponse,
        );
        assert_eq!(
            Error::DownloadSizeMismatch {
                expected: 10,
                actual: 9,
            }
            .code(),
            ErrorCode::DownloadError,
        );
        assert_eq!(Error::SignatureMissing.code(), ErrorCode::VerificationError);
        assert_eq!(
            Error::Installation("begin failed".into()).code(),
            ErrorCode::InstallationError,
        );
    }

    #[test]
    fn error_state_message() {
        let state = ErrorState::from(&Error::DownloadInvalidLength(Some(0)));
        assert_eq!(state.code, ErrorCode::DownloadError);
        assert!(state.message.contains("invalid length"));
    }
}
