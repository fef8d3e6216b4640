// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::Read;

use serde::Deserialize;
use tracing::{debug, info};

use crate::ota::{
    Error, FirmwareUpdateDescriptor, HASH_HEX_LEN, Result,
    transport::{self, Transport},
};

/// Upper bound on the size of a descriptor document. Anything bigger is not a
/// descriptor.
const MAX_DESCRIPTOR_SIZE: u64 = 64 * 1024;

/// Raw descriptor as it appears on the wire. Every field is optional here so
/// that missing fields are reported by name instead of as a generic parse
/// error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDescriptor {
    release_id: Option<String>,
    version: Option<String>,
    binary_url: Option<String>,
    binary_hash: Option<String>,
    binary_size: Option<i64>,
    signature: Option<String>,
    release_notes: Option<String>,
}

fn non_empty(value: Option<String>, name: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::DescriptorMissingField(name)),
    }
}

/// Parse and validate a descriptor document.
pub fn parse_descriptor(data: &[u8]) -> Result<FirmwareUpdateDescriptor> {
    let raw: RawDescriptor = serde_json::from_slice(data).map_err(Error::DescriptorParse)?;

    let release_id = non_empty(raw.release_id, "release_id")?;
    let binary_url = non_empty(raw.binary_url, "binary_url")?;
    let expected_hash = non_empty(raw.binary_hash, "binary_hash")?;

    if expected_hash.len() != HASH_HEX_LEN || !expected_hash.bytes().all(|c| c.is_ascii_hexdigit())
    {
        return Err(Error::DescriptorInvalidField(
            "binary_hash",
            format!("not a {HASH_HEX_LEN}-digit hex string: {expected_hash:?}"),
        ));
    }

    let expected_size = match raw.binary_size {
        Some(s) if s > 0 => s as u64,
        Some(s) => {
            return Err(Error::DescriptorInvalidField(
                "binary_size",
                format!("must be positive: {s}"),
            ));
        }
        None => return Err(Error::DescriptorMissingField("binary_size")),
    };

    Ok(FirmwareUpdateDescriptor {
        release_id,
        version: raw.version.unwrap_or_default(),
        binary_url,
        expected_size,
        expected_hash: expected_hash.to_ascii_lowercase(),
        signature: raw.signature.filter(|s| !s.is_empty()),
        release_notes: raw.release_notes.unwrap_or_default(),
    })
}

/// Asks the control plane whether there is a release for a device.
pub struct UpdateChecker<'a, T: Transport> {
    transport: &'a T,
    server_url: &'a str,
}

impl<'a, T: Transport> UpdateChecker<'a, T> {
    pub fn new(transport: &'a T, server_url: &'a str) -> Self {
        Self {
            transport,
            server_url,
        }
    }

    pub fn url(&self, device_id: &str) -> String {
        format!(
            "{}/api/v1/ota/updates/{device_id}",
            self.server_url.trim_end_matches('/'),
        )
    }

    /// Issue a single update check. A 404 is the normal "nothing to do" answer
    /// and is returned as [`Error::NoUpdateAvailable`]. There are no retries.
    pub fn check_for_update(&self, device_id: &str) -> Result<FirmwareUpdateDescriptor> {
        let url = self.url(device_id);
        debug!("Checking for update: {url}");

        let response = self.transport.get(&url).map_err(Error::CheckRequest)?;

        if response.status == 404 {
            return Err(Error::NoUpdateAvailable(device_id.to_owned()));
        } else if response.status != 200 {
            return Err(Error::CheckStatus(response.status));
        }

        let mut data = Vec::new();
        response
            .body
            .take(MAX_DESCRIPTOR_SIZE + 1)
            .read_to_end(&mut data)
            .map_err(|e| Error::CheckRequest(transport::Error::Connection(e.to_string())))?;

        if data.len() as u64 > MAX_DESCRIPTOR_SIZE {
            return Err(Error::DescriptorInvalidField(
                "<document>",
                format!("larger than {MAX_DESCRIPTOR_SIZE} bytes"),
            ));
        }

        let descriptor = parse_descriptor(&data)?;

        info!(
            "Update available: release {:?}, version {:?}, {} bytes",
            descriptor.release_id, descriptor.version, descriptor.expected_size,
        );

        Ok(descriptor)
    }
}
