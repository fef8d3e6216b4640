// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::ota::{Error, Result, VerifiedPayload};

/// Diagnostic text from the firmware installer.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InstallerError(pub String);

impl From<io::Error> for InstallerError {
    fn from(e: io::Error) -> Self {
        Self(e.to_string())
    }
}

/// The device's firmware installer. Implementations own the details of
/// writing and activating a firmware slot.
pub trait FirmwareInstaller {
    /// Prepare to receive an image of exactly `size` bytes.
    fn begin(&mut self, size: usize) -> std::result::Result<(), InstallerError>;

    /// Write image data. Returns the number of bytes accepted, which may be
    /// less than `data.len()` if the installer ran out of space.
    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, InstallerError>;

    /// Finalize the image.
    fn end(&mut self) -> std::result::Result<(), InstallerError>;

    /// Discard an image that was begun, but not finalized.
    fn abort(&mut self);

    /// Whether the new image is complete and ready to boot.
    fn is_finished(&self) -> bool;
}

impl<I: FirmwareInstaller + ?Sized> FirmwareInstaller for &mut I {
    fn begin(&mut self, size: usize) -> std::result::Result<(), InstallerError> {
        (**self).begin(size)
    }

    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, InstallerError> {
        (**self).write(data)
    }

    fn end(&mut self) -> std::result::Result<(), InstallerError> {
        (**self).end()
    }

    fn abort(&mut self) {
        (**self).abort()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
}

/// Hand a verified image to the installer. The payload is consumed and
/// released when this returns, whatever the outcome. Nothing is retried: a
/// partial write ends the attempt.
pub fn install(installer: &mut dyn FirmwareInstaller, payload: VerifiedPayload) -> Result<()> {
    let data = payload.as_bytes();

    installer
        .begin(data.len())
        .map_err(|e| Error::Installation(format!("begin failed: {e}")))?;

    let written = match installer.write(data) {
        Ok(n) => n,
        Err(e) => {
            installer.abort();
            return Err(Error::Installation(format!("write failed: {e}")));
        }
    };

    if written != data.len() {
        installer.abort();
        return Err(Error::Installation(format!(
            "write failed: wrote {written} of {} bytes",
            data.len(),
        )));
    }

    installer
        .end()
        .map_err(|e| Error::Installation(format!("end failed: {e}")))?;

    if !installer.is_finished() {
        return Err(Error::Installation(
            "image not ready to boot after finalizing".to_owned(),
        ));
    }

    info!("Installed {} byte image", data.len());

    Ok(())
}

/// Installer that writes the image to a file, for devices whose firmware slot
/// is exposed as a file (or for testing). The image is staged in a temporary
/// file in the same directory and only replaces the target once complete.
pub struct FileInstaller {
    target: PathBuf,
    staging: Option<NamedTempFile>,
    expected: usize,
    written: usize,
    finished: bool,
}

impl FileInstaller {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            staging: None,
            expected: 0,
            written: 0,
            finished: false,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn parent_dir(&self) -> &Path {
        match self.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl FirmwareInstaller for FileInstaller {
    fn begin(&mut self, size: usize) -> std::result::Result<(), InstallerError> {
        if self.staging.is_some() {
            return Err(InstallerError("an image is already in progress".to_owned()));
        }

        let file = NamedTempFile::new_in(self.parent_dir()).map_err(|e| {
            InstallerError(format!(
                "failed to create staging file in {:?}: {e}",
                self.parent_dir(),
            ))
        })?;
        file.as_file().set_len(size as u64)?;

        debug!("Staging image at {:?}", file.path());

        self.staging = Some(file);
        self.expected = size;
        self.written = 0;
        self.finished = false;

        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, InstallerError> {
        let Some(file) = self.staging.as_mut() else {
            return Err(InstallerError("write without begin".to_owned()));
        };

        let n = data.len().min(self.expected - self.written);
        file.write_all(&data[..n])?;
        self.written += n;

        Ok(n)
    }

    fn end(&mut self) -> std::result::Result<(), InstallerError> {
        let Some(mut file) = self.staging.take() else {
            return Err(InstallerError("end without begin".to_owned()));
        };

        if self.written != self.expected {
            return Err(InstallerError(format!(
                "image incomplete: {} of {} bytes",
                self.written, self.expected,
            )));
        }

        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(&self.target)
            .map_err(|e| InstallerError(format!("failed to persist {:?}: {}", self.target, e.error)))?;

        self.finished = fs::metadata(&self.target)
            .map(|m| m.len() == self.expected as u64)
            .unwrap_or(false);

        Ok(())
    }

    fn abort(&mut self) {
        if let Some(file) = self.staging.take() {
            if let Err(e) = file.close() {
                warn!("Failed to remove staging file: {e}");
            }
        }

        self.written = 0;
        self.finished = false;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
