// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! The update state machine.
//!
//! ```text
//! PENDING -> CHECKING -> DOWNLOADING -> VERIFYING -> INSTALLING -> COMPLETED
//!               |             |             |             |
//!               +-------------+------+------+-------------+
//!                                    v
//!                                  FAILED
//! ```
//!
//! One `UpdateSession` exists per call to [`Updater::check_and_update`]. It
//! is discarded once it reaches a terminal state and only its
//! [`SessionReport`] is returned. `check_and_update` takes `&mut self`, so a
//! second attempt cannot start while one is in flight.

use std::fmt;

use tracing::{info, info_span, warn};

use crate::ota::{
    Error, ErrorCode, ErrorState,
    checker::UpdateChecker,
    fetch::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SIZE, FirmwareFetcher, ProgressDisplay},
    install::{self, FirmwareInstaller},
    report::{StatusReporter, UpdateStatus},
    transport::Transport,
    verify::IntegrityVerifier,
};

/// Progress reported once the image is downloaded. Verification and
/// installation are not measured in bytes, so they share a fixed checkpoint.
pub const VERIFIED_PROGRESS: u8 = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SessionState {
    Pending,
    Checking,
    Downloading,
    Verifying,
    Installing,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Checking)
            | (Self::Checking, Self::Downloading)
            | (Self::Downloading, Self::Verifying)
            | (Self::Verifying, Self::Installing)
            | (Self::Installing, Self::Completed) => true,
            (s, Self::Failed) => !s.is_terminal() && s != Self::Pending,
            _ => false,
        }
    }

    /// Status reported to the control plane when entering this state.
    /// `Checking` and `Verifying` are internal.
    pub fn wire_status(self) -> Option<UpdateStatus> {
        match self {
            Self::Pending => Some(UpdateStatus::Pending),
            Self::Downloading => Some(UpdateStatus::Downloading),
            Self::Installing => Some(UpdateStatus::Installing),
            Self::Completed => Some(UpdateStatus::Completed),
            Self::Failed => Some(UpdateStatus::Failed),
            Self::Checking | Self::Verifying => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Checking => "CHECKING",
            Self::Downloading => "DOWNLOADING",
            Self::Verifying => "VERIFYING",
            Self::Installing => "INSTALLING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };

        f.write_str(s)
    }
}

/// One state change within a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub state: SessionState,
    pub progress: u8,
    pub error: Option<ErrorState>,
    /// `None` if the transition was not reported, otherwise whether the
    /// control plane acknowledged the report.
    pub reported: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseInfo {
    pub release_id: String,
    pub version: String,
}

/// Outcome of one update attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionReport {
    pub device_id: String,
    /// Known once the update check succeeded.
    pub release: Option<ReleaseInfo>,
    /// Always terminal.
    pub state: SessionState,
    pub progress: u8,
    pub transitions: Vec<Transition>,
    pub error: Option<ErrorState>,
}

impl SessionReport {
    /// The only success outcome.
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Whether the session ended because there was nothing to install.
    pub fn is_no_update(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.code == ErrorCode::NoUpdateAvailable)
    }

    /// Progress of the last transition that was sent to the control plane.
    pub fn last_reported_progress(&self) -> Option<u8> {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.reported.is_some())
            .map(|t| t.progress)
    }
}

struct UpdateSession {
    device_id: String,
    release: Option<ReleaseInfo>,
    state: SessionState,
    progress: u8,
    last_error: Option<ErrorState>,
    transitions: Vec<Transition>,
}

impl UpdateSession {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_owned(),
            release: None,
            state: SessionState::Pending,
            progress: 0,
            last_error: None,
            transitions: Vec::new(),
        }
    }

    fn release_id(&self) -> &str {
        self.release.as_ref().map_or("", |r| r.release_id.as_str())
    }

    /// Move to `state` without telling the control plane. Progress never goes
    /// backwards within a session.
    fn enter(&mut self, state: SessionState, progress: u8, error: Option<ErrorState>) {
        debug_assert!(
            self.state.can_transition_to(state),
            "invalid transition {} -> {state}",
            self.state,
        );

        self.state = state;
        self.progress = self.progress.max(progress.min(100));

        if let Some(e) = &error {
            info!("{state} ({}%): {e}", self.progress);
            self.last_error = Some(e.clone());
        } else {
            info!("{state} ({}%)", self.progress);
        }

        self.transitions.push(Transition {
            state,
            progress: self.progress,
            error,
            reported: None,
        });
    }

    /// Move to `state` and report it. A failed report is only logged.
    fn advance<T: Transport>(
        &mut self,
        reporter: &StatusReporter<'_, T>,
        state: SessionState,
        progress: u8,
        error: Option<ErrorState>,
    ) {
        self.enter(state, progress, error);

        let Some(status) = state.wire_status() else {
            return;
        };
        let Some(transition) = self.transitions.last() else {
            return;
        };

        let acked = reporter.report(
            &self.device_id,
            self.release_id(),
            status,
            transition.progress,
            transition.error.as_ref().map(|e| e.message.as_str()),
        );

        if let Some(t) = self.transitions.last_mut() {
            t.reported = Some(acked);
        }
    }

    /// End the session in [`SessionState::Failed`]. `report` is false for
    /// outcomes that are not failures from the control plane's point of view.
    fn fail<T: Transport>(
        mut self,
        reporter: &StatusReporter<'_, T>,
        err: &Error,
        progress: u8,
        report: bool,
    ) -> SessionReport {
        let state = ErrorState::from(err);

        if report {
            self.advance(reporter, SessionState::Failed, progress, Some(state));
        } else {
            self.enter(SessionState::Failed, progress, Some(state));
        }

        self.finish()
    }

    fn finish(self) -> SessionReport {
        debug_assert!(self.state.is_terminal());

        SessionReport {
            device_id: self.device_id,
            release: self.release,
            state: self.state,
            progress: self.progress,
            transitions: self.transitions,
            error: self.last_error,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpdaterOptions {
    pub server_url: String,
    pub device_id: String,
    pub chunk_size: usize,
    pub max_image_size: u64,
}

impl UpdaterOptions {
    pub fn new(server_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_image_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Drives check, download, verify, install, and report for one device.
pub struct Updater<T: Transport, I: FirmwareInstaller> {
    transport: T,
    installer: I,
    verifier: IntegrityVerifier,
    options: UpdaterOptions,
    last_error: Option<ErrorState>,
}

impl<T: Transport, I: FirmwareInstaller> Updater<T, I> {
    pub fn new(
        transport: T,
        installer: I,
        verifier: IntegrityVerifier,
        options: UpdaterOptions,
    ) -> Self {
        Self {
            transport,
            installer,
            verifier,
            options,
            last_error: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn installer(&self) -> &I {
        &self.installer
    }

    /// The error from the most recent attempt, if it did not complete.
    pub fn last_error(&self) -> Option<&ErrorState> {
        self.last_error.as_ref()
    }

    /// Run one complete update attempt. Collaborator failures never panic or
    /// propagate: they end the session in [`SessionState::Failed`] and are
    /// available from the report and from [`Self::last_error`].
    pub fn check_and_update(&mut self, display: Option<&mut dyn ProgressDisplay>) -> SessionReport {
        let _span = info_span!("update", device = %self.options.device_id).entered();

        let report = run_session(
            &self.transport,
            &mut self.installer,
            &self.verifier,
            &self.options,
            display,
        );

        self.last_error.clone_from(&report.error);

        report
    }
}

fn run_session<T: Transport>(
    transport: &T,
    installer: &mut dyn FirmwareInstaller,
    verifier: &IntegrityVerifier,
    options: &UpdaterOptions,
    display: Option<&mut dyn ProgressDisplay>,
) -> SessionReport {
    let checker = UpdateChecker::new(transport, &options.server_url);
    let fetcher = FirmwareFetcher::new(transport)
        .with_chunk_size(options.chunk_size)
        .with_max_size(options.max_image_size);
    let reporter = StatusReporter::new(transport, &options.server_url);

    let mut session = UpdateSession::new(&options.device_id);
    session.enter(SessionState::Checking, 0, None);

    let descriptor = match checker.check_for_update(&options.device_id) {
        Ok(d) => d,
        Err(e) => {
            let report = e.code() != ErrorCode::NoUpdateAvailable;
            return session.fail(&reporter, &e, 0, report);
        }
    };

    session.release = Some(ReleaseInfo {
        release_id: descriptor.release_id.clone(),
        version: descriptor.version.clone(),
    });
    session.advance(&reporter, SessionState::Downloading, 0, None);

    let payload = match fetcher.fetch(&descriptor.binary_url, descriptor.expected_size, display) {
        Ok(p) => p,
        Err(e) => {
            let progress = session.progress;
            return session.fail(&reporter, &e, progress, true);
        }
    };

    session.enter(SessionState::Verifying, VERIFIED_PROGRESS, None);

    if !verifier.signature_required() && descriptor.signature.is_some() {
        warn!("Ignoring signature for release {:?}", descriptor.release_id);
    }

    let verified = match verifier.verify(
        payload,
        &descriptor.expected_hash,
        descriptor.signature.as_deref(),
    ) {
        Ok(p) => p,
        Err(e) => return session.fail(&reporter, &e, VERIFIED_PROGRESS, true),
    };

    session.advance(&reporter, SessionState::Installing, VERIFIED_PROGRESS, None);

    if let Err(e) = install::install(installer, verified) {
        return session.fail(&reporter, &e, VERIFIED_PROGRESS, true);
    }

    session.advance(&reporter, SessionState::Completed, 100, None);
    session.finish()
}
