//! Per-role watch state.
//!
//! ```text
//! Idle ──set_source──▶ Armed ──change seen──▶ Converting ──▶ Armed
//!   ▲                    │
//!   └───set_source(None)─┘
//! ```
//!
//! A change is seen only when the mtime moved past the last observed one
//! **and** the content fingerprint differs from the last recorded one.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::fingerprint::{ContentHash, compute_file_hash, get_mtime};
use crate::core::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No source selected.
    Idle,
    /// Source selected, waiting for a change.
    Armed,
    /// A conversion for this role is running.
    Converting,
}

impl WatchState {
    pub const fn of(has_source: bool, converting: bool) -> Self {
        match (has_source, converting) {
            (false, _) => Self::Idle,
            (true, true) => Self::Converting,
            (true, false) => Self::Armed,
        }
    }
}

/// Result of polling a target once.
#[derive(Debug)]
pub enum Observation {
    Idle,
    Unchanged,
    /// Newer mtime, same content.
    Touched { modified: SystemTime },
    /// Transient read failure, retried next tick.
    Unreadable(io::Error),
    Changed {
        fingerprint: ContentHash,
        modified: SystemTime,
    },
}

#[derive(Debug)]
pub struct WatchTarget {
    role: Role,
    source: Option<PathBuf>,
    fingerprint: Option<ContentHash>,
    observed: Option<SystemTime>,
}

impl WatchTarget {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            source: None,
            fingerprint: None,
            observed: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Select a new source, or clear it. History is reset either way, so a
    /// newly selected file converts on the next observation.
    pub fn set_source(&mut self, source: Option<PathBuf>) {
        self.source = source;
        self.rearm();
    }

    /// Forget what was processed; the next readable observation converts.
    pub fn rearm(&mut self) {
        self.fingerprint = None;
        self.observed = None;
    }

    pub fn observe(&self) -> Observation {
        let Some(source) = &self.source else {
            return Observation::Idle;
        };

        let modified = match get_mtime(source) {
            Ok(modified) => modified,
            Err(e) => return Observation::Unreadable(e),
        };
        if self.observed.is_some_and(|observed| modified <= observed) {
            return Observation::Unchanged;
        }

        match compute_file_hash(source) {
            Ok(fingerprint) if self.fingerprint == Some(fingerprint) => {
                Observation::Touched { modified }
            }
            Ok(fingerprint) => Observation::Changed {
                fingerprint,
                modified,
            },
            Err(e) => Observation::Unreadable(e),
        }
    }

    /// Fingerprint and mtime of the source right now, for forced refreshes.
    pub fn snapshot(&self) -> io::Result<Option<(ContentHash, SystemTime)>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };
        Ok(Some((compute_file_hash(source)?, get_mtime(source)?)))
    }

    /// Remember an mtime whose content was already processed.
    pub fn touch(&mut self, modified: SystemTime) {
        self.observed = Some(modified);
    }

    /// Record a finished conversion.
    ///
    /// The fingerprint is kept even on failure, so an unconvertible file is
    /// not retried until its content changes again.
    pub fn record(&mut self, fingerprint: ContentHash, modified: SystemTime, success: bool) {
        self.fingerprint = Some(fingerprint);
        if success {
            self.observed = Some(modified);
        }
    }
}
