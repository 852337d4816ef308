//! Role worker thread.
//!
//! One thread per role polls its target and runs conversions inline. All
//! requests for a role go through its inbox, so manual refreshes and
//! automatic ones never overlap.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender, select};

use super::fingerprint::ContentHash;
use super::target::{Observation, WatchTarget};
use crate::convert::{ConversionRequest, Converter, Outcome};
use crate::core::{Role, is_shutdown};
use crate::logger::{status_error, status_success};
use crate::output::{Placement, on_custom_number_change};
use crate::{debug, log};

/// Messages accepted by a role worker.
#[derive(Debug)]
pub enum Command {
    /// Select or clear the source; a selected source converts right away.
    SetSource(Option<PathBuf>),
    /// Convert now, even if the source did not change.
    Refresh,
    /// Output settings were replaced. `refresh` is false when a new source
    /// selection follows, which converts with the new settings anyway.
    OutputChanged {
        previous: Arc<Placement>,
        refresh: bool,
    },
    SetInterval(Duration),
    Shutdown,
}

/// Result of one conversion attempt, for whoever is listening.
#[derive(Debug, Clone)]
pub struct Report {
    pub role: Role,
    pub source: PathBuf,
    pub result: Result<Outcome, String>,
}

/// Marks a role as converting for as long as it lives.
pub struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// `None` if a conversion for this role is already running.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(super) struct RoleWorker {
    pub target: WatchTarget,
    pub converter: Arc<Converter>,
    pub output: Arc<ArcSwap<Placement>>,
    pub in_flight: Arc<AtomicBool>,
    pub interval: Duration,
    pub inbox: Receiver<Command>,
    pub reports: Sender<Report>,
}

impl RoleWorker {
    pub fn run(mut self) {
        let role = self.target.role();
        debug!(role.label(); "worker started");

        loop {
            select! {
                recv(self.inbox) -> msg => match msg {
                    Ok(Command::SetSource(source)) => {
                        self.target.set_source(source);
                        self.tick();
                    }
                    Ok(Command::Refresh) => self.force(),
                    Ok(Command::OutputChanged { previous, refresh }) => {
                        self.output_changed(&previous, refresh);
                    }
                    Ok(Command::SetInterval(interval)) => self.interval = interval,
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                default(self.interval) => self.tick(),
            }

            if is_shutdown() {
                break;
            }
        }

        debug!(role.label(); "worker stopped");
    }

    fn tick(&mut self) {
        match self.target.observe() {
            Observation::Idle | Observation::Unchanged => {}
            Observation::Touched { modified } => self.target.touch(modified),
            Observation::Unreadable(e) => {
                if let Some(source) = self.target.source() {
                    debug!(self.target.role().label(); "cannot read {} yet: {}", source.display(), e);
                }
            }
            Observation::Changed {
                fingerprint,
                modified,
            } => {
                debug!(self.target.role().label(); "content changed ({})", fingerprint);
                self.convert(fingerprint, modified);
            }
        }
    }

    /// Convert regardless of change detection.
    fn force(&mut self) {
        match self.target.snapshot() {
            Ok(Some((fingerprint, modified))) => self.convert(fingerprint, modified),
            Ok(None) => {}
            Err(e) => {
                // Unreadable right now; let polling pick it up.
                debug!(self.target.role().label(); "refresh deferred: {}", e);
                self.target.rearm();
            }
        }
    }

    fn output_changed(&mut self, previous: &Placement, refresh: bool) {
        let current = self.output.load_full();
        if self.target.role() == Role::Paint {
            match on_custom_number_change(previous, &current) {
                Ok(Some(path)) => log!("paint"; "removed {}", path.display()),
                Ok(None) => {}
                Err(e) => status_error("could not remove custom-numbered paint", &e.to_string()),
            }
        }
        if refresh {
            self.force();
        }
    }

    fn convert(&mut self, fingerprint: ContentHash, modified: SystemTime) {
        let role = self.target.role();
        let Some(source) = self.target.source().map(PathBuf::from) else {
            return;
        };
        let Some(_guard) = InFlight::try_acquire(&self.in_flight) else {
            debug!(role.label(); "conversion already running, skipping");
            return;
        };

        let request = ConversionRequest {
            role,
            source: source.clone(),
            output: self.output.load_full(),
        };

        let result = self.converter.refresh(&request);
        match &result {
            Ok(Outcome::Written(path)) => {
                status_success(&format!("{role} refreshed: {}", path.display()));
            }
            Ok(Outcome::Skipped) => {
                log!(role.label(); "unsupported file type: {}", source.display());
            }
            Err(e) => {
                status_error(&format!("{role} conversion failed for {}", source.display()), &e.to_string());
            }
        }
        self.target.record(fingerprint, modified, result.is_ok());

        let _ = self.reports.send(Report {
            role,
            source,
            result: result.map_err(|e| e.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::try_acquire(&flag).unwrap();
        assert!(flag.load(Ordering::Acquire));
        assert!(InFlight::try_acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlight::try_acquire(&flag).is_some());
    }
}
