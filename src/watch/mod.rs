//! Polling watch service.
//!
//! Each role (paint, spec map) gets its own worker thread, so a slow or
//! failing conversion for one never delays the other.
//!
//! ```text
//!            ┌──────────────┐  Command   ┌────────────────────┐
//!  caller ──▶│ WatchService │──────────▶ │ paint worker       │──▶ car_<id>.tga
//!            │              │──────────▶ │ spec worker        │──▶ car_spec_<id>.tga
//!            └──────┬───────┘            └─────────┬──────────┘
//!                   │ ArcSwap<Placement>           │
//!                   └──────────── snapshot ────────┘
//! ```

mod fingerprint;
mod target;
mod worker;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, Sender};

pub use target::WatchState;
pub use worker::Report;

use crate::config::RefresherConfig;
use crate::convert::Converter;
use crate::core::Role;
use crate::output::Placement;
use crate::{debug, log};
use target::WatchTarget;
use worker::{Command, RoleWorker};

/// Handle to one role's worker.
pub struct RoleHandle {
    role: Role,
    inbox: Sender<Command>,
    has_source: AtomicBool,
    in_flight: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RoleHandle {
    pub fn is_converting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn state(&self) -> WatchState {
        WatchState::of(self.has_source.load(Ordering::Acquire), self.is_converting())
    }

    fn send(&self, command: Command) {
        if self.inbox.send(command).is_err() {
            debug!(self.role.label(); "worker is gone, command dropped");
        }
    }
}

pub struct WatchService {
    handles: Vec<RoleHandle>,
    output: Arc<ArcSwap<Placement>>,
    reports: Receiver<Report>,
}

impl WatchService {
    /// Spawn one worker per role. Sources start unset.
    pub fn start(
        converter: Arc<Converter>,
        placement: Placement,
        interval: Duration,
    ) -> io::Result<Self> {
        let output = Arc::new(ArcSwap::from_pointee(placement));
        let (report_tx, reports) = channel::unbounded();

        let mut handles = Vec::with_capacity(Role::ALL.len());
        for role in Role::ALL {
            let (inbox_tx, inbox) = channel::unbounded();
            let in_flight = Arc::new(AtomicBool::new(false));

            let worker = RoleWorker {
                target: WatchTarget::new(role),
                converter: Arc::clone(&converter),
                output: Arc::clone(&output),
                in_flight: Arc::clone(&in_flight),
                interval,
                inbox,
                reports: report_tx.clone(),
            };
            let thread = thread::Builder::new()
                .name(format!("watch-{}", role.label()))
                .spawn(move || worker.run())?;

            handles.push(RoleHandle {
                role,
                inbox: inbox_tx,
                has_source: AtomicBool::new(false),
                in_flight,
                thread: Some(thread),
            });
        }

        Ok(Self {
            handles,
            output,
            reports,
        })
    }

    pub fn handle(&self, role: Role) -> &RoleHandle {
        // `handles` is built from `Role::ALL`, in order
        &self.handles[role as usize]
    }

    pub fn state(&self, role: Role) -> WatchState {
        self.handle(role).state()
    }

    /// Select a source for `role` (converted immediately) or clear it.
    pub fn set_source(&self, role: Role, source: Option<PathBuf>) {
        let handle = self.handle(role);
        handle.has_source.store(source.is_some(), Ordering::Release);
        handle.send(Command::SetSource(source));
    }

    /// Convert `role` now.
    pub fn refresh(&self, role: Role) {
        self.handle(role).send(Command::Refresh);
    }

    pub fn set_interval(&self, interval: Duration) {
        for handle in &self.handles {
            handle.send(Command::SetInterval(interval));
        }
    }

    /// Current output settings.
    pub fn output(&self) -> Arc<Placement> {
        self.output.load_full()
    }

    /// Replace output settings; both roles re-convert with the new ones.
    ///
    /// Cleanup of a disabled custom number runs on the paint worker, after
    /// any conversion that still used the old settings.
    pub fn update_output(&self, placement: Placement) {
        self.replace_output(placement, &[]);
    }

    /// Swap output settings; roles in `reselected` skip the refresh because
    /// a source selection for them is about to follow.
    fn replace_output(&self, placement: Placement, reselected: &[Role]) {
        let previous = self.output.swap(Arc::new(placement));
        for (role, handle) in Role::ALL.into_iter().zip(&self.handles) {
            handle.send(Command::OutputChanged {
                previous: Arc::clone(&previous),
                refresh: !reselected.contains(&role),
            });
        }
    }

    /// Apply the difference between two configs.
    ///
    /// Output settings are swapped before sources are sent, so a role whose
    /// source and output both changed converts once, with the new output.
    pub fn reconfigure(&self, old: &RefresherConfig, new: &RefresherConfig) {
        let changed: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|&role| old.watch.source(role) != new.watch.source(role))
            .collect();

        let placement = Placement::resolve(&new.output, new.watch.paint.as_deref());
        if *self.output() != placement {
            log!("watch"; "output now {}", placement.output_path(Role::Paint).display());
            self.replace_output(placement, &changed);
        }

        for role in changed {
            let source = new.watch.source(role);
            match source {
                Some(path) => log!(role.label(); "watching {}", path.display()),
                None => log!(role.label(); "source cleared"),
            }
            self.set_source(role, source.cloned());
        }

        if old.watch.refresh_rate != new.watch.refresh_rate {
            self.set_interval(new.watch.interval());
        }
    }

    /// Conversion results, in completion order.
    pub fn reports(&self) -> &Receiver<Report> {
        &self.reports
    }
}

impl Drop for WatchService {
    /// Stop workers after their current tick and wait for them.
    fn drop(&mut self) {
        for handle in &self.handles {
            let _ = handle.inbox.send(Command::Shutdown);
        }
        for handle in &mut self.handles {
            if let Some(thread) = handle.thread.take()
                && thread.join().is_err()
            {
                log!("error"; "{} worker panicked", handle.role);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Outcome;
    use crate::document::{self, Layer, Layout, PdnDocument};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const ID: u32 = 31337;

    fn write_document(path: &Path, rgba: [u8; 4]) {
        let doc = PdnDocument::new(2, 2).with_layer(Layer::from_pixels("a", 2, 2, rgba.repeat(4)));
        let mut out = Vec::new();
        document::write(&doc, Layout::Deferred, &mut out).unwrap();
        fs::write(path, out).unwrap();
    }

    fn placement(dir: &Path, custom_number: bool) -> Placement {
        Placement {
            dir: dir.to_path_buf(),
            id: ID,
            custom_number,
            suffix: String::new(),
        }
    }

    fn start(dir: &Path, custom_number: bool) -> WatchService {
        WatchService::start(
            Arc::new(Converter::default()),
            placement(dir, custom_number),
            Duration::from_millis(20),
        )
        .unwrap()
    }

    fn next_report(service: &WatchService) -> Report {
        service.reports().recv_timeout(TIMEOUT).unwrap()
    }

    #[test]
    fn test_selected_source_converts_immediately() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source, [1, 2, 3, 255]);

        let service = start(dir.path(), false);
        service.set_source(Role::Paint, Some(source.clone()));

        let report = next_report(&service);
        assert_eq!(report.role, Role::Paint);
        assert_eq!(report.source, source);
        let expected = dir.path().join(format!("car_{ID}.tga"));
        assert!(matches!(report.result, Ok(Outcome::Written(ref p)) if *p == expected));
        assert!(expected.exists());
    }

    #[test]
    fn test_roles_are_independent() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("paint.pdn");
        fs::write(&broken, b"PDN3\x00\x00\x00\x42\x42").unwrap();
        let spec = dir.path().join("spec.pdn");
        write_document(&spec, [9, 9, 9, 255]);

        let service = start(dir.path(), false);
        service.set_source(Role::Paint, Some(broken));
        service.set_source(Role::SpecMap, Some(spec));

        let mut reports = [next_report(&service), next_report(&service)];
        reports.sort_by_key(|r| r.role as u8);

        assert!(reports[0].result.is_err());
        assert!(reports[1].result.is_ok());
        assert!(dir.path().join(format!("car_spec_{ID}.tga")).exists());
        assert!(!dir.path().join(format!("car_{ID}.tga")).exists());
    }

    #[test]
    fn test_failed_source_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("paint.pdn");
        fs::write(&broken, b"garbage").unwrap();

        let service = start(dir.path(), false);
        service.set_source(Role::Paint, Some(broken));
        assert!(next_report(&service).result.is_err());

        // Several ticks pass without another attempt
        assert!(
            service
                .reports()
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );
    }

    #[test]
    fn test_content_change_reconverts() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source, [1, 1, 1, 255]);

        let service = start(dir.path(), false);
        service.set_source(Role::Paint, Some(source.clone()));
        assert!(next_report(&service).result.is_ok());

        // Swap the new content in whole, as editors do on save
        let staged = dir.path().join("car.pdn.new");
        write_document(&staged, [2, 2, 2, 255]);
        let later = std::time::SystemTime::now() + Duration::from_secs(2);
        fs::File::options()
            .write(true)
            .open(&staged)
            .unwrap()
            .set_modified(later)
            .unwrap();
        fs::rename(&staged, &source).unwrap();
        assert!(next_report(&service).result.is_ok());

        let out = fs::read(dir.path().join(format!("car_{ID}.tga"))).unwrap();
        assert_eq!(&out[18..22], &[2, 2, 2, 255]);
    }

    #[test]
    fn test_manual_refresh() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("spec.pdn");
        write_document(&source, [5, 5, 5, 255]);

        let service = start(dir.path(), false);
        service.set_source(Role::SpecMap, Some(source));
        assert!(next_report(&service).result.is_ok());

        service.refresh(Role::SpecMap);
        assert_eq!(next_report(&service).role, Role::SpecMap);
        // Refreshing an idle role does nothing
        service.refresh(Role::Paint);
        assert!(
            service
                .reports()
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );
    }

    #[test]
    fn test_disabling_custom_number_removes_custom_paint() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source, [7, 7, 7, 255]);
        let custom = dir.path().join(format!("car_num_{ID}.tga"));
        let regular = dir.path().join(format!("car_{ID}.tga"));

        let service = start(dir.path(), true);
        service.set_source(Role::Paint, Some(source));
        assert!(next_report(&service).result.is_ok());
        assert!(custom.exists());

        service.update_output(placement(dir.path(), false));
        assert!(next_report(&service).result.is_ok());

        assert!(!custom.exists());
        assert!(regular.exists());
    }

    #[test]
    fn test_reconfigure_applies_source_and_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source, [3, 3, 3, 255]);
        let out_dir = dir.path().join("out");

        let service = start(dir.path(), false);
        let old = RefresherConfig::default();
        let mut new = RefresherConfig::default();
        new.watch.paint = Some(source);
        new.output.dir = Some(out_dir.clone());
        new.output.id = ID;

        service.reconfigure(&old, &new);
        assert_eq!(service.output().dir, out_dir);

        let report = next_report(&service);
        assert!(report.result.is_ok());
        assert!(out_dir.join(format!("car_{ID}.tga")).exists());
        assert!(!dir.path().join(format!("car_{ID}.tga")).exists());

        // One conversion covers both changes
        assert!(
            service
                .reports()
                .recv_timeout(Duration::from_millis(300))
                .is_err()
        );
    }

    #[test]
    fn test_output_change_alone_refreshes_selected_roles() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source, [4, 4, 4, 255]);
        let out_dir = dir.path().join("out");

        let mut old = RefresherConfig::default();
        old.watch.paint = Some(source);
        old.output.dir = Some(dir.path().to_path_buf());
        old.output.id = ID;
        let mut new = old.clone();
        new.output.dir = Some(out_dir.clone());

        let service = start(dir.path(), false);
        service.set_source(Role::Paint, old.watch.paint.clone());
        assert!(next_report(&service).result.is_ok());

        service.reconfigure(&old, &new);
        let report = next_report(&service);
        assert!(matches!(report.result, Ok(Outcome::Written(ref p)) if p.starts_with(&out_dir)));
    }

    #[test]
    fn test_drop_stops_workers() {
        let dir = TempDir::new().unwrap();
        let service = start(dir.path(), false);
        assert_eq!(service.state(Role::Paint), WatchState::Idle);
        service.set_source(Role::SpecMap, Some(dir.path().join("later.pdn")));
        assert_eq!(service.state(Role::SpecMap), WatchState::Armed);
        drop(service);
    }
}
