//! `watch` command: keep outputs in sync with their sources until Ctrl+C.
//!
//! The main thread only routes: it reloads `refresher.toml` on every tick,
//! forwards differences to the service, and tallies worker reports.

use std::sync::Arc;

use anyhow::Result;
use crossbeam::channel::{self, select};

use crate::config::{RefresherConfig, cfg, reload_config};
use crate::convert::{Converter, Outcome};
use crate::core::{Role, register_shutdown};
use crate::logger::status_warning;
use crate::output::Placement;
use crate::watch::{Report, WatchService, WatchState};
use crate::{debug, log};

#[derive(Debug, Default)]
struct Tally {
    written: usize,
    skipped: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, report: &Report) {
        match &report.result {
            Ok(Outcome::Written(_)) => self.written += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    fn summary(&self) -> String {
        let mut summary = format!("{} refreshed", self.written);
        if self.failed > 0 {
            summary.push_str(&format!(", {} failed", self.failed));
        }
        if self.skipped > 0 {
            summary.push_str(&format!(", {} skipped", self.skipped));
        }
        summary
    }
}

/// Watch the configured sources until shutdown is requested.
pub fn run_watch(config: &RefresherConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = channel::bounded(1);
    register_shutdown(shutdown_tx);

    let placement = Placement::resolve(&config.output, config.watch.paint.as_deref());
    let service = WatchService::start(
        Arc::new(Converter::default()),
        placement.clone(),
        config.watch.interval(),
    )?;

    log!("watch"; "writing to {}", placement.dir.display());
    announce(config);
    for role in Role::ALL {
        if let Some(source) = config.watch.source(role) {
            service.set_source(role, Some(source.clone()));
        }
    }

    let mut current = cfg();
    let mut tally = Tally::default();

    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(service.reports()) -> report => match report {
                Ok(report) => tally.record(&report),
                Err(_) => break,
            },
            default(current.watch.interval()) => {
                match reload_config() {
                    Ok(true) => {
                        let next = cfg();
                        log!("config"; "reloaded {}", next.config_path.display());
                        service.reconfigure(&current, &next);
                        current = next;
                    }
                    Ok(false) => {}
                    Err(e) => debug!("config"; "keeping previous config: {:#}", e),
                }
            }
        }
    }

    for role in Role::ALL {
        if service.state(role) == WatchState::Converting {
            log!(role.label(); "finishing the running conversion");
        }
    }
    drop(service);
    log!("watch"; "stopped, {}", tally.summary());
    Ok(())
}

fn announce(config: &RefresherConfig) {
    if config.watch.paint.is_none() && config.watch.spec.is_none() {
        status_warning("no sources configured; set watch.paint or watch.spec in refresher.toml");
        return;
    }
    for role in Role::ALL {
        match config.watch.source(role) {
            Some(source) if source.exists() => log!(role.label(); "watching {}", source.display()),
            Some(source) => status_warning(&format!(
                "{role} source {} does not exist yet",
                source.display()
            )),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn report(result: Result<Outcome, String>) -> Report {
        Report {
            role: Role::Paint,
            source: PathBuf::from("car.pdn"),
            result,
        }
    }

    #[test]
    fn test_tally_summary() {
        let mut tally = Tally::default();
        assert_eq!(tally.summary(), "0 refreshed");

        tally.record(&report(Ok(Outcome::Written(PathBuf::from("car_1.tga")))));
        tally.record(&report(Ok(Outcome::Written(PathBuf::from("car_1.tga")))));
        tally.record(&report(Err("bad".into())));
        tally.record(&report(Ok(Outcome::Skipped)));
        assert_eq!(tally.summary(), "2 refreshed, 1 failed, 1 skipped");
    }
}
