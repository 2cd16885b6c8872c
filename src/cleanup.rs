//! Age-gated removal of stale files from the upload root.
//!
//! Outputs are handed back to the caller by path, so nothing is deleted the
//! moment a request ends. The sweeper is the only thing that removes them,
//! and only once they are older than the configured age.

use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
    pub errors: usize,
}

/// Remove regular files under `root` last modified more than `older_than` ago.
///
/// Admission directories are swept too, and removed once empty if they were
/// already older than `older_than` when the sweep began. Symlinks are left
/// alone. A missing root is an empty sweep. Per-file failures are logged and
/// counted.
pub fn sweep(root: &Path, older_than: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    match std::fs::read_dir(root) {
        Ok(_) => sweep_dir(root, older_than, SystemTime::now(), &mut report),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Upload root {} does not exist; nothing to sweep", root.display());
            return report;
        }
        Err(e) => {
            warn!("Cannot read upload root {}: {e}", root.display());
            report.errors += 1;
            return report;
        }
    }
    info!(
        removed = report.removed,
        kept = report.kept,
        errors = report.errors,
        "Swept {}",
        root.display()
    );
    report
}

fn sweep_dir(dir: &Path, older_than: Duration, now: SystemTime, report: &mut SweepReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {e}", dir.display());
            report.errors += 1;
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read directory entry: {e}");
                report.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Cannot stat {}: {e}", path.display());
                report.errors += 1;
                continue;
            }
        };
        let age = age_of(&metadata, now);

        if metadata.file_type().is_dir() {
            sweep_dir(&path, older_than, now, report);
            if age > older_than && std::fs::remove_dir(&path).is_ok() {
                debug!(age_secs = age.as_secs(), "Swept directory {}", path.display());
            }
            continue;
        }
        if !metadata.file_type().is_file() {
            continue;
        }
        if age <= older_than {
            report.kept += 1;
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(age_secs = age.as_secs(), "Swept {}", path.display());
                report.removed += 1;
            }
            Err(e) => {
                warn!("Failed to remove {}: {e}", path.display());
                report.errors += 1;
            }
        }
    }
}

/// Entries stamped in the future count as fresh.
fn age_of(metadata: &std::fs::Metadata, now: SystemTime) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|t| now.duration_since(t).ok())
        .unwrap_or_default()
}
