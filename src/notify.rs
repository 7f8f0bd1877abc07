//! Scan result notification
//!
//! After a completed scan the scheduler assembles a report of dependencies
//! that became outdated since the previous scan and hands it to a
//! [`Notifier`]. The default implementation just logs; anything heavier
//! (mail, webhooks) plugs in behind the same trait.

#[cfg(test)]
use mockall::automock;

use tracing::info;

use crate::store::DependencyRecord;

/// What changed since the last scan.
#[derive(Debug, Clone)]
pub struct OutdatedReport {
    pub scan_id: i64,
    pub newly_outdated: Vec<DependencyRecord>,
    pub total_scanned: i64,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_new_outdated_report(&self, report: &OutdatedReport);
}

/// Writes the report to the log.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send_new_outdated_report(&self, report: &OutdatedReport) {
        info!(
            scan_id = report.scan_id,
            newly_outdated = report.newly_outdated.len(),
            total_scanned = report.total_scanned,
            "scan report"
        );
        for dep in &report.newly_outdated {
            info!(
                dependency = %dep.name,
                ecosystem = dep.ecosystem.as_str(),
                current = %dep.current_version,
                latest = %dep.latest_version,
                "newly outdated"
            );
        }
    }
}
