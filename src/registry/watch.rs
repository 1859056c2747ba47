//! The rebuild loop: folds registry snapshots into published tables.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::route::{SharedTable, Table};

/// Fold the two snapshot streams into successive routing tables.
///
/// On every value the latest services and manual texts are
/// concatenated, manual last so its commands override. Unchanged
/// concatenations are skipped; a table that fails to parse is logged
/// and the previous table stays published. Runs until both streams
/// close.
pub async fn watch_routes(
    mut services: mpsc::Receiver<String>,
    mut manual: mpsc::Receiver<String>,
    table: Arc<SharedTable>,
) {
    let mut svc_text = String::new();
    let mut man_text = String::new();
    let mut last = String::new();
    let mut svc_open = true;
    let mut man_open = true;

    while svc_open || man_open {
        tokio::select! {
            v = services.recv(), if svc_open => match v {
                Some(text) => svc_text = text,
                None => { svc_open = false; continue; }
            },
            v = manual.recv(), if man_open => match v {
                Some(text) => man_text = text,
                None => { man_open = false; continue; }
            },
        }

        // Manual config overrides service config; order matters.
        let next = format!("{}\n{}", svc_text, man_text);
        if next == last {
            continue;
        }

        match Table::parse(&next) {
            Ok(t) => {
                tracing::info!(routes = t.num_routes(), "Routing table updated");
                tracing::debug!("Routing table:\n{}", t);
                table.publish(t);
                last = next;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring bad routing table");
            }
        }
    }
}
