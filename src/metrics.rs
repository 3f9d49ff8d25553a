//! Performance metrics collection for Tessera
//!
//! Recorders are no-ops until an exporter is installed with [`init_metrics`].

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the metrics collection system
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Record a batch of rows applied to a partition
pub fn record_insert(rows: u64) {
    counter!("tessera.insert.batches").increment(1);
    counter!("tessera.insert.rows").increment(rows);
}

/// Record an insert refused before reaching memory
pub fn record_insert_rejected() {
    counter!("tessera.insert.rejected").increment(1);
}

/// Record a query execution
pub fn record_query(duration_ms: f64, series: u64) {
    histogram!("tessera.query.duration_ms").record(duration_ms);
    counter!("tessera.query.series").increment(series);
}

/// Record a partition fetch that failed during a query
pub fn record_fetch_failure() {
    counter!("tessera.query.fetch_failures").increment(1);
}

/// Record WAL entries replayed during recovery
pub fn record_replay(entries: u64) {
    counter!("tessera.wal.replayed_entries").increment(entries);
}
