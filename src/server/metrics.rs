//! Prometheus exposition of ingestion and hub counters.

use std::fmt::Write;

use crate::hub::HubStats;
use crate::ingest::IngestSnapshot;

/// Content type of the exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Family<'a> {
    prefix: &'a str,
    out: &'a mut String,
}

impl Family<'_> {
    fn metric(&mut self, name: &str, kind: &str, help: &str, samples: &[(&str, u64)]) {
        let _ = writeln!(self.out, "# HELP {}moodwatch_{} {}", self.prefix, name, help);
        let _ = writeln!(self.out, "# TYPE {}moodwatch_{} {}", self.prefix, name, kind);
        for (labels, value) in samples {
            if labels.is_empty() {
                let _ = writeln!(self.out, "{}moodwatch_{} {}", self.prefix, name, value);
            } else {
                let _ = writeln!(
                    self.out,
                    "{}moodwatch_{}{{{}}} {}",
                    self.prefix, name, labels, value
                );
            }
        }
    }
}

/// Render counters in Prometheus text format, optionally namespaced.
pub fn format_prometheus(
    ingest: &IngestSnapshot,
    hub: &HubStats,
    namespace: Option<&str>,
) -> String {
    let mut out = String::new();
    let prefix = namespace.map(|n| format!("{}_", n)).unwrap_or_default();
    let mut family = Family {
        prefix: &prefix,
        out: &mut out,
    };

    family.metric(
        "ingest_cycles_total",
        "counter",
        "Ingestion cycles run",
        &[("", ingest.cycles)],
    );
    family.metric(
        "ingest_samples_total",
        "counter",
        "Ingestion cycles by outcome",
        &[
            ("outcome=\"accepted\"", ingest.accepted),
            ("outcome=\"unchanged\"", ingest.unchanged),
        ],
    );
    family.metric(
        "ingest_failures_total",
        "counter",
        "Failed ingestion cycles by cause",
        &[
            ("kind=\"fetch\"", ingest.fetch_failures),
            ("kind=\"parse\"", ingest.parse_failures),
            ("kind=\"persistence\"", ingest.persistence_failures),
        ],
    );
    family.metric(
        "ingest_late_commits_total",
        "counter",
        "Timed-out appends that were stored later and then published",
        &[("", ingest.late_commits)],
    );
    family.metric(
        "subscribers",
        "gauge",
        "Live subscribers currently registered",
        &[("", hub.active)],
    );
    family.metric(
        "subscribers_total",
        "counter",
        "Live subscribers ever registered",
        &[("", hub.subscribed)],
    );
    family.metric(
        "events_delivered_total",
        "counter",
        "Events handed to subscribers",
        &[("", hub.delivered)],
    );
    family.metric(
        "delivery_failures_total",
        "counter",
        "Deliveries that failed and dropped their subscriber",
        &[("", hub.failed)],
    );

    out
}
