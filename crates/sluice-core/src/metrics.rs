//! Throughput instrumentation for a single channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Running totals at the moment a report was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub channel: String,
    pub records: u64,
    pub bytes: u64,
    /// Wall-clock time since the read of the first record began.
    pub elapsed: Duration,
    /// Time spent blocked inside pipe reads and decoding.
    pub read_time: Duration,
}

impl Snapshot {
    #[must_use]
    pub fn records_per_sec(&self) -> f64 {
        rate(self.records as f64, self.elapsed)
    }

    #[must_use]
    pub fn megabytes_per_sec(&self) -> f64 {
        rate(self.bytes as f64 / (1024.0 * 1024.0), self.elapsed)
    }
}

fn rate(amount: f64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 { amount / secs } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Progress(Snapshot),
    Summary(Snapshot),
}

impl Report {
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Progress(snapshot) | Self::Summary(snapshot) => snapshot,
        }
    }
}

pub trait ReportSink: Send + Sync {
    fn on_report(&self, report: &Report);
}

/// Prints one line per report, in the spirit of a benchmark log.
#[derive(Debug, Default)]
pub struct StdoutReportSink;

impl ReportSink for StdoutReportSink {
    fn on_report(&self, report: &Report) {
        match report {
            Report::Progress(s) => println!(
                "[sluice:{}] Iterator records: {} bytes: {} elapsed_ms: {} records/s: {:.1} MB/s: {:.3}",
                s.channel,
                s.records,
                s.bytes,
                s.elapsed.as_millis(),
                s.records_per_sec(),
                s.megabytes_per_sec()
            ),
            Report::Summary(s) => println!(
                "[sluice:{}] Iterator summary records: {} bytes: {} elapsed_ms: {} read_time_ms: {} records/s: {:.1} MB/s: {:.3}",
                s.channel,
                s.records,
                s.bytes,
                s.elapsed.as_millis(),
                s.read_time.as_millis(),
                s.records_per_sec(),
                s.megabytes_per_sec()
            ),
        }
    }
}

/// Emits reports as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn on_report(&self, report: &Report) {
        let s = report.snapshot();
        let kind = match report {
            Report::Progress(_) => "progress",
            Report::Summary(_) => "summary",
        };
        info!(
            channel = %s.channel,
            report = kind,
            records = s.records,
            bytes = s.bytes,
            elapsed_ms = s.elapsed.as_millis() as u64,
            read_time_ms = s.read_time.as_millis() as u64,
            records_per_sec = s.records_per_sec(),
            mb_per_sec = s.megabytes_per_sec(),
            "Channel throughput"
        );
    }
}

/// Accumulates counters for one channel and hands reports to a sink.
pub struct MetricsCollector {
    channel: String,
    records_interval: u64,
    summary_enabled: bool,
    records: u64,
    bytes: u64,
    first_read: Option<Instant>,
    read_time: Duration,
    finished: bool,
    sink: Arc<dyn ReportSink>,
}

impl MetricsCollector {
    pub fn new(
        channel: impl Into<String>,
        records_interval: u64,
        summary_enabled: bool,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            channel: channel.into(),
            records_interval,
            summary_enabled,
            records: 0,
            bytes: 0,
            first_read: None,
            read_time: Duration::ZERO,
            finished: false,
            sink,
        }
    }

    /// Count one record of `bytes` bytes that took `read_time` to produce.
    ///
    /// The elapsed clock starts when the first record's read began.
    pub fn record_read(&mut self, bytes: usize, read_time: Duration) {
        self.first_read
            .get_or_insert_with(|| Instant::now().checked_sub(read_time).unwrap_or_else(Instant::now));
        self.records += 1;
        self.bytes += bytes as u64;
        self.read_time += read_time;

        if self.records_interval > 0 && self.records % self.records_interval == 0 {
            self.sink.on_report(&Report::Progress(self.snapshot()));
        }
    }

    /// Account for time spent reading that did not yield a record.
    pub fn add_read_time(&mut self, read_time: Duration) {
        self.read_time += read_time;
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            channel: self.channel.clone(),
            records: self.records,
            bytes: self.bytes,
            elapsed: self.first_read.map_or(Duration::ZERO, |t| t.elapsed()),
            read_time: self.read_time,
        }
    }

    /// Emit the summary, once. Later calls do nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.summary_enabled {
            self.sink.on_report(&Report::Summary(self.snapshot()));
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("channel", &self.channel)
            .field("records_interval", &self.records_interval)
            .field("records", &self.records)
            .field("bytes", &self.bytes)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Collects reports in memory. Useful in tests and for embedding callers that
/// forward reports elsewhere.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    reports: std::sync::Mutex<Vec<Report>>,
}

impl MemoryReportSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn progress_count(&self) -> usize {
        self.reports().iter().filter(|r| matches!(r, Report::Progress(_))).count()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<Snapshot> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                Report::Summary(s) => Some(s),
                Report::Progress(_) => None,
            })
            .collect()
    }
}

impl ReportSink for MemoryReportSink {
    fn on_report(&self, report: &Report) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(interval: u64, summary: bool) -> (MetricsCollector, Arc<MemoryReportSink>) {
        let sink = Arc::new(MemoryReportSink::new());
        (MetricsCollector::new("train", interval, summary, sink.clone()), sink)
    }

    #[test]
    fn test_progress_every_interval() {
        let (mut metrics, sink) = collector(2, false);
        for _ in 0..5 {
            metrics.record_read(10, Duration::from_millis(1));
        }
        assert_eq!(sink.progress_count(), 2);
        let reports = sink.reports();
        assert_eq!(reports[0].snapshot().records, 2);
        assert_eq!(reports[1].snapshot().records, 4);
        assert_eq!(reports[1].snapshot().bytes, 40);
    }

    #[test]
    fn test_first_report_includes_first_read_time() {
        let (mut metrics, sink) = collector(1, false);
        metrics.record_read(1024, Duration::from_millis(20));
        let reports = sink.reports();
        let snapshot = reports[0].snapshot();
        assert!(snapshot.elapsed >= Duration::from_millis(20));
        assert!(snapshot.records_per_sec() > 0.0);
        assert!(snapshot.megabytes_per_sec() > 0.0);
    }

    #[test]
    fn test_interval_zero_disables_progress() {
        let (mut metrics, sink) = collector(0, true);
        metrics.record_read(4, Duration::ZERO);
        assert_eq!(sink.progress_count(), 0);
        metrics.finish();
        assert_eq!(sink.summaries().len(), 1);
    }

    #[test]
    fn test_summary_fires_once() {
        let (mut metrics, sink) = collector(0, true);
        metrics.record_read(4, Duration::from_millis(2));
        metrics.add_read_time(Duration::from_millis(3));
        metrics.finish();
        metrics.finish();
        let summaries = sink.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].records, 1);
        assert_eq!(summaries[0].read_time, Duration::from_millis(5));
        assert!(metrics.is_finished());
    }

    #[test]
    fn test_summary_disabled() {
        let (mut metrics, sink) = collector(1, false);
        metrics.record_read(4, Duration::ZERO);
        metrics.finish();
        assert_eq!(sink.progress_count(), 1);
        assert!(sink.summaries().is_empty());
    }

    #[test]
    fn test_rates_handle_zero_elapsed() {
        let (metrics, _) = collector(0, false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.elapsed, Duration::ZERO);
        assert!(snapshot.records_per_sec().abs() < f64::EPSILON);
        assert!(snapshot.megabytes_per_sec().abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_serializes_with_type_tag() {
        let report = Report::Progress(Snapshot {
            channel: "train".to_string(),
            records: 1,
            bytes: 4,
            elapsed: Duration::from_millis(5),
            read_time: Duration::from_millis(1),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["records"], 1);
    }
}
