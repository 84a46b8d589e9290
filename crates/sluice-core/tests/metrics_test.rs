//! Metrics reporting through a `Channel`.

mod common;

use common::{options, pipe_dir, write_epoch};
use sluice_core::{Channel, MemoryReportSink, RecordFormat, Report};
use std::sync::Arc;

#[test]
fn test_interval_one_reports_after_first_record() {
    let temp = pipe_dir();
    write_epoch(temp.path(), "train", 0, RecordFormat::RecordIo, &[b"bear", b"bunny"]);

    let sink = Arc::new(MemoryReportSink::new());
    let options = options(temp.path(), RecordFormat::RecordIo).with_benchmark(false, 1);
    let mut channel = Channel::open_with_sink("train", options, sink.clone()).unwrap();

    channel.next_record().unwrap().unwrap();
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        Report::Progress(snapshot) => {
            assert_eq!(snapshot.channel, "train");
            assert_eq!(snapshot.records, 1);
            assert_eq!(snapshot.bytes, 4);
        }
        other => panic!("Expected progress report, got {other:?}"),
    }

    channel.next_record().unwrap().unwrap();
    assert_eq!(sink.progress_count(), 2);
    drop(channel);
    // Benchmarking is off, so no summary.
    assert!(sink.summaries().is_empty());
}

#[test]
fn test_interval_zero_still_summarises() {
    let temp = pipe_dir();
    write_epoch(temp.path(), "train", 0, RecordFormat::RecordIo, &[b"bear", b"bunny", b"piano"]);

    let sink = Arc::new(MemoryReportSink::new());
    let options = options(temp.path(), RecordFormat::RecordIo).with_benchmark(true, 0);
    let mut channel = Channel::open_with_sink("train", options, sink.clone()).unwrap();
    while channel.next_record().unwrap().is_some() {}

    assert_eq!(sink.progress_count(), 0);
    assert!(sink.summaries().is_empty());
    drop(channel);

    let summaries = sink.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].records, 3);
    assert_eq!(summaries[0].bytes, 14);
}

#[test]
fn test_summary_on_fatal_error() {
    let temp = pipe_dir();
    let mut framed = common::encode(RecordFormat::RecordIo, &[b"bear"]);
    framed.extend_from_slice(b"adfsafasfd");
    std::fs::write(temp.path().join("train_0"), framed).unwrap();

    let sink = Arc::new(MemoryReportSink::new());
    let options = options(temp.path(), RecordFormat::RecordIo).with_benchmark(true, 0);
    let mut channel = Channel::open_with_sink("train", options, sink.clone()).unwrap();

    assert!(channel.next_record().unwrap().is_some());
    assert!(channel.next_record().is_err());
    assert_eq!(sink.summaries().len(), 1);

    channel.close();
    drop(channel);
    assert_eq!(sink.summaries().len(), 1);
    assert_eq!(sink.summaries()[0].records, 1);
}

#[test]
fn test_summary_on_exhaustion() {
    let temp = pipe_dir();
    write_epoch(temp.path(), "train", 0, RecordFormat::TextLine, &[b"bear"]);

    let sink = Arc::new(MemoryReportSink::new());
    let options = options(temp.path(), RecordFormat::TextLine).with_benchmark(true, 0).with_final_epoch(0);
    let mut channel = Channel::open_with_sink("train", options, sink.clone()).unwrap();
    while channel.next_record().unwrap().is_some() {}

    assert!(channel.is_exhausted());
    assert_eq!(sink.summaries().len(), 1);
    drop(channel);
    assert_eq!(sink.summaries().len(), 1);
}

#[test]
fn test_metrics_disabled_by_default() {
    let temp = pipe_dir();
    write_epoch(temp.path(), "train", 0, RecordFormat::RecordIo, &[b"bear"]);

    let sink = Arc::new(MemoryReportSink::new());
    let mut channel =
        Channel::open_with_sink("train", options(temp.path(), RecordFormat::RecordIo), sink.clone()).unwrap();
    while channel.next_record().unwrap().is_some() {}
    assert!(channel.metrics_snapshot().is_none());
    drop(channel);
    assert!(sink.reports().is_empty());
}
