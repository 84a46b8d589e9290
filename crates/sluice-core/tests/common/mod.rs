//! Shared helpers for Sluice Core integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use sluice_core::{ChannelOptions, RecordFormat};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Write an `inputdataconfig.json` describing `channels` as `(name, mode)`.
pub fn write_config(dir: &Path, channels: &[(&str, &str)]) {
    let config: serde_json::Map<String, serde_json::Value> = channels
        .iter()
        .map(|(name, mode)| ((*name).to_string(), serde_json::json!({ "TrainingInputMode": mode })))
        .collect();
    std::fs::write(dir.join("inputdataconfig.json"), serde_json::to_vec(&config).unwrap()).unwrap();
}

/// Frame `records` in `format`.
pub fn encode(format: RecordFormat, records: &[&[u8]]) -> Vec<u8> {
    let mut out = BytesMut::new();
    for record in records {
        format.encode_into(record, &mut out).unwrap();
    }
    out.to_vec()
}

/// Write epoch `epoch` of `channel` as a regular file.
pub fn write_epoch(dir: &Path, channel: &str, epoch: u64, format: RecordFormat, records: &[&[u8]]) -> PathBuf {
    let path = dir.join(format!("{channel}_{epoch}"));
    std::fs::write(&path, encode(format, records)).unwrap();
    path
}

/// Options with pipes, state and config all under `dir`.
pub fn options(dir: &Path, format: RecordFormat) -> ChannelOptions {
    ChannelOptions::new(format).in_directory(dir)
}

/// A temp directory with `train` configured as a pipe channel.
pub fn pipe_dir() -> tempfile::TempDir {
    init_tracing();
    let temp = tempfile::TempDir::new().unwrap();
    write_config(temp.path(), &[("train", "Pipe")]);
    temp
}
