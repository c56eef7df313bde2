use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::info;

use crate::models::{OfflineHeader, OfflineRecording, OFFLINE_CHANNEL_COUNT};

/// Receives one live sample per frame, keyed by channel number 1..=6 and
/// already converted to the channel's display unit. Channels without a
/// reading are absent.
pub trait SampleSink {
    fn log_sample(&mut self, values: &BTreeMap<u8, f32>);
}

/// Persists a downloaded offline recording.
pub trait RecordingExporter {
    /// Returns where the recording ended up.
    fn export(&mut self, recording: &OfflineRecording, filename: &str) -> io::Result<String>;
}

fn header_field<'a>(header: &'a OfflineHeader, key: &str) -> &'a str {
    header.get(key).unwrap_or("")
}

fn per_channel(header: &OfflineHeader, prefix: char) -> String {
    (1..=OFFLINE_CHANNEL_COUNT)
        .map(|ch| format!("P{ch}={}", header_field(header, &format!("{prefix}{ch}"))))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Semicolon-separated export: a commented header block, a column row, then
/// one row per sample index. Channels shorter than the longest one are
/// padded with `0.000`.
pub fn write_csv<W: Write>(out: &mut W, recording: &OfflineRecording) -> io::Result<()> {
    let h = &recording.header;
    writeln!(out, "# SensorBox MC6600 Offline Recording")?;
    writeln!(out, "# Timestamp: {}", header_field(h, "ts"))?;
    writeln!(out, "# Recording Channels: {}", header_field(h, "rc"))?;
    writeln!(
        out,
        "# Trigger: P{} threshold={}% edge={}",
        header_field(h, "tc"),
        header_field(h, "th"),
        header_field(h, "ed")
    )?;
    writeln!(
        out,
        "# Duration: {}s, Time Base: {}ms",
        header_field(h, "du"),
        header_field(h, "tb")
    )?;
    writeln!(out, "# End Values: {}", per_channel(h, 'e'))?;
    writeln!(out, "# Units: {}", per_channel(h, 'u'))?;
    writeln!(out, "# Total Samples: {}", header_field(h, "end"))?;
    writeln!(out)?;

    write!(out, "Sample")?;
    for channel in recording.channels.keys() {
        write!(out, ";P{channel}")?;
    }
    writeln!(out)?;

    let rows = recording.channels.values().map(Vec::len).max().unwrap_or(0);
    for i in 0..rows {
        write!(out, "{i}")?;
        for values in recording.channels.values() {
            write!(out, ";{:.3}", values.get(i).copied().unwrap_or(0.0))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Writes recordings as CSV files into one directory.
#[derive(Clone, Debug)]
pub struct CsvExporter {
    pub directory: PathBuf,
}

impl CsvExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl RecordingExporter for CsvExporter {
    fn export(&mut self, recording: &OfflineRecording, filename: &str) -> io::Result<String> {
        let path = self.directory.join(filename);
        let mut out = BufWriter::new(File::create(&path)?);
        write_csv(&mut out, recording)?;
        out.flush()?;
        info!("saved offline recording to {}", path.display());
        Ok(path.display().to_string())
    }
}
