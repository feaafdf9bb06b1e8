use std::fs::File;
use std::io::{self, BufWriter, Write};

use camino::Utf8Path;
use serde::Serialize;

use crate::app::{ClearResult, FetchResult, ProgressEvent, ProgressSink, RunSummary, ShowResult};
use crate::statement::Nanopub;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_show(result: &ShowResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Logs progress events through `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

#[derive(Serialize)]
struct ExportLine<'a> {
    nanopub: &'a Nanopub,
}

/// Writes one `{"nanopub": {...}}` object per line.
pub fn write_nanopubs<W: Write>(writer: W, nanopubs: &[Nanopub]) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);
    for nanopub in nanopubs {
        serde_json::to_writer(&mut writer, &ExportLine { nanopub }).map_err(io::Error::other)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

pub fn export_nanopubs(path: &Utf8Path, nanopubs: &[Nanopub]) -> io::Result<()> {
    write_nanopubs(File::create(path.as_std_path())?, nanopubs)
}
