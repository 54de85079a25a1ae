//! Trace exporters.
//!
//! Export is synchronous so the tracer can flush from `Drop` and right
//! before a fatal exit, where no runtime is available to drive a future.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::span::{SpanData, lock};
use crate::error::Error;

/// Destination for finished trace chunks.
pub trait Exporter: Send + Sync + 'static {
    fn export(&self, traces: &[Vec<SpanData>]) -> Result<(), Error>;
}

/// Writes each trace chunk as one JSON array per line.
pub struct JsonLinesExporter {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesExporter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self { writer: Mutex::new(Box::new(writer)) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Appends to `path`, creating it if needed.
    pub fn file(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl Exporter for JsonLinesExporter {
    fn export(&self, traces: &[Vec<SpanData>]) -> Result<(), Error> {
        let mut writer = lock(&self.writer);
        for trace in traces {
            serde_json::to_writer(&mut *writer, trace)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Keeps exported traces in memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryExporter {
    traces: Arc<Mutex<Vec<Vec<SpanData>>>>,
}

impl MemoryExporter {
    pub fn traces(&self) -> Vec<Vec<SpanData>> {
        lock(&self.traces).clone()
    }

    /// All exported spans named `name`, across traces.
    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        lock(&self.traces)
            .iter()
            .flatten()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

impl Exporter for MemoryExporter {
    fn export(&self, traces: &[Vec<SpanData>]) -> Result<(), Error> {
        lock(&self.traces).extend(traces.iter().cloned());
        Ok(())
    }
}
