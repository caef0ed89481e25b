#![warn(missing_docs)]
//! Deterministic testing surfaces: replica harness, recording hooks, event
//! traces and canonical state snapshots.

mod harness;
mod recording;
mod report;
mod snapshot;

use anyhow::{Context, Result};
use colonysync_core::SimTick;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub use harness::*;
pub use recording::*;
pub use report::*;
pub use snapshot::*;

/// One event captured by headless tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Tick the event belongs to.
    pub tick: SimTick,
    /// Kind label.
    pub kind: String,
    /// Free-form detail.
    pub detail: String,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    /// Create a new sink at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { file })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }

    /// Append every event in `events`.
    pub fn write_all(&mut self, events: &[EventRecord]) -> Result<()> {
        events.iter().try_for_each(|event| self.write(event))
    }
}

/// Read a trace written by [`JsonlSink`].
pub fn read_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("read trace {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}: bad record on line {}", path.display(), index + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn jsonl_trace_reads_back() {
        let path = std::env::temp_dir().join(format!(
            "colonysync-trace-{}.jsonl",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let events = vec![
            EventRecord {
                tick: SimTick(3),
                kind: "Designator".into(),
                detail: "region#0 Faction_1 22b".into(),
            },
            EventRecord {
                tick: SimTick(9),
                kind: "save".into(),
                detail: "00ff".into(),
            },
        ];
        let mut sink = JsonlSink::create(&path).expect("sink create");
        sink.write_all(&events).expect("write succeeds");
        drop(sink);

        assert_eq!(read_jsonl(&path).expect("trace readable"), events);
        fs::remove_file(&path).ok();
    }
}
