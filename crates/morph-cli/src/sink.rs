use std::io::Write;
use std::sync::Arc;

use morph_core::{Event, EventSink, Level};

/// Writes events at or above `min_level` to stderr, one JSON object per line.
#[derive(Debug)]
pub struct StderrSink {
    min_level: Level,
}

impl EventSink for StderrSink {
    fn emit(&self, event: Event) {
        if event.level < self.min_level {
            return;
        }
        if let Ok(line) = serde_json::to_string(&event) {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = writeln!(handle, "{line}");
        }
    }
}

pub fn stderr_sink(verbosity: u8) -> Arc<dyn EventSink> {
    let min_level = match verbosity {
        0 => Level::Warn,
        1 => Level::Info,
        _ => Level::Debug,
    };
    Arc::new(StderrSink { min_level })
}
