//! Records `duroflow` log lines emitted on the current thread so tests can
//! assert on them. Pair with plain `#[test]` or a current-thread runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
    fields: BTreeMap<&'static str, String>,
}

impl LogLine {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Capturing subscriber, installed until dropped.
pub struct LogCapture {
    lines: Arc<Mutex<Vec<LogLine>>>,
    _guard: DefaultGuard,
}

impl LogCapture {
    pub fn install() -> Self {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder { lines: lines.clone() }.with_filter(Targets::new().with_target("duroflow", Level::TRACE));
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder));
        Self { lines, _guard }
    }

    /// Lines at exactly `level` whose target starts with `target`.
    pub fn at(&self, level: Level, target: &str) -> Vec<LogLine> {
        self.matching(|line| line.level == level && line.target.starts_with(target))
    }

    /// Lines at `level` or more severe.
    pub fn at_least(&self, level: Level) -> Vec<LogLine> {
        self.matching(|line| line.level <= level)
    }

    fn matching(&self, keep: impl Fn(&LogLine) -> bool) -> Vec<LogLine> {
        self.lines.lock().unwrap().iter().filter(|line| keep(line)).cloned().collect()
    }
}

struct Recorder {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

#[derive(Default)]
struct Fields(BTreeMap<&'static str, String>);

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for Recorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        let mut fields = fields.0;
        let meta = event.metadata();
        self.lines.lock().unwrap().push(LogLine {
            level: *meta.level(),
            target: meta.target().to_string(),
            message: fields.remove("message").unwrap_or_default(),
            fields,
        });
    }
}
