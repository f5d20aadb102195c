//! Progress reporting sink.
//!
//! Core components never talk to a concrete UI. They emit free-text progress
//! lines through an injected [`LogSink`] and leave it to the caller (CLI,
//! GUI, tests) to decide how to surface them. Diagnostic detail still goes
//! through the `log` facade as usual.

use std::sync::Arc;

/// A cheaply clonable callback that receives human-readable progress lines.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(&str) + Send + Sync>);

impl LogSink {
    /// Wraps an arbitrary callback.
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A sink that forwards every line to `log::info!`.
    pub fn to_log() -> Self {
        Self::new(|line| log::info!("{line}"))
    }

    /// A sink that discards everything.
    pub fn null() -> Self {
        Self::new(|_| {})
    }

    /// Emits one progress line.
    pub fn emit(&self, line: &str) {
        (self.0)(line);
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogSink")
    }
}
