//! Message buffer filled during a layout pass.
//!
//! Every message is forwarded to the `log` facade as well, so a caller
//! with a logger installed sees them immediately while a caller without
//! one can still inspect them after the pass.

use std::fmt;

use log::Level;
use serde::Serialize;

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub message: String,
}

fn serialize_level<S: serde::Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Accumulated warnings and errors of the last pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Level::Error, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Level::Warn, message.into());
    }

    /// Debug messages go to the log only.
    pub fn debug(&mut self, message: impl AsRef<str>) {
        log::debug!("{}", message.as_ref());
    }

    fn push(&mut self, level: Level, message: String) {
        log::log!(level, "{message}");
        self.messages.push(Diagnostic { level, message });
    }

    /// Append the messages of another buffer.
    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter().filter(|m| m.level == Level::Warn)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter().filter(|m| m.level == Level::Error)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.message.contains(needle))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
