//! Structured phase lines
//!
//! One `key=value` line per phase transition under the `sweep::phase` log
//! target, so external tooling can verify a sweep from its log alone.

use log::{Level, log};
use std::fmt::Display;

use super::outcome::UnitOutcome;
use crate::models::{Service, SyncMode};

pub const TARGET: &str = "sweep::phase";

/// Builder for one phase line
#[derive(Debug, Default)]
pub struct PhaseLine {
    fields: Vec<(&'static str, String)>,
}

impl PhaseLine {
    pub fn new(service: Service, subject: &str, phase: &str) -> Self {
        Self::default()
            .field("service", service)
            .field("subject", subject)
            .field("phase", phase)
    }

    pub fn field(mut self, key: &'static str, value: impl Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={}", quote(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn emit(self, level: Level) {
        log!(target: TARGET, level, "{}", self.render());
    }
}

/// Quote values that would break `key=value` splitting
fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"');
    if plain {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub(crate) fn unit_start(service: Service, subject: &str, unit: &str, mode: SyncMode) {
    PhaseLine::new(service, subject, "start")
        .field("unit", unit)
        .field("mode", mode.as_str())
        .emit(Level::Info);
}

pub(crate) fn unit_end(service: Service, subject: &str, outcome: &UnitOutcome) {
    PhaseLine::new(service, subject, "end")
        .field("unit", &outcome.unit)
        .field("ok", outcome.exhausted())
        .field("count", outcome.stored)
        .field("partial", !outcome.exhausted())
        .field("error_class", outcome.end.error_label())
        .field("cursor_written", outcome.cursor_written)
        .emit(Level::Info);
}

pub(crate) fn cursor_write(service: Service, subject: &str, key: &str, value: &str) {
    PhaseLine::new(service, subject, "cursor_write")
        .field("key", key)
        .field("value", value)
        .emit(Level::Info);
}

pub(crate) fn cursor_skip(service: Service, subject: &str, key: &str, reason: &str) {
    PhaseLine::new(service, subject, "cursor_skip")
        .field("key", key)
        .field("reason", reason)
        .emit(Level::Info);
}

pub(crate) fn cursor_clear(service: Service, subject: &str, key: &str, reason: &str) {
    PhaseLine::new(service, subject, "cursor_clear")
        .field("key", key)
        .field("reason", reason)
        .emit(Level::Warn);
}

pub(crate) fn cursor_read(service: Service, subject: &str, key: &str, value: Option<&str>, verbose: bool) {
    PhaseLine::new(service, subject, "cursor_read")
        .field("key", key)
        .field("value", value.unwrap_or("none"))
        .emit(diagnostic_level(verbose));
}

pub(crate) fn page(service: Service, subject: &str, unit: &str, page: usize, items: usize, verbose: bool) {
    PhaseLine::new(service, subject, "page")
        .field("unit", unit)
        .field("page", page)
        .field("items", items)
        .emit(diagnostic_level(verbose));
}

fn diagnostic_level(verbose: bool) -> Level {
    if verbose { Level::Info } else { Level::Debug }
}
