//! Constraints selecting which events reach the caller.
use std::borrow::Cow;

use regex::Regex;

use crate::events::{Event, EventKind};
use crate::flags::{FileType, FileTypes};

/// What a filter decided about an event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Verdict {
    /// Never queued.
    Reject,
    /// Queued for bookkeeping only, never delivered.
    Track,
    /// Queued and delivered.
    Deliver,
}

/// A predicate deciding whether an event is worth queueing.
///
/// The decision is made once, when the event is read. Whatever happens to the entry
/// afterwards doesn't change it.
pub trait EventFilter: Send + Sync + 'static {
    fn accepts(&self, event: &Event) -> bool;

    fn verdict(&self, event: &Event) -> Verdict {
        if self.accepts(event) {
            Verdict::Deliver
        } else {
            Verdict::Reject
        }
    }
}

/// Immutable filtering configuration shared by every part of one monitor.
///
/// Every field left empty places no restriction. Fields are combined with AND, values
/// inside one field with OR. Use the `with_*` methods to derive modified copies.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    filename_substrings: Vec<String>,
    filename_patterns: Vec<Regex>,
    file_types: FileTypes,
    recursive: bool,
}

impl Constraints {
    #[must_use]
    pub fn with_filename_substrings<S: Into<String>>(
        &self,
        substrings: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            filename_substrings: substrings.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    /// Restrict file names to those fully matching any of `patterns`.
    ///
    /// # Errors
    /// Return error when any pattern fails to compile.
    pub fn with_filename_patterns<S: AsRef<str>>(
        &self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Result<Self, regex::Error> {
        let patterns = patterns
            .into_iter()
            .map(|pattern| anchored(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            filename_patterns: patterns,
            ..self.clone()
        })
    }

    /// Like [`with_filename_patterns`](Constraints::with_filename_patterns) but for
    /// already compiled expressions.
    #[must_use]
    pub fn with_filename_regexes(&self, patterns: impl IntoIterator<Item = Regex>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|pattern| anchored(pattern.as_str()).unwrap_or(pattern))
            .collect();
        Self {
            filename_patterns: patterns,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_file_types(&self, file_types: impl Into<FileTypes>) -> Self {
        Self {
            file_types: file_types.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_recursive(&self, recursive: bool) -> Self {
        Self {
            recursive,
            ..self.clone()
        }
    }

    pub fn filename_substrings(&self) -> &[String] {
        &self.filename_substrings
    }

    pub fn filename_patterns(&self) -> &[Regex] {
        &self.filename_patterns
    }

    pub const fn file_types(&self) -> FileTypes {
        self.file_types
    }

    pub const fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether `event` satisfies every constraint.
    ///
    /// Deleted entries can't be inspected, so `Deleted` events skip the type check. An
    /// entry that vanished before its type could be read does not match.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.file_types.is_empty() && event.kind != EventKind::Deleted {
            match FileType::of(&event.path) {
                Ok(file_type) if self.file_types.includes(file_type) => {}
                Ok(_) => return false,
                Err(e) => {
                    log::debug!("Dropping {}, unable to read its type: {}", event, e);
                    return false;
                }
            }
        }
        self.matches_name(event)
    }

    fn matches_name(&self, event: &Event) -> bool {
        if self.filename_substrings.is_empty() && self.filename_patterns.is_empty() {
            return true;
        }
        let filename = event
            .path
            .file_name()
            .map_or(Cow::Borrowed(""), |name| name.to_string_lossy());

        if !self.filename_substrings.is_empty()
            && !self
                .filename_substrings
                .iter()
                .any(|substring| filename.contains(substring.as_str()))
        {
            return false;
        }

        self.filename_patterns.is_empty()
            || self
                .filename_patterns
                .iter()
                .any(|pattern| pattern.is_match(&filename))
    }
}

impl EventFilter for Constraints {
    fn accepts(&self, event: &Event) -> bool {
        self.matches(event)
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}
