use std::fmt;

use ariadne::{Color, Config, Label, Report, ReportKind};
use thiserror::Error;

use crate::fstack::{FileStack, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Warning categories, named after the flag that would control them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    UnterminatedLoad,
    EmptyDataDirective,
    UnmatchedDirective,
    BackwardsFor,
    Truncation,
}

impl WarningKind {
    pub fn flag(self) -> &'static str {
        match self {
            Self::UnterminatedLoad => "unterminated-load",
            Self::EmptyDataDirective => "empty-data-directive",
            Self::UnmatchedDirective => "unmatched-directive",
            Self::BackwardsFor => "backwards-for",
            Self::Truncation => "truncation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub warning: Option<WarningKind>,
    pub message: String,
    pub location: SourceLocation,
    pub labels: Vec<(SourceLocation, String)>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            warning: None,
            message: message.into(),
            location,
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn warning(
        kind: WarningKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            warning: Some(kind),
            message: message.into(),
            location,
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push((location, message.into()));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Unrecoverable assembly fault. Raising one aborts the run; everything else
/// is reported through the [`Reporter`] and assembly continues.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Fatal {
    pub message: String,
    pub location: SourceLocation,
}

/// Diagnostic sink. Tracks the location of the directive being processed so
/// deep engine code does not have to thread locations through every call.
#[derive(Debug)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    location: SourceLocation,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            diagnostics: Vec::new(),
            errors: 0,
            location: SourceLocation::top_level(),
        }
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_location(&mut self, location: SourceLocation) {
        self.location = location;
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::error(self.location, message));
    }

    pub fn warning(&mut self, kind: WarningKind, message: impl Into<String>) {
        self.report(Diagnostic::warning(kind, self.location, message));
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.errors += 1;
        }
        self.diagnostics.push(diagnostic);
    }

    /// Build a [`Fatal`] at the current location. The caller is expected to
    /// propagate it; it is not added to the diagnostic list.
    pub fn fatal(&self, message: impl Into<String>) -> Fatal {
        Fatal {
            message: message.into(),
            location: self.location,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

pub fn render_diagnostic(fstack: &FileStack, diagnostic: &Diagnostic) -> String {
    let Some(file) = fstack.try_source(diagnostic.location.span.source_id) else {
        let tag = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        return format!("{tag}: {}\n", diagnostic.message);
    };
    let mut output = Vec::new();
    let mut report = Report::build(
        match diagnostic.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        },
        file.name.clone(),
        diagnostic.location.span.start,
    )
    .with_config(Config::default().with_color(false))
    .with_message(diagnostic.message.clone())
    .with_label(
        Label::new((
            file.name.clone(),
            diagnostic.location.span.start..diagnostic.location.span.end,
        ))
        .with_color(match diagnostic.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        })
        .with_message("here"),
    );

    for (location, message) in &diagnostic.labels {
        let Some(label_file) = fstack.try_source(location.span.source_id) else {
            continue;
        };
        report = report.with_label(
            Label::new((label_file.name.clone(), location.span.start..location.span.end))
                .with_color(Color::Yellow)
                .with_message(message.clone()),
        );
    }

    let mut notes = diagnostic.notes.clone();
    if let Some(kind) = diagnostic.warning {
        notes.push(format!("warning flag: {}", kind.flag()));
    }
    let context = fstack.backtrace(diagnostic.location.node, diagnostic.location.line);
    if context != format!("{}({})", file.name, diagnostic.location.line) {
        notes.push(format!("in {context}"));
    }
    if !notes.is_empty() {
        report = report.with_note(notes.join("\n"));
    }

    let mut source_pairs = vec![(file.name.clone(), file.text.clone())];
    for (location, _) in &diagnostic.labels {
        if let Some(label_file) = fstack.try_source(location.span.source_id) {
            if label_file.name != file.name {
                source_pairs.push((label_file.name.clone(), label_file.text.clone()));
            }
        }
    }
    let _ = report
        .finish()
        .write(ariadne::sources(source_pairs), &mut output);

    String::from_utf8_lossy(&output).into_owned()
}

pub fn render_diagnostics(fstack: &FileStack, diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| render_diagnostic(fstack, diagnostic))
        .collect::<Vec<_>>()
        .join("\n")
}
