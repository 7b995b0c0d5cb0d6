// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by validation, IR verification
// and codegen. A diagnostic points at a model element rather than a source
// span: models arrive as data, not text, so "which term / which name" is
// what a user needs to find the problem.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::ops::Range;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E01xx: identifiers
    pub const E0100: DiagCode = DiagCode("E0100"); // invalid identifier characters
    pub const E0101: DiagCode = DiagCode("E0101"); // reserved identifier
    pub const E0102: DiagCode = DiagCode("E0102"); // duplicate / colliding name

    // E02xx: Hamiltonian terms
    pub const E0200: DiagCode = DiagCode("E0200"); // malformed CSR structure
    pub const E0201: DiagCode = DiagCode("E0201"); // dimension mismatch between terms

    // E03xx: time-dependence expressions
    pub const E0300: DiagCode = DiagCode("E0300"); // expression syntax error
    pub const E0301: DiagCode = DiagCode("E0301"); // unknown identifier
    pub const E0302: DiagCode = DiagCode("E0302"); // unknown function

    // E04xx: model-level settings
    pub const E0400: DiagCode = DiagCode("E0400"); // invalid coefficient tolerance
    pub const E0401: DiagCode = DiagCode("E0401"); // invalid sample step
    pub const E0402: DiagCode = DiagCode("E0402"); // invalid complex-math include path

    // E06xx: internal verification
    pub const E0600: DiagCode = DiagCode("E0600"); // IR verification failed
    pub const E0601: DiagCode = DiagCode("E0601"); // emitter produced malformed output

    // W01xx
    pub const W0100: DiagCode = DiagCode("W0100"); // channel never referenced
    pub const W0101: DiagCode = DiagCode("W0101"); // duplicate channel pulse index
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// The model element a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    Model,
    Term(usize),
    Channel(String),
    FreeVar(String),
    /// Byte range inside the time-dependence expression of a term.
    Expr { term: usize, range: Range<usize> },
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loc::Model => write!(f, "model"),
            Loc::Term(i) => write!(f, "term {}", i),
            Loc::Channel(name) => write!(f, "channel '{}'", name),
            Loc::FreeVar(name) => write!(f, "variable '{}'", name),
            Loc::Expr { term, range } => {
                write!(f, "term {} expression, bytes {}..{}", term, range.start, range.end)
            }
        }
    }
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary model location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLoc {
    pub loc: Loc,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: Loc,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLoc>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related locations.
    pub fn new(level: DiagLevel, loc: Loc, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(loc: Loc, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, loc, message)
    }

    pub fn warning(loc: Loc, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, loc, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related location.
    pub fn with_related(mut self, loc: Loc, label: impl Into<String>) -> Self {
        self.related.push(RelatedLoc {
            loc,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.loc, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.loc, self.message)?;
        }
        for rel in &self.related {
            write!(f, "\n  note: {}: {}", rel.loc, rel.label)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(Loc::Model, "something failed");
        assert_eq!(format!("{d}"), "error: model: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning(Loc::Channel("D0".into()), "never referenced")
            .with_code(codes::W0100);
        assert_eq!(
            format!("{d}"),
            "warning[W0100]: channel 'D0': never referenced"
        );
    }

    #[test]
    fn display_expr_location() {
        let d = Diagnostic::error(Loc::Expr { term: 2, range: 4..7 }, "unknown identifier 'foo'")
            .with_code(codes::E0301);
        assert_eq!(
            format!("{d}"),
            "error[E0301]: term 2 expression, bytes 4..7: unknown identifier 'foo'"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(Loc::FreeVar("D0_fc".into()), "name collision")
            .with_code(codes::E0102)
            .with_hint("rename the variable")
            .with_related(Loc::Channel("D0".into()), "argument `D0_fc` generated here");

        assert_eq!(d.code, Some(codes::E0102));
        assert_eq!(d.hint.as_deref(), Some("rename the variable"));
        assert_eq!(d.related.len(), 1);
        assert!(format!("{d}").contains("note: channel 'D0'"));
        assert!(has_errors(&[d]));
    }
}
