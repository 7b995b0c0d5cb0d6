// writer.rs — Indentation-tracking line writer
//
// Collects emitted source lines, prefixing each with `level × unit`. The
// nesting level is an explicit counter; the backend raises and lowers it
// around blocks.
//
// Preconditions: none.
// Postconditions: every stored line is `unit.repeat(level) + text`, with no
//                 trailing whitespace; blank lines are stored empty.
// Failure modes: `dedent` below level 0 returns `WriteError::Underflow`; a
//                line containing a line break is dropped and reported by
//                `finish` as `WriteError::EmbeddedNewline`.
// Side effects: none.

use std::fmt;

/// Four spaces, the unit of the generated source.
pub const INDENT_UNIT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Attempted to dedent below level 0 after `line` lines.
    Underflow { line: usize },
    /// Text passed to `line` would have produced more than one line.
    EmbeddedNewline { line: usize },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Underflow { line } => {
                write!(f, "indentation underflow after line {}", line)
            }
            WriteError::EmbeddedNewline { line } => {
                write!(f, "line break inside emitted line {}", line + 1)
            }
        }
    }
}

impl std::error::Error for WriteError {}

#[derive(Debug, Clone)]
pub struct CodeWriter {
    unit: &'static str,
    level: usize,
    lines: Vec<String>,
    /// First rejected line, reported by `finish`.
    error: Option<WriteError>,
}

impl Default for CodeWriter {
    fn default() -> Self {
        CodeWriter::new(INDENT_UNIT)
    }
}

impl CodeWriter {
    pub fn new(unit: &'static str) -> Self {
        CodeWriter {
            unit,
            level: 0,
            lines: Vec::new(),
            error: None,
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn dedent(&mut self) -> Result<(), WriteError> {
        match self.level.checked_sub(1) {
            Some(level) => {
                self.level = level;
                Ok(())
            }
            None => Err(WriteError::Underflow {
                line: self.lines.len(),
            }),
        }
    }

    /// Write one line at the current level. Text containing `\n` or `\r` is
    /// not written; `finish` reports it.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref().trim_end();
        if text.contains(['\n', '\r']) {
            self.error.get_or_insert(WriteError::EmbeddedNewline {
                line: self.lines.len(),
            });
            return;
        }
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines
                .push(format!("{}{}", self.unit.repeat(self.level), text));
        }
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    /// Write each line of `text` at the current level.
    pub fn block(&mut self, text: &str) {
        for l in text.lines() {
            self.line(l);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The written lines, or the first rejected line. Also fails if a block
    /// was left open.
    pub fn finish(self) -> Result<Vec<String>, WriteError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.level != 0 {
            return Err(WriteError::Underflow {
                line: self.lines.len(),
            });
        }
        Ok(self.lines)
    }
}
