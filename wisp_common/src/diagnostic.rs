use crate::file::File;
use crate::pos::Pos;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single error or warning produced by any pipeline stage: a message and
/// the byte span it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub start: Pos,
    pub end: Pos,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, start: Pos, end: Pos) -> Self {
        Diagnostic {
            message: message.into(),
            start,
            end,
        }
    }

    pub fn lexer(message: impl fmt::Display, start: Pos, end: Pos) -> Self {
        Self::new(format!("[lexer] {message}"), start, end)
    }

    pub fn parser(message: impl fmt::Display, start: Pos, end: Pos) -> Self {
        Self::new(format!("[parser] {message}"), start, end)
    }

    pub fn generator(message: impl fmt::Display, start: Pos, end: Pos) -> Self {
        Self::new(format!("[irgen] {message}"), start, end)
    }

    pub fn vm(message: impl fmt::Display, start: Pos, end: Pos) -> Self {
        Self::new(format!("[vm] {message}"), start, end)
    }

    /// Renders the diagnostic with the offending span highlighted between
    /// ANSI red/reset markers, followed by a `startLine:startPos:endPos:endLine`
    /// footer, per the core's external error-form contract.
    pub fn print(&self, file: &File) -> String {
        let (start_line, _) = file.line_col(self.start);
        let (end_line, _) = file.line_col(self.end);
        let span = file
            .source
            .get(self.start.0..self.end.0.min(file.len()))
            .unwrap_or("");
        format!(
            "{}: \x1b[31m{}\x1b[0m ({}:{}:{}:{})",
            self.message, span, start_line, self.start.0, self.end.0, end_line
        )
    }
}

/// A shared, append-only error list threaded by `&mut` reference through
/// every stage. Every stage continues past recoverable errors; callers
/// inspect `has_errors` after each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn print_all(&self, file: &File) -> String {
        self.messages
            .iter()
            .map(|d| d.print(file))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn category_prefixes_match_the_error_handling_contract() {
        assert_eq!(
            Diagnostic::lexer("bad char", Pos(0), Pos(1)).message,
            "[lexer] bad char"
        );
        assert_eq!(
            Diagnostic::parser("bad token", Pos(0), Pos(1)).message,
            "[parser] bad token"
        );
        assert_eq!(Diagnostic::vm("oops", Pos(0), Pos(1)).message, "[vm] oops");
    }

    #[test]
    fn diagnostics_accumulate_without_aborting() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::lexer("a", Pos(0), Pos(1)));
        diags.push(Diagnostic::parser("b", Pos(1), Pos(2)));
        assert!(diags.has_errors());
        assert_eq!(diags.messages.len(), 2);
    }
}
