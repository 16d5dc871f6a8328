use crate::pos::Pos;
use serde::{Deserialize, Serialize};

/// Owns a source file's bytes and a line-start index, built up incrementally
/// by the lexer as it scans past newlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub source: String,
    /// Byte offset of the first character of each line; `lines[0] == Pos(0)`
    /// always, and the list is strictly increasing.
    lines: Vec<Pos>,
}

impl File {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        File {
            name: name.into(),
            source: source.into(),
            lines: vec![Pos(0)],
        }
    }

    /// Records that a new line begins at `start`. Called by the lexer each
    /// time it consumes a `\n`. No-op if `start` would not keep the index
    /// strictly increasing.
    pub fn add_line(&mut self, start: Pos) {
        if self.lines.last().is_some_and(|&last| start > last) {
            self.lines.push(start);
        }
    }

    /// Binary search from a byte position to its 0-based line index.
    pub fn line_index(&self, pos: Pos) -> usize {
        match self.lines.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }

    /// 1-based (line, column) for a byte position, for diagnostic rendering.
    pub fn line_col(&self, pos: Pos) -> (usize, usize) {
        let idx = self.line_index(pos);
        let line_start = self.lines[idx];
        (idx + 1, pos.0 - line_start.0 + 1)
    }

    pub fn byte(&self, pos: Pos) -> Option<u8> {
        self.source.as_bytes().get(pos.0).copied()
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_index_is_monotonic_and_correct() {
        let mut f = File::new("t", "ab\ncd\nef");
        f.add_line(Pos(3));
        f.add_line(Pos(6));
        assert_eq!(f.line_index(Pos(0)), 0);
        assert_eq!(f.line_index(Pos(2)), 0);
        assert_eq!(f.line_index(Pos(3)), 1);
        assert_eq!(f.line_index(Pos(7)), 2);
    }

    #[test]
    fn line_col_is_one_based() {
        let mut f = File::new("t", "ab\ncd");
        f.add_line(Pos(3));
        assert_eq!(f.line_col(Pos(0)), (1, 1));
        assert_eq!(f.line_col(Pos(4)), (2, 2));
    }

    #[test]
    fn duplicate_or_decreasing_line_starts_are_ignored() {
        let mut f = File::new("t", "abc");
        f.add_line(Pos(0));
        f.add_line(Pos(0));
        assert_eq!(f.line_index(Pos(2)), 0);
    }
}
