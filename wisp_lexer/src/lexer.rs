use crate::error::LexError;
use crate::token::{Token, TokenKind};
use log::trace;
use unicode_xid::UnicodeXID;
use wisp_common::{File, Pos};

/// Scans UTF-8 source bytes into a token stream with automatic statement
/// termination: a line feed is folded into a `SEMICOLON` whenever the
/// previous token could plausibly end a statement.
pub struct Lexer {
    file: File,
    begin: usize,
    end: usize,
    ch: Option<char>,
    semicolon: bool,
}

fn is_decimal(ch: char) -> bool {
    ch.is_ascii_digit()
}

fn is_letter(ch: char) -> bool {
    ch.is_xid_start()
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_xid_continue() || ch == '_'
}

impl Lexer {
    pub fn new(file: File) -> Self {
        let mut lexer = Lexer {
            file,
            begin: 0,
            end: 0,
            ch: None,
            semicolon: false,
        };
        lexer.advance();
        lexer
    }

    /// Hands back the `File`, whose line index has been fully populated by
    /// the time scanning reaches EOF.
    pub fn into_file(self) -> File {
        self.file
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    fn advance(&mut self) {
        self.begin = self.end;
        match self.file.source[self.end..].chars().next() {
            None => self.ch = None,
            Some(ch) => {
                self.end += ch.len_utf8();
                if ch == '\n' {
                    self.file.add_line(Pos(self.end));
                }
                self.ch = Some(ch);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.file.source[self.end..].chars().next()
    }

    fn pos(&self) -> Pos {
        Pos(self.begin)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.ch {
                Some(' ') | Some('\t') | Some('\r') => self.advance(),
                Some('\n') if !self.semicolon => self.advance(),
                _ => break,
            }
        }
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.begin;
        while let Some(ch) = self.ch {
            if !pred(ch) {
                break;
            }
            self.advance();
        }
        self.file.source[start..self.begin].to_string()
    }

    fn read_number(&mut self) -> (String, bool) {
        let start = self.begin;
        let mut is_float = false;
        while let Some(ch) = self.ch {
            if is_decimal(ch) {
                self.advance();
            } else if ch == '.' && !is_float && self.peek().is_some_and(is_decimal) {
                is_float = true;
                self.advance();
            } else {
                break;
            }
        }
        (self.file.source[start..self.begin].to_string(), is_float)
    }

    fn read_comment(&mut self) -> String {
        let start = self.begin;
        while let Some(ch) = self.ch {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
        self.file.source[start..self.begin].to_string()
    }

    fn read_quoted(&mut self, quote: char) -> (String, bool) {
        let start = self.begin;
        self.advance(); // opening quote
        loop {
            match self.ch {
                Some(ch) if ch == quote => {
                    self.advance();
                    return (self.file.source[start..self.begin].to_string(), true);
                }
                Some('\n') | None => {
                    return (self.file.source[start..self.begin].to_string(), false);
                }
                Some(_) => self.advance(),
            }
        }
    }

    /// Produces the next token, together with a lexical error when one was
    /// encountered while producing it. Scanning always continues past an
    /// error: the returned token is still the lexer's best-effort result.
    pub fn next(&mut self) -> (Token, Option<LexError>) {
        self.skip_whitespace();
        let pos = self.pos();

        if let Some(ch) = self.ch {
            if is_letter(ch) {
                let lit = self.read_while(is_ident_continue);
                let kind = TokenKind::lookup_word(&lit);
                self.semicolon = matches!(
                    kind,
                    TokenKind::Ident
                        | TokenKind::Break
                        | TokenKind::Continue
                        | TokenKind::Return
                        | TokenKind::True
                        | TokenKind::False
                );
                trace!("lexed word token {kind:?} {lit:?}");
                return (Token::new(kind, pos, lit), None);
            }
            if is_decimal(ch) {
                let (lit, is_float) = self.read_number();
                self.semicolon = true;
                let kind = if is_float { TokenKind::Float } else { TokenKind::Int };
                return (Token::new(kind, pos, lit), None);
            }
        }

        if self.ch == Some('#') {
            self.semicolon = false;
            let lit = self.read_comment();
            return (Token::new(TokenKind::Comment, pos, lit), None);
        }
        if self.ch == Some('"') {
            let (lit, terminated) = self.read_quoted('"');
            self.semicolon = true;
            let err = (!terminated).then(|| LexError::UnterminatedString {
                pos,
                end: self.pos(),
            });
            return (Token::new(TokenKind::String, pos, lit), err);
        }
        if self.ch == Some('\'') {
            let (lit, terminated) = self.read_quoted('\'');
            self.semicolon = true;
            let err = (!terminated).then(|| LexError::UnterminatedRune {
                pos,
                end: self.pos(),
            });
            return (Token::new(TokenKind::Rune, pos, lit), err);
        }

        let had_semicolon = self.semicolon;
        self.semicolon = false;

        let Some(ch) = self.ch else {
            if had_semicolon {
                return (Token::new(TokenKind::Semicolon, pos, ""), None);
            }
            return (Token::new(TokenKind::Eof, pos, ""), None);
        };

        if ch == '\n' {
            // had_semicolon is true here: skip_whitespace only stops on a
            // newline when the semicolon flag is set.
            self.advance();
            return (Token::new(TokenKind::Semicolon, pos, "\n"), None);
        }

        self.advance();
        let single = |kind: TokenKind, text: &str| (Token::new(kind, pos, text), None);

        match ch {
            '+' => single(TokenKind::Add, "+"),
            '-' => single(TokenKind::Sub, "-"),
            '*' => single(TokenKind::Mul, "*"),
            '/' => single(TokenKind::Quo, "/"),
            '%' => single(TokenKind::Mod, "%"),
            '&' => single(TokenKind::And, "&"),
            '|' => single(TokenKind::Or, "|"),
            '⊕' => single(TokenKind::Xor, "⊕"),
            '^' => single(TokenKind::Xor, "^"),
            '«' => single(TokenKind::ShiftLeft, "«"),
            '»' => single(TokenKind::ShiftRight, "»"),
            '=' => single(TokenKind::Equal, "="),
            '<' => single(TokenKind::Less, "<"),
            '>' => single(TokenKind::Greater, ">"),
            '!' => single(TokenKind::Not, "!"),
            '≠' => single(TokenKind::NotEqual, "≠"),
            '≤' => single(TokenKind::LessEqual, "≤"),
            '≥' => single(TokenKind::GreaterEqual, "≥"),
            '‥' => single(TokenKind::Elipsis, "‥"),
            '(' => {
                self.semicolon = false;
                single(TokenKind::LeftParen, "(")
            }
            ')' => {
                self.semicolon = true;
                single(TokenKind::RightParen, ")")
            }
            '[' => {
                self.semicolon = false;
                single(TokenKind::LeftBrack, "[")
            }
            ']' => {
                self.semicolon = true;
                single(TokenKind::RightBrack, "]")
            }
            '{' => {
                self.semicolon = false;
                single(TokenKind::LeftBrace, "{")
            }
            '}' => {
                self.semicolon = true;
                single(TokenKind::RightBrace, "}")
            }
            ',' => single(TokenKind::Comma, ","),
            '.' => single(TokenKind::Period, "."),
            ':' => single(TokenKind::Assign, ":"),
            ';' => single(TokenKind::Semicolon, ";"),
            '←' => single(TokenKind::LeftArrow, "←"),
            '→' => single(TokenKind::RightArrow, "→"),
            '?' => single(TokenKind::Optional, "?"),
            '∀' => single(TokenKind::For, "∀"),
            '∈' => single(TokenKind::Each, "∈"),
            '⇒' => single(TokenKind::Then, "⇒"),
            '~' => single(TokenKind::Else, "~"),
            '_' => single(TokenKind::Default, "_"),
            '■' => single(TokenKind::Construct, "■"),
            other => (
                Token::new(TokenKind::Illegal, pos, other.to_string()),
                Some(LexError::UnexpectedCharacter {
                    pos,
                    end: self.pos(),
                    character: other,
                }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex_all(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(File::new("t", source));
        let mut kinds = Vec::new();
        loop {
            let (tok, _) = lexer.next();
            let done = tok.kind == TokenKind::Eof;
            kinds.push(tok.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn newline_after_terminator_token_inserts_semicolon() {
        use TokenKind::*;
        assert_eq!(lex_all("a\nb"), vec![Ident, Semicolon, Ident, Eof]);
    }

    #[test]
    fn newline_after_non_terminator_is_swallowed() {
        use TokenKind::*;
        assert_eq!(lex_all("a +\nb"), vec![Ident, Add, Ident, Eof]);
    }

    #[test]
    fn trailing_semicolon_is_synthesized_at_eof() {
        use TokenKind::*;
        assert_eq!(lex_all("a"), vec![Ident, Eof]);
        // no pending token at all -> no synthesized semicolon before EOF
        // because the flag is only set once a terminator token was lexed.
    }

    #[test]
    fn number_with_single_dot_is_float_otherwise_int() {
        use TokenKind::*;
        assert_eq!(lex_all("1"), vec![Int, Eof]);
        assert_eq!(lex_all("1.5"), vec![Float, Eof]);
    }

    #[test]
    fn comment_runs_to_end_of_line_and_keeps_hash() {
        let mut lexer = Lexer::new(File::new("t", "# hi\na"));
        let (tok, _) = lexer.next();
        assert_eq!(tok.kind, TokenKind::Comment);
        assert_eq!(tok.text, "# hi");
    }

    #[test]
    fn unterminated_string_reports_error_but_still_returns_token() {
        let mut lexer = Lexer::new(File::new("t", "\"abc"));
        let (tok, err) = lexer.next();
        assert_eq!(tok.kind, TokenKind::String);
        assert!(err.is_some());
    }

    #[test]
    fn default_and_procedure_glyphs_are_distinguished_from_identifiers() {
        use TokenKind::*;
        assert_eq!(lex_all("_"), vec![Default, Eof]);
        assert_eq!(lex_all("λ"), vec![Func, Eof]);
        assert_eq!(lex_all("μ"), vec![Mutable, Eof]);
    }

    #[test]
    fn unicode_glyphs_map_one_for_one() {
        use TokenKind::*;
        assert_eq!(lex_all("∀ i ∈ x ⇒ y ~ z"), vec![For, Ident, Each, Ident, Then, Ident, Else, Ident, Eof]);
    }

    #[test]
    fn line_index_grows_as_newlines_are_scanned() {
        let mut lexer = Lexer::new(File::new("t", "a\nb\nc"));
        loop {
            let (tok, _) = lexer.next();
            if tok.kind == TokenKind::Eof {
                break;
            }
        }
        let file = lexer.into_file();
        assert_eq!(file.line_index(Pos(4)), 2);
    }
}
