use log::trace;

use wisp_common::{Diagnostic, Diagnostics, File, Pos};
use wisp_lexer::{Lexer, TokenKind};

use crate::ast::{Field, Node};
use crate::error::ParseError;
use crate::precedence::{self, Precedence};

/// Top-down operator precedence parser. Consumes a [`Lexer`] and produces a
/// [`Node::Program`] together with whatever diagnostics were collected along
/// the way; a syntax error never aborts parsing, it is recorded and the
/// parser keeps going with its best-effort read of the token stream.
pub struct Parser {
    lexer: Lexer,
    tok: TokenKind,
    pos: Pos,
    text: String,
    diagnostics: Diagnostics,
}

impl Parser {
    pub fn new(file: File) -> Self {
        let mut parser = Parser {
            lexer: Lexer::new(file),
            tok: TokenKind::Illegal,
            pos: Pos(0),
            text: String::new(),
            diagnostics: Diagnostics::default(),
        };
        parser.advance();
        parser
    }

    pub fn into_file(self) -> File {
        self.lexer.into_file()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn end(&self) -> Pos {
        Pos(self.pos.0 + self.text.len())
    }

    /// Advances to the next non-comment token, folding any lexical error
    /// into the shared diagnostics list.
    fn advance(&mut self) {
        loop {
            let (token, err) = self.lexer.next();
            if let Some(err) = err {
                let (start, end) = err.span();
                self.diagnostics.push(Diagnostic::lexer(err.to_string(), start, end));
            }
            if token.kind == TokenKind::Comment {
                continue;
            }
            self.pos = token.pos;
            self.text = token.text;
            self.tok = token.kind;
            break;
        }
        trace!("parser at {:?} {:?}", self.tok, self.text);
    }

    fn push_unexpected(&mut self, expected: TokenKind) {
        let err = ParseError::UnexpectedToken {
            pos: self.pos,
            end: self.end(),
            found: self.tok,
            expected,
        };
        let (start, end) = err.span();
        self.diagnostics.push(Diagnostic::parser(err.to_string(), start, end));
    }

    /// Consumes the current token if it matches `kind`, returning its
    /// position; otherwise records a diagnostic and leaves the cursor where
    /// it is (the caller proceeds with a best-effort tree).
    fn expect(&mut self, kind: TokenKind) -> Pos {
        if self.tok != kind {
            self.push_unexpected(kind);
            return self.pos;
        }
        let pos = self.pos;
        self.advance();
        pos
    }

    fn expected_expression(&mut self) -> Node {
        let err = ParseError::ExpectedExpression {
            pos: self.pos,
            end: self.end(),
        };
        let (start, end) = err.span();
        self.diagnostics.push(Diagnostic::parser(err.to_string(), start, end));
        Node::Empty
    }

    pub fn parse_program(&mut self) -> Node {
        let nodes = self.parse_statements();
        if self.tok != TokenKind::Eof {
            let err = ParseError::TrailingTokens {
                pos: self.pos,
                end: self.end(),
            };
            let (start, end) = err.span();
            self.diagnostics.push(Diagnostic::parser(err.to_string(), start, end));
        }
        Node::Program { nodes }
    }

    fn consume_separator(&mut self) {
        if self.tok == TokenKind::Semicolon || self.tok == TokenKind::Comma {
            self.advance();
        }
    }

    fn parse_statements(&mut self) -> Vec<Node> {
        let mut statements = vec![self.parse_statement()];
        while self.tok == TokenKind::Semicolon || self.tok == TokenKind::Comma {
            self.consume_separator();
            if self.tok == TokenKind::RightBrace || self.tok == TokenKind::RightParen {
                break;
            }
            let statement = self.parse_statement();
            if !matches!(statement, Node::Empty) {
                statements.push(statement);
            }
        }
        statements
    }

    fn parse_statement(&mut self) -> Node {
        if self.tok == TokenKind::CompileTime {
            self.advance();
        }
        match self.tok {
            TokenKind::Break | TokenKind::Continue => self.consume_branch(),
            TokenKind::For => self.consume_for(),
            TokenKind::Return => self.consume_return(),
            _ => self.consume_flex_statement(),
        }
    }

    fn consume_flex_statement(&mut self) -> Node {
        self.parse_node(precedence::LOWEST).unwrap_or(Node::Empty)
    }

    /// Reads an atomic node, then greedily folds binary/postfix tokens
    /// whose left binding power is at least `min`.
    fn parse_node(&mut self, min: Precedence) -> Option<Node> {
        let mut left = self.parse_atomic()?;
        loop {
            let (lp, rp) = precedence::get_precedence(self.tok);
            if min > lp {
                break;
            }
            left = match self.tok {
                TokenKind::Add
                | TokenKind::Sub
                | TokenKind::Mul
                | TokenKind::Quo
                | TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual => {
                    let op = self.tok;
                    let pos = self.pos;
                    self.advance();
                    let right = self.parse_node(rp).unwrap_or_else(|| self.expected_expression());
                    Node::Infix {
                        op,
                        pos,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                TokenKind::Assign => {
                    self.advance();
                    let right = self.parse_node(rp).unwrap_or_else(|| self.expected_expression());
                    Node::Assign {
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                TokenKind::Each => {
                    self.advance();
                    let right = self.parse_node(rp).unwrap_or_else(|| self.expected_expression());
                    Node::Each {
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                TokenKind::Then => {
                    self.advance();
                    let true_body = self.parse_statement();
                    let false_body = if self.tok == TokenKind::Else {
                        self.advance();
                        Some(Box::new(self.parse_statement()))
                    } else {
                        None
                    };
                    Node::If {
                        cond: Box::new(left),
                        true_body: Box::new(true_body),
                        false_body,
                    }
                }
                TokenKind::Ident => {
                    let ty = self.parse_node(precedence::LOWEST).unwrap_or_else(|| self.expected_expression());
                    Node::As {
                        node: Box::new(left),
                        ty: Box::new(ty),
                    }
                }
                _ => break,
            };
        }
        Some(left)
    }

    fn consume_call(&mut self) -> Node {
        let pos = self.pos;
        self.expect(TokenKind::Period);
        let mut exprs = Vec::new();
        while let Some(expr) = self.parse_atomic() {
            exprs.push(expr);
        }
        let procedure = if exprs.is_empty() {
            Node::Empty
        } else {
            exprs.remove(0)
        };
        Node::Call {
            pos,
            procedure: Box::new(procedure),
            arguments: exprs,
        }
    }

    /// Parses an atomic node: one not joined by an infix operator. Returns
    /// `None` if the current token starts no atomic node at all (used by
    /// callers like [`Self::consume_call`] to know when an argument list
    /// ends).
    fn parse_atomic(&mut self) -> Option<Node> {
        let mut node = match self.tok {
            TokenKind::Not | TokenKind::Sub | TokenKind::Mul | TokenKind::And => {
                let op = self.tok;
                let pos = self.pos;
                self.advance();
                let operand = self.parse_atomic().unwrap_or_else(|| self.expected_expression());
                Node::Prefix {
                    op,
                    pos,
                    node: Box::new(operand),
                }
            }
            TokenKind::LeftBrace => self.consume_block(),
            TokenKind::LeftParen => self.consume_tuple(),
            TokenKind::Default => self.consume_default_literal(),
            TokenKind::Int => self.consume_int_literal(),
            TokenKind::Float => self.consume_float_literal(),
            TokenKind::String => self.consume_string_literal(),
            TokenKind::Rune => self.consume_rune_literal(),
            TokenKind::Ident => self.consume_identifier(),
            TokenKind::Range => self.consume_range_literal(),
            TokenKind::Func => self.consume_function_definition(),
            TokenKind::Elipsis => self.consume_spread(),
            TokenKind::Interface | TokenKind::Struct => self.consume_type_spec(),
            TokenKind::True => self.consume_true_literal(),
            TokenKind::False => self.consume_false_literal(),
            TokenKind::Match => self.consume_match(),
            TokenKind::Period => self.consume_call(),
            TokenKind::Construct => self.consume_construct(),
            TokenKind::Break | TokenKind::Continue => self.consume_branch(),
            TokenKind::For => self.consume_for(),
            TokenKind::Return => self.consume_return(),
            _ => return None,
        };

        loop {
            node = match self.tok {
                TokenKind::Period => {
                    self.advance();
                    let selection = self.consume_identifier();
                    Node::Selector {
                        node: Box::new(node),
                        selection: Box::new(selection),
                    }
                }
                TokenKind::LeftBrack => {
                    let tuple = self.consume_brack_tuple();
                    let end = tuple.end();
                    Node::Indexor {
                        node: Box::new(node),
                        index: Box::new(tuple),
                        end,
                    }
                }
                _ => break,
            };
        }
        Some(node)
    }

    fn consume_construct(&mut self) -> Node {
        let keyword = self.expect(TokenKind::Construct);
        let ty = self.parse_atomic().unwrap_or_else(|| self.expected_expression());
        let value = self.consume_tuple();
        Node::Construct {
            keyword,
            ty: Box::new(ty),
            value: Box::new(value),
        }
    }

    fn consume_branch(&mut self) -> Node {
        let keyword = self.tok;
        let keyword_pos = self.pos;
        self.advance();
        let label = if self.tok == TokenKind::Ident {
            Some(Box::new(self.consume_identifier()))
        } else {
            None
        };
        Node::Branch {
            keyword,
            keyword_pos,
            label,
        }
    }

    fn consume_for(&mut self) -> Node {
        let keyword = self.expect(TokenKind::For);
        let clause = self.parse_statement();
        self.expect(TokenKind::RightArrow);
        let body = self.parse_statement();
        Node::For {
            keyword,
            clause: Box::new(clause),
            body: Box::new(body),
        }
    }

    fn consume_tuple_delim(&mut self, open: TokenKind, close: TokenKind) -> (Pos, Vec<Node>, Pos) {
        let left = self.expect(open);
        let nodes = self.parse_statements();
        let right = self.expect(close);
        (left, nodes, right)
    }

    fn consume_tuple(&mut self) -> Node {
        let (left, nodes, right) = self.consume_tuple_delim(TokenKind::LeftParen, TokenKind::RightParen);
        Node::Tuple { left, nodes, right }
    }

    fn consume_brack_tuple(&mut self) -> Node {
        let (left, nodes, right) = self.consume_tuple_delim(TokenKind::LeftBrack, TokenKind::RightBrack);
        Node::Tuple { left, nodes, right }
    }

    fn consume_block(&mut self) -> Node {
        let (left, nodes, right) = self.consume_tuple_delim(TokenKind::LeftBrace, TokenKind::RightBrace);
        Node::Block { left, nodes, right }
    }

    fn consume_return(&mut self) -> Node {
        let keyword = self.expect(TokenKind::Return);
        let expr = self.parse_node(precedence::LOWEST).unwrap_or_else(|| self.expected_expression());
        Node::Return {
            keyword,
            expr: Box::new(expr),
        }
    }

    fn consume_default_literal(&mut self) -> Node {
        let pos = self.expect(TokenKind::Default);
        Node::Default { pos }
    }

    fn consume_identifier(&mut self) -> Node {
        let name = self.text.clone();
        let pos = self.expect(TokenKind::Ident);
        Node::Identifier { pos, name }
    }

    fn consume_int_literal(&mut self) -> Node {
        let text = self.text.clone();
        let pos = self.pos;
        let value = text.parse::<i64>().unwrap_or_else(|_| {
            self.diagnostics.push(Diagnostic::parser(
                format!("invalid integer literal {text:?}"),
                pos,
                Pos(pos.0 + text.len()),
            ));
            0
        });
        self.expect(TokenKind::Int);
        Node::Int { pos, text, value }
    }

    fn consume_float_literal(&mut self) -> Node {
        let text = self.text.clone();
        let pos = self.pos;
        let value = text.parse::<f64>().unwrap_or_else(|_| {
            self.diagnostics.push(Diagnostic::parser(
                format!("invalid float literal {text:?}"),
                pos,
                Pos(pos.0 + text.len()),
            ));
            0.0
        });
        self.expect(TokenKind::Float);
        Node::Float { pos, text, value }
    }

    fn consume_string_literal(&mut self) -> Node {
        let text = self.text.clone();
        let pos = self.pos;
        let end = self.end();
        // quoted text always carries its delimiters; strip them.
        let value = text.get(1..text.len().saturating_sub(1)).unwrap_or("").to_string();
        self.expect(TokenKind::String);
        Node::String { pos, end, value }
    }

    fn consume_rune_literal(&mut self) -> Node {
        let text = self.text.clone();
        let pos = self.pos;
        let end = self.end();
        let value = text.get(1..text.len().saturating_sub(1)).unwrap_or("").to_string();
        self.expect(TokenKind::Rune);
        Node::Rune { pos, end, value }
    }

    fn consume_range_literal(&mut self) -> Node {
        let pos = self.expect(TokenKind::Range);

        let left_inclusive = match self.tok {
            TokenKind::LeftBrack => {
                self.advance();
                true
            }
            TokenKind::LeftParen => {
                self.advance();
                false
            }
            _ => {
                self.push_unexpected(TokenKind::LeftBrack);
                false
            }
        };

        let left = self.parse_atomic().unwrap_or_else(|| self.expected_expression());
        self.expect(TokenKind::Elipsis);
        let right = self.parse_atomic().unwrap_or_else(|| self.expected_expression());

        let right_inclusive = match self.tok {
            TokenKind::RightBrack => {
                self.advance();
                true
            }
            TokenKind::RightParen => {
                self.advance();
                false
            }
            _ => {
                self.push_unexpected(TokenKind::RightBrack);
                false
            }
        };
        let end = self.pos;

        Node::Range {
            pos,
            left: Box::new(left),
            left_inclusive,
            right: Box::new(right),
            right_inclusive,
            end,
        }
    }

    fn consume_true_literal(&mut self) -> Node {
        let pos = self.expect(TokenKind::True);
        Node::True { pos }
    }

    fn consume_false_literal(&mut self) -> Node {
        let pos = self.expect(TokenKind::False);
        Node::False { pos }
    }

    fn consume_match(&mut self) -> Node {
        let keyword = self.expect(TokenKind::Match);
        let item = self.parse_node(precedence::LOWEST).unwrap_or_else(|| self.expected_expression());
        self.expect(TokenKind::LeftBrace);
        let mut conditions = Vec::new();
        let mut bodies = Vec::new();
        while self.tok != TokenKind::RightBrace
            && self.tok != TokenKind::Eof
            && self.tok != TokenKind::Semicolon
        {
            let cond = self
                .parse_node(precedence::COMPARE)
                .unwrap_or_else(|| self.expected_expression());
            self.expect(TokenKind::Then);
            let body = self.parse_statement();
            self.consume_separator();
            conditions.push(cond);
            bodies.push(body);
        }
        let right = self.expect(TokenKind::RightBrace);
        Node::Match {
            keyword,
            item: Box::new(item),
            conditions,
            bodies,
            right,
        }
    }

    fn fields_from_tuple(&self, tuple: Node) -> Vec<Field> {
        let Node::Tuple { nodes, .. } = tuple else {
            return Vec::new();
        };
        nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| match node {
                Node::As { node, ty } => match *node {
                    Node::Identifier { name, .. } => Field {
                        name,
                        ty: Some(ty),
                        value: None,
                    },
                    other => Field {
                        name: i.to_string(),
                        ty: Some(ty),
                        value: Some(Box::new(other)),
                    },
                },
                Node::Assign { left, right } => match *left {
                    Node::Identifier { name, .. } => Field {
                        name,
                        ty: None,
                        value: Some(right),
                    },
                    other => Field {
                        name: i.to_string(),
                        ty: None,
                        value: Some(Box::new(Node::Assign { left: Box::new(other), right })),
                    },
                },
                Node::Identifier { name, .. } => Field {
                    name,
                    ty: None,
                    value: None,
                },
                other => Field {
                    name: i.to_string(),
                    ty: None,
                    value: Some(Box::new(other)),
                },
            })
            .collect()
    }

    fn consume_function_definition(&mut self) -> Node {
        let keyword = self.expect(TokenKind::Func);

        let name = if self.tok == TokenKind::Ident {
            Some(Box::new(self.consume_identifier()))
        } else {
            None
        };

        let params = if self.tok == TokenKind::LeftBrack {
            let tuple = self.consume_brack_tuple();
            self.fields_from_tuple(tuple)
        } else {
            Vec::new()
        };

        let args_tuple = self.consume_tuple();
        let args = self.fields_from_tuple(args_tuple);

        let return_type = if self.tok != TokenKind::RightArrow {
            self.parse_atomic().map(Box::new)
        } else {
            None
        };

        let proc_type = Node::ProcedureType {
            keyword,
            name,
            params,
            args,
            return_type,
        };

        if self.tok == TokenKind::RightArrow {
            self.advance();
            let body = self.parse_statement();
            Node::ProcedureDefinition {
                proc_type: Box::new(proc_type),
                body: Box::new(body),
            }
        } else {
            proc_type
        }
    }

    fn consume_spread(&mut self) -> Node {
        let pos = self.expect(TokenKind::Elipsis);
        let node = self.parse_atomic().unwrap_or_else(|| self.expected_expression());
        Node::Spread {
            pos,
            node: Box::new(node),
        }
    }

    fn consume_type_spec(&mut self) -> Node {
        let pos = self.pos;
        let kind = self.tok;
        self.advance();
        let params = if self.tok == TokenKind::LeftBrack {
            Some(Box::new(self.consume_brack_tuple()))
        } else {
            None
        };
        let spec = self.consume_tuple();
        Node::TypeSpec {
            pos,
            kind,
            params,
            spec: Box::new(spec),
        }
    }
}

/// Parses a complete source file into a program node, returning the
/// diagnostics collected and the `File` (whose line index is now fully
/// populated) alongside it.
pub fn parse(file: File) -> (Node, Diagnostics, File) {
    let mut parser = Parser::new(file);
    let program = parser.parse_program();
    let diagnostics = std::mem::take(&mut parser.diagnostics);
    (program, diagnostics, parser.into_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;
    use pretty_assertions::assert_eq;

    fn parse_src(src: &str) -> Node {
        parse(File::new("t", src)).0
    }

    #[test]
    fn precedence_orders_product_before_sum() {
        let program = parse_src("1 + 2 * 3");
        let Node::Program { nodes } = program else { panic!() };
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Node::Infix { op: TokenKind::Add, right, .. } => {
                assert!(matches!(**right, Node::Infix { op: TokenKind::Mul, .. }));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn then_else_is_right_associative_and_produces_if() {
        let program = parse_src("a ⇒ b ~ c");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::If { .. }));
    }

    #[test]
    fn assign_then_each_round_trip_as_statements() {
        let program = parse_src("k: 3");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::Assign { .. }));
    }

    #[test]
    fn leading_dot_starts_a_call_with_first_atomic_as_procedure() {
        let program = parse_src(".f 10");
        let Node::Program { nodes } = program else { panic!() };
        match &nodes[0] {
            Node::Call { procedure, arguments, .. } => {
                assert!(matches!(**procedure, Node::Identifier { .. }));
                assert_eq!(arguments.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn trailing_dot_after_atomic_is_a_selector_not_a_call() {
        let program = parse_src("a.b");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::Selector { .. }));
    }

    #[test]
    fn bracket_after_atomic_is_an_indexor() {
        let program = parse_src("a[0]");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::Indexor { .. }));
    }

    #[test]
    fn range_literal_records_independent_inclusivity() {
        let program = parse_src("range[2‥n)");
        let Node::Program { nodes } = program else { panic!() };
        match &nodes[0] {
            Node::Range {
                left_inclusive,
                right_inclusive,
                ..
            } => {
                assert!(left_inclusive);
                assert!(!right_inclusive);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn procedure_definition_without_arrow_is_a_bare_type() {
        let program = parse_src("λ (i i64)");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::ProcedureType { .. }));
    }

    #[test]
    fn procedure_definition_with_arrow_has_a_body() {
        let program = parse_src("λ (i i64) → i");
        let Node::Program { nodes } = program else { panic!() };
        assert!(matches!(nodes[0], Node::ProcedureDefinition { .. }));
    }

    #[test]
    fn match_parses_case_then_body_pairs() {
        let program = parse_src("match k { 3 ⇒ 5, _ ⇒ 7 }");
        let Node::Program { nodes } = program else { panic!() };
        match &nodes[0] {
            Node::Match { conditions, bodies, .. } => {
                assert_eq!(conditions.len(), 2);
                assert_eq!(bodies.len(), 2);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn unexpected_token_is_recorded_but_parsing_continues() {
        let (_, diagnostics, _) = parse(File::new("t", "("));
        assert!(diagnostics.has_errors());
    }
}
