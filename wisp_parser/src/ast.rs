use serde::{Deserialize, Serialize};
use wisp_common::Pos;
use wisp_lexer::TokenKind;

/// A named field inside a parameter list, a `ProcedureType`'s argument
/// list, or a typed tuple entry: `name`, an optional declared `type`, and
/// an optional default `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Option<Box<Node>>,
    pub value: Option<Box<Node>>,
}

/// The abstract syntax tree. Modeled as a single tagged sum rather than an
/// open class hierarchy, per the language's node-variant catalogue: every
/// statement/expression kind the parser can produce is one variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Program {
        nodes: Vec<Node>,
    },
    Block {
        left: Pos,
        nodes: Vec<Node>,
        right: Pos,
    },
    Tuple {
        left: Pos,
        nodes: Vec<Node>,
        right: Pos,
    },

    Assign {
        left: Box<Node>,
        right: Box<Node>,
    },
    Each {
        left: Box<Node>,
        right: Box<Node>,
    },
    As {
        node: Box<Node>,
        ty: Box<Node>,
    },

    If {
        cond: Box<Node>,
        true_body: Box<Node>,
        false_body: Option<Box<Node>>,
    },
    For {
        keyword: Pos,
        clause: Box<Node>,
        body: Box<Node>,
    },
    Match {
        keyword: Pos,
        item: Box<Node>,
        conditions: Vec<Node>,
        bodies: Vec<Node>,
        right: Pos,
    },
    Return {
        keyword: Pos,
        expr: Box<Node>,
    },
    Branch {
        keyword: TokenKind,
        keyword_pos: Pos,
        label: Option<Box<Node>>,
    },

    Call {
        pos: Pos,
        procedure: Box<Node>,
        arguments: Vec<Node>,
    },
    Indexor {
        node: Box<Node>,
        index: Box<Node>,
        end: Pos,
    },
    Selector {
        node: Box<Node>,
        selection: Box<Node>,
    },
    Construct {
        keyword: Pos,
        ty: Box<Node>,
        value: Box<Node>,
    },

    ProcedureType {
        keyword: Pos,
        name: Option<Box<Node>>,
        params: Vec<Field>,
        args: Vec<Field>,
        return_type: Option<Box<Node>>,
    },
    ProcedureDefinition {
        proc_type: Box<Node>,
        body: Box<Node>,
    },

    Default {
        pos: Pos,
    },
    Int {
        pos: Pos,
        text: String,
        value: i64,
    },
    Float {
        pos: Pos,
        text: String,
        value: f64,
    },
    String {
        pos: Pos,
        end: Pos,
        value: String,
    },
    Rune {
        pos: Pos,
        end: Pos,
        value: String,
    },
    True {
        pos: Pos,
    },
    False {
        pos: Pos,
    },
    Range {
        pos: Pos,
        left: Box<Node>,
        left_inclusive: bool,
        right: Box<Node>,
        right_inclusive: bool,
        end: Pos,
    },

    Identifier {
        pos: Pos,
        name: String,
    },

    TypeSpec {
        pos: Pos,
        kind: TokenKind,
        params: Option<Box<Node>>,
        spec: Box<Node>,
    },
    Spread {
        pos: Pos,
        node: Box<Node>,
    },
    Prefix {
        op: TokenKind,
        pos: Pos,
        node: Box<Node>,
    },
    Infix {
        op: TokenKind,
        pos: Pos,
        left: Box<Node>,
        right: Box<Node>,
    },

    Empty,
}

impl Node {
    pub fn start(&self) -> Pos {
        match self {
            Node::Program { nodes } => nodes.first().map_or(Pos(0), Node::start),
            Node::Block { left, .. } | Node::Tuple { left, .. } => *left,
            Node::Assign { left, .. } | Node::Each { left, .. } => left.start(),
            Node::As { node, .. } => node.start(),
            Node::If { true_body, .. } => true_body.start(),
            Node::For { keyword, .. } => *keyword,
            Node::Match { keyword, .. } => *keyword,
            Node::Return { keyword, .. } => *keyword,
            Node::Branch { keyword_pos, .. } => *keyword_pos,
            Node::Call { pos, .. } => *pos,
            Node::Indexor { node, .. } => node.start(),
            Node::Selector { node, .. } => node.start(),
            Node::Construct { keyword, .. } => *keyword,
            Node::ProcedureType { keyword, .. } => *keyword,
            Node::ProcedureDefinition { proc_type, .. } => proc_type.start(),
            Node::Default { pos }
            | Node::Int { pos, .. }
            | Node::Float { pos, .. }
            | Node::String { pos, .. }
            | Node::Rune { pos, .. }
            | Node::True { pos }
            | Node::False { pos }
            | Node::Range { pos, .. }
            | Node::Identifier { pos, .. }
            | Node::TypeSpec { pos, .. }
            | Node::Spread { pos, .. }
            | Node::Prefix { pos, .. } => *pos,
            Node::Infix { left, .. } => left.start(),
            Node::Empty => Pos::NONE,
        }
    }

    pub fn end(&self) -> Pos {
        match self {
            Node::Program { nodes } => nodes.last().map_or(Pos(0), Node::end),
            Node::Block { right, .. } | Node::Tuple { right, .. } => *right,
            Node::Assign { right, .. } | Node::Each { right, .. } => right.end(),
            Node::As { ty, .. } => ty.end(),
            Node::If {
                false_body,
                true_body,
                ..
            } => false_body.as_ref().map_or(true_body.end(), |n| n.end()),
            Node::For { body, .. } => body.end(),
            Node::Match { right, .. } => *right,
            Node::Return { expr, .. } => expr.end(),
            Node::Branch { label, keyword_pos, .. } => {
                label.as_ref().map_or(*keyword_pos, |n| n.end())
            }
            Node::Call { arguments, pos, .. } => arguments.last().map_or(*pos, Node::end),
            Node::Indexor { end, .. } => *end,
            Node::Selector { selection, .. } => selection.end(),
            Node::Construct { value, .. } => value.end(),
            Node::ProcedureType { return_type, keyword, .. } => {
                return_type.as_ref().map_or(*keyword, |n| n.end())
            }
            Node::ProcedureDefinition { body, .. } => body.end(),
            Node::Default { pos } => Pos(pos.0 + 1),
            Node::Int { pos, text, .. } | Node::Float { pos, text, .. } => {
                Pos(pos.0 + text.len())
            }
            Node::String { end, .. } | Node::Rune { end, .. } => *end,
            Node::True { pos } => Pos(pos.0 + 4),
            Node::False { pos } => Pos(pos.0 + 5),
            Node::Range { end, .. } => *end,
            Node::Identifier { pos, name } => Pos(pos.0 + name.len()),
            Node::TypeSpec { spec, .. } => spec.end(),
            Node::Spread { node, .. } => node.end(),
            Node::Prefix { node, .. } => node.end(),
            Node::Infix { right, .. } => right.end(),
            Node::Empty => Pos::NONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_end_accounts_for_text_length() {
        let n = Node::Int {
            pos: Pos(4),
            text: "123".into(),
            value: 123,
        };
        assert_eq!(n.end(), Pos(7));
    }

    #[test]
    fn infix_span_covers_both_operands() {
        let n = Node::Infix {
            op: TokenKind::Add,
            pos: Pos(1),
            left: Box::new(Node::Identifier {
                pos: Pos(0),
                name: "a".into(),
            }),
            right: Box::new(Node::Identifier {
                pos: Pos(2),
                name: "b".into(),
            }),
        };
        assert_eq!(n.start(), Pos(0));
        assert_eq!(n.end(), Pos(3));
    }
}
