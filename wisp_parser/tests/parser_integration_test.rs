//! Integration tests for the parser, exercised against full source strings
//! rather than hand-built token streams.

use wisp_common::File;
use wisp_parser::{parse, Node};

fn parse_source(source: &str) -> Node {
    let (program, diagnostics, _file) = parse(File::new("test", source));
    assert!(!diagnostics.has_errors(), "unexpected diagnostics: {:?}", diagnostics.messages);
    program
}

#[test]
fn test_arithmetic_precedence_nests_products_under_sums() {
    let program = parse_source("1 + 2 * 3 + 4");
    let Node::Program { nodes } = program else { panic!() };
    assert_eq!(nodes.len(), 1);
}

#[test]
fn test_match_with_default_case() {
    let program = parse_source("k: 3; match k { 3 ⇒ 5, 2 ⇒ 5, _ ⇒ 7 }");
    let Node::Program { nodes } = program else { panic!() };
    assert_eq!(nodes.len(), 2);
    assert!(matches!(nodes[0], Node::Assign { .. }));
    assert!(matches!(nodes[1], Node::Match { .. }));
}

#[test]
fn test_chained_then_else_is_right_nested() {
    let program = parse_source("j: 0, k: 3; j = 1 ⇒ 3 ~ k = 2 ⇒ 4 ~ 5");
    let Node::Program { nodes } = program else { panic!() };
    assert_eq!(nodes.len(), 2);
    assert!(matches!(nodes[1], Node::If { .. }));
}

#[test]
fn test_procedure_definition_with_typed_argument_and_body() {
    let program =
        parse_source("f: λ (i i64) → { i = 10 ⇒ return 100; return i }");
    let Node::Program { nodes } = program else { panic!() };
    let Node::Assign { right, .. } = &nodes[0] else { panic!() };
    let Node::ProcedureDefinition { proc_type, body } = right.as_ref() else {
        panic!("expected a procedure definition, got {right:?}")
    };
    let Node::ProcedureType { args, .. } = proc_type.as_ref() else { panic!() };
    assert_eq!(args.len(), 1);
    assert_eq!(args[0].name, "i");
    assert!(matches!(body.as_ref(), Node::Block { .. }));
}

#[test]
fn test_recursive_call_chain_parses_as_nested_calls() {
    let program = parse_source(".fibo {n-1}");
    let Node::Program { nodes } = program else { panic!() };
    assert!(matches!(nodes[0], Node::Call { .. }));
}

#[test]
fn test_for_each_over_range_builds_each_clause() {
    let program = parse_source("∀ i ∈ range[2‥n] → { a[i]: 0 }");
    let Node::Program { nodes } = program else { panic!() };
    let Node::For { clause, body, .. } = &nodes[0] else { panic!() };
    assert!(matches!(clause.as_ref(), Node::Each { .. }));
    assert!(matches!(body.as_ref(), Node::Block { .. }));
}

#[test]
fn test_unterminated_tuple_is_reported_but_yields_partial_tree() {
    let (program, diagnostics, _) = parse(File::new("test", "(1, 2"));
    assert!(diagnostics.has_errors());
    let Node::Program { nodes } = program else { panic!() };
    assert!(matches!(nodes[0], Node::Tuple { .. }));
}
