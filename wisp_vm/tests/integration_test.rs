//! End-to-end scenarios driving source text through the full pipeline:
//! lexing and parsing (`wisp_parser`), lowering to SSA form (`wisp_ir`),
//! and evaluating the resulting program (`wisp_vm`).

use wisp_common::File;
use wisp_vm::Value;

fn evaluate(source: &str) -> Value {
    let (ast, parse_diagnostics, _file) = wisp_parser::parse(File::new("test", source));
    assert!(!parse_diagnostics.has_errors(), "parse errors: {:?}", parse_diagnostics.messages);
    let (program, gen_diagnostics) = wisp_ir::generate(&ast);
    assert!(!gen_diagnostics.has_errors(), "generation errors: {:?}", gen_diagnostics.messages);
    let (value, vm_diagnostics) = wisp_vm::run(&program);
    assert!(!vm_diagnostics.has_errors(), "evaluation errors: {:?}", vm_diagnostics.messages);
    value
}

fn assert_i64(source: &str, expected: i64) {
    match evaluate(source) {
        Value::I64(actual) => assert_eq!(actual, expected, "evaluating {source:?}"),
        other => panic!("expected I64({expected}) evaluating {source:?}, got {other:?}"),
    }
}

#[test]
fn operator_precedence_orders_multiplication_before_addition() {
    assert_i64("1 + 2 * 3 + 4", 11);
}

#[test]
fn match_picks_the_matching_case_and_falls_back_to_the_wildcard() {
    assert_i64("k: 3; match k { 3 ⇒ 5, 2 ⇒ 5, _ ⇒ 7 }", 5);
    assert_i64("k: 10; match k { 3 ⇒ 5, 2 ⇒ 5, _ ⇒ 7 }", 7);
}

#[test]
fn chained_conditional_arms_short_circuit_to_the_first_true_guard() {
    assert_i64("j: 0, k: 3; j = 1 ⇒ 3 ~ k = 2 ⇒ 4 ~ 5", 5);
}

#[test]
fn a_named_procedure_with_an_early_return_is_callable() {
    assert_i64("f: λ (i i64) → { i = 10 ⇒ return 100; return i }; .f 10", 100);
    assert_i64("f: λ (i i64) → { i = 10 ⇒ return 100; return i }; .f 1", 1);
}

#[test]
fn a_procedure_can_call_itself_by_name() {
    assert_i64(
        "fibo: λ (n i64) → match n { 0 ⇒ 0, 1 ⇒ 1, _ ⇒ .fibo {n-1} + .fibo {n-2} }; .fibo 20",
        6765,
    );
}

#[test]
fn an_array_filled_through_a_loop_supports_indexed_read_and_write() {
    assert_i64(
        "fibo: λ (n i64) → { a: .make array[i64] {n+1}; a[0]: 0; a[1]: 1; \
         ∀ i ∈ range[2‥n] → { a[i]: a[i-2] + a[i-1] }; a[n] }; .fibo 40",
        102334155,
    );
}
