use super::{init_tracing, run, run_with, with_prelude, Builtins};
use crate::{
    config::{Options, ENTRY_VAR, MAX_CALL_DEPTH_VAR, STRICT_WHEN_VAR},
    diagnostics::{CompileError, RunError},
    language::{errors::LexErrorKind, typecheck::TypeErrorKind},
    pipeline::{check_source, run_source},
    runtime::{RuntimeError, Value},
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn options(pairs: &[(&str, &str)]) -> Options {
    let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
    Options::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
}

fn runtime_error(source: &str) -> RuntimeError {
    match run(source) {
        Err(RunError::Runtime(error)) => error,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn stops_at_the_first_failing_stage() {
    init_tracing();
    let stage = |source: &str| {
        check_source(source, &Options::default())
            .map(|_| ())
            .expect_err("expected a failure")
            .stage()
    };
    assert_eq!(stage("fn main() { s = \"open; }"), "lex");
    assert_eq!(stage("fn main() { x = ; }"), "parse");
    assert_eq!(stage("fn main() { } fn main() { }"), "declarations");
    assert_eq!(stage("fn main() { x = missing; }"), "types");
    assert_eq!(stage("fn main() { @x = 1; a = &@x; b = &x; }"), "borrows");
}

#[test]
fn lex_errors_keep_their_position() {
    match check_source("fn main() { $ }", &Options::default()) {
        Err(CompileError::Lex(error)) => {
            assert_eq!(error.kind, LexErrorKind::InvalidCharacter('$'));
            assert_eq!(error.position(), 12);
        }
        other => panic!("expected a lex error, got {other:?}"),
    }
}

#[test]
fn type_errors_are_all_collected() {
    let result = check_source(
        "fn main() { a = missing; b = absent; }",
        &Options::default(),
    );
    let Err(CompileError::Type(errors)) = result else {
        panic!("expected type errors");
    };
    assert_eq!(
        errors.kinds().cloned().collect::<Vec<_>>(),
        vec![
            TypeErrorKind::UnknownIdentifier("missing".into()),
            TypeErrorKind::UnknownIdentifier("absent".into()),
        ]
    );
}

#[test]
fn entry_function_comes_from_options() {
    let source = "fn start() -> i32 { 40 + 2 }";
    let custom = options(&[(ENTRY_VAR, "start")]);
    assert!(matches!(run_with(source, &custom), Ok(Value::Int(42))));
    assert!(matches!(
        run(source),
        Err(RunError::Compile(CompileError::Type(errors)))
            if errors.kinds().any(|k| *k == TypeErrorKind::MissingEntry("main".into()))
    ));
    assert!(matches!(
        run("fn main(i32 x) -> i32 { x }"),
        Err(RunError::Compile(CompileError::Type(errors)))
            if errors.kinds().any(|k| matches!(k, TypeErrorKind::ArityMismatch { .. }))
    ));
}

#[test]
fn strict_when_rejects_partial_statements() {
    let source = "fn main() { option<i32> o = none; when o { some(v): print(v); } }";
    assert!(matches!(run(source), Ok(Value::Unit)));
    let strict = options(&[(STRICT_WHEN_VAR, "1")]);
    assert!(matches!(
        run_with(source, &strict),
        Err(RunError::Compile(CompileError::Type(_)))
    ));
}

#[test]
fn runtime_faults_surface_with_their_kind() {
    assert!(matches!(
        runtime_error("fn main() -> i32 { d = 0; 7 % d }"),
        RuntimeError::DivisionByZero { .. }
    ));
    assert!(matches!(
        runtime_error("fn main() -> i32 { a = [1]; i = 0 - 1; a[i] }"),
        RuntimeError::IndexOutOfBounds { index: -1, len: 1, .. }
    ));
    assert!(matches!(
        runtime_error("fn main() -> i8 { i8 x = 127; x + 1 }"),
        RuntimeError::Overflow { ty, .. } if ty == "i8"
    ));
    assert!(matches!(
        runtime_error("fn main() -> u32 { u32 x = 0; x - 1 }"),
        RuntimeError::Overflow { ty, .. } if ty == "u32"
    ));
}

fn count_down(n: usize) -> String {
    format!(
        "fn count(i32 n) -> i32 {{ if n == 0 {{ 0 }} else {{ 1 + count(n - 1) }} }}
         fn main() -> i32 {{ count({n}) }}"
    )
}

#[test]
fn call_depth_limit_is_configurable() {
    let source = count_down(50);
    assert!(matches!(run(&source), Ok(Value::Int(50))));
    let shallow = options(&[(MAX_CALL_DEPTH_VAR, "10")]);
    assert!(matches!(
        run_with(&source, &shallow),
        Err(RunError::Runtime(RuntimeError::CallDepthExceeded { limit: 10, .. }))
    ));
}

#[test]
fn recursion_reaches_the_default_limit() {
    // `main` takes one frame of the budget.
    assert!(matches!(run(&count_down(254)), Ok(Value::Int(254))));
    assert!(matches!(
        run(&count_down(255)),
        Err(RunError::Runtime(RuntimeError::CallDepthExceeded { limit: 256, .. }))
    ));
}

#[test]
fn deep_recursion_grows_the_stack() {
    let deep = options(&[(MAX_CALL_DEPTH_VAR, "20000")]);
    assert!(matches!(
        run_with(&count_down(10_000), &deep),
        Ok(Value::Int(10_000))
    ));
}

#[test]
fn execution_result_counts_calls() {
    let source = with_prelude(
        "fn twice(i32 n) -> i32 { n * 2 }
         fn main() -> i32 { twice(twice(3)) }",
    );
    let result = run_source(&source, &Options::default(), &Builtins).expect("run");
    assert_eq!(result.value.as_int(), Some(12));
    assert_eq!(result.calls, 3);
}

#[test]
fn native_methods_run_through_the_pipeline() {
    assert!(matches!(
        run("fn main() -> i32 { name = \"Ada\"; name.len() }"),
        Ok(Value::Int(3))
    ));
}
