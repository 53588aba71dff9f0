use super::{run, with_prelude, Builtins};
use crate::{
    config::Options,
    diagnostics::CompileError,
    language::{borrowck::BorrowErrorKind, lexer::tokenize, typecheck::TypeErrorKind},
    pipeline::check_source_with,
    runtime::Value,
};
use pretty_assertions::assert_eq;

fn compile_error(source: &str) -> CompileError {
    check_source_with(&with_prelude(source), &Options::default(), &Builtins)
        .map(|_| ())
        .expect_err("expected the unit to be rejected")
}

fn type_errors(source: &str) -> Vec<TypeErrorKind> {
    match compile_error(source) {
        CompileError::Type(errors) => errors.kinds().cloned().collect(),
        other => panic!("expected type errors, got {other:?}"),
    }
}

fn borrow_errors(source: &str) -> Vec<BorrowErrorKind> {
    match compile_error(source) {
        CompileError::Borrow(errors) => errors.kinds().cloned().collect(),
        other => panic!("expected borrow errors, got {other:?}"),
    }
}

fn int(source: &str) -> i128 {
    run(source)
        .expect("run")
        .as_int()
        .expect("integer result")
}

const PROFILE_PROGRAM: &str = "
    patch userProfile {
        bool isAdult() { self.age >= 18 }
        string greeting() { \"hi \" + self.name.toLowerCase() }
    }
    fn oldest(userProfile& a, userProfile& b) -> i32 {
        if a.age > b.age { a.age } else { b.age }
    }
    fn main() -> i32 {
        @ann = userProfile{name: \"ANN\", age: 31};
        bob = userProfile{name: \"Bob\", age: 17};
        greeting = ann.greeting();
        print(greeting);
        ann.age += 1;
        when bob.isAdult() { true: 0; false: oldest(&ann, &bob); }
    }
";

#[test]
fn relexed_program_still_checks_and_runs() {
    let source = with_prelude(PROFILE_PROGRAM);
    let tokens = tokenize(&source).expect("lex");
    let joined = tokens
        .iter()
        .map(|token| token.lexeme.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let relexed = tokenize(&joined).expect("re-lex");
    assert_eq!(
        relexed.iter().map(|t| &t.kind).collect::<Vec<_>>(),
        tokens.iter().map(|t| &t.kind).collect::<Vec<_>>()
    );
    let result = crate::pipeline::run_source(&joined, &Options::default(), &Builtins).expect("run");
    assert_eq!(result.value.as_int(), Some(32));
}

#[test]
fn exclusive_borrows_are_exclusive() {
    assert_eq!(
        borrow_errors("fn main() { @x = 1; a = &@x; b = &@x; }"),
        vec![BorrowErrorKind::AliasConflict("x".into())]
    );
    assert_eq!(
        borrow_errors("fn main() { @x = 1; a = &x; b = &@x; }"),
        vec![BorrowErrorKind::AliasConflict("x".into())]
    );
    assert_eq!(int("fn main() -> i32 { x = 1; a = &x; b = &x; *a + *b }"), 2);
}

#[test]
fn references_die_with_their_scope() {
    assert_eq!(
        borrow_errors(
            "fn main() -> i32 {
                 outer = 0;
                 @r = &outer;
                 { inner = 5; r = &inner; }
                 *r
             }"
        ),
        vec![BorrowErrorKind::UseAfterScopeExit("r".into())]
    );
}

#[test]
fn value_when_must_cover_every_variant() {
    assert_eq!(
        type_errors(
            "fn main() -> i32 { option<i32> o = some(1); when o { some(v): v; } }"
        ),
        vec![TypeErrorKind::NonExhaustiveMatch {
            missing: vec!["none".into()],
        }]
    );
    assert_eq!(
        int("fn main() -> i32 { option<i32> o = none; when o { some(v): v; none: 9; } }"),
        9
    );
}

#[test]
fn when_commits_to_the_first_match() {
    assert_eq!(
        int("fn main() -> i32 { result<i32, string> r = ok(5); when r { ok(_): 1; else: 2; } }"),
        1
    );
    assert_eq!(
        int("fn main() -> i32 { result<i32, string> r = ok(5); when r { ok(v): v; ok(_): 2; err(_): 3; } }"),
        5
    );
}

#[test]
fn patch_methods_resolve_by_receiver_type() {
    let adult = run(
        "patch userProfile { bool isAdult() { self.age >= 18 } }
         fn main() -> bool { u = userProfile{name: \"ann\", age: 25}; u.isAdult() }",
    )
    .expect("run");
    assert!(matches!(adult, Value::Bool(true)));

    assert_eq!(
        type_errors(
            "patch userProfile { bool isAdult() { self.age >= 18 } }
             fn main() { u = userProfile{name: \"ann\", age: 25}; u.isRetired(); }"
        ),
        vec![TypeErrorKind::UnknownMethod {
            ty: "userProfile".into(),
            method: "isRetired".into(),
        }]
    );
}

#[test]
fn a_block_yields_its_tail_expression() {
    let helper = "fn f() -> i32 { 3 }";
    assert_eq!(int(&format!("{helper} fn main() -> i32 {{ {{ f(); 7 }} }}")), 7);
    let unit = run(&format!("{helper} fn main() {{ v = {{ f(); 7; }}; }}")).expect("run");
    assert!(matches!(unit, Value::Unit));
    assert!(matches!(
        compile_error(&format!("{helper} fn main() -> i32 {{ {{ f(); 7; }} }}")),
        CompileError::Type(_)
    ));
}

#[test]
fn shadowing_leaves_the_borrowed_slot_untouched() {
    assert_eq!(int("fn main() -> i32 { x = 1; r = &x; { x = 2; }; *r }"), 1);
    assert_eq!(int("fn main() -> i32 { x = 1; { x = 2; } x }"), 1);
}
