mod checker;
mod patterns;

use crate::language::{
    ast::{ExprId, Program},
    declarations::DeclTable,
    span::Span,
    symbols::SymbolTable,
    types::Type,
};
use crate::runtime::native::NativeLibrary;
use miette::{Diagnostic, SourceSpan};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldProblem {
    Unknown,
    Duplicate,
    Missing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeErrorKind {
    UnknownType(String),
    UnknownIdentifier(String),
    FieldMismatch {
        record: String,
        field: String,
        problem: FieldProblem,
    },
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    UnknownMethod {
        ty: String,
        method: String,
    },
    AmbiguousMethod {
        ty: String,
        method: String,
        candidates: usize,
    },
    NonExhaustiveMatch {
        missing: Vec<String>,
    },
    TypeMismatch {
        expected: String,
        found: String,
    },
    UnknownVariant(String),
    AmbiguousVariant {
        variant: String,
        unions: Vec<String>,
    },
    NotCallable(String),
    InvalidAssignTarget,
    InvalidBorrowTarget,
    BreakOutsideLoop,
    NotIndexable(String),
    NotDereferenceable(String),
    MissingEntry(String),
}

impl fmt::Display for TypeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeErrorKind::UnknownType(name) => write!(f, "unknown type `{name}`"),
            TypeErrorKind::UnknownIdentifier(name) => write!(f, "unknown identifier `{name}`"),
            TypeErrorKind::FieldMismatch {
                record,
                field,
                problem,
            } => match problem {
                FieldProblem::Unknown => write!(f, "`{record}` has no field `{field}`"),
                FieldProblem::Duplicate => write!(f, "field `{field}` of `{record}` is given twice"),
                FieldProblem::Missing => write!(f, "missing field `{field}` of `{record}`"),
            },
            TypeErrorKind::ArityMismatch {
                name,
                expected,
                found,
            } => write!(f, "`{name}` takes {expected} arguments but {found} were given"),
            TypeErrorKind::UnknownMethod { ty, method } => {
                write!(f, "no method `{method}` on `{ty}`")
            }
            TypeErrorKind::AmbiguousMethod {
                ty,
                method,
                candidates,
            } => write!(
                f,
                "method `{method}` on `{ty}` is ambiguous between {candidates} patches"
            ),
            TypeErrorKind::NonExhaustiveMatch { missing } => {
                if missing.is_empty() {
                    write!(f, "`when` used as a value is not exhaustive")
                } else {
                    write!(
                        f,
                        "`when` used as a value does not cover {}",
                        missing.join(", ")
                    )
                }
            }
            TypeErrorKind::TypeMismatch { expected, found } => {
                write!(f, "expected `{expected}`, found `{found}`")
            }
            TypeErrorKind::UnknownVariant(name) => write!(f, "unknown variant `{name}`"),
            TypeErrorKind::AmbiguousVariant { variant, unions } => write!(
                f,
                "variant `{variant}` exists in {}; qualify it",
                unions.join(", ")
            ),
            TypeErrorKind::NotCallable(name) => write!(f, "`{name}` is not a function"),
            TypeErrorKind::InvalidAssignTarget => write!(f, "cannot assign to this expression"),
            TypeErrorKind::InvalidBorrowTarget => write!(f, "cannot borrow a temporary value"),
            TypeErrorKind::BreakOutsideLoop => write!(f, "`break` outside of a loop"),
            TypeErrorKind::NotIndexable(ty) => write!(f, "`{ty}` cannot be indexed or iterated"),
            TypeErrorKind::NotDereferenceable(ty) => write!(f, "`{ty}` is not a reference"),
            TypeErrorKind::MissingEntry(name) => write!(f, "entry function `{name}` is not declared"),
        }
    }
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("{kind}")]
#[diagnostic(code(cv::types))]
pub struct TypeError {
    pub kind: TypeErrorKind,
    #[label("here")]
    pub span: SourceSpan,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Span) -> Self {
        Self {
            kind,
            span: span.into(),
        }
    }
}

/// Every type error found in one compilation unit.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("{} type error(s); first: {}", .errors.len(), first_message(.errors))]
#[diagnostic(code(cv::types))]
pub struct TypeErrors {
    #[related]
    pub errors: Vec<TypeError>,
}

fn first_message(errors: &[TypeError]) -> String {
    errors.first().map(|e| e.to_string()).unwrap_or_default()
}

impl TypeErrors {
    pub fn kinds(&self) -> impl Iterator<Item = &TypeErrorKind> {
        self.errors.iter().map(|error| &error.kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Function that must be declared; `None` skips the check.
    pub entry: Option<String>,
    /// Require exhaustiveness for `when` statements whose value is discarded.
    pub exhaustive_statement_when: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            entry: Some("main".to_string()),
            exhaustive_statement_when: false,
        }
    }
}

/// Resolved unit: the rewritten AST plus everything later stages read.
#[derive(Clone, Debug)]
pub struct TypedProgram {
    pub program: Program,
    pub decls: DeclTable,
    pub symbols: SymbolTable,
    pub types: HashMap<ExprId, Type>,
}

impl TypedProgram {
    pub fn type_of(&self, id: ExprId) -> Option<&Type> {
        self.types.get(&id)
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn resolve(
    program: Program,
    decls: &DeclTable,
    options: &ResolveOptions,
    natives: &dyn NativeLibrary,
) -> Result<TypedProgram, TypeErrors> {
    checker::Checker::new(decls, options, natives).run(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{
        ast::{ExprKind, Item, Pattern, StmtKind},
        lexer::tokenize,
        parser::parse,
        types::PrimitiveKind,
    };
    use crate::runtime::native::NativeSignature;
    use pretty_assertions::assert_eq;

    struct Strings;

    impl NativeLibrary for Strings {
        fn method_signature(&self, receiver: &Type, name: &str) -> Option<NativeSignature> {
            match (receiver, name) {
                (Type::Primitive(PrimitiveKind::String), "toLowerCase") => {
                    Some(NativeSignature::new(Vec::new(), Type::string()))
                }
                _ => None,
            }
        }

        fn function_signature(&self, name: &str) -> Option<NativeSignature> {
            (name == "print").then(|| NativeSignature::variadic(Type::unit()))
        }
    }

    const PRELUDE: &str = "
        union result<T, E> { ok(T); err(E); }
        union option<T> { some(T); none; }
        record userProfile { string name; i32 age; }
    ";

    fn resolve_with(source: &str, options: &ResolveOptions) -> Result<TypedProgram, TypeErrors> {
        let source = format!("{PRELUDE}\n{source}");
        let program = parse(tokenize(&source).expect("lex")).expect("parse");
        let decls = DeclTable::register(&program).expect("declarations");
        resolve(program, &decls, options, &Strings)
    }

    fn check(source: &str) -> Result<TypedProgram, TypeErrors> {
        resolve_with(source, &ResolveOptions::default())
    }

    fn errors(source: &str) -> Vec<TypeErrorKind> {
        match check(source) {
            Ok(_) => Vec::new(),
            Err(errors) => errors.kinds().cloned().collect(),
        }
    }

    fn main_function(typed: &TypedProgram) -> &crate::language::ast::FunctionDecl {
        typed
            .program
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(decl) if decl.name == "main" => Some(decl),
                _ => None,
            })
            .expect("main")
    }

    #[test]
    fn accepts_a_well_typed_program() {
        let typed = check(
            "patch userProfile { bool isAdult() { self.age >= 18 } }
             fn main() -> bool {
                 userProfile user = userProfile{name: \"ann\", age: 25};
                 print(user.name.toLowerCase());
                 user.isAdult()
             }",
        )
        .expect("resolve");
        let body = &main_function(&typed).body;
        let tail = body.tail().expect("tail");
        assert_eq!(typed.type_of(tail.id), Some(&Type::bool()));
    }

    #[test]
    fn record_construction_checks_every_field() {
        assert_eq!(
            errors("fn main() { u = userProfile{name: \"x\", name: \"y\", agee: 3}; }"),
            vec![
                TypeErrorKind::FieldMismatch {
                    record: "userProfile".into(),
                    field: "name".into(),
                    problem: FieldProblem::Duplicate,
                },
                TypeErrorKind::FieldMismatch {
                    record: "userProfile".into(),
                    field: "agee".into(),
                    problem: FieldProblem::Unknown,
                },
                TypeErrorKind::FieldMismatch {
                    record: "userProfile".into(),
                    field: "age".into(),
                    problem: FieldProblem::Missing,
                },
            ]
        );
    }

    #[test]
    fn union_construction_checks_variant_and_payload() {
        assert_eq!(
            errors("fn main() { r = result<i32, string>::fine(1); }"),
            vec![TypeErrorKind::UnknownVariant("fine".into())]
        );
        assert_eq!(
            errors("fn main() { r = ok(1, 2); }"),
            vec![TypeErrorKind::ArityMismatch {
                name: "ok".into(),
                expected: 1,
                found: 2,
            }]
        );
        assert_eq!(
            errors("fn main() { result<i32, string> r = ok(\"no\"); }"),
            vec![TypeErrorKind::TypeMismatch {
                expected: "i32".into(),
                found: "string".into(),
            }]
        );
    }

    #[test]
    fn generic_parameters_unify_across_uses() {
        let typed = check(
            "fn main() -> i64 {
                 r = ok(5);
                 result<i64, string> s = r;
                 when s { ok(v): v; err(_): 0; }
             }",
        );
        // `ok(5)` commits to i32 before the annotated binding is seen.
        assert!(typed.is_err());
        let typed = check(
            "fn main() -> i64 {
                 result<i64, string> s = ok(5);
                 when s { ok(v): v; err(_): 0; }
             }",
        )
        .expect("resolve");
        let body = &main_function(&typed).body;
        let StmtKind::Let(decl) = &body.statements[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(
            typed.type_of(decl.value.id).map(|ty| ty.to_string()),
            Some("result<i64, string>".into())
        );
    }

    #[test]
    fn method_resolution_reports_unknown_and_ambiguous() {
        assert_eq!(
            errors(
                "patch userProfile { bool isAdult() { self.age >= 18 } }
                 fn main() { u = userProfile{name: \"a\", age: 1}; u.isChild(); }"
            ),
            vec![TypeErrorKind::UnknownMethod {
                ty: "userProfile".into(),
                method: "isChild".into(),
            }]
        );
        assert_eq!(
            errors(
                "patch result<T, E> { bool pick() { true } }
                 patch result<i32, string> { bool pick() { false } }
                 fn main() { result<i32, string> r = ok(1); r.pick(); }"
            ),
            vec![TypeErrorKind::AmbiguousMethod {
                ty: "result<i32, string>".into(),
                method: "pick".into(),
                candidates: 2,
            }]
        );
    }

    #[test]
    fn value_when_must_be_exhaustive() {
        let missing = errors(
            "fn main() -> i32 { result<i32, string> r = ok(1); when r { ok(v): v; } }",
        );
        assert_eq!(
            missing,
            vec![TypeErrorKind::NonExhaustiveMatch {
                missing: vec!["err".into()],
            }]
        );
        assert!(errors(
            "fn main() -> i32 { result<i32, string> r = ok(1); when r { ok(v): v; err(_): 0; } }"
        )
        .is_empty());
        assert!(errors(
            "fn main() -> i32 { result<i32, string> r = ok(1); when r { ok(v): v; else: 0; } }"
        )
        .is_empty());
    }

    #[test]
    fn nested_arms_cover_a_variant_together() {
        assert!(errors(
            "fn main() -> i32 {
                 option<option<i32>> o = some(none);
                 when o { some(some(v)): v; some(none): 1; none: 0; }
             }"
        )
        .is_empty());
        assert!(errors(
            "fn main() -> i32 {
                 result<bool, string> r = ok(true);
                 when r { ok(true): 1; ok(false): 2; err(_): 3; }
             }"
        )
        .is_empty());
        assert_eq!(
            errors(
                "fn main() -> i32 {
                     option<option<i32>> o = some(none);
                     when o { some(some(v)): v; none: 0; }
                 }"
            ),
            vec![TypeErrorKind::NonExhaustiveMatch {
                missing: vec!["some".into()],
            }]
        );
    }

    #[test]
    fn qualified_variants_name_their_union() {
        assert!(errors(
            "fn main() -> i32 {
                 r = result<i32, string>::ok(1);
                 n = option::none;
                 when r { ok(v): v; err(_): 0; }
             }"
        )
        .is_empty());
        assert_eq!(
            errors("fn main() { r = result<i32>::ok(1); }"),
            vec![TypeErrorKind::ArityMismatch {
                name: "result".into(),
                expected: 2,
                found: 1,
            }]
        );
        assert_eq!(
            errors("fn main() { n = option::maybe; }"),
            vec![TypeErrorKind::UnknownVariant("maybe".into())]
        );
        assert_eq!(
            errors("fn main() { u = userProfile::ok(1); }"),
            vec![TypeErrorKind::UnknownType("userProfile".into())]
        );
    }

    #[test]
    fn fixed_arrays_keep_their_length() {
        let mismatch = |expected: &str, found: &str| TypeErrorKind::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        };
        assert!(errors("fn main() -> i32 { fixedArray<i32, 3> a = [1, 2, 3]; a[0] }").is_empty());
        assert_eq!(
            errors("fn main() { fixedArray<i32, 3> a = [1, 2]; }"),
            vec![mismatch("fixedArray<i32, 3>", "fixedArray<i32, 2>")]
        );
        assert_eq!(
            errors("fn main() { fixedArray<i32, 2> @a = [1, 2]; a = [1, 2, 3]; }"),
            vec![mismatch("fixedArray<i32, 2>", "fixedArray<i32, 3>")]
        );
        assert_eq!(
            errors("fn main() { arrayList<i32> xs = [1, 2, 3]; fixedArray<i32, 3> f = xs; }"),
            vec![mismatch("fixedArray<i32, 3>", "arrayList<i32>")]
        );
        assert_eq!(
            errors("fn main() { fixedArray<i32, string> a = [1]; }"),
            vec![mismatch("array length", "string")]
        );
    }

    #[test]
    fn statement_when_exhaustiveness_is_configurable() {
        let source = "fn main() { result<i32, string> r = ok(1); when r { ok(v): print(v); } }";
        assert!(check(source).is_ok());
        let strict = ResolveOptions {
            exhaustive_statement_when: true,
            ..ResolveOptions::default()
        };
        assert!(matches!(
            resolve_with(source, &strict).map_err(|e| e.errors[0].kind.clone()),
            Err(TypeErrorKind::NonExhaustiveMatch { .. })
        ));
    }

    #[test]
    fn bare_variant_names_in_patterns_become_variants() {
        let typed = check(
            "fn main() -> i32 { option<i32> o = none; when o { none: 0; some(v): v; } }",
        )
        .expect("resolve");
        let body = &main_function(&typed).body;
        let ExprKind::When {
            arms,
            produces_value,
            ..
        } = &body.tail().expect("tail").kind
        else {
            panic!("expected when");
        };
        assert!(*produces_value);
        assert!(matches!(&arms[0].pattern, Pattern::Variant { name, .. } if name == "none"));
    }

    #[test]
    fn field_access_on_references_inserts_an_implicit_deref() {
        let typed = check(
            "fn age(userProfile& user) -> i32 { user.age }
             fn main() { }",
        )
        .expect("resolve");
        let decl = typed
            .program
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(decl) if decl.name == "age" => Some(decl),
                _ => None,
            })
            .expect("age");
        let ExprKind::FieldAccess { base, .. } = &decl.body.tail().expect("tail").kind else {
            panic!("expected field access");
        };
        assert!(matches!(base.kind, ExprKind::Deref { implicit: true, .. }));
        assert_eq!(
            typed.type_of(base.id).map(|ty| ty.to_string()),
            Some("userProfile".into())
        );
    }

    #[test]
    fn bare_assignment_declares_or_shadows() {
        let typed = check(
            "fn main() {
                 x = 1;
                 { x = 2; }
                 @y = 1;
                 y = 2;
             }",
        )
        .expect("resolve");
        let body = &main_function(&typed).body;
        assert!(matches!(body.statements[0].kind, StmtKind::Let(_)));
        let StmtKind::Expr(inner) = &body.statements[1].kind else {
            panic!("expected block");
        };
        let ExprKind::Block(block) = &inner.kind else {
            panic!("expected block");
        };
        assert!(matches!(block.statements[0].kind, StmtKind::Let(_)));
        assert!(matches!(body.statements[3].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn integer_literals_follow_context() {
        let typed = check("fn main() { u8 small = 7; wide = 7; }").expect("resolve");
        let body = &main_function(&typed).body;
        let kinds: Vec<String> = body
            .statements
            .iter()
            .filter_map(|stmt| match &stmt.kind {
                StmtKind::Let(decl) => typed.type_of(decl.value.id).map(|ty| ty.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["u8", "i32"]);
    }

    #[test]
    fn reports_unknown_names_and_missing_entry() {
        let options = ResolveOptions {
            entry: Some("start".into()),
            ..ResolveOptions::default()
        };
        let errors: Vec<TypeErrorKind> =
            match resolve_with("fn main() { y = x + 1; widget w = 1; }", &options) {
                Ok(_) => Vec::new(),
                Err(errors) => errors.kinds().cloned().collect(),
            };
        assert_eq!(
            errors,
            vec![
                TypeErrorKind::UnknownIdentifier("x".into()),
                TypeErrorKind::UnknownType("widget".into()),
                TypeErrorKind::MissingEntry("start".into()),
            ]
        );
    }

    #[test]
    fn break_requires_a_loop() {
        assert_eq!(
            errors("fn main() { break; }"),
            vec![TypeErrorKind::BreakOutsideLoop]
        );
        assert!(errors("fn main() -> i32 { loop { break 3; } }").is_empty());
    }
}
