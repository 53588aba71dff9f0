use crate::language::span::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedString,
    UnterminatedChar,
    UnterminatedComment,
    InvalidCharacter(char),
    InvalidNumber,
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("{}", describe_lex(.kind))]
#[diagnostic(code(cv::lex))]
pub struct LexError {
    pub kind: LexErrorKind,
    #[label("here")]
    pub span: SourceSpan,
}

impl LexError {
    pub fn new(kind: LexErrorKind, span: Span) -> Self {
        Self {
            kind,
            span: span.into(),
        }
    }

    pub fn position(&self) -> usize {
        self.span.offset()
    }
}

fn describe_lex(kind: &LexErrorKind) -> String {
    match kind {
        LexErrorKind::UnterminatedString => "unterminated string literal".into(),
        LexErrorKind::UnterminatedChar => "unterminated char literal".into(),
        LexErrorKind::UnterminatedComment => "unterminated block comment".into(),
        LexErrorKind::InvalidCharacter(ch) => format!("invalid character '{ch}'"),
        LexErrorKind::InvalidNumber => "invalid number literal".into(),
    }
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("expected {expected}, found {found}")]
#[diagnostic(code(cv::parse))]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    #[label("unexpected {found}")]
    pub span: SourceSpan,
}

impl ParseError {
    pub fn new(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
            span: span.into(),
        }
    }

    pub fn position(&self) -> usize {
        self.span.offset()
    }
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum DeclError {
    #[error("`{name}` is declared more than once")]
    #[diagnostic(code(cv::decl::duplicate))]
    DuplicateDeclaration {
        name: String,
        #[label("second declaration")]
        span: SourceSpan,
    },
    #[error("`{owner}` declares `{name}` more than once")]
    #[diagnostic(code(cv::decl::duplicate_member))]
    DuplicateMember {
        owner: String,
        name: String,
        #[label("repeated here")]
        span: SourceSpan,
    },
    #[error("method `{method_name}` is patched onto `{ty}` more than once")]
    #[diagnostic(code(cv::decl::conflicting_patch))]
    ConflictingPatchMethod {
        ty: String,
        method_name: String,
        #[label("conflicting method")]
        span: SourceSpan,
    },
    #[error("cannot patch unknown type `{name}`")]
    #[diagnostic(code(cv::decl::unknown_patch_target))]
    UnknownPatchTarget {
        name: String,
        #[label("not a record or union")]
        span: SourceSpan,
    },
    #[error("`{name}` expects {expected} type arguments but the patch gives {found}")]
    #[diagnostic(code(cv::decl::patch_arity))]
    PatchArity {
        name: String,
        expected: usize,
        found: usize,
        #[label("patch target")]
        span: SourceSpan,
    },
}
