use crate::language::{
    borrowck::BorrowErrors,
    errors::{DeclError, LexError, ParseError},
    typecheck::TypeErrors,
};
use crate::runtime::RuntimeError;
use miette::{Diagnostic, NamedSource, Report};
use thiserror::Error;

/// First stage failure of a compilation unit. Each stage's own error type
/// carries the spans; this only says which stage stopped the pipeline.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Decl(#[from] DeclError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] TypeErrors),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Borrow(#[from] BorrowErrors),
}

impl CompileError {
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "lex",
            CompileError::Parse(_) => "parse",
            CompileError::Decl(_) => "declarations",
            CompileError::Type(_) => "types",
            CompileError::Borrow(_) => "borrows",
        }
    }
}

/// Failure of `pipeline::run_source`: either the unit did not compile or
/// evaluation stopped.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum RunError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Renders any diagnostic against its source text with miette's report handler.
pub fn render<D>(diagnostic: D, name: &str, source: &str) -> String
where
    D: Diagnostic + Send + Sync + 'static,
{
    let report = Report::new(diagnostic)
        .with_source_code(NamedSource::new(name.to_string(), source.to_string()));
    format!("{report:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{errors::LexErrorKind, span::Span};

    #[test]
    fn wraps_stage_errors_transparently() {
        let lex = LexError::new(LexErrorKind::UnterminatedString, Span::new(3, 4));
        let error = CompileError::from(lex.clone());
        assert_eq!(error.stage(), "lex");
        assert_eq!(error.to_string(), lex.to_string());
        assert_eq!(
            error.code().map(|code| code.to_string()),
            Some("cv::lex".to_string())
        );
        assert_eq!(error.labels().map(|labels| labels.count()), Some(1));
    }

    #[test]
    fn render_mentions_the_message() {
        let error = RuntimeError::division_by_zero(Span::new(4, 5));
        let rendered = render(error, "main.cv", "10 / 0");
        assert!(rendered.contains("division by zero"), "{rendered}");
    }
}
