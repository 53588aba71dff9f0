use crate::language::span::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("division by zero")]
    #[diagnostic(code(cv::runtime::division_by_zero))]
    DivisionByZero {
        #[label("divisor is zero")]
        span: SourceSpan,
    },
    #[error("index {index} is out of bounds for length {len}")]
    #[diagnostic(code(cv::runtime::index_out_of_bounds))]
    IndexOutOfBounds {
        index: i128,
        len: usize,
        #[label("indexed here")]
        span: SourceSpan,
    },
    #[error("evaluation reached a state the checker rules out")]
    #[diagnostic(code(cv::runtime::unreachable))]
    Unreachable {
        #[label("here")]
        span: SourceSpan,
    },
    #[error("`{ty}` arithmetic overflowed")]
    #[diagnostic(code(cv::runtime::overflow))]
    Overflow {
        ty: String,
        #[label("overflow")]
        span: SourceSpan,
    },
    #[error("unknown function `{name}`")]
    #[diagnostic(code(cv::runtime::unknown_function))]
    UnknownFunction { name: String },
    #[error("built-in call failed: {message}")]
    #[diagnostic(code(cv::runtime::native))]
    Native {
        message: String,
        #[label("in this call")]
        span: SourceSpan,
    },
    #[error("call depth exceeded the limit of {limit}")]
    #[diagnostic(code(cv::runtime::call_depth))]
    CallDepthExceeded {
        limit: usize,
        #[label("call")]
        span: SourceSpan,
    },
    #[error("range bounds must be integers")]
    #[diagnostic(code(cv::runtime::invalid_range))]
    InvalidRange {
        #[label("range")]
        span: SourceSpan,
    },
}

impl RuntimeError {
    pub fn division_by_zero(span: Span) -> Self {
        RuntimeError::DivisionByZero { span: span.into() }
    }

    pub fn unreachable(span: Span) -> Self {
        RuntimeError::Unreachable { span: span.into() }
    }

    pub fn overflow(ty: impl Into<String>, span: Span) -> Self {
        RuntimeError::Overflow {
            ty: ty.into(),
            span: span.into(),
        }
    }

    pub fn native(message: impl Into<String>, span: Span) -> Self {
        RuntimeError::Native {
            message: message.into(),
            span: span.into(),
        }
    }
}
