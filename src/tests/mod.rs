//! End-to-end tests driving source text through the whole pipeline.

mod pipeline;
mod properties;

use crate::{
    config::Options,
    diagnostics::RunError,
    language::types::{PrimitiveKind, Type},
    runtime::{NativeLibrary, NativeSignature, Value},
};
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Installs a subscriber when `RUST_LOG` is set, so failing tests can be rerun
/// with stage logging.
pub(crate) fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_test_writer())
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

pub(crate) const PRELUDE: &str = "
    union result<T, E> { ok(T); err(E); }
    union option<T> { some(T); none; }
    record userProfile { string name; i32 age; }
";

/// `print` plus a few string methods.
pub(crate) struct Builtins;

impl NativeLibrary for Builtins {
    fn method_signature(&self, receiver: &Type, name: &str) -> Option<NativeSignature> {
        match (receiver.primitive()?, name) {
            (PrimitiveKind::String, "toLowerCase") => {
                Some(NativeSignature::new(Vec::new(), Type::string()))
            }
            (PrimitiveKind::String, "len") => Some(NativeSignature::new(
                Vec::new(),
                Type::Primitive(PrimitiveKind::I32),
            )),
            _ => None,
        }
    }

    fn call_method(&self, receiver: &Value, name: &str, _args: Vec<Value>) -> Result<Value, String> {
        match (receiver, name) {
            (Value::String(text), "toLowerCase") => Ok(Value::String(text.to_lowercase())),
            (Value::String(text), "len") => Ok(Value::Int(text.chars().count() as i128)),
            _ => Err(format!("no built-in method `{name}`")),
        }
    }

    fn function_signature(&self, name: &str) -> Option<NativeSignature> {
        (name == "print").then(|| NativeSignature::variadic(Type::unit()))
    }

    fn call_function(&self, name: &str, _args: Vec<Value>) -> Result<Value, String> {
        match name {
            "print" => Ok(Value::Unit),
            _ => Err(format!("no built-in function `{name}`")),
        }
    }
}

pub(crate) fn with_prelude(source: &str) -> String {
    format!("{PRELUDE}\n{source}")
}

pub(crate) fn run(source: &str) -> Result<Value, RunError> {
    run_with(source, &Options::default())
}

pub(crate) fn run_with(source: &str, options: &Options) -> Result<Value, RunError> {
    init_tracing();
    crate::pipeline::run_source(&with_prelude(source), options, &Builtins).map(|result| result.value)
}
