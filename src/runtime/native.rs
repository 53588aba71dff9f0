//! Hook for built-in functions and methods supplied by the embedder.

use crate::language::types::Type;
use crate::runtime::value::Value;

/// Shape of a built-in. `params: None` accepts any argument list.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeSignature {
    pub params: Option<Vec<Type>>,
    pub ret: Type,
}

impl NativeSignature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params: Some(params),
            ret,
        }
    }

    pub fn variadic(ret: Type) -> Self {
        Self { params: None, ret }
    }
}

/// The built-in tier. Method lookups receive the dereferenced receiver
/// type; both tiers are opaque to the core.
pub trait NativeLibrary {
    fn method_signature(&self, _receiver: &Type, _name: &str) -> Option<NativeSignature> {
        None
    }

    fn call_method(&self, _receiver: &Value, name: &str, _args: Vec<Value>) -> Result<Value, String> {
        Err(format!("no built-in method `{name}`"))
    }

    fn function_signature(&self, _name: &str) -> Option<NativeSignature> {
        None
    }

    fn call_function(&self, name: &str, _args: Vec<Value>) -> Result<Value, String> {
        Err(format!("no built-in function `{name}`"))
    }
}

/// Library with no built-ins at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNativeLibrary;

impl NativeLibrary for NoNativeLibrary {}
