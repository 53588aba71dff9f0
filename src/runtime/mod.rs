pub mod environment;
pub mod error;
pub mod interpreter;
pub mod native;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use interpreter::{EvalOptions, ExecutionResult, Interpreter};
pub use native::{NativeLibrary, NativeSignature, NoNativeLibrary};
pub use value::Value;
