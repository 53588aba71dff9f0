pub mod ast;
pub mod borrowck;
pub mod declarations;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod symbols;
pub mod token;
pub mod typecheck;
pub mod types;
