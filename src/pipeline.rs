//! Drives one compilation unit through every stage, stopping at the first
//! stage that fails.

use crate::{
    config::Options,
    diagnostics::{CompileError, RunError},
    language::{
        borrowck, declarations::DeclTable, lexer::tokenize, parser::parse, typecheck,
        typecheck::TypedProgram,
    },
    runtime::{ExecutionResult, Interpreter, NativeLibrary, NoNativeLibrary},
};

/// Checks a unit that calls no built-ins.
pub fn check_source(source: &str, options: &Options) -> Result<TypedProgram, CompileError> {
    check_source_with(source, options, &NoNativeLibrary)
}

#[tracing::instrument(level = "debug", skip_all, fields(bytes = source.len()))]
pub fn check_source_with(
    source: &str,
    options: &Options,
    natives: &dyn NativeLibrary,
) -> Result<TypedProgram, CompileError> {
    let tokens = tokenize(source)?;
    tracing::trace!(tokens = tokens.len(), "lexed");
    let program = parse(tokens)?;
    tracing::trace!(items = program.items.len(), "parsed");
    let decls = DeclTable::register(&program)?;
    let typed = typecheck::resolve(program, &decls, &options.resolve, natives)?;
    borrowck::check(&typed)?;
    tracing::debug!(symbols = typed.symbols.len(), "unit checked");
    Ok(typed)
}

/// Checks the unit, then evaluates its entry function.
#[tracing::instrument(level = "debug", skip_all)]
pub fn run_source(
    source: &str,
    options: &Options,
    natives: &dyn NativeLibrary,
) -> Result<ExecutionResult, RunError> {
    let typed = check_source_with(source, options, natives)?;
    let mut interpreter = Interpreter::new(&typed, natives, options.eval);
    Ok(interpreter.run(options.entry())?)
}
