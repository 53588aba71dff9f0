use crate::language::{
    ast::*,
    span::Span,
    symbols::SymbolId,
    typecheck::TypedProgram,
    types::{PrimitiveKind, Type, TypeExpr},
};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    native::NativeLibrary,
    value::{project, PathStep, RangeValue, RecordValue, ReferenceValue, UnionValue, Value},
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Remaining stack below which evaluation moves to a fresh segment.
const RED_ZONE: usize = 100 * 1024;
const STACK_PER_SEGMENT: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalOptions {
    pub max_call_depth: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    /// Value returned by the entry function.
    pub value: Value,
    /// Function and method calls performed, the entry call included.
    pub calls: usize,
}

enum FlowSignal {
    Break(Value),
    Return(Value),
}

/// Anything that unwinds evaluation: a runtime error or a control transfer.
enum Interrupt {
    Error(RuntimeError),
    Flow(FlowSignal),
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Error(error)
    }
}

type EvalResult<T> = Result<T, Interrupt>;

pub struct Interpreter<'a> {
    typed: &'a TypedProgram,
    natives: &'a dyn NativeLibrary,
    options: EvalOptions,
    env: Environment,
    depth: usize,
    calls: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(typed: &'a TypedProgram, natives: &'a dyn NativeLibrary, options: EvalOptions) -> Self {
        Self {
            typed,
            natives,
            options,
            env: Environment::new(),
            depth: 0,
            calls: 0,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn run(&mut self, entry: &str) -> RuntimeResult<ExecutionResult> {
        let typed = self.typed;
        let decl = typed
            .decls
            .function_decl(&typed.program, entry)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: entry.to_string(),
            })?;
        let value = self.call_function(decl, None, Vec::new(), decl.span)?;
        tracing::debug!(calls = self.calls, %value, "evaluation finished");
        Ok(ExecutionResult {
            value,
            calls: self.calls,
        })
    }

    fn call_function(
        &mut self,
        decl: &FunctionDecl,
        receiver: Option<Value>,
        args: Vec<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        if self.depth >= self.options.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.options.max_call_depth,
                span: span.into(),
            });
        }
        tracing::trace!(function = %decl.name, depth = self.depth, "call");
        self.depth += 1;
        self.calls += 1;
        let caller_env = std::mem::replace(&mut self.env, Environment::new());

        if let (Some(receiver), Some(symbol)) = (receiver, self.self_symbol(decl)) {
            self.env.declare(symbol, receiver);
        }
        for (param, value) in decl.params.iter().zip(args) {
            if let Some(symbol) = param.symbol {
                self.env.declare(symbol, value);
            }
        }
        let result = match self.eval_statements(&decl.body) {
            Ok(value) | Err(Interrupt::Flow(FlowSignal::Return(value))) => Ok(value),
            Err(Interrupt::Flow(FlowSignal::Break(_))) => Err(RuntimeError::unreachable(span)),
            Err(Interrupt::Error(error)) => Err(error),
        };

        self.env = caller_env;
        self.depth -= 1;
        result
    }

    /// The implicit `self` binding of a patch method.
    fn self_symbol(&self, decl: &FunctionDecl) -> Option<SymbolId> {
        let scope = decl.body.scope?;
        self.typed
            .symbols
            .symbols_in(scope)
            .find(|symbol| symbol.name == "self")
            .map(|symbol| symbol.id)
    }

    fn eval_block(&mut self, block: &Block) -> EvalResult<Value> {
        self.env.push_scope();
        let result = self.eval_statements(block);
        self.env.pop_scope();
        result
    }

    fn eval_statements(&mut self, block: &Block) -> EvalResult<Value> {
        let mut value = Value::Unit;
        for statement in &block.statements {
            match &statement.kind {
                StmtKind::Let(decl) => {
                    let initial = self.eval(&decl.value)?;
                    if let Some(symbol) = decl.symbol {
                        self.env.declare(symbol, initial);
                    }
                }
                StmtKind::Expr(expr) => {
                    let result = self.eval(expr)?;
                    if statement.is_expression_tail() {
                        value = result;
                    }
                }
            }
        }
        Ok(value)
    }

    fn primitive_of(&self, id: ExprId) -> Option<PrimitiveKind> {
        self.typed.type_of(id).and_then(Type::primitive)
    }

    /// Evaluation recurses once per nested expression and per call, so the
    /// host stack grows on demand up to `max_call_depth`.
    fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        stacker::maybe_grow(RED_ZONE, STACK_PER_SEGMENT, || self.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.eval_literal(literal, expr.id, span)?),
            ExprKind::Identifier(ident) => ident
                .symbol
                .and_then(|symbol| self.env.get(symbol))
                .ok_or_else(|| RuntimeError::unreachable(span).into()),
            ExprKind::Unary { op, operand } => {
                // `-128` fits `i8` although `128` alone does not.
                if let (UnaryOp::Neg, ExprKind::Literal(Literal::Int(value))) = (op, &operand.kind) {
                    let kind = self.primitive_of(expr.id);
                    if !kind.map_or(false, |kind| kind.is_float()) {
                        return Ok(checked_int(-i128::from(*value), kind, span)?);
                    }
                }
                let value = self.eval(operand)?;
                Ok(self.eval_unary(*op, value, expr.id, span)?)
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let left = self.eval_bool(left)?;
                    let short_circuits = (*op == BinaryOp::Or) == left;
                    if short_circuits {
                        Ok(Value::Bool(left))
                    } else {
                        Ok(Value::Bool(self.eval_bool(right)?))
                    }
                }
                _ => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    Ok(self.eval_binary(*op, left, right, self.primitive_of(expr.id), span)?)
                }
            },
            ExprKind::Call { args, target, .. } => {
                let values = self.eval_args(args)?;
                match target {
                    Some(CallTarget::Function(name)) => {
                        let typed = self.typed;
                        let decl = typed.decls.function_decl(&typed.program, name).ok_or_else(|| {
                            RuntimeError::UnknownFunction { name: name.clone() }
                        })?;
                        Ok(self.call_function(decl, None, values, span)?)
                    }
                    Some(CallTarget::Native(name)) => Ok(self
                        .natives
                        .call_function(name, values)
                        .map_err(|message| RuntimeError::native(message, span))?),
                    None => Err(RuntimeError::unreachable(span).into()),
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                target,
            } => {
                let receiver = self.eval(receiver)?;
                let values = self.eval_args(args)?;
                match target {
                    Some(MethodTarget::Patch(id)) => {
                        let typed = self.typed;
                        let decl = typed
                            .decls
                            .method_decl(&typed.program, *id)
                            .ok_or_else(|| RuntimeError::UnknownFunction {
                                name: method.clone(),
                            })?;
                        Ok(self.call_function(decl, Some(receiver), values, span)?)
                    }
                    Some(MethodTarget::Native) => Ok(self
                        .natives
                        .call_method(&receiver, method, values)
                        .map_err(|message| RuntimeError::native(message, span))?),
                    None => Err(RuntimeError::unreachable(span).into()),
                }
            }
            ExprKind::FieldAccess { .. } | ExprKind::Index { .. } | ExprKind::Deref { .. } => {
                let place = self.eval_place(expr)?;
                Ok(read_place(&place, span)?)
            }
            ExprKind::Reference { mutable, operand } => {
                let place = self.eval_place(operand)?;
                Ok(Value::Reference(ReferenceValue {
                    mutable: *mutable,
                    ..place
                }))
            }
            ExprKind::Assign { op, target, value } => {
                let value = self.eval(value)?;
                let place = self.eval_place(target)?;
                let updated = match op.binary() {
                    None => value,
                    Some(binary) => {
                        let current = read_place(&place, span)?;
                        self.eval_binary(binary, current, value, self.primitive_of(target.id), span)?
                    }
                };
                if !place.set(updated) {
                    return Err(RuntimeError::unreachable(target.span).into());
                }
                Ok(Value::Unit)
            }
            ExprKind::Block(block) => self.eval_block(block),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(condition)? {
                    self.eval_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.eval(else_branch)
                } else {
                    Ok(Value::Unit)
                }
            }
            ExprKind::When {
                scrutinee,
                arms,
                produces_value,
            } => {
                let value = self.eval(scrutinee)?;
                for arm in arms {
                    let mut bindings = Vec::new();
                    if !match_pattern(&arm.pattern, &value, &mut bindings) {
                        continue;
                    }
                    self.env.push_scope();
                    for (symbol, bound) in bindings {
                        self.env.declare(symbol, bound);
                    }
                    let result = self.eval(&arm.body);
                    self.env.pop_scope();
                    return result;
                }
                if *produces_value {
                    Err(RuntimeError::unreachable(span).into())
                } else {
                    Ok(Value::Unit)
                }
            }
            ExprKind::Loop { body } => loop {
                match self.eval_block(body) {
                    Ok(_) => {}
                    Err(Interrupt::Flow(FlowSignal::Break(value))) => return Ok(value),
                    Err(other) => return Err(other),
                }
            },
            ExprKind::While { condition, body } => {
                while self.eval_bool(condition)? {
                    match self.eval_block(body) {
                        Ok(_) => {}
                        Err(Interrupt::Flow(FlowSignal::Break(_))) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Unit)
            }
            ExprKind::For {
                symbol,
                iterable,
                body,
                ..
            } => {
                match self.eval(iterable)? {
                    Value::Range(range) => {
                        self.eval_for(*symbol, range.iter().map(Value::Int), body)
                    }
                    // Arrays iterate over the value taken when the loop starts.
                    Value::Array(items) => self.eval_for(*symbol, items.into_iter(), body),
                    _ => Err(RuntimeError::unreachable(iterable.span).into()),
                }
            }
            ExprKind::Break(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Unit,
                };
                Err(Interrupt::Flow(FlowSignal::Break(value)))
            }
            ExprKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Unit,
                };
                Err(Interrupt::Flow(FlowSignal::Return(value)))
            }
            ExprKind::Range {
                start,
                end,
                inclusive,
            } => {
                let start = self.eval(start)?;
                let end = self.eval(end)?;
                match (start.as_int(), end.as_int()) {
                    (Some(start), Some(end)) => Ok(Value::Range(RangeValue {
                        start,
                        end,
                        inclusive: *inclusive,
                    })),
                    _ => Err(RuntimeError::InvalidRange { span: span.into() }.into()),
                }
            }
            ExprKind::RecordLiteral { ty, fields } => {
                let name = match &ty.ty {
                    TypeExpr::Named(name, _) => name.clone(),
                    other => other.canonical_name(),
                };
                let mut values = BTreeMap::new();
                for init in fields {
                    let value = self.eval(&init.value)?;
                    values.insert(init.name.clone(), value);
                }
                Ok(Value::Record(RecordValue {
                    name,
                    fields: values,
                }))
            }
            ExprKind::VariantLiteral {
                variant,
                args,
                resolved,
                ..
            } => {
                let Some(resolved) = resolved else {
                    return Err(RuntimeError::unreachable(span).into());
                };
                let payload = self.eval_args(args)?;
                Ok(Value::Union(UnionValue {
                    union_name: resolved.union_name.clone(),
                    variant: variant.clone(),
                    tag: resolved.index,
                    payload,
                }))
            }
            ExprKind::ArrayLiteral(elements) => Ok(Value::Array(self.eval_args(elements)?)),
        }
    }

    fn eval_for(
        &mut self,
        symbol: Option<SymbolId>,
        items: impl Iterator<Item = Value>,
        body: &Block,
    ) -> EvalResult<Value> {
        for item in items {
            self.env.push_scope();
            if let Some(symbol) = symbol {
                self.env.declare(symbol, item);
            }
            let result = self.eval_block(body);
            self.env.pop_scope();
            match result {
                Ok(_) => {}
                Err(Interrupt::Flow(FlowSignal::Break(_))) => break,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Unit)
    }

    fn eval_args(&mut self, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_bool(&mut self, expr: &Expr) -> EvalResult<bool> {
        let value = self.eval(expr)?;
        value
            .as_bool()
            .ok_or_else(|| RuntimeError::unreachable(expr.span).into())
    }

    /// Integer literals are checked against the bounds of their static type.
    fn eval_literal(&self, literal: &Literal, id: ExprId, span: Span) -> RuntimeResult<Value> {
        let value = match literal {
            Literal::Int(value) => match self.primitive_of(id) {
                Some(kind) if kind.is_float() => Value::Float(*value as f64),
                kind => return checked_int(i128::from(*value), kind, span),
            },
            Literal::Float(value) => Value::Float(*value),
            Literal::Bool(value) => Value::Bool(*value),
            Literal::String(value) => Value::String(value.clone()),
            Literal::Char(value) => Value::Char(*value),
        };
        Ok(value)
    }

    /// Resolves a place expression to the slot it names. Non-place operands
    /// are evaluated into a fresh temporary slot.
    fn eval_place(&mut self, expr: &Expr) -> EvalResult<ReferenceValue> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Identifier(ident) => {
                let cell = ident
                    .symbol
                    .and_then(|symbol| self.env.get_cell(symbol))
                    .ok_or_else(|| RuntimeError::unreachable(span))?;
                Ok(ReferenceValue {
                    cell,
                    path: Vec::new(),
                    mutable: true,
                })
            }
            ExprKind::FieldAccess { base, field } => {
                let place = self.eval_place(base)?;
                Ok(place.child(PathStep::Field(field.clone())))
            }
            ExprKind::Index { base, index } => {
                let place = self.eval_place(base)?;
                let index_value = self.eval(index)?;
                let len = {
                    let root = place.cell.borrow();
                    match project(&root, &place.path) {
                        Some(Value::Array(items)) => items.len(),
                        Some(Value::String(text)) => text.chars().count(),
                        _ => return Err(RuntimeError::unreachable(span).into()),
                    }
                };
                let idx = checked_index(&index_value, len, index.span)?;
                Ok(place.child(PathStep::Index(idx)))
            }
            ExprKind::Deref { operand, .. } => match self.eval(operand)? {
                Value::Reference(reference) => Ok(reference),
                _ => Err(RuntimeError::unreachable(span).into()),
            },
            _ => {
                let value = self.eval(expr)?;
                Ok(ReferenceValue {
                    cell: Rc::new(RefCell::new(value)),
                    path: Vec::new(),
                    mutable: false,
                })
            }
        }
    }

    fn eval_unary(
        &self,
        op: UnaryOp,
        value: Value,
        id: ExprId,
        span: Span,
    ) -> RuntimeResult<Value> {
        match (op, value) {
            (UnaryOp::Not, Value::Bool(value)) => Ok(Value::Bool(!value)),
            (UnaryOp::Neg, Value::Int(value)) => checked_int(-value, self.primitive_of(id), span),
            (UnaryOp::Neg, Value::Float(value)) => Ok(Value::Float(-value)),
            _ => Err(RuntimeError::unreachable(span)),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        kind: Option<PrimitiveKind>,
        span: Span,
    ) -> RuntimeResult<Value> {
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(left.structural_eq(&right))),
            BinaryOp::NotEq => return Ok(Value::Bool(!left.structural_eq(&right))),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                return compare(op, &left, &right)
                    .map(Value::Bool)
                    .ok_or_else(|| RuntimeError::unreachable(span));
            }
            _ => {}
        }
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                        return Err(RuntimeError::division_by_zero(span));
                    }
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Rem => a.checked_rem(b),
                    _ => return Err(RuntimeError::unreachable(span)),
                };
                match result {
                    Some(value) => checked_int(value, kind, span),
                    None => Err(overflow(kind, span)),
                }
            }
            (Value::Float(a), Value::Float(b)) => {
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => return Err(RuntimeError::unreachable(span)),
                };
                Ok(Value::Float(result))
            }
            (Value::String(mut a), Value::String(b)) if op == BinaryOp::Add => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            _ => Err(RuntimeError::unreachable(span)),
        }
    }
}

fn read_place(place: &ReferenceValue, span: Span) -> RuntimeResult<Value> {
    let root = place.cell.borrow();
    if let Some(value) = project(&root, &place.path) {
        return Ok(value.clone());
    }
    // Indexing into a string yields a character; the path cannot name it.
    if let Some((PathStep::Index(idx), parent)) = place.path.split_last() {
        if let Some(Value::String(text)) = project(&root, parent) {
            if let Some(ch) = text.chars().nth(*idx) {
                return Ok(Value::Char(ch));
            }
        }
    }
    Err(RuntimeError::unreachable(span))
}

fn checked_index(index: &Value, len: usize, span: Span) -> RuntimeResult<usize> {
    let index = index.as_int().ok_or_else(|| RuntimeError::unreachable(span))?;
    match usize::try_from(index) {
        Ok(idx) if idx < len => Ok(idx),
        _ => Err(RuntimeError::IndexOutOfBounds {
            index,
            len,
            span: span.into(),
        }),
    }
}

fn checked_int(value: i128, kind: Option<PrimitiveKind>, span: Span) -> RuntimeResult<Value> {
    if let Some((min, max)) = kind.and_then(PrimitiveKind::integer_bounds) {
        if value < min || value > max {
            return Err(overflow(kind, span));
        }
    }
    Ok(Value::Int(value))
}

fn overflow(kind: Option<PrimitiveKind>, span: Span) -> RuntimeError {
    RuntimeError::overflow(kind.map_or("integer", PrimitiveKind::name), span)
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Option<bool> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Char(a), Value::Char(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => None,
    }?;
    match op {
        BinaryOp::Lt => Some(ordering.is_lt()),
        BinaryOp::LtEq => Some(ordering.is_le()),
        BinaryOp::Gt => Some(ordering.is_gt()),
        BinaryOp::GtEq => Some(ordering.is_ge()),
        _ => None,
    }
}

/// First-match test of one arm; bindings are collected only on success.
fn match_pattern(pattern: &Pattern, value: &Value, bindings: &mut Vec<(SymbolId, Value)>) -> bool {
    match pattern {
        Pattern::Wildcard(_) | Pattern::Else(_) => true,
        Pattern::Binding { symbol, .. } => {
            if let Some(symbol) = symbol {
                bindings.push((*symbol, value.clone()));
            }
            true
        }
        Pattern::Literal(literal, _) => match (literal, value) {
            (Literal::Int(expected), Value::Int(actual)) => i128::from(*expected) == *actual,
            (Literal::Int(expected), Value::Float(actual)) => *expected as f64 == *actual,
            (Literal::Float(expected), Value::Float(actual)) => expected == actual,
            (Literal::Bool(expected), Value::Bool(actual)) => expected == actual,
            (Literal::String(expected), Value::String(actual)) => expected == actual,
            (Literal::Char(expected), Value::Char(actual)) => expected == actual,
            _ => false,
        },
        Pattern::Variant { name, args, .. } => match value {
            Value::Union(union) if union.variant == *name && union.payload.len() == args.len() => {
                let mark = bindings.len();
                let matched = args
                    .iter()
                    .zip(&union.payload)
                    .all(|(arg, payload)| match_pattern(arg, payload, bindings));
                if !matched {
                    bindings.truncate(mark);
                }
                matched
            }
            _ => false,
        },
    }
}
