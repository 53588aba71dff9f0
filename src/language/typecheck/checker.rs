use super::{FieldProblem, ResolveOptions, TypeError, TypeErrorKind, TypeErrors, TypedProgram};
use crate::language::{
    ast::*,
    declarations::{DeclTable, MethodId, MethodLookup},
    span::Span,
    symbols::{ScopeId, ScopeKind, SymbolId, SymbolTable},
    types::{
        Mutability, PrimitiveKind, Type, TypeAnnotation, TypeExpr, TypeVarId, FIXED_ARRAY_TYPE,
        RANGE_TYPE,
    },
};
use crate::runtime::native::NativeLibrary;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
pub(super) struct Signature {
    pub(super) params: Vec<Type>,
    pub(super) ret: Type,
    pub(super) type_params: Vec<String>,
    pub(super) self_ty: Option<Type>,
}

struct Frame {
    scope: ScopeId,
    names: HashMap<String, SymbolId>,
}

struct LoopFrame {
    /// `None` for `while`/`for`, which only accept a bare `break`.
    break_ty: Option<Type>,
    broke: bool,
}

pub(super) struct Checker<'a> {
    pub(super) decls: &'a DeclTable,
    pub(super) options: &'a ResolveOptions,
    natives: &'a dyn NativeLibrary,
    pub(super) symbols: SymbolTable,
    pub(super) types: HashMap<ExprId, Type>,
    vars: Vec<Option<Type>>,
    frames: Vec<Frame>,
    loops: Vec<LoopFrame>,
    functions: HashMap<String, Signature>,
    methods: Vec<Signature>,
    records: HashMap<String, Vec<(String, Type)>>,
    pub(super) payloads: HashMap<String, Vec<Vec<Type>>>,
    generics: Vec<String>,
    return_type: Type,
    errors: Vec<TypeError>,
    next_expr_id: ExprId,
}

impl<'a> Checker<'a> {
    pub(super) fn new(
        decls: &'a DeclTable,
        options: &'a ResolveOptions,
        natives: &'a dyn NativeLibrary,
    ) -> Self {
        Self {
            decls,
            options,
            natives,
            symbols: SymbolTable::new(),
            types: HashMap::new(),
            vars: Vec::new(),
            frames: Vec::new(),
            loops: Vec::new(),
            functions: HashMap::new(),
            methods: Vec::new(),
            records: HashMap::new(),
            payloads: HashMap::new(),
            generics: Vec::new(),
            return_type: Type::unit(),
            errors: Vec::new(),
            next_expr_id: 0,
        }
    }

    pub(super) fn run(mut self, mut program: Program) -> Result<TypedProgram, TypeErrors> {
        self.next_expr_id = program.next_expr_id;
        self.collect_signatures(&program);

        let method_ids: HashMap<(usize, usize), MethodId> = self
            .decls
            .methods()
            .iter()
            .map(|method| ((method.item, method.index), method.id))
            .collect();
        for (idx, item) in program.items.iter_mut().enumerate() {
            match item {
                Item::Function(decl) => {
                    if let Some(signature) = self.functions.get(&decl.name).cloned() {
                        self.check_function(decl, &signature);
                    }
                }
                Item::Patch(patch) => {
                    for (index, method) in patch.methods.iter_mut().enumerate() {
                        if let Some(id) = method_ids.get(&(idx, index)) {
                            let signature = self.methods[id.0 as usize].clone();
                            self.check_function(method, &signature);
                        }
                    }
                }
                Item::Record(_) | Item::Union(_) => {}
            }
        }

        let options = self.options;
        if let Some(entry) = &options.entry {
            let arity = self.functions.get(entry).map(|signature| signature.params.len());
            match (self.decls.function(entry).map(|info| info.span), arity) {
                (Some(span), Some(found)) if found > 0 => {
                    let kind = TypeErrorKind::ArityMismatch {
                        name: entry.clone(),
                        expected: 0,
                        found,
                    };
                    self.error(kind, span);
                }
                (Some(_), _) => {}
                (None, _) => self.error(TypeErrorKind::MissingEntry(entry.clone()), Span::default()),
            }
        }

        program.next_expr_id = self.next_expr_id;
        if !self.errors.is_empty() {
            tracing::debug!(errors = self.errors.len(), "type resolution failed");
            return Err(TypeErrors {
                errors: self.errors,
            });
        }

        let types: HashMap<ExprId, Type> = self
            .types
            .iter()
            .map(|(id, ty)| (*id, self.zonk(ty)))
            .collect();
        for idx in 0..self.symbols.len() {
            let id = SymbolId(idx as u32);
            let ty = self.zonk(&self.symbols.symbol(id).ty);
            self.symbols.symbol_mut(id).ty = ty;
        }
        tracing::debug!(
            symbols = self.symbols.len(),
            expressions = self.types.len(),
            "type resolution finished"
        );
        Ok(TypedProgram {
            program,
            decls: self.decls.clone(),
            symbols: self.symbols,
            types,
        })
    }

    fn collect_signatures(&mut self, program: &Program) {
        let decls = self.decls;
        for item in &program.items {
            match item {
                Item::Record(decl) => {
                    self.generics.clear();
                    let fields = decl
                        .fields
                        .iter()
                        .map(|field| {
                            let ty = self.lower_type(&field.ty.ty, field.ty.span, false);
                            (field.name.clone(), ty)
                        })
                        .collect();
                    self.records.insert(decl.name.clone(), fields);
                }
                Item::Union(decl) => {
                    self.generics = decl.type_params.clone();
                    let payloads = decl
                        .variants
                        .iter()
                        .map(|variant| {
                            variant
                                .fields
                                .iter()
                                .map(|field| self.lower_type(&field.ty, field.span, false))
                                .collect()
                        })
                        .collect();
                    self.payloads.insert(decl.name.clone(), payloads);
                }
                Item::Function(decl) => {
                    self.generics.clear();
                    let signature = self.lower_signature(decl, Vec::new(), None);
                    self.functions.insert(decl.name.clone(), signature);
                }
                Item::Patch(_) => {}
            }
        }
        for method in decls.methods() {
            self.generics = method.target.params.clone();
            let type_params = method.target.params.clone();
            let self_ty = Some(method.target.self_type());
            let signature = match decls.method_decl(program, method.id) {
                Some(decl) => self.lower_signature(decl, type_params, self_ty),
                None => Signature {
                    params: Vec::new(),
                    ret: Type::unit(),
                    type_params,
                    self_ty,
                },
            };
            self.methods.push(signature);
        }
        self.generics.clear();
    }

    fn lower_signature(
        &mut self,
        decl: &FunctionDecl,
        type_params: Vec<String>,
        self_ty: Option<Type>,
    ) -> Signature {
        let params = decl
            .params
            .iter()
            .map(|param| self.lower_type(&param.ty.ty, param.ty.span, false))
            .collect();
        let ret = decl
            .return_type
            .as_ref()
            .map(|ann| self.lower_type(&ann.ty, ann.span, false))
            .unwrap_or_else(Type::unit);
        Signature {
            params,
            ret,
            type_params,
            self_ty,
        }
    }

    /// Lowers a written type. With `infer`, a bare generic union gets fresh
    /// inference variables for its arguments.
    pub(super) fn lower_type(&mut self, expr: &TypeExpr, span: Span, infer: bool) -> Type {
        match expr {
            TypeExpr::Reference { mutable, ty } => {
                Type::reference(self.lower_type(ty, span, infer), *mutable)
            }
            TypeExpr::Length(len) => {
                let kind = TypeErrorKind::TypeMismatch {
                    expected: "type".into(),
                    found: len.to_string(),
                };
                self.error(kind, span);
                Type::Never
            }
            TypeExpr::Named(name, args) => {
                if args.is_empty() {
                    if self.generics.iter().any(|param| param == name) {
                        return Type::Param(name.clone());
                    }
                    if let Some(kind) = PrimitiveKind::from_name(name) {
                        return Type::Primitive(kind);
                    }
                }
                let Some(arity) = self.decls.type_arity(name) else {
                    self.error(TypeErrorKind::UnknownType(name.clone()), span);
                    return Type::Never;
                };
                let mut lowered: Vec<Type> = args
                    .iter()
                    .enumerate()
                    .map(|(idx, arg)| match arg {
                        TypeExpr::Length(len) if name == FIXED_ARRAY_TYPE && idx == 1 => {
                            Type::Length(*len)
                        }
                        arg => self.lower_type(arg, span, infer),
                    })
                    .collect();
                if lowered.is_empty() && arity > 0 && infer {
                    lowered = (0..arity).map(|_| self.fresh_var()).collect();
                }
                if lowered.len() != arity {
                    let kind = TypeErrorKind::ArityMismatch {
                        name: name.clone(),
                        expected: arity,
                        found: lowered.len(),
                    };
                    self.error(kind, span);
                    return Type::Never;
                }
                if name == FIXED_ARRAY_TYPE {
                    if let Some(len) = lowered
                        .get(1)
                        .filter(|len| !matches!(len, Type::Length(_) | Type::Var(_) | Type::Never))
                    {
                        let kind = TypeErrorKind::TypeMismatch {
                            expected: "array length".into(),
                            found: len.to_string(),
                        };
                        self.error(kind, span);
                        return Type::Never;
                    }
                }
                Type::named(name.clone(), lowered)
            }
        }
    }

    fn check_function(&mut self, decl: &mut FunctionDecl, signature: &Signature) {
        tracing::trace!(function = %decl.name, "resolving function body");
        self.generics = signature.type_params.clone();
        self.return_type = signature.ret.clone();
        self.frames.clear();
        self.loops.clear();

        let scope = self.push_scope(ScopeKind::Function);
        decl.body.scope = Some(scope);
        if let Some(self_ty) = &signature.self_ty {
            self.declare("self", self_ty.clone(), Mutability::Immutable, decl.span);
        }
        for (param, ty) in decl.params.iter_mut().zip(&signature.params) {
            param.symbol = Some(self.declare(&param.name, ty.clone(), param.mutability, param.span));
        }
        let ret = signature.ret.clone();
        let body_ty = self.check_statements(&mut decl.body, Some(&ret), !ret.is_unit());
        let span = decl.body.tail().map(|tail| tail.span).unwrap_or(decl.body.span);
        self.coerce(&ret, &body_ty, span);
        self.pop_scope();
        self.generics.clear();
    }

    pub(super) fn check_block(
        &mut self,
        block: &mut Block,
        expected: Option<&Type>,
        used: bool,
    ) -> Type {
        let scope = self.push_scope(ScopeKind::Block);
        block.scope = Some(scope);
        let ty = self.check_statements(block, expected, used);
        self.pop_scope();
        ty
    }

    /// Statements of a block in the innermost scope.
    fn check_statements(&mut self, block: &mut Block, expected: Option<&Type>, used: bool) -> Type {
        let mut diverges = false;
        let mut tail = None;
        for statement in block.statements.iter_mut() {
            self.rewrite_declaration(statement);
            let form = statement.form;
            match &mut statement.kind {
                StmtKind::Let(decl) => self.check_let(decl),
                StmtKind::Expr(expr) if form == StatementForm::ExpressionTail => {
                    tail = Some(self.check_expr_used(expr, expected, used));
                }
                StmtKind::Expr(expr) => {
                    let ty = self.check_expr_used(expr, None, false);
                    if matches!(self.shallow(&ty), Type::Never) {
                        diverges = true;
                    }
                }
            }
        }
        match tail {
            Some(ty) => ty,
            None if diverges => Type::Never,
            None => Type::unit(),
        }
    }

    /// Turns `name = e` into a declaration when `name` is not visible or
    /// names an immutable binding of an enclosing scope.
    fn rewrite_declaration(&mut self, statement: &mut Statement) {
        let StmtKind::Expr(Expr {
            kind:
                ExprKind::Assign {
                    op: AssignOp::Assign,
                    target,
                    ..
                },
            ..
        }) = &statement.kind
        else {
            return;
        };
        let ExprKind::Identifier(ident) = &target.kind else {
            return;
        };
        let declares = match self.lookup(&ident.name) {
            None => true,
            Some((symbol, in_current_scope)) => {
                !in_current_scope && !self.symbols.symbol(symbol).mutability.is_mutable()
            }
        };
        if !declares {
            return;
        }
        let span = statement.span;
        let placeholder = StmtKind::Expr(placeholder_expr(span));
        let StmtKind::Expr(expr) = std::mem::replace(&mut statement.kind, placeholder) else {
            return;
        };
        let ExprKind::Assign { target, value, .. } = expr.kind else {
            return;
        };
        let ExprKind::Identifier(ident) = target.kind else {
            return;
        };
        tracing::trace!(name = %ident.name, "bare assignment declares a binding");
        statement.kind = StmtKind::Let(LetStmt {
            name: ident.name,
            ty: None,
            mutability: Mutability::Immutable,
            value: *value,
            span,
            symbol: None,
        });
        statement.form = StatementForm::Statement;
    }

    fn check_let(&mut self, decl: &mut LetStmt) {
        let declared = decl
            .ty
            .as_ref()
            .map(|ann| self.lower_type(&ann.ty, ann.span, true));
        let value_ty = match &declared {
            Some(ty) => self.check_against(&mut decl.value, ty),
            None => self.check_expr(&mut decl.value, None),
        };
        let ty = declared.unwrap_or(value_ty);
        decl.symbol = Some(self.declare(&decl.name, ty, decl.mutability, decl.span));
    }

    pub(super) fn check_expr(&mut self, expr: &mut Expr, expected: Option<&Type>) -> Type {
        self.check_expr_used(expr, expected, true)
    }

    pub(super) fn check_against(&mut self, expr: &mut Expr, expected: &Type) -> Type {
        let ty = self.check_expr(expr, Some(expected));
        self.coerce(expected, &ty, expr.span);
        ty
    }

    /// `used` is false where the value is discarded; it decides whether a
    /// `when` must be exhaustive.
    pub(super) fn check_expr_used(
        &mut self,
        expr: &mut Expr,
        expected: Option<&Type>,
        used: bool,
    ) -> Type {
        let ty = self.infer(expr, expected, used);
        self.types.insert(expr.id, ty.clone());
        ty
    }

    fn infer(&mut self, expr: &mut Expr, expected: Option<&Type>, used: bool) -> Type {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Literal(literal) => self.literal_type(literal, expected),
            ExprKind::Identifier(ident) => {
                if let Some((symbol, _)) = self.lookup(&ident.name) {
                    ident.symbol = Some(symbol);
                    return self.symbols.symbol(symbol).ty.clone();
                }
                if !self.decls.variants_named(&ident.name).is_empty() {
                    let variant = ident.name.clone();
                    expr.kind = ExprKind::VariantLiteral {
                        qualifier: None,
                        variant,
                        args: Vec::new(),
                        resolved: None,
                    };
                    return self.infer(expr, expected, used);
                }
                let name = ident.name.clone();
                self.error(TypeErrorKind::UnknownIdentifier(name), span);
                Type::Never
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                self.infer_unary(op, operand, expected)
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                self.infer_binary(op, left, right, expected)
            }
            ExprKind::Call { callee, args, target } => {
                let name = match &callee.kind {
                    ExprKind::Identifier(ident) => ident.name.clone(),
                    _ => {
                        self.error(TypeErrorKind::NotCallable("expression".into()), callee.span);
                        self.check_loose(args);
                        return Type::Never;
                    }
                };
                if self.lookup(&name).is_some() {
                    self.error(TypeErrorKind::NotCallable(name), callee.span);
                    self.check_loose(args);
                    return Type::Never;
                }
                if let Some(signature) = self.functions.get(&name).cloned() {
                    self.types.insert(
                        callee.id,
                        Type::Function {
                            params: signature.params.clone(),
                            ret: Box::new(signature.ret.clone()),
                        },
                    );
                    self.check_args(&name, args, &signature.params, span);
                    *target = Some(CallTarget::Function(name));
                    return signature.ret;
                }
                if !self.decls.variants_named(&name).is_empty() {
                    let args = std::mem::take(args);
                    expr.kind = ExprKind::VariantLiteral {
                        qualifier: None,
                        variant: name,
                        args,
                        resolved: None,
                    };
                    return self.infer(expr, expected, used);
                }
                if let Some(signature) = self.natives.function_signature(&name) {
                    match &signature.params {
                        Some(params) => self.check_args(&name, args, params, span),
                        None => self.check_loose(args),
                    }
                    *target = Some(CallTarget::Native(name));
                    return signature.ret;
                }
                self.error(TypeErrorKind::UnknownIdentifier(name), callee.span);
                self.check_loose(args);
                Type::Never
            }
            ExprKind::FieldAccess { base, field } => {
                let base_ty = self.check_expr(base, None);
                let base_ty = self.auto_deref(base, base_ty);
                match self.shallow(&base_ty) {
                    Type::Never => Type::Never,
                    Type::Named { name, .. } if self.records.contains_key(&name) => {
                        let found = self.records[&name]
                            .iter()
                            .find(|(candidate, _)| *candidate == *field)
                            .map(|(_, ty)| ty.clone());
                        match found {
                            Some(ty) => ty,
                            None => {
                                let kind = TypeErrorKind::FieldMismatch {
                                    record: name,
                                    field: field.clone(),
                                    problem: FieldProblem::Unknown,
                                };
                                self.error(kind, span);
                                Type::Never
                            }
                        }
                    }
                    other => {
                        let kind = TypeErrorKind::FieldMismatch {
                            record: self.zonk(&other).to_string(),
                            field: field.clone(),
                            problem: FieldProblem::Unknown,
                        };
                        self.error(kind, span);
                        Type::Never
                    }
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                target,
            } => {
                let receiver_ty = self.check_expr(receiver, None);
                let receiver_ty = self.auto_deref(receiver, receiver_ty);
                let receiver_ty = self.zonk(&receiver_ty);
                if matches!(receiver_ty, Type::Never) {
                    self.check_loose(args);
                    return Type::Never;
                }
                let (ty, resolved) = self.resolve_method(&receiver_ty, method, args, span);
                *target = resolved;
                ty
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.check_expr(base, None);
                let base_ty = self.auto_deref(base, base_ty);
                let index_ty = self.check_expr(index, None);
                self.require_integer(&index_ty, index.span);
                let base_ty = self.shallow(&base_ty);
                if let Some(element) = base_ty.element() {
                    return element.clone();
                }
                match base_ty {
                    Type::Primitive(PrimitiveKind::String) => Type::Primitive(PrimitiveKind::Char),
                    Type::Never => Type::Never,
                    other => {
                        let name = self.zonk(&other).to_string();
                        self.error(TypeErrorKind::NotIndexable(name), base.span);
                        Type::Never
                    }
                }
            }
            ExprKind::Reference { mutable, operand } => {
                if !operand.is_place() {
                    self.error(TypeErrorKind::InvalidBorrowTarget, operand.span);
                    self.check_expr(operand, None);
                    return Type::Never;
                }
                let hint = expected.and_then(|ty| match self.shallow(ty) {
                    Type::Reference { inner, .. } => Some(*inner),
                    _ => None,
                });
                let ty = self.check_expr(operand, hint.as_ref());
                Type::reference(ty, *mutable)
            }
            ExprKind::Deref { operand, .. } => {
                let ty = self.check_expr(operand, None);
                match self.shallow(&ty) {
                    Type::Reference { inner, .. } => *inner,
                    Type::Never => Type::Never,
                    other => {
                        let name = self.zonk(&other).to_string();
                        self.error(TypeErrorKind::NotDereferenceable(name), operand.span);
                        Type::Never
                    }
                }
            }
            ExprKind::Assign { op, target, value } => {
                let op = *op;
                if !target.is_place() {
                    self.error(TypeErrorKind::InvalidAssignTarget, target.span);
                    self.check_expr(value, None);
                    return Type::unit();
                }
                let target_ty = self.check_expr(target, None);
                let value_ty = self.check_against(value, &target_ty);
                if let Some(binary) = op.binary() {
                    self.require_arithmetic(binary, &value_ty, value.span);
                }
                Type::unit()
            }
            ExprKind::Block(block) => self.check_block(block, expected, used),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.check_against(condition, &Type::bool());
                let Some(else_branch) = else_branch else {
                    self.check_block(then_branch, None, false);
                    return Type::unit();
                };
                let then_ty = self.check_block(then_branch, expected, used);
                let hint = if matches!(self.shallow(&then_ty), Type::Never) {
                    expected.cloned()
                } else {
                    Some(then_ty.clone())
                };
                let else_ty = self.check_expr_used(else_branch, hint.as_ref(), used);
                if !used {
                    return Type::unit();
                }
                if !self.unify(&then_ty, &else_ty) {
                    self.mismatch(&then_ty, &else_ty, else_branch.span);
                }
                if matches!(self.shallow(&then_ty), Type::Never) {
                    else_ty
                } else {
                    then_ty
                }
            }
            ExprKind::When {
                scrutinee,
                arms,
                produces_value,
            } => {
                *produces_value = used;
                self.infer_when(scrutinee, arms, expected, used, span)
            }
            ExprKind::Loop { body } => {
                let break_ty = self.fresh_var();
                if let (Some(expected), true) = (expected, used) {
                    self.unify(&break_ty, expected);
                }
                self.loops.push(LoopFrame {
                    break_ty: Some(break_ty.clone()),
                    broke: false,
                });
                self.check_block(body, None, false);
                let frame = self.loops.pop();
                if frame.map(|frame| frame.broke).unwrap_or(false) {
                    break_ty
                } else {
                    Type::Never
                }
            }
            ExprKind::While { condition, body } => {
                self.check_against(condition, &Type::bool());
                self.loops.push(LoopFrame {
                    break_ty: None,
                    broke: false,
                });
                self.check_block(body, None, false);
                self.loops.pop();
                Type::unit()
            }
            ExprKind::For {
                binding,
                symbol,
                iterable,
                body,
            } => {
                let iterable_ty = self.check_expr(iterable, None);
                let iterable_ty = self.auto_deref(iterable, iterable_ty);
                let iterable_ty = self.shallow(&iterable_ty);
                let element = match iterable_ty.element().cloned() {
                    Some(element) => element,
                    None => match iterable_ty {
                        Type::Named { name, mut args } if name == RANGE_TYPE && args.len() == 1 => {
                            args.remove(0)
                        }
                        Type::Never => Type::Never,
                        other => {
                            let name = self.zonk(&other).to_string();
                            self.error(TypeErrorKind::NotIndexable(name), iterable.span);
                            Type::Never
                        }
                    },
                };
                self.push_scope(ScopeKind::Loop);
                *symbol = Some(self.declare(binding, element, Mutability::Immutable, span));
                self.loops.push(LoopFrame {
                    break_ty: None,
                    broke: false,
                });
                self.check_block(body, None, false);
                self.loops.pop();
                self.pop_scope();
                Type::unit()
            }
            ExprKind::Break(value) => {
                let Some(frame) = self.loops.last_mut() else {
                    self.error(TypeErrorKind::BreakOutsideLoop, span);
                    if let Some(value) = value {
                        self.check_expr(value, None);
                    }
                    return Type::Never;
                };
                frame.broke = true;
                let break_ty = frame.break_ty.clone();
                match (break_ty, value) {
                    (Some(ty), Some(value)) => {
                        self.check_against(value, &ty);
                    }
                    (Some(ty), None) => self.coerce(&ty, &Type::unit(), span),
                    (None, Some(value)) => {
                        let ty = self.check_expr(value, None);
                        self.coerce(&Type::unit(), &ty, value.span);
                    }
                    (None, None) => {}
                }
                Type::Never
            }
            ExprKind::Return(value) => {
                let ret = self.return_type.clone();
                match value {
                    Some(value) => {
                        self.check_against(value, &ret);
                    }
                    None => self.coerce(&ret, &Type::unit(), span),
                }
                Type::Never
            }
            ExprKind::Range { start, end, .. } => {
                let hint = expected.and_then(|ty| match self.shallow(ty) {
                    Type::Named { name, mut args } if name == RANGE_TYPE && args.len() == 1 => {
                        Some(args.remove(0))
                    }
                    _ => None,
                });
                let start_ty = self.check_expr(start, hint.as_ref());
                self.check_against(end, &start_ty);
                self.require_integer(&start_ty, start.span);
                Type::range(start_ty)
            }
            ExprKind::RecordLiteral { ty, fields } => {
                let TypeExpr::Named(name, type_args) = &ty.ty else {
                    self.error(TypeErrorKind::UnknownType(ty.ty.canonical_name()), ty.span);
                    return Type::Never;
                };
                let Some(declared) = self.records.get(name).cloned() else {
                    self.error(TypeErrorKind::UnknownType(name.clone()), ty.span);
                    for init in fields.iter_mut() {
                        self.check_expr(&mut init.value, None);
                    }
                    return Type::Never;
                };
                if !type_args.is_empty() {
                    let kind = TypeErrorKind::ArityMismatch {
                        name: name.clone(),
                        expected: 0,
                        found: type_args.len(),
                    };
                    self.error(kind, ty.span);
                }
                let mut seen = HashSet::new();
                for init in fields.iter_mut() {
                    match declared.iter().find(|(field, _)| *field == init.name) {
                        Some((_, field_ty)) => {
                            if !seen.insert(init.name.clone()) {
                                let kind = TypeErrorKind::FieldMismatch {
                                    record: name.clone(),
                                    field: init.name.clone(),
                                    problem: FieldProblem::Duplicate,
                                };
                                self.error(kind, init.span);
                            }
                            self.check_against(&mut init.value, field_ty);
                        }
                        None => {
                            let kind = TypeErrorKind::FieldMismatch {
                                record: name.clone(),
                                field: init.name.clone(),
                                problem: FieldProblem::Unknown,
                            };
                            self.error(kind, init.span);
                            self.check_expr(&mut init.value, None);
                        }
                    }
                }
                for (field, _) in &declared {
                    if !seen.contains(field) {
                        let kind = TypeErrorKind::FieldMismatch {
                            record: name.clone(),
                            field: field.clone(),
                            problem: FieldProblem::Missing,
                        };
                        self.error(kind, span);
                    }
                }
                Type::named(name.clone(), Vec::new())
            }
            ExprKind::VariantLiteral {
                qualifier,
                variant,
                args,
                resolved,
            } => self.infer_variant(qualifier.as_ref(), variant, args, resolved, expected, span),
            ExprKind::ArrayLiteral(elements) => {
                let expected = expected.map(|ty| self.shallow(ty));
                let fixed = matches!(
                    &expected,
                    Some(Type::Named { name, args }) if name == FIXED_ARRAY_TYPE && args.len() == 2
                );
                let mut element_ty = expected.as_ref().and_then(Type::element).cloned();
                for element in elements.iter_mut() {
                    element_ty = Some(match &element_ty {
                        Some(ty) => {
                            let ty = ty.clone();
                            self.check_against(element, &ty);
                            ty
                        }
                        None => self.check_expr(element, None),
                    });
                }
                let element_ty = element_ty.unwrap_or_else(|| self.fresh_var());
                if !fixed {
                    return Type::array_list(element_ty);
                }
                // The literal's length has to agree with the declared one.
                let found = Type::fixed_array(element_ty, elements.len() as u64);
                match expected {
                    Some(expected) if !self.unify(&expected, &found) => {
                        self.mismatch(&expected, &found, span);
                        expected
                    }
                    _ => found,
                }
            }
        }
    }

    fn literal_type(&self, literal: &Literal, expected: Option<&Type>) -> Type {
        let expected = expected.map(|ty| self.shallow(ty)).and_then(|ty| ty.primitive());
        let kind = match literal {
            Literal::Int(_) => match expected {
                Some(kind) if kind.is_numeric() => kind,
                _ => PrimitiveKind::I32,
            },
            Literal::Float(_) => match expected {
                Some(kind) if kind.is_float() => kind,
                _ => PrimitiveKind::F64,
            },
            Literal::Bool(_) => PrimitiveKind::Bool,
            Literal::String(_) => PrimitiveKind::String,
            Literal::Char(_) => PrimitiveKind::Char,
        };
        Type::Primitive(kind)
    }

    fn infer_unary(&mut self, op: UnaryOp, operand: &mut Expr, expected: Option<&Type>) -> Type {
        match op {
            UnaryOp::Not => self.check_against(operand, &Type::bool()),
            UnaryOp::Neg => {
                let ty = self.check_expr(operand, expected);
                match self.shallow(&ty).primitive() {
                    Some(kind) if kind.is_numeric() => {}
                    _ if matches!(self.shallow(&ty), Type::Never) => {}
                    _ => {
                        let found = self.zonk(&ty).to_string();
                        self.error(
                            TypeErrorKind::TypeMismatch {
                                expected: "numeric type".into(),
                                found,
                            },
                            operand.span,
                        );
                    }
                }
                ty
            }
        }
    }

    fn infer_binary(
        &mut self,
        op: BinaryOp,
        left: &mut Expr,
        right: &mut Expr,
        expected: Option<&Type>,
    ) -> Type {
        if op.is_logical() {
            self.check_against(left, &Type::bool());
            self.check_against(right, &Type::bool());
            return Type::bool();
        }
        let hint = if op.is_comparison() { None } else { expected };
        // A literal operand takes its type from the other side.
        let left_ty = if is_numeric_literal(left) && !is_numeric_literal(right) {
            let right_ty = self.check_expr(right, hint);
            self.check_against(left, &right_ty)
        } else {
            let left_ty = self.check_expr(left, hint);
            self.check_against(right, &left_ty);
            left_ty
        };
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => Type::bool(),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let ordered = match self.shallow(&left_ty) {
                    Type::Primitive(kind) => kind.is_numeric() || matches!(kind, PrimitiveKind::Char | PrimitiveKind::String),
                    Type::Never | Type::Var(_) => true,
                    _ => false,
                };
                if !ordered {
                    let found = self.zonk(&left_ty).to_string();
                    self.error(
                        TypeErrorKind::TypeMismatch {
                            expected: "ordered type".into(),
                            found,
                        },
                        left.span,
                    );
                }
                Type::bool()
            }
            _ => {
                self.require_arithmetic(op, &left_ty, left.span);
                left_ty
            }
        }
    }

    fn resolve_method(
        &mut self,
        receiver: &Type,
        method: &str,
        args: &mut [Expr],
        span: Span,
    ) -> (Type, Option<MethodTarget>) {
        if let Some(signature) = self.natives.method_signature(receiver, method) {
            match &signature.params {
                Some(params) => self.check_args(method, args, params, span),
                None => self.check_loose(args),
            }
            return (signature.ret, Some(MethodTarget::Native));
        }
        match self.decls.lookup_method(receiver, method) {
            MethodLookup::Found { id, bindings } => {
                let signature = self.methods[id.0 as usize].clone();
                let mut map = bindings;
                for param in &signature.type_params {
                    if !map.contains_key(param) {
                        let var = self.fresh_var();
                        map.insert(param.clone(), var);
                    }
                }
                if let Some(self_ty) = &signature.self_ty {
                    let instantiated = self_ty.substitute(&map);
                    self.unify(&instantiated, receiver);
                }
                let params: Vec<Type> = signature
                    .params
                    .iter()
                    .map(|param| param.substitute(&map))
                    .collect();
                self.check_args(method, args, &params, span);
                (signature.ret.substitute(&map), Some(MethodTarget::Patch(id)))
            }
            MethodLookup::Ambiguous(candidates) => {
                let kind = TypeErrorKind::AmbiguousMethod {
                    ty: receiver.to_string(),
                    method: method.to_string(),
                    candidates: candidates.len(),
                };
                self.error(kind, span);
                self.check_loose(args);
                (Type::Never, None)
            }
            MethodLookup::NotFound => {
                let kind = TypeErrorKind::UnknownMethod {
                    ty: receiver.to_string(),
                    method: method.to_string(),
                };
                self.error(kind, span);
                self.check_loose(args);
                (Type::Never, None)
            }
        }
    }

    fn infer_variant(
        &mut self,
        qualifier: Option<&TypeAnnotation>,
        variant: &str,
        args: &mut [Expr],
        resolved: &mut Option<VariantRef>,
        expected: Option<&Type>,
        span: Span,
    ) -> Type {
        let decls = self.decls;
        let (union_name, explicit_args) = match qualifier {
            Some(TypeAnnotation {
                ty: TypeExpr::Named(name, type_args),
                span: qualifier_span,
            }) if decls.union(name).is_some() => {
                let lowered = if type_args.is_empty() {
                    None
                } else {
                    Some(
                        type_args
                            .iter()
                            .map(|arg| self.lower_type(arg, *qualifier_span, true))
                            .collect::<Vec<_>>(),
                    )
                };
                (name.clone(), lowered)
            }
            Some(qualifier) => {
                let kind = TypeErrorKind::UnknownType(qualifier.ty.canonical_name());
                self.error(kind, qualifier.span);
                self.check_loose(args);
                return Type::Never;
            }
            None => {
                let expected_head = expected.and_then(|ty| match self.shallow(ty) {
                    Type::Named { name, .. } => Some(name),
                    _ => None,
                });
                match decls.variants_named(variant) {
                    [] => {
                        self.error(TypeErrorKind::UnknownVariant(variant.to_string()), span);
                        self.check_loose(args);
                        return Type::Never;
                    }
                    [(union_name, _)] => (union_name.clone(), None),
                    candidates => match candidates
                        .iter()
                        .find(|(union_name, _)| Some(union_name) == expected_head.as_ref())
                    {
                        Some((union_name, _)) => (union_name.clone(), None),
                        None => {
                            let kind = TypeErrorKind::AmbiguousVariant {
                                variant: variant.to_string(),
                                unions: candidates.iter().map(|(u, _)| u.clone()).collect(),
                            };
                            self.error(kind, span);
                            self.check_loose(args);
                            return Type::Never;
                        }
                    },
                }
            }
        };
        let Some(info) = decls.union(&union_name) else {
            return Type::Never;
        };
        let Some(index) = info.variant_index(variant) else {
            self.error(TypeErrorKind::UnknownVariant(variant.to_string()), span);
            self.check_loose(args);
            return Type::Never;
        };
        let type_args = match explicit_args {
            Some(type_args) if type_args.len() != info.type_params.len() => {
                let kind = TypeErrorKind::ArityMismatch {
                    name: union_name.clone(),
                    expected: info.type_params.len(),
                    found: type_args.len(),
                };
                self.error(kind, span);
                self.check_loose(args);
                return Type::Never;
            }
            Some(type_args) => type_args,
            None => info.type_params.iter().map(|_| self.fresh_var()).collect(),
        };
        let result = Type::named(union_name.clone(), type_args.clone());
        if let Some(expected) = expected {
            self.unify(expected, &result);
        }
        let map: HashMap<String, Type> = info
            .type_params
            .iter()
            .cloned()
            .zip(type_args)
            .collect();
        let fields: Vec<Type> = self
            .payloads
            .get(&union_name)
            .and_then(|variants| variants.get(index))
            .map(|fields| fields.iter().map(|ty| ty.substitute(&map)).collect())
            .unwrap_or_default();
        self.check_args(variant, args, &fields, span);
        *resolved = Some(VariantRef { union_name, index });
        result
    }

    /// Checks call arguments against parameter types; extra arguments are
    /// still resolved so their own errors surface.
    fn check_args(&mut self, name: &str, args: &mut [Expr], params: &[Type], span: Span) {
        if args.len() != params.len() {
            let kind = TypeErrorKind::ArityMismatch {
                name: name.to_string(),
                expected: params.len(),
                found: args.len(),
            };
            self.error(kind, span);
        }
        for (idx, arg) in args.iter_mut().enumerate() {
            match params.get(idx) {
                Some(param) => {
                    self.check_against(arg, param);
                }
                None => {
                    self.check_expr(arg, None);
                }
            }
        }
    }

    fn check_loose(&mut self, args: &mut [Expr]) {
        for arg in args.iter_mut() {
            self.check_expr(arg, None);
        }
    }

    /// Wraps `base` in implicit derefs until its type is not a reference.
    pub(super) fn auto_deref(&mut self, base: &mut Expr, ty: Type) -> Type {
        let mut ty = self.shallow(&ty);
        while let Type::Reference { inner, .. } = &ty {
            let inner_ty = self.shallow(inner);
            let span = base.span;
            let operand = std::mem::replace(base, placeholder_expr(span));
            let id = self.next_expr_id;
            self.next_expr_id += 1;
            *base = Expr {
                id,
                kind: ExprKind::Deref {
                    operand: Box::new(operand),
                    implicit: true,
                },
                span,
            };
            self.types.insert(id, inner_ty.clone());
            ty = inner_ty;
        }
        ty
    }

    fn require_integer(&mut self, ty: &Type, span: Span) {
        match self.shallow(ty) {
            Type::Primitive(kind) if kind.is_integer() => {}
            Type::Never => {}
            Type::Var(_) => {
                self.unify(ty, &Type::Primitive(PrimitiveKind::I32));
            }
            other => {
                let found = self.zonk(&other).to_string();
                self.error(
                    TypeErrorKind::TypeMismatch {
                        expected: "integer".into(),
                        found,
                    },
                    span,
                );
            }
        }
    }

    fn require_arithmetic(&mut self, op: BinaryOp, ty: &Type, span: Span) {
        let valid = match self.shallow(ty) {
            Type::Primitive(PrimitiveKind::String) => op == BinaryOp::Add,
            Type::Primitive(kind) => kind.is_numeric(),
            Type::Never | Type::Var(_) => true,
            _ => false,
        };
        if !valid {
            let found = self.zonk(ty).to_string();
            self.error(
                TypeErrorKind::TypeMismatch {
                    expected: "numeric type".into(),
                    found,
                },
                span,
            );
        }
    }

    pub(super) fn fresh_var(&mut self) -> Type {
        let id = self.vars.len() as TypeVarId;
        self.vars.push(None);
        Type::Var(id)
    }

    pub(super) fn shallow(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        while let Type::Var(id) = current {
            match self.vars.get(id as usize).and_then(Option::as_ref) {
                Some(bound) => current = bound.clone(),
                None => break,
            }
        }
        current
    }

    pub(super) fn zonk(&self, ty: &Type) -> Type {
        match self.shallow(ty) {
            Type::Named { name, args } => Type::Named {
                name,
                args: args.iter().map(|arg| self.zonk(arg)).collect(),
            },
            Type::Reference { inner, mutable } => Type::Reference {
                inner: Box::new(self.zonk(&inner)),
                mutable,
            },
            Type::Function { params, ret } => Type::Function {
                params: params.iter().map(|param| self.zonk(param)).collect(),
                ret: Box::new(self.zonk(&ret)),
            },
            other => other,
        }
    }

    fn occurs(&self, var: TypeVarId, ty: &Type) -> bool {
        match self.shallow(ty) {
            Type::Var(id) => id == var,
            Type::Named { args, .. } => args.iter().any(|arg| self.occurs(var, arg)),
            Type::Reference { inner, .. } => self.occurs(var, &inner),
            Type::Function { params, ret } => {
                params.iter().any(|param| self.occurs(var, param)) || self.occurs(var, &ret)
            }
            _ => false,
        }
    }

    /// `found` may be a mutable reference where an immutable one is expected.
    pub(super) fn unify(&mut self, expected: &Type, found: &Type) -> bool {
        let expected = self.shallow(expected);
        let found = self.shallow(found);
        match (&expected, &found) {
            (Type::Never, _) | (_, Type::Never) => true,
            (Type::Var(a), Type::Var(b)) if a == b => true,
            (Type::Var(id), other) | (other, Type::Var(id)) => {
                if self.occurs(*id, other) {
                    return false;
                }
                self.vars[*id as usize] = Some(other.clone());
                true
            }
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (
                Type::Named { name: a, args: a_args },
                Type::Named { name: b, args: b_args },
            ) => {
                a == b
                    && a_args.len() == b_args.len()
                    && a_args
                        .iter()
                        .zip(b_args.iter())
                        .all(|(x, y)| self.unify(x, y))
            }
            (
                Type::Reference {
                    inner: a,
                    mutable: a_mut,
                },
                Type::Reference {
                    inner: b,
                    mutable: b_mut,
                },
            ) => (a_mut == b_mut || (!*a_mut && *b_mut)) && self.unify(a, b),
            (
                Type::Function {
                    params: a_params,
                    ret: a_ret,
                },
                Type::Function {
                    params: b_params,
                    ret: b_ret,
                },
            ) => {
                a_params.len() == b_params.len()
                    && a_params
                        .iter()
                        .zip(b_params.iter())
                        .all(|(x, y)| self.unify(x, y))
                    && self.unify(a_ret, b_ret)
            }
            (Type::Param(a), Type::Param(b)) => a == b,
            (Type::Length(a), Type::Length(b)) => a == b,
            _ => false,
        }
    }

    pub(super) fn coerce(&mut self, expected: &Type, found: &Type, span: Span) {
        if !self.unify(expected, found) {
            self.mismatch(expected, found, span);
        }
    }

    pub(super) fn mismatch(&mut self, expected: &Type, found: &Type, span: Span) {
        let kind = TypeErrorKind::TypeMismatch {
            expected: self.zonk(expected).to_string(),
            found: self.zonk(found).to_string(),
        };
        self.error(kind, span);
    }

    pub(super) fn error(&mut self, kind: TypeErrorKind, span: Span) {
        tracing::trace!(%kind, "type error");
        self.errors.push(TypeError::new(kind, span));
    }

    pub(super) fn push_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let parent = self.frames.last().map(|frame| frame.scope);
        let scope = self.symbols.new_scope(parent, kind);
        self.frames.push(Frame {
            scope,
            names: HashMap::new(),
        });
        scope
    }

    pub(super) fn pop_scope(&mut self) {
        self.frames.pop();
    }

    pub(super) fn declare(
        &mut self,
        name: &str,
        ty: Type,
        mutability: Mutability,
        span: Span,
    ) -> SymbolId {
        let Some(frame) = self.frames.last_mut() else {
            return self.symbols.declare(name, ty, mutability, ScopeId(0), span);
        };
        let id = self.symbols.declare(name, ty, mutability, frame.scope, span);
        frame.names.insert(name.to_string(), id);
        id
    }

    /// Innermost binding of `name`, and whether it lives in the current scope.
    fn lookup(&self, name: &str) -> Option<(SymbolId, bool)> {
        let top = self.frames.len().checked_sub(1)?;
        self.frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, frame)| frame.names.get(name).map(|id| (*id, idx == top)))
    }
}

fn is_numeric_literal(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Literal(Literal::Int(_)) | ExprKind::Literal(Literal::Float(_))
    )
}

/// Stand-in used while a node is moved out of the tree.
fn placeholder_expr(span: Span) -> Expr {
    Expr {
        id: ExprId::MAX,
        kind: ExprKind::Literal(Literal::Bool(false)),
        span,
    }
}
