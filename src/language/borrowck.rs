//! Lexical borrow checking over a resolved unit.
//!
//! Every binding carries a borrow flag (free, shared by `n` loans, or
//! exclusively borrowed) and the loans it holds. Loans created by call
//! arguments or discarded expressions belong to the statement and are
//! released when it ends.

use crate::language::{
    ast::*,
    span::Span,
    symbols::SymbolId,
    typecheck::TypedProgram,
    types::Type,
};
use miette::{Diagnostic, SourceSpan};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BorrowErrorKind {
    AliasConflict(String),
    UseAfterScopeExit(String),
    MutateThroughImmutableRef,
    AssignToImmutableBinding(String),
    MutableBorrowOfImmutable(String),
}

impl fmt::Display for BorrowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowErrorKind::AliasConflict(name) => write!(
                f,
                "`{name}` is already borrowed in a way that conflicts with this borrow"
            ),
            BorrowErrorKind::UseAfterScopeExit(name) => {
                write!(f, "reference to `{name}` outlives the scope of `{name}`")
            }
            BorrowErrorKind::MutateThroughImmutableRef => {
                write!(f, "cannot mutate through an immutable reference")
            }
            BorrowErrorKind::AssignToImmutableBinding(name) => {
                write!(f, "cannot assign to immutable binding `{name}`; declare it with `@{name}`")
            }
            BorrowErrorKind::MutableBorrowOfImmutable(name) => {
                write!(f, "cannot borrow immutable binding `{name}` as mutable")
            }
        }
    }
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("{kind}")]
#[diagnostic(code(cv::borrow))]
pub struct BorrowError {
    pub kind: BorrowErrorKind,
    #[label("here")]
    pub span: SourceSpan,
}

impl BorrowError {
    pub fn new(kind: BorrowErrorKind, span: Span) -> Self {
        Self {
            kind,
            span: span.into(),
        }
    }
}

#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("{} borrow error(s)", .errors.len())]
#[diagnostic(code(cv::borrow))]
pub struct BorrowErrors {
    #[related]
    pub errors: Vec<BorrowError>,
}

impl BorrowErrors {
    pub fn kinds(&self) -> impl Iterator<Item = &BorrowErrorKind> {
        self.errors.iter().map(|error| &error.kind)
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn check(typed: &TypedProgram) -> Result<(), BorrowErrors> {
    let mut checker = BorrowChecker::new(typed);
    for item in &typed.program.items {
        match item {
            Item::Function(decl) => checker.check_function(decl),
            Item::Patch(patch) => {
                for method in &patch.methods {
                    checker.check_function(method);
                }
            }
            Item::Record(_) | Item::Union(_) => {}
        }
    }
    if checker.errors.is_empty() {
        Ok(())
    } else {
        tracing::debug!(errors = checker.errors.len(), "borrow check failed");
        Err(BorrowErrors {
            errors: checker.errors,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Loan {
    id: u32,
    referent: SymbolId,
    mutable: bool,
    /// Uncounted loans only record what a copied reference depends on.
    counted: bool,
}

#[derive(Clone, Debug, Default)]
struct BindingState {
    shared: usize,
    exclusive: bool,
    loans: Vec<Loan>,
    expired: bool,
}

#[derive(Clone, Debug, Default)]
struct BorrowState {
    bindings: HashMap<SymbolId, BindingState>,
    temporaries: Vec<Vec<Loan>>,
    /// Loans carried by `break` values, one entry per enclosing loop.
    break_loans: Vec<Vec<Loan>>,
}

impl BorrowState {
    fn stored_loans(&self) -> impl Iterator<Item = &Loan> {
        self.bindings
            .values()
            .flat_map(|state| state.loans.iter())
            .chain(self.temporaries.iter().flatten())
            .chain(self.break_loans.iter().flatten())
    }
}

/// Counted loans among `loans`, each loan once.
fn counted_loans<'l>(loans: impl Iterator<Item = &'l Loan>) -> Vec<Loan> {
    let mut seen = HashSet::new();
    loans
        .filter(|loan| loan.counted && seen.insert(loan.id))
        .copied()
        .collect()
}

fn uncounted(loans: &[Loan]) -> Vec<Loan> {
    loans
        .iter()
        .map(|loan| Loan {
            counted: false,
            ..*loan
        })
        .collect()
}

fn join_loans(into: &mut Vec<Loan>, loans: Vec<Loan>) {
    for loan in loans {
        if !into.contains(&loan) {
            into.push(loan);
        }
    }
}

fn tally(loans: &[Loan], referent: SymbolId) -> (usize, bool) {
    let held = loans.iter().filter(|loan| loan.referent == referent);
    let shared = held.clone().filter(|loan| !loan.mutable).count();
    let exclusive = held.into_iter().any(|loan| loan.mutable);
    (shared, exclusive)
}

enum PlaceRoot {
    Binding(SymbolId),
    ThroughRef {
        mutable: bool,
        holder: Option<SymbolId>,
    },
    Temporary,
}

struct BorrowChecker<'a> {
    typed: &'a TypedProgram,
    state: BorrowState,
    frames: Vec<Vec<SymbolId>>,
    next_loan: u32,
    errors: Vec<BorrowError>,
}

impl<'a> BorrowChecker<'a> {
    fn new(typed: &'a TypedProgram) -> Self {
        Self {
            typed,
            state: BorrowState::default(),
            frames: Vec::new(),
            next_loan: 0,
            errors: Vec::new(),
        }
    }

    fn check_function(&mut self, decl: &FunctionDecl) {
        tracing::trace!(function = %decl.name, "borrow checking");
        self.state = BorrowState::default();
        self.frames = vec![Vec::new()];
        for param in &decl.params {
            if let Some(symbol) = param.symbol {
                self.declare(symbol);
            }
        }
        let loans = self.statements(&decl.body);
        let span = decl.body.tail().map(|tail| tail.span).unwrap_or(decl.body.span);
        self.escaping(&loans, span, true);
        self.frames.clear();
    }

    fn error(&mut self, kind: BorrowErrorKind, span: Span) {
        tracing::trace!(%kind, "borrow error");
        self.errors.push(BorrowError::new(kind, span));
    }

    fn name(&self, symbol: SymbolId) -> String {
        self.typed.symbols.symbol(symbol).name.clone()
    }

    fn declare(&mut self, symbol: SymbolId) {
        self.state.bindings.insert(symbol, BindingState::default());
        if let Some(frame) = self.frames.last_mut() {
            frame.push(symbol);
        }
    }

    /// Declares a binding that copies part of a value carrying `loans`.
    fn declare_derived(&mut self, symbol: SymbolId, loans: &[Loan]) {
        self.declare(symbol);
        if self.typed.symbols.symbol(symbol).ty.may_hold_reference() {
            self.binding_mut(symbol).loans = uncounted(loans);
        }
    }

    fn binding_mut(&mut self, symbol: SymbolId) -> &mut BindingState {
        self.state.bindings.entry(symbol).or_default()
    }

    fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Drops the innermost frame: its bindings release what they hold, and
    /// any outer holder still pointing into the frame expires.
    fn pop_frame(&mut self) {
        let Some(dying) = self.frames.pop() else {
            return;
        };
        for symbol in &dying {
            if let Some(state) = self.state.bindings.remove(symbol) {
                self.release(&state.loans);
            }
        }
        for state in self.state.bindings.values_mut() {
            let before = state.loans.len();
            state.loans.retain(|loan| !dying.contains(&loan.referent));
            if state.loans.len() != before {
                state.expired = true;
            }
        }
        for held in self
            .state
            .temporaries
            .iter_mut()
            .chain(self.state.break_loans.iter_mut())
        {
            held.retain(|loan| !dying.contains(&loan.referent));
        }
    }

    fn release(&mut self, loans: &[Loan]) {
        for loan in loans.iter().filter(|loan| loan.counted) {
            if let Some(state) = self.state.bindings.get_mut(&loan.referent) {
                if loan.mutable {
                    state.exclusive = false;
                } else {
                    state.shared = state.shared.saturating_sub(1);
                }
            }
        }
    }

    fn begin_statement(&mut self) {
        self.state.temporaries.push(Vec::new());
    }

    fn end_statement(&mut self) {
        if let Some(loans) = self.state.temporaries.pop() {
            self.release(&loans);
        }
    }

    fn hold_temporarily(&mut self, loans: Vec<Loan>) {
        match self.state.temporaries.last_mut() {
            Some(temporaries) => temporaries.extend(loans),
            None => self.release(&loans),
        }
    }

    /// What a copy of `symbol`'s value depends on.
    fn dependencies(&self, symbol: SymbolId) -> Vec<Loan> {
        self.state
            .bindings
            .get(&symbol)
            .map(|state| uncounted(&state.loans))
            .unwrap_or_default()
    }

    fn use_binding(&mut self, symbol: SymbolId, span: Span) {
        let expired = self
            .state
            .bindings
            .get(&symbol)
            .map_or(false, |state| state.expired);
        if expired {
            let name = self.name(symbol);
            self.error(BorrowErrorKind::UseAfterScopeExit(name), span);
        }
    }

    /// Reports loans that point into the frames about to be left. With
    /// `whole_function`, every open frame counts.
    fn escaping(&mut self, loans: &[Loan], span: Span, whole_function: bool) {
        let frames: &[Vec<SymbolId>] = if whole_function {
            &self.frames
        } else {
            self.frames.last().map(std::slice::from_ref).unwrap_or(&[])
        };
        let escaped: Vec<SymbolId> = loans
            .iter()
            .map(|loan| loan.referent)
            .filter(|referent| frames.iter().any(|frame| frame.contains(referent)))
            .collect();
        for referent in escaped {
            let name = self.name(referent);
            self.error(BorrowErrorKind::UseAfterScopeExit(name), span);
        }
    }

    fn snapshot_borrows(&self) -> BorrowState {
        self.state.clone()
    }

    fn run_branch<T, F>(&mut self, branch: F) -> (T, BorrowState)
    where
        F: FnOnce(&mut Self) -> T,
    {
        let snapshot = self.snapshot_borrows();
        let result = branch(self);
        let branch_state = std::mem::replace(&mut self.state, snapshot);
        (result, branch_state)
    }

    /// Joins branch states: a loan live in any branch stays live. Must run
    /// with the entry state in place; `carried` are the loans the branches
    /// hand to the enclosing expression.
    ///
    /// Borrow flags are recounted from the joined loans, so a referent held
    /// by different bindings in different branches counts every holder.
    fn merge_branch_borrows(&mut self, states: Vec<BorrowState>, carried: &[Loan]) {
        let stored_at_entry = counted_loans(self.state.stored_loans());
        // Loans still being built into an argument list live outside the state.
        let pending: HashMap<SymbolId, (usize, bool)> = self
            .state
            .bindings
            .iter()
            .map(|(symbol, state)| {
                let (shared, exclusive) = tally(&stored_at_entry, *symbol);
                let pending = (
                    state.shared.saturating_sub(shared),
                    state.exclusive && !exclusive,
                );
                (*symbol, pending)
            })
            .collect();

        let mut states = states.into_iter();
        let Some(mut merged) = states.next() else {
            return;
        };
        for state in states {
            for (symbol, other) in state.bindings {
                let Some(current) = merged.bindings.get_mut(&symbol) else {
                    continue;
                };
                current.expired |= other.expired;
                join_loans(&mut current.loans, other.loans);
            }
            for (idx, temporaries) in state.temporaries.into_iter().enumerate() {
                if let Some(current) = merged.temporaries.get_mut(idx) {
                    join_loans(current, temporaries);
                }
            }
            for (idx, breaks) in state.break_loans.into_iter().enumerate() {
                if let Some(current) = merged.break_loans.get_mut(idx) {
                    join_loans(current, breaks);
                }
            }
        }

        let live = counted_loans(merged.stored_loans().chain(carried));
        for (symbol, state) in merged.bindings.iter_mut() {
            let (pending_shared, pending_exclusive) =
                pending.get(symbol).copied().unwrap_or_default();
            let (shared, exclusive) = tally(&live, *symbol);
            state.shared = pending_shared + shared;
            state.exclusive = pending_exclusive || exclusive;
        }
        self.state = merged;
    }

    fn block(&mut self, block: &Block) -> Vec<Loan> {
        self.push_frame();
        let loans = self.statements(block);
        let span = block.tail().map(|tail| tail.span).unwrap_or(block.span);
        self.escaping(&loans, span, false);
        let dying = self.frames.last().cloned().unwrap_or_default();
        self.pop_frame();
        loans
            .into_iter()
            .filter(|loan| !dying.contains(&loan.referent))
            .collect()
    }

    /// Statements in the current frame; returns what the tail carries.
    fn statements(&mut self, block: &Block) -> Vec<Loan> {
        let mut tail = Vec::new();
        for statement in &block.statements {
            self.begin_statement();
            match &statement.kind {
                StmtKind::Let(decl) => {
                    let loans = self.expr(&decl.value);
                    if let Some(symbol) = decl.symbol {
                        self.declare(symbol);
                        self.binding_mut(symbol).loans = loans;
                    }
                }
                StmtKind::Expr(expr) if statement.is_expression_tail() => {
                    tail = self.expr(expr);
                }
                StmtKind::Expr(expr) => {
                    let loans = self.expr(expr);
                    self.hold_temporarily(loans);
                }
            }
            self.end_statement();
        }
        tail
    }

    fn carries_reference(&self, expr: &Expr) -> bool {
        self.typed
            .type_of(expr.id)
            .map_or(false, Type::may_hold_reference)
    }

    fn expr(&mut self, expr: &Expr) -> Vec<Loan> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(_) => Vec::new(),
            ExprKind::Identifier(ident) => match ident.symbol {
                Some(symbol) => {
                    self.use_binding(symbol, span);
                    self.dependencies(symbol)
                }
                None => Vec::new(),
            },
            ExprKind::Unary { operand, .. } => {
                let loans = self.expr(operand);
                self.hold_temporarily(loans);
                Vec::new()
            }
            ExprKind::Binary { left, right, .. } => {
                let loans = self.expr(left);
                self.hold_temporarily(loans);
                let loans = self.expr(right);
                self.hold_temporarily(loans);
                Vec::new()
            }
            ExprKind::Call { args, .. } => {
                let loans = self.args(None, args);
                self.call_result(expr, loans)
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                let loans = self.args(Some(receiver), args);
                self.call_result(expr, loans)
            }
            ExprKind::FieldAccess { base, .. } => self.expr(base),
            ExprKind::Index { base, index } => {
                let loans = self.expr(index);
                self.hold_temporarily(loans);
                self.expr(base)
            }
            ExprKind::Reference { mutable, operand } => self.borrow(operand, *mutable, span),
            ExprKind::Deref { operand, .. } => {
                let loans = self.expr(operand);
                if self.carries_reference(expr) {
                    loans
                } else {
                    Vec::new()
                }
            }
            ExprKind::Assign { op, target, value } => {
                self.assign(*op, target, value);
                Vec::new()
            }
            ExprKind::Block(block) => self.block(block),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let loans = self.expr(condition);
                self.hold_temporarily(loans);
                let (mut loans, then_state) = self.run_branch(|checker| checker.block(then_branch));
                match else_branch {
                    Some(else_branch) => {
                        let (else_loans, else_state) =
                            self.run_branch(|checker| checker.expr(else_branch));
                        loans.extend(else_loans);
                        self.merge_branch_borrows(vec![then_state, else_state], &loans);
                        loans
                    }
                    None => {
                        let inactive = self.snapshot_borrows();
                        self.merge_branch_borrows(vec![then_state, inactive], &[]);
                        Vec::new()
                    }
                }
            }
            ExprKind::When {
                scrutinee, arms, ..
            } => {
                let scrutinee_loans = self.expr(scrutinee);
                let scrutinee_deps = uncounted(&scrutinee_loans);
                self.hold_temporarily(scrutinee_loans);
                let mut states = Vec::new();
                let mut loans = Vec::new();
                for arm in arms {
                    let (arm_loans, state) = self.run_branch(|checker| {
                        checker.push_frame();
                        checker.bind_pattern(&arm.pattern, &scrutinee_deps);
                        let loans = checker.expr(&arm.body);
                        checker.escaping(&loans, arm.body.span, false);
                        checker.pop_frame();
                        loans
                    });
                    loans.extend(arm_loans);
                    states.push(state);
                }
                self.merge_branch_borrows(states, &loans);
                loans
            }
            ExprKind::Loop { body } => {
                self.state.break_loans.push(Vec::new());
                self.loop_body(body);
                self.state.break_loans.pop().unwrap_or_default()
            }
            ExprKind::While { condition, body } => {
                let loans = self.expr(condition);
                self.hold_temporarily(loans);
                self.state.break_loans.push(Vec::new());
                self.loop_body(body);
                self.state.break_loans.pop();
                Vec::new()
            }
            ExprKind::For {
                symbol,
                iterable,
                body,
                ..
            } => {
                let iterable_loans = self.expr(iterable);
                let element_deps = uncounted(&iterable_loans);
                self.hold_temporarily(iterable_loans);
                self.state.break_loans.push(Vec::new());
                let entry = self.snapshot_borrows();
                let (_, body_state) = self.run_branch(|checker| {
                    checker.push_frame();
                    if let Some(symbol) = symbol {
                        checker.declare_derived(*symbol, &element_deps);
                    }
                    checker.block(body);
                    checker.pop_frame();
                });
                self.merge_branch_borrows(vec![entry, body_state], &[]);
                self.state.break_loans.pop();
                Vec::new()
            }
            ExprKind::Break(value) => {
                if let Some(value) = value {
                    let loans = self.expr(value);
                    match self.state.break_loans.last_mut() {
                        Some(collected) => collected.extend(loans),
                        None => self.hold_temporarily(loans),
                    }
                }
                Vec::new()
            }
            ExprKind::Return(value) => {
                if let Some(value) = value {
                    let loans = self.expr(value);
                    self.escaping(&loans, value.span, true);
                }
                Vec::new()
            }
            ExprKind::Range { start, end, .. } => {
                let loans = self.expr(start);
                self.hold_temporarily(loans);
                let loans = self.expr(end);
                self.hold_temporarily(loans);
                Vec::new()
            }
            ExprKind::RecordLiteral { fields, .. } => fields
                .iter()
                .flat_map(|init| self.expr(&init.value))
                .collect(),
            ExprKind::VariantLiteral { args, .. } => {
                args.iter().flat_map(|arg| self.expr(arg)).collect()
            }
            ExprKind::ArrayLiteral(elements) => {
                elements.iter().flat_map(|element| self.expr(element)).collect()
            }
        }
    }

    fn loop_body(&mut self, body: &Block) {
        let entry = self.snapshot_borrows();
        let (_, body_state) = self.run_branch(|checker| checker.block(body));
        self.merge_branch_borrows(vec![entry, body_state], &[]);
    }

    fn args(&mut self, receiver: Option<&Expr>, args: &[Expr]) -> Vec<Loan> {
        let mut loans = Vec::new();
        if let Some(receiver) = receiver {
            loans.extend(self.expr(receiver));
        }
        for arg in args {
            loans.extend(self.expr(arg));
        }
        loans
    }

    /// Argument loans flow into a result that may hold a reference and are
    /// statement temporaries otherwise.
    fn call_result(&mut self, call: &Expr, loans: Vec<Loan>) -> Vec<Loan> {
        if self.carries_reference(call) {
            loans
        } else {
            self.hold_temporarily(loans);
            Vec::new()
        }
    }

    /// Pattern bindings copy parts of the scrutinee and depend on its loans.
    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee: &[Loan]) {
        match pattern {
            Pattern::Binding {
                symbol: Some(symbol),
                ..
            } => self.declare_derived(*symbol, scrutinee),
            Pattern::Variant { args, .. } => {
                for arg in args {
                    self.bind_pattern(arg, scrutinee);
                }
            }
            _ => {}
        }
    }

    fn place_root(&self, expr: &Expr) -> PlaceRoot {
        match &expr.kind {
            ExprKind::Identifier(ident) => {
                ident.symbol.map_or(PlaceRoot::Temporary, PlaceRoot::Binding)
            }
            ExprKind::FieldAccess { base, .. } | ExprKind::Index { base, .. } => {
                self.place_root(base)
            }
            ExprKind::Deref { operand, .. } => {
                let mutable = matches!(
                    self.typed.type_of(operand.id),
                    Some(Type::Reference { mutable: true, .. })
                );
                match self.place_root(operand) {
                    inner @ PlaceRoot::ThroughRef { mutable: false, .. } => inner,
                    PlaceRoot::Binding(holder) => PlaceRoot::ThroughRef {
                        mutable,
                        holder: Some(holder),
                    },
                    PlaceRoot::ThroughRef { holder, .. } => PlaceRoot::ThroughRef { mutable, holder },
                    PlaceRoot::Temporary => PlaceRoot::ThroughRef {
                        mutable,
                        holder: None,
                    },
                }
            }
            _ => PlaceRoot::Temporary,
        }
    }

    /// Visits the reads a place performs; the root binding is only read when
    /// the place goes through it rather than overwriting it.
    fn place_uses(&mut self, place: &Expr, overwrites_root: bool) {
        match &place.kind {
            ExprKind::Identifier(ident) => {
                if let (Some(symbol), false) = (ident.symbol, overwrites_root) {
                    self.use_binding(symbol, place.span);
                }
            }
            ExprKind::FieldAccess { base, .. } => self.place_uses(base, false),
            ExprKind::Index { base, index } => {
                let loans = self.expr(index);
                self.hold_temporarily(loans);
                self.place_uses(base, false);
            }
            ExprKind::Deref { operand, .. } => {
                let loans = self.expr(operand);
                self.hold_temporarily(loans);
            }
            _ => {
                let loans = self.expr(place);
                self.hold_temporarily(loans);
            }
        }
    }

    fn borrow(&mut self, place: &Expr, mutable: bool, span: Span) -> Vec<Loan> {
        self.place_uses(place, false);
        match self.place_root(place) {
            PlaceRoot::Binding(symbol) => {
                let name = self.name(symbol);
                if mutable && !self.typed.symbols.symbol(symbol).mutability.is_mutable() {
                    self.error(BorrowErrorKind::MutableBorrowOfImmutable(name), span);
                    return Vec::new();
                }
                let state = self.binding_mut(symbol);
                let conflict = if mutable {
                    state.exclusive || state.shared > 0
                } else {
                    state.exclusive
                };
                if conflict {
                    self.error(BorrowErrorKind::AliasConflict(name), span);
                    return Vec::new();
                }
                if mutable {
                    state.exclusive = true;
                } else {
                    state.shared += 1;
                }
                let id = self.next_loan;
                self.next_loan += 1;
                vec![Loan {
                    id,
                    referent: symbol,
                    mutable,
                    counted: true,
                }]
            }
            PlaceRoot::ThroughRef {
                mutable: through_mutable,
                holder,
            } => {
                if mutable && !through_mutable {
                    self.error(BorrowErrorKind::MutateThroughImmutableRef, span);
                }
                holder
                    .map(|holder| self.dependencies(holder))
                    .unwrap_or_default()
            }
            PlaceRoot::Temporary => Vec::new(),
        }
    }

    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) {
        let holder = match (&target.kind, op) {
            (ExprKind::Identifier(ident), AssignOp::Assign) => ident.symbol,
            _ => None,
        };
        // A rebound holder gives up what it held before the new value is built.
        if let Some(holder) = holder {
            if let Some(state) = self.state.bindings.get_mut(&holder) {
                let old = std::mem::take(&mut state.loans);
                self.release(&old);
            }
        }
        let loans = self.expr(value);
        self.place_uses(target, holder.is_some());

        match self.place_root(target) {
            PlaceRoot::Binding(symbol) => {
                if !self.typed.symbols.symbol(symbol).mutability.is_mutable() {
                    let name = self.name(symbol);
                    self.error(BorrowErrorKind::AssignToImmutableBinding(name), target.span);
                }
                let state = self.binding_mut(symbol);
                if holder.is_some() {
                    state.loans = loans;
                    state.expired = false;
                } else {
                    state.loans.extend(loans);
                }
            }
            PlaceRoot::ThroughRef { mutable, holder } => {
                if !mutable {
                    self.error(BorrowErrorKind::MutateThroughImmutableRef, target.span);
                }
                match holder {
                    Some(holder) => self.binding_mut(holder).loans.extend(loans),
                    None => self.hold_temporarily(loans),
                }
            }
            PlaceRoot::Temporary => self.hold_temporarily(loans),
        }
    }
}
