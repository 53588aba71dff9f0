use crate::language::{
    declarations::MethodId,
    span::Span,
    symbols::{ScopeId, SymbolId},
    types::{Mutability, TypeAnnotation},
};

pub type ExprId = u32;

#[derive(Clone, Debug)]
pub struct Program {
    pub items: Vec<Item>,
    /// First id not handed out by the parser; later passes allocate from here.
    pub next_expr_id: ExprId,
}

impl Program {
    pub fn fresh_expr_id(&mut self) -> ExprId {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        id
    }
}

#[derive(Clone, Debug)]
pub enum Item {
    Record(RecordDecl),
    Union(UnionDecl),
    Function(FunctionDecl),
    Patch(PatchDecl),
}

#[derive(Clone, Debug)]
pub struct RecordDecl {
    pub name: String,
    pub fields: Vec<RecordField>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct RecordField {
    pub name: String,
    pub ty: TypeAnnotation,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct UnionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub variants: Vec<UnionVariant>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct UnionVariant {
    pub name: String,
    pub fields: Vec<TypeAnnotation>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: TypeAnnotation,
    pub mutability: Mutability,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

#[derive(Clone, Debug)]
pub struct PatchDecl {
    pub target: TypeAnnotation,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
    pub scope: Option<ScopeId>,
}

impl Block {
    /// The trailing `;`-less expression, if the block has one.
    pub fn tail(&self) -> Option<&Expr> {
        match self.statements.last() {
            Some(Statement {
                kind: StmtKind::Expr(expr),
                form: StatementForm::ExpressionTail,
                ..
            }) => Some(expr),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementForm {
    /// Final expression of a block, not terminated by `;`.
    ExpressionTail,
    /// Terminated by `;` (or a block-like expression in a non-final position).
    Statement,
}

#[derive(Clone, Debug)]
pub struct Statement {
    pub kind: StmtKind,
    pub form: StatementForm,
    pub span: Span,
}

impl Statement {
    pub fn is_expression_tail(&self) -> bool {
        self.form == StatementForm::ExpressionTail
    }

    pub fn is_statement(&self) -> bool {
        self.form == StatementForm::Statement
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Let(LetStmt),
    Expr(Expr),
}

#[derive(Clone, Debug)]
pub struct LetStmt {
    pub name: String,
    pub ty: Option<TypeAnnotation>,
    pub mutability: Mutability,
    pub value: Expr,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(Identifier),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        target: Option<CallTarget>,
    },
    FieldAccess {
        base: Box<Expr>,
        field: String,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        target: Option<MethodTarget>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Reference {
        mutable: bool,
        operand: Box<Expr>,
    },
    Deref {
        operand: Box<Expr>,
        /// Inserted by the resolver for field access and method calls on references.
        implicit: bool,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Block(Box<Block>),
    If {
        condition: Box<Expr>,
        then_branch: Box<Block>,
        else_branch: Option<Box<Expr>>,
    },
    When {
        scrutinee: Box<Expr>,
        arms: Vec<WhenArm>,
        /// Set by the resolver: the value of this `when` is consumed.
        produces_value: bool,
    },
    Loop {
        body: Box<Block>,
    },
    While {
        condition: Box<Expr>,
        body: Box<Block>,
    },
    For {
        binding: String,
        symbol: Option<SymbolId>,
        iterable: Box<Expr>,
        body: Box<Block>,
    },
    Break(Option<Box<Expr>>),
    Return(Option<Box<Expr>>),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    RecordLiteral {
        ty: TypeAnnotation,
        fields: Vec<FieldInit>,
    },
    VariantLiteral {
        qualifier: Option<TypeAnnotation>,
        variant: String,
        args: Vec<Expr>,
        resolved: Option<VariantRef>,
    },
    ArrayLiteral(Vec<Expr>),
}

impl Expr {
    /// Expressions that end in a `}` and may stand as statements without `;`.
    pub fn is_block_like(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::If { .. }
                | ExprKind::When { .. }
                | ExprKind::Block(_)
                | ExprKind::Loop { .. }
                | ExprKind::While { .. }
                | ExprKind::For { .. }
        )
    }

    pub fn is_place(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Identifier(_)
                | ExprKind::FieldAccess { .. }
                | ExprKind::Index { .. }
                | ExprKind::Deref { .. }
        )
    }
}

#[derive(Clone, Debug)]
pub struct Identifier {
    pub name: String,
    pub symbol: Option<SymbolId>,
}

#[derive(Clone, Debug)]
pub struct FieldInit {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantRef {
    pub union_name: String,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    Function(String),
    Native(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodTarget {
    Native,
    Patch(MethodId),
}

#[derive(Clone, Debug)]
pub struct WhenArm {
    pub pattern: Pattern,
    pub body: Expr,
    pub span: Span,
    pub scope: Option<ScopeId>,
}

#[derive(Clone, Debug)]
pub enum Pattern {
    Variant {
        qualifier: Option<String>,
        name: String,
        args: Vec<Pattern>,
        span: Span,
    },
    Binding {
        name: String,
        span: Span,
        symbol: Option<SymbolId>,
    },
    Wildcard(Span),
    Literal(Literal, Span),
    Else(Span),
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Variant { span, .. }
            | Pattern::Binding { span, .. }
            | Pattern::Wildcard(span)
            | Pattern::Literal(_, span)
            | Pattern::Else(span) => *span,
        }
    }

    /// Matches every value of the scrutinee's type.
    pub fn is_irrefutable(&self) -> bool {
        matches!(
            self,
            Pattern::Binding { .. } | Pattern::Wildcard(_) | Pattern::Else(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Char(char),
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignOp {
    /// The arithmetic operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
        }
    }
}
