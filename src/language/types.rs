use crate::language::span::Span;
use std::collections::HashMap;
use std::fmt;

/// A type as written in source.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeExpr {
    Named(String, Vec<TypeExpr>),
    Reference { mutable: bool, ty: Box<TypeExpr> },
    /// Numeric type argument, as in `fixedArray<i32, 3>`.
    Length(u64),
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into(), Vec::new())
    }

    pub fn canonical_name(&self) -> String {
        match self {
            TypeExpr::Named(name, args) => {
                if args.is_empty() {
                    name.clone()
                } else {
                    let rendered: Vec<String> = args.iter().map(|ty| ty.canonical_name()).collect();
                    format!("{}<{}>", name, rendered.join(", "))
                }
            }
            TypeExpr::Reference { mutable, ty } => {
                if *mutable {
                    format!("{}&@", ty.canonical_name())
                } else {
                    format!("{}&", ty.canonical_name())
                }
            }
            TypeExpr::Length(len) => len.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAnnotation {
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mutability {
    Immutable,
    Mutable,
}

impl Mutability {
    pub fn is_mutable(self) -> bool {
        matches!(self, Mutability::Mutable)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    ISize,
    USize,
    F32,
    F64,
    Bool,
    Char,
    String,
    Unit,
}

impl PrimitiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "i8" => PrimitiveKind::I8,
            "i16" => PrimitiveKind::I16,
            "i32" => PrimitiveKind::I32,
            "i64" => PrimitiveKind::I64,
            "u8" => PrimitiveKind::U8,
            "u16" => PrimitiveKind::U16,
            "u32" => PrimitiveKind::U32,
            "u64" => PrimitiveKind::U64,
            "isize" => PrimitiveKind::ISize,
            "usize" => PrimitiveKind::USize,
            "f32" => PrimitiveKind::F32,
            "f64" => PrimitiveKind::F64,
            "bool" => PrimitiveKind::Bool,
            "char" => PrimitiveKind::Char,
            "string" => PrimitiveKind::String,
            "unit" => PrimitiveKind::Unit,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::I8 => "i8",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::U8 => "u8",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::ISize => "isize",
            PrimitiveKind::USize => "usize",
            PrimitiveKind::F32 => "f32",
            PrimitiveKind::F64 => "f64",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::String => "string",
            PrimitiveKind::Unit => "unit",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I8
                | PrimitiveKind::I16
                | PrimitiveKind::I32
                | PrimitiveKind::I64
                | PrimitiveKind::U8
                | PrimitiveKind::U16
                | PrimitiveKind::U32
                | PrimitiveKind::U64
                | PrimitiveKind::ISize
                | PrimitiveKind::USize
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Inclusive value range for integer kinds, used for overflow checks.
    pub fn integer_bounds(self) -> Option<(i128, i128)> {
        let bounds = match self {
            PrimitiveKind::I8 => (i8::MIN as i128, i8::MAX as i128),
            PrimitiveKind::I16 => (i16::MIN as i128, i16::MAX as i128),
            PrimitiveKind::I32 => (i32::MIN as i128, i32::MAX as i128),
            PrimitiveKind::I64 | PrimitiveKind::ISize => (i64::MIN as i128, i64::MAX as i128),
            PrimitiveKind::U8 => (0, u8::MAX as i128),
            PrimitiveKind::U16 => (0, u16::MAX as i128),
            PrimitiveKind::U32 => (0, u32::MAX as i128),
            PrimitiveKind::U64 | PrimitiveKind::USize => (0, i64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }
}

pub type TypeVarId = u32;

/// Names of the generic containers the core understands without a
/// declaration.
pub const ARRAY_LIST_TYPE: &str = "arrayList";
pub const FIXED_ARRAY_TYPE: &str = "fixedArray";
pub const RANGE_TYPE: &str = "range";

/// Resolved semantic type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveKind),
    Named { name: String, args: Vec<Type> },
    Reference { inner: Box<Type>, mutable: bool },
    Function { params: Vec<Type>, ret: Box<Type> },
    /// Generic parameter of the enclosing union or patch.
    Param(String),
    /// Inference variable, only present while a function body is resolved.
    Var(TypeVarId),
    /// Element count of a `fixedArray`.
    Length(u64),
    /// Type of `break` and `return`; unifies with every type.
    Never,
}

impl Type {
    pub fn unit() -> Self {
        Type::Primitive(PrimitiveKind::Unit)
    }

    pub fn bool() -> Self {
        Type::Primitive(PrimitiveKind::Bool)
    }

    pub fn string() -> Self {
        Type::Primitive(PrimitiveKind::String)
    }

    pub fn named(name: impl Into<String>, args: Vec<Type>) -> Self {
        Type::Named {
            name: name.into(),
            args,
        }
    }

    pub fn reference(inner: Type, mutable: bool) -> Self {
        Type::Reference {
            inner: Box::new(inner),
            mutable,
        }
    }

    pub fn array_list(element: Type) -> Self {
        Type::named(ARRAY_LIST_TYPE, vec![element])
    }

    pub fn fixed_array(element: Type, len: u64) -> Self {
        Type::named(FIXED_ARRAY_TYPE, vec![element, Type::Length(len)])
    }

    /// Element type of an `arrayList` or `fixedArray`.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Named { name, args } if name == ARRAY_LIST_TYPE && args.len() == 1 => args.first(),
            Type::Named { name, args } if name == FIXED_ARRAY_TYPE && args.len() == 2 => args.first(),
            _ => None,
        }
    }

    pub fn range(element: Type) -> Self {
        Type::named(RANGE_TYPE, vec![element])
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Primitive(PrimitiveKind::Unit))
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Type::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Reference { .. })
    }

    /// Strips every reference layer.
    pub fn referent(&self) -> &Type {
        match self {
            Type::Reference { inner, .. } => inner.referent(),
            other => other,
        }
    }

    pub fn head(&self) -> Option<&str> {
        match self {
            Type::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    /// True when a value of this type may carry a reference.
    pub fn may_hold_reference(&self) -> bool {
        match self {
            Type::Reference { .. } | Type::Param(_) | Type::Var(_) => true,
            Type::Named { args, .. } => args.iter().any(Type::may_hold_reference),
            _ => false,
        }
    }

    pub fn substitute(&self, map: &HashMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::Named { name, args } => Type::Named {
                name: name.clone(),
                args: args.iter().map(|ty| ty.substitute(map)).collect(),
            },
            Type::Reference { inner, mutable } => Type::Reference {
                inner: Box::new(inner.substitute(map)),
                mutable: *mutable,
            },
            Type::Function { params, ret } => Type::Function {
                params: params.iter().map(|ty| ty.substitute(map)).collect(),
                ret: Box::new(ret.substitute(map)),
            },
            Type::Primitive(_) | Type::Var(_) | Type::Length(_) | Type::Never => self.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(kind) => f.write_str(kind.name()),
            Type::Named { name, args } => {
                if args.is_empty() {
                    write!(f, "{name}")
                } else {
                    let rendered: Vec<String> = args.iter().map(|ty| ty.to_string()).collect();
                    write!(f, "{}<{}>", name, rendered.join(", "))
                }
            }
            Type::Reference { inner, mutable } => {
                if *mutable {
                    write!(f, "{inner}&@")
                } else {
                    write!(f, "{inner}&")
                }
            }
            Type::Function { params, ret } => {
                let rendered: Vec<String> = params.iter().map(|ty| ty.to_string()).collect();
                write!(f, "fn({}) -> {}", rendered.join(", "), ret)
            }
            Type::Param(name) => write!(f, "{name}"),
            Type::Var(id) => write!(f, "?{id}"),
            Type::Length(len) => write!(f, "{len}"),
            Type::Never => f.write_str("!"),
        }
    }
}
