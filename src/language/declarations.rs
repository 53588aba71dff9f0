use crate::language::{
    ast::{FunctionDecl, Item, PatchDecl, Program},
    errors::DeclError,
    span::Span,
    types::{PrimitiveKind, Type, TypeExpr, ARRAY_LIST_TYPE, FIXED_ARRAY_TYPE, RANGE_TYPE},
};
use std::collections::{HashMap, HashSet};

/// Index into the flat patch-method table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct RecordInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub span: Span,
}

impl RecordInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct VariantInfo {
    pub name: String,
    pub fields: Vec<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct UnionInfo {
    pub name: String,
    pub type_params: Vec<String>,
    pub variants: Vec<VariantInfo>,
    pub span: Span,
}

impl UnionInfo {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|variant| variant.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct FunctionInfo {
    pub name: String,
    /// Position of the declaring item in `Program::items`.
    pub item: usize,
    pub span: Span,
}

/// Resolved patch target. Generic positions hold `Type::Param`.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchTarget {
    pub head: String,
    pub args: Vec<Type>,
    pub params: Vec<String>,
}

impl PatchTarget {
    pub fn self_type(&self) -> Type {
        Type::named(self.head.clone(), self.args.clone())
    }

    /// Target with its parameters renamed by order of appearance, so that
    /// `result<T, E>` and `result<A, B>` compare equal.
    fn normalized(&self) -> Vec<Type> {
        let renames: HashMap<String, Type> = self
            .params
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), Type::Param(format!("${idx}"))))
            .collect();
        self.args.iter().map(|ty| ty.substitute(&renames)).collect()
    }
}

#[derive(Clone, Debug)]
pub struct PatchMethod {
    pub id: MethodId,
    pub name: String,
    pub target: PatchTarget,
    pub item: usize,
    /// Position of the method inside its patch block.
    pub index: usize,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MethodLookup {
    Found {
        id: MethodId,
        bindings: HashMap<String, Type>,
    },
    Ambiguous(Vec<MethodId>),
    NotFound,
}

/// Top-level items of one compilation unit.
#[derive(Clone, Debug, Default)]
pub struct DeclTable {
    records: HashMap<String, RecordInfo>,
    unions: HashMap<String, UnionInfo>,
    functions: HashMap<String, FunctionInfo>,
    methods: Vec<PatchMethod>,
    variants: HashMap<String, Vec<(String, usize)>>,
}

impl DeclTable {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn register(program: &Program) -> Result<DeclTable, DeclError> {
        let mut table = DeclTable::default();
        let mut seen: HashSet<String> = HashSet::new();
        for (idx, item) in program.items.iter().enumerate() {
            let (name, span) = match item {
                Item::Record(decl) => (&decl.name, decl.span),
                Item::Union(decl) => (&decl.name, decl.span),
                Item::Function(decl) => (&decl.name, decl.span),
                Item::Patch(_) => continue,
            };
            if !seen.insert(name.clone()) {
                return Err(DeclError::DuplicateDeclaration {
                    name: name.clone(),
                    span: span.into(),
                });
            }
            match item {
                Item::Record(decl) => {
                    let mut fields = Vec::with_capacity(decl.fields.len());
                    for field in &decl.fields {
                        if fields.iter().any(|f: &FieldInfo| f.name == field.name) {
                            return Err(duplicate_member(&decl.name, &field.name, field.span));
                        }
                        fields.push(FieldInfo {
                            name: field.name.clone(),
                            ty: field.ty.ty.clone(),
                            span: field.span,
                        });
                    }
                    table.records.insert(
                        decl.name.clone(),
                        RecordInfo {
                            name: decl.name.clone(),
                            fields,
                            span: decl.span,
                        },
                    );
                }
                Item::Union(decl) => {
                    let mut params: Vec<String> = Vec::new();
                    for param in &decl.type_params {
                        if params.contains(param) {
                            return Err(duplicate_member(&decl.name, param, decl.span));
                        }
                        params.push(param.clone());
                    }
                    let mut variants: Vec<VariantInfo> = Vec::new();
                    for variant in &decl.variants {
                        if variants.iter().any(|v| v.name == variant.name) {
                            return Err(duplicate_member(&decl.name, &variant.name, variant.span));
                        }
                        table
                            .variants
                            .entry(variant.name.clone())
                            .or_default()
                            .push((decl.name.clone(), variants.len()));
                        variants.push(VariantInfo {
                            name: variant.name.clone(),
                            fields: variant.fields.iter().map(|f| f.ty.clone()).collect(),
                        });
                    }
                    table.unions.insert(
                        decl.name.clone(),
                        UnionInfo {
                            name: decl.name.clone(),
                            type_params: params,
                            variants,
                            span: decl.span,
                        },
                    );
                }
                Item::Function(decl) => {
                    check_params(decl)?;
                    table.functions.insert(
                        decl.name.clone(),
                        FunctionInfo {
                            name: decl.name.clone(),
                            item: idx,
                            span: decl.span,
                        },
                    );
                }
                Item::Patch(_) => {}
            }
        }

        let mut claimed: HashMap<(String, Vec<Type>, String), MethodId> = HashMap::new();
        for (idx, item) in program.items.iter().enumerate() {
            let Item::Patch(patch) = item else {
                continue;
            };
            let target = table.resolve_patch_target(patch)?;
            let normalized = target.normalized();
            for (index, method) in patch.methods.iter().enumerate() {
                check_params(method)?;
                let key = (target.head.clone(), normalized.clone(), method.name.clone());
                if claimed.contains_key(&key) {
                    return Err(DeclError::ConflictingPatchMethod {
                        ty: target.self_type().to_string(),
                        method_name: method.name.clone(),
                        span: method.span.into(),
                    });
                }
                let id = MethodId(table.methods.len() as u32);
                claimed.insert(key, id);
                tracing::trace!(method = %method.name, target = %target.self_type(), "registered patch method");
                table.methods.push(PatchMethod {
                    id,
                    name: method.name.clone(),
                    target: target.clone(),
                    item: idx,
                    index,
                    span: method.span,
                });
            }
        }

        tracing::debug!(
            records = table.records.len(),
            unions = table.unions.len(),
            functions = table.functions.len(),
            methods = table.methods.len(),
            "declarations registered"
        );
        Ok(table)
    }

    fn resolve_patch_target(&self, patch: &PatchDecl) -> Result<PatchTarget, DeclError> {
        let span = patch.target.span;
        let TypeExpr::Named(head, args) = &patch.target.ty else {
            return Err(DeclError::UnknownPatchTarget {
                name: patch.target.ty.canonical_name(),
                span: span.into(),
            });
        };
        let expected = match self.type_arity(head) {
            Some(arity) if self.records.contains_key(head) || self.unions.contains_key(head) => arity,
            _ => {
                return Err(DeclError::UnknownPatchTarget {
                    name: head.clone(),
                    span: span.into(),
                })
            }
        };
        let mut params = Vec::new();
        let args = if args.is_empty() {
            // A bare generic head stands for every instantiation.
            let declared = self
                .unions
                .get(head)
                .map(|info| info.type_params.clone())
                .unwrap_or_default();
            params.extend(declared.iter().cloned());
            declared.into_iter().map(Type::Param).collect()
        } else {
            if args.len() != expected {
                return Err(DeclError::PatchArity {
                    name: head.clone(),
                    expected,
                    found: args.len(),
                    span: span.into(),
                });
            }
            let mut lowered = Vec::with_capacity(args.len());
            for arg in args {
                lowered.push(self.lower_target_arg(arg, &mut params, span)?);
            }
            lowered
        };
        Ok(PatchTarget {
            head: head.clone(),
            args,
            params,
        })
    }

    /// Lowers one patch-target argument. Bare names that are not types
    /// become generic parameters of the patch.
    fn lower_target_arg(
        &self,
        expr: &TypeExpr,
        params: &mut Vec<String>,
        span: Span,
    ) -> Result<Type, DeclError> {
        match expr {
            TypeExpr::Reference { mutable, ty } => Ok(Type::reference(
                self.lower_target_arg(ty, params, span)?,
                *mutable,
            )),
            TypeExpr::Length(len) => Ok(Type::Length(*len)),
            TypeExpr::Named(name, args) if args.is_empty() => {
                if let Some(kind) = PrimitiveKind::from_name(name) {
                    Ok(Type::Primitive(kind))
                } else if self.records.contains_key(name) {
                    Ok(Type::named(name.clone(), Vec::new()))
                } else {
                    if !params.contains(name) {
                        params.push(name.clone());
                    }
                    Ok(Type::Param(name.clone()))
                }
            }
            TypeExpr::Named(name, args) => {
                if self.type_arity(name).is_none() {
                    return Err(DeclError::UnknownPatchTarget {
                        name: name.clone(),
                        span: span.into(),
                    });
                }
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    lowered.push(self.lower_target_arg(arg, params, span)?);
                }
                Ok(Type::named(name.clone(), lowered))
            }
        }
    }

    /// Number of type arguments a named type takes, `None` when the name
    /// is not a type at all.
    pub fn type_arity(&self, name: &str) -> Option<usize> {
        if PrimitiveKind::from_name(name).is_some() || self.records.contains_key(name) {
            Some(0)
        } else if name == ARRAY_LIST_TYPE || name == RANGE_TYPE {
            Some(1)
        } else if name == FIXED_ARRAY_TYPE {
            Some(2)
        } else {
            self.unions.get(name).map(|info| info.type_params.len())
        }
    }

    pub fn record(&self, name: &str) -> Option<&RecordInfo> {
        self.records.get(name)
    }

    pub fn union(&self, name: &str) -> Option<&UnionInfo> {
        self.unions.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn method(&self, id: MethodId) -> &PatchMethod {
        &self.methods[id.0 as usize]
    }

    pub fn methods(&self) -> &[PatchMethod] {
        &self.methods
    }

    /// Unions declaring a variant with this name, with the variant's index.
    pub fn variants_named(&self, name: &str) -> &[(String, usize)] {
        self.variants.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Patch-tier lookup for `name` on a receiver of type `receiver`
    /// (already dereferenced).
    pub fn lookup_method(&self, receiver: &Type, name: &str) -> MethodLookup {
        let Type::Named { name: head, args } = receiver else {
            return MethodLookup::NotFound;
        };
        let mut found: Vec<(MethodId, HashMap<String, Type>)> = Vec::new();
        for method in self.methods.iter().filter(|m| m.name == name && &m.target.head == head) {
            let mut bindings = HashMap::new();
            let matched = method.target.args.len() == args.len()
                && method
                    .target
                    .args
                    .iter()
                    .zip(args)
                    .all(|(pattern, actual)| match_pattern(pattern, actual, &mut bindings));
            if matched {
                found.push((method.id, bindings));
            }
        }
        match found.len() {
            0 => MethodLookup::NotFound,
            1 => {
                let (id, bindings) = found.remove(0);
                MethodLookup::Found { id, bindings }
            }
            _ => MethodLookup::Ambiguous(found.into_iter().map(|(id, _)| id).collect()),
        }
    }

    /// Source declaration of a patch method.
    pub fn method_decl<'p>(&self, program: &'p Program, id: MethodId) -> Option<&'p FunctionDecl> {
        let method = self.method(id);
        match program.items.get(method.item)? {
            Item::Patch(patch) => patch.methods.get(method.index),
            _ => None,
        }
    }

    pub fn function_decl<'p>(&self, program: &'p Program, name: &str) -> Option<&'p FunctionDecl> {
        let info = self.functions.get(name)?;
        match program.items.get(info.item)? {
            Item::Function(decl) => Some(decl),
            _ => None,
        }
    }
}

fn duplicate_member(owner: &str, name: &str, span: Span) -> DeclError {
    DeclError::DuplicateMember {
        owner: owner.to_string(),
        name: name.to_string(),
        span: span.into(),
    }
}

fn check_params(decl: &FunctionDecl) -> Result<(), DeclError> {
    let mut names = HashSet::new();
    for param in &decl.params {
        if !names.insert(param.name.as_str()) {
            return Err(duplicate_member(&decl.name, &param.name, param.span));
        }
    }
    Ok(())
}

/// Generic parameters and inference variables match anything; a parameter
/// seen twice must match the same type both times.
fn match_pattern(pattern: &Type, actual: &Type, bindings: &mut HashMap<String, Type>) -> bool {
    match (pattern, actual) {
        (Type::Param(name), _) => match bindings.get(name) {
            Some(bound) if !matches!(bound, Type::Var(_)) && !matches!(actual, Type::Var(_)) => {
                bound == actual
            }
            Some(_) => true,
            None => {
                bindings.insert(name.clone(), actual.clone());
                true
            }
        },
        (_, Type::Var(_)) | (_, Type::Param(_)) | (_, Type::Never) => true,
        (
            Type::Named { name: a, args: a_args },
            Type::Named { name: b, args: b_args },
        ) => {
            a == b
                && a_args.len() == b_args.len()
                && a_args
                    .iter()
                    .zip(b_args)
                    .all(|(p, t)| match_pattern(p, t, bindings))
        }
        (
            Type::Reference { inner: a, mutable: am },
            Type::Reference { inner: b, mutable: bm },
        ) => am == bm && match_pattern(a, b, bindings),
        _ => pattern == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{lexer::tokenize, parser::parse};
    use pretty_assertions::assert_eq;

    fn register(source: &str) -> Result<DeclTable, DeclError> {
        let tokens = tokenize(source).expect("lex");
        let program = parse(tokens).expect("parse");
        DeclTable::register(&program)
    }

    const RESULT: &str = "union result<T, E> { ok(T); err(E); }\n";

    #[test]
    fn registers_records_unions_and_functions() {
        let table = register(&format!(
            "{RESULT} record userProfile {{ string name; i32 age; }} fn main() {{ }}"
        ))
        .expect("register");
        assert_eq!(table.record("userProfile").map(|r| r.fields.len()), Some(2));
        assert_eq!(table.union("result").and_then(|u| u.variant_index("err")), Some(1));
        assert!(table.function("main").is_some());
        assert_eq!(table.variants_named("ok"), &[("result".to_string(), 0)]);
    }

    #[test]
    fn rejects_duplicate_top_level_names() {
        let err = register("record a { i32 x; } fn a() { }").unwrap_err();
        assert!(matches!(err, DeclError::DuplicateDeclaration { ref name, .. } if name == "a"));
    }

    #[test]
    fn rejects_repeated_fields() {
        let err = register("record a { i32 x; bool x; }").unwrap_err();
        assert!(matches!(err, DeclError::DuplicateMember { ref name, .. } if name == "x"));
    }

    #[test]
    fn alpha_equivalent_patch_targets_conflict() {
        let source = format!(
            "{RESULT} patch result<T, E> {{ bool isOk() {{ true }} }} \
             patch result<A, B> {{ bool isOk() {{ false }} }}"
        );
        let err = register(&source).unwrap_err();
        assert!(matches!(
            err,
            DeclError::ConflictingPatchMethod { ref method_name, .. } if method_name == "isOk"
        ));
    }

    #[test]
    fn bare_generic_head_equals_fully_generic_target() {
        let source = format!(
            "{RESULT} patch result {{ bool isOk() {{ true }} }} \
             patch result<T, E> {{ bool isOk() {{ false }} }}"
        );
        assert!(matches!(
            register(&source),
            Err(DeclError::ConflictingPatchMethod { .. })
        ));
    }

    #[test]
    fn generic_patch_applies_to_every_instantiation() {
        let source = format!("{RESULT} patch result<T, E> {{ bool isOk() {{ true }} }}");
        let table = register(&source).expect("register");
        let receiver = Type::named(
            "result",
            vec![Type::Primitive(PrimitiveKind::I32), Type::string()],
        );
        match table.lookup_method(&receiver, "isOk") {
            MethodLookup::Found { bindings, .. } => {
                assert_eq!(bindings.get("T"), Some(&Type::Primitive(PrimitiveKind::I32)));
                assert_eq!(bindings.get("E"), Some(&Type::string()));
            }
            other => panic!("unexpected lookup {other:?}"),
        }
        assert_eq!(table.lookup_method(&receiver, "isErr"), MethodLookup::NotFound);
    }

    #[test]
    fn overlapping_concrete_and_generic_patches_are_ambiguous() {
        let source = format!(
            "{RESULT} patch result<T, E> {{ bool pick() {{ true }} }} \
             patch result<i32, string> {{ bool pick() {{ false }} }}"
        );
        let table = register(&source).expect("register");
        let concrete = Type::named(
            "result",
            vec![Type::Primitive(PrimitiveKind::I32), Type::string()],
        );
        assert!(matches!(
            table.lookup_method(&concrete, "pick"),
            MethodLookup::Ambiguous(ids) if ids.len() == 2
        ));
        let other = Type::named("result", vec![Type::bool(), Type::string()]);
        assert!(matches!(
            table.lookup_method(&other, "pick"),
            MethodLookup::Found { .. }
        ));
    }

    #[test]
    fn patch_target_must_exist_and_match_arity() {
        assert!(matches!(
            register("patch ghost { bool x() { true } }"),
            Err(DeclError::UnknownPatchTarget { .. })
        ));
        assert!(matches!(
            register(&format!("{RESULT} patch result<i32> {{ bool x() {{ true }} }}")),
            Err(DeclError::PatchArity { expected: 2, found: 1, .. })
        ));
    }
}
