use super::checker::Checker;
use super::TypeErrorKind;
use crate::language::{
    ast::{Expr, Literal, Pattern, WhenArm},
    span::Span,
    symbols::ScopeKind,
    types::{Mutability, PrimitiveKind, Type},
};
use std::collections::HashMap;

impl Checker<'_> {
    pub(super) fn infer_when(
        &mut self,
        scrutinee: &mut Expr,
        arms: &mut [WhenArm],
        expected: Option<&Type>,
        used: bool,
        span: Span,
    ) -> Type {
        let scrutinee_ty = self.check_expr(scrutinee, None);
        let scrutinee_ty = self.auto_deref(scrutinee, scrutinee_ty);

        let mut result: Option<Type> = None;
        for arm in arms.iter_mut() {
            arm.scope = Some(self.push_scope(ScopeKind::Arm));
            self.check_pattern(&mut arm.pattern, &scrutinee_ty);
            let hint = result.clone().or_else(|| expected.cloned());
            let ty = self.check_expr_used(&mut arm.body, hint.as_ref(), used);
            if used {
                if let Some(previous) = result.clone() {
                    if !self.unify(&previous, &ty) {
                        self.mismatch(&previous, &ty, arm.body.span);
                    }
                } else if !matches!(self.shallow(&ty), Type::Never) {
                    result = Some(ty);
                }
            }
            self.pop_scope();
        }

        if used || self.options.exhaustive_statement_when {
            self.check_exhaustive(arms, &scrutinee_ty, span);
        }
        if used {
            result.unwrap_or(Type::Never)
        } else {
            Type::unit()
        }
    }

    /// Declares the pattern's bindings in the current arm scope. A bare name
    /// that is a variant of the scrutinee's union becomes a variant pattern.
    pub(super) fn check_pattern(&mut self, pattern: &mut Pattern, expected: &Type) {
        let ty = self.shallow(expected);
        match pattern {
            Pattern::Wildcard(_) | Pattern::Else(_) => {}
            Pattern::Binding { name, span, symbol } => {
                if self.union_has_variant(&ty, name) {
                    let (name, span) = (name.clone(), *span);
                    *pattern = Pattern::Variant {
                        qualifier: None,
                        name,
                        args: Vec::new(),
                        span,
                    };
                    return self.check_pattern(pattern, expected);
                }
                *symbol = Some(self.declare(name, ty, Mutability::Immutable, *span));
            }
            Pattern::Literal(literal, span) => {
                let literal_ty = match (literal, ty.primitive()) {
                    (Literal::Int(_), Some(kind)) if kind.is_numeric() => Type::Primitive(kind),
                    (Literal::Int(_), _) => Type::Primitive(PrimitiveKind::I32),
                    (Literal::Float(_), Some(kind)) if kind.is_float() => Type::Primitive(kind),
                    (Literal::Float(_), _) => Type::Primitive(PrimitiveKind::F64),
                    (Literal::Bool(_), _) => Type::bool(),
                    (Literal::String(_), _) => Type::string(),
                    (Literal::Char(_), _) => Type::Primitive(PrimitiveKind::Char),
                };
                let span = *span;
                self.coerce(&ty, &literal_ty, span);
            }
            Pattern::Variant {
                qualifier,
                name,
                args,
                span,
            } => {
                let span = *span;
                let decls = self.decls;
                let (union_name, type_args) = match &ty {
                    Type::Named {
                        name: union_name,
                        args: type_args,
                    } if decls.union(union_name).is_some() => (union_name.clone(), type_args.clone()),
                    Type::Never => {
                        self.bind_unchecked(args);
                        return;
                    }
                    Type::Var(_) => {
                        let candidates = decls.variants_named(name);
                        let chosen = match qualifier {
                            Some(qualifier) => candidates.iter().find(|(u, _)| *u == *qualifier),
                            None if candidates.len() == 1 => candidates.first(),
                            None => None,
                        };
                        let Some(info) = chosen.and_then(|(u, _)| decls.union(u)) else {
                            self.error(TypeErrorKind::UnknownVariant(name.clone()), span);
                            self.bind_unchecked(args);
                            return;
                        };
                        let type_args: Vec<Type> =
                            info.type_params.iter().map(|_| self.fresh_var()).collect();
                        self.unify(&ty, &Type::named(info.name.clone(), type_args.clone()));
                        (info.name.clone(), type_args)
                    }
                    other => {
                        let kind = TypeErrorKind::TypeMismatch {
                            expected: self.zonk(other).to_string(),
                            found: format!("variant `{name}`"),
                        };
                        self.error(kind, span);
                        self.bind_unchecked(args);
                        return;
                    }
                };
                if let Some(qualifier) = qualifier {
                    if *qualifier != union_name {
                        let kind = TypeErrorKind::TypeMismatch {
                            expected: union_name.clone(),
                            found: qualifier.clone(),
                        };
                        self.error(kind, span);
                    }
                }
                let Some(info) = decls.union(&union_name) else {
                    return;
                };
                let Some(index) = info.variant_index(name) else {
                    self.error(TypeErrorKind::UnknownVariant(name.clone()), span);
                    self.bind_unchecked(args);
                    return;
                };
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
                if fields.len() != args.len() {
                    let kind = TypeErrorKind::ArityMismatch {
                        name: name.clone(),
                        expected: fields.len(),
                        found: args.len(),
                    };
                    self.error(kind, span);
                }
                for (idx, arg) in args.iter_mut().enumerate() {
                    match fields.get(idx) {
                        Some(field) => self.check_pattern(arg, field),
                        None => self.check_pattern(arg, &Type::Never),
                    }
                }
            }
        }
    }

    fn union_has_variant(&self, ty: &Type, variant: &str) -> bool {
        match ty {
            Type::Named { name, .. } => self
                .decls
                .union(name)
                .map_or(false, |info| info.variant_index(variant).is_some()),
            _ => false,
        }
    }

    /// Declares sub-pattern bindings after an error so later uses resolve.
    fn bind_unchecked(&mut self, args: &mut [Pattern]) {
        for arg in args.iter_mut() {
            self.check_pattern(arg, &Type::Never);
        }
    }

    /// Reports the top-level cases no arm covers. A case counts as covered
    /// when the arms naming it jointly cover its payload, checked column by
    /// column over the arms' argument patterns.
    fn check_exhaustive(&mut self, arms: &[WhenArm], scrutinee: &Type, span: Span) {
        let rows: Vec<Row<'_>> = arms.iter().map(|arm| vec![Some(&arm.pattern)]).collect();
        if rows.iter().any(|row| is_wildcard(&row[0])) {
            return;
        }
        let ty = self.zonk(scrutinee);
        if matches!(ty, Type::Never) {
            return;
        }
        let Some(constructors) = self.constructors(&ty) else {
            self.error(TypeErrorKind::NonExhaustiveMatch { missing: Vec::new() }, span);
            return;
        };
        let missing: Vec<String> = constructors
            .iter()
            .filter(|ctor| !self.rows_exhaustive(&specialize(&rows, ctor), &ctor.fields))
            .map(|ctor| ctor.name.clone())
            .collect();
        if !missing.is_empty() {
            self.error(TypeErrorKind::NonExhaustiveMatch { missing }, span);
        }
    }

    /// The finite set of shapes a value of `ty` can take, if there is one.
    fn constructors(&self, ty: &Type) -> Option<Vec<Constructor>> {
        match self.zonk(ty) {
            Type::Primitive(PrimitiveKind::Bool) => Some(
                [true, false]
                    .into_iter()
                    .map(|value| Constructor {
                        name: value.to_string(),
                        fields: Vec::new(),
                    })
                    .collect(),
            ),
            Type::Named { name, args } => {
                let info = self.decls.union(&name)?;
                let map: HashMap<String, Type> =
                    info.type_params.iter().cloned().zip(args).collect();
                let payloads = self.payloads.get(&name);
                Some(
                    info.variants
                        .iter()
                        .enumerate()
                        .map(|(index, variant)| Constructor {
                            name: variant.name.clone(),
                            fields: payloads
                                .and_then(|variants| variants.get(index))
                                .map(|fields| fields.iter().map(|ty| ty.substitute(&map)).collect())
                                .unwrap_or_default(),
                        })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// Whether every value of the types `tys` matches some row.
    fn rows_exhaustive(&self, rows: &[Row<'_>], tys: &[Type]) -> bool {
        let Some((first, rest)) = tys.split_first() else {
            return !rows.is_empty();
        };
        if rows.is_empty() {
            return false;
        }
        if rows.iter().any(|row| !is_wildcard(&row[0])) {
            if let Some(constructors) = self.constructors(first) {
                return constructors.iter().all(|ctor| {
                    let mut tys = ctor.fields.clone();
                    tys.extend_from_slice(rest);
                    self.rows_exhaustive(&specialize(rows, ctor), &tys)
                });
            }
        }
        let defaults: Vec<Row<'_>> = rows
            .iter()
            .filter(|row| is_wildcard(&row[0]))
            .map(|row| row[1..].to_vec())
            .collect();
        self.rows_exhaustive(&defaults, rest)
    }
}

/// A row of patterns still to match, one per column; `None` matches anything.
type Row<'p> = Vec<Option<&'p Pattern>>;

/// A variant (or `true`/`false`) with the types of its payload.
struct Constructor {
    name: String,
    fields: Vec<Type>,
}

fn is_wildcard(pattern: &Option<&Pattern>) -> bool {
    pattern.map_or(true, Pattern::is_irrefutable)
}

/// Rows that can match `ctor`, with the head replaced by its argument patterns.
fn specialize<'p>(rows: &[Row<'p>], ctor: &Constructor) -> Vec<Row<'p>> {
    let arity = ctor.fields.len();
    rows.iter()
        .filter_map(|row| {
            let (head, rest) = row.split_first()?;
            let head: Option<&'p Pattern> = *head;
            let mut specialized: Row<'p> = match head {
                head if is_wildcard(&head) => vec![None; arity],
                Some(Pattern::Variant { name, args, .. }) if *name == ctor.name => {
                    if args.len() != arity {
                        return None;
                    }
                    args.iter().map(Some).collect()
                }
                Some(Pattern::Literal(Literal::Bool(value), _)) if value.to_string() == ctor.name => {
                    Vec::new()
                }
                _ => return None,
            };
            specialized.extend_from_slice(rest);
            Some(specialized)
        })
        .collect()
}
