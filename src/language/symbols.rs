use crate::language::{
    span::Span,
    types::{Mutability, Type},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Block,
    Loop,
    Arm,
}

#[derive(Clone, Debug)]
pub struct ScopeRecord {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub depth: usize,
}

/// A binding: one storage slot. Shadowing always allocates a new symbol.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub ty: Type,
    pub mutability: Mutability,
    pub scope: ScopeId,
    pub span: Span,
}

/// Arena of scopes and symbols for one compilation unit. Scopes link to
/// their parent by index, so the tree never holds pointers.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<ScopeRecord>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let depth = parent.map(|p| self.scope(p).depth + 1).unwrap_or(0);
        self.scopes.push(ScopeRecord {
            id,
            parent,
            kind,
            depth,
        });
        id
    }

    pub fn declare(
        &mut self,
        name: &str,
        ty: Type,
        mutability: Mutability,
        scope: ScopeId,
        span: Span,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            ty,
            mutability,
            scope,
            span,
        });
        id
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeRecord {
        &self.scopes[id.0 as usize]
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn symbols_in(&self, scope: ScopeId) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |symbol| symbol.scope == scope)
    }

    /// True when `ancestor` is `scope` or one of its parents.
    pub fn encloses(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.scope(id).parent;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_form_a_tree_by_parent_index() {
        let mut table = SymbolTable::new();
        let root = table.new_scope(None, ScopeKind::Function);
        let inner = table.new_scope(Some(root), ScopeKind::Block);
        let sibling = table.new_scope(Some(root), ScopeKind::Block);
        assert!(table.encloses(root, inner));
        assert!(!table.encloses(inner, root));
        assert!(!table.encloses(inner, sibling));
        assert_eq!(table.scope(inner).depth, 1);
    }

    #[test]
    fn shadowing_allocates_a_new_slot() {
        let mut table = SymbolTable::new();
        let root = table.new_scope(None, ScopeKind::Function);
        let inner = table.new_scope(Some(root), ScopeKind::Block);
        let outer_x = table.declare("x", Type::unit(), Mutability::Immutable, root, Span::default());
        let inner_x = table.declare("x", Type::unit(), Mutability::Immutable, inner, Span::default());
        assert_ne!(outer_x, inner_x);
        assert_eq!(table.symbols_in(inner).count(), 1);
    }
}
