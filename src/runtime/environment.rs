use crate::language::symbols::SymbolId;
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Slot = Rc<RefCell<Value>>;

#[derive(Clone, Default)]
struct Scope {
    bindings: HashMap<SymbolId, Slot>,
}

/// Scope stack of one call frame. Every declaration gets a fresh slot, so a
/// shadowing binding never disturbs references into the slot it hides.
#[derive(Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
    }

    pub fn declare(&mut self, symbol: SymbolId, value: Value) -> Slot {
        let slot = Rc::new(RefCell::new(value));
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(symbol, slot.clone());
        }
        slot
    }

    pub fn get(&self, symbol: SymbolId) -> Option<Value> {
        self.get_cell(symbol).map(|slot| slot.borrow().clone())
    }

    pub fn get_cell(&self, symbol: SymbolId) -> Option<Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(&symbol).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popped_slots_survive_through_references() {
        let mut env = Environment::new();
        env.push_scope();
        let slot = env.declare(SymbolId(0), Value::Int(1));
        env.pop_scope();
        assert!(env.get(SymbolId(0)).is_none());
        assert_eq!(slot.borrow().as_int(), Some(1));
    }

    #[test]
    fn redeclaring_allocates_a_new_slot() {
        let mut env = Environment::new();
        let first = env.declare(SymbolId(3), Value::Int(1));
        env.push_scope();
        env.declare(SymbolId(4), Value::Int(2));
        *first.borrow_mut() = Value::Int(5);
        assert_eq!(env.get(SymbolId(3)).and_then(|v| v.as_int()), Some(5));
        assert_eq!(env.get(SymbolId(4)).and_then(|v| v.as_int()), Some(2));
    }
}
