use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Int(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    Record(RecordValue),
    Union(UnionValue),
    Array(Vec<Value>),
    Range(RangeValue),
    Reference(ReferenceValue),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Structural equality; references compare by the value they point to.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => {
                a.name == b.name
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.structural_eq(vb))
            }
            (Value::Union(a), Value::Union(b)) => {
                a.union_name == b.union_name
                    && a.tag == b.tag
                    && a.payload.len() == b.payload.len()
                    && a.payload.iter().zip(&b.payload).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a.get().structural_eq(&b.get()),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Record(record) => write!(f, "{record}"),
            Value::Union(value) => write!(f, "{value}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, value) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Range(range) => write!(
                f,
                "{}{}{}",
                range.start,
                if range.inclusive { "..=" } else { ".." },
                range.end
            ),
            Value::Reference(reference) => write!(f, "&{}", reference.get()),
        }
    }
}

/// One step from a slot to a nested place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathStep {
    Field(String),
    Index(usize),
}

/// A reference is the referent's slot plus the path to the borrowed part.
#[derive(Clone, Debug)]
pub struct ReferenceValue {
    pub cell: Rc<RefCell<Value>>,
    pub path: Vec<PathStep>,
    pub mutable: bool,
}

impl ReferenceValue {
    pub fn get(&self) -> Value {
        let root = self.cell.borrow();
        project(&root, &self.path).cloned().unwrap_or(Value::Unit)
    }

    pub fn set(&self, value: Value) -> bool {
        let mut root = self.cell.borrow_mut();
        match project_mut(&mut root, &self.path) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Same slot, one step deeper.
    pub fn child(&self, step: PathStep) -> ReferenceValue {
        let mut path = self.path.clone();
        path.push(step);
        ReferenceValue {
            cell: self.cell.clone(),
            path,
            mutable: self.mutable,
        }
    }
}

pub fn project<'v>(value: &'v Value, path: &[PathStep]) -> Option<&'v Value> {
    let mut current = value;
    for step in path {
        current = match (current, step) {
            (Value::Record(record), PathStep::Field(name)) => record.fields.get(name)?,
            (Value::Array(items), PathStep::Index(idx)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn project_mut<'v>(value: &'v mut Value, path: &[PathStep]) -> Option<&'v mut Value> {
    let mut current = value;
    for step in path {
        current = match (current, step) {
            (Value::Record(record), PathStep::Field(name)) => record.fields.get_mut(name)?,
            (Value::Array(items), PathStep::Index(idx)) => items.get_mut(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

#[derive(Clone, Debug)]
pub struct RecordValue {
    pub name: String,
    pub fields: BTreeMap<String, Value>,
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        let mut first = true;
        for (name, value) in &self.fields {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Tagged union value: discriminant plus payload slots.
#[derive(Clone, Debug)]
pub struct UnionValue {
    pub union_name: String,
    pub variant: String,
    pub tag: usize,
    pub payload: Vec<Value>,
}

impl fmt::Display for UnionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{}", self.variant)
        } else {
            write!(f, "{}(", self.variant)?;
            for (idx, value) in self.payload.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, ")")
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i128,
    pub end: i128,
    pub inclusive: bool,
}

impl RangeValue {
    pub fn iter(&self) -> impl Iterator<Item = i128> {
        let end = if self.inclusive { self.end + 1 } else { self.end };
        self.start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(age: i128) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), Value::Int(age));
        fields.insert("tags".to_string(), Value::Array(vec![Value::Int(1), Value::Int(2)]));
        Value::Record(RecordValue {
            name: "userProfile".into(),
            fields,
        })
    }

    #[test]
    fn references_write_through_nested_paths() {
        let cell = Rc::new(RefCell::new(profile(30)));
        let root = ReferenceValue {
            cell: cell.clone(),
            path: Vec::new(),
            mutable: true,
        };
        let second_tag = root
            .child(PathStep::Field("tags".into()))
            .child(PathStep::Index(1));
        assert!(second_tag.set(Value::Int(9)));
        assert!(root.child(PathStep::Field("age".into())).set(Value::Int(31)));
        assert_eq!(cell.borrow().to_string(), "userProfile{age: 31, tags: [1, 9]}");
        assert!(!root.child(PathStep::Field("missing".into())).set(Value::Unit));
    }

    #[test]
    fn ranges_respect_inclusivity() {
        let half_open = RangeValue {
            start: 0,
            end: 3,
            inclusive: false,
        };
        let closed = RangeValue {
            inclusive: true,
            ..half_open.clone()
        };
        assert_eq!(half_open.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(closed.iter().count(), 4);
    }

    #[test]
    fn union_values_compare_by_tag_and_payload() {
        let ok = |v| {
            Value::Union(UnionValue {
                union_name: "result".into(),
                variant: "ok".into(),
                tag: 0,
                payload: vec![Value::Int(v)],
            })
        };
        assert!(ok(5).structural_eq(&ok(5)));
        assert!(!ok(5).structural_eq(&ok(6)));
        assert_eq!(ok(5).to_string(), "ok(5)");
    }
}
