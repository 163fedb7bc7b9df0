//! Named maps: `textovar` (name → value) and `textoobj` (name → object).
//!
//! Keys are case-folded; iteration is alphabetical, which is what the
//! first/last/next/previous operations walk.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

#[derive(Debug)]
pub struct TextoVar {
    pub owner: ObjId,
    pub field: StringId,
    pub entries: BTreeMap<String, Value>,
}

impl TextoVar {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            entries: BTreeMap::new(),
        }
    }
}

/// Type character of a stored value: `' '` absent/null, `'_'` number,
/// `'$'` text, `'@'` object.
fn type_char(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => " ",
        Some(Value::Int(_) | Value::Double(_)) => "_",
        Some(Value::Str(_) | Value::Array(_)) => "$",
        Some(Value::Obj(_) | Value::Handler(_)) => "@",
    }
}

fn key_arg(args: &[Value]) -> String {
    args.first()
        .map(|v| v.to_text().to_ascii_lowercase())
        .unwrap_or_default()
}

pub(super) fn var_op(state: &Rc<RefCell<TextoVar>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "total" => Value::Int(s.entries.len() as i64),
        "ler" => s.entries.get(&key_arg(args)).cloned().unwrap_or(Value::Null),
        "mudar" => {
            let key = key_arg(args);
            if key.is_empty() {
                return Some(Value::Int(0));
            }
            match args.get(1) {
                Some(Value::Null) | None => {
                    s.entries.remove(&key);
                }
                Some(value) => {
                    s.entries.insert(key, value.clone());
                }
            }
            Value::Int(1)
        }
        "tipo" => Value::from(type_char(s.entries.get(&key_arg(args)))),
        "prim" => s
            .entries
            .keys()
            .next()
            .map_or_else(|| Value::from(""), |k| Value::from(k.as_str())),
        "ult" => s
            .entries
            .keys()
            .next_back()
            .map_or_else(|| Value::from(""), |k| Value::from(k.as_str())),
        "depois" => {
            let key = key_arg(args);
            s.entries
                .range::<String, _>((
                    std::ops::Bound::Excluded(&key),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .map_or_else(|| Value::from(""), |(k, _)| Value::from(k.as_str()))
        }
        "antes" => {
            let key = key_arg(args);
            s.entries
                .range::<String, _>((
                    std::ops::Bound::Unbounded,
                    std::ops::Bound::Excluded(&key),
                ))
                .next_back()
                .map_or_else(|| Value::from(""), |(k, _)| Value::from(k.as_str()))
        }
        "limpar" => {
            s.entries.clear();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

#[derive(Debug)]
pub struct TextoObj {
    pub owner: ObjId,
    pub field: StringId,
    pub entries: BTreeMap<String, ObjId>,
}

impl TextoObj {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            entries: BTreeMap::new(),
        }
    }
}

pub(super) fn obj_op(
    state: &Rc<RefCell<TextoObj>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "total" => Value::Int(s.entries.len() as i64),
        "ler" => s
            .entries
            .get(&key_arg(args))
            .copied()
            .filter(|id| world.heap.is_live(*id))
            .map_or(Value::Null, Value::Obj),
        "mudar" => {
            let key = key_arg(args);
            if key.is_empty() {
                return Some(Value::Int(0));
            }
            match args.get(1) {
                Some(Value::Obj(id)) => {
                    s.entries.insert(key, *id);
                    Value::Int(1)
                }
                Some(Value::Null) | None => {
                    s.entries.remove(&key);
                    Value::Int(1)
                }
                _ => Value::Int(0),
            }
        }
        "apagar" => {
            let removed = s.entries.remove(&key_arg(args)).is_some();
            Value::Int(i64::from(removed))
        }
        "prim" => s
            .entries
            .keys()
            .next()
            .map_or_else(|| Value::from(""), |k| Value::from(k.as_str())),
        "ult" => s
            .entries
            .keys()
            .next_back()
            .map_or_else(|| Value::from(""), |k| Value::from(k.as_str())),
        "depois" => {
            let key = key_arg(args);
            s.entries
                .range::<String, _>((
                    std::ops::Bound::Excluded(&key),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .map_or_else(|| Value::from(""), |(k, _)| Value::from(k.as_str()))
        }
        "limpar" => {
            s.entries.clear();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_chars() {
        assert_eq!(type_char(None), " ");
        assert_eq!(type_char(Some(&Value::Int(3))), "_");
        assert_eq!(type_char(Some(&Value::from("x"))), "$");
        assert_eq!(type_char(Some(&Value::Obj(ObjId::NONE))), "@");
    }

    #[test]
    fn alphabetical_iteration() {
        let s = Rc::new(RefCell::new(TextoVar::new(ObjId::NONE, StringId::from_index(0))));
        for key in ["banana", "abacaxi", "caju"] {
            var_op(&s, "mudar", &[Value::from(key), Value::Int(1)]);
        }
        assert_eq!(&*var_op(&s, "prim", &[]).unwrap().to_text(), "abacaxi");
        assert_eq!(&*var_op(&s, "ult", &[]).unwrap().to_text(), "caju");
        assert_eq!(
            &*var_op(&s, "depois", &[Value::from("abacaxi")]).unwrap().to_text(),
            "banana"
        );
        assert_eq!(
            &*var_op(&s, "antes", &[Value::from("banana")]).unwrap().to_text(),
            "abacaxi"
        );
    }

    #[test]
    fn storing_null_removes() {
        let s = Rc::new(RefCell::new(TextoVar::new(ObjId::NONE, StringId::from_index(0))));
        var_op(&s, "mudar", &[Value::from("x"), Value::Int(1)]);
        assert_eq!(var_op(&s, "total", &[]).unwrap().to_i64(), 1);
        var_op(&s, "mudar", &[Value::from("x"), Value::Null]);
        assert_eq!(var_op(&s, "total", &[]).unwrap().to_i64(), 0);
        assert_eq!(&*var_op(&s, "tipo", &[Value::from("x")]).unwrap().to_text(), " ");
    }
}
