//! The process-wide indexed-object registry handlers.
//!
//! `indiceobj` registers its owning object under a unique name in the
//! world's index (looked up by scripts with `$nome`); setting the name
//! re-registers. `indiceitem` is a read cursor over the same registry,
//! walking names alphabetically.

use std::{cell::RefCell, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

#[derive(Debug)]
pub struct IndiceObj {
    pub owner: ObjId,
    pub field: StringId,
}

impl IndiceObj {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self { owner, field }
    }
}

pub(super) fn member_set(
    state: &Rc<RefCell<IndiceObj>>,
    world: &mut World,
    name: &str,
    value: &Value,
) -> bool {
    if name != "nome" {
        return false;
    }
    let owner = state.borrow().owner;
    world.index_register(&value.to_text(), owner);
    true
}

pub(super) fn obj_op(
    state: &Rc<RefCell<IndiceObj>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let owner = state.borrow().owner;
    let out = match name {
        "nome" => {
            if let Some(new_name) = args.first() {
                world.index_register(&new_name.to_text(), owner);
            }
            world
                .index_name_of(owner)
                .map_or_else(|| Value::from(""), Value::from)
        }
        "remover" => {
            world.index_unregister(owner);
            Value::Int(1)
        }
        "procurar" => {
            let key = args.first().map(Value::to_text).unwrap_or_default();
            world.index_lookup(&key).map_or(Value::Null, Value::Obj)
        }
        "prim" => world.index_first().map_or(Value::Null, |(_, id)| Value::Obj(id)),
        "ult" => world.index_last().map_or(Value::Null, |(_, id)| Value::Obj(id)),
        _ => return None,
    };
    Some(out)
}

/// Cursor over the registry; holds the current name.
#[derive(Debug)]
pub struct IndiceItem {
    pub owner: ObjId,
    pub field: StringId,
    pub current: Option<String>,
}

impl IndiceItem {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            current: None,
        }
    }
}

pub(super) fn item_op(
    state: &Rc<RefCell<IndiceItem>>,
    world: &mut World,
    name: &str,
    args: &[Value],
    countdown: bool,
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "procurar" => {
            let key = args.first().map(Value::to_text).unwrap_or_default();
            match world.index_lookup(&key) {
                Some(id) => {
                    s.current = Some(key.to_ascii_lowercase());
                    Value::Obj(id)
                }
                None => {
                    s.current = None;
                    Value::Null
                }
            }
        }
        "prim" => {
            // the countdown marker flips the walk direction
            let entry = if countdown { world.index_last() } else { world.index_first() };
            match entry {
                Some((key, id)) => {
                    s.current = Some(key.to_string());
                    Value::Obj(id)
                }
                None => {
                    s.current = None;
                    Value::Null
                }
            }
        }
        "ult" => match world.index_last() {
            Some((key, id)) => {
                s.current = Some(key.to_string());
                Value::Obj(id)
            }
            None => {
                s.current = None;
                Value::Null
            }
        },
        "depois" => {
            let next = s
                .current
                .as_deref()
                .and_then(|key| world.index_after(key))
                .map(|(k, id)| (k.to_string(), id));
            match next {
                Some((key, id)) => {
                    s.current = Some(key);
                    Value::Obj(id)
                }
                None => {
                    s.current = None;
                    Value::Null
                }
            }
        }
        "nome" => s
            .current
            .as_deref()
            .map_or_else(|| Value::from(""), Value::from),
        "obj" => s
            .current
            .as_deref()
            .and_then(|key| world.index_lookup(key))
            .map_or(Value::Null, Value::Obj),
        _ => return None,
    };
    Some(out)
}
