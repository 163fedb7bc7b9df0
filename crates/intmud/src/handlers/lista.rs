//! Ordered object lists (`listaobj`) and their cursors (`listaitem`).
//!
//! A cursor registers itself with the list it points into and is updated
//! in place by list mutations: insertions shift it, deleting the element
//! under it invalidates it, clearing the list invalidates every cursor.
//! Both directions of the link are weak with respect to object lifetimes —
//! lists hold `ObjId`s, which stop resolving when the object dies.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use rand::seq::SliceRandom;

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

use super::Handler;

#[derive(Debug)]
pub struct ListaObj {
    pub owner: ObjId,
    pub field: StringId,
    pub items: Vec<ObjId>,
    cursors: Vec<Weak<RefCell<ListaItem>>>,
}

impl ListaObj {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            items: Vec::new(),
            cursors: Vec::new(),
        }
    }

    fn register_cursor(&mut self, cursor: &Rc<RefCell<ListaItem>>) {
        self.cursors.retain(|w| w.strong_count() > 0);
        self.cursors.push(Rc::downgrade(cursor));
    }

    fn each_cursor(&mut self, mut apply: impl FnMut(&mut ListaItem)) {
        self.cursors.retain(|weak| {
            if let Some(cursor) = weak.upgrade() {
                apply(&mut cursor.borrow_mut());
                true
            } else {
                false
            }
        });
    }

    pub fn insert(&mut self, at: usize, obj: ObjId) {
        let at = at.min(self.items.len());
        self.items.insert(at, obj);
        self.each_cursor(|c| {
            if let Some(pos) = c.pos {
                if pos >= at {
                    c.pos = Some(pos + 1);
                }
            }
        });
    }

    pub fn remove_at(&mut self, at: usize) -> Option<ObjId> {
        if at >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(at);
        self.each_cursor(|c| match c.pos {
            Some(pos) if pos == at => c.pos = None,
            Some(pos) if pos > at => c.pos = Some(pos - 1),
            _ => {}
        });
        Some(removed)
    }

    /// Removes every occurrence of `obj`.
    pub fn remove_all(&mut self, obj: ObjId) {
        loop {
            let Some(at) = self.items.iter().position(|&o| o == obj) else {
                break;
            };
            self.remove_at(at);
        }
    }

    /// Keeps the first occurrence of each distinct element, in order.
    pub fn dedupe(&mut self) {
        let mut seen = Vec::new();
        let mut at = 0;
        while at < self.items.len() {
            let obj = self.items[at];
            if seen.contains(&obj) {
                self.remove_at(at);
            } else {
                seen.push(obj);
                at += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.each_cursor(|c| c.pos = None);
    }
}

#[derive(Debug)]
pub struct ListaItem {
    pub owner: ObjId,
    pub field: StringId,
    lista: Weak<RefCell<ListaObj>>,
    pos: Option<usize>,
}

impl ListaItem {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            lista: Weak::new(),
            pos: None,
        }
    }
}

fn as_obj(value: Option<&Value>) -> Option<ObjId> {
    match value {
        Some(Value::Obj(id)) => Some(*id),
        _ => None,
    }
}

pub(super) fn obj_op(
    state: &Rc<RefCell<ListaObj>>,
    _world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "total" => Value::Int(s.items.len() as i64),
        "prim" => s.items.first().map_or(Value::Null, |&o| Value::Obj(o)),
        "ult" => s.items.last().map_or(Value::Null, |&o| Value::Obj(o)),
        "addini" | "addfim" | "addiniuma" | "addfimuma" => {
            let Some(obj) = as_obj(args.first()) else {
                return Some(Value::Int(0));
            };
            if name.ends_with("uma") && s.items.contains(&obj) {
                return Some(Value::Int(0));
            }
            if name.starts_with("addini") {
                s.insert(0, obj);
            } else {
                let end = s.items.len();
                s.insert(end, obj);
            }
            Value::Int(1)
        }
        "addpos" => {
            let at = args.first().map_or(0, Value::to_i64).max(0);
            let Some(obj) = as_obj(args.get(1)) else {
                return Some(Value::Int(0));
            };
            s.insert(usize::try_from(at).unwrap_or(usize::MAX), obj);
            Value::Int(1)
        }
        "rempos" => {
            let at = args.first().map_or(-1, Value::to_i64);
            let removed = usize::try_from(at).ok().and_then(|at| s.remove_at(at));
            removed.map_or(Value::Null, Value::Obj)
        }
        "remover" => {
            let Some(obj) = as_obj(args.first()) else {
                return Some(Value::Int(0));
            };
            s.remove_all(obj);
            Value::Int(1)
        }
        "remduplo" => {
            s.dedupe();
            Value::Int(s.items.len() as i64)
        }
        "limpar" => {
            s.clear();
            Value::Int(1)
        }
        "tem" => {
            let has = as_obj(args.first()).is_some_and(|obj| s.items.contains(&obj));
            Value::Int(i64::from(has))
        }
        "embaralhar" => {
            s.items.shuffle(&mut rand::thread_rng());
            Value::Int(1)
        }
        "inverter" => {
            s.items.reverse();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

pub(super) fn item_op(
    state: &Rc<RefCell<ListaItem>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    match name {
        "ir" => {
            // attach to a listaobj handler, optionally at a position
            let lista = match args.first() {
                Some(value) => match super::resolve_handler(world, value) {
                    Some(Handler::ListaObj(l)) => l,
                    _ => return Some(Value::Int(0)),
                },
                None => return Some(Value::Int(0)),
            };
            let at = args.get(1).map_or(0, Value::to_i64).max(0);
            lista.borrow_mut().register_cursor(state);
            let len = lista.borrow().items.len();
            let mut s = state.borrow_mut();
            s.lista = Rc::downgrade(&lista);
            let at = usize::try_from(at).unwrap_or(usize::MAX);
            s.pos = (at < len).then_some(at);
            Some(Value::Int(i64::from(s.pos.is_some())))
        }
        "obj" => {
            let s = state.borrow();
            let lista = s.lista.upgrade()?;
            let out = s
                .pos
                .and_then(|pos| lista.borrow().items.get(pos).copied())
                .map_or(Value::Null, Value::Obj);
            Some(out)
        }
        "pos" => {
            let s = state.borrow();
            Some(Value::Int(s.pos.map_or(0, |p| p as i64 + 1)))
        }
        "prim" | "ult" => {
            let mut s = state.borrow_mut();
            let Some(lista) = s.lista.upgrade() else {
                return Some(Value::Int(0));
            };
            let len = lista.borrow().items.len();
            s.pos = if len == 0 {
                None
            } else if name == "prim" {
                Some(0)
            } else {
                Some(len - 1)
            };
            Some(Value::Int(i64::from(s.pos.is_some())))
        }
        "depois" | "antes" => {
            let mut s = state.borrow_mut();
            let Some(lista) = s.lista.upgrade() else {
                return Some(Value::Int(0));
            };
            let len = lista.borrow().items.len();
            s.pos = match (name, s.pos) {
                ("depois", Some(pos)) if pos + 1 < len => Some(pos + 1),
                ("antes", Some(pos)) if pos > 0 => Some(pos - 1),
                _ => None,
            };
            Some(Value::Int(i64::from(s.pos.is_some())))
        }
        "addantes" | "adddepois" | "addantesuma" | "adddepoisuma" => {
            let Some(obj) = as_obj(args.first()) else {
                return Some(Value::Int(0));
            };
            let (lista, pos) = {
                let s = state.borrow();
                (s.lista.upgrade()?, s.pos?)
            };
            let mut l = lista.borrow_mut();
            if name.ends_with("uma") && l.items.contains(&obj) {
                return Some(Value::Int(0));
            }
            let at = if name.starts_with("addantes") { pos } else { pos + 1 };
            l.insert(at, obj);
            Some(Value::Int(1))
        }
        "remover" | "remantes" | "remdepois" => {
            let (lista, pos) = {
                let s = state.borrow();
                (s.lista.upgrade()?, s.pos?)
            };
            let mut l = lista.borrow_mut();
            let removed = match name {
                "remover" => l.remove_at(pos),
                "remantes" => {
                    if pos == 0 {
                        None
                    } else {
                        l.remove_at(pos - 1)
                    }
                }
                _ => l.remove_at(pos + 1),
            };
            Some(removed.map_or(Value::Null, Value::Obj))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_id(n: u32) -> ObjId {
        // fabricate distinct ids through a private heap
        use crate::{heap::{Heap, Object}, intern::Interns, unit::CompiledUnit};
        use indexmap::IndexMap;
        let mut interns = Interns::new();
        let id = interns.name("x");
        let unit = Rc::new(CompiledUnit {
            name: id,
            display_name: Rc::from("x"),
            bases: vec![],
            linear: vec![id],
            vars: IndexMap::new(),
            consts: IndexMap::new(),
            funcs: IndexMap::new(),
            file: Rc::from("t"),
            line: 1,
        });
        let mut heap = Heap::new();
        let mut last = None;
        for _ in 0..=n {
            last = Some(heap.alloc(Object::new(Rc::clone(&unit))));
        }
        last.unwrap()
    }

    #[test]
    fn dedupe_keeps_first_occurrences_in_order() {
        let (a, b, c, d) = (raw_id(0), raw_id(1), raw_id(2), raw_id(3));
        let mut lista = ListaObj::new(ObjId::NONE, StringId::from_index(0));
        lista.items = vec![a, b, a, c, b, d, a];
        lista.dedupe();
        assert_eq!(lista.items, vec![a, b, c, d]);
    }

    #[test]
    fn cursor_tracks_insertions_and_removals() {
        let (a, b, c) = (raw_id(0), raw_id(1), raw_id(2));
        let lista = Rc::new(RefCell::new(ListaObj::new(ObjId::NONE, StringId::from_index(0))));
        lista.borrow_mut().items = vec![a, b];

        let cursor = Rc::new(RefCell::new(ListaItem::new(ObjId::NONE, StringId::from_index(1))));
        lista.borrow_mut().register_cursor(&cursor);
        cursor.borrow_mut().lista = Rc::downgrade(&lista);
        cursor.borrow_mut().pos = Some(1); // pointing at b

        lista.borrow_mut().insert(0, c); // [c, a, b]
        assert_eq!(cursor.borrow().pos, Some(2));

        lista.borrow_mut().remove_at(0); // [a, b]
        assert_eq!(cursor.borrow().pos, Some(1));

        lista.borrow_mut().remove_at(1); // removing the element under it
        assert_eq!(cursor.borrow().pos, None);
    }

    #[test]
    fn clear_invalidates_cursors() {
        let a = raw_id(0);
        let lista = Rc::new(RefCell::new(ListaObj::new(ObjId::NONE, StringId::from_index(0))));
        lista.borrow_mut().items = vec![a];
        let cursor = Rc::new(RefCell::new(ListaItem::new(ObjId::NONE, StringId::from_index(1))));
        lista.borrow_mut().register_cursor(&cursor);
        cursor.borrow_mut().pos = Some(0);
        lista.borrow_mut().clear();
        assert_eq!(cursor.borrow().pos, None);
    }
}
