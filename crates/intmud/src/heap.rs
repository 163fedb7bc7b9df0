//! Object arena with generation-counted handles and per-class chains.
//!
//! Script objects form arbitrary graphs (ref fields, object lists), so they
//! live in an index-addressed arena rather than behind reference counting.
//! An [`ObjId`] is an index plus a generation; a stale handle to a deleted
//! slot simply stops resolving, which is how every cursor and list entry
//! detects invalidation.
//!
//! Deletion is two-phase: `apagar` marks the object doomed, and the
//! scheduler sweeps doomed objects at safe points (between top-level
//! invocations), unlinking them from their class chain and returning them
//! for handler disposal.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    handlers::Handler, intern::StringId, unit::CompiledUnit, value::Value,
};
use std::rc::Rc;

/// Handle to a script object: arena index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId {
    index: u32,
    generation: u32,
}

impl ObjId {
    /// A handle that never resolves; useful as a placeholder receiver.
    pub const NONE: Self = Self {
        index: u32::MAX,
        generation: 0,
    };
}

/// A live script object.
#[derive(Debug)]
pub struct Object {
    /// Most-derived compiled class.
    pub unit: Rc<CompiledUnit>,
    /// Per-instance scalar/array fields (common variables live on the
    /// world's per-class storage instead).
    pub fields: AHashMap<StringId, Value>,
    /// Handler instances, keyed by declaring field name. Insertion order
    /// follows declaration order, which disposal relies on.
    pub handlers: IndexMap<StringId, Handler>,
    /// Class-chain links (exact class, not bases).
    pub prev: Option<ObjId>,
    pub next: Option<ObjId>,
    /// Marked for deletion; swept at the next safe point.
    pub doomed: bool,
    /// Runtime lookup misses charged to this object.
    pub error_count: u32,
}

impl Object {
    #[must_use]
    pub fn new(unit: Rc<CompiledUnit>) -> Self {
        Self {
            unit,
            fields: AHashMap::new(),
            handlers: IndexMap::new(),
            prev: None,
            next: None,
            doomed: false,
            error_count: 0,
        }
    }
}

/// Head/tail/count of one class's live-object chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chain {
    pub first: Option<ObjId>,
    pub last: Option<ObjId>,
    pub count: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    obj: Option<Object>,
}

/// The object arena.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    chains: AHashMap<StringId, Chain>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an object and links it at the tail of its class chain.
    pub fn alloc(&mut self, obj: Object) -> ObjId {
        let class = obj.unit.name;
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].obj = Some(obj);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("heap index overflow");
                self.slots.push(Slot {
                    generation: 0,
                    obj: Some(obj),
                });
                index
            }
        };
        let id = ObjId {
            index,
            generation: self.slots[index as usize].generation,
        };

        let chain = self.chains.entry(class).or_default();
        let old_last = chain.last;
        chain.last = Some(id);
        chain.count += 1;
        if chain.first.is_none() {
            chain.first = Some(id);
        }
        if let Some(prev_id) = old_last {
            self.get_mut(id).expect("just allocated").prev = Some(prev_id);
            self.get_mut(prev_id).expect("chain tail is live").next = Some(id);
        }
        id
    }

    /// Resolves a handle; stale or doomed handles yield `None`.
    #[must_use]
    pub fn get(&self, id: ObjId) -> Option<&Object> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.obj.as_ref().filter(|o| !o.doomed)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut Object> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.obj.as_mut().filter(|o| !o.doomed)
    }

    #[must_use]
    pub fn is_live(&self, id: ObjId) -> bool {
        self.get(id).is_some()
    }

    /// Marks an object for deletion. It disappears from lookups at once
    /// but stays linked until [`Heap::sweep`] runs.
    pub fn mark_doomed(&mut self, id: ObjId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation == id.generation {
            if let Some(obj) = slot.obj.as_mut() {
                obj.doomed = true;
            }
        }
    }

    /// Unlinks and removes every doomed object, returning them so the
    /// caller can dispose their handlers.
    pub fn sweep(&mut self) -> Vec<Object> {
        let doomed: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.obj.as_ref().is_some_and(|o| o.doomed))
            .map(|(i, _)| u32::try_from(i).expect("heap index fits u32"))
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for index in doomed {
            let generation = self.slots[index as usize].generation;
            let id = ObjId { index, generation };
            let obj = self.slots[index as usize]
                .obj
                .take()
                .expect("doomed slot holds an object");
            self.unlink(id, &obj);
            self.slots[index as usize].generation = generation.wrapping_add(1);
            self.free.push(index);
            removed.push(obj);
        }
        removed
    }

    fn unlink(&mut self, id: ObjId, obj: &Object) {
        let class = obj.unit.name;
        if let Some(prev) = obj.prev {
            if let Some(slot) = self.slots.get_mut(prev.index as usize) {
                if let Some(p) = slot.obj.as_mut() {
                    p.next = obj.next;
                }
            }
        }
        if let Some(next) = obj.next {
            if let Some(slot) = self.slots.get_mut(next.index as usize) {
                if let Some(n) = slot.obj.as_mut() {
                    n.prev = obj.prev;
                }
            }
        }
        if let Some(chain) = self.chains.get_mut(&class) {
            if chain.first == Some(id) {
                chain.first = obj.next;
            }
            if chain.last == Some(id) {
                chain.last = obj.prev;
            }
            chain.count = chain.count.saturating_sub(1);
        }
    }

    /// Chain info for a class (empty when no object was ever created).
    #[must_use]
    pub fn chain(&self, class: StringId) -> Chain {
        self.chains.get(&class).copied().unwrap_or_default()
    }

    /// All live object ids, in arena order.
    #[must_use]
    pub fn live_ids(&self) -> Vec<ObjId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let obj = s.obj.as_ref()?;
                if obj.doomed {
                    return None;
                }
                Some(ObjId {
                    index: u32::try_from(i).expect("heap index fits u32"),
                    generation: s.generation,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;
    use indexmap::IndexMap as IMap;

    fn dummy_unit(interns: &mut Interns, name: &str) -> Rc<CompiledUnit> {
        let id = interns.name(name);
        Rc::new(CompiledUnit {
            name: id,
            display_name: Rc::from(name),
            bases: vec![],
            linear: vec![id],
            vars: IMap::new(),
            consts: IMap::new(),
            funcs: IMap::new(),
            file: Rc::from("test.int"),
            line: 1,
        })
    }

    #[test]
    fn chain_links_in_creation_order() {
        let mut interns = Interns::new();
        let unit = dummy_unit(&mut interns, "sala");
        let mut heap = Heap::new();
        let a = heap.alloc(Object::new(Rc::clone(&unit)));
        let b = heap.alloc(Object::new(Rc::clone(&unit)));
        let c = heap.alloc(Object::new(Rc::clone(&unit)));

        let chain = heap.chain(unit.name);
        assert_eq!(chain.first, Some(a));
        assert_eq!(chain.last, Some(c));
        assert_eq!(chain.count, 3);
        assert_eq!(heap.get(a).unwrap().next, Some(b));
        assert_eq!(heap.get(b).unwrap().prev, Some(a));
        assert_eq!(heap.get(b).unwrap().next, Some(c));
    }

    #[test]
    fn doomed_objects_vanish_then_sweep_unlinks() {
        let mut interns = Interns::new();
        let unit = dummy_unit(&mut interns, "sala");
        let mut heap = Heap::new();
        let a = heap.alloc(Object::new(Rc::clone(&unit)));
        let b = heap.alloc(Object::new(Rc::clone(&unit)));
        let c = heap.alloc(Object::new(Rc::clone(&unit)));

        heap.mark_doomed(b);
        assert!(heap.get(b).is_none());
        // chain still holds it until the sweep
        assert_eq!(heap.chain(unit.name).count, 3);

        let removed = heap.sweep();
        assert_eq!(removed.len(), 1);
        let chain = heap.chain(unit.name);
        assert_eq!(chain.count, 2);
        assert_eq!(heap.get(a).unwrap().next, Some(c));
        assert_eq!(heap.get(c).unwrap().prev, Some(a));
    }

    #[test]
    fn stale_handles_do_not_resolve_after_reuse() {
        let mut interns = Interns::new();
        let unit = dummy_unit(&mut interns, "sala");
        let mut heap = Heap::new();
        let a = heap.alloc(Object::new(Rc::clone(&unit)));
        heap.mark_doomed(a);
        heap.sweep();
        let b = heap.alloc(Object::new(Rc::clone(&unit)));
        // slot reused with a bumped generation
        assert!(heap.get(a).is_none());
        assert!(heap.get(b).is_some());
        assert_ne!(a, b);
    }
}
