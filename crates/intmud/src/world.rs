//! Global interpreter state: registry, object heap, common-variable
//! storage, the indexed-object registry, the event queue, output sink, and
//! the instruction-budget accounting.
//!
//! Everything here is owned by the script thread. The only concurrent
//! touchpoint is the event queue's sender side, handed to background I/O
//! workers.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use log::debug;

use crate::{
    config::Config,
    error::ErrorCode,
    event::EventQueue,
    handlers::Handler,
    heap::{Heap, ObjId, Object},
    intern::{Interns, StringId},
    registry::Registry,
    sink::{StdSink, TextSink},
    unit::{CompiledVariable, VarType},
    value::Value,
    vm,
};

pub struct World {
    pub interns: Interns,
    pub registry: Registry,
    pub heap: Heap,
    /// Common-variable storage, keyed by (defining class, variable name).
    pub commons: AHashMap<(StringId, StringId), Value>,
    /// Classes whose common variables have been initialised (once per
    /// class, on first object creation).
    commons_ready: AHashSet<StringId>,
    /// The process-wide indexed-object registry (`$nome`). Ordered so
    /// first/last walk alphabetically.
    index: BTreeMap<String, ObjId>,
    pub queue: EventQueue,
    pub sink: Box<dyn TextSink>,
    pub config: Config,
    /// Remaining instruction budget of the current top-level invocation.
    pub budget: i64,
    /// Total instructions executed since start (`_progexec`).
    pub instructions_executed: i64,
    /// Most recent runtime error code (`_progerro`).
    pub last_error: ErrorCode,
    /// Set by the `terminar` statement or `_progfim(1)`.
    pub terminate: bool,
    /// The designated main object (`aotick`/`aocomando` receiver).
    pub main_obj: Option<ObjId>,
    /// Output lines queued per session while serving (drained by the
    /// server layer).
    pub session_output: Vec<(u64, String)>,
    /// Session currently being dispatched, for output routing.
    pub current_session: Option<u64>,
}

impl World {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let budget = config.int.exec_budget;
        Self {
            interns: Interns::new(),
            registry: Registry::default(),
            heap: Heap::new(),
            commons: AHashMap::new(),
            commons_ready: AHashSet::new(),
            index: BTreeMap::new(),
            queue: EventQueue::new(),
            sink: Box::new(StdSink::default()),
            config,
            budget,
            instructions_executed: 0,
            last_error: ErrorCode::None,
            terminate: false,
            main_obj: None,
            session_output: Vec::new(),
            current_session: None,
        }
    }

    /// Replaces the class registry wholesale (initial load and reload) and
    /// clears the indexed-object registry.
    pub fn install(&mut self, registry: Registry) {
        self.registry = registry;
        self.index.clear();
    }

    /// Resets the instruction budget for one top-level invocation.
    pub fn reset_budget(&mut self) {
        self.budget = self.config.int.exec_budget;
    }

    /// Routes script output: to the active session when serving, always to
    /// the sink.
    pub fn write_text(&mut self, text: &str) {
        if let Some(session) = self.current_session {
            self.session_output.push((session, text.to_string()));
        }
        self.sink.write_text(text);
    }

    /// Records a runtime error code, charging it to `obj` when live. An
    /// object with a `debug` handler also gets a `{field}_erro` event.
    pub fn note_error(&mut self, code: ErrorCode, obj: ObjId) {
        self.last_error = code;
        if let Some(o) = self.heap.get_mut(obj) {
            o.error_count += 1;
        }
        if let Some(o) = self.heap.get(obj) {
            for (&field, handler) in &o.handlers {
                if matches!(handler, Handler::Debug(_)) {
                    let _ = self.queue.sender().send(crate::event::PendingEvent {
                        owner: obj,
                        field,
                        kind: crate::event::EventKind::Erro(code.as_i64()),
                    });
                }
            }
        }
        if self.config.int.err_mode >= 1 {
            debug!("runtime error {code:?} on object {obj:?}");
        }
    }

    // =====================================================================
    // Indexed objects ($nome)
    // =====================================================================

    /// Registers `obj` under `name`, replacing any previous holder. An
    /// empty name only unregisters.
    pub fn index_register(&mut self, name: &str, obj: ObjId) {
        let key = name.to_ascii_lowercase();
        self.index.retain(|_, v| *v != obj);
        if !key.is_empty() {
            self.index.insert(key, obj);
        }
    }

    pub fn index_unregister(&mut self, obj: ObjId) {
        self.index.retain(|_, v| *v != obj);
    }

    #[must_use]
    pub fn index_lookup(&self, name: &str) -> Option<ObjId> {
        let key = name.to_ascii_lowercase();
        let id = self.index.get(&key).copied()?;
        self.heap.is_live(id).then_some(id)
    }

    /// The name `obj` is registered under, if any.
    #[must_use]
    pub fn index_name_of(&self, obj: ObjId) -> Option<&str> {
        self.index
            .iter()
            .find(|(_, v)| **v == obj)
            .map(|(k, _)| k.as_str())
    }

    /// First/last registered name in alphabetical order.
    #[must_use]
    pub fn index_first(&self) -> Option<(&str, ObjId)> {
        self.index.iter().next().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn index_last(&self) -> Option<(&str, ObjId)> {
        self.index.iter().next_back().map(|(k, v)| (k.as_str(), *v))
    }

    /// Alphabetical successor of `name`.
    #[must_use]
    pub fn index_after(&self, name: &str) -> Option<(&str, ObjId)> {
        use std::ops::Bound;
        let key = name.to_ascii_lowercase();
        self.index
            .range::<String, _>((Bound::Excluded(&key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_str(), *v))
    }

    // =====================================================================
    // Object lifecycle
    // =====================================================================

    /// Creates an object of `class`: allocates it, builds handler
    /// instances, initialises declared fields (common variables once per
    /// class), and returns the handle. The caller is responsible for
    /// invoking `inicializar`.
    pub fn create_object(&mut self, class: StringId) -> Option<ObjId> {
        let unit = std::rc::Rc::clone(self.registry.get(class)?);
        let id = self.heap.alloc(Object::new(std::rc::Rc::clone(&unit)));

        // collect the hierarchy's variables, first occurrence wins
        let mut seen = AHashSet::new();
        let mut vars: Vec<(StringId, CompiledVariable)> = Vec::new();
        for &cls in &unit.linear {
            if let Some(u) = self.registry.get(cls) {
                for (name, var) in &u.vars {
                    if seen.insert(*name) {
                        vars.push((cls, var.clone()));
                    }
                }
            }
        }

        for (defining, var) in vars {
            if let VarType::Handler(kind) = var.var_type {
                let handler = Handler::create(kind, id, var.name);
                if let Some(obj) = self.heap.get_mut(id) {
                    obj.handlers.insert(var.name, handler);
                }
                if let Some(init) = &var.init {
                    let value = vm::run_thunk(self, id, &std::rc::Rc::clone(init), &[]);
                    if let Some(obj) = self.heap.get(id) {
                        if let Some(handler) = obj.handlers.get(&var.name).cloned() {
                            handler.assign(self, value);
                        }
                    }
                }
                continue;
            }

            if var.common {
                if !self.commons_ready.contains(&defining) {
                    let value = self.initial_value(id, &var);
                    self.commons.insert((defining, var.name), value);
                }
                continue;
            }

            let value = self.initial_value(id, &var);
            if let Some(obj) = self.heap.get_mut(id) {
                obj.fields.insert(var.name, value);
            }
        }
        for &cls in &unit.linear {
            self.commons_ready.insert(cls);
        }

        Some(id)
    }

    fn initial_value(&mut self, this: ObjId, var: &CompiledVariable) -> Value {
        let base = match &var.init {
            Some(init) => vm::run_thunk(self, this, &std::rc::Rc::clone(init), &[]),
            None => Value::Null,
        };
        coerce_declared(var, base)
    }

    /// Marks an object for deletion; the sweep at the next safe point
    /// finishes the job.
    pub fn delete_object(&mut self, id: ObjId) {
        self.heap.mark_doomed(id);
    }

    /// Processes pending deletions: unlinks doomed objects, disposes their
    /// handlers, and scrubs registries that point at them.
    pub fn sweep(&mut self) {
        let removed = self.heap.sweep();
        if removed.is_empty() {
            return;
        }
        for obj in &removed {
            for handler in obj.handlers.values() {
                handler.dispose();
            }
        }
        self.index.retain(|_, id| self.heap.is_live(*id));
        if let Some(main) = self.main_obj {
            if !self.heap.is_live(main) {
                self.main_obj = None;
            }
        }
    }
}

/// Applies a declared variable's type and array shape to a value.
#[must_use]
pub fn coerce_declared(var: &CompiledVariable, value: Value) -> Value {
    if var.array > 0 {
        return match value {
            Value::Array(items) => Value::Array(items),
            Value::Null => {
                let default = coerce_scalar(var.var_type, Value::Null);
                Value::Array(vec![default; var.array as usize])
            }
            single => Value::Array(vec![coerce_scalar(var.var_type, single)]),
        };
    }
    coerce_scalar(var.var_type, value)
}

/// Applies a scalar declared type to a value: intN wraps, real widens,
/// txtN truncates to its character capacity.
#[must_use]
pub fn coerce_scalar(ty: VarType, value: Value) -> Value {
    match ty {
        VarType::Int { bits } => Value::Int(wrap_bits(value.to_i64(), bits)),
        VarType::Real => Value::Double(value.to_f64()),
        VarType::Txt { cap } => {
            let text = value.to_text();
            let cap = cap as usize;
            if text.chars().count() <= cap {
                Value::Str(text)
            } else {
                let cut: String = text.chars().take(cap).collect();
                Value::from(cut)
            }
        }
        VarType::Ref => match value {
            Value::Obj(_) | Value::Handler(_) | Value::Null => value,
            _ => Value::Null,
        },
        VarType::Handler(_) => value,
    }
}

/// Wraps to N-bit two's complement. `int1` stays 0/1 rather than 0/-1.
#[must_use]
pub fn wrap_bits(v: i64, bits: u8) -> i64 {
    match bits {
        0 => 0,
        1 => v & 1,
        64.. => v,
        _ => {
            let mask = (1i64 << bits) - 1;
            let m = v & mask;
            if m & (1i64 << (bits - 1)) != 0 {
                m - (1i64 << bits)
            } else {
                m
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_bits_is_twos_complement() {
        assert_eq!(wrap_bits(255, 8), -1);
        assert_eq!(wrap_bits(127, 8), 127);
        assert_eq!(wrap_bits(128, 8), -128);
        assert_eq!(wrap_bits(3, 1), 1);
        assert_eq!(wrap_bits(2, 1), 0);
        assert_eq!(wrap_bits(i64::MIN, 64), i64::MIN);
        assert_eq!(wrap_bits(70000, 16), 4464);
    }

    #[test]
    fn txt_coercion_truncates_by_characters() {
        let v = coerce_scalar(VarType::Txt { cap: 3 }, Value::from("Olá, Mundo"));
        assert_eq!(&*v.to_text(), "Olá");
    }
}
