//! Decisecond timers: `inttempo` (countdown), `intexec` (edge trigger),
//! `intinc` (incrementing counter).
//!
//! The scheduler ticks these once per decisecond batch; the handlers only
//! hold state and edge flags. Value semantics for `inttempo`: negative is
//! stopped, a tick that reaches or crosses zero clamps to zero and fires
//! `{field}_exec` exactly once.

use std::{cell::RefCell, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value};

#[derive(Debug)]
pub struct IntTempo {
    pub owner: ObjId,
    pub field: StringId,
    pub value: i64,
}

impl IntTempo {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            value: -1,
        }
    }

    /// Applies `elapsed` deciseconds. Returns true when the timer fired.
    pub fn tick(&mut self, elapsed: i64) -> bool {
        if self.value <= 0 {
            return false;
        }
        self.value -= elapsed;
        if self.value <= 0 {
            self.value = 0;
            return true;
        }
        false
    }
}

pub(super) fn tempo_op(state: &Rc<RefCell<IntTempo>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    match name {
        "valor" => {
            if let Some(v) = args.first() {
                s.value = v.to_i64();
            }
            Some(Value::Int(s.value))
        }
        "parar" => {
            s.value = -1;
            Some(Value::Int(1))
        }
        _ => None,
    }
}

/// Edge trigger: assigning non-zero over zero marks it pending; the
/// scheduler fires `{field}_exec` once and resets the value to zero.
#[derive(Debug)]
pub struct IntExec {
    pub owner: ObjId,
    pub field: StringId,
    pub value: i64,
    pub pending: bool,
}

impl IntExec {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            value: 0,
            pending: false,
        }
    }

    pub fn assign(&mut self, value: i64) {
        if self.value == 0 && value != 0 {
            self.pending = true;
        }
        self.value = value;
    }

    /// Consumes a pending edge, resetting the value.
    pub fn take_fire(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            self.value = 0;
            true
        } else {
            false
        }
    }
}

pub(super) fn exec_op(state: &Rc<RefCell<IntExec>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    match name {
        "valor" => {
            if let Some(v) = args.first() {
                let v = v.to_i64();
                s.assign(v);
            }
            Some(Value::Int(s.value))
        }
        _ => None,
    }
}

/// Counts deciseconds upward; read back as seconds.
#[derive(Debug)]
pub struct IntInc {
    pub owner: ObjId,
    pub field: StringId,
    pub decis: i64,
}

impl IntInc {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            decis: 0,
        }
    }

    #[must_use]
    pub fn seconds(&self) -> f64 {
        self.decis as f64 / 10.0
    }

    pub fn set_seconds(&mut self, seconds: f64) {
        self.decis = (seconds * 10.0) as i64;
    }

    pub fn tick(&mut self, elapsed: i64) {
        self.decis = self.decis.saturating_add(elapsed);
    }
}

pub(super) fn inc_op(state: &Rc<RefCell<IntInc>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    match name {
        "valor" => {
            if let Some(v) = args.first() {
                s.set_seconds(v.to_f64());
            }
            Some(Value::Double(s.seconds()))
        }
        "reiniciar" => {
            s.decis = 0;
            Some(Value::Int(1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_fires_exactly_once_on_crossing_zero() {
        let mut t = IntTempo::new(ObjId::NONE, StringId::from_index(0));
        t.value = 30;
        let mut fires = 0;
        for _ in 0..29 {
            if t.tick(1) {
                fires += 1;
            }
        }
        assert_eq!(fires, 0);
        assert!(t.tick(1));
        assert_eq!(t.value, 0);
        // zero stays put, no re-fire
        assert!(!t.tick(1));
        assert_eq!(t.value, 0);
    }

    #[test]
    fn negative_timer_is_stopped() {
        let mut t = IntTempo::new(ObjId::NONE, StringId::from_index(0));
        assert_eq!(t.value, -1);
        assert!(!t.tick(5));
        assert_eq!(t.value, -1);
    }

    #[test]
    fn tempo_crossing_fires_once_with_large_elapsed() {
        let mut t = IntTempo::new(ObjId::NONE, StringId::from_index(0));
        t.value = 3;
        assert!(t.tick(10));
        assert_eq!(t.value, 0);
    }

    #[test]
    fn exec_edge_fires_once() {
        let mut e = IntExec::new(ObjId::NONE, StringId::from_index(0));
        e.assign(5);
        assert!(e.take_fire());
        assert_eq!(e.value, 0);
        assert!(!e.take_fire());
        // zero → zero is not an edge
        e.assign(0);
        assert!(!e.take_fire());
        // non-zero over non-zero is not an edge either
        e.assign(3);
        assert!(e.take_fire());
        e.value = 7;
        e.assign(9);
        assert!(!e.take_fire());
    }

    #[test]
    fn inc_counts_in_seconds() {
        let mut c = IntInc::new(ObjId::NONE, StringId::from_index(0));
        c.tick(25);
        assert!((c.seconds() - 2.5).abs() < 1e-9);
        c.set_seconds(0.0);
        assert_eq!(c.decis, 0);
    }
}
