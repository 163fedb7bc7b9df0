//! Text console handler (`telatxt`).
//!
//! Owns the local input line buffer. The front end feeds raw key codes in
//! through [`TelaTxt::key`]; printable keys accumulate, ENTER emits the
//! buffered line, BACKSPACE drops the last character, and function/arrow
//! keys are ignored as input. Every key press also queues a
//! `{field}_tecla` event for the script.

use std::{cell::RefCell, rc::Rc};

use crate::{
    event::{EventKind, PendingEvent},
    heap::ObjId,
    intern::StringId,
    value::Value,
    world::World,
};

/// Key code for ENTER as delivered by the front end.
pub const KEY_ENTER: i64 = 13;
/// Key code for BACKSPACE.
pub const KEY_BACKSPACE: i64 = 8;
/// Key codes at or above this value are function/arrow keys.
pub const KEY_SPECIAL_BASE: i64 = 0x1_0000;

#[derive(Debug)]
pub struct TelaTxt {
    pub owner: ObjId,
    pub field: StringId,
    pub max_line: i64,
    pub input: String,
    /// Line completed by the last ENTER, until the script picks it up.
    pub entered: Option<String>,
}

impl TelaTxt {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            max_line: 255,
            input: String::new(),
            entered: None,
        }
    }

    /// Applies one key to the input buffer. Returns true when a complete
    /// line was entered.
    pub fn apply_key(&mut self, key: i64) -> bool {
        match key {
            KEY_ENTER => {
                self.entered = Some(std::mem::take(&mut self.input));
                true
            }
            KEY_BACKSPACE => {
                self.input.pop();
                false
            }
            k if k >= KEY_SPECIAL_BASE => false,
            k => {
                if let Some(c) = u32::try_from(k).ok().and_then(char::from_u32) {
                    if !c.is_control() && (self.input.chars().count() as i64) < self.max_line {
                        self.input.push(c);
                    }
                }
                false
            }
        }
    }
}

/// Host-side entry point: feeds a key press and queues the `tecla` event.
pub fn key(state: &Rc<RefCell<TelaTxt>>, world: &World, key: i64) {
    let (owner, field) = {
        let mut s = state.borrow_mut();
        s.apply_key(key);
        (s.owner, s.field)
    };
    let _ = world.queue.sender().send(PendingEvent {
        owner,
        field,
        kind: EventKind::Tecla(key),
    });
}

pub(super) fn op(
    state: &Rc<RefCell<TelaTxt>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "escreva" => {
            let mut text = String::new();
            for arg in args {
                text.push_str(&arg.to_text());
            }
            world.write_text(&text);
            Value::Int(1)
        }
        "escrevaln" => {
            let mut text = String::new();
            for arg in args {
                text.push_str(&arg.to_text());
            }
            text.push('\n');
            world.write_text(&text);
            Value::Int(1)
        }
        "bip" => {
            world.write_text("\u{7}");
            Value::Int(1)
        }
        "limpar" => {
            world.write_text("{clear}");
            Value::Int(1)
        }
        "lendo" => Value::from(state.borrow().input.as_str()),
        "linha" => {
            let taken = state.borrow_mut().entered.take();
            taken.map_or_else(|| Value::from(""), Value::from)
        }
        "colx" => Value::Int(state.borrow().input.chars().count() as i64),
        "maxlin" => {
            let mut s = state.borrow_mut();
            if let Some(v) = args.first() {
                s.max_line = v.to_i64().max(1);
            }
            Value::Int(s.max_line)
        }
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_accumulate_and_enter_emits_line() {
        let mut t = TelaTxt::new(ObjId::NONE, StringId::from_index(0));
        for c in "ola".chars() {
            assert!(!t.apply_key(i64::from(c as u32)));
        }
        assert_eq!(t.input, "ola");
        assert!(t.apply_key(KEY_ENTER));
        assert_eq!(t.entered.as_deref(), Some("ola"));
        assert!(t.input.is_empty());
    }

    #[test]
    fn backspace_drops_and_special_keys_are_ignored() {
        let mut t = TelaTxt::new(ObjId::NONE, StringId::from_index(0));
        t.apply_key(i64::from('a' as u32));
        t.apply_key(i64::from('b' as u32));
        t.apply_key(KEY_BACKSPACE);
        assert_eq!(t.input, "a");
        t.apply_key(KEY_SPECIAL_BASE + 1);
        assert_eq!(t.input, "a");
    }

    #[test]
    fn input_respects_max_line() {
        let mut t = TelaTxt::new(ObjId::NONE, StringId::from_index(0));
        t.max_line = 2;
        for _ in 0..5 {
            t.apply_key(i64::from('x' as u32));
        }
        assert_eq!(t.input, "xx");
    }
}
