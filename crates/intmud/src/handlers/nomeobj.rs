//! Natural-language object matcher (`nomeobj`).
//!
//! Holds a pattern of the form `[count[.start]] words` — e.g. `2 espada
//! longa` is "the second object whose display name contains both words".
//! Objects are tested one at a time: every test that matches all words
//! increments the match counter; the object that lands in the requested
//! count/start window is bound as the current match.

use std::{cell::RefCell, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

#[derive(Debug)]
pub struct NomeObj {
    pub owner: ObjId,
    pub field: StringId,
    /// Lowercased words, all of which must appear in the candidate name.
    pub words: Vec<String>,
    /// How many matches are wanted (0 = every match binds).
    pub count: u32,
    /// 1-based ordinal of the first wanted match.
    pub start: u32,
    /// Matches seen so far.
    pub seen: u32,
    /// Currently bound match.
    pub matched: Option<ObjId>,
}

impl NomeObj {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            words: Vec::new(),
            count: 0,
            start: 1,
            seen: 0,
            matched: None,
        }
    }

    /// Parses `[count[.start]] words`; resets the counters.
    pub fn set_pattern(&mut self, pattern: &str) {
        self.words.clear();
        self.count = 0;
        self.start = 1;
        self.seen = 0;
        self.matched = None;

        let mut parts = pattern.split_whitespace().peekable();
        if let Some(first) = parts.peek() {
            let mut nums = first.splitn(2, '.');
            let head = nums.next().unwrap_or("");
            if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
                self.count = head.parse().unwrap_or(0);
                if let Some(start) = nums.next() {
                    if let Ok(s) = start.parse::<u32>() {
                        self.start = s.max(1);
                    }
                } else {
                    // `2 espada` means: the second match
                    self.start = self.count.max(1);
                    self.count = 1;
                }
                parts.next();
            }
        }
        self.words.extend(parts.map(str::to_lowercase));
    }

    /// Tests whether `name` contains every pattern word.
    fn name_matches(&self, name: &str) -> bool {
        if self.words.is_empty() {
            return false;
        }
        let lowered = name.to_lowercase();
        self.words.iter().all(|w| lowered.contains(w.as_str()))
    }

    /// Feeds one candidate; returns true when it was bound.
    pub fn test(&mut self, obj: ObjId, display_name: &str) -> bool {
        if !self.name_matches(display_name) {
            return false;
        }
        self.seen += 1;
        let wanted = if self.count == 0 {
            true
        } else {
            self.seen >= self.start && self.seen < self.start + self.count
        };
        if wanted {
            self.matched = Some(obj);
        }
        wanted
    }
}

/// Display name: the object's `nome` field when it holds text, falling
/// back to the class name.
fn display_name(world: &World, obj: ObjId) -> String {
    let Some(o) = world.heap.get(obj) else {
        return String::new();
    };
    let nome = world.interns.get_name("nome");
    if let Some(id) = nome {
        if let Some(Value::Str(s)) = o.fields.get(&id) {
            if !s.is_empty() {
                return s.to_string();
            }
        }
    }
    o.unit.display_name.to_string()
}

pub(super) fn op(
    state: &Rc<RefCell<NomeObj>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "mudar" => {
            let pattern = args.first().map(Value::to_text).unwrap_or_default();
            state.borrow_mut().set_pattern(&pattern);
            Value::Int(state.borrow().words.len() as i64)
        }
        "testar" => {
            let Some(Value::Obj(obj)) = args.first() else {
                return Some(Value::Int(0));
            };
            let display = display_name(world, *obj);
            Value::Int(i64::from(state.borrow_mut().test(*obj, &display)))
        }
        "obj" => state.borrow().matched.map_or(Value::Null, Value::Obj),
        "total" => Value::Int(i64::from(state.borrow().seen)),
        "limpar" => {
            let mut s = state.borrow_mut();
            s.seen = 0;
            s.matched = None;
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
    fn plain_words_bind_every_match() {
        let mut n = NomeObj::new(ObjId::NONE, StringId::from_index(0));
        n.set_pattern("espada longa");
        assert!(n.test(ObjId::NONE, "Espada Longa de Prata"));
        assert!(!n.test(ObjId::NONE, "espada curta"));
        assert_eq!(n.seen, 1);
    }

    #[test]
    fn ordinal_selects_the_nth_match() {
        let mut n = NomeObj::new(ObjId::NONE, StringId::from_index(0));
        n.set_pattern("2 maçã");
        assert!(!n.test(ObjId::NONE, "maçã verde"));
        assert!(n.test(ObjId::NONE, "maçã vermelha"));
        assert_eq!(n.seen, 2);
    }

    #[test]
    fn count_dot_start_window() {
        let mut n = NomeObj::new(ObjId::NONE, StringId::from_index(0));
        n.set_pattern("2.2 moeda");
        assert!(!n.test(ObjId::NONE, "moeda"));
        assert!(n.test(ObjId::NONE, "moeda"));
        assert!(n.test(ObjId::NONE, "moeda"));
        assert!(!n.test(ObjId::NONE, "moeda"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let mut n = NomeObj::new(ObjId::NONE, StringId::from_index(0));
        n.set_pattern("");
        assert!(!n.test(ObjId::NONE, "qualquer"));
    }
}
