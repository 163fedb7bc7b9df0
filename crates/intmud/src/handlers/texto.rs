//! Multi-line text container (`textotxt`) and its cursor (`textopos`).
//!
//! A cursor holds a weak link to its container plus a clear epoch: the
//! container bumps the epoch on `limpar`, which invalidates every
//! dependent cursor at once. Line insertions and removals adjust attached
//! cursors in place.

use std::{
    cell::RefCell,
    fs,
    rc::{Rc, Weak},
};

use rand::seq::SliceRandom;

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

use super::Handler;

#[derive(Debug)]
pub struct TextoTxt {
    pub owner: ObjId,
    pub field: StringId,
    pub lines: Vec<String>,
    /// Bumped on clear; cursors holding an older epoch are invalid.
    pub epoch: u64,
    cursors: Vec<Weak<RefCell<TextoPos>>>,
}

impl TextoTxt {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            lines: Vec::new(),
            epoch: 0,
            cursors: Vec::new(),
        }
    }

    fn register_cursor(&mut self, cursor: &Rc<RefCell<TextoPos>>) {
        self.cursors.retain(|w| w.strong_count() > 0);
        self.cursors.push(Rc::downgrade(cursor));
    }

    fn each_cursor(&mut self, mut apply: impl FnMut(&mut TextoPos)) {
        self.cursors.retain(|weak| {
            if let Some(cursor) = weak.upgrade() {
                apply(&mut cursor.borrow_mut());
                true
            } else {
                false
            }
        });
    }

    pub fn insert(&mut self, at: usize, text: String) {
        let at = at.min(self.lines.len());
        self.lines.insert(at, text);
        self.each_cursor(|c| {
            if c.line >= at {
                c.line += 1;
            }
        });
    }

    pub fn remove(&mut self, at: usize, count: usize) {
        if at >= self.lines.len() || count == 0 {
            return;
        }
        let end = (at + count).min(self.lines.len());
        self.lines.drain(at..end);
        let removed = end - at;
        self.each_cursor(|c| {
            if c.line >= end {
                c.line -= removed;
            } else if c.line >= at {
                c.line = at;
            }
        });
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.epoch += 1;
        let epoch = self.epoch;
        self.each_cursor(|c| {
            c.epoch = epoch.wrapping_sub(1); // leave them stale
            c.line = 0;
        });
    }

    #[must_use]
    pub fn byte_count(&self) -> usize {
        let newlines = self.lines.len();
        self.lines.iter().map(String::len).sum::<usize>() + newlines
    }
}

pub(super) fn txt_op(state: &Rc<RefCell<TextoTxt>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let arg_line = || args.first().map_or(0, Value::to_i64);
    let out = match name {
        "total" => Value::Int(s.lines.len() as i64),
        "bytes" => Value::Int(s.byte_count() as i64),
        "lin" => {
            let n = usize::try_from(arg_line().max(1) - 1).unwrap_or(usize::MAX);
            s.lines.get(n).map_or(Value::Null, |l| Value::from(l.as_str()))
        }
        "mudalin" => {
            let n = usize::try_from(arg_line().max(1) - 1).unwrap_or(usize::MAX);
            let text = args.get(1).map(Value::to_text).unwrap_or_default();
            if let Some(line) = s.lines.get_mut(n) {
                *line = text.to_string();
                Value::Int(1)
            } else {
                Value::Int(0)
            }
        }
        "addfim" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            let end = s.lines.len();
            s.insert(end, text.to_string());
            Value::Int(1)
        }
        "addini" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            s.insert(0, text.to_string());
            Value::Int(1)
        }
        "addlin" => {
            let n = usize::try_from(arg_line().max(1) - 1).unwrap_or(usize::MAX);
            let text = args.get(1).map(Value::to_text).unwrap_or_default();
            s.insert(n, text.to_string());
            Value::Int(1)
        }
        "remlin" => {
            let n = usize::try_from(arg_line().max(1) - 1).unwrap_or(usize::MAX);
            let count = args.get(1).map_or(1, Value::to_i64).max(1);
            s.remove(n, usize::try_from(count).unwrap_or(1));
            Value::Int(1)
        }
        "limpar" => {
            s.clear();
            Value::Int(1)
        }
        "ler" => {
            let path = args.first().map(Value::to_text).unwrap_or_default();
            match fs::read_to_string(&*path) {
                Ok(text) => {
                    s.clear();
                    s.lines = text.lines().map(str::to_string).collect();
                    Value::Int(1)
                }
                Err(_) => Value::Int(0),
            }
        }
        "gravar" => {
            let path = args.first().map(Value::to_text).unwrap_or_default();
            let mut text = s.lines.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            Value::Int(i64::from(fs::write(&*path, text).is_ok()))
        }
        "embaralhar" => {
            s.lines.shuffle(&mut rand::thread_rng());
            Value::Int(1)
        }
        "ordenar" => {
            s.lines.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

/// Cursor into a `TextoTxt`, addressed by line (0-based internally,
/// 1-based in scripts).
#[derive(Debug)]
pub struct TextoPos {
    pub owner: ObjId,
    pub field: StringId,
    texto: Weak<RefCell<TextoTxt>>,
    pub line: usize,
    pub epoch: u64,
}

impl TextoPos {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            texto: Weak::new(),
            line: 0,
            epoch: 0,
        }
    }

    fn container(&self) -> Option<Rc<RefCell<TextoTxt>>> {
        let texto = self.texto.upgrade()?;
        let ok = texto.borrow().epoch == self.epoch;
        ok.then_some(texto)
    }

    /// 1-based valid line number, 0 when invalid or past the end.
    fn line_no(&self) -> i64 {
        match self.container() {
            Some(texto) if self.line < texto.borrow().lines.len() => self.line as i64 + 1,
            _ => 0,
        }
    }
}

pub(super) fn pos_op(
    state: &Rc<RefCell<TextoPos>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    match name {
        "ir" => {
            let texto = match args.first() {
                Some(value) => match super::resolve_handler(world, value) {
                    Some(Handler::TextoTxt(t)) => t,
                    _ => return Some(Value::Int(0)),
                },
                None => return Some(Value::Int(0)),
            };
            let line = args.get(1).map_or(1, Value::to_i64).max(1) - 1;
            texto.borrow_mut().register_cursor(state);
            let mut s = state.borrow_mut();
            s.epoch = texto.borrow().epoch;
            s.texto = Rc::downgrade(&texto);
            s.line = usize::try_from(line).unwrap_or(0);
            let valid = s.line < texto.borrow().lines.len();
            Some(Value::Int(i64::from(valid)))
        }
        "lin" => Some(Value::Int(state.borrow().line_no())),
        "bytes" => {
            let s = state.borrow();
            let Some(texto) = s.container() else {
                return Some(Value::Int(0));
            };
            let t = texto.borrow();
            let upto = s.line.min(t.lines.len());
            let bytes: usize = t.lines[..upto].iter().map(|l| l.len() + 1).sum();
            Some(Value::Int(bytes as i64))
        }
        "texto" => {
            let s = state.borrow();
            let out = s
                .container()
                .and_then(|texto| texto.borrow().lines.get(s.line).cloned())
                .map_or_else(|| Value::from(""), Value::from);
            Some(out)
        }
        "mudar" => {
            let s = state.borrow();
            let text = args.first().map(Value::to_text).unwrap_or_default();
            let Some(texto) = s.container() else {
                return Some(Value::Int(0));
            };
            let mut t = texto.borrow_mut();
            let line = s.line;
            match t.lines.get_mut(line) {
                Some(slot) => {
                    *slot = text.to_string();
                    Some(Value::Int(1))
                }
                None => Some(Value::Int(0)),
            }
        }
        "addantes" => {
            // insert before the cursor, leaving the cursor on its line
            // (the insertion shifts it, which is the advance)
            let text = args.first().map(Value::to_text).unwrap_or_default();
            let (texto, line) = {
                let s = state.borrow();
                (s.container()?, s.line)
            };
            texto.borrow_mut().insert(line, text.to_string());
            Some(Value::Int(1))
        }
        "remover" => {
            let (texto, line) = {
                let s = state.borrow();
                (s.container()?, s.line)
            };
            texto.borrow_mut().remove(line, 1);
            Some(Value::Int(1))
        }
        "juntar" => {
            // join this line onto the previous one
            let (texto, line) = {
                let s = state.borrow();
                (s.container()?, s.line)
            };
            if line == 0 {
                return Some(Value::Int(0));
            }
            let mut t = texto.borrow_mut();
            if line >= t.lines.len() {
                return Some(Value::Int(0));
            }
            let joined = t.lines.remove(line);
            t.lines[line - 1].push_str(&joined);
            drop(t);
            texto.borrow_mut().each_cursor(|c| {
                if c.line >= line {
                    c.line -= 1;
                }
            });
            Some(Value::Int(1))
        }
        "depois" | "antes" => {
            let mut s = state.borrow_mut();
            if name == "depois" {
                s.line += 1;
            } else if s.line > 0 {
                s.line -= 1;
            }
            let no = s.line_no();
            Some(Value::Int(no))
        }
        "procurar" | "procurarmai" => {
            // multi-line search from the cursor; a leading '\n' in the
            // pattern anchors at line start, so "\nX\n" matches a line
            // exactly equal to X
            let pattern = args.first().map(Value::to_text).unwrap_or_default();
            if pattern.is_empty() {
                return Some(Value::Int(0));
            }
            let (texto, start) = {
                let s = state.borrow();
                (s.container()?, s.line)
            };
            let t = texto.borrow();
            if start >= t.lines.len() {
                return Some(Value::Int(0));
            }
            let mut haystack = String::from("\n");
            let mut offsets = Vec::with_capacity(t.lines.len() - start);
            for line in &t.lines[start..] {
                offsets.push(haystack.len());
                haystack.push_str(line);
                haystack.push('\n');
            }
            let found = if name == "procurarmai" {
                haystack
                    .to_lowercase()
                    .find(&pattern.to_lowercase())
            } else {
                haystack.find(&*pattern)
            };
            drop(t);
            match found {
                Some(at) => {
                    // map the byte offset back to a line index; a pattern
                    // anchored with '\n' matches the newline before the line
                    let anchor = if pattern.starts_with('\n') { at + 1 } else { at };
                    let line_rel = offsets.iter().rposition(|&o| o <= anchor).unwrap_or(0);
                    state.borrow_mut().line = start + line_rel;
                    Some(Value::Int(state.borrow().line_no()))
                }
                None => Some(Value::Int(0)),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texto_with(lines: &[&str]) -> Rc<RefCell<TextoTxt>> {
        let t = Rc::new(RefCell::new(TextoTxt::new(ObjId::NONE, StringId::from_index(0))));
        t.borrow_mut().lines = lines.iter().map(|s| (*s).to_string()).collect();
        t
    }

    fn cursor_at(texto: &Rc<RefCell<TextoTxt>>, line: usize) -> Rc<RefCell<TextoPos>> {
        let c = Rc::new(RefCell::new(TextoPos::new(ObjId::NONE, StringId::from_index(1))));
        texto.borrow_mut().register_cursor(&c);
        c.borrow_mut().texto = Rc::downgrade(texto);
        c.borrow_mut().line = line;
        c
    }

    #[test]
    fn cursor_past_end_reads_empty() {
        let texto = texto_with(&["a", "b"]);
        let cursor = cursor_at(&texto, 1);
        cursor.borrow_mut().line += 1;
        assert_eq!(cursor.borrow().line_no(), 0);
    }

    #[test]
    fn clear_invalidates_cursors_via_epoch() {
        let texto = texto_with(&["a"]);
        let cursor = cursor_at(&texto, 0);
        assert_eq!(cursor.borrow().line_no(), 1);
        texto.borrow_mut().clear();
        assert_eq!(cursor.borrow().line_no(), 0);
        assert!(cursor.borrow().container().is_none());
    }

    #[test]
    fn insert_shifts_cursors() {
        let texto = texto_with(&["a", "b"]);
        let cursor = cursor_at(&texto, 1);
        texto.borrow_mut().insert(0, "z".into());
        assert_eq!(cursor.borrow().line, 2);
        texto.borrow_mut().remove(0, 1);
        assert_eq!(cursor.borrow().line, 1);
    }

    #[test]
    fn byte_count_includes_newlines() {
        let texto = texto_with(&["ab", "c"]);
        assert_eq!(texto.borrow().byte_count(), 5);
    }
}
