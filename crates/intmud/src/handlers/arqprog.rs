//! Program-text reader (`arqprog`): sequential access to the loaded
//! program's source files.

use std::{cell::RefCell, fs, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

#[derive(Debug)]
pub struct ArqProg {
    pub owner: ObjId,
    pub field: StringId,
    lines: Vec<String>,
    pos: usize,
    open: bool,
}

impl ArqProg {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            lines: Vec::new(),
            pos: 0,
            open: false,
        }
    }
}

pub(super) fn op(
    state: &Rc<RefCell<ArqProg>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "abrir" => {
            let file = args.first().map(Value::to_text).unwrap_or_default();
            // only files the program was loaded from are readable
            let known = world
                .registry
                .units()
                .any(|u| u.file.eq_ignore_ascii_case(&file));
            let path = world.config.source_dir.join(&*file);
            match (known, fs::read_to_string(&path)) {
                (true, Ok(text)) => {
                    s.lines = text.lines().map(str::to_string).collect();
                    s.pos = 0;
                    s.open = true;
                    Value::Int(1)
                }
                _ => Value::Int(0),
            }
        }
        "fechar" => {
            s.lines.clear();
            s.pos = 0;
            s.open = false;
            Value::Int(1)
        }
        "temlin" => Value::Int(i64::from(s.open && s.pos < s.lines.len())),
        "texto" => s
            .lines
            .get(s.pos)
            .map_or_else(|| Value::from(""), |l| Value::from(l.as_str())),
        "depois" => {
            let n = args.first().map_or(1, Value::to_i64).max(1);
            s.pos = s.pos.saturating_add(usize::try_from(n).unwrap_or(1));
            Value::Int(i64::from(s.open && s.pos < s.lines.len()))
        }
        _ => return None,
    };
    Some(out)
}
