//! Program introspection handler (`prog`).
//!
//! Exposes the loaded program to scripts: files, classes, members,
//! hierarchy relations, and source lines. At most one iteration is active
//! at a time; starting another discards the previous cursor. Line-mode
//! cursors carry a line number, which is what `temtexto` reports there.

use std::{cell::RefCell, fs, rc::Rc};

use crate::{
    heap::ObjId,
    intern::StringId,
    unit::{CompiledConstant, CompiledUnit},
    value::Value,
    world::World,
};

#[derive(Debug)]
enum Cursor {
    /// Plain name iteration.
    Names(Vec<String>),
    /// (line number, text) pairs for the line modes.
    Lines(Vec<(u32, String)>),
}

#[derive(Debug)]
pub struct Prog {
    pub owner: ObjId,
    pub field: StringId,
    cursor: Option<Cursor>,
    pos: usize,
}

impl Prog {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            cursor: None,
            pos: 0,
        }
    }

    fn begin(&mut self, cursor: Cursor) -> i64 {
        self.pos = 0;
        let len = match &cursor {
            Cursor::Names(items) => items.len(),
            Cursor::Lines(items) => items.len(),
        };
        self.cursor = Some(cursor);
        len as i64
    }

    fn has_current(&self) -> i64 {
        match &self.cursor {
            Some(Cursor::Names(items)) => i64::from(self.pos < items.len()),
            Some(Cursor::Lines(items)) => items.get(self.pos).map_or(0, |&(no, _)| i64::from(no)),
            None => 0,
        }
    }

    fn current_text(&self) -> Value {
        let text = match &self.cursor {
            Some(Cursor::Names(items)) => items.get(self.pos).cloned(),
            Some(Cursor::Lines(items)) => items.get(self.pos).map(|(_, t)| t.clone()),
            None => None,
        };
        text.map_or_else(|| Value::from(""), Value::from)
    }
}

fn unit_for<'w>(world: &'w World, name: &Value) -> Option<&'w Rc<CompiledUnit>> {
    let id = world.interns.get_name(&name.to_text())?;
    world.registry.get(id)
}

/// Source lines of one file, 1-based.
fn file_lines(world: &World, file: &str) -> Vec<String> {
    let path = world.config.source_dir.join(file);
    fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// The class's source section: from its header to the next class header.
fn class_lines(world: &World, unit: &CompiledUnit) -> Vec<(u32, String)> {
    let lines = file_lines(world, &unit.file);
    let start = unit.line.max(1) as usize - 1;
    let mut out = Vec::new();
    for (idx, text) in lines.iter().enumerate().skip(start) {
        if idx > start
            && text
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("classe ")
        {
            break;
        }
        out.push((idx as u32 + 1, text.clone()));
    }
    out
}

/// A function's source lines: its header plus every line the bytecode's
/// line map references.
fn func_lines(world: &World, unit: &CompiledUnit, func: StringId) -> Vec<(u32, String)> {
    let Some(f) = unit.func(func) else {
        return Vec::new();
    };
    let last = f
        .code
        .opcodes()
        .iter()
        .filter_map(|&(at, _)| f.code.line_at(at))
        .max()
        .unwrap_or(f.line);
    let lines = file_lines(world, &unit.file);
    (f.line..=last)
        .filter_map(|no| {
            lines
                .get(no as usize - 1)
                .map(|text| (no, text.clone()))
        })
        .collect()
}

/// Member existence: 0 none, 1 function, 2 variable, 3 constant.
fn classify(world: &World, unit: &CompiledUnit, member: StringId) -> i64 {
    if world.registry.resolve_func(unit, member).is_some() {
        return 1;
    }
    if world.registry.resolve_var(unit, member).is_some() {
        return 2;
    }
    if world.registry.resolve_const(unit, member).is_some() {
        return 3;
    }
    0
}

/// Shortest base-class distance; 0 for the class itself, -1 when
/// unrelated.
fn inherit_depth(world: &World, from: StringId, to: StringId) -> i64 {
    if from == to {
        return 0;
    }
    let Some(unit) = world.registry.get(from) else {
        return -1;
    };
    let mut best = -1;
    for &base in &unit.bases {
        let d = inherit_depth(world, base, to);
        if d >= 0 && (best < 0 || d + 1 < best) {
            best = d + 1;
        }
    }
    best
}

pub(super) fn op(
    state: &Rc<RefCell<Prog>>,
    world: &mut World,
    name: &str,
    args: &[Value],
    countdown: bool,
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let member_id = |world: &World, n: usize| -> Option<StringId> {
        args.get(n).and_then(|v| world.interns.get_name(&v.to_text()))
    };
    let out = match name {
        "iniarq" => {
            let mut files = Vec::new();
            for unit in world.registry.units() {
                let file = unit.file.to_string();
                if !files.contains(&file) {
                    files.push(file);
                }
            }
            Value::Int(s.begin(Cursor::Names(files)))
        }
        "iniclasse" => {
            let mut names: Vec<String> = world
                .registry
                .units()
                .map(|u| u.display_name.to_string())
                .collect();
            if countdown {
                names.reverse();
            }
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "inifunc" | "inifuncabc" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let mut names: Vec<String> = unit
                .funcs
                .keys()
                .map(|&id| world.interns.get(id).to_string())
                .collect();
            if name == "inifuncabc" {
                names.sort();
            }
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "inimembro" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let mut names: Vec<String> = Vec::new();
            names.extend(unit.vars.keys().map(|&id| world.interns.get(id).to_string()));
            names.extend(unit.consts.keys().map(|&id| world.interns.get(id).to_string()));
            names.extend(unit.funcs.keys().map(|&id| world.interns.get(id).to_string()));
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "inibase" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let names = unit
                .bases
                .iter()
                .map(|&id| world.interns.get(id).to_string())
                .collect();
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "iniherda" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let names = unit.linear[1..]
                .iter()
                .map(|&id| world.interns.get(id).to_string())
                .collect();
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "inideriv" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let base = unit.name;
            let names = world
                .registry
                .derived_from(base)
                .into_iter()
                .map(|id| world.interns.get(id).to_string())
                .collect();
            Value::Int(s.begin(Cursor::Names(names)))
        }
        "inilinclasse" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let unit = Rc::clone(unit);
            Value::Int(s.begin(Cursor::Lines(class_lines(world, &unit))))
        }
        "inilinfunc" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let unit = Rc::clone(unit);
            let Some(func) = member_id(world, 1) else {
                return Some(Value::Int(0));
            };
            Value::Int(s.begin(Cursor::Lines(func_lines(world, &unit, func))))
        }
        "temtexto" => Value::Int(s.has_current()),
        "texto" => s.current_text(),
        "depois" => {
            let n = args.first().map_or(1, Value::to_i64).max(1);
            s.pos = s.pos.saturating_add(usize::try_from(n).unwrap_or(1));
            Value::Int(s.has_current())
        }
        "existe" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let unit = Rc::clone(unit);
            let Some(member) = member_id(world, 1) else {
                return Some(Value::Int(0));
            };
            Value::Int(classify(world, &unit, member))
        }
        "varnum" | "vartexto" | "varcomum" | "varsav" | "vartipo" | "varclasse" | "vartam" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::Int(0));
            };
            let unit = Rc::clone(unit);
            let Some(member) = member_id(world, 1) else {
                return Some(Value::Int(0));
            };
            let Some((defining, var)) = world.registry.resolve_var(&unit, member) else {
                return Some(Value::Int(0));
            };
            match name {
                "varnum" => Value::Int(i64::from(var.var_type.is_numeric())),
                "vartexto" => Value::Int(i64::from(var.var_type.is_text())),
                "varcomum" => Value::Int(i64::from(var.common)),
                "varsav" => Value::Int(i64::from(var.saved)),
                "vartipo" => Value::from(&*var.type_name),
                "varclasse" => {
                    let display = world
                        .registry
                        .get(defining)
                        .map_or_else(String::new, |u| u.display_name.to_string());
                    Value::from(display)
                }
                _ => Value::Int(i64::from(var.array)),
            }
        }
        "constante" => {
            let Some(unit) = unit_for(world, args.first()?) else {
                return Some(Value::from(""));
            };
            let unit = Rc::clone(unit);
            let Some(member) = member_id(world, 1) else {
                return Some(Value::from(""));
            };
            match world.registry.resolve_const(&unit, member) {
                Some((_, CompiledConstant::Int(v))) => Value::from(v.to_string()),
                Some((_, CompiledConstant::Double(v))) => {
                    Value::from(crate::value::format_double(v))
                }
                Some((_, CompiledConstant::Str(text))) => Value::Str(text),
                // expression constants have no static text
                Some((_, CompiledConstant::Expr(_))) | None => Value::from(""),
            }
        }
        "herda" => {
            let Some(from) = member_id(world, 0) else {
                return Some(Value::Int(-1));
            };
            let Some(to) = member_id(world, 1) else {
                return Some(Value::Int(-1));
            };
            Value::Int(inherit_depth(world, from, to))
        }
        _ => return None,
    };
    Some(out)
}
