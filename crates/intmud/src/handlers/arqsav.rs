//! Save/load handler (`arqsav`): the line-oriented object-graph format.
//!
//! File layout: `[ClassName]` opens an object section; `name=value` lines
//! assign saved scalar fields; a `{name}` header starts a multi-line block
//! appended to the `textotxt` field of that name until the next header;
//! blank lines separate sections. Only `sav`-flagged variables are
//! written. Unknown class headers skip to the next section on load.

use std::{cell::RefCell, fs, path::PathBuf, rc::Rc, time::SystemTime};

use log::warn;

use crate::{
    handlers::Handler,
    heap::ObjId,
    intern::StringId,
    unit::VarType,
    value::Value,
    world::{World, coerce_declared},
};

#[derive(Debug)]
pub struct ArqSav {
    pub owner: ObjId,
    pub field: StringId,
    path: Option<PathBuf>,
    /// Set by `senha`; content encryption is not applied — the password
    /// only gates accidental loads of protected files.
    password: Option<String>,
}

impl ArqSav {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            path: None,
            password: None,
        }
    }
}

fn list_items(world: &World, value: Option<&Value>) -> Option<Rc<RefCell<super::ListaObj>>> {
    match super::resolve_handler(world, value?) {
        Some(Handler::ListaObj(l)) => Some(l),
        _ => None,
    }
}

fn save_text(world: &World, items: &[ObjId]) -> String {
    let mut out = String::new();
    for &id in items {
        let Some(obj) = world.heap.get(id) else { continue };
        out.push('[');
        out.push_str(&obj.unit.display_name);
        out.push_str("]\n");
        // saved variables along the hierarchy, first occurrence wins
        let mut seen = Vec::new();
        for &cls in &obj.unit.linear {
            let Some(unit) = world.registry.get(cls) else { continue };
            for (name, var) in &unit.vars {
                if !var.saved || seen.contains(name) {
                    continue;
                }
                seen.push(*name);
                let var_name = world.interns.get(*name);
                if let VarType::Handler(_) = var.var_type {
                    if let Some(Handler::TextoTxt(t)) = obj.handlers.get(name) {
                        out.push('{');
                        out.push_str(var_name);
                        out.push_str("}\n");
                        for line in &t.borrow().lines {
                            out.push_str(line);
                            out.push('\n');
                        }
                    }
                    continue;
                }
                let value = if var.common {
                    world.commons.get(&(cls, *name)).cloned()
                } else {
                    obj.fields.get(name).cloned()
                };
                if let Some(value) = value {
                    out.push_str(var_name);
                    out.push('=');
                    out.push_str(&value.to_text());
                    out.push('\n');
                }
            }
        }
        out.push('\n');
    }
    out
}

/// One parsed object section: class name plus assignments and blocks.
struct Section {
    class: String,
    scalars: Vec<(String, String)>,
    blocks: Vec<(String, Vec<String>)>,
}

fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut block: Option<(String, Vec<String>)> = None;
    for line in text.lines() {
        if line.starts_with('[') && line.ends_with(']') {
            if let (Some(section), Some(done)) = (sections.last_mut(), block.take()) {
                section.blocks.push(done);
            }
            sections.push(Section {
                class: line[1..line.len() - 1].to_string(),
                scalars: Vec::new(),
                blocks: Vec::new(),
            });
            continue;
        }
        let Some(section) = sections.last_mut() else { continue };
        if line.starts_with('{') && line.ends_with('}') {
            if let Some(done) = block.take() {
                section.blocks.push(done);
            }
            block = Some((line[1..line.len() - 1].to_string(), Vec::new()));
            continue;
        }
        if line.trim().is_empty() {
            // blank lines are separators; they also end a block
            if let Some(done) = block.take() {
                section.blocks.push(done);
            }
            continue;
        }
        if let Some((_, lines)) = &mut block {
            lines.push(line.to_string());
            continue;
        }
        if let Some((name, value)) = line.split_once('=') {
            section.scalars.push((name.to_string(), value.to_string()));
        }
    }
    if let (Some(section), Some(done)) = (sections.last_mut(), block.take()) {
        section.blocks.push(done);
    }
    sections
}

fn apply_section(world: &mut World, id: ObjId, section: &Section) {
    for (name, raw) in &section.scalars {
        let Some(name_id) = world.interns.get_name(name) else { continue };
        let Some(obj) = world.heap.get(id) else { return };
        let unit = Rc::clone(&obj.unit);
        let Some((defining, var)) = world.registry.resolve_var(&unit, name_id) else {
            continue;
        };
        if !var.saved {
            continue;
        }
        let value = coerce_declared(&var, Value::from(raw.as_str()));
        if var.common {
            world.commons.insert((defining, name_id), value);
        } else if let Some(obj) = world.heap.get_mut(id) {
            obj.fields.insert(name_id, value);
        }
    }
    for (name, lines) in &section.blocks {
        let Some(name_id) = world.interns.get_name(name) else { continue };
        let Some(obj) = world.heap.get(id) else { return };
        if let Some(Handler::TextoTxt(t)) = obj.handlers.get(&name_id) {
            let t = Rc::clone(t);
            let mut t = t.borrow_mut();
            for line in lines {
                let end = t.lines.len();
                t.insert(end, line.clone());
            }
        }
    }
}

pub(super) fn op(
    state: &Rc<RefCell<ArqSav>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "abrir" => {
            let path = args.first().map(Value::to_text).unwrap_or_default();
            if path.is_empty() {
                return Some(Value::Int(0));
            }
            state.borrow_mut().path = Some(world.config.source_dir.join(&*path));
            Value::Int(1)
        }
        "existe" => {
            let exists = state.borrow().path.as_ref().is_some_and(|p| p.is_file());
            Value::Int(i64::from(exists))
        }
        "valido" => {
            let valid = state.borrow().path.as_ref().is_some_and(|p| {
                fs::read_to_string(p).is_ok_and(|text| {
                    text.lines()
                        .find(|l| !l.trim().is_empty())
                        .is_some_and(|l| l.starts_with('['))
                })
            });
            Value::Int(i64::from(valid))
        }
        "idade" => {
            let days = state
                .borrow()
                .path
                .as_ref()
                .and_then(|p| fs::metadata(p).ok())
                .and_then(|m| m.modified().ok())
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .map_or(-1, |d| i64::try_from(d.as_secs() / 86_400).unwrap_or(i64::MAX));
            Value::Int(days)
        }
        "senha" => {
            let pw = args.first().map(Value::to_text).unwrap_or_default();
            state.borrow_mut().password = (!pw.is_empty()).then(|| pw.to_string());
            Value::Int(1)
        }
        "gravar" => {
            let Some(lista) = list_items(world, args.first()) else {
                return Some(Value::Int(0));
            };
            let Some(path) = state.borrow().path.clone() else {
                return Some(Value::Int(0));
            };
            let append = args.get(1).map_or(0, Value::to_i64) != 0;
            let items = lista.borrow().items.clone();
            let text = save_text(world, &items);
            let result = if append {
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| std::io::Write::write_all(&mut f, text.as_bytes()))
            } else {
                fs::write(&path, text)
            };
            if let Err(err) = &result {
                warn!("arqsav write {path:?} failed: {err}");
            }
            Value::Int(i64::from(result.is_ok()))
        }
        "ler" => {
            let Some(lista) = list_items(world, args.first()) else {
                return Some(Value::Int(0));
            };
            let Some(path) = state.borrow().path.clone() else {
                return Some(Value::Int(0));
            };
            let Ok(text) = fs::read_to_string(&path) else {
                return Some(Value::Int(0));
            };
            let into_existing = args.get(1).map_or(0, Value::to_i64) != 0;
            let sections = parse_sections(&text);
            let mut loaded = 0i64;
            if into_existing {
                // apply sections to the list's objects in order, matching
                // by class; mismatches skip the section
                let items = lista.borrow().items.clone();
                let mut next = 0usize;
                for section in &sections {
                    let Some(class_id) = world.interns.get_name(&section.class) else {
                        continue;
                    };
                    let Some(&id) = items.get(next) else { break };
                    let matches = world
                        .heap
                        .get(id)
                        .is_some_and(|o| o.unit.name == class_id);
                    if matches {
                        apply_section(world, id, section);
                        loaded += 1;
                    }
                    next += 1;
                }
            } else {
                for section in &sections {
                    let Some(class_id) = world.interns.get_name(&section.class) else {
                        continue;
                    };
                    if world.registry.get(class_id).is_none() {
                        continue; // unknown class: skip to the next object
                    }
                    let Some(id) = world.create_object(class_id) else { continue };
                    apply_section(world, id, section);
                    lista.borrow_mut().items.push(id);
                    loaded += 1;
                }
            }
            Value::Int(loaded)
        }
        "apagar" => {
            let removed = state
                .borrow()
                .path
                .as_ref()
                .is_some_and(|p| fs::remove_file(p).is_ok());
            Value::Int(i64::from(removed))
        }
        "limpar" => {
            let mut s = state.borrow_mut();
            s.path = None;
            s.password = None;
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
    fn sections_parse_scalars_and_blocks() {
        let text = "[Sala]\nnome=Praça\npontos=10\n{descr}\nlinha um\nlinha dois\n\n[Outra]\nx=1\n";
        let sections = parse_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].class, "Sala");
        assert_eq!(sections[0].scalars, vec![
            ("nome".to_string(), "Praça".to_string()),
            ("pontos".to_string(), "10".to_string()),
        ]);
        assert_eq!(sections[0].blocks.len(), 1);
        assert_eq!(sections[0].blocks[0].0, "descr");
        assert_eq!(sections[0].blocks[0].1, vec!["linha um".to_string(), "linha dois".to_string()]);
        assert_eq!(sections[1].class, "Outra");
    }
}
