//! Object-navigation and invocation builtins: creation, deletion, chain
//! walking, class queries, and the `exec` family.

use smallvec::SmallVec;

use super::{Builtin, BuiltinOutcome};
use crate::{heap::ObjId, value::Value, world::World};

pub(super) fn call(
    builtin: Builtin,
    world: &mut World,
    this: ObjId,
    args: &[Value],
) -> BuiltinOutcome {
    match builtin {
        Builtin::Criar => {
            let class_name = args.first().map(Value::to_text).unwrap_or_default();
            let Some(class) = world.interns.get_name(&class_name) else {
                world.note_error(crate::error::ErrorCode::LookupMiss, this);
                return Value::Null.into();
            };
            let Some(created) = world.create_object(class) else {
                world.note_error(crate::error::ErrorCode::LookupMiss, this);
                return Value::Null.into();
            };
            let inicializar = world.interns.name("inicializar");
            BuiltinOutcome::CallFunc {
                this: created,
                name: inicializar,
                args: SmallVec::new(),
                class: None,
                result_override: Some(Value::Obj(created)),
            }
        }
        Builtin::Apagar => {
            let target = match args.first() {
                Some(Value::Obj(id)) => *id,
                // no argument deletes the current object
                None => this,
                Some(_) => return Value::Int(0).into(),
            };
            world.delete_object(target);
            Value::Int(1).into()
        }
        Builtin::Ref => args
            .iter()
            .find(|v| !matches!(v, Value::Null))
            .cloned()
            .unwrap_or(Value::Null)
            .into(),
        Builtin::ObjAntes | Builtin::ObjDepois => {
            let Some(Value::Obj(id)) = args.first() else {
                return Value::Null.into();
            };
            let link = world.heap.get(*id).and_then(|o| {
                if builtin == Builtin::ObjAntes {
                    o.prev
                } else {
                    o.next
                }
            });
            link.map_or(Value::Null, Value::Obj).into()
        }
        Builtin::ObjPrim | Builtin::ObjUlt => {
            let class = match args.first() {
                Some(Value::Obj(id)) => world.heap.get(*id).map(|o| o.unit.name),
                Some(other) => world.interns.get_name(&other.to_text()),
                None => world.heap.get(this).map(|o| o.unit.name),
            };
            let Some(class) = class else {
                return Value::Null.into();
            };
            let chain = world.heap.chain(class);
            let id = if builtin == Builtin::ObjPrim {
                chain.first
            } else {
                chain.last
            };
            id.map_or(Value::Null, Value::Obj).into()
        }
        Builtin::IntTotal => {
            let value = args.first().cloned().unwrap_or(Value::Null);
            let total = match &value {
                Value::Obj(id) => world
                    .heap
                    .get(*id)
                    .map_or(0, |o| world.heap.chain(o.unit.name).count as i64),
                other => other.seq_len().unwrap_or(0) as i64,
            };
            Value::Int(total).into()
        }
        Builtin::Classe => {
            let target = match args.first() {
                Some(Value::Obj(id)) => *id,
                None => this,
                Some(_) => return Value::from("").into(),
            };
            world
                .heap
                .get(target)
                .map_or_else(|| Value::from(""), |o| Value::Str(o.unit.display_name.clone()))
                .into()
        }
        Builtin::NomeClasse => {
            let name = args.first().map(Value::to_text).unwrap_or_default();
            let display = world
                .interns
                .get_name(&name)
                .and_then(|id| world.registry.get(id))
                .map(|u| u.display_name.clone());
            display.map_or_else(|| Value::from(""), Value::Str).into()
        }
        Builtin::Exec | Builtin::ExecObj | Builtin::ExecClasse => {
            let (target, class, name_at) = match builtin {
                Builtin::Exec => (this, None, 0),
                Builtin::ExecObj => {
                    let Some(Value::Obj(id)) = args.first() else {
                        return Value::Null.into();
                    };
                    (*id, None, 1)
                }
                _ => {
                    let class_name = args.first().map(Value::to_text).unwrap_or_default();
                    let Some(class) = world.interns.get_name(&class_name) else {
                        return Value::Null.into();
                    };
                    (this, Some(class), 1)
                }
            };
            let func_name = args.get(name_at).map(Value::to_text).unwrap_or_default();
            let Some(name) = world.interns.get_name(&func_name) else {
                world.note_error(crate::error::ErrorCode::LookupMiss, this);
                return Value::Null.into();
            };
            BuiltinOutcome::CallFunc {
                this: target,
                name,
                args: args[name_at + 1..].iter().cloned().collect(),
                class,
                result_override: None,
            }
        }
        other => unreachable!("not an object builtin: {other:?}"),
    }
}
