//! Limits and diagnostics handler (`debug`).
//!
//! Exposes the instruction budget, error level, process resource usage,
//! and build identification to scripts. Resource numbers come from
//! `/proc/self` on Linux and read as zero elsewhere.

use std::{cell::RefCell, rc::Rc};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

#[derive(Debug)]
pub struct Debug {
    pub owner: ObjId,
    pub field: StringId,
}

impl Debug {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self { owner, field }
    }
}

pub(super) fn member_set(
    _state: &Rc<RefCell<Debug>>,
    world: &mut World,
    name: &str,
    value: &Value,
) -> bool {
    match name {
        "nivel" => {
            world.config.int.err_mode = u8::try_from(value.to_i64().clamp(0, 2)).expect("clamped");
            true
        }
        _ => false,
    }
}

pub(super) fn op(
    _state: &Rc<RefCell<Debug>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "exec" => Value::Int(world.budget),
        "execini" => Value::Int(world.config.int.exec_budget),
        "nivel" => {
            if let Some(v) = args.first() {
                world.config.int.err_mode =
                    u8::try_from(v.to_i64().clamp(0, 2)).expect("clamped");
            }
            Value::Int(i64::from(world.config.int.err_mode))
        }
        "reiniciar" => {
            world.last_error = crate::error::ErrorCode::None;
            world.instructions_executed = 0;
            Value::Int(1)
        }
        "cpuusuario" => Value::Int(cpu_times().0),
        "cpusistema" => Value::Int(cpu_times().1),
        "memoria" => Value::Int(proc_status_kb("VmRSS:") * 1024),
        "memoriapico" => Value::Int(proc_status_kb("VmHWM:") * 1024),
        "versao" => Value::from(env!("CARGO_PKG_VERSION")),
        "dataver" => Value::from(option_env!("BUILD_DATE").unwrap_or("")),
        _ => return None,
    };
    Some(out)
}

/// (user, system) CPU time in milliseconds.
#[cfg(target_os = "linux")]
fn cpu_times() -> (i64, i64) {
    let Ok(stat) = std::fs::read_to_string("/proc/self/stat") else {
        return (0, 0);
    };
    // fields 14 and 15 (utime, stime) in clock ticks, after the comm field
    let after_comm = match stat.rfind(')') {
        Some(at) => &stat[at + 1..],
        None => return (0, 0),
    };
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: i64 = fields.get(11).and_then(|f| f.parse().ok()).unwrap_or(0);
    let stime: i64 = fields.get(12).and_then(|f| f.parse().ok()).unwrap_or(0);
    // clock tick is 100 Hz on every supported target
    (utime * 10, stime * 10)
}

#[cfg(not(target_os = "linux"))]
fn cpu_times() -> (i64, i64) {
    (0, 0)
}

#[cfg(target_os = "linux")]
fn proc_status_kb(key: &str) -> i64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.trim().split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn proc_status_kb(_key: &str) -> i64 {
    0
}
