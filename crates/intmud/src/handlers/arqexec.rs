//! External process handler (`arqexec`).
//!
//! Spawns a child process with piped stdin/stdout. A background worker
//! pumps stdout lines into the event queue as `{field}_msg(line)` and
//! reports process exit as `{field}_fechou()`. The script writes to the
//! child through `escrevaln`.

use std::{
    cell::RefCell,
    io::{BufRead, BufReader, Write as _},
    process::{Child, ChildStdin, Command, Stdio},
    rc::Rc,
    thread,
};

use log::warn;

use crate::{
    event::{EventKind, PendingEvent},
    heap::ObjId,
    intern::StringId,
    value::Value,
    world::World,
};

#[derive(Debug)]
pub struct ArqExec {
    pub owner: ObjId,
    pub field: StringId,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl ArqExec {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            child: None,
            stdin: None,
        }
    }

    pub fn close(&mut self) {
        self.stdin = None; // EOF to the child
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

pub(super) fn op(
    state: &Rc<RefCell<ArqExec>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "abrir" => {
            s.close();
            let cmd = args.first().map(Value::to_text).unwrap_or_default();
            if cmd.is_empty() {
                return Some(Value::Int(0));
            }
            let mut command = Command::new(&*cmd);
            for arg in &args[1..] {
                command.arg(&*arg.to_text());
            }
            command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
            match command.spawn() {
                Ok(mut child) => {
                    s.stdin = child.stdin.take();
                    let stdout = child.stdout.take();
                    s.child = Some(child);
                    if let Some(stdout) = stdout {
                        let sender = world.queue.sender();
                        let owner = s.owner;
                        let field = s.field;
                        thread::spawn(move || {
                            let reader = BufReader::new(stdout);
                            for line in reader.lines() {
                                let Ok(line) = line else { break };
                                if sender
                                    .send(PendingEvent {
                                        owner,
                                        field,
                                        kind: EventKind::Msg(line),
                                    })
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            let _ = sender.send(PendingEvent {
                                owner,
                                field,
                                kind: EventKind::Fechou,
                            });
                        });
                    }
                    Value::Int(1)
                }
                Err(err) => {
                    warn!("arqexec spawn `{cmd}` failed: {err}");
                    Value::Int(0)
                }
            }
        }
        "escrevaln" => match &mut s.stdin {
            Some(stdin) => {
                let mut text = args.first().map(Value::to_text).unwrap_or_default().to_string();
                text.push('\n');
                let ok = stdin.write_all(text.as_bytes()).is_ok() && stdin.flush().is_ok();
                Value::Int(i64::from(ok))
            }
            None => Value::Int(0),
        },
        "rodando" => {
            let running = match &mut s.child {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            Value::Int(i64::from(running))
        }
        "fechar" => {
            s.close();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}
