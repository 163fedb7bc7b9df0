//! The event loop: decisecond ticks, timer countdown, edge triggers,
//! queued I/O events, and convention-named handler invocation.
//!
//! One scheduling thread runs the whole script side. Per tick, strictly in
//! order: resume budget-suspended frames, fire timers, fire exec-trigger
//! edges, drain the pending event queue, invoke `aotick` on the main
//! object, process submitted input lines via `aocomando`. Every invocation
//! runs under a fresh instruction budget; exhausted frames are carried to
//! the next tick. A missing handler function is silently ignored.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info};

use crate::{
    event::{EventKind, PendingEvent},
    handlers::{Handler, Socket},
    heap::ObjId,
    intern::StringId,
    value::{HandlerRef, Value},
    vm::{self, Invocation, Vm},
    world::World,
};

/// An input line submitted by the session layer.
#[derive(Debug)]
pub struct InputLine {
    pub session: u64,
    pub line: String,
}

pub struct Scheduler {
    /// Budget-suspended invocations, resumed in arrival order.
    suspended: VecDeque<Box<Vm>>,
    input_tx: Sender<InputLine>,
    input_rx: Receiver<InputLine>,
    /// Counter for naming handlers created for accepted connections.
    accept_seq: u64,
    /// Milliseconds carried over between ticks (sub-decisecond remainder).
    carry_ms: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let (input_tx, input_rx) = unbounded();
        Self {
            suspended: VecDeque::new(),
            input_tx,
            input_rx,
            accept_seq: 0,
            carry_ms: 0,
        }
    }

    /// Handle for the session layer to submit input lines from any thread.
    #[must_use]
    pub fn input_sender(&self) -> Sender<InputLine> {
        self.input_tx.clone()
    }

    /// Runs the loop until the program terminates.
    pub fn run(&mut self, world: &mut World) {
        let tick = Duration::from_millis(world.config.tick_ms.max(1));
        info!("event loop started ({} ms tick)", tick.as_millis());
        let mut last = Instant::now();
        while !world.terminate {
            std::thread::sleep(tick);
            let now = Instant::now();
            let elapsed_ms = u64::try_from((now - last).as_millis()).unwrap_or(u64::MAX);
            last = now;
            let total = elapsed_ms + self.carry_ms;
            self.carry_ms = total % 100;
            let decis = i64::try_from(total / 100).unwrap_or(i64::MAX);
            self.tick(world, decis.max(1));
        }
        info!("event loop stopped");
        self.shutdown(world);
    }

    /// One tick of the loop. `decis` is the elapsed deciseconds (at least
    /// one). Exposed for tests and embedders driving time manually.
    pub fn tick(&mut self, world: &mut World, decis: i64) {
        // 0. resume frames suspended on budget exhaustion
        let mut cycles = world.config.max_cycles_per_tick.max(1);
        let mut still_suspended = VecDeque::new();
        while let Some(vm) = self.suspended.pop_front() {
            if world.terminate {
                return;
            }
            if cycles == 0 {
                still_suspended.push_back(vm);
                continue;
            }
            cycles -= 1;
            world.reset_budget();
            match vm.resume(world) {
                Invocation::Done(_) => {}
                Invocation::Suspended(vm) => still_suspended.push_back(vm),
                Invocation::Terminated => return,
            }
        }
        self.suspended = still_suspended;

        // 1. timers, 2. exec edges (collected together, dispatched in
        // phase order)
        let mut timer_fires: Vec<(ObjId, StringId)> = Vec::new();
        let mut edge_fires: Vec<(ObjId, StringId)> = Vec::new();
        for id in world.heap.live_ids() {
            let Some(obj) = world.heap.get(id) else { continue };
            for (&field, handler) in &obj.handlers {
                match handler {
                    Handler::IntTempo(t) => {
                        if t.borrow_mut().tick(decis) {
                            timer_fires.push((id, field));
                        }
                    }
                    Handler::IntInc(c) => c.borrow_mut().tick(decis),
                    Handler::IntExec(e) => {
                        if e.borrow_mut().take_fire() {
                            edge_fires.push((id, field));
                        }
                    }
                    _ => {}
                }
            }
        }
        for (owner, field) in timer_fires {
            self.fire(world, owner, field, "exec", &[]);
            if world.terminate {
                return;
            }
        }
        for (owner, field) in edge_fires {
            self.fire(world, owner, field, "exec", &[]);
            if world.terminate {
                return;
            }
        }

        // 3. drain background I/O events
        for event in world.queue.drain() {
            self.dispatch_event(world, event);
            if world.terminate {
                return;
            }
        }

        // 4. aotick on the main object
        if let Some(main) = world.main_obj {
            self.invoke_named(world, main, "aotick", &[]);
            if world.terminate {
                return;
            }
        }

        // 5. submitted input lines
        while let Ok(input) = self.input_rx.try_recv() {
            self.dispatch_input(world, &input);
            if world.terminate {
                return;
            }
        }

        // safe point: finish pending deletions
        world.sweep();
        world.sink.flush();
    }

    /// After the loop exits: drop queued events and release resources.
    fn shutdown(&mut self, world: &mut World) {
        self.suspended.clear();
        let dropped = world.queue.drain().len();
        if dropped > 0 {
            debug!("shutdown discarded {dropped} queued events");
        }
        for id in world.heap.live_ids() {
            world.delete_object(id);
        }
        world.sweep();
        world.sink.flush();
    }

    fn dispatch_event(&mut self, world: &mut World, event: PendingEvent) {
        let suffix = event.kind.suffix();
        match event.kind {
            EventKind::Msg(line) => {
                self.fire(world, event.owner, event.field, suffix, &[Value::from(line)]);
            }
            EventKind::Fechou | EventKind::Con => {
                self.fire(world, event.owner, event.field, suffix, &[]);
            }
            EventKind::Err(text) => {
                world.note_error(crate::error::ErrorCode::IoFailure, event.owner);
                self.fire(world, event.owner, event.field, suffix, &[Value::from(text)]);
            }
            EventKind::Tecla(key) => {
                self.fire(world, event.owner, event.field, suffix, &[Value::Int(key)]);
            }
            EventKind::Erro(code) => {
                self.fire(world, event.owner, event.field, suffix, &[Value::Int(code)]);
            }
            EventKind::Accepted { stream, peer } => {
                // wrap the connection in a fresh socket handler hung off
                // the acceptor's owner; scripts usually hand it over to a
                // session object right away
                self.accept_seq += 1;
                let base = world.interns.get(event.field).to_string();
                let synthetic = world.interns.exact(&format!("{base}#{}", self.accept_seq));
                let sender = world.queue.sender();
                let socket =
                    Socket::from_accepted(event.owner, synthetic, stream, peer, &sender);
                let handler = Handler::Socket(std::rc::Rc::new(std::cell::RefCell::new(socket)));
                let Some(obj) = world.heap.get_mut(event.owner) else {
                    return; // acceptor's owner died; connection drops
                };
                obj.handlers.insert(synthetic, handler);
                let arg = Value::Handler(HandlerRef {
                    owner: event.owner,
                    field: synthetic,
                });
                self.fire(world, event.owner, event.field, suffix, &[arg]);
            }
        }
    }

    fn dispatch_input(&mut self, world: &mut World, input: &InputLine) {
        let Some(main) = world.main_obj else { return };
        let trimmed = input.line.trim();
        let (command, tail) = match trimmed.find(char::is_whitespace) {
            Some(at) => (&trimmed[..at], trimmed[at..].trim_start()),
            None => (trimmed, ""),
        };
        world.current_session = Some(input.session);
        self.invoke_named(
            world,
            main,
            "aocomando",
            &[
                Value::Int(i64::try_from(input.session).unwrap_or(0)),
                Value::from(command),
                Value::from(tail),
            ],
        );
        world.current_session = None;
    }

    /// Invokes `{field}_{suffix}` on `owner` if such a function exists.
    fn fire(&mut self, world: &mut World, owner: ObjId, field: StringId, suffix: &str, args: &[Value]) {
        let name = format!("{}_{suffix}", world.interns.get(field));
        self.invoke_named(world, owner, &name, args);
    }

    fn invoke_named(&mut self, world: &mut World, target: ObjId, name: &str, args: &[Value]) {
        let Some(func) = world.interns.get_name(name) else {
            return;
        };
        world.reset_budget();
        match vm::invoke(world, target, func, args) {
            Some(Invocation::Suspended(vm)) => self.suspended.push_back(vm),
            Some(Invocation::Done(_) | Invocation::Terminated) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::compile_program, config::Config, parse::parse_source, registry::Registry,
        sink::CollectSink,
    };

    fn world_from(src: &str) -> World {
        let classes = parse_source("test.int", src).expect("parse failure");
        let mut world = World::new(Config::default());
        world.sink = Box::new(CollectSink::new());
        let (units, diags) = compile_program(&classes, &mut world.interns);
        assert!(diags.is_clean(), "{diags:?}");
        world.install(Registry::new(units));
        world
    }

    fn boot_main(world: &mut World) -> ObjId {
        let main = world.interns.get_name("main").expect("main class");
        let id = world.create_object(main).expect("main created");
        world.main_obj = Some(id);
        id
    }

    #[test]
    fn timer_fires_exactly_once_at_thirty_ticks() {
        let src = "classe main\ninttempo t\nint32 fogos\nfunc arma\n  t = 30\nfunc t_exec\n  fogos++\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let arma = world.interns.get_name("arma").unwrap();
        assert!(matches!(vm::invoke(&mut world, id, arma, &[]), Some(Invocation::Done(_))));

        let mut scheduler = Scheduler::new();
        for _ in 0..29 {
            scheduler.tick(&mut world, 1);
        }
        let fogos = world.interns.get_name("fogos").unwrap();
        assert_eq!(world.heap.get(id).unwrap().fields[&fogos].to_i64(), 0);

        scheduler.tick(&mut world, 1);
        assert_eq!(world.heap.get(id).unwrap().fields[&fogos].to_i64(), 1);

        // value clamped at zero, no refire
        for _ in 0..5 {
            scheduler.tick(&mut world, 1);
        }
        assert_eq!(world.heap.get(id).unwrap().fields[&fogos].to_i64(), 1);
    }

    #[test]
    fn exec_trigger_fires_once_and_resets() {
        let src = "classe main\nintexec gatilho\nint32 vezes\nint32 lido\nfunc dispara\n  gatilho = 5\nfunc gatilho_exec\n  vezes++\n  lido = gatilho\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let dispara = world.interns.get_name("dispara").unwrap();
        assert!(matches!(vm::invoke(&mut world, id, dispara, &[]), Some(Invocation::Done(_))));

        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1);
        scheduler.tick(&mut world, 1);

        let vezes = world.interns.get_name("vezes").unwrap();
        let lido = world.interns.get_name("lido").unwrap();
        let obj = world.heap.get(id).unwrap();
        assert_eq!(obj.fields[&vezes].to_i64(), 1);
        // the value reads zero by the time the handler runs
        assert_eq!(obj.fields[&lido].to_i64(), 0);
    }

    #[test]
    fn aotick_runs_every_tick() {
        let src = "classe main\nint32 batidas\nfunc aotick\n  batidas++\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let mut scheduler = Scheduler::new();
        for _ in 0..3 {
            scheduler.tick(&mut world, 1);
        }
        let batidas = world.interns.get_name("batidas").unwrap();
        assert_eq!(world.heap.get(id).unwrap().fields[&batidas].to_i64(), 3);
    }

    #[test]
    fn queued_events_invoke_convention_named_functions() {
        let src = "classe main\nsocket soq\ntxt80 ultima\nfunc soq_msg\n  ultima = arg0\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let soq = world.interns.get_name("soq").unwrap();
        world
            .queue
            .sender()
            .send(PendingEvent {
                owner: id,
                field: soq,
                kind: EventKind::Msg("olá do outro lado".into()),
            })
            .unwrap();
        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1);
        let ultima = world.interns.get_name("ultima").unwrap();
        assert_eq!(
            &*world.heap.get(id).unwrap().fields[&ultima].to_text(),
            "olá do outro lado"
        );
    }

    #[test]
    fn missing_event_handlers_are_silently_ignored() {
        let src = "classe main\nsocket soq\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let soq = world.interns.get_name("soq").unwrap();
        world
            .queue
            .sender()
            .send(PendingEvent {
                owner: id,
                field: soq,
                kind: EventKind::Fechou,
            })
            .unwrap();
        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1); // must not panic or error
    }

    #[test]
    fn input_lines_reach_aocomando() {
        let src = "classe main\ntxt80 cmd\ntxt80 resto\nint32 sessao\nfunc aocomando\n  sessao = arg0\n  cmd = arg1\n  resto = arg2\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        let mut scheduler = Scheduler::new();
        scheduler
            .input_sender()
            .send(InputLine {
                session: 7,
                line: "olhar espada longa".into(),
            })
            .unwrap();
        scheduler.tick(&mut world, 1);
        let obj = world.heap.get(id).unwrap();
        let get = |name: &str, world: &World| {
            world.interns.get_name(name).unwrap()
        };
        assert_eq!(obj.fields[&get("sessao", &world)].to_i64(), 7);
        assert_eq!(&*obj.fields[&get("cmd", &world)].to_text(), "olhar");
        assert_eq!(&*obj.fields[&get("resto", &world)].to_text(), "espada longa");
    }

    #[test]
    fn suspended_frames_resume_on_later_ticks() {
        let src = "classe main\nint32 feito\nfunc aotick\n  se feito == 0\n    int32 i = 0\n    enquanto i < 2000\n      i++\n    efim\n    feito = i\n  fimse\n";
        let mut world = world_from(src);
        let id = boot_main(&mut world);
        world.config.int.exec_budget = 300;
        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1);
        let feito = world.interns.get_name("feito").unwrap();
        assert_eq!(world.heap.get(id).unwrap().fields[&feito].to_i64(), 0);
        for _ in 0..100 {
            scheduler.tick(&mut world, 1);
        }
        assert_eq!(world.heap.get(id).unwrap().fields[&feito].to_i64(), 2000);
    }

    #[test]
    fn deletions_are_swept_at_tick_end() {
        let src = "classe coisa\nclasse main\nfunc aotick\n  apagar(criar(\"coisa\"))\n";
        let mut world = world_from(src);
        boot_main(&mut world);
        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1);
        let coisa = world.interns.get_name("coisa").unwrap();
        assert_eq!(world.heap.chain(coisa).count, 0);
    }
}
