//! Execution core of the IntMUD scripting language.
//!
//! The pipeline: source text parses into class declarations
//! ([`parse`]), the compiler lowers them into immutable per-class units
//! ([`bytecode`], [`unit`]), the registry and object heap hold the live
//! program ([`registry`], [`heap`], [`world`]), and the VM executes
//! bytecode under a cooperative instruction budget ([`vm`]). The event
//! loop ([`scheduler`]) ticks timers, drains background I/O events, and
//! invokes convention-named handler functions on script objects.

mod builtins;
mod bytecode;
mod color;
mod config;
mod error;
mod event;
mod handlers;
mod heap;
mod intern;
mod loader;
mod parse;
mod registry;
mod scheduler;
mod session;
mod sink;
mod unit;
mod value;
mod vm;
mod world;

pub use crate::{
    color::{render, strip_ansi, strip_tokens},
    config::{Config, DEFAULT_EXEC_BUDGET, IntFile},
    error::{CompileError, Diagnostics, ErrorCode, LoadError, ParseError, SourcePos},
    event::{EventKind, EventQueue, PendingEvent},
    handlers::{
        Handler, HandlerKind, KEY_BACKSPACE, KEY_ENTER, KEY_SPECIAL_BASE, telatxt_key,
    },
    heap::{Heap, ObjId, Object},
    intern::{Interns, StringId},
    loader::{PROJECT_FILE, SOURCE_EXT, load, load_with_sink, reload},
    registry::Registry,
    scheduler::{InputLine, Scheduler},
    session::{Session, SessionState},
    sink::{CollectSink, NullSink, StdSink, TextSink},
    value::{HandlerRef, Value},
    vm::{Invocation, Vm, invoke, run_thunk},
    world::World,
};
pub use bytecode::{Code, compile_program, linearize};
pub use parse::{ast, parse_source};
