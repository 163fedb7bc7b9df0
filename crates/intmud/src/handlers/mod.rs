//! Handler types: the non-primitive variable kinds scripts manipulate
//! through dotted member syntax.
//!
//! Each kind is a component with a fixed operation set. A handler instance
//! is created when an object with a field of that type is created, stores a
//! back-link to the owning object and its field name (the prefix of its
//! convention-named event functions), and is disposed when the owner is
//! deleted.
//!
//! Instances wrap their state in `Rc<RefCell<_>>`: cloning a `Handler`
//! shares the state, which is also the semantics of assigning one handler
//! field to another (`soquete = arg0` hands the accepted connection over).
//! No handler operation panics across the VM boundary — unknown members
//! return `None` (the VM turns that into null plus a lookup-miss error),
//! and failures return 0/empty sentinels.

mod arq;
mod arqexec;
mod arqprog;
mod arqsav;
mod datahora;
mod debug;
mod indice;
mod lista;
mod nomeobj;
mod prog;
mod socket;
mod telatxt;
mod texto;
mod textomap;
mod timers;

use std::{cell::RefCell, rc::Rc};

use strum::{Display, EnumString, IntoStaticStr};

pub use arq::{ArqDir, ArqLog, ArqMem, ArqTxt};
pub use arqexec::ArqExec;
pub use arqprog::ArqProg;
pub use arqsav::ArqSav;
pub use datahora::DataHora;
pub use debug::Debug;
pub use indice::{IndiceItem, IndiceObj};
pub use lista::{ListaItem, ListaObj};
pub use nomeobj::NomeObj;
pub use prog::Prog;
pub use socket::{Serv, Socket};
pub use telatxt::{KEY_BACKSPACE, KEY_ENTER, KEY_SPECIAL_BASE, TelaTxt, key as telatxt_key};
pub use texto::{TextoPos, TextoTxt};
pub use textomap::{TextoObj, TextoVar};
pub use timers::{IntExec, IntInc, IntTempo};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

/// Every handler type name a variable can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum HandlerKind {
    ArqTxt,
    ArqMem,
    ArqDir,
    ArqLog,
    ArqSav,
    ArqProg,
    ArqExec,
    TextoTxt,
    TextoPos,
    TextoVar,
    TextoObj,
    ListaObj,
    ListaItem,
    IndiceObj,
    IndiceItem,
    NomeObj,
    IntTempo,
    IntExec,
    IntInc,
    DataHora,
    Debug,
    TelaTxt,
    Socket,
    Serv,
    Prog,
}

/// Resolves a handler value back to the live instance it refers to.
#[must_use]
pub fn resolve_handler(world: &World, value: &Value) -> Option<Handler> {
    let Value::Handler(href) = value else {
        return None;
    };
    world.heap.get(href.owner)?.handlers.get(&href.field).cloned()
}

/// A handler instance. Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub enum Handler {
    ArqTxt(Rc<RefCell<ArqTxt>>),
    ArqMem(Rc<RefCell<ArqMem>>),
    ArqDir(Rc<RefCell<ArqDir>>),
    ArqLog(Rc<RefCell<ArqLog>>),
    ArqSav(Rc<RefCell<ArqSav>>),
    ArqProg(Rc<RefCell<ArqProg>>),
    ArqExec(Rc<RefCell<ArqExec>>),
    TextoTxt(Rc<RefCell<TextoTxt>>),
    TextoPos(Rc<RefCell<TextoPos>>),
    TextoVar(Rc<RefCell<TextoVar>>),
    TextoObj(Rc<RefCell<TextoObj>>),
    ListaObj(Rc<RefCell<ListaObj>>),
    ListaItem(Rc<RefCell<ListaItem>>),
    IndiceObj(Rc<RefCell<IndiceObj>>),
    IndiceItem(Rc<RefCell<IndiceItem>>),
    NomeObj(Rc<RefCell<NomeObj>>),
    IntTempo(Rc<RefCell<IntTempo>>),
    IntExec(Rc<RefCell<IntExec>>),
    IntInc(Rc<RefCell<IntInc>>),
    DataHora(Rc<RefCell<DataHora>>),
    Debug(Rc<RefCell<Debug>>),
    TelaTxt(Rc<RefCell<TelaTxt>>),
    Socket(Rc<RefCell<Socket>>),
    Serv(Rc<RefCell<Serv>>),
    Prog(Rc<RefCell<Prog>>),
}

impl Handler {
    /// Builds a fresh instance for a declared field. Creation never does
    /// I/O; resources are acquired by the open operations.
    #[must_use]
    pub fn create(kind: HandlerKind, owner: ObjId, field: StringId) -> Self {
        match kind {
            HandlerKind::ArqTxt => Self::ArqTxt(Rc::new(RefCell::new(ArqTxt::new(owner, field)))),
            HandlerKind::ArqMem => Self::ArqMem(Rc::new(RefCell::new(ArqMem::new(owner, field)))),
            HandlerKind::ArqDir => Self::ArqDir(Rc::new(RefCell::new(ArqDir::new(owner, field)))),
            HandlerKind::ArqLog => Self::ArqLog(Rc::new(RefCell::new(ArqLog::new(owner, field)))),
            HandlerKind::ArqSav => Self::ArqSav(Rc::new(RefCell::new(ArqSav::new(owner, field)))),
            HandlerKind::ArqProg => {
                Self::ArqProg(Rc::new(RefCell::new(ArqProg::new(owner, field))))
            }
            HandlerKind::ArqExec => {
                Self::ArqExec(Rc::new(RefCell::new(ArqExec::new(owner, field))))
            }
            HandlerKind::TextoTxt => {
                Self::TextoTxt(Rc::new(RefCell::new(TextoTxt::new(owner, field))))
            }
            HandlerKind::TextoPos => {
                Self::TextoPos(Rc::new(RefCell::new(TextoPos::new(owner, field))))
            }
            HandlerKind::TextoVar => {
                Self::TextoVar(Rc::new(RefCell::new(TextoVar::new(owner, field))))
            }
            HandlerKind::TextoObj => {
                Self::TextoObj(Rc::new(RefCell::new(TextoObj::new(owner, field))))
            }
            HandlerKind::ListaObj => {
                Self::ListaObj(Rc::new(RefCell::new(ListaObj::new(owner, field))))
            }
            HandlerKind::ListaItem => {
                Self::ListaItem(Rc::new(RefCell::new(ListaItem::new(owner, field))))
            }
            HandlerKind::IndiceObj => {
                Self::IndiceObj(Rc::new(RefCell::new(IndiceObj::new(owner, field))))
            }
            HandlerKind::IndiceItem => {
                Self::IndiceItem(Rc::new(RefCell::new(IndiceItem::new(owner, field))))
            }
            HandlerKind::NomeObj => {
                Self::NomeObj(Rc::new(RefCell::new(NomeObj::new(owner, field))))
            }
            HandlerKind::IntTempo => {
                Self::IntTempo(Rc::new(RefCell::new(IntTempo::new(owner, field))))
            }
            HandlerKind::IntExec => {
                Self::IntExec(Rc::new(RefCell::new(IntExec::new(owner, field))))
            }
            HandlerKind::IntInc => Self::IntInc(Rc::new(RefCell::new(IntInc::new(owner, field)))),
            HandlerKind::DataHora => {
                Self::DataHora(Rc::new(RefCell::new(DataHora::new(owner, field))))
            }
            HandlerKind::Debug => Self::Debug(Rc::new(RefCell::new(Debug::new(owner, field)))),
            HandlerKind::TelaTxt => {
                Self::TelaTxt(Rc::new(RefCell::new(TelaTxt::new(owner, field))))
            }
            HandlerKind::Socket => Self::Socket(Rc::new(RefCell::new(Socket::new(owner, field)))),
            HandlerKind::Serv => Self::Serv(Rc::new(RefCell::new(Serv::new(owner, field)))),
            HandlerKind::Prog => Self::Prog(Rc::new(RefCell::new(Prog::new(owner, field)))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        match self {
            Self::ArqTxt(_) => HandlerKind::ArqTxt,
            Self::ArqMem(_) => HandlerKind::ArqMem,
            Self::ArqDir(_) => HandlerKind::ArqDir,
            Self::ArqLog(_) => HandlerKind::ArqLog,
            Self::ArqSav(_) => HandlerKind::ArqSav,
            Self::ArqProg(_) => HandlerKind::ArqProg,
            Self::ArqExec(_) => HandlerKind::ArqExec,
            Self::TextoTxt(_) => HandlerKind::TextoTxt,
            Self::TextoPos(_) => HandlerKind::TextoPos,
            Self::TextoVar(_) => HandlerKind::TextoVar,
            Self::TextoObj(_) => HandlerKind::TextoObj,
            Self::ListaObj(_) => HandlerKind::ListaObj,
            Self::ListaItem(_) => HandlerKind::ListaItem,
            Self::IndiceObj(_) => HandlerKind::IndiceObj,
            Self::IndiceItem(_) => HandlerKind::IndiceItem,
            Self::NomeObj(_) => HandlerKind::NomeObj,
            Self::IntTempo(_) => HandlerKind::IntTempo,
            Self::IntExec(_) => HandlerKind::IntExec,
            Self::IntInc(_) => HandlerKind::IntInc,
            Self::DataHora(_) => HandlerKind::DataHora,
            Self::Debug(_) => HandlerKind::Debug,
            Self::TelaTxt(_) => HandlerKind::TelaTxt,
            Self::Socket(_) => HandlerKind::Socket,
            Self::Serv(_) => HandlerKind::Serv,
            Self::Prog(_) => HandlerKind::Prog,
        }
    }

    /// Value read for value-like handlers (`x = tempo`); `None` means the
    /// field read yields the handler reference itself.
    #[must_use]
    pub fn read_value(&self) -> Option<Value> {
        match self {
            Self::IntTempo(s) => Some(Value::Int(s.borrow().value)),
            Self::IntExec(s) => Some(Value::Int(s.borrow().value)),
            Self::IntInc(s) => Some(Value::Double(s.borrow().seconds())),
            _ => None,
        }
    }

    /// Plain assignment to the handler field (`tempo = 30`). Non-value
    /// handlers ignore anything that is not a same-kind handler share
    /// (which the VM handles before calling this).
    pub fn assign(&self, _world: &mut World, value: Value) {
        match self {
            Self::IntTempo(s) => s.borrow_mut().value = value.to_i64(),
            Self::IntExec(s) => s.borrow_mut().assign(value.to_i64()),
            Self::IntInc(s) => s.borrow_mut().set_seconds(value.to_f64()),
            _ => {}
        }
    }

    /// Member write (`data.ano = 2024`). Returns false for members that
    /// are not assignable.
    pub fn member_set(&self, world: &mut World, name: &str, value: Value) -> bool {
        match self {
            Self::DataHora(s) => datahora::member_set(s, name, &value),
            Self::IndiceObj(s) => indice::member_set(s, world, name, &value),
            Self::Socket(s) => socket::member_set(s, name, &value),
            Self::Debug(s) => debug::member_set(s, world, name, &value),
            _ => false,
        }
    }

    /// Member access: both `h.nome` and `h.nome(args)` land here. `None`
    /// means the member is unknown (the VM records a lookup miss).
    pub fn op(
        &self,
        world: &mut World,
        name: &str,
        args: &[Value],
        countdown: bool,
    ) -> Option<Value> {
        match self {
            Self::ArqTxt(s) => arq::txt_op(s, name, args),
            Self::ArqMem(s) => arq::mem_op(s, name, args),
            Self::ArqDir(s) => arq::dir_op(s, name, args),
            Self::ArqLog(s) => arq::log_op(s, name, args),
            Self::ArqSav(s) => arqsav::op(s, world, name, args),
            Self::ArqProg(s) => arqprog::op(s, world, name, args),
            Self::ArqExec(s) => arqexec::op(s, world, name, args),
            Self::TextoTxt(s) => texto::txt_op(s, name, args),
            Self::TextoPos(s) => texto::pos_op(s, world, name, args),
            Self::TextoVar(s) => textomap::var_op(s, name, args),
            Self::TextoObj(s) => textomap::obj_op(s, world, name, args),
            Self::ListaObj(s) => lista::obj_op(s, world, name, args),
            Self::ListaItem(s) => lista::item_op(s, world, name, args),
            Self::IndiceObj(s) => indice::obj_op(s, world, name, args),
            Self::IndiceItem(s) => indice::item_op(s, world, name, args, countdown),
            Self::NomeObj(s) => nomeobj::op(s, world, name, args),
            Self::IntTempo(s) => timers::tempo_op(s, name, args),
            Self::IntExec(s) => timers::exec_op(s, name, args),
            Self::IntInc(s) => timers::inc_op(s, name, args),
            Self::DataHora(s) => datahora::op(s, name, args),
            Self::Debug(s) => debug::op(s, world, name, args),
            Self::TelaTxt(s) => telatxt::op(s, world, name, args),
            Self::Socket(s) => socket::op(s, world, name, args),
            Self::Serv(s) => socket::serv_op(s, world, name, args),
            Self::Prog(s) => prog::op(s, world, name, args, countdown),
        }
    }

    /// Retargets a shared handler at a new owning field. Assigning a
    /// handler to a same-kind field shares the state and moves its event
    /// delivery to the new field's name.
    pub fn rebind(&self, owner: ObjId, field: StringId) {
        match self {
            Self::ArqTxt(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqMem(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqDir(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqLog(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqSav(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqProg(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ArqExec(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::TextoTxt(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::TextoPos(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::TextoVar(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::TextoObj(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ListaObj(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::ListaItem(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::IndiceObj(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::IndiceItem(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::NomeObj(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::IntTempo(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::IntExec(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::IntInc(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::DataHora(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::Debug(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::TelaTxt(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::Socket(s) => s.borrow_mut().rebind(owner, field),
            Self::Serv(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
            Self::Prog(s) => {
                let mut s = s.borrow_mut();
                s.owner = owner;
                s.field = field;
            }
        }
    }

    /// Releases owned OS resources. Called when the owning object is
    /// deleted and at interpreter shutdown; closing twice is harmless.
    pub fn dispose(&self) {
        match self {
            Self::ArqTxt(s) => s.borrow_mut().close(),
            Self::ArqDir(s) => s.borrow_mut().close(),
            Self::ArqLog(s) => s.borrow_mut().close(),
            Self::ArqExec(s) => s.borrow_mut().close(),
            Self::Socket(s) => s.borrow_mut().close(),
            Self::Serv(s) => s.borrow_mut().close(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod kind_tests {
    use super::*;

    #[test]
    fn kind_names_parse_case_insensitively() {
        assert_eq!("inttempo".parse::<HandlerKind>(), Ok(HandlerKind::IntTempo));
        assert_eq!("ListaObj".parse::<HandlerKind>(), Ok(HandlerKind::ListaObj));
        assert!("int32".parse::<HandlerKind>().is_err());
        assert_eq!(HandlerKind::ArqTxt.to_string(), "arqtxt");
    }

    #[test]
    fn cloning_shares_state() {
        let h = Handler::create(HandlerKind::IntTempo, ObjId::NONE, StringId::from_index(0));
        let shared = h.clone();
        if let Handler::IntTempo(s) = &h {
            s.borrow_mut().value = 30;
        }
        assert!(matches!(shared.read_value(), Some(Value::Int(30))));
    }
}
