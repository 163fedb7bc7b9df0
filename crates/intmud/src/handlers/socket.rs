//! TCP client socket (`socket`) and acceptor (`serv`).
//!
//! All blocking I/O happens on background worker threads that only enqueue
//! events; the script side writes through a shared handle and otherwise
//! reacts to `{field}_con` / `{field}_msg` / `{field}_fechou` /
//! `{field}_err` invocations driven by the scheduler.
//!
//! Protocol flag: 0 raw lines, 1 telnet (IAC sequences stripped before
//! delivery), 2 custom (raw, reserved for scripts). TLS variants of the
//! open operations are not provided by this build and fail with the usual
//! 0 sentinel.

use std::{
    cell::RefCell,
    io::{Read, Write as _},
    net::{SocketAddr, TcpListener, TcpStream},
    rc::Rc,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::Sender;
use log::debug;

use crate::{
    event::{EventKind, PendingEvent},
    heap::ObjId,
    intern::StringId,
    value::Value,
    world::World,
};

/// Protocol flag values.
pub const PROTO_RAW: i64 = 0;
pub const PROTO_TELNET: i64 = 1;

/// Event target of a socket's background workers. Shared so that handing
/// a socket over to another field (`sessao.soq = arg0`) retargets events
/// without restarting the reader.
pub type Route = Arc<Mutex<(ObjId, StringId)>>;

#[derive(Debug)]
pub struct Socket {
    /// Where worker events are delivered; updated on handler handover.
    route: Route,
    /// Write half, installed by the connector/acceptor.
    wire: Arc<Mutex<Option<TcpStream>>>,
    proto: Arc<AtomicI64>,
    /// Set when the script closed the socket, so the reader does not
    /// report the local close as a remote one.
    closed_locally: Arc<AtomicBool>,
    pub remote: String,
    pub local: String,
}

impl Socket {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            route: Arc::new(Mutex::new((owner, field))),
            wire: Arc::new(Mutex::new(None)),
            proto: Arc::new(AtomicI64::new(PROTO_RAW)),
            closed_locally: Arc::new(AtomicBool::new(false)),
            remote: String::new(),
            local: String::new(),
        }
    }

    /// Retargets the background workers' events.
    pub fn rebind(&mut self, owner: ObjId, field: StringId) {
        *self.route.lock().expect("route lock") = (owner, field);
    }

    /// Wraps an already-established connection (server accept path) and
    /// starts its reader.
    #[must_use]
    pub fn from_accepted(
        owner: ObjId,
        field: StringId,
        stream: TcpStream,
        peer: SocketAddr,
        sender: &Sender<PendingEvent>,
    ) -> Self {
        let mut sock = Self::new(owner, field);
        sock.remote = peer.to_string();
        sock.local = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        sock.install(stream, sender);
        sock
    }

    fn install(&mut self, stream: TcpStream, sender: &Sender<PendingEvent>) {
        let reader = stream.try_clone().ok();
        *self.wire.lock().expect("wire lock") = Some(stream);
        if let Some(reader) = reader {
            spawn_reader(
                reader,
                Arc::clone(&self.route),
                Arc::clone(&self.proto),
                Arc::clone(&self.closed_locally),
                sender.clone(),
            );
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> bool {
        let mut wire = self.wire.lock().expect("wire lock");
        match wire.as_mut() {
            Some(stream) => stream.write_all(bytes).is_ok(),
            None => false,
        }
    }

    pub fn close(&mut self) {
        self.closed_locally.store(true, Ordering::SeqCst);
        if let Some(stream) = self.wire.lock().expect("wire lock").take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.wire.lock().expect("wire lock").is_some()
    }
}

/// Reader worker: pumps received lines (after optional telnet stripping)
/// into the queue, then reports the close or error.
fn spawn_reader(
    mut stream: TcpStream,
    route: Route,
    proto: Arc<AtomicI64>,
    closed_locally: Arc<AtomicBool>,
    sender: Sender<PendingEvent>,
) {
    thread::spawn(move || {
        let send = |kind: EventKind| {
            let (owner, field) = *route.lock().expect("route lock");
            sender.send(PendingEvent { owner, field, kind }).is_ok()
        };
        let mut telnet = TelnetFilter::default();
        let mut pending = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    if !closed_locally.load(Ordering::SeqCst) {
                        send(EventKind::Fechou);
                    }
                    return;
                }
                Ok(n) => {
                    let chunk: Vec<u8> = if proto.load(Ordering::SeqCst) == PROTO_TELNET {
                        telnet.strip(&buf[..n])
                    } else {
                        buf[..n].to_vec()
                    };
                    pending.extend_from_slice(&chunk);
                    while let Some(at) = pending.iter().position(|&b| b == b'\n') {
                        let mut line: Vec<u8> = pending.drain(..=at).collect();
                        line.pop(); // the newline
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        let text = String::from_utf8_lossy(&line).into_owned();
                        if !send(EventKind::Msg(text)) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    if !closed_locally.load(Ordering::SeqCst) {
                        send(EventKind::Err(err.to_string()));
                    }
                    return;
                }
            }
        }
    });
}

/// Incremental telnet IAC stripper (RFC 854 command sequences).
#[derive(Debug, Default)]
struct TelnetFilter {
    state: TelnetState,
}

#[derive(Debug, Default, PartialEq)]
enum TelnetState {
    #[default]
    Data,
    Iac,
    /// IAC WILL/WONT/DO/DONT — one option byte follows.
    Option,
    /// Inside IAC SB ... IAC SE.
    Sub,
    SubIac,
}

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;

impl TelnetFilter {
    fn strip(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        for &b in input {
            match self.state {
                TelnetState::Data => {
                    if b == IAC {
                        self.state = TelnetState::Iac;
                    } else {
                        out.push(b);
                    }
                }
                TelnetState::Iac => match b {
                    IAC => {
                        out.push(IAC); // escaped literal 255
                        self.state = TelnetState::Data;
                    }
                    SB => self.state = TelnetState::Sub,
                    251..=254 => self.state = TelnetState::Option,
                    _ => self.state = TelnetState::Data,
                },
                TelnetState::Option => self.state = TelnetState::Data,
                TelnetState::Sub => {
                    if b == IAC {
                        self.state = TelnetState::SubIac;
                    }
                }
                TelnetState::SubIac => {
                    self.state = if b == SE { TelnetState::Data } else { TelnetState::Sub };
                }
            }
        }
        out
    }
}

pub(super) fn member_set(state: &Rc<RefCell<Socket>>, name: &str, value: &Value) -> bool {
    if name != "proto" {
        return false;
    }
    state.borrow().proto.store(value.to_i64(), Ordering::SeqCst);
    true
}

pub(super) fn op(
    state: &Rc<RefCell<Socket>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "abrir" => {
            let host = args.first().map(Value::to_text).unwrap_or_default();
            let port = args.get(1).map_or(0, Value::to_i64);
            let Ok(port) = u16::try_from(port) else {
                return Some(Value::Int(0));
            };
            if host.is_empty() || port == 0 {
                return Some(Value::Int(0));
            }
            let s = state.borrow();
            if s.is_open() {
                return Some(Value::Int(0));
            }
            s.closed_locally.store(false, Ordering::SeqCst);
            let wire = Arc::clone(&s.wire);
            let proto = Arc::clone(&s.proto);
            let closed = Arc::clone(&s.closed_locally);
            let route = Arc::clone(&s.route);
            drop(s);
            let sender = world.queue.sender();
            let addr = format!("{host}:{port}");
            // connect on a worker so the script never blocks
            thread::spawn(move || match TcpStream::connect(&addr) {
                Ok(stream) => {
                    let reader = stream.try_clone().ok();
                    *wire.lock().expect("wire lock") = Some(stream);
                    {
                        let (owner, field) = *route.lock().expect("route lock");
                        let _ = sender.send(PendingEvent {
                            owner,
                            field,
                            kind: EventKind::Con,
                        });
                    }
                    if let Some(reader) = reader {
                        spawn_reader(reader, route, proto, closed, sender);
                    }
                }
                Err(err) => {
                    debug!("socket connect {addr} failed: {err}");
                    let (owner, field) = *route.lock().expect("route lock");
                    let _ = sender.send(PendingEvent {
                        owner,
                        field,
                        kind: EventKind::Err(err.to_string()),
                    });
                }
            });
            Value::Int(1)
        }
        "abrirtls" => Value::Int(0),
        "escrevaln" => {
            let mut text = args.first().map(Value::to_text).unwrap_or_default().to_string();
            text.push_str("\r\n");
            Value::Int(i64::from(state.borrow().write_bytes(text.as_bytes())))
        }
        "escreva" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            Value::Int(i64::from(state.borrow().write_bytes(text.as_bytes())))
        }
        "fechar" => {
            state.borrow_mut().close();
            Value::Int(1)
        }
        "aberto" => Value::Int(i64::from(state.borrow().is_open())),
        "enderemoto" => Value::from(state.borrow().remote.as_str()),
        "enderlocal" => Value::from(state.borrow().local.as_str()),
        "proto" => {
            if let Some(v) = args.first() {
                state.borrow().proto.store(v.to_i64(), Ordering::SeqCst);
            }
            Value::Int(state.borrow().proto.load(Ordering::SeqCst))
        }
        _ => return None,
    };
    Some(out)
}

// =========================================================================
// Serv
// =========================================================================

#[derive(Debug)]
pub struct Serv {
    pub owner: ObjId,
    pub field: StringId,
    shutdown: Arc<AtomicBool>,
    pub port: u16,
    open: bool,
}

impl Serv {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            shutdown: Arc::new(AtomicBool::new(false)),
            port: 0,
            open: false,
        }
    }

    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.open = false;
        self.port = 0;
    }
}

pub(super) fn serv_op(
    state: &Rc<RefCell<Serv>>,
    world: &mut World,
    name: &str,
    args: &[Value],
) -> Option<Value> {
    let out = match name {
        "abrir" => {
            let addr = args.first().map(Value::to_text).unwrap_or_default();
            let port = args.get(1).map_or(0, Value::to_i64);
            let Ok(port) = u16::try_from(port) else {
                return Some(Value::Int(0));
            };
            let mut s = state.borrow_mut();
            if s.open || port == 0 {
                return Some(Value::Int(0));
            }
            let bind_to = if addr.is_empty() { "0.0.0.0" } else { &*addr };
            let Ok(listener) = TcpListener::bind((bind_to, port)) else {
                return Some(Value::Int(0));
            };
            let _ = listener.set_nonblocking(true);
            s.shutdown.store(false, Ordering::SeqCst);
            s.open = true;
            s.port = port;
            let shutdown = Arc::clone(&s.shutdown);
            let (owner, field) = (s.owner, s.field);
            drop(s);
            let sender = world.queue.sender();
            thread::spawn(move || {
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nonblocking(false);
                            if sender
                                .send(PendingEvent {
                                    owner,
                                    field,
                                    kind: EventKind::Accepted { stream, peer },
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(50));
                        }
                        Err(_) => return,
                    }
                }
            });
            Value::Int(1)
        }
        "abrirtls" => Value::Int(0),
        "aberto" => Value::Int(i64::from(state.borrow().open)),
        "porta" => Value::Int(i64::from(state.borrow().port)),
        "fechar" => {
            state.borrow_mut().close();
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
    fn telnet_filter_strips_commands() {
        let mut f = TelnetFilter::default();
        // IAC WILL ECHO around plain text
        let input = [b'h', IAC, 251, 1, b'i'];
        assert_eq!(f.strip(&input), b"hi");
        // escaped IAC stays
        let input = [IAC, IAC, b'!'];
        assert_eq!(f.strip(&input), [255, b'!']);
        // subnegotiation is removed even across chunks
        let first = [b'a', IAC, SB, 24];
        let second = [1, IAC, SE, b'b'];
        assert_eq!(f.strip(&first), b"a");
        assert_eq!(f.strip(&second), b"b");
    }
}
