//! The Pending Event Queue: the single boundary between background I/O
//! workers and the script thread.
//!
//! Workers (socket readers, acceptors, process pumps) never touch script
//! state — they only send [`PendingEvent`]s. The scheduler drains the
//! queue once per tick and turns each event into an invocation of the
//! owning object's convention-named handler function
//! (`{field}_{suffix}`). Missing handler functions are silently ignored.

use std::net::{SocketAddr, TcpStream};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::{heap::ObjId, intern::StringId};

/// One queued event from a background worker.
#[derive(Debug)]
pub struct PendingEvent {
    /// Object whose handler field produced the event.
    pub owner: ObjId,
    /// The handler's declaring field name (the event-function prefix).
    pub field: StringId,
    pub kind: EventKind,
}

#[derive(Debug)]
pub enum EventKind {
    /// A received line (socket, process stdout). → `{field}_msg(line)`
    Msg(String),
    /// Connection or process ended. → `{field}_fechou()`
    Fechou,
    /// Outbound connection established. → `{field}_con()`
    Con,
    /// I/O failure; the handler has transitioned to closed.
    /// → `{field}_err(text)`
    Err(String),
    /// Console key press. → `{field}_tecla(key)`
    Tecla(i64),
    /// Runtime error observed by a debug handler. → `{field}_erro(code)`
    Erro(i64),
    /// Server accepted a connection; the scheduler wraps the stream in a
    /// new socket handler and passes it to `{field}_socket(novo)`.
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
    },
}

impl EventKind {
    /// Suffix of the convention-named handler function.
    #[must_use]
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Msg(_) => "msg",
            Self::Fechou => "fechou",
            Self::Con => "con",
            Self::Err(_) => "err",
            Self::Tecla(_) => "tecla",
            Self::Erro(_) => "erro",
            Self::Accepted { .. } => "socket",
        }
    }
}

/// Multi-producer single-consumer FIFO carrying events into the scheduler.
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<PendingEvent>,
    rx: Receiver<PendingEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A cloneable handle for background workers.
    #[must_use]
    pub fn sender(&self) -> Sender<PendingEvent> {
        self.tx.clone()
    }

    /// Drains everything currently queued, preserving arrival order.
    pub fn drain(&self) -> Vec<PendingEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order() {
        let queue = EventQueue::new();
        let tx = queue.sender();
        tx.send(PendingEvent {
            owner: ObjId::NONE,
            field: StringId::from_index(0),
            kind: EventKind::Msg("a".into()),
        })
        .unwrap();
        tx.send(PendingEvent {
            owner: ObjId::NONE,
            field: StringId::from_index(0),
            kind: EventKind::Fechou,
        })
        .unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0].kind, EventKind::Msg(_)));
        assert!(matches!(drained[1].kind, EventKind::Fechou));
        assert_eq!(drained[0].kind.suffix(), "msg");
    }
}
