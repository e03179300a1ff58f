//! In-memory transport: a duplex pair of crossbeam channels.
//!
//! Used by tests and in-process embeddings; carries already-typed messages,
//! so the only framing concern it shares with the TCP transport is delivery
//! order.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::proto::{ClientToServer, ServerToClient};

use super::{
    ClientChannel, Incoming, MessageReader, MessageWriter, ServerConnection, TransportError,
};

/// Creates a connected (client endpoint, server endpoint) pair.
pub fn memory_link() -> (MemoryClientChannel, MemoryConnection) {
    let (to_server_tx, to_server_rx) = unbounded::<ClientToServer>();
    let (to_client_tx, to_client_rx) = unbounded::<Incoming>();
    (
        MemoryClientChannel {
            tx: to_server_tx,
            rx: to_client_rx,
        },
        MemoryConnection {
            rx: to_server_rx,
            tx: to_client_tx,
        },
    )
}

pub struct MemoryClientChannel {
    tx: Sender<ClientToServer>,
    rx: Receiver<Incoming>,
}

impl ClientChannel for MemoryClientChannel {
    fn send(&mut self, msg: &ClientToServer) -> Result<(), TransportError> {
        self.tx.send(msg.clone()).map_err(|_| TransportError::Closed)
    }

    fn poll(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.rx.try_recv() {
            Ok(incoming) => Ok(Some(incoming)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Incoming>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(incoming) => Ok(Some(incoming)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

pub struct MemoryConnection {
    rx: Receiver<ClientToServer>,
    tx: Sender<Incoming>,
}

impl MemoryConnection {
    /// Sender half towards the client, for tests that need to push raw
    /// deliveries (including malformed ones) without a session loop.
    pub fn client_sender(&self) -> Sender<Incoming> {
        self.tx.clone()
    }
}

impl ServerConnection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError> {
        Ok((MemoryReader { rx: self.rx }, MemoryWriter { tx: self.tx }))
    }

    fn peer(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryReader {
    rx: Receiver<ClientToServer>,
}

impl MessageReader for MemoryReader {
    fn read_message(&mut self) -> Result<Option<ClientToServer>, TransportError> {
        match self.rx.recv() {
            Ok(msg) => Ok(Some(msg)),
            // Client endpoint dropped: clean close.
            Err(_) => Ok(None),
        }
    }
}

pub struct MemoryWriter {
    tx: Sender<Incoming>,
}

impl MessageWriter for MemoryWriter {
    fn write_message(&mut self, msg: &ServerToClient) -> Result<(), TransportError> {
        self.tx
            .send(Incoming::Message(msg.clone()))
            .map_err(|_| TransportError::Closed)
    }
}
