//! Shared test fixture: a small chat workspace and an in-process server.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tandem::client::Client;
use tandem::config::Limits;
use tandem::core::{RejectionStrategy, SharedDecodeError, Workspace};
use tandem::server::{ServerCore, start_core};
use tandem::transport::{ClientChannel, Incoming, MemoryClientChannel, memory_link};

/// The shared message vocabulary of the chat example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatMsg {
    AddChat(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatLocal {
    Status(String),
}

/// Chat room workspace: shared state is the ordered transcript, local state
/// collects status lines (decode errors included).
pub struct ChatRoom {
    drop_on_reject: bool,
}

impl ChatRoom {
    pub fn reapply() -> Self {
        Self {
            drop_on_reject: false,
        }
    }

    pub fn dropping() -> Self {
        Self {
            drop_on_reject: true,
        }
    }
}

impl Workspace for ChatRoom {
    type SharedMsg = ChatMsg;
    type SharedState = Vec<String>;
    type LocalMsg = ChatLocal;
    type LocalState = Vec<String>;
    type View = Vec<String>;

    fn init_shared(&self) -> Vec<String> {
        Vec::new()
    }

    fn init_local(&self) -> Vec<String> {
        Vec::new()
    }

    fn reduce_shared(&self, msg: &ChatMsg, state: &Vec<String>) -> Vec<String> {
        let ChatMsg::AddChat(line) = msg;
        let mut next = state.clone();
        next.push(line.clone());
        next
    }

    fn reduce_local(&self, msg: ChatLocal, state: &Vec<String>) -> (Vec<String>, Vec<ChatLocal>) {
        let ChatLocal::Status(line) = msg;
        let mut next = state.clone();
        next.push(line);
        (next, Vec::new())
    }

    fn encode_shared(&self, msg: &ChatMsg) -> Value {
        serde_json::to_value(msg).expect("chat messages encode")
    }

    fn decode_shared(&self, value: &Value) -> Result<ChatMsg, SharedDecodeError> {
        serde_json::from_value(value.clone())
            .map_err(|err| SharedDecodeError::new(err.to_string()))
    }

    fn on_decode_error(&self, reason: String) -> ChatLocal {
        ChatLocal::Status(format!("decode error: {reason}"))
    }

    fn view(&self, shared: &Vec<String>, _local: &Vec<String>) -> Vec<String> {
        shared.clone()
    }

    fn rejection_strategy(&self) -> RejectionStrategy<ChatMsg, Vec<String>> {
        if self.drop_on_reject {
            RejectionStrategy::DropAllPending
        } else {
            RejectionStrategy::ReapplyAllPending
        }
    }
}

/// A real serializer state thread with in-memory sessions attached to it.
pub struct TestServer {
    core: ServerCore,
    state_handle: JoinHandle<()>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with_limits(Limits::default())
    }

    pub fn start_with_limits(limits: Limits) -> Self {
        let (core, state_handle) = start_core(limits);
        Self { core, state_handle }
    }

    /// Connects one client over the in-memory transport.
    pub fn connect(&self) -> MemoryClientChannel {
        let (channel, conn) = memory_link();
        self.core.attach(conn);
        channel
    }

    /// Like `connect`, also returning a sender that injects raw deliveries
    /// into the client, the way a network decoder surfaces malformed frames.
    pub fn connect_with_injector(
        &self,
    ) -> (MemoryClientChannel, crossbeam::channel::Sender<Incoming>) {
        let (channel, conn) = memory_link();
        let injector = conn.client_sender();
        self.core.attach(conn);
        (channel, injector)
    }

    pub fn stop(self) {
        self.core
            .shutdown_flag()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        drop(self.core);
        let _ = self.state_handle.join();
    }
}

/// Pumps the client until `cond` holds or the deadline passes. Returns
/// whether the condition held.
pub fn pump_until<A, C, F>(client: &mut Client<A, C>, deadline: Duration, mut cond: F) -> bool
where
    A: Workspace,
    C: ClientChannel,
    F: FnMut(&Client<A, C>) -> bool,
{
    let start = Instant::now();
    loop {
        if cond(client) {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        client
            .pump_wait(Duration::from_millis(50))
            .expect("client pump");
    }
}
