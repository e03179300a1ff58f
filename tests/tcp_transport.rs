//! Socket-level checks: the framed-TCP transport against a real listener.

mod common;

use std::time::Duration;

use tandem::client::Client;
use tandem::config::Config;
use tandem::core::EventId;
use tandem::engine::LocalOrigin;
use tandem::server;
use tandem::transport::TcpClientChannel;

use common::{ChatMsg, ChatRoom, pump_until};

const DEADLINE: Duration = Duration::from_secs(5);

#[test]
fn clients_converge_over_tcp() {
    let config = Config::default();
    let handle = server::serve("127.0.0.1:0", &config).expect("bind ephemeral port");
    let addr = handle.local_addr();
    let max_frame_bytes = config.limits.max_frame_bytes;

    let channel = TcpClientChannel::connect(addr, max_frame_bytes).expect("connect");
    let mut a = Client::new(ChatRoom::reapply(), channel);

    a.dispatch(LocalOrigin::propose(ChatMsg::AddChat("over tcp".to_string())))
        .unwrap();
    assert!(pump_until(&mut a, DEADLINE, |c| {
        c.latest_known_event_id() == EventId(1) && c.pending_len() == 0
    }));

    // A second connection receives the full log as its catch-up bundle.
    let channel = TcpClientChannel::connect(addr, max_frame_bytes).expect("connect");
    let mut b = Client::new(ChatRoom::reapply(), channel);
    assert!(pump_until(&mut b, DEADLINE, |c| {
        c.latest_known_event_id() == EventId(1)
    }));
    assert_eq!(b.canonical(), &vec!["over tcp".to_string()]);

    handle.shutdown();
}

#[test]
fn broadcast_reaches_the_other_tcp_client() {
    let config = Config::default();
    let handle = server::serve("127.0.0.1:0", &config).expect("bind ephemeral port");
    let addr = handle.local_addr();
    let max_frame_bytes = config.limits.max_frame_bytes;

    let mut a = Client::new(
        ChatRoom::reapply(),
        TcpClientChannel::connect(addr, max_frame_bytes).expect("connect"),
    );
    let mut b = Client::new(
        ChatRoom::reapply(),
        TcpClientChannel::connect(addr, max_frame_bytes).expect("connect"),
    );

    // Make sure B is connected (empty catch-up folded) before A writes.
    b.pump_wait(Duration::from_millis(500)).unwrap();

    a.dispatch(LocalOrigin::propose(ChatMsg::AddChat("hello".to_string())))
        .unwrap();

    let expected = vec!["hello".to_string()];
    assert!(pump_until(&mut a, DEADLINE, |c| c.canonical() == &expected));
    assert!(pump_until(&mut b, DEADLINE, |c| c.canonical() == &expected));

    handle.shutdown();
}
