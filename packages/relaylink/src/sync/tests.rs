use alloc::{collections::VecDeque, string::String, vec, vec::Vec};

use embassy_futures::block_on;

use super::wire::{self, InboundKind};
use super::*;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::kv::MemoryKv;
use crate::relay::{Actuator, Origin, RelayStore};

const NAMES: [&str; 4] = ["Living Room", "Bedroom", "Kitchen", "Fan"];
const LINK: LinkInfo = LinkInfo {
    ip: [10, 0, 0, 7],
    rssi: None,
};

#[derive(Default)]
struct NullActuator;

impl Actuator for NullActuator {
    fn drive(&mut self, _index: usize, _on: bool) {}
}

type Relays = RelayStore<MemoryKv, NullActuator, 4>;

fn relays() -> Relays {
    let mut relays = RelayStore::new(MemoryKv::new(), NullActuator, NAMES);
    relays.init();
    relays
}

fn persisted_writes(relays: Relays) -> usize {
    relays.into_parts().0.writes()
}

#[derive(Default)]
struct MockRest {
    replies: VecDeque<Result<HttpReply, SyncError>>,
    requests: Vec<(Method, String, Option<String>)>,
    reject_puts: bool,
}

impl MockRest {
    fn count(&self, method: Method) -> usize {
        self.requests.iter().filter(|(m, _, _)| *m == method).count()
    }

    fn queue_body(&mut self, body: &str) {
        self.replies.push_back(Ok(HttpReply {
            status: 200,
            body: body.as_bytes().to_vec(),
        }));
    }
}

impl RestTransport for MockRest {
    async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpReply, SyncError> {
        self.requests.push((
            method,
            String::from(path),
            body.map(|body| String::from_utf8_lossy(body).into_owned()),
        ));
        if method == Method::Put && self.reject_puts {
            return Ok(HttpReply {
                status: 403,
                body: Vec::new(),
            });
        }
        self.replies.pop_front().unwrap_or(Ok(HttpReply {
            status: 200,
            body: b"null".to_vec(),
        }))
    }
}

#[derive(Default)]
struct MockStream {
    connect_results: VecDeque<Result<(), SyncError>>,
    connects: usize,
    inbound: VecDeque<StreamEvent>,
    sent: Vec<String>,
    fail_sends: bool,
    closed: bool,
}

impl MockStream {
    fn state_updates(&self) -> usize {
        self.sent
            .iter()
            .filter(|text| text.contains("state_update"))
            .count()
    }
}

impl StreamTransport for MockStream {
    async fn connect(&mut self, _path: &str) -> Result<(), SyncError> {
        self.connects += 1;
        self.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn send_text(&mut self, text: &str) -> Result<(), SyncError> {
        if self.fail_sends {
            return Err(SyncError::PeerUnreachable);
        }
        self.sent.push(String::from(text));
        Ok(())
    }

    async fn poll(&mut self) -> Option<StreamEvent> {
        self.inbound.pop_front()
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

fn poll_engine(rest: MockRest) -> PollSync<MockRest> {
    PollSync::new(
        SyncConfig::new("backend", "SH-001")
            .with_strategy(crate::config::SyncStrategy::Poll)
            .with_api_key("k"),
        rest,
    )
}

fn stream_engine(stream: MockStream) -> StreamSync<MockStream> {
    StreamSync::new(SyncConfig::new("backend", "SH-001"), stream)
}

fn command(relay_states: &str) -> StreamEvent {
    StreamEvent::Text(alloc::format!(r#"{{"type":"command","data":{}}}"#, relay_states))
}

// ---- wire ----

#[test]
fn wire_keys_are_one_based_and_bounded() {
    assert_eq!(wire::wire_key(0), "relay1");
    assert_eq!(wire::parse_wire_key("relay1", 4), Some(0));
    assert_eq!(wire::parse_wire_key("relay4", 4), Some(3));
    assert_eq!(wire::parse_wire_key("relay0", 4), None);
    assert_eq!(wire::parse_wire_key("relay5", 4), None);
    assert_eq!(wire::parse_wire_key("relay01", 4), None);
    assert_eq!(wire::parse_wire_key("relay-1", 4), None);
    assert_eq!(wire::parse_wire_key("fan1", 4), None);
}

#[test]
fn state_update_matches_schema() {
    let text = wire::encode_state_update(&[true, false]).expect("encode");
    assert_eq!(
        text,
        r#"{"type":"state_update","data":{"relay1":{"state":true},"relay2":{"state":false}}}"#
    );
}

#[test]
fn snapshot_carries_names() {
    let relays = relays();
    let body = wire::encode_snapshot(&relays.snapshot()).expect("encode");
    assert!(body.starts_with(r#"{"relay1":{"state":false,"name":"Living Room"}"#));
}

#[test]
fn status_omits_missing_ip() {
    let body = wire::encode_status(&wire::DeviceStatus {
        online: true,
        last_seen: 42,
        ip: None,
    })
    .expect("encode");
    assert_eq!(body, r#"{"online":true,"lastSeen":42}"#);
}

#[test]
fn inbound_decoding_filters_bad_keys() {
    let inbound = wire::decode_inbound(
        r#"{"type":"update","data":{"relay2":{"state":true},"relay9":{"state":true},"relay0":{"state":true},"relay3":{}}}"#,
        4,
    )
    .expect("decode");
    assert_eq!(inbound.kind, InboundKind::Update);
    assert_eq!(inbound.states, vec![(1, true)]);

    let heartbeat = wire::decode_inbound(wire::HEARTBEAT, 4).expect("decode");
    assert_eq!(heartbeat.kind, InboundKind::Heartbeat);
    assert!(heartbeat.states.is_empty());

    assert_eq!(
        wire::decode_inbound("not json", 4),
        Err(SyncError::MalformedPayload)
    );
}

#[test]
fn rest_null_and_empty_bodies_mean_no_data() {
    assert_eq!(wire::decode_relays(b"null", 4), Ok(None));
    assert_eq!(wire::decode_relays(b"", 4), Ok(None));
    assert_eq!(
        wire::decode_relays(br#"{"relay4":{"state":true,"name":"Fan"}}"#, 4),
        Ok(Some(vec![(3, true)]))
    );
    assert_eq!(
        wire::decode_relays(b"[1,2]", 4),
        Err(SyncError::MalformedPayload)
    );
}

#[test]
fn status_codes_map_to_errors() {
    assert_eq!(status_error(204), None);
    assert_eq!(status_error(401), Some(SyncError::Unauthorized));
    assert_eq!(status_error(403), Some(SyncError::Unauthorized));
    assert_eq!(status_error(503), Some(SyncError::PeerUnreachable));
}

#[test]
fn request_and_reply_framing() {
    let request = encode_request(Method::Patch, "backend:8000", "/api/v1/devices/SH-001", Some(b"{}"));
    assert_eq!(
        request,
        b"PATCH /api/v1/devices/SH-001 HTTP/1.0\r\nHost: backend:8000\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}".to_vec()
    );
    let get = encode_request(Method::Get, "h", "/x", None);
    assert!(get.ends_with(b"Connection: close\r\n\r\n"));

    let reply = HttpReply::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nnull").expect("reply");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"null");
    assert_eq!(
        HttpReply::parse(b"HTTP/1.1 200 OK\r\n"),
        Err(SyncError::MalformedPayload)
    );
}

// ---- poll ----

#[test]
fn poll_activation_announces_then_pushes() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));

    let requests = &engine.transport().requests;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, Method::Patch);
    assert_eq!(requests[0].1, "/api/v1/devices/SH-001?api_key=k");
    assert!(requests[0]
        .2
        .as_deref()
        .is_some_and(|body| body.contains(r#""ip":"10.0.0.7""#)));
    assert_eq!(requests[1].0, Method::Put);
    assert_eq!(requests[1].1, "/api/v1/devices/SH-001/relays?api_key=k");
    assert!(engine.session().connected);
}

#[test]
fn poll_applies_differing_peer_values_as_remote() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));

    engine
        .transport()
        .queue_body(r#"{"relay1":{"state":true},"relay2":{"state":false}}"#);
    block_on(engine.reconcile(2_000, &mut relays));
    assert_eq!(relays.states(), [true, false, false, false]);

    // The applied value is not pushed back.
    block_on(engine.reconcile(2_100, &mut relays));
    assert_eq!(engine.transport().count(Method::Put), 1);
    let changes = relays.drain_changes();
    assert!(changes.is_empty());
}

#[test]
fn poll_respects_interval() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));
    block_on(engine.reconcile(500, &mut relays));
    block_on(engine.reconcile(1_999, &mut relays));
    assert_eq!(engine.transport().count(Method::Get), 0);
    block_on(engine.reconcile(2_000, &mut relays));
    block_on(engine.reconcile(2_500, &mut relays));
    assert_eq!(engine.transport().count(Method::Get), 1);
}

#[test]
fn poll_pushes_local_change_before_next_poll() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));

    relays.set(2, true, Origin::Local).expect("set");
    block_on(engine.reconcile(100, &mut relays));
    let last = engine.transport().requests.last().cloned().expect("request");
    assert_eq!(last.0, Method::Put);
    assert!(last
        .2
        .is_some_and(|body| body.contains(r#""relay3":{"state":true"#)));
}

#[test]
fn failed_push_holds_peer_values_for_one_interval() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));

    relays.set(0, true, Origin::Local).expect("set");
    engine.transport().replies.push_back(Err(SyncError::PeerUnreachable));
    block_on(engine.reconcile(100, &mut relays));

    // Within one interval of the change the push is retried and the peer is not read.
    engine.transport().replies.push_back(Err(SyncError::PeerUnreachable));
    block_on(engine.reconcile(2_000, &mut relays));
    assert_eq!(engine.transport().count(Method::Get), 0);
    assert_eq!(engine.transport().count(Method::Put), 3);
    assert_eq!(relays.state(0), Ok(true));

    // After that the peer wins even though the push still fails.
    engine.transport().replies.push_back(Err(SyncError::PeerUnreachable));
    engine.transport().queue_body(r#"{"relay1":{"state":false}}"#);
    block_on(engine.reconcile(4_000, &mut relays));
    assert_eq!(engine.transport().count(Method::Get), 1);
    assert_eq!(relays.state(0), Ok(false));
}

#[test]
fn rejected_pushes_do_not_stop_polling() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest {
        reject_puts: true,
        ..MockRest::default()
    });
    block_on(engine.activate(0, LINK, &mut relays));

    engine.transport().queue_body(r#"{"relay1":{"state":true}}"#);
    for second in 1..=4u64 {
        block_on(engine.reconcile(second * 1_000, &mut relays));
    }
    assert_eq!(relays.state(0), Ok(true));
    assert!(engine.transport().count(Method::Get) >= 1);
    assert!(engine.transport().count(Method::Put) >= 2);
}

#[test]
fn acknowledged_push_resumes_normal_polling() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));

    relays.set(0, true, Origin::Local).expect("set");
    engine.transport().replies.push_back(Err(SyncError::PeerUnreachable));
    block_on(engine.reconcile(100, &mut relays));

    // Retry succeeds, so the same pass reads the peer.
    block_on(engine.reconcile(2_000, &mut relays));
    assert_eq!(engine.transport().count(Method::Get), 1);
    assert_eq!(relays.state(0), Ok(true));
}

#[test]
fn poll_failure_leaves_state_untouched() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));
    engine.transport().replies.push_back(Ok(HttpReply {
        status: 401,
        body: br#"{"relay1":{"state":true}}"#.to_vec(),
    }));
    block_on(engine.reconcile(2_000, &mut relays));
    engine.transport().queue_body("{garbage");
    block_on(engine.reconcile(4_000, &mut relays));
    assert_eq!(relays.states(), [false; 4]);
}

#[test]
fn poll_heartbeat_on_its_own_cadence() {
    let mut relays = relays();
    let mut engine = poll_engine(MockRest::default());
    block_on(engine.activate(0, LINK, &mut relays));
    block_on(engine.reconcile(29_999, &mut relays));
    assert_eq!(engine.transport().count(Method::Patch), 1);
    block_on(engine.reconcile(30_000, &mut relays));
    assert_eq!(engine.transport().count(Method::Patch), 2);
    let last_patch = engine
        .transport()
        .requests
        .iter()
        .rev()
        .find(|(m, _, _)| *m == Method::Patch)
        .and_then(|(_, _, body)| body.clone());
    assert_eq!(
        last_patch.as_deref(),
        Some(r#"{"online":true,"lastSeen":30000}"#)
    );
}

// ---- stream ----

#[test]
fn stream_connect_pushes_full_state() {
    let mut relays = relays();
    relays.set(1, true, Origin::Local).expect("set");
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));

    assert!(engine.session().connected);
    assert_eq!(engine.transport().sent.len(), 1);
    assert_eq!(
        engine.transport().sent[0],
        r#"{"type":"state_update","data":{"relay1":{"state":false},"relay2":{"state":true},"relay3":{"state":false},"relay4":{"state":false}}}"#
    );
}

#[test]
fn stream_command_applies_without_echo() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));
    let sent_after_connect = engine.transport().sent.len();

    engine
        .transport()
        .inbound
        .push_back(command(r#"{"relay3":{"state":true}}"#));
    block_on(engine.reconcile(100, &mut relays));
    block_on(engine.reconcile(200, &mut relays));

    assert_eq!(relays.state(2), Ok(true));
    assert_eq!(engine.transport().sent.len(), sent_after_connect);
}

#[test]
fn stream_equal_remote_value_is_silent() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));
    let sent = engine.transport().sent.len();

    engine
        .transport()
        .inbound
        .push_back(command(r#"{"relay1":{"state":false}}"#));
    block_on(engine.reconcile(100, &mut relays));
    block_on(engine.reconcile(200, &mut relays));

    assert_eq!(engine.transport().sent.len(), sent);
    assert_eq!(persisted_writes(relays), 0);
}

#[test]
fn stream_ignores_echoed_state_update_and_unknown_types() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));

    let transport = engine.transport();
    transport.inbound.push_back(StreamEvent::Text(String::from(
        r#"{"type":"state_update","data":{"relay1":{"state":true}}}"#,
    )));
    transport
        .inbound
        .push_back(StreamEvent::Text(String::from(r#"{"type":"ota","data":{}}"#)));
    transport
        .inbound
        .push_back(StreamEvent::Text(String::from("{oops")));
    block_on(engine.reconcile(100, &mut relays));

    assert_eq!(relays.states(), [false; 4]);
    assert!(engine.session().connected);
}

#[test]
fn stream_local_change_sends_state_update() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));

    relays.toggle(3, Origin::Local).expect("toggle");
    block_on(engine.reconcile(50, &mut relays));
    assert_eq!(engine.transport().state_updates(), 2);
}

#[test]
fn stream_heartbeat_every_ping_interval() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));
    block_on(engine.reconcile(24_999, &mut relays));
    block_on(engine.reconcile(25_000, &mut relays));
    block_on(engine.reconcile(30_000, &mut relays));
    block_on(engine.reconcile(50_000, &mut relays));
    let heartbeats = engine
        .transport()
        .sent
        .iter()
        .filter(|text| text.as_str() == wire::HEARTBEAT)
        .count();
    assert_eq!(heartbeats, 2);
}

#[test]
fn stream_reconnect_follows_backoff_schedule() {
    let mut relays = relays();
    let stream = MockStream {
        connect_results: VecDeque::from([
            Err(SyncError::PeerUnreachable),
            Err(SyncError::PeerUnreachable),
            Err(SyncError::PeerUnreachable),
            Err(SyncError::PeerUnreachable),
            Ok(()),
        ]),
        ..MockStream::default()
    };
    let mut engine = stream_engine(stream);
    engine.activate(0, &mut relays);

    // Failures at 0, 5000, 10000, 15000; the fourth waits 10000.
    let mut now = 0;
    for expected_delay in [5_000u64, 5_000, 5_000, 10_000] {
        block_on(engine.reconcile(now, &mut relays));
        assert!(!engine.session().connected);
        block_on(engine.reconcile(now + expected_delay - 1, &mut relays));
        now += expected_delay;
    }
    assert_eq!(engine.transport().connects, 4);
    assert_eq!(engine.session().backoff.attempt(), 4);

    block_on(engine.reconcile(now, &mut relays));
    assert!(engine.session().connected);
    assert_eq!(engine.session().backoff.attempt(), 0);
    assert_eq!(engine.session().backoff.interval_ms(), 5_000);
}

#[test]
fn unauthorized_does_not_advance_backoff() {
    let mut relays = relays();
    let stream = MockStream {
        connect_results: VecDeque::from([
            Err(SyncError::Unauthorized),
            Err(SyncError::Unauthorized),
        ]),
        ..MockStream::default()
    };
    let mut engine = stream_engine(stream);
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));
    block_on(engine.reconcile(5_000, &mut relays));
    assert_eq!(engine.transport().connects, 2);
    assert_eq!(engine.session().backoff.attempt(), 0);
}

#[test]
fn stream_loss_schedules_reconnect() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));

    engine.transport().inbound.push_back(StreamEvent::Closed);
    block_on(engine.reconcile(1_000, &mut relays));
    assert!(!engine.session().connected);

    block_on(engine.reconcile(5_999, &mut relays));
    assert_eq!(engine.transport().connects, 1);
    block_on(engine.reconcile(6_000, &mut relays));
    assert_eq!(engine.transport().connects, 2);
    assert!(engine.session().connected);
}

#[test]
fn stream_send_failure_marks_disconnected() {
    let mut relays = relays();
    let mut engine = stream_engine(MockStream::default());
    engine.activate(0, &mut relays);
    block_on(engine.reconcile(0, &mut relays));

    engine.transport().fail_sends = true;
    relays.set(0, true, Origin::Local).expect("set");
    block_on(engine.reconcile(10, &mut relays));
    assert!(!engine.session().connected);
}

#[test]
fn engine_enum_dispatches_and_deactivates() {
    let mut relays = relays();
    let mut engine: SyncEngine<NoTransport, MockStream> =
        SyncEngine::stream(SyncConfig::new("backend", "SH-001"), MockStream::default());
    block_on(engine.activate(0, LINK, &mut relays));
    block_on(engine.reconcile(0, &mut relays));
    assert!(engine.session().connected);
    assert_eq!(engine.session().strategy, crate::config::SyncStrategy::Stream);

    block_on(engine.deactivate());
    assert!(!engine.session().connected);
    let SyncEngine::Stream(stream) = &mut engine else {
        panic!("stream engine expected");
    };
    assert!(stream.transport().closed);
}
