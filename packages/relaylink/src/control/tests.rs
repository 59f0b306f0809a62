use alloc::{collections::VecDeque, string::String, vec::Vec};

use embassy_futures::block_on;

use super::*;
use crate::config::{ProvisioningPolicy, SyncConfig};
use crate::credentials::{CredentialStore, NetworkIdentity};
use crate::error::{ConnectivityError, SyncError};
use crate::kv::MemoryKv;
use crate::portal::STATUS_CONFLICT;
use crate::radio::{AccessPointSettings, LinkInfo, ScanEntry};
use crate::relay::Origin;
use crate::sync::{NoTransport, StreamEvent};

const NAMES: [&str; 4] = ["Living Room", "Bedroom", "Kitchen", "Fan"];
const LINK: LinkInfo = LinkInfo {
    ip: [192, 168, 1, 40],
    rssi: Some(-52),
};

#[derive(Default)]
struct MockRadio {
    join_results: VecDeque<Result<LinkInfo, ConnectivityError>>,
    link: Option<LinkInfo>,
    scan: Vec<ScanEntry>,
}

impl WifiRadio for MockRadio {
    async fn join(
        &mut self,
        _identity: &NetworkIdentity,
        _timeout_ms: u64,
    ) -> Result<LinkInfo, ConnectivityError> {
        let result = self
            .join_results
            .pop_front()
            .unwrap_or(Err(ConnectivityError::Timeout));
        self.link = result.ok();
        result
    }

    fn link(&mut self) -> Option<LinkInfo> {
        self.link
    }

    async fn scan(&mut self) -> Result<Vec<ScanEntry>, ConnectivityError> {
        Ok(self.scan.clone())
    }

    async fn open_portal(&mut self, _settings: &AccessPointSettings) -> Result<(), ConnectivityError> {
        Ok(())
    }

    async fn close_portal(&mut self) -> Result<(), ConnectivityError> {
        Ok(())
    }

    async fn open_hotspot(&mut self, _settings: &AccessPointSettings) -> Result<(), ConnectivityError> {
        Ok(())
    }
}

#[derive(Default)]
struct MockStream {
    connects: usize,
    inbound: VecDeque<StreamEvent>,
    sent: Vec<String>,
    closed: bool,
}

impl StreamTransport for MockStream {
    async fn connect(&mut self, _path: &str) -> Result<(), SyncError> {
        self.connects += 1;
        self.closed = false;
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<(), SyncError> {
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

#[derive(Default)]
struct NullActuator;

impl Actuator for NullActuator {
    fn drive(&mut self, _index: usize, _on: bool) {}
}

type Loop = ControlLoop<MockRadio, MemoryKv, NullActuator, NoTransport, MockStream, 4>;

fn build(radio: MockRadio, credentials: MemoryKv, sync: bool) -> Loop {
    let provisioning = ProvisioningController::new(
        radio,
        CredentialStore::new(credentials),
        ProvisioningPolicy::defaults(),
        AccessPointSettings::new("SmartHome_Setup", "12345678"),
        None,
    );
    let relays = RelayStore::new(MemoryKv::new(), NullActuator, NAMES);
    let sync = sync.then(|| {
        SyncEngine::stream(SyncConfig::new("backend", "SH-001"), MockStream::default())
    });
    ControlLoop::new(provisioning, relays, sync, "smarthome", "192.168.4.1")
}

fn stored(ssid: &str) -> MemoryKv {
    let mut store = CredentialStore::new(MemoryKv::new());
    store
        .save(&NetworkIdentity::new(ssid, "pw").expect("valid"))
        .expect("save");
    store.into_inner()
}

fn stream(control: &mut Loop) -> &mut MockStream {
    match control.sync_mut() {
        Some(SyncEngine::Stream(engine)) => engine.transport(),
        _ => panic!("stream engine expected"),
    }
}

fn save(ssid: &str) -> PortalRequest {
    PortalRequest::SaveWifi {
        ssid: String::from(ssid),
        password: String::from("secret"),
    }
}

#[test]
fn onboarding_save_answers_after_join_and_starts_sync() {
    let radio = MockRadio {
        join_results: VecDeque::from([Ok(LINK)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, MemoryKv::new(), true);
    assert_eq!(block_on(control.start(0)), None);
    assert_eq!(
        block_on(control.tick(50)),
        Some(ProvisioningNotice::PortalOpened)
    );

    assert_eq!(block_on(control.handle_portal(save("Home"), 60)), PortalReply::Deferred);
    assert_eq!(control.take_save_reply(), None);

    let notice = block_on(control.tick(100));
    assert!(matches!(notice, Some(ProvisioningNotice::Connected { .. })));
    let reply = control.take_save_reply().expect("save answered");
    assert_eq!(
        reply.body,
        r#"{"success":true,"ip":"192.168.1.40","hostname":"smarthome"}"#
    );
    assert_eq!(control.take_save_reply(), None);
    assert!(control.is_sync_active());

    block_on(control.tick(150));
    assert_eq!(stream(&mut control).connects, 1);
    assert_eq!(stream(&mut control).sent.len(), 1);
    assert!(stream(&mut control).sent[0].contains("state_update"));
}

#[test]
fn failed_save_reports_error_and_keeps_portal() {
    let radio = MockRadio {
        join_results: VecDeque::from([Err(ConnectivityError::AuthFailure)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, MemoryKv::new(), true);
    block_on(control.start(0));
    block_on(control.tick(50));
    block_on(control.handle_portal(save("Home"), 60));
    block_on(control.tick(100));

    let reply = control.take_save_reply().expect("save answered");
    assert_eq!(reply.body, r#"{"success":false,"ip":"","error":"auth_failure"}"#);
    assert_eq!(control.provisioning().state(), ProvisioningState::PortalActive);
    assert!(control.provisioning().identity().is_none());
    assert!(!control.is_sync_active());
}

#[test]
fn save_while_connected_is_refused() {
    let radio = MockRadio {
        join_results: VecDeque::from([Ok(LINK)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, stored("Home"), false);
    block_on(control.start(0));
    assert_eq!(control.provisioning().state(), ProvisioningState::Connected);

    match block_on(control.handle_portal(save("Other"), 10)) {
        PortalReply::Ready(response) => {
            assert_eq!(response.status, STATUS_CONFLICT);
            assert!(response.body.contains(r#""success":false"#));
        }
        PortalReply::Deferred => panic!("save must be refused"),
    }
    assert_eq!(
        control.provisioning().identity().map(|identity| identity.ssid()),
        Some("Home")
    );
}

#[test]
fn link_loss_stops_sync_and_remote_commands_apply() {
    let radio = MockRadio {
        join_results: VecDeque::from([Ok(LINK)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, stored("Home"), true);
    block_on(control.start(0));
    block_on(control.tick(10));
    block_on(control.tick(20));
    assert_eq!(stream(&mut control).connects, 1);

    stream(&mut control).inbound.push_back(StreamEvent::Text(String::from(
        r#"{"type":"command","data":{"relay2":{"state":true}}}"#,
    )));
    block_on(control.tick(30));
    assert_eq!(control.relays().state(1), Ok(true));
    // Applied from the peer, not echoed.
    assert_eq!(stream(&mut control).sent.len(), 1);

    control
        .relays_mut()
        .set(0, true, Origin::Local)
        .expect("in range");
    block_on(control.tick(40));
    assert_eq!(stream(&mut control).sent.len(), 2);

    control.provisioning_mut().radio().link = None;
    assert_eq!(
        block_on(control.tick(50)),
        Some(ProvisioningNotice::LinkLost)
    );
    assert!(!control.is_sync_active());
    assert!(stream(&mut control).closed);
}

#[test]
fn system_reports_link_and_identity() {
    let radio = MockRadio {
        join_results: VecDeque::from([Ok(LINK)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, stored("Home"), false);
    block_on(control.start(0));

    match block_on(control.handle_portal(PortalRequest::System, 4321)) {
        PortalReply::Ready(response) => assert_eq!(
            response.body,
            r#"{"hostname":"smarthome","state":"connected","ssid":"Home","ip":"192.168.1.40","rssi":-52,"uptimeMs":4321}"#
        ),
        PortalReply::Deferred => panic!("system is answered at once"),
    }
}

#[test]
fn reset_clears_identity_and_requests_restart() {
    let radio = MockRadio {
        join_results: VecDeque::from([Ok(LINK)]),
        ..MockRadio::default()
    };
    let mut control = build(radio, stored("Home"), true);
    block_on(control.start(0));
    block_on(control.tick(10));
    assert!(control.is_sync_active());

    let reply = block_on(control.handle_portal(PortalRequest::ResetWifi, 20));
    assert_eq!(
        reply,
        PortalReply::Ready(crate::portal::reset_response())
    );
    assert!(control.restart_requested());
    assert!(control.provisioning().identity().is_none());
    assert_eq!(control.provisioning().state(), ProvisioningState::Unconfigured);
    assert!(!control.is_sync_active());
}

#[test]
fn scan_and_probe_responses() {
    let radio = MockRadio {
        scan: alloc::vec![
            ScanEntry {
                ssid: String::from("Weak"),
                rssi: -80,
                secure: false,
            },
            ScanEntry {
                ssid: String::from("Strong"),
                rssi: -40,
                secure: true,
            },
        ],
        ..MockRadio::default()
    };
    let mut control = build(radio, MemoryKv::new(), false);
    block_on(control.start(0));

    match block_on(control.handle_portal(PortalRequest::Scan, 5)) {
        PortalReply::Ready(response) => assert_eq!(
            response.body,
            r#"[{"ssid":"Strong","rssi":-40,"secure":true},{"ssid":"Weak","rssi":-80,"secure":false}]"#
        ),
        PortalReply::Deferred => panic!("scan is answered at once"),
    }
    match block_on(control.handle_portal(PortalRequest::CaptiveProbe, 5)) {
        PortalReply::Ready(response) => {
            assert_eq!(response.location.as_deref(), Some("http://192.168.4.1/"))
        }
        PortalReply::Deferred => panic!("probe is answered at once"),
    }
}
