use async_trait::async_trait;
use h2fcu_core::config::SessionConfig;
use h2fcu_core::control::{Command, ControlState};
use h2fcu_core::diagnosis::{DiagnosisLabel, DiagnosisResult};
use h2fcu_core::session::{
    Link, ServerMessage, SessionError, SessionManager, SessionState, Transport,
};
use h2fcu_core::state::MachineState;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// Test side of a mock link
struct MockPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

struct MockLink {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Link for MockLink {
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.outbound
            .send(text)
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Transport that refuses the first `failures` connects
struct MockTransport {
    connects: Mutex<Vec<Instant>>,
    failures_left: AtomicUsize,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connects: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(failures),
            peers,
        });
        (transport, peers_rx)
    }

    fn connects(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Link>, SessionError> {
        self.connects.lock().unwrap().push(Instant::now());

        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::Transport("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.peers.send(MockPeer {
            to_client,
            from_client,
        });
        Ok(Box::new(MockLink { inbound, outbound }))
    }
}

fn machine_state(heartbeat: u8) -> MachineState {
    let mut state = MachineState::default();
    state.status.heartbeat = heartbeat;
    state
}

fn payload(state: MachineState, diagnosis: Option<DiagnosisResult>) -> String {
    serde_json::to_string(&ServerMessage::MachineState {
        data: state,
        diagnosis,
    })
    .unwrap()
}

fn assert_spacing(connects: &[Instant]) {
    for pair in connects.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(2000) && gap < Duration::from_millis(2010),
            "unexpected gap {:?}",
            gap
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_ten_attempts() {
    let (transport, _peers) = MockTransport::new(usize::MAX);
    let session = SessionManager::spawn(transport.clone(), SessionConfig::default());

    let drops = Arc::new(AtomicUsize::new(0));
    let counter = drops.clone();
    let _sub = session.subscribe_connectivity(move |connected| {
        if !*connected {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });

    let err = session.connect("fcu:8765").await.unwrap_err();
    assert_eq!(err, SessionError::Transport("connection refused".to_string()));

    let mut status = session.watch_status();
    status.wait_for(|s| s.is_exhausted()).await.unwrap();

    // Nothing more after the budget is spent
    sleep(Duration::from_secs(60)).await;

    let connects = transport.connects();
    assert_eq!(connects.len(), 11);
    assert_spacing(&connects);

    let status = session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(
        status.last_error,
        Some(SessionError::ReconnectExhausted { attempts: 10 })
    );
    // Initial delivery plus one per failed connect
    assert_eq!(drops.load(Ordering::SeqCst), 12);
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_after_exhaustion_starts_fresh() {
    let config = SessionConfig {
        max_reconnect_attempts: 2,
        ..SessionConfig::default()
    };
    let (transport, _peers) = MockTransport::new(3);
    let session = SessionManager::spawn(transport.clone(), config);

    assert!(session.connect("fcu:8765").await.is_err());
    session
        .watch_status()
        .wait_for(|s| s.is_exhausted())
        .await
        .unwrap();
    assert_eq!(transport.connects().len(), 3);

    session.connect("fcu:8765").await.unwrap();
    let status = session.status();
    assert!(status.is_connected());
    assert_eq!(status.attempts, 0);
    assert_eq!(status.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_reconnect() {
    let (transport, _peers) = MockTransport::new(usize::MAX);
    let session = SessionManager::spawn(transport.clone(), SessionConfig::default());

    assert!(session.connect("fcu:8765").await.is_err());
    assert_eq!(session.status().state, SessionState::Reconnecting);
    assert_eq!(session.status().attempts, 1);

    session.disconnect().await;
    let status = session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.attempts, 0);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.connects().len(), 1);

    // Idempotent
    session.disconnect().await;
    assert_eq!(session.status().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notifies_even_when_idle() {
    let (transport, _peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let _sub = session.subscribe_connectivity(move |connected| {
        log.lock().unwrap().push(*connected);
        Ok(())
    });

    session.connect("fcu:8765").await.unwrap();
    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(*seen.lock().unwrap(), vec![false, true, false, false]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_noop_when_open() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport.clone(), SessionConfig::default());

    session.connect("fcu:8765").await.unwrap();
    session.connect("fcu:8765").await.unwrap();

    assert_eq!(transport.connects().len(), 1);
    assert!(session.is_connected());
    assert!(peers.recv().await.is_some());
    assert!(peers.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_counter_resets_after_successful_reconnect() {
    let (transport, _peers) = MockTransport::new(3);
    let session = SessionManager::spawn(transport.clone(), SessionConfig::default());

    assert!(session.connect("fcu:8765").await.is_err());
    session
        .watch_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    let connects = transport.connects();
    assert_eq!(connects.len(), 4);
    assert_spacing(&connects);

    let status = session.status();
    assert_eq!(status.attempts, 0);
    assert_eq!(status.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_triggers_reconnect() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport.clone(), SessionConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let _sub = session.subscribe_connectivity(move |connected| {
        log.lock().unwrap().push(*connected);
        Ok(())
    });

    session.connect("fcu:8765").await.unwrap();
    let peer = peers.recv().await.unwrap();
    drop(peer);

    let mut status = session.watch_status();
    status
        .wait_for(|s| s.state == SessionState::Reconnecting)
        .await
        .unwrap();
    assert_eq!(session.status().attempts, 1);
    assert_eq!(
        session.status().last_error,
        Some(SessionError::TransportClosed)
    );

    status.wait_for(|s| s.is_connected()).await.unwrap();
    assert_eq!(transport.connects().len(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![false, true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_status_published_before_connectivity_listeners_run() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let status = session.watch_status();
    let _sub = session.subscribe_connectivity(move |connected| {
        log.lock()
            .unwrap()
            .push((*connected, status.borrow().is_connected()));
        Ok(())
    });

    session.connect("fcu:8765").await.unwrap();
    let peer = peers.recv().await.unwrap();
    drop(peer);
    session
        .watch_status()
        .wait_for(|s| s.state == SessionState::Reconnecting)
        .await
        .unwrap();
    session.disconnect().await;

    // Every notification agrees with the status a late subscriber would read
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|(notified, status)| notified == status), "{:?}", seen);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_closed_is_rejected() {
    let (transport, _peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());

    assert_eq!(
        session.send_control(&ControlState::default()).await,
        Err(SessionError::SendWhileClosed)
    );
    assert_eq!(
        session
            .send_diagnosis_feedback(DiagnosisLabel::Normal)
            .await,
        Err(SessionError::SendWhileClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_outbound_payloads() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());
    session.connect("fcu:8765").await.unwrap();
    let mut peer = peers.recv().await.unwrap();

    let control = ControlState::default();
    session
        .send_control(&control.with_command(Command::Start))
        .await
        .unwrap();
    let text = peer.from_client.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "control");
    assert_eq!(value["data"]["mode"], 1);
    assert_eq!(value["data"]["command"], 1);
    assert_eq!(value["data"]["fan1TargetSpeed"], 50.0);
    assert_eq!(value["data"]["forceInletValve"], false);

    session
        .send_diagnosis_feedback(DiagnosisLabel::Flooding)
        .await
        .unwrap();
    let text = peer.from_client.recv().await.unwrap();
    assert_eq!(
        text,
        r#"{"type":"diagnosis_feedback","data":{"label":"flooding"}}"#
    );
}

#[tokio::test(start_paused = true)]
async fn test_inbound_fan_out_survives_bad_payloads_and_subscribers() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());

    let _failing = session.subscribe_state(|_| anyhow::bail!("renderer unavailable"));
    let _panicking = session.subscribe_state(|_| panic!("listener bug"));
    let (state_tx, mut states) = mpsc::unbounded_channel();
    let _good = session.subscribe_state(move |state| {
        let _ = state_tx.send(*state);
        Ok(())
    });
    let (diag_tx, mut diagnoses) = mpsc::unbounded_channel();
    let _diag = session.subscribe_diagnosis(move |result| {
        let _ = diag_tx.send(result.clone());
        Ok(())
    });

    session.connect("fcu:8765").await.unwrap();
    let peer = peers.recv().await.unwrap();

    let diagnosis = DiagnosisResult {
        label: DiagnosisLabel::Flooding,
        confidence: 88.0,
        ..DiagnosisResult::default()
    };
    peer.to_client.send("not json".to_string()).unwrap();
    peer.to_client
        .send(r#"{"type":"ping","data":{}}"#.to_string())
        .unwrap();
    peer.to_client
        .send(payload(machine_state(7), Some(diagnosis.clone())))
        .unwrap();
    peer.to_client.send(payload(machine_state(8), None)).unwrap();

    assert_eq!(states.recv().await.unwrap().status.heartbeat, 7);
    assert_eq!(states.recv().await.unwrap().status.heartbeat, 8);
    assert_eq!(diagnoses.recv().await.unwrap(), diagnosis);
    assert!(diagnoses.try_recv().is_err());

    // Still connected after the garbage
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_delivery() {
    let (transport, mut peers) = MockTransport::new(0);
    let session = SessionManager::spawn(transport, SessionConfig::default());

    let removed_hits = Arc::new(AtomicUsize::new(0));
    let counter = removed_hits.clone();
    let removed = session.subscribe_state(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _kept = session.subscribe_state(move |state| {
        let _ = tx.send(state.status.heartbeat);
        Ok(())
    });

    session.connect("fcu:8765").await.unwrap();
    let peer = peers.recv().await.unwrap();

    peer.to_client.send(payload(machine_state(1), None)).unwrap();
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(removed_hits.load(Ordering::SeqCst), 1);

    removed.unsubscribe();
    peer.to_client.send(payload(machine_state(2), None)).unwrap();
    assert_eq!(rx.recv().await, Some(2));
    assert_eq!(removed_hits.load(Ordering::SeqCst), 1);
}
