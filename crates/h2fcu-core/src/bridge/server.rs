//! Bridge tasks
//!
//! One task owns the bus; an accept loop hands each observer its own task.
//! All of them stop when the handle's shutdown flag flips.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::BridgeError;
use crate::bus::CanBus;
use crate::config::{BridgeConfig, ObserverProtocol};
use crate::protocol::{apply_frame, encode_control, Frame, ProtocolError, STATUS_FRAME_ID};
use crate::session::message::parse_envelope;
use crate::session::{
    ClientMessage, Envelope, LineLink, Link, ServerMessage, SessionError, WebSocketLink,
};
use crate::state::MachineState;

/// Heartbeat values that get an info line
const HEARTBEAT_LOG_EVERY: u8 = 100;

/// Builder for the bridge
pub struct BridgeServer {
    config: BridgeConfig,
}

impl BridgeServer {
    /// Bridge with the given settings; nothing runs until [`spawn`](Self::spawn)
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Bind the listener, start the bus and accept tasks, and return a
    /// handle to stop them.
    pub async fn spawn<B: CanBus + 'static>(self, bus: B) -> Result<BridgeHandle, BridgeError> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| BridgeError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { address, source })?;
        info!("Bridge listening on {} ({})", local_addr, self.config.protocol);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(MachineState::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let bus_task = tokio::spawn(bus_loop(
            Box::new(bus),
            self.config.clone(),
            state_tx,
            control_rx,
            shutdown_rx.clone(),
        ));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Observers {
                protocol: self.config.protocol,
                state: state_rx.clone(),
                controls: control_tx,
                every: self.config.broadcast_interval(),
                shutdown: shutdown_rx,
            },
        ));

        Ok(BridgeHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            state: state_rx,
            tasks: vec![bus_task, accept_task],
        })
    }
}

/// Handle for a running bridge
pub struct BridgeHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<MachineState>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Bound listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Latest decoded state
    pub fn state(&self) -> MachineState {
        *self.state.borrow()
    }

    /// Receiver that sees every state update
    pub fn watch_state(&self) -> watch::Receiver<MachineState> {
        self.state.clone()
    }

    /// Stop accepting, disconnect observers and close the bus
    pub async fn shutdown(self) -> Result<(), BridgeError> {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.await.map_err(|e| BridgeError::Task(e.to_string()))?;
        }
        info!("Bridge stopped");
        Ok(())
    }
}

async fn bus_loop(
    mut bus: Box<dyn CanBus>,
    config: BridgeConfig,
    state_tx: watch::Sender<MachineState>,
    mut controls: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = MachineState::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frames = match bus.receive(config.receive_batch) {
                    Ok(frames) => frames,
                    Err(e) => {
                        error!("Bus receive failed: {}", e);
                        continue;
                    }
                };
                if frames.is_empty() {
                    continue;
                }
                for frame in &frames {
                    apply_received(&mut state, frame);
                }
                state_tx.send_replace(state);
            }
            Some(frame) = controls.recv() => {
                debug!("TX {}", frame);
                if let Err(e) = bus.send(&frame) {
                    warn!("Bus send failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    bus.close();
}

fn apply_received(state: &mut MachineState, frame: &Frame) {
    match apply_frame(frame, state) {
        Ok(next) => {
            *state = next;
            state.connected = true;
            state.last_update = Utc::now().timestamp_millis();
            if frame.id() == STATUS_FRAME_ID && state.status.heartbeat % HEARTBEAT_LOG_EVERY == 0 {
                info!(
                    "Heartbeat {} state {:?} fault level {}",
                    state.status.heartbeat, state.status.state, state.status.fault_level
                );
            }
        }
        Err(ProtocolError::UnknownFrameId(id)) => debug!("Ignoring frame 0x{:08X}", id),
        Err(e) => warn!("Skipping frame {}: {}", frame, e),
    }
}

/// What every observer task shares
#[derive(Clone)]
struct Observers {
    protocol: ObserverProtocol,
    state: watch::Receiver<MachineState>,
    controls: mpsc::UnboundedSender<Frame>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
}

async fn accept_loop(listener: TcpListener, observers: Observers) {
    let mut shutdown = observers.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer, e);
                    }
                    tokio::spawn(observer(stream, peer, observers.clone()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn open_link(
    stream: TcpStream,
    protocol: ObserverProtocol,
) -> Result<Box<dyn Link>, SessionError> {
    match protocol {
        ObserverProtocol::WebSocket => Ok(Box::new(WebSocketLink::accept(stream).await?)),
        ObserverProtocol::Lines => Ok(Box::new(LineLink::new(stream))),
    }
}

async fn observer(stream: TcpStream, peer: SocketAddr, observers: Observers) {
    let mut shutdown = observers.shutdown.clone();
    let link = tokio::select! {
        link = open_link(stream, observers.protocol) => link,
        _ = shutdown.changed() => return,
    };
    match link {
        Ok(link) => {
            info!("Observer connected: {}", peer);
            client_loop(link, peer, observers).await;
        }
        Err(e) => warn!("Handshake with {} failed: {}", peer, e),
    }
}

async fn client_loop(mut link: Box<dyn Link>, peer: SocketAddr, observers: Observers) {
    let Observers {
        state,
        controls,
        every,
        mut shutdown,
        ..
    } = observers;

    if let Err(e) = send_state(link.as_mut(), &state).await {
        debug!("Initial state to {} failed: {}", peer, e);
        return;
    }

    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = send_state(link.as_mut(), &state).await {
                    debug!("Send to {} failed: {}", peer, e);
                    break;
                }
            }
            inbound = link.recv() => match inbound {
                Some(Ok(text)) => handle_client_message(&text, peer, &controls),
                Some(Err(e)) => {
                    warn!("Observer {} error: {}", peer, e);
                    break;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    link.close().await;
    info!("Observer disconnected: {}", peer);
}

async fn send_state<L: Link + ?Sized>(
    link: &mut L,
    state: &watch::Receiver<MachineState>,
) -> Result<(), SessionError> {
    let data = *state.borrow();
    let message = ServerMessage::MachineState {
        data,
        diagnosis: None,
    };
    let text = serde_json::to_string(&message).map_err(|e| SessionError::Encode(e.to_string()))?;
    link.send(text).await
}

fn handle_client_message(text: &str, peer: SocketAddr, controls: &mpsc::UnboundedSender<Frame>) {
    match parse_envelope::<ClientMessage>(text) {
        Ok(Envelope::Known(ClientMessage::Control(control))) => {
            let frame = encode_control(&control);
            debug!("Control from {}: {}", peer, frame);
            if controls.send(frame).is_err() {
                warn!("Bus task stopped; control from {} dropped", peer);
            }
        }
        Ok(Envelope::Known(ClientMessage::DiagnosisFeedback(feedback))) => {
            info!("Diagnosis feedback from {}: {}", peer, feedback.label);
        }
        Ok(Envelope::Unknown(tag)) => debug!("Ignoring '{}' from {}", tag, peer),
        Err(e) => warn!("Malformed payload from {}: {}", peer, e),
    }
}
