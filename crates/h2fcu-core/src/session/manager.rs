//! Session actor
//!
//! One task owns the live link and the reconnect deadline. The
//! [`SessionManager`] handle talks to it over a request channel; status is
//! published on a `watch` channel and events fan out through the
//! subscriber lists.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::message::{parse_envelope, ClientMessage, DiagnosisFeedback, Envelope, ServerMessage};
use super::subscribers::{Listener, SubscriberList, Subscription};
use super::transport::{Link, Transport};
use super::SessionError;
use crate::config::SessionConfig;
use crate::control::ControlState;
use crate::diagnosis::{DiagnosisLabel, DiagnosisResult};
use crate::state::MachineState;

/// Lifecycle of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection and no pending reconnect
    #[default]
    Idle,
    /// Opening a link
    Connecting,
    /// Link open
    Open,
    /// Closing on request
    Closing,
    /// Waiting for the reconnect timer
    Reconnecting,
}

/// Published session status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    /// Current lifecycle state
    pub state: SessionState,
    /// Reconnect attempts since the last successful open
    pub attempts: u32,
    /// Why the last link failed, cleared on success
    pub last_error: Option<SessionError>,
}

impl SessionStatus {
    /// True while a link is open
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Open
    }

    /// True once the reconnect budget has been spent
    pub fn is_exhausted(&self) -> bool {
        matches!(self.last_error, Some(SessionError::ReconnectExhausted { .. }))
    }
}

#[derive(Clone)]
struct Subscribers {
    state: Arc<SubscriberList<MachineState>>,
    connectivity: Arc<SubscriberList<bool>>,
    diagnosis: Arc<SubscriberList<DiagnosisResult>>,
}

impl Subscribers {
    fn new() -> Self {
        Self {
            state: Arc::new(SubscriberList::new("state")),
            connectivity: Arc::new(SubscriberList::new("connectivity")),
            diagnosis: Arc::new(SubscriberList::new("diagnosis")),
        }
    }
}

enum Request {
    Connect {
        address: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: ClientMessage,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Handle to the session task
///
/// Cloning is cheap; all clones drive the same session. The task stops
/// when the last handle is dropped.
#[derive(Clone)]
pub struct SessionManager {
    requests: mpsc::UnboundedSender<Request>,
    subscribers: Subscribers,
    status: watch::Receiver<SessionStatus>,
}

impl SessionManager {
    /// Start the session task. Must be called within a tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let subscribers = Subscribers::new();

        let actor = SessionActor {
            transport,
            address: config.address.clone(),
            config,
            link: None,
            reconnect_at: None,
            status: SessionStatus::default(),
            status_tx,
            subscribers: subscribers.clone(),
            requests: requests_rx,
        };
        tokio::spawn(actor.run());

        Self {
            requests: requests_tx,
            subscribers,
            status: status_rx,
        }
    }

    /// Open the connection. A no-op when already open.
    ///
    /// A failed attempt is returned as an error and also starts the
    /// reconnect schedule.
    pub async fn connect(&self, address: impl Into<String>) -> Result<(), SessionError> {
        let address = address.into();
        self.request(|reply| Request::Connect { address, reply }).await?
    }

    /// Close the connection and cancel any pending reconnect
    pub async fn disconnect(&self) {
        if self.request(|reply| Request::Disconnect { reply }).await.is_err() {
            debug!("Disconnect after session task stopped");
        }
    }

    /// Send the operator control state. Never queued while closed.
    pub async fn send_control(&self, control: &ControlState) -> Result<(), SessionError> {
        self.send(ClientMessage::Control(*control)).await
    }

    /// Send an operator label for the last diagnosis
    pub async fn send_diagnosis_feedback(&self, label: DiagnosisLabel) -> Result<(), SessionError> {
        self.send(ClientMessage::DiagnosisFeedback(DiagnosisFeedback { label }))
            .await
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        self.request(|reply| Request::Send { message, reply }).await?
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, SessionError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| SessionError::SessionEnded)?;
        response.await.map_err(|_| SessionError::SessionEnded)
    }

    /// Receive every decoded machine state
    pub fn subscribe_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MachineState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.state.add(listener)
    }

    /// Receive connectivity changes. The current value is delivered before
    /// this returns.
    pub fn subscribe_connectivity<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener: Listener<bool> = Arc::new(listener);
        let status = self.status.clone();
        self.subscribers
            .connectivity
            .add_with_current(listener, move || status.borrow().is_connected())
    }

    /// Receive diagnosis results attached to machine states
    pub fn subscribe_diagnosis<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DiagnosisResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.diagnosis.add(listener)
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// True while the session has an open link
    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }
}

struct SessionActor {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    address: String,
    link: Option<Box<dyn Link>>,
    reconnect_at: Option<Instant>,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    subscribers: Subscribers,
    requests: mpsc::UnboundedReceiver<Request>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let deadline = self.reconnect_at;
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                inbound = next_inbound(&mut self.link) => self.handle_inbound(inbound),
                _ = wait_until(deadline), if deadline.is_some() => {
                    self.reconnect_at = None;
                    info!(
                        "Reconnect attempt {}/{} to {}",
                        self.status.attempts, self.config.max_reconnect_attempts, self.address
                    );
                    // Failure reschedules inside open_link
                    let _ = self.open_link().await;
                }
            }
        }

        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        debug!("Session task stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { address, reply } => {
                let result = self.connect(address).await;
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Request::Send { message, reply } => {
                let result = self.send(&message).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn connect(&mut self, address: String) -> Result<(), SessionError> {
        if self.status.state == SessionState::Open {
            debug!("Already connected to {}", self.address);
            return Ok(());
        }

        self.address = address;
        self.reconnect_at = None;
        if self.status.state == SessionState::Idle {
            self.status.attempts = 0;
            self.status.last_error = None;
        }
        self.open_link().await
    }

    async fn open_link(&mut self) -> Result<(), SessionError> {
        self.set_state(SessionState::Connecting);

        match self.transport.connect(&self.address).await {
            Ok(link) => {
                self.link = Some(link);
                self.status.attempts = 0;
                self.status.last_error = None;
                self.set_state(SessionState::Open);
                info!("Connected to {}", self.address);
                self.subscribers.connectivity.notify(&true);
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.address, e);
                self.on_closed(e.clone());
                Err(e)
            }
        }
    }

    /// Handle a lost or failed connection
    fn on_closed(&mut self, reason: SessionError) {
        self.link = None;

        let max = self.config.max_reconnect_attempts;
        if self.status.attempts < max {
            self.status.attempts += 1;
            self.status.last_error = Some(reason);
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay());
            info!(
                "Reconnecting in {} ms (attempt {}/{})",
                self.config.reconnect_delay_ms, self.status.attempts, max
            );
            self.set_state(SessionState::Reconnecting);
        } else {
            error!("Giving up on {} after {} reconnect attempts", self.address, max);
            self.status.last_error = Some(SessionError::ReconnectExhausted { attempts: max });
            self.reconnect_at = None;
            self.set_state(SessionState::Idle);
        }
        // Status is published before listeners hear about it
        self.subscribers.connectivity.notify(&false);
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        if let Some(mut link) = self.link.take() {
            self.set_state(SessionState::Closing);
            link.close().await;
            info!("Disconnected from {}", self.address);
        }

        self.status.attempts = 0;
        self.status.last_error = None;
        self.set_state(SessionState::Idle);
        self.subscribers.connectivity.notify(&false);
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
        let Some(link) = self.link.as_mut() else {
            warn!("Not connected; dropping outbound message");
            return Err(SessionError::SendWhileClosed);
        };

        let text = serde_json::to_string(message).map_err(|e| SessionError::Encode(e.to_string()))?;
        debug!("-> {}", text);
        if let Err(e) = link.send(text).await {
            warn!("Send failed: {}", e);
            self.on_closed(e.clone());
            return Err(e);
        }
        Ok(())
    }

    fn handle_inbound(&mut self, inbound: Option<Result<String, SessionError>>) {
        match inbound {
            Some(Ok(text)) => self.dispatch(&text),
            Some(Err(e)) => {
                warn!("Transport error: {}", e);
                self.on_closed(e);
            }
            None => {
                warn!("Connection to {} closed by peer", self.address);
                self.on_closed(SessionError::TransportClosed);
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match parse_envelope::<ServerMessage>(text) {
            Ok(Envelope::Known(ServerMessage::MachineState { data, diagnosis })) => {
                self.subscribers.state.notify(&data);
                if let Some(diagnosis) = diagnosis {
                    self.subscribers.diagnosis.notify(&diagnosis);
                }
            }
            Ok(Envelope::Unknown(tag)) => warn!("Dropping payload with unknown type '{}'", tag),
            Err(e) => warn!("Dropping malformed payload: {}", e),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.status.state = state;
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn next_inbound(link: &mut Option<Box<dyn Link>>) -> Option<Result<String, SessionError>> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        let mut status = SessionStatus::default();
        assert!(!status.is_connected());
        assert!(!status.is_exhausted());

        status.state = SessionState::Open;
        assert!(status.is_connected());

        status.state = SessionState::Idle;
        status.last_error = Some(SessionError::ReconnectExhausted { attempts: 10 });
        assert!(status.is_exhausted());
    }
}
