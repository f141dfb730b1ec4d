//! Single-owner monitor task
//!
//! Session events and operator requests are queued onto one task that owns
//! the [`MonitorStore`], so every mutation happens in arrival order.

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{MonitorSnapshot, MonitorStore};
use super::MonitorError;
use crate::control::{Command, ControlPatch, ControlState};
use crate::diagnosis::{DiagnosisLabel, DiagnosisResult};
use crate::session::{SessionError, SessionManager, Subscription};
use crate::state::MachineState;

enum Event {
    State(MachineState),
    Diagnosis(DiagnosisResult),
    Connectivity(bool),
}

enum Request {
    Snapshot(oneshot::Sender<MonitorSnapshot>),
    UpdateControl(ControlPatch, oneshot::Sender<ControlState>),
    TriggerCommand(Command, oneshot::Sender<ControlState>),
    ToggleLogging(oneshot::Sender<Result<bool, MonitorError>>),
    SendFeedback(DiagnosisLabel, oneshot::Sender<Result<(), MonitorError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Wires a [`SessionManager`] to a [`MonitorStore`]
pub struct MonitorPipeline {
    session: SessionManager,
    store: MonitorStore,
    events: mpsc::UnboundedReceiver<Event>,
    requests: mpsc::UnboundedReceiver<Request>,
    subscriptions: Vec<Subscription>,
}

impl MonitorPipeline {
    /// Subscribe to `session` and start the owner task
    pub fn spawn(session: &SessionManager, store: MonitorStore) -> MonitorHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (requests_tx, requests) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        let state = session.subscribe_state(move |state| {
            tx.send(Event::State(*state))
                .map_err(|_| anyhow!("monitor pipeline stopped"))
        });
        let tx = events_tx.clone();
        let diagnosis = session.subscribe_diagnosis(move |result| {
            tx.send(Event::Diagnosis(result.clone()))
                .map_err(|_| anyhow!("monitor pipeline stopped"))
        });
        let tx = events_tx;
        let connectivity = session.subscribe_connectivity(move |connected| {
            tx.send(Event::Connectivity(*connected))
                .map_err(|_| anyhow!("monitor pipeline stopped"))
        });

        let pipeline = Self {
            session: session.clone(),
            store,
            events,
            requests,
            subscriptions: vec![state, diagnosis, connectivity],
        };
        let task = tokio::spawn(pipeline.run());

        MonitorHandle {
            requests: requests_tx,
            task,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                // Drain session events before serving requests
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown(reply)) => {
                        self.close().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }
        self.close().await;
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::State(state) => self.store.ingest(state, None),
            Event::Diagnosis(result) => self.store.set_diagnosis(result),
            Event::Connectivity(connected) => {
                debug!("Connectivity: {}", connected);
                self.store.set_connected(connected);
            }
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Snapshot(reply) => {
                let _ = reply.send(self.store.snapshot());
            }
            Request::UpdateControl(patch, reply) => {
                let control = self.store.update_control(&patch);
                self.transmit(&control).await;
                let _ = reply.send(control);
            }
            Request::TriggerCommand(command, reply) => {
                let control = self.store.trigger_command(command);
                info!("Command {:?}", command);
                self.transmit(&control).await;
                let _ = reply.send(control);
            }
            Request::ToggleLogging(reply) => {
                let result = self.store.toggle_logging().await.map_err(MonitorError::from);
                let _ = reply.send(result);
            }
            Request::SendFeedback(label, reply) => {
                let result = self
                    .session
                    .send_diagnosis_feedback(label)
                    .await
                    .map_err(MonitorError::from);
                let _ = reply.send(result);
            }
            Request::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn transmit(&self, control: &ControlState) {
        match self.session.send_control(control).await {
            Ok(()) => {}
            Err(SessionError::SendWhileClosed) => warn!("Control change not sent: not connected"),
            Err(e) => warn!("Control change not sent: {}", e),
        }
    }

    async fn close(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Err(e) = self.store.close().await {
            warn!("Error closing log: {}", e);
        }
        debug!("Monitor pipeline stopped");
    }
}

/// Request side of a running [`MonitorPipeline`]
pub struct MonitorHandle {
    requests: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, MonitorError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| MonitorError::Stopped)?;
        response.await.map_err(|_| MonitorError::Stopped)
    }

    /// Copy of everything the store holds
    pub async fn snapshot(&self) -> Result<MonitorSnapshot, MonitorError> {
        self.request(Request::Snapshot).await
    }

    /// Merge a control change and send the result to the bridge
    pub async fn update_control(&self, patch: ControlPatch) -> Result<ControlState, MonitorError> {
        self.request(|reply| Request::UpdateControl(patch, reply)).await
    }

    /// Send a one-shot command
    pub async fn trigger_command(&self, command: Command) -> Result<ControlState, MonitorError> {
        self.request(|reply| Request::TriggerCommand(command, reply))
            .await
    }

    /// Returns whether logging is now on
    pub async fn toggle_logging(&self) -> Result<bool, MonitorError> {
        self.request(Request::ToggleLogging).await?
    }

    /// Send an operator label for the current diagnosis
    pub async fn send_feedback(&self, label: DiagnosisLabel) -> Result<(), MonitorError> {
        self.request(|reply| Request::SendFeedback(label, reply))
            .await?
    }

    /// Stop the task, flushing any active log
    pub async fn shutdown(self) {
        if self.request(Request::Shutdown).await.is_err() {
            debug!("Monitor pipeline already stopped");
        }
        let _ = self.task.await;
    }
}
