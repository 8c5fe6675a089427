use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connection::ConnectionMonitor;
use crate::dispatcher::{failure_notification, CommandDispatcher, CommandReply, Remote, RemoteAck};
use crate::error::{CommandError, RegistryError};
use crate::lifecycle::Lifecycle;
use crate::model::{CommandOutcome, CommandRequest, ConnectivityState, Notification, Snapshot};
use crate::poller::{spawn_cycle, CycleEvent, Poller, TriggerDecision};
use crate::reducer::{Listener, StateStore, SubscriptionId};
use crate::registry::{Fetch, SourceRegistry};

enum Event {
    Start(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
    Trigger,
    Dispatch {
        request: CommandRequest,
        reply: CommandReply,
    },
    CommandSettled {
        correlation_id: Uuid,
        result: Result<RemoteAck, CommandError>,
    },
    Subscribe {
        id: SubscriptionId,
        listener: Listener,
    },
    Unsubscribe(SubscriptionId),
    Register {
        name: String,
        fetch: Arc<dyn Fetch>,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Cycle(CycleEvent),
    Shutdown,
}

/// The single owner of all sync state.
///
/// Every mutation happens on this task while it drains one serial stream of
/// events, so nothing in here needs a lock.
pub struct SyncEngine {
    registry: SourceRegistry,
    store: StateStore,
    poller: Poller,
    lifecycle: Lifecycle,
    monitor: ConnectionMonitor,
    connectivity: watch::Sender<ConnectivityState>,
    dispatcher: CommandDispatcher,
    remote: Arc<dyn Remote>,
    notifications: broadcast::Sender<Notification>,
    source_timeout: Duration,
    events: mpsc::WeakUnboundedSender<Event>,
    inbox: mpsc::UnboundedReceiver<Event>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        registry: SourceRegistry,
        remote: Arc<dyn Remote>,
    ) -> (Self, SyncHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let store = StateStore::new();
        let monitor = ConnectionMonitor::new(registry.status_name());
        let (connectivity, connectivity_rx) = watch::channel(monitor.state().clone());
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

        let handle = SyncHandle {
            events: tx.clone(),
            snapshots: store.watch(),
            connectivity: connectivity_rx,
            notifications: notifications.clone(),
            next_subscription: Arc::new(AtomicU64::new(1)),
        };

        let engine = Self {
            registry,
            store,
            poller: Poller::new(config.poll_interval()),
            lifecycle: Lifecycle::new(),
            monitor,
            connectivity,
            dispatcher: CommandDispatcher::new(config.resync_policy, config.command_timeout()),
            remote,
            notifications,
            source_timeout: config.source_timeout(),
            events: tx.downgrade(),
            inbox,
        };
        (engine, handle)
    }

    /// Build the engine and run it as a background task.
    pub fn spawn(
        config: &SyncConfig,
        registry: SourceRegistry,
        remote: Arc<dyn Remote>,
    ) -> SyncHandle {
        let (engine, handle) = Self::new(config, registry, remote);
        tokio::spawn(engine.run());
        handle
    }

    /// Runs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!(sources = self.registry.len(), "sync engine running");
        loop {
            let deadline = self.poller.deadline();
            tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                _ = wait_until(deadline) => self.begin_cycle(),
            }
        }
        self.stop();
        info!("sync engine shut down");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Event::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Event::Trigger => self.trigger_now(),
            Event::Dispatch { request, reply } => self.dispatch(request, reply),
            Event::CommandSettled {
                correlation_id,
                result,
            } => self.command_settled(correlation_id, result),
            Event::Subscribe { id, listener } => self.store.subscribe(id, listener),
            Event::Unsubscribe(id) => {
                self.store.unsubscribe(id);
            }
            Event::Register { name, fetch, reply } => {
                let _ = reply.send(self.register(name, fetch));
            }
            Event::Cycle(CycleEvent::Settled(result)) => {
                self.store.apply(&result, self.lifecycle.active());
            }
            Event::Cycle(CycleEvent::Completed { generation, cycle }) => {
                if self.lifecycle.active() != Some(generation)
                    || !self.poller.complete_cycle(cycle, Instant::now())
                {
                    debug!(%cycle, %generation, "ignoring completion of a retired cycle");
                    return;
                }
                let was_connected = self.monitor.state().connected;
                let state = self.monitor.commit(&self.store.current(), cycle).clone();
                if state.connected != was_connected {
                    if state.connected {
                        info!(%cycle, remote_state = ?state.remote_state, "connected");
                    } else {
                        warn!(%cycle, failures = state.consecutive_failures, "lost connection");
                    }
                }
                self.connectivity.send_replace(state);
            }
            Event::Shutdown => {}
        }
    }

    fn start(&mut self) -> bool {
        let Some(generation) = self.lifecycle.start() else {
            debug!("start ignored: already running");
            return false;
        };
        self.store.reset(generation, self.registry.names());
        self.monitor.reset();
        self.connectivity.send_replace(self.monitor.state().clone());
        self.poller.start(Instant::now());
        info!(%generation, interval = ?self.poller.interval(), "sync started");
        true
    }

    fn stop(&mut self) -> bool {
        if !self.lifecycle.stop() {
            return false;
        }
        self.poller.stop();
        info!(generation = %self.lifecycle.generation(), "sync stopped");
        true
    }

    fn trigger_now(&mut self) {
        match self.poller.trigger_now() {
            TriggerDecision::BeginNow => self.begin_cycle(),
            TriggerDecision::Coalesced => debug!("trigger coalesced into in-flight cycle"),
            TriggerDecision::Ignored => debug!("trigger ignored: not running"),
        }
    }

    fn begin_cycle(&mut self) {
        let (Some(generation), Some(tx)) = (self.lifecycle.active(), self.events.upgrade()) else {
            self.poller.stop();
            return;
        };
        let cycle = self.poller.begin_cycle();
        debug!(%cycle, %generation, sources = self.registry.len(), "cycle started");
        spawn_cycle(
            self.registry.entries().to_vec(),
            generation,
            cycle,
            self.source_timeout,
            move |event| {
                let _ = tx.send(Event::Cycle(event));
            },
        );
    }

    fn dispatch(&mut self, request: CommandRequest, reply: CommandReply) {
        let action = request.action;
        let command = match self.dispatcher.try_begin(request, reply) {
            Ok(command) => command,
            Err(reply) => {
                debug!(%action, "dispatch rejected: a command is pending");
                let err = CommandError::Busy;
                let toast = failure_notification(Uuid::new_v4(), action.as_str(), &err);
                let _ = self.notifications.send(toast);
                let _ = reply.send(Err(err));
                return;
            }
        };
        info!(
            correlation_id = %command.correlation_id,
            action = %command.request.action,
            "dispatching command"
        );
        let Some(tx) = self.events.upgrade() else {
            self.command_settled(command.correlation_id, Err(CommandError::EngineClosed));
            return;
        };
        self.dispatcher
            .spawn_call(self.remote.clone(), &command, move |correlation_id, result| {
                let _ = tx.send(Event::CommandSettled {
                    correlation_id,
                    result,
                });
            });
    }

    fn command_settled(&mut self, correlation_id: Uuid, result: Result<RemoteAck, CommandError>) {
        let Some(settlement) = self.dispatcher.settle(correlation_id, result) else {
            return;
        };
        let _ = self.notifications.send(settlement.notification);
        if settlement.resync {
            self.trigger_now();
        }
    }

    fn register(&mut self, name: String, fetch: Arc<dyn Fetch>) -> Result<(), RegistryError> {
        self.registry.register(name.clone(), fetch)?;
        if self.lifecycle.is_running() {
            self.store.add_slot(&name);
        }
        info!(source = %name, "source registered");
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running [`SyncEngine`].
#[derive(Clone)]
pub struct SyncHandle {
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    connectivity: watch::Receiver<ConnectivityState>,
    notifications: broadcast::Sender<Notification>,
    next_subscription: Arc<AtomicU64>,
}

impl SyncHandle {
    /// Begin a new generation. Resolves to `false` if already running.
    ///
    /// The request is queued when this is called; awaiting is optional.
    pub fn start(&self) -> impl Future<Output = bool> + Send + 'static {
        self.request(Event::Start)
    }

    /// Halt polling. Resolves to `false` if already stopped.
    pub fn stop(&self) -> impl Future<Output = bool> + Send + 'static {
        self.request(Event::Stop)
    }

    /// Run a cycle now instead of waiting for the next tick.
    pub fn trigger_now(&self) {
        let _ = self.events.send(Event::Trigger);
    }

    /// Issue one command. Rejected with [`CommandError::Busy`] while another is pending.
    ///
    /// Calls are ordered by when `dispatch` is called, not when the future is polled.
    pub fn dispatch(
        &self,
        request: CommandRequest,
    ) -> impl Future<Output = Result<CommandOutcome, CommandError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self.events.send(Event::Dispatch { request, reply }).is_ok();
        async move {
            if !sent {
                return Err(CommandError::EngineClosed);
            }
            rx.await.unwrap_or(Err(CommandError::EngineClosed))
        }
    }

    /// [`dispatch`](Self::dispatch) by action name, e.g. `"pause"`.
    ///
    /// An unknown name is refused here with a failure toast and no remote call.
    pub fn dispatch_action(
        &self,
        action: &str,
        payload: Option<Value>,
    ) -> impl Future<Output = Result<CommandOutcome, CommandError>> + Send + 'static {
        let pending = CommandRequest::parse(action, payload).map(|request| self.dispatch(request));
        if let Err(err) = &pending {
            let _ = self
                .notifications
                .send(failure_notification(Uuid::new_v4(), action, err));
        }
        async move {
            match pending {
                Ok(fut) => fut.await,
                Err(e) => Err(e),
            }
        }
    }

    /// Call `callback` with every accepted snapshot until the subscription is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&Arc<Snapshot>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let _ = self.events.send(Event::Subscribe {
            id,
            listener: Box::new(callback),
        });
        Subscription {
            id,
            events: self.events.downgrade(),
            active: true,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity.borrow().clone()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.clone()
    }

    /// Success/failure toasts for settled commands.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Add a source at runtime. It is polled from the next cycle on.
    pub fn register_source(
        &self,
        name: impl Into<String>,
        fetch: Arc<dyn Fetch>,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .events
            .send(Event::Register {
                name: name.into(),
                fetch,
                reply,
            })
            .is_ok();
        async move {
            if !sent {
                return Err(RegistryError::EngineClosed);
            }
            rx.await.unwrap_or(Err(RegistryError::EngineClosed))
        }
    }

    /// Stop the engine task. Pending dispatches resolve to `EngineClosed`.
    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
    }

    fn request(
        &self,
        make: fn(oneshot::Sender<bool>) -> Event,
    ) -> impl Future<Output = bool> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self.events.send(make(reply)).is_ok();
        async move { sent && rx.await.unwrap_or(false) }
    }
}

/// Live snapshot subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    events: mpsc::WeakUnboundedSender<Event>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(tx) = self.events.upgrade() {
            let _ = tx.send(Event::Unsubscribe(self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
