//! Reconciliation between the plug's relay and the HomeKit switch.
//!
//! A single worker task owns [`BridgeState`]. Remote toggles, refreshes and
//! state queries reach it through a [`SyncBridgeHandle`]; device calls run in
//! other tasks and report back through a completion channel, so the worker
//! never awaits the network. Every command is tagged with the generation it
//! was issued at and its completion is only applied if no newer command has
//! been issued since.

use std::cmp::min;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hs1xx_client_rs::{DeviceClient, DeviceSnapshot, Hs1xxClientError, decode, decode_ack};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep, timeout};
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::sync::error::SyncError;
use crate::sync::port::AccessoryPort;

const INBOX_SIZE: usize = 32;
const MAX_STARTUP_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeState {
    pub last_known_on: bool,
    pub pending_command: Option<bool>,
    pub generation: u64,
}

impl From<&DeviceSnapshot> for BridgeState {
    fn from(snapshot: &DeviceSnapshot) -> Self {
        Self {
            last_known_on: snapshot.relay_on,
            pending_command: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// `None` disables the built-in poller.
    pub poll_interval: Option<Duration>,
    /// Upper bound for every device call.
    pub command_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_secs(10)),
            command_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The device confirmed the new relay state.
    Applied(bool),
    /// The same target was already in flight.
    Deduplicated,
    /// A newer request was issued before this one completed.
    Superseded,
}

type CommandReply = oneshot::Sender<Result<CommandOutcome, SyncError>>;

/// Resolves once the bridge has folded the command's completion into its
/// state. Dropping it does not affect the command.
pub struct CommandTicket {
    receiver: oneshot::Receiver<Result<CommandOutcome, SyncError>>,
}

impl CommandTicket {
    pub async fn outcome(self) -> Result<CommandOutcome, SyncError> {
        self.receiver.await.map_err(|_| SyncError::Closed)?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Command {
    generation: u64,
    target: bool,
}

enum BridgeMessage {
    RequestSet { target: bool, reply: CommandReply },
    Refresh { snapshot: DeviceSnapshot },
    State { reply: oneshot::Sender<BridgeState> },
    Shutdown,
}

enum Completion {
    Command {
        command: Command,
        result: Result<(), Hs1xxClientError>,
    },
    Poll {
        generation: u64,
        result: Result<DeviceSnapshot, Hs1xxClientError>,
    },
}

/// Receiving end of a bridge channel, consumed by [`SyncBridge::start`].
pub struct BridgeInbox {
    receiver: mpsc::Receiver<BridgeMessage>,
}

#[derive(Clone)]
pub struct SyncBridgeHandle {
    sender: mpsc::Sender<BridgeMessage>,
}

impl SyncBridgeHandle {
    /// Creates the channel the accessory talks to the bridge through.
    ///
    /// The handle can be handed out before the bridge is started; requests
    /// queue up until then.
    pub fn channel() -> (Self, BridgeInbox) {
        let (sender, receiver) = mpsc::channel(INBOX_SIZE);
        (Self { sender }, BridgeInbox { receiver })
    }

    /// Asks the bridge to drive the relay to `target`.
    ///
    /// Returns as soon as the request is queued; the device round-trip is
    /// observed through the returned ticket.
    pub async fn request_set(&self, target: bool) -> Result<CommandTicket, SyncError> {
        let (reply, receiver) = oneshot::channel();
        self.send(BridgeMessage::RequestSet { target, reply }).await?;
        Ok(CommandTicket { receiver })
    }

    /// Folds an externally obtained status into the bridge state.
    pub async fn refresh(&self, snapshot: DeviceSnapshot) -> Result<(), SyncError> {
        self.send(BridgeMessage::Refresh { snapshot }).await
    }

    pub async fn state(&self) -> Result<BridgeState, SyncError> {
        let (reply, receiver) = oneshot::channel();
        self.send(BridgeMessage::State { reply }).await?;
        receiver.await.map_err(|_| SyncError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(BridgeMessage::Shutdown).await;
    }

    async fn send(&self, message: BridgeMessage) -> Result<(), SyncError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SyncError::Closed)
    }
}

pub struct SyncBridge<C: DeviceClient + 'static, P: AccessoryPort> {
    client: Arc<C>,
    port: P,
    config: SyncConfig,
}

impl<C: DeviceClient + 'static, P: AccessoryPort> SyncBridge<C, P> {
    pub fn new(client: Arc<C>, port: P, config: SyncConfig) -> Self {
        Self {
            client,
            port,
            config,
        }
    }

    /// Seeds the state from `initial` and spawns the worker.
    pub fn start(self, initial: &DeviceSnapshot, inbox: BridgeInbox) -> JoinHandle<()> {
        let (worker, commands, completions) = BridgeWorker::new(self, initial);
        tokio::spawn(dispatch_commands(
            worker.client.clone(),
            commands,
            worker.completions.clone(),
            worker.config.command_timeout,
        ));
        tokio::spawn(worker.run(inbox.receiver, completions))
    }
}

struct BridgeWorker<C: DeviceClient + 'static, P: AccessoryPort> {
    client: Arc<C>,
    port: P,
    config: SyncConfig,
    state: BridgeState,
    commands: mpsc::UnboundedSender<Command>,
    completions: mpsc::UnboundedSender<Completion>,
    waiting: HashMap<u64, CommandReply>,
    poll_in_flight: bool,
}

impl<C: DeviceClient + 'static, P: AccessoryPort> BridgeWorker<C, P> {
    fn new(
        bridge: SyncBridge<C, P>,
        initial: &DeviceSnapshot,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Command>,
        mpsc::UnboundedReceiver<Completion>,
    ) {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (completions, completion_receiver) = mpsc::unbounded_channel();
        let state = BridgeState::from(initial);
        Metrics::set_relay_state(state.last_known_on);
        let worker = Self {
            client: bridge.client,
            port: bridge.port,
            config: bridge.config,
            state,
            commands,
            completions,
            waiting: HashMap::new(),
            poll_in_flight: false,
        };
        (worker, command_receiver, completion_receiver)
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<BridgeMessage>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let poll_enabled = self.config.poll_interval.is_some();
        let period = self.config.poll_interval.unwrap_or(Duration::from_secs(3600));
        let mut poll_ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(state = ?self.state, "Sync bridge started");
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    match message {
                        Some(BridgeMessage::RequestSet { target, reply }) => {
                            self.handle_request_set(target, reply);
                        }
                        Some(BridgeMessage::Refresh { snapshot }) => {
                            self.handle_refresh(&snapshot);
                        }
                        Some(BridgeMessage::State { reply }) => {
                            let _ = reply.send(self.state);
                        }
                        Some(BridgeMessage::Shutdown) | None => {
                            info!("Sync bridge shutting down");
                            break;
                        }
                    }
                }

                Some(completion) = completions.recv() => {
                    match completion {
                        Completion::Command { command, result } => {
                            self.handle_command_completed(command, result);
                        }
                        Completion::Poll { generation, result } => {
                            self.handle_poll_completed(generation, result);
                        }
                    }
                }

                _ = poll_ticker.tick(), if poll_enabled => {
                    self.start_poll();
                }
            }
        }
    }

    fn handle_request_set(&mut self, target: bool, reply: CommandReply) {
        if self.state.pending_command == Some(target) {
            debug!(on = target, "Command already in flight, ignoring duplicate request");
            Metrics::inc_commands_deduplicated();
            let _ = reply.send(Ok(CommandOutcome::Deduplicated));
            return;
        }

        self.state.generation += 1;
        self.state.pending_command = Some(target);
        let command = Command {
            generation: self.state.generation,
            target,
        };
        info!(
            on = target,
            generation = command.generation,
            "Issuing relay command"
        );
        Metrics::inc_commands_issued();
        self.waiting.insert(command.generation, reply);

        if self.commands.send(command).is_err() {
            self.handle_command_completed(
                command,
                Err(Hs1xxClientError::Generic("command dispatcher stopped".into())),
            );
        }
    }

    fn handle_command_completed(&mut self, command: Command, result: Result<(), Hs1xxClientError>) {
        let reply = self.waiting.remove(&command.generation);

        if command.generation != self.state.generation {
            debug!(
                generation = command.generation,
                current = self.state.generation,
                "Discarding stale command completion"
            );
            Metrics::inc_commands_superseded();
            if let Some(reply) = reply {
                let _ = reply.send(Ok(CommandOutcome::Superseded));
            }
            return;
        }

        self.state.pending_command = None;
        let outcome = match result {
            Ok(()) => {
                self.state.last_known_on = command.target;
                info!(on = command.target, "Relay state confirmed");
                Ok(CommandOutcome::Applied(command.target))
            }
            Err(e) => {
                warn!(
                    on = command.target,
                    generation = command.generation,
                    "Relay command failed, rolling back: {e}"
                );
                Metrics::inc_command_failures();
                Err(SyncError::CommandFailed {
                    generation: command.generation,
                    source: e,
                })
            }
        };
        self.push(self.state.last_known_on);

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn handle_refresh(&mut self, snapshot: &DeviceSnapshot) {
        if let Some(pending) = self.state.pending_command {
            debug!(pending, "Command in flight, ignoring refresh");
            return;
        }
        if snapshot.relay_on != self.state.last_known_on {
            info!(
                from = self.state.last_known_on,
                to = snapshot.relay_on,
                "Relay changed outside the bridge"
            );
            Metrics::inc_drift_corrections();
            self.state.last_known_on = snapshot.relay_on;
            self.push(snapshot.relay_on);
        }
    }

    fn start_poll(&mut self) {
        if self.poll_in_flight {
            debug!("Previous poll still running, skipping tick");
            return;
        }
        // A read taken while a command is in flight may predate it, and the
        // command's completion leaves the generation unchanged.
        if let Some(pending) = self.state.pending_command {
            debug!(pending, "Command in flight, skipping poll");
            return;
        }
        self.poll_in_flight = true;
        Metrics::inc_polls();

        let generation = self.state.generation;
        let client = self.client.clone();
        let completions = self.completions.clone();
        let limit = self.config.command_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, client.query())
                .await
                .and_then(|raw| Ok(decode(&raw)?));
            let _ = completions.send(Completion::Poll { generation, result });
        });
    }

    fn handle_poll_completed(
        &mut self,
        generation: u64,
        result: Result<DeviceSnapshot, Hs1xxClientError>,
    ) {
        self.poll_in_flight = false;
        match result {
            Ok(snapshot) if generation == self.state.generation => self.handle_refresh(&snapshot),
            Ok(_) => debug!(
                generation,
                current = self.state.generation,
                "Discarding poll that raced a command"
            ),
            Err(e) => {
                warn!("Poll failed: {e}");
                Metrics::inc_poll_failures();
            }
        }
    }

    fn push(&self, on: bool) {
        Metrics::set_relay_state(on);
        self.port.push_state(on);
    }
}

/// Performs commands strictly in issue order, one at a time.
async fn dispatch_commands<C: DeviceClient + 'static>(
    client: Arc<C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedSender<Completion>,
    limit: Duration,
) {
    while let Some(command) = commands.recv().await {
        debug!(?command, "Sending relay command");
        let result = bounded(limit, client.command(command.target))
            .await
            .and_then(|raw| Ok(decode_ack(&raw)?));
        if completions
            .send(Completion::Command { command, result })
            .is_err()
        {
            break;
        }
    }
    debug!("Command dispatcher stopped");
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, Hs1xxClientError>>,
) -> Result<T, Hs1xxClientError> {
    timeout(limit, call)
        .await
        .map_err(|_| Hs1xxClientError::Timeout(limit))?
}

/// Queries the device until it answers, retrying `retries` times with
/// exponential backoff. With no retries the first failure is returned.
pub async fn fetch_initial_snapshot<C: DeviceClient + ?Sized>(
    client: &C,
    retries: u32,
    initial_backoff: Duration,
    limit: Duration,
) -> Result<DeviceSnapshot, Hs1xxClientError> {
    let mut backoff = initial_backoff;
    let mut attempt = 0;
    loop {
        let result = bounded(limit, client.query())
            .await
            .and_then(|raw| Ok(decode(&raw)?));
        match result {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("Device query failed ({e}), retry {attempt}/{retries} in {backoff:?}");
                sleep(backoff).await;
                backoff = min(backoff * 2, MAX_STARTUP_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}
