use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::attendance::attendance_period;
use crate::codec;
use crate::config::NodeConfig;
use crate::election::{Election, PeerId, Role, RoleChange};
use crate::error::{Result, RollcallError};
use crate::notes::{NoteList, NoteMap, NoteStore, SharedStore};
use crate::transport::{Channel, Frame, Transport};

/// Placeholder payload for beacons and requests whose content is ignored.
const PLACEHOLDER: &str = "no message";

/// Host-facing operations, delivered into the event loop as messages.
#[derive(Debug)]
pub enum NodeCommand {
    /// Low-level broadcast primitive.
    Speak { channel: Channel, payload: String },
    /// Replace the local note entry for a name.
    Write { name: String, values: NoteList },
    /// Read the local note entry for a name.
    Read {
        name: String,
        reply: oneshot::Sender<NoteList>,
    },
    /// Broadcast the local notes on demand.
    Share,
    /// Run one bounded aggregation round and reply with the drained result.
    RequestAggregation {
        reply: oneshot::Sender<Result<NoteMap>>,
    },
}

/// Cloneable handle for talking to a running peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer_id: PeerId,
    command_tx: mpsc::Sender<NodeCommand>,
    role_rx: watch::Receiver<Role>,
}

impl PeerHandle {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Role the peer most recently resolved to.
    pub fn current_role(&self) -> Role {
        *self.role_rx.borrow()
    }

    /// Watch receiver over role resolutions, for callers that want to wait.
    pub fn role_watch(&self) -> watch::Receiver<Role> {
        self.role_rx.clone()
    }

    pub async fn speak(&self, channel: Channel, payload: impl Into<String>) -> Result<()> {
        self.send(NodeCommand::Speak {
            channel,
            payload: payload.into(),
        })
        .await
    }

    pub async fn write(&self, name: impl Into<String>, values: NoteList) -> Result<()> {
        self.send(NodeCommand::Write {
            name: name.into(),
            values,
        })
        .await
    }

    pub async fn read(&self, name: impl Into<String>) -> Result<NoteList> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Read {
            name: name.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RollcallError::NodeStopped)
    }

    pub async fn share(&self) -> Result<()> {
        self.send(NodeCommand::Share).await
    }

    /// Run one aggregation round: seed with local notes, ask peers to share,
    /// collect replies until the window closes, and return the drained union.
    pub async fn request_aggregation(&self) -> Result<NoteMap> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::RequestAggregation { reply }).await?;
        rx.await.map_err(|_| RollcallError::NodeStopped)?
    }

    async fn send(&self, command: NodeCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RollcallError::NodeStopped)
    }
}

/// A peer in the pool: owns role-election and note state, reacts to broker
/// messages and its own timers.
///
/// All mutable state lives inside the event loop; the host reaches it only
/// through [`PeerHandle`] commands, so nothing here needs a lock.
pub struct PeerNode {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    election: Election,
    notes: NoteStore,
    shared: SharedStore,
    command_tx: mpsc::Sender<NodeCommand>,
    role_events: broadcast::Sender<RoleChange>,
    role_watch: watch::Sender<Role>,
}

impl PeerNode {
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::Receiver<NodeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (role_events, _) = broadcast::channel(64);
        let (role_watch, _) = watch::channel(Role::Unset);

        let node = Self {
            election: Election::new(config.peer_id),
            config,
            transport,
            notes: NoteStore::new(),
            shared: SharedStore::new(),
            command_tx,
            role_events,
            role_watch,
        };

        (node, command_rx)
    }

    pub fn peer_id(&self) -> PeerId {
        self.config.peer_id
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            peer_id: self.config.peer_id,
            command_tx: self.command_tx.clone(),
            role_rx: self.role_watch.subscribe(),
        }
    }

    /// Role-change notifications, emitted once per actual transition.
    pub fn subscribe_role_changes(&self) -> broadcast::Receiver<RoleChange> {
        self.role_events.subscribe()
    }

    /// Run the peer: subscribe to all channels, announce, then react to
    /// inbound messages, host commands, and timers until cancelled.
    ///
    /// A fatal transport error (publish failure or closed subscription)
    /// shuts the peer down without retry; recovery is the supervisor's job.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<NodeCommand>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut inbound = self.transport.subscribe().await?;

        let peer_id = self.config.peer_id;
        tracing::info!(peer_id, "peer started, joining roll call");

        let unset_period = attendance_period(Role::Unset, self.config.roll_call_frequency);
        let mut attendance = interval_at(Instant::now() + unset_period, unset_period);
        let mut election_deadline = Instant::now();
        let mut aggregation_deadline = Instant::now();
        let mut pending_round: Option<oneshot::Sender<Result<NoteMap>>> = None;

        if let Err(error) = self.announce(&mut election_deadline).await {
            return self.fatal_shutdown(error);
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(peer_id, "shutdown requested");
                    break;
                }

                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        return self.fatal_shutdown(RollcallError::Transport(
                            "subscription stream closed".to_string(),
                        ));
                    };
                    if let Err(error) = self
                        .handle_frame(frame, &mut election_deadline, pending_round.is_some())
                        .await
                    {
                        return self.fatal_shutdown(error);
                    }
                }

                Some(command) = commands.recv() => {
                    if let Err(error) = self
                        .handle_command(
                            command,
                            &mut pending_round,
                            &mut aggregation_deadline,
                        )
                        .await
                    {
                        return self.fatal_shutdown(error);
                    }
                }

                // Election window expiry.
                _ = tokio::time::sleep_until(election_deadline), if self.election.in_progress() => {
                    self.resolve_election(&mut attendance);
                }

                // Aggregation window expiry: drain and answer the caller.
                _ = tokio::time::sleep_until(aggregation_deadline), if pending_round.is_some() => {
                    let result = self.shared.drain();
                    tracing::debug!(peer_id, names = result.len(), "aggregation round closed");
                    if let Some(reply) = pending_round.take() {
                        let _ = reply.send(Ok(result));
                    }
                }

                // Recurring roll call.
                _ = attendance.tick() => {
                    if let Err(error) = self.announce(&mut election_deadline).await {
                        return self.fatal_shutdown(error);
                    }
                }
            }
        }

        tracing::info!(peer_id, role = %self.election.role(), "peer stopped");
        Ok(())
    }

    /// Broadcast a liveness beacon, then open (or continue) an election.
    async fn announce(&mut self, election_deadline: &mut Instant) -> Result<()> {
        self.publish(Channel::Marco, PLACEHOLDER).await?;
        if self.election.begin_or_continue() {
            *election_deadline = Instant::now() + self.config.election_window;
            tracing::debug!(
                peer_id = self.config.peer_id,
                window_ms = self.config.election_window.as_millis() as u64,
                "election window opened"
            );
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        election_deadline: &mut Instant,
        round_pending: bool,
    ) -> Result<()> {
        let envelope = match codec::decode(&frame.raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(
                    channel = %frame.channel,
                    error = %error,
                    "dropping malformed message"
                );
                return Ok(());
            }
        };

        // A peer never reacts to its own broadcast.
        if envelope.sender == self.config.peer_id {
            return Ok(());
        }

        match frame.channel {
            Channel::Marco => {
                self.publish(Channel::Polo, PLACEHOLDER).await?;
                // Hearing another peer's beacon re-validates our own rank.
                // Open the window before recording the sender: a fresh
                // window starts from {self}, and the beaconing peer must
                // land in it, not in the membership it just replaced.
                if self.election.begin_or_continue() {
                    *election_deadline = Instant::now() + self.config.election_window;
                }
                self.election.observe_peer(envelope.sender);
            }
            Channel::Polo => {
                self.election.observe_peer(envelope.sender);
            }
            Channel::Share => {
                // Only non-initiators answer a share request; the scheduler
                // is the expected initiator and must not answer its own.
                if self.election.role() != Role::Scheduler {
                    self.share().await?;
                }
            }
            Channel::Notes => {
                let merging = self.election.role() != Role::Scheduler || round_pending;
                if !merging {
                    return Ok(());
                }
                match envelope.notes() {
                    Some(remote) => {
                        tracing::debug!(
                            peer_id = self.config.peer_id,
                            sender = envelope.sender,
                            names = remote.len(),
                            "merging note snapshot"
                        );
                        self.shared.merge(remote);
                    }
                    None => {
                        tracing::debug!(
                            sender = envelope.sender,
                            "notes payload not structured, treating as no data"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: NodeCommand,
        pending_round: &mut Option<oneshot::Sender<Result<NoteMap>>>,
        aggregation_deadline: &mut Instant,
    ) -> Result<()> {
        match command {
            NodeCommand::Speak { channel, payload } => {
                self.publish(channel, &payload).await?;
            }
            NodeCommand::Write { name, values } => {
                self.notes.write(name, values);
            }
            NodeCommand::Read { name, reply } => {
                let _ = reply.send(self.notes.read(&name));
            }
            NodeCommand::Share => {
                self.share().await?;
            }
            NodeCommand::RequestAggregation { reply } => {
                if pending_round.is_some() {
                    let _ = reply.send(Err(RollcallError::AggregationPending));
                    return Ok(());
                }
                self.shared.clear();
                self.shared.seed(&self.notes);
                self.publish(Channel::Share, PLACEHOLDER).await?;
                *aggregation_deadline = Instant::now() + self.config.aggregation_window;
                *pending_round = Some(reply);
                tracing::debug!(
                    peer_id = self.config.peer_id,
                    window_ms = self.config.aggregation_window.as_millis() as u64,
                    "aggregation round opened"
                );
            }
        }
        Ok(())
    }

    /// Close the election window: commit the new role, replace the
    /// attendance timer, and notify on an actual transition.
    fn resolve_election(&mut self, attendance: &mut Interval) {
        let change = self.election.resolve();
        let role = self.election.role();

        let period = attendance_period(role, self.config.roll_call_frequency);
        *attendance = interval_at(Instant::now() + period, period);

        let _ = self.role_watch.send(role);

        if let Some(change) = change {
            tracing::info!(
                peer_id = self.config.peer_id,
                from = %change.from,
                to = %change.to,
                connected = ?change.connected,
                "role changed"
            );
            let _ = self.role_events.send(change);
        } else {
            tracing::debug!(
                peer_id = self.config.peer_id,
                role = %role,
                connected = ?self.election.members(),
                "election resolved, role unchanged"
            );
        }
    }

    /// Serialize the local notes and broadcast them on the `notes` channel.
    async fn share(&self) -> Result<()> {
        let payload = self.notes.to_payload()?;
        self.publish(Channel::Notes, &payload).await
    }

    async fn publish(&self, channel: Channel, payload: &str) -> Result<()> {
        let payload = if payload.is_empty() { PLACEHOLDER } else { payload };
        let message = codec::encode(self.config.peer_id, payload);
        self.transport.publish(channel, &message).await
    }

    /// Unconditional teardown on a fatal transport error: no retry, no
    /// backoff. Timers and the subscription drop with the node; an external
    /// supervisor restarts the process as a fresh peer.
    fn fatal_shutdown(self, error: RollcallError) -> Result<()> {
        tracing::error!(
            peer_id = self.config.peer_id,
            error = %error,
            "fatal transport error, shutting down"
        );
        Ok(())
    }
}

/// Spawn a peer onto the runtime and return its handle together with its
/// role-change subscription.
pub fn spawn_peer(
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> (PeerHandle, broadcast::Receiver<RoleChange>) {
    let (node, commands) = PeerNode::new(config, transport);
    let handle = node.handle();
    let role_changes = node.subscribe_role_changes();
    tokio::spawn(async move {
        if let Err(error) = node.run(commands, shutdown).await {
            tracing::error!(error = %error, "peer exited with error");
        }
    });
    (handle, role_changes)
}
