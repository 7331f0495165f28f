//! Host network layer: the session receive loop plus the periodic heartbeat,
//! meeting and advertisement tasks.
//!
//! The loops share state only through the presence registry, the heartbeat
//! counters and the meeting slot. Output for the embedding application goes
//! out over an unbounded [`HostEvent`] channel.

use crate::config::HostConfig;
use crate::discovery::Advertiser;
use crate::heartbeat::HeartbeatMonitor;
use crate::meeting::{MeetingCoordinator, MeetingTick};
use crate::registry::{PresenceRegistry, Upserted};
use log::{debug, error, info, warn};
use shared::protocol::{Ballot, BallotTarget, BodyReport, KillNotice, VerdictNotice};
use shared::{
    clip_name, timestamp_millis, Endpoint, Identity, Message, RunFlag, StateUpdate, Status,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const MEETING_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Joined {
        identity: Identity,
        name: String,
    },
    Disconnected {
        identity: Identity,
        name: String,
    },
    MeetingOpened {
        meeting_id: u64,
        reporter: Identity,
        victim: Option<Identity>,
    },
    Verdict(VerdictNotice),
    Kill(KillNotice),
    Chat {
        from: Identity,
        text: String,
    },
    /// The discovery broadcast failed and advertising stopped. The session
    /// itself keeps running.
    AdvertisingStopped(String),
    /// A loop hit a socket failure and the host stopped.
    Fault(String),
}

/// Everything the host's tasks share.
#[derive(Clone)]
struct HostContext {
    endpoint: Arc<Endpoint>,
    identity: Identity,
    registry: Arc<PresenceRegistry>,
    heartbeats: Arc<HeartbeatMonitor>,
    meetings: Arc<MeetingCoordinator>,
    running: RunFlag,
    events: mpsc::UnboundedSender<HostEvent>,
}

/// Authoritative session host.
pub struct Host {
    ctx: HostContext,
    config: HostConfig,
    tasks: Vec<JoinHandle<Result<(), TransportError>>>,
}

impl Host {
    /// Binds the session socket and registers the host as a participant.
    /// A bind failure is returned to the caller.
    pub async fn bind(
        config: HostConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>), TransportError> {
        let config = HostConfig {
            name: clip_name(&config.name),
            ..config
        };
        let endpoint = Endpoint::bind(&config.bind_addr.to_string())
            .await?
            .with_receive_timeout(config.receive_timeout);
        let identity = endpoint.local_identity()?;
        info!("Hosting \"{}\" on {}", config.name, identity);

        let registry = Arc::new(PresenceRegistry::new());
        registry.announce(identity, &config.name);

        let (events, events_rx) = mpsc::unbounded_channel();

        let ctx = HostContext {
            endpoint: Arc::new(endpoint),
            identity,
            registry,
            heartbeats: Arc::new(HeartbeatMonitor::new(config.miss_threshold)),
            meetings: Arc::new(MeetingCoordinator::new(
                config.meeting_countdown,
                config.verdict_display,
            )),
            running: RunFlag::new(),
            events,
        };

        Ok((
            Host {
                ctx,
                config,
                tasks: Vec::new(),
            },
            events_rx,
        ))
    }

    /// Spawns the receive loop, heartbeat checker, meeting clock and, if
    /// configured, the advertiser.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if let Some(target) = self.config.advertise_to {
            let advertiser = Advertiser::bind(
                &self.config.name,
                self.ctx.identity.port(),
                target,
                self.config.advertise_interval,
            )
            .await?;
            let ctx = self.ctx.clone();
            self.tasks.push(tokio::spawn(async move {
                // Discovery is optional; peers can still join by address.
                if let Err(e) = advertiser.run(ctx.running.clone()).await {
                    warn!("Advertising stopped: {}", e);
                    ctx.emit(HostEvent::AdvertisingStopped(e.to_string()));
                }
                Ok(())
            }));
        }

        self.spawn_receiver();
        self.spawn_heartbeat_checker();
        self.spawn_meeting_clock();

        info!("Host started");
        Ok(())
    }

    fn spawn_receiver(&mut self) {
        let ctx = self.ctx.clone();
        self.tasks.push(tokio::spawn(async move {
            let result = ctx.receive_loop().await;
            ctx.report_fault(result)
        }));
    }

    fn spawn_heartbeat_checker(&mut self) {
        let ctx = self.ctx.clone();
        let check_interval = self.config.check_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Skip the first tick since it fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ctx.running.stopped() => break,
                    _ = ticker.tick() => {
                        for identity in ctx.heartbeats.tick() {
                            ctx.drop_participant(identity, "missed heartbeats");
                        }
                    }
                }
            }
            Ok::<(), TransportError>(())
        }));
    }

    fn spawn_meeting_clock(&mut self) {
        let ctx = self.ctx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(MEETING_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ctx.running.stopped() => break,
                    _ = ticker.tick() => match ctx.meetings.poll(&ctx.registry).await {
                        MeetingTick::Resolved(notice) => {
                            ctx.tolerate(ctx.announce_verdict(notice).await)?
                        }
                        MeetingTick::Discarded(id) => debug!("Meeting {} discarded", id),
                        MeetingTick::Idle => {}
                    },
                }
            }
            Ok::<(), TransportError>(())
        }));
    }

    /// Stops every loop and waits for them to finish. Returns the first
    /// transport error any loop ended with.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.ctx.running.stop();

        let mut first_error = None;
        for task in self.tasks.drain(..) {
            match task.await {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(e) => error!("Host task panicked: {}", e),
            }
        }

        info!("Host shut down");
        first_error.map_or(Ok(()), Err)
    }

    pub fn identity(&self) -> Identity {
        self.ctx.identity
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.is_running()
    }

    pub fn registry(&self) -> Arc<PresenceRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    pub fn heartbeats(&self) -> Arc<HeartbeatMonitor> {
        Arc::clone(&self.ctx.heartbeats)
    }

    pub fn meetings(&self) -> Arc<MeetingCoordinator> {
        Arc::clone(&self.ctx.meetings)
    }

    /// Applies the host's own local input. The host owns its position like any
    /// other participant. Non-finite positions are refused and `false` returned.
    pub fn update_local_state(&self, update: StateUpdate) -> bool {
        if !update.is_finite() {
            warn!("Ignoring non-finite local position ({}, {})", update.x, update.y);
            return false;
        }
        self.ctx
            .registry
            .update_self_position(self.ctx.identity, update);
        true
    }

    /// Host-decided status change for any participant, e.g. role assignment.
    pub fn set_status(&self, identity: Identity, status: Status) -> bool {
        self.ctx.registry.update_status(identity, status)
    }

    /// Tears a participant down as if its heartbeats had stopped.
    pub fn disconnect(&self, identity: Identity) -> bool {
        if identity == self.ctx.identity {
            return false;
        }
        self.ctx.heartbeats.forget(&identity);
        self.ctx.drop_participant(identity, "removed by host")
    }

    /// Opens a meeting on behalf of the host itself.
    pub async fn call_meeting(
        &self,
        victim: Option<Identity>,
    ) -> Result<Option<u64>, TransportError> {
        self.ctx.open_meeting(self.ctx.identity, victim).await
    }

    /// Casts the host's own ballot in the current meeting.
    pub async fn cast_local_vote(&self, target: BallotTarget) -> Result<(), crate::BallotError> {
        let meeting_id = self
            .ctx
            .meetings
            .current_id()
            .await
            .ok_or(crate::BallotError::NoMeeting)?;

        self.ctx
            .submit_ballot(Ballot {
                meeting_id,
                voter: self.ctx.identity,
                target,
            })
            .await
    }

    /// Marks `victim` dead and tells everyone.
    pub async fn kill(&self, victim: Identity) -> Result<bool, TransportError> {
        let Some(record) = self.ctx.registry.get(&victim) else {
            return Ok(false);
        };
        let notice = KillNotice {
            victim,
            x: record.x,
            y: record.y,
            character: record.character,
            timestamp: timestamp_millis(),
        };
        self.ctx.apply_kill(notice).await?;
        Ok(true)
    }

    /// Sends a chat line from the host to every participant.
    pub async fn say(&self, text: &str) -> Result<(), TransportError> {
        let line = format!("{}: {}", self.config.name, text);
        self.ctx.broadcast(&Message::Relay(line), None).await
    }
}

impl HostContext {
    fn emit(&self, event: HostEvent) {
        // The application may have dropped its receiver; that is not our problem.
        let _ = self.events.send(event);
    }

    fn report_fault(&self, result: Result<(), TransportError>) -> Result<(), TransportError> {
        if let Err(e) = &result {
            error!("Host loop failed: {}", e);
            self.running.stop();
            self.emit(HostEvent::Fault(e.to_string()));
        }
        result
    }

    /// Passes socket faults through and logs anything that only cost one frame.
    fn tolerate(&self, result: Result<(), TransportError>) -> Result<(), TransportError> {
        match result {
            Err(e) if !e.is_fatal() => {
                warn!("Dropped outgoing frame: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    async fn receive_loop(&self) -> Result<(), TransportError> {
        while self.running.is_running() {
            let Some((bytes, sender)) = self.endpoint.receive().await? else {
                continue;
            };

            // Any datagram counts as a liveness signal.
            self.heartbeats.touch(sender);

            match Message::decode(&bytes) {
                Ok(message) => self.tolerate(self.handle_message(message, sender).await)?,
                Err(e) => warn!("Dropping frame from {}: {}", sender, e),
            }
        }

        debug!("Host receive loop stopped");
        Ok(())
    }

    async fn handle_message(
        &self,
        message: Message,
        sender: Identity,
    ) -> Result<(), TransportError> {
        match message {
            Message::Name(name) => {
                // A record created by an early state push has no name yet.
                let named = self
                    .registry
                    .get(&sender)
                    .is_some_and(|record| !record.name.is_empty());
                self.registry.announce(sender, &name);

                if !named {
                    info!("{} joined from {}", name, sender);
                    self.emit(HostEvent::Joined {
                        identity: sender,
                        name,
                    });
                } else {
                    debug!("{} is now known as {}", sender, name);
                }
            }

            Message::Handshake => {
                self.endpoint
                    .send_message(sender, &Message::Ack(Some(sender)))
                    .await?;
            }

            Message::Ping => {
                self.endpoint.send_message(sender, &Message::Pong).await?;
            }

            Message::Update(update) => {
                if self.registry.update_self_position(sender, update) == Upserted::Created {
                    debug!("State update from unannounced {}", sender);
                }
                let snapshot = self.registry.snapshot(self.identity);
                self.endpoint
                    .send_message(sender, &Message::Snapshot(snapshot))
                    .await?;
            }

            Message::Kill(notice) => {
                self.apply_kill(notice).await?;
            }

            Message::Report(report) => {
                self.open_meeting(sender, report.victim).await?;
            }

            Message::Ballot(ballot) => {
                // The sender address is the voter, whatever the payload claims.
                let ballot = Ballot {
                    voter: sender,
                    ..ballot
                };
                if let Err(e) = self.submit_ballot(ballot).await {
                    info!("Rejected ballot from {}: {}", sender, e);
                }
            }

            Message::ListRequest => {
                let roster = self.registry.roster();
                self.endpoint
                    .send_message(sender, &Message::ListReply(roster))
                    .await?;
            }

            Message::Relay(text) => {
                let name = self
                    .registry
                    .get(&sender)
                    .map(|record| record.name)
                    .unwrap_or_else(|| sender.to_string());
                let line = format!("{}: {}", name, text);
                self.broadcast(&Message::Relay(line), Some(sender)).await?;
                self.emit(HostEvent::Chat { from: sender, text });
            }

            Message::Ack(_)
            | Message::Pong
            | Message::Snapshot(_)
            | Message::Verdict(_)
            | Message::ListReply(_) => {
                debug!("Ignoring host-bound {} from {}", message.tag(), sender);
            }
        }

        Ok(())
    }

    /// Sends `message` to every participant except the host and `exclude`.
    async fn broadcast(
        &self,
        message: &Message,
        exclude: Option<Identity>,
    ) -> Result<(), TransportError> {
        let bytes = message.to_bytes();
        for identity in self.registry.identities() {
            if identity == self.identity || Some(identity) == exclude {
                continue;
            }
            self.endpoint.send(identity, &bytes).await?;
        }
        Ok(())
    }

    /// Removes a participant's record and counter. Reports the departure once.
    fn drop_participant(&self, identity: Identity, reason: &str) -> bool {
        match self.registry.remove(&identity) {
            Some(record) => {
                info!("{} ({}) disconnected: {}", record.name, identity, reason);
                self.emit(HostEvent::Disconnected {
                    identity,
                    name: record.name,
                });
                true
            }
            None => {
                debug!("Stopped tracking unregistered sender {}", identity);
                false
            }
        }
    }

    async fn open_meeting(
        &self,
        reporter: Identity,
        victim: Option<Identity>,
    ) -> Result<Option<u64>, TransportError> {
        let Some(meeting_id) = self.meetings.open(reporter, victim).await else {
            return Ok(None);
        };

        let report = BodyReport {
            reporter,
            victim,
            meeting_id: Some(meeting_id),
        };
        self.broadcast(&Message::Report(report), None).await?;
        self.emit(HostEvent::MeetingOpened {
            meeting_id,
            reporter,
            victim,
        });
        Ok(Some(meeting_id))
    }

    async fn submit_ballot(&self, ballot: Ballot) -> Result<(), crate::BallotError> {
        if let Some(notice) = self.meetings.cast(ballot, &self.registry).await? {
            if let Err(e) = self.announce_verdict(notice).await {
                error!("Failed to broadcast verdict: {}", e);
            }
        }
        Ok(())
    }

    async fn announce_verdict(&self, notice: VerdictNotice) -> Result<(), TransportError> {
        self.broadcast(&Message::Verdict(notice.clone()), None)
            .await?;
        self.emit(HostEvent::Verdict(notice));
        Ok(())
    }

    async fn apply_kill(&self, notice: KillNotice) -> Result<(), TransportError> {
        if !self.registry.update_status(notice.victim, Status::Dead) {
            warn!("Kill reported for unknown participant {}", notice.victim);
            return Ok(());
        }
        self.broadcast(&Message::Kill(notice), None).await?;
        self.emit(HostEvent::Kill(notice));
        Ok(())
    }
}
