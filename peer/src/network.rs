//! Peer session: the join handshake, the heartbeat tick and the receive loop.
//!
//! The tick pushes the latest local state as `data` (or a bare `sys.ping`
//! before there is any) and counts one miss; every frame from the host that
//! decodes clears the count. Undecodable frames are not a sign of a working
//! link. Snapshots, kills, meetings and chat from the host are
//! applied to the shared [`WorldView`] and forwarded as [`PeerEvent`]s.

use crate::config::PeerConfig;
use crate::liveness::{LinkEvent, LivenessTracker};
use crate::view::WorldView;
use log::{debug, error, info, warn};
use shared::protocol::{Ballot, BallotTarget, BodyReport, KillNotice, VerdictNotice};
use shared::{
    clip_name, timestamp_millis, Endpoint, Identity, Message, RunFlag, StateUpdate, Status,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no acknowledgement from {host} within {timeout:?}")]
    HandshakeTimeout { host: Identity, timeout: Duration },

    #[error("no meeting is open")]
    NoMeeting,

    #[error("unknown participant {0}")]
    UnknownParticipant(Identity),
}

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Too many ticks passed without hearing from the host.
    ConnectionLost,
    /// The host answered again after the link was lost.
    Reconnected,
    StatusChanged(Status),
    MeetingOpened {
        meeting_id: u64,
        reporter: Identity,
        victim: Option<Identity>,
    },
    Verdict(VerdictNotice),
    Kill(KillNotice),
    Chat(String),
    Roster(String),
    /// A loop hit a socket failure and the session stopped.
    Fault(String),
}

#[derive(Clone)]
struct PeerContext {
    endpoint: Arc<Endpoint>,
    host: Identity,
    identity: Identity,
    name: String,
    view: Arc<RwLock<WorldView>>,
    liveness: Arc<LivenessTracker>,
    running: RunFlag,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// A joined session with one host.
pub struct Peer {
    ctx: PeerContext,
    config: PeerConfig,
    tasks: Vec<JoinHandle<Result<(), TransportError>>>,
}

impl Peer {
    /// Announces `config.name` to `host`, handshakes and waits for the
    /// acknowledgement. Fails cleanly on timeout so another host can be tried.
    pub async fn connect(
        config: PeerConfig,
        host: Identity,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>), SessionError> {
        let endpoint = Endpoint::bind(&config.bind_addr.to_string())
            .await?
            .with_receive_timeout(config.receive_timeout);

        let name = clip_name(&config.name);
        info!("Joining {} as \"{}\"", host, name);
        endpoint
            .send_message(host, &Message::Name(name.clone()))
            .await?;
        endpoint.send_message(host, &Message::Handshake).await?;

        let observed = tokio::time::timeout(config.handshake_timeout, wait_for_ack(&endpoint, host))
            .await
            .map_err(|_| SessionError::HandshakeTimeout {
                host,
                timeout: config.handshake_timeout,
            })??;

        // Older hosts send a bare ack; fall back to our own view of the socket.
        let identity = match observed {
            Some(identity) => identity,
            None => endpoint.local_identity()?,
        };
        info!("Joined {} as {}", host, identity);

        let mut view = WorldView::new(&name);
        view.set_identity(identity);

        let (events, events_rx) = mpsc::unbounded_channel();
        let ctx = PeerContext {
            endpoint: Arc::new(endpoint),
            host,
            identity,
            name,
            view: Arc::new(RwLock::new(view)),
            liveness: Arc::new(LivenessTracker::new(config.miss_threshold)),
            running: RunFlag::new(),
            events,
        };

        Ok((
            Peer {
                ctx,
                config,
                tasks: Vec::new(),
            },
            events_rx,
        ))
    }

    /// Spawns the receive loop and the heartbeat tick.
    pub fn start(&mut self) {
        self.spawn_receiver();
        self.spawn_ticker();
        debug!("Peer loops started");
    }

    fn spawn_receiver(&mut self) {
        let ctx = self.ctx.clone();
        self.tasks.push(tokio::spawn(async move {
            let result = ctx.receive_loop().await;
            ctx.report_fault(result)
        }));
    }

    fn spawn_ticker(&mut self) {
        let ctx = self.ctx.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let result = loop {
                tokio::select! {
                    _ = ctx.running.stopped() => break Ok(()),
                    _ = ticker.tick() => {
                        if let Err(e) = ctx.tick().await {
                            break Err(e);
                        }
                    }
                }
            };
            ctx.report_fault(result)
        }));
    }

    /// Stops both loops and waits for them. Returns the first transport
    /// error either loop ended with.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.ctx.running.stop();

        let mut first_error = None;
        for task in self.tasks.drain(..) {
            match task.await {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(e) => error!("Peer task panicked: {}", e),
            }
        }

        info!("Left {}", self.ctx.host);
        first_error.map_or(Ok(()), Err)
    }

    /// Our identity as the host sees it.
    pub fn identity(&self) -> Identity {
        self.ctx.identity
    }

    pub fn host(&self) -> Identity {
        self.ctx.host
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.is_running()
    }

    pub fn is_connected(&self) -> bool {
        !self.ctx.liveness.is_lost()
    }

    pub fn view(&self) -> Arc<RwLock<WorldView>> {
        Arc::clone(&self.ctx.view)
    }

    /// Stores local input; it goes out with the next tick. Non-finite
    /// positions are refused and `false` returned.
    pub async fn set_local_state(&self, update: StateUpdate) -> bool {
        if !update.is_finite() {
            warn!("Ignoring non-finite local position ({}, {})", update.x, update.y);
            return false;
        }
        self.ctx.view.write().await.set_local_state(update);
        true
    }

    pub async fn cast_vote(&self, target: BallotTarget) -> Result<(), SessionError> {
        let meeting_id = self
            .ctx
            .view
            .read()
            .await
            .meeting_id()
            .ok_or(SessionError::NoMeeting)?;

        let ballot = Ballot {
            meeting_id,
            voter: self.ctx.identity,
            target,
        };
        self.ctx.send(&Message::Ballot(ballot)).await?;
        Ok(())
    }

    /// Reports a body, or calls an emergency meeting when `victim` is `None`.
    pub async fn report(&self, victim: Option<Identity>) -> Result<(), SessionError> {
        let report = BodyReport {
            reporter: self.ctx.identity,
            victim,
            meeting_id: None,
        };
        self.ctx.send(&Message::Report(report)).await?;
        Ok(())
    }

    /// Tells the host `victim` was killed where we last saw them.
    pub async fn kill(&self, victim: Identity) -> Result<(), SessionError> {
        let notice = {
            let view = self.ctx.view.read().await;
            let record = view
                .get(&victim)
                .ok_or(SessionError::UnknownParticipant(victim))?;
            KillNotice {
                victim,
                x: record.x,
                y: record.y,
                character: record.character,
                timestamp: timestamp_millis(),
            }
        };
        self.ctx.send(&Message::Kill(notice)).await?;
        Ok(())
    }

    pub async fn chat(&self, text: &str) -> Result<(), SessionError> {
        self.ctx.send(&Message::Relay(text.to_string())).await?;
        Ok(())
    }

    /// Asks the host for the roster; it arrives as [`PeerEvent::Roster`].
    pub async fn request_roster(&self) -> Result<(), SessionError> {
        self.ctx.send(&Message::ListRequest).await?;
        Ok(())
    }
}

async fn wait_for_ack(
    endpoint: &Endpoint,
    host: Identity,
) -> Result<Option<Identity>, TransportError> {
    loop {
        let Some((bytes, sender)) = endpoint.receive().await? else {
            continue;
        };
        if sender != host {
            debug!("Ignoring {} bytes from {} while joining", bytes.len(), sender);
            continue;
        }
        match Message::decode(&bytes) {
            Ok(Message::Ack(observed)) => return Ok(observed),
            Ok(other) => debug!("Ignoring {} while joining", other.tag()),
            Err(e) => warn!("Dropping frame from {}: {}", sender, e),
        }
    }
}

impl PeerContext {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn report_fault(&self, result: Result<(), TransportError>) -> Result<(), TransportError> {
        if let Err(e) = &result {
            error!("Peer loop failed: {}", e);
            self.running.stop();
            self.emit(PeerEvent::Fault(e.to_string()));
        }
        result
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.endpoint.send_message(self.host, message).await
    }

    async fn tick(&self) -> Result<(), TransportError> {
        if self.liveness.on_tick() == Some(LinkEvent::Lost) {
            warn!("No traffic from {}; attempting to reconnect", self.host);
            self.emit(PeerEvent::ConnectionLost);
        }

        let update = self.view.read().await.outgoing_update();
        match update {
            Some(update) => self.send(&Message::Update(update)).await,
            None => self.send(&Message::Ping).await,
        }
    }

    async fn receive_loop(&self) -> Result<(), TransportError> {
        while self.running.is_running() {
            let Some((bytes, sender)) = self.endpoint.receive().await? else {
                continue;
            };

            if sender != self.host {
                debug!("Ignoring datagram from non-host {}", sender);
                continue;
            }

            let message = match Message::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Dropping frame from {}: {}", sender, e);
                    continue;
                }
            };

            if self.liveness.on_host_traffic() == Some(LinkEvent::Restored) {
                info!("Reconnected to {}", self.host);
                // The host may have dropped us meanwhile.
                self.send(&Message::Name(self.name.clone())).await?;
                self.emit(PeerEvent::Reconnected);
            }

            self.handle_message(message).await;
        }

        debug!("Peer receive loop stopped");
        Ok(())
    }

    async fn handle_message(&self, message: Message) {
        match message {
            Message::Snapshot(snapshot) => {
                if let Some(status) = self.view.write().await.apply_snapshot(snapshot) {
                    self.emit(PeerEvent::StatusChanged(status));
                }
            }

            Message::Kill(notice) => {
                info!("{} was killed", notice.victim);
                self.view.write().await.apply_kill(notice);
                self.emit(PeerEvent::Kill(notice));
            }

            Message::Report(report) => {
                if let Some(meeting_id) = self.view.write().await.apply_report(&report) {
                    info!("Meeting {} called by {}", meeting_id, report.reporter);
                    self.emit(PeerEvent::MeetingOpened {
                        meeting_id,
                        reporter: report.reporter,
                        victim: report.victim,
                    });
                }
            }

            Message::Verdict(notice) => {
                info!("Meeting {} resolved: {:?}", notice.meeting_id, notice.verdict);
                self.view.write().await.apply_verdict(notice.clone());
                self.emit(PeerEvent::Verdict(notice));
            }

            Message::ListReply(roster) => self.emit(PeerEvent::Roster(roster)),

            Message::Relay(line) => self.emit(PeerEvent::Chat(line)),

            // Both only matter as liveness, which the loop already counted.
            Message::Pong | Message::Ack(_) => {}

            Message::Name(_)
            | Message::Handshake
            | Message::Ping
            | Message::Update(_)
            | Message::Ballot(_)
            | Message::ListRequest => {
                debug!("Ignoring peer-bound {} from host", message.tag());
            }
        }
    }
}
