//! Periodic availability broadcast on the discovery channel.

use log::{debug, info};
use shared::protocol::Advertisement;
use shared::{Endpoint, RunFlag, TransportError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

pub struct Advertiser {
    endpoint: Endpoint,
    target: SocketAddr,
    advertisement: Advertisement,
    interval: Duration,
}

impl Advertiser {
    /// Binds an ephemeral broadcast-capable socket that will announce
    /// `"<name>:<session_port>"` to `target` every `interval`.
    pub async fn bind(
        name: &str,
        session_port: u16,
        target: SocketAddr,
        interval: Duration,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::bind_broadcast("0.0.0.0:0").await?;
        Ok(Self {
            endpoint,
            target,
            advertisement: Advertisement {
                name: name.to_string(),
                port: session_port,
            },
            interval,
        })
    }

    pub async fn advertise_once(&self) -> Result<(), TransportError> {
        debug!("Advertising {} to {}", self.advertisement.encode(), self.target);
        self.endpoint
            .send_to(self.target, self.advertisement.encode().as_bytes())
            .await
    }

    /// Advertises until `running` is cleared. Cancellation takes effect
    /// immediately, not at the next interval.
    pub async fn run(self, running: RunFlag) -> Result<(), TransportError> {
        info!(
            "Advertising \"{}\" on {} every {:?}",
            self.advertisement.encode(),
            self.target,
            self.interval
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = running.stopped() => break,
                _ = ticker.tick() => self.advertise_once().await?,
            }
        }

        info!("Stopped advertising");
        Ok(())
    }
}
