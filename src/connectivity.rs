//! Backend reachability tracking.
//!
//! The monitor owns the authoritative `ConnectionStatus` and publishes it
//! over a watch channel. Two inputs feed it: host-reported online/offline
//! signals ([`ConnectivityMonitor::set_network_online`]) and a recurring
//! health probe that runs while the network is up. Probe failures never
//! propagate; they only move the published state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::api::ChatTransport;
use crate::types::{ConnectionStatus, ProbeOutcome};

pub struct ConnectivityMonitor {
    transport: Arc<dyn ChatTransport>,
    status_tx: watch::Sender<ConnectionStatus>,
    probe_task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start the monitor with its recurring probe. The first probe fires
    /// immediately.
    pub fn spawn(transport: Arc<dyn ChatTransport>, probe_interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let probe_task = tokio::spawn(probe_loop(
            Arc::clone(&transport),
            status_tx.clone(),
            probe_interval,
        ));
        Self {
            transport,
            status_tx,
            probe_task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Host-reported network signal. Going offline marks the backend
    /// unavailable without probing; coming back online probes immediately.
    pub fn set_network_online(&self, online: bool) {
        if online {
            self.status_tx
                .send_modify(|status| status.network_online = true);
            let transport = Arc::clone(&self.transport);
            let status_tx = self.status_tx.clone();
            tokio::spawn(async move {
                probe_once(transport.as_ref(), &status_tx).await;
            });
        } else {
            self.status_tx.send_modify(|status| {
                status.network_online = false;
                status.backend_available = false;
            });
        }
    }

    /// Stop the recurring probe. Dropping the monitor does the same.
    pub fn shutdown(&self) {
        self.probe_task.abort();
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.probe_task.abort();
    }
}

async fn probe_loop(
    transport: Arc<dyn ChatTransport>,
    status_tx: watch::Sender<ConnectionStatus>,
    probe_interval: Duration,
) {
    let mut ticker = time::interval(probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !status_tx.borrow().network_online {
            continue;
        }
        probe_once(transport.as_ref(), &status_tx).await;
    }
}

async fn probe_once(transport: &dyn ChatTransport, status_tx: &watch::Sender<ConnectionStatus>) {
    let outcome = match transport.check_health().await {
        Ok(true) => ProbeOutcome::Healthy,
        Ok(false) => ProbeOutcome::Unhealthy,
        Err(err) => {
            debug!(error = %err, "health probe failed");
            ProbeOutcome::Unreachable
        }
    };
    status_tx.send_if_modified(|status| {
        let available = outcome == ProbeOutcome::Healthy;
        if status.backend_available == available && status.last_probe == outcome {
            return false;
        }
        status.backend_available = available;
        status.last_probe = outcome;
        true
    });
}
