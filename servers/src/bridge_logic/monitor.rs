//! Link watchdog. Pure observability: it logs the broker link state, the
//! age of the last delivery and the open-client count, and warns when a
//! subscribed link goes silent while clients are waiting. Recovery itself
//! is owned by the broker task.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::bridge_logic::config::Settings;
use crate::bridge_logic::state::{AppState, LinkState};

pub async fn run(cfg: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut check_interval = interval(Duration::from_secs(cfg.monitor_interval_seconds.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("monitor shutting down");
                break;
            }
            _ = check_interval.tick() => {
                let link = state.link_state();
                let clients = state.client_count();
                let delivery_age = state.seconds_since_last_delivery();

                match delivery_age {
                    Some(age)
                        if link == LinkState::Subscribed
                            && clients > 0
                            && age > cfg.dataflow_inactivity_threshold_seconds =>
                    {
                        log::warn!(
                            "no broker deliveries for {}s with {} clients connected",
                            age,
                            clients
                        );
                    }
                    _ => {
                        log::debug!(
                            "link={} clients={} last_delivery_age={:?}",
                            link.as_str(),
                            clients,
                            delivery_age
                        );
                    }
                }
            }
        }
    }
}
