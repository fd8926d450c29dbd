//! Prioritized inference endpoints with health probing and cooldown failover.

use crate::error::TaggerError;
use chrono::{DateTime, Utc};
use providers::KeywordProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Healthy,
    Cooling,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub address: String,
    pub availability: Availability,
    pub last_failure: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Endpoint handed out for one inference attempt.
#[derive(Clone)]
pub struct Selection {
    pub provider: Arc<dyn KeywordProvider>,
    /// Set when the last probe found nothing usable and the previously
    /// active endpoint is returned anyway.
    pub degraded: bool,
}

struct Endpoint {
    provider: Arc<dyn KeywordProvider>,
    availability: Availability,
    last_failure: Option<DateTime<Utc>>,
}

struct PoolState {
    endpoints: Vec<Endpoint>,
    active: Option<usize>,
    last_check: Option<Instant>,
    force: bool,
    degraded: bool,
}

pub struct EndpointPool {
    state: Mutex<PoolState>,
    switch_delay: Duration,
}

impl EndpointPool {
    pub fn new(
        providers: Vec<Arc<dyn KeywordProvider>>,
        switch_delay: Duration,
    ) -> Result<Self, TaggerError> {
        if providers.is_empty() {
            return Err(TaggerError::Configuration(
                "endpoint pool needs at least one endpoint".into(),
            ));
        }
        let endpoints = providers
            .into_iter()
            .map(|provider| Endpoint {
                provider,
                availability: Availability::Unknown,
                last_failure: None,
            })
            .collect();
        Ok(Self {
            state: Mutex::new(PoolState {
                endpoints,
                active: None,
                last_check: None,
                force: false,
                degraded: false,
            }),
            switch_delay,
        })
    }

    /// Returns the active endpoint, re-probing first when nothing was
    /// validated yet, a recheck was forced, or the switch delay elapsed.
    /// The lock is held across probing so callers never race to switch.
    pub async fn current(&self) -> Result<Selection, TaggerError> {
        let mut state = self.state.lock().await;
        if self.needs_check(&state) {
            Self::probe_locked(&mut state).await;
        }
        Self::selection(&state)
    }

    /// Probes now, regardless of cooldown.
    pub async fn probe(&self) -> Result<Selection, TaggerError> {
        let mut state = self.state.lock().await;
        Self::probe_locked(&mut state).await;
        Self::selection(&state)
    }

    /// Makes the next `current()` call re-probe.
    pub async fn force_recheck(&self) {
        self.state.lock().await.force = true;
    }

    pub async fn status(&self) -> Vec<EndpointStatus> {
        let state = self.state.lock().await;
        state
            .endpoints
            .iter()
            .enumerate()
            .map(|(idx, e)| EndpointStatus {
                address: e.provider.address().to_string(),
                availability: e.availability,
                last_failure: e.last_failure,
                active: state.active == Some(idx),
            })
            .collect()
    }

    fn needs_check(&self, state: &PoolState) -> bool {
        if state.active.is_none() {
            return true;
        }
        // a lone validated endpoint has nowhere to fail over to
        if state.endpoints.len() == 1 {
            return false;
        }
        state.force
            || state
                .last_check
                .map_or(true, |at| at.elapsed() >= self.switch_delay)
    }

    fn selection(state: &PoolState) -> Result<Selection, TaggerError> {
        let idx = state.active.ok_or(TaggerError::NoEndpointAvailable)?;
        Ok(Selection {
            provider: state.endpoints[idx].provider.clone(),
            degraded: state.degraded,
        })
    }

    async fn probe_locked(state: &mut PoolState) {
        state.force = false;
        state.last_check = Some(Instant::now());

        let mut chosen = None;
        for (idx, endpoint) in state.endpoints.iter_mut().enumerate() {
            match endpoint.provider.ensure_ready().await {
                Ok(()) => {
                    endpoint.availability = Availability::Healthy;
                    chosen = Some(idx);
                    break;
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.provider.address(), error = %e, "endpoint probe failed");
                    endpoint.availability = Availability::Cooling;
                    endpoint.last_failure = Some(Utc::now());
                }
            }
        }

        match chosen {
            Some(idx) => {
                if state.active != Some(idx) {
                    info!(endpoint = %state.endpoints[idx].provider.address(), "endpoint active");
                }
                state.active = Some(idx);
                state.degraded = false;
            }
            None => {
                state.degraded = state.active.is_some();
                match state.active {
                    Some(idx) => warn!(
                        endpoint = %state.endpoints[idx].provider.address(),
                        "no endpoint passed its probe, staying on last active (degraded)"
                    ),
                    None => warn!("no endpoint passed its probe"),
                }
            }
        }
    }
}
