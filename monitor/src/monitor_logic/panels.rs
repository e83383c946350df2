//! Headless panels: each one subscribes to its section, keeps the latest
//! value and logs a one-line summary on every update.

use lib_stream::core::{
    Overview, Section, SectionName, SecurityStatus, SubscriptionId, SubscriptionRouter, TrainingMetrics, WorkerRecord,
    WorkerStatus,
};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default, Clone)]
pub struct PanelState {
    pub overview: Option<Overview>,
    pub workers: Vec<WorkerRecord>,
    pub training: Option<TrainingMetrics>,
    pub security: Option<SecurityStatus>,
    pub updates: u64,
}

pub struct Panels {
    router: Arc<SubscriptionRouter>,
    state: Arc<Mutex<PanelState>>,
    ids: Mutex<Vec<SubscriptionId>>,
}

impl Panels {
    pub fn register(router: Arc<SubscriptionRouter>) -> Self {
        let state = Arc::new(Mutex::new(PanelState::default()));
        let mut ids = Vec::new();

        for name in [
            SectionName::Overview,
            SectionName::Workers,
            SectionName::TrainingMetrics,
            SectionName::Security,
        ] {
            let state = Arc::clone(&state);
            ids.push(router.subscribe(name, move |section| {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                apply(&mut state, section);
                Ok(())
            }));
        }

        Self {
            router,
            state,
            ids: Mutex::new(ids),
        }
    }

    pub fn state(&self) -> PanelState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn unregister(&self) {
        let ids: Vec<_> = self.ids.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for id in ids {
            self.router.unsubscribe(id);
        }
    }
}

fn apply(state: &mut PanelState, section: &Section) {
    state.updates += 1;
    match section {
        Section::Overview(overview) => {
            let metrics: Vec<String> = overview.metrics.iter().map(|m| format!("{}={}", m.label, m.value)).collect();
            let degraded = overview.services.iter().filter(|s| s.status != "running").count();
            tracing::info!(panel = "overview", metrics = %metrics.join(", "), degraded, "Overview updated");
            state.overview = Some(overview.clone());
        }
        Section::Workers(workers) => {
            tracing::info!(panel = "workers", summary = %worker_summary(workers), "Workers updated");
            state.workers = workers.clone();
        }
        Section::TrainingMetrics(training) => {
            for metric in &training.metrics {
                if let Some(target) = metric.target {
                    if metric.value < target {
                        tracing::warn!(panel = "training", label = %metric.label, value = metric.value, target, "Metric below target");
                    }
                }
            }
            tracing::info!(panel = "training", round = ?training.round, metrics = training.metrics.len(), "Training metrics updated");
            state.training = Some(training.clone());
        }
        Section::Security(security) => {
            for event in &security.events {
                tracing::warn!(panel = "security", kind = %event.kind, time = ?event.time, "{}", event.message);
            }
            tracing::info!(panel = "security", metrics = security.metrics.len(), "Security status updated");
            state.security = Some(security.clone());
        }
        // The ledger tip belongs to the feed reconciler.
        Section::Blockchain(_) => {}
    }
}

/// `"2/5 training"`.
pub fn worker_summary(workers: &[WorkerRecord]) -> String {
    let training = workers.iter().filter(|w| w.status == WorkerStatus::Training).count();
    format!("{}/{} training", training, workers.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_stream::decode;

    #[test]
    fn test_panels_track_latest_sections() {
        let router = Arc::new(SubscriptionRouter::new());
        let panels = Panels::register(Arc::clone(&router));

        let snapshot = decode(
            r#"{
                "workers": [
                    {"id": "worker-01", "status": "training"},
                    {"id": "worker-02", "status": "idle"}
                ],
                "training": {"round": 4, "metrics": [{"label": "Accuracy", "value": 71.0, "target": 90.0}]},
                "blockchain": {"latest_block": null}
            }"#,
        )
        .unwrap();
        router.publish(&snapshot);

        let state = panels.state();
        assert_eq!(state.updates, 2);
        assert_eq!(worker_summary(&state.workers), "1/2 training");
        assert_eq!(state.training.unwrap().round, Some(4));
        assert!(state.overview.is_none());
    }

    #[test]
    fn test_unregister() {
        let router = Arc::new(SubscriptionRouter::new());
        let panels = Panels::register(Arc::clone(&router));
        assert_eq!(router.subscriber_count(SectionName::Security), 1);

        panels.unregister();
        assert_eq!(router.subscriber_count(SectionName::Security), 0);
    }
}
