// ── Output publisher ──
//
// Emits network status, the registry snapshot and the feedback vector
// once per exchange period, plus an immediate registry snapshot whenever
// the registry changes.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::communicator::CommunicatorInner;
use crate::model::Output;
use crate::perf::Metric;

pub(crate) async fn publisher_task(inner: Arc<CommunicatorInner>) {
    let cancel = inner.cancel.clone();
    let mut registry_rx = inner.registry.subscribe();
    let mut interval = tokio::time::interval(inner.config.period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    debug!("output publisher started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = registry_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = Arc::clone(&registry_rx.borrow_and_update());
                inner.publish(Output::Registry(snapshot));
            }
            _ = interval.tick() => {
                let started = Instant::now();
                inner.publish(Output::Network(inner.network_status()));
                inner.publish(Output::Registry(inner.registry.snapshot()));
                inner.publish(Output::Feedback(Arc::new(inner.registry.feedback_vector())));
                inner.perf.record(Metric::Publish, started.elapsed());
            }
        }
    }
    debug!("output publisher stopped");
}
