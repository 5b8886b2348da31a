use serde::{Deserialize, Serialize};

/// Outbound, fire-and-forget notification. Delivery failures are logged and
/// never fed back into pipeline decisions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub incident_id: String,
    pub plan_id: Option<String>,
    pub title: String,
    pub body: String,
}

impl NotifyEvent {
    pub fn incident(incident_id: &str, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.to_string(),
            plan_id: None,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn plan(
        incident_id: &str,
        plan_id: &str,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            incident_id: incident_id.to_string(),
            plan_id: Some(plan_id.to_string()),
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Sink for operator-facing notifications (chat webhook, pager, log).
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &NotifyEvent);
}

/// Default sink: structured log lines.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &NotifyEvent) {
        tracing::info!(
            incident_id = %event.incident_id,
            plan_id = event.plan_id.as_deref().unwrap_or("-"),
            title = %event.title,
            body = %event.body,
            "notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<NotifyEvent>>);

    impl Notifier for Capture {
        fn notify(&self, event: &NotifyEvent) {
            if let Ok(mut guard) = self.0.lock() {
                guard.push(event.clone());
            }
        }
    }

    #[test]
    fn capture_sink_receives_events() {
        let sink = Capture(Mutex::new(Vec::new()));
        sink.notify(&NotifyEvent::plan("inc-1", "plan-1", "approval needed", "2 approvals"));
        let events = sink.0.lock().expect("lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plan_id.as_deref(), Some("plan-1"));
    }
}
