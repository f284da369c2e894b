//! Session state derived from asynchronous protocol events.
//!
//! The tracker is pure: the read loop feeds it every decoded event, and query
//! handlers read the result. Dispatch is total — every event maps to a defined
//! action, including "do nothing".

use serde::Serialize;
use serde_json::Value;

use crate::messages::Event;

/// Connection lifecycle: `Disconnected -> Connected -> {Running, Paused}`,
/// back to `Disconnected` on terminate or transport close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    /// Transport handshake done, `initialize`/`configurationDone` in flight.
    Connected,
    Running,
    Paused,
}

/// Capabilities advertised by the debug server in the `initialize` response.
///
/// Kept as raw JSON plus a boolean accessor; the client only feature-detects,
/// it does not need a full typed struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Capabilities(pub Value);

impl Capabilities {
    pub fn supports(&self, flag: &str) -> bool {
        self.0.get(flag).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct SessionTracker {
    state: SessionState,
    current_thread: Option<i64>,
    capabilities: Option<Capabilities>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            current_thread: None,
            capabilities: None,
        }
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == SessionState::Paused
    }

    /// Thread id recorded from the most recent `stopped` event; cleared again
    /// when execution resumes.
    pub fn current_thread(&self) -> Option<i64> {
        self.current_thread
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Transport handshake succeeded; capabilities come from the `initialize`
    /// response body.
    pub fn mark_connected(&mut self, capabilities: Capabilities) {
        self.state = SessionState::Connected;
        self.capabilities = Some(capabilities);
    }

    /// `configurationDone` acknowledged — the game is live.
    pub fn mark_running(&mut self) {
        if self.state == SessionState::Connected {
            self.state = SessionState::Running;
        }
    }

    /// Transport closed. Session-scoped data is dropped; breakpoint
    /// configuration lives elsewhere and survives.
    pub fn mark_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.current_thread = None;
        self.capabilities = None;
    }

    /// Apply one asynchronous protocol event.
    pub fn apply_event(&mut self, event: &Event) {
        match event.event.as_str() {
            "stopped" => {
                self.state = SessionState::Paused;
                self.current_thread = event
                    .body
                    .as_ref()
                    .and_then(|body| body.get("threadId"))
                    .and_then(Value::as_i64);
            }
            "continued" => {
                if self.state == SessionState::Paused {
                    self.state = SessionState::Running;
                }
                self.current_thread = None;
            }
            "terminated" => self.mark_disconnected(),
            // `output` and anything unrecognized are informational.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, body: Option<Value>) -> Event {
        Event {
            seq: 0,
            event: name.to_string(),
            body,
        }
    }

    fn running_tracker() -> SessionTracker {
        let mut tracker = SessionTracker::new();
        tracker.mark_connected(Capabilities(json!({"supportsConfigurationDoneRequest": true})));
        tracker.mark_running();
        tracker
    }

    #[test]
    fn handshake_reaches_running() {
        let tracker = running_tracker();
        assert_eq!(tracker.state(), SessionState::Running);
        assert!(tracker
            .capabilities()
            .unwrap()
            .supports("supportsConfigurationDoneRequest"));
    }

    #[test]
    fn stopped_event_pauses_and_records_the_thread() {
        let mut tracker = running_tracker();
        tracker.apply_event(&event(
            "stopped",
            Some(json!({"reason": "breakpoint", "threadId": 7})),
        ));
        assert_eq!(tracker.state(), SessionState::Paused);
        assert_eq!(tracker.current_thread(), Some(7));
    }

    #[test]
    fn stopped_then_continued_leaves_running() {
        let mut tracker = running_tracker();
        tracker.apply_event(&event("stopped", Some(json!({"threadId": 1}))));
        tracker.apply_event(&event("continued", Some(json!({"threadId": 1}))));
        assert_eq!(tracker.state(), SessionState::Running);
        assert_eq!(tracker.current_thread(), None);
    }

    #[test]
    fn terminated_clears_session_scoped_data() {
        let mut tracker = running_tracker();
        tracker.apply_event(&event("stopped", Some(json!({"threadId": 1}))));
        tracker.apply_event(&event("terminated", None));
        assert_eq!(tracker.state(), SessionState::Disconnected);
        assert_eq!(tracker.current_thread(), None);
        assert!(tracker.capabilities().is_none());
    }

    #[test]
    fn output_events_cause_no_transition() {
        let mut tracker = running_tracker();
        tracker.apply_event(&event(
            "output",
            Some(json!({"category": "stdout", "output": "hello\n"})),
        ));
        assert_eq!(tracker.state(), SessionState::Running);
    }

    #[test]
    fn stopped_without_thread_id_still_pauses() {
        let mut tracker = running_tracker();
        tracker.apply_event(&event("stopped", None));
        assert!(tracker.is_paused());
        assert_eq!(tracker.current_thread(), None);
    }
}
