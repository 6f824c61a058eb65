//! Mirror of the driver-side data-packet dispatch state machine
//!
//! The driver tracks each `(sessionId, streamId)` source through a small
//! lifecycle: first data from an unknown source elicits a setup exchange,
//! setup moves it to initialization, installing the image activates it,
//! and removal parks it on a cool-down so straggler packets do not
//! resurrect the session. The client never runs this machine itself, but
//! mirrors it so the transitions the protocol depends on stay pinned by
//! tests on this side of the boundary.

use std::collections::HashMap;

/// Lifecycle of one `(sessionId, streamId)` source at the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// First data seen, setup elicitation outstanding
    PendingSetup,
    /// Setup received, image creation in progress
    InitInProgress,
    /// Image installed, data flows to subscribers
    Active,
    /// Image removed, absorbing stragglers until the cool-down expires
    OnCoolDown,
}

/// What the dispatcher does with an arriving data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Unknown source: start tracking and elicit a setup frame
    ElicitSetup,
    /// Active source: hand the packet to its image
    Dispatch,
    /// Tracked but not active: drop the packet
    Drop,
}

#[derive(Debug)]
struct SessionEntry {
    status: SessionStatus,
    cool_down_deadline_ms: i64,
}

/// Dispatch table keyed by `(sessionId, streamId)`
#[derive(Debug)]
pub struct DataPacketDispatcher {
    sessions: HashMap<(i32, i32), SessionEntry>,
    cool_down_ms: i64,
}

impl DataPacketDispatcher {
    pub fn new(cool_down_ms: i64) -> Self {
        Self {
            sessions: HashMap::new(),
            cool_down_ms,
        }
    }

    pub fn status(&self, session_id: i32, stream_id: i32) -> Option<SessionStatus> {
        self.sessions
            .get(&(session_id, stream_id))
            .map(|e| e.status)
    }

    pub fn on_data_packet(&mut self, session_id: i32, stream_id: i32) -> DispatchAction {
        match self.sessions.get(&(session_id, stream_id)) {
            None => {
                self.sessions.insert(
                    (session_id, stream_id),
                    SessionEntry {
                        status: SessionStatus::PendingSetup,
                        cool_down_deadline_ms: 0,
                    },
                );
                DispatchAction::ElicitSetup
            }
            Some(entry) => match entry.status {
                SessionStatus::Active => DispatchAction::Dispatch,
                _ => DispatchAction::Drop,
            },
        }
    }

    /// Setup frame received; only meaningful while pending
    pub fn on_setup(&mut self, session_id: i32, stream_id: i32) -> bool {
        match self.sessions.get_mut(&(session_id, stream_id)) {
            Some(entry) if entry.status == SessionStatus::PendingSetup => {
                entry.status = SessionStatus::InitInProgress;
                true
            }
            _ => false,
        }
    }

    /// Image installed by the conductor side; activates the session
    pub fn on_image_installed(&mut self, session_id: i32, stream_id: i32) -> bool {
        match self.sessions.get_mut(&(session_id, stream_id)) {
            Some(entry) if entry.status == SessionStatus::InitInProgress => {
                entry.status = SessionStatus::Active;
                true
            }
            _ => false,
        }
    }

    /// Image removed; the session absorbs stragglers until the deadline
    pub fn on_image_removed(&mut self, session_id: i32, stream_id: i32, now_ms: i64) -> bool {
        match self.sessions.get_mut(&(session_id, stream_id)) {
            Some(entry) if entry.status == SessionStatus::Active => {
                entry.status = SessionStatus::OnCoolDown;
                entry.cool_down_deadline_ms = now_ms + self.cool_down_ms;
                true
            }
            _ => false,
        }
    }

    /// Expire cooled-down sessions, returning how many were forgotten
    pub fn check_cool_downs(&mut self, now_ms: i64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            entry.status != SessionStatus::OnCoolDown || now_ms < entry.cool_down_deadline_ms
        });
        before - self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: i32 = 7;
    const STREAM: i32 = 1001;

    #[test]
    fn test_full_lifecycle() {
        let mut dispatcher = DataPacketDispatcher::new(1000);

        assert_eq!(
            dispatcher.on_data_packet(SESSION, STREAM),
            DispatchAction::ElicitSetup
        );
        assert_eq!(
            dispatcher.status(SESSION, STREAM),
            Some(SessionStatus::PendingSetup)
        );

        // data while pending is dropped
        assert_eq!(dispatcher.on_data_packet(SESSION, STREAM), DispatchAction::Drop);

        assert!(dispatcher.on_setup(SESSION, STREAM));
        assert_eq!(
            dispatcher.status(SESSION, STREAM),
            Some(SessionStatus::InitInProgress)
        );
        assert_eq!(dispatcher.on_data_packet(SESSION, STREAM), DispatchAction::Drop);

        assert!(dispatcher.on_image_installed(SESSION, STREAM));
        assert_eq!(
            dispatcher.on_data_packet(SESSION, STREAM),
            DispatchAction::Dispatch
        );

        assert!(dispatcher.on_image_removed(SESSION, STREAM, 5000));
        assert_eq!(dispatcher.on_data_packet(SESSION, STREAM), DispatchAction::Drop);
    }

    #[test]
    fn test_cool_down_expiry_forgets_session() {
        let mut dispatcher = DataPacketDispatcher::new(1000);
        dispatcher.on_data_packet(SESSION, STREAM);
        dispatcher.on_setup(SESSION, STREAM);
        dispatcher.on_image_installed(SESSION, STREAM);
        dispatcher.on_image_removed(SESSION, STREAM, 5000);

        assert_eq!(dispatcher.check_cool_downs(5500), 0);
        assert_eq!(
            dispatcher.status(SESSION, STREAM),
            Some(SessionStatus::OnCoolDown)
        );

        assert_eq!(dispatcher.check_cool_downs(6000), 1);
        assert_eq!(dispatcher.status(SESSION, STREAM), None);

        // after expiry a new data packet restarts the lifecycle
        assert_eq!(
            dispatcher.on_data_packet(SESSION, STREAM),
            DispatchAction::ElicitSetup
        );
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut dispatcher = DataPacketDispatcher::new(1000);

        // setup for an unknown source does nothing
        assert!(!dispatcher.on_setup(SESSION, STREAM));

        dispatcher.on_data_packet(SESSION, STREAM);
        // cannot install an image before setup
        assert!(!dispatcher.on_image_installed(SESSION, STREAM));
        // cannot remove an image that was never active
        assert!(!dispatcher.on_image_removed(SESSION, STREAM, 100));
    }

    #[test]
    fn test_streams_are_independent() {
        let mut dispatcher = DataPacketDispatcher::new(1000);
        dispatcher.on_data_packet(SESSION, STREAM);
        dispatcher.on_setup(SESSION, STREAM);
        dispatcher.on_image_installed(SESSION, STREAM);

        assert_eq!(
            dispatcher.on_data_packet(SESSION, STREAM + 1),
            DispatchAction::ElicitSetup
        );
        assert_eq!(
            dispatcher.on_data_packet(SESSION, STREAM),
            DispatchAction::Dispatch
        );
    }
}
