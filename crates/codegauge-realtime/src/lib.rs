//! # Codegauge Real-time
//!
//! Push-event plumbing for the Codegauge dashboard client.
//!
//! ## Features
//!
//! - **Connection Manager**: one logical connection with an explicit state
//!   machine and an automatic reconnect loop
//! - **Subscription Registry**: idempotent topic subscriptions that survive
//!   reconnects and identity changes
//! - **Event Router**: raw messages in, one typed stream per event variant out
//! - **Transports**: STOMP over WebSocket, and an in-memory transport for tests
//!
//! ## Topics
//!
//! - `/topic/scan-status` - Scan lifecycle (public)
//! - `/topic/notifications/global` - Broadcast notifications (public)
//! - `/topic/projects` - Project added/updated/deleted (public)
//! - `/topic/issues` - Issue changes (public)
//! - `/topic/notifications/{userId}` - User notifications (private)
//! - `/topic/user/{userId}/verify-status` - Account verification (private)
//! - `/topic/issue/{issueId}/comments` - Comments, on demand (private)
//!
//! ## Example
//!
//! ```rust
//! use codegauge_realtime::{ConnectionManager, EventRouter, MemoryTransport, ReconnectPolicy};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = Arc::new(MemoryTransport::new());
//! let router = Arc::new(EventRouter::new());
//! let manager = ConnectionManager::new(transport.clone(), router.clone(), ReconnectPolicy::default());
//!
//! let mut sessions = manager.sessions();
//! let mut scans = router.scan_events();
//! manager.connect(Some("42".into())).await;
//! sessions.recv().await.unwrap();
//!
//! transport.publish(
//!     "/topic/scan-status",
//!     r#"{"projectId": 1, "scanId": 7, "status": "PENDING"}"#,
//! );
//! let event = scans.recv().await.unwrap();
//! assert_eq!(event.status.as_str(), "SCANNING");
//!
//! manager.disconnect().await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectionManager             │
//! │   driver task: open ─► pump ─► retry     │
//! │        │                    │            │
//! │        ▼                    ▼            │
//! │  SubscriptionRegistry   EventRouter      │
//! │  (intent per topic)     (typed streams)  │
//! └────────┬─────────────────────────────────┘
//!          ▼
//!     dyn Transport (STOMP/WebSocket, memory)
//! ```

pub mod connection;
pub mod error;
pub mod event;
pub mod memory;
pub mod router;
pub mod stomp;
pub mod subscription;
pub mod topic;
pub mod transport;
pub mod websocket;

// Re-export main types
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy, Trigger};
pub use error::{RealtimeError, Result};
pub use event::{
    CommentEvent, Event, EventKind, IssueAction, IssueChangeEvent, NotificationEvent,
    ProjectAction, ProjectChangeEvent, ScanEvent, VerifyStatusEvent,
};
pub use memory::MemoryTransport;
pub use router::{EventRouter, RouterStats, DEFAULT_EVENT_CAPACITY};
pub use subscription::{SubscriptionInfo, SubscriptionRegistry};
pub use topic::{Topic, TopicScope};
pub use transport::{SubscriptionHandle, Transport, TransportEvent};
pub use websocket::StompTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn dispatch_never_panics_on_arbitrary_payloads(
            topic_index in 0usize..7,
            payload in ".*",
        ) {
            let topics = [
                "/topic/scan-status",
                "/topic/notifications/global",
                "/topic/projects",
                "/topic/issues",
                "/topic/notifications/u1",
                "/topic/user/u1/verify-status",
                "/topic/nowhere",
            ];
            let router = EventRouter::new();
            let _ = router.dispatch(topics[topic_index], &payload);
        }

        #[test]
        fn malformed_json_publishes_nothing(payload in "[^{\\[\\s]\\PC*") {
            let router = EventRouter::new();
            let mut scans = router.scan_events();
            let mut projects = router.project_events();
            prop_assert_eq!(router.dispatch("/topic/scan-status", &payload), None);
            prop_assert_eq!(router.dispatch("/topic/projects", &payload), None);
            prop_assert!(scans.try_recv().is_err());
            prop_assert!(projects.try_recv().is_err());
        }

        #[test]
        fn scan_status_mapping_is_total(raw in "\\PC*") {
            let status = codegauge_types::ScanStatus::from_backend(&raw);
            let known = ["PENDING", "SCANNING", "SUCCESS", "FAILED"];
            if !known.contains(&raw.trim().to_ascii_uppercase().as_str()) {
                prop_assert_eq!(status, codegauge_types::ScanStatus::Unknown);
            }
        }
    }

    #[test]
    fn test_public_api() {
        let router = EventRouter::new();
        assert_eq!(router.stats(), RouterStats::default());
        assert_eq!(Topic::PUBLIC.len(), 4);
    }
}
