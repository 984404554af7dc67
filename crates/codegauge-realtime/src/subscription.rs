//! Topic subscription bookkeeping.
//!
//! The registry remembers every topic the client wants, whether or not the
//! transport currently carries it. A subscription moves through
//! `Inactive -> Pending -> Active`; a disconnect returns everything to
//! `Inactive` without forgetting the intent, and the next
//! [`resubscribe_all`](SubscriptionRegistry::resubscribe_all) brings it back.

use codegauge_types::{IssueId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::ConnectionState;
use crate::error::{RealtimeError, Result};
use crate::topic::{Topic, TopicScope};
use crate::transport::{SubscriptionHandle, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionState {
    Inactive,
    /// A transport subscribe is in flight for the given session generation.
    Pending { generation: u64 },
    Active(SubscriptionHandle),
}

#[derive(Debug, Clone)]
struct Subscription {
    scope: TopicScope,
    state: SubscriptionState,
}

#[derive(Debug, Default)]
struct Inner {
    subscriptions: HashMap<Topic, Subscription>,
    user: Option<UserId>,
    generation: u64,
}

/// Snapshot of one registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// The topic.
    pub topic: Topic,
    /// Who it belongs to.
    pub scope: TopicScope,
    /// Whether the transport currently carries it.
    pub active: bool,
}

/// Tracks intended and live topic subscriptions.
///
/// At most one transport subscription exists per topic: a second request for
/// a topic that is active or pending is a no-op.
pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    connection: watch::Receiver<ConnectionState>,
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    /// Create a registry that subscribes through `transport` whenever
    /// `connection` reports [`ConnectionState::Connected`].
    pub fn new(
        transport: Arc<dyn Transport>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            transport,
            connection,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn is_connected(&self) -> bool {
        *self.connection.borrow() == ConnectionState::Connected
    }

    /// Records the intent to carry `topic` and subscribes now if connected.
    ///
    /// Returns `Ok(true)` if this call created a transport subscription.
    ///
    /// # Errors
    ///
    /// Fails if the scope does not fit the topic or the current identity, or
    /// if the transport refuses the subscription. A refused topic stays
    /// registered and is retried by the next `resubscribe_all`.
    pub async fn ensure_subscribed(&self, topic: Topic, scope: TopicScope) -> Result<bool> {
        {
            let mut inner = self.inner.lock();
            Self::validate(&inner, &topic, &scope)?;
            inner
                .subscriptions
                .entry(topic.clone())
                .or_insert(Subscription {
                    scope,
                    state: SubscriptionState::Inactive,
                });
        }
        self.activate(&topic).await
    }

    fn validate(inner: &Inner, topic: &Topic, scope: &TopicScope) -> Result<()> {
        match scope {
            TopicScope::Public if topic.is_public() => Ok(()),
            TopicScope::Public => Err(RealtimeError::InvalidTopic(format!(
                "{topic} cannot be subscribed as public"
            ))),
            TopicScope::PrivateForUser(_) if topic.is_public() => {
                Err(RealtimeError::InvalidTopic(format!("{topic} is public")))
            }
            TopicScope::PrivateForUser(user) => {
                let current = inner.user.as_ref().ok_or(RealtimeError::NoIdentity)?;
                let owner_matches = topic.owner().map_or(true, |owner| owner == user);
                if current != user || !owner_matches {
                    return Err(RealtimeError::IdentityMismatch {
                        topic: topic.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    async fn activate(&self, topic: &Topic) -> Result<bool> {
        let generation = {
            let mut inner = self.inner.lock();
            let generation = inner.generation;
            let Some(sub) = inner.subscriptions.get_mut(topic) else {
                return Ok(false);
            };
            if sub.state != SubscriptionState::Inactive || !self.is_connected() {
                return Ok(false);
            }
            sub.state = SubscriptionState::Pending { generation };
            generation
        };

        let destination = topic.to_string();
        let result = self.transport.subscribe(&destination).await;

        let stale = {
            let mut inner = self.inner.lock();
            let same_session = inner.generation == generation;
            let claimed = inner.subscriptions.get_mut(topic).filter(|sub| {
                same_session && sub.state == SubscriptionState::Pending { generation }
            });
            match (result, claimed) {
                (Ok(handle), Some(sub)) => {
                    debug!(topic = %destination, handle = %handle, "Subscribed");
                    sub.state = SubscriptionState::Active(handle);
                    return Ok(true);
                }
                // A handle from an older session died with it.
                (Ok(_), None) if !same_session => return Ok(false),
                (Ok(handle), None) => handle,
                (Err(e), claimed) => {
                    if let Some(sub) = claimed {
                        sub.state = SubscriptionState::Inactive;
                    }
                    return Err(e);
                }
            }
        };

        // Torn down while the subscribe was in flight.
        if let Err(e) = self.transport.unsubscribe(&stale).await {
            warn!(topic = %destination, error = %e, "Failed to drop stale subscription");
        }
        Ok(false)
    }

    /// Re-establishes every registered topic that is not active.
    ///
    /// Failures are logged and do not stop the remaining topics. Returns the
    /// number of subscriptions created.
    pub async fn resubscribe_all(&self) -> usize {
        let mut pending: Vec<Topic> = self
            .inner
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.state == SubscriptionState::Inactive)
            .map(|(topic, _)| topic.clone())
            .collect();
        pending.sort();

        let mut created = 0;
        for topic in pending {
            match self.activate(&topic).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!(topic = %topic, error = %e, "Resubscribe failed"),
            }
        }
        info!(created, "Resubscribed topics");
        created
    }

    /// Marks every subscription inactive after the transport went away.
    ///
    /// Subscribes still in flight for the old session are discarded when
    /// they complete.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        for sub in inner.subscriptions.values_mut() {
            sub.state = SubscriptionState::Inactive;
        }
    }

    /// Switches the identity private topics are bound to.
    ///
    /// Private topics of the previous user are torn down before the new
    /// user's notification and verification topics are registered.
    pub async fn set_user(&self, user: Option<UserId>) {
        let stale = {
            let mut inner = self.inner.lock();
            if inner.user == user {
                return;
            }
            match std::mem::replace(&mut inner.user, user) {
                Some(previous) => Self::take_private(&mut inner, &previous),
                None => Vec::new(),
            }
        };

        for (topic, handle) in stale {
            info!(topic = %topic, "Dropping private topic of previous user");
            if let Some(handle) = handle {
                if let Err(e) = self.transport.unsubscribe(&handle).await {
                    warn!(topic = %topic, error = %e, "Unsubscribe failed");
                }
            }
        }

        self.register_private_topics().await;
    }

    fn take_private(inner: &mut Inner, user: &UserId) -> Vec<(Topic, Option<SubscriptionHandle>)> {
        let scope = TopicScope::PrivateForUser(user.clone());
        let topics: Vec<Topic> = inner
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.scope == scope)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics
            .into_iter()
            .filter_map(|topic| {
                let sub = inner.subscriptions.remove(&topic)?;
                let handle = match sub.state {
                    SubscriptionState::Active(handle) => Some(handle),
                    _ => None,
                };
                Some((topic, handle))
            })
            .collect()
    }

    async fn register_private_topics(&self) {
        let Some(user) = self.user() else {
            return;
        };
        for topic in Topic::private_for(&user) {
            let scope = TopicScope::PrivateForUser(user.clone());
            if let Err(e) = self.ensure_subscribed(topic.clone(), scope).await {
                warn!(topic = %topic, error = %e, "Failed to subscribe private topic");
            }
        }
    }

    /// Registers the public topics shared by every session.
    pub async fn register_public_topics(&self) {
        for topic in Topic::PUBLIC {
            if let Err(e) = self.ensure_subscribed(topic.clone(), TopicScope::Public).await {
                warn!(topic = %topic, error = %e, "Failed to subscribe public topic");
            }
        }
    }

    /// Subscribes to comments on an issue for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NoIdentity`] if nobody is logged in.
    pub async fn watch_issue_comments(&self, issue_id: IssueId) -> Result<bool> {
        let user = self.user().ok_or(RealtimeError::NoIdentity)?;
        self.ensure_subscribed(Topic::IssueComments(issue_id), TopicScope::PrivateForUser(user))
            .await
    }

    /// The identity private topics are bound to.
    pub fn user(&self) -> Option<UserId> {
        self.inner.lock().user.clone()
    }

    /// Snapshot of all registered subscriptions, ordered by topic.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<SubscriptionInfo> = inner
            .subscriptions
            .iter()
            .map(|(topic, sub)| SubscriptionInfo {
                topic: topic.clone(),
                scope: sub.scope.clone(),
                active: matches!(sub.state, SubscriptionState::Active(_)),
            })
            .collect();
        infos.sort_by(|a, b| a.topic.cmp(&b.topic));
        infos
    }

    /// Topics the transport currently carries, ordered.
    pub fn active_topics(&self) -> Vec<Topic> {
        self.subscriptions()
            .into_iter()
            .filter(|info| info.active)
            .map(|info| info.topic)
            .collect()
    }

    /// Returns true if the transport currently carries `topic`.
    pub fn is_active(&self, topic: &Topic) -> bool {
        matches!(
            self.inner.lock().subscriptions.get(topic),
            Some(Subscription {
                state: SubscriptionState::Active(_),
                ..
            })
        )
    }

    /// Forgets every subscription and the current identity.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.subscriptions.clear();
        inner.user = None;
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &inner.subscriptions.len())
            .field("user", &inner.user)
            .field("generation", &inner.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use tokio::sync::mpsc;

    struct Harness {
        transport: Arc<MemoryTransport>,
        state: watch::Sender<ConnectionState>,
        registry: SubscriptionRegistry,
        _events: mpsc::UnboundedReceiver<crate::transport::TransportEvent>,
    }

    async fn connected() -> Harness {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, events) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();
        let (state, rx) = watch::channel(ConnectionState::Connected);
        let registry = SubscriptionRegistry::new(transport.clone(), rx);
        Harness {
            transport,
            state,
            registry,
            _events: events,
        }
    }

    #[tokio::test]
    async fn test_ensure_subscribed_is_idempotent() {
        let h = connected().await;
        assert!(h
            .registry
            .ensure_subscribed(Topic::Projects, TopicScope::Public)
            .await
            .unwrap());
        assert!(!h
            .registry
            .ensure_subscribed(Topic::Projects, TopicScope::Public)
            .await
            .unwrap());
        assert_eq!(h.transport.subscription_count("/topic/projects"), 1);
        assert_eq!(h.transport.subscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_calls_issue_one_subscribe() {
        let h = connected().await;
        let (a, b) = tokio::join!(
            h.registry
                .ensure_subscribed(Topic::ScanStatus, TopicScope::Public),
            h.registry
                .ensure_subscribed(Topic::ScanStatus, TopicScope::Public),
        );
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(h.transport.subscribe_calls(), 1);
        assert_eq!(h.transport.subscription_count("/topic/scan-status"), 1);
    }

    #[tokio::test]
    async fn test_intent_recorded_while_disconnected() {
        let h = connected().await;
        h.state.send_replace(ConnectionState::Disconnected);

        let created = h
            .registry
            .ensure_subscribed(Topic::Issues, TopicScope::Public)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(h.transport.subscribe_calls(), 0);
        assert_eq!(h.registry.subscriptions().len(), 1);

        h.state.send_replace(ConnectionState::Connected);
        assert_eq!(h.registry.resubscribe_all().await, 1);
        assert!(h.registry.is_active(&Topic::Issues));
    }

    #[tokio::test]
    async fn test_resubscribe_restores_all_after_disconnect() {
        let h = connected().await;
        h.registry.set_user(Some("u1".into())).await;
        h.registry.register_public_topics().await;
        assert_eq!(h.registry.active_topics().len(), 6);

        h.transport.drop_connection();
        h.registry.on_disconnected();
        assert!(h.registry.active_topics().is_empty());

        let (tx, _rx) = mpsc::unbounded_channel();
        h.transport.open(tx).await.unwrap();
        assert_eq!(h.registry.resubscribe_all().await, 6);
        assert_eq!(h.registry.active_topics().len(), 6);
        for topic in h.transport.active_topics() {
            assert_eq!(h.transport.subscription_count(&topic), 1);
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_topics() {
        let h = connected().await;
        h.transport.fail_topic("/topic/issues");
        h.registry.register_public_topics().await;

        assert!(!h.registry.is_active(&Topic::Issues));
        assert_eq!(h.registry.active_topics().len(), 3);

        h.transport.heal_topic("/topic/issues");
        assert_eq!(h.registry.resubscribe_all().await, 1);
        assert!(h.registry.is_active(&Topic::Issues));
    }

    #[tokio::test]
    async fn test_identity_change_tears_down_old_private_topics() {
        let h = connected().await;
        h.registry.set_user(Some("alice".into())).await;
        h.registry
            .watch_issue_comments("7".into())
            .await
            .unwrap();
        assert_eq!(h.transport.subscription_count("/topic/notifications/alice"), 1);
        assert_eq!(h.transport.subscription_count("/topic/issue/7/comments"), 1);

        h.registry.set_user(Some("bob".into())).await;
        assert_eq!(h.transport.subscription_count("/topic/notifications/alice"), 0);
        assert_eq!(
            h.transport.subscription_count("/topic/user/alice/verify-status"),
            0
        );
        assert_eq!(h.transport.subscription_count("/topic/issue/7/comments"), 0);
        assert_eq!(h.transport.subscription_count("/topic/notifications/bob"), 1);
        assert_eq!(h.registry.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn test_private_scope_must_match_identity() {
        let h = connected().await;
        let result = h
            .registry
            .ensure_subscribed(
                Topic::UserNotifications("alice".into()),
                TopicScope::PrivateForUser("alice".into()),
            )
            .await;
        assert!(matches!(result, Err(RealtimeError::NoIdentity)));

        h.registry.set_user(Some("bob".into())).await;
        let result = h
            .registry
            .ensure_subscribed(
                Topic::UserNotifications("alice".into()),
                TopicScope::PrivateForUser("bob".into()),
            )
            .await;
        assert!(matches!(result, Err(RealtimeError::IdentityMismatch { .. })));

        let result = h
            .registry
            .ensure_subscribed(Topic::IssueComments("1".into()), TopicScope::Public)
            .await;
        assert!(matches!(result, Err(RealtimeError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_watch_comments_requires_identity() {
        let h = connected().await;
        let result = h.registry.watch_issue_comments("3".into()).await;
        assert!(matches!(result, Err(RealtimeError::NoIdentity)));
    }

    #[tokio::test]
    async fn test_disconnect_during_subscribe_discards_handle() {
        let h = connected().await;
        let registry = &h.registry;
        let (created, ()) = tokio::join!(
            registry.ensure_subscribed(Topic::Projects, TopicScope::Public),
            async { registry.on_disconnected() },
        );
        assert!(!created.unwrap());
        assert!(!registry.is_active(&Topic::Projects));
        assert_eq!(registry.subscriptions().len(), 1);
    }
}
