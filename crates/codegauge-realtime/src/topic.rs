//! Push topics.
//!
//! Topic names are part of the wire contract with the backend and must match
//! exactly.

use codegauge_types::{IssueId, UserId};
use std::fmt;

use crate::error::RealtimeError;

const PREFIX: &str = "/topic/";

/// A push topic the client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `/topic/scan-status`
    ScanStatus,
    /// `/topic/notifications/global`
    GlobalNotifications,
    /// `/topic/projects`
    Projects,
    /// `/topic/issues`
    Issues,
    /// `/topic/notifications/{userId}`
    UserNotifications(UserId),
    /// `/topic/user/{userId}/verify-status`
    VerifyStatus(UserId),
    /// `/topic/issue/{issueId}/comments`
    IssueComments(IssueId),
}

/// Who a subscription belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicScope {
    /// Shared by every session; subscribed once for the process lifetime.
    Public,
    /// Bound to a user identity; torn down when the identity changes.
    PrivateForUser(UserId),
}

impl Topic {
    /// The public topics every session subscribes to.
    pub const PUBLIC: [Topic; 4] = [
        Topic::ScanStatus,
        Topic::GlobalNotifications,
        Topic::Projects,
        Topic::Issues,
    ];

    /// The private topics registered for a logged-in user.
    pub fn private_for(user: &UserId) -> [Topic; 2] {
        [
            Topic::UserNotifications(user.clone()),
            Topic::VerifyStatus(user.clone()),
        ]
    }

    /// Parses a topic name.
    ///
    /// A user literally named `global` is indistinguishable from the global
    /// notification topic and parses as [`Topic::GlobalNotifications`].
    pub fn parse(s: &str) -> Result<Self, RealtimeError> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| RealtimeError::InvalidTopic(format!("missing {PREFIX} prefix: {s}")))?;
        let segments: Vec<&str> = rest.split('/').collect();

        let topic = match segments.as_slice() {
            ["scan-status"] => Topic::ScanStatus,
            ["notifications", "global"] => Topic::GlobalNotifications,
            ["projects"] => Topic::Projects,
            ["issues"] => Topic::Issues,
            ["notifications", user] if !user.is_empty() => {
                Topic::UserNotifications(UserId::from(*user))
            }
            ["user", user, "verify-status"] if !user.is_empty() => {
                Topic::VerifyStatus(UserId::from(*user))
            }
            ["issue", issue, "comments"] if !issue.is_empty() => {
                Topic::IssueComments(IssueId::from(*issue))
            }
            _ => return Err(RealtimeError::InvalidTopic(format!("unknown topic: {s}"))),
        };
        Ok(topic)
    }

    /// Returns true for topics shared by every session.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Topic::ScanStatus | Topic::GlobalNotifications | Topic::Projects | Topic::Issues
        )
    }

    /// The user a private topic is bound to by its name, if any.
    pub fn owner(&self) -> Option<&UserId> {
        match self {
            Topic::UserNotifications(user) | Topic::VerifyStatus(user) => Some(user),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ScanStatus => write!(f, "{PREFIX}scan-status"),
            Topic::GlobalNotifications => write!(f, "{PREFIX}notifications/global"),
            Topic::Projects => write!(f, "{PREFIX}projects"),
            Topic::Issues => write!(f, "{PREFIX}issues"),
            Topic::UserNotifications(user) => write!(f, "{PREFIX}notifications/{user}"),
            Topic::VerifyStatus(user) => write!(f, "{PREFIX}user/{user}/verify-status"),
            Topic::IssueComments(issue) => write!(f, "{PREFIX}issue/{issue}/comments"),
        }
    }
}
