//! Per-user settings.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Settings for one user, including the account verification status pushed
/// on `/topic/user/{userId}/verify-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Owner of the settings.
    pub user_id: UserId,
    /// Account verification status, as reported by the backend.
    #[serde(default)]
    pub verify_status: Option<String>,
    /// Whether email notifications are enabled.
    #[serde(default)]
    pub email_notifications: Option<bool>,
}

impl UserSettings {
    /// Creates empty settings for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            verify_status: None,
            email_notifications: None,
        }
    }

    /// Overwrites fields that `incoming` specifies, keeping the rest.
    pub fn merge_from(&mut self, incoming: UserSettings) {
        if incoming.verify_status.is_some() {
            self.verify_status = incoming.verify_status;
        }
        if incoming.email_notifications.is_some() {
            self.email_notifications = incoming.email_notifications;
        }
    }
}
