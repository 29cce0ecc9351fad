//! Dashboard activity notifications.
//!
//! Save and delete events go out as JSON on the dashboard's own channel and
//! on the org's GitOps channel, where external mirrors of the dashboards
//! listen. A save that failed locally is still reported to the GitOps
//! channel, since an observer there may be the system of record.

use crate::hub::{ChannelPublisher, HubError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Channel prefix of per-dashboard events; the uid follows.
pub const DASHBOARD_CHANNEL_PREFIX: &str = "core/dashboard/uid/";

/// Channel watched by GitOps observers.
pub const GITOPS_CHANNEL: &str = "core/dashboard/gitops";

/// Notification errors.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Publish(#[from] HubError),
}

/// User shown as the author of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisplay {
    pub id: i64,
    pub login: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// The dashboard being saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub uid: String,
    pub title: String,
    pub version: i64,
    /// Dashboard model as stored.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardAction {
    Saved,
    Deleted,
}

/// Event published for dashboard activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEvent {
    pub uid: String,
    pub action: DashboardAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDisplay>,
    /// Commit-style message given with the save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<Dashboard>,
    /// Local save error, if the save failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DashboardEvent {
    fn encode(&self) -> Result<Bytes, ActivityError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Fan-out of dashboard lifecycle events.
pub trait DashboardActivityChannel: Send + Sync {
    /// Report a save attempt, successful or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded or published. Having
    /// no listener is not an error.
    fn dashboard_saved(
        &self,
        org_id: i64,
        user: &UserDisplay,
        message: &str,
        dashboard: &Dashboard,
        save_error: Option<&(dyn std::error::Error + Send + Sync)>,
    ) -> Result<(), ActivityError>;

    /// Report a confirmed deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded or published.
    fn dashboard_deleted(&self, org_id: i64, user: &UserDisplay, uid: &str)
        -> Result<(), ActivityError>;

    /// Whether the org's GitOps channel has at least one subscriber.
    fn has_gitops_observer(&self, org_id: i64) -> bool;
}

/// Combined result of a save and its notification.
#[derive(Debug)]
pub struct SaveOutcome {
    /// Local persistence failure, if any.
    pub local_error: Option<String>,
    /// A GitOps observer was subscribed when the event went out.
    pub observed: bool,
    /// Notification failure, if any.
    pub notify_error: Option<ActivityError>,
}

impl SaveOutcome {
    /// The save counts as done if it was persisted, or if a GitOps observer
    /// received the event and will reconcile it.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.local_error.is_none() || (self.observed && self.notify_error.is_none())
    }
}

/// [`DashboardActivityChannel`] publishing through the hub.
pub struct DashboardActivityNotifier {
    publisher: Arc<dyn ChannelPublisher>,
}

impl DashboardActivityNotifier {
    #[must_use]
    pub fn new(publisher: Arc<dyn ChannelPublisher>) -> Self {
        Self { publisher }
    }

    /// Notify about a save attempt and combine both outcomes.
    ///
    /// The notification is attempted whatever `persisted` holds.
    pub fn report_save<E>(
        &self,
        org_id: i64,
        user: &UserDisplay,
        message: &str,
        dashboard: &Dashboard,
        persisted: &Result<(), E>,
    ) -> SaveOutcome
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let save_error = persisted
            .as_ref()
            .err()
            .map(|e| e as &(dyn std::error::Error + Send + Sync));
        let observed = self.has_gitops_observer(org_id);
        let notify_error = self
            .dashboard_saved(org_id, user, message, dashboard, save_error)
            .err();
        if let Some(e) = &notify_error {
            warn!(org_id, uid = %dashboard.uid, error = %e, "Dashboard save notification failed");
        }

        SaveOutcome {
            local_error: save_error.map(ToString::to_string),
            observed,
            notify_error,
        }
    }

    fn send(&self, org_id: i64, channel: &str, event: &Bytes) -> Result<(), ActivityError> {
        let recipients = self.publisher.publish(org_id, channel, event.clone())?;
        debug!(org_id, channel = %channel, recipients, "Dashboard event published");
        Ok(())
    }
}

impl DashboardActivityChannel for DashboardActivityNotifier {
    fn dashboard_saved(
        &self,
        org_id: i64,
        user: &UserDisplay,
        message: &str,
        dashboard: &Dashboard,
        save_error: Option<&(dyn std::error::Error + Send + Sync)>,
    ) -> Result<(), ActivityError> {
        let event = DashboardEvent {
            uid: dashboard.uid.clone(),
            action: DashboardAction::Saved,
            user: Some(user.clone()),
            message: (!message.is_empty()).then(|| message.to_string()),
            dashboard: Some(dashboard.clone()),
            error: save_error.map(ToString::to_string),
        }
        .encode()?;

        if save_error.is_none() {
            let channel = format!("{DASHBOARD_CHANNEL_PREFIX}{}", dashboard.uid);
            self.send(org_id, &channel, &event)?;
        }
        self.send(org_id, GITOPS_CHANNEL, &event)
    }

    fn dashboard_deleted(
        &self,
        org_id: i64,
        user: &UserDisplay,
        uid: &str,
    ) -> Result<(), ActivityError> {
        let event = DashboardEvent {
            uid: uid.to_string(),
            action: DashboardAction::Deleted,
            user: Some(user.clone()),
            message: None,
            dashboard: None,
            error: None,
        }
        .encode()?;

        self.send(org_id, &format!("{DASHBOARD_CHANNEL_PREFIX}{uid}"), &event)?;
        self.send(org_id, GITOPS_CHANNEL, &event)
    }

    fn has_gitops_observer(&self, org_id: i64) -> bool {
        self.publisher.client_count(org_id, GITOPS_CHANNEL) > 0
    }
}

impl fmt::Debug for DashboardActivityNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardActivityNotifier").finish_non_exhaustive()
    }
}
