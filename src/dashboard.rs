//! Operator dashboard state
//!
//! Holds the only client-side state of the security dashboard: the last
//! unread snapshot, the last stats response, and a stream of transient
//! notices. Rendering is left to the caller, which observes the state
//! through `Dashboard::watch`.
//!
//! ```rust,ignore
//! let service = Arc::new(SecurityService::new(MemoryProvider::default()));
//! let (dashboard, mut notices) = Dashboard::new(service);
//!
//! dashboard.enter().await;
//! let mut view = dashboard.watch();
//! while view.changed().await.is_ok() {
//!     render(&view.borrow_and_update());
//! }
//! ```

use crate::error::{AlertError, ErrorClass, Result};
use crate::service::SecurityService;
use crate::types::{AlertSnapshot, EmailStatus, SecurityAlert, SecurityStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One row of the unread alert list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    pub id: String,
    pub email: String,
    pub failed_attempts: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
    pub email_status: EmailStatus,
}

impl From<&SecurityAlert> for AlertView {
    fn from(alert: &SecurityAlert) -> Self {
        Self {
            id: alert.id.clone(),
            email: alert.email.clone(),
            failed_attempts: alert.failed_attempts,
            timestamp: alert.timestamp,
            lockout_until: alert.lockout_until,
            email_status: alert.email_status(),
        }
    }
}

/// State of the live unread feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// No snapshot received yet (or no feed open)
    Waiting,
    /// Unread alerts, most recent first
    Ready(Vec<AlertView>),
    /// The feed terminated; re-open to recover
    Failed { class: ErrorClass, message: String },
}

/// State of the stats panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsState {
    Loading,
    Loaded(SecurityStats),
    Failed { class: ErrorClass, message: String },
}

/// Everything the dashboard renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    pub feed: FeedState,
    pub stats: StatsState,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            feed: FeedState::Waiting,
            stats: StatsState::Loading,
        }
    }
}

impl DashboardView {
    /// Unread rows, empty unless the feed is ready
    pub fn alerts(&self) -> &[AlertView] {
        match &self.feed {
            FeedState::Ready(alerts) => alerts,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient message for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Stream of notices emitted by a `Dashboard`
pub type Notices = UnboundedReceiverStream<Notice>;

/// Dashboard controller
///
/// Holds at most one live subscription. Dropping the dashboard aborts the
/// feed task, which drops the subscription.
pub struct Dashboard {
    service: Arc<SecurityService>,
    view: Arc<watch::Sender<DashboardView>>,
    notices: mpsc::UnboundedSender<Notice>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(service: Arc<SecurityService>) -> (Self, Notices) {
        let (view, _) = watch::channel(DashboardView::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let dashboard = Self {
            service,
            view: Arc::new(view),
            notices: tx,
            feed: Mutex::new(None),
        };
        (dashboard, UnboundedReceiverStream::new(rx))
    }

    /// Open the live feed and load stats
    ///
    /// Failures land in the view and the notice stream; entering never fails.
    pub async fn enter(&self) {
        let _ = self.open_feed().await;
        self.refresh_stats().await;
    }

    /// Open the live unread feed, releasing any previous one
    pub async fn open_feed(&self) -> Result<()> {
        let mut feed = self.feed.lock().await;
        if let Some(previous) = feed.take() {
            previous.abort();
            let _ = previous.await;
        }
        self.view.send_modify(|v| v.feed = FeedState::Waiting);

        let mut sub = match self.service.subscribe_unread_alerts().await {
            Ok(sub) => sub,
            Err(e) => {
                self.fail_feed(&e);
                return Err(e);
            }
        };

        let view = Arc::clone(&self.view);
        let notices = self.notices.clone();
        *feed = Some(tokio::spawn(async move {
            loop {
                match sub.next().await {
                    Ok(Some(snapshot)) => {
                        let rows = rows(&snapshot);
                        view.send_modify(|v| v.feed = FeedState::Ready(rows));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unread alert feed failed");
                        set_feed_failed(&view, &notices, &e);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Release the live feed; the list returns to `Waiting`
    pub async fn close_feed(&self) {
        let mut feed = self.feed.lock().await;
        if let Some(handle) = feed.take() {
            handle.abort();
            let _ = handle.await;
            tracing::debug!("Unread alert feed closed");
        }
        self.view.send_modify(|v| v.feed = FeedState::Waiting);
    }

    /// Whether a feed task is running
    pub async fn has_active_feed(&self) -> bool {
        self.feed
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Reload stats; a failure replaces the previous value
    pub async fn refresh_stats(&self) {
        self.view.send_modify(|v| v.stats = StatsState::Loading);
        let stats = match self.service.get_stats().await {
            Ok(stats) => StatsState::Loaded(stats),
            Err(e) => {
                self.notify(Notice::error(format!("Could not load stats: {}", e)));
                StatsState::Failed {
                    class: e.class(),
                    message: e.to_string(),
                }
            }
        };
        self.view.send_modify(|v| v.stats = stats);
    }

    /// Acknowledge an alert
    ///
    /// Success emits an info notice and reloads stats; failure emits an
    /// error notice. The alert leaves the list once the feed delivers the
    /// next snapshot.
    pub async fn mark_read(&self, alert_id: &str) -> Result<()> {
        match self.service.mark_alert_read(alert_id).await {
            Ok(()) => {
                self.notify(Notice::info("Alert marked as read"));
                self.refresh_stats().await;
                Ok(())
            }
            Err(e) => {
                self.notify(Notice::error(format!("Could not mark alert as read: {}", e)));
                Err(e)
            }
        }
    }

    /// Current view
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Observe view changes
    pub fn watch(&self) -> watch::Receiver<DashboardView> {
        self.view.subscribe()
    }

    fn fail_feed(&self, error: &AlertError) {
        set_feed_failed(&self.view, &self.notices, error);
    }

    fn notify(&self, notice: Notice) {
        // Receiver gone means nobody is listening
        let _ = self.notices.send(notice);
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Some(handle) = self.feed.get_mut().take() {
            handle.abort();
        }
    }
}

fn rows(snapshot: &AlertSnapshot) -> Vec<AlertView> {
    snapshot.alerts.iter().map(AlertView::from).collect()
}

fn set_feed_failed(
    view: &watch::Sender<DashboardView>,
    notices: &mpsc::UnboundedSender<Notice>,
    error: &AlertError,
) {
    view.send_modify(|v| {
        v.feed = FeedState::Failed {
            class: error.class(),
            message: error.to_string(),
        }
    });
    let _ = notices.send(Notice::error(format!("Live alerts unavailable: {}", error)));
}
