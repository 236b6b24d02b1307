//! Cross-cutting response/error handling.
//!
//! Every request sent through [`ApiClient`](crate::api::ApiClient) passes
//! through [`Interceptor::dispatch`]. Failures are classified once, reported
//! to the [`Notifier`] at most once, and still returned to the caller so page
//! logic can run its own recovery.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, Classified, Error};
use crate::request::FinalizedRequest;
use crate::transport::{Connectivity, RawResponse, Transport};

/// What the user is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Offline,
    Http(u16),
}

/// A user-visible failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub summary: String,
    pub detail: Option<String>,
}

/// Sink for user-visible notifications (a toast, a status line, a log).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Reports notifications as `tracing` warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        tracing::warn!(
            summary = %notification.summary,
            detail = notification.detail.as_deref().unwrap_or(""),
            "Request failed"
        );
    }
}

pub struct Interceptor {
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<dyn Notifier>,
}

impl Interceptor {
    #[must_use]
    pub fn new(connectivity: Arc<dyn Connectivity>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            connectivity,
            notifier,
        }
    }

    /// Send `request` through `transport`.
    ///
    /// Offline clients are short-circuited: the call is cancelled, one
    /// `Offline` notification is shown and the transport is never called.
    /// `cancel` itself is left untouched, so it can be shared across calls.
    /// Cancelling `cancel` before or during the call abandons it silently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] for the offline short-circuit and for
    /// aborted calls, [`Error::Offline`] when no response arrived, and
    /// [`Error::Http`] for non-2xx responses.
    pub async fn dispatch<T: Transport>(
        &self,
        transport: &T,
        request: FinalizedRequest,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(CancelReason::Aborted));
        }

        // Per-call token: the caller's token may be shared by later requests.
        let call = cancel.child_token();
        if !self.connectivity.is_online() {
            call.cancel();
            tracing::debug!(path = %request.url.path(), "Offline, request not sent");
            self.notifier.notify(Notification {
                kind: NotificationKind::Offline,
                summary: "Offline".into(),
                detail: Some("No network connection; the request was not sent.".into()),
            });
            return Err(Error::Cancelled(CancelReason::Offline));
        }

        let method = request.method.clone();
        let path = request.url.path().to_owned();

        let outcome = tokio::select! {
            biased;
            () = call.cancelled() => Err(Error::Cancelled(CancelReason::Aborted)),
            result = transport.send(request) => match result {
                Ok(response) => response.error_for_status(),
                Err(e) => {
                    tracing::debug!(error = %e, "No response from server");
                    Err(Error::Offline)
                }
            },
        };

        outcome.inspect_err(|e| self.report(e, &method, &path))
    }

    fn report(&self, error: &Error, method: &reqwest::Method, path: &str) {
        let notification = match error.classify() {
            Some(Classified::Offline) => Notification {
                kind: NotificationKind::Offline,
                summary: "Offline".into(),
                detail: Some(format!("{method} {path}: server unreachable")),
            },
            Some(Classified::HttpError(status)) => Notification {
                kind: NotificationKind::Http(status),
                summary: status.to_string(),
                detail: Some(format!("{method} {path}")),
            },
            Some(Classified::Cancelled) | None => {
                tracing::debug!(%method, %path, error = %error, "Request ended without notification");
                return;
            }
        };
        tracing::warn!(%method, %path, error = %error, "Request failed");
        self.notifier.notify(notification);
    }
}
