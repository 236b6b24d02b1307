//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::exchange::TokenExchanger;
use crate::interceptor::{Notification, Notifier};
use crate::request::FinalizedRequest;
use crate::session::SessionStore;
use crate::transport::{RawResponse, Transport, TransportError};
use crate::types::UserProfile;

pub(crate) const BASE_URL: &str = "http://api.test/";

/// Transport answering from a queue; records every request it is given.
///
/// Each call yields once before answering so concurrent callers interleave.
/// After [`hold`](Self::hold), calls also wait for [`release`](Self::release).
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    sent: Mutex<Vec<FinalizedRequest>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }
}

impl ScriptedTransport {
    pub(crate) fn push_response(&self, response: RawResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub(crate) fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub(crate) fn sent(&self) -> Vec<FinalizedRequest> {
        self.sent.lock().clone()
    }

    pub(crate) fn take_sent(&self) -> Vec<FinalizedRequest> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: FinalizedRequest) -> Result<RawResponse, TransportError> {
        self.sent.lock().push(request);
        tokio::task::yield_now().await;
        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .expect("gate is never closed")
                .forget();
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unreachable("script exhausted".into())))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notes: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(crate) fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notes.lock())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notes.lock().push(notification);
    }
}

pub(crate) fn token_response(token: &str) -> RawResponse {
    RawResponse::new(
        StatusCode::OK,
        format!(r#"{{"access_token":"{token}","token_type":"bearer"}}"#),
    )
}

/// A session store already signed in with `token`; the login request is
/// removed from the transport's record.
pub(crate) async fn signed_in_session(
    token: &str,
) -> (Arc<SessionStore<ScriptedTransport>>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_response(token_response(token));
    let session = Arc::new(SessionStore::new(TokenExchanger::new(
        BASE_URL.parse().expect("valid test URL"),
        transport.clone(),
    )));
    session
        .establish("identity".into(), UserProfile::new("mundo"))
        .await
        .expect("scripted login succeeds");
    transport.take_sent();
    (session, transport)
}
