use std::sync::Arc;

use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::Error;
use crate::request::{FinalizedRequest, RequestBody, endpoint_url};
use crate::transport::Transport;
use crate::types::{IdentityAssertion, TokenGrant};

/// Trades an identity-provider token for an application token at `POST /login`.
///
/// The exchanger only talks to the backend. Installing the result is the job
/// of [`SessionStore`](crate::session::SessionStore).
pub struct TokenExchanger<T: Transport> {
    base_url: Url,
    transport: Arc<T>,
}

// Manual Clone: avoid derive adding a `T: Clone` bound.
impl<T: Transport> Clone for TokenExchanger<T> {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> TokenExchanger<T> {
    #[must_use]
    pub fn new(base_url: Url, transport: Arc<T>) -> Self {
        Self {
            base_url,
            transport,
        }
    }

    /// Exchange `assertion` for an application token. One call, no retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty assertion (nothing is
    /// sent), [`Error::Offline`] if the backend cannot be reached,
    /// [`Error::Http`] on a non-2xx answer, or [`Error::Decode`] on a malformed body.
    pub async fn exchange(&self, assertion: &IdentityAssertion) -> Result<TokenGrant, Error> {
        if assertion.is_empty() {
            return Err(Error::InvalidArgument(
                "identity token must not be empty".into(),
            ));
        }

        let url = endpoint_url(
            &self.base_url,
            &["login".to_owned()],
            &[("discord_token".to_owned(), assertion.as_str().to_owned())],
        )?;
        let request = FinalizedRequest {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        };

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::warn!(error = %e, "Token exchange could not reach the backend");
            Error::Offline
        })?;

        let grant = response
            .error_for_status()
            .inspect_err(|e| tracing::warn!(error = %e, "Token exchange rejected"))?
            .json::<TokenGrant>()?;

        tracing::debug!(token_type = %grant.token_type, "Token exchange succeeded");
        Ok(grant)
    }
}
