pub mod classify;

use std::future::Future;

use crate::credential::Credential;
use crate::error::CrmAuthError;
use crate::provider::ProviderKind;
use crate::refresh::Refresher;

use classify::ErrorBody;

impl Refresher {
    /// Run a provider API call with token recovery.
    ///
    /// The credential is made valid first; if that fails nothing is called.
    /// When `api_fn` fails with a session error the credential is refreshed
    /// once and `api_fn` is invoked a second time with the new token. Errors
    /// from the refresh or from the second call are returned as-is.
    ///
    /// `api_fn` may run twice. Mutating calls must send the same payload on
    /// both invocations.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        credential: &Credential,
        mut api_fn: F,
    ) -> Result<T, CrmAuthError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, CrmAuthError>>,
    {
        let current = self.ensure_valid_token(credential).await?;

        match api_fn(current.clone()).await {
            Err(CrmAuthError::ApiError { status, body })
                if self.is_session_failure(current.provider, status, &body) =>
            {
                tracing::warn!(
                    user_id = %current.user_id,
                    provider = %current.provider,
                    status,
                    "Provider rejected token, refreshing and retrying once"
                );
                let refreshed = self.refresh_credential(&current).await?;
                api_fn(refreshed).await
            }
            other => other,
        }
    }

    /// Classify with the configured client's profile, falling back to the
    /// built-in one for providers without a client.
    fn is_session_failure(&self, provider: ProviderKind, status: u16, body: &str) -> bool {
        let parsed = ErrorBody::parse(body);
        match self.client(provider) {
            Ok(client) => client.profile().is_session_error(status, &parsed),
            Err(_) => provider.profile().is_session_error(status, &parsed),
        }
    }
}
