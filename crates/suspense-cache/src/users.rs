//! Fetching users from a REST API.
//!
//! [`UserClient::producer`] is the producer handed to [`ResourceCache::prefetch`], and
//! [`fetch_user_data`] ties both together.

use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{StatusCode, Url, header};
use serde::{Deserialize, Serialize};

use crate::auth::AuthContext;
use crate::caching::{CacheContents, CacheError, ResourceCache, ResourceHandle};
use crate::config::UsersConfig;

const USER_AGENT: &str = concat!("suspense-cache/", env!("CARGO_PKG_VERSION"));

/// A single user, as returned by the users API.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: u64,
    pub first_name: String,
}

/// The envelope of a user response: `{ "data": { "id": 1, "first_name": "Alice" } }`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserData {
    pub data: User,
}

/// A cache of users by id.
pub type UserCache = ResourceCache<String, UserData>;

/// A handle to a single user in a [`UserCache`].
pub type UserHandle = ResourceHandle<String, UserData>;

impl CacheError {
    fn download_error(mut error: &dyn std::error::Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::DownloadError(error_string)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

/// A client for the users API.
///
/// Clones share the underlying connection pool and [`AuthContext`].
#[derive(Clone, Debug)]
pub struct UserClient {
    client: reqwest::Client,
    base_url: Url,
    delay: Option<Duration>,
    timeout: Duration,
    auth: AuthContext,
}

impl UserClient {
    pub fn new(config: &UsersConfig, auth: AuthContext) -> anyhow::Result<Self> {
        let base_url: Url = config
            .base_url
            .parse()
            .with_context(|| format!("invalid users base url `{}`", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("users base url `{}` cannot have a path", config.base_url);
        }

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("failed to create http client")?;

        if let Some(token) = &config.auth_token {
            auth.sign_in(token.as_str());
        }

        Ok(Self {
            client,
            base_url,
            delay: config.delay,
            timeout: config.timeout,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Returns the URL the user with the given `id` is fetched from.
    ///
    /// The `id` always ends up as a single percent-encoded path segment below `users/`. Ids that
    /// would be dot-segments are never a user.
    pub fn user_url(&self, id: &str) -> Result<Url, CacheError> {
        if matches!(id, "" | "." | "..") {
            return Err(CacheError::NotFound);
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CacheError::InternalError)?
            .pop_if_empty()
            .push("users")
            .push(id);
        if let Some(delay) = self.delay {
            url.query_pairs_mut()
                .append_pair("delay", &delay_secs(delay).to_string());
        }

        Ok(url)
    }

    /// Fetches a single user.
    ///
    /// The whole request, including reading the body, is subject to the configured timeout.
    pub async fn fetch_user(&self, id: &str) -> CacheContents<UserData> {
        let url = self.user_url(id)?;
        tracing::debug!("Fetching user from `{}`", url);

        let mut builder = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(token) = self.auth.token() {
            builder = builder.header(header::AUTHORIZATION, token.bearer());
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.send(id, builder)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(err) => err.metrics_tag(),
        };
        metric!(timer("users.fetch.duration") = start.elapsed(), "status" => status);

        if let Err(err) = &result {
            tracing::debug!(
                error = err as &dyn std::error::Error,
                user_id = id,
                "failed to fetch user"
            );
        }

        result
    }

    async fn send(&self, id: &str, builder: reqwest::RequestBuilder) -> CacheContents<UserData> {
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            if let Ok(details) = response.text().await {
                sentry::configure_scope(|scope| {
                    scope.set_extra(
                        "reqwest_response_body",
                        sentry::protocol::Value::String(details),
                    );
                });
            }
            return Err(error_from_status(id, status));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| CacheError::Malformed(err.to_string()))
    }

    /// Returns a producer for [`ResourceCache::prefetch`] that fetches users by id.
    pub fn producer(
        &self,
    ) -> impl Fn(String) -> BoxFuture<'static, CacheContents<UserData>> + Clone + Send + Sync + 'static
    {
        let client = self.clone();
        move |id| {
            let client = client.clone();
            async move { client.fetch_user(&id).await }.boxed()
        }
    }
}

/// The `delay` query parameter is in whole seconds, anything shorter is rounded up.
fn delay_secs(delay: Duration) -> u64 {
    delay.as_secs() + u64::from(delay.subsec_nanos() > 0)
}

fn error_from_status(id: &str, status: StatusCode) -> CacheError {
    if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Insufficient permissions to fetch user `{id}`: {status}");
        CacheError::PermissionDenied(status.to_string())
    } else if status.is_client_error() {
        // If it's a client error, chances are it's a 404.
        tracing::debug!("Unexpected client error status code for user `{id}`: {status}");
        CacheError::NotFound
    } else {
        tracing::debug!("Unexpected status code for user `{id}`: {status}");
        CacheError::DownloadError(status.to_string())
    }
}

/// Starts fetching the user with the given `id`, unless it is already cached.
pub fn fetch_user_data(cache: &UserCache, client: &UserClient, id: impl Into<String>) -> UserHandle {
    cache.prefetch(client.producer(), id.into())
}
