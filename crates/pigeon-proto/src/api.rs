//! PigeonPod REST client.
//!
//! `EpisodeApi` is the seam the feed controller talks through; `HttpEpisodeApi`
//! is the reqwest implementation used by the binary.

use std::future::Future;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{Envelope, EpisodePage, EpisodeStatusUpdate};
use crate::session::Session;

/// Failure of one backend call.  `Display` is the text shown to the user.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session expired, please log in again")]
    Unauthorized,
    #[error("Too many requests, please try again later.")]
    RateLimited,
    #[error("Internal server error, please contact administrator.")]
    Server(u16),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("{msg}")]
    Application { code: i64, msg: String },
    #[error("response carried no data")]
    MissingData,
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => Self::Unauthorized,
            429 => Self::RateLimited,
            code @ 500..=599 => Self::Server(code),
            code => Self::Status(code),
        }
    }
}

/// Episode endpoints consumed by the feed detail view.
pub trait EpisodeApi: Clone + Send + Sync + 'static {
    /// `GET /api/episode/list/{feed_id}?page=P&size=S`
    fn list_episodes(
        &self,
        feed_id: &str,
        page: u32,
        size: u32,
    ) -> impl Future<Output = Result<EpisodePage, ApiError>> + Send;

    /// `POST /api/episode/status` with the ids as a JSON array.
    fn episode_status(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<EpisodeStatusUpdate>, ApiError>> + Send;

    /// `DELETE /api/episode/{id}`
    fn delete_episode(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `POST /api/episode/retry/{id}`
    fn retry_episode(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Clone)]
pub struct HttpEpisodeApi {
    client: reqwest::Client,
    base_url: String,
    token_header: String,
    session: Session,
}

impl HttpEpisodeApi {
    pub fn new(base_url: &str, token_header: &str, session: Session) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pigeon-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_header: token_header.to_string(),
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, self.session.language());
        if let Some(token) = self.session.token() {
            req = req.header(self.token_header.as_str(), token);
        }
        req
    }

    /// Send, check the HTTP status, then unwrap the envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let response = req.send().await?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url().path());
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }
        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        if !envelope.is_success() {
            return Err(ApiError::Application {
                code: envelope.code,
                msg: envelope
                    .msg
                    .unwrap_or_else(|| format!("request failed with code {}", envelope.code)),
            });
        }
        Ok(envelope.data)
    }
}

impl EpisodeApi for HttpEpisodeApi {
    async fn list_episodes(
        &self,
        feed_id: &str,
        page: u32,
        size: u32,
    ) -> Result<EpisodePage, ApiError> {
        let req = self
            .request(Method::GET, &format!("/episode/list/{}", feed_id))
            .query(&[("page", page), ("size", size)]);
        self.send(req).await?.ok_or(ApiError::MissingData)
    }

    async fn episode_status(&self, ids: &[String]) -> Result<Vec<EpisodeStatusUpdate>, ApiError> {
        let req = self.request(Method::POST, "/episode/status").json(ids);
        self.send(req).await?.ok_or(ApiError::MissingData)
    }

    async fn delete_episode(&self, id: &str) -> Result<(), ApiError> {
        let req = self.request(Method::DELETE, &format!("/episode/{}", id));
        self.send::<serde_json::Value>(req).await.map(|_| ())
    }

    async fn retry_episode(&self, id: &str) -> Result<(), ApiError> {
        let req = self.request(Method::POST, &format!("/episode/retry/{}", id));
        self.send::<serde_json::Value>(req).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY),
            ApiError::Server(502)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND),
            ApiError::Status(404)
        ));
    }

    #[test]
    fn test_url_joins_api_prefix() {
        let api = HttpEpisodeApi::new("http://localhost:8080/", "satoken", Session::default())
            .unwrap();
        assert_eq!(
            api.url("/episode/status"),
            "http://localhost:8080/api/episode/status"
        );
    }
}
