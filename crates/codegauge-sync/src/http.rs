//! # HTTP Backend
//!
//! [`Backend`] over the dashboard's REST API.

use async_trait::async_trait;
use codegauge_types::{
    Issue, IssueId, NewNotification, Notification, NotificationId, Project, ProjectDetail,
    ProjectId, UserId,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};

/// HTTP client for the dashboard REST API.
///
/// The client is cheaply cloneable and can be shared across components.
///
/// # Examples
///
/// ```rust,ignore
/// use codegauge_sync::HttpBackend;
///
/// let backend = HttpBackend::new("http://127.0.0.1:8080")?.with_auth_token("secret");
/// let projects = backend.fetch_projects().await?;
/// ```
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    auth_token: Option<String>,
    http: Client,
}

impl HttpBackend {
    /// Creates a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> BackendResult<Self> {
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
            http: Client::builder().timeout(Duration::from_secs(30)).build()?,
        })
    }

    /// Sends `token` as a bearer token on every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let res = self.authorize(request).send().await?;
        if !res.status().is_success() {
            return Err(BackendError::Server {
                status: res.status().as_u16(),
                message: res.text().await.unwrap_or_default(),
            });
        }
        Ok(res)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        self.send(self.http.get(self.url(path)))
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_projects(&self) -> BackendResult<Vec<Project>> {
        self.get("/projects").await
    }

    async fn fetch_project(&self, id: &ProjectId) -> BackendResult<ProjectDetail> {
        self.get(&format!("/projects/{id}")).await
    }

    async fn fetch_issues(&self) -> BackendResult<Vec<Issue>> {
        self.get("/issues").await
    }

    async fn fetch_issue(&self, id: &IssueId) -> BackendResult<Issue> {
        self.get(&format!("/issues/{id}")).await
    }

    async fn fetch_notifications(&self, user: &UserId) -> BackendResult<Vec<Notification>> {
        self.get(&format!("/notifications/user/{user}")).await
    }

    async fn create_notification(&self, request: &NewNotification) -> BackendResult<Notification> {
        self.send(self.http.post(self.url("/notifications")).json(request))
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> BackendResult<()> {
        self.send(self.http.put(self.url(&format!("/notifications/{id}/read"))))
            .await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user: &UserId) -> BackendResult<()> {
        self.send(
            self.http
                .put(self.url(&format!("/notifications/user/{user}/read-all"))),
        )
        .await?;
        Ok(())
    }
}
