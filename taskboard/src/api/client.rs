//! HTTP implementation of the REST collaborator.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use taskboard_proto::rest::{
    AuthResponse, Credentials, ErrorBody, NewTask, TaskEnvelope, TaskFilters, TaskUpdate,
    UserEnvelope,
};
use taskboard_proto::task::{Task, TaskId};
use taskboard_proto::user::{User, UserDetails};
use url::Url;

use super::{ApiError, TaskApi};
use crate::session::{Credential, Session, SessionError};

/// REST client bound to one [`Session`].
///
/// Protected calls attach `Authorization: Bearer <credential>` taken from the
/// session at call time, so a sign-out through any clone of the session is
/// observed immediately.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Session,
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if `base_url` does not parse or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, session: Session, timeout: Duration) -> Result<Self, ApiError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| ApiError::Config(format!("{base_url}: {e}")))?;
        // Relative joins below must keep any path prefix of the base.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    /// The session this client authenticates with.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Signs in and establishes the session.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] for bad credentials, or any other
    /// [`ApiError`] if the call fails.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let body = UserEnvelope {
            user: Credentials {
                email: email.to_string(),
                password: password.to_string(),
                password_confirmation: None,
            },
        };
        let request = self.http.post(self.url("users/sign_in")?).json(&body);
        let auth: AuthResponse = self.send_json(request).await?;
        self.establish(auth)
    }

    /// Registers a new account and establishes the session.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] carrying the validation messages when the
    /// server rejects the registration.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<User, ApiError> {
        let body = UserEnvelope {
            user: Credentials {
                email: email.to_string(),
                password: password.to_string(),
                password_confirmation: Some(password_confirmation.to_string()),
            },
        };
        let request = self.http.post(self.url("users")?).json(&body);
        let auth: AuthResponse = self.send_json(request).await?;
        self.establish(auth)
    }

    /// Signs out.
    ///
    /// The server is told when a credential is held, but the local session is
    /// invalidated regardless of the outcome; a failed server call is logged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] only if local storage cannot be cleared.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        if self.session.is_authenticated() {
            let result = match self.url("users/sign_out") {
                Ok(url) => match self.authorized(self.http.delete(url)) {
                    Ok(request) => self.send_empty(request).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(err = %e, "server sign-out failed, signing out locally");
            }
        }
        self.session.invalidate()
    }

    /// Lists users whose email matches `query` (empty lists everyone).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn list_users(&self, query: &str) -> Result<Vec<User>, ApiError> {
        let request = self
            .authorized(self.http.get(self.url("api/v1/users")?))?
            .query(&[("q", query)]);
        self.send_json(request).await
    }

    /// Fetches a user together with their tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn fetch_user(&self, id: u64) -> Result<UserDetails, ApiError> {
        let request = self.authorized(self.http.get(self.url(&format!("api/v1/users/{id}"))?))?;
        self.send_json(request).await
    }

    fn establish(&self, auth: AuthResponse) -> Result<User, ApiError> {
        let user = auth.data;
        if let Err(e) = self
            .session
            .establish(Credential::new(auth.token), user.clone())
        {
            // Still signed in for this process; only persistence failed.
            tracing::warn!(err = %e, "failed to persist session");
        }
        Ok(user)
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Config(format!("{path}: {e}")))
    }

    /// Attaches the bearer credential, failing before any I/O if none is held.
    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let credential = self.session.credential().ok_or_else(|| {
            tracing::warn!("request attempted without a credential");
            ApiError::Unauthenticated
        })?;
        Ok(request.bearer_auth(credential.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "request failed");
                ApiError::from(e)
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message());
        tracing::warn!(status = status.as_u16(), message = ?message, "request rejected");
        if status == StatusCode::UNAUTHORIZED {
            Err(ApiError::Unauthorized { message })
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response.json().await.map_err(|e| {
            tracing::warn!(err = %e, "malformed response body");
            ApiError::Decode(e.to_string())
        })
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.send(request).await.map(drop)
    }
}

impl TaskApi for ApiClient {
    async fn list_tasks(&self, filters: &TaskFilters) -> Result<Vec<Task>, ApiError> {
        let request = self
            .authorized(self.http.get(self.url("api/v1/tasks")?))?
            .query(&filters.to_query());
        let tasks: Vec<Task> = self.send_json(request).await?;
        tracing::debug!(count = tasks.len(), "tasks listed");
        Ok(tasks)
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, ApiError> {
        let request = self.authorized(self.http.get(self.url(&format!("api/v1/tasks/{id}"))?))?;
        self.send_json(request).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let request = self
            .authorized(self.http.post(self.url("api/v1/tasks")?))?
            .json(&TaskEnvelope { task });
        let created: Task = self.send_json(request).await?;
        tracing::info!(task_id = %created.id, "task created");
        Ok(created)
    }

    async fn update_task(&self, id: TaskId, update: &TaskUpdate) -> Result<Task, ApiError> {
        let request = self
            .authorized(self.http.put(self.url(&format!("api/v1/tasks/{id}"))?))?
            .json(&TaskEnvelope { task: update });
        let updated: Task = self.send_json(request).await?;
        tracing::info!(task_id = %id, "task updated");
        Ok(updated)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), ApiError> {
        let request =
            self.authorized(self.http.delete(self.url(&format!("api/v1/tasks/{id}"))?))?;
        self.send_empty(request).await?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }
}
