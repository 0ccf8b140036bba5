// crates/core/src/http.rs
//! REST implementation of [`RemoteJobService`].
//!
//! Endpoints, relative to `ServiceConfig::base_url`:
//!
//! | Method | Path                     | Body / response                  |
//! |--------|--------------------------|----------------------------------|
//! | POST   | `/jobs`                  | `{kind, params}` → `CreatedJob`  |
//! | GET    | `/jobs?page={n}`         | `[JobSnapshot]` or `{jobs: [..]}`|
//! | GET    | `/jobs/{id}`             | `JobSnapshot`                    |
//! | POST   | `/jobs/{id}/{command}`   | `JobSnapshot`, `{success}` or `{error}` |
//! | DELETE | `/jobs/{id}`             | anything                         |
//!
//! Single-job responses may also arrive wrapped as `{"job": {...}}`. A
//! command answered with a bare acknowledgement (or nothing at all) is
//! followed by a `GET /jobs/{id}` so the caller still gets a snapshot.
//! Wrapped lists carrying `pagination.last_page` are read page by page.

use async_trait::async_trait;
use console_jobs_types::{
    CreateJobRequest, CreatedJob, JobCommand, JobId, JobList, JobSnapshot, RejectionBody,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ServiceConfig;
use crate::error::RemoteError;
use crate::remote::RemoteJobService;

/// Upper bound on `GET /jobs` pages read by one `list` call.
const MAX_LIST_PAGES: u32 = 50;

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { job: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { job } => job,
            Envelope::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpJobService {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpJobService {
    pub fn new(config: &ServiceConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, id: &JobId) -> String {
        format!("{}/jobs/{}", self.base_url, urlencoding::encode(id.as_str()))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and map non-success statuses onto [`RemoteError`].
    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("network error: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }

        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            let reason = serde_json::from_str::<RejectionBody>(&body)
                .ok()
                .and_then(|b| b.reason().map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(RemoteError::Rejected { reason });
        }

        tracing::debug!(%status, body = %body, "job service error response");
        Err(RemoteError::Transport(format!("server error {status}")))
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("reading body: {e}")))?;
        serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn command(&self, id: &JobId, command: JobCommand) -> Result<JobSnapshot, RemoteError> {
        let url = format!("{}/{}", self.job_url(id), command.as_str());
        tracing::debug!(job_id = %id, %command, "sending job command");
        let resp = self.send(self.request(Method::POST, url)).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("reading body: {e}")))?;

        if let Ok(envelope) = serde_json::from_str::<Envelope<JobSnapshot>>(&body) {
            return Ok(envelope.into_inner());
        }
        let ack = if body.trim().is_empty() {
            RejectionBody::default()
        } else {
            serde_json::from_str::<RejectionBody>(&body)
                .map_err(|e| RemoteError::Malformed(e.to_string()))?
        };
        if ack.success == Some(false) {
            let reason = ack
                .reason()
                .map_or_else(|| format!("{command} declined"), str::to_string);
            return Err(RemoteError::Rejected { reason });
        }

        tracing::debug!(
            job_id = %id,
            %command,
            message = ack.reason().unwrap_or_default(),
            "command acknowledged without a job, fetching it"
        );
        self.fetch(id).await
    }
}

#[async_trait]
impl RemoteJobService for HttpJobService {
    async fn create(&self, request: CreateJobRequest) -> Result<CreatedJob, RemoteError> {
        let url = format!("{}/jobs", self.base_url);
        let resp = self
            .send(self.request(Method::POST, url).json(&request))
            .await?;
        Self::decode::<Envelope<CreatedJob>>(resp)
            .await
            .map(Envelope::into_inner)
    }

    async fn fetch(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        let resp = self.send(self.request(Method::GET, self.job_url(id))).await?;
        Self::decode::<Envelope<JobSnapshot>>(resp)
            .await
            .map(Envelope::into_inner)
    }

    async fn list(&self) -> Result<Vec<JobSnapshot>, RemoteError> {
        let url = format!("{}/jobs", self.base_url);
        let mut jobs = Vec::new();
        let mut page = 1;
        loop {
            let resp = self
                .send(
                    self.request(Method::GET, url.clone())
                        .query(&[("page", page)]),
                )
                .await?;
            let list = Self::decode::<JobList>(resp).await?;
            let next = list.next_page();
            jobs.extend(list.into_jobs());
            match next {
                Some(n) if n > page && n <= MAX_LIST_PAGES => page = n,
                Some(n) => {
                    tracing::warn!(page = n, "stopping job list before the last page");
                    break;
                }
                None => break,
            }
        }
        Ok(jobs)
    }

    async fn retry(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Retry).await
    }

    async fn cancel(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Cancel).await
    }

    async fn pause(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Pause).await
    }

    async fn resume(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Resume).await
    }

    async fn delete(&self, id: &JobId) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, self.job_url(id)))
            .await
            .map(|_| ())
    }

    fn name(&self) -> &str {
        "http"
    }
}
