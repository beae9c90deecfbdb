//! Netlify deployer implementation.
//!
//! Uploads the artifact directory as a zip to
//! `POST /api/v1/sites/{site_id}/deploys` and polls
//! `GET /api/v1/deploys/{deploy_id}` until the deploy is `ready` or `error`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use sitepush_core::deployer::*;
use sitepush_core::{DeployCredentials, DeployError, DeployId, DeployResult};
use std::future::Future;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::build_archive;
use crate::policy::DeployPolicy;

pub const DEFAULT_API_URL: &str = "https://api.netlify.com";

const MAX_ERROR_BODY: usize = 512;

/// Deploy record as returned by the Netlify API. Only the fields we read.
#[derive(Debug, Clone, Deserialize)]
struct DeployRecord {
    id: String,
    #[serde(default)]
    state: Option<DeployState>,
    #[serde(default)]
    deploy_ssl_url: Option<String>,
    #[serde(default)]
    ssl_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl DeployRecord {
    fn state(&self) -> DeployState {
        self.state.clone().unwrap_or(DeployState::New)
    }

    fn deploy_id(&self) -> DeployId {
        DeployId::new(self.id.clone())
    }

    fn public_url(&self) -> Option<String> {
        self.deploy_ssl_url
            .clone()
            .or_else(|| self.ssl_url.clone())
            .or_else(|| self.url.clone())
    }

    /// Outcome for a record in a terminal state.
    fn outcome(&self) -> DeployOutcome {
        match self.state() {
            DeployState::Ready => DeployOutcome::succeeded(self.deploy_id(), self.public_url()),
            _ => DeployOutcome::failed(
                Some(self.deploy_id()),
                self.error_message
                    .clone()
                    .unwrap_or_else(|| "deploy ended in error state".to_string()),
            ),
        }
    }
}

/// Netlify-based deployer.
pub struct NetlifyDeployer {
    client: reqwest::Client,
    api_url: Url,
    policy: DeployPolicy,
}

impl NetlifyDeployer {
    pub fn new(api_url: Url, policy: DeployPolicy) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(concat!("sitepush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::InvalidResponse(format!("HTTP client setup: {}", e)))?;
        Self::with_client(client, api_url, policy)
    }

    pub fn with_client(
        client: reqwest::Client,
        api_url: Url,
        policy: DeployPolicy,
    ) -> Result<Self, DeployError> {
        if api_url.cannot_be_a_base() {
            return Err(DeployError::InvalidResponse(format!(
                "API URL {} cannot be used as a base",
                api_url
            )));
        }
        Ok(Self {
            client,
            api_url,
            policy,
        })
    }

    pub fn policy(&self) -> &DeployPolicy {
        &self.policy
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// One upload attempt.
    async fn submit(&self, payload: Bytes, creds: &DeployCredentials) -> DeployResult<DeployRecord> {
        let url = self.endpoint(&["api", "v1", "sites", creds.site_id(), "deploys"]);
        debug!(%url, bytes = payload.len(), "Uploading deploy archive");

        let response = self
            .client
            .post(url)
            .bearer_auth(creds.deploy_key().expose())
            .header(CONTENT_TYPE, "application/zip")
            .body(payload)
            .send()
            .await
            .map_err(transport_error)?;

        read_record(response).await
    }

    /// One status request.
    async fn fetch(&self, deploy_id: &DeployId, creds: &DeployCredentials) -> DeployResult<DeployRecord> {
        let url = self.endpoint(&["api", "v1", "deploys", deploy_id.as_str()]);

        let response = self
            .client
            .get(url)
            .bearer_auth(creds.deploy_key().expose())
            .send()
            .await
            .map_err(transport_error)?;

        read_record(response).await
    }

    /// Run `op` until it succeeds, fails permanently, or uses up `max_attempts`.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        progress: &Option<mpsc::Sender<DeployProgress>>,
        cancel: &CancellationToken,
        mut op: F,
    ) -> DeployResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        request = what,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    report(
                        progress,
                        DeployProgress::Retrying {
                            attempt,
                            delay,
                            reason: e.to_string(),
                        },
                    )
                    .await;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(request = what, attempt, error = %e, "Giving up after transient failures");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Poll until the deploy is terminal, the poll window closes, or we are cancelled.
    async fn wait_until_terminal(
        &self,
        mut record: DeployRecord,
        creds: &DeployCredentials,
        progress: &Option<mpsc::Sender<DeployProgress>>,
        cancel: &CancellationToken,
    ) -> DeployOutcome {
        let deploy_id = record.deploy_id();
        let deadline = Instant::now() + self.policy.timeout;
        let timed_out = || {
            warn!(deploy_id = %deploy_id, "Deploy did not finish within the poll window");
            DeployOutcome::timed_out(
                Some(deploy_id.clone()),
                format!(
                    "deploy {} still pending after {:?}; it may still complete",
                    deploy_id, self.policy.timeout
                ),
            )
        };

        loop {
            if record.state().is_terminal() {
                return record.outcome();
            }

            let now = Instant::now();
            if now >= deadline {
                return timed_out();
            }

            let wait = self.policy.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return DeployOutcome::cancelled(Some(deploy_id.clone())),
                _ = tokio::time::sleep(wait) => {}
            }

            let polled = tokio::time::timeout_at(
                deadline,
                self.with_retry("poll", progress, cancel, || self.fetch(&deploy_id, creds)),
            )
            .await;

            match polled {
                Err(_) => return timed_out(),
                Ok(Err(DeployError::Cancelled)) => {
                    return DeployOutcome::cancelled(Some(deploy_id.clone()));
                }
                Ok(Err(e)) => return DeployOutcome::failed(Some(deploy_id.clone()), e.to_string()),
                Ok(Ok(next)) => {
                    if next.state() != record.state() {
                        info!(deploy_id = %deploy_id, state = next.state().as_str(), "Deploy state changed");
                        report(
                            progress,
                            DeployProgress::State {
                                deploy_id: deploy_id.clone(),
                                state: next.state(),
                            },
                        )
                        .await;
                    }
                    record = next;
                }
            }
        }
    }
}

#[async_trait]
impl Deployer for NetlifyDeployer {
    fn name(&self) -> &'static str {
        "netlify"
    }

    async fn deploy(
        &self,
        output_path: &Path,
        creds: &DeployCredentials,
        progress: Option<mpsc::Sender<DeployProgress>>,
        cancel: &CancellationToken,
    ) -> DeployOutcome {
        let dir = output_path.to_path_buf();
        let payload = match tokio::task::spawn_blocking(move || build_archive(&dir)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => return DeployOutcome::failed(None, e.to_string()),
            Err(e) => {
                return DeployOutcome::failed(
                    None,
                    DeployError::ArchiveFailure(e.to_string()).to_string(),
                );
            }
        };

        info!(
            site_id = creds.site_id(),
            files = payload.file_count,
            bytes = payload.bytes.len(),
            sha256 = %payload.sha256,
            "Deploy archive built"
        );
        report(
            &progress,
            DeployProgress::Archived {
                file_count: payload.file_count,
                bytes: payload.bytes.len() as u64,
            },
        )
        .await;

        if cancel.is_cancelled() {
            return DeployOutcome::cancelled(None);
        }

        let body = Bytes::from(payload.bytes);
        let record = match self
            .with_retry("upload", &progress, cancel, || self.submit(body.clone(), creds))
            .await
        {
            Ok(record) => record,
            Err(DeployError::Cancelled) => return DeployOutcome::cancelled(None),
            Err(e) => return DeployOutcome::failed(None, e.to_string()),
        };

        let deploy_id = record.deploy_id();
        info!(deploy_id = %deploy_id, state = record.state().as_str(), "Deploy submitted");
        report(
            &progress,
            DeployProgress::Submitted {
                deploy_id: deploy_id.clone(),
            },
        )
        .await;

        self.wait_until_terminal(record, creds, &progress, cancel)
            .await
    }
}

async fn report(progress: &Option<mpsc::Sender<DeployProgress>>, event: DeployProgress) {
    if let Some(tx) = progress {
        let _ = tx.send(event).await;
    }
}

fn transport_error(e: reqwest::Error) -> DeployError {
    if e.is_decode() {
        DeployError::InvalidResponse(e.to_string())
    } else {
        // Connect failures, resets and timeouts.
        DeployError::Transient(e.to_string())
    }
}

async fn read_record(response: reqwest::Response) -> DeployResult<DeployRecord> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| DeployError::InvalidResponse(e.to_string()))
}

fn classify_status(status: StatusCode, body: &str) -> DeployError {
    let mut detail = format!("{}", status);
    let body = body.trim();
    if !body.is_empty() {
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        detail.push_str(": ");
        detail.push_str(&snippet);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => DeployError::Transient(detail),
        s if s.is_server_error() => DeployError::Transient(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DeployError::Authentication(detail),
        _ => DeployError::Rejected(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> DeployPolicy {
        DeployPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn creds() -> DeployCredentials {
        DeployCredentials::new("site-1", sitepush_core::DeployKey::new("nfp_test_key")).unwrap()
    }

    fn site_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        dir
    }

    fn deployer(server: &MockServer, policy: DeployPolicy) -> NetlifyDeployer {
        NetlifyDeployer::new(Url::parse(&server.uri()).unwrap(), policy).unwrap()
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_deploy_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sites/site-1/deploys"))
            .and(header("authorization", "Bearer nfp_test_key"))
            .and(header("content-type", "application/zip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-1",
                "state": "uploaded"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deploys/dep-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-1",
                "state": "ready",
                "deploy_ssl_url": "https://dep-1--example.netlify.app",
                "ssl_url": "https://example.netlify.app"
            })))
            .mount(&server)
            .await;

        let dir = site_dir();
        let (tx, mut rx) = mpsc::channel(32);
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), Some(tx), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, DeployStatus::Succeeded);
        assert_eq!(outcome.deploy_id, Some(DeployId::new("dep-1")));
        assert_eq!(
            outcome.deployed_url.as_deref(),
            Some("https://dep-1--example.netlify.app")
        );

        let mut saw_archive = false;
        while let Ok(event) = rx.try_recv() {
            if let DeployProgress::Archived { file_count, .. } = event {
                assert_eq!(file_count, 2);
                saw_archive = true;
            }
        }
        assert!(saw_archive);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_immediately_ready_skips_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-2",
                "state": "ready",
                "url": "http://example.netlify.app"
            })))
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.deployed_url.as_deref(), Some("http://example.netlify.app"));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_up_to_cap() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert!(outcome.error_detail.unwrap().contains("503"));
        assert_eq!(request_count(&server).await, 3);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-3",
                "state": "ready"
            })))
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_authentication_failure_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": 401,
                "message": "Access Denied"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        let detail = outcome.error_detail.unwrap();
        assert!(detail.starts_with("authentication failed"));
        assert!(!detail.contains("nfp_test_key"));
        assert_eq!(request_count(&server).await, 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid zip"))
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert!(outcome.error_detail.unwrap().starts_with("request rejected"));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_archive_failure_makes_no_request() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let outcome = deployer(&server, fast_policy())
            .deploy(
                &dir.path().join("missing"),
                &creds(),
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert!(outcome.deploy_id.is_none());
        assert!(outcome.error_detail.unwrap().starts_with("archive failed"));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_error_state_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-4",
                "state": "processing"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deploys/dep-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-4",
                "state": "error",
                "error_message": "Deploy directory 'output' does not exist"
            })))
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert_eq!(outcome.deploy_id, Some(DeployId::new("dep-4")));
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("Deploy directory 'output' does not exist")
        );
    }

    #[tokio::test]
    async fn test_transient_poll_failure_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-5",
                "state": "uploaded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-5",
                "state": "ready"
            })))
            .mount(&server)
            .await;

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-6",
                "state": "uploaded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-6",
                "state": "processing"
            })))
            .mount(&server)
            .await;

        let policy = DeployPolicy {
            timeout: Duration::from_millis(150),
            ..fast_policy()
        };
        let dir = site_dir();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            deployer(&server, policy).deploy(dir.path(), &creds(), None, &CancellationToken::new()),
        )
        .await
        .expect("poll loop should stop at the timeout");

        assert_eq!(outcome.status, DeployStatus::TimedOut);
        assert_eq!(outcome.deploy_id, Some(DeployId::new("dep-6")));
        assert!(outcome.error_detail.unwrap().contains("may still complete"));
        assert!(request_count(&server).await >= 2);
    }

    #[tokio::test]
    async fn test_cancel_during_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-7",
                "state": "uploaded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dep-7",
                "state": "processing"
            })))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let dir = site_dir();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            deployer(&server, fast_policy()).deploy(dir.path(), &creds(), None, &cancel),
        )
        .await
        .expect("cancellation should stop the poll loop");

        assert_eq!(outcome.status, DeployStatus::Cancelled);
        assert_eq!(outcome.deploy_id, Some(DeployId::new("dep-7")));

        let after_cancel = request_count(&server).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(request_count(&server).await, after_cancel);
    }

    #[tokio::test]
    async fn test_cancel_before_upload() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dir = site_dir();
        let outcome = deployer(&server, fast_policy())
            .deploy(dir.path(), &creds(), None, &cancel)
            .await;

        assert_eq!(outcome.status, DeployStatus::Cancelled);
        assert_eq!(request_count(&server).await, 0);
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            DeployError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "Not Found"),
            DeployError::Rejected(_)
        ));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let deployer = NetlifyDeployer::new(
            Url::parse("http://localhost:9000/proxy/").unwrap(),
            DeployPolicy::default(),
        )
        .unwrap();

        let url = deployer.endpoint(&["api", "v1", "deploys", "abc"]);
        assert_eq!(url.as_str(), "http://localhost:9000/proxy/api/v1/deploys/abc");
    }
}
