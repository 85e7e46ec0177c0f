//! HTTP implementation of the remote job protocol
//!
//! - `POST {base}/{endpoint}/run` with `{"input": {...}}` returns `{"id": ...}`
//! - `GET {base}/{endpoint}/status/{id}` returns the job status

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RemoteJobClient, RemoteJobHandle, StatusResponse};
use crate::error::{ProviderError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Job client bound to one endpoint of the remote service
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    /// `{api_base}/{endpoint_id}` without trailing slash
    endpoint_url: String,
    endpoint_id: String,
    api_key: String,
    client: Client,
}

impl HttpJobClient {
    /// Creates a client for one endpoint
    ///
    /// # Arguments
    /// * `api_base` - Service base URL (e.g., "https://api.runpod.ai/v2")
    /// * `endpoint_id` - Endpoint identifier appended to the base
    /// * `api_key` - Bearer token
    pub fn new(api_base: &str, endpoint_id: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::invalid_config(format!("HTTP client: {}", e)))?;

        Ok(Self::with_client(api_base, endpoint_id, api_key, client))
    }

    /// Creates a client with a preconfigured reqwest `Client`
    pub fn with_client(api_base: &str, endpoint_id: &str, api_key: &str, client: Client) -> Self {
        Self {
            endpoint_url: format!("{}/{}", api_base.trim_end_matches('/'), endpoint_id),
            endpoint_id: endpoint_id.to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[async_trait]
impl RemoteJobClient for HttpJobClient {
    async fn submit(&self, input: serde_json::Value) -> Result<String> {
        let url = format!("{}/run", self.endpoint_url);
        debug!("Submitting job to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &self.endpoint_id, &body)
                .unwrap_or_else(|| ProviderError::submission(format!("HTTP {}", status))));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(format!("unreadable response: {}", e)))?;

        body.id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::submission("response did not contain a job id"))
    }

    async fn get_status(&self, job_id: &str) -> Result<RemoteJobHandle> {
        let url = format!("{}/status/{}", self.endpoint_url, job_id);

        let response = match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Status request for job {} failed: {}", job_id, e);
                return Ok(RemoteJobHandle::unknown(job_id));
            }
        };

        let status = response.status();
        match status.as_u16() {
            401 | 404 => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status.as_u16(), &self.endpoint_id, &body)
                    .unwrap_or_else(|| ProviderError::unexpected(body)));
            }
            s if s >= 400 => {
                warn!("Status request for job {} returned HTTP {}", job_id, s);
                return Ok(RemoteJobHandle::unknown(job_id));
            }
            _ => {}
        }

        match response.json::<StatusResponse>().await {
            Ok(body) => Ok(body.into_handle(job_id)),
            Err(e) => {
                warn!("Unreadable status for job {}: {}", job_id, e);
                Ok(RemoteJobHandle::unknown(job_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::remote::{PollOptions, RemoteStatus};
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpJobClient {
        HttpJobClient::new(&server.uri(), "asr-endpoint", "test-key").unwrap()
    }

    #[test]
    fn test_endpoint_url_trims_slash() {
        let client = HttpJobClient::new("https://api.example.com/v2/", "ep", "k").unwrap();
        assert_eq!(client.endpoint_url(), "https://api.example.com/v2/ep");
    }

    #[tokio::test]
    async fn test_submit_wraps_input_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/asr-endpoint/run"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({"input": {"audio_url": "https://x/a.wav"}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "job-42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let id = client
            .submit(serde_json::json!({"audio_url": "https://x/a.wav"}))
            .await
            .unwrap();

        assert_eq!(id, "job-42");
    }

    #[tokio::test]
    async fn test_submit_error_mapping() {
        for (code, kind, recoverable) in [
            (401, ErrorKind::Auth, false),
            (404, ErrorKind::EndpointNotFound, false),
            (500, ErrorKind::Submission, true),
            (429, ErrorKind::Submission, true),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let err = client_for(&server)
                .await
                .submit(serde_json::json!({}))
                .await
                .unwrap_err();

            assert_eq!(err.kind, kind, "HTTP {}", code);
            assert_eq!(err.recoverable, recoverable, "HTTP {}", code);
        }
    }

    #[tokio::test]
    async fn test_submit_without_id_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .submit(serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Submission);
    }

    #[tokio::test]
    async fn test_submit_transport_failure_is_recoverable() {
        let client = HttpJobClient::new("http://127.0.0.1:9", "ep", "k").unwrap();
        let err = client.submit(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Submission);
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn test_status_transport_failure_is_unknown() {
        let client = HttpJobClient::new("http://127.0.0.1:9", "ep", "k").unwrap();
        let handle = client.get_status("job-1").await.unwrap();
        assert_eq!(handle.status, RemoteStatus::Unknown);
    }

    #[tokio::test]
    async fn test_status_auth_failure_is_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/asr-endpoint/status/job-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_status("job-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_status_server_error_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let handle = client_for(&server).await.get_status("job-1").await.unwrap();
        assert_eq!(handle.status, RemoteStatus::Unknown);
    }

    #[tokio::test]
    async fn test_queue_progress_complete_sequence() {
        let server = MockServer::start().await;
        let status_path = || path("/asr-endpoint/status/job-7");

        Mock::given(method("GET"))
            .and(status_path())
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "IN_QUEUE"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(status_path())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "IN_PROGRESS"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(status_path())
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "COMPLETED",
                "output": {"segments": [{"start": 0.0, "end": 1.2, "text": "hello"}]}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let output = client
            .wait_for_completion(
                "job-7",
                PollOptions {
                    timeout: Duration::from_secs(10),
                    poll_interval: Duration::from_millis(20),
                },
                &|_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output["segments"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_never_finishing_job_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "IN_QUEUE"})),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = client_for(&server)
            .await
            .wait_for_completion(
                "job-9",
                PollOptions {
                    timeout: Duration::from_secs(1),
                    poll_interval: Duration::from_millis(500),
                },
                &|_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.to_string().contains("1s"));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(2000));
    }
}
