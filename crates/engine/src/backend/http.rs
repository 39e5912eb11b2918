use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    ProgressSnapshot, SaveProgressPayload, SessionId, SessionMeta, StudentId, SubmissionReceipt,
    SubmitPayload, TestId,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use url::Url;

use super::ExamBackend;
use crate::error::BackendError;

#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
}

impl HttpBackendConfig {
    /// # Errors
    ///
    /// Returns `BackendError::InvalidUrl` if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| BackendError::InvalidUrl(format!("{base_url}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        let api_token = api_token.filter(|token| !token.trim().is_empty());
        Ok(Self {
            base_url,
            api_token,
        })
    }

    /// Reads `PROCTOR_API_BASE_URL` and the optional `PROCTOR_API_TOKEN`.
    ///
    /// Returns `Ok(None)` when no base URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidUrl` if the configured URL is malformed.
    pub fn from_env() -> Result<Option<Self>, BackendError> {
        let Ok(base_url) = env::var("PROCTOR_API_BASE_URL") else {
            return Ok(None);
        };
        if base_url.trim().is_empty() {
            return Ok(None);
        }
        Self::new(&base_url, env::var("PROCTOR_API_TOKEN").ok()).map(Some)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Backend that talks to the exam service over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    #[must_use]
    pub fn new(config: HttpBackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn progress_url(&self, student_id: &StudentId, test_id: &TestId) -> Result<Url, BackendError> {
        self.config.endpoint(&[
            "students",
            student_id.as_str(),
            "tests",
            test_id.as_str(),
            "progress",
        ])
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    session_id: SessionId,
    student_id: &'a StudentId,
    #[serde(flatten)]
    payload: &'a SubmitPayload,
    submitted_at: DateTime<Utc>,
}

#[async_trait]
impl ExamBackend for HttpBackend {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), BackendError> {
        let url = self.progress_url(&snapshot.student_id, &snapshot.test_id)?;
        let response = self
            .authorize(self.client.put(url))
            .json(&snapshot.to_save_payload())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }
        Ok(())
    }

    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<SaveProgressPayload>, BackendError> {
        let url = self.progress_url(student_id, test_id)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(BackendError::HttpStatus(status)),
        }
    }

    async fn submit(
        &self,
        meta: &SessionMeta,
        payload: &SubmitPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, BackendError> {
        let url = self
            .config
            .endpoint(&["tests", meta.test_id.as_str(), "submissions"])?;
        let body = SubmitRequest {
            session_id: meta.session_id,
            student_id: &meta.student_id,
            payload,
            submitted_at,
        };
        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            HttpBackendConfig::new("ftp://exams.example", None),
            Err(BackendError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpBackendConfig::new("not a url", None),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[test]
    fn blank_token_is_dropped() {
        let config = HttpBackendConfig::new("https://exams.example/api", Some("  ".into())).unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn endpoints_escape_ids_and_tolerate_trailing_slash() {
        let config = HttpBackendConfig::new("https://exams.example/api/", None).unwrap();
        let backend = HttpBackend::new(config);
        let url = backend
            .progress_url(&StudentId::new("ada lovelace").unwrap(), &TestId::new("t/1").unwrap())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://exams.example/api/students/ada%20lovelace/tests/t%2F1/progress"
        );
    }
}
