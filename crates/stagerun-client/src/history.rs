//! Build-history API client.
//!
//! Speaks the AppVeyor project history endpoint:
//! `GET {base}/projects/{account}/{project}/history?recordsNumber={depth}`.

use crate::{ClientError, USER_AGENT};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use stagerun_core::history::{BuildHistory, BuildRecord, BuildState};
use stagerun_core::{Error, Result};
use tracing::debug;
use url::Url;

/// Client for a project's build history.
pub struct HistoryClient {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    builds: Vec<HistoryBuild>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryBuild {
    build_number: u64,
    #[serde(default, deserialize_with = "deserialize_pull_request")]
    pull_request_id: Option<u64>,
    #[serde(default)]
    branch: Option<String>,
    status: BuildState,
}

/// Pull request ids arrive as strings, numbers, empty strings or null.
fn deserialize_pull_request<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<IdRepr>::deserialize(deserializer)? {
        Some(IdRepr::Number(n)) => Some(n),
        Some(IdRepr::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

impl From<HistoryBuild> for BuildRecord {
    fn from(build: HistoryBuild) -> Self {
        BuildRecord {
            build_number: build.build_number,
            pull_request: build.pull_request_id,
            branch: build.branch,
            state: build.status,
        }
    }
}

impl HistoryClient {
    /// Client for `account/project` on the API rooted at `base_url`.
    pub fn new(
        base_url: &str,
        account: &str,
        project: &str,
        depth: u32,
    ) -> std::result::Result<Self, ClientError> {
        let url = history_url(base_url, account, project, depth)?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            token: None,
        })
    }

    /// Send `token` as a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch recent builds, newest first.
    pub async fn fetch(&self) -> std::result::Result<Vec<BuildRecord>, ClientError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json");

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }

        let history: HistoryResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        debug!(url = %self.url, builds = history.builds.len(), "Fetched build history");

        Ok(history.builds.into_iter().map(BuildRecord::from).collect())
    }
}

#[async_trait]
impl BuildHistory for HistoryClient {
    async fn recent_builds(&self) -> Result<Vec<BuildRecord>> {
        self.fetch().await.map_err(|e| Error::History(e.to_string()))
    }
}

fn history_url(
    base_url: &str,
    account: &str,
    project: &str,
    depth: u32,
) -> std::result::Result<Url, ClientError> {
    let mut url =
        Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl(format!("{}: cannot be a base", base_url)))?
        .pop_if_empty()
        .extend(["projects", account, project, "history"]);

    url.query_pairs_mut()
        .append_pair("recordsNumber", &depth.to_string());

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::TestServer;

    #[test]
    fn test_history_url() {
        let url = history_url("https://ci.appveyor.com/api/", "acme", "vecto", 50).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ci.appveyor.com/api/projects/acme/vecto/history?recordsNumber=50"
        );
    }

    #[test]
    fn test_history_url_escapes_segments() {
        let url = history_url("http://localhost:8080/api", "my team", "a/b", 10).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/projects/my%20team/a%2Fb/history?recordsNumber=10"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            history_url("not a url", "a", "b", 1),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_history_response() {
        let json = r#"{
            "project": { "name": "vecto" },
            "builds": [
                { "buildId": 9, "buildNumber": 120, "pullRequestId": "42", "branch": "master", "status": "queued" },
                { "buildId": 8, "buildNumber": 119, "pullRequestId": "", "branch": "master", "status": "success" },
                { "buildId": 7, "buildNumber": 118, "pullRequestId": 41, "status": "cancelling" },
                { "buildId": 6, "buildNumber": 117, "pullRequestId": null, "status": "failed" },
                { "buildId": 5, "buildNumber": 116, "status": "running" }
            ]
        }"#;

        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        let records: Vec<BuildRecord> = response.builds.into_iter().map(BuildRecord::from).collect();

        assert_eq!(records.len(), 5);
        assert_eq!(records[0].pull_request, Some(42));
        assert_eq!(records[0].state, BuildState::Queued);
        assert_eq!(records[1].pull_request, None);
        assert_eq!(records[2].pull_request, Some(41));
        assert_eq!(records[2].state, BuildState::Unknown);
        assert_eq!(records[3].pull_request, None);
        assert_eq!(records[4].branch, None);
    }

    #[tokio::test]
    async fn test_fetch_sends_token_and_parses() {
        let body = r#"{"builds":[{"buildNumber":5,"pullRequestId":"3","status":"success"}]}"#;
        let server = TestServer::start(200, body).await;

        let client = HistoryClient::new(&server.base_url, "acme", "vecto", 25)
            .unwrap()
            .with_token("secret-token");
        let records = client.fetch().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].build_number, 5);
        assert_eq!(records[0].pull_request, Some(3));

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].uri.path(), "/projects/acme/vecto/history");
        assert_eq!(requests[0].uri.query(), Some("recordsNumber=25"));
        assert_eq!(
            requests[0].header("authorization"),
            Some("Bearer secret-token")
        );
        assert!(requests[0].header("user-agent").unwrap().starts_with("stagerun/"));
    }

    #[tokio::test]
    async fn test_fetch_reports_api_errors() {
        let server = TestServer::start(404, r#"{"message":"no"}"#).await;
        let client = HistoryClient::new(&server.base_url, "acme", "vecto", 25).unwrap();

        let err = client.recent_builds().await.unwrap_err();
        assert!(matches!(err, Error::History(_)));
        assert!(err.to_string().contains("404"));
    }
}
