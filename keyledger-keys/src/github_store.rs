//! GitHub Contents API document backend
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::backend::{DocumentStore, StoredDocument};
use crate::error::{KeyError, KeyResult};
use crate::key_types::VersionToken;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutContentsResponse {
    content: PutContentsFile,
}

#[derive(Deserialize)]
struct PutContentsFile {
    sha: String,
}

/// A file in a GitHub repository, versioned by its blob sha
///
/// Every write is a commit carrying the caller's message.
pub struct GitHubDocumentStore {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    branch: Option<String>,
    token: String,
}

impl GitHubDocumentStore {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> KeyResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("keyledger/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let store = Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: None,
            token: token.into(),
        };

        info!(
            owner = %store.owner,
            repo = %store.repo,
            "Initialized GitHub document store"
        );
        Ok(store)
    }

    /// Point at a different API host (GitHub Enterprise, test servers)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Read and commit on `branch` instead of the default branch
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn decode_content(path: &str, response: ContentsResponse) -> KeyResult<StoredDocument> {
        if response.encoding.as_deref() == Some("none") {
            return Err(KeyError::Backend(format!(
                "{} is too large for the contents API",
                path
            )));
        }

        // The API wraps base64 at 60 columns
        let compact: String = response
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| KeyError::Backend(format!("invalid base64 content for {}: {}", path, e)))?;

        Ok(StoredDocument {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            version: VersionToken::Revision(response.sha),
        })
    }
}

#[async_trait]
impl DocumentStore for GitHubDocumentStore {
    async fn read(&self, path: &str) -> KeyResult<Option<StoredDocument>> {
        let mut request = self.authorized(self.client.get(self.contents_url(path)));
        if let Some(branch) = &self.branch {
            request = request.query(&[("ref", branch.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(path = path, "Document does not exist yet");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeyError::Backend(format!(
                "GET {} returned {}: {}",
                path, status, body
            )));
        }

        let contents: ContentsResponse = response.json().await?;
        let document = Self::decode_content(path, contents)?;
        debug!(path = path, version = %document.version, "Fetched document");
        Ok(Some(document))
    }

    async fn conditional_write(
        &self,
        path: &str,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> KeyResult<VersionToken> {
        let body = PutContentsRequest {
            message,
            content: STANDARD.encode(content.as_bytes()),
            sha: expected.revision(),
            branch: self.branch.as_deref(),
        };

        let response = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        // 409: sha no longer matches. 422 without a sha: the file was created meanwhile.
        let conflict = status == StatusCode::CONFLICT
            || (status == StatusCode::UNPROCESSABLE_ENTITY && expected.is_missing());
        if conflict {
            return Err(KeyError::Conflict {
                path: path.to_string(),
                expected: expected.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeyError::Backend(format!(
                "PUT {} returned {}: {}",
                path, status, body
            )));
        }

        let updated: PutContentsResponse = response.json().await?;
        let version = VersionToken::Revision(updated.content.sha);
        info!(path = path, version = %version, message = message, "Committed document");
        Ok(version)
    }

    fn backend_name(&self) -> &str {
        "github"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> GitHubDocumentStore {
        GitHubDocumentStore::new("npqz", "popup", "secret-token")
            .unwrap()
            .with_api_url(server.uri())
    }

    #[tokio::test]
    async fn test_read_decodes_wrapped_base64() {
        let server = MockServer::start().await;
        let encoded = STANDARD.encode("{\"a\": 1}");
        let (head, tail) = encoded.split_at(4);

        Mock::given(method("GET"))
            .and(path("/repos/npqz/popup/contents/keys"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "abc123",
                "content": format!("{}\n{}\n", head, tail),
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let doc = store.read("keys").await.unwrap().unwrap();
        assert_eq!(doc.content, "{\"a\": 1}");
        assert_eq!(doc.version, VersionToken::Revision("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_read_missing_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/npqz/popup/contents/keys"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert!(store.read("keys").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_uses_branch_ref() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/npqz/popup/contents/keys"))
            .and(query_param("ref", "auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "def456",
                "content": STANDARD.encode("{}"),
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server)
            .await
            .with_branch(Some("auth".to_string()));
        let doc = store.read("keys").await.unwrap().unwrap();
        assert_eq!(doc.version, VersionToken::Revision("def456".to_string()));
    }

    #[tokio::test]
    async fn test_read_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.read("keys").await.unwrap_err();
        assert!(matches!(err, KeyError::Backend(_)));
    }

    #[tokio::test]
    async fn test_update_sends_sha_and_returns_new_version() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/npqz/popup/contents/keys"))
            .and(body_partial_json(json!({
                "message": "[keyledger] add key alice (expires never)",
                "content": STANDARD.encode("{}"),
                "sha": "abc123"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": {"sha": "new456", "path": "keys"},
                "commit": {"sha": "c0ffee"}
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let version = store
            .conditional_write(
                "keys",
                "{}",
                &VersionToken::Revision("abc123".to_string()),
                "[keyledger] add key alice (expires never)",
            )
            .await
            .unwrap();
        assert_eq!(version, VersionToken::Revision("new456".to_string()));
    }

    #[tokio::test]
    async fn test_stale_sha_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "keys does not match abc123"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store
            .conditional_write("keys", "{}", &VersionToken::Revision("abc123".to_string()), "m")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_over_existing_file_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Invalid request. \"sha\" wasn't supplied."
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store
            .conditional_write("keys", "{}", &VersionToken::Missing, "m")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // With a sha, a 422 is a plain request failure
        let err = store
            .conditional_write("keys", "{}", &VersionToken::Revision("x".to_string()), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::Backend(_)));
    }
}
