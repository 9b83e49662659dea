//! [`TreeApi`] over the server's REST endpoints.

use crate::config::ServerConfig;
use async_trait::async_trait;
use mirror_core::api::{ApiError, Result, TreeApi};
use mirror_core::path;
use mirror_core::{CommitInfo, FileContent, RecentFile, TreeNode};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Upper bound on any single HTTP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTreeApi {
    client: Client,
    base_url: Url,
    multi_repo: bool,
    repo: RwLock<Option<String>>,
}

impl HttpTreeApi {
    /// Single-repo mode when `config.repo` is unset, multi-repo otherwise.
    pub fn new(config: &ServerConfig) -> Self {
        Self::build(config.base_url.clone(), config.repo.is_some(), config.repo.clone())
    }

    /// Multi-repo mode with no repository selected yet. Calls fail with
    /// [`ApiError::NoContext`] until [`select_repo`](Self::select_repo) is called.
    pub fn multi_repo(base_url: Url) -> Self {
        Self::build(base_url, true, None)
    }

    fn build(base_url: Url, multi_repo: bool, repo: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            multi_repo,
            repo: RwLock::new(repo),
        }
    }

    pub fn select_repo(&self, repo: &str) {
        *self.repo.write().unwrap_or_else(|e| e.into_inner()) = Some(repo.to_string());
    }

    /// Resolve `/api/<name>` or `/api/r/<repo>/<name>` against the base URL.
    ///
    /// Evaluated per call, so a repository selected after construction is picked up.
    fn endpoint(&self, name: &str) -> Result<Url> {
        let repo = if self.multi_repo {
            let repo = self.repo.read().unwrap_or_else(|e| e.into_inner()).clone();
            Some(repo.ok_or(ApiError::NoContext)?)
        } else {
            None
        };

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Transport(format!("cannot be a base: {}", self.base_url)))?;
            segments.pop_if_empty().push("api");
            if let Some(repo) = &repo {
                segments.push("r").push(repo);
            }
            segments.extend(name.split('/'));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        name: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(name)?;
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let target = query
                .iter()
                .find(|(k, _)| *k == "path")
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| name.to_string());
            return Err(ApiError::NotFound(target));
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(e.to_string())
    }
}

#[async_trait]
impl TreeApi for HttpTreeApi {
    async fn list(&self, dir: &str) -> Result<Vec<TreeNode>> {
        self.get_json(
            "tree",
            &[
                ("path", path::to_wire(dir)),
                ("include_git", "true".to_string()),
            ],
        )
        .await
    }

    async fn read(&self, file: &str) -> Result<FileContent> {
        self.get_json("content", &[("path", path::normalize(file))])
            .await
    }

    async fn last_commit(&self, file: &str) -> Result<Option<CommitInfo>> {
        match self
            .get_json("git/status", &[("path", path::to_wire(file))])
            .await
        {
            Ok(commit) => Ok(Some(commit)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentFile>> {
        self.get_json("git/recent", &[("limit", limit.to_string())])
            .await
    }
}
