//! Minimal GitHub REST client for filing issues

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "bugbot-gateway";

#[derive(Debug, Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct CreateIssueResponse {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
}

/// Token-authenticated GitHub API client
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
}

impl GitHubClient {
    /// Create a client with a personal access token
    ///
    /// # Errors
    ///
    /// Returns error if the token is empty
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Config("GitHub token is not set".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            token,
        })
    }

    /// Open an issue and return its URL
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or GitHub rejects it
    pub async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{API_URL}/repos/{repo}/issues"))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&CreateIssueRequest {
                title,
                body,
                labels,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::GitHub(format!(
                "issue creation failed with status {status}: {detail}"
            )));
        }

        let issue: CreateIssueResponse = response.json().await?;
        Ok(issue.html_url)
    }

    /// Resolve a repository's canonical `owner/repo` name, or `None` when
    /// it does not exist or is not visible to the token
    ///
    /// # Errors
    ///
    /// Returns error on transport failures or unexpected API responses
    pub async fn repo_full_name(&self, repo: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{API_URL}/repos/{repo}"))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::GitHub(format!(
                "repository lookup failed with status {}",
                response.status()
            )));
        }

        let repo: RepoResponse = response.json().await?;
        Ok(Some(repo.full_name))
    }
}
