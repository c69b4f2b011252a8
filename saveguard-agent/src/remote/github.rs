//! GitHub REST API implementation of [`RepoHost`].

use super::{RemoteRepo, RepoHost};
use crate::utils::{Result, SaveGuardError};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("saveguard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

pub struct GithubHost {
    client: Client,
    api_url: String,
}

impl GithubHost {
    /// Client authenticated with a personal access token.
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SaveGuardError::Authentication(
                "no access token configured".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SaveGuardError::Authentication("malformed access token".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

/// Map a non-success response to an error.
async fn error_for(response: Response, action: &str) -> SaveGuardError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    status_error(status, action, &body)
}

fn status_error(status: StatusCode, action: &str, body: &str) -> SaveGuardError {
    let detail = format!("{} failed with status {}: {}", action, status, body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SaveGuardError::Authentication(detail),
        _ => SaveGuardError::RemoteApi(detail),
    }
}

#[async_trait]
impl RepoHost for GithubHost {
    async fn current_login(&self) -> Result<String> {
        let response = self.client.get(self.url("/user")).send().await?;
        if !response.status().is_success() {
            return Err(error_for(response, "Fetching the current user").await);
        }
        let user: User = response.json().await?;
        Ok(user.login)
    }

    async fn find_repo(&self, owner: &str, name: &str) -> Result<Option<RemoteRepo>> {
        let url = self.url(&format!("/repos/{}/{}", owner, name));
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(error_for(response, "Looking up the repository").await),
        }
    }

    async fn create_repo(&self, name: &str) -> Result<RemoteRepo> {
        let body = serde_json::json!({
            "name": name,
            "auto_init": true,
            "private": false,
        });
        let response = self
            .client
            .post(self.url("/user/repos"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, "Creating the repository").await);
        }
        let repo: RemoteRepo = response.json().await?;
        debug!("Created repository {}", repo.full_name);
        Ok(repo)
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<()> {
        let url = self.url(&format!("/repos/{}/{}", owner, name));
        let response = self.client.delete(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(error_for(response, "Deleting the repository").await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_rejected() {
        let err = GithubHost::new(DEFAULT_API_URL, "  ").err().unwrap();
        assert!(matches!(err, SaveGuardError::Authentication(_)));
    }

    #[test]
    fn test_api_url_is_normalized() {
        let host = GithubHost::new("https://ghe.example.com/api/v3/", "ghp_token").unwrap();
        assert_eq!(host.url("/user"), "https://ghe.example.com/api/v3/user");
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(StatusCode::UNAUTHORIZED, "Fetching the current user", "Bad credentials");
        assert!(matches!(err, SaveGuardError::Authentication(ref m) if m.contains("Bad credentials")));

        let err = status_error(StatusCode::FORBIDDEN, "Deleting the repository", "");
        assert!(matches!(err, SaveGuardError::Authentication(_)));

        let err = status_error(StatusCode::UNPROCESSABLE_ENTITY, "Creating the repository", "name exists");
        assert!(matches!(err, SaveGuardError::RemoteApi(ref m) if m.contains("422")));
    }

    #[test]
    fn test_repo_payload_deserializes() {
        let payload = r#"{
            "id": 1,
            "full_name": "survivor/TheIsland-repo",
            "clone_url": "https://github.com/survivor/TheIsland-repo.git",
            "private": false
        }"#;
        let repo: RemoteRepo = serde_json::from_str(payload).unwrap();
        assert_eq!(repo.full_name, "survivor/TheIsland-repo");
        assert!(repo.clone_url.ends_with(".git"));
    }
}
