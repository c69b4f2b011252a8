//! Local clone operations backed by libgit2.
//!
//! libgit2 calls block, so every operation runs on the blocking pool.

use super::{CommitIdentity, RepoWorkspace};
use crate::utils::{Result, SaveGuardError};
use async_trait::async_trait;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::debug;

const ORIGIN: &str = "origin";
const FALLBACK_BRANCH: &str = "main";

/// Git workspace authenticating to HTTPS remotes with an access token.
pub struct GitWorkspace {
    token: String,
}

impl GitWorkspace {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[async_trait]
impl RepoWorkspace for GitWorkspace {
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()> {
        let (url, path, token) = (url.to_string(), path.to_path_buf(), self.token.clone());
        blocking(move || clone_blocking(&url, &path, &token)).await
    }

    async fn pull(&self, path: &Path) -> Result<()> {
        let (path, token) = (path.to_path_buf(), self.token.clone());
        blocking(move || pull_blocking(&path, &token)).await
    }

    async fn stage(&self, path: &Path, file_name: &str) -> Result<()> {
        let (path, file_name) = (path.to_path_buf(), PathBuf::from(file_name));
        blocking(move || stage_blocking(&path, &file_name)).await
    }

    async fn commit(&self, path: &Path, message: &str, identity: &CommitIdentity) -> Result<bool> {
        let (path, message, identity) = (path.to_path_buf(), message.to_string(), identity.clone());
        blocking(move || commit_blocking(&path, &message, &identity)).await
    }

    async fn push(&self, path: &Path) -> Result<()> {
        let (path, token) = (path.to_path_buf(), self.token.clone());
        blocking(move || push_blocking(&path, &token)).await
    }
}

/// The token is sent as the username with an empty password.
fn callbacks(token: &str) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| Cred::userpass_plaintext(token, ""));
    callbacks
}

fn clone_blocking(url: &str, path: &Path, token: &str) -> Result<()> {
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks(token));

    RepoBuilder::new().fetch_options(fetch).clone(url, path)?;
    debug!("Cloned {} into {}", url, path.display());
    Ok(())
}

/// Branch HEAD points at, even when it has no commits yet.
fn current_branch(repo: &Repository) -> Result<String> {
    let head = repo.find_reference("HEAD")?;
    let branch = head
        .symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .unwrap_or(FALLBACK_BRANCH);
    Ok(branch.to_string())
}

fn pull_blocking(path: &Path, token: &str) -> Result<()> {
    let repo = Repository::open(path)?;
    let mut remote = repo.find_remote(ORIGIN)?;

    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks(token));
    remote.fetch(&["refs/heads/*:refs/remotes/origin/*"], Some(&mut fetch), None)?;

    let branch = current_branch(&repo)?;
    let remote_ref = match repo.find_reference(&format!("refs/remotes/{}/{}", ORIGIN, branch)) {
        Ok(reference) => reference,
        // Nothing pushed to this branch yet.
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let Some(target) = remote_ref.target() else {
        return Ok(());
    };

    let incoming = repo.reference_to_annotated_commit(&remote_ref)?;
    let (analysis, _) = repo.merge_analysis(&[&incoming])?;
    if analysis.is_up_to_date() {
        return Ok(());
    }
    if !analysis.is_fast_forward() && !analysis.is_unborn() {
        return Err(SaveGuardError::NonFastForward(format!(
            "local branch {} has diverged from {}",
            branch, ORIGIN
        )));
    }

    let local_ref = format!("refs/heads/{}", branch);
    match repo.find_reference(&local_ref) {
        Ok(mut reference) => {
            reference.set_target(target, "pull: fast-forward")?;
        }
        Err(_) => {
            repo.reference(&local_ref, target, true, "pull: create branch")?;
        }
    }
    repo.set_head(&local_ref)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

fn stage_blocking(path: &Path, file_name: &Path) -> Result<()> {
    let repo = Repository::open(path)?;
    let mut index = repo.index()?;
    index.add_path(file_name)?;
    index.write()?;
    Ok(())
}

fn commit_blocking(path: &Path, message: &str, identity: &CommitIdentity) -> Result<bool> {
    let repo = Repository::open(path)?;
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let unchanged = match &parent {
        Some(parent) => parent.tree_id() == tree_id,
        None => index.is_empty(),
    };
    if unchanged {
        return Ok(false);
    }

    let tree = repo.find_tree(tree_id)?;
    let signature = Signature::now(&identity.name, &identity.email)?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let id = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    debug!("Committed {} in {}", id, path.display());
    Ok(true)
}

fn push_blocking(path: &Path, token: &str) -> Result<()> {
    let repo = Repository::open(path)?;
    let mut remote = repo.find_remote(ORIGIN)?;
    let branch = current_branch(&repo)?;
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);

    let rejected: RefCell<Option<String>> = RefCell::new(None);
    let mut callbacks = callbacks(token);
    callbacks.push_update_reference(|reference, status| {
        if let Some(status) = status {
            *rejected.borrow_mut() = Some(format!("{} rejected: {}", reference, status));
        }
        Ok(())
    });

    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    match remote.push(&[refspec.as_str()], Some(&mut options)) {
        Ok(()) => {}
        Err(e) if e.code() == ErrorCode::NotFastForward => {
            return Err(SaveGuardError::NonFastForward(e.message().to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(reason) = rejected.borrow_mut().take() {
        return Err(SaveGuardError::NonFastForward(reason));
    }
    Ok(())
}
