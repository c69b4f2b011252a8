//! In-memory remote host and workspace for tests.

use super::{CommitIdentity, RemoteRepo, RepoHost, RepoWorkspace};
use crate::utils::{Result, SaveGuardError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub message: String,
    pub author: CommitIdentity,
    pub files: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeClone {
    full_name: String,
    staged: Vec<String>,
    unpushed: Vec<FakeCommit>,
}

#[derive(Debug, Default)]
struct State {
    login: Option<String>,
    repos: HashMap<String, Vec<FakeCommit>>,
    clones: HashMap<PathBuf, FakeClone>,
    created: usize,
    deleted: usize,
    fail_pull: bool,
    reject_push: bool,
    /// Number of upcoming `create_repo` calls that fail
    failing_creates: usize,
}

/// Implements both [`RepoHost`] and [`RepoWorkspace`] over shared state.
///
/// Clones are real (empty) directories so size checks and file copies
/// behave as in production; git history lives in memory.
#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new(login: &str) -> Self {
        let remote = Self::default();
        remote.state.lock().unwrap().login = Some(login.to_string());
        remote
    }

    /// Every call that needs a login fails with `Authentication`.
    pub fn unauthorized() -> Self {
        Self::default()
    }

    pub fn seed_repo(&self, full_name: &str) {
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(full_name.to_string(), Vec::new());
    }

    pub fn history(&self, full_name: &str) -> Vec<FakeCommit> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(full_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn deleted(&self) -> usize {
        self.state.lock().unwrap().deleted
    }

    pub fn set_fail_pull(&self, fail: bool) {
        self.state.lock().unwrap().fail_pull = fail;
    }

    pub fn set_reject_push(&self, reject: bool) {
        self.state.lock().unwrap().reject_push = reject;
    }

    /// Make the next `count` repository creations fail as a service outage.
    pub fn fail_next_creates(&self, count: usize) {
        self.state.lock().unwrap().failing_creates = count;
    }

    fn login(state: &State) -> Result<String> {
        state
            .login
            .clone()
            .ok_or_else(|| SaveGuardError::Authentication("bad credentials".to_string()))
    }

    fn repo(full_name: &str) -> RemoteRepo {
        RemoteRepo {
            full_name: full_name.to_string(),
            clone_url: format!("fake://{}.git", full_name),
        }
    }
}

fn missing_clone(path: &Path) -> SaveGuardError {
    SaveGuardError::NotFound(format!("no clone at {}", path.display()))
}

#[async_trait]
impl RepoHost for FakeRemote {
    async fn current_login(&self) -> Result<String> {
        Self::login(&self.state.lock().unwrap())
    }

    async fn find_repo(&self, owner: &str, name: &str) -> Result<Option<RemoteRepo>> {
        let full_name = format!("{}/{}", owner, name);
        let state = self.state.lock().unwrap();
        Ok(state.repos.contains_key(&full_name).then(|| Self::repo(&full_name)))
    }

    async fn create_repo(&self, name: &str) -> Result<RemoteRepo> {
        let mut state = self.state.lock().unwrap();
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(SaveGuardError::RemoteApi(
                "Creating the repository failed with status 503 Service Unavailable".to_string(),
            ));
        }
        let full_name = format!("{}/{}", Self::login(&state)?, name);
        if state.repos.contains_key(&full_name) {
            return Err(SaveGuardError::RemoteApi(format!("{} already exists", full_name)));
        }
        state.repos.insert(full_name.clone(), Vec::new());
        state.created += 1;
        Ok(Self::repo(&full_name))
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.repos.remove(&format!("{}/{}", owner, name)).is_some() {
            state.deleted += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl RepoWorkspace for FakeRemote {
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()> {
        let full_name = url
            .trim_start_matches("fake://")
            .trim_end_matches(".git")
            .to_string();
        std::fs::create_dir_all(path)?;
        self.state.lock().unwrap().clones.insert(
            path.to_path_buf(),
            FakeClone {
                full_name,
                ..FakeClone::default()
            },
        );
        Ok(())
    }

    async fn pull(&self, path: &Path) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.fail_pull {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "remote unreachable").into());
        }
        if !state.clones.contains_key(path) {
            return Err(missing_clone(path));
        }
        Ok(())
    }

    async fn stage(&self, path: &Path, file_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let clone = state.clones.get_mut(path).ok_or_else(|| missing_clone(path))?;
        clone.staged.push(file_name.to_string());
        Ok(())
    }

    async fn commit(&self, path: &Path, message: &str, identity: &CommitIdentity) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let clone = state.clones.get_mut(path).ok_or_else(|| missing_clone(path))?;
        if clone.staged.is_empty() {
            return Ok(false);
        }
        let commit = FakeCommit {
            message: message.to_string(),
            author: identity.clone(),
            files: std::mem::take(&mut clone.staged),
        };
        clone.unpushed.push(commit);
        Ok(true)
    }

    async fn push(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.reject_push {
            return Err(SaveGuardError::NonFastForward(
                "remote contains commits that are not present locally".to_string(),
            ));
        }
        let clone = state.clones.get_mut(path).ok_or_else(|| missing_clone(path))?;
        let full_name = clone.full_name.clone();
        let commits = std::mem::take(&mut clone.unpushed);
        let history = state
            .repos
            .get_mut(&full_name)
            .ok_or_else(|| SaveGuardError::RemoteApi(format!("{} not found", full_name)))?;
        history.extend(commits);
        Ok(())
    }
}
