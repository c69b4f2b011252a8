//! Mirroring the save folder into a remote git repository.
//!
//! [`RemoteSync`] owns the `{base}-repo` remote and its local clone. The
//! remote host API and the local git operations are separate capabilities
//! ([`RepoHost`], [`RepoWorkspace`]) so the push/eviction flow can run
//! against fakes.

pub mod git;
pub mod github;
pub mod retention;

#[cfg(test)]
pub mod fake;

use crate::fs::walker;
use crate::utils::logger::EVICTION_PREFIX;
use crate::utils::{LogSink, Result, SaveGuardError, Severity};
use async_trait::async_trait;
use retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const REPO_SUFFIX: &str = "-repo";

pub const COMMIT_MESSAGE: &str = "Update important files from source folder.";

/// Backup artifacts the game writes next to the save; never synced.
const EXCLUDED_EXTENSIONS: [&str; 2] = ["bak", "profilebak"];

/// A repository as known to the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepo {
    /// `owner/name`
    pub full_name: String,
    pub clone_url: String,
}

/// Author and committer used for sync commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    /// Synthetic no-reply identity derived from the authenticated login.
    pub fn for_login(login: &str) -> Self {
        Self {
            name: login.to_string(),
            email: format!("{}@users.noreply.github.com", login),
        }
    }
}

/// Remote repository API (authentication and repository lifecycle).
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Login of the token's owner. Bad tokens yield `Authentication`.
    async fn current_login(&self) -> Result<String>;

    async fn find_repo(&self, owner: &str, name: &str) -> Result<Option<RemoteRepo>>;

    /// Create a public, auto-initialised repository owned by the caller.
    async fn create_repo(&self, name: &str) -> Result<RemoteRepo>;

    /// Delete a repository. Deleting one that is already gone succeeds.
    async fn delete_repo(&self, owner: &str, name: &str) -> Result<()>;
}

/// Git operations on the local clone.
#[async_trait]
pub trait RepoWorkspace: Send + Sync {
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()>;

    /// Fetch and fast-forward the current branch.
    async fn pull(&self, path: &Path) -> Result<()>;

    /// Stage `file_name`, relative to the clone root.
    async fn stage(&self, path: &Path, file_name: &str) -> Result<()>;

    /// Commit the index. Returns `false` when the index matches HEAD and nothing was committed.
    async fn commit(&self, path: &Path, message: &str, identity: &CommitIdentity) -> Result<bool>;

    /// Push the current branch. A diverged remote yields `NonFastForward`.
    async fn push(&self, path: &Path) -> Result<()>;
}

/// State of an initialised remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepoHandle {
    pub local_clone_path: PathBuf,
    pub remote: RemoteRepo,
    pub owner_login: String,
    /// Size of the clone on disk, `.git` included
    pub size_bytes: u64,
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// File names copied into the clone and staged
    pub staged: Vec<String>,
    pub committed: bool,
    /// The remote was destroyed and recreated before this push
    pub evicted: bool,
}

/// Whether `path` is synced (backup artifacts are not).
pub fn is_syncable(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !EXCLUDED_EXTENSIONS
            .iter()
            .any(|excluded| ext.eq_ignore_ascii_case(excluded)),
        None => true,
    }
}

pub struct RemoteSync {
    host: Arc<dyn RepoHost>,
    workspace: Arc<dyn RepoWorkspace>,
    policy: RetentionPolicy,
    repo_name: String,
    clone_path: PathBuf,
    log: Arc<dyn LogSink>,
    handle: Option<RemoteRepoHandle>,
    /// Set once initialisation has succeeded; a lost handle is then recoverable.
    established: bool,
}

impl RemoteSync {
    /// The clone is created at `{clone_root}/{base_name}-repo`.
    pub fn new(
        host: Arc<dyn RepoHost>,
        workspace: Arc<dyn RepoWorkspace>,
        base_name: &str,
        clone_root: &Path,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let repo_name = format!("{}{}", base_name, REPO_SUFFIX);
        Self {
            clone_path: clone_root.join(&repo_name),
            host,
            workspace,
            policy: RetentionPolicy::default(),
            repo_name,
            log,
            handle: None,
            established: false,
        }
    }

    /// GitHub-backed remote authenticated with `token`.
    pub fn github(
        api_url: &str,
        token: &str,
        base_name: &str,
        clone_root: &Path,
        log: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let host = github::GithubHost::new(api_url, token)?;
        let workspace = git::GitWorkspace::new(token);
        Ok(Self::new(
            Arc::new(host),
            Arc::new(workspace),
            base_name,
            clone_root,
            log,
        ))
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn clone_path(&self) -> &Path {
        &self.clone_path
    }

    pub fn handle(&self) -> Option<&RemoteRepoHandle> {
        self.handle.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Authenticate, resolve or create the remote, and clone it if needed.
    ///
    /// Failures are logged and leave the sync uninitialised. Until one
    /// initialisation has succeeded, pushes fail with `Uninitialized`; after
    /// that, a push re-runs initialisation when the handle was lost.
    pub async fn initialize(&mut self) -> Result<()> {
        self.log.log("Initializing remote sync...", Severity::Success);

        let result = self.try_initialize().await;
        match &result {
            Ok(()) => {}
            Err(e @ SaveGuardError::Authentication(_)) => {
                self.log
                    .log(&format!("Error while trying to login: {}", e), Severity::Error);
            }
            Err(e) => {
                self.log.log(
                    &format!("Could not initialize remote sync: {}", e),
                    Severity::Error,
                );
            }
        }
        result
    }

    async fn try_initialize(&mut self) -> Result<()> {
        self.handle = None;

        let login = self.host.current_login().await?;
        self.log
            .log(&format!("Logged in as {}.", login), Severity::Success);

        let remote = match self.host.find_repo(&login, &self.repo_name).await? {
            Some(remote) => {
                self.log.log(
                    &format!("Repository {} exists.", self.repo_name),
                    Severity::Success,
                );
                remote
            }
            None => {
                self.log.log(
                    &format!(
                        "Repository {} not found. Creating new repository.",
                        self.repo_name
                    ),
                    Severity::Warning,
                );
                let remote = self.host.create_repo(&self.repo_name).await?;
                self.log.log(
                    &format!("Repository {} created successfully.", self.repo_name),
                    Severity::Success,
                );
                remote
            }
        };

        if !self.clone_path.exists() {
            if let Some(parent) = self.clone_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.workspace
                .clone_repo(&remote.clone_url, &self.clone_path)
                .await?;
            self.log.log(
                &format!(
                    "Repository {} cloned locally to {}.",
                    self.repo_name,
                    self.clone_path.display()
                ),
                Severity::Success,
            );
        }

        self.handle = Some(RemoteRepoHandle {
            local_clone_path: self.clone_path.clone(),
            size_bytes: self.clone_size().await?,
            remote,
            owner_login: login,
        });
        self.established = true;
        Ok(())
    }

    /// Size of the clone on disk, `.git` included.
    async fn clone_size(&self) -> Result<u64> {
        let path = self.clone_path.clone();
        let size = tokio::task::spawn_blocking(move || walker::calculate_total_size(&path)).await??;
        Ok(size)
    }

    /// Sync `files` into the remote.
    ///
    /// Evicts first when the clone is over the retention ceiling. A pull
    /// failure is only a warning; a rejected push is returned to the caller.
    pub async fn push(&mut self, files: &[PathBuf]) -> Result<PushReport> {
        let result = self.try_push(files).await;
        if let Err(e) = &result {
            self.log.log(&format!("Push failed: {}", e), Severity::Error);
        }
        result
    }

    async fn try_push(&mut self, files: &[PathBuf]) -> Result<PushReport> {
        if self.handle.is_none() {
            if !self.established {
                return Err(SaveGuardError::Uninitialized);
            }
            // An earlier eviction deleted the remote but could not recreate it.
            self.log.log(
                "Remote sync lost its repository. Re-initializing.",
                Severity::Warning,
            );
            self.try_initialize().await?;
        }

        let mut report = PushReport::default();

        let size = self.clone_size().await?;
        match self.policy.check(size) {
            Ok(()) => self.log.log(
                &format!("Current repo size: {}", self.policy.describe_usage(size)),
                Severity::Success,
            ),
            Err(SaveGuardError::SizeCeilingExceeded { .. }) => {
                self.log.log(
                    &format!(
                        "{} Repository size {} exceeds the retention ceiling. Triggering eviction.",
                        EVICTION_PREFIX,
                        self.policy.describe_usage(size)
                    ),
                    Severity::Error,
                );
                self.evict().await?;
                self.try_initialize().await?;
                report.evicted = true;
            }
            Err(e) => return Err(e),
        }

        let eligible: Vec<&PathBuf> = files
            .iter()
            .filter(|path| is_syncable(path) && path.is_file())
            .collect();
        if eligible.is_empty() {
            self.log
                .log("No important files found to push.", Severity::Warning);
            return Ok(report);
        }

        match self.workspace.pull(&self.clone_path).await {
            Ok(()) => self
                .log
                .log("Pulled latest changes from remote.", Severity::Success),
            Err(e) => self
                .log
                .log(&format!("Pull failed: {}", e), Severity::Warning),
        }

        for file in eligible {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let (source, destination) = (file.clone(), self.clone_path.join(name));
            let copied = tokio::task::spawn_blocking(move || std::fs::copy(&source, &destination)).await?;
            if let Err(e) = copied {
                self.log.log(
                    &format!("Could not copy {}: {}", file.display(), e),
                    Severity::Warning,
                );
                continue;
            }

            self.workspace.stage(&self.clone_path, name).await?;
            self.log
                .log(&format!("Staged file: {}", name), Severity::Success);
            report.staged.push(name.to_string());
        }

        if report.staged.is_empty() {
            self.log
                .log("No files could be staged for push.", Severity::Warning);
            return Ok(report);
        }

        let identity = match &self.handle {
            Some(handle) => CommitIdentity::for_login(&handle.owner_login),
            None => return Err(SaveGuardError::Uninitialized),
        };
        report.committed = self
            .workspace
            .commit(&self.clone_path, COMMIT_MESSAGE, &identity)
            .await?;
        if !report.committed {
            self.log
                .log("No changes to commit.", Severity::Success);
            return Ok(report);
        }
        self.log
            .log("Committed changes to the local repository.", Severity::Success);

        self.workspace.push(&self.clone_path).await?;
        self.log
            .log("Files pushed to remote successfully.", Severity::Success);

        let size = self.clone_size().await?;
        if let Some(handle) = self.handle.as_mut() {
            handle.size_bytes = size;
        }

        Ok(report)
    }

    /// Delete the remote repository and the local clone.
    ///
    /// Not atomic: a crash between the two steps leaves no remote until the
    /// next initialisation recreates it.
    async fn evict(&mut self) -> Result<()> {
        let owner = match &self.handle {
            Some(handle) => handle.owner_login.clone(),
            None => return Err(SaveGuardError::Uninitialized),
        };

        self.log.log(
            &format!(
                "{} Deleting repository {} and its local clone. This operation is irreversible.",
                EVICTION_PREFIX, self.repo_name
            ),
            Severity::Warning,
        );

        self.host.delete_repo(&owner, &self.repo_name).await?;
        self.handle = None;
        self.log.log(
            &format!("{} Remote repository {} deleted.", EVICTION_PREFIX, self.repo_name),
            Severity::Warning,
        );

        if self.clone_path.exists() {
            tokio::fs::remove_dir_all(&self.clone_path).await?;
            self.log.log(
                &format!(
                    "{} Local repository {} deleted.",
                    EVICTION_PREFIX,
                    self.clone_path.display()
                ),
                Severity::Warning,
            );
        }

        Ok(())
    }
}
