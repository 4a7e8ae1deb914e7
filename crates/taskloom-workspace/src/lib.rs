// crates/taskloom-workspace/src/lib.rs
// ============================================================================
// Module: Task Loom Workspace
// Description: `WorkspaceManager` implementation driving `git worktree` and a
//              sandbox container's HTTP control endpoint.
// Purpose: Give each task an isolated checkout and, optionally, an isolated
//          execution sandbox, without the engine shelling out directly.
// Dependencies: std::process, reqwest (blocking), taskloom-core, uuid
// ============================================================================

//! ## Overview
//! Worktree lifecycle shells out to `git worktree add`/`git push` directly
//! via explicit command + args (never an interpolated shell string), with
//! captured stdout/stderr feeding error messages. Sandbox lifecycle talks
//! to a small HTTP control plane the same way the HTTP executor does: a
//! blocking client, short timeouts, explicit error classification.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Command;
use std::time::Duration;

use taskloom_core::SandboxId;
use taskloom_core::TaskId;
use taskloom_core::WorkspaceError;
use taskloom_core::WorkspaceHandle;
use taskloom_core::WorkspaceManager;
use taskloom_core::WorktreeId;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for [`GitWorkspaceManager`].
#[derive(Debug, Clone)]
pub struct GitWorkspaceConfig {
    /// Root directory under which per-task worktrees are created.
    pub worktrees_root: String,
    /// Path to the repository worktrees are added from.
    pub repo_path: String,
    /// Base URL of the sandbox control plane, e.g. `http://127.0.0.1:8800`.
    pub sandbox_base_url: String,
    /// Remote name used for pushes and PR creation, e.g. `"origin"`.
    pub remote_name: String,
}

// ============================================================================
// SECTION: GitWorkspaceManager
// ============================================================================

/// Drives git worktree and sandbox container lifecycle for tasks.
pub struct GitWorkspaceManager {
    config: GitWorkspaceConfig,
    http: reqwest::blocking::Client,
}

impl GitWorkspaceManager {
    /// Builds a new manager from its configuration.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Sandbox`] if the internal HTTP client
    /// cannot be built.
    pub fn new(config: GitWorkspaceConfig) -> Result<Self, WorkspaceError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| WorkspaceError::Sandbox(error.to_string()))?;
        Ok(Self { config, http })
    }

    fn run_git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.config.repo_path)
            .args(args)
            .output()
            .map_err(|error| WorkspaceError::Git(error.to_string()))?;
        if !output.status.success() {
            return Err(WorkspaceError::Git(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WorkspaceManager for GitWorkspaceManager {
    fn setup_worktree(&self, task_id: &TaskId, base_branch: &str) -> Result<WorkspaceHandle, WorkspaceError> {
        let branch_name = format!("taskloom/{task_id}");
        let worktree_path = format!("{}/{task_id}", self.config.worktrees_root);

        self.run_git(&["branch", branch_name.as_str(), base_branch])?;
        self.run_git(&["worktree", "add", worktree_path.as_str(), branch_name.as_str()])?;

        Ok(WorkspaceHandle {
            worktree_id: WorktreeId::new(task_id.as_str()),
            path: worktree_path,
            sandbox_id: None,
            branch_name,
        })
    }

    fn setup_sandbox(&self, handle: &WorkspaceHandle) -> Result<WorkspaceHandle, WorkspaceError> {
        let url = format!("{}/v1/sandboxes", self.config.sandbox_base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json_body(&handle.path))
            .send()
            .map_err(|error| WorkspaceError::Sandbox(error.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkspaceError::Sandbox(format!("sandbox start failed: {}", response.status())));
        }

        let body: SandboxCreateResponse = response
            .json()
            .map_err(|error| WorkspaceError::Sandbox(format!("malformed sandbox response: {error}")))?;

        Ok(WorkspaceHandle {
            worktree_id: handle.worktree_id.clone(),
            path: handle.path.clone(),
            sandbox_id: Some(SandboxId::new(body.sandbox_id)),
            branch_name: handle.branch_name.clone(),
        })
    }

    fn commit_and_push(&self, handle: &WorkspaceHandle, message: &str) -> Result<(), WorkspaceError> {
        let repo_arg = handle.path.as_str();
        let commit = Command::new("git")
            .arg("-C")
            .arg(repo_arg)
            .args(["commit", "-a", "-m", message])
            .output()
            .map_err(|error| WorkspaceError::Git(error.to_string()))?;
        if !commit.status.success() {
            return Err(WorkspaceError::Git(String::from_utf8_lossy(&commit.stderr).into_owned()));
        }

        let push = Command::new("git")
            .arg("-C")
            .arg(repo_arg)
            .args(["push", self.config.remote_name.as_str(), handle.branch_name.as_str()])
            .output()
            .map_err(|error| WorkspaceError::Git(error.to_string()))?;
        if !push.status.success() {
            return Err(WorkspaceError::Git(String::from_utf8_lossy(&push.stderr).into_owned()));
        }
        Ok(())
    }

    fn create_pr(&self, handle: &WorkspaceHandle, title: &str, body: &str) -> Result<String, WorkspaceError> {
        let url = format!("{}/v1/pull_requests", self.config.sandbox_base_url);
        let response = self
            .http
            .post(&url)
            .json(&PrCreateRequest {
                branch: handle.branch_name.clone(),
                title: title.to_string(),
                body: body.to_string(),
            })
            .send()
            .map_err(|error| WorkspaceError::Remote(error.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkspaceError::Remote(format!("PR creation failed: {}", response.status())));
        }

        let parsed: PrCreateResponse = response
            .json()
            .map_err(|error| WorkspaceError::Remote(format!("malformed PR response: {error}")))?;
        Ok(parsed.url)
    }

    fn cleanup(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        if let Some(sandbox_id) = &handle.sandbox_id {
            let url = format!("{}/v1/sandboxes/{sandbox_id}", self.config.sandbox_base_url);
            let _ = self.http.delete(&url).send();
        }
        self.run_git(&["worktree", "remove", "--force", handle.path.as_str()])?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

#[derive(serde::Serialize)]
struct PrCreateRequest {
    branch: String,
    title: String,
    body: String,
}

#[derive(serde::Deserialize)]
struct PrCreateResponse {
    url: String,
}

#[derive(serde::Deserialize)]
struct SandboxCreateResponse {
    sandbox_id: String,
}

fn serde_json_body(worktree_path: &str) -> serde_json::Value {
    serde_json::json!({ "worktree_path": worktree_path })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn run(repo: &std::path::Path, args: &[&str]) {
        let status = Command::new("git").arg("-C").arg(repo).args(args).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        run(repo, &["init", "-b", "main"]);
        run(repo, &["config", "user.email", "test@example.invalid"]);
        run(repo, &["config", "user.name", "Test"]);
        std::fs::write(repo.join("README.md"), "hello").unwrap();
        run(repo, &["add", "README.md"]);
        run(repo, &["commit", "-m", "initial commit"]);
        dir
    }

    fn config(repo_path: &std::path::Path, worktrees_root: &std::path::Path) -> GitWorkspaceConfig {
        GitWorkspaceConfig {
            worktrees_root: worktrees_root.to_string_lossy().into_owned(),
            repo_path: repo_path.to_string_lossy().into_owned(),
            sandbox_base_url: "http://127.0.0.1:0".to_string(),
            remote_name: "origin".to_string(),
        }
    }

    fn manager(repo_path: &std::path::Path, worktrees_root: &std::path::Path) -> GitWorkspaceManager {
        GitWorkspaceManager::new(config(repo_path, worktrees_root)).unwrap()
    }

    #[test]
    fn setup_worktree_creates_a_branch_and_checkout() {
        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mgr = manager(repo.path(), worktrees.path());

        let handle = mgr.setup_worktree(&TaskId::new("task-1"), "main").unwrap();

        assert_eq!(handle.branch_name, "taskloom/task-1");
        assert!(std::path::Path::new(&handle.path).join("README.md").exists());
        assert!(handle.sandbox_id.is_none());
    }

    #[test]
    fn setup_worktree_on_an_unknown_base_branch_is_a_git_error() {
        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mgr = manager(repo.path(), worktrees.path());

        let error = mgr.setup_worktree(&TaskId::new("task-1"), "does-not-exist").unwrap_err();
        assert!(matches!(error, WorkspaceError::Git(_)));
    }

    #[test]
    fn commit_and_push_commits_before_the_push_leg_fails_without_a_remote() {
        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mgr = manager(repo.path(), worktrees.path());
        let handle = mgr.setup_worktree(&TaskId::new("task-1"), "main").unwrap();

        std::fs::write(std::path::Path::new(&handle.path).join("CHANGES.md"), "did a thing").unwrap();
        run(std::path::Path::new(&handle.path), &["add", "CHANGES.md"]);

        let error = mgr.commit_and_push(&handle, "add changes").unwrap_err();
        assert!(matches!(error, WorkspaceError::Git(_)), "no origin remote is configured, so the push leg fails");

        let log = Command::new("git")
            .arg("-C")
            .arg(&handle.path)
            .args(["log", "-1", "--pretty=%s"])
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "add changes", "the commit leg still ran");
    }

    #[test]
    fn cleanup_removes_the_worktree_directory() {
        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mgr = manager(repo.path(), worktrees.path());
        let handle = mgr.setup_worktree(&TaskId::new("task-1"), "main").unwrap();
        let path = handle.path.clone();

        mgr.cleanup(&handle).unwrap();

        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn setup_sandbox_attaches_the_returned_sandbox_id() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/v1/sandboxes").with_status(200).with_body(r#"{"sandbox_id":"sb-1"}"#).create();

        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mut cfg = config(repo.path(), worktrees.path());
        cfg.sandbox_base_url = server.url();
        let mgr = GitWorkspaceManager::new(cfg).unwrap();

        let handle = WorkspaceHandle {
            worktree_id: WorktreeId::new("wt-1"),
            path: repo.path().to_string_lossy().into_owned(),
            sandbox_id: None,
            branch_name: "taskloom/task-1".to_string(),
        };
        let updated = mgr.setup_sandbox(&handle).unwrap();
        assert_eq!(updated.sandbox_id, Some(SandboxId::new("sb-1")));
    }

    #[test]
    fn setup_sandbox_rejects_a_non_success_status() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/v1/sandboxes").with_status(500).create();

        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mut cfg = config(repo.path(), worktrees.path());
        cfg.sandbox_base_url = server.url();
        let mgr = GitWorkspaceManager::new(cfg).unwrap();

        let handle = WorkspaceHandle {
            worktree_id: WorktreeId::new("wt-1"),
            path: repo.path().to_string_lossy().into_owned(),
            sandbox_id: None,
            branch_name: "taskloom/task-1".to_string(),
        };
        assert!(matches!(mgr.setup_sandbox(&handle), Err(WorkspaceError::Sandbox(_))));
    }

    #[test]
    fn create_pr_returns_the_remote_url() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/v1/pull_requests")
            .with_status(200)
            .with_body(r#"{"url":"https://example.invalid/pr/7"}"#)
            .create();

        let repo = init_repo();
        let worktrees = tempfile::tempdir().unwrap();
        let mut cfg = config(repo.path(), worktrees.path());
        cfg.sandbox_base_url = server.url();
        let mgr = GitWorkspaceManager::new(cfg).unwrap();

        let handle = WorkspaceHandle {
            worktree_id: WorktreeId::new("wt-1"),
            path: repo.path().to_string_lossy().into_owned(),
            sandbox_id: None,
            branch_name: "taskloom/task-1".to_string(),
        };
        let url = mgr.create_pr(&handle, "title", "body").unwrap();
        assert_eq!(url, "https://example.invalid/pr/7");
    }
}
