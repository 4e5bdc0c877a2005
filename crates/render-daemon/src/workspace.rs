use std::io;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;
use crate::error::JobError;

/// Prefix shared by every job id and therefore every workspace directory
pub const WORKSPACE_PREFIX: &str = "render_";

/// Generate a job id: `render_<unix millis>_<8 random hex chars>`
///
/// Timestamp plus randomness, so collisions are practically impossible but
/// not ruled out. [`Workspace::acquire`] refuses to reuse an existing
/// directory, which turns a collision into a job failure instead of sharing.
pub fn new_job_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}_{}", WORKSPACE_PREFIX, Utc::now().timestamp_millis(), &random[..8])
}

/// Job-private scratch directory.
///
/// Call [`Workspace::release`] once the job is finished. If the handle is
/// dropped without being released (client went away mid-stream, task
/// cancelled) the directory is removed synchronously in `Drop`.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create `<root>/<job_id>`; the directory must not already exist.
    ///
    /// The workspace path is always absolute, since editly runs with the
    /// workspace as its working directory and is handed paths inside it.
    pub async fn acquire(root: &Path, job_id: &str) -> Result<Self, JobError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| JobError::Workspace { path: root.to_path_buf(), source })?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| JobError::Workspace { path: root.to_path_buf(), source })?;

        let path = root.join(job_id);
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| JobError::Workspace { path: path.clone(), source })?;

        debug!("Created workspace: {}", path.display());
        Ok(Workspace { path, released: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Recursively remove the workspace. Never fails; errors are logged.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => info!("Cleaned up temp directory: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Workspace already gone: {}", self.path.display());
            }
            Err(e) => error!("Cleanup error for {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => warn!("Workspace dropped before release, removed: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!("Cleanup error for {}: {}", self.path.display(), e),
        }
    }
}

/// Remove leftover `render_*` directories directly under `root`
///
/// Only meant for startup, before any job runs: a crash can leave
/// workspaces behind that nothing will ever release.
pub async fn sweep_orphans(root: &Path) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    info!("🔍 Checking for orphaned workspaces in {}...", root.display());

    let orphans = tokio::task::spawn_blocking({
        let root = root.to_path_buf();
        move || {
            walkdir::WalkDir::new(&root)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(|name| name.starts_with(WORKSPACE_PREFIX))
                        .unwrap_or(false)
                })
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        }
    })
    .await
    .context("Failed to scan for orphaned workspaces")?;

    let mut removed = 0;
    for orphan in orphans {
        match tokio::fs::remove_dir_all(&orphan).await {
            Ok(()) => {
                info!("Removed orphaned workspace: {}", orphan.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove orphaned workspace {}: {}", orphan.display(), e),
        }
    }

    Ok(removed)
}
