//! Local durable upload storage, laid out as `<root>/<job_uid>/<file>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use resumeflow_core::JobUid;

use super::{CleanupError, ResourceCleaner};

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a job's files. Job uids are restricted to
    /// `[A-Za-z0-9_-]`, so this never escapes the root.
    pub fn job_dir(&self, job_uid: &JobUid) -> PathBuf {
        self.root.join(job_uid.as_str())
    }

    /// Persist an upload and return its durable path.
    pub async fn store(
        &self,
        job_uid: &JobUid,
        file_name: &str,
        contents: &[u8],
    ) -> Result<PathBuf, CleanupError> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "empty file name"))?;
        let dir = self.job_dir(job_uid);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Job directories last modified at least `min_age` ago.
    ///
    /// Entries whose name is not a job uid are ignored.
    pub async fn stale_job_dirs(&self, min_age: Duration) -> Result<Vec<JobUid>, CleanupError> {
        let cutoff = SystemTime::now()
            .checked_sub(min_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stale = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(uid) = entry
                .file_name()
                .to_str()
                .and_then(|name| JobUid::parse(name).ok())
            else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(job_uid = %uid, error = %e, "cannot stat upload directory");
                    continue;
                }
            };
            if metadata.is_dir() && metadata.modified()? <= cutoff {
                stale.push(uid);
            }
        }
        stale.sort();
        Ok(stale)
    }
}

#[async_trait::async_trait]
impl ResourceCleaner for LocalFileStore {
    fn name(&self) -> &str {
        "files"
    }

    async fn delete_job_resources(&self, job_uid: &JobUid) -> Result<(), CleanupError> {
        match tokio::fs::remove_dir_all(self.job_dir(job_uid)).await {
            Ok(()) => {
                debug!(job_uid = %job_uid, "upload directory removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_delete_job_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let uid = JobUid::parse("j1").unwrap();

        let path = store.store(&uid, "../../cv.pdf", b"%PDF").await.unwrap();
        assert_eq!(path, dir.path().join("j1").join("cv.pdf"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"%PDF");

        store.delete_job_resources(&uid).await.unwrap();
        assert!(!store.job_dir(&uid).exists());
        // Already gone is fine.
        store.delete_job_resources(&uid).await.unwrap();
    }

    #[tokio::test]
    async fn stale_dirs_respect_age_and_skip_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        for uid in ["b", "a"] {
            store
                .store(&JobUid::parse(uid).unwrap(), "cv.pdf", b"x")
                .await
                .unwrap();
        }
        tokio::fs::create_dir(dir.path().join("not a uid")).await.unwrap();
        tokio::fs::write(dir.path().join("loose-file"), b"x").await.unwrap();

        let stale = store.stale_job_dirs(Duration::ZERO).await.unwrap();
        let names: Vec<&str> = stale.iter().map(JobUid::as_str).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(store.stale_job_dirs(Duration::from_secs(3600)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_root_has_no_orphans() {
        let store = LocalFileStore::new("/nonexistent/resumeflow-test-root");
        assert!(store.stale_job_dirs(Duration::ZERO).await.unwrap().is_empty());
    }
}
