//! Local document store and token-mediated access.
//!
//! Documents live under `{root}/pdfs/{YYYY}/{MM}/{channel}/`. Paths handed
//! out (in tokens and [`FileInfo`]) are relative to the root.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::application::ApplicationRecord;
use crate::config::PipelineConfig;

use super::token::{AccessToken, AccessTokenPayload, TokenError, TokenSigner};

pub const DOCUMENTS_DIR: &str = "pdfs";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_NAME_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write document {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to issue access token: {0}")]
    Token(#[from] TokenError),
}

/// Description of a stored document returned to callers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileInfo {
    pub filename: String,
    /// Path relative to the storage root.
    pub path: String,
    pub size: u64,
    pub size_human: String,
    /// Retrieval URL carrying the access token.
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    pub reference_code: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct StorageStatistics {
    pub file_count: u64,
    pub total_size: u64,
    pub total_size_human: String,
    pub average_size: u64,
    pub average_size_human: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileStatistics {
    pub path: String,
    pub size: u64,
    pub size_human: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Unix mode bits in octal, when the platform has them.
    pub permissions: Option<String>,
}

pub struct DocumentStorage {
    root: PathBuf,
    signer: TokenSigner,
    public_base_url: String,
}

impl DocumentStorage {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            root: config.storage_root.clone(),
            signer: TokenSigner::new(&config.server_secret, config.token_ttl),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `pdfs/{YYYY}/{MM}/{channel}` from the record's creation time.
    pub fn relative_dir(record: &ApplicationRecord) -> String {
        format!(
            "{}/{}/{}",
            DOCUMENTS_DIR,
            record.created_at.format("%Y/%m"),
            record.channel
        )
    }

    /// `application_{ref|DRAFT}_{YYYY-MM-DD_HH-mm-ss}_{md5(session)[..8]}.pdf`
    pub fn generate_filename(record: &ApplicationRecord, now: DateTime<Utc>) -> String {
        let reference = sanitize_filename::sanitize_with_options(
            record.reference_or_draft(),
            sanitize_filename::Options {
                replacement: "_",
                ..Default::default()
            },
        );
        let session_hash = format!("{:x}", md5::compute(record.session_id.as_bytes()));
        format!(
            "application_{}_{}_{}.pdf",
            reference,
            now.format("%Y-%m-%d_%H-%M-%S"),
            &session_hash[..8]
        )
    }

    pub fn store_document(
        &self,
        bytes: &[u8],
        record: &ApplicationRecord,
        metadata: Value,
    ) -> Result<FileInfo, StorageError> {
        self.store_document_at(bytes, record, metadata, Utc::now())
    }

    /// Write a new document. Existing files are never overwritten.
    pub fn store_document_at(
        &self,
        bytes: &[u8],
        record: &ApplicationRecord,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<FileInfo, StorageError> {
        let relative_dir = Self::relative_dir(record);

        let dir = self.root.join(&relative_dir);
        fs::create_dir_all(&dir).map_err(|source| {
            log::error!(
                "Failed to store PDF for session {}: {}",
                record.session_id,
                source
            );
            StorageError::CreateDir {
                path: dir.clone(),
                source,
            }
        })?;

        let filename = write_unique(&dir, &Self::generate_filename(record, now), bytes)
            .map_err(|(path, source)| {
                log::error!(
                    "Failed to store PDF for session {}: {}",
                    record.session_id,
                    source
                );
                StorageError::Write { path, source }
            })?;
        let relative_path = format!("{}/{}", relative_dir, filename);

        let token = self.issue_access_token(&relative_path, record)?;
        let size = bytes.len() as u64;

        log::info!(
            "PDF stored for session {}: {} ({} bytes)",
            record.session_id,
            relative_path,
            size
        );

        Ok(FileInfo {
            filename,
            path: relative_path,
            size,
            size_human: format_bytes(size),
            url: self.download_url(&token.token),
            created_at: now,
            session_id: record.session_id.clone(),
            reference_code: record.reference_code.clone(),
            metadata,
            expires_at: token.payload.expires_at_utc().unwrap_or(now),
            access_token: token.token,
        })
    }

    pub fn issue_access_token(
        &self,
        path: &str,
        record: &ApplicationRecord,
    ) -> Result<AccessToken, TokenError> {
        self.signer.issue(path, &record.session_id)
    }

    pub fn validate_access_token(&self, token: &str) -> Option<AccessTokenPayload> {
        self.signer.validate(token)
    }

    pub fn download_url(&self, token: &str) -> String {
        format!(
            "{}/api/documents/download?token={}",
            self.public_base_url, token
        )
    }

    /// Absolute path for a root-relative one. Rejects anything that could
    /// leave the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let path = Path::new(relative);
        let safe = !relative.is_empty()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        safe.then(|| self.root.join(path))
    }

    pub fn retrieve_document(&self, path: &str) -> Option<Vec<u8>> {
        let full_path = self.resolve(path)?;
        if !full_path.is_file() {
            return None;
        }
        match fs::read(&full_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::error!("Failed to retrieve PDF {}: {}", path, e);
                None
            }
        }
    }

    /// Idempotent: an absent file counts as deleted.
    pub fn delete_document(&self, path: &str) -> bool {
        let Some(full_path) = self.resolve(path) else {
            log::warn!("Refusing to delete PDF outside storage root: {}", path);
            return false;
        };
        match fs::remove_file(&full_path) {
            Ok(()) => {
                log::info!("PDF deleted: {}", path);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                log::error!("Failed to delete PDF {}: {}", path, e);
                false
            }
        }
    }

    pub fn cleanup_older_than(&self, days: u32) -> usize {
        self.cleanup_older_than_at(days, SystemTime::now())
    }

    /// Delete documents last modified before `now - days`. Best effort:
    /// listing failures are logged and reported as zero.
    pub fn cleanup_older_than_at(&self, days: u32, now: SystemTime) -> usize {
        let cutoff = now
            .checked_sub(StdDuration::from_secs(u64::from(days) * SECONDS_PER_DAY))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let files = match self.list_documents() {
            Ok(files) => files,
            Err(e) => {
                log::error!("PDF cleanup failed: {}", e);
                return 0;
            }
        };

        let mut deleted = 0;
        for file in files {
            let modified = match fs::metadata(&file).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    log::warn!("Skipping {} during cleanup: {}", file.display(), e);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&file) {
                Ok(()) => deleted += 1,
                Err(e) => log::warn!("Failed to remove {} during cleanup: {}", file.display(), e),
            }
        }

        log::info!(
            "PDF cleanup completed: {} file(s) deleted, cutoff {}",
            deleted,
            DateTime::<Utc>::from(cutoff).to_rfc3339()
        );
        deleted
    }

    /// Every file below `{root}/pdfs`, recursively.
    pub fn list_documents(&self) -> io::Result<Vec<PathBuf>> {
        let base = self.root.join(DOCUMENTS_DIR);
        let mut files = Vec::new();
        if !base.exists() {
            return Ok(files);
        }

        let mut pending = vec![base];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn storage_statistics(&self) -> StorageStatistics {
        let files = match self.list_documents() {
            Ok(files) => files,
            Err(e) => {
                log::error!("Failed to get storage stats: {}", e);
                return StorageStatistics::empty();
            }
        };

        let file_count = files.len() as u64;
        let total_size: u64 = files
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|meta| meta.len())
            .sum();

        if file_count == 0 {
            return StorageStatistics::empty();
        }

        let average_size = (total_size as f64 / file_count as f64).round() as u64;
        StorageStatistics {
            file_count,
            total_size,
            total_size_human: format_bytes(total_size),
            average_size,
            average_size_human: format_bytes(average_size),
        }
    }

    pub fn file_statistics(&self, path: &str) -> Option<FileStatistics> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).ok()?;
        if !meta.is_file() {
            return None;
        }

        Some(FileStatistics {
            path: path.to_string(),
            size: meta.len(),
            size_human: format_bytes(meta.len()),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            permissions: permission_bits(&meta),
        })
    }
}

impl StorageStatistics {
    fn empty() -> Self {
        Self {
            total_size_human: "0 B".to_string(),
            average_size_human: "0 B".to_string(),
            ..Default::default()
        }
    }
}

/// Write under `filename`, or `stem-N.pdf` when a same-second generation
/// already took it. Returns the name actually used.
fn write_unique(dir: &Path, filename: &str, bytes: &[u8]) -> Result<String, (PathBuf, io::Error)> {
    let stem = filename.strip_suffix(".pdf").unwrap_or(filename);
    let mut candidate = filename.to_string();
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let path = dir.join(&candidate);
        match write_new(&path, |file| file.write_all(bytes)) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                candidate = format!("{}-{}.pdf", stem, attempt);
            }
            Err(e) => return Err((path, e)),
        }
    }
    Err((
        dir.join(filename),
        io::Error::new(io::ErrorKind::AlreadyExists, "no free filename"),
    ))
}

/// Create `path` exclusively and fill it. A failed fill removes the partial file.
fn write_new(path: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = fill(&mut file).and_then(|()| file.sync_all());
    if let Err(e) = written {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            log::warn!("Failed to remove partial file {}: {}", path.display(), cleanup);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:o}", meta.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> Option<String> {
    None
}

/// Human-readable size with up to two decimals: `1536` → `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", (value * 100.0).round() / 100.0);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{Channel, FormData, LifecycleState};
    use chrono::TimeZone;
    use serde_json::json;

    fn storage(root: &Path) -> DocumentStorage {
        DocumentStorage::new(&PipelineConfig::for_storage_root(root, "secret"))
    }

    fn record(session: &str) -> ApplicationRecord {
        ApplicationRecord {
            session_id: session.to_string(),
            reference_code: Some("BZ/0001".to_string()),
            channel: Channel::MobileApp,
            current_step: LifecycleState::Approved,
            expires_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 5, 9, 10, 0, 0).unwrap(),
            form_data: FormData::default(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.pdf");

        let result = write_new(&path, |file| {
            file.write_all(b"%PDF-1.4\n")?;
            Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"))
        });
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WriteZero);
        assert!(!path.exists());

        // The name is free again.
        write_new(&path, |file| file.write_all(b"ok")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"ok");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1024 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 1), "5 MB");
    }

    #[test]
    fn test_filename_layout_and_uniqueness() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 13, 4, 5).unwrap();
        let a = DocumentStorage::generate_filename(&record("sess-a"), now);
        let b = DocumentStorage::generate_filename(&record("sess-b"), now);
        assert!(a.starts_with("application_BZ_0001_2026-06-01_13-04-05_"));
        assert!(a.ends_with(".pdf"));
        assert_ne!(a, b);
        assert_eq!(
            DocumentStorage::relative_dir(&record("s")),
            "pdfs/2026/05/mobile_app"
        );
    }

    #[test]
    fn test_store_retrieve_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let info = storage
            .store_document(b"%PDF-1.7 test", &record("sess-1"), json!({ "k": "v" }))
            .unwrap();

        assert_eq!(info.size, 13);
        assert!(info.url.contains("/api/documents/download?token="));
        let payload = storage.validate_access_token(&info.access_token).unwrap();
        assert_eq!(payload.path, info.path);

        assert_eq!(
            storage.retrieve_document(&info.path).as_deref(),
            Some(&b"%PDF-1.7 test"[..])
        );
        assert!(storage.file_statistics(&info.path).is_some());
        assert!(storage.delete_document(&info.path));
        assert!(storage.delete_document(&info.path));
        assert!(storage.retrieve_document(&info.path).is_none());
    }

    #[test]
    fn test_same_second_store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 13, 4, 5).unwrap();

        let first = storage
            .store_document_at(b"first", &record("sess-1"), Value::Null, now)
            .unwrap();
        let second = storage
            .store_document_at(b"second", &record("sess-1"), Value::Null, now)
            .unwrap();

        assert_ne!(first.path, second.path);
        assert!(second.filename.ends_with("-1.pdf"));
        assert_eq!(storage.retrieve_document(&first.path).unwrap(), b"first");
        assert_eq!(storage.retrieve_document(&second.path).unwrap(), b"second");
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert!(storage.resolve("../etc/passwd").is_none());
        assert!(storage.resolve("/etc/passwd").is_none());
        assert!(storage.resolve("").is_none());
        assert!(storage.retrieve_document("pdfs/../../x").is_none());
        assert!(!storage.delete_document("../x"));
    }

    #[test]
    fn test_statistics_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert_eq!(storage.storage_statistics().average_size_human, "0 B");

        storage
            .store_document(&[0u8; 100], &record("sess-1"), Value::Null)
            .unwrap();
        storage
            .store_document(&[0u8; 300], &record("sess-2"), Value::Null)
            .unwrap();

        let stats = storage.storage_statistics();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_size, 400);
        assert_eq!(stats.average_size, 200);

        let later = SystemTime::now() + StdDuration::from_secs(60);
        assert_eq!(storage.cleanup_older_than_at(30, later), 0);
        assert_eq!(storage.cleanup_older_than_at(0, later), 2);
        assert_eq!(storage.cleanup_older_than_at(0, later), 0);
    }
}
