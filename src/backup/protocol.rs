//! Request and reply bodies of the upload / download actions.

use crate::copier::job::StoreLocation;

use serde::{Deserialize, Serialize};

/// Body of an `UploadBackupAction` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBackupRequest {
    pub store: StoreLocation,
    /// Local folder holding the backup to upload.
    pub source_path: String,
    /// Folder inside the store that receives the backup.
    pub target_folder: String,
    pub backup_metadata_file: String,
    /// Overrides the remaining time budget when smaller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Body of a `DownloadBackupAction` message.
///
/// Every entry of `backup_locations` is downloaded into `destination_root`
/// by its own copier run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadBackupRequest {
    pub store: StoreLocation,
    pub backup_locations: Vec<String>,
    pub destination_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Success reply body for both actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupReply {
    pub operation: String,
    pub completed_jobs: usize,
}
