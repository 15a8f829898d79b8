use crate::error::AgentError;
use crate::transport::message::TimeBudget;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Transfer direction relative to the backup store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// A username/password pair used to access a file share.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareCredential {
    pub user_name: String,
    pub password: String,
}

impl std::fmt::Debug for ShareCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareCredential")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the copier authenticates against a file share.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "access_type")]
pub enum FileShareAccess {
    None,
    DomainUser {
        primary: ShareCredential,
        #[serde(default)]
        secondary: Option<ShareCredential>,
        #[serde(default)]
        is_password_encrypted: bool,
    },
}

/// Backup store targeted by a job, one variant per store kind.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum StoreLocation {
    AzureBlob {
        connection_string: String,
        #[serde(default)]
        is_connection_string_encrypted: bool,
        container_name: String,
        #[serde(default)]
        base_folder_path: String,
    },
    DsmsAzureBlob {
        credentials_source_location: String,
        container_name: String,
        #[serde(default)]
        base_folder_path: String,
    },
    FileShare {
        share_path: String,
        access: FileShareAccess,
    },
}

impl StoreLocation {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StoreLocation::AzureBlob { .. } => "AzureBlob",
            StoreLocation::DsmsAzureBlob { .. } => "DsmsAzureBlob",
            StoreLocation::FileShare { .. } => "FileShare",
        }
    }

    /// Returns the name of the first required field that is empty.
    fn first_missing_field(&self) -> Option<&'static str> {
        match self {
            StoreLocation::AzureBlob {
                connection_string,
                container_name,
                ..
            } => {
                if connection_string.is_empty() {
                    Some("connection_string")
                } else if container_name.is_empty() {
                    Some("container_name")
                } else {
                    None
                }
            }
            StoreLocation::DsmsAzureBlob {
                credentials_source_location,
                container_name,
                ..
            } => {
                if credentials_source_location.is_empty() {
                    Some("credentials_source_location")
                } else if container_name.is_empty() {
                    Some("container_name")
                } else {
                    None
                }
            }
            StoreLocation::FileShare { share_path, access } => {
                if share_path.is_empty() {
                    return Some("share_path");
                }
                match access {
                    FileShareAccess::None => None,
                    FileShareAccess::DomainUser {
                        primary, secondary, ..
                    } => {
                        if primary.user_name.is_empty() || primary.password.is_empty() {
                            Some("primary credential")
                        } else if secondary
                            .as_ref()
                            .is_some_and(|c| c.user_name.is_empty() || c.password.is_empty())
                        {
                            Some("secondary credential")
                        } else {
                            None
                        }
                    }
                }
            }
        }
    }
}

// Connection strings and passwords never reach Debug output.
impl std::fmt::Debug for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLocation::AzureBlob {
                is_connection_string_encrypted,
                container_name,
                base_folder_path,
                ..
            } => f
                .debug_struct("AzureBlob")
                .field("connection_string", &"<redacted>")
                .field(
                    "is_connection_string_encrypted",
                    is_connection_string_encrypted,
                )
                .field("container_name", container_name)
                .field("base_folder_path", base_folder_path)
                .finish(),
            StoreLocation::DsmsAzureBlob {
                credentials_source_location,
                container_name,
                base_folder_path,
            } => f
                .debug_struct("DsmsAzureBlob")
                .field("credentials_source_location", credentials_source_location)
                .field("container_name", container_name)
                .field("base_folder_path", base_folder_path)
                .finish(),
            StoreLocation::FileShare { share_path, access } => f
                .debug_struct("FileShare")
                .field("share_path", share_path)
                .field("access", access)
                .finish(),
        }
    }
}

/// Immutable description of one copy request.
///
/// Only constructible through [`JobDescriptor::new`], which rejects empty
/// required fields. Everything downstream may therefore treat a violated
/// invariant as a programming error.
///
/// The timeout is fixed as a deadline at construction, so time spent
/// waiting for a queue slot counts against it.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    direction: Direction,
    store: StoreLocation,
    source_path: String,
    target_folder: String,
    backup_metadata_file: Option<String>,
    activity_id: Uuid,
    budget: TimeBudget,
}

impl JobDescriptor {
    pub fn new(
        direction: Direction,
        store: StoreLocation,
        source_path: impl Into<String>,
        target_folder: impl Into<String>,
        backup_metadata_file: Option<String>,
        activity_id: Uuid,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let job = Self {
            direction,
            store,
            source_path: source_path.into(),
            target_folder: target_folder.into(),
            backup_metadata_file: backup_metadata_file.filter(|f| !f.is_empty()),
            activity_id,
            budget: TimeBudget::new(timeout),
        };

        match job.first_missing_field() {
            Some(field) => Err(AgentError::InvalidArgument(format!(
                "{} {:?} job is missing {}",
                job.store.kind_name(),
                job.direction,
                field
            ))),
            None => Ok(job),
        }
    }

    fn first_missing_field(&self) -> Option<&'static str> {
        if let Some(field) = self.store.first_missing_field() {
            return Some(field);
        }
        if self.source_path.is_empty() {
            return Some("source_path");
        }
        if self.target_folder.is_empty() {
            return Some("target_folder");
        }
        if self.direction == Direction::Upload && self.backup_metadata_file.is_none() {
            return Some("backup_metadata_file");
        }
        None
    }

    /// Fatal guard for code paths that rely on the constructor invariant.
    pub(crate) fn assert_valid(&self) {
        if let Some(field) = self.first_missing_field() {
            panic!(
                "invariant violated: {} job {} reached the copier without {}",
                self.store.kind_name(),
                self.activity_id,
                field
            );
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn store(&self) -> &StoreLocation {
        &self.store
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn target_folder(&self) -> &str {
        &self.target_folder
    }

    pub fn backup_metadata_file(&self) -> Option<&str> {
        self.backup_metadata_file.as_deref()
    }

    pub fn activity_id(&self) -> Uuid {
        self.activity_id
    }

    /// Time left before the deadline, or `Timeout` once it has passed.
    pub fn remaining(&self) -> Result<Duration, AgentError> {
        self.budget.check()
    }

    /// Copier operation name for this job, e.g. `AzureBlobStoreUpload`.
    pub fn operation_name(&self) -> &'static str {
        operation_name(&self.store, self.direction)
    }
}

pub fn operation_name(store: &StoreLocation, direction: Direction) -> &'static str {
    match (store, direction) {
        (StoreLocation::AzureBlob { .. }, Direction::Upload) => "AzureBlobStoreUpload",
        (StoreLocation::AzureBlob { .. }, Direction::Download) => "AzureBlobStoreDownload",
        (StoreLocation::DsmsAzureBlob { .. }, Direction::Upload) => "DsmsAzureBlobStoreUpload",
        (StoreLocation::DsmsAzureBlob { .. }, Direction::Download) => "DsmsAzureBlobStoreDownload",
        (StoreLocation::FileShare { .. }, Direction::Upload) => "FileShareUpload",
        (StoreLocation::FileShare { .. }, Direction::Download) => "FileShareDownload",
    }
}
