//! Copier command-line construction.
//!
//! Every argument is a `/name:"value"` token. The store-kind specific
//! arguments come first, followed by the common ones (operation, working
//! directory, error-details file, timeout). Each argument knows whether it
//! carries a secret so the same list renders both the real command line and
//! the log-safe one.

use super::job::{Direction, FileShareAccess, JobDescriptor, StoreLocation};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;
use std::time::Duration;

/// Placeholder substituted for secret values in the log-safe command line.
pub const REDACTED: &str = "****";

/// Copier time unit: 100 nanoseconds.
pub const NANOS_PER_TICK: u128 = 100;

pub mod keys {
    pub const OPERATION: &str = "/operation";
    pub const WORKING_DIR: &str = "/workingDir";
    pub const ERROR_DETAILS_FILE: &str = "/errorDetailsFile";
    pub const TIMEOUT: &str = "/timeout";

    pub const CONNECTION_STRING: &str = "/connectionString";
    pub const IS_CONNECTION_STRING_ENCRYPTED: &str = "/isconnectionStringEncrypted";
    pub const STORAGE_CREDENTIALS_SOURCE_LOCATION: &str = "/storageCredentialsSourceLocation";
    pub const CONTAINER_NAME: &str = "/containerName";
    pub const BACKUP_STORE_BASE_FOLDER_PATH: &str = "/backupStoreBaseFolderPath";

    pub const FILE_SHARE_ACCESS_TYPE: &str = "/fileShareAccessType";
    pub const IS_PASSWORD_ENCRYPTED: &str = "/isPasswordEncrypted";
    pub const FILE_SHARE_PATH: &str = "/fileSharePath";
    pub const PRIMARY_USER_NAME: &str = "/primaryUserName";
    pub const PRIMARY_PASSWORD: &str = "/primaryPassword";
    pub const SECONDARY_USER_NAME: &str = "/secondaryUserName";
    pub const SECONDARY_PASSWORD: &str = "/secondaryPassword";

    pub const SOURCE_FILE_OR_FOLDER_PATH: &str = "/sourceFileOrFolderPath";
    pub const TARGET_FOLDER_PATH: &str = "/targetFolderPath";
    pub const BACKUP_METADATA_FILE_PATH: &str = "/backupMetadataFilePath";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopierArg {
    pub name: &'static str,
    pub value: String,
    pub secret: bool,
}

impl CopierArg {
    fn plain(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            secret: false,
        }
    }

    fn secret(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            secret: true,
        }
    }

    /// The argv entry handed to the OS, `/name:value`.
    pub fn to_os_arg(&self) -> String {
        format!("{}:{}", self.name, self.value)
    }

    fn render(&self, redact: bool) -> String {
        let value = if redact && self.secret {
            REDACTED
        } else {
            self.value.as_str()
        };
        format!("{}:\"{}\"", self.name, value)
    }
}

/// A fully built copier invocation.
#[derive(Debug, Clone)]
pub struct CommandLine {
    program: String,
    args: Vec<CopierArg>,
}

impl CommandLine {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[CopierArg] {
        &self.args
    }

    pub fn os_args(&self) -> Vec<String> {
        self.args.iter().map(CopierArg::to_os_arg).collect()
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value.as_str())
    }

    /// The real command line. Never log this.
    pub fn command_line(&self) -> String {
        self.render(false)
    }

    /// The command line with every secret replaced by [`REDACTED`].
    pub fn log_safe(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        let mut line = format!("\"{}\"", self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.render(redact));
        }
        line
    }
}

/// Timeout handed to the copier: the caller's timeout minus `buffer`, so the
/// copier times out and reports cleanly before the caller gives up. Small
/// timeouts (not above twice the buffer) are passed through untouched.
pub fn adjust_timeout(raw: Duration, buffer: Duration) -> Duration {
    if raw > buffer * 2 {
        raw - buffer
    } else {
        raw
    }
}

pub fn to_ticks(timeout: Duration) -> u128 {
    timeout.as_nanos() / NANOS_PER_TICK
}

/// Store-kind specific arguments for `job`.
pub fn store_args(job: &JobDescriptor) -> Vec<CopierArg> {
    let mut args = Vec::new();

    match job.store() {
        StoreLocation::AzureBlob {
            connection_string,
            is_connection_string_encrypted,
            container_name,
            base_folder_path,
        } => {
            args.push(CopierArg::secret(keys::CONNECTION_STRING, connection_string));
            args.push(CopierArg::plain(
                keys::IS_CONNECTION_STRING_ENCRYPTED,
                is_connection_string_encrypted.to_string(),
            ));
            args.push(CopierArg::plain(keys::CONTAINER_NAME, container_name));
            args.push(CopierArg::plain(
                keys::BACKUP_STORE_BASE_FOLDER_PATH,
                base_folder_path,
            ));
        }
        StoreLocation::DsmsAzureBlob {
            credentials_source_location,
            container_name,
            base_folder_path,
        } => {
            args.push(CopierArg::plain(
                keys::STORAGE_CREDENTIALS_SOURCE_LOCATION,
                credentials_source_location,
            ));
            args.push(CopierArg::plain(keys::CONTAINER_NAME, container_name));
            args.push(CopierArg::plain(
                keys::BACKUP_STORE_BASE_FOLDER_PATH,
                base_folder_path,
            ));
        }
        StoreLocation::FileShare { share_path, access } => match access {
            FileShareAccess::None => {
                args.push(CopierArg::plain(keys::FILE_SHARE_ACCESS_TYPE, "None"));
                args.push(CopierArg::plain(keys::IS_PASSWORD_ENCRYPTED, "false"));
                args.push(CopierArg::plain(keys::FILE_SHARE_PATH, share_path));
            }
            FileShareAccess::DomainUser {
                primary,
                secondary,
                is_password_encrypted,
            } => {
                args.push(CopierArg::plain(keys::FILE_SHARE_ACCESS_TYPE, "DomainUser"));
                args.push(CopierArg::plain(
                    keys::IS_PASSWORD_ENCRYPTED,
                    is_password_encrypted.to_string(),
                ));
                args.push(CopierArg::plain(keys::FILE_SHARE_PATH, share_path));
                args.push(CopierArg::plain(keys::PRIMARY_USER_NAME, &primary.user_name));
                args.push(CopierArg::secret(
                    keys::PRIMARY_PASSWORD,
                    BASE64.encode(primary.password.as_bytes()),
                ));
                if let Some(secondary) = secondary {
                    args.push(CopierArg::plain(
                        keys::SECONDARY_USER_NAME,
                        &secondary.user_name,
                    ));
                    args.push(CopierArg::secret(
                        keys::SECONDARY_PASSWORD,
                        BASE64.encode(secondary.password.as_bytes()),
                    ));
                }
            }
        },
    }

    args.push(CopierArg::plain(
        keys::SOURCE_FILE_OR_FOLDER_PATH,
        job.source_path(),
    ));
    args.push(CopierArg::plain(keys::TARGET_FOLDER_PATH, job.target_folder()));

    if job.direction() == Direction::Upload
        && let Some(metadata_file) = job.backup_metadata_file()
    {
        args.push(CopierArg::plain(keys::BACKUP_METADATA_FILE_PATH, metadata_file));
    }

    args
}

/// Builds the complete command line for one copier run.
///
/// `timeout` is the already-adjusted copier timeout.
pub fn build_command_line(
    executable: &Path,
    job: &JobDescriptor,
    working_dir: &Path,
    error_details_file: &Path,
    timeout: Duration,
) -> CommandLine {
    job.assert_valid();

    let mut args = store_args(job);
    args.push(CopierArg::plain(keys::OPERATION, job.operation_name()));
    args.push(CopierArg::plain(
        keys::WORKING_DIR,
        working_dir.to_string_lossy(),
    ));
    args.push(CopierArg::plain(
        keys::ERROR_DETAILS_FILE,
        error_details_file.to_string_lossy(),
    ));
    args.push(CopierArg::plain(keys::TIMEOUT, to_ticks(timeout).to_string()));

    CommandLine {
        program: executable.to_string_lossy().into_owned(),
        args,
    }
}
