//! Backup Upload / Download Module
//!
//! Turns `UploadBackupAction` and `DownloadBackupAction` messages into copier
//! runs. A download fans out to one copier per backup location and reports
//! a single outcome once every one of them has finished.

pub mod aggregator;
pub mod protocol;

#[cfg(test)]
mod tests;
