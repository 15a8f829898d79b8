//! Backup Module Tests
//!
//! ## Test Scopes
//! - **Aggregate state**: exactly-once completion, last failure wins, any
//!   interleaving of completions.
//! - **Requests**: validation of upload / download bodies before any copier
//!   is started.
//! - **End to end** (unix only): messages driven through the aggregator into
//!   a scripted copier process.

#[cfg(test)]
mod tests {
    use crate::backup::aggregator::{BackupAggregator, FanOut};
    use crate::backup::protocol::{BackupReply, DownloadBackupRequest, UploadBackupRequest};
    use crate::config::{AgentConfig, ConfigStore, CopierConfig};
    use crate::copier::job::StoreLocation;
    use crate::copier::orchestrator::CopyOrchestrator;
    use crate::copier::queue::JobQueue;
    use crate::copier::registry::ProcessTable;
    use crate::error::AgentError;
    use crate::transport::message::{Message, TimeBudget, actions, actors};

    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn azure_store() -> StoreLocation {
        StoreLocation::AzureBlob {
            connection_string: "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5"
                .to_string(),
            is_connection_string_encrypted: false,
            container_name: "backups".to_string(),
            base_folder_path: "app/svc/partition".to_string(),
        }
    }

    fn aggregator_for(copier: CopierConfig) -> (Arc<BackupAggregator>, Arc<ProcessTable>) {
        let config = AgentConfig {
            node_id: "node-1".to_string(),
            node_instance: 1,
            bind: "127.0.0.1:0".parse().unwrap(),
            copier,
            nodes: vec![],
            hosts: vec![],
            partitions: vec![],
        };
        let store = ConfigStore::new(config);
        let queue = JobQueue::with_config(store.subscribe());
        let processes = ProcessTable::new();
        let orchestrator = CopyOrchestrator::new(store, queue, processes.clone());
        (BackupAggregator::new(orchestrator), processes)
    }

    fn upload_message(body: &UploadBackupRequest) -> Message {
        Message::new(
            actors::BACKUP_RESTORE_PROXY,
            actions::UPLOAD_BACKUP,
            Uuid::new_v4(),
            serde_json::Value::Null,
        )
        .with_body(body)
        .unwrap()
    }

    fn download_message(body: &DownloadBackupRequest) -> Message {
        Message::new(
            actors::BACKUP_RESTORE_PROXY,
            actions::DOWNLOAD_BACKUP,
            Uuid::new_v4(),
            serde_json::Value::Null,
        )
        .with_body(body)
        .unwrap()
    }

    fn budget() -> TimeBudget {
        TimeBudget::new(Duration::from_secs(30))
    }

    // ============================================================
    // AGGREGATE STATE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_aggregate_completes_once_with_last_failure() {
        // ARRANGE
        let (fan_out, done) = FanOut::new(3);

        // ACT
        let first = fan_out.complete(0, Err(AgentError::CopierTimeout));
        let second = fan_out.complete(1, Ok(()));
        let third = fan_out.complete(
            2,
            Err(AgentError::Copier {
                code: 7,
                message: "later".to_string(),
            }),
        );
        let extra = fan_out.complete(3, Ok(()));

        // ASSERT
        assert!(!first && !second && third && !extra);
        assert_eq!(
            done.await.unwrap(),
            Err(AgentError::Copier {
                code: 7,
                message: "later".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_aggregate_success_when_nothing_failed() {
        let (fan_out, done) = FanOut::new(2);

        fan_out.complete(1, Ok(()));
        fan_out.complete(0, Ok(()));

        assert_eq!(done.await.unwrap(), Ok(()));
        assert_eq!(fan_out.completed(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_aggregate_concurrent_completions_complete_exactly_once() {
        const TOTAL: usize = 64;
        let (fan_out, done) = FanOut::new(TOTAL);
        let winners = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..TOTAL {
            let fan_out = fan_out.clone();
            let winners = winners.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                let result = if index % 3 == 0 {
                    Err(AgentError::Io(format!("location {}", index)))
                } else {
                    Ok(())
                };
                if fan_out.complete(index, result) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(fan_out.completed(), TOTAL);
        assert!(matches!(done.await.unwrap(), Err(AgentError::Io(_))));
    }

    #[tokio::test]
    async fn test_aggregate_reports_when_sub_job_vanishes() {
        let (fan_out, done) = FanOut::new(2);
        fan_out.complete(0, Ok(()));
        drop(fan_out);

        assert!(done.await.is_err());
    }

    // ============================================================
    // REQUEST VALIDATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_download_without_locations_is_rejected() {
        let (aggregator, processes) = aggregator_for(CopierConfig::default());
        let request = DownloadBackupRequest {
            store: azure_store(),
            backup_locations: vec![],
            destination_root: "/restore".to_string(),
            timeout_ms: None,
        };

        let reply = aggregator.process(&download_message(&request), budget()).await;

        assert!(reply.is_failure_reply());
        assert!(matches!(
            reply.into_result(),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(processes.is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_metadata_file_is_rejected() {
        let (aggregator, _) = aggregator_for(CopierConfig::default());
        let request = UploadBackupRequest {
            store: azure_store(),
            source_path: "/data/backup".to_string(),
            target_folder: "app/svc".to_string(),
            backup_metadata_file: String::new(),
            timeout_ms: None,
        };

        let reply = aggregator.process(&upload_message(&request), budget()).await;

        assert!(matches!(
            reply.into_result(),
            Err(AgentError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_message() {
        let (aggregator, _) = aggregator_for(CopierConfig::default());
        let message = Message::new(
            actors::BACKUP_RESTORE_PROXY,
            actions::UPLOAD_BACKUP,
            Uuid::new_v4(),
            serde_json::json!({ "unexpected": 1 }),
        );

        let reply = aggregator.process(&message, budget()).await;

        assert_eq!(reply.activity_id(), message.activity_id());
        assert!(matches!(
            reply.into_result(),
            Err(AgentError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_budget_is_timeout() {
        let (aggregator, _) = aggregator_for(CopierConfig::default());
        let request = UploadBackupRequest {
            store: azure_store(),
            source_path: "/data/backup".to_string(),
            target_folder: "app/svc".to_string(),
            backup_metadata_file: "backup.metadata".to_string(),
            timeout_ms: None,
        };

        let reply = aggregator
            .process(&upload_message(&request), TimeBudget::new(Duration::ZERO))
            .await;

        assert_eq!(reply.into_result().unwrap_err(), AgentError::Timeout);
    }

    // ============================================================
    // END TO END TESTS
    // ============================================================

    #[cfg(unix)]
    mod end_to_end {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Copier script; `body` sees `$ERR` (error details path) and `$SRC`
        /// (source path).
        fn copier(body: &str) -> (tempfile::TempDir, CopierConfig) {
            let dir = tempfile::tempdir().unwrap();
            let script = dir.path().join("copier.sh");

            let contents = format!(
                "#!/bin/sh\n\
                 for arg in \"$@\"; do\n\
                   case \"$arg\" in\n\
                     /errorDetailsFile:*) ERR=\"${{arg#/errorDetailsFile:}}\" ;;\n\
                     /sourceFileOrFolderPath:*) SRC=\"${{arg#/sourceFileOrFolderPath:}}\" ;;\n\
                   esac\n\
                 done\n\
                 {}\n",
                body
            );
            std::fs::write(&script, contents).unwrap();
            let mut perms = std::fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script, perms).unwrap();

            let config = CopierConfig {
                executable: script,
                work_dir: dir.path().join("work"),
                max_concurrent_jobs: 3,
                timeout_buffer_secs: 0,
                default_operation_timeout_secs: 60,
            };
            (dir, config)
        }

        fn work_dir_entries(config: &CopierConfig) -> usize {
            let temp_root: PathBuf = config.work_dir.join("BC");
            std::fs::read_dir(temp_root)
                .map(|entries| entries.count())
                .unwrap_or(0)
        }

        #[tokio::test]
        async fn test_upload_success_replies_success() {
            // ARRANGE
            let (_dir, config) = copier("exit 0");
            let (aggregator, processes) = aggregator_for(config.clone());
            let request = UploadBackupRequest {
                store: azure_store(),
                source_path: "/data/backup".to_string(),
                target_folder: "app/svc".to_string(),
                backup_metadata_file: "backup.metadata".to_string(),
                timeout_ms: None,
            };
            let message = upload_message(&request);

            // ACT
            let reply = aggregator.process(&message, budget()).await;

            // ASSERT
            assert_eq!(reply.action(), actions::REPLY);
            assert_eq!(reply.activity_id(), message.activity_id());
            let body: BackupReply = reply.decode_body().unwrap();
            assert_eq!(
                body,
                BackupReply {
                    operation: "AzureBlobStoreUpload".to_string(),
                    completed_jobs: 1,
                }
            );
            assert!(processes.is_empty());
            assert_eq!(work_dir_entries(&config), 0);
        }

        #[tokio::test]
        async fn test_download_reports_failed_location_after_all_finish() {
            // ARRANGE
            let (dir, config) = copier(
                "case \"$SRC\" in\n\
                   *loc-2) printf '5,disk full' > \"$ERR\"; exit 1 ;;\n\
                 esac\n\
                 sleep 0.2\n\
                 touch \"$SRC.done\"\n\
                 exit 0",
            );
            let (aggregator, processes) = aggregator_for(config.clone());
            let locations: Vec<String> = (1..=3)
                .map(|i| dir.path().join(format!("loc-{}", i)).display().to_string())
                .collect();
            let request = DownloadBackupRequest {
                store: azure_store(),
                backup_locations: locations.clone(),
                destination_root: "/restore".to_string(),
                timeout_ms: None,
            };

            // ACT
            let reply = aggregator.process(&download_message(&request), budget()).await;

            // ASSERT
            assert_eq!(
                reply.into_result().unwrap_err(),
                AgentError::Copier {
                    code: 5,
                    message: "disk full".to_string()
                }
            );
            // The slower successful locations had finished before the reply.
            assert!(PathBuf::from(format!("{}.done", locations[0])).exists());
            assert!(PathBuf::from(format!("{}.done", locations[2])).exists());
            assert!(processes.is_empty());
            assert_eq!(work_dir_entries(&config), 0);
        }

        #[tokio::test]
        async fn test_download_all_succeed() {
            let (dir, config) = copier("exit 0");
            let (aggregator, _) = aggregator_for(config);
            let request = DownloadBackupRequest {
                store: azure_store(),
                backup_locations: (1..=4)
                    .map(|i| dir.path().join(format!("loc-{}", i)).display().to_string())
                    .collect(),
                destination_root: "/restore".to_string(),
                timeout_ms: None,
            };

            let reply = aggregator.process(&download_message(&request), budget()).await;

            let body: BackupReply = reply.into_result().unwrap().decode_body().unwrap();
            assert_eq!(body.operation, "AzureBlobStoreDownload");
            assert_eq!(body.completed_jobs, 4);
        }

        #[tokio::test]
        async fn test_queued_download_jobs_share_the_caller_deadline() {
            // ARRANGE: one slot, three one-second copies, a 1.5s budget
            let (dir, mut config) = copier("sleep 1\nexit 0");
            config.max_concurrent_jobs = 1;
            let (aggregator, processes) = aggregator_for(config.clone());
            let request = DownloadBackupRequest {
                store: azure_store(),
                backup_locations: (1..=3)
                    .map(|i| dir.path().join(format!("loc-{}", i)).display().to_string())
                    .collect(),
                destination_root: "/restore".to_string(),
                timeout_ms: None,
            };
            let started = std::time::Instant::now();

            // ACT
            let reply = aggregator
                .process(
                    &download_message(&request),
                    TimeBudget::new(Duration::from_millis(1_500)),
                )
                .await;

            // ASSERT: queued jobs did not get a fresh timeout once dequeued
            let elapsed = started.elapsed();
            assert!(elapsed < Duration::from_millis(2_600), "took {:?}", elapsed);
            match reply.into_result() {
                Err(AgentError::Timeout) | Err(AgentError::CopierTimeout) => {}
                other => panic!("unexpected: {:?}", other),
            }
            assert!(processes.is_empty());
            assert_eq!(work_dir_entries(&config), 0);
        }

        #[tokio::test]
        async fn test_empty_location_fails_but_others_still_run() {
            let (dir, config) = copier("touch \"$SRC.done\"\nexit 0");
            let (aggregator, _) = aggregator_for(config);
            let good = dir.path().join("loc-1").display().to_string();
            let request = DownloadBackupRequest {
                store: azure_store(),
                backup_locations: vec![String::new(), good.clone()],
                destination_root: "/restore".to_string(),
                timeout_ms: None,
            };

            let reply = aggregator.process(&download_message(&request), budget()).await;

            assert!(matches!(
                reply.into_result(),
                Err(AgentError::InvalidArgument(_))
            ));
            assert!(PathBuf::from(format!("{}.done", good)).exists());
        }

        #[tokio::test]
        async fn test_copier_timeout_is_reported() {
            let (_dir, config) = copier("exec sleep 30");
            let (aggregator, processes) = aggregator_for(config.clone());
            let request = UploadBackupRequest {
                store: azure_store(),
                source_path: "/data/backup".to_string(),
                target_folder: "app/svc".to_string(),
                backup_metadata_file: "backup.metadata".to_string(),
                timeout_ms: Some(300),
            };

            let reply = aggregator.process(&upload_message(&request), budget()).await;

            assert_eq!(reply.into_result().unwrap_err(), AgentError::CopierTimeout);
            assert!(processes.is_empty());
            assert_eq!(work_dir_entries(&config), 0);
        }
    }
}
