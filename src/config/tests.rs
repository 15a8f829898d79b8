//! Configuration Tests
//!
//! Covers TOML parsing, defaults and change notification through the store.

#[cfg(test)]
mod tests {
    use crate::config::store::{parse_config, read_config};
    use crate::config::ConfigStore;
    use std::time::Duration;

    const SAMPLE: &str = r#"
node_id = "node-1"
node_instance = 7
bind = "127.0.0.1:7000"

[copier]
executable = "/opt/backup/BackupCopier.sh"
work_dir = "/var/lib/backup-agent"
max_concurrent_jobs = 2

[[nodes]]
node_id = "node-2"
instance = 11
address = "127.0.0.1:7001"

[[hosts]]
process_id = 4242
node_id = "node-1"
endpoint = "http://127.0.0.1:7100"

[[partitions]]
partition_id = "6a1a1a0e-3c1f-4b9e-9c67-3b1b1b1b1b1b"
replicas = [
    { node_id = "node-2" },
    { node_id = "node-1", primary = true },
]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(SAMPLE).unwrap();

        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.node_instance, 7);
        assert_eq!(config.copier.max_concurrent_jobs, 2);
        assert_eq!(config.copier.timeout_buffer_secs, 3);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.hosts[0].process_id, 4242);
        assert!(config.partitions[0].replicas[1].primary);
        assert!(!config.partitions[0].replicas[0].primary);
    }

    #[test]
    fn test_zero_throttle_is_rejected() {
        let raw = SAMPLE.replace("max_concurrent_jobs = 2", "max_concurrent_jobs = 0");
        assert!(parse_config(&raw).is_err());
    }

    #[test]
    fn test_read_config_reports_missing_file() {
        let err = read_config(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read config file"));
    }

    #[tokio::test]
    async fn test_update_notifies_only_on_change() {
        let config = parse_config(SAMPLE).unwrap();
        let store = ConfigStore::new(config.clone());
        let mut rx = store.subscribe();

        // Same config: no change event
        assert!(!store.update(config.clone()));

        let mut changed = config.clone();
        changed.copier.max_concurrent_jobs = 5;
        assert!(store.update(changed));

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("change event")
            .unwrap();
        assert_eq!(rx.borrow().copier.max_concurrent_jobs, 5);
        assert_eq!(store.current().copier.max_concurrent_jobs, 5);
    }

    #[tokio::test]
    async fn test_watch_file_publishes_reloaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        let mut rx = store.subscribe();
        let watcher = store.clone().watch_file(path.clone(), Duration::from_millis(20));

        std::fs::write(
            &path,
            SAMPLE.replace("max_concurrent_jobs = 2", "max_concurrent_jobs = 9"),
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("reload event")
            .unwrap();
        assert_eq!(rx.borrow().copier.max_concurrent_jobs, 9);

        watcher.abort();
    }
}
