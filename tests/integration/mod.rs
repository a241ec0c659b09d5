//! Integration tests for Bakker
//!
//! Tests real-world backup scenarios: repeated backups of an evolving
//! project, deduplication across checkpoints, permissions, symlinks and
//! corrupted storage.

use ::bakker::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// Test harness holding a source tree and a storage
pub struct BackupTestHarness {
    pub source_dir: TempDir,
    pub storage_dir: TempDir,
    pub storage: FileSystemStorage,
    pub file_generator: FileGenerator,
}

impl BackupTestHarness {
    /// Create a new test harness
    pub fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::init(storage_dir.path(), StorageConfig::default()).unwrap();

        Self {
            source_dir,
            storage_dir,
            storage,
            file_generator: FileGenerator::new(42),
        }
    }

    pub fn source(&self) -> &Path {
        self.source_dir.path()
    }

    /// Generate a nested project of text files
    pub fn generate_project(&mut self, config: ProjectConfig) {
        let root = self.source_dir.path().to_path_buf();
        self.generate_level(&root, 0, &config);
    }

    fn generate_level(&mut self, dir: &Path, depth: usize, config: &ProjectConfig) {
        for i in 0..config.files_per_dir {
            let content = self.file_generator.generate_content(config.max_file_size);
            fs::write(dir.join(format!("file_{}.txt", i)), content).unwrap();
        }

        if depth < config.max_depth {
            for i in 0..config.dirs_per_level {
                let sub = dir.join(format!("dir_{}", i));
                fs::create_dir_all(&sub).unwrap();
                self.generate_level(&sub, depth + 1, config);
            }
        }
    }

    /// Rewrite a random selection of existing files
    pub fn mutate_files(&mut self, count: usize, max_file_size: usize) -> Vec<PathBuf> {
        let files: Vec<PathBuf> = WalkDir::new(self.source_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        let mut mutated = Vec::new();
        for _ in 0..count.min(files.len()) {
            let index = self.file_generator.rng.random_range(0..files.len());
            let content = self.file_generator.generate_content(max_file_size);
            fs::write(&files[index], content).unwrap();
            mutated.push(files[index].clone());
        }
        mutated
    }

    /// Build and store the current source state
    pub fn backup(&self, name: Option<&str>) -> (Checkpoint, StoreReport) {
        let checkpoint = Checkpoint::build_checkpoint(self.source(), name).unwrap();
        let report = self.storage.store(self.source(), &checkpoint).unwrap();
        info!("Backed up {} ({} new blobs)", report.checkpoint_id, report.blobs_written);
        (checkpoint, report)
    }
}

/// Project generation parameters
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub max_depth: usize,
    pub dirs_per_level: usize,
    pub files_per_dir: usize,
    pub max_file_size: usize,
}

/// Seeded content generator
pub struct FileGenerator {
    rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate_content(&mut self, max_size: usize) -> Vec<u8> {
        let size = self.rng.random_range(1..=max_size.max(1));
        (0..size).map(|_| self.rng.random_range(b'a'..=b'z')).collect()
    }
}

/// Snapshot of a tree for comparison: relative path to (kind, mode, content)
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, (String, u32, Vec<u8>)> {
    let mut entries = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let metadata = fs::symlink_metadata(entry.path()).unwrap();

        let value = if metadata.file_type().is_symlink() {
            let target = fs::read_link(entry.path()).unwrap();
            ("symlink".to_string(), 0, target.to_string_lossy().into_owned().into_bytes())
        } else if metadata.is_file() {
            ("file".to_string(), mode(&metadata), fs::read(entry.path()).unwrap())
        } else {
            ("directory".to_string(), mode(&metadata), Vec::new())
        };
        entries.insert(relative, value);
    }

    entries
}

#[cfg(unix)]
fn mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode(_metadata: &fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_evolving_project_backups() {
        let mut harness = BackupTestHarness::new();
        harness.generate_project(ProjectConfig {
            max_depth: 2,
            dirs_per_level: 3,
            files_per_dir: 4,
            max_file_size: 2_000,
        });

        let mut history = Vec::new();
        for i in 0..6 {
            let (checkpoint, report) = harness.backup(Some(format!("round_{}", i).as_str()));
            history.push((report.checkpoint_id, snapshot_tree(harness.source()), checkpoint));
            harness.mutate_files(5, 2_000);
        }

        assert_eq!(harness.storage.retrieve_checkpoint_ids().unwrap().len(), history.len());

        // Every historical state comes back exactly
        for (id, expected, checkpoint) in &history {
            let restore_dir = TempDir::new().unwrap();
            let target = restore_dir.path().join("restored");
            harness.storage.retrieve(&target, id).unwrap();

            assert_eq!(&snapshot_tree(&target), expected, "checkpoint {} differs", id);

            let recaptured = Checkpoint::build_checkpoint(&target, None).unwrap();
            assert_eq!(recaptured.root().checksum(), checkpoint.root().checksum());
        }

        assert!(logs_contain("Restored checkpoint"));
    }

    #[test]
    fn test_deduplication_across_checkpoints() {
        let harness = BackupTestHarness::new();
        fs::create_dir_all(harness.source().join("a")).unwrap();
        fs::create_dir_all(harness.source().join("b")).unwrap();
        fs::write(harness.source().join("a/shared.txt"), "shared content").unwrap();
        fs::write(harness.source().join("b/shared.txt"), "shared content").unwrap();
        fs::write(harness.source().join("unique.txt"), "unique").unwrap();

        let (first, report) = harness.backup(Some("first"));
        assert_eq!(report.blobs_written, 2);

        // Identical sub-trees hash identically
        let a = first.root().children().iter().find(|n| n.name() == "a").unwrap();
        let b = first.root().children().iter().find(|n| n.name() == "b").unwrap();
        assert_eq!(a.checksum(), b.checksum());

        fs::write(harness.source().join("new.txt"), "new").unwrap();
        let (_second, report) = harness.backup(Some("second"));
        assert_eq!(report.blobs_written, 1);
        assert_eq!(report.blobs_reused, 3);

        let stats = harness.storage.stats().unwrap();
        assert_eq!(stats.blob_count, 3);
        assert_eq!(stats.checkpoint_count, 2);
    }

    #[test]
    fn test_store_is_idempotent() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("file.txt"), "content").unwrap();

        let checkpoint = Checkpoint::build_checkpoint(harness.source(), Some("same")).unwrap();
        let first = harness.storage.store(harness.source(), &checkpoint).unwrap();
        let blobs_before = harness.storage.list_blobs().unwrap();

        let second = harness.storage.store(harness.source(), &checkpoint).unwrap();
        assert_eq!(first.checkpoint_id, second.checkpoint_id);
        assert_eq!(second.blobs_written, 0);
        assert_eq!(harness.storage.list_blobs().unwrap(), blobs_before);
        assert_eq!(harness.storage.retrieve_checkpoint_ids().unwrap(), vec![first.checkpoint_id]);
    }

    #[test]
    fn test_checkpoint_ids_are_listed_sorted() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("file.txt"), "content").unwrap();

        let times = ["2024-03-01T00:00:00", "2024-01-01T00:00:00", "2024-02-01T00:00:00.5"];
        let mut ids = Vec::new();
        for time in times {
            let time = utils::parse_timestamp(time).unwrap();
            let checkpoint = Checkpoint::build_checkpoint_at(harness.source(), None, time).unwrap();
            ids.push(harness.storage.store(harness.source(), &checkpoint).unwrap().checkpoint_id);
        }

        ids.sort();
        assert_eq!(harness.storage.retrieve_checkpoint_ids().unwrap(), ids);
        assert!(ids[0].ends_with("2024-01-01T00:00:00.000000"));
        assert!(ids[1].ends_with("2024-02-01T00:00:00.500000"));
    }

    #[test]
    fn test_restore_over_existing_content() {
        let harness = BackupTestHarness::new();
        fs::create_dir_all(harness.source().join("dir")).unwrap();
        fs::write(harness.source().join("dir/file.txt"), "from backup").unwrap();
        fs::write(harness.source().join("was_dir"), "now a file").unwrap();
        let (_checkpoint, report) = harness.backup(None);

        let restore_dir = TempDir::new().unwrap();
        let target = restore_dir.path();
        fs::create_dir_all(target.join("dir")).unwrap();
        fs::write(target.join("dir/file.txt"), "stale").unwrap();
        fs::create_dir_all(target.join("was_dir/nested")).unwrap();
        fs::write(target.join("extra.txt"), "untouched").unwrap();

        harness.storage.retrieve(target, &report.checkpoint_id).unwrap();
        harness.storage.retrieve(target, &report.checkpoint_id).unwrap();

        assert_eq!(fs::read_to_string(target.join("dir/file.txt")).unwrap(), "from backup");
        assert_eq!(fs::read_to_string(target.join("was_dir")).unwrap(), "now a file");
        assert_eq!(fs::read_to_string(target.join("extra.txt")).unwrap(), "untouched");
    }

    #[test]
    fn test_missing_blob_aborts_without_writes() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("keep.txt"), "keep").unwrap();
        fs::write(harness.source().join("lost.txt"), "lost").unwrap();
        let (checkpoint, report) = harness.backup(None);

        let lost = checkpoint.root().children().iter().find(|n| n.name() == "lost.txt").unwrap();
        fs::remove_file(harness.storage.blob_path(&lost.checksum())).unwrap();

        let restore_dir = TempDir::new().unwrap();
        let target = restore_dir.path().join("restored");
        let result = harness.storage.retrieve(&target, &report.checkpoint_id);

        match result {
            Err(err @ BakkerError::MissingBlob { .. }) => {
                assert!(err.is_corruption());
                assert!(err.to_string().contains(&lost.checksum().to_string()));
            }
            other => panic!("expected missing blob, got {:?}", other),
        }
        assert!(!target.exists());
    }

    #[test]
    fn test_missing_blob_for_hand_written_entry() {
        let harness = BackupTestHarness::new();
        let id = "abc123_2024-01-01T00:00:00.000000";
        let document = r#"{
            "root": {"name": "", "checksum": "1111111111111111", "permissions": 493, "type": "directory",
                     "children": [
                        {"name": "data.bin", "checksum": "00000000000000ff", "permissions": 420, "type": "file"}
                     ]},
            "time": "2024-01-01T00:00:00.000000",
            "name": null
        }"#;
        fs::write(harness.storage_dir.path().join("checkpoints").join(format!("{}.json", id)), document).unwrap();

        assert!(harness.storage.contains_checkpoint(id));
        let restore_dir = TempDir::new().unwrap();
        assert!(matches!(
            harness.storage.retrieve(restore_dir.path(), id),
            Err(BakkerError::MissingBlob { checksum, .. }) if checksum == "00000000000000ff"
        ));
    }

    #[test]
    fn test_corrupt_catalog_entry() {
        let harness = BackupTestHarness::new();
        fs::write(harness.storage_dir.path().join("checkpoints/garbage.json"), b"\xff\xfe not a document").unwrap();

        let err = harness.storage.load_checkpoint("garbage").unwrap_err();
        assert!(matches!(err, BakkerError::CorruptCatalogEntry { .. }));
        assert!(err.is_corruption());
    }

    /// Write a catalog entry whose root holds `children` (raw JSON node objects)
    fn write_catalog_entry(harness: &BackupTestHarness, id: &str, children: &[String]) {
        let document = format!(
            r#"{{"root": {{"name": "", "checksum": "1111111111111111", "permissions": 493, "type": "directory",
                          "children": [{}]}},
                "time": "2024-01-01T00:00:00.000000", "name": null}}"#,
            children.join(",")
        );
        fs::write(harness.storage_dir.path().join("checkpoints").join(format!("{}.json", id)), document).unwrap();
    }

    fn file_record(name: &str, checksum: &Checksum) -> String {
        format!(
            r#"{{"name": {}, "checksum": "{}", "permissions": 420, "type": "file"}}"#,
            serde_json::to_string(name).unwrap(),
            checksum
        )
    }

    #[test]
    fn test_unsafe_child_names_rejected_on_restore() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("payload.txt"), "payload").unwrap();
        let (checkpoint, _report) = harness.backup(None);
        let payload = checkpoint.root().children()[0].checksum();
        assert!(harness.storage.blob_exists(&payload));

        let cases = [
            ("escape", vec![file_record("../escaped.txt", &payload)]),
            ("empty", vec![file_record("", &payload)]),
            ("nested", vec![file_record("a/b", &payload)]),
            ("dot", vec![file_record(".", &payload)]),
            ("duplicate", vec![file_record("same.txt", &payload), file_record("same.txt", &payload)]),
        ];

        for (id, children) in cases {
            write_catalog_entry(&harness, id, &children);

            let restore_dir = TempDir::new().unwrap();
            let target = restore_dir.path().join("dest");
            fs::create_dir_all(&target).unwrap();
            fs::write(target.join("precious.txt"), "precious").unwrap();

            match harness.storage.retrieve(&target, id) {
                Err(err @ BakkerError::CorruptCatalogEntry { .. }) => {
                    assert!(err.is_corruption());
                    if let BakkerError::CorruptCatalogEntry { checkpoint_id, .. } = err {
                        assert_eq!(checkpoint_id, id);
                    }
                }
                other => panic!("{}: expected corrupt entry, got {:?}", id, other),
            }

            assert!(!restore_dir.path().join("escaped.txt").exists(), "{}: wrote outside destination", id);
            assert_eq!(fs::read_to_string(target.join("precious.txt")).unwrap(), "precious", "{}", id);
            assert_eq!(fs::read_dir(&target).unwrap().count(), 1, "{}: destination was written", id);
        }
    }

    #[test]
    fn test_storage_inside_source_is_not_captured() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path();
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(source.join("README.md"), "# Project").unwrap();

        // Default CLI layout: `.bakker` next to the files being backed up
        let storage = FileSystemStorage::init_or_open(&source.join(".bakker"), StorageConfig::default()).unwrap();

        let first = Checkpoint::build_checkpoint_with(source, Some("first"), None, &storage.build_options()).unwrap();
        assert!(first.root().children().iter().all(|n| n.name() != ".bakker"));
        let first_report = storage.store(source, &first).unwrap();
        assert_eq!(first_report.blobs_written, 2);

        // The catalog now holds a document, which must not leak into the next backup
        let second = Checkpoint::build_checkpoint_with(source, Some("second"), None, &storage.build_options()).unwrap();
        assert_eq!(second.root().checksum(), first.root().checksum());
        let second_report = storage.store(source, &second).unwrap();
        assert_eq!(second_report.blobs_written, 0);

        let restore_dir = TempDir::new().unwrap();
        let target = restore_dir.path().join("restored");
        storage.retrieve(&target, &second_report.checkpoint_id).unwrap();
        assert!(!target.join(".bakker").exists());
        assert_eq!(fs::read_to_string(target.join("src/main.rs")).unwrap(), "fn main() {}");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let harness = BackupTestHarness::new();
        let source = harness.source();
        fs::create_dir_all(source.join("locked")).unwrap();
        fs::write(source.join("locked/secret.txt"), "secret").unwrap();
        fs::write(source.join("script.sh"), "#!/bin/sh\necho hi\n").unwrap();
        fs::write(source.join("readonly.txt"), "ro").unwrap();

        fs::set_permissions(source.join("script.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(source.join("readonly.txt"), fs::Permissions::from_mode(0o444)).unwrap();
        fs::set_permissions(source.join("locked/secret.txt"), fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o500)).unwrap();

        let (_checkpoint, report) = harness.backup(None);
        let restore_dir = TempDir::new().unwrap();
        let target = restore_dir.path().join("restored");
        harness.storage.retrieve(&target, &report.checkpoint_id).unwrap();

        let mode_of = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode_of(&target.join("script.sh")), 0o755);
        assert_eq!(mode_of(&target.join("readonly.txt")), 0o444);
        assert_eq!(mode_of(&target.join("locked/secret.txt")), 0o600);
        assert_eq!(mode_of(&target.join("locked")), 0o500);

        // Restoring again works through the read-only directory
        harness.storage.retrieve(&target, &report.checkpoint_id).unwrap();
        assert_eq!(fs::read_to_string(target.join("locked/secret.txt")).unwrap(), "secret");

        // Let TempDir clean up
        fs::set_permissions(target.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_restored_verbatim() {
        let harness = BackupTestHarness::new();
        let source = harness.source();
        fs::create_dir_all(source.join("real")).unwrap();
        fs::write(source.join("real/target.txt"), "target").unwrap();
        std::os::unix::fs::symlink("real/target.txt", source.join("relative_link")).unwrap();
        std::os::unix::fs::symlink("/nonexistent/absolute", source.join("dangling_link")).unwrap();
        std::os::unix::fs::symlink("real", source.join("dir_link")).unwrap();

        let (checkpoint, report) = harness.backup(None);
        assert_eq!(checkpoint.summary().symlinks, 3);

        let restore_dir = TempDir::new().unwrap();
        let target = restore_dir.path().join("restored");
        let result = harness.storage.retrieve(&target, &report.checkpoint_id).unwrap();
        assert_eq!(result.symlinks_restored, 3);

        assert_eq!(fs::read_link(target.join("relative_link")).unwrap(), PathBuf::from("real/target.txt"));
        assert_eq!(fs::read_link(target.join("dangling_link")).unwrap(), PathBuf::from("/nonexistent/absolute"));
        assert_eq!(fs::read_link(target.join("dir_link")).unwrap(), PathBuf::from("real"));
        assert!(fs::symlink_metadata(target.join("dir_link")).unwrap().file_type().is_symlink());

        // Restoring again replaces the links in place
        harness.storage.retrieve(&target, &report.checkpoint_id).unwrap();
        assert_eq!(snapshot_tree(&target), snapshot_tree(source));
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn test_unsupported_entries_skipped() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("regular.txt"), "regular").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(harness.source().join("app.sock")).unwrap();

        let (checkpoint, _report) = harness.backup(None);
        assert!(checkpoint.root().children().iter().all(|n| n.name() != "app.sock"));
        assert_eq!(checkpoint.summary().files, 1);
        assert!(logs_contain("unsupported file type"));
    }

    #[test]
    fn test_reopened_storage_sees_checkpoints() {
        let harness = BackupTestHarness::new();
        fs::write(harness.source().join("file.txt"), "persisted").unwrap();
        let (checkpoint, report) = harness.backup(Some("persisted"));

        let reopened = FileSystemStorage::open(harness.storage_dir.path()).unwrap();
        assert!(reopened.contains_checkpoint(&report.checkpoint_id));
        assert_eq!(reopened.load_checkpoint(&report.checkpoint_id).unwrap(), checkpoint);

        let meta = CheckpointMeta::parse(&report.checkpoint_id).unwrap();
        assert_eq!(meta, checkpoint.meta());
        assert_eq!(meta.name(), Some("persisted"));
    }
}
