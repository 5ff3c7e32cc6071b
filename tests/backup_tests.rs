mod common;

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use bedguard::{BackupKind, ErrorKind};
use common::{TestEnv, server};

fn touch(path: &Path, modified: SystemTime) {
    fs::write(path, b"backup").unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

/// Fills one pool with `count` files whose mtimes are shuffled against their names.
/// Returns the paths newest first.
fn seed_pool(dir: &Path, stem: &str, ext: &str, count: u64) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);

    let mut seeded: Vec<(SystemTime, PathBuf)> = (0..count)
        .map(|i| {
            let path = dir.join(format!("{stem}_backup_20260101_00000{i}.{ext}"));
            let modified = base + Duration::from_secs((i * 7 % count) * 60);
            touch(&path, modified);
            (modified, path)
        })
        .collect();
    seeded.sort_by(|a, b| b.0.cmp(&a.0));
    seeded.into_iter().map(|(_, p)| p).collect()
}

#[tokio::test]
async fn world_backup_is_named_after_world_and_timestamp() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    let result = manager.backup("Alpha", BackupKind::World, None).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.backups.len(), 1);

    let files = env.files_in(&env.backup_dir("Alpha"));
    assert_eq!(files.len(), 1);
    let name = &files[0];
    assert!(name.starts_with("Bedrock level_backup_"), "{name}");
    assert!(name.ends_with(".mcworld"), "{name}");
    assert_eq!(BackupKind::classify(name), Some(BackupKind::World));
}

#[tokio::test]
async fn backups_in_the_same_second_do_not_collide() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    for _ in 0..3 {
        let result = manager
            .backup("Alpha", BackupKind::PropertiesConfig, None)
            .await;
        assert!(result.success, "{}", result.message);
    }
    assert_eq!(env.files_in(&env.backup_dir("Alpha")).len(), 3);
}

#[tokio::test]
async fn world_backup_without_world_fails() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    fs::remove_dir_all(env.install_dir("Alpha").join("worlds")).unwrap();

    let result = env.manager().backup("Alpha", BackupKind::World, None).await;
    assert!(!result.success);
    assert_eq!(result.kind, Some(ErrorKind::Backup));
}

#[tokio::test]
async fn config_backup_rejects_paths_and_wrong_extensions() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    let escaped = manager
        .backup("Alpha", BackupKind::JsonConfig, Some("../other/permissions.json"))
        .await;
    assert_eq!(escaped.kind, Some(ErrorKind::Backup));

    let wrong = manager
        .backup("Alpha", BackupKind::JsonConfig, Some("server.properties"))
        .await;
    assert_eq!(wrong.kind, Some(ErrorKind::Backup));

    let json = manager
        .backup("Alpha", BackupKind::JsonConfig, Some("allowlist.json"))
        .await;
    assert!(json.success, "{}", json.message);
}

#[tokio::test]
async fn prune_keeps_newest_n_in_each_pool() {
    for keep in 0..=5u64 {
        let env = TestEnv::new();
        let dir = env.backup_dir("Alpha");
        let worlds = seed_pool(&dir, "Bedrock level", "mcworld", 4);
        let props = seed_pool(&dir, "server", "properties", 2);
        let jsons = seed_pool(&dir, "permissions", "json", 3);
        fs::write(dir.join("notes.txt"), b"not a backup").unwrap();

        let result = env.manager().prune_backups("Alpha", keep as i64).await;
        assert!(result.success, "{}", result.message);

        for pool in [&worlds, &props, &jsons] {
            let expected = pool.len().min(keep as usize);
            for (i, path) in pool.iter().enumerate() {
                assert_eq!(path.exists(), i < expected, "keep={keep} {}", path.display());
            }
        }
        assert!(dir.join("notes.txt").exists());
    }
}

#[tokio::test]
async fn prune_rejects_negative_keep() {
    let env = TestEnv::new();
    let dir = env.backup_dir("Alpha");
    let pool = seed_pool(&dir, "server", "properties", 2);

    let result = env.manager().prune_backups("Alpha", -1).await;
    assert!(!result.success);
    assert_eq!(result.kind, Some(ErrorKind::Backup));
    assert!(result.message.contains("non-negative"));
    assert!(pool.iter().all(|p| p.exists()));
}

#[tokio::test]
async fn prune_without_backup_dir_is_a_no_op() {
    let env = TestEnv::new();
    let result = env.manager().prune_backups("Nobody", 2).await;
    assert!(result.success, "{}", result.message);
    assert!(!env.backup_dir("Nobody").exists());
}

#[tokio::test]
async fn list_backups_is_newest_first() {
    let env = TestEnv::new();
    let dir = env.backup_dir("Alpha");
    let expected = seed_pool(&dir, "permissions", "json", 3);

    let result = env.manager().list_backups("Alpha", BackupKind::JsonConfig).await;
    assert!(result.success);
    let listed: Vec<PathBuf> = result.backups.into_iter().map(|r| r.path).collect();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn restore_outside_backup_root_is_rejected_before_mutation() {
    let env = TestEnv::new();
    let install = env.install("Alpha", "Bedrock level");
    let world = install.join("worlds").join("Bedrock level");
    let manager = env.manager();

    let outside = env.dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    let planted = outside.join("Bedrock level_backup_20260101_000000.mcworld");
    fs::write(&planted, b"not really a zip").unwrap();

    let relative = Path::new("../outside/Bedrock level_backup_20260101_000000.mcworld");
    for candidate in [planted.as_path(), relative] {
        let result = manager.restore("Alpha", candidate, BackupKind::World).await;
        assert!(!result.success);
        assert_eq!(result.kind, Some(ErrorKind::Restore));
        assert!(result.message.contains("outside"), "{}", result.message);
    }

    assert_eq!(env.files_in(&world), vec!["db", "levelname.txt"]);
    assert_eq!(env.files_in(&install.join("worlds")), vec!["Bedrock level"]);
}

#[tokio::test]
async fn world_restore_replaces_the_world() {
    let env = TestEnv::new();
    let install = env.install("Alpha", "Bedrock level");
    let world = install.join("worlds").join("Bedrock level");
    let manager = env.manager();

    let backup = manager.backup("Alpha", BackupKind::World, None).await;
    assert!(backup.success, "{}", backup.message);
    let archive = backup.backups[0].path.clone();

    fs::remove_file(world.join("levelname.txt")).unwrap();
    fs::write(world.join("stray.txt"), b"created after backup").unwrap();

    let result = manager.restore("Alpha", &archive, BackupKind::World).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(fs::read_to_string(world.join("levelname.txt")).unwrap(), "Bedrock level");
    assert!(!world.join("stray.txt").exists());
    assert_eq!(env.files_in(&install.join("worlds")), vec!["Bedrock level"]);
}

#[tokio::test]
async fn config_restore_overwrites_the_original_file() {
    let env = TestEnv::new();
    let install = env.install("Alpha", "Bedrock level");
    let manager = env.manager();
    let properties = install.join("server.properties");
    let original = fs::read_to_string(&properties).unwrap();

    let backup = manager
        .backup("Alpha", BackupKind::PropertiesConfig, None)
        .await;
    assert!(backup.success, "{}", backup.message);
    let file_name = backup.backups[0]
        .path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();

    fs::write(&properties, "level-name=Tampered\n").unwrap();

    // Relative paths resolve against the server's backup directory.
    let relative = PathBuf::from(&file_name);
    let result = manager
        .restore("Alpha", &relative, BackupKind::PropertiesConfig)
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(fs::read_to_string(&properties).unwrap(), original);
}

#[tokio::test]
async fn restore_checks_kind_against_file_name() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    let backup = manager
        .backup("Alpha", BackupKind::PropertiesConfig, None)
        .await;
    let path = backup.backups[0].path.clone();

    let result = manager.restore("Alpha", &path, BackupKind::World).await;
    assert_eq!(result.kind, Some(ErrorKind::Restore));
}

#[tokio::test]
async fn backup_all_skips_missing_standard_files() {
    let env = TestEnv::new();
    env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    let records = manager
        .backups()
        .backup_all(&server("Alpha"))
        .await
        .unwrap();
    let kinds: Vec<BackupKind> = records.iter().map(|r| r.kind).collect();
    // permissions.json was never created by the install.
    assert_eq!(
        kinds,
        vec![
            BackupKind::World,
            BackupKind::PropertiesConfig,
            BackupKind::JsonConfig
        ]
    );
}

#[tokio::test]
async fn restore_rejects_another_servers_backup() {
    let env = TestEnv::new();
    let alpha = env.install("Alpha", "Bedrock level");
    env.install("Beta", "Beta world");
    let manager = env.manager();
    let properties = alpha.join("server.properties");
    let original = fs::read_to_string(&properties).unwrap();

    let beta = manager
        .backup("Beta", BackupKind::PropertiesConfig, None)
        .await;
    assert!(beta.success, "{}", beta.message);
    let foreign = beta.backups[0].path.clone();
    let file_name = foreign.file_name().unwrap().to_owned();
    let sideways = Path::new("..").join("Beta").join(file_name);

    for candidate in [foreign.as_path(), sideways.as_path()] {
        let result = manager
            .restore("Alpha", candidate, BackupKind::PropertiesConfig)
            .await;
        assert!(!result.success);
        assert_eq!(result.kind, Some(ErrorKind::Restore));
        assert!(result.message.contains("outside"), "{}", result.message);
    }
    assert_eq!(fs::read_to_string(&properties).unwrap(), original);
}

#[tokio::test]
async fn world_names_that_leave_the_worlds_dir_are_refused() {
    let env = TestEnv::new();
    let install = env.install("Alpha", "Bedrock level");
    let manager = env.manager();

    let backup = manager.backup("Alpha", BackupKind::World, None).await;
    assert!(backup.success, "{}", backup.message);
    let archive = backup.backups[0].path.clone();
    let before = env.files_in(&install);

    for level in ["..", ".", "../Beta", "/tmp"] {
        fs::write(install.join("server.properties"), format!("level-name={level}\n")).unwrap();

        let restored = manager.restore("Alpha", &archive, BackupKind::World).await;
        assert!(!restored.success, "{level}");
        assert_eq!(restored.kind, Some(ErrorKind::Restore));
        assert!(restored.message.contains("server properties"), "{}", restored.message);

        let backed_up = manager.backup("Alpha", BackupKind::World, None).await;
        assert!(!backed_up.success, "{level}");
        assert_eq!(backed_up.kind, Some(ErrorKind::Backup));
    }

    assert_eq!(env.files_in(&install), before);
    assert_eq!(
        env.files_in(&install.join("worlds").join("Bedrock level")),
        vec!["db", "levelname.txt"]
    );
    assert_eq!(env.files_in(&env.backup_dir("Alpha")).len(), 1);
}
