use std::fs;
use std::path::Path;

use tempfile::TempDir;
use titlemgr_core::{MediaType, SaveId, TitleId};
use titlemgr_ops::{dispatch, CancelHandle, Dispatcher, EngineConfig, ErrorPolicy};
use titlemgr_store::ticket::unsigned_ticket;
use titlemgr_store::{
    delete_all_pending_titles, delete_ext_save_data, delete_system_save_data, delete_tickets,
    install_tickets, ContentStore, StoreError,
};

fn seed_dir(path: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(path).unwrap();
    for (name, data) in files {
        let file = path.join(name);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, data).unwrap();
    }
}

fn store_with_tickets(temp: &TempDir, ids: &[u64]) -> ContentStore {
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    for id in ids {
        let ticket = unsigned_ticket(TitleId(*id));
        let mut install = store.begin_ticket_install(&ticket).unwrap();
        install.write_at(0, &ticket).unwrap();
        install.finish().unwrap();
    }
    store
}

#[test]
fn test_install_tickets_skips_bad_ticket_and_empty_file() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let incoming = temp.path().join("incoming");
    let a = unsigned_ticket(TitleId(0x0004_0000_0000_0a00));
    let c = unsigned_ticket(TitleId(0x0004_0000_0000_0c00));
    seed_dir(
        &incoming,
        &[
            ("a.tik", &a),
            ("b.tik", b"not a ticket"),
            ("c.TIK", &c),
            ("readme.txt", b"ignored"),
            ("z.tik", b""),
        ],
    );

    let descriptor = install_tickets(&store, &incoming, None).unwrap();
    assert_eq!(descriptor.item_count(), 4);

    let report = dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.progress.is_clean_finish());
    assert_eq!(report.progress.processed, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.summary(), "Copied 3 items, 1 failed");

    let installed: Vec<TitleId> = report
        .descriptor
        .backend()
        .installed()
        .iter()
        .map(|t| t.title_id)
        .collect();
    assert_eq!(installed, vec![TitleId(0x0004_0000_0000_0a00), TitleId(0x0004_0000_0000_0c00)]);

    let listed = store.list_tickets().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].size, a.len() as u64);
}

#[test]
fn test_install_tickets_stops_when_last_ticket_fails() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let incoming = temp.path().join("incoming");
    seed_dir(
        &incoming,
        &[
            ("a.tik", &unsigned_ticket(TitleId(1))),
            ("b.tik", b"short"),
        ],
    );

    let descriptor = install_tickets(&store, &incoming, None).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.progress.premature_stop);
    assert!(!report.cancelled);
    assert_eq!(report.progress.processed, 1);
    assert_eq!(report.summary(), "Copied 1 of 2 items, stopped after an error");
    assert_eq!(store.list_tickets().unwrap().len(), 1);
}

#[test]
fn test_install_with_small_blocks_still_reads_header() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let incoming = temp.path().join("incoming");
    let ticket = unsigned_ticket(TitleId(0x42));
    seed_dir(&incoming, &[("t.tik", &ticket)]);

    // The first block is too small to hold the header.
    let dispatcher = Dispatcher::new(EngineConfig::builder().block_size(64usize).build().unwrap());
    let descriptor = install_tickets(&store, &incoming, Some(ErrorPolicy::Abort)).unwrap();
    let report = dispatcher.dispatch(descriptor).unwrap().join().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(store.list_tickets().unwrap().is_empty());

    let dispatcher = Dispatcher::new(EngineConfig::builder().block_size(1024usize).build().unwrap());
    let descriptor = install_tickets(&store, &incoming, Some(ErrorPolicy::Abort)).unwrap();
    let report = dispatcher.dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.is_success());
    assert_eq!(fs::read(store.ticket_path(TitleId(0x42))).unwrap(), ticket);
}

#[test]
fn test_install_into_empty_dir_finishes_immediately() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let incoming = temp.path().join("incoming");
    fs::create_dir_all(&incoming).unwrap();

    let descriptor = install_tickets(&store, &incoming, None).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.is_success());
    assert_eq!(report.progress.total, 0);
}

#[test]
fn test_delete_tickets_reports_missing_ticket() {
    let temp = TempDir::new().unwrap();
    let store = store_with_tickets(&temp, &[1, 2]);

    let descriptor = delete_tickets(
        &store,
        &[TitleId(1), TitleId(9), TitleId(2)],
        Some(ErrorPolicy::SkipAndContinue),
    )
    .unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(
        report.failures[0].error.io_kind(),
        Some(std::io::ErrorKind::NotFound)
    );
    assert!(store.list_tickets().unwrap().is_empty());
}

#[test]
fn test_pending_titles_listed_per_media_and_deleted() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    seed_dir(
        &store.pending_title_path(MediaType::Sd, TitleId(0x20)),
        &[("content/00000000.app", &[0u8; 300])],
    );
    seed_dir(
        &store.pending_title_path(MediaType::Nand, TitleId(0x10)),
        &[("tmd", &[0u8; 12])],
    );

    let pending = store.list_pending_titles().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].media, MediaType::Nand);
    assert_eq!(pending[0].size, 12);
    assert_eq!(pending[1].media, MediaType::Sd);
    assert_eq!(pending[1].size, 300);

    let descriptor = delete_all_pending_titles(&store, None).unwrap();
    assert_eq!(descriptor.item_count(), 2);
    let report = dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.is_success());
    assert!(store.list_pending_titles().unwrap().is_empty());
}

#[test]
fn test_system_save_data_delete() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    seed_dir(&store.system_save_data_path(SaveId(0x0001_0022)), &[("data", b"save")]);
    seed_dir(&store.system_save_data_path(SaveId(0x0001_0011)), &[("data", b"sv")]);

    let saves = store.list_system_save_data().unwrap();
    let ids: Vec<SaveId> = saves.iter().map(|s| s.save_id).collect();
    assert_eq!(ids, vec![SaveId(0x0001_0011), SaveId(0x0001_0022)]);

    assert!(matches!(
        store.browse_system_save_data(SaveId(0x0001_0099)),
        Err(StoreError::NotFound { .. })
    ));

    let descriptor = delete_system_save_data(&store, &[SaveId(0x0001_0011)], None).unwrap();
    assert!(dispatch(descriptor).unwrap().join().unwrap().is_success());
    assert_eq!(store.list_system_save_data().unwrap().len(), 1);
}

#[test]
fn test_system_save_data_browse_lists_nested_files() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let save = SaveId(0x0001_0022);
    seed_dir(
        &store.system_save_data_path(save),
        &[("data/00000001", b"one"), ("data/00000002", b"two"), ("header", b"h")],
    );

    let files = store.browse_system_save_data(save).unwrap();
    assert_eq!(
        files,
        vec![
            Path::new("data/00000001").to_path_buf(),
            Path::new("data/00000002").to_path_buf(),
            Path::new("header").to_path_buf(),
        ]
    );
    let listed = store.list_system_save_data().unwrap();
    assert_eq!(listed[0].size, 7);
}

#[test]
fn test_ext_save_data_boss_detection_and_delete() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path().join("content")).unwrap();
    let with_boss = TitleId(0x0000_0000_0000_0a01);
    let plain = TitleId(0x0000_0000_0000_0b02);
    seed_dir(&store.ext_save_data_path(MediaType::Sd, with_boss), &[("icon", b"icon")]);
    seed_dir(&store.ext_save_data_path(MediaType::Nand, plain), &[("icon", b"i")]);
    seed_dir(
        &store.root().join("bossextdata/sd/0000000000000a01"),
        &[("00000001", b"boss")],
    );

    let containers = store.list_ext_save_data().unwrap();
    assert_eq!(containers.len(), 2);
    let boss = containers.iter().find(|c| c.ext_id == with_boss).unwrap();
    assert!(boss.has_boss);
    assert!(store.boss_ext_save_data_path(boss).is_some());
    let nand = containers.iter().find(|c| c.ext_id == plain).unwrap();
    assert!(!nand.has_boss);
    assert!(store.boss_ext_save_data_path(nand).is_none());

    assert_eq!(
        store.browse_boss_ext_save_data(boss).unwrap(),
        vec![std::path::PathBuf::from("00000001")]
    );
    assert!(matches!(
        store.browse_boss_ext_save_data(nand),
        Err(StoreError::NotFound { .. })
    ));

    let descriptor = delete_ext_save_data(&store, std::slice::from_ref(boss), None).unwrap();
    assert!(dispatch(descriptor).unwrap().join().unwrap().is_success());
    assert!(!store.root().join("bossextdata/sd/0000000000000a01").exists());
    assert_eq!(store.list_ext_save_data().unwrap().len(), 1);
}

#[test]
fn test_cancelled_delete_leaves_remaining_records() {
    let temp = TempDir::new().unwrap();
    let store = store_with_tickets(&temp, &[1, 2, 3]);

    let cancel = CancelHandle::new();
    cancel.request_cancel();
    let descriptor = delete_tickets(&store, &[TitleId(1), TitleId(2), TitleId(3)], None).unwrap();
    let report = Dispatcher::default()
        .dispatch_with_cancel(descriptor, cancel)
        .unwrap()
        .join()
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.progress.processed, 0);
    assert_eq!(store.list_tickets().unwrap().len(), 3);
}
