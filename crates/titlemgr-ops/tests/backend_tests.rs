use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use titlemgr_ops::{
    copy_files, delete_files, dispatch, extract_archive, item_count, ArchiveExtractBackend,
    ConflictResolution, CopyEntry, CopyOptions, DataOpBackend, Dispatcher, EngineConfig,
    ErrorPolicy, FsCopyBackend, OperationDescriptor,
};

fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn small_blocks() -> Dispatcher {
    Dispatcher::new(EngineConfig::builder().block_size(7usize).build().unwrap())
}

#[test]
fn test_plan_lists_directories_before_contents() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("saves");
    write_file(&src.join("b.bin"), b"bbbb");
    write_file(&src.join("a/inner.bin"), b"inner");
    write_file(&src.join("c.bin"), b"");

    let backend = FsCopyBackend::plan(&[src.clone()], &temp.path().join("out")).unwrap();
    let planned: Vec<(PathBuf, bool)> = backend
        .entries()
        .iter()
        .map(|e| (e.source.strip_prefix(temp.path()).unwrap().to_path_buf(), e.is_dir))
        .collect();

    assert_eq!(
        planned,
        vec![
            (PathBuf::from("saves"), true),
            (PathBuf::from("saves/a"), true),
            (PathBuf::from("saves/a/inner.bin"), false),
            (PathBuf::from("saves/b.bin"), false),
            (PathBuf::from("saves/c.bin"), false),
        ]
    );
}

#[test]
fn test_plan_rejects_copy_into_itself() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("dir");
    fs::create_dir_all(&src).unwrap();

    let err = FsCopyBackend::plan(&[src.clone()], &src.join("nested")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_plan_rejects_copy_onto_itself() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("save.bin");
    write_file(&src, b"0123456789");

    let err = FsCopyBackend::plan(&[src.clone()], temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(fs::read(&src).unwrap(), b"0123456789");
}

#[test]
fn test_overwrite_onto_source_keeps_source() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("save.bin");
    let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    write_file(&src, &payload);

    let backend = FsCopyBackend::from_entries(vec![CopyEntry {
        source: src.clone(),
        destination: temp.path().join(".").join("save.bin"),
        is_dir: false,
    }])
    .with_conflict_resolution(ConflictResolution::Overwrite);
    let descriptor = OperationDescriptor::copy(1, backend);
    let dispatcher = Dispatcher::new(EngineConfig::builder().block_size(4096usize).build().unwrap());
    let report = dispatcher.dispatch(descriptor).unwrap().join().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.io_kind(), Some(ErrorKind::InvalidInput));
    assert_eq!(fs::read(&src).unwrap(), payload);
}

#[test]
fn test_copy_tree_through_engine() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("extdata");
    let payload: Vec<u8> = (0..100u8).collect();
    write_file(&src.join("00000001/icon"), &payload);
    write_file(&src.join("00000001/empty"), b"");
    write_file(&src.join("readme.txt"), b"hello");
    let dest = temp.path().join("backup");

    let descriptor = copy_files(&[src], &dest, CopyOptions::default()).unwrap();
    let report = small_blocks().dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(fs::read(dest.join("extdata/00000001/icon")).unwrap(), payload);
    assert_eq!(fs::read(dest.join("extdata/readme.txt")).unwrap(), b"hello");
    assert!(!dest.join("extdata/00000001/empty").exists());
}

#[test]
fn test_copy_empty_creates_zero_length_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("empty.bin");
    write_file(&src, b"");
    let dest = temp.path().join("out");

    let options = CopyOptions {
        copy_empty: true,
        ..Default::default()
    };
    let descriptor = copy_files(&[src], &dest, options).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.is_success());
    assert_eq!(fs::metadata(dest.join("empty.bin")).unwrap().len(), 0);
}

#[test]
fn test_conflict_skip_reports_item_and_continues() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.tik");
    let b = temp.path().join("b.tik");
    write_file(&a, b"new-a");
    write_file(&b, b"new-b");
    let dest = temp.path().join("out");
    write_file(&dest.join("a.tik"), b"old-a");

    let options = CopyOptions {
        conflict_resolution: ConflictResolution::Skip,
        policy: ErrorPolicy::SkipAndContinue,
        ..Default::default()
    };
    let descriptor = copy_files(&[a, b], &dest, options).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 0);
    assert!(report.progress.is_clean_finish());
    assert_eq!(fs::read(dest.join("a.tik")).unwrap(), b"old-a");
    assert_eq!(fs::read(dest.join("b.tik")).unwrap(), b"new-b");
}

#[test]
fn test_conflict_abort_stops_even_with_skip_policy() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.tik");
    let b = temp.path().join("b.tik");
    write_file(&a, b"new-a");
    write_file(&b, b"new-b");
    let dest = temp.path().join("out");
    write_file(&dest.join("a.tik"), b"old-a");

    let options = CopyOptions {
        conflict_resolution: ConflictResolution::Abort,
        policy: ErrorPolicy::SkipAndContinue,
        ..Default::default()
    };
    let descriptor = copy_files(&[a, b], &dest, options).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.progress.premature_stop);
    assert_eq!(report.progress.processed, 0);
    assert!(!dest.join("b.tik").exists());
}

#[test]
fn test_conflict_auto_rename_keeps_both() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.tik");
    write_file(&a, b"new-a");
    let dest = temp.path().join("out");
    write_file(&dest.join("a.tik"), b"old-a");

    let options = CopyOptions {
        conflict_resolution: ConflictResolution::AutoRename,
        ..Default::default()
    };
    let descriptor = copy_files(&[a], &dest, options).unwrap();
    assert!(dispatch(descriptor).unwrap().join().unwrap().is_success());

    assert_eq!(fs::read(dest.join("a.tik")).unwrap(), b"old-a");
    assert_eq!(fs::read(dest.join("a (1).tik")).unwrap(), b"new-a");
}

#[test]
fn test_failed_destination_is_removed() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("data.bin");
    write_file(&src, b"0123456789");
    let dest = temp.path().join("out");

    let mut backend = FsCopyBackend::plan(&[src], &dest).unwrap();
    let mut handle = backend.open_destination(0, b"0123").unwrap();
    backend.write_destination(&mut handle, 0, b"0123").unwrap();
    let partial = handle.path().to_path_buf();
    assert!(partial.exists());

    backend.close_destination(0, handle, false).unwrap();
    assert!(!partial.exists());
}

#[test]
fn test_delete_files_removes_trees_and_reports_missing() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("pending");
    write_file(&dir.join("content/00000000.app"), b"app");
    let file = temp.path().join("ticket.tik");
    write_file(&file, b"tik");
    let missing = temp.path().join("missing");

    let descriptor =
        delete_files(vec![dir.clone(), missing, file.clone()], ErrorPolicy::SkipAndContinue).unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert!(!dir.exists());
    assert!(!file.exists());
    assert_eq!(report.progress.processed, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.summary(), "Deleted 2 items, 1 failed");
}

#[test]
fn test_extract_zip_archive() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("bundle.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        zip.add_directory("tickets/", options).unwrap();
        zip.start_file("tickets/one.tik", options).unwrap();
        zip.write_all(&[1u8; 20]).unwrap();
        zip.start_file("notes.txt", options).unwrap();
        zip.write_all(b"notes").unwrap();
        zip.finish().unwrap();
    }
    let dest = temp.path().join("out");

    let descriptor = extract_archive(
        &archive,
        &dest,
        ConflictResolution::Skip,
        ErrorPolicy::Abort,
        false,
    )
    .unwrap();
    assert_eq!(descriptor.item_count(), 3);

    let report = small_blocks().dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(fs::read(dest.join("tickets/one.tik")).unwrap(), vec![1u8; 20]);
    assert_eq!(fs::read(dest.join("notes.txt")).unwrap(), b"notes");
}

fn append_raw<W: Write>(builder: &mut tar::Builder<W>, name: &[u8], data: &[u8]) {
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, data).unwrap();
}

#[test]
fn test_extract_tar_archive() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("bundle.tar");
    {
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        append_raw(&mut builder, b"a.bin", b"first");
        append_raw(&mut builder, b"sub/b.bin", b"second");
        builder.finish().unwrap();
    }
    let dest = temp.path().join("out");

    let backend = ArchiveExtractBackend::open(&archive, &dest).unwrap();
    assert_eq!(backend.len(), 2);
    let descriptor = OperationDescriptor::copy(item_count(backend.len()).unwrap(), backend);
    let report = dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.is_success());
    assert_eq!(fs::read(dest.join("a.bin")).unwrap(), b"first");
    assert_eq!(fs::read(dest.join("sub/b.bin")).unwrap(), b"second");
}

fn entry_payload(i: usize) -> Vec<u8> {
    format!("entry {i} ").repeat(i % 7 + 1).into_bytes()
}

fn many_entry_tar<W: Write>(writer: W, count: usize) -> W {
    let mut builder = tar::Builder::new(writer);
    for i in 0..count {
        append_raw(&mut builder, format!("t/{i:04}.bin").as_bytes(), &entry_payload(i));
    }
    builder.into_inner().unwrap()
}

fn assert_extracted(dest: &Path, count: usize) {
    for i in 0..count {
        assert_eq!(fs::read(dest.join(format!("t/{i:04}.bin"))).unwrap(), entry_payload(i));
    }
}

#[test]
fn test_extract_tar_with_many_entries() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("many.tar");
    many_entry_tar(File::create(&archive).unwrap(), 300);
    let dest = temp.path().join("out");

    let descriptor =
        extract_archive(&archive, &dest, ConflictResolution::Skip, ErrorPolicy::Abort, false).unwrap();
    assert_eq!(descriptor.item_count(), 300);
    let report = small_blocks().dispatch(descriptor).unwrap().join().unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_extracted(&dest, 300);
}

#[test]
fn test_extract_tar_gz_and_extract_again() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("many.tar.gz");
    let encoder = flate2::write::GzEncoder::new(
        File::create(&archive).unwrap(),
        flate2::Compression::default(),
    );
    many_entry_tar(encoder, 120).finish().unwrap();
    let dest = temp.path().join("out");

    let descriptor = extract_archive(
        &archive,
        &dest,
        ConflictResolution::Overwrite,
        ErrorPolicy::Abort,
        false,
    )
    .unwrap();
    let report = dispatch(descriptor).unwrap().join().unwrap();
    assert!(report.is_success(), "{}", report.summary());
    assert_extracted(&dest, 120);

    // Running the same operation again starts over from the first entry.
    fs::remove_dir_all(&dest).unwrap();
    let report = dispatch(report.descriptor).unwrap().join().unwrap();
    assert!(report.is_success(), "{}", report.summary());
    assert_extracted(&dest, 120);
}

#[test]
fn test_tar_with_parent_component_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("evil.tar");
    {
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        append_raw(&mut builder, b"../escape.bin", b"nope");
        builder.finish().unwrap();
    }

    let err = ArchiveExtractBackend::open(&archive, &temp.path().join("out")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(!temp.path().join("escape.bin").exists());
}
