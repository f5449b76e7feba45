// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records the order of I/O operations for fsync-ordering assertions.
#[derive(Clone, Default)]
struct RecordingWriter {
    ops: Arc<Mutex<Vec<String>>>,
    fail_fsync: Arc<Mutex<bool>>,
}

impl RecordingWriter {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }
}

impl CheckpointWriter for RecordingWriter {
    fn write_tmp(&self, path: &Path, _data: &[u8]) -> Result<(), CheckpointError> {
        self.ops.lock().push(format!("write_tmp {}", path.display()));
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), CheckpointError> {
        if *self.fail_fsync.lock() {
            return Err(CheckpointError::Failed("injected fsync failure".into()));
        }
        self.ops.lock().push(format!("fsync_file {}", path.display()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), CheckpointError> {
        self.ops
            .lock()
            .push(format!("rename {} -> {}", from.display(), to.display()));
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), CheckpointError> {
        self.ops.lock().push(format!("fsync_dir {}", path.display()));
        Ok(())
    }

    fn file_size(&self, _path: &Path) -> Result<u64, CheckpointError> {
        Ok(123)
    }
}

#[test]
fn checkpoint_orders_fsyncs_correctly() {
    let writer = RecordingWriter::default();
    let checkpointer =
        Checkpointer::with_writer(writer.clone(), PathBuf::from("/state/snapshot.zst"));

    let handle = checkpointer.start(42, Ledger::default());
    let result = handle.wait().unwrap();
    assert_eq!(result.seq, 42);

    let ops = writer.ops();
    assert_eq!(ops.len(), 4);
    assert!(ops[0].starts_with("write_tmp"));
    assert!(ops[1].starts_with("fsync_file"));
    assert!(ops[2].starts_with("rename"));
    assert!(ops[3].starts_with("fsync_dir /state"));
}

#[test]
fn fsync_failure_propagates_before_rename() {
    let writer = RecordingWriter::default();
    *writer.fail_fsync.lock() = true;
    let checkpointer =
        Checkpointer::with_writer(writer.clone(), PathBuf::from("/state/snapshot.zst"));

    let err = checkpointer.checkpoint_sync(1, &Ledger::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::Failed(_)));
    // No rename happened after the failed fsync.
    assert!(writer.ops().iter().all(|op| !op.starts_with("rename")));
}

#[test]
fn real_checkpoint_writes_loadable_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");
    let checkpointer = Checkpointer::new(path.clone());

    let result = checkpointer.checkpoint_sync(9, &Ledger::default()).unwrap();
    assert!(result.size_bytes > 0);

    let snapshot = Snapshot::load(&path).unwrap().unwrap();
    assert_eq!(snapshot.seq, 9);
}
