use minichain_store::FileStore;
use tempfile::{tempdir, TempDir};

#[allow(dead_code)]
pub fn create_temp_store() -> (TempDir, FileStore) {
    // Keep the TempDir alive alongside the store; dropping it deletes the
    // directory out from under the block files.
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = FileStore::open(temp_dir.path()).expect("Failed to open FileStore");
    (temp_dir, store)
}
