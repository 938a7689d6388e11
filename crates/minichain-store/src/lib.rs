pub mod file_store;
pub mod scan;

pub use file_store::FileStore;
pub use scan::{transactions_involving, TxMatch};
