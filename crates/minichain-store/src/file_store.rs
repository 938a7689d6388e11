use anyhow::{Context, Result};
use minichain_core::{Block, BlockSink};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const BLOCK_FILE_PREFIX: &str = "block_";
const BLOCK_FILE_SUFFIX: &str = ".json";

/// One JSON file per block inside a data directory, `block_<index>.json`,
/// holding the canonical serialization of the block's fields. The same file
/// is written when a candidate is constructed and overwritten when the block
/// is accepted with its hash assigned.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating block directory {}", dir.display()))?;
        info!("file store opened at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn block_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{BLOCK_FILE_PREFIX}{index}{BLOCK_FILE_SUFFIX}"))
    }

    pub fn load_block(&self, index: u64) -> Result<Option<Block>> {
        let path = self.block_path(index);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let block =
            serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))?;
        Ok(Some(block))
    }

    /// Persisted block indexes in ascending order. Files that do not match
    /// the `block_<index>.json` pattern are ignored.
    pub fn indexes(&self) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_prefix(BLOCK_FILE_PREFIX)
                .and_then(|s| s.strip_suffix(BLOCK_FILE_SUFFIX))
            else {
                continue;
            };
            if let Ok(index) = stem.parse::<u64>() {
                out.push(index);
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    pub fn block_count(&self) -> Result<usize> {
        Ok(self.indexes()?.len())
    }

    /// Every persisted block, in index order.
    pub fn load_chain(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for index in self.indexes()? {
            if let Some(block) = self.load_block(index)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Remove every persisted block file. The REPL runs this on startup so
    /// each session begins with a fresh chain.
    pub fn clear(&self) -> Result<()> {
        for index in self.indexes()? {
            let path = self.block_path(index);
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        }
        Ok(())
    }
}

impl BlockSink for FileStore {
    fn persist(&self, block: &Block) -> Result<()> {
        let path = self.block_path(block.index);
        let bytes = serde_json::to_vec_pretty(block)?;
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
