//! Scratch storage for blocks that diverged from their source.

use crate::{DataBlock, Error, Result, SharedXTable};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile};
use uuid::Uuid;

const INLINE_X: u64 = u64::MAX;
const HEADER_BYTES: usize = 16;
const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Persists modified blocks and restores them later.
///
/// Once a block has been written here it is always reloaded from here,
/// never from the original source.
pub trait BlockStore: Send {
    /// Persists `block` as block number `index`.
    ///
    /// Rows whose X vector is shared may be recorded by reference through
    /// `shared`. A store retains one reference per such row and releases the
    /// references of whatever the slot held before.
    ///
    /// # Errors
    /// Returns an error if the block cannot be written.
    fn write_block(&mut self, index: usize, block: &DataBlock, shared: &mut SharedXTable)
        -> Result<()>;

    /// Restores block number `index` into `block`, which arrives sized for it.
    ///
    /// # Errors
    /// Returns an error if the block was never written or cannot be read.
    fn read_block(&mut self, index: usize, block: &mut DataBlock, shared: &SharedXTable)
        -> Result<()>;

    /// Returns true if block `index` has been written.
    fn contains(&self, index: usize) -> bool;
}

/// One scratch file per workspace with a fixed-size slot per block.
///
/// Slot layout (little-endian): start index and row count as `u64`, then per
/// row an X tag (`u64::MAX` for inline values, otherwise a shared-table id)
/// followed by the inline X values if any, then all Y values, then all E values.
/// The file is created on the first write and deleted when the store is dropped.
pub struct TempBlockStore {
    dir: PathBuf,
    workspace_id: Uuid,
    file: Option<NamedTempFile>,
    slot_bytes: u64,
    x_len: usize,
    y_len: usize,
    /// Shared-table ids recorded by each written slot.
    written: HashMap<usize, Vec<usize>>,
}

impl TempBlockStore {
    /// Creates a store for blocks of at most `block_size` rows.
    ///
    /// The scratch file is named after `workspace_id` inside `dir`.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        workspace_id: Uuid,
        block_size: usize,
        x_len: usize,
        y_len: usize,
    ) -> Self {
        let row_bytes = F64_BYTES + x_len * F64_BYTES + 2 * y_len * F64_BYTES;
        Self {
            dir: dir.into(),
            workspace_id,
            file: None,
            slot_bytes: (HEADER_BYTES + block_size * row_bytes) as u64,
            x_len,
            y_len,
            written: HashMap::new(),
        }
    }

    /// Path of the scratch file, once created.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    /// Number of distinct blocks written.
    #[must_use]
    pub fn blocks_written(&self) -> usize {
        self.written.len()
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = Builder::new()
                .prefix(&format!("histpage-{}-", self.workspace_id))
                .suffix(".blocks")
                .tempfile_in(&self.dir)?;
            log::debug!("created block scratch file {}", file.path().display());
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file.as_file_mut()),
            None => Err(Error::InvalidFormat("scratch file unavailable".to_string())),
        }
    }

    fn write_slot(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn check_shape(&self, block: &DataBlock) -> Result<()> {
        if block.x_len() != self.x_len || block.y_len() != self.y_len {
            return Err(Error::InvalidFormat(format!(
                "block shape ({} x, {} y) does not match store ({} x, {} y)",
                block.x_len(),
                block.y_len(),
                self.x_len,
                self.y_len
            )));
        }
        Ok(())
    }
}

impl BlockStore for TempBlockStore {
    fn write_block(
        &mut self,
        index: usize,
        block: &DataBlock,
        shared: &mut SharedXTable,
    ) -> Result<()> {
        self.check_shape(block)?;
        let mut buf = Vec::with_capacity(usize::try_from(self.slot_bytes).unwrap_or(0));
        let mut ids = Vec::new();
        buf.extend_from_slice(&(block.start_index() as u64).to_le_bytes());
        buf.extend_from_slice(&(block.rows() as u64).to_le_bytes());
        for row in 0..block.rows() {
            let x = block.x_shared(row);
            // Vectors referenced from elsewhere are stored by id so that
            // reloading restores the sharing.
            if Arc::strong_count(x) > 1 {
                let id = shared.retain(x);
                ids.push(id);
                buf.extend_from_slice(&(id as u64).to_le_bytes());
            } else {
                buf.extend_from_slice(&INLINE_X.to_le_bytes());
                put_f64s(&mut buf, x);
            }
        }
        for row in 0..block.rows() {
            put_f64s(&mut buf, block.y(row));
        }
        for row in 0..block.rows() {
            put_f64s(&mut buf, block.e(row));
        }

        let offset = index as u64 * self.slot_bytes;
        if let Err(err) = self.write_slot(offset, &buf) {
            for id in ids {
                shared.release(id);
            }
            return Err(err);
        }
        // The slot no longer refers to what it held before.
        if let Some(previous) = self.written.insert(index, ids) {
            for id in previous {
                shared.release(id);
            }
        }
        log::trace!("wrote block {index} ({} bytes)", buf.len());
        Ok(())
    }

    fn read_block(
        &mut self,
        index: usize,
        block: &mut DataBlock,
        shared: &SharedXTable,
    ) -> Result<()> {
        if !self.written.contains_key(&index) {
            return Err(Error::InvalidInput(format!(
                "block {index} has not been written to the scratch file"
            )));
        }
        self.check_shape(block)?;
        let x_len = self.x_len;
        let offset = index as u64 * self.slot_bytes;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let start = read_u64(&mut reader)?;
        let rows = read_u64(&mut reader)?;
        if start != block.start_index() as u64 || rows != block.rows() as u64 {
            return Err(Error::InvalidFormat(format!(
                "slot {index} holds rows {start}+{rows}, expected {}+{}",
                block.start_index(),
                block.rows()
            )));
        }

        let parts = block.parts_mut();
        for x in parts.x.iter_mut() {
            let tag = read_u64(&mut reader)?;
            if tag == INLINE_X {
                let mut values = vec![0.0; x_len];
                read_f64s(&mut reader, &mut values)?;
                *x = Arc::new(values);
            } else {
                let found = usize::try_from(tag).ok().and_then(|id| shared.get(id));
                let Some(found) = found else {
                    return Err(Error::InvalidFormat(format!(
                        "slot {index} references unknown shared X {tag}"
                    )));
                };
                *x = Arc::clone(found);
            }
        }
        read_f64s(&mut reader, parts.y)?;
        read_f64s(&mut reader, parts.e)?;
        Ok(())
    }

    fn contains(&self, index: usize) -> bool {
        self.written.contains_key(&index)
    }
}

fn put_f64s(buf: &mut Vec<u8>, values: &[f64]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut word = [0u8; 8];
    reader.read_exact(&mut word)?;
    Ok(u64::from_le_bytes(word))
}

fn read_f64s<R: Read>(reader: &mut R, out: &mut [f64]) -> Result<()> {
    let mut bytes = vec![0u8; out.len() * F64_BYTES];
    reader.read_exact(&mut bytes)?;
    for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(F64_BYTES)) {
        let mut word = [0u8; F64_BYTES];
        word.copy_from_slice(chunk);
        *value = f64::from_le_bytes(word);
    }
    Ok(())
}
