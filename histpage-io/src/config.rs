//! Memory budget and paging geometry for managed workspaces.

use crate::{Error, Result};
use std::mem::size_of;
use std::path::PathBuf;
use sysinfo::System;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;
const DEFAULT_BLOCK_BYTES: usize = 4 * 1024 * 1024;

/// Configuration for sizing managed workspaces.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
    /// Target size of one block in bytes, used when `block_size` is not set.
    pub block_bytes: usize,
    /// Explicit number of spectra per block.
    pub block_size: Option<usize>,
    /// Explicit number of resident blocks. If set, the memory budget is not consulted.
    pub max_resident_blocks: Option<usize>,
    /// Directory for scratch files. Defaults to the system temporary directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_fraction: 0.5,
            memory_budget_bytes: None,
            block_bytes: DEFAULT_BLOCK_BYTES,
            block_size: None,
            max_resident_blocks: None,
            temp_dir: None,
        }
    }
}

impl MemoryConfig {
    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Set the target block size in bytes. Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes.max(1);
        self
    }

    /// Set the number of spectra per block.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_block_size`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_block_size(mut self, spectra: usize) -> Self {
        self.block_size = Some(spectra.max(1));
        self
    }

    /// Set the number of resident blocks.
    ///
    /// Values less than 1 are clamped to 1. Use
    /// [`Self::try_with_max_resident_blocks`] to surface invalid values as an
    /// error instead.
    #[must_use]
    pub fn with_max_resident_blocks(mut self, blocks: usize) -> Self {
        self.max_resident_blocks = Some(blocks.max(1));
        self
    }

    /// Set the scratch directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Fallible variant of [`Self::with_block_size`].
    ///
    /// # Errors
    /// Returns an error if `spectra` is 0.
    pub fn try_with_block_size(mut self, spectra: usize) -> Result<Self> {
        if spectra == 0 {
            return Err(Error::InvalidInput(
                "block_size must be at least 1".to_string(),
            ));
        }
        self.block_size = Some(spectra);
        Ok(self)
    }

    /// Fallible variant of [`Self::with_max_resident_blocks`].
    ///
    /// # Errors
    /// Returns an error if `blocks` is 0.
    pub fn try_with_max_resident_blocks(mut self, blocks: usize) -> Result<Self> {
        if blocks == 0 {
            return Err(Error::InvalidInput(
                "max_resident_blocks must be at least 1".to_string(),
            ));
        }
        self.max_resident_blocks = Some(blocks);
        Ok(self)
    }

    /// The scratch directory to use.
    #[must_use]
    pub fn resolve_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidInput(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidInput(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }
}

/// How a workspace of a given shape is split into blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PagingPlan {
    /// Number of spectra in the workspace.
    pub n_spectra: usize,
    /// Spectra per block.
    pub block_size: usize,
    /// Number of blocks; the last may be partial.
    pub n_blocks: usize,
    /// Blocks allowed in memory at once.
    pub max_resident_blocks: usize,
    /// Estimated bytes per spectrum (X, Y and E).
    pub bytes_per_spectrum: usize,
}

impl PagingPlan {
    /// Plans the paging of `n_spectra` spectra of `x_len` X and `y_len` Y/E values.
    ///
    /// # Errors
    /// Returns an error if any dimension is 0 or the memory budget cannot be resolved.
    pub fn for_shape(
        n_spectra: usize,
        x_len: usize,
        y_len: usize,
        config: &MemoryConfig,
    ) -> Result<Self> {
        if n_spectra == 0 || x_len == 0 || y_len == 0 {
            return Err(Error::InvalidInput(format!(
                "workspace dimensions must be non-zero (spectra {n_spectra}, x {x_len}, y {y_len})"
            )));
        }
        let bytes_per_spectrum = bytes_per_spectrum(x_len, y_len);
        let block_size = config
            .block_size
            .unwrap_or_else(|| config.block_bytes / bytes_per_spectrum)
            .clamp(1, n_spectra);
        let n_blocks = n_spectra.div_ceil(block_size);

        let max_resident_blocks = match config.max_resident_blocks {
            Some(blocks) => blocks,
            None => {
                let budget = config.resolve_budget_bytes()?;
                max_blocks_for_budget(budget, block_size * bytes_per_spectrum)
            }
        }
        .clamp(1, n_blocks);

        Ok(Self {
            n_spectra,
            block_size,
            n_blocks,
            max_resident_blocks,
            bytes_per_spectrum,
        })
    }

    /// Returns true when not every block can be resident at once.
    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.max_resident_blocks < self.n_blocks
    }

    /// Block number and row offset of workspace index `index`.
    #[must_use]
    pub fn locate(&self, index: usize) -> (usize, usize) {
        (index / self.block_size, index % self.block_size)
    }

    /// Workspace index of the first row and number of rows of block `block`.
    #[must_use]
    pub fn block_span(&self, block: usize) -> (usize, usize) {
        let start = block * self.block_size;
        (start, self.block_size.min(self.n_spectra.saturating_sub(start)))
    }

    /// Upper bound on resident histogram data in bytes.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.max_resident_blocks * self.block_size * self.bytes_per_spectrum
    }

    /// Size of the full workspace in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.n_spectra * self.bytes_per_spectrum
    }
}

fn bytes_per_spectrum(x_len: usize, y_len: usize) -> usize {
    (x_len + 2 * y_len) * size_of::<f64>()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn max_blocks_for_budget(budget_bytes: usize, bytes_per_block: usize) -> usize {
    let per_block = (bytes_per_block as f64 * MEMORY_OVERHEAD_FACTOR).ceil() as usize;
    let per_block = per_block.max(1);
    (budget_bytes / per_block).max(1)
}
