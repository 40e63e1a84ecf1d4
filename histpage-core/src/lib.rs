//! histpage-core: Spectrum-detector mapping for histogram workspaces.
//!
//! This crate provides the identifier types, the ordered [`DetectorIndex`]
//! used for bulk queries, and the bidirectional [`SpectraDetectorMap`] that
//! records which detectors contribute to each spectrum.
//!

pub mod detector_index;
pub mod error;
pub mod spectra_map;

pub use detector_index::DetectorIndex;
pub use error::{Error, Result};
pub use spectra_map::SpectraDetectorMap;

/// Identifier of a measured spectrum, unique within one workspace.
pub type SpectrumNumber = i32;

/// Identifier of a physical detector element.
pub type DetectorId = i32;

/// Returned by bulk detector lookups for detectors that belong to no spectrum.
pub const NO_SPECTRUM: SpectrumNumber = 0;
