//! giwaxs-io: File I/O for giwaxs.
//!
//! This crate reads EDF detector images through memory-mapped files,
//! persists parameter groups as JSON and writes analysis results as CSV
//! (and HDF5 with the `hdf5` feature).
//!

pub mod config;
pub mod edf;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod reader;
mod writer;

pub use config::{builtin_defaults, ConfigStore};
pub use edf::{parse_edf, read_edf, write_edf, ByteOrder, EdfDataType, EdfHeader, EdfImage, EdfReader};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_rois_hdf5, Hdf5ResultSink};
pub use reader::MappedFileReader;
pub use writer::CsvWriter;
