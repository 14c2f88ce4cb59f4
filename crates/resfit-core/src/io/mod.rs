//! Spectrum source and result sink
//!
//! Reads S21 sweeps from delimited text and writes fit outcomes as CSV.

pub mod reader;
pub mod writer;

pub use reader::{parse_flux_manifest, ManifestEntry, SpectrumFileError, SpectrumFormat, SpectrumReader};
pub use writer::{
    write_fit_file, write_fit_table, write_lambda_file, write_lambda_table, FIT_COLUMNS,
    LAMBDA_COLUMNS,
};
