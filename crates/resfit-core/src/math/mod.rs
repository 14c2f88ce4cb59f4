//! Mathematical functions module
//!
//! Unit conversions, the nalgebra linear-algebra facade and the
//! Savitzky-Golay filter shared by preprocessing, detection and fitting.

pub mod conversions;
pub mod linalg;
pub mod savgol;

pub use conversions::*;
pub use savgol::{window_length, SavitzkyGolay};
