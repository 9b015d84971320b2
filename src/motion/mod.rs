pub mod anti_crossing;
pub mod estimator;
pub mod fuzz;
pub mod zoom;

pub use anti_crossing::anti_crossing;
pub use estimator::{EstimateOptions, Estimator, MaxLengthRule};
pub use fuzz::{fuzz, get_fuzz_lr, FrameCallback};
pub use zoom::{get_zoom_lr, zoom_estimate};
