pub mod keypoint;
pub mod still;

pub use keypoint::{BodyPart, Human, PartIndex};
pub use still::{ImageCallback, StillEstimator};
