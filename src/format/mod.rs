pub mod action;
pub mod float_bytes;
pub mod int_bytes;

pub use action::{deserialize, serialize, ActionFrame};
pub use int_bytes::IntBytes;
