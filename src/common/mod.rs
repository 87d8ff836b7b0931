pub mod detection;
pub mod frame;

pub use detection::{BoundingBox, Detection, DetectionSet};
pub use frame::{Frame, PixelFormat, Resolution, CANONICAL_HEIGHT, CANONICAL_WIDTH};
