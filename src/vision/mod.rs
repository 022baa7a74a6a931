pub mod detector;
pub mod model;

pub use detector::{FoodDetection, FoodDetector, VisionDetector};
pub use model::{OpenAiVision, VisionModel};
