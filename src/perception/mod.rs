pub mod annotator;
pub mod normalizer;
pub mod ocr;
pub mod pipeline;
pub mod resolver;
pub mod selector;
pub mod similarity;
pub mod template;
pub mod traits;
pub mod types;
pub mod yolo_detector;
