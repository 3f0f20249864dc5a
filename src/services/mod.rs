pub mod archive;
pub mod capabilities;
pub mod detection;
pub mod ocr;
pub mod onnx_builder; // Shared ONNX session builder
pub mod onnx_provider;

// Re-export commonly used services
pub use archive::{PageArchive, Pages};
pub use capabilities::{select_backend, Capabilities, CapabilityProvider, TextDetector, TextRecognizer};
pub use detection::OnnxTextDetector;
pub use ocr::OnnxTextRecognizer;
pub use onnx_provider::OnnxCapabilityProvider;
