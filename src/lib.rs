//! Convert images to PNG, optionally cutting the background away with a
//! segmentation model, and hand the results over singly or as a ZIP.

pub mod archive;
pub mod cli;
pub mod compose;
pub mod config;
pub mod convert;
pub mod decode;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod handles;
pub mod model;
pub mod onnx;
pub mod pypi;
pub mod quota;
pub mod resize;
pub mod runtime;
pub mod segment;
pub mod source;
pub mod workspace;

pub use archive::{BatchArchiver, Delivery, DownloadSink};
pub use convert::{ConvertOptions, Converter};
pub use engine::{Backend, EngineFactory, InferenceEngine};
pub use error::{ConversionFailed, ConvertError};
pub use segment::SegmentationClient;
pub use source::SourceImage;
pub use workspace::{ConversionStatus, Workspace};
