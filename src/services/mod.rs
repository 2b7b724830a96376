pub mod apply;
pub mod enrich_cache;
pub mod image_worker;
pub mod log_sink;
pub mod render;
pub mod resolver;
pub mod scanner;
pub mod watcher;

pub use enrich_cache::EnrichCache;
pub use image_worker::ImageWorker;
pub use log_sink::LogSink;
pub use resolver::MetadataResolver;
pub use scanner::{ScanEngine, ScanLockRegistry};
pub use watcher::LibraryWatcher;
