pub mod schema;

pub use schema::{
    BrowserConfig, CaptureConfig, Config, OnError, PlaybackConfig, StorageConfig, Viewport,
};
