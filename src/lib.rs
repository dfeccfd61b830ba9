pub mod config;
pub mod error;
pub mod image_processing;
pub mod media;
pub mod routes;
pub mod stitching;
pub mod storage;

pub use config::Config;
pub use error::AppError;
pub use routes::{AppState, router};
