pub mod client;
pub mod expression;

pub use client::{DownloadRequest, EarthEngineClient, EarthEngineHttpClient};
pub use expression::{Expression, Value};
