pub mod config;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod pptx;
pub mod progress;
pub mod provider;
pub mod textutil;
