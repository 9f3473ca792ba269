pub mod cli;
pub mod config;
pub mod engine;
pub mod engine_settings;
pub mod http;
pub mod jobs;
pub mod overrides;
pub mod settings;
pub mod translator;
pub mod util;
