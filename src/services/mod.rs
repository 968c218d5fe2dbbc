pub mod artifacts;
pub mod companion;
pub mod compression;
pub mod credentials;
pub mod history;
pub mod kv;
pub mod orchestrator;
pub mod session;
pub mod stats;
pub mod tinify;
