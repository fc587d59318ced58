pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod resource;
pub mod scan;
pub mod segment;
pub mod shutdown;
pub mod split;
pub mod util;
