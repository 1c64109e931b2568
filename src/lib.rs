pub mod aggregator;
pub mod binary;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod hosts;
pub mod logging;
pub mod report;
pub mod runner;
pub mod session;
pub mod ssh;
pub mod subprocess;
pub mod task;
pub mod wrap;
