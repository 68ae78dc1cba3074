pub mod backup;
pub mod job;
pub mod logging;
pub mod retention;
pub mod run_log;
