pub mod cli;
pub mod data;
pub mod evaluate;
pub mod metrics;
pub mod report;
pub mod train;
pub mod transcribe;
