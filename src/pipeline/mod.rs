pub mod batcher;
pub mod enricher;
pub mod orchestrator;
