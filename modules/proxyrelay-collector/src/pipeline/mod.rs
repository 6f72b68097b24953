pub mod aggregator;
pub mod extractor;
pub mod fetcher;
pub mod publisher;
pub mod ranking;
pub mod selector;
pub mod stats;
