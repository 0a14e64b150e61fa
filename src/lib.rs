pub mod indexer;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test"))]
pub mod test_utils;
