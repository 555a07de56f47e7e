pub mod aggregator;
pub mod rebase;

pub use aggregator::{Aggregator, Flush, FlushedValue, reduce};
pub use rebase::{CounterBaseline, CounterRebaser};
