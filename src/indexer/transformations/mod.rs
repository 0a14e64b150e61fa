pub mod blocks;
pub mod transactions;

pub use blocks::BlockTransformer;
pub use transactions::{transform_transactions, TransactionTransformer};
