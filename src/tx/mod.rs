//! Transaction model: fee variants, validated records and receipts

mod fee;
mod receipt;
mod transaction;

pub use fee::{FeeModel, TransactionType};
pub use receipt::{Receipt, TransactionStatus};
pub use transaction::{Transaction, TransactionBuilder};
