//! 决策账本：每个周期一条记录，只追加

pub mod decision_ledger;
pub mod file_store;
pub mod schema;
pub mod sql_store;
pub mod store;

pub use decision_ledger::DecisionLedger;
pub use file_store::FileDecisionStore;
pub use sql_store::{SharedPool, SqlDecisionStore, SqlDialect};
pub use store::{DecisionStore, LedgerBackend, Statistics};
