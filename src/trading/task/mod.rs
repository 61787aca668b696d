pub mod auto_trader;
pub mod collaborators;
pub mod shared_account;
pub mod trader_supervisor;

pub use auto_trader::{AutoTrader, CycleOutcome};
pub use trader_supervisor::{TraderSupervisor, UnitState};
