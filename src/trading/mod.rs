pub mod analysis;
pub mod context;
pub mod decision;
pub mod ledger;
pub mod model;
pub mod task;
