//! 模型输出解析与风控校验

pub mod engine;
pub mod extract;
pub mod model;
pub mod validator;

pub use engine::parse_full_decision_response;
pub use model::{sort_decisions_close_first, Decision, FullDecision, TradeAction};
pub use validator::RiskLimits;
