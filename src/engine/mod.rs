// Decision engine: pure rule evaluation + the polling runner
pub mod decision;
pub mod runner;

pub use decision::{
    BuyEvaluation, BuyReason, EngineState, RuleConfig, SellEvaluation, SellReason,
};
pub use runner::{CycleError, Engine};
