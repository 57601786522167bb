//! Core building blocks behind [`AccessGate`](crate::AccessGate)

pub mod audit;
pub mod context;
pub mod evaluator;
pub mod ledger;
pub mod permission;
pub mod tier;
pub mod validation;
