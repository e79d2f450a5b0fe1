//! Transfer coordination
//!
//! The orchestrator:
//! 1. Resolves an action onto the pool, gateway or withdrawer route
//! 2. Derives amount bounds for that route
//! 3. Approves the spender only when the allowance falls short
//! 4. Submits the action and hands it to the settlement tracker

pub mod engine;
pub mod routes;

pub use engine::{Execution, TransferOrchestrator};
pub use routes::{Route, RoutePlan, RouteTable, TokenRef};
