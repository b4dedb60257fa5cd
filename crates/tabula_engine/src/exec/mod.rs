//! Query dispatcher: parse, plan, bind and execute document queries

pub mod ast;
pub mod executor;
pub mod params;
pub mod parser;
pub mod planner;

pub use executor::{compare_values, execute, ValueExt};
pub use params::{bind, named, params_from_json, BoundParams, Param};
pub use planner::{Plan, PlanNode, Planner};

use crate::types::EngineError;

/// Parses and plans one statement. Pure: equal text gives equal plans.
pub fn parse(text: &str) -> Result<Plan, EngineError> {
    let stmt = parser::parse(text)?;
    Planner::plan(&stmt)
}
