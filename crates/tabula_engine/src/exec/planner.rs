//! Planner: turns a parsed statement into an executable plan

use std::collections::BTreeSet;

use super::ast::*;
use crate::tx::INTERNAL_TABLE_PREFIX;
use crate::types::EngineError;

/// Compiled form of one statement. Equal query text yields equal plans.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub root: PlanNode,
    /// Number of `?` placeholders.
    pub positional_params: usize,
    pub named_params: BTreeSet<String>,
    read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    // Walk a table in id order
    TableScan {
        table: String,
    },
    // Keep rows whose predicate is true
    Filter {
        input: Box<PlanNode>,
        predicate: Expr,
    },
    OrderBy {
        input: Box<PlanNode>,
        item: OrderByItem,
    },
    Offset {
        input: Box<PlanNode>,
        count: u64,
    },
    Limit {
        input: Box<PlanNode>,
        count: u64,
    },
    // Reshape rows; Wildcard passes them through
    Project {
        input: Box<PlanNode>,
        projection: Projection,
    },
    CreateTable {
        name: String,
        if_not_exists: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        source: InsertSource,
    },
    Update {
        input: Box<PlanNode>,
        table: String,
        assignments: Vec<(FieldPath, Expr)>,
    },
    Delete {
        input: Box<PlanNode>,
        table: String,
    },
}

impl Plan {
    /// Whether running the plan needs a read-only transaction only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Caps a SELECT plan to at most `n` rows; writes are returned unchanged.
    pub fn limited(mut self, n: u64) -> Self {
        self.root = match self.root {
            PlanNode::Project { input, projection } => {
                let input = match *input {
                    PlanNode::Limit { input, count } => PlanNode::Limit { input, count: count.min(n) },
                    other => PlanNode::Limit { input: Box::new(other), count: n },
                };
                PlanNode::Project { input: Box::new(input), projection }
            }
            other => other,
        };
        self
    }
}

fn reject_reserved(name: &str) -> Result<(), EngineError> {
    if name.starts_with(INTERNAL_TABLE_PREFIX) {
        return Err(EngineError::InvalidArgument(format!("reserved table name: {name}")));
    }
    Ok(())
}

pub struct Planner;

impl Planner {
    pub fn plan(stmt: &Statement) -> Result<Plan, EngineError> {
        let (positional_params, named_params) = stmt.extract_parameters();

        let root = match stmt {
            Statement::CreateTable { name, if_not_exists } => {
                tabula_core::validate_table_name(name)?;
                reject_reserved(name)?;
                PlanNode::CreateTable { name: name.clone(), if_not_exists: *if_not_exists }
            }
            Statement::DropTable { name, if_exists } => {
                reject_reserved(name)?;
                PlanNode::DropTable { name: name.clone(), if_exists: *if_exists }
            }
            Statement::Insert(ins) => PlanNode::Insert {
                table: ins.table.clone(),
                source: ins.source.clone(),
            },
            Statement::Select(sel) => Self::plan_select(sel),
            Statement::Update(upd) => {
                if upd.assignments.is_empty() {
                    return Err(EngineError::InvalidArgument("UPDATE without assignments".into()));
                }
                PlanNode::Update {
                    input: Box::new(Self::plan_scan(&upd.table, upd.where_clause.as_ref())),
                    table: upd.table.clone(),
                    assignments: upd.assignments.clone(),
                }
            }
            Statement::Delete(del) => PlanNode::Delete {
                input: Box::new(Self::plan_scan(&del.table, del.where_clause.as_ref())),
                table: del.table.clone(),
            },
        };

        let plan = Plan {
            root,
            positional_params,
            named_params,
            read_only: stmt.is_read_only(),
        };
        tracing::trace!(?plan, "planned statement");
        Ok(plan)
    }

    fn plan_scan(table: &str, where_clause: Option<&Expr>) -> PlanNode {
        let scan = PlanNode::TableScan { table: table.to_string() };
        match where_clause {
            Some(predicate) => PlanNode::Filter {
                input: Box::new(scan),
                predicate: predicate.clone(),
            },
            None => scan,
        }
    }

    fn plan_select(sel: &SelectStatement) -> PlanNode {
        let mut plan = Self::plan_scan(&sel.table, sel.where_clause.as_ref());

        // ORDER BY sees source fields, so it runs before projection
        if let Some(ref item) = sel.order_by {
            plan = PlanNode::OrderBy { input: Box::new(plan), item: item.clone() };
        }
        if let Some(count) = sel.offset {
            plan = PlanNode::Offset { input: Box::new(plan), count };
        }
        if let Some(count) = sel.limit {
            plan = PlanNode::Limit { input: Box::new(plan), count };
        }

        PlanNode::Project {
            input: Box::new(plan),
            projection: sel.projection.clone(),
        }
    }
}
