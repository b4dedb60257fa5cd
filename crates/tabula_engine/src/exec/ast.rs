//! AST for the document query language (CREATE/DROP/INSERT/SELECT/UPDATE/DELETE)

use std::collections::BTreeSet;
use std::fmt;

/// Dotted path into a document: `a.b.0` is `["a", "b", "0"]`.
pub type FieldPath = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable { name: String, if_not_exists: bool },
    DropTable { name: String, if_exists: bool },
    Insert(InsertStatement),
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `(a, b) VALUES (1, 2), (3, 4)`
    Tuples { fields: Vec<String>, rows: Vec<Vec<Expr>> },
    /// `VALUES {a: 1}, ?` - every expression must evaluate to a document
    Documents(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Projection,
    pub table: String,
    pub where_clause: Option<Expr>,
    pub order_by: Option<OrderByItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Wildcard,
    Items(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Field name the item gets in the projected document.
    pub fn column_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.expr.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub path: FieldPath,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(FieldPath, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Field(FieldPath),
    /// `?` - zero-based index in order of appearance
    Positional(usize),
    /// `$name`
    Named(String),
    Document(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    BinaryOp(Box<Expr>, BinOp, Box<Expr>),
    UnaryOp(UnOp, Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Statement {
    /// Whether the statement only reads. Everything but SELECT writes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    /// Extracts the number of `?` placeholders and the set of `$name` placeholders.
    pub fn extract_parameters(&self) -> (usize, BTreeSet<String>) {
        let mut named = BTreeSet::new();
        let mut positional = 0usize;
        let mut visit = |e: &Expr| e.collect_parameters(&mut positional, &mut named);

        match self {
            Statement::CreateTable { .. } | Statement::DropTable { .. } => {}
            Statement::Insert(ins) => match &ins.source {
                InsertSource::Tuples { rows, .. } => rows.iter().flatten().for_each(&mut visit),
                InsertSource::Documents(docs) => docs.iter().for_each(&mut visit),
            },
            Statement::Select(sel) => {
                if let Projection::Items(items) = &sel.projection {
                    items.iter().for_each(|i| visit(&i.expr));
                }
                if let Some(w) = &sel.where_clause {
                    visit(w);
                }
            }
            Statement::Update(upd) => {
                upd.assignments.iter().for_each(|(_, e)| visit(e));
                if let Some(w) = &upd.where_clause {
                    visit(w);
                }
            }
            Statement::Delete(del) => {
                if let Some(w) = &del.where_clause {
                    visit(w);
                }
            }
        }
        (positional, named)
    }
}

impl Expr {
    /// Recursively collect placeholders in this expression
    pub fn collect_parameters(&self, positional: &mut usize, named: &mut BTreeSet<String>) {
        match self {
            Expr::Positional(idx) => {
                *positional = (*positional).max(idx + 1);
            }
            Expr::Named(name) => {
                named.insert(name.clone());
            }
            Expr::BinaryOp(left, _, right) => {
                left.collect_parameters(positional, named);
                right.collect_parameters(positional, named);
            }
            Expr::UnaryOp(_, operand) | Expr::IsNull(operand) | Expr::IsNotNull(operand) => {
                operand.collect_parameters(positional, named);
            }
            Expr::Document(fields) => {
                for (_, e) in fields {
                    e.collect_parameters(positional, named);
                }
            }
            Expr::Array(items) => {
                for e in items {
                    e.collect_parameters(positional, named);
                }
            }
            Expr::Literal(_) | Expr::Field(_) => {}
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Field(path) => f.write_str(&path.join(".")),
            Expr::Positional(_) => f.write_str("?"),
            Expr::Named(name) => write!(f, "${name}"),
            Expr::Document(fields) => {
                f.write_str("{")?;
                for (i, (k, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {e}")?;
                }
                f.write_str("}")
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
            Expr::BinaryOp(l, op, r) => write!(f, "{l} {op} {r}"),
            Expr::UnaryOp(UnOp::Not, e) => write!(f, "NOT {e}"),
            Expr::UnaryOp(UnOp::Neg, e) => write!(f, "-{e}"),
            Expr::IsNull(e) => write!(f, "{e} IS NULL"),
            Expr::IsNotNull(e) => write!(f, "{e} IS NOT NULL"),
        }
    }
}
