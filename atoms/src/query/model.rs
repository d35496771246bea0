use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{ColumnKind, Table};

/// Pseudo join table naming the user an access grant is checked against.
pub const USER_TABLE: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
}

impl Op {
    pub fn parse(op: &str) -> Option<Op> {
        Some(match op {
            "==" => Op::Eq,
            "!=" => Op::Ne,
            ">" => Op::Gt,
            "<" => Op::Lt,
            ">=" => Op::Ge,
            "<=" => Op::Le,
            "in" => Op::In,
            "!in" => Op::NotIn,
            _ => return None,
        })
    }

    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
        }
    }

    fn is_ordering(self) -> bool {
        matches!(self, Op::Gt | Op::Lt | Op::Ge | Op::Le)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            _ => None,
        }
    }

    fn kind(&self) -> ColumnKind {
        match self {
            Scalar::Number(_) => ColumnKind::Number,
            Scalar::Text(_) => ColumnKind::Text,
            Scalar::Bool(_) => ColumnKind::Bool,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

/// One `column <op> operand` test against a primary or joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub table: String,
    pub column: String,
    pub op: Op,
    pub operand: Operand,
}

/// A validated search request.
#[derive(Debug, Clone)]
pub struct Search {
    pub table: Table,
    pub conditions: Vec<Condition>,
    /// Explicit requesting user, checked against access grants.
    pub requester: Option<String>,
    pub size: Option<usize>,
    pub offset: usize,
}

impl Search {
    pub fn new(table: Table) -> Self {
        Search {
            table,
            conditions: Vec::new(),
            requester: None,
            size: None,
            offset: 0,
        }
    }

    /// Parse `{table: {column: value | {op: operand}}}`.
    pub fn with_filters(mut self, filters: &Value) -> Result<Self> {
        let tables = match filters {
            Value::Null => return Ok(self),
            Value::Object(map) => map,
            _ => return Err(Error::validation("filters must be an object keyed by table")),
        };
        for (table_name, columns) in tables {
            let columns = columns.as_object().ok_or_else(|| {
                Error::validation(format!("filters for {} must be an object", table_name))
            })?;
            for (column, spec) in columns {
                let condition = parse_condition(table_name, column, spec)?;
                check_types(&condition)?;
                self.conditions.push(condition);
            }
        }
        Ok(self)
    }

    pub fn requested_by(mut self, requester: Option<&str>) -> Self {
        self.requester = requester.map(str::to_string);
        self
    }

    pub fn page(mut self, size: Option<usize>, offset: usize) -> Self {
        self.size = size;
        self.offset = offset;
        self
    }

    /// Joined tables in first-mention order, excluding the primary.
    pub fn joins(&self) -> Vec<&str> {
        let mut joins: Vec<&str> = Vec::new();
        for c in &self.conditions {
            if c.table != self.table.name() && !joins.contains(&c.table.as_str()) {
                joins.push(&c.table);
            }
        }
        joins
    }
}

fn parse_condition(table: &str, column: &str, spec: &Value) -> Result<Condition> {
    let (op, operand) = match spec {
        Value::Object(ops) => {
            let mut entries = ops.iter();
            let (op, operand) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => {
                    return Err(Error::validation(format!(
                        "{}.{} needs exactly one operator",
                        table, column
                    )))
                }
            };
            let op = Op::parse(op)
                .ok_or_else(|| Error::validation(format!("unknown operator {}", op)))?;
            (op, parse_operand(op, operand, table, column)?)
        }
        other => (Op::Eq, parse_operand(Op::Eq, other, table, column)?),
    };
    Ok(Condition {
        table: table.to_string(),
        column: column.to_string(),
        op,
        operand,
    })
}

fn parse_operand(op: Op, value: &Value, table: &str, column: &str) -> Result<Operand> {
    match (op, value) {
        (Op::In | Op::NotIn, Value::Array(values)) => values
            .iter()
            .map(|v| {
                Scalar::from_json(v).ok_or_else(|| {
                    Error::validation(format!("{}.{} list holds a non-scalar value", table, column))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Operand::List),
        (Op::In | Op::NotIn, _) => Err(Error::validation(format!(
            "{}.{}: in/!in take a list operand",
            table, column
        ))),
        (_, value) => Scalar::from_json(value).map(Operand::Scalar).ok_or_else(|| {
            Error::validation(format!(
                "{}.{}: comparison operand must be a number, string or bool",
                table, column
            ))
        }),
    }
}

/// Column type of a filterable column, including the `user.id` pseudo column.
pub(crate) fn column_kind(table: &str, column: &str) -> Result<ColumnKind> {
    if table == USER_TABLE {
        return match column {
            "id" => Ok(ColumnKind::Text),
            _ => Err(Error::validation(format!("user has no column {}", column))),
        };
    }
    let t = Table::parse(table).ok_or_else(|| Error::validation(format!("unknown table {}", table)))?;
    match t.column(column) {
        Some(c) if c.kind != ColumnKind::Json => Ok(c.kind),
        Some(_) => Err(Error::validation(format!("{}.{} is not searchable", table, column))),
        None => Err(Error::validation(format!("{} has no column {}", table, column))),
    }
}

fn check_types(c: &Condition) -> Result<()> {
    let kind = column_kind(&c.table, &c.column)?;
    let scalars: Vec<&Scalar> = match &c.operand {
        Operand::Scalar(s) => vec![s],
        Operand::List(list) => list.iter().collect(),
    };
    if c.op.is_ordering() && kind != ColumnKind::Number {
        return Err(Error::validation(format!(
            "{}.{} only supports == and != with string or bool operands",
            c.table, c.column
        )));
    }
    for s in scalars {
        if s.kind() != kind {
            return Err(Error::validation(format!(
                "{}.{} expects {:?} operands, got {:?}",
                c.table,
                c.column,
                kind,
                s.kind()
            )));
        }
    }
    Ok(())
}
