use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::dates::{parse_day, DateSpan, Day};
use crate::engine::ReservationRequest;
use crate::model::*;

/// The only LISTEN channel: the caller's own notification inbox.
pub const NOTIFY_CHANNEL: &str = "notifications";

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProperty {
        facts: PropertyFacts,
    },
    UpdateProperty {
        id: Ulid,
        patch: PropertyPatch,
    },
    DeleteProperty {
        id: Ulid,
    },
    SelectProperties {
        id: Option<Ulid>,
    },
    InsertRange {
        property_id: Ulid,
        range: PriceRange,
    },
    /// Multi-row INSERT: one property, all-or-nothing.
    BulkInsertRanges {
        property_id: Ulid,
        ranges: Vec<PriceRange>,
    },
    UpdateRange {
        id: Ulid,
        patch: RangePatch,
    },
    DeleteRange {
        id: Ulid,
    },
    SelectRanges {
        property_id: Ulid,
        window: Option<DateSpan>,
    },
    InsertReservation {
        request: ReservationRequest,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectReservations {
        property_id: Ulid,
        status: Option<ReservationStatus>,
    },
    SelectQuote {
        property_id: Ulid,
        check_in: Day,
        check_out: Day,
    },
    SelectEstimate {
        property_id: Ulid,
        reference: Option<Day>,
        nights: u32,
    },
    SelectCalendar {
        property_id: Ulid,
        window: DateSpan,
    },
    SelectDayStatus {
        property_id: Ulid,
        day: Day,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if let Some(rest) = upper.strip_prefix("UNLISTEN ") {
        return Ok(Command::Unlisten {
            channel: rest.trim().to_lowercase(),
        });
    }
    if let Some(rest) = upper.strip_prefix("LISTEN ") {
        return Ok(Command::Listen {
            channel: rest.trim().to_lowercase(),
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

const PROPERTY_COLUMNS: &[&str] = &["id", "host_id", "minimum_stay", "number_of_guests", "is_active"];
const RANGE_COLUMNS: &[&str] = &["id", "property_id", "start_date", "end_date", "available", "price"];
const RESERVATION_COLUMNS: &[&str] = &["id", "property_id", "check_in", "check_out", "guests_count"];

/// One VALUES row keyed by column name. Without a column list, values are positional.
struct Row<'a> {
    values: HashMap<String, &'a Expr>,
    table: &'static str,
}

impl<'a> Row<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.get(col).copied().filter(|e| !is_null(e))
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }
}

fn insert_rows<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    defaults: &[&str],
) -> Result<Vec<Row<'a>>, SqlError> {
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    for col in &columns {
        if !defaults.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(table, col.clone()));
        }
    }
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = body.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    if values.rows.is_empty() {
        return Err(SqlError::Parse("empty VALUES".into()));
    }
    values
        .rows
        .iter()
        .map(|row| {
            if row.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), row.len()));
            }
            Ok(Row {
                values: columns.iter().cloned().zip(row.iter()).collect(),
                table,
            })
        })
        .collect()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "properties" => {
            let rows = insert_rows(insert, "properties", PROPERTY_COLUMNS)?;
            let [row] = rows.as_slice() else {
                return Err(SqlError::Unsupported("multi-row INSERT INTO properties".into()));
            };
            Ok(Command::InsertProperty {
                facts: PropertyFacts {
                    id: parse_ulid_expr(row.require("id")?)?,
                    host_id: parse_ulid_expr(row.require("host_id")?)?,
                    minimum_stay: row.get("minimum_stay").map(parse_u32_expr).transpose()?.unwrap_or(1),
                    number_of_guests: row
                        .get("number_of_guests")
                        .map(parse_u32_expr)
                        .transpose()?
                        .unwrap_or(1),
                    is_active: row.get("is_active").map(parse_bool_expr).transpose()?.unwrap_or(true),
                },
            })
        }
        "price_ranges" => {
            let rows = insert_rows(insert, "price_ranges", RANGE_COLUMNS)?;
            let mut parsed = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let pair = range_row(row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                parsed.push(pair);
            }
            let property_id = parsed[0].0;
            if parsed.iter().any(|(pid, _)| *pid != property_id) {
                return Err(SqlError::Unsupported(
                    "multi-row INSERT must target a single property".into(),
                ));
            }
            let mut ranges: Vec<PriceRange> = parsed.into_iter().map(|(_, r)| r).collect();
            if ranges.len() == 1 {
                let range = ranges.remove(0);
                Ok(Command::InsertRange { property_id, range })
            } else {
                Ok(Command::BulkInsertRanges { property_id, ranges })
            }
        }
        "reservations" => {
            let rows = insert_rows(insert, "reservations", RESERVATION_COLUMNS)?;
            let [row] = rows.as_slice() else {
                return Err(SqlError::Unsupported("multi-row INSERT INTO reservations".into()));
            };
            // Dates stay raw; missing or malformed ones are judged by the validator.
            Ok(Command::InsertReservation {
                request: ReservationRequest {
                    id: parse_ulid_expr(row.require("id")?)?,
                    property_id: parse_ulid_expr(row.require("property_id")?)?,
                    check_in: row.get("check_in").map(parse_text_expr).transpose()?,
                    check_out: row.get("check_out").map(parse_text_expr).transpose()?,
                    guests_count: row.get("guests_count").map(parse_i64_expr).transpose()?.unwrap_or(1),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn range_row(row: &Row<'_>) -> Result<(Ulid, PriceRange), SqlError> {
    let start = parse_day_expr(row.require("start_date")?)?;
    let end = parse_day_expr(row.require("end_date")?)?;
    let span = DateSpan::try_new(start, end)
        .ok_or_else(|| SqlError::Parse("end_date must be after start_date".into()))?;
    let range = PriceRange {
        id: parse_ulid_expr(row.require("id")?)?,
        span,
        available: row.get("available").map(parse_bool_expr).transpose()?.unwrap_or(true),
        price: row
            .get("price")
            .map(parse_decimal_expr)
            .transpose()?
            .unwrap_or(Decimal::ZERO),
    };
    Ok((parse_ulid_expr(row.require("property_id")?)?, range))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut set: HashMap<String, &Expr> = HashMap::new();
    for a in assignments {
        let AssignmentTarget::ColumnName(name) = &a.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let col = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column".into()))?;
        set.insert(col, &a.value);
    }
    let known = |allowed: &[&str], table: &'static str| -> Result<(), SqlError> {
        match set.keys().find(|c| !allowed.contains(&c.as_str())) {
            Some(col) => Err(SqlError::UnknownColumn(table, col.clone())),
            None => Ok(()),
        }
    };

    match table.as_str() {
        "properties" => {
            known(&["minimum_stay", "number_of_guests", "is_active"], "properties")?;
            Ok(Command::UpdateProperty {
                id,
                patch: PropertyPatch {
                    minimum_stay: set.get("minimum_stay").map(|e| parse_u32_expr(e)).transpose()?,
                    number_of_guests: set
                        .get("number_of_guests")
                        .map(|e| parse_u32_expr(e))
                        .transpose()?,
                    is_active: set.get("is_active").map(|e| parse_bool_expr(e)).transpose()?,
                },
            })
        }
        "price_ranges" => {
            known(&["start_date", "end_date", "available", "price"], "price_ranges")?;
            let start = set.get("start_date").map(|e| parse_day_expr(e)).transpose()?;
            let end = set.get("end_date").map(|e| parse_day_expr(e)).transpose()?;
            let span = match (start, end) {
                (None, None) => None,
                (Some(s), Some(e)) => Some(
                    DateSpan::try_new(s, e)
                        .ok_or_else(|| SqlError::Parse("end_date must be after start_date".into()))?,
                ),
                _ => {
                    return Err(SqlError::Parse(
                        "start_date and end_date must be set together".into(),
                    ));
                }
            };
            Ok(Command::UpdateRange {
                id,
                patch: RangePatch {
                    span,
                    available: set.get("available").map(|e| parse_bool_expr(e)).transpose()?,
                    price: set.get("price").map(|e| parse_decimal_expr(e)).transpose()?,
                },
            })
        }
        "reservations" => {
            known(&["status"], "reservations")?;
            let expr = set
                .get("status")
                .ok_or(SqlError::MissingColumn("reservations", "status"))?;
            let raw = parse_text_expr(expr)?;
            let status = ReservationStatus::parse(&raw)
                .ok_or_else(|| SqlError::Parse(format!("unknown status {raw:?}")))?;
            Ok(Command::UpdateReservationStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "properties" => Ok(Command::DeleteProperty { id }),
        "price_ranges" => Ok(Command::DeleteRange { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `col op value` predicates joined by AND. The operator is not interpreted: each
/// pseudo-table gives its columns one meaning.
struct Filters<'a> {
    preds: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut preds = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut preds)?;
        }
        Ok(Self { preds })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.preds.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.require(col)?)
    }

    fn day(&self, col: &'static str) -> Result<Day, SqlError> {
        parse_day_expr(self.require(col)?)
    }

    fn window(&self) -> Result<Option<DateSpan>, SqlError> {
        match (self.get("start_date"), self.get("end_date")) {
            (None, None) => Ok(None),
            (Some(s), Some(e)) => {
                let (s, e) = (parse_day_expr(s)?, parse_day_expr(e)?);
                DateSpan::try_new(s, e)
                    .map(Some)
                    .ok_or_else(|| SqlError::Parse("end_date must be after start_date".into()))
            }
            (None, Some(_)) => Err(SqlError::MissingFilter("start_date")),
            (Some(_), None) => Err(SqlError::MissingFilter("end_date")),
        }
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let f = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "properties" => Ok(Command::SelectProperties {
            id: f.get("id").map(parse_ulid_expr).transpose()?,
        }),
        "price_ranges" => Ok(Command::SelectRanges {
            property_id: f.ulid("property_id")?,
            window: f.window()?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            property_id: f.ulid("property_id")?,
            status: f
                .get("status")
                .map(|e| {
                    let raw = parse_text_expr(e)?;
                    ReservationStatus::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status {raw:?}")))
                })
                .transpose()?,
        }),
        "quote" => Ok(Command::SelectQuote {
            property_id: f.ulid("property_id")?,
            check_in: f.day("check_in")?,
            check_out: f.day("check_out")?,
        }),
        "estimate" => Ok(Command::SelectEstimate {
            property_id: f.ulid("property_id")?,
            reference: f.get("reference").map(parse_day_expr).transpose()?,
            nights: parse_u32_expr(f.require("nights")?)?,
        }),
        "calendar" => Ok(Command::SelectCalendar {
            property_id: f.ulid("property_id")?,
            window: f.window()?.ok_or(SqlError::MissingFilter("start_date"))?,
        }),
        "day_status" => Ok(Command::SelectDayStatus {
            property_id: f.ulid("property_id")?,
            day: f.day("day")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Literal text of a string or number value.
fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_day_expr(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_text_expr(expr)?;
    parse_day(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

fn parse_decimal_expr(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal_expr(expr)?);
    }
    let s = parse_text_expr(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    let s = parse_text_expr(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: {c} is required"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
