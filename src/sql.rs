use chrono::{DateTime, NaiveDate, NaiveTime, Weekday};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ResourceDraft;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource(ResourceDraft),
    UpdateResource(ResourceDraft),
    DeleteResource {
        id: Ulid,
    },
    SelectResources,
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        /// Defaults to the connected user.
        owner_id: Option<Ulid>,
        title: String,
        starts_at: Ms,
        ends_at: Ms,
        recurrence: Option<RecurrenceRule>,
    },
    ExtendBooking {
        booking_id: Ulid,
        ends_at: Ms,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        resource_id: Ulid,
        date: NaiveDate,
    },
    SelectFreeWindows {
        resource_id: Ulid,
        date: NaiveDate,
        min_duration: Option<u32>,
    },
    SelectStats,
    Listen {
        channel: String,
    },
}

const RESOURCE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "work_hours_start",
    "work_hours_end",
    "min_duration",
    "max_duration",
    "capacity",
];

const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "resource_id",
    "owner_id",
    "title",
    "starts_at",
    "ends_at",
    "recurrence",
    "days",
    "until",
];

const EXTENSION_COLUMNS: &[&str] = &["booking_id", "ends_at"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').trim().to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "resources" => Ok(Command::InsertResource(parse_resource_row(&insert_row(
            insert,
            "resources",
            RESOURCE_COLUMNS,
        )?)?)),
        "resource_updates" => Ok(Command::UpdateResource(parse_resource_row(&insert_row(
            insert,
            "resource_updates",
            RESOURCE_COLUMNS,
        )?)?)),
        "bookings" => parse_booking_row(&insert_row(insert, "bookings", BOOKING_COLUMNS)?),
        "extensions" => {
            let row = insert_row(insert, "extensions", EXTENSION_COLUMNS)?;
            Ok(Command::ExtendBooking {
                booking_id: parse_ulid_expr(row.require("booking_id")?)?,
                ends_at: parse_instant_expr(row.require("ends_at")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_resource_row(row: &InsertRow) -> Result<ResourceDraft, SqlError> {
    let id = parse_ulid_expr(row.require("id")?)?;
    let name = parse_string_expr(row.require("name")?)?;
    let mut draft = ResourceDraft::new(id, name);
    if let Some(expr) = row.get_non_null("work_hours_start") {
        draft.work_hours_start = parse_time_expr(expr)?;
    }
    if let Some(expr) = row.get_non_null("work_hours_end") {
        draft.work_hours_end = parse_time_expr(expr)?;
    }
    if let Some(expr) = row.get_non_null("min_duration") {
        draft.min_duration = parse_u32(expr)?;
    }
    if let Some(expr) = row.get_non_null("max_duration") {
        draft.max_duration = parse_u32(expr)?;
    }
    if let Some(expr) = row.get_non_null("capacity") {
        draft.capacity = Some(parse_u32(expr)?);
    }
    Ok(draft)
}

fn parse_booking_row(row: &InsertRow) -> Result<Command, SqlError> {
    let recurrence = match row.get_non_null("recurrence") {
        None => None,
        Some(expr) => {
            let kind = match parse_string_expr(expr)?.to_lowercase().as_str() {
                "daily" => RecurrenceKind::Daily,
                "weekly" => RecurrenceKind::Weekly,
                other => return Err(SqlError::Parse(format!("unknown recurrence: {other}"))),
            };
            let days_of_week = match row.get_non_null("days") {
                Some(expr) => parse_days(&parse_string_expr(expr)?)?,
                None => DaySet::default(),
            };
            let until = parse_date_expr(row.require("until")?)?;
            Some(RecurrenceRule { kind, days_of_week, until })
        }
    };

    Ok(Command::InsertBooking {
        id: parse_ulid_expr(row.require("id")?)?,
        resource_id: parse_ulid_expr(row.require("resource_id")?)?,
        owner_id: row.get_non_null("owner_id").map(parse_ulid_expr).transpose()?,
        title: match row.get_non_null("title") {
            Some(expr) => parse_string_expr(expr)?,
            None => String::new(),
        },
        starts_at: parse_instant_expr(row.require("starts_at")?)?,
        ends_at: parse_instant_expr(row.require("ends_at")?)?,
        recurrence,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "stats" => Ok(Command::SelectStats),
        "availability" => Ok(Command::SelectAvailability {
            resource_id: parse_ulid_expr(required(&filters, &["resource_id"], "resource_id")?)?,
            date: parse_date_expr(required(&filters, &["date", "day"], "date")?)?,
        }),
        "free_windows" => Ok(Command::SelectFreeWindows {
            resource_id: parse_ulid_expr(required(&filters, &["resource_id"], "resource_id")?)?,
            date: parse_date_expr(required(&filters, &["date", "day"], "date")?)?,
            min_duration: find_eq(&filters, &["min_duration"]).map(parse_u32).transpose()?,
        }),
        "bookings" => parse_booking_filters(&filters),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_filters(filters: &[Filter]) -> Result<Command, SqlError> {
    if let Some(expr) = find_eq(filters, &["id"]) {
        return Ok(Command::SelectBooking { id: parse_ulid_expr(expr)? });
    }

    let mut filter = BookingFilter::default();
    for f in filters {
        match (f.column.as_str(), f.op) {
            ("resource_id", FilterOp::Eq) => filter.resource_id = Some(parse_ulid_expr(&f.value)?),
            ("owner_id", FilterOp::Eq) => filter.owner_id = Some(parse_ulid_expr(&f.value)?),
            ("status", FilterOp::Eq) => {
                let s = parse_string_expr(&f.value)?;
                let status = BookingStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))?;
                filter.status = Some(status);
            }
            ("date" | "day", FilterOp::Eq) => {
                let date = parse_date_expr(&f.value)?;
                filter.from = Some(date);
                filter.to = Some(date);
            }
            ("date" | "day", FilterOp::GtEq) => filter.from = Some(parse_date_expr(&f.value)?),
            ("date" | "day", FilterOp::LtEq) => filter.to = Some(parse_date_expr(&f.value)?),
            ("upcoming", FilterOp::Eq) => filter.upcoming = parse_bool(&f.value)?,
            (col, _) => return Err(SqlError::Unsupported(format!("filter on {col}"))),
        }
    }
    Ok(Command::SelectBookings { filter })
}

// ── WHERE clauses ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

#[derive(Debug)]
struct Filter {
    column: String,
    op: FilterOp,
    value: Expr,
}

/// Flatten a conjunction of `column <op> value` comparisons.
fn collect_filters(expr: &Expr, out: &mut Vec<Filter>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, out)?;
                    return collect_filters(right, out);
                }
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::GtEq,
                ast::BinaryOperator::LtEq => FilterOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push(Filter {
                column,
                op,
                value: right.as_ref().clone(),
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn find_eq<'a>(filters: &'a [Filter], columns: &[&str]) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.op == FilterOp::Eq && columns.contains(&f.column.as_str()))
        .map(|f| &f.value)
}

fn required<'a>(
    filters: &'a [Filter],
    columns: &[&str],
    name: &'static str,
) -> Result<&'a Expr, SqlError> {
    find_eq(filters, columns).ok_or(SqlError::MissingFilter(name))
}

// ── INSERT rows ───────────────────────────────────────────────

/// A single VALUES row keyed by column name.
struct InsertRow {
    values: Vec<(String, Expr)>,
}

impl InsertRow {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn get_non_null(&self, column: &str) -> Option<&Expr> {
        self.get(column)
            .filter(|e| !matches!(extract_value(e), Some(Value::Null)))
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get_non_null(column).ok_or(SqlError::MissingColumn(column))
    }
}

/// Pair the VALUES row with the column list, falling back to the table's
/// positional order when the statement names no columns.
fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<InsertRow, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() > default_columns.len() {
            return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
        }
        default_columns.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|i| i.value.to_lowercase()).collect()
    };
    Ok(InsertRow {
        values: columns.into_iter().zip(values).collect(),
    })
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_filters(sel, &mut filters)?;
    let id = find_eq(&filters, &["id"]).ok_or(SqlError::MissingFilter("id"))?;
    parse_ulid_expr(id)
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_instant_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Ok(ms) = parse_i64_expr(expr) {
        return Ok(ms);
    }
    let s = parse_string_expr(expr)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}")))
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// Comma separated weekdays: `mon,wed` or Monday-based numbers `0,2`.
fn parse_days(s: &str) -> Result<DaySet, SqlError> {
    s.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            if let Ok(n) = d.parse::<u8>() {
                Weekday::try_from(n).map_err(|_| SqlError::Parse(format!("bad weekday: {d}")))
            } else {
                d.parse::<Weekday>().map_err(|_| SqlError::Parse(format!("bad weekday: {d}")))
            }
        })
        .collect()
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
