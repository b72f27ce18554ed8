use rust_decimal::Decimal;
use sqlparser::ast::{
    self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{BookingStatus, ToolPatch};

/// Parsed command from SQL input. Date values stay as raw strings here — the
/// engine owns range validation. Tool deletion and booking deletion do not
/// exist: tools are never removed and bookings only ever change status.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTool {
        id: Ulid,
        name: String,
        category: Option<String>,
        daily_rate: Decimal,
        available: bool,
        location: Option<String>,
    },
    UpdateTool {
        id: Ulid,
        patch: ToolPatch,
    },
    InsertBooking {
        id: Ulid,
        tool_id: Ulid,
        start_date: String,
        end_date: String,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    SelectTools {
        available: Option<bool>,
        category: Option<String>,
        location: Option<String>,
    },
    SelectBookings {
        tool_id: Option<Ulid>,
        status: Option<BookingStatus>,
    },
    SelectAvailability {
        tool_id: Ulid,
        start_date: String,
        end_date: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "tools" => {
            // Positional: id, name, category, daily_rate [, available [, location]]
            if values.len() < 4 {
                return Err(SqlError::WrongArity("tools", 4, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let name = parse_string(&values[1])?;
            let category = parse_string_or_null(&values[2])?;
            let daily_rate = parse_decimal(&values[3])?;
            let available = if values.len() >= 5 {
                parse_bool(&values[4])?
            } else {
                true
            };
            let location = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertTool {
                id,
                name,
                category,
                daily_rate,
                available,
                location,
            })
        }
        "bookings" => {
            // Positional: id, tool_id, start_date, end_date
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                tool_id: parse_ulid(&values[1])?,
                start_date: parse_string(&values[2])?,
                end_date: parse_string(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "tools" => {
            let mut patch = ToolPatch::default();
            for assignment in assignments {
                let col = assignment_column(assignment)?;
                let value = &assignment.value;
                match col.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "category" => patch.category = Some(parse_string_or_null(value)?),
                    "daily_rate" => patch.daily_rate = Some(parse_decimal(value)?),
                    "available" => patch.available = Some(parse_bool(value)?),
                    "location" => patch.location = Some(parse_string_or_null(value)?),
                    other => {
                        return Err(SqlError::Parse(format!("unknown tools column: {other}")));
                    }
                }
            }
            if patch == ToolPatch::default() {
                return Err(SqlError::Parse("empty UPDATE".into()));
            }
            Ok(Command::UpdateTool { id, patch })
        }
        "bookings" => {
            // Dates and price are immutable after creation; only status moves.
            if assignments.len() != 1 {
                return Err(SqlError::Unsupported(
                    "bookings update must set exactly status".into(),
                ));
            }
            let col = assignment_column(&assignments[0])?;
            if col != "status" {
                return Err(SqlError::Unsupported(format!(
                    "bookings column is immutable: {col}"
                )));
            }
            let status = parse_status(&assignments[0].value)?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

    match table.as_str() {
        "tools" => {
            let (mut available, mut category, mut location) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_tool_filters(selection, &mut available, &mut category, &mut location)?;
            }
            Ok(Command::SelectTools {
                available,
                category,
                location,
            })
        }
        "bookings" => {
            let (mut tool_id, mut status) = (None, None);
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut tool_id, &mut status)?;
            }
            Ok(Command::SelectBookings { tool_id, status })
        }
        "availability" => {
            let (mut tool_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut tool_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability {
                tool_id: tool_id.ok_or(SqlError::MissingFilter("tool_id"))?,
                start_date: start.ok_or(SqlError::MissingFilter("start_date"))?,
                end_date: end.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_tool_filters(
    expr: &Expr,
    available: &mut Option<bool>,
    category: &mut Option<String>,
    location: &mut Option<String>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_tool_filters(left, available, category, location)?;
                extract_tool_filters(right, available, category, location)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("available") => *available = Some(parse_bool(right)?),
                Some("category") => *category = Some(parse_string(right)?),
                Some("location") => *location = Some(parse_string(right)?),
                _ => {}
            },
            _ => {}
        },
        // location LIKE '%pune%' / ILIKE — substring match, % stripped.
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            if expr_column_name(expr).as_deref() == Some("location") {
                let raw = parse_string(pattern)?;
                *location = Some(raw.trim_matches('%').to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

fn extract_booking_filters(
    expr: &Expr,
    tool_id: &mut Option<Ulid>,
    status: &mut Option<BookingStatus>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, tool_id, status)?;
                extract_booking_filters(right, tool_id, status)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("tool_id") => *tool_id = Some(parse_ulid(right)?),
                Some("status") => *status = Some(parse_status(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn extract_availability_filters(
    expr: &Expr,
    tool_id: &mut Option<Ulid>,
    start: &mut Option<String>,
    end: &mut Option<String>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, tool_id, start, end)?;
                extract_availability_filters(right, tool_id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("tool_id") {
                    *tool_id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start_date") {
                    *start = Some(parse_string(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end_date") {
                    *end = Some(parse_string(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad decimal: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_decimal(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
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

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("bad status: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_tool_minimal() {
        let sql = format!(
            "INSERT INTO tools (id, name, category, daily_rate) VALUES ('{ID}', 'Rotavator', 'tillage', 500)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTool {
                id,
                name,
                category,
                daily_rate,
                available,
                location,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Rotavator");
                assert_eq!(category.as_deref(), Some("tillage"));
                assert_eq!(daily_rate, Decimal::from(500));
                assert!(available); // defaults on
                assert_eq!(location, None);
            }
            _ => panic!("expected InsertTool, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_tool_full() {
        let sql = format!(
            "INSERT INTO tools (id, name, category, daily_rate, available, location) \
             VALUES ('{ID}', 'Harvester', NULL, '1250.50', false, 'Nashik')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTool {
                category,
                daily_rate,
                available,
                location,
                ..
            } => {
                assert_eq!(category, None);
                assert_eq!(daily_rate, "1250.50".parse::<Decimal>().unwrap());
                assert!(!available);
                assert_eq!(location.as_deref(), Some("Nashik"));
            }
            _ => panic!("expected InsertTool, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_tool_wrong_arity() {
        let sql = format!("INSERT INTO tools (id, name) VALUES ('{ID}', 'Plough')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("tools", 4, 2))
        ));
    }

    #[test]
    fn parse_update_tool_patch() {
        let sql = format!("UPDATE tools SET available = false, daily_rate = 600 WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateTool { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.available, Some(false));
                assert_eq!(patch.daily_rate, Some(Decimal::from(600)));
                assert_eq!(patch.name, None);
            }
            _ => panic!("expected UpdateTool, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_tool_null_clears_field() {
        let sql = format!("UPDATE tools SET location = NULL WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateTool { patch, .. } => {
                assert_eq!(patch.location, Some(None));
            }
            _ => panic!("expected UpdateTool, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_tool_requires_where_id() {
        let sql = "UPDATE tools SET available = false";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, tool_id, start_date, end_date) \
             VALUES ('{ID}', '{ID}', '2024-03-01', '2024-03-04')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                start_date,
                end_date,
                ..
            } => {
                assert_eq!(start_date, "2024-03-01");
                assert_eq!(end_date, "2024-03-04");
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, .. } => {
                assert_eq!(status, BookingStatus::Cancelled);
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_rejects_other_columns() {
        let sql = format!("UPDATE bookings SET start_date = '2024-04-01' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_booking_rejects_bad_status() {
        let sql = format!("UPDATE bookings SET status = 'done' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_tools_no_filter() {
        let cmd = parse_sql("SELECT * FROM tools").unwrap();
        assert_eq!(
            cmd,
            Command::SelectTools {
                available: None,
                category: None,
                location: None,
            }
        );
    }

    #[test]
    fn parse_select_tools_with_filters() {
        let cmd = parse_sql(
            "SELECT * FROM tools WHERE available = true AND category = 'tillage' AND location LIKE '%pune%'",
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectTools {
                available: Some(true),
                category: Some("tillage".into()),
                location: Some("pune".into()),
            }
        );
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!("SELECT * FROM bookings WHERE tool_id = '{ID}' AND status = 'pending'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings { tool_id, status } => {
                assert_eq!(tool_id.unwrap().to_string(), ID);
                assert_eq!(status, Some(BookingStatus::Pending));
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE tool_id = '{ID}' \
             AND start_date >= '2024-03-01' AND end_date <= '2024-03-31'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability {
                tool_id,
                start_date,
                end_date,
            } => {
                assert_eq!(tool_id.to_string(), ID);
                assert_eq!(start_date, "2024-03-01");
                assert_eq!(end_date, "2024-03-31");
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_filter() {
        let sql = format!("SELECT * FROM availability WHERE tool_id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("start_date"))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_delete_unsupported() {
        let sql = format!("DELETE FROM tools WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = format!(
            "INSERT INTO bookings (id, tool_id, start_date, end_date) \
             VALUES ('{ID}', '{ID}', '2024-03-01', '2024-03-02'), ('{ID}', '{ID}', '2024-03-05', '2024-03-06')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_negative_rate_passes_parser() {
        // The parser accepts it; the engine's validation rejects it.
        let sql = format!("INSERT INTO tools (id, name, category, daily_rate) VALUES ('{ID}', 'X', NULL, -5)");
        match parse_sql(&sql).unwrap() {
            Command::InsertTool { daily_rate, .. } => {
                assert_eq!(daily_rate, Decimal::from(-5));
            }
            other => panic!("expected InsertTool, got {other:?}"),
        }
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
