use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Lifecycle transition requested through `UPDATE sessions SET status = ..`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVerb {
    Approve,
    Reject,
    Start,
    Complete,
    Cancel,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertMentor {
        id: Ulid,
        login: String,
        name: String,
    },
    InsertStudent {
        id: Ulid,
        login: String,
        name: String,
    },
    InsertRule {
        mentor_id: Ulid,
        rule: AvailabilityRule,
    },
    DeleteRule {
        mentor_id: Ulid,
        day: u8,
    },
    InsertSession {
        id: Ulid,
        mentor_id: Ulid,
        student_id: Ulid,
        start: Ts,
        end: Option<Ts>,
        subject: String,
        choice: Option<StudentChoice>,
    },
    UpdateSessionStatus {
        id: Ulid,
        verb: SessionVerb,
        reason: Option<String>,
    },
    RateSession {
        id: Ulid,
        rating: u8,
        feedback: Option<String>,
    },
    DeleteSession {
        id: Ulid,
    },
    InsertReschedule {
        session_id: Ulid,
        start: Ts,
        end: Ts,
        reason: String,
    },
    ResolveReschedule {
        session_id: Ulid,
        approve: bool,
        reason: Option<String>,
    },
    SelectSlots {
        mentor_id: Ulid,
        from_date: NaiveDate,
        days: u32,
        exclude_session: Option<Ulid>,
    },
    SelectSessions {
        mentor_id: Option<Ulid>,
        student_id: Option<Ulid>,
        from: Option<Ts>,
        to: Option<Ts>,
    },
    SelectJoinInfo {
        session_id: Ulid,
    },
    SelectRules {
        mentor_id: Ulid,
    },
    SelectMentors,
    SelectStudents,
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "mentors" | "students" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("mentors/students", 3, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let login = parse_string(&values[1])?;
            let name = parse_string(&values[2])?;
            if table == "mentors" {
                Ok(Command::InsertMentor { id, login, name })
            } else {
                Ok(Command::InsertStudent { id, login, name })
            }
        }
        "availability" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("availability", 4, values.len()));
            }
            let available = if values.len() >= 5 {
                parse_bool(&values[4])?
            } else {
                true
            };
            Ok(Command::InsertRule {
                mentor_id: parse_ulid(&values[0])?,
                rule: AvailabilityRule {
                    day: parse_u8(&values[1])?,
                    start_hour: parse_u8(&values[2])?,
                    end_hour: parse_u8(&values[3])?,
                    available,
                },
            })
        }
        "sessions" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("sessions", 6, values.len()));
            }
            let choice = if values.len() >= 7 {
                parse_choice_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertSession {
                id: parse_ulid(&values[0])?,
                mentor_id: parse_ulid(&values[1])?,
                student_id: parse_ulid(&values[2])?,
                start: parse_ts(&values[3])?,
                end: parse_ts_or_null(&values[4])?,
                subject: parse_string(&values[5])?,
                choice,
            })
        }
        "reschedules" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("reschedules", 4, values.len()));
            }
            Ok(Command::InsertReschedule {
                session_id: parse_ulid(&values[0])?,
                start: parse_ts(&values[1])?,
                end: parse_ts(&values[2])?,
                reason: parse_string(&values[3])?,
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
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = assignment_column(a)?;
        set.push((col, &a.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "sessions" => {
            let id = extract_where_ulid(selection, "id")?;
            if let Some(status_expr) = get("status") {
                let status = parse_string(status_expr)?;
                let verb = match status.as_str() {
                    "approved" => SessionVerb::Approve,
                    "rejected" => SessionVerb::Reject,
                    "active" => SessionVerb::Start,
                    "completed" => SessionVerb::Complete,
                    "cancelled" => SessionVerb::Cancel,
                    other => {
                        return Err(SqlError::Parse(format!(
                            "status '{other}' is not a settable target"
                        )));
                    }
                };
                let reason = match get("reason") {
                    Some(e) => Some(parse_string(e)?),
                    None => None,
                };
                Ok(Command::UpdateSessionStatus { id, verb, reason })
            } else if let Some(rating_expr) = get("rating") {
                let feedback = match get("feedback") {
                    Some(e) => Some(parse_string(e)?),
                    None => None,
                };
                Ok(Command::RateSession {
                    id,
                    rating: parse_u8(rating_expr)?,
                    feedback,
                })
            } else {
                Err(SqlError::Unsupported(
                    "sessions UPDATE must set status or rating".into(),
                ))
            }
        }
        "reschedules" => {
            let session_id = extract_where_ulid(selection, "session_id")?;
            let status_expr = get("status").ok_or(SqlError::MissingFilter("status"))?;
            let status = parse_string(status_expr)?;
            let approve = match status.as_str() {
                "approved" => true,
                "rejected" => false,
                other => {
                    return Err(SqlError::Parse(format!(
                        "reschedule status must be approved or rejected, got '{other}'"
                    )));
                }
            };
            let reason = match get("reason") {
                Some(e) => Some(parse_string(e)?),
                None => None,
            };
            Ok(Command::ResolveReschedule {
                session_id,
                approve,
                reason,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "sessions" => Ok(Command::DeleteSession {
            id: extract_where_ulid(&delete.selection, "id")?,
        }),
        "availability" => {
            let filters = collect_filters(&delete.selection)?;
            let mentor_id =
                eq_filter(&filters, "mentor_id").ok_or(SqlError::MissingFilter("mentor_id"))?;
            let day = eq_filter(&filters, "day").ok_or(SqlError::MissingFilter("day"))?;
            Ok(Command::DeleteRule {
                mentor_id: parse_ulid(mentor_id)?,
                day: parse_u8(day)?,
            })
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
    let filters = collect_filters(&select.selection)?;

    match table.as_str() {
        "slots" => {
            let mentor_id = eq_filter(&filters, "mentor_id")
                .ok_or(SqlError::MissingFilter("mentor_id"))
                .and_then(parse_ulid)?;
            let from_date = eq_filter(&filters, "from_date")
                .ok_or(SqlError::MissingFilter("from_date"))
                .and_then(parse_date)?;
            let days = eq_filter(&filters, "days")
                .ok_or(SqlError::MissingFilter("days"))
                .and_then(parse_u32)?;
            let exclude_session = match eq_filter(&filters, "exclude_session") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            };
            Ok(Command::SelectSlots {
                mentor_id,
                from_date,
                days,
                exclude_session,
            })
        }
        "sessions" => {
            let mentor_id = match eq_filter(&filters, "mentor_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            };
            let student_id = match eq_filter(&filters, "student_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            };
            let from = match bound_filter(&filters, "start", FilterOp::GtEq) {
                Some(e) => Some(parse_ts(e)?),
                None => None,
            };
            let to = match bound_filter(&filters, "end", FilterOp::LtEq) {
                Some(e) => Some(parse_ts(e)?),
                None => None,
            };
            Ok(Command::SelectSessions {
                mentor_id,
                student_id,
                from,
                to,
            })
        }
        "join_info" => Ok(Command::SelectJoinInfo {
            session_id: eq_filter(&filters, "session_id")
                .ok_or(SqlError::MissingFilter("session_id"))
                .and_then(parse_ulid)?,
        }),
        "availability" => Ok(Command::SelectRules {
            mentor_id: eq_filter(&filters, "mentor_id")
                .ok_or(SqlError::MissingFilter("mentor_id"))
                .and_then(parse_ulid)?,
        }),
        "mentors" => Ok(Command::SelectMentors),
        "students" => Ok(Command::SelectStudents),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause walking ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

/// Flatten an AND-chained WHERE clause into (column, op, value) triples.
/// Unknown operators are ignored, unknown columns surface at lookup time.
fn collect_filters(selection: &Option<Expr>) -> Result<Vec<(String, FilterOp, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk_filters(expr, &mut out);
    }
    Ok(out)
}

fn walk_filters(expr: &Expr, out: &mut Vec<(String, FilterOp, Expr)>) {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_filters(left, out);
                walk_filters(right, out);
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, FilterOp::Eq, (**right).clone()));
                }
            }
            ast::BinaryOperator::GtEq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, FilterOp::GtEq, (**right).clone()));
                }
            }
            ast::BinaryOperator::LtEq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, FilterOp::LtEq, (**right).clone()));
                }
            }
            _ => {}
        }
    }
}

fn eq_filter<'a>(filters: &'a [(String, FilterOp, Expr)], col: &str) -> Option<&'a Expr> {
    bound_filter(filters, col, FilterOp::Eq)
}

fn bound_filter<'a>(
    filters: &'a [(String, FilterOp, Expr)],
    col: &str,
    op: FilterOp,
) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|(c, o, _)| c == col && *o == op)
        .map(|(_, _, e)| e)
}

fn extract_where_ulid(selection: &Option<Expr>, col: &'static str) -> Result<Ulid, SqlError> {
    let filters = collect_filters(selection)?;
    eq_filter(&filters, col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_ulid)
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

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
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

/// Timestamps come in as quoted `YYYY-MM-DD HH:MM[:SS]`.
fn parse_ts(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad timestamp '{s}': {e}")))
}

fn parse_ts_or_null(expr: &Expr) -> Result<Option<NaiveDateTime>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_ts(expr)?))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_choice_or_null(expr: &Expr) -> Result<Option<StudentChoice>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let s = parse_string(expr)?;
    match s.as_str() {
        "free" => Ok(Some(StudentChoice::Free)),
        "coffee" => Ok(Some(StudentChoice::Coffee)),
        "ice-cream" | "ice_cream" => Ok(Some(StudentChoice::IceCream)),
        other => Err(SqlError::Parse(format!("bad student choice: {other}"))),
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
    fn parse_insert_mentor() {
        let cmd = parse_sql(&format!(
            "INSERT INTO mentors (id, login, name) VALUES ('{ID}', 'amy', 'Amy Chen')"
        ))
        .unwrap();
        match cmd {
            Command::InsertMentor { id, login, name } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(login, "amy");
                assert_eq!(name, "Amy Chen");
            }
            other => panic!("expected InsertMentor, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_rule_defaults_available() {
        let cmd = parse_sql(&format!(
            "INSERT INTO availability (mentor_id, day, start_hour, end_hour) VALUES ('{ID}', 1, 9, 17)"
        ))
        .unwrap();
        match cmd {
            Command::InsertRule { rule, .. } => {
                assert_eq!(rule.day, 1);
                assert_eq!(rule.start_hour, 9);
                assert_eq!(rule.end_hour, 17);
                assert!(rule.available);
            }
            other => panic!("expected InsertRule, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_session_with_null_end() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO sessions (id, mentor_id, student_id, start, "end", subject) VALUES ('{ID}', '{ID}', '{ID}', '2026-03-02 10:00', NULL, 'intro call')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertSession {
                start,
                end,
                subject,
                choice,
                ..
            } => {
                assert_eq!(start.format("%H:%M").to_string(), "10:00");
                assert!(end.is_none());
                assert_eq!(subject, "intro call");
                assert!(choice.is_none());
            }
            other => panic!("expected InsertSession, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_session_with_choice() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO sessions (id, mentor_id, student_id, start, "end", subject, choice) VALUES ('{ID}', '{ID}', '{ID}', '2026-03-02 10:00:00', '2026-03-02 11:00:00', 'algebra', 'ice-cream')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertSession { end, choice, .. } => {
                assert!(end.is_some());
                assert_eq!(choice, Some(StudentChoice::IceCream));
            }
            other => panic!("expected InsertSession, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_status_approve() {
        let cmd = parse_sql(&format!(
            "UPDATE sessions SET status = 'approved' WHERE id = '{ID}'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::UpdateSessionStatus {
                id: Ulid::from_string(ID).unwrap(),
                verb: SessionVerb::Approve,
                reason: None,
            }
        );
    }

    #[test]
    fn parse_update_status_reject_with_reason() {
        let cmd = parse_sql(&format!(
            "UPDATE sessions SET status = 'rejected', reason = 'fully booked' WHERE id = '{ID}'"
        ))
        .unwrap();
        match cmd {
            Command::UpdateSessionStatus { verb, reason, .. } => {
                assert_eq!(verb, SessionVerb::Reject);
                assert_eq!(reason.as_deref(), Some("fully booked"));
            }
            other => panic!("expected UpdateSessionStatus, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_unknown_status_errors() {
        let result = parse_sql(&format!(
            "UPDATE sessions SET status = 'requested' WHERE id = '{ID}'"
        ));
        assert!(result.is_err());
    }

    #[test]
    fn parse_rate_session() {
        let cmd = parse_sql(&format!(
            "UPDATE sessions SET rating = 5, feedback = 'great' WHERE id = '{ID}'"
        ))
        .unwrap();
        match cmd {
            Command::RateSession {
                rating, feedback, ..
            } => {
                assert_eq!(rating, 5);
                assert_eq!(feedback.as_deref(), Some("great"));
            }
            other => panic!("expected RateSession, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reschedule() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO reschedules (session_id, start, "end", reason) VALUES ('{ID}', '2026-03-03 16:00', '2026-03-03 17:00', 'clash with exam')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertReschedule { reason, .. } => {
                assert_eq!(reason, "clash with exam");
            }
            other => panic!("expected InsertReschedule, got {other:?}"),
        }
    }

    #[test]
    fn parse_resolve_reschedule() {
        let approve = parse_sql(&format!(
            "UPDATE reschedules SET status = 'approved' WHERE session_id = '{ID}'"
        ))
        .unwrap();
        assert!(matches!(
            approve,
            Command::ResolveReschedule { approve: true, .. }
        ));

        let reject = parse_sql(&format!(
            "UPDATE reschedules SET status = 'rejected', reason = 'no' WHERE session_id = '{ID}'"
        ))
        .unwrap();
        assert!(matches!(
            reject,
            Command::ResolveReschedule {
                approve: false,
                ..
            }
        ));
    }

    #[test]
    fn parse_select_slots() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM slots WHERE mentor_id = '{ID}' AND from_date = '2026-03-02' AND days = 7"
        ))
        .unwrap();
        match cmd {
            Command::SelectSlots {
                days,
                exclude_session,
                from_date,
                ..
            } => {
                assert_eq!(days, 7);
                assert!(exclude_session.is_none());
                assert_eq!(from_date.to_string(), "2026-03-02");
            }
            other => panic!("expected SelectSlots, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_slots_with_exclusion() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM slots WHERE mentor_id = '{ID}' AND from_date = '2026-03-02' AND days = 7 AND exclude_session = '{ID}'"
        ))
        .unwrap();
        assert!(matches!(
            cmd,
            Command::SelectSlots {
                exclude_session: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parse_select_sessions_with_range() {
        let cmd = parse_sql(&format!(
            r#"SELECT * FROM sessions WHERE mentor_id = '{ID}' AND start >= '2026-03-01 00:00' AND "end" <= '2026-03-08 00:00'"#
        ))
        .unwrap();
        match cmd {
            Command::SelectSessions {
                mentor_id,
                student_id,
                from,
                to,
            } => {
                assert!(mentor_id.is_some());
                assert!(student_id.is_none());
                assert!(from.is_some());
                assert!(to.is_some());
            }
            other => panic!("expected SelectSessions, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_join_info() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM join_info WHERE session_id = '{ID}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::SelectJoinInfo { .. }));
    }

    #[test]
    fn parse_delete_rule_needs_both_filters() {
        let ok = parse_sql(&format!(
            "DELETE FROM availability WHERE mentor_id = '{ID}' AND day = 1"
        ))
        .unwrap();
        assert!(matches!(ok, Command::DeleteRule { day: 1, .. }));

        let missing = parse_sql(&format!(
            "DELETE FROM availability WHERE mentor_id = '{ID}'"
        ));
        assert!(matches!(missing, Err(SqlError::MissingFilter("day"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let result = parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{ID}')"));
        assert!(matches!(result, Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let result = parse_sql(&format!(
            r#"INSERT INTO sessions (id, mentor_id, student_id, start, "end", subject) VALUES ('{ID}', '{ID}', '{ID}', '2026-03-02 10:00', NULL, 'a'), ('{ID}', '{ID}', '{ID}', '2026-03-02 11:00', NULL, 'b')"#
        ));
        assert!(matches!(result, Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_bad_timestamp_errors() {
        let result = parse_sql(&format!(
            r#"INSERT INTO sessions (id, mentor_id, student_id, start, "end", subject) VALUES ('{ID}', '{ID}', '{ID}', 'tomorrow', NULL, 'a')"#
        ));
        assert!(matches!(result, Err(SqlError::Parse(_))));
    }
}
