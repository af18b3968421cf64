use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::MentordAuthSource;
use crate::directory::{Principal, Role};
use crate::engine::{Engine, EngineError, SessionFilter};
use crate::limits::DEFAULT_SESSION_MINUTES;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SessionVerb};

pub struct MentordHandler {
    engine: Arc<Engine>,
    query_parser: Arc<MentordQueryParser>,
}

impl MentordHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(MentordQueryParser),
        }
    }

    /// The connection's startup user is the caller token; the directory
    /// turns it into a principal with a closed role.
    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        let login = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        self.engine.directory.resolve(&login).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("unknown caller: {login}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        caller: &Principal,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertMentor { id, login, name } => {
                self.engine
                    .register_mentor(caller, id, login, name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertStudent { id, login, name } => {
                self.engine
                    .register_student(caller, id, login, name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRule { mentor_id, rule } => {
                self.engine
                    .set_rule(caller, mentor_id, rule)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRule { mentor_id, day } => {
                self.engine
                    .clear_rule(caller, mentor_id, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertSession {
                id,
                mentor_id,
                student_id,
                start,
                end,
                subject,
                choice,
            } => {
                // Bounds are validated inside the engine; the default
                // duration is the platform's one-hour slot.
                let span = Span {
                    start,
                    end: end.unwrap_or(start + Duration::minutes(DEFAULT_SESSION_MINUTES)),
                };
                self.engine
                    .book(
                        caller,
                        id,
                        mentor_id,
                        student_id,
                        span,
                        subject,
                        choice.unwrap_or(StudentChoice::Free),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateSessionStatus { id, verb, reason } => {
                match verb {
                    SessionVerb::Approve => self.engine.approve(caller, id).await,
                    SessionVerb::Reject => {
                        self.engine
                            .reject(caller, id, reason.unwrap_or_default())
                            .await
                    }
                    SessionVerb::Start => self.engine.start(caller, id).await,
                    SessionVerb::Complete => self.engine.complete(caller, id).await,
                    SessionVerb::Cancel => self.engine.cancel(caller, id).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RateSession {
                id,
                rating,
                feedback,
            } => {
                self.engine
                    .rate(caller, id, rating, feedback)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSession { id } => {
                self.engine
                    .delete_session(caller, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReschedule {
                session_id,
                start,
                end,
                reason,
            } => {
                self.engine
                    .request_reschedule(caller, session_id, Span { start, end }, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ResolveReschedule {
                session_id,
                approve,
                reason,
            } => {
                if approve {
                    self.engine.approve_reschedule(caller, session_id).await
                } else {
                    self.engine
                        .reject_reschedule(caller, session_id, reason.unwrap_or_default())
                        .await
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSlots {
                mentor_id,
                from_date,
                days,
                exclude_session,
            } => {
                let slots = self
                    .engine
                    .generate_slots(mentor_id, from_date, days, exclude_session)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.date.to_string())?;
                        encoder.encode_field(&(slot.day as i32))?;
                        encoder.encode_field(&(slot.hour as i32))?;
                        encoder.encode_field(&slot.available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSessions {
                mentor_id,
                student_id,
                from,
                to,
            } => {
                let sessions = self
                    .engine
                    .list_sessions(
                        caller,
                        SessionFilter {
                            mentor_id,
                            student_id,
                            from,
                            to,
                        },
                    )
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(sessions_schema());
                let rows: Vec<PgWireResult<_>> = sessions
                    .iter()
                    .map(|s| encode_session(&schema, s))
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectJoinInfo { session_id } => {
                let info = self
                    .engine
                    .join_info(caller, session_id)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(join_info_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&info.session_id.to_string())?;
                encoder.encode_field(&info.provider)?;
                encoder.encode_field(&info.join_url)?;
                encoder.encode_field(&info.start_url)?;
                encoder.encode_field(&info.password)?;
                let rows = vec![Ok(encoder.take_row())];

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRules { mentor_id } => {
                let rules = self
                    .engine
                    .list_rules(mentor_id)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(rules_schema());
                let mid = mentor_id.to_string();
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&mid)?;
                        encoder.encode_field(&(r.day as i32))?;
                        encoder.encode_field(&(r.start_hour as i32))?;
                        encoder.encode_field(&(r.end_hour as i32))?;
                        encoder.encode_field(&r.available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectMentors => self.principal_rows(Role::Mentor),
            Command::SelectStudents => self.principal_rows(Role::Student),
        }
    }

    fn principal_rows(&self, role: Role) -> PgWireResult<Vec<Response>> {
        let principals = self.engine.list_principals(role);
        let schema = Arc::new(principals_schema());
        let rows: Vec<PgWireResult<_>> = principals
            .into_iter()
            .map(|p| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&p.id.to_string())?;
                encoder.encode_field(&p.login)?;
                encoder.encode_field(&p.name)?;
                encoder.encode_field(&p.role.as_str())?;
                Ok(encoder.take_row())
            })
            .collect();
        Ok(vec![Response::Query(QueryResponse::new(
            schema,
            stream::iter(rows),
        ))])
    }
}

fn fmt_ts(t: Ts) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn encode_session(
    schema: &Arc<Vec<FieldInfo>>,
    s: &Session,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.mentor_id.to_string())?;
    encoder.encode_field(&s.student_id.to_string())?;
    encoder.encode_field(&fmt_ts(s.span.start))?;
    encoder.encode_field(&fmt_ts(s.span.end))?;
    encoder.encode_field(&s.status.as_str())?;
    encoder.encode_field(&s.subject)?;
    encoder.encode_field(&s.student_choice.as_str())?;
    encoder.encode_field(&s.payment_status.as_str())?;
    encoder.encode_field(&s.rating.map(|r| r as i32))?;
    Ok(encoder.take_row())
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("day".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("hour".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn sessions_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("student_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("subject".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("choice".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "payment_status".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("rating".into(), None, None, Type::INT4, FieldFormat::Text),
    ]
}

fn join_info_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("session_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("provider".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("join_url".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start_url".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("password".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn rules_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("day".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("start_hour".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("end_hour".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn principals_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("login".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("role".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

#[async_trait]
impl SimpleQueryHandler for MentordHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = self.resolve_caller(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(&caller, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MentordQueryParser;

#[async_trait]
impl QueryParser for MentordQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema_for(stmt).unwrap_or_default())
    }
}

/// Static schema lookup for Describe: keyed on the table the SELECT targets.
fn select_schema_for(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("SLOTS") {
        Some(slots_schema())
    } else if upper.contains("SESSIONS") {
        Some(sessions_schema())
    } else if upper.contains("JOIN_INFO") {
        Some(join_info_schema())
    } else if upper.contains("AVAILABILITY") {
        Some(rules_schema())
    } else if upper.contains("MENTORS") || upper.contains("STUDENTS") {
        Some(principals_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for MentordHandler {
    type Statement = String;
    type QueryParser = MentordQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = self.resolve_caller(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&caller, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema_for(&target.statement).unwrap_or_default(),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(
            select_schema_for(&target.statement.statement).unwrap_or_default(),
        ))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MentordFactory {
    handler: Arc<MentordHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MentordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MentordFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = MentordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MentordHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MentordFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Run the pgwire protocol over one accepted socket.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(MentordFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Typed engine failures map onto the closest SQLSTATE so stock Postgres
/// clients report something sensible.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "42704",
        EngineError::AlreadyExists(_) | EngineError::LoginTaken(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidState { .. } | EngineError::NotReady(_) | EngineError::Expired(_) => {
            "55000"
        }
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Wal(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
