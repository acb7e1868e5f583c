use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat,
    FieldInfo, QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{self, IntrabookAuthSource};
use crate::engine::{BookingRequest, CreateOutcome, Engine, EngineError, ResourceCatalog};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct IntrabookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<IntrabookQueryParser>,
    admin_user: String,
}

impl IntrabookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, admin_user: String) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(IntrabookQueryParser),
            admin_user,
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Caller> {
        let user = client
            .metadata()
            .get(pgwire::api::METADATA_USER)
            .map(String::as_str)
            .unwrap_or_default();
        auth::resolve_caller(user, &self.admin_user).map_err(|e| user_error("28000", e))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let caller = self.resolve_caller(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, &caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        caller: &Caller,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource(draft) => {
                engine.register_resource(draft, caller).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource(draft) => {
                engine.update_resource(draft, caller).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.deactivate_resource(id, caller).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                query_response(resources_schema(), resources.iter(), encode_resource)
            }
            Command::InsertBooking {
                id,
                resource_id,
                owner_id,
                title,
                starts_at,
                ends_at,
                recurrence,
            } => {
                let owner_id = owner_id
                    .or(caller.user_id)
                    .ok_or_else(|| user_error("22023", "owner_id is required".into()))?;
                let outcome = engine
                    .create_booking(
                        BookingRequest {
                            id,
                            resource_id,
                            owner_id,
                            title,
                            starts_at,
                            ends_at,
                            recurrence,
                        },
                        caller,
                    )
                    .await
                    .map_err(engine_err)?;
                let rows = outcome_rows(&outcome);
                query_response(outcome_schema(), rows.iter(), encode_outcome)
            }
            Command::ExtendBooking { booking_id, ends_at } => {
                let booking = engine
                    .extend_booking(booking_id, ends_at, caller)
                    .await
                    .map_err(engine_err)?;
                query_response(bookings_schema(), std::iter::once(&booking), encode_booking)
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id, caller).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                query_response(bookings_schema(), std::iter::once(&booking), encode_booking)
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(&filter).await.map_err(engine_err)?;
                query_response(bookings_schema(), bookings.iter(), encode_booking)
            }
            Command::SelectAvailability { resource_id, date } => {
                let day = engine
                    .get_availability(resource_id, date)
                    .await
                    .map_err(engine_err)?;
                let rid = day.resource_id.to_string();
                let date = day.date.to_string();
                let hours_start = day.work_hours_start.format("%H:%M").to_string();
                let hours_end = day.work_hours_end.format("%H:%M").to_string();
                query_response(availability_schema(), day.slots.iter(), |encoder, slot| {
                    encoder.encode_field(&rid)?;
                    encoder.encode_field(&date)?;
                    encoder.encode_field(&hours_start)?;
                    encoder.encode_field(&hours_end)?;
                    encoder.encode_field(&slot.start)?;
                    encoder.encode_field(&slot.end)?;
                    encoder.encode_field(&slot.is_available)
                })
            }
            Command::SelectFreeWindows {
                resource_id,
                date,
                min_duration,
            } => {
                let windows = engine
                    .free_windows(resource_id, date, min_duration)
                    .await
                    .map_err(engine_err)?;
                let rid = resource_id.to_string();
                query_response(free_windows_schema(), windows.iter(), |encoder, span| {
                    encoder.encode_field(&rid)?;
                    encoder.encode_field(&span.start)?;
                    encoder.encode_field(&span.end)?;
                    encoder.encode_field(&(span.duration_ms() / MINUTE_MS))
                })
            }
            Command::SelectStats => {
                let stats = engine.booking_stats(caller).await;
                query_response(stats_schema(), std::iter::once(&stats), |encoder, s| {
                    encoder.encode_field(&(s.total as i64))?;
                    encoder.encode_field(&(s.today as i64))?;
                    encoder.encode_field(&(s.this_week as i64))?;
                    encoder.encode_field(&(s.this_month as i64))?;
                    encoder.encode_field(&(s.my_upcoming as i64))?;
                    encoder.encode_field(&(s.my_total as i64))
                })
            }
            Command::Listen { channel } => {
                let resource_id_str = channel.strip_prefix("resource_").ok_or_else(|| {
                    user_error(
                        "42000",
                        format!("invalid channel: {channel} (expected resource_{{id}})"),
                    )
                })?;
                let _resource_id = Ulid::from_string(resource_id_str)
                    .map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("work_hours_start", Type::VARCHAR),
        field("work_hours_end", Type::VARCHAR),
        field("min_duration", Type::INT8),
        field("max_duration", Type::INT8),
        field("capacity", Type::INT8),
        field("active", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("resource_id", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("starts_at", Type::INT8),
        field("ends_at", Type::INT8),
        field("status", Type::VARCHAR),
        field("recurrence_group_id", Type::VARCHAR),
    ]
}

fn outcome_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("starts_at", Type::INT8),
        field("ends_at", Type::INT8),
        field("outcome", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("detail", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("resource_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("work_hours_start", Type::VARCHAR),
        field("work_hours_end", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("is_available", Type::BOOL),
    ]
}

fn free_windows_schema() -> Vec<FieldInfo> {
    vec![
        field("resource_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("duration_minutes", Type::INT8),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        field("total", Type::INT8),
        field("today", Type::INT8),
        field("this_week", Type::INT8),
        field("this_month", Type::INT8),
        field("my_upcoming", Type::INT8),
        field("my_total", Type::INT8),
    ]
}

/// Result schema of a statement, judged from the table it reads or writes.
/// Used to describe prepared statements before their parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let table_after = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .map(|t| t.trim_matches('"'))
    };
    match words.first().copied() {
        Some("SELECT") => match table_after("FROM") {
            Some("RESOURCES") => resources_schema(),
            Some("BOOKINGS") => bookings_schema(),
            Some("AVAILABILITY") => availability_schema(),
            Some("FREE_WINDOWS") => free_windows_schema(),
            Some("STATS") => stats_schema(),
            _ => vec![],
        },
        Some("INSERT") => match table_after("INTO") {
            Some("BOOKINGS") => outcome_schema(),
            Some("EXTENSIONS") => bookings_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

fn query_response<'a, T: 'a>(
    schema: Vec<FieldInfo>,
    items: impl Iterator<Item = &'a T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn encode_resource(encoder: &mut DataRowEncoder, r: &Resource) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.name)?;
    encoder.encode_field(&r.work_hours_start.format("%H:%M").to_string())?;
    encoder.encode_field(&r.work_hours_end.format("%H:%M").to_string())?;
    encoder.encode_field(&(r.min_duration as i64))?;
    encoder.encode_field(&(r.max_duration as i64))?;
    encoder.encode_field(&r.capacity.map(|c| c as i64))?;
    encoder.encode_field(&r.active)
}

fn encode_booking(encoder: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.resource_id.to_string())?;
    encoder.encode_field(&b.owner_id.to_string())?;
    encoder.encode_field(&b.title)?;
    encoder.encode_field(&b.span.start)?;
    encoder.encode_field(&b.span.end)?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.recurrence_group_id.map(|g| g.to_string()))
}

/// One row per occurrence of a create request.
struct OutcomeRow {
    id: Option<String>,
    span: Span,
    outcome: &'static str,
    reason: Option<&'static str>,
    detail: Option<String>,
}

fn outcome_rows(outcome: &CreateOutcome) -> Vec<OutcomeRow> {
    let created = outcome.created.iter().map(|b| OutcomeRow {
        id: Some(b.id.to_string()),
        span: b.span,
        outcome: "created",
        reason: None,
        detail: None,
    });
    let skipped = outcome.skipped.iter().map(|s| OutcomeRow {
        id: None,
        span: s.span,
        outcome: "skipped",
        reason: Some(s.reason.kind()),
        detail: Some(s.reason.to_string()),
    });
    let mut rows: Vec<OutcomeRow> = created.chain(skipped).collect();
    rows.sort_by_key(|r| r.span.start);
    rows
}

fn encode_outcome(encoder: &mut DataRowEncoder, row: &OutcomeRow) -> PgWireResult<()> {
    encoder.encode_field(&row.id)?;
    encoder.encode_field(&row.span.start)?;
    encoder.encode_field(&row.span.end)?;
    encoder.encode_field(&row.outcome)?;
    encoder.encode_field(&row.reason)?;
    encoder.encode_field(&row.detail)
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for IntrabookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct IntrabookQueryParser;

#[async_trait]
impl QueryParser for IntrabookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for IntrabookHandler {
    type Statement = String;
    type QueryParser = IntrabookQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    // highest first so $1 does not clobber the prefix of $10
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct IntrabookFactory {
    handler: Arc<IntrabookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<IntrabookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl IntrabookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, admin_user: String) -> Self {
        let auth_source = IntrabookAuthSource::new(password, admin_user.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(IntrabookHandler::new(tenant_manager, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for IntrabookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: IntrabookFactory,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Overlap(_) => "23P01",
        EngineError::ResourceNotFound(_) | EngineError::BookingNotFound(_) => "02000",
        EngineError::State(_) => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), format!("{}: {e}", e.kind()))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{StateError, ValidationError};

    fn names(schema: &[FieldInfo]) -> Vec<String> {
        schema.iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn sqlstates_follow_error_kind() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&ValidationError::PastStart.into()), "22023");
        assert_eq!(sqlstate(&EngineError::Overlap(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::BookingNotFound(id)), "02000");
        assert_eq!(sqlstate(&StateError::AlreadyCancelled(id).into()), "55000");
        assert_eq!(sqlstate(&EngineError::Forbidden("no")), "42501");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("no")), "54000");
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn schema_by_table() {
        assert_eq!(
            names(&result_schema("SELECT * FROM availability WHERE resource_id = $1 AND date = $2")),
            names(&availability_schema())
        );
        assert_eq!(names(&result_schema("select * from stats")), names(&stats_schema()));
        assert_eq!(
            names(&result_schema("INSERT INTO bookings (id) VALUES ($1)")),
            names(&outcome_schema())
        );
        assert_eq!(
            names(&result_schema("INSERT INTO extensions(booking_id, ends_at) VALUES ($1, $2)")),
            names(&bookings_schema())
        );
        assert!(result_schema("INSERT INTO resources (id, name) VALUES ($1, $2)").is_empty());
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
    }

    #[test]
    fn param_counting() {
        assert_eq!(count_params("SELECT * FROM stats"), 0);
        assert_eq!(count_params("VALUES ($1, $2, $10)"), 10);
    }

    #[test]
    fn param_substitution_quotes_text() {
        let sql = substitute(
            "INSERT INTO bookings (title, owner_id) VALUES ($1, $2)",
            &[Some("Bob's sync".into()), None],
        );
        assert_eq!(sql, "INSERT INTO bookings (title, owner_id) VALUES ('Bob''s sync', NULL)");
    }

    #[test]
    fn param_substitution_double_digits() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        assert_eq!(substitute("$1 $10", &params), "'1' '10'");
    }

    #[test]
    fn outcome_rows_in_time_order() {
        let rid = Ulid::new();
        let owner = Ulid::new();
        let booking = |start: Ms| Booking {
            id: Ulid::new(),
            resource_id: rid,
            owner_id: owner,
            title: "Sync".into(),
            span: Span::new(start, start + 10),
            status: BookingStatus::Confirmed,
            recurrence_group_id: None,
            recurrence_rule: None,
        };
        let outcome = CreateOutcome {
            created: vec![booking(100), booking(300)],
            skipped: vec![crate::engine::SkippedOccurrence {
                span: Span::new(200, 210),
                reason: EngineError::Overlap(Ulid::new()),
            }],
        };
        let rows = outcome_rows(&outcome);
        let kinds: Vec<_> = rows.iter().map(|r| (r.outcome, r.reason)).collect();
        assert_eq!(
            kinds,
            vec![("created", None), ("skipped", Some("overlap")), ("created", None)]
        );
        assert!(rows[1].id.is_none());
    }
}
