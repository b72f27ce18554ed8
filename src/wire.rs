use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use ulid::Ulid;

use crate::auth::AgrirentAuthSource;
use crate::engine::{Engine, EngineError, ToolFilter};
use crate::model::{BookingInfo, DateRange, ToolInfo};
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct AgrirentHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgrirentQueryParser>,
}

impl AgrirentHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgrirentQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The connection user IS the acting principal — a ULID. Every ownership
    /// and renter check downstream uses this id; there is no ambient session.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("connection user must be a ULID actor id, got: {user}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch(engine, actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn dispatch(
        &self,
        engine: &Engine,
        actor: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertTool {
                id,
                name,
                category,
                daily_rate,
                available,
                location,
            } => {
                engine
                    .add_tool(id, actor, name, category, daily_rate, available, location)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTool { id, patch } => {
                engine
                    .update_tool(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                tool_id,
                start_date,
                end_date,
            } => {
                engine
                    .open_booking(actor, id, tool_id, &start_date, &end_date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .change_booking_status(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectTools {
                available,
                category,
                location,
            } => {
                let filter = ToolFilter {
                    available,
                    category,
                    location,
                };
                let tools = engine.list_tools(&filter).await;
                Ok(vec![tools_response(tools)?])
            }
            Command::SelectBookings { tool_id, status } => {
                let bookings = engine.list_bookings(actor, tool_id, status).await;
                Ok(vec![bookings_response(bookings)?])
            }
            Command::SelectAvailability {
                tool_id,
                start_date,
                end_date,
            } => {
                let free = engine
                    .compute_free_ranges(tool_id, &start_date, &end_date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![availability_response(tool_id, free)?])
            }
        }
    }
}

// ── Row schemas & encoding ───────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn tools_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("owner_id"),
        varchar("name"),
        varchar("category"),
        FieldInfo::new("daily_rate".into(), None, None, Type::NUMERIC, FieldFormat::Text),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("location"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("tool_id"),
        varchar("renter_id"),
        FieldInfo::new("start_date".into(), None, None, Type::DATE, FieldFormat::Text),
        FieldInfo::new("end_date".into(), None, None, Type::DATE, FieldFormat::Text),
        FieldInfo::new("total_price".into(), None, None, Type::NUMERIC, FieldFormat::Text),
        varchar("status"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        varchar("tool_id"),
        FieldInfo::new("start_date".into(), None, None, Type::DATE, FieldFormat::Text),
        FieldInfo::new("end_date".into(), None, None, Type::DATE, FieldFormat::Text),
    ]
}

fn tools_response(tools: Vec<ToolInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(tools_schema());
    let rows: Vec<PgWireResult<_>> = tools
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.owner_id.to_string())?;
            encoder.encode_field(&t.name)?;
            encoder.encode_field(&t.category)?;
            encoder.encode_field(&t.daily_rate.to_string())?;
            encoder.encode_field(&if t.available { "t" } else { "f" })?;
            encoder.encode_field(&t.location)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn bookings_response(bookings: Vec<BookingInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.tool_id.to_string())?;
            encoder.encode_field(&b.renter_id.to_string())?;
            encoder.encode_field(&b.period.start.to_string())?;
            encoder.encode_field(&b.period.end.to_string())?;
            encoder.encode_field(&b.total_price.to_string())?;
            encoder.encode_field(&b.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn availability_response(tool_id: Ulid, free: Vec<DateRange>) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let tid = tool_id.to_string();
    let rows: Vec<PgWireResult<_>> = free
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&tid)?;
            encoder.encode_field(&r.start.to_string())?;
            encoder.encode_field(&r.end.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for AgrirentHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, actor, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgrirentQueryParser;

#[async_trait]
impl QueryParser for AgrirentQueryParser {
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
        Ok(select_schema(stmt).unwrap_or_default())
    }
}

/// Describe support: map a SELECT statement to its result schema by table.
fn select_schema(sql: &str) -> Option<Vec<FieldInfo>> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("BOOKINGS") {
        Some(bookings_schema())
    } else if upper.contains("TOOLS") {
        Some(tools_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgrirentHandler {
    type Statement = String;
    type QueryParser = AgrirentQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, actor, cmd).await?;
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
            select_schema(&target.statement).unwrap_or_default(),
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
            select_schema(&target.statement.statement).unwrap_or_default(),
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

pub struct AgrirentFactory {
    handler: Arc<AgrirentHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AgrirentAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgrirentFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AgrirentAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AgrirentHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgrirentFactory {
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

/// Handle one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> PgWireResult<()> {
    let factory = AgrirentFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

/// SQLSTATE mapping — the engine's taxonomy rendered the way Postgres spells
/// it: exclusion violation for date conflicts, insufficient privilege for
/// authorization, no-data-found for lookups.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidRange { .. } => "22007",
        EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
        EngineError::ToolUnavailable(_) | EngineError::InvalidTransition { .. } => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
