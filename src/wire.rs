use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::noop::NoopStartupHandler;
use pgwire::api::auth::StartupHandler;
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
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, Entity, ErrorKind, Repository};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, EntityTable, LinkFilter};

pub struct AdspaceHandler {
    engine: Arc<Engine>,
    query_parser: Arc<AdspaceQueryParser>,
}

impl AdspaceHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(AdspaceQueryParser),
        }
    }

    /// Execute one command, recording per-command count and latency.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, EngineError> {
        let engine = self.engine.as_ref();
        match cmd {
            Command::InsertLocation(draft) => {
                let loc = Repository::<Location>::create(engine, draft).await?;
                Ok(rows_response(location_schema(), &[loc], encode_location))
            }
            Command::InsertBillboard(draft) => {
                let bb = Repository::<Billboard>::create(engine, draft).await?;
                billboard_rows(engine, vec![bb]).await
            }
            Command::InsertCampaign(draft) => {
                let c = Repository::<Campaign>::create(engine, draft).await?;
                Ok(rows_response(campaign_schema(), &[c], encode_campaign))
            }
            Command::UpdateLocation { id, patch } => {
                let loc = Repository::<Location>::update(engine, &id, patch).await?;
                Ok(rows_response(location_schema(), &[loc], encode_location))
            }
            Command::UpdateBillboard { id, patch } => {
                let bb = Repository::<Billboard>::update(engine, &id, patch).await?;
                billboard_rows(engine, vec![bb]).await
            }
            Command::UpdateCampaign { id, patch } => {
                let c = Repository::<Campaign>::update(engine, &id, patch).await?;
                Ok(rows_response(campaign_schema(), &[c], encode_campaign))
            }
            Command::Delete { table, id } => {
                match table {
                    EntityTable::Locations => Repository::<Location>::soft_delete(engine, &id).await?,
                    EntityTable::Billboards => Repository::<Billboard>::soft_delete(engine, &id).await?,
                    EntityTable::Campaigns => Repository::<Campaign>::soft_delete(engine, &id).await?,
                }
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::Select {
                table,
                id,
                page,
                include_deleted,
            } => match table {
                EntityTable::Locations => {
                    let rows = fetch::<Location>(engine, id, page, include_deleted).await?;
                    Ok(rows_response(location_schema(), &rows, encode_location))
                }
                EntityTable::Billboards => {
                    let rows = fetch::<Billboard>(engine, id, page, include_deleted).await?;
                    billboard_rows(engine, rows).await
                }
                EntityTable::Campaigns => {
                    let rows = fetch::<Campaign>(engine, id, page, include_deleted).await?;
                    Ok(rows_response(campaign_schema(), &rows, encode_campaign))
                }
            },
            Command::Attach {
                campaign_id,
                billboard_id,
            } => {
                engine.attach(&campaign_id, &billboard_id).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::Detach {
                campaign_id,
                billboard_id,
            } => {
                let confirmation = engine.detach(&campaign_id, &billboard_id).await?;
                let rows = usize::from(confirmation.changed);
                Ok(Response::Execution(Tag::new("DELETE").with_rows(rows)))
            }
            Command::SelectAvailability {
                campaign_id,
                start,
                end,
            } => {
                let free = engine
                    .find_available_by(campaign_id.as_deref(), start, end)
                    .await?;
                billboard_rows(engine, free).await
            }
            Command::CheckAvailability {
                billboard_id,
                start,
                end,
            } => {
                let available = engine.check_availability(&billboard_id, start, end).await?;
                let row = (billboard_id, start, end, available);
                Ok(rows_response(check_schema(), &[row], |enc, (id, s, e, ok)| {
                    enc.encode_field(id)?;
                    enc.encode_field(&s.to_string())?;
                    enc.encode_field(&e.to_string())?;
                    enc.encode_field(ok)
                }))
            }
            Command::SelectBillboardsAt {
                location_id,
                page,
                include_deleted,
            } => {
                let rows = engine
                    .billboards_at_location(&location_id, page, include_deleted)
                    .await?;
                billboard_rows(engine, rows).await
            }
            Command::SelectSummary { campaign_id } => {
                let summary = engine.campaign_summary(&campaign_id).await?;
                Ok(rows_response(summary_schema(), &[summary], encode_summary))
            }
            Command::SelectLinks(filter) => {
                let links = match filter {
                    LinkFilter::Campaign(cid) => {
                        let (campaign, billboards) = engine.links_for_campaign(&cid).await?;
                        billboards
                            .into_iter()
                            .map(|bb| (cid.clone(), bb.id, campaign.span))
                            .collect::<Vec<_>>()
                    }
                    LinkFilter::Billboard(bid) => engine
                        .campaigns_for_billboard(&bid)
                        .await?
                        .into_iter()
                        .map(|c| (c.id, bid.clone(), c.span))
                        .collect(),
                };
                Ok(rows_response(link_schema(), &links, |enc, (cid, bid, span)| {
                    enc.encode_field(cid)?;
                    enc.encode_field(bid)?;
                    enc.encode_field(&span.start.to_string())?;
                    enc.encode_field(&span.end.to_string())
                }))
            }
        }
    }
}

async fn billboard_rows(engine: &Engine, billboards: Vec<Billboard>) -> Result<Response, EngineError> {
    let rows = engine.with_locations(billboards).await?;
    Ok(rows_response(billboard_schema(), &rows, encode_billboard))
}

/// `get` when an id is given, otherwise a page of `list`.
async fn fetch<E: Entity>(
    engine: &Engine,
    id: Option<String>,
    page: Page,
    include_deleted: bool,
) -> Result<Vec<E>, EngineError>
where
    Engine: Repository<E>,
{
    match id {
        Some(id) => Ok(vec![
            Repository::<E>::get(engine, &id, include_deleted).await?,
        ]),
        None => Ok(Repository::<E>::list(engine, page, include_deleted).await),
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn location_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("address"),
        text_field("city"),
        text_field("state"),
        text_field("country_code"),
        typed_field("lat", Type::FLOAT8),
        typed_field("lng", Type::FLOAT8),
        typed_field("created_at", Type::INT8),
        typed_field("is_deleted", Type::BOOL),
    ]
}

fn billboard_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("location_id"),
        typed_field("width_mt", Type::FLOAT8),
        typed_field("height_mt", Type::FLOAT8),
        typed_field("dollars_per_day", Type::FLOAT8),
        typed_field("created_at", Type::INT8),
        typed_field("is_deleted", Type::BOOL),
        text_field("address"),
        text_field("city"),
        text_field("state"),
        text_field("country_code"),
        typed_field("lat", Type::FLOAT8),
        typed_field("lng", Type::FLOAT8),
    ]
}

fn campaign_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("start_date"),
        text_field("end_date"),
        typed_field("created_at", Type::INT8),
        typed_field("is_deleted", Type::BOOL),
    ]
}

fn link_schema() -> Vec<FieldInfo> {
    vec![
        text_field("campaign_id"),
        text_field("billboard_id"),
        text_field("start_date"),
        text_field("end_date"),
    ]
}

fn check_schema() -> Vec<FieldInfo> {
    vec![
        text_field("billboard_id"),
        text_field("start_date"),
        text_field("end_date"),
        typed_field("available", Type::BOOL),
    ]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        text_field("campaign_id"),
        text_field("name"),
        text_field("start_date"),
        text_field("end_date"),
        typed_field("billboard_count", Type::INT8),
        typed_field("total_dollars", Type::FLOAT8),
    ]
}

fn encode_location(enc: &mut DataRowEncoder, loc: &Location) -> PgWireResult<()> {
    enc.encode_field(&loc.id)?;
    enc.encode_field(&loc.address)?;
    enc.encode_field(&loc.city)?;
    enc.encode_field(&loc.state)?;
    enc.encode_field(&loc.country_code)?;
    enc.encode_field(&loc.lat)?;
    enc.encode_field(&loc.lng)?;
    enc.encode_field(&loc.created_at)?;
    enc.encode_field(&loc.is_deleted)
}

/// Billboard columns followed by the columns of its location.
fn encode_billboard(enc: &mut DataRowEncoder, row: &BillboardWithLocation) -> PgWireResult<()> {
    let (bb, loc) = (&row.billboard, &row.location);
    enc.encode_field(&bb.id)?;
    enc.encode_field(&bb.location_id)?;
    enc.encode_field(&bb.width_mt)?;
    enc.encode_field(&bb.height_mt)?;
    enc.encode_field(&bb.dollars_per_day)?;
    enc.encode_field(&bb.created_at)?;
    enc.encode_field(&bb.is_deleted)?;
    enc.encode_field(&loc.address)?;
    enc.encode_field(&loc.city)?;
    enc.encode_field(&loc.state)?;
    enc.encode_field(&loc.country_code)?;
    enc.encode_field(&loc.lat)?;
    enc.encode_field(&loc.lng)
}

fn encode_campaign(enc: &mut DataRowEncoder, c: &Campaign) -> PgWireResult<()> {
    enc.encode_field(&c.id)?;
    enc.encode_field(&c.name)?;
    enc.encode_field(&c.span.start.to_string())?;
    enc.encode_field(&c.span.end.to_string())?;
    enc.encode_field(&c.created_at)?;
    enc.encode_field(&c.is_deleted)
}

fn encode_summary(enc: &mut DataRowEncoder, s: &CampaignSummary) -> PgWireResult<()> {
    enc.encode_field(&s.campaign.id)?;
    enc.encode_field(&s.campaign.name)?;
    enc.encode_field(&s.campaign.span.start.to_string())?;
    enc.encode_field(&s.campaign.span.end.to_string())?;
    enc.encode_field(&(s.billboard_count as i64))?;
    enc.encode_field(&s.total_dollars)
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    rows: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = rows
        .iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns a statement will produce, decided from its text alone so
/// Describe works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let verb = lower.split_whitespace().next().unwrap_or("");
    if !matches!(verb, "select" | "insert" | "update") {
        return vec![];
    }
    if lower.contains("campaign_billboards") {
        return if verb == "select" { link_schema() } else { vec![] };
    }
    if lower.contains("campaign_summary") {
        summary_schema()
    } else if lower.contains("availability") {
        if lower.contains("billboard_id") {
            check_schema()
        } else {
            billboard_schema()
        }
    } else if lower.contains("locations") {
        location_schema()
    } else if lower.contains("billboards") {
        billboard_schema()
    } else if lower.contains("campaigns") {
        campaign_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for AdspaceHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd).await?])
    }
}

impl NoopStartupHandler for AdspaceHandler {}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AdspaceQueryParser;

#[async_trait]
impl QueryParser for AdspaceQueryParser {
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
impl ExtendedQueryHandler for AdspaceHandler {
    type Statement = String;
    type QueryParser = AdspaceQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
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

/// Highest `$N` placeholder in the SQL string.
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... with bound parameter values as quoted text.
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

pub struct AdspaceFactory {
    handler: Arc<AdspaceHandler>,
    noop: Arc<NoopHandler>,
}

impl AdspaceFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(AdspaceHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AdspaceFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, None, AdspaceFactory::new(engine)).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23P01",
        EngineError::AlreadyLinked { .. } => "23505",
        EngineError::HasBillboards(_) | EngineError::HasBookings(_) => "23503",
        _ => match e.kind() {
            ErrorKind::NotFound => "P0002",
            ErrorKind::Conflict => "23P01",
            ErrorKind::BadRequest => "22023",
            ErrorKind::StoreFailure => "XX000",
        },
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let message = if e.kind() == ErrorKind::StoreFailure {
        tracing::error!("store failure: {e}");
        "internal storage error".to_string()
    } else {
        e.to_string()
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        message,
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
