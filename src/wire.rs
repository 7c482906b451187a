use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::{Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use ulid::Ulid;

use crate::auth::{caller_for_user, StayrateAuthSource};
use crate::dates::format_day;
use crate::engine::{Engine, EngineError, StayQuote};
use crate::model::*;
use crate::notify::Notification;
use crate::sql::{self, Command, NOTIFY_CHANNEL};

/// One handler per connection: it owns the session's LISTEN subscription.
pub struct StayrateHandler {
    engine: Arc<Engine>,
    admin_user: String,
    query_parser: Arc<StayrateQueryParser>,
    /// Who is listening, and their receiver.
    inbox: Mutex<Option<(Ulid, broadcast::Receiver<Notification>)>>,
}

impl Drop for StayrateHandler {
    fn drop(&mut self) {
        if let Some((recipient, rx)) = self.inbox.get_mut().take() {
            drop(rx);
            self.engine.notify.release(&recipient);
        }
    }
}

impl StayrateHandler {
    pub fn new(engine: Arc<Engine>, admin_user: String) -> Self {
        Self {
            engine,
            admin_user,
            query_parser: Arc::new(StayrateQueryParser),
            inbox: Mutex::new(None),
        }
    }

    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Caller> {
        let user = client
            .metadata()
            .get("user")
            .map(String::as_str)
            .unwrap_or_default();
        caller_for_user(user, &self.admin_user)
            .ok_or_else(|| user_error("28000", format!("user {user:?} has no identity")))
    }

    /// Push notifications that arrived since the last statement. The wire protocol
    /// has no idle push here, so delivery happens at statement boundaries.
    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending = {
            let mut inbox = self.inbox.lock().await;
            let Some((_, rx)) = inbox.as_mut() else {
                return Ok(());
            };
            let mut pending = Vec::new();
            loop {
                match rx.try_recv() {
                    Ok(n) => pending.push(n),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        tracing::warn!("listener lagged, {skipped} notifications dropped");
                    }
                    Err(_) => break,
                }
            }
            pending
        };
        for n in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(0, NOTIFY_CHANNEL.to_owned(), n.payload()),
                ))
                .await?;
        }
        Ok(())
    }

    async fn run(&self, caller: Caller, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = crate::observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(caller, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    /// Hosts edit their own properties; admins edit any.
    async fn authorize_host(
        &self,
        caller: Caller,
        property_id: Ulid,
    ) -> Result<PropertyFacts, EngineError> {
        let facts = self.engine.property_facts(property_id).await?;
        if caller.is_admin || caller.id == facts.host_id {
            Ok(facts)
        } else {
            Err(EngineError::Forbidden("only the host can change this property"))
        }
    }

    async fn execute_command(&self, caller: Caller, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProperty { facts } => {
                if !caller.is_admin && caller.id != facts.host_id {
                    return Err(engine_err(EngineError::Forbidden(
                        "properties can only be registered by their host",
                    )));
                }
                engine.register_property(facts).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateProperty { id, patch } => {
                self.authorize_host(caller, id).await.map_err(engine_err)?;
                engine.update_property(id, &patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteProperty { id } => {
                self.authorize_host(caller, id).await.map_err(engine_err)?;
                engine.remove_property(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectProperties { id } => {
                let properties = match id {
                    Some(id) => vec![engine.property_facts(id).await.map_err(engine_err)?],
                    None => engine.list_properties().await,
                };
                Ok(query_response(properties_schema(), properties, |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.host_id.to_string())?;
                    enc.encode_field(&i64::from(p.minimum_stay))?;
                    enc.encode_field(&i64::from(p.number_of_guests))?;
                    enc.encode_field(&p.is_active)
                }))
            }
            Command::InsertRange { property_id, range } => {
                self.authorize_host(caller, property_id)
                    .await
                    .map_err(engine_err)?;
                engine
                    .add_range(property_id, range)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BulkInsertRanges {
                property_id,
                ranges,
            } => {
                self.authorize_host(caller, property_id)
                    .await
                    .map_err(engine_err)?;
                let ids = engine
                    .bulk_load_ranges(property_id, ranges)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(ids.len())))
            }
            Command::UpdateRange { id, patch } => {
                let property_id = engine.range_property(id).map_err(engine_err)?;
                self.authorize_host(caller, property_id)
                    .await
                    .map_err(engine_err)?;
                engine.update_range(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRange { id } => {
                let property_id = engine.range_property(id).map_err(engine_err)?;
                self.authorize_host(caller, property_id)
                    .await
                    .map_err(engine_err)?;
                engine.remove_range(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRanges {
                property_id,
                window,
            } => {
                let ranges = match window {
                    Some(w) => engine.ranges_overlapping(property_id, w).await,
                    None => engine.get_ranges(property_id).await,
                }
                .map_err(engine_err)?;
                let pid = property_id.to_string();
                Ok(query_response(ranges_schema(), ranges, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&pid)?;
                    enc.encode_field(&format_day(r.span.start))?;
                    enc.encode_field(&format_day(r.span.end))?;
                    enc.encode_field(&r.available)?;
                    enc.encode_field(&r.price.to_string())
                }))
            }
            Command::InsertReservation { request } => {
                engine
                    .create_reservation(request, &caller)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservationStatus { id, status } => {
                engine
                    .set_reservation_status(id, status, &caller)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectReservations {
                property_id,
                status,
            } => {
                let facts = engine
                    .property_facts(property_id)
                    .await
                    .map_err(engine_err)?;
                let statuses = status.map(|s| [s]);
                let mut reservations = engine
                    .get_reservations(property_id, statuses.as_ref().map(|s| s.as_slice()), None)
                    .await
                    .map_err(engine_err)?;
                // Guests see only their own.
                if !caller.is_admin && caller.id != facts.host_id {
                    reservations.retain(|r| r.guest_id == caller.id);
                }
                Ok(query_response(reservations_schema(), reservations, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.property_id.to_string())?;
                    enc.encode_field(&r.guest_id.to_string())?;
                    enc.encode_field(&format_day(r.stay.start))?;
                    enc.encode_field(&format_day(r.stay.end))?;
                    enc.encode_field(&i64::from(r.guests_count))?;
                    enc.encode_field(&r.total_price.to_string())?;
                    enc.encode_field(&r.status.as_str())
                }))
            }
            Command::SelectQuote {
                property_id,
                check_in,
                check_out,
            } => {
                let quote = engine
                    .quote_stay(property_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                let prefix = [
                    property_id.to_string(),
                    format_day(check_in),
                    format_day(check_out),
                ];
                Ok(quote_response(&prefix, quote))
            }
            Command::SelectEstimate {
                property_id,
                reference,
                nights,
            } => {
                let reference = reference.unwrap_or_else(|| engine.today());
                let quote = engine
                    .estimate(property_id, reference, nights)
                    .await
                    .map_err(engine_err)?;
                let prefix = [property_id.to_string(), format_day(reference)];
                Ok(quote_response(&prefix, quote))
            }
            Command::SelectCalendar {
                property_id,
                window,
            } => {
                let spans = engine
                    .calendar(property_id, window)
                    .await
                    .map_err(engine_err)?;
                let pid = property_id.to_string();
                Ok(query_response(calendar_schema(), spans, |enc, s| {
                    enc.encode_field(&pid)?;
                    enc.encode_field(&format_day(s.start))?;
                    enc.encode_field(&format_day(s.end))?;
                    enc.encode_field(&i64::from(s.nights()))
                }))
            }
            Command::SelectDayStatus { property_id, day } => {
                let status = engine
                    .status_at(property_id, day)
                    .await
                    .map_err(engine_err)?;
                let (label, price) = match status {
                    DayStatus::Uncovered => ("uncovered", None),
                    DayStatus::Available(p) => ("available", Some(p.to_string())),
                    DayStatus::Unavailable => ("unavailable", None),
                };
                let pid = property_id.to_string();
                Ok(query_response(day_status_schema(), [()], |enc, ()| {
                    enc.encode_field(&pid)?;
                    enc.encode_field(&format_day(day))?;
                    enc.encode_field(&label)?;
                    enc.encode_field(&price)
                }))
            }
            Command::Listen { channel } => {
                if channel != NOTIFY_CHANNEL {
                    return Err(user_error(
                        "42000",
                        format!("invalid channel: {channel} (expected {NOTIFY_CHANNEL})"),
                    ));
                }
                let rx = engine.notify.subscribe(caller.id);
                let previous = self.inbox.lock().await.replace((caller.id, rx));
                if let Some((recipient, old)) = previous {
                    drop(old);
                    engine.notify.release(&recipient);
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { .. } | Command::UnlistenAll => {
                let previous = self.inbox.lock().await.take();
                if let Some((recipient, rx)) = previous {
                    drop(rx);
                    engine.notify.release(&recipient);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

// ── Result encoding ──────────────────────────────────────────────

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Quote rows share one layout: the request's own columns, then the price.
fn quote_response(prefix: &[String], quote: StayQuote) -> Response {
    let schema = if prefix.len() == 3 {
        quote_schema()
    } else {
        estimate_schema()
    };
    query_response(schema, [quote], |enc, q| {
        for value in prefix {
            enc.encode_field(value)?;
        }
        enc.encode_field(&i64::from(q.nights))?;
        enc.encode_field(&q.total_price.to_string())?;
        enc.encode_field(&q.valid)?;
        enc.encode_field(&q.reason.map(|r| r.to_string()))?;
        enc.encode_field(&q.average_nightly().map(|p| p.to_string()))
    })
}

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn properties_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("host_id"),
        int8("minimum_stay"),
        int8("number_of_guests"),
        boolean("is_active"),
    ]
}

fn ranges_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("property_id"),
        text("start_date"),
        text("end_date"),
        boolean("available"),
        text("price"),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("property_id"),
        text("guest_id"),
        text("check_in"),
        text("check_out"),
        int8("guests_count"),
        text("total_price"),
        text("status"),
    ]
}

fn price_columns() -> [FieldInfo; 5] {
    [
        int8("nights"),
        text("total_price"),
        boolean("valid"),
        text("reason"),
        text("average_nightly"),
    ]
}

fn quote_schema() -> Vec<FieldInfo> {
    let mut schema = vec![text("property_id"), text("check_in"), text("check_out")];
    schema.extend(price_columns());
    schema
}

fn estimate_schema() -> Vec<FieldInfo> {
    let mut schema = vec![text("property_id"), text("reference")];
    schema.extend(price_columns());
    schema
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text("property_id"),
        text("start_date"),
        text("end_date"),
        int8("nights"),
    ]
}

fn day_status_schema() -> Vec<FieldInfo> {
    vec![
        text("property_id"),
        text("day"),
        text("status"),
        text("price"),
    ]
}

/// Result columns of a SELECT, judged from the table after FROM. Parameters may
/// still be unbound, so the statement is not fully parsed here.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';'));
    match table {
        Some("properties") => properties_schema(),
        Some("price_ranges") => ranges_schema(),
        Some("reservations") => reservations_schema(),
        Some("quote") => quote_schema(),
        Some("estimate") => estimate_schema(),
        Some("calendar") => calendar_schema(),
        Some("day_status") => day_status_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for StayrateHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.deliver_notifications(client).await?;
        let caller = self.resolve_caller(client)?;
        Ok(vec![self.run(caller, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StayrateQueryParser;

#[async_trait]
impl QueryParser for StayrateQueryParser {
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
impl ExtendedQueryHandler for StayrateHandler {
    type Statement = String;
    type QueryParser = StayrateQueryParser;

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
        self.deliver_notifications(client).await?;
        let caller = self.resolve_caller(client)?;
        let sql = substitute_params(portal);
        self.run(caller, &sql).await
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never eats the prefix of `$10`.
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

pub struct StayrateFactory {
    handler: Arc<StayrateHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<StayrateAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl StayrateFactory {
    pub fn new(engine: Arc<Engine>, password: String, admin_user: String) -> Self {
        let auth_source = StayrateAuthSource::new(password, admin_user.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StayrateHandler::new(engine, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StayrateFactory {
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
    engine: Arc<Engine>,
    password: String,
    admin_user: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(StayrateFactory::new(engine, password, admin_user));
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

/// SQLSTATE for an engine error. Validator rejections report their cause's code.
fn sqlstate(e: &EngineError) -> &'static str {
    match e.cause() {
        EngineError::Conflict { .. } | EngineError::ReservationConflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidDuration { .. }
        | EngineError::InvalidRequest(_)
        | EngineError::InvalidPrice(_) => "22023",
        EngineError::OutOfPolicy(_) | EngineError::Rejected(_) => "P0001",
        EngineError::Unavailable(_) => "P0003",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::PersistenceFailure(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Rejection, Stage};

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM quote WHERE property_id = $1"), 1);
        assert_eq!(count_params("INSERT INTO t VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("SELECT * FROM properties"), 0);
    }

    #[test]
    fn rejections_use_the_cause_code() {
        let err = EngineError::Rejected(Rejection::new(
            Stage::ConflictChecked,
            EngineError::ReservationConflict(Ulid::new()),
        ));
        assert_eq!(sqlstate(&err), "23P01");
        assert_eq!(sqlstate(&EngineError::Forbidden("x")), "42501");
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "P0002");
    }

    #[test]
    fn result_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("SELECT * FROM day_status WHERE property_id = $1 AND day = $2"),
            ["property_id", "day", "status", "price"]
        );
        assert_eq!(names("select * from quote;").len(), 8);
        assert!(names("INSERT INTO properties VALUES ($1, $2)").is_empty());
    }
}
