use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, LimitClause, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::MAX_ID_LEN;
use crate::model::*;

/// The three soft-deletable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTable {
    Locations,
    Billboards,
    Campaigns,
}

impl EntityTable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "locations" => Some(EntityTable::Locations),
            "billboards" => Some(EntityTable::Billboards),
            "campaigns" => Some(EntityTable::Campaigns),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityTable::Locations => "locations",
            EntityTable::Billboards => "billboards",
            EntityTable::Campaigns => "campaigns",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFilter {
    Campaign(String),
    Billboard(String),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLocation(NewLocation),
    InsertBillboard(NewBillboard),
    InsertCampaign(NewCampaign),
    UpdateLocation {
        id: String,
        patch: LocationPatch,
    },
    UpdateBillboard {
        id: String,
        patch: BillboardPatch,
    },
    UpdateCampaign {
        id: String,
        patch: CampaignPatch,
    },
    Delete {
        table: EntityTable,
        id: String,
    },
    Select {
        table: EntityTable,
        id: Option<String>,
        page: Page,
        include_deleted: bool,
    },
    Attach {
        campaign_id: String,
        billboard_id: String,
    },
    Detach {
        campaign_id: String,
        billboard_id: String,
    },
    /// Exactly one of `campaign_id` or the date pair is expected; the engine
    /// rejects anything else.
    SelectAvailability {
        campaign_id: Option<String>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    CheckAvailability {
        billboard_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectSummary {
        campaign_id: String,
    },
    SelectLinks(LinkFilter),
    /// Billboards standing at one location.
    SelectBillboardsAt {
        location_id: String,
        page: Page,
        include_deleted: bool,
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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── Column/value bags ─────────────────────────────────────────

/// Named values from an INSERT row, UPDATE SET list, or WHERE conjunction.
/// Every column must be consumed; leftovers are reported as unknown.
struct Fields<'a> {
    table: &'static str,
    values: BTreeMap<String, &'a Expr>,
}

impl<'a> Fields<'a> {
    fn new(table: &'static str) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    fn insert(&mut self, column: String, expr: &'a Expr) -> Result<(), SqlError> {
        if self.values.insert(column.clone(), expr).is_some() {
            return Err(SqlError::Parse(format!("{}: column {column} given twice", self.table)));
        }
        Ok(())
    }

    fn take(&mut self, column: &str) -> Option<&'a Expr> {
        self.values.remove(column)
    }

    fn require(&mut self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.take(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_keys().next() {
            Some(column) => Err(SqlError::UnknownColumn {
                table: self.table,
                column,
            }),
            None => Ok(()),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn opt<T>(
    expr: Option<&Expr>,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    expr.map(parse).transpose()
}

/// Like `opt`, but a `NULL` value counts as absent. Extended-protocol clients
/// bind NULL for optional filters.
fn opt_nullable<T>(
    expr: Option<&Expr>,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    opt(expr.filter(|e| !matches!(extract_value(e), Some(Value::Null))), parse)
}

// ── INSERT ────────────────────────────────────────────────────

const LOCATION_COLUMNS: &[&str] = &["address", "city", "state", "country_code", "lat", "lng"];
const BILLBOARD_COLUMNS: &[&str] = &["location_id", "width_mt", "height_mt", "dollars_per_day"];
const CAMPAIGN_COLUMNS: &[&str] = &["name", "start_date", "end_date"];
const LINK_COLUMNS: &[&str] = &["campaign_id", "billboard_id"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "locations" => {
            let mut f = insert_fields(insert, "locations", LOCATION_COLUMNS)?;
            let draft = NewLocation {
                address: parse_text(f.require("address")?)?,
                city: parse_text(f.require("city")?)?,
                state: parse_text(f.require("state")?)?,
                country_code: parse_text(f.require("country_code")?)?,
                lat: parse_f64(f.require("lat")?)?,
                lng: parse_f64(f.require("lng")?)?,
            };
            f.finish()?;
            Ok(Command::InsertLocation(draft))
        }
        "billboards" => {
            let mut f = insert_fields(insert, "billboards", BILLBOARD_COLUMNS)?;
            let draft = NewBillboard {
                location_id: parse_id(f.require("location_id")?)?,
                width_mt: parse_f64(f.require("width_mt")?)?,
                height_mt: parse_f64(f.require("height_mt")?)?,
                dollars_per_day: parse_f64(f.require("dollars_per_day")?)?,
            };
            f.finish()?;
            Ok(Command::InsertBillboard(draft))
        }
        "campaigns" => {
            let mut f = insert_fields(insert, "campaigns", CAMPAIGN_COLUMNS)?;
            let draft = NewCampaign {
                name: parse_text(f.require("name")?)?,
                start_date: parse_date(f.require("start_date")?)?,
                end_date: parse_date(f.require("end_date")?)?,
            };
            f.finish()?;
            Ok(Command::InsertCampaign(draft))
        }
        "campaign_billboards" => {
            let mut f = insert_fields(insert, "campaign_billboards", LINK_COLUMNS)?;
            let cmd = Command::Attach {
                campaign_id: parse_id(f.require("campaign_id")?)?,
                billboard_id: parse_id(f.require("billboard_id")?)?,
            };
            f.finish()?;
            Ok(cmd)
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair the single VALUES row with its column list, or with `defaults` when
/// the statement names no columns.
fn insert_fields<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    defaults: &[&str],
) -> Result<Fields<'a>, SqlError> {
    let row = single_values_row(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity {
            table,
            expected: columns.len(),
            got: row.len(),
        });
    }

    let mut fields = Fields::new(table);
    for (column, expr) in columns.into_iter().zip(row) {
        fields.insert(column, expr)?;
    }
    Ok(fields)
}

fn single_values_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let table = EntityTable::from_name(&table).ok_or(SqlError::UnknownTable(table))?;
    let id = extract_where_id(selection)?;

    let mut f = Fields::new(table.name());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        f.insert(column, &assignment.value)?;
    }
    if f.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    let cmd = match table {
        EntityTable::Locations => Command::UpdateLocation {
            id,
            patch: LocationPatch {
                address: opt(f.take("address"), parse_text)?,
                city: opt(f.take("city"), parse_text)?,
                state: opt(f.take("state"), parse_text)?,
                country_code: opt(f.take("country_code"), parse_text)?,
                lat: opt(f.take("lat"), parse_f64)?,
                lng: opt(f.take("lng"), parse_f64)?,
            },
        },
        EntityTable::Billboards => Command::UpdateBillboard {
            id,
            patch: BillboardPatch {
                location_id: opt(f.take("location_id"), parse_id)?,
                width_mt: opt(f.take("width_mt"), parse_f64)?,
                height_mt: opt(f.take("height_mt"), parse_f64)?,
                dollars_per_day: opt(f.take("dollars_per_day"), parse_f64)?,
            },
        },
        EntityTable::Campaigns => Command::UpdateCampaign {
            id,
            patch: CampaignPatch {
                name: opt(f.take("name"), parse_text)?,
                start_date: opt(f.take("start_date"), parse_date)?,
                end_date: opt(f.take("end_date"), parse_date)?,
            },
        },
    };
    f.finish()?;
    Ok(cmd)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    if table == "campaign_billboards" {
        let mut f = where_fields(delete.selection.as_ref(), "campaign_billboards")?;
        let cmd = Command::Detach {
            campaign_id: parse_id(f.take("campaign_id").ok_or(SqlError::MissingFilter("campaign_id"))?)?,
            billboard_id: parse_id(f.take("billboard_id").ok_or(SqlError::MissingFilter("billboard_id"))?)?,
        };
        f.finish()?;
        return Ok(cmd);
    }

    let table = EntityTable::from_name(&table).ok_or(SqlError::UnknownTable(table))?;
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::Delete { table, id })
}

// ── SELECT ────────────────────────────────────────────────────

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
        "availability" => {
            let mut f = where_fields(select.selection.as_ref(), "availability")?;
            let billboard_id = opt_nullable(f.take("billboard_id"), parse_id)?;
            let campaign_id = opt_nullable(f.take("campaign_id"), parse_id)?;
            let start = opt_nullable(f.take("start_date"), parse_date)?;
            let end = opt_nullable(f.take("end_date"), parse_date)?;
            f.finish()?;

            match billboard_id {
                Some(billboard_id) => {
                    if campaign_id.is_some() {
                        return Err(SqlError::Unsupported(
                            "billboard_id and campaign_id together".into(),
                        ));
                    }
                    Ok(Command::CheckAvailability {
                        billboard_id,
                        start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                        end: end.ok_or(SqlError::MissingFilter("end_date"))?,
                    })
                }
                None => Ok(Command::SelectAvailability {
                    campaign_id,
                    start,
                    end,
                }),
            }
        }
        "campaign_billboards" => {
            let mut f = where_fields(select.selection.as_ref(), "campaign_billboards")?;
            let campaign_id = opt_nullable(f.take("campaign_id"), parse_id)?;
            let billboard_id = opt_nullable(f.take("billboard_id"), parse_id)?;
            f.finish()?;
            match (campaign_id, billboard_id) {
                (Some(id), None) => Ok(Command::SelectLinks(LinkFilter::Campaign(id))),
                (None, Some(id)) => Ok(Command::SelectLinks(LinkFilter::Billboard(id))),
                _ => Err(SqlError::MissingFilter("campaign_id or billboard_id")),
            }
        }
        "campaign_summary" => {
            let mut f = where_fields(select.selection.as_ref(), "campaign_summary")?;
            let campaign_id = parse_id(f.take("campaign_id").ok_or(SqlError::MissingFilter("campaign_id"))?)?;
            f.finish()?;
            Ok(Command::SelectSummary { campaign_id })
        }
        _ => {
            let table = EntityTable::from_name(&table).ok_or(SqlError::UnknownTable(table))?;
            let mut f = where_fields(select.selection.as_ref(), table.name())?;
            let id = opt(f.take("id"), parse_id)?;
            let location_id = match table {
                EntityTable::Billboards => opt(f.take("location_id"), parse_id)?,
                _ => None,
            };
            let include_deleted = opt(f.take("include_deleted"), parse_bool)?.unwrap_or(false);
            f.finish()?;
            if let Some(location_id) = location_id {
                if id.is_some() {
                    return Err(SqlError::Unsupported("id and location_id together".into()));
                }
                return Ok(Command::SelectBillboardsAt {
                    location_id,
                    page: parse_page(query)?,
                    include_deleted,
                });
            }
            Ok(Command::Select {
                table,
                id,
                page: parse_page(query)?,
                include_deleted,
            })
        }
    }
}

fn parse_page(query: &ast::Query) -> Result<Page, SqlError> {
    let mut page = Page::default();
    match &query.limit_clause {
        None => {}
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            if let Some(limit) = limit {
                page.limit = parse_usize(limit)?;
            }
            if let Some(offset) = offset {
                page.offset = parse_usize(&offset.value)?;
            }
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            page.offset = parse_usize(offset)?;
            page.limit = parse_usize(limit)?;
        }
    }
    Ok(page)
}

/// Flatten `a = x AND b = y AND ...` into column/value pairs.
fn where_fields<'a>(selection: Option<&'a Expr>, table: &'static str) -> Result<Fields<'a>, SqlError> {
    let mut fields = Fields::new(table);
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut fields)?;
    }
    Ok(fields)
}

fn collect_eq_filters<'a>(expr: &'a Expr, fields: &mut Fields<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, fields),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, fields)?;
                collect_eq_filters(right, fields)
            }
            ast::BinaryOperator::Eq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                fields.insert(column, right)
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
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

fn extract_where_id(selection: &Option<Expr>) -> Result<String, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_id(right),
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

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_id(expr: &Expr) -> Result<String, SqlError> {
    let id = parse_text(expr)?;
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(SqlError::Parse(format!("bad id: {id:?}")));
    }
    Ok(id)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad count {s:?}: {e}"))),
        _ => Err(SqlError::Parse(format!("expected non-negative integer, got {expr}"))),
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: missing value for {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("{table}: expected {expected} values, got {got}")]
    WrongArity {
        table: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
