//! Builds parameterized SELECT, INSERT, UPDATE, DELETE for any registered model.
//!
//! Identifiers come from the registry only; values are always parameters with
//! an explicit `$n::type` cast. Columns are read back as `to_jsonb(..)` so rows
//! decode through the coercion engine like any other input.

use super::params::PgBindValue;
use crate::repository::{like_pattern, Filter, Pagination};
use crate::schema::{Association, AssociationKind, Field, Model, Registry};
use crate::value::{Element, FieldValue};
use std::collections::HashSet;

/// Alias of the model's own table in every statement.
const ALIAS: &str = "t";
/// Alias of the related table in subqueries and preloads.
const REL: &str = "r";

/// Quote identifier for PostgreSQL (safe: only from the registry).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    fn placeholder(&mut self, v: PgBindValue, pg_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, pg_type)
    }
}

/// Statement builder bound to a registry and a database schema.
#[derive(Clone, Copy)]
pub struct SqlBuilder<'a> {
    pub registry: &'a Registry,
    pub schema: &'a str,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(registry: &'a Registry, schema: &'a str) -> Self {
        SqlBuilder { registry, schema }
    }

    pub fn table(&self, table: &str) -> String {
        qualified_table(self.schema, table)
    }

    /// PostgreSQL type of the column that stores `field` on its own table.
    pub fn column_type(&self, field: &Field) -> &'static str {
        if field.multiple && !field.is_association() {
            return "jsonb";
        }
        match field.association() {
            Some(a) => self.key_type(self.registry.target(a), &a.reference),
            None => field.kind.pg_type(),
        }
    }

    /// Type of a plain key column of `model`, falling back to the primary key's type.
    pub(crate) fn key_type(&self, model: &Model, column: &str) -> &'static str {
        model
            .fields
            .iter()
            .find(|f| !f.is_association() && !f.multiple && f.column == column)
            .unwrap_or_else(|| model.primary_key())
            .kind
            .pg_type()
    }

    /// Bind form of a stored value: references reduce to their key(s).
    pub fn stored_value(&self, field: &Field, value: &FieldValue) -> PgBindValue {
        if field.is_blank_unique(value) {
            return PgBindValue::Null;
        }
        if !field.is_reference() {
            return PgBindValue::from_field_value(value);
        }
        let keys = field.reference_keys(self.registry, value);
        if field.multiple {
            PgBindValue::Json(serde_json::Value::Array(keys.iter().map(FieldValue::to_json).collect()))
        } else {
            keys.first().map(PgBindValue::from_field_value).unwrap_or(PgBindValue::Null)
        }
    }

    /// Owner-side column an association joins on, and the field stored in it.
    pub fn owner_key<'m>(&self, model: &'m Model, association: &Association) -> Option<&'m Field> {
        let column = match association.kind {
            AssociationKind::ManyToMany => &association.foreign_key,
            AssociationKind::HasOne | AssociationKind::HasMany => &association.reference,
            AssociationKind::BelongsTo => return None,
        };
        model
            .fields
            .iter()
            .find(|f| f.is_stored() && f.storage_column() == column.as_str())
    }

    pub fn select(&self, model: &Model, fields: &[&Field], filter: &Filter) -> QueryBuf {
        let mut q = QueryBuf::new();
        let mut seen = HashSet::new();
        let columns: Vec<String> = fields
            .iter()
            .filter(|f| f.is_stored() && seen.insert(f.code.as_str()))
            .map(|f| format!("to_jsonb({}.{}) AS {}", ALIAS, quoted(f.storage_column()), quoted(&f.code)))
            .collect();
        let where_clause = self.where_clause(&mut q, model, filter);
        let order_clause = self.order_clause(model, filter);
        let page_clause = filter
            .pagination
            .map(|p| format!(" LIMIT {} OFFSET {}", p.limit, p.offset))
            .unwrap_or_default();
        q.sql = format!(
            "SELECT {} FROM {} {}{}{}{}",
            columns.join(", "),
            self.table(&model.table),
            ALIAS,
            where_clause,
            order_clause,
            page_clause
        );
        q
    }

    pub fn count(&self, model: &Model, filter: &Filter) -> QueryBuf {
        let mut q = QueryBuf::new();
        let where_clause = self.where_clause(&mut q, model, filter);
        q.sql = format!("SELECT COUNT(*) FROM {} {}{}", self.table(&model.table), ALIAS, where_clause);
        q
    }

    pub fn exists(&self, model: &Model, pk: &FieldValue) -> QueryBuf {
        let mut q = QueryBuf::new();
        let key = model.primary_key();
        let ph = q.placeholder(PgBindValue::from_field_value(pk), self.column_type(key));
        q.sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} {} WHERE {}.{} = {})",
            self.table(&model.table),
            ALIAS,
            ALIAS,
            quoted(&key.column),
            ph
        );
        q
    }

    fn where_clause(&self, q: &mut QueryBuf, model: &Model, filter: &Filter) -> String {
        let mut parts = Vec::new();
        for (code, values) in &filter.fields {
            let Some(field) = model.field(code) else { continue };
            if let Some(p) = self.field_predicate(q, field, values) {
                parts.push(p);
            }
        }

        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let columns: Vec<&Field> = filter
                .query_fields
                .iter()
                .filter_map(|c| model.field(c))
                .filter(|f| f.is_stored())
                .collect();
            if !columns.is_empty() {
                let ph = q.placeholder(PgBindValue::String(like_pattern(query)), "text");
                let matches: Vec<String> = columns
                    .iter()
                    .map(|f| format!("CAST({}.{} AS TEXT) ILIKE {} ESCAPE '\\'", ALIAS, quoted(f.storage_column()), ph))
                    .collect();
                parts.push(format!("({})", matches.join(" OR ")));
            }
        }

        if let Some(pk) = &filter.exclude {
            let key = model.primary_key();
            let ph = q.placeholder(PgBindValue::from_field_value(pk), self.column_type(key));
            parts.push(format!("{}.{} <> {}", ALIAS, quoted(&key.column), ph));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    fn field_predicate(&self, q: &mut QueryBuf, field: &Field, values: &[FieldValue]) -> Option<String> {
        if values.is_empty() {
            return None;
        }
        let column = format!("{}.{}", ALIAS, quoted(field.storage_column()));

        if field.is_time() && !field.multiple {
            let mut bounds = Vec::new();
            if let Some(from) = values.first().filter(|v| !v.is_null()) {
                let ph = q.placeholder(PgBindValue::from_field_value(from), "timestamptz");
                bounds.push(format!("{} >= {}", column, ph));
            }
            if let Some(to) = values.get(1).filter(|v| !v.is_null()) {
                let ph = q.placeholder(PgBindValue::from_field_value(to), "timestamptz");
                bounds.push(format!("{} <= {}", column, ph));
            }
            return (!bounds.is_empty()).then(|| bounds.join(" AND "));
        }

        if let Some(a) = field.association() {
            return self.association_predicate(q, field, a, values);
        }

        if field.multiple || field.is_media() {
            // jsonb arrays: match rows containing any of the values
            let contains: Vec<String> = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| {
                    let element = match self.stored_value(&single(field), v) {
                        PgBindValue::Null => serde_json::Value::Null,
                        PgBindValue::Json(j) => j,
                        other => PgBindValue::to_json(&other),
                    };
                    if field.multiple {
                        let ph = q.placeholder(PgBindValue::Json(serde_json::Value::Array(vec![element])), "jsonb");
                        format!("{} @> {}", column, ph)
                    } else {
                        let ph = q.placeholder(PgBindValue::Json(element), "jsonb");
                        format!("to_jsonb({}) = {}", column, ph)
                    }
                })
                .collect();
            return any_of(contains);
        }

        let binds: Vec<PgBindValue> = values
            .iter()
            .map(|v| {
                if field.is_blank_unique(v) {
                    PgBindValue::Null
                } else {
                    PgBindValue::from_field_value(v)
                }
            })
            .collect();
        in_predicate(q, &column, binds, self.column_type(field))
    }

    fn association_predicate(
        &self,
        q: &mut QueryBuf,
        field: &Field,
        a: &Association,
        values: &[FieldValue],
    ) -> Option<String> {
        let target = self.registry.target(a);
        let key_type = self.key_type(target, &a.reference);
        let mut binds = Vec::new();
        for v in values {
            if v.is_null() {
                binds.push(PgBindValue::Null);
            }
            binds.extend(
                field
                    .reference_keys(self.registry, v)
                    .iter()
                    .map(PgBindValue::from_field_value),
            );
        }

        match a.kind {
            AssociationKind::BelongsTo => {
                let column = format!("{}.{}", ALIAS, quoted(&a.foreign_key));
                in_predicate(q, &column, binds, key_type)
            }
            AssociationKind::HasOne | AssociationKind::HasMany => {
                binds.retain(|b| *b != PgBindValue::Null);
                let target_key = format!("{}.{}", REL, quoted(&target.primary_key().column));
                let inner = in_predicate(q, &target_key, binds, target.primary_key().kind.pg_type())?;
                Some(format!(
                    "{}.{} IN (SELECT {}.{} FROM {} {} WHERE {})",
                    ALIAS,
                    quoted(&a.reference),
                    REL,
                    quoted(&a.foreign_key),
                    self.table(&target.table),
                    REL,
                    inner
                ))
            }
            AssociationKind::ManyToMany => {
                binds.retain(|b| *b != PgBindValue::Null);
                let (join_table, join_fk, join_ref) = join_keys(a);
                let inner = in_predicate(q, &format!("{}.{}", REL, quoted(join_ref)), binds, key_type)?;
                Some(format!(
                    "{}.{} IN (SELECT {}.{} FROM {} {} WHERE {})",
                    ALIAS,
                    quoted(&a.foreign_key),
                    REL,
                    quoted(join_fk),
                    self.table(join_table),
                    REL,
                    inner
                ))
            }
        }
    }

    fn order_clause(&self, model: &Model, filter: &Filter) -> String {
        let pk = quoted(&model.primary_key().column);
        let (field, desc) = match &filter.order {
            Some(order) => (model.field(&order.field), order.desc),
            None => (model.updated_at(), true),
        };
        let dir = if desc { "DESC" } else { "ASC" };
        match field.filter(|f| f.is_stored()) {
            Some(f) if f.primary => format!(" ORDER BY {}.{} {}", ALIAS, pk, dir),
            Some(f) => format!(
                " ORDER BY {}.{} {}, {}.{}",
                ALIAS,
                quoted(f.storage_column()),
                dir,
                ALIAS,
                pk
            ),
            None => format!(" ORDER BY {}.{}", ALIAS, pk),
        }
    }

    /// INSERT of every stored field present in the element. A null primary key is left to the database.
    pub fn insert(&self, model: &Model, element: &Element) -> QueryBuf {
        let mut q = QueryBuf::new();
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for field in model.fields.iter().filter(|f| f.is_stored()) {
            let Some(value) = element.get(&field.code) else { continue };
            if field.primary && value.is_null() {
                continue;
            }
            columns.push(quoted(field.storage_column()));
            placeholders.push(q.placeholder(self.stored_value(field, value), self.column_type(field)));
        }
        let pk = quoted(&model.primary_key().column);
        q.sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} AS {} DEFAULT VALUES RETURNING to_jsonb({}.{})",
                self.table(&model.table),
                ALIAS,
                ALIAS,
                pk
            )
        } else {
            format!(
                "INSERT INTO {} AS {} ({}) VALUES ({}) RETURNING to_jsonb({}.{})",
                self.table(&model.table),
                ALIAS,
                columns.join(", "),
                placeholders.join(", "),
                ALIAS,
                pk
            )
        };
        q
    }

    /// UPDATE by primary key of every stored non-key field present. `None` when nothing is stored.
    pub fn update(&self, model: &Model, element: &Element) -> Option<QueryBuf> {
        let key = model.primary_key();
        let pk = element.get(&key.code)?;
        let mut q = QueryBuf::new();
        let mut sets = Vec::new();
        for field in model.fields.iter().filter(|f| f.is_stored() && !f.primary) {
            let Some(value) = element.get(&field.code) else { continue };
            let ph = q.placeholder(self.stored_value(field, value), self.column_type(field));
            sets.push(format!("{} = {}", quoted(field.storage_column()), ph));
        }
        if sets.is_empty() {
            return None;
        }
        let id = q.placeholder(PgBindValue::from_field_value(pk), self.column_type(key));
        q.sql = format!(
            "UPDATE {} AS {} SET {} WHERE {}.{} = {}",
            self.table(&model.table),
            ALIAS,
            sets.join(", "),
            ALIAS,
            quoted(&key.column),
            id
        );
        Some(q)
    }

    pub fn delete(&self, model: &Model, pks: &[FieldValue]) -> QueryBuf {
        let mut q = QueryBuf::new();
        let key = model.primary_key();
        let column = format!("{}.{}", ALIAS, quoted(&key.column));
        let binds = pks.iter().map(PgBindValue::from_field_value).collect();
        let predicate = in_predicate(&mut q, &column, binds, self.column_type(key)).unwrap_or_else(|| "FALSE".into());
        q.sql = format!("DELETE FROM {} AS {} WHERE {}", self.table(&model.table), ALIAS, predicate);
        q
    }

    /// Statements replacing the related keys of one owner row.
    pub fn relation_writes(&self, model: &Model, field: &Field, owner: &FieldValue, keys: &[FieldValue]) -> Vec<QueryBuf> {
        let Some(a) = field.association() else {
            return Vec::new();
        };
        let target = self.registry.target(a);
        let owner_type = self
            .owner_key(model, a)
            .map(|f| self.column_type(f))
            .unwrap_or_else(|| self.column_type(model.primary_key()));
        let key_type = self.key_type(target, &a.reference);

        match a.kind {
            AssociationKind::BelongsTo => Vec::new(),
            AssociationKind::ManyToMany => {
                let (join_table, join_fk, join_ref) = join_keys(a);
                let mut clear = QueryBuf::new();
                let ph = clear.placeholder(PgBindValue::from_field_value(owner), owner_type);
                clear.sql = format!("DELETE FROM {} WHERE {} = {}", self.table(join_table), quoted(join_fk), ph);
                let mut statements = vec![clear];
                if keys.is_empty() {
                    return statements;
                }

                let mut insert = QueryBuf::new();
                let owner_ph = insert.placeholder(PgBindValue::from_field_value(owner), owner_type);
                let mut columns = vec![quoted(join_fk), quoted(join_ref)];
                if let Some(sort) = &a.join_sort {
                    columns.push(quoted(sort));
                }
                let rows: Vec<String> = keys
                    .iter()
                    .enumerate()
                    .map(|(i, key)| {
                        let key_ph = insert.placeholder(PgBindValue::from_field_value(key), key_type);
                        match &a.join_sort {
                            Some(_) => format!("({}, {}, {})", owner_ph, key_ph, i),
                            None => format!("({}, {})", owner_ph, key_ph),
                        }
                    })
                    .collect();
                insert.sql = format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    self.table(join_table),
                    columns.join(", "),
                    rows.join(", ")
                );
                statements.push(insert);
                statements
            }
            AssociationKind::HasOne | AssociationKind::HasMany => {
                let target_table = self.table(&target.table);
                let mut detach = QueryBuf::new();
                let ph = detach.placeholder(PgBindValue::from_field_value(owner), owner_type);
                detach.sql = format!(
                    "UPDATE {} SET {} = NULL WHERE {} = {}",
                    target_table,
                    quoted(&a.foreign_key),
                    quoted(&a.foreign_key),
                    ph
                );
                let mut statements = vec![detach];
                if keys.is_empty() {
                    return statements;
                }

                let mut attach = QueryBuf::new();
                let owner_ph = attach.placeholder(PgBindValue::from_field_value(owner), owner_type);
                let target_pk = target.primary_key();
                let binds = keys.iter().map(PgBindValue::from_field_value).collect();
                if let Some(predicate) = in_predicate(&mut attach, &quoted(&target_pk.column), binds, target_pk.kind.pg_type()) {
                    attach.sql = format!(
                        "UPDATE {} SET {} = {} WHERE {}",
                        target_table,
                        quoted(&a.foreign_key),
                        owner_ph,
                        predicate
                    );
                    statements.push(attach);
                }
                statements
            }
        }
    }

    /// Statement releasing related rows before owners are deleted.
    pub fn relation_detach(&self, model: &Model, field: &Field, pks: &[FieldValue]) -> Option<QueryBuf> {
        let a = field.association()?;
        let owner_column = match a.kind {
            AssociationKind::BelongsTo => return None,
            AssociationKind::ManyToMany => &a.foreign_key,
            AssociationKind::HasOne | AssociationKind::HasMany => &a.reference,
        };
        let mut q = QueryBuf::new();
        let key = model.primary_key();
        let binds = pks.iter().map(PgBindValue::from_field_value).collect();
        let predicate = in_predicate(&mut q, &quoted(&key.column), binds, self.column_type(key))?;
        let owners = format!(
            "SELECT {} FROM {} WHERE {}",
            quoted(owner_column),
            self.table(&model.table),
            predicate
        );
        q.sql = match a.kind {
            AssociationKind::ManyToMany => {
                let (join_table, join_fk, _) = join_keys(a);
                format!("DELETE FROM {} WHERE {} IN ({})", self.table(join_table), quoted(join_fk), owners)
            }
            _ => format!(
                "UPDATE {} SET {} = NULL WHERE {} IN ({})",
                self.table(&self.registry.target(a).table),
                quoted(&a.foreign_key),
                quoted(&a.foreign_key),
                owners
            ),
        };
        Some(q)
    }

    /// `(owner, key)` pairs of an association for a set of owner keys. Many-to-many
    /// fields with a sort column are read through the target, in join order.
    pub fn preload(&self, model: &Model, field: &Field, owners: &[FieldValue]) -> Option<QueryBuf> {
        let a = field.association()?;
        let target = self.registry.target(a);
        let owner_type = self
            .owner_key(model, a)
            .map(|f| self.column_type(f))
            .unwrap_or_else(|| self.column_type(model.primary_key()));
        let binds: Vec<PgBindValue> = owners.iter().map(PgBindValue::from_field_value).collect();
        let mut q = QueryBuf::new();

        q.sql = match a.kind {
            AssociationKind::BelongsTo => return None,
            AssociationKind::ManyToMany => {
                let (join_table, join_fk, join_ref) = join_keys(a);
                let predicate = in_predicate(&mut q, &format!("j.{}", quoted(join_fk)), binds, owner_type)?;
                match &a.join_sort {
                    Some(sort) => format!(
                        "SELECT to_jsonb(j.{}) AS \"owner\", to_jsonb({}.{}) AS \"key\" FROM {} j JOIN {} {} ON {}.{} = j.{} WHERE {} ORDER BY j.{} ASC",
                        quoted(join_fk),
                        REL,
                        quoted(&a.reference),
                        self.table(join_table),
                        self.table(&target.table),
                        REL,
                        REL,
                        quoted(&a.reference),
                        quoted(join_ref),
                        predicate,
                        quoted(sort)
                    ),
                    None => format!(
                        "SELECT to_jsonb(j.{}) AS \"owner\", to_jsonb(j.{}) AS \"key\" FROM {} j WHERE {}",
                        quoted(join_fk),
                        quoted(join_ref),
                        self.table(join_table),
                        predicate
                    ),
                }
            }
            AssociationKind::HasOne | AssociationKind::HasMany => {
                let predicate = in_predicate(&mut q, &format!("{}.{}", REL, quoted(&a.foreign_key)), binds, owner_type)?;
                let target_pk = quoted(&target.primary_key().column);
                format!(
                    "SELECT to_jsonb({}.{}) AS \"owner\", to_jsonb({}.{}) AS \"key\" FROM {} {} WHERE {} ORDER BY {}.{}",
                    REL,
                    quoted(&a.foreign_key),
                    REL,
                    target_pk,
                    self.table(&target.table),
                    REL,
                    predicate,
                    REL,
                    target_pk
                )
            }
        };
        Some(q)
    }

    pub fn field_values(&self, model: &Model, field: &Field, query: Option<&str>, pagination: &Pagination) -> QueryBuf {
        let mut q = QueryBuf::new();
        let where_clause = self.field_values_where(&mut q, field, query);
        q.sql = format!(
            "SELECT DISTINCT to_jsonb({}.{}) AS \"value\" FROM {} {}{} ORDER BY \"value\" LIMIT {} OFFSET {}",
            ALIAS,
            quoted(field.storage_column()),
            self.table(&model.table),
            ALIAS,
            where_clause,
            pagination.limit,
            pagination.offset
        );
        q
    }

    pub fn count_field_values(&self, model: &Model, field: &Field, query: Option<&str>) -> QueryBuf {
        let mut q = QueryBuf::new();
        let where_clause = self.field_values_where(&mut q, field, query);
        q.sql = format!(
            "SELECT COUNT(DISTINCT {}.{}) FROM {} {}{}",
            ALIAS,
            quoted(field.storage_column()),
            self.table(&model.table),
            ALIAS,
            where_clause
        );
        q
    }

    fn field_values_where(&self, q: &mut QueryBuf, field: &Field, query: Option<&str>) -> String {
        let column = format!("{}.{}", ALIAS, quoted(field.storage_column()));
        let mut parts = vec![format!("{} IS NOT NULL", column)];
        if let Some(query) = query.map(str::trim).filter(|s| !s.is_empty()) {
            let ph = q.placeholder(PgBindValue::String(like_pattern(query)), "text");
            parts.push(format!("CAST({} AS TEXT) ILIKE {} ESCAPE '\\'", column, ph));
        }
        format!(" WHERE {}", parts.join(" AND "))
    }
}

impl PgBindValue {
    fn to_json(&self) -> serde_json::Value {
        match self {
            PgBindValue::Null => serde_json::Value::Null,
            PgBindValue::Bool(b) => serde_json::Value::Bool(*b),
            PgBindValue::I64(n) => serde_json::Value::from(*n),
            PgBindValue::F64(f) => serde_json::Value::from(*f),
            PgBindValue::String(s) => serde_json::Value::String(s.clone()),
            PgBindValue::Uuid(u) => serde_json::Value::String(u.to_string()),
            PgBindValue::Time(t) => FieldValue::Time(*t).to_json(),
            PgBindValue::Json(v) => v.clone(),
        }
    }
}

/// Element view of a multi-valued field, for binding one item.
fn single(field: &Field) -> Field {
    Field {
        multiple: false,
        ..field.clone()
    }
}

fn join_keys(a: &Association) -> (&str, &str, &str) {
    (
        a.join_table.as_deref().unwrap_or_default(),
        a.join_foreign_key.as_deref().unwrap_or_default(),
        a.join_reference.as_deref().unwrap_or_default(),
    )
}

/// `col IN (...)`, with `col IS NULL` OR-ed in when a null was supplied.
fn in_predicate(q: &mut QueryBuf, column: &str, values: Vec<PgBindValue>, pg_type: &str) -> Option<String> {
    let mut nullable = false;
    let mut placeholders = Vec::new();
    for v in values {
        if v == PgBindValue::Null {
            nullable = true;
        } else {
            placeholders.push(q.placeholder(v, pg_type));
        }
    }
    let mut alternatives = Vec::new();
    if !placeholders.is_empty() {
        alternatives.push(format!("{} IN ({})", column, placeholders.join(", ")));
    }
    if nullable {
        alternatives.push(format!("{} IS NULL", column));
    }
    any_of(alternatives)
}

fn any_of(mut alternatives: Vec<String>) -> Option<String> {
    match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(format!("({})", alternatives.join(" OR "))),
    }
}
