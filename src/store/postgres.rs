//! PostgreSQL implementation of the lookup and persistence contracts.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text};

use crate::params::CanonicalParameterSet;
use crate::store::{
    identity_value, Database, LookupError, LookupResolver, LookupTable, PersistenceError, PersistenceGateway,
};

#[derive(QueryableByName)]
struct InstanceIdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(QueryableByName)]
struct LookupIdRow {
    #[diesel(sql_type = Integer)]
    id: i32,
}

const INSERT_INSTANCE: &str = r#"
    INSERT INTO instance (state_type_id, site_id, uid, instance_name, params)
    VALUES ($1, $2, $3, $4, $5::jsonb)
    ON CONFLICT (uid, instance_name, site_id) DO NOTHING
    RETURNING id
"#;

const SELECT_INSTANCE: &str = r#"
    SELECT id FROM instance
    WHERE uid = $1 AND instance_name = $2 AND site_id = $3
"#;

const UPSERT_CONFIG_ITEM: &str = r#"
    INSERT INTO config_item (instance_id, key, value)
    VALUES ($1, $2, $3)
    ON CONFLICT (instance_id, key) DO UPDATE
    SET value = EXCLUDED.value
    WHERE config_item.value IS DISTINCT FROM EXCLUDED.value
"#;

/// Lookup resolver and persistence gateway backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create the reference, instance and config item tables if missing.
    ///
    /// In production the schema is owned by migrations; this keeps fresh
    /// databases and development setups usable.
    pub fn ensure_tables(&self) -> Result<(), PersistenceError> {
        tracing::info!("Ensuring database tables exist...");

        let mut conn = self.db.get_connection()?;

        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS state_type (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS site (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS instance (
                id BIGSERIAL PRIMARY KEY,
                state_type_id INTEGER NOT NULL REFERENCES state_type(id),
                site_id INTEGER NOT NULL REFERENCES site(id),
                uid TEXT NOT NULL,
                instance_name TEXT NOT NULL,
                params JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CONSTRAINT instance_identity_unique UNIQUE (uid, instance_name, site_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS config_item (
                id BIGSERIAL PRIMARY KEY,
                instance_id BIGINT NOT NULL REFERENCES instance(id),
                key TEXT NOT NULL,
                value TEXT,
                CONSTRAINT config_item_key_unique UNIQUE (instance_id, key)
            )
            "#,
        ];

        for statement in ddl {
            diesel::sql_query(statement).execute(&mut conn)?;
        }

        tracing::info!("All tables ensured");
        Ok(())
    }
}

impl LookupResolver for PgStore {
    fn resolve_id(&self, table: LookupTable, code: &str, context: &str) -> Result<i32, LookupError> {
        let mut conn = self.db.get_connection()?;

        // table names come from a closed enum, never from message content
        let query = format!("SELECT id FROM {} WHERE name = $1", table.table_name());

        let row = diesel::sql_query(query)
            .bind::<Text, _>(code)
            .get_result::<LookupIdRow>(&mut conn)
            .optional()
            .map_err(PersistenceError::from)?;

        match row {
            Some(row) => {
                tracing::debug!(%table, code, id = row.id, "Resolved lookup code");
                Ok(row.id)
            }
            None => Err(LookupError::NotFound {
                table,
                code: code.to_string(),
                context: context.to_string(),
            }),
        }
    }
}

impl PersistenceGateway for PgStore {
    fn get_or_create_instance(
        &self,
        state_id: i32,
        site_id: i32,
        params: &CanonicalParameterSet,
        context: &str,
    ) -> Result<i64, PersistenceError> {
        let uid = identity_value(params, "uid")?;
        let instance_name = identity_value(params, "instance_name")?;
        let snapshot = serde_json::to_string(params)?;

        let mut conn = self.db.get_connection()?;

        // A concurrent insert for the same identity makes ours a no-op; the
        // follow-up select then sees the committed row.
        let inserted = diesel::sql_query(INSERT_INSTANCE)
            .bind::<Integer, _>(state_id)
            .bind::<Integer, _>(site_id)
            .bind::<Text, _>(uid)
            .bind::<Text, _>(instance_name)
            .bind::<Text, _>(&snapshot)
            .get_result::<InstanceIdRow>(&mut conn)
            .optional()?;

        if let Some(row) = inserted {
            tracing::info!(instance_id = row.id, uid, instance_name, context, "Created instance");
            return Ok(row.id);
        }

        let existing = diesel::sql_query(SELECT_INSTANCE)
            .bind::<Text, _>(uid)
            .bind::<Text, _>(instance_name)
            .bind::<Integer, _>(site_id)
            .get_result::<InstanceIdRow>(&mut conn)?;

        tracing::info!(instance_id = existing.id, uid, instance_name, context, "Found existing instance");
        Ok(existing.id)
    }

    fn insert_config_items(&self, instance_id: i64, params: &CanonicalParameterSet) -> Result<(), PersistenceError> {
        let mut conn = self.db.get_connection()?;

        let written = conn.transaction::<_, PersistenceError, _>(|conn| {
            let mut written = 0usize;
            for (key, value) in params {
                written += diesel::sql_query(UPSERT_CONFIG_ITEM)
                    .bind::<BigInt, _>(instance_id)
                    .bind::<Text, _>(key)
                    .bind::<Nullable<Text>, _>(value)
                    .execute(conn)?;
            }
            Ok(written)
        })?;

        tracing::info!(
            instance_id,
            items = params.len(),
            written,
            "Upserted config items"
        );
        Ok(())
    }
}
