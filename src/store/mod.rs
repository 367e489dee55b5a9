//! Lookup resolution and idempotent persistence.
//!
//! The pipeline talks to storage through two traits:
//!
//! - [`LookupResolver`] maps reference codes (state type, site) to surrogate ids
//! - [`PersistenceGateway`] owns the lifecycle of instance and config item rows
//!
//! [`PgStore`] implements both against PostgreSQL through a diesel/r2d2 pool.
//! [`MemoryStore`] implements the same contracts in process, for dry runs and
//! tests.

pub mod database;
pub mod memory;
pub mod postgres;

use std::fmt;

use crate::params::CanonicalParameterSet;

pub use database::{Database, DatabaseConfig, DbConnection, Pool, PooledConnection};
pub use memory::{InstanceRecord, MemoryStore};
pub use postgres::PgStore;

/// Parameter keys that identify a logical run, together with the site id.
pub const IDENTITY_KEYS: [&str; 2] = ["uid", "instance_name"];

/// Reference tables codes are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupTable {
    StateType,
    Site,
}

impl LookupTable {
    pub fn table_name(self) -> &'static str {
        match self {
            LookupTable::StateType => "state_type",
            LookupTable::Site => "site",
        }
    }
}

impl fmt::Display for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Store unavailable, constraint violated, or the parameters cannot identify
/// a run.
#[derive(Debug)]
pub enum PersistenceError {
    /// No connection could be obtained
    Unavailable(String),
    Database(diesel::result::Error),
    Constraint(String),
    /// A required identity key is absent or null
    MissingIdentity(&'static str),
    Serialization(serde_json::Error),
}

impl PersistenceError {
    /// Redelivering the same message cannot fix these.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PersistenceError::MissingIdentity(_) | PersistenceError::Serialization(_))
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Unavailable(msg) => write!(f, "Persistence error: store unavailable: {}", msg),
            PersistenceError::Database(e) => write!(f, "Persistence error: database error: {}", e),
            PersistenceError::Constraint(msg) => write!(f, "Persistence error: constraint violated: {}", msg),
            PersistenceError::MissingIdentity(key) => {
                write!(f, "Persistence error: identity key '{}' is missing or null", key)
            }
            PersistenceError::Serialization(e) => {
                write!(f, "Persistence error: cannot serialize parameters: {}", e)
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<diesel::result::Error> for PersistenceError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match e {
            Error::DatabaseError(
                kind @ (DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation),
                info,
            ) => PersistenceError::Constraint(format!("{:?}: {}", kind, info.message())),
            other => PersistenceError::Database(other),
        }
    }
}

impl From<r2d2::Error> for PersistenceError {
    fn from(e: r2d2::Error) -> Self {
        PersistenceError::Unavailable(e.to_string())
    }
}

impl From<diesel::ConnectionError> for PersistenceError {
    fn from(e: diesel::ConnectionError) -> Self {
        PersistenceError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e)
    }
}

/// A code could not be resolved.
#[derive(Debug)]
pub enum LookupError {
    /// No reference row carries the code
    NotFound {
        table: LookupTable,
        code: String,
        context: String,
    },
    /// The reference store could not be queried
    Store(PersistenceError),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::NotFound { table, code, context } => write!(
                f,
                "Lookup error: no {} entry for code '{}' ({})",
                table, code, context
            ),
            LookupError::Store(e) => write!(f, "Lookup error: {}", e),
        }
    }
}

impl std::error::Error for LookupError {}

impl From<PersistenceError> for LookupError {
    fn from(e: PersistenceError) -> Self {
        LookupError::Store(e)
    }
}

/// Resolves human-readable codes to surrogate ids. Read-only.
pub trait LookupResolver: Send + Sync {
    /// Exact, case-sensitive match of `code` in `table`. `context` is a
    /// caller-supplied label carried into the error for diagnostics.
    fn resolve_id(&self, table: LookupTable, code: &str, context: &str) -> Result<i32, LookupError>;
}

/// Creates instances and upserts their config items.
pub trait PersistenceGateway: Send + Sync {
    /// Return the id of the instance identified by
    /// `(params["uid"], params["instance_name"], site_id)`, creating it on
    /// first sight. Safe to call concurrently for the same identity.
    fn get_or_create_instance(
        &self,
        state_id: i32,
        site_id: i32,
        params: &CanonicalParameterSet,
        context: &str,
    ) -> Result<i64, PersistenceError>;

    /// Upsert one config item per parameter, all or nothing.
    fn insert_config_items(&self, instance_id: i64, params: &CanonicalParameterSet) -> Result<(), PersistenceError>;
}

/// Fetch a non-null identity value from a parameter set.
pub(crate) fn identity_value<'a>(
    params: &'a CanonicalParameterSet,
    key: &'static str,
) -> Result<&'a str, PersistenceError> {
    params
        .get(key)
        .and_then(|value| value.as_deref())
        .ok_or(PersistenceError::MissingIdentity(key))
}
