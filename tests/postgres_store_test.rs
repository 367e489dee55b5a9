/// Tests against a live PostgreSQL database
///
/// Run with `DATABASE_URL` pointing at a scratch database; without it every
/// test returns early.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use runprops::{
    CanonicalParameterSet, Database, LookupError, LookupResolver, LookupTable, NormalizationPipeline,
    PersistenceGateway, PgStore, PipelineConfig, RuleSet, WorkflowType,
};
use uuid::Uuid;

#[derive(QueryableByName, Debug, PartialEq)]
struct ConfigItemRow {
    #[diesel(sql_type = Text)]
    key: String,
    #[diesel(sql_type = Nullable<Text>)]
    value: Option<String>,
}

fn live_store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping live PostgreSQL test");
        return None;
    };

    let store = PgStore::new(Database::new(&url).unwrap());
    store.ensure_tables().unwrap();
    Some(store)
}

/// Insert a reference row if missing and return its id.
fn seed(store: &PgStore, table: LookupTable, code: &str) -> i32 {
    let mut conn = store.database().get_connection().unwrap();
    diesel::sql_query(format!(
        "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
        table.table_name()
    ))
    .bind::<Text, _>(code)
    .execute(&mut conn)
    .unwrap();

    store.resolve_id(table, code, "seed").unwrap()
}

fn run_params(uid: &str) -> CanonicalParameterSet {
    let mut params = CanonicalParameterSet::new();
    params.insert("uid".to_string(), Some(uid.to_string()));
    params.insert("instance_name".to_string(), Some("ec95d".to_string()));
    params.insert("stormname".to_string(), None);
    params
}

fn config_items(store: &PgStore, instance_id: i64) -> Vec<ConfigItemRow> {
    let mut conn = store.database().get_connection().unwrap();
    diesel::sql_query("SELECT key, value FROM config_item WHERE instance_id = $1 ORDER BY key")
        .bind::<diesel::sql_types::BigInt, _>(instance_id)
        .load(&mut conn)
        .unwrap()
}

#[test]
fn test_get_or_create_instance_is_idempotent() {
    let Some(store) = live_store() else { return };
    let state_id = seed(&store, LookupTable::StateType, "RUNN");
    let site_id = seed(&store, LookupTable::Site, "RENCI");
    let params = run_params(&Uuid::new_v4().to_string());

    let first = store.get_or_create_instance(state_id, site_id, &params, "test").unwrap();
    let second = store.get_or_create_instance(state_id, site_id, &params, "test").unwrap();

    assert!(first >= 0);
    assert_eq!(first, second);
}

#[test]
fn test_concurrent_get_or_create_converges() {
    let Some(store) = live_store() else { return };
    let state_id = seed(&store, LookupTable::StateType, "RUNN");
    let site_id = seed(&store, LookupTable::Site, "RENCI");
    let store = Arc::new(store);
    let params = run_params(&Uuid::new_v4().to_string());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let params = params.clone();
            std::thread::spawn(move || store.get_or_create_instance(state_id, site_id, &params, "test").unwrap())
        })
        .collect();

    let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
}

#[test]
fn test_config_items_upsert() {
    let Some(store) = live_store() else { return };
    let state_id = seed(&store, LookupTable::StateType, "RUNN");
    let site_id = seed(&store, LookupTable::Site, "RENCI");
    let mut params = run_params(&Uuid::new_v4().to_string());
    let id = store.get_or_create_instance(state_id, site_id, &params, "test").unwrap();

    store.insert_config_items(id, &params).unwrap();
    store.insert_config_items(id, &params).unwrap();
    assert_eq!(config_items(&store, id).len(), 3);

    params.insert("stormname".to_string(), Some("BOB".to_string()));
    store.insert_config_items(id, &params).unwrap();

    let items = config_items(&store, id);
    assert_eq!(items.len(), 3);
    assert!(items.contains(&ConfigItemRow {
        key: "stormname".to_string(),
        value: Some("BOB".to_string()),
    }));
}

#[test]
fn test_unknown_code_is_not_found() {
    let Some(store) = live_store() else { return };
    let code = Uuid::new_v4().to_string();

    let err = store.resolve_id(LookupTable::Site, &code, "test").unwrap_err();

    assert!(matches!(err, LookupError::NotFound { table: LookupTable::Site, .. }));
}

#[test]
fn test_pipeline_persists_graph_message() {
    let Some(store) = live_store() else { return };
    seed(&store, LookupTable::StateType, "RUNN");
    seed(&store, LookupTable::Site, "RENCI");
    let store = Arc::new(store);
    let pipeline = NormalizationPipeline::new(PipelineConfig::new(WorkflowType::Graph), RuleSet::builtin(), Arc::clone(&store));
    let uid = Uuid::new_v4().to_string();
    let body = format!(
        r#"{{"suite.physical_location":"RENCI","instance_name":"ec95d","uid":"{}"}}"#,
        uid
    );

    let first = pipeline.process(body.as_bytes()).unwrap();
    let second = pipeline.process(body.as_bytes()).unwrap();

    assert_eq!(first.instance_id, second.instance_id);
    let items = config_items(&store, first.instance_id);
    assert!(items.contains(&ConfigItemRow {
        key: "instancename".to_string(),
        value: Some("ec95d".to_string()),
    }));
    assert!(items.contains(&ConfigItemRow {
        key: "workflow_type".to_string(),
        value: Some("ECFLOW".to_string()),
    }));
}
