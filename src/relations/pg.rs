use crate::state::{StateStore, PG_NAMESPACE};

use serde_json::Value;

pub const RELATION_NAME: &str = "pg";

pub const CONN_STR: &str = "conn_str";
pub const DB_URI: &str = "db_uri";
pub const RO_URIS: &str = "ro_uris";

/// Connection details for a single database unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionString {
    pub conn_str: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationJoined {
    /// The database name currently requested on the relation, if the leader has set one
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterChanged {
    pub database: Option<String>,
    pub master: Option<ConnectionString>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandbyChanged {
    pub database: Option<String>,
    #[serde(default)]
    pub standbys: Vec<ConnectionString>,
}

/// What to do in response to the relation being joined
#[derive(Debug, Clone, PartialEq)]
pub enum JoinAction {
    /// Ask the database server for a database with this name
    RequestDatabase(String),
    /// The leader hasn't set the requirements yet; retry later in case this unit becomes leader
    Defer,
    Nothing,
}

pub fn on_relation_joined(event: &RelationJoined, app_name: &str, is_leader: bool) -> JoinAction {
    if is_leader {
        JoinAction::RequestDatabase(app_name.to_owned())
    } else if event.database.as_deref() != Some(app_name) {
        log::debug!("Database requirements for '{}' not yet set by the leader", app_name);
        JoinAction::Defer
    } else {
        JoinAction::Nothing
    }
}

fn is_for_app(database: &Option<String>, app_name: &str) -> bool {
    if database.as_deref() == Some(app_name) {
        true
    } else {
        log::info!(
            "Ignoring database event for {:?}, since it was not provisioned for '{}'",
            database,
            app_name
        );
        false
    }
}

/// Records the primary's connection details, or removes them if there is no longer a primary.
/// Returns true if the stored data changed.
pub fn on_master_changed(store: &mut dyn StateStore, app_name: &str, event: &MasterChanged) -> bool {
    if !is_for_app(&event.database, app_name) {
        return false;
    }
    let mut data = store.get(PG_NAMESPACE).unwrap_or_default();
    match event.master.as_ref() {
        Some(master) => {
            data.insert(CONN_STR.to_owned(), Value::String(master.conn_str.clone()));
            data.insert(DB_URI.to_owned(), Value::String(master.uri.clone()));
        }
        None => {
            log::info!("No primary database unit for '{}'", app_name);
            data.remove(CONN_STR);
            data.remove(DB_URI);
        }
    }
    store.replace(PG_NAMESPACE, data)
}

/// Records the read-only URIs of the standby units. Returns true if the stored data changed.
pub fn on_standby_changed(store: &mut dyn StateStore, app_name: &str, event: &StandbyChanged) -> bool {
    if !is_for_app(&event.database, app_name) {
        return false;
    }
    let mut data = store.get(PG_NAMESPACE).unwrap_or_default();
    if event.standbys.is_empty() {
        data.remove(RO_URIS);
    } else {
        let uris = event
            .standbys
            .iter()
            .map(|s| Value::String(s.uri.clone()))
            .collect();
        data.insert(RO_URIS.to_owned(), Value::Array(uris));
    }
    store.replace(PG_NAMESPACE, data)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::MemoryStore;
    use serde_json::json;

    const APP: &str = "gunicorn";

    fn master(uri: &str) -> MasterChanged {
        MasterChanged {
            database: Some(APP.to_owned()),
            master: Some(ConnectionString {
                conn_str: format!("conn {}", uri),
                uri: uri.to_owned(),
            }),
        }
    }

    #[test]
    fn leader_requests_database_named_after_app() {
        let joined = RelationJoined { database: None };
        assert_eq!(
            JoinAction::RequestDatabase(APP.to_owned()),
            on_relation_joined(&joined, APP, true)
        );
    }

    #[test]
    fn non_leader_defers_until_database_is_set() {
        let joined = RelationJoined { database: None };
        assert_eq!(JoinAction::Defer, on_relation_joined(&joined, APP, false));

        let joined = RelationJoined {
            database: Some(APP.to_owned()),
        };
        assert_eq!(JoinAction::Nothing, on_relation_joined(&joined, APP, false));
    }

    #[test]
    fn master_changed_stores_connection_details_once() {
        let mut store = MemoryStore::new();
        let event = master("postgresql://u:p@h:5432/db");

        assert!(on_master_changed(&mut store, APP, &event));
        assert!(!on_master_changed(&mut store, APP, &event));

        let data = store.get(PG_NAMESPACE).expect("no pg data");
        assert_eq!(Some(&json!("postgresql://u:p@h:5432/db")), data.get(DB_URI));
        assert_eq!(Some(&json!("conn postgresql://u:p@h:5432/db")), data.get(CONN_STR));
    }

    #[test]
    fn master_changed_for_another_database_is_ignored() {
        let mut store = MemoryStore::new();
        let mut event = master("postgresql://elsewhere");
        event.database = Some("someone-else".to_owned());

        assert!(!on_master_changed(&mut store, APP, &event));
        assert!(store.get(PG_NAMESPACE).is_none());
    }

    #[test]
    fn master_going_away_clears_connection_details() {
        let mut store = MemoryStore::new();
        on_master_changed(&mut store, APP, &master("postgresql://x"));

        let gone = MasterChanged {
            database: Some(APP.to_owned()),
            master: None,
        };
        assert!(on_master_changed(&mut store, APP, &gone));
        assert!(store.get(PG_NAMESPACE).is_none());
    }

    #[test]
    fn standby_uris_are_kept_alongside_master() {
        let mut store = MemoryStore::new();
        on_master_changed(&mut store, APP, &master("postgresql://primary"));

        let standbys = StandbyChanged {
            database: Some(APP.to_owned()),
            standbys: vec![ConnectionString {
                conn_str: "host=replica".to_owned(),
                uri: "postgresql://replica".to_owned(),
            }],
        };
        assert!(on_standby_changed(&mut store, APP, &standbys));

        let data = store.get(PG_NAMESPACE).unwrap();
        assert_eq!(Some(&json!(["postgresql://replica"])), data.get(RO_URIS));
        assert_eq!(Some(&json!("postgresql://primary")), data.get(DB_URI));
    }
}
