//! MongoDB credentials arrive on a `database-created` event that only the leader can act upon. The leader
//! copies them into the peer relation's application data, and every unit then picks them up from there
//! when the peer relation changes. Later `endpoints-changed` events only replace the endpoints of credentials
//! that the leader has already published.
use crate::resource::{JsonObject, RelationData};
use crate::state::{StateStore, MONGODB_NAMESPACE};

use serde_json::Value;

pub const RELATION_NAME: &str = "mongodb-client";

pub const PEER_DATABASE: &str = "mongodb-database";
pub const PEER_USERNAME: &str = "mongodb-username";
pub const PEER_PASSWORD: &str = "mongodb-password";
pub const PEER_ENDPOINTS: &str = "mongodb-endpoints";

/// Pairs of (peer data key, context field)
const FIELDS: &[(&str, &str)] = &[
    (PEER_DATABASE, "database"),
    (PEER_USERNAME, "username"),
    (PEER_PASSWORD, "password"),
    (PEER_ENDPOINTS, "endpoints"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCreated {
    pub username: String,
    pub password: String,
    pub endpoints: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointsChanged {
    pub endpoints: String,
}

/// The peer application data the leader should publish for a newly created database
pub fn peer_data_for(app_name: &str, event: &DatabaseCreated) -> RelationData {
    let mut data = RelationData::new();
    data.insert(PEER_DATABASE.to_owned(), app_name.to_owned());
    data.insert(PEER_USERNAME.to_owned(), event.username.clone());
    data.insert(PEER_PASSWORD.to_owned(), event.password.clone());
    data.insert(PEER_ENDPOINTS.to_owned(), event.endpoints.clone());
    data
}

/// The peer application data update the leader should publish when the database endpoints change. Returns
/// `None` when no credentials have been published for this application yet, or when the endpoints are
/// already current.
pub fn endpoints_update_for(
    app_name: &str,
    peer_data: Option<&RelationData>,
    event: &EndpointsChanged,
) -> Option<RelationData> {
    let peer = peer_data?;
    if peer.get(PEER_DATABASE).map(String::as_str) != Some(app_name) {
        log::info!("Ignoring MongoDB endpoints change, no database has been created for '{}'", app_name);
        return None;
    }
    if peer.get(PEER_ENDPOINTS) == Some(&event.endpoints) {
        return None;
    }
    let mut data = RelationData::new();
    data.insert(PEER_ENDPOINTS.to_owned(), event.endpoints.clone());
    Some(data)
}

/// Stores the credentials found in the peer application data, or clears them if there are none for this
/// application. Returns true if the stored data changed.
pub fn on_peer_relation_changed(
    store: &mut dyn StateStore,
    app_name: &str,
    peer_data: Option<&RelationData>,
) -> bool {
    let data = peer_data
        .and_then(|peer| credentials(peer, app_name))
        .unwrap_or_default();
    store.replace(MONGODB_NAMESPACE, data)
}

fn credentials(peer: &RelationData, app_name: &str) -> Option<JsonObject> {
    match peer.get(PEER_DATABASE) {
        Some(database) if database == app_name => {}
        Some(database) => {
            log::warn!(
                "Ignoring MongoDB credentials for database '{}', expected '{}'",
                database,
                app_name
            );
            return None;
        }
        None => return None,
    }

    let mut data = JsonObject::new();
    for (peer_key, field) in FIELDS {
        match peer.get(*peer_key) {
            Some(value) => {
                data.insert((*field).to_owned(), Value::String(value.clone()));
            }
            None => {
                log::warn!("Peer relation data is missing '{}', ignoring MongoDB credentials", peer_key);
                return None;
            }
        }
    }
    Some(data)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::MemoryStore;
    use serde_json::json;

    const APP: &str = "gunicorn";

    fn created() -> DatabaseCreated {
        DatabaseCreated {
            username: "user".to_owned(),
            password: "secret".to_owned(),
            endpoints: "mongo-0:27017".to_owned(),
        }
    }

    #[test]
    fn peer_data_is_stored_as_credentials() {
        let mut store = MemoryStore::new();
        let peer = peer_data_for(APP, &created());

        assert!(on_peer_relation_changed(&mut store, APP, Some(&peer)));
        assert!(!on_peer_relation_changed(&mut store, APP, Some(&peer)));

        let expected = json!({
            "database": "gunicorn",
            "username": "user",
            "password": "secret",
            "endpoints": "mongo-0:27017",
        });
        assert_eq!(expected.as_object().cloned(), store.get(MONGODB_NAMESPACE));
    }

    #[test]
    fn missing_peer_data_clears_credentials() {
        let mut store = MemoryStore::new();
        on_peer_relation_changed(&mut store, APP, Some(&peer_data_for(APP, &created())));

        assert!(on_peer_relation_changed(&mut store, APP, Some(&RelationData::new())));
        assert!(store.get(MONGODB_NAMESPACE).is_none());
        assert!(!on_peer_relation_changed(&mut store, APP, None));
    }

    #[test]
    fn credentials_for_another_app_are_ignored() {
        let mut store = MemoryStore::new();
        let peer = peer_data_for("another-app", &created());
        assert!(!on_peer_relation_changed(&mut store, APP, Some(&peer)));
        assert!(store.get(MONGODB_NAMESPACE).is_none());
    }

    #[test]
    fn endpoints_change_updates_published_credentials() {
        let mut store = MemoryStore::new();
        let mut peer = peer_data_for(APP, &created());
        on_peer_relation_changed(&mut store, APP, Some(&peer));

        let moved = EndpointsChanged {
            endpoints: "mongo-1:27017,mongo-2:27017".to_owned(),
        };
        let update = endpoints_update_for(APP, Some(&peer), &moved).expect("expected an endpoints update");
        assert_eq!(1, update.len());
        peer.extend(update);

        assert!(on_peer_relation_changed(&mut store, APP, Some(&peer)));
        let stored = store.get(MONGODB_NAMESPACE).unwrap();
        assert_eq!(Some(&json!("mongo-1:27017,mongo-2:27017")), stored.get("endpoints"));
        assert_eq!(Some(&json!("user")), stored.get("username"));

        assert_eq!(None, endpoints_update_for(APP, Some(&peer), &moved));
    }

    #[test]
    fn endpoints_change_without_credentials_is_ignored() {
        let moved = EndpointsChanged {
            endpoints: "mongo-1:27017".to_owned(),
        };
        assert_eq!(None, endpoints_update_for(APP, None, &moved));
        assert_eq!(None, endpoints_update_for(APP, Some(&RelationData::new()), &moved));
        let other = peer_data_for("another-app", &created());
        assert_eq!(None, endpoints_update_for(APP, Some(&other), &moved));
    }

    #[test]
    fn incomplete_credentials_are_ignored() {
        let mut store = MemoryStore::new();
        let mut peer = peer_data_for(APP, &created());
        peer.remove(PEER_PASSWORD);
        assert!(!on_peer_relation_changed(&mut store, APP, Some(&peer)));
    }
}
