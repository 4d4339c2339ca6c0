//! Builds the template context out of the persisted special-cased relation state and the raw relation data
//! observed on the current event. The result is a two level structure (`namespace.field`), where each
//! namespace is named after the relation that provided it.
use crate::resource::{JsonObject, Relation};
use crate::state::StoredRelations;

use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Diagnostics produced while building a context, for relations where some data had to be ignored
#[derive(Debug, Clone, PartialEq)]
pub enum ContextWarning {
    MultipleRelations {
        relation: String,
        kept_id: u64,
        count: usize,
    },
    MultipleUnits {
        relation: String,
        id: u64,
        unit: String,
        count: usize,
    },
}

impl Display for ContextWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContextWarning::MultipleRelations { relation, kept_id, count } => write!(
                f,
                "Multiple relations ({}) of type \"{}\" detected, using only the first one (id: {}) for relation data.",
                count, relation, kept_id
            ),
            ContextWarning::MultipleUnits { relation, id, unit, count } => write!(
                f,
                "Multiple units ({}) detected in the relation \"{}:{}\", using only the first one (id: {}) for relation data.",
                count, relation, id, unit
            ),
        }
    }
}

/// The values available for template interpolation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    values: JsonObject,
    warnings: Vec<ContextWarning>,
}

impl Context {
    /// Wraps an existing object, with no warnings
    pub fn from_values(values: JsonObject) -> Context {
        Context {
            values,
            warnings: Vec::new(),
        }
    }

    pub fn values(&self) -> &JsonObject {
        &self.values
    }

    pub fn warnings(&self) -> &[ContextWarning] {
        &self.warnings
    }

    pub fn namespace(&self, name: &str) -> Option<&JsonObject> {
        self.values.get(name).and_then(Value::as_object)
    }

    /// Resolves a dotted path such as `["pg", "db_uri"]`. Array elements may be addressed by index.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        lookup_in(self.values.get(first.as_ref())?, rest)
    }

    /// Returns true if the path resolves to a value that is neither absent nor "falsy". Empty strings,
    /// zero, false, null and empty collections are all treated as unresolved.
    pub fn is_resolved<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.lookup(path).map(is_truthy).unwrap_or(false)
    }

    /// Every dotted path that may be referenced from a template, sorted
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (key, value) in self.values.iter() {
            flatten_into(&mut names, key.clone(), value);
        }
        names.sort();
        names
    }
}

fn flatten_into(names: &mut Vec<String>, prefix: String, value: &Value) {
    match value {
        Value::Object(obj) if !obj.is_empty() => {
            for (key, nested) in obj.iter() {
                flatten_into(names, format!("{}.{}", prefix, key), nested);
            }
        }
        _ => names.push(prefix),
    }
}

/// Follows the remaining path segments down from `value`
pub fn lookup_in<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i))?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Merges the persisted relation state and the raw relation data into a single context. This is a pure
/// function of its inputs, apart from logging a warning for each piece of relation data that gets ignored.
///
/// Stored namespaces are added first. For each relation name, only the instance with the lowest id is used,
/// and within that only the unit with the smallest name. Its data is merged into the namespace of the same
/// name without overwriting any field that came from the stored state.
pub fn build_context(stored: &StoredRelations, relations: &[Relation]) -> Context {
    let mut values = JsonObject::new();
    let mut warnings = Vec::new();

    for (namespace, data) in stored.iter() {
        if !data.is_empty() {
            values.insert(namespace.clone(), Value::Object(data.clone()));
        }
    }

    let mut by_name: BTreeMap<&str, Vec<&Relation>> = BTreeMap::new();
    for relation in relations {
        by_name.entry(relation.name.as_str()).or_default().push(relation);
    }

    for (name, mut instances) in by_name {
        instances.sort_by_key(|r| r.id);
        let relation = instances[0];
        if instances.len() > 1 {
            let warning = ContextWarning::MultipleRelations {
                relation: name.to_owned(),
                kept_id: relation.id,
                count: instances.len(),
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }

        let (unit, data) = match relation.first_unit() {
            Some(pair) => pair,
            None => {
                log::trace!("No remote units in relation {}", relation.id_ref());
                continue;
            }
        };
        if relation.units.len() > 1 {
            let warning = ContextWarning::MultipleUnits {
                relation: name.to_owned(),
                id: relation.id,
                unit: unit.to_owned(),
                count: relation.units.len(),
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }

        let namespace = values
            .entry(name.to_owned())
            .or_insert_with(|| Value::Object(JsonObject::new()));
        match namespace.as_object_mut() {
            Some(obj) => {
                for (key, value) in data.iter() {
                    obj.entry(key.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }
            }
            None => {
                log::warn!(
                    "Namespace '{}' from stored state is not an object, ignoring data from relation {}",
                    name,
                    relation.id_ref()
                );
            }
        }
    }

    Context { values, warnings }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::relation_data;
    use serde_json::json;

    fn stored(value: Value) -> StoredRelations {
        value
            .as_object()
            .expect("not an object")
            .iter()
            .map(|(k, v)| (k.clone(), v.as_object().cloned().expect("not an object")))
            .collect()
    }

    #[test]
    fn picks_unit_with_smallest_name_and_warns() {
        let relations = vec![Relation::new("myrel", 1)
            .with_unit("myapp/1", relation_data(vec![("thing", "blo")]))
            .with_unit("myapp/0", relation_data(vec![("thing", "bli")]))];

        let ctx = build_context(&StoredRelations::new(), &relations);

        assert_eq!(Some(&json!("bli")), ctx.lookup(&["myrel", "thing"]));
        assert_eq!(
            &[ContextWarning::MultipleUnits {
                relation: "myrel".to_owned(),
                id: 1,
                unit: "myapp/0".to_owned(),
                count: 2,
            }],
            ctx.warnings()
        );
        assert!(ctx.warnings()[0].to_string().contains("myapp/0"));
    }

    #[test]
    fn picks_relation_with_lowest_id_and_warns() {
        let relations = vec![
            Relation::new("myrel", 7).with_unit("other/0", relation_data(vec![("thing", "late")])),
            Relation::new("myrel", 2).with_unit("myapp/0", relation_data(vec![("thing", "early")])),
        ];

        let ctx = build_context(&StoredRelations::new(), &relations);

        assert_eq!(Some(&json!("early")), ctx.lookup(&["myrel", "thing"]));
        match &ctx.warnings()[0] {
            ContextWarning::MultipleRelations { kept_id, .. } => assert_eq!(2, *kept_id),
            other => panic!("unexpected warning: {:?}", other),
        }
    }

    #[test]
    fn stored_and_raw_data_are_merged_without_overwriting() {
        let state = stored(json!({
            "pg": {"db_uri": "postgresql://stored", "conn_str": "host=stored"}
        }));
        let relations = vec![Relation::new("pg", 1).with_unit(
            "postgresql/0",
            relation_data(vec![("db_uri", "postgresql://raw"), ("version", "12")]),
        )];

        let ctx = build_context(&state, &relations);

        assert_eq!(Some(&json!("postgresql://stored")), ctx.lookup(&["pg", "db_uri"]));
        assert_eq!(Some(&json!("host=stored")), ctx.lookup(&["pg", "conn_str"]));
        assert_eq!(Some(&json!("12")), ctx.lookup(&["pg", "version"]));
    }

    #[test]
    fn empty_stored_namespaces_are_skipped() {
        let state = stored(json!({"pg": {}, "mongodb": {"username": "u"}}));
        let ctx = build_context(&state, &[]);
        assert!(ctx.namespace("pg").is_none());
        assert!(ctx.namespace("mongodb").is_some());
    }

    #[test]
    fn relations_without_units_add_nothing() {
        let ctx = build_context(&StoredRelations::new(), &[Relation::new("ingress", 4)]);
        assert!(ctx.values().is_empty());
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn falsy_values_are_unresolved() {
        let ctx = Context::from_values(
            json!({
                "ns": {"empty": "", "zero": 0, "no": false, "list": [], "set": "yes", "uris": ["a"]}
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        for key in &["empty", "zero", "no", "list", "absent"] {
            assert!(!ctx.is_resolved(&["ns", *key]), "{} should be unresolved", key);
        }
        assert!(ctx.is_resolved(&["ns", "set"]));
        assert!(ctx.is_resolved(&["ns", "uris", "0"]));
        assert!(!ctx.is_resolved(&["nope"]));
    }

    #[test]
    fn variable_names_are_sorted_dotted_paths() {
        let state = stored(json!({"pg": {"ro_uris": ["a", "b"], "db_uri": "x"}}));
        let relations = vec![Relation::new("myrel", 1).with_unit(
            "myapp/0",
            relation_data(vec![("thing", "bli"), ("another", "one")]),
        )];
        let ctx = build_context(&state, &relations);
        assert_eq!(
            vec!["myrel.another", "myrel.thing", "pg.db_uri", "pg.ro_uris"],
            ctx.variable_names()
        );
    }
}
