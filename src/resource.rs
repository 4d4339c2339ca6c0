use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// The flat key/value bag that a single unit (or application) publishes on a relation
pub type RelationData = BTreeMap<String, String>;

/// A generic JSON object, used for the namespaces of the template context and the persisted relation state
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// One instance of a named relation, as observed from the host at the time of the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub id: u64,
    /// Data published by each remote unit, keyed by unit name. Using a `BTreeMap` keeps
    /// the units sorted by name, so the first entry is always the same unit.
    #[serde(default)]
    pub units: BTreeMap<String, RelationData>,
}

impl Relation {
    pub fn new(name: impl Into<String>, id: u64) -> Relation {
        Relation {
            name: name.into(),
            id,
            units: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>, data: RelationData) -> Self {
        self.units.insert(unit.into(), data);
        self
    }

    /// Returns the unit with the lexicographically smallest name along with its data
    pub fn first_unit(&self) -> Option<(&str, &RelationData)> {
        self.units.iter().next().map(|(name, data)| (name.as_str(), data))
    }

    pub fn id_ref(&self) -> RelationId {
        RelationId {
            name: self.name.as_str(),
            id: self.id,
        }
    }
}

/// A borrowed `name:id` pair, mostly useful for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationId<'a> {
    pub name: &'a str,
    pub id: u64,
}

impl<'a> Display for RelationId<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// Convenience for building `RelationData` from literal pairs
pub fn relation_data<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> RelationData {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_unit_is_smallest_by_name() {
        let rel = Relation::new("myrel", 3)
            .with_unit("myapp/1", relation_data(vec![("thing", "blo")]))
            .with_unit("myapp/0", relation_data(vec![("thing", "bli")]));
        let (name, data) = rel.first_unit().expect("no unit");
        assert_eq!("myapp/0", name);
        assert_eq!("bli", data["thing"]);
        assert_eq!("myrel:3", rel.id_ref().to_string());
    }

    #[test]
    fn relation_without_units_has_no_first_unit() {
        assert!(Relation::new("empty", 1).first_unit().is_none());
    }
}
