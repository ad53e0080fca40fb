//! Bucket types offered as plans.
//!
//! The set of data types is closed; `ClassCatalog` is built once at startup and handed
//! to the engine, so there is no process-wide registry to mutate.

use serde::{Deserialize, Serialize};

pub const BUCKET_TYPE_COUNTER: &str = "tsuru-counter";
pub const BUCKET_TYPE_SET: &str = "tsuru-set";
pub const BUCKET_TYPE_MAP: &str = "tsuru-map";

/// Riak CRDT a bucket type is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Counter,
    Set,
    Map,
}

impl DataType {
    /// Tag riak-admin expects in the `datatype` bucket type property.
    pub fn riak_tag(self) -> &'static str {
        match self {
            DataType::Counter => "counter",
            DataType::Set => "set",
            DataType::Map => "map",
        }
    }
}

/// One plan: a named bucket type with its datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceClass {
    pub name: String,
    pub datatype: DataType,
    pub description: String,
}

/// What `GET /resources/plans` returns per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ClassCatalog {
    classes: Vec<NamespaceClass>,
}

impl Default for ClassCatalog {
    fn default() -> Self { Self::standard() }
}

impl ClassCatalog {
    /// The counter, set and map bucket types.
    pub fn standard() -> Self {
        let mk = |name: &str, datatype: DataType| NamespaceClass {
            name: name.to_string(),
            datatype,
            description: format!("Bucket type of {} data type", datatype.riak_tag()),
        };
        Self {
            classes: vec![
                mk(BUCKET_TYPE_COUNTER, DataType::Counter),
                mk(BUCKET_TYPE_SET, DataType::Set),
                mk(BUCKET_TYPE_MAP, DataType::Map),
            ],
        }
    }

    /// Resolve a plan name. Accepts the bucket type name or the bare datatype tag
    /// (`counter`, `set`, `map`).
    pub fn resolve(&self, name: &str) -> Option<&NamespaceClass> {
        let name = name.trim();
        self.classes
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.classes.iter().find(|c| c.datatype.riak_tag() == name))
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.classes
            .iter()
            .map(|c| Plan { name: c.name.clone(), description: c.description.clone() })
            .collect()
    }
}
