use std::fmt;

use serde::{Deserialize, Serialize};

/// Label every newly created quote starts with.
pub const NOT_SENT_STATUS_NAME: &str = "Not sent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub i64);

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Quote,
    Lead,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Lead => "lead",
        }
    }
}

/// A status label as fetched from the status store. The set is data-driven,
/// so the engine never matches on concrete labels except [`NOT_SENT_STATUS_NAME`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub name: String,
    pub entity_kind: EntityKind,
}

impl Status {
    pub fn new(id: i64, name: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self { id: StatusId(id), name: name.into(), entity_kind }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }
}

pub fn find_by_name<'a>(
    statuses: &'a [Status],
    kind: EntityKind,
    name: &str,
) -> Option<&'a Status> {
    statuses.iter().find(|status| status.entity_kind == kind && status.is_named(name))
}

pub fn find_by_id(statuses: &[Status], id: StatusId) -> Option<&Status> {
    statuses.iter().find(|status| status.id == id)
}
