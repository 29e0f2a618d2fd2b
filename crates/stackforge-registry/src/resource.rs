//! Registered resource records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackforge_common::ResourceType;
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle status of a registered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    /// Registered, provider call in flight
    Creating,
    /// Ready
    Created,
    /// Delete in flight
    Deleting,
    /// Gone; never changes again
    Deleted,
    /// Create or delete failed
    Failed,
}

impl ResourceStatus {
    /// Forward-only moves, plus retry or cleanup out of `Failed`
    pub fn can_transition_to(&self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Creating, Created)
                | (Creating, Deleting)
                | (Creating, Failed)
                | (Created, Deleting)
                | (Created, Failed)
                | (Deleting, Deleted)
                | (Deleting, Failed)
                | (Failed, Creating)
                | (Failed, Deleting)
        )
    }

    /// `Deleted` is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Created => "CREATED",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A resource tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Provider-assigned id
    pub id: String,
    /// Region it lives in
    pub region: String,
    /// Free-form labels such as `name` and `key`
    pub metadata: BTreeMap<String, String>,
    /// Ids this resource needs
    pub depends_on: BTreeSet<String>,
    /// Current status
    pub status: ResourceStatus,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Registration sequence number, starting at 1
    pub seq: u64,
}

impl Resource {
    /// Anything but `Deleted`
    pub fn is_live(&self) -> bool {
        self.status != ResourceStatus::Deleted
    }
}
