//! Resource model for replicated network policies.
//!
//! The replicator moves [`ResourceObject`] envelopes between clusters. The
//! envelope separates three concerns:
//!
//! - **Identity** ([`ObjectRef`]): the stable (kind, namespace, name) key
//!   used to join source and destination copies and to deduplicate work.
//! - **Cluster-assigned metadata**: the opaque resource version minted by
//!   whichever cluster stores the object. Versions are only meaningful for
//!   optimistic concurrency within one cluster and are never copied across.
//! - **Specification** ([`PolicySpec`]): the replicated content. The
//!   reconciler only needs equality and copy semantics from it.
//!
//! # Tombstones
//!
//! Deletion can be observed two ways: the object is physically gone from the
//! source, or it carries a deletion timestamp (logical tombstone) while it is
//! being torn down. Both mean "absent" to the reconciler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label key marking destination objects as replication-managed.
///
/// The value is the controller id from [`crate::config::ReplicatorConfig`].
/// External actors can use this to tell replicated objects apart from
/// independently-created ones.
pub const MANAGED_BY_LABEL: &str = "replicator.dev/managed-by";

/// Identity of a resource: (kind, namespace, name).
///
/// Stable and unique within a cluster. Used as the work queue dedup key and
/// as the join key between the source and destination copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Resource kind (e.g., "ClusterwideNetworkPolicy").
    pub kind: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object name, unique within (kind, namespace).
    pub name: String,
}

impl ObjectRef {
    /// Create a new identity.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Transport protocol matched by a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A single ingress or egress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// CIDR blocks this rule applies to.
    pub cidrs: Vec<String>,
    /// Ports the rule opens. Empty means all ports.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Protocol to match.
    pub protocol: Protocol,
    /// Optional free-form comment, part of the replicated content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl PolicyRule {
    /// Convenience constructor for a TCP rule.
    pub fn tcp(cidrs: Vec<String>, ports: Vec<u16>) -> Self {
        Self {
            cidrs,
            ports,
            protocol: Protocol::Tcp,
            comment: None,
        }
    }
}

/// The replicated specification payload.
///
/// Opaque to the reconciler beyond `PartialEq` and `Clone`: divergence is
/// detected by deep equality, and convergence is achieved by copying the
/// whole spec. Cluster-assigned metadata lives outside this struct, so
/// comparing two specs never compares resource versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Rules for traffic entering the cluster.
    #[serde(default)]
    pub ingress: Vec<PolicyRule>,
    /// Rules for traffic leaving the cluster.
    #[serde(default)]
    pub egress: Vec<PolicyRule>,
}

/// Envelope for one stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceObject {
    /// Identity of this object.
    pub id: ObjectRef,

    /// Labels. On destination copies this includes the
    /// [`MANAGED_BY_LABEL`] provenance marker.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Opaque version token minted by the owning cluster.
    ///
    /// `None` on objects that have not been stored yet. Never compared
    /// across clusters and never copied by the replicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Logical tombstone: unix millis at which deletion was requested.
    ///
    /// A tombstoned object still exists physically but must be treated as
    /// absent by consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<u64>,

    /// The replicated content.
    pub spec: PolicySpec,
}

impl ResourceObject {
    /// Create a fresh, unversioned object.
    pub fn new(id: ObjectRef, spec: PolicySpec) -> Self {
        Self {
            id,
            labels: BTreeMap::new(),
            resource_version: None,
            deletion_timestamp: None,
            spec,
        }
    }

    /// True if the object carries a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// True if this object carries the managed-by marker for `controller_id`.
    pub fn is_managed_by(&self, controller_id: &str) -> bool {
        self.labels
            .get(MANAGED_BY_LABEL)
            .is_some_and(|v| v == controller_id)
    }
}
