//! Rack, member and resource naming.
//!
//! Racks and members carry their numeric position explicitly, so ordering
//! never depends on parsing names back.

use crate::crd::DataCenter;
use kube::ResourceExt;
use std::fmt;

/// Annotation recording the DataCenter generation a StatefulSet was built from.
pub const GENERATION_ANNOTATION: &str = "cassandra.operator.io/datacenter-generation";

/// Label carrying the Cassandra cluster name.
pub const CLUSTER_LABEL: &str = "cassandra.operator.io/cluster";

/// Label carrying the Cassandra datacenter name.
pub const DATACENTER_LABEL: &str = "cassandra.operator.io/datacenter";

/// Label carrying the rack name.
pub const RACK_LABEL: &str = "cassandra.operator.io/rack";

const DEFAULT_SIDECAR_PORT: i32 = 8080;

/// A rack, ordered by its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rack {
    /// Zero-based position; the ordering key.
    pub index: usize,
    /// Rack name (`rack1`, `rack2`, ...).
    pub name: String,
}

impl Rack {
    /// Rack at zero-based position `index`.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: format!("rack{}", index + 1),
        }
    }

    /// The first `count` racks.
    pub fn all(count: usize) -> Vec<Rack> {
        (0..count).map(Rack::new).collect()
    }
}

impl fmt::Display for Rack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Identity of one member (pod).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Member {
    /// Rack the member belongs to.
    pub rack: Rack,
    /// Ordinal within the rack StatefulSet.
    pub ordinal: i32,
    /// Pod name.
    pub name: String,
    /// Namespace the pod runs in.
    pub namespace: String,
    /// Host the sidecar is reached on.
    pub host: String,
    /// Port the sidecar listens on.
    pub sidecar_port: i32,
}

impl Member {
    /// Build a member of `dc`'s `rack` at `ordinal`.
    pub fn new(naming: &DataCenterNames, rack: &Rack, ordinal: i32) -> Self {
        let name = naming.pod_name(rack, ordinal);
        let host = naming.pod_fqdn(&name);
        Self {
            rack: rack.clone(),
            ordinal,
            name,
            namespace: naming.namespace.clone(),
            host,
            sidecar_port: naming.sidecar_port,
        }
    }

    /// Status cache identity of this member.
    pub fn key(&self) -> MemberKey {
        MemberKey::new(&self.namespace, &self.name)
    }
}

/// Namespace-qualified pod identity. Pod names alone repeat across namespaces
/// when two DataCenters share cluster and datacenter names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    /// Namespace.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
}

impl MemberKey {
    /// Build a key.
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)
    }
}

/// Serialization key of one DataCenter: its namespace and resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    /// Namespace.
    pub namespace: String,
    /// DataCenter resource name.
    pub name: String,
}

impl ClusterKey {
    /// Build a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a DataCenter resource.
    pub fn of(dc: &DataCenter) -> Self {
        Self::new(dc.namespace().unwrap_or_default(), dc.name_any())
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Derives resource names for one DataCenter.
#[derive(Debug, Clone)]
pub struct DataCenterNames {
    cluster: String,
    datacenter: String,
    namespace: String,
    sidecar_port: i32,
}

impl DataCenterNames {
    /// Naming for the given cluster/datacenter pair.
    pub fn new(
        cluster: impl Into<String>,
        datacenter: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            datacenter: datacenter.into(),
            namespace: namespace.into(),
            sidecar_port: DEFAULT_SIDECAR_PORT,
        }
    }

    /// Use `port` for the sidecar of every member.
    pub fn with_sidecar_port(mut self, port: i32) -> Self {
        self.sidecar_port = port;
        self
    }

    /// Naming for a DataCenter resource.
    pub fn of(dc: &DataCenter) -> Self {
        Self::new(
            &dc.spec.cluster_name,
            &dc.spec.datacenter_name,
            dc.namespace().unwrap_or_default(),
        )
        .with_sidecar_port(dc.spec.sidecar_port)
    }

    /// `<cluster>-<dc>`, also the headless Service name.
    pub fn prefix(&self) -> String {
        format!("{}-{}", self.cluster, self.datacenter)
    }

    /// Cassandra cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Cassandra datacenter name.
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    /// Namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// StatefulSet name for a rack.
    pub fn statefulset_name(&self, rack: &Rack) -> String {
        format!("{}-{}", self.prefix(), rack.name)
    }

    /// Pod name for a rack ordinal.
    pub fn pod_name(&self, rack: &Rack, ordinal: i32) -> String {
        format!("{}-{}", self.statefulset_name(rack), ordinal)
    }

    /// Fully qualified pod host behind the headless Service.
    pub fn pod_fqdn(&self, pod_name: &str) -> String {
        format!(
            "{}.{}.{}.svc.cluster.local",
            pod_name,
            self.prefix(),
            self.namespace
        )
    }

    /// Every member of `rack` when it runs `replicas` pods.
    pub fn members(&self, rack: &Rack, replicas: i32) -> Vec<Member> {
        (0..replicas.max(0))
            .map(|ordinal| Member::new(self, rack, ordinal))
            .collect()
    }
}

/// Name for the cleanup task closing one scaling event.
///
/// Derived from the DataCenter's uid, generation and size, so every pass
/// over the same convergence event yields the same name.
pub fn cleanup_task_name(dc_name: &str, uid: &str, generation: i64, replicas: i32) -> String {
    let seed = format!("{}/{}/{}/{}", uid, dc_name, generation, replicas);
    let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, seed.as_bytes())
        .simple()
        .to_string();
    format!("{}-cleanup-{}", dc_name, &id[..8])
}
