use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required path setting is empty.
    #[error("`{0}` must not be empty")]
    EmptyPath(&'static str),
    /// The topology declares no nodes at all.
    #[error("the topology must declare at least one node")]
    NoNodes,
    /// The topology has no master node.
    #[error("the topology must declare exactly one `master` node, found none")]
    MissingMaster,
    /// The topology has more than one master node.
    #[error("the topology must declare exactly one `master` node, found {0}: {1}")]
    MultipleMasters(usize, String),
    /// Two nodes share a name.
    #[error("node name `{0}` is declared more than once")]
    DuplicateNodeName(String),
    /// A node name cannot be used as a Postgres identifier suffix.
    #[error("node name `{0}` must be non-empty and contain only lowercase letters, digits and underscores")]
    InvalidNodeName(String),
    /// The master declares an upstream.
    #[error("master node `{0}` cannot have an upstream")]
    MasterWithUpstream(String),
    /// A replica refers to an upstream that is not declared.
    #[error("node `{node}` refers to unknown upstream `{upstream}`")]
    UnknownUpstream { node: String, upstream: String },
    /// A replica refers to itself as upstream.
    #[error("node `{0}` cannot be its own upstream")]
    SelfUpstream(String),
    /// A replica refers to an upstream declared after it.
    #[error("node `{node}` refers to upstream `{upstream}` which is declared after it")]
    ForwardUpstream { node: String, upstream: String },
    /// A node listens on one port but is reached on another.
    #[error("node `{node}` listens on port {port} but its connection uses port {connection_port}")]
    PortMismatch {
        node: String,
        port: u16,
        connection_port: u16,
    },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// The replication wait settings are inconsistent.
    #[error("Invalid replication wait config: {0}")]
    ReplicationWait(String),
    /// The selected strategy requires a settings section which is absent.
    #[error("strategy `{strategy}` requires the `{section}` section")]
    MissingStrategySection {
        strategy: &'static str,
        section: &'static str,
    },
}
