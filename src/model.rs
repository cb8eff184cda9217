//! Core data model: parsed records, tunnel nodes, and the forest arena.
//!
//! Everything here is rebuilt from scratch on every refresh cycle and never
//! mutated afterwards. The forest is an arena of nodes with integer parent
//! handles, so it is trivially acyclic and can be handed to the renderer as
//! a plain shared reference.

use std::collections::BTreeSet;
use std::fmt;

/// A normalized `host:port` pair used for exact-match socket comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether a connection bound at `self` would accept the given endpoint.
    ///
    /// A wildcard listen address (`0.0.0.0` or `::`) covers any host on the
    /// same port.
    pub fn covers(&self, other: &Endpoint) -> bool {
        if self.port != other.port {
            return false;
        }
        self.host == other.host || self.host == "0.0.0.0" || self.host == "::"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Direction of a declared port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    /// `-L`: listens locally, connects out through the remote.
    Local,
    /// `-R`: listens on the remote, connects back through us.
    Remote,
    /// `-D`: local SOCKS proxy.
    Dynamic,
}

/// One `-L`/`-R`/`-D` argument in parsed form, order-preserving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub kind: ForwardKind,
    /// Optional bind address prefix (`0.0.0.0:2222:...`).
    pub bind_host: Option<String>,
    /// The port on the listening side (local for `-L`/`-D`, remote for `-R`).
    pub source_port: u16,
    /// Absent for dynamic forwards.
    pub target_host: Option<String>,
    /// Absent for dynamic forwards.
    pub target_port: Option<u16>,
}

/// Typed argument shape per SSH invocation kind.
///
/// One fixed field set per variant; classification happens once at parse time
/// and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshInvocation {
    /// `ssh -M -S <path> [user@]host`: owns a multiplexing control socket.
    MasterSocket {
        socket_file: String,
        username: Option<String>,
        destination: String,
        port: u16,
        forwards: Vec<ForwardSpec>,
    },
    /// `ssh -S <path> ...` without a destination: attaches to a master.
    ForwardChild {
        socket_file: String,
        socket_name: String,
        forwards: Vec<ForwardSpec>,
    },
    /// Carries its own `-L`/`-R`/`-D` flags.
    Traditional {
        username: Option<String>,
        destination: String,
        port: u16,
        forwards: Vec<ForwardSpec>,
        /// False when `-N` was given (no interactive shell).
        wants_shell: bool,
    },
    /// Plain `ssh [user@]host`.
    Session {
        username: Option<String>,
        destination: String,
        port: u16,
    },
}

/// One SSH process of interest, parsed from a single process-listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub raw_command: String,
    pub invocation: SshInvocation,
}

impl ProcessRecord {
    pub fn forwards(&self) -> &[ForwardSpec] {
        match &self.invocation {
            SshInvocation::MasterSocket { forwards, .. }
            | SshInvocation::ForwardChild { forwards, .. }
            | SshInvocation::Traditional { forwards, .. } => forwards,
            SshInvocation::Session { .. } => &[],
        }
    }

    pub fn destination(&self) -> Option<&str> {
        match &self.invocation {
            SshInvocation::MasterSocket { destination, .. }
            | SshInvocation::Traditional { destination, .. }
            | SshInvocation::Session { destination, .. } => Some(destination),
            SshInvocation::ForwardChild { .. } => None,
        }
    }

    pub fn destination_port(&self) -> Option<u16> {
        match &self.invocation {
            SshInvocation::MasterSocket { port, .. }
            | SshInvocation::Traditional { port, .. }
            | SshInvocation::Session { port, .. } => Some(*port),
            SshInvocation::ForwardChild { .. } => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match &self.invocation {
            SshInvocation::MasterSocket { username, .. }
            | SshInvocation::Traditional { username, .. }
            | SshInvocation::Session { username, .. } => username.as_deref(),
            SshInvocation::ForwardChild { .. } => None,
        }
    }

    pub fn socket_file(&self) -> Option<&str> {
        match &self.invocation {
            SshInvocation::MasterSocket { socket_file, .. }
            | SshInvocation::ForwardChild { socket_file, .. } => Some(socket_file),
            _ => None,
        }
    }
}

/// Classified socket-listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketKind {
    /// Bound, no remote endpoint.
    Listen { local: Endpoint },
    /// Active connection with both endpoints.
    Established { local: Endpoint, remote: Endpoint },
    /// Unix-domain control socket used by SSH multiplexing.
    UnixControl {
        socket_file: String,
        socket_code: Option<String>,
    },
}

/// One socket/connection line in parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRecord {
    /// Owning pid when the listing exposes it (`users:(...)` / `pid/name`).
    pub pid: Option<u32>,
    pub kind: SocketKind,
}

impl SocketRecord {
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        match &self.kind {
            SocketKind::Listen { local } | SocketKind::Established { local, .. } => Some(local),
            SocketKind::UnixControl { .. } => None,
        }
    }
}

/// Node classification inside the tunnel forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    MasterSocket,
    SocketForward,
    SocketSession,
    TraditionalMain,
    TraditionalForward,
    TraditionalSession,
    StandaloneSession,
}

/// Per-node tags. Errors mark inconsistent state; informational tags mark
/// declared-but-inactive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Annotation {
    /// Forward references a control socket with no discoverable master.
    OrphanForward,
    /// Declared port mapping was never bound.
    MissingListener,
    /// Two forwards claim the same source port.
    DuplicateForward,
    /// Bound but currently unused (informational).
    Idle,
    /// Session declared but no matching connection observed (informational).
    Unconfirmed,
}

impl Annotation {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Annotation::OrphanForward | Annotation::MissingListener | Annotation::DuplicateForward
        )
    }
}

/// A forward spec together with the socket evidence resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardState {
    pub spec: ForwardSpec,
    pub matched: Vec<SocketRecord>,
    pub connections: usize,
    pub annotations: BTreeSet<Annotation>,
}

pub type NodeId = usize;

/// One node of the reconstructed tunnel forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub pid: u32,
    pub username: Option<String>,
    pub destination: Option<String>,
    pub destination_port: Option<u16>,
    pub socket_file: Option<String>,
    pub raw_command: String,
    /// Resolved forward specs (one entry for `TraditionalForward` nodes,
    /// the full declared list for master/forward-child nodes).
    pub forwards: Vec<ForwardState>,
    /// Node-level socket evidence: the control socket for masters, session
    /// connections for session nodes.
    pub matched_sockets: Vec<SocketRecord>,
    pub annotations: BTreeSet<Annotation>,
}

impl TunnelNode {
    /// Established connections attached to this node, across all evidence.
    pub fn active_connections(&self) -> usize {
        let direct = self
            .matched_sockets
            .iter()
            .filter(|s| matches!(s.kind, SocketKind::Established { .. }))
            .count();
        direct + self.forwards.iter().map(|f| f.connections).sum::<usize>()
    }

    pub fn has_errors(&self) -> bool {
        self.annotations.iter().any(|a| a.is_error())
    }
}

/// Arena-backed forest of tunnel nodes.
///
/// Nodes are stored in creation order; parents are always created in the same
/// pass as their children. Roots are nodes without a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    nodes: Vec<TunnelNode>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, assigning it the next id. The caller leaves `id` at a
    /// placeholder; it is overwritten here.
    pub(crate) fn push(&mut self, mut node: TunnelNode) -> NodeId {
        let id = self.nodes.len();
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut TunnelNode {
        &mut self.nodes[id]
    }

    pub fn get(&self, id: NodeId) -> Option<&TunnelNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[TunnelNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &TunnelNode> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &TunnelNode> {
        self.nodes.iter().filter(move |n| n.parent == Some(id))
    }
}
