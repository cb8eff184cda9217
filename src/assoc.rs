//! Association Engine: one batch pass turning the full record sets into an
//! annotated tunnel forest.
//!
//! The pass is a pure function of its inputs. Cross-dataset lookups go
//! through indexes built once per cycle (control sockets by file, listeners
//! and connections in input order) and discarded with it. Ambiguous matches
//! are broken by owning pid first, then input order, so identical input
//! always yields an identical forest.

use crate::model::{
    Annotation, Endpoint, Forest, ForwardKind, ForwardSpec, ForwardState, NodeId, NodeKind,
    ProcessRecord, SocketKind, SocketRecord, SshInvocation, TunnelNode,
};
use crate::parse::socket::normalize_host;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;

/// Build the tunnel forest from one cycle's records.
pub fn associate(processes: &[ProcessRecord], sockets: &[SocketRecord]) -> Forest {
    let index = SocketIndex::build(sockets);
    let duplicates = duplicate_forward_keys(processes);
    let mut forest = Forest::new();

    // Phase A: master nodes first, so forward children can resolve against
    // the complete control-socket map regardless of process order. This also
    // reproduces the masters-first presentation order.
    let mut masters: HashMap<&str, NodeId> = HashMap::new();
    for record in processes {
        if let SshInvocation::MasterSocket {
            socket_file,
            forwards,
            ..
        } = &record.invocation
        {
            let mut node = base_node(record, NodeKind::MasterSocket, None);
            if let Some(control) = index.control_for(socket_file, record.pid) {
                node.matched_sockets.push(control.clone());
            }
            attach_forward_states(&mut node, forwards, record, &index, &duplicates);
            let id = forest.push(node);
            masters.entry(socket_file.as_str()).or_insert(id);
        }
    }

    for record in processes {
        match &record.invocation {
            SshInvocation::MasterSocket { .. } => {}
            SshInvocation::ForwardChild {
                socket_file,
                forwards,
                ..
            } => {
                let parent = masters.get(socket_file.as_str()).copied();
                let kind = if forwards.is_empty() {
                    NodeKind::SocketSession
                } else {
                    NodeKind::SocketForward
                };
                let mut node = base_node(record, kind, parent);
                if parent.is_none() {
                    node.annotations.insert(Annotation::OrphanForward);
                }
                attach_forward_states(&mut node, forwards, record, &index, &duplicates);
                forest.push(node);
            }
            SshInvocation::Traditional {
                destination,
                port,
                forwards,
                wants_shell,
                ..
            } => {
                let main = forest.push(base_node(record, NodeKind::TraditionalMain, None));
                for spec in forwards {
                    let state = resolve_forward(
                        spec,
                        record.pid,
                        Some(destination.as_str()),
                        &index,
                        &duplicates,
                    );
                    let mut node = base_node(record, NodeKind::TraditionalForward, Some(main));
                    node.annotations = state.annotations.clone();
                    node.forwards.push(state);
                    forest.push(node);
                }
                if *wants_shell {
                    let mut node = base_node(record, NodeKind::TraditionalSession, Some(main));
                    resolve_session(&mut node, destination, *port, record.pid, &index);
                    forest.push(node);
                }
            }
            SshInvocation::Session {
                destination, port, ..
            } => {
                let mut node = base_node(record, NodeKind::StandaloneSession, None);
                resolve_session(&mut node, destination, *port, record.pid, &index);
                forest.push(node);
            }
        }
    }

    nest_chained_tunnels(&mut forest);
    forest
}

fn base_node(record: &ProcessRecord, kind: NodeKind, parent: Option<NodeId>) -> TunnelNode {
    TunnelNode {
        id: 0,
        parent,
        kind,
        pid: record.pid,
        username: record.username().map(|u| u.to_string()),
        destination: record.destination().map(|d| d.to_string()),
        destination_port: record.destination_port(),
        socket_file: record.socket_file().map(|s| s.to_string()),
        raw_command: record.raw_command.clone(),
        forwards: Vec::new(),
        matched_sockets: Vec::new(),
        annotations: BTreeSet::new(),
    }
}

/// Resolve each declared forward through Phase B and fold the resulting
/// tags up onto the node.
fn attach_forward_states(
    node: &mut TunnelNode,
    forwards: &[ForwardSpec],
    record: &ProcessRecord,
    index: &SocketIndex<'_>,
    duplicates: &HashSet<DupKey>,
) {
    for spec in forwards {
        let state = resolve_forward(spec, record.pid, record.destination(), index, duplicates);
        node.annotations.extend(state.annotations.iter().copied());
        node.forwards.push(state);
    }
}

/// Phase B for one forward spec.
///
/// Local and dynamic forwards must be bound locally: no listener is an
/// error, a listener without connections is informational idle. Remote
/// forwards bind on the far end where no listener is observable, so absence
/// of traffic is only ever idle.
fn resolve_forward(
    spec: &ForwardSpec,
    pid: u32,
    destination: Option<&str>,
    index: &SocketIndex<'_>,
    duplicates: &HashSet<DupKey>,
) -> ForwardState {
    let mut state = ForwardState {
        spec: spec.clone(),
        matched: Vec::new(),
        connections: 0,
        annotations: BTreeSet::new(),
    };

    if duplicates.contains(&DupKey::for_spec(spec, destination)) {
        state.annotations.insert(Annotation::DuplicateForward);
    }

    match spec.kind {
        ForwardKind::Local | ForwardKind::Dynamic => {
            match index.listen_on(spec.source_port, pid) {
                None => {
                    state.annotations.insert(Annotation::MissingListener);
                }
                Some(listen) => {
                    state.matched.push(listen.clone());
                    if let Some(bound) = listen.local_endpoint() {
                        let active = index.established_at(bound);
                        if active.is_empty() {
                            state.annotations.insert(Annotation::Idle);
                        } else {
                            state.connections = active.len();
                            state.matched.extend(active.into_iter().cloned());
                        }
                    }
                }
            }
        }
        ForwardKind::Remote => {
            let active = index.established_on_local_port(spec.source_port, pid);
            if active.is_empty() {
                state.annotations.insert(Annotation::Idle);
            } else {
                state.connections = active.len();
                state.matched.extend(active.into_iter().cloned());
            }
        }
    }

    state
}

/// Look for an Established record toward the declared destination. Absence
/// is informational only: outbound tracking may simply be unavailable.
fn resolve_session(
    node: &mut TunnelNode,
    destination: &str,
    port: u16,
    pid: u32,
    index: &SocketIndex<'_>,
) {
    let active = index.established_toward(destination, port, pid);
    if active.is_empty() {
        node.annotations.insert(Annotation::Unconfirmed);
    } else {
        node.matched_sockets
            .extend(active.into_iter().cloned());
    }
}

/// Key identifying forwards that collide with each other: same direction and
/// same source port. Local and dynamic forwards all bind on this host, so
/// the port alone collides; remote forwards bind on the machine they dial,
/// so the same port on two different SSH destinations is not a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DupKey {
    Local(u16),
    Dynamic(u16),
    Remote(u16, Option<String>),
}

impl DupKey {
    fn for_spec(spec: &ForwardSpec, destination: Option<&str>) -> Self {
        match spec.kind {
            ForwardKind::Local => DupKey::Local(spec.source_port),
            ForwardKind::Dynamic => DupKey::Dynamic(spec.source_port),
            ForwardKind::Remote => {
                DupKey::Remote(spec.source_port, destination.map(str::to_string))
            }
        }
    }
}

fn duplicate_forward_keys(processes: &[ProcessRecord]) -> HashSet<DupKey> {
    let mut counts: HashMap<DupKey, usize> = HashMap::new();
    for record in processes {
        for spec in record.forwards() {
            *counts
                .entry(DupKey::for_spec(spec, record.destination()))
                .or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key)
        .collect()
}

/// Per-cycle lookup structure over the socket records. Indexes keep input
/// order so tie-breaks stay deterministic.
struct SocketIndex<'a> {
    records: &'a [SocketRecord],
    controls: HashMap<&'a str, Vec<usize>>,
    listens: Vec<usize>,
    established: Vec<usize>,
}

impl<'a> SocketIndex<'a> {
    fn build(records: &'a [SocketRecord]) -> Self {
        let mut controls: HashMap<&'a str, Vec<usize>> = HashMap::new();
        let mut listens = Vec::new();
        let mut established = Vec::new();

        for (position, record) in records.iter().enumerate() {
            match &record.kind {
                SocketKind::UnixControl { socket_file, .. } => {
                    controls.entry(socket_file.as_str()).or_default().push(position);
                }
                SocketKind::Listen { .. } => listens.push(position),
                SocketKind::Established { .. } => established.push(position),
            }
        }

        Self {
            records,
            controls,
            listens,
            established,
        }
    }

    /// The control socket record for a file, preferring the owning pid.
    fn control_for(&self, socket_file: &str, pid: u32) -> Option<&'a SocketRecord> {
        let candidates = self.controls.get(socket_file)?;
        self.pick(candidates, pid)
    }

    /// The Listen record bound on a local port, preferring the owning pid.
    fn listen_on(&self, port: u16, pid: u32) -> Option<&'a SocketRecord> {
        let candidates: Vec<usize> = self
            .listens
            .iter()
            .copied()
            .filter(|&i| {
                self.records[i]
                    .local_endpoint()
                    .is_some_and(|e| e.port == port)
            })
            .collect();
        self.pick(&candidates, pid)
    }

    /// All Established records accepted at a bound endpoint.
    fn established_at(&self, bound: &Endpoint) -> Vec<&'a SocketRecord> {
        self.established
            .iter()
            .filter_map(|&i| {
                let record = &self.records[i];
                record
                    .local_endpoint()
                    .filter(|local| bound.covers(local))
                    .map(|_| record)
            })
            .collect()
    }

    /// Established records whose local port matches (remote forward usage).
    fn established_on_local_port(&self, port: u16, pid: u32) -> Vec<&'a SocketRecord> {
        let candidates: Vec<&'a SocketRecord> = self
            .established
            .iter()
            .map(|&i| &self.records[i])
            .filter(|r| r.local_endpoint().is_some_and(|e| e.port == port))
            .collect();
        prefer_pid(candidates, pid)
    }

    /// Established records plausibly heading to `destination:port`.
    ///
    /// Hostnames are not resolved; only IP destinations constrain the
    /// remote host.
    fn established_toward(&self, destination: &str, port: u16, pid: u32) -> Vec<&'a SocketRecord> {
        let declared_ip: Option<IpAddr> = normalize_host(destination).parse().ok();
        let candidates: Vec<&'a SocketRecord> = self
            .established
            .iter()
            .map(|&i| &self.records[i])
            .filter(|r| match &r.kind {
                SocketKind::Established { remote, .. } => {
                    remote.port == port
                        && match declared_ip {
                            Some(ip) => remote.host.parse::<IpAddr>() == Ok(ip),
                            None => true,
                        }
                }
                _ => false,
            })
            .collect();
        prefer_pid(candidates, pid)
    }

    /// First candidate owned by `pid`, else the earliest in input order.
    fn pick(&self, candidates: &[usize], pid: u32) -> Option<&'a SocketRecord> {
        candidates
            .iter()
            .find(|&&i| self.records[i].pid == Some(pid))
            .or_else(|| candidates.first())
            .map(|&i| &self.records[i])
    }
}

/// Keep only pid-owned candidates when any exist.
fn prefer_pid<'a>(candidates: Vec<&'a SocketRecord>, pid: u32) -> Vec<&'a SocketRecord> {
    let owned: Vec<&'a SocketRecord> = candidates
        .iter()
        .copied()
        .filter(|r| r.pid == Some(pid))
        .collect();
    if owned.is_empty() {
        candidates
    } else {
        owned
    }
}

/// Nest chained tunnels: a root whose destination is loopback on a port that
/// some other process forwards locally is riding that forward, so it is
/// re-parented under the forward node. Runs a bounded number of passes.
fn nest_chained_tunnels(forest: &mut Forest) {
    for _ in 0..3 {
        let mut changed = false;

        let candidates: Vec<NodeId> = forest
            .nodes()
            .iter()
            .filter(|n| {
                n.parent.is_none()
                    && matches!(
                        n.kind,
                        NodeKind::TraditionalMain | NodeKind::StandaloneSession
                    )
                    && n.destination
                        .as_deref()
                        .is_some_and(|d| is_loopback_host(d))
            })
            .map(|n| n.id)
            .collect();

        for id in candidates {
            let (pid, port) = {
                let node = match forest.get(id) {
                    Some(n) => n,
                    None => continue,
                };
                match node.destination_port {
                    Some(port) => (node.pid, port),
                    None => continue,
                }
            };

            let target = forest
                .nodes()
                .iter()
                .find(|n| {
                    n.kind == NodeKind::TraditionalForward
                        && n.pid != pid
                        && n.forwards.first().is_some_and(|f| {
                            f.spec.kind == ForwardKind::Local && f.spec.source_port == port
                        })
                        && !is_ancestor(forest, id, n.id)
                })
                .map(|n| n.id);

            if let Some(target) = target {
                forest.node_mut(id).parent = Some(target);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
}

fn is_loopback_host(host: &str) -> bool {
    matches!(normalize_host(host).as_str(), "127.0.0.1" | "::1")
}

/// Whether `ancestor` appears on the parent chain of `node`.
fn is_ancestor(forest: &Forest, ancestor: NodeId, node: NodeId) -> bool {
    let mut current = forest.get(node).and_then(|n| n.parent);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = forest.get(id).and_then(|n| n.parent);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_process_line, parse_socket_line};

    fn processes(lines: &[&str]) -> Vec<ProcessRecord> {
        lines
            .iter()
            .map(|l| parse_process_line(l).expect("process line"))
            .collect()
    }

    fn sockets(lines: &[&str]) -> Vec<SocketRecord> {
        lines
            .iter()
            .map(|l| parse_socket_line(l).expect("socket line"))
            .collect()
    }

    #[test]
    fn test_master_socket_links_control_record() {
        // Scenario: master process plus its control socket record.
        let procs = processes(&["1234 ssh -M -S /tmp/ctrl user@host -p22"]);
        let socks = sockets(&[r#"u_str LISTEN 0 128 /tmp/ctrl 49231 * 0 users:(("ssh",pid=1234,fd=4))"#]);

        let forest = associate(&procs, &socks);
        assert_eq!(forest.len(), 1);
        let root = forest.roots().next().unwrap();
        assert_eq!(root.kind, NodeKind::MasterSocket);
        assert_eq!(root.pid, 1234);
        assert!(root.annotations.is_empty());
        assert_eq!(root.matched_sockets.len(), 1);
        match &root.matched_sockets[0].kind {
            SocketKind::UnixControl { socket_file, .. } => assert_eq!(socket_file, "/tmp/ctrl"),
            other => panic!("expected control socket, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_child_without_listener_is_flagged() {
        // Scenario: forward child under a master, port 8080 never bound.
        let procs = processes(&[
            "1234 ssh -M -S /tmp/ctrl user@host",
            "1300 ssh -S /tmp/ctrl -L 8080:localhost:80",
        ]);
        let socks = sockets(&["unix 2 [ ACC ] STREAM LISTENING 49231 /tmp/ctrl"]);

        let forest = associate(&procs, &socks);
        assert_eq!(forest.len(), 2);
        let master = forest.roots().next().unwrap();
        let child = forest.children(master.id).next().unwrap();
        assert_eq!(child.kind, NodeKind::SocketForward);
        assert!(child.annotations.contains(&Annotation::MissingListener));
        assert!(!child.annotations.contains(&Annotation::OrphanForward));
    }

    #[test]
    fn test_traditional_forward_with_active_connection() {
        // Scenario: bound and in use, one active connection, no errors.
        let procs = processes(&["2000 ssh -L 9000:localhost:80 user@host"]);
        let socks = sockets(&[
            r#"tcp LISTEN 0 128 127.0.0.1:9000 0.0.0.0:* users:(("ssh",pid=2000,fd=5))"#,
            r#"tcp ESTAB 0 0 127.0.0.1:9000 127.0.0.1:52114 users:(("ssh",pid=2000,fd=8))"#,
        ]);

        let forest = associate(&procs, &socks);
        let main = forest.roots().next().unwrap();
        assert_eq!(main.kind, NodeKind::TraditionalMain);

        let forwards: Vec<&TunnelNode> = forest
            .children(main.id)
            .filter(|n| n.kind == NodeKind::TraditionalForward)
            .collect();
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].active_connections(), 1);
        assert!(!forwards[0].has_errors());
        assert_eq!(forwards[0].forwards[0].matched.len(), 2);
    }

    #[test]
    fn test_traditional_session_child_requires_shell() {
        let with_shell = processes(&["2000 ssh -L 9000:localhost:80 user@host"]);
        let no_shell = processes(&["2000 ssh -N -L 9000:localhost:80 user@host"]);

        let forest = associate(&with_shell, &[]);
        let main = forest.roots().next().unwrap();
        assert!(forest
            .children(main.id)
            .any(|n| n.kind == NodeKind::TraditionalSession));

        let forest = associate(&no_shell, &[]);
        let main = forest.roots().next().unwrap();
        assert!(!forest
            .children(main.id)
            .any(|n| n.kind == NodeKind::TraditionalSession));
    }

    #[test]
    fn test_standalone_session_unconfirmed_without_connection() {
        // Scenario: plain session, no observable outbound connection.
        let procs = processes(&["3000 ssh user@host"]);
        let forest = associate(&procs, &[]);

        let root = forest.roots().next().unwrap();
        assert_eq!(root.kind, NodeKind::StandaloneSession);
        assert!(root.annotations.contains(&Annotation::Unconfirmed));
        assert!(!root.has_errors());
    }

    #[test]
    fn test_standalone_session_confirmed_by_remote_port() {
        let procs = processes(&["3000 ssh user@10.0.0.9 -p 2022"]);
        let socks = sockets(&[
            r#"tcp ESTAB 0 0 192.168.1.5:50123 10.0.0.9:2022 users:(("ssh",pid=3000,fd=3))"#,
        ]);

        let forest = associate(&procs, &socks);
        let root = forest.roots().next().unwrap();
        assert!(!root.annotations.contains(&Annotation::Unconfirmed));
        assert_eq!(root.active_connections(), 1);
    }

    #[test]
    fn test_session_ip_destination_must_match_remote_host() {
        let procs = processes(&["3000 ssh user@10.0.0.9"]);
        // Same port, different remote address: not our session.
        let socks = sockets(&[
            r#"tcp ESTAB 0 0 192.168.1.5:50123 10.9.9.9:22 users:(("ssh",pid=3000,fd=3))"#,
        ]);

        let forest = associate(&procs, &socks);
        let root = forest.roots().next().unwrap();
        assert!(root.annotations.contains(&Annotation::Unconfirmed));
    }

    #[test]
    fn test_orphan_forward_child_becomes_root() {
        let procs = processes(&["1300 ssh -S /tmp/gone -L 8080:localhost:80"]);
        let socks = sockets(&[
            r#"tcp LISTEN 0 128 127.0.0.1:8080 0.0.0.0:* users:(("ssh",pid=1300,fd=5))"#,
        ]);

        let forest = associate(&procs, &socks);
        let root = forest.roots().next().unwrap();
        assert_eq!(root.kind, NodeKind::SocketForward);
        assert_eq!(root.parent, None);
        assert!(root.annotations.contains(&Annotation::OrphanForward));
        // The listener still resolved: orphanhood is independent of Phase B.
        assert!(!root.annotations.contains(&Annotation::MissingListener));
    }

    #[test]
    fn test_socket_session_kind_without_forwards() {
        let procs = processes(&[
            "1234 ssh -M -S /tmp/ctrl user@host",
            "1400 ssh -S /tmp/ctrl -O check",
        ]);
        let socks = sockets(&["unix 2 [ ACC ] STREAM LISTENING 49231 /tmp/ctrl"]);

        let forest = associate(&procs, &socks);
        let master = forest.roots().next().unwrap();
        let child = forest.children(master.id).next().unwrap();
        assert_eq!(child.kind, NodeKind::SocketSession);
        assert!(child.annotations.is_empty());
    }

    #[test]
    fn test_tie_break_prefers_owning_pid() {
        let procs = processes(&["42 ssh -N -L 9000:localhost:80 user@host"]);
        // Two listeners on the same port; the one owned by pid 42 must win
        // regardless of input order.
        for lines in [
            [
                r#"tcp LISTEN 0 128 127.0.0.1:9000 0.0.0.0:* users:(("ssh",pid=999,fd=5))"#,
                r#"tcp LISTEN 0 128 0.0.0.0:9000 0.0.0.0:* users:(("ssh",pid=42,fd=5))"#,
            ],
            [
                r#"tcp LISTEN 0 128 0.0.0.0:9000 0.0.0.0:* users:(("ssh",pid=42,fd=5))"#,
                r#"tcp LISTEN 0 128 127.0.0.1:9000 0.0.0.0:* users:(("ssh",pid=999,fd=5))"#,
            ],
        ] {
            let socks = sockets(&lines);
            let forest = associate(&procs, &socks);
            let main = forest.roots().next().unwrap();
            let forward = forest.children(main.id).next().unwrap();
            assert_eq!(forward.forwards[0].matched[0].pid, Some(42));
        }
    }

    #[test]
    fn test_idempotent_over_identical_input() {
        let procs = processes(&[
            "1234 ssh -M -S /tmp/ctrl user@host",
            "1300 ssh -S /tmp/ctrl -L 8080:localhost:80",
            "2000 ssh -D 1080 user@proxy",
            "3000 ssh user@host",
        ]);
        let socks = sockets(&[
            "unix 2 [ ACC ] STREAM LISTENING 49231 /tmp/ctrl",
            r#"tcp LISTEN 0 128 127.0.0.1:1080 0.0.0.0:* users:(("ssh",pid=2000,fd=5))"#,
        ]);

        let first = associate(&procs, &socks);
        let second = associate(&procs, &socks);
        assert_eq!(first, second);
    }

    #[test]
    fn test_remote_forward_without_traffic_is_idle_not_missing() {
        let procs = processes(&["5000 ssh -N -R 2222:localhost:22 user@host"]);
        let forest = associate(&procs, &[]);

        let main = forest.roots().next().unwrap();
        let forward = forest.children(main.id).next().unwrap();
        assert!(forward.annotations.contains(&Annotation::Idle));
        assert!(!forward.annotations.contains(&Annotation::MissingListener));
        assert!(!forward.has_errors());
    }

    #[test]
    fn test_duplicate_local_forwards_flagged() {
        let procs = processes(&[
            "100 ssh -N -L 8080:localhost:80 user@hosta",
            "200 ssh -N -L 8080:localhost:80 user@hostb",
        ]);
        let socks = sockets(&[
            r#"tcp LISTEN 0 128 127.0.0.1:8080 0.0.0.0:* users:(("ssh",pid=100,fd=5))"#,
        ]);

        let forest = associate(&procs, &socks);
        let flagged: Vec<&TunnelNode> = forest
            .nodes()
            .iter()
            .filter(|n| n.annotations.contains(&Annotation::DuplicateForward))
            .collect();
        assert_eq!(flagged.len(), 2);
    }

    #[test]
    fn test_reverse_forwards_to_different_destinations_not_duplicates() {
        // Port 2222 is bound on two different remote machines; no conflict.
        let procs = processes(&[
            "100 ssh -N -R 2222:localhost:22 user@hosta",
            "200 ssh -N -R 2222:localhost:22 user@hostb",
        ]);
        let forest = associate(&procs, &[]);
        assert!(!forest
            .nodes()
            .iter()
            .any(|n| n.annotations.contains(&Annotation::DuplicateForward)));
    }

    #[test]
    fn test_reverse_forwards_same_destination_flagged() {
        // Same remote machine, same remote port, regardless of local target.
        let procs = processes(&[
            "100 ssh -N -R 2222:localhost:22 user@host",
            "200 ssh -N -R 2222:tool:8000 user@host",
        ]);
        let forest = associate(&procs, &[]);
        let flagged = forest
            .nodes()
            .iter()
            .filter(|n| n.annotations.contains(&Annotation::DuplicateForward))
            .count();
        assert_eq!(flagged, 2);
    }

    #[test]
    fn test_dynamic_and_local_on_same_port_not_duplicates() {
        let procs = processes(&[
            "100 ssh -N -L 8080:localhost:80 user@hosta",
            "200 ssh -N -D 8080 user@hostb",
        ]);
        let forest = associate(&procs, &[]);
        assert!(!forest
            .nodes()
            .iter()
            .any(|n| n.annotations.contains(&Annotation::DuplicateForward)));
    }

    #[test]
    fn test_chained_session_nests_under_forward() {
        let procs = processes(&[
            "100 ssh -N -L 8080:inner:22 user@bastion",
            "200 ssh user@127.0.0.1 -p 8080",
        ]);
        let socks = sockets(&[
            r#"tcp LISTEN 0 128 127.0.0.1:8080 0.0.0.0:* users:(("ssh",pid=100,fd=5))"#,
        ]);

        let forest = associate(&procs, &socks);
        let forward = forest
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::TraditionalForward)
            .unwrap();
        let session = forest
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::StandaloneSession)
            .unwrap();
        assert_eq!(session.parent, Some(forward.id));
    }

    #[test]
    fn test_chained_nesting_never_cycles_on_own_process() {
        // A process dialing loopback on a port it forwards itself must stay
        // a root rather than nest under its own forward node.
        let procs = processes(&["100 ssh -L 8080:inner:22 user@127.0.0.1 -p 8080"]);
        let forest = associate(&procs, &[]);

        let main = forest
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::TraditionalMain)
            .unwrap();
        assert_eq!(main.parent, None);
    }

    #[test]
    fn test_master_roots_come_first() {
        let procs = processes(&[
            "3000 ssh user@host",
            "1234 ssh -M -S /tmp/ctrl user@host",
        ]);
        let forest = associate(&procs, &[]);
        let kinds: Vec<NodeKind> = forest.roots().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::MasterSocket, NodeKind::StandaloneSession]
        );
    }

    #[test]
    fn test_master_with_own_forward_resolves_phase_b() {
        let procs = processes(&["1234 ssh -M -S /tmp/ctrl -L 7000:localhost:80 user@host"]);
        let socks = sockets(&["unix 2 [ ACC ] STREAM LISTENING 49231 /tmp/ctrl"]);

        let forest = associate(&procs, &socks);
        let master = forest.roots().next().unwrap();
        assert_eq!(master.kind, NodeKind::MasterSocket);
        assert!(master.annotations.contains(&Annotation::MissingListener));
    }

    #[test]
    fn test_listener_bound_on_wildcard_matches_loopback_traffic() {
        let procs = processes(&["42 ssh -N -L 9000:localhost:80 user@host"]);
        let socks = sockets(&[
            r#"tcp LISTEN 0 128 0.0.0.0:9000 0.0.0.0:* users:(("ssh",pid=42,fd=5))"#,
            r#"tcp ESTAB 0 0 127.0.0.1:9000 127.0.0.1:51000 users:(("ssh",pid=42,fd=8))"#,
        ]);

        let forest = associate(&procs, &socks);
        let main = forest.roots().next().unwrap();
        let forward = forest.children(main.id).next().unwrap();
        assert_eq!(forward.active_connections(), 1);
        assert!(!forward.annotations.contains(&Annotation::Idle));
    }
}
