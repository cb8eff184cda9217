//! Socket Record Parser: one raw socket-listing line to one typed
//! [`SocketRecord`].
//!
//! Three line shapes are accepted for TCP/UDP entries: the minimal
//! `<proto> <state> <local> <remote>` form, `ss -tanp` output (state second,
//! queue counters before the addresses, `users:(...)` ownership), and
//! `netstat -tanp` output (numeric Recv-Q second, state after the addresses,
//! `pid/name` ownership). Unix-domain entries come from `ss -xanp` or
//! `netstat -xan`.

use crate::model::{Endpoint, SocketKind, SocketRecord};
use crate::parse::process::is_ssh_executable;

/// Parse one socket/connection line.
///
/// Returns `None` (ParseSkip) for headers, states of no interest, lines
/// owned by a non-ssh process, or anything outside the grammar.
pub fn parse_socket_line(line: &str) -> Option<SocketRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first = tokens.first()?.to_lowercase();

    if first == "unix" || first.starts_with("u_") {
        return parse_unix_line(line, &tokens);
    }

    let owner = extract_owner(line);
    if let Some(name) = &owner.name {
        if !is_ssh_executable(name) {
            return None;
        }
    }

    let (state, local_token, remote_token) = if first.starts_with("tcp") || first.starts_with("udp")
    {
        if tokens.get(1)?.parse::<u64>().is_ok() {
            // netstat: Proto Recv-Q Send-Q Local Foreign [State] ...
            let state = match tokens.get(5) {
                Some(token) if known_state(token) => (*token).to_string(),
                // netstat prints no state column for UDP sockets
                _ if first.starts_with("udp") => "UNCONN".to_string(),
                _ => return None,
            };
            (state, *tokens.get(3)?, *tokens.get(4)?)
        } else {
            let (local, remote) = address_pair(&tokens[2..])?;
            (tokens.get(1)?.to_uppercase(), local, remote)
        }
    } else if known_state(&first.to_uppercase()) {
        // ss without the Netid column: State Recv-Q Send-Q Local Peer
        let (local, remote) = address_pair(&tokens[1..])?;
        (first.to_uppercase(), local, remote)
    } else {
        return None;
    };

    let local = parse_endpoint(local_token)?;
    let remote = parse_endpoint(remote_token);

    let kind = match state.as_str() {
        "LISTEN" | "LISTENING" => SocketKind::Listen { local },
        "ESTAB" | "ESTABLISHED" => SocketKind::Established {
            local,
            remote: remote?,
        },
        // A bound-but-unconnected UDP socket behaves like a listener.
        "UNCONN" if remote.is_none() => SocketKind::Listen { local },
        _ => return None,
    };

    Some(SocketRecord {
        pid: owner.pid,
        kind,
    })
}

fn known_state(token: &str) -> bool {
    matches!(
        token,
        "LISTEN"
            | "LISTENING"
            | "ESTAB"
            | "ESTABLISHED"
            | "UNCONN"
            | "TIME-WAIT"
            | "TIME_WAIT"
            | "CLOSE-WAIT"
            | "CLOSE_WAIT"
            | "SYN-SENT"
            | "SYN_SENT"
            | "SYN-RECV"
            | "SYN_RECV"
            | "FIN-WAIT-1"
            | "FIN-WAIT-2"
            | "LAST-ACK"
            | "CLOSING"
    )
}

/// The first two non-numeric `host:port` tokens after the state column.
fn address_pair<'a>(tokens: &[&'a str]) -> Option<(&'a str, &'a str)> {
    let mut addresses = tokens
        .iter()
        .filter(|t| t.parse::<u64>().is_err() && t.contains(':'));
    let local = addresses.next()?;
    let remote = addresses.next()?;
    Some((local, remote))
}

fn parse_unix_line(line: &str, tokens: &[&str]) -> Option<SocketRecord> {
    let owner = extract_owner(line);
    if let Some(name) = &owner.name {
        if !is_ssh_executable(name) {
            return None;
        }
    }

    let position = tokens
        .iter()
        .position(|t| t.starts_with('/') || (t.starts_with('@') && t.len() > 1))?;
    let socket_file = tokens[position].to_string();
    let socket_code = tokens
        .get(position + 1)
        .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| (*t).to_string());

    Some(SocketRecord {
        pid: owner.pid,
        kind: SocketKind::UnixControl {
            socket_file,
            socket_code,
        },
    })
}

/// Normalize one address token to a canonical `{host, port}` pair.
///
/// Returns `None` for wildcard ports (`0.0.0.0:*`), which means "no
/// endpoint" rather than a malformed line.
pub fn parse_endpoint(address: &str) -> Option<Endpoint> {
    let (host, port_str) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        (host, rest.strip_prefix(':')?)
    } else {
        let colon = address.rfind(':')?;
        (&address[..colon], &address[colon + 1..])
    };

    if port_str == "*" {
        return None;
    }
    let port: u16 = port_str.parse().ok().filter(|p| *p != 0)?;

    Some(Endpoint::new(normalize_host(host), port))
}

pub(crate) fn normalize_host(host: &str) -> String {
    match host {
        "" | "*" | "0.0.0.0" => "0.0.0.0".to_string(),
        "localhost" => "127.0.0.1".to_string(),
        other => other.to_string(),
    }
}

struct OwnerInfo {
    pid: Option<u32>,
    name: Option<String>,
}

/// Owning process from `users:(("ssh",pid=1234,fd=5))` (ss) or `1234/ssh`
/// (netstat), when the listing exposes it.
fn extract_owner(line: &str) -> OwnerInfo {
    if let Some(start) = line.find("users:((\"") {
        let rest = &line[start + 9..];
        let name = rest.split('"').next().map(|s| s.to_string());
        let pid = rest.find("pid=").and_then(|at| {
            let digits: String = rest[at + 4..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        });
        return OwnerInfo { pid, name };
    }

    for token in line.split_whitespace().rev() {
        if let Some((pid_str, name)) = token.split_once('/') {
            if let Ok(pid) = pid_str.parse() {
                return OwnerInfo {
                    pid: Some(pid),
                    name: Some(name.to_string()),
                };
            }
        }
    }

    OwnerInfo {
        pid: None,
        name: None,
    }
}
