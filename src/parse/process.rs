//! Process Record Parser: one raw `ps` line to one typed [`ProcessRecord`].
//!
//! The command line is tokenized with an explicit grammar table rather than
//! ad hoc regex matching: a fixed set of option characters take a value
//! (spaced or smashed onto the option), everything else dashed is a bare
//! flag, and bundles like `-vvvL123:host:22` unpack the same way OpenSSH
//! itself would read them.

use crate::model::{ForwardKind, ForwardSpec, ProcessRecord, SshInvocation};
use regex::Regex;
use std::sync::LazyLock;

/// Option characters that consume a value (`-p 22` / `-p22`). Mirrors the
/// `ssh(1)` option set; `-L`/`-R`/`-D` are handled here too and interpreted
/// as forward specs afterwards.
const VALUE_OPTIONS: &[char] = &[
    'p', 'l', 'i', 'S', 'J', 'W', 'o', 'F', 'E', 'b', 'w', 'c', 'm', 'O', 'B', 'Q', 'I', 'K', 't',
    'T', 'R', 'L', 'D',
];

/// Matches the ssh client executable itself (`ssh`, `/usr/bin/ssh`,
/// `ssh.exe`) but not `ssh-agent`, `sshd`, or `ssh-add`.
static SSH_EXECUTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|/)ssh(?:\.exe)?$").unwrap());

/// Shared with the socket parser, which filters on owning process names.
pub(crate) fn is_ssh_executable(name: &str) -> bool {
    SSH_EXECUTABLE.is_match(name)
}

/// Raw scan of an ssh argument vector, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandScan {
    flags: Vec<char>,
    value_args: Vec<(char, String)>,
    username: Option<String>,
    destination: Option<String>,
}

/// Parse one `<pid> <command...>` line into a typed record.
///
/// Returns `None` (ParseSkip) for anything that is not an ssh invocation of
/// interest: non-ssh executables, unparseable pids, remote-command
/// invocations, or argument sequences outside the grammar.
pub fn parse_process_line(line: &str) -> Option<ProcessRecord> {
    let mut tokens = line.split_whitespace();
    let pid: u32 = tokens.next()?.parse().ok()?;
    let argv: Vec<&str> = tokens.collect();

    let executable = argv.first()?;
    if !is_ssh_executable(executable) {
        return None;
    }

    let scan = scan_arguments(&argv)?;
    let invocation = classify(&scan)?;

    Some(ProcessRecord {
        pid,
        raw_command: argv.join(" "),
        invocation,
    })
}

/// Walk the argument vector with the grammar table.
///
/// Bundled flags are unpacked character by character; the first value-taking
/// character swallows the remainder of its token (or the following token when
/// nothing remains). Exactly one positional `[user@]host` is allowed; a
/// second positional means a remote command and the line is skipped.
fn scan_arguments(argv: &[&str]) -> Option<CommandScan> {
    let mut flags = Vec::new();
    let mut value_args = Vec::new();
    let mut username = None;
    let mut destination: Option<String> = None;

    let mut index = 1;
    while index < argv.len() {
        let token = argv[index];
        if let Some(body) = token.strip_prefix('-') {
            let mut chars = body.char_indices();
            while let Some((offset, ch)) = chars.next() {
                if VALUE_OPTIONS.contains(&ch) {
                    let rest = &body[offset + ch.len_utf8()..];
                    let value = if rest.is_empty() {
                        index += 1;
                        argv.get(index)?.to_string()
                    } else {
                        rest.to_string()
                    };
                    value_args.push((ch, value));
                    break;
                }
                flags.push(ch);
            }
        } else if destination.is_none() {
            match token.split_once('@') {
                Some((user, host)) => {
                    username = Some(user.to_string());
                    destination = Some(host.to_string());
                }
                None => destination = Some(token.to_string()),
            }
        } else {
            // Second positional: a remote command, not a tunnel of interest.
            return None;
        }
        index += 1;
    }

    Some(CommandScan {
        flags,
        value_args,
        username,
        destination,
    })
}

fn classify(scan: &CommandScan) -> Option<SshInvocation> {
    let port = destination_port(scan)?;
    let forwards = forward_specs(scan)?;
    let socket_file = scan
        .value_args
        .iter()
        .find(|(opt, _)| *opt == 'S')
        .map(|(_, value)| value.clone());

    if let Some(socket_file) = socket_file {
        // Control-socket family: the destination decides master vs. child.
        return Some(match scan.destination.clone() {
            Some(destination) => SshInvocation::MasterSocket {
                socket_file,
                username: scan.username.clone(),
                destination,
                port,
                forwards,
            },
            None => {
                let socket_name = socket_file
                    .rsplit('/')
                    .next()
                    .unwrap_or(socket_file.as_str())
                    .to_string();
                SshInvocation::ForwardChild {
                    socket_file,
                    socket_name,
                    forwards,
                }
            }
        });
    }

    let destination = scan.destination.clone()?;
    if forwards.is_empty() {
        Some(SshInvocation::Session {
            username: scan.username.clone(),
            destination,
            port,
        })
    } else {
        Some(SshInvocation::Traditional {
            username: scan.username.clone(),
            destination,
            port,
            forwards,
            wants_shell: !scan.flags.contains(&'N'),
        })
    }
}

/// Last `-p` value wins; defaults to 22. An unparseable port skips the line.
fn destination_port(scan: &CommandScan) -> Option<u16> {
    let mut port = 22;
    for (opt, value) in &scan.value_args {
        if *opt == 'p' {
            port = value.parse().ok().filter(|p| *p != 0)?;
        }
    }
    Some(port)
}

fn forward_specs(scan: &CommandScan) -> Option<Vec<ForwardSpec>> {
    let mut forwards = Vec::new();
    for (opt, value) in &scan.value_args {
        let kind = match opt {
            'L' => ForwardKind::Local,
            'R' => ForwardKind::Remote,
            'D' => ForwardKind::Dynamic,
            _ => continue,
        };
        forwards.push(parse_forward_spec(kind, value)?);
    }
    Some(forwards)
}

/// Parse a `[bind:]port:host:hostport` (or `[bind:]port` for dynamic)
/// forward argument.
fn parse_forward_spec(kind: ForwardKind, value: &str) -> Option<ForwardSpec> {
    let parts = split_colons_bracket_aware(value);

    if kind == ForwardKind::Dynamic {
        let (bind_host, port_part) = match parts.as_slice() {
            [port] => (None, port),
            [bind, port] => (Some(strip_brackets(bind)), port),
            _ => return None,
        };
        return Some(ForwardSpec {
            kind,
            bind_host,
            source_port: parse_port(port_part)?,
            target_host: None,
            target_port: None,
        });
    }

    let (bind_host, port_part, host_part, hostport_part) = match parts.as_slice() {
        [port, host, hostport] => (None, port, host, hostport),
        [bind, port, host, hostport] => (Some(strip_brackets(bind)), port, host, hostport),
        _ => return None,
    };

    Some(ForwardSpec {
        kind,
        bind_host,
        source_port: parse_port(port_part)?,
        target_host: Some(strip_brackets(host_part)),
        target_port: Some(parse_port(hostport_part)?),
    })
}

/// Split on `:` while treating `[...]` (IPv6 literals) as opaque.
fn split_colons_bracket_aware(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    for ch in value.chars() {
        match ch {
            '[' => {
                in_brackets = true;
                current.push(ch);
            }
            ']' => {
                in_brackets = false;
                current.push(ch);
            }
            ':' if !in_brackets => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn strip_brackets(host: &str) -> String {
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

fn parse_port(value: &str) -> Option<u16> {
    value.parse().ok().filter(|p| *p != 0)
}
