//! Snapshot acquisition: one process listing plus one socket listing per
//! refresh cycle, captured as raw text lines for the parsers.
//!
//! `ps` is required. For sockets we prefer `ss` and fall back to `netstat`
//! when it is missing; the socket parser understands both output shapes.

use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with status {status}")]
    CommandFailed {
        command: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("no socket listing tool available (tried ss and netstat)")]
    NoSocketTool,
}

/// Raw text captured from the system in a single cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub process_lines: Vec<String>,
    pub socket_lines: Vec<String>,
}

/// Capture one consistent-enough snapshot. Processes first, sockets second;
/// a socket that appears between the two reads is dropped by the pid filter
/// downstream rather than failing the cycle.
pub fn acquire_snapshot() -> Result<Snapshot, AcquireError> {
    let process_lines = lines_of(run("ps", &["-eo", "pid=,args="])?);
    let socket_lines = acquire_sockets()?;
    debug!(
        processes = process_lines.len(),
        sockets = socket_lines.len(),
        "captured snapshot"
    );
    Ok(Snapshot {
        process_lines,
        socket_lines,
    })
}

fn acquire_sockets() -> Result<Vec<String>, AcquireError> {
    // TCP and unix listings are concatenated; every line is self-describing
    // so the parser does not need to know which tool produced it.
    match (run("ss", &["-tanp"]), run("ss", &["-xanp"])) {
        (Ok(tcp), Ok(unix)) => {
            let mut lines = lines_of(tcp);
            lines.extend(lines_of(unix));
            return Ok(lines);
        }
        (tcp, unix) => {
            debug!(
                tcp_err = tcp.is_err(),
                unix_err = unix.is_err(),
                "ss unavailable, trying netstat"
            );
        }
    }

    match (run("netstat", &["-tanp"]), run("netstat", &["-xan"])) {
        (Ok(tcp), Ok(unix)) => {
            let mut lines = lines_of(tcp);
            lines.extend(lines_of(unix));
            Ok(lines)
        }
        _ => Err(AcquireError::NoSocketTool),
    }
}

fn run(command: &'static str, args: &[&str]) -> Result<String, AcquireError> {
    let output = Command::new(command)
        .args(args)
        .output()
        .map_err(|source| AcquireError::Spawn { command, source })?;
    if !output.status.success() {
        return Err(AcquireError::CommandFailed {
            command,
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn lines_of(output: String) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
