//! Per-line parsers turning raw process/socket listings into typed records.
//!
//! Both parsers are pure: one line in, an optional record out. Lines that do
//! not match the recognized grammars are skipped, never an error.

pub mod process;
pub mod socket;

pub use process::parse_process_line;
pub use socket::parse_socket_line;

use crate::model::{ProcessRecord, SocketRecord};

/// Parse a full process listing, keeping only SSH invocations of interest.
pub fn parse_process_listing<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<ProcessRecord> {
    lines.filter_map(parse_process_line).collect()
}

/// Parse a full socket listing, keeping entries owned by the given SSH pids
/// (entries without ownership information are kept and disambiguated later).
pub fn parse_socket_listing<'a>(
    lines: impl Iterator<Item = &'a str>,
    ssh_pids: &std::collections::HashSet<u32>,
) -> Vec<SocketRecord> {
    lines
        .filter_map(parse_socket_line)
        .filter(|record| match record.pid {
            Some(pid) => ssh_pids.contains(&pid),
            None => true,
        })
        .collect()
}
