//! Renders a tunnel forest as a colored text tree.
//!
//! The renderer interprets nothing: node kinds, tags, and connection counts
//! come fully resolved from the association pass. Styling goes through the
//! `console` crate, so `--no-color` and `NO_COLOR` are honored globally.

use crate::model::{
    Annotation, Forest, ForwardKind, ForwardState, NodeKind, SocketKind, SocketRecord, TunnelNode,
};
use console::style;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Add `LISTEN`/`ESTABLISHED` evidence leaves under each node.
    pub show_connections: bool,
    /// Append the raw ssh command line to process nodes.
    pub show_arguments: bool,
}

/// Render the whole forest. Roots are printed flush-left in forest order,
/// children with tree glyphs.
pub fn render_forest(forest: &Forest, options: &RenderOptions) -> String {
    let mut out = String::new();
    if forest.is_empty() {
        let _ = writeln!(out, "{}", style("No ssh connections detected").white());
        return out;
    }

    for root in forest.roots() {
        let _ = writeln!(out, "{}", node_label(root, options));
        let items = node_items(forest, root, options);
        render_items(&mut out, forest, &items, "", options);
    }
    out
}

/// One renderable child entry under a node.
enum Item<'a> {
    Leaf(String),
    Forward(&'a ForwardState, Option<&'a str>),
    Node(&'a TunnelNode),
}

fn node_items<'a>(
    forest: &'a Forest,
    node: &'a TunnelNode,
    options: &RenderOptions,
) -> Vec<Item<'a>> {
    let mut items = Vec::new();

    if options.show_connections {
        for line in connection_lines(&node.matched_sockets) {
            items.push(Item::Leaf(line));
        }
        // Traditional forward nodes carry their evidence on the forward
        // state rather than the node.
        if node.kind == NodeKind::TraditionalForward {
            for state in &node.forwards {
                for line in connection_lines(&state.matched) {
                    items.push(Item::Leaf(line));
                }
            }
        }
    }

    // Inline forward states (masters and forward children); traditional
    // forwards are full nodes and arrive through `children` below.
    if node.kind != NodeKind::TraditionalForward {
        for state in &node.forwards {
            items.push(Item::Forward(state, node.destination.as_deref()));
        }
    }

    for child in forest.children(node.id) {
        items.push(Item::Node(child));
    }

    items
}

fn render_items(
    out: &mut String,
    forest: &Forest,
    items: &[Item<'_>],
    prefix: &str,
    options: &RenderOptions,
) {
    for (position, item) in items.iter().enumerate() {
        let last = position + 1 == items.len();
        let connector = if last { "└── " } else { "├── " };
        let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });

        match item {
            Item::Leaf(text) => {
                let _ = writeln!(out, "{}{}{}", prefix, connector, text);
            }
            Item::Forward(state, destination) => {
                let _ = writeln!(
                    out,
                    "{}{}{}",
                    prefix,
                    connector,
                    forward_label(state, *destination)
                );
                if options.show_connections {
                    let leaves: Vec<Item<'_>> = connection_lines(&state.matched)
                        .into_iter()
                        .map(Item::Leaf)
                        .collect();
                    render_items(out, forest, &leaves, &child_prefix, options);
                }
            }
            Item::Node(node) => {
                let _ = writeln!(out, "{}{}{}", prefix, connector, node_label(node, options));
                let nested = node_items(forest, node, options);
                render_items(out, forest, &nested, &child_prefix, options);
            }
        }
    }
}

fn node_label(node: &TunnelNode, options: &RenderOptions) -> String {
    let mut text = match node.kind {
        NodeKind::TraditionalForward => {
            // The forward spec is the whole story for these nodes.
            match node.forwards.first() {
                Some(state) => return forward_label(state, node.destination.as_deref()),
                None => String::new(),
            }
        }
        kind => {
            let mut text = format!("{}: ", kind_title(kind));
            if let Some(socket_file) = &node.socket_file {
                let _ = write!(text, "{} ", socket_file);
            }
            if let Some(destination) = &node.destination {
                if let Some(username) = &node.username {
                    let _ = write!(text, "{}@", username);
                }
                let _ = write!(text, "{}", destination);
                if let Some(port) = node.destination_port {
                    let _ = write!(text, ":{}", port);
                }
                text.push(' ');
            }
            let _ = write!(text, "({})", node.pid);
            text
        }
    };

    let direct_connections = node
        .matched_sockets
        .iter()
        .filter(|s| matches!(s.kind, SocketKind::Established { .. }))
        .count();
    if direct_connections > 0 {
        let _ = write!(text, " [{} active]", direct_connections);
    }

    for annotation in &node.annotations {
        // Forward-level tags are repeated on the forward lines themselves.
        if node.forwards.is_empty() || matches!(annotation, Annotation::OrphanForward | Annotation::Unconfirmed) {
            if let Some(suffix) = annotation_suffix(*annotation, node.kind) {
                let _ = write!(text, " - {}", suffix);
            }
        }
    }

    let mut styled = if node.has_errors() {
        style(text).red().bold().to_string()
    } else {
        match node.kind {
            NodeKind::MasterSocket => style(text).cyan().to_string(),
            NodeKind::SocketForward | NodeKind::TraditionalForward => {
                style(text).magenta().to_string()
            }
            NodeKind::TraditionalMain => style(text).magenta().to_string(),
            NodeKind::SocketSession
            | NodeKind::TraditionalSession
            | NodeKind::StandaloneSession => style(text).yellow().to_string(),
        }
    };

    if options.show_arguments && node.kind != NodeKind::TraditionalForward {
        let _ = write!(styled, " {}", style(&node.raw_command).dim());
    }
    styled
}

fn forward_label(state: &ForwardState, ssh_destination: Option<&str>) -> String {
    let spec = &state.spec;
    let bind = spec.bind_host.as_deref().unwrap_or("127.0.0.1");
    let gateway = spec.bind_host.is_some();

    let mut text = match spec.kind {
        ForwardKind::Local => {
            let title = if gateway {
                "LOCAL GATEWAY FORWARD"
            } else {
                "LOCAL FORWARD"
            };
            let target = format!(
                "{}:{}",
                spec.target_host.as_deref().unwrap_or("?"),
                spec.target_port.unwrap_or(0)
            );
            match ssh_destination {
                Some(destination) => format!(
                    "{}: {}:{} -> {} -> {}",
                    title, bind, spec.source_port, destination, target
                ),
                None => format!("{}: {}:{} -> {}", title, bind, spec.source_port, target),
            }
        }
        ForwardKind::Remote => {
            let title = if gateway {
                "REVERSE GATEWAY FORWARD"
            } else {
                "REVERSE FORWARD"
            };
            let target = format!(
                "{}:{}",
                spec.target_host.as_deref().unwrap_or("?"),
                spec.target_port.unwrap_or(0)
            );
            match ssh_destination {
                Some(destination) => format!(
                    "{}: {} <- {}:{}",
                    title, target, destination, spec.source_port
                ),
                None => format!("{}: {} <- :{}", title, target, spec.source_port),
            }
        }
        ForwardKind::Dynamic => match ssh_destination {
            Some(destination) => format!(
                "DYNAMIC FORWARD: {}:{} -> {} -> *:*",
                bind, spec.source_port, destination
            ),
            None => format!("DYNAMIC FORWARD: {}:{} -> *:*", bind, spec.source_port),
        },
    };

    if state.connections > 0 {
        let _ = write!(text, " [{} active]", state.connections);
    }

    let mut has_error = false;
    let mut idle_remote = false;
    for annotation in &state.annotations {
        match annotation {
            Annotation::Idle if spec.kind == ForwardKind::Remote => {
                idle_remote = true;
                let _ = write!(text, " - REVERSE FORWARD NOT CURRENTLY IN USE");
            }
            Annotation::Idle => {
                let _ = write!(text, " - IDLE");
            }
            other => {
                if let Some(suffix) = annotation_suffix(*other, NodeKind::TraditionalForward) {
                    has_error |= other.is_error();
                    let _ = write!(text, " - {}", suffix);
                }
            }
        }
    }

    if has_error {
        style(text).red().bold().to_string()
    } else if idle_remote {
        style(text).yellow().to_string()
    } else {
        style(text).green().to_string()
    }
}

fn kind_title(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::MasterSocket => "MASTER SOCKET",
        NodeKind::SocketForward => "SOCKET FORWARD",
        NodeKind::SocketSession => "SOCKET SESSION",
        NodeKind::TraditionalMain => "TRADITIONAL TUNNEL",
        NodeKind::TraditionalForward => "FORWARD",
        NodeKind::TraditionalSession => "INTERACTIVE SESSION",
        NodeKind::StandaloneSession => "TRADITIONAL SESSION",
    }
}

fn annotation_suffix(annotation: Annotation, kind: NodeKind) -> Option<&'static str> {
    match annotation {
        Annotation::MissingListener => Some("NO ATTACHED LISTENING CONNECTION"),
        Annotation::DuplicateForward => Some("DUPLICATE FORWARD DETECTED"),
        Annotation::OrphanForward => Some(match kind {
            NodeKind::SocketSession => "ORPHAN SOCKET SESSION",
            _ => "ORPHAN SOCKET FORWARD",
        }),
        Annotation::Unconfirmed => Some("UNCONFIRMED"),
        // Idle is forward-specific and handled inline.
        Annotation::Idle => None,
    }
}

/// Sorted connection leaves, one per socket record.
fn connection_lines(records: &[SocketRecord]) -> Vec<String> {
    let mut lines: Vec<String> = records
        .iter()
        .map(|record| match &record.kind {
            SocketKind::Listen { local } => {
                style(format!("LISTEN {}", local)).blue().to_string()
            }
            SocketKind::Established { local, remote } => {
                style(format!("ESTABLISHED {} -> {}", local, remote))
                    .green()
                    .to_string()
            }
            SocketKind::UnixControl { socket_file, .. } => {
                style(format!("CONTROL {}", socket_file)).blue().to_string()
            }
        })
        .collect();
    lines.sort();
    lines
}
