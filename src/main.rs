use clap::Parser;
use console::Term;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use where_my_tunnels::acquire::{acquire_snapshot, Snapshot};
use where_my_tunnels::associate;
use where_my_tunnels::cli::Cli;
use where_my_tunnels::parse::{parse_process_listing, parse_socket_listing};
use where_my_tunnels::render::{render_forest, RenderOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("wheremytunnels {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if cli.about {
        println!(
            "wheremytunnels {} - {}",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION")
        );
        return;
    }

    init_logging(&cli);
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr so they never tear the rendered tree on stdout.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> where_my_tunnels::error::Result<()> {
    let term = Term::stdout();
    let options = RenderOptions {
        show_connections: cli.show_connections,
        show_arguments: cli.show_arguments,
    };

    let mut refresh = tokio::time::interval(Duration::from_secs(cli.interval.max(1)));
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut first_cycle = true;

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                match acquire_snapshot() {
                    Ok(snapshot) => {
                        let frame = build_frame(&snapshot, &options);
                        term.clear_screen()?;
                        term.write_line(&title_rule())?;
                        term.write_str(&frame)?;
                        first_cycle = false;
                    }
                    // Nothing sensible to show yet, so bail.
                    Err(e) if first_cycle => return Err(e.into()),
                    Err(e) => warn!("snapshot failed, keeping previous view: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn title_rule() -> String {
    console::style(format!(
        "=== WhereMyTunnels v{} ===",
        env!("CARGO_PKG_VERSION")
    ))
    .bold()
    .to_string()
}

fn build_frame(snapshot: &Snapshot, options: &RenderOptions) -> String {
    let processes = parse_process_listing(snapshot.process_lines.iter().map(String::as_str));
    let ssh_pids: HashSet<u32> = processes.iter().map(|p| p.pid).collect();
    let sockets =
        parse_socket_listing(snapshot.socket_lines.iter().map(String::as_str), &ssh_pids);
    let forest = associate(&processes, &sockets);
    render_forest(&forest, options)
}
