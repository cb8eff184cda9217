use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "wheremytunnels")]
#[command(
    author,
    disable_version_flag = true,
    about = "Live tree view of SSH tunnels, master sockets, and sessions on this host"
)]
pub struct Cli {
    /// Refresh interval in seconds
    #[arg(short = 'i', long = "interval", default_value = "2")]
    pub interval: u64,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Show the listening/established sockets backing each node
    #[arg(long = "show-connections")]
    pub show_connections: bool,

    /// Show the raw ssh command line next to each process
    #[arg(long = "show-arguments")]
    pub show_arguments: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Print a short description and exit
    #[arg(short = 'a', long = "about")]
    pub about: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}
