use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "ariadne",
    version,
    about = "Agentic MCP client that answers natural-language queries with tool servers"
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    pub config: Option<String>,
    /// Tenant identifier injected into tenant-scoped provider calls.
    #[arg(long)]
    pub tenant: Option<String>,
    /// Read the query from a file instead of the arguments.
    #[arg(long)]
    pub query_file: Option<String>,
    /// Cap the number of steps for this run.
    #[arg(long)]
    pub max_steps: Option<usize>,
    #[arg(long, value_enum, default_value_t = RunMode::Query)]
    pub mode: RunMode,
    #[arg()]
    pub query: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RunMode {
    /// Answer a single query through the agent loop.
    Query,
    /// Print the connected tool catalog and exit.
    Tools,
    /// Probe the inference and retrieval backends and exit.
    Probe,
}
