use clap::Parser;

/// Command-line arguments of the server.
#[derive(Debug, Parser)]
#[command(name = "orbit", about = "LLM orchestration server", version)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: String,

    /// Log filter, e.g. "info" or "llm=debug,mcp=debug".
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
