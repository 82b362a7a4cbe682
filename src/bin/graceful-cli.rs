use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "graceful-cli")]
#[command(about = "Inspect a running graceful-http server through its diagnostics endpoints", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Diagnostics root the server was configured with.
    #[arg(short, long, default_value = "/debug/pprof/")]
    root: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List diagnostics endpoints
    Index,
    /// Show drain phase and in-flight requests
    Drain,
    /// Show runtime worker and task counts
    Runtime,
    /// Show package name and version
    Build,
    /// Show the server's command line
    Cmdline,
    /// Sample drain and runtime counters for a window
    Profile {
        #[arg(short, long, default_value_t = 30)]
        seconds: u64,
    },
}

impl Commands {
    fn endpoint(&self) -> String {
        match self {
            Commands::Index => "index".to_string(),
            Commands::Drain => "drain".to_string(),
            Commands::Runtime => "runtime".to_string(),
            Commands::Build => "build".to_string(),
            Commands::Cmdline => "cmdline".to_string(),
            Commands::Profile { seconds } => format!("profile?seconds={}", seconds),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let root = cli.root.trim_end_matches('/');
    let url = format!("{}{}/{}", cli.url.trim_end_matches('/'), root, cli.command.endpoint());

    let res = client.get(url).send().await?;
    print_response(res, &cli.command).await
}

async fn print_response(res: reqwest::Response, command: &Commands) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: diagnostics endpoint returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    match command {
        Commands::Index => print!("{}", res.text().await?),
        Commands::Cmdline => println!("{}", res.text().await?.replace('\0', " ")),
        _ => {
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}
