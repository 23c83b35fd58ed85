use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use osdk_faux::{FauxConfig, FauxServer};

#[derive(Parser)]
#[command(
    name = "osdk-faux",
    about = "Faux ontology server backed by an in-memory object store",
    version
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<std::net::SocketAddr>,

    /// JSON fixture with the schema, objects, and links to seed
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// Ontology API name accepted in request paths
    #[arg(long)]
    ontology: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FauxConfig::load(path)?,
        None => FauxConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(fixture) = cli.fixture {
        config.fixture = Some(fixture);
    }
    if let Some(ontology) = cli.ontology {
        config.ontology = ontology;
    }

    let server = FauxServer::from_config(config)?;
    println!(
        "{} Faux ontology {} on {} ({} objects)",
        "✓".green().bold(),
        server.config().ontology.yellow(),
        server.config().bind_addr.to_string().bold(),
        server.ontology().store().len()
    );
    server.serve().await?;
    Ok(())
}
