use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use api_gateway::definitions::{
    plan, DefinitionRepository, FileSystemRepository, RouteSource, SkippedDefinition,
};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Offline tooling for API gateway definitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a definitions directory and show which routes would be served
    Validate {
        /// Directory holding `apis/` and `auth/`
        dir: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct RouteSummary {
    listen_path: String,
    source: String,
    upstreams: Vec<String>,
    authenticated: bool,
}

#[derive(Serialize)]
struct ValidationSummary {
    routes: Vec<RouteSummary>,
    skipped: Vec<SkippedDefinition>,
    inactive: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { dir, json } => {
            let summary = validate(dir).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if !summary.skipped.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn validate(dir: PathBuf) -> Result<ValidationSummary, Box<dyn std::error::Error>> {
    let repository = FileSystemRepository::new(dir);
    let servers = repository.list_oauth_servers().await?;
    let routes = repository.list_route_definitions().await?;
    let plan = plan(servers, routes);

    let routes = plan
        .routes
        .into_values()
        .map(|route| RouteSummary {
            listen_path: route.pattern().to_string(),
            authenticated: matches!(
                &route.source,
                RouteSource::Api { oauth_server: Some(_), .. }
            ),
            source: route.source.label(),
            upstreams: route
                .proxy
                .upstreams
                .iter()
                .map(|u| u.url.to_string())
                .collect(),
        })
        .collect();

    Ok(ValidationSummary {
        routes,
        skipped: plan.skipped,
        inactive: plan.inactive,
    })
}

fn print_summary(summary: &ValidationSummary) {
    for route in &summary.routes {
        let auth = if route.authenticated { " [oauth]" } else { "" };
        println!(
            "ok      {} -> {} ({}){}",
            route.listen_path,
            route.upstreams.join(", "),
            route.source,
            auth
        );
    }
    for skipped in &summary.skipped {
        println!("skipped {:?} {}: {}", skipped.kind, skipped.id, skipped.error);
    }
    println!(
        "{} routes, {} skipped, {} inactive",
        summary.routes.len(),
        summary.skipped.len(),
        summary.inactive
    );
}
