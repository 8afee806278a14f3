use clap::Parser;
use mao::cli::{Args, Command};
use mao::{Orchestrator, TerminalStatus};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mao=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    };

    let orchestrator = Orchestrator::with_cli_invoker(config);

    let outcome = tokio::select! {
        result = run_command(&orchestrator, &args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("cancelled by user");
            Ok(TerminalStatus::Cancelled)
        }
    };

    match outcome {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(e) => {
            error!("run failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run_command(
    orchestrator: &Orchestrator,
    command: &Command,
) -> anyhow::Result<TerminalStatus> {
    match command {
        Command::Run { objective } => {
            let (project_id, status) = orchestrator.start(objective).await?;
            info!(%project_id, ?status, "run finished");
            Ok(status)
        }
        Command::Resume { project_id } => {
            let status = orchestrator.run(project_id).await?;
            info!(%project_id, ?status, "resume finished");
            Ok(status)
        }
    }
}
