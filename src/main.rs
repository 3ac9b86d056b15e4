//! meshrun CLI entry point

use anyhow::{Context, Result};
use meshrun::config::cli::{Cli, ExecutionMode};
use meshrun::config::identity::IdentitySource;
use meshrun::config::toml::merge_cli_with_config;
use meshrun::config::validator::{validate_config, validate_run};
use meshrun::output::{json, text};
use meshrun::stats::aggregator::ClusterSummary;
use meshrun::{Agent, NodeIdentity, ProgramSource, ProgramSpec, RunReport};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;
    init_logging(cli.debug);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let reports = match cli.mode {
        ExecutionMode::Node => runtime.block_on(run_node(&cli))?,
        ExecutionMode::Local => runtime.block_on(run_local(&cli))?,
    };

    for report in &reports {
        text::print_report(report);
    }
    let summary = ClusterSummary::from_reports(&reports);
    text::print_cluster_summary(&summary);

    if let Some(ref path) = cli.json_output {
        let output = json::build_run_output(&reports);
        json::write_json_output(path, &output, true)?;
        println!("JSON report written to {}", path.display());
    }

    if !summary.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

/// Structured logging on stderr; RUST_LOG overrides the level
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn program_source(cli: &Cli) -> ProgramSource {
    match cli.program {
        Some(ref program) => ProgramSource::Explicit(ProgramSpec::new(program)),
        None => ProgramSource::Discover(cli.work_dir.clone()),
    }
}

/// Run this node's share of a distributed run
async fn run_node(cli: &Cli) -> Result<Vec<RunReport>> {
    let source = IdentitySource {
        node_id: cli.node_id,
        node_id_file: cli.work_dir.join(&cli.node_id_file),
        host_list: cli.host_list.clone(),
        clients_file: cli.clients_file.clone(),
    };
    let agent = Agent::init(&source, program_source(cli)).context("Failed to discover node identity")?;

    let config = merge_cli_with_config(cli, agent.identity().node_count())?;
    validate_run(&config, agent.identity()).context("Configuration validation failed")?;

    println!(
        "meshrun v{}: node {} of {} ({})",
        env!("CARGO_PKG_VERSION"),
        agent.identity().node_id(),
        agent.identity().node_count(),
        config
    );

    start_agent(&agent, config).await?;
    Ok(wait_or_interrupt(std::slice::from_ref(&agent)).await)
}

/// Run every node in this process over loopback
async fn run_local(cli: &Cli) -> Result<Vec<RunReport>> {
    let config = merge_cli_with_config(cli, cli.nodes.unwrap_or(1))?;
    validate_config(&config).context("Configuration validation failed")?;

    let first_port = cli.listen_port as usize;
    if first_port + config.nodes > u16::MAX as usize + 1 {
        anyhow::bail!(
            "{} nodes starting at port {} run past port {}",
            config.nodes,
            first_port,
            u16::MAX
        );
    }
    let peers: Vec<String> = (0..config.nodes)
        .map(|i| format!("127.0.0.1:{}", first_port + i))
        .collect();

    println!(
        "meshrun v{}: local run of {}",
        env!("CARGO_PKG_VERSION"),
        config
    );

    let mut agents = Vec::with_capacity(config.nodes);
    for (node_id, addr) in peers.iter().enumerate() {
        let identity = NodeIdentity::new(node_id as u32, peers.clone())?;
        agents.push(Agent::new(identity, program_source(cli)).with_listen_addr(addr.clone()));
    }

    // Every listener is up before any child can send
    for agent in &agents {
        agent
            .bind()
            .await
            .with_context(|| format!("Failed to bind node {}", agent.identity().node_id()))?;
    }
    for agent in &agents {
        start_agent(agent, config.clone()).await?;
    }

    Ok(wait_or_interrupt(&agents).await)
}

/// Start one agent; a failed start still yields a report to print
async fn start_agent(agent: &Agent, config: meshrun::RunConfig) -> Result<()> {
    if let Err(e) = agent.start(config).await {
        if !agent.status().is_terminal() {
            return Err(e);
        }
        error!(node = agent.identity().node_id(), "run failed to start: {:#}", e);
    }
    Ok(())
}

/// Wait for every agent; Ctrl-C stops all of them
async fn wait_or_interrupt(agents: &[Agent]) -> Vec<RunReport> {
    let wait_all = async {
        let mut reports = Vec::with_capacity(agents.len());
        for agent in agents {
            reports.push(agent.wait().await);
        }
        reports
    };
    tokio::pin!(wait_all);

    tokio::select! {
        reports = &mut wait_all => reports,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("interrupted, stopping run");
                    for agent in agents {
                        agent.stop();
                    }
                }
                Err(e) => warn!("failed to listen for Ctrl-C: {}", e),
            }
            wait_all.await
        }
    }
}
