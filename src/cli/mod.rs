//! Command-line front-end.
//!
//! Thin by design: `run` wires the parser, binder, controller, and driver
//! together; `inspect` prints what a script defines without executing it.
//! Parameter overrides for the script itself travel after `--` and are
//! handled by the dynamic binder, not by this parser.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::EngineConfig;
use crate::controller::client::ControllerClient;
use crate::controller::Controller;
use crate::dag::driver::{DagDriver, DriverConfig};
use crate::dag::Dag;
use crate::eval::DslEvaluator;
use crate::executor::LocalExecutor;
use crate::script::ScriptParser;
use crate::target::{set_statuses, FsProbe};

/// sosflow - workflow engine for SOS pipeline scripts
#[derive(Parser, Debug)]
#[command(name = "sosflow")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "sosflow.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a workflow from a script
    Run(RunArgs),

    /// Show the workflows, steps, and targets a script defines
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The workflow script
    pub script: PathBuf,

    /// Workflow to execute
    #[arg(default_value = "default")]
    pub workflow: String,

    /// Worker pool size (overrides the config file)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Parameter overrides passed to the script, e.g. `-- --threads 8`
    #[arg(last = true)]
    pub params: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// The workflow script
    pub script: PathBuf,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = EngineConfig::load_or_default(Path::new(&self.config))?;
        if self.verbose {
            // level 2 trades the dot display for plain log lines
            config.verbosity = 2;
        }
        match self.command {
            Commands::Run(args) => run_workflow(args, config).await,
            Commands::Inspect(args) => inspect_script(args),
        }
    }
}

async fn run_workflow(args: RunArgs, mut config: EngineConfig) -> Result<()> {
    let parser = ScriptParser::new();
    let script = parser
        .read(&args.script)
        .with_context(|| format!("failed to parse {}", args.script.display()))?;

    let Some(workflow) = script.workflow(&args.workflow) else {
        bail!(
            "workflow '{}' is not defined; available workflows: {}",
            args.workflow,
            script.workflow_names().join(", ")
        );
    };
    let bindings = workflow.bind(&args.params, &DslEvaluator)?;

    let handle = Controller::new(config.verbosity).start().await?;
    config.set_sockets(handle.ports);
    let client = Arc::new(ControllerClient::connect(&handle.ports).await?);

    let driver_config = DriverConfig {
        workers: args.jobs.unwrap_or(config.workers),
        max_retries: config.max_retries,
    };
    let driver = DagDriver::new(workflow.clone(), bindings, Arc::new(LocalExecutor), driver_config)?
        .with_client(client.clone());

    let dangling = driver.dag().dangling(&FsProbe);
    if !dangling.is_empty() {
        let mut report = Vec::new();
        for target in &dangling {
            match workflow.auxiliary_for(target) {
                Some(section) => {
                    report.push(format!("{} (provided by auxiliary step {})", target, section.header()))
                }
                None => report.push(target.to_string()),
            }
        }
        info!(targets = %report.join(", "), "unresolved input targets");
    }

    // a Ctrl-C stops new launches and lets running steps finish
    let cancel = driver.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = driver.run().await?;
    client.shutdown().await.ok();
    handle.wait().await;

    if !summary.executed.is_empty() {
        println!("executed: {}", summary.executed.join(", "));
    }
    if !summary.skipped.is_empty() {
        println!("skipped: {}", summary.skipped.join(", "));
    }
    if summary.cancelled {
        bail!("run cancelled");
    }
    if !summary.failed.is_empty() {
        bail!("failed steps: {}", summary.failed.join(", "));
    }
    Ok(())
}

fn inspect_script(args: InspectArgs) -> Result<()> {
    let parser = ScriptParser::new();
    let script = parser
        .read(&args.script)
        .with_context(|| format!("failed to parse {}", args.script.display()))?;

    println!("format version: {}", script.format_version);
    if !script.description.is_empty() {
        println!("{}", script.description.trim_end());
    }
    for (name, workflow) in &script.workflows {
        println!("\nworkflow {}:", name);
        if !workflow.description.is_empty() {
            println!("  {}", workflow.description.trim_end().replace('\n', "\n  "));
        }
        let bindings = workflow.bind(&[], &DslEvaluator)?;
        let dag = Dag::from_workflow(workflow, &bindings)?;
        for node in dag.nodes() {
            println!("  {}", node);
            // no signature store is running during inspection
            for (target, status) in set_statuses(&node.input_targets, |_| false, &FsProbe) {
                match target {
                    Some(target) => println!("    input {}: {}", target, status),
                    None => println!("    inputs: {}", status),
                }
            }
        }
        for section in &workflow.auxiliary_sections {
            println!("  auxiliary [{}]", section.header());
        }
        let dangling = dag.dangling(&FsProbe);
        if !dangling.is_empty() {
            let names: Vec<String> = dangling.iter().map(|t| t.to_string()).collect();
            println!("  dangling: {}", names.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_parsing() {
        let cli = Cli::try_parse_from([
            "sosflow", "run", "align.sos", "human", "--jobs", "2", "--", "--threads", "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.script, PathBuf::from("align.sos"));
                assert_eq!(args.workflow, "human");
                assert_eq!(args.jobs, Some(2));
                assert_eq!(args.params, ["--threads", "8"]);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::try_parse_from(["sosflow", "run", "align.sos"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.workflow, "default");
                assert_eq!(args.jobs, None);
                assert!(args.params.is_empty());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_inspect_parsing() {
        let cli = Cli::try_parse_from(["sosflow", "inspect", "align.sos"]).unwrap();
        match cli.command {
            Commands::Inspect(args) => {
                assert_eq!(args.script, PathBuf::from("align.sos"));
            }
            _ => panic!("expected inspect command"),
        }
    }
}
