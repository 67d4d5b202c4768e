// crates/guardcli/src/main.rs

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use guardcore::{
    ExecutionEvent, NodeCategory, NodeEvent, SecurityEvent, Value, WorkflowGraph, WorkflowNode,
};
use guardnodes::NodesConfig;
use guardruntime::{GuardRuntime, RuntimeConfig, WorkflowRunResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guard")]
#[command(about = "Security workflow engine CLI", long_about = None)]
struct Cli {
    /// Runtime and node endpoint configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow against one security event
    Run {
        /// Path to workflow JSON file
        file: PathBuf,

        #[command(flatten)]
        event: EventArgs,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file against the registered nodes
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Execute a single node outside any workflow
    ExecNode {
        /// Registry id of the node
        node_id: String,

        #[command(flatten)]
        event: EventArgs,

        /// Node configuration as JSON object
        #[arg(long)]
        node_config: Option<String>,
    },

    /// List available nodes
    Nodes {
        /// Filter by name, id, type or tag
        #[arg(short, long)]
        search: Option<String>,

        /// Filter by category (core, soar, cloud, ai-ml, integration, mitre)
        #[arg(long)]
        category: Option<String>,
    },

    /// Create an example triage workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct EventArgs {
    /// Path to a security event JSON file
    #[arg(short, long)]
    event: Option<PathBuf>,

    /// Security event as JSON string
    #[arg(short, long, conflicts_with = "event")]
    input: Option<String>,
}

impl EventArgs {
    fn load(&self) -> Result<SecurityEvent> {
        let text = match (&self.event, &self.input) {
            (Some(path), _) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?,
            (None, Some(input)) => input.clone(),
            (None, None) => return Err(anyhow!("An event is required: use --event or --input")),
        };
        let json: serde_json::Value = serde_json::from_str(&text).context("Event is not valid JSON")?;
        Ok(SecurityEvent::from_json(json)?)
    }
}

/// Config file layout: runtime settings at the top level, node endpoints
/// under `nodes`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    #[serde(flatten)]
    runtime: RuntimeConfig,
    nodes: NodesConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

fn build_runtime(config: CliConfig) -> GuardRuntime {
    let case_management = guardnodes::case_management(&config.nodes);
    let runtime = GuardRuntime::with_case_management(config.runtime, case_management);
    guardnodes::register_all(runtime.registry(), runtime.rate_limiter().clone(), &config.nodes);
    runtime
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, event, json } => {
            run_workflow(build_runtime(config), &file, event.load()?, json).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&build_runtime(config), &file)?;
        }

        Commands::ExecNode {
            node_id,
            event,
            node_config,
        } => {
            let node_config = parse_node_config(node_config.as_deref())?;
            exec_node(&build_runtime(config), &node_id, event.load()?, node_config).await?;
        }

        Commands::Nodes { search, category } => {
            list_nodes(&build_runtime(config), search.as_deref(), category.as_deref())?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_graph(file: &Path) -> Result<WorkflowGraph> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read workflow {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid workflow {}", file.display()))
}

fn parse_node_config(raw: Option<&str>) -> Result<HashMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    match Value::from(serde_json::from_str::<serde_json::Value>(raw)?) {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("Node config must be a JSON object")),
    }
}

async fn run_workflow(
    runtime: GuardRuntime,
    file: &Path,
    event: SecurityEvent,
    json: bool,
) -> Result<()> {
    let graph = load_graph(file)?;

    println!("🚀 Workflow: {} ({})", graph.name, graph.id);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!(
        "   Event: {} {} (risk {:.1})",
        event.event_id(),
        event.threat_type(),
        event.risk_score()
    );
    println!();

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let result = runtime.execute_workflow(&graph, event).await;

    // let the listener drain before printing the summary
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { workflow_id, .. } => {
            println!("▶️  Workflow {} started", workflow_id);
        }
        ExecutionEvent::WorkflowStatusChanged { status, .. } => {
            tracing::debug!(?status, "Workflow status changed");
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
            NodeEvent::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
            NodeEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                None => println!("     📊 [{}] {}%", node_id, percent),
            },
        },
        ExecutionEvent::IncidentRaised {
            incident_id,
            severity,
            ..
        } => {
            println!("  🚨 Incident {} raised ({})", incident_id, severity);
        }
        ExecutionEvent::WorkflowCompleted {
            status,
            duration_ms,
            ..
        } => {
            println!("✨ Workflow finished as {:?} in {}ms", status, duration_ms);
        }
    }
}

fn print_summary(result: &WorkflowRunResult) {
    let summary = &result.summary;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {:?}", result.status);
    println!("   Order: {}", result.execution_order.join(" → "));
    println!(
        "   Nodes: {} succeeded, {} failed, {} skipped of {}",
        summary.succeeded, summary.failed, summary.skipped, summary.total_nodes
    );
    println!(
        "   Time: {}ms total, {:.1}ms average",
        summary.total_time_ms, summary.average_time_ms
    );

    if !result.output.is_empty() {
        println!();
        println!("📤 Outputs:");
        let mut types: Vec<&String> = result.output.keys().collect();
        types.sort();
        for node_type in types {
            println!("   {}: {}", node_type, result.output[node_type].to_json());
        }
    }

    if let Some(incident) = &result.incident {
        println!();
        println!("🚨 Incident: {}", incident.title);
        println!("   Severity: {} (risk {:.1})", incident.severity, incident.risk_score);
        match &result.incident_case_id {
            Some(case_id) => println!("   Case: {}", case_id),
            None => println!("   Case: not created"),
        }
        for rec in &incident.recommendations {
            println!("   - {}", rec);
        }
    }
}

fn validate_workflow(runtime: &GuardRuntime, file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let graph = load_graph(file)?;
    let validation = runtime.validate_graph(&graph);

    for warning in &validation.warnings {
        println!("   ⚠️  {}", warning);
    }
    for error in &validation.errors {
        println!("   ❌ {}", error);
    }

    if !validation.valid {
        return Err(anyhow!(
            "Workflow '{}' has {} error(s)",
            graph.name,
            validation.errors.len()
        ));
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", graph.name);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!("   Order: {}", runtime.execution_order(&graph).join(" → "));
    Ok(())
}

async fn exec_node(
    runtime: &GuardRuntime,
    node_id: &str,
    event: SecurityEvent,
    config: HashMap<String, Value>,
) -> Result<()> {
    let result = runtime.execute_node(node_id, &event, config).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        return Err(anyhow!(
            "Node {} failed: {}",
            node_id,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn list_nodes(runtime: &GuardRuntime, search: Option<&str>, category: Option<&str>) -> Result<()> {
    let registry = runtime.registry();
    let mut nodes = match (search, category) {
        (Some(query), _) => registry.search(query),
        (None, Some(name)) => {
            let category = NodeCategory::parse(name)
                .ok_or_else(|| anyhow!("Unknown category '{}'", name))?;
            registry.by_category(category)
        }
        (None, None) => registry.list(),
    };
    if let (Some(_), Some(name)) = (search, category) {
        let category =
            NodeCategory::parse(name).ok_or_else(|| anyhow!("Unknown category '{}'", name))?;
        nodes.retain(|n| n.category == category);
    }

    println!("📦 Available Nodes:");
    println!();
    for node in nodes {
        let state = if node.enabled { "" } else { " [disabled]" };
        println!("  • {} ({}, {}){}", node.id, node.node_type, node.category, state);
        println!("    {}", node.description);
    }
    Ok(())
}

fn example_workflow() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new("triage-example", "Example Threat Triage");
    graph.description =
        Some("Scores an event, explains it, maps it to ATT&CK and plans a response".to_string());

    let input = graph.add_node(WorkflowNode::new("event", "input").with_name("Security Event"));
    let ml = graph.add_node(
        WorkflowNode::new("score", "ml-scoring")
            .with_name("ML Scoring")
            .with_config("threshold", 0.7),
    );
    let intel = graph.add_node(WorkflowNode::new("intel", "threat-intel").with_name("Reputation"));
    let ai = graph.add_node(
        WorkflowNode::new("analyze", "ai-analysis")
            .with_name("AI Analysis")
            .with_config("analysis_type", "comprehensive"),
    );
    let mitre = graph.add_node(WorkflowNode::new("mitre", "mitre-mapping").with_name("ATT&CK"));
    let respond = graph.add_node(
        WorkflowNode::new("respond", "soar-action")
            .with_name("Contain")
            .with_config("dry_run", true)
            .with_config("min_risk_score", 7.0),
    );

    graph.connect(&input, &ml);
    graph.connect(&input, &intel);
    graph.connect(&ml, &ai);
    graph.connect(&intel, &ai);
    graph.connect(&ai, &mitre);
    graph.connect(&mitre, &respond);
    graph
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_workflow())?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  guard run {} --input '{{\"threat_type\": \"Brute Force\", \"risk_score\": 8.2, \"source_ip\": \"203.0.113.7\"}}'",
        output.display()
    );
    Ok(())
}
