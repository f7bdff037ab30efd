mod config;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::HoldingConfig;
use holding_core::{HoldingError, RequestContext, TaskStatus};
use holding_pipeline::{
    refresh_prompts, rule_book, seed_tenants_and_agents, NewTask, PipelineRun, TaskPipeline,
};
use holding_router::{CallRouter, CostTracker, EnvCredentials, OpenAiCompatibleBackend};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "holding", about = "Holding: multi-tenant agent task pipeline")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "holding.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert configured tenants and agents that do not exist yet
    Seed,
    /// Re-read agent prompt files and update changed prompts
    RefreshPrompts,
    /// Create a task without executing it
    Create(TaskArgs),
    /// Run the assigned worker on a pending task
    Execute {
        #[arg(long)]
        tenant: String,
        task_id: String,
    },
    /// Have the tenant's auditor review a task
    Review {
        #[arg(long)]
        tenant: String,
        task_id: String,
    },
    /// Create, execute and review in one go
    Run(TaskArgs),
    /// List a tenant's tasks, newest first
    Tasks {
        #[arg(long)]
        tenant: String,
        /// pending, in_progress, review, approved or rejected
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List the corrections recorded against a task
    Corrections {
        #[arg(long)]
        tenant: String,
        task_id: String,
    },
    /// Cost summary per tenant, agent and model
    Costs {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Recent audit events of a tenant
    Audit {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct TaskArgs {
    #[arg(long)]
    tenant: String,
    /// Task type, matched against worker skills
    #[arg(long = "type")]
    task_type: String,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value_t = holding_core::DEFAULT_PRIORITY)]
    priority: i32,
    /// Structured input as a JSON object
    #[arg(long)]
    input: Option<String>,
}

impl TaskArgs {
    fn context(&self) -> RequestContext {
        RequestContext::new(&self.tenant).with_actor("cli")
    }

    fn new_task(&self) -> anyhow::Result<NewTask> {
        let mut task = NewTask::new(&self.task_type, &self.title)
            .with_description(&self.description)
            .with_priority(self.priority);
        if let Some(input) = &self.input {
            let value: serde_json::Value = serde_json::from_str(input)?;
            if !value.is_object() {
                anyhow::bail!("--input must be a JSON object");
            }
            task = task.with_input(value);
        }
        Ok(task)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Failures that leave the task waiting are reported, not raised.
fn report_stalled(task_id: &str, status: TaskStatus, err: HoldingError) -> anyhow::Result<()> {
    if !err.is_retryable() {
        return Err(err.into());
    }
    print_json(&serde_json::json!({
        "ok": false,
        "task_id": task_id,
        "status": status,
        "error": err.to_string(),
    }))
}

/// Prints the run; a stalled run is still reported with its task id, and
/// only non-retryable failures end the process with an error.
fn report_run(run: PipelineRun) -> anyhow::Result<()> {
    let mut report = serde_json::to_value(&run)?;
    if let Some(fields) = report.as_object_mut() {
        fields.insert("ok".into(), serde_json::Value::Bool(run.is_complete()));
    }
    print_json(&report)?;
    match run.stopped {
        Some(stop) if !stop.error.is_retryable() => Err(stop.error.into()),
        _ => Ok(()),
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_format);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded .env");
    }

    let config = HoldingConfig::load(&cli.config).await?;
    let store = config.open_store()?;
    let credentials = Arc::new(EnvCredentials);
    let notifier = config.notifier(credentials.as_ref());

    let router = Arc::new(CallRouter::new(
        config.router.clone(),
        Arc::new(OpenAiCompatibleBackend::new()),
        credentials,
        store.clone(),
        notifier.clone(),
    ));
    router.restore_daily_spend().await?;

    let pipeline = TaskPipeline::new(store.clone(), router, notifier, rule_book(&config.tenants));

    match cli.command {
        Commands::Seed => {
            let report = seed_tenants_and_agents(
                pipeline.registry(),
                pipeline.audit_log(),
                &config.tenants,
                &config.agents,
                &config.prompts_dir,
            )
            .await?;
            print_json(&report)?;
        }
        Commands::RefreshPrompts => {
            let updated = refresh_prompts(
                pipeline.registry(),
                pipeline.audit_log(),
                &config.agents,
                &config.prompts_dir,
            )
            .await?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Commands::Create(args) => {
            let task_id = pipeline.create_task(&args.context(), args.new_task()?).await?;
            print_json(&serde_json::json!({ "ok": true, "task_id": task_id }))?;
        }
        Commands::Execute { tenant, task_id } => {
            let ctx = RequestContext::new(tenant).with_actor("cli");
            match pipeline.execute_task(&ctx, &task_id).await {
                Ok(output) => print_json(&output)?,
                Err(e) => report_stalled(&task_id, TaskStatus::Pending, e)?,
            }
        }
        Commands::Review { tenant, task_id } => {
            let ctx = RequestContext::new(tenant).with_actor("cli");
            match pipeline.review_task(&ctx, &task_id).await {
                Ok(outcome) => print_json(&outcome)?,
                Err(e) => report_stalled(&task_id, TaskStatus::Review, e)?,
            }
        }
        Commands::Run(args) => {
            let run = pipeline
                .run_full_pipeline(&args.context(), args.new_task()?)
                .await?;
            report_run(run)?;
        }
        Commands::Tasks {
            tenant,
            status,
            limit,
        } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
            let tasks = pipeline
                .list_tasks(&RequestContext::new(tenant), status, limit)
                .await?;
            print_json(&tasks)?;
        }
        Commands::Corrections { tenant, task_id } => {
            let corrections = pipeline
                .corrections(&RequestContext::new(tenant), &task_id)
                .await?;
            print_json(&corrections)?;
        }
        Commands::Costs { tenant } => {
            let tracker = CostTracker::new(store);
            let rows = tracker.summary(tenant.as_deref()).await?;
            let total_cost = tracker.total_cost(tenant.as_deref()).await?;
            let total_calls = tracker.total_calls(tenant.as_deref()).await?;
            print_json(&serde_json::json!({
                "rows": rows,
                "total_cost_usd": total_cost,
                "total_calls": total_calls,
                "today": pipeline.router().breaker().snapshot(),
            }))?;
        }
        Commands::Audit { tenant, limit } => {
            let events = pipeline
                .audit_trail(&RequestContext::new(tenant), limit)
                .await?;
            print_json(&events)?;
        }
    }

    Ok(())
}
