use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod attachments;
mod cli;
mod config;
mod lm_log;
mod model;
mod msg;
mod pipeline;
mod prompt;
mod reconcile;
mod report;
mod schema;
mod util;

use cli::{Command, ConfigAction, ExtractArgs, IngestArgs, RootArgs, RunArgs, SourceArgs};
use config::{ConfigOverrides, ReconConfig};
use lm_log::LmLog;
use pipeline::{build_run, ClaimsPipeline};
use prompt::PromptSet;
use schema::{ExtractionRun, RUN_SCHEMA_VERSION};
use util::{read_json, write_json};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            tracing::warn!(error = %err, "ignoring unreadable .env file");
        }
    }

    let config_path = args.config.as_deref();
    match args.command {
        Command::Ingest(ingest) => cmd_ingest(config_path, ingest),
        Command::Extract(extract) => cmd_extract(config_path, extract),
        Command::Report(run) => cmd_report(run),
        Command::Exceptions(run) => cmd_exceptions(run),
        Command::Config(config) => cmd_config(config_path, config.action),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// File, then environment, then CLI overrides. Not validated.
fn effective_config(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<ReconConfig> {
    let path = config::resolve_config_path(explicit)?;
    let mut config = config::load_config(&path)?;
    config::apply_env(&mut config, |key| std::env::var(key).ok())?;
    config::apply_overrides(&mut config, overrides);
    Ok(config)
}

fn source_overrides(source: &SourceArgs) -> ConfigOverrides {
    ConfigOverrides {
        attachment_pattern: source.pattern.clone(),
        ..ConfigOverrides::default()
    }
}

fn cmd_ingest(config_path: Option<&Path>, args: IngestArgs) -> Result<()> {
    let config = effective_config(config_path, &source_overrides(&args.source))?;
    config::validate_source_config(&config)?;
    let filter = config::attachment_filter(&config)?;
    let mut pipeline = ClaimsPipeline::new(filter, PromptSet::bundled());
    let summary = pipeline.ingest_file(&args.source.msg)?;

    let mut saved = Vec::new();
    if let Some(dir) = &args.save_dir {
        saved = save_attachments(dir, pipeline.attachments())?;
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serialize ingest summary")?
        );
        return Ok(());
    }

    println!("Received: {}", args.source.msg.display());
    if let Some(subject) = pipeline.subject() {
        println!("Subject: {subject}");
    }
    if summary.attachment_count == 0 {
        println!("No {} attachments found in the message.", config.attachment_pattern);
        return Ok(());
    }
    println!("Found {} matching attachment(s):", summary.attachment_count);
    for name in &summary.attachment_names {
        println!("  {name}");
    }
    for path in saved {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn save_attachments(dir: &Path, attachments: &[msg::Attachment]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut written = Vec::new();
    for (index, attachment) in attachments.iter().enumerate() {
        // Attachment names come from the sender; keep only the final component.
        let file_name = Path::new(&attachment.name)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| format!("attachment-{}", index + 1).into());
        let path = dir.join(file_name);
        fs::write(&path, &attachment.data).with_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn cmd_extract(config_path: Option<&Path>, args: ExtractArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        backend: args.backend,
        model: args.model.clone(),
        lm_command: args.lm.clone(),
        attachment_pattern: args.source.pattern.clone(),
    };
    let config = effective_config(config_path, &overrides)?;
    config::validate_config(&config)?;

    let prompts = PromptSet::from_config(&config)?;
    let filter = config::attachment_filter(&config)?;
    let mut pipeline = ClaimsPipeline::new(filter, prompts)
        .with_max_parse_retries(config.max_parse_retries)
        .with_lm_log(config.lm_log_path.clone().map(LmLog::new));

    let summary = pipeline.ingest_file(&args.source.msg)?;
    if summary.attachment_count == 0 {
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("serialize ingest summary")?
            );
        } else {
            println!(
                "No {} attachments found in {}.",
                config.attachment_pattern,
                args.source.msg.display()
            );
        }
        return Ok(());
    }
    if !args.json {
        println!("Extracting data from {} attachment(s)", summary.attachment_count);
    }

    let model = model::build_model(&config, |key| std::env::var(key).ok())?;
    let records = pipeline.process(model.as_ref());
    let run = build_run(&args.source.msg, pipeline.subject(), &model.label(), records);

    if let Some(out) = &args.out {
        write_json(out, &run)?;
        tracing::info!(path = %out.display(), "run written");
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("serialize run")?
        );
        return Ok(());
    }

    for (index, record) in run.records.iter().enumerate() {
        println!();
        print!("{}", report::render_record_text(index, record));
    }
    println!();
    print!(
        "{}",
        report::render_exceptions_text(&report::exception_queue(&run.records))
    );
    if let Some(out) = &args.out {
        println!("Wrote run to {}", out.display());
    }
    Ok(())
}

fn load_run(path: &Path) -> Result<ExtractionRun> {
    let run: ExtractionRun = read_json(path)?;
    if run.schema_version != RUN_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported run schema_version {} in {}",
            run.schema_version,
            path.display()
        ));
    }
    Ok(run)
}

fn cmd_report(args: RunArgs) -> Result<()> {
    let run = load_run(&args.run)?;
    let report = report::build_report(&run);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print!("{}", report::render_report_text(&report));
    }
    Ok(())
}

fn cmd_exceptions(args: RunArgs) -> Result<()> {
    let run = load_run(&args.run)?;
    let exceptions = report::exception_queue(&run.records);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&exceptions).context("serialize exceptions")?
        );
    } else {
        print!("{}", report::render_exceptions_text(&exceptions));
    }
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    let path = config::resolve_config_path(config_path)?;
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(anyhow!(
                    "config already exists at {} (use --force to overwrite)",
                    path.display()
                ));
            }
            config::write_config(&path, &config::default_config())?;
            println!("Wrote config to {}", path.display());
        }
        ConfigAction::Show => {
            let config = effective_config(config_path, &ConfigOverrides::default())?;
            println!("# {}", path.display());
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("serialize config")?
            );
        }
    }
    Ok(())
}
