//! Command runners: settings in, a connected transport, a summary out.
//!
//! Each runner returns `Ok(true)` when everything went through, `Ok(false)`
//! when the run finished but some items did not.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};
use tracing::warn;

use crate::cli::{AppContext, EtagArgs, GrabArgs, PutAllArgs, PutArgs, PutOptions, TransferAllArgs};
use crate::core::error::{PutOutcome, SyncError};
use crate::core::etag::{EtagStore, decode_etag};
use crate::core::grab::{GrabReport, grab};
use crate::core::put::{PutReport, put};
use crate::core::run::RunConfig;
use crate::infra::config::Settings;
use crate::infra::http::{HttpSettings, HttpTransport};
use crate::infra::io::ContentRoot;

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

async fn connect(settings: &Settings, node: &str) -> Result<HttpTransport> {
    HttpTransport::connect(HttpSettings {
        node: node.to_string(),
        application_key: settings.require_application_key()?.to_string(),
        token_refresh: settings.token_refresh(),
        locale: settings.locale.clone(),
        all_locales: settings.all_locales,
    })
    .await
}

fn spinner(ctx: &AppContext, message: &str) -> ProgressBar {
    if ctx.quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn run_config(settings: &Settings, node: String, options: &PutOptions) -> RunConfig {
    RunConfig::new(node)
        .concurrency(settings.concurrency)
        .update_instances(options.update_instances)
        .send_instance_config(!options.no_instance_config)
}

pub fn grab_run(args: GrabArgs, ctx: &AppContext) -> Result<bool> {
    let mut settings = ctx.settings.clone();
    if args.locale.is_some() {
        settings.locale = args.locale;
        settings.all_locales = false;
    }
    if args.all_locales {
        settings.all_locales = true;
    }

    let base = settings.base_dir()?;
    std::fs::create_dir_all(&base)
        .with_context(|| format!("Failed to create {}", base.display()))?;
    let node = settings.resolve_node(&base)?;
    let run = RunConfig::new(node).concurrency(settings.concurrency);

    let pb = spinner(ctx, &format!("Grabbing from {}", run.node));
    let report = runtime()?.block_on(async {
        let transport = connect(&settings, &run.node).await?;
        grab(&transport, &run, &base, args.clean).await
    });
    pb.finish_and_clear();
    let report = report?;

    if !ctx.quiet {
        print_grab_report(&report, ctx.no_color);
    }
    Ok(!report.has_failures())
}

pub fn put_run(args: PutArgs, ctx: &AppContext) -> Result<bool> {
    let node = ctx.settings.resolve_node(&args.path)?;
    let run = run_config(&ctx.settings, node, &args.options);
    put_with(ctx, &run, &args.path, false)
}

pub fn put_all_run(args: PutAllArgs, ctx: &AppContext) -> Result<bool> {
    let node = ctx.settings.resolve_node(&args.dir)?;
    let run = run_config(&ctx.settings, node, &args.options);
    put_with(ctx, &run, &args.dir, true)
}

/// Transfers name the destination explicitly; the recorded node is the source.
pub fn transfer_run(args: TransferAllArgs, ctx: &AppContext) -> Result<bool> {
    let node = ctx
        .settings
        .node
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or(SyncError::NoNode)?;
    let run = run_config(&ctx.settings, node, &PutOptions::default()).transfer(true);
    put_with(ctx, &run, &args.dir, true)
}

fn put_with(ctx: &AppContext, run: &RunConfig, path: &Path, recursive: bool) -> Result<bool> {
    let pb = spinner(ctx, &format!("Putting {} to {}", path.display(), run.node));
    let report = runtime()?.block_on(async {
        let transport = connect(&ctx.settings, &run.node).await?;
        put(&transport, run, path, recursive).await
    });
    pb.finish_and_clear();
    let report = report?;

    if !ctx.quiet {
        print_put_report(&report, ctx.no_color);
    }
    Ok(report.succeeded())
}

pub fn etag_run(args: EtagArgs, ctx: &AppContext) -> Result<bool> {
    let file = dunce::canonicalize(&args.file)
        .with_context(|| format!("Failed to resolve {}", args.file.display()))?;
    let root = ContentRoot::discover(&file)?;
    let rel = root.relative(&file)?;
    let etag = EtagStore::new(root)
        .read(&rel)?
        .with_context(|| format!("No etag tracked for {}", rel.display()))?;

    match decode_etag(&etag) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(e) => {
            warn!(error = %e, "etag is opaque");
            println!("{etag}");
        }
    }
    if !ctx.quiet {
        eprintln!("{}", rel.display());
    }
    Ok(true)
}

fn paint(label: &str, no_color: bool) -> String {
    if no_color {
        return label.to_string();
    }
    match label {
        "applied" => label.green().to_string(),
        "unchanged" => label.dimmed().to_string(),
        "skipped" => label.yellow().to_string(),
        "conflict" => label.magenta().to_string(),
        _ => label.red().bold().to_string(),
    }
}

#[derive(Tabled)]
struct PutRow {
    path: String,
    asset: String,
    outcome: String,
    detail: String,
}

fn detail(outcome: &PutOutcome) -> String {
    match outcome {
        PutOutcome::Applied => String::new(),
        PutOutcome::Conflict => "changed on the server since the last grab".into(),
        PutOutcome::Rejected { status, message } => format!("{status}: {message}"),
        PutOutcome::Unchanged(reason) | PutOutcome::Skipped(reason) | PutOutcome::Failed(reason) => {
            reason.clone()
        }
    }
}

fn print_put_report(report: &PutReport, no_color: bool) {
    if report.items.is_empty() {
        println!("Nothing to put");
        return;
    }
    let rows: Vec<PutRow> = report
        .items
        .iter()
        .map(|item| PutRow {
            path: item.path.display().to_string(),
            asset: item.asset.to_string(),
            outcome: paint(item.outcome.label(), no_color),
            detail: detail(&item.outcome),
        })
        .collect();
    println!("{}", Table::new(rows));

    let summary = report
        .counts()
        .into_iter()
        .map(|(label, n)| format!("{n} {}", paint(label, no_color)))
        .join(", ");
    println!("{summary}");
}

#[derive(Tabled)]
struct GrabRow {
    collection: String,
    written: usize,
    skipped: usize,
    failed: usize,
}

fn print_grab_report(report: &GrabReport, no_color: bool) {
    let rows: Vec<GrabRow> = report
        .collections
        .iter()
        .map(|c| GrabRow {
            collection: c.name.to_string(),
            written: c.tally.written,
            skipped: c.tally.skipped,
            failed: c.tally.failed,
        })
        .collect();
    println!("{}", Table::new(rows));

    let totals = report.totals();
    let mark = match (totals.failed > 0, no_color) {
        (true, true) => "incomplete".to_string(),
        (true, false) => "incomplete".red().bold().to_string(),
        (false, true) => "done".to_string(),
        (false, false) => "done".green().to_string(),
    };
    println!(
        "{mark}: {} files written, {} kept, {} failed",
        totals.written, totals.skipped, totals.failed
    );
}
