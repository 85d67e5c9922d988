mod commands;
mod handlers;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, DupesCommand, QueueCommand, ResolveArg, RootCommand, RulesCommand};
use dotenv::dotenv;
use indicatif::HumanBytes;
use progress::CliReporter;
use shelfwatch_core::duplicates::{self, DuplicateStats, ResolveAction};
use shelfwatch_core::exclusion::rules;
use shelfwatch_core::queue::Worker;
use shelfwatch_core::storage::models::{JobStatus, NewExclusionRule, ScanJob};
use shelfwatch_core::{AppConfig, Database, ScanEngine};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match shelfwatch_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Err(err) = run(command, &config) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path))?;

    if db.list_rules()?.is_empty() {
        rules::seed_defaults(&db)?;
    }
    for path in &config.root_paths {
        if db.ensure_root(path)? {
            info!("Registered watched root {}", path);
        }
    }
    Ok(db)
}

fn run(command: Commands, config: &AppConfig) -> Result<()> {
    if let Commands::PrintConfig = command {
        println!("Configuration: {:#?}", config);
        return Ok(());
    }

    let db = open_database(config)?;

    match command {
        Commands::Roots(cmd) => run_roots(&db, cmd),
        Commands::Scan { root, force } => run_scan(&db, config, root, force),
        Commands::Cancel { job_id } => {
            let job = ScanEngine::cancel(&db, job_id)?;
            println!("Scan job {} {}", job.id, "cancelled".yellow());
            Ok(())
        }
        Commands::Status => {
            match ScanEngine::status(&db)? {
                Some(job) => print_job(&job),
                None => println!("No scans yet"),
            }
            Ok(())
        }
        Commands::History { limit } => {
            for job in ScanEngine::history(&db, limit)? {
                print_job(&job);
            }
            Ok(())
        }
        Commands::Dupes(cmd) => run_dupes(&db, cmd),
        Commands::Rules(cmd) => run_rules(&db, config, cmd),
        Commands::Queue(cmd) => run_queue(&db, config, cmd),
        Commands::Worker { once } => run_worker(db, config, once),
        Commands::PrintConfig => Ok(()),
    }
}

fn run_roots(db: &Database, cmd: RootCommand) -> Result<()> {
    match cmd {
        RootCommand::List => {
            for root in db.list_roots()? {
                println!(
                    "{:>4}  {}{}{}  {}  last scanned: {}",
                    root.id,
                    root.path.bold(),
                    if root.label.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", root.label)
                    },
                    if root.is_source_of_truth {
                        " [source of truth]".cyan().to_string()
                    } else {
                        String::new()
                    },
                    if root.enabled {
                        "enabled".green()
                    } else {
                        "disabled".red()
                    },
                    root.last_scanned_at.as_deref().unwrap_or("never"),
                );
            }
        }
        RootCommand::Add { path, label } => {
            let root = db.add_root(&path, &label)?;
            println!("Added root {} ({})", root.id, root.path);
        }
        RootCommand::Remove { id } => {
            if !db.remove_root(id)? {
                bail!("root {} not found", id);
            }
            println!("Removed root {}", id);
        }
        RootCommand::Enable { id } | RootCommand::Disable { id } => {
            let enabled = matches!(cmd, RootCommand::Enable { .. });
            if !db.set_root_enabled(id, enabled)? {
                bail!("root {} not found", id);
            }
            println!("Root {} {}", id, if enabled { "enabled" } else { "disabled" });
        }
        RootCommand::SourceOfTruth { id } => {
            if !db.set_source_of_truth(Some(id))? {
                bail!("root {} not found", id);
            }
            println!("Root {} is now the source of truth", id);
        }
        RootCommand::ClearSourceOfTruth => {
            db.set_source_of_truth(None)?;
            println!("Source of truth cleared");
        }
    }
    Ok(())
}

fn run_scan(db: &Database, config: &AppConfig, root: Option<i64>, force: bool) -> Result<()> {
    // A job left live by a crashed run would block every later scan.
    db.recover_interrupted_jobs()?;

    let engine = ScanEngine::new(config.clone());
    let reporter = CliReporter::new();
    let job = engine.scan(db, root, force, &reporter)?;

    println!();
    print_job(&job);
    info!(
        "{} new, {} updated, {} duplicates, {} excluded",
        format!("{}", job.new_files).green(),
        format!("{}", job.updated_files).cyan(),
        format!("{}", job.duplicate_files).red(),
        format!("{}", job.excluded_files).yellow(),
    );
    for message in job.errors.iter().take(10) {
        warn!("{}", message);
    }
    Ok(())
}

fn print_job(job: &ScanJob) {
    let status = match job.status {
        JobStatus::Complete => job.status.to_string().green(),
        JobStatus::Failed => job.status.to_string().red(),
        JobStatus::Cancelled => job.status.to_string().yellow(),
        _ => job.status.to_string().cyan(),
    };
    println!(
        "Job {:>4}  {:<10}  {:<24}  {}/{} files ({:.0}%)  {} errors  started {}",
        job.id,
        status,
        job.phase,
        job.processed_files,
        job.total_files,
        job.progress() * 100.0,
        job.error_count,
        job.started_at.as_deref().unwrap_or("-"),
    );
}

fn run_dupes(db: &Database, cmd: DupesCommand) -> Result<()> {
    match cmd {
        DupesCommand::Groups { limit } => {
            for group in duplicates::duplicate_groups(db)?.into_iter().take(limit) {
                println!(
                    "{}  {} wasted",
                    group.fingerprint.bold(),
                    HumanBytes(group.wasted_bytes).to_string().red()
                );
                println!("  {} {}  {}", "keep".green(), group.canonical.id, group.canonical.path);
                for dupe in &group.duplicates {
                    println!("  {} {}  {}", "dupe".red(), dupe.id, dupe.path);
                }
            }
        }
        DupesCommand::Stats => {
            println!("{}", stats_summary(&duplicates::stats(db)?));
        }
        DupesCommand::Resolve { entry_id, action } => {
            let action = match action {
                ResolveArg::Keep => ResolveAction::Keep,
                ResolveArg::Remove => ResolveAction::RemoveRecord { delete_file: false },
                ResolveArg::Delete => ResolveAction::RemoveRecord { delete_file: true },
                ResolveArg::Canonical => ResolveAction::MarkCanonical,
            };
            duplicates::resolve(db, entry_id, action)?;
            println!("Resolved entry {}", entry_id);
        }
        DupesCommand::BulkDelete {
            entry_ids,
            delete_files,
        } => {
            let report = duplicates::bulk_delete(db, &entry_ids, delete_files)?;
            println!("{} entries removed", report.removed.len().to_string().green());
            for (id, message) in &report.failures {
                println!("  {} {}: {}", "failed".red(), id, message);
            }
        }
        DupesCommand::SotPreview => {
            let plan = duplicates::preview_source_of_truth(db)?;
            match &plan.source_root {
                Some(root) => println!("Source of truth: {}", root.path.bold()),
                None => println!("No source of truth set, keeping the newest copies"),
            }
            for group in &plan.groups {
                println!("{} ({:?})", group.keep.path.green(), group.reason);
                for entry in &group.remove {
                    println!("  {} {}", "remove".red(), entry.path);
                }
            }
            println!(
                "{} groups, {} entries to remove, {} reclaimed",
                plan.groups.len(),
                plan.removal_count(),
                HumanBytes(plan.reclaimed_bytes())
            );
        }
        DupesCommand::SotExecute { delete_files, yes } => {
            let prompt = if delete_files {
                "Remove duplicate records AND DELETE their files?"
            } else {
                "Remove duplicate records (files stay on disk)?"
            };
            if !yes && !prompt_confirm(prompt, Some(false))? {
                return Ok(());
            }
            let report = duplicates::execute_source_of_truth(db, delete_files)?;
            println!(
                "{} groups, {} entries removed, {} reclaimed, {} failures",
                report.groups,
                report.removed.to_string().green(),
                HumanBytes(report.reclaimed_bytes),
                report.failures.len().to_string().red()
            );
        }
    }
    Ok(())
}

fn run_rules(db: &Database, config: &AppConfig, cmd: RulesCommand) -> Result<()> {
    match cmd {
        RulesCommand::List => {
            for rule in db.list_rules()? {
                println!(
                    "{:>4}  {:>3}  {:<12} {:<28} {:>6} matched  {}{}",
                    rule.id,
                    rule.priority,
                    rule.rule_type.to_string(),
                    rule.pattern.bold(),
                    rule.files_excluded,
                    if rule.enabled {
                        "enabled".green()
                    } else {
                        "disabled".red()
                    },
                    if rule.description.is_empty() {
                        String::new()
                    } else {
                        format!("  {}", rule.description)
                    },
                );
            }
        }
        RulesCommand::Add {
            rule_type,
            pattern,
            priority,
            description,
        } => {
            let rule = rules::create_rule(
                db,
                &NewExclusionRule {
                    rule_type,
                    pattern,
                    description,
                    priority,
                    enabled: true,
                },
            )?;
            println!("Added rule {}", rule.id);
        }
        RulesCommand::Update {
            id,
            rule_type,
            pattern,
            priority,
            description,
            disabled,
        } => {
            let rule = rules::update_rule(
                db,
                id,
                &NewExclusionRule {
                    rule_type,
                    pattern,
                    description,
                    priority,
                    enabled: !disabled,
                },
            )?;
            println!("Updated rule {}", rule.id);
        }
        RulesCommand::Remove { id } => {
            rules::delete_rule(db, id)?;
            println!("Removed rule {}", id);
        }
        RulesCommand::Enable { id } | RulesCommand::Disable { id } => {
            let enabled = matches!(cmd, RulesCommand::Enable { .. });
            if !db.set_rule_enabled(id, enabled)? {
                bail!("rule {} not found", id);
            }
            println!("Rule {} {}", id, if enabled { "enabled" } else { "disabled" });
        }
        RulesCommand::Test { rule_type, pattern } => {
            let result = rules::test_rule(db, rule_type, &pattern, &config.scan)?;
            println!(
                "{} of {} files would be excluded",
                result.matched.to_string().yellow(),
                result.files_checked
            );
            for path in &result.sample {
                println!("  {}", path);
            }
        }
        RulesCommand::Seed => {
            let added = rules::seed_defaults(db)?;
            println!("{} default rules added", added);
        }
        RulesCommand::Apply => {
            let outcome = rules::apply_to_catalog(db)?;
            println!(
                "{} entries excluded, {} cleared",
                outcome.excluded.to_string().yellow(),
                outcome.cleared
            );
        }
        RulesCommand::Override { entry_id, clear } => {
            if !db.set_exclusion_override(entry_id, !clear)? {
                bail!("entry {} not found", entry_id);
            }
            println!(
                "Entry {} {}",
                entry_id,
                if clear {
                    "follows exclusion rules again"
                } else {
                    "is always included"
                }
            );
        }
    }
    Ok(())
}

fn run_queue(db: &Database, config: &AppConfig, cmd: QueueCommand) -> Result<()> {
    match cmd {
        QueueCommand::Stats => {
            let stats = db.queue_stats()?;
            println!(
                "{} pending, {} processing, {} completed, {} failed",
                stats.pending.to_string().cyan(),
                stats.processing,
                stats.completed.to_string().green(),
                stats.failed.to_string().red()
            );
            for (task, counts) in &stats.by_task {
                let counts: Vec<String> = counts
                    .iter()
                    .map(|(status, count)| format!("{}={}", status, count))
                    .collect();
                println!("  {:<10} {}", task, counts.join(" "));
            }
        }
        QueueCommand::List { status, limit } => {
            for item in db.list_queue_items(status, limit)? {
                println!(
                    "{:>6}  {:<10} p{}  {:<10} entry {}  attempts {}/{}  {}",
                    item.id,
                    item.task_type,
                    item.priority,
                    item.status.to_string(),
                    item.entry_id,
                    item.attempts,
                    item.max_attempts,
                    item.error_message.as_deref().unwrap_or(""),
                );
            }
        }
        QueueCommand::Cancel { id } => {
            db.cancel_queue_item(id)?;
            println!("Cancelled queue item {}", id);
        }
        QueueCommand::Clear { status } => {
            let cleared = db.clear_queue(status)?;
            println!("Cleared {} {} items", cleared, status);
        }
        QueueCommand::RetryFailed => {
            let retried = db.retry_failed()?;
            println!("{} failed items queued again", retried);
        }
        QueueCommand::Sweep => {
            let reset = db.reset_stuck_items(config.worker.stuck_timeout_secs)?;
            println!("{} stuck items recovered", reset);
        }
    }
    Ok(())
}

fn run_worker(db: Database, config: &AppConfig, once: bool) -> Result<()> {
    let registry = handlers::registry_from_config(&config.handlers);
    if registry.is_empty() {
        warn!("No task handlers configured; every claimed item will fail");
    }

    let worker = Worker::new(db, registry, config.worker.clone());
    if once {
        let summary = worker.tick()?;
        println!(
            "{} processed: {} completed, {} retrying, {} failed",
            summary.processed,
            summary.completed.to_string().green(),
            summary.retrying.to_string().yellow(),
            summary.failed.to_string().red()
        );
        return Ok(());
    }

    let cancel_token = worker.cancel_token();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, stopping worker after the current item...");
        cancel_token.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;

    worker.run();
    Ok(())
}

fn stats_summary(stats: &DuplicateStats) -> String {
    format!(
        "{} groups, {} duplicates, {} wasted, {} tombstones",
        stats.groups.to_string().cyan(),
        stats.duplicates.to_string().red(),
        HumanBytes(stats.wasted_bytes).to_string().red(),
        stats.tombstones
    )
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_summary_uses_binary_units() {
        colored::control::set_override(false);
        let stats = DuplicateStats {
            groups: 2,
            duplicates: 3,
            wasted_bytes: 3 * 1024 * 1024,
            tombstones: 1,
        };
        assert_eq!(
            stats_summary(&stats),
            "2 groups, 3 duplicates, 3.00 MiB wasted, 1 tombstones"
        );
    }
}
