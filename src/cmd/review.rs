//! `mentor review` - drive one submission through the pipelines.

use anyhow::{Context, Result, anyhow};
use console::style;
use dialoguer::Confirm;
use mentor::config::MentorConfig;
use mentor::pipeline::events::{EventSender, PipelineEvent};
use mentor::pipeline::loop_ctrl::LoopState;
use mentor::router::RootRouter;
use mentor::session::Submission;
use mentor::tools::FsArtifactStore;
use mentor::worker::ProcessWorker;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub async fn run(
    project_dir: &Path,
    file: &Path,
    user: &str,
    session: Option<String>,
    assume_yes: bool,
    no_fix: bool,
) -> Result<()> {
    let config = MentorConfig::load(project_dir)?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let worker = Arc::new(ProcessWorker::new(
        config.worker_cmd.clone(),
        config.worker_args.clone(),
        config.worker_model.clone(),
        config.critic_model.clone(),
        Duration::from_secs(config.worker_timeout_secs),
    ));
    let artifacts = Arc::new(FsArtifactStore::new(project_dir.join(&config.artifact_dir)));
    let state_file = project_dir.join(&config.state_file);

    // A defective stage graph refuses to start before any submission.
    let router = RootRouter::new(config, worker, artifacts)
        .map_err(|e| anyhow!("pipeline composition failed: {}", e))?;
    router.store().load_users(&state_file)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_events(rx));

    let mut submission = Submission::new(user, code);
    if let Some(session) = session {
        submission = submission.with_session(session);
    }

    let outcome = router
        .submit(submission, EventSender::new(tx.clone()), cancel.clone())
        .await?;

    println!();
    println!("{}", style("── Review feedback ──").bold());
    println!("{}", outcome.feedback);
    if let Some(score) = outcome.style_score {
        let delta = outcome
            .score_improvement
            .map(|d| format!(" ({}{} vs last submission)", if d >= 0 { "+" } else { "" }, d))
            .unwrap_or_default();
        println!("{}", style(format!("style score: {}/100{}", score, delta)).dim());
    }

    if outcome.fix_worthy && !no_fix {
        let accept = assume_yes
            || Confirm::new()
                .with_prompt("The review found fixable issues. Run the fix pipeline?")
                .default(true)
                .interact()?;
        if accept {
            let fix = router
                .run_fix(&outcome.session_id, EventSender::new(tx.clone()), cancel)
                .await?;

            println!();
            match fix.terminal {
                LoopState::Succeeded => {
                    println!("{}", style("Fix confirmed.").green().bold());
                }
                LoopState::ExhaustedPartial => {
                    println!(
                        "{}",
                        style("Attempt budget exhausted with a partial fix.").yellow()
                    );
                }
                _ => {
                    println!("{}", style("No working fix within the attempt budget.").red());
                }
            }
            if let Some(report) = fix.report {
                println!();
                println!("{}", style("── Fix report ──").bold());
                println!("{}", report);
            }
            if let (Some(original), Some(fixed)) = (fix.original_code, fix.fixed_code) {
                println!();
                println!("{}", style("── Fixed code ──").bold());
                println!("{}", fixed);
                println!(
                    "{}",
                    style(format!(
                        "({} lines before, {} lines after, {} iterations)",
                        original.lines().count(),
                        fixed.lines().count(),
                        fix.iterations.len()
                    ))
                    .dim()
                );
            }
        }
    }

    drop(tx);
    printer.await.ok();

    router.store().save_users(&state_file)?;
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PipelineStarted { pipeline, .. } => {
                println!("{}", style(format!("▶ {} pipeline", pipeline)).bold());
            }
            PipelineEvent::StageStarted { stage, .. } => {
                println!("  {} {}", style("…").dim(), stage);
            }
            PipelineEvent::StageCompleted { stage, ok, error, .. } => {
                if ok {
                    println!("  {} {}", style("✓").green(), stage);
                } else {
                    let detail = error.unwrap_or_else(|| "failed".into());
                    println!("  {} {} - {}", style("✗").red(), stage, detail);
                }
            }
            PipelineEvent::IterationStarted { index, max } => {
                println!(
                    "{}",
                    style(format!("  iteration {}/{}", index + 1, max)).cyan()
                );
            }
            PipelineEvent::IterationCompleted {
                verdict, escalated, ..
            } => {
                let note = if escalated { " (exit signalled)" } else { "" };
                println!("{}", style(format!("  verdict: {}{}", verdict, note)).dim());
            }
            PipelineEvent::ReviewCompleted { fix_worthy, .. } => {
                if fix_worthy {
                    println!("{}", style("review complete - fixable issues found").yellow());
                } else {
                    println!("{}", style("review complete - looks good").green());
                }
            }
            PipelineEvent::FixCompleted { terminal, .. } => {
                println!("{}", style(format!("fix pipeline finished: {}", terminal)).dim());
            }
        }
    }
}
