use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;
use triage_agent::{SessionPhase, TaskRef};
use triage_github::RepoRef;
use triage_runtime::{TaskOutcome, TriageRuntime};
use triage_transport::CancelSignal;

use crate::bootstrap_helpers::ctrl_c_cancel_signal;
use crate::cli_args::{Cli, Command, TaskArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let config = cli.triage_config();
    if cli.command.needs_agent() {
        config.validate()?;
    } else {
        config.validate_settings()?;
    }
    let runtime = TriageRuntime::new(config)?;
    let cancel = ctrl_c_cancel_signal();

    match &cli.command {
        Command::List(args) => {
            let repo = RepoRef::parse(&args.repo)?;
            let issues = runtime
                .list_issues(&repo, &args.filters(), &cancel)
                .await?;
            print_json(&issues)
        }
        Command::Scope(args) => run_phase(&runtime, SessionPhase::Scoping, args, &cancel).await,
        Command::Execute(args) => {
            run_phase(&runtime, SessionPhase::Executing, args, &cancel).await
        }
        Command::Resume(args) => {
            let outcome = runtime
                .resume(&args.session_id, &args.run_options(), &cancel)
                .await?;
            report_outcome(&outcome)
        }
        Command::Status(args) => {
            let outcome = runtime.session_status(&args.session_id, &cancel).await?;
            print_json(&outcome)
        }
        Command::Message(args) => {
            runtime
                .send_message(&args.session_id, &args.text, &cancel)
                .await?;
            print_json(&serde_json::json!({
                "session_id": args.session_id,
                "sent": true,
            }))
        }
    }
}

async fn run_phase(
    runtime: &TriageRuntime,
    phase: SessionPhase,
    args: &TaskArgs,
    cancel: &CancelSignal,
) -> Result<()> {
    let task = TaskRef::new(args.repo.clone(), args.issue);
    let context = runtime.load_context(&task, phase, cancel).await?;
    let outcome = runtime
        .run_task(phase, &task, &context, &args.run_options(), cancel)
        .await?;
    report_outcome(&outcome)
}

fn report_outcome(outcome: &TaskOutcome) -> Result<()> {
    if outcome.resumable && outcome.cycles > 0 {
        warn!(
            session_id = %outcome.session_id,
            "session did not reach a terminal state; run `triage resume {}` to continue",
            outcome.session_id
        );
    }
    print_json(outcome)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").context("failed to write output")
}
