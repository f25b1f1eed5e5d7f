use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use planner_sync::calendar::{self, QuarterRef};
use planner_sync::config::Config;
use planner_sync::planner::{
  mutations, DailyParams, HttpAccessor, JournalEntry, TaskStatus, WeeklyParams,
};
use planner_sync::queue::SqliteQueueStorage;
use planner_sync::schedule::{format_elapsed, ElapsedTimer, ScheduledTask, SystemClock};
use planner_sync::sync::{SubmitOutcome, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "planner-sync")]
#[command(about = "Sync client for Better Planner: cached reads, offline writes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/planner-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the ISO week of a date
  Week {
    /// Date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,
  },
  /// Show the week window of a quarter
  Quarter {
    /// Quarter as YYYY-QN, defaults to the current one
    #[arg(long)]
    q: Option<String>,
  },
  /// Print the weekly sync bundle
  Weekly {
    /// Quarter as YYYY-QN, defaults to the current one
    #[arg(long)]
    q: Option<String>,
    /// Week number, defaults to the current week clamped to the quarter
    #[arg(long)]
    week: Option<u32>,
  },
  /// Print the daily sync bundle
  Daily {
    #[arg(long)]
    date: Option<NaiveDate>,
  },
  /// Set a task's status
  Status {
    task_id: String,
    /// TODO, IN_PROGRESS or DONE
    status: TaskStatus,
    /// Queue the write instead of sending it
    #[arg(long)]
    offline: bool,
  },
  /// Save the journal entry of a day
  Journal {
    date: NaiveDate,
    text: String,
    #[arg(long)]
    offline: bool,
  },
  /// Time a task until Ctrl-C, then log the entry
  Track {
    #[arg(long)]
    task: Option<String>,
    #[arg(long)]
    offline: bool,
  },
  /// List queued offline writes
  Pending,
  /// Replay queued offline writes
  Drain,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let today = Local::now().date_naive();

  // Pure calendar commands need no configuration
  match &args.command {
    Command::Week { date } => return show_week(date.unwrap_or(today)),
    Command::Quarter { q } => return show_quarter(calendar::parse_q_param(q.as_deref(), today)),
    _ => {}
  }

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = planner_sync::logging::init(&config.log)?;

  let accessor = Arc::new(HttpAccessor::new(&config)?);
  let storage = Arc::new(SqliteQueueStorage::open_at(&config.queue_path()?)?);
  let ctx = SyncContext::init(config.sync_config(), accessor, storage)?;

  let result = run(&ctx, args.command, today).await;
  ctx.dispose();
  result
}

async fn run(ctx: &SyncContext<HttpAccessor>, command: Command, today: NaiveDate) -> Result<()> {
  match command {
    Command::Week { .. } | Command::Quarter { .. } => Ok(()),
    Command::Weekly { q, week } => {
      let quarter = calendar::parse_q_param(q.as_deref(), today);
      let window = quarter
        .window()
        .ok_or_else(|| eyre!("No week window for {}", quarter))?;
      let week = window.clamp_week(week.unwrap_or_else(|| calendar::week_of_year(today)));

      let state = ctx.weekly(Some(WeeklyParams { quarter, week })).load().await;
      if let Some(err) = state.error {
        return Err(eyre!("Failed to load weekly sync: {}", err));
      }
      println!("{} week {}", quarter, week);
      for goal in &state.data.goals {
        println!("  goal  {:>3}%  {}", goal.progress, goal.title);
      }
      for task in &state.data.tasks {
        println!("  task  {:<11}  {}  ({})", task.status, task.title, task.id);
      }
      for rule in &state.data.rules {
        println!("  rule  {}", rule.text);
      }
      Ok(())
    }
    Command::Daily { date } => {
      let date = date.unwrap_or(today);
      let state = ctx.daily(Some(DailyParams { date })).load().await;
      if let Some(err) = state.error {
        return Err(eyre!("Failed to load daily sync: {}", err));
      }
      println!("{}", date);
      for task in &state.data.tasks {
        println!("  task  {:<11}  {}  ({})", task.status, task.title, task.id);
      }
      if let Some(JournalEntry { content, .. }) = &state.data.journal {
        println!("  journal  {}", content);
      }
      let tracked: i64 = state.data.time_entries.iter().map(|e| e.duration_secs).sum();
      println!("  tracked  {}", format_elapsed(chrono::Duration::seconds(tracked)));
      Ok(())
    }
    Command::Status {
      task_id,
      status,
      offline,
    } => submit(ctx, mutations::update_task_status(&task_id, status), offline).await,
    Command::Journal {
      date,
      text,
      offline,
    } => submit(ctx, mutations::save_journal(date, &text), offline).await,
    Command::Track { task, offline } => track(ctx, task, offline).await,
    Command::Pending => {
      let pending = ctx.queue().pending()?;
      if pending.is_empty() {
        println!("Synced");
      }
      for action in pending {
        let error = action.last_error.as_deref().unwrap_or("");
        println!(
          "#{:<4} {:?} {}  queued {}  attempts {}  {}",
          action.id,
          action.mutation.kind,
          action.target(),
          action.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          action.attempts,
          error
        );
      }
      Ok(())
    }
    Command::Drain => {
      let report = ctx
        .sync_pending()
        .await
        .map_err(|e| eyre!("Failed to replay offline queue: {}", e))?;
      println!(
        "succeeded {}  failed {}  skipped {}",
        report.succeeded, report.failed, report.skipped
      );
      for failed in &report.permanently_failed {
        println!("  dropped #{} {}: {}", failed.action.id, failed.action.target(), failed.error);
      }
      println!("{}", ctx.status());
      Ok(())
    }
  }
}

fn show_week(date: NaiveDate) -> Result<()> {
  let week = calendar::week_of_year(date);
  let year = calendar::week_year(date);
  let (start, end) =
    calendar::week_range(year, week).ok_or_else(|| eyre!("No week {} in {}", week, year))?;
  println!(
    "{} is in week {} of {} (Q{}): {} .. {}",
    date,
    week,
    year,
    calendar::quarter_of_week(week),
    start.date(),
    end.date()
  );
  Ok(())
}

fn show_quarter(quarter: QuarterRef) -> Result<()> {
  let window = quarter
    .window()
    .ok_or_else(|| eyre!("No week window for {}", quarter))?;
  println!(
    "{}: weeks {}-{}, {} .. {}",
    calendar::format_q_param(quarter),
    window.start_week,
    window.end_week,
    window.start.date(),
    window.end.date()
  );
  Ok(())
}

async fn submit(
  ctx: &SyncContext<HttpAccessor>,
  mutation: planner_sync::queue::Mutation,
  offline: bool,
) -> Result<()> {
  if offline {
    ctx.events().set_online(false);
  }
  let target = mutation.target.clone();
  match ctx.submit(mutation).await {
    Ok(SubmitOutcome::Applied) => println!("{} saved", target),
    Ok(SubmitOutcome::Queued(action)) => {
      println!("{} queued as #{} ({})", target, action.id, ctx.status())
    }
    Err(err) => return Err(eyre!("Failed to save {}: {}", target, err)),
  }
  Ok(())
}

async fn track(ctx: &SyncContext<HttpAccessor>, task: Option<String>, offline: bool) -> Result<()> {
  let timer = Arc::new(std::sync::Mutex::new(ElapsedTimer::new(SystemClock)));
  let started_at = timer
    .lock()
    .map_err(|e| eyre!("Lock poisoned: {}", e))?
    .start();

  let display = Arc::clone(&timer);
  let mut ticker = ScheduledTask::new(Duration::from_secs(1), move || {
    if let Ok(timer) = display.lock() {
      eprint!("\r{}", format_elapsed(timer.elapsed()));
    }
  });
  ticker.start();

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to wait for Ctrl-C: {}", e))?;
  ticker.stop();
  let elapsed = timer.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?.stop();
  eprintln!();

  println!("tracked {}", format_elapsed(elapsed));
  submit(ctx, mutations::log_time(task.as_deref(), started_at, elapsed), offline).await
}
