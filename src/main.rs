mod alarm;
mod clock;
mod domain;
mod error;
mod export;
mod journal;
mod persistence;
mod playback;
mod store;
mod timer;

use alarm::{AlarmScheduler, FireOutcome, TokioTimer};
use anyhow::Result;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use clock::{unix_to_local, Clock, SystemClock};
use domain::Task;
use error::TempoError;
use journal::GratitudeJournal;
use persistence::{
    ensure_data_dir, gratitude_file, init_local_data_dir, load_document, save_document, tasks_file,
};
use playback::{AlarmSink, DesktopSink};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use store::TaskStore;
use timer::{format_hms, TimerEngine};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Periodic autosave cadence for `tempo watch`.
const AUTOSAVE_INTERVAL_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Task manager with nested subtasks, per-task timers, and scheduled alarms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory override (default: nearest .tempo, else ~/.tempo)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Shift the clock by this many seconds (testing aid)
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        default_value_t = 0.0,
        allow_negative_numbers = true
    )]
    time_offset: f64,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a local .tempo directory in the current directory
    Init,
    /// Add a task, top-level or nested under a parent
    Add {
        #[arg(required = true)]
        title: Vec<String>,
        /// Parent task path (e.g. 2 or 2.1) to nest under
        #[arg(long)]
        under: Option<String>,
        /// 1-based position among siblings (default: end)
        #[arg(long)]
        position: Option<usize>,
    },
    /// Print the task tree
    List,
    /// Rename a task, keeping its title history
    Rename {
        path: String,
        #[arg(required = true)]
        title: Vec<String>,
    },
    /// Reorder a top-level task
    Move {
        /// 1-based task position
        index: usize,
        /// Swap with the neighbor above or below
        direction: Option<MoveDirection>,
        /// Move to this 1-based position instead
        #[arg(long, conflicts_with = "direction")]
        to: Option<usize>,
    },
    /// Toggle completion on a task (stops its running timer)
    Complete { path: String },
    /// Delete a task and its whole subtree
    Delete { path: String },
    /// Fold or unfold a task's subtasks in listings
    Subtask { path: String },
    /// Toggle a task's Todoist sync flag
    Flag { path: String },
    /// Task timers
    Timer {
        #[command(subcommand)]
        command: TimerCommands,
    },
    /// Task alarms
    Alarm {
        #[command(subcommand)]
        command: AlarmCommands,
    },
    /// Attach a note to a task, or remove one with --delete
    Note {
        path: String,
        text: Vec<String>,
        /// 1-based note number to remove
        #[arg(long, value_name = "N", conflicts_with = "text")]
        delete: Option<usize>,
    },
    /// Set or clear a task's due date
    Due {
        path: String,
        /// Due date in DD-Month-YYYY form (e.g. 05-March-2026)
        date: Option<String>,
        #[arg(long, conflicts_with = "date")]
        clear: bool,
    },
    /// Gratitude journal
    Gratitude {
        #[command(subcommand)]
        command: GratitudeCommands,
    },
    /// Export sync-flagged tasks as a Todoist import CSV
    Export {
        /// Output file (default: <data dir>/todoist.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the alarm/autosave loop until Ctrl-C
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum MoveDirection {
    Up,
    Down,
}

#[derive(Subcommand)]
enum TimerCommands {
    /// Start a task's timer
    Start { path: String },
    /// Stop a task's timer, folding the elapsed time in
    Stop { path: String },
    /// Reset a task's timer to zero
    Reset { path: String },
    /// Show a task's current timer value
    Show { path: String },
}

#[derive(Subcommand)]
enum AlarmCommands {
    /// Schedule an alarm on a task
    Set {
        path: String,
        /// +SECONDS, HH:MM, or "YYYY-MM-DD HH:MM"
        time: String,
        /// Sound file to play when it fires
        sound: PathBuf,
    },
    /// List alarms, for one task or the whole tree
    List { path: Option<String> },
    /// Dismiss a fired (or pending) alarm
    Dismiss { path: String, alarm_id: String },
    /// Delete an alarm record
    Delete { path: String, alarm_id: String },
}

#[derive(Subcommand)]
enum GratitudeCommands {
    /// Add a gratitude note for today
    Add {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Show gratitude notes, all days or one date
    Show {
        /// Day to show (YYYY-MM-DD)
        date: Option<String>,
    },
}

fn setup_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Init => {
            let dir = init_local_data_dir()?;
            println!("Initialized tempo directory: {}", dir.display());
            println!();
            println!("Tempo will now use this local directory for task storage.");
            println!("Run 'tempo watch' to arm alarms and autosave.");
            Ok(())
        }
        command => {
            let data_dir = ensure_data_dir(cli.dir.as_deref())?;
            run(command, &data_dir, cli.time_offset).await
        }
    }
}

async fn run(command: Commands, data_dir: &Path, time_offset: f64) -> Result<()> {
    match command {
        Commands::Watch => watch(data_dir, time_offset).await,
        Commands::Gratitude { command } => gratitude(command, data_dir, time_offset),
        command => one_shot(command, data_dir, time_offset),
    }
}

fn shifted_clock(offset_secs: f64) -> SystemClock {
    let mut clock = SystemClock::new();
    clock.set_manual_offset(offset_secs);
    clock
}

/// Load, apply one mutation (or query), and save if anything changed.
/// Timer reconciliation runs on every load so a crash-recovered offset is
/// folded in and persisted no matter which command triggered the load.
fn one_shot(command: Commands, data_dir: &Path, time_offset: f64) -> Result<()> {
    let clock = shifted_clock(time_offset);
    let tasks_path = tasks_file(data_dir);
    let (tasks, metadata) = load_document(&tasks_path, &clock);
    let mut store = TaskStore::from_parts(tasks, metadata);
    let engine = TimerEngine::new(clock.clone());
    engine.reconcile_on_load(&mut store);

    match command {
        Commands::Add { title, under, position } => {
            let parent = match under {
                Some(ref raw) => parse_path(raw)?,
                None => Vec::new(),
            };
            let title = title.join(" ");
            let position = position.map_or(usize::MAX, |p| p.saturating_sub(1));
            store.add_task(&title, &parent, position, &clock)?;
            println!("Added '{}'", title.trim());
        }
        Commands::List => {
            if store.tasks.is_empty() {
                println!("No tasks yet. Add one with 'tempo add <title>'.");
            } else {
                print_tree(&store.tasks, "", &clock);
            }
        }
        Commands::Rename { path, title } => {
            let title = title.join(" ");
            store.rename_task(&parse_path(&path)?, &title, &clock)?;
            println!("Renamed to '{}'", title.trim());
        }
        Commands::Move { index, direction, to } => {
            if index == 0 {
                return Err(TempoError::InvalidInput("Positions are 1-based".into()).into());
            }
            let from = index - 1;
            match (direction, to) {
                (Some(direction), None) => {
                    let step = match direction {
                        MoveDirection::Up => -1,
                        MoveDirection::Down => 1,
                    };
                    let now_at = store.move_task(from, step)?;
                    println!("Now at position {}.", now_at + 1);
                }
                (None, Some(0)) => {
                    return Err(TempoError::InvalidInput("Positions are 1-based".into()).into());
                }
                (None, Some(to)) => {
                    let target = to - 1;
                    // insert_at_position takes the slot in the pre-removal
                    // list, so a downward move aims one past the final spot.
                    let slot = if target > from { target + 1 } else { target };
                    store.insert_at_position(from, slot)?;
                    println!("Moved to position {to}.");
                }
                _ => {
                    return Err(TempoError::InvalidInput(
                        "Give a direction (up/down) or --to <position>".into(),
                    )
                    .into());
                }
            }
        }
        Commands::Complete { path } => {
            let completed = store.toggle_completion(&parse_path(&path)?, &clock)?;
            println!("{}", if completed { "Completed." } else { "Reopened." });
        }
        Commands::Delete { path } => {
            let path = parse_path(&path)?;
            let (index, parent) = match path.split_last() {
                Some((&index, parent)) => (index, parent),
                None => return Err(TempoError::InvalidInput("Empty task path".into()).into()),
            };
            let removed = store.delete_task(parent, index)?;
            println!("Deleted '{}'", removed.title);
        }
        Commands::Subtask { path } => {
            let visible = store.toggle_subtasks_visible(&parse_path(&path)?)?;
            println!("Subtasks {}.", if visible { "shown" } else { "hidden" });
        }
        Commands::Flag { path } => {
            let flagged = store.toggle_todone(&parse_path(&path)?)?;
            println!(
                "{}",
                if flagged {
                    "Flagged for Todoist sync."
                } else {
                    "Unflagged."
                }
            );
        }
        Commands::Timer { command } => timer_command(command, &mut store, &engine)?,
        Commands::Alarm { command } => alarm_command(command, &mut store, &clock)?,
        Commands::Note { path, text, delete } => {
            let path = parse_path(&path)?;
            match delete {
                Some(0) => {
                    return Err(TempoError::InvalidInput("Note numbers are 1-based".into()).into());
                }
                Some(number) => {
                    store.delete_annotation(&path, number - 1)?;
                    println!("Note removed.");
                }
                None => {
                    store.annotate(&path, &text.join(" "), &clock)?;
                    println!("Noted.");
                }
            }
        }
        Commands::Due { path, date, clear } => {
            let path = parse_path(&path)?;
            if clear {
                store.set_due_date(&path, None)?;
                println!("Due date cleared.");
            } else {
                let date = date.ok_or_else(|| {
                    TempoError::InvalidInput("Provide a date (DD-Month-YYYY) or --clear".into())
                })?;
                store.set_due_date(&path, Some(date.clone()))?;
                println!("Due {date}.");
            }
        }
        Commands::Export { output } => {
            let output = output.unwrap_or_else(|| data_dir.join("todoist.csv"));
            let count = export::write_todoist_csv(&output, &store.tasks)?;
            if count == 0 {
                println!("No tasks flagged for Todoist sync. Flag one with 'tempo flag <task>'.");
            } else {
                println!("Exported {count} task(s) to {}", output.display());
            }
        }
        // Handled before one_shot is reached.
        Commands::Init | Commands::Watch | Commands::Gratitude { .. } => {}
    }

    save_document(&tasks_path, &mut store, false)?;
    Ok(())
}

fn timer_command(
    command: TimerCommands,
    store: &mut TaskStore,
    engine: &TimerEngine<SystemClock>,
) -> Result<()> {
    match command {
        TimerCommands::Start { path } => {
            let path = parse_path(&path)?;
            ensure_exists(store, &path)?;
            engine.start(store, &path);
            println!("Timer started.");
        }
        TimerCommands::Stop { path } => {
            let path = parse_path(&path)?;
            ensure_exists(store, &path)?;
            engine.stop(store, &path);
            let total = engine.current_value(store, &path).unwrap_or_default();
            println!("Timer stopped at {}.", format_hms(total));
        }
        TimerCommands::Reset { path } => {
            let path = parse_path(&path)?;
            ensure_exists(store, &path)?;
            engine.reset(store, &path);
            println!("Timer reset.");
        }
        TimerCommands::Show { path } => {
            let path = parse_path(&path)?;
            ensure_exists(store, &path)?;
            let value = engine.current_value(store, &path).unwrap_or_default();
            let running = store
                .task_at(&path)
                .map(|t| t.timer_running)
                .unwrap_or_default();
            println!("{}{}", format_hms(value), if running { " (running)" } else { "" });
        }
    }
    Ok(())
}

fn alarm_command(command: AlarmCommands, store: &mut TaskStore, clock: &SystemClock) -> Result<()> {
    // One-shot invocations hold no live callbacks; arming here validates
    // and persists the record, and `tempo watch` re-arms it from disk.
    let (events, _rx) = mpsc::unbounded_channel();
    let mut scheduler = AlarmScheduler::new(clock.clone(), Box::new(TokioTimer::new(events)));

    match command {
        AlarmCommands::Set { path, time, sound } => {
            let path = parse_path(&path)?;
            let target = parse_alarm_time(&time, clock)?;
            let alarm_id = scheduler.create_alarm(store, &path, target, &sound)?;
            println!(
                "Alarm {} set for {}. Run 'tempo watch' so it can ring.",
                alarm_id,
                unix_to_local(target).format("%Y-%m-%d %H:%M:%S")
            );
        }
        AlarmCommands::List { path } => {
            let count = match path {
                Some(ref raw) => {
                    let path = parse_path(raw)?;
                    ensure_exists(store, &path)?;
                    match store.task_at(&path) {
                        Some(task) => print_alarms(task, raw),
                        None => 0,
                    }
                }
                None => {
                    let mut count = 0;
                    walk_alarms(&store.tasks, "", &mut count);
                    count
                }
            };
            if count == 0 {
                println!("No alarms.");
            }
        }
        AlarmCommands::Dismiss { path, alarm_id } => {
            let path = parse_path(&path)?;
            scheduler.dismiss(store, &path, &alarm_id, &mut DesktopSink::new())?;
            println!("Alarm dismissed.");
        }
        AlarmCommands::Delete { path, alarm_id } => {
            let path = parse_path(&path)?;
            if scheduler.delete_alarm(store, &path, &alarm_id)? {
                println!("Alarm deleted.");
            } else {
                println!("No alarm {alarm_id} on that task.");
            }
        }
    }
    Ok(())
}

fn gratitude(command: GratitudeCommands, data_dir: &Path, time_offset: f64) -> Result<()> {
    let path = gratitude_file(data_dir);
    let mut journal = GratitudeJournal::load(&path);

    match command {
        GratitudeCommands::Add { text } => {
            let clock = shifted_clock(time_offset);
            journal.add(&text.join(" "), &clock)?;
            journal.save(&path, false)?;
            println!("Noted.");
        }
        GratitudeCommands::Show { date } => match date {
            Some(date) => {
                let notes = journal.entries_for(&date);
                if notes.is_empty() {
                    println!("No gratitude notes on {date}.");
                }
                for note in notes {
                    println!("  - {}", note.text);
                }
            }
            None => {
                if journal.is_empty() {
                    println!("No gratitude notes yet. Add one with 'tempo gratitude add <text>'.");
                }
                for (date, notes) in journal.days() {
                    println!("{date}");
                    for note in notes {
                        println!("  - {}", note.text);
                    }
                }
            }
        },
    }
    Ok(())
}

/// Long-running host loop: fire armed alarms, take dismissals on stdin,
/// autosave, and save on Ctrl-C. While the loop runs it holds the task
/// document, so alarms are dismissed here rather than from a second
/// process; every save stays dirty-gated and a clean in-memory copy never
/// overwrites the file on disk.
async fn watch(data_dir: &Path, time_offset: f64) -> Result<()> {
    eprintln!("Using tempo directory: {}", data_dir.display());

    let clock = shifted_clock(time_offset);
    let tasks_path = tasks_file(data_dir);
    let gratitude_path = gratitude_file(data_dir);

    let (tasks, metadata) = load_document(&tasks_path, &clock);
    let mut store = TaskStore::from_parts(tasks, metadata);
    let mut journal = GratitudeJournal::load(&gratitude_path);

    let engine = TimerEngine::new(clock.clone());
    engine.reconcile_on_load(&mut store);

    let (events, mut fired) = mpsc::unbounded_channel();
    let mut scheduler = AlarmScheduler::new(clock.clone(), Box::new(TokioTimer::new(events)));
    scheduler.rearm_all_on_startup(&mut store);

    // Persist anything reconciliation or re-arming disabled.
    save_document(&tasks_path, &mut store, false)?;

    let (input_tx, mut input) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if input_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut sink = DesktopSink::new();
    let mut autosave = tokio::time::interval(Duration::from_secs(AUTOSAVE_INTERVAL_SECS));
    autosave.tick().await; // the first tick completes immediately

    println!(
        "Watching {} task(s), {} armed alarm(s). Ctrl-C to save and exit.",
        store.tasks.len(),
        scheduler.scheduled_count()
    );

    loop {
        tokio::select! {
            Some(event) = fired.recv() => {
                let outcome = scheduler.fire(&mut store, &event, &mut sink);
                if outcome == FireOutcome::Fired {
                    if let Some(task) = store.find_by_id_mut(&event.task_id) {
                        println!(
                            "ALARM: {} (type 'dismiss {}' to silence)",
                            task.title, event.alarm_id
                        );
                    }
                }
                save_document(&tasks_path, &mut store, false)?;
            }
            Some(line) = input.recv() => {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some("dismiss"), Some(alarm_id)) => {
                        match dismiss_by_id(&mut store, &mut scheduler, &mut sink, alarm_id) {
                            Ok(()) => {
                                save_document(&tasks_path, &mut store, false)?;
                                println!("Alarm {alarm_id} dismissed.");
                            }
                            Err(e) => eprintln!("{e}"),
                        }
                    }
                    (None, _) => {}
                    _ => eprintln!("Commands here: dismiss <alarm-id>"),
                }
            }
            _ = autosave.tick() => {
                if save_document(&tasks_path, &mut store, false)? {
                    debug!("Autosaved tasks");
                }
                journal.save(&gratitude_path, false)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let saved = save_document(&tasks_path, &mut store, false)?;
    let saved = journal.save(&gratitude_path, false)? || saved;
    println!("{}", if saved { "Saved. Bye." } else { "Bye." });
    Ok(())
}

/// Dismiss an alarm addressed by id alone, as typed into the watch loop.
fn dismiss_by_id<C: Clock>(
    store: &mut TaskStore,
    scheduler: &mut AlarmScheduler<C>,
    sink: &mut dyn AlarmSink,
    alarm_id: &str,
) -> error::Result<()> {
    let path = find_alarm_path(&store.tasks, alarm_id)
        .ok_or_else(|| TempoError::InvalidInput(format!("No alarm {alarm_id}")))?;
    scheduler.dismiss(store, &path, alarm_id, sink)
}

/// Locate the path of the task owning an alarm id anywhere in the tree.
fn find_alarm_path(tasks: &[Task], alarm_id: &str) -> Option<Vec<usize>> {
    for (i, task) in tasks.iter().enumerate() {
        if task.find_alarm(alarm_id).is_some() {
            return Some(vec![i]);
        }
        if let Some(mut rest) = find_alarm_path(&task.subtasks, alarm_id) {
            let mut path = vec![i];
            path.append(&mut rest);
            return Some(path);
        }
    }
    None
}

/// Parse a 1-based dotted task path ("2" or "2.1.3") into 0-based indices.
fn parse_path(raw: &str) -> error::Result<Vec<usize>> {
    raw.split('.')
        .map(|part| match part.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(TempoError::InvalidInput(format!(
                "Invalid task path '{raw}' (expected 1-based indices like 2 or 2.1)"
            ))),
        })
        .collect()
}

/// Resolve an alarm time argument: `+SECONDS` from now, `HH:MM[:SS]` today,
/// or a full `YYYY-MM-DD HH:MM[:SS]` local datetime.
fn parse_alarm_time(raw: &str, clock: &dyn Clock) -> error::Result<f64> {
    let raw = raw.trim();
    let invalid = || {
        TempoError::InvalidInput(format!(
            "Invalid alarm time '{raw}' (use +SECONDS, HH:MM, or YYYY-MM-DD HH:MM)"
        ))
    };

    if let Some(offset) = raw.strip_prefix('+') {
        let secs: f64 = offset.trim().parse().map_err(|_| invalid())?;
        // f64 parsing accepts "NaN" and "inf", which are not alarm times.
        if !secs.is_finite() {
            return Err(invalid());
        }
        return Ok(clock.now_unix() + secs);
    }

    let naive = if raw.contains(' ') {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
            .map_err(|_| invalid())?
    } else {
        let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|_| invalid())?;
        clock.today().and_time(time)
    };
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(invalid)?;
    Ok(local.timestamp_millis() as f64 / 1000.0)
}

fn ensure_exists(store: &TaskStore, path: &[usize]) -> error::Result<()> {
    if store.task_at(path).is_none() {
        return Err(TempoError::IndexOutOfRange {
            index: path.last().copied().unwrap_or(0),
            len: store.tasks.len(),
        });
    }
    Ok(())
}

fn print_tree(tasks: &[Task], prefix: &str, clock: &dyn Clock) {
    let now = clock.now_unix();
    for (i, task) in tasks.iter().enumerate() {
        let label = if prefix.is_empty() {
            (i + 1).to_string()
        } else {
            format!("{prefix}.{}", i + 1)
        };
        let indent = "  ".repeat(label.matches('.').count());

        let mut line = format!(
            "{}{} [{}] {}",
            indent,
            label,
            if task.completed { "x" } else { " " },
            task.title
        );
        let elapsed = task.current_timer_value(now);
        if task.timer_running {
            line.push_str(&format!("  {} (running)", format_hms(elapsed)));
        } else if elapsed > 0.0 {
            line.push_str(&format!("  {}", format_hms(elapsed)));
        }
        if let Some(ref due) = task.due_date {
            line.push_str(&format!("  due {due}"));
        }
        if !task.alarms.is_empty() {
            line.push_str(&format!("  [{} alarm(s)]", task.alarms.len()));
        }
        if task.todone {
            line.push_str("  (sync)");
        }
        println!("{line}");

        if task.subtasks_visible {
            print_tree(&task.subtasks, &label, clock);
        } else if !task.subtasks.is_empty() {
            println!("{}  ... {} hidden subtask(s)", indent, task.subtasks.len());
        }
    }
}

fn print_alarms(task: &Task, label: &str) -> usize {
    for alarm in &task.alarms {
        println!(
            "{}  {}  {}  [{}]",
            label,
            unix_to_local(alarm.target_timestamp_unix).format("%Y-%m-%d %H:%M:%S"),
            alarm.id,
            if alarm.enabled { "on" } else { "off" }
        );
    }
    task.alarms.len()
}

fn walk_alarms(tasks: &[Task], prefix: &str, count: &mut usize) {
    for (i, task) in tasks.iter().enumerate() {
        let label = if prefix.is_empty() {
            (i + 1).to_string()
        } else {
            format!("{prefix}.{}", i + 1)
        };
        *count += print_alarms(task, &label);
        walk_alarms(&task.subtasks, &label, count);
    }
}
