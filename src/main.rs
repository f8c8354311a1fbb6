use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, Timelike};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use deskclock::alarm::model::{AlarmDraft, AlarmId, AlarmPatch, format_repeat};
use deskclock::app::{ClockApp, Collaborators};
use deskclock::headless::{LoggingPopupHost, LoggingPowerBlocker, SilentAudio, StdoutNotifier};
use deskclock::notify::{PopupAction, PopupActionKind, RingId};
use deskclock::platform::{CapabilityTier, PlatformCapabilities, SoundFileStore};
use deskclock::settings::StoredSettings;
use deskclock::sound::{FsSoundStore, SoundPayload};
use deskclock::stopwatch::format_elapsed;
use deskclock::store::{JsonFileStore, KeyValueStore};
use deskclock::timer::model::format_countdown;

#[derive(Parser, Debug)]
#[command(
    name = "deskclock",
    version,
    about = "Alarms, countdown timer and stopwatch with persistent state"
)]
struct Cli {
    /// Directory holding the JSON state files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Behave like the native shell: file-backed sounds, 20 sound slots and
    /// keep-awake support.
    #[arg(long, global = true)]
    native: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand)]
    Alarm(AlarmCommand),
    #[command(subcommand)]
    Timer(TimerCommand),
    #[command(subcommand)]
    Stopwatch(StopwatchCommand),
    #[command(subcommand)]
    Sound(SoundCommand),
    /// Clocks for other time zones.
    #[command(subcommand)]
    World(WorldCommand),
    /// Show or set the alarm volume (0.0 to 1.0).
    Volume { value: Option<f32> },
    /// Show all settings, or set one (`value` is JSON, bare words are strings).
    Settings {
        key: Option<String>,
        value: Option<String>,
    },
    /// Drive the 1 Hz loop. Popup actions are read from stdin as
    /// `stop <id>` or `snooze <id>`, where id is an alarm id or `timer`.
    Run {
        #[arg(long)]
        ticks: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum AlarmCommand {
    Add(AlarmAddArgs),
    /// Change fields of an existing alarm.
    Edit(AlarmEditArgs),
    List,
    Toggle { id: AlarmId },
    Delete { id: AlarmId },
    Snooze { id: AlarmId },
}

#[derive(Args, Debug)]
struct AlarmAddArgs {
    /// Local wall-clock time as HH:MM.
    time: String,
    #[arg(long)]
    label: Option<String>,
    /// Weekdays to repeat on, 0 (Sunday) through 6, comma separated.
    #[arg(long, value_delimiter = ',')]
    repeat: Vec<u8>,
    #[arg(long)]
    sound: Option<String>,
    #[arg(long)]
    no_snooze: bool,
    #[arg(long)]
    snooze_minutes: Option<u32>,
}

#[derive(Args, Debug)]
struct AlarmEditArgs {
    id: AlarmId,
    #[arg(long)]
    time: Option<String>,
    #[arg(long)]
    label: Option<String>,
    #[arg(long, value_delimiter = ',')]
    repeat: Option<Vec<u8>>,
    #[arg(long)]
    sound: Option<String>,
    #[arg(long)]
    snooze: Option<bool>,
    #[arg(long)]
    snooze_minutes: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum TimerCommand {
    Start {
        hours: u32,
        minutes: u32,
        seconds: u32,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "default")]
        sound: String,
    },
    Pause,
    Resume,
    Cancel,
    Repeat,
    Status,
    Recents,
    /// Remove an entry from the recent timers.
    Forget { id: String },
}

#[derive(Subcommand, Debug)]
enum StopwatchCommand {
    Start,
    Stop,
    Lap,
    Reset,
    Status,
}

#[derive(Subcommand, Debug)]
enum SoundCommand {
    Add {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    List,
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum WorldCommand {
    /// Add an IANA zone such as `Europe/London`.
    Add {
        zone: String,
        #[arg(long)]
        label: Option<String>,
    },
    List,
    /// Remove the clock at a position shown by `list` (starting at 1).
    Remove { position: usize },
}

fn main() {
    if let Err(err) = simple_file_logger::init_logger!("deskclock") {
        eprintln!("warning: file logging unavailable: {err:?}");
    }
    if let Err(err) = run() {
        log::error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let mut app = build_app(data_dir, cli.native)?;

    match cli.command {
        Command::Alarm(command) => alarm_command(&mut app, command),
        Command::Timer(command) => timer_command(&mut app, command),
        Command::Stopwatch(command) => stopwatch_command(&mut app, command),
        Command::Sound(command) => sound_command(&mut app, command),
        Command::World(command) => world_command(&mut app, command),
        Command::Volume { value } => {
            let volume = match value {
                Some(value) => app.sounds_mut().set_volume(value),
                None => app.sounds().volume(),
            };
            println!("volume {volume:.2}");
            Ok(())
        }
        Command::Settings { key, value } => settings_command(&mut app, key, value),
        Command::Run { ticks } => run_loop(&mut app, ticks),
    }
}

fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "deskclock")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("no home directory found, pass --data-dir"))
}

fn build_app(data_dir: PathBuf, native: bool) -> Result<ClockApp> {
    let store = JsonFileStore::open(&data_dir)
        .with_context(|| format!("failed to open data dir {}", data_dir.display()))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    let tier = if native {
        CapabilityTier::Native
    } else {
        CapabilityTier::Browser
    };
    let sound_files: Option<Box<dyn SoundFileStore>> = if native {
        Some(Box::new(FsSoundStore::open(data_dir.join("sounds"))?))
    } else {
        None
    };

    Ok(ClockApp::new(
        Collaborators {
            store: store.clone(),
            settings: Arc::new(StoredSettings::new(store)),
            capabilities: PlatformCapabilities::for_tier(tier),
            audio: Box::new(SilentAudio::default()),
            system_notifier: Box::new(StdoutNotifier),
            popup: Box::new(LoggingPopupHost::default()),
            power: Some(Box::new(LoggingPowerBlocker::default())),
            sound_files,
        },
        Local::now(),
    ))
}

fn alarm_command(app: &mut ClockApp, command: AlarmCommand) -> Result<()> {
    let now = Local::now();
    match command {
        AlarmCommand::Add(args) => {
            let draft = AlarmDraft {
                label: args.label,
                repeat: args.repeat,
                sound: args.sound,
                snooze_enabled: Some(!args.no_snooze),
                snooze_interval: args.snooze_minutes,
                ..AlarmDraft::at(args.time)
            };
            let alarm = app.alarms_mut().add_alarm(draft, now)?;
            println!(
                "added alarm {} at {} ({})",
                alarm.id,
                alarm.time,
                format_repeat(&alarm.repeat)
            );
        }
        AlarmCommand::Edit(args) => {
            let patch = AlarmPatch {
                time: args.time,
                label: args.label,
                repeat: args.repeat,
                sound: args.sound,
                snooze_enabled: args.snooze,
                snooze_interval: args.snooze_minutes,
                enabled: None,
            };
            let alarm = app.alarms_mut().update_alarm(args.id, patch)?;
            println!("updated alarm {} at {}", alarm.id, alarm.time);
        }
        AlarmCommand::List => {
            let alarms = app.alarms();
            if alarms.is_empty() {
                println!("no alarms");
            }
            for alarm in alarms.alarms() {
                let snooze = alarms
                    .snoozed()
                    .get(&alarm.id)
                    .map(|until| format!("  snoozed until {until}"))
                    .unwrap_or_default();
                println!(
                    "{}  {}  {}  {}  {}{snooze}",
                    alarm.id,
                    alarm.time,
                    if alarm.enabled { "on " } else { "off" },
                    alarm.label,
                    format_repeat(&alarm.repeat)
                );
            }
        }
        AlarmCommand::Toggle { id } => {
            let enabled = app.alarms_mut().toggle_alarm(id)?;
            println!(
                "alarm {id} {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        AlarmCommand::Delete { id } => {
            let alarm = app.alarms_mut().delete_alarm(id)?;
            println!("deleted alarm {} ({})", alarm.id, alarm.label);
        }
        AlarmCommand::Snooze { id } => {
            let until = app.snooze_alarm(id, now)?;
            println!("alarm {id} snoozed until {until}");
        }
    }
    Ok(())
}

fn timer_command(app: &mut ClockApp, command: TimerCommand) -> Result<()> {
    let now = Local::now();
    match command {
        TimerCommand::Start {
            hours,
            minutes,
            seconds,
            label,
            sound,
        } => {
            let snapshot = app.start_timer(hours, minutes, seconds, &label, &sound, now)?;
            println!(
                "timer started for {}",
                format_countdown(snapshot.total_seconds)
            );
        }
        TimerCommand::Pause => {
            if !app.timer_mut().pause(now) {
                bail!("timer is not running");
            }
            println!("timer paused");
        }
        TimerCommand::Resume => {
            if !app.timer_mut().resume(now) {
                bail!("timer is not paused");
            }
            println!("timer resumed");
        }
        TimerCommand::Cancel => {
            app.cancel_timer(now);
            println!("timer cancelled");
        }
        TimerCommand::Repeat => {
            let snapshot = app.repeat_timer(now)?;
            println!(
                "timer restarted for {}",
                format_countdown(snapshot.total_seconds)
            );
        }
        TimerCommand::Status => {
            let snapshot = app.timer().snapshot();
            println!(
                "{:?} {} of {}{}",
                snapshot.phase,
                format_countdown(snapshot.remaining_seconds),
                format_countdown(snapshot.total_seconds),
                if snapshot.label.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", snapshot.label)
                }
            );
        }
        TimerCommand::Recents => {
            let timer = app.timer();
            if timer.recents().is_empty() {
                println!("no recent timers");
            }
            for recent in timer.recents() {
                println!(
                    "{}  {}  {}",
                    recent.id,
                    format_countdown(recent.total_seconds()),
                    recent.label
                );
            }
        }
        TimerCommand::Forget { id } => {
            let removed = app.timer_mut().delete_recent(&id)?;
            println!("forgot recent timer {}", removed.id);
        }
    }
    Ok(())
}

fn world_command(app: &mut ClockApp, command: WorldCommand) -> Result<()> {
    let now = Local::now();
    match command {
        WorldCommand::Add { zone, label } => {
            let clock = app.world_clocks_mut().add(&zone, label.as_deref())?;
            println!(
                "added {} ({}) now {}",
                clock.label,
                clock.timezone,
                clock.current_time(now)?
            );
        }
        WorldCommand::List => {
            let clocks = app.world_clocks().clocks();
            if clocks.is_empty() {
                println!("no world clocks");
            }
            for (index, clock) in clocks.iter().enumerate() {
                println!(
                    "{}  {}  {}  {}",
                    index + 1,
                    clock.current_time(now)?,
                    clock.label,
                    clock.timezone
                );
            }
        }
        WorldCommand::Remove { position } => {
            let index = position
                .checked_sub(1)
                .ok_or_else(|| anyhow!("positions start at 1"))?;
            let clock = app.world_clocks_mut().remove(index)?;
            println!("removed {} ({})", clock.label, clock.timezone);
        }
    }
    Ok(())
}

fn stopwatch_command(app: &mut ClockApp, command: StopwatchCommand) -> Result<()> {
    let now = Local::now();
    let stopwatch = app.stopwatch_mut();
    match command {
        StopwatchCommand::Start => {
            if !stopwatch.start(now) {
                bail!("stopwatch is already running");
            }
            println!("stopwatch started");
        }
        StopwatchCommand::Stop => {
            if !stopwatch.stop(now) {
                bail!("stopwatch is not running");
            }
            println!("stopwatch stopped at {}", format_elapsed(stopwatch.elapsed_ms(now)));
        }
        StopwatchCommand::Lap => {
            let lap = stopwatch.lap(now);
            println!(
                "lap {} total {}",
                format_elapsed(lap.lap_time),
                format_elapsed(lap.total_time)
            );
        }
        StopwatchCommand::Reset => {
            stopwatch.reset();
            println!("stopwatch reset");
        }
        StopwatchCommand::Status => {
            let snapshot = stopwatch.snapshot(now);
            println!(
                "{} {}",
                if snapshot.is_running { "running" } else { "stopped" },
                format_elapsed(snapshot.elapsed_ms)
            );
            let count = snapshot.laps.len();
            for (index, lap) in snapshot.laps.iter().enumerate() {
                println!(
                    "  lap {}  {}  {}",
                    count - index,
                    format_elapsed(lap.lap_time),
                    format_elapsed(lap.total_time)
                );
            }
        }
    }
    Ok(())
}

fn sound_command(app: &mut ClockApp, command: SoundCommand) -> Result<()> {
    let sounds = app.sounds_mut();
    match command {
        SoundCommand::Add { path, name } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow!("invalid sound path {}", path.display()))?,
            };
            let sound = sounds.add_custom_sound(&name, SoundPayload::Path(path), Local::now())?;
            println!("added sound {} ({})", sound.id, sound.name);
        }
        SoundCommand::List => {
            println!("{} of {} custom sounds", sounds.custom_sounds().len(), sounds.limit());
            for sound in sounds.custom_sounds() {
                println!(
                    "{}  {}  {}",
                    sound.id,
                    sound.name,
                    if sound.is_native_file() { "file" } else { "inline" }
                );
            }
        }
        SoundCommand::Delete { id } => {
            let cleaned = sounds.delete_custom_sound(&id)?;
            if !cleaned {
                log::warn!("sound {id} removed but its file was left behind");
            }
            println!("deleted sound {id}");
        }
    }
    Ok(())
}

fn settings_command(app: &mut ClockApp, key: Option<String>, value: Option<String>) -> Result<()> {
    let settings = match (key, value) {
        (None, _) => app.settings(),
        (Some(key), Some(value)) => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            app.set_setting(&key, value)?
        }
        (Some(key), None) => bail!("missing value for setting '{key}'"),
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn run_loop(app: &mut ClockApp, ticks: Option<u64>) -> Result<()> {
    forward_stdin_actions(app.action_sender());
    let mut done = 0_u64;
    loop {
        let now = Local::now();
        let report = app.tick(now);
        for ring in &report.alarm_rings {
            println!(
                "alarm {} ringing{}: {}",
                ring.alarm.id,
                if ring.is_snooze { " (snoozed)" } else { "" },
                ring.alarm.label
            );
        }
        if let Some(finished) = &report.timer_finished {
            println!("timer finished: {}", finished.label);
        }

        done += 1;
        if ticks.is_some_and(|limit| done >= limit) {
            return Ok(());
        }
        let to_next_second = 1_000 - u64::from(now.nanosecond() / 1_000_000).min(999);
        thread::sleep(Duration::from_millis(to_next_second));
    }
}

/// Feeds `stop <id>` / `snooze <id>` lines from stdin into the popup
/// action channel, standing in for the popup window.
fn forward_stdin_actions(sender: Sender<PopupAction>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_action(&line) {
                Ok(action) => {
                    if sender.send(action).is_err() {
                        break;
                    }
                }
                Err(err) => eprintln!("ignored input: {err:#}"),
            }
        }
    });
}

fn parse_action(line: &str) -> Result<PopupAction> {
    let mut parts = line.split_whitespace();
    let (Some(kind), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
        bail!("expected '<stop|snooze> <id>', got '{line}'");
    };
    Ok(PopupAction {
        id: id.parse::<RingId>()?,
        kind: kind.parse::<PopupActionKind>()?,
    })
}
