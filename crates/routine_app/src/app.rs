use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use routine_core::calendar::YearMonth;
use routine_core::clock::{parse_date, Clock, SystemClock};
use routine_core::completion::TaskScope;
use routine_core::file_store::FileStore;
use routine_core::memory_store::MemoryStore;
use routine_core::notifications::NoticeLog;
use routine_core::ordering::MoveDirection;
use routine_core::service::{DEFAULT_APP_ID, DEFAULT_PROGRESS_WINDOW_DAYS};
use routine_core::{RoutineDraft, RoutineService};
use tracing::{debug, info};

use crate::render;

const HELP: &str = "\
commands:
  today                              today's checklist
  habits                             list habits
  add-habit <name>                   add a habit
  delete-habit <id>                  delete a habit and drop it from routines
  routines                           list routines by group
  save-routine [--edit=ID] [--group=ID] [--at=HH:MM] <name> = <habit ids>
  delete-routine <id>
  group <name>                       create a routine group
  rename-group <id> <name>
  delete-group <id>                  delete a group, ungrouping its routines
  move-routine <id> up|down
  move-group <id> up|down
  toggle <habit id> [routine id]     flip today's completion
  calendar [next|prev|YYYY-MM]       month overview
  day <YYYY-MM-DD>                   detail for one date
  quit";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) app_id: String,
    pub(crate) user_id: String,
    pub(crate) progress_window_days: u32,
    pub(crate) watch: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("ROUTINE_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(app_id) = std::env::var("ROUTINE_APP_ID") {
            if !app_id.trim().is_empty() {
                config.app_id = app_id.trim().to_string();
            }
        }
        if let Ok(user_id) = std::env::var("ROUTINE_USER_ID") {
            if !user_id.trim().is_empty() {
                config.user_id = user_id.trim().to_string();
            }
        }
        if let Ok(window) = std::env::var("ROUTINE_PROGRESS_WINDOW_DAYS") {
            if let Ok(value) = window.trim().parse::<u32>() {
                if value > 0 {
                    config.progress_window_days = value;
                }
            }
        }
        if let Ok(watch) = std::env::var("ROUTINE_WATCH") {
            config.watch = parse_flag(&watch).unwrap_or(config.watch);
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("routine-data"),
            app_id: DEFAULT_APP_ID.to_string(),
            user_id: "local-user".to_string(),
            progress_window_days: DEFAULT_PROGRESS_WINDOW_DAYS,
            watch: false,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarTarget {
    Current,
    Next,
    Prev,
    Month(YearMonth),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Today,
    Habits,
    AddHabit(String),
    DeleteHabit(String),
    Routines,
    SaveRoutine {
        editing: Option<String>,
        draft: RoutineDraft,
    },
    DeleteRoutine(String),
    CreateGroup(String),
    RenameGroup {
        id: String,
        name: String,
    },
    DeleteGroup(String),
    MoveRoutine {
        id: String,
        direction: MoveDirection,
    },
    MoveGroup {
        id: String,
        direction: MoveDirection,
    },
    Toggle {
        habit_id: String,
        scope: TaskScope,
    },
    Calendar(CalendarTarget),
    Day(NaiveDate),
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();
        let command = match name {
            "today" => Command::Today,
            "habits" => Command::Habits,
            "add-habit" => Command::AddHabit(rest.to_string()),
            "delete-habit" => Command::DeleteHabit(single(&args, "delete-habit <id>")?),
            "routines" => Command::Routines,
            "save-routine" => parse_save_routine(&args)?,
            "delete-routine" => Command::DeleteRoutine(single(&args, "delete-routine <id>")?),
            "group" => {
                if rest.is_empty() {
                    bail!("usage: group <name>");
                }
                Command::CreateGroup(rest.to_string())
            }
            "rename-group" => match args.split_first() {
                Some((id, name)) if !name.is_empty() => Command::RenameGroup {
                    id: id.to_string(),
                    name: name.join(" "),
                },
                _ => bail!("usage: rename-group <id> <name>"),
            },
            "delete-group" => Command::DeleteGroup(single(&args, "delete-group <id>")?),
            "move-routine" => {
                let (id, direction) = parse_move(&args, "move-routine <id> up|down")?;
                Command::MoveRoutine { id, direction }
            }
            "move-group" => {
                let (id, direction) = parse_move(&args, "move-group <id> up|down")?;
                Command::MoveGroup { id, direction }
            }
            "toggle" => match args.as_slice() {
                [habit_id] => Command::Toggle {
                    habit_id: habit_id.to_string(),
                    scope: TaskScope::Standalone,
                },
                [habit_id, routine_id] => Command::Toggle {
                    habit_id: habit_id.to_string(),
                    scope: TaskScope::routine(*routine_id),
                },
                _ => bail!("usage: toggle <habit id> [routine id]"),
            },
            "calendar" => Command::Calendar(match args.as_slice() {
                [] => CalendarTarget::Current,
                ["next"] => CalendarTarget::Next,
                ["prev"] => CalendarTarget::Prev,
                [month] => CalendarTarget::Month(
                    month
                        .parse()
                        .map_err(|_| anyhow!("expected YYYY-MM, got `{month}`"))?,
                ),
                _ => bail!("usage: calendar [next|prev|YYYY-MM]"),
            }),
            "day" => {
                let raw = single(&args, "day <YYYY-MM-DD>")?;
                Command::Day(parse_date(&raw).ok_or_else(|| anyhow!("expected YYYY-MM-DD, got `{raw}`"))?)
            }
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command `{other}`, try `help`"),
        };
        Ok(command)
    }
}

fn single(args: &[&str], usage: &str) -> Result<String> {
    match args {
        [value] => Ok(value.to_string()),
        _ => bail!("usage: {usage}"),
    }
}

fn parse_move(args: &[&str], usage: &str) -> Result<(String, MoveDirection)> {
    match args {
        [id, direction] => {
            let direction: MoveDirection = direction.parse().map_err(|err: String| anyhow!(err))?;
            Ok((id.to_string(), direction))
        }
        _ => bail!("usage: {usage}"),
    }
}

fn parse_save_routine(args: &[&str]) -> Result<Command> {
    let mut editing = None;
    let mut draft = RoutineDraft::default();
    let mut words = Vec::new();
    for arg in args {
        if let Some(id) = arg.strip_prefix("--edit=") {
            editing = Some(id.to_string());
        } else if let Some(id) = arg.strip_prefix("--group=") {
            draft.group_id = Some(id.to_string());
        } else if let Some(time) = arg.strip_prefix("--at=") {
            draft.notification_time = Some(time.to_string());
        } else {
            words.push(*arg);
        }
    }
    let joined = words.join(" ");
    let (name, habits) = joined
        .split_once('=')
        .ok_or_else(|| anyhow!("usage: save-routine [options] <name> = <habit ids>"))?;
    draft.name = name.trim().to_string();
    draft.habit_ids = habits
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Command::SaveRoutine { editing, draft })
}

/// One user's store and service plus the state the text front end keeps between commands.
pub struct Session {
    service: RoutineService,
    store: Arc<FileStore>,
    notices: Arc<NoticeLog>,
    month: YearMonth,
}

impl Session {
    pub fn open(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store_clock = Arc::clone(&clock);
        let memory = MemoryStore::with_clock(move || store_clock.now());
        let store = Arc::new(
            FileStore::with_memory(&config.data_dir, memory)
                .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?,
        );
        if config.watch {
            store.watch().context("failed to watch data dir")?;
        }
        let notices = Arc::new(NoticeLog::new());
        let service = RoutineService::builder()
            .app_id(config.app_id.as_str())
            .user(config.user_id.as_str())
            .store(store.clone())
            .clock(Arc::clone(&clock))
            .progress_window_days(config.progress_window_days)
            .with_notification_sink(Box::new(notices.clone()))
            .on_change(|collection| debug!(?collection, "view invalidated"))
            .build()
            .context("failed to start routine service")?;
        let month = YearMonth::of(service.today());
        Ok(Self {
            service,
            store,
            notices,
            month,
        })
    }

    pub fn service(&self) -> &RoutineService {
        &self.service
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Runs one command and writes its output. Returns `false` once the user quits.
    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> Result<bool> {
        if self.service.refresh_progress_window()? {
            info!(start = %self.service.progress_window_start(), "progress window moved");
        }
        let result = self.dispatch(command, out);
        let notices = self.notices.drain();
        for notice in &notices {
            writeln!(out, "{}", render::notice(notice))?;
        }
        match result {
            Ok(keep_going) => Ok(keep_going),
            Err(err) => {
                // Failures the service already reported are not repeated.
                if notices.is_empty() {
                    writeln!(out, "error: {err:#}")?;
                }
                Ok(true)
            }
        }
    }

    fn dispatch(&mut self, command: Command, out: &mut impl Write) -> Result<bool> {
        match command {
            Command::Today => write!(out, "{}", render::day("Today", &self.service.dashboard()))?,
            Command::Habits => write!(out, "{}", render::habits(&self.service.habits()))?,
            Command::AddHabit(name) => {
                let mut input = name;
                let id = self.service.add_habit(&mut input)?;
                writeln!(out, "added habit {id}")?;
            }
            Command::DeleteHabit(id) => self.service.delete_habit(&id)?,
            Command::Routines => write!(out, "{}", render::board(&self.service.routine_board()))?,
            Command::SaveRoutine { editing, draft } => {
                let id = self.service.save_routine(&draft, editing.as_deref())?;
                writeln!(out, "routine {id}")?;
            }
            Command::DeleteRoutine(id) => self.service.delete_routine(&id)?,
            Command::CreateGroup(name) => {
                let id = self.service.create_group(&name)?;
                writeln!(out, "group {id}")?;
            }
            Command::RenameGroup { id, name } => self.service.rename_group(&id, &name)?,
            Command::DeleteGroup(id) => self.service.delete_group(&id)?,
            Command::MoveRoutine { id, direction } => {
                if self.service.move_routine(&id, direction)?.is_empty() {
                    writeln!(out, "already at the {}", edge(direction))?;
                }
            }
            Command::MoveGroup { id, direction } => {
                if self.service.move_group(&id, direction)?.is_empty() {
                    writeln!(out, "already at the {}", edge(direction))?;
                }
            }
            Command::Toggle { habit_id, scope } => {
                let done = self.service.toggle_habit(&habit_id, scope)?;
                writeln!(out, "{habit_id}: {}", if done { "done" } else { "not done" })?;
            }
            Command::Calendar(target) => {
                self.month = match target {
                    CalendarTarget::Current => self.month,
                    CalendarTarget::Next => self.month.next()?,
                    CalendarTarget::Prev => self.month.prev()?,
                    CalendarTarget::Month(month) => month,
                };
                let cells = self.service.calendar_month(self.month);
                write!(out, "{}", render::calendar(self.month, &cells))?;
            }
            Command::Day(date) => write!(out, "{}", render::day("Day", &self.service.day_detail(date)))?,
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

fn edge(direction: MoveDirection) -> &'static str {
    match direction {
        MoveDirection::Up => "top",
        MoveDirection::Down => "bottom",
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    info!(data_dir = %config.data_dir.display(), user = %config.user_id, "starting routine tracker");
    let mut session = Session::open(&config, Arc::new(SystemClock))?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    session.execute(Command::Today, &mut stdout)?;

    write!(stdout, "> ")?;
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line.context("failed to read command")?;
        if !line.trim().is_empty() {
            match line.parse::<Command>() {
                Ok(command) => {
                    if !session.execute(command, &mut stdout)? {
                        break;
                    }
                }
                Err(err) => writeln!(stdout, "{err}")?,
            }
        }
        write!(stdout, "> ")?;
        stdout.flush()?;
    }
    info!("routine tracker stopped");
    Ok(())
}
