use std::fmt;
use std::path::PathBuf;

use course_core::catalog::Catalog;
use course_core::model::{ModuleId, Progress, StepId, UserId};
use course_core::schedule::WeekSchedule;
use course_core::Error as CoreError;
use course_core::settings::{CourseSettings, CourseSettingsDraft};
use services::{
    Clock, CourseServices, LearnerSession, ModuleAccess, NavigationAction, NavigationEvent,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CATALOG: &str = include_str!("../data/modules.json");

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArg { name: &'static str },
    UnknownArg(String),
    InvalidNumber { name: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArg { name } => write!(f, "missing <{name}>"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { name, raw } => write!(f, "invalid <{name}> value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [status]                    [options]");
    eprintln!("  cargo run -p app -- locks                       [options]");
    eprintln!("  cargo run -p app -- answer   <module> <option>  [options]");
    eprintln!("  cargo run -p app -- next     <module>           [options]");
    eprintln!("  cargo run -p app -- back     <module>           [options]");
    eprintln!("  cargo run -p app -- watch    <module> <step>    [options]");
    eprintln!("  cargo run -p app -- complete <module> <step>    [options]");
    eprintln!("  cargo run -p app -- import   <progress.json>    [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>       default sqlite:dev.sqlite3");
    eprintln!("  --user <id>             default local-learner");
    eprintln!("  --catalog <path>        module catalog JSON (bundled catalog if omitted)");
    eprintln!("  --launch <rfc3339>      course launch date, default 2025-01-01T00:00:00Z");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_USER_ID, LEARN_CATALOG, LEARN_LAUNCH_DATE, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Locks,
    Answer { module: ModuleId, option: u32 },
    Next { module: ModuleId },
    Back { module: ModuleId },
    Watch { module: ModuleId, step: StepId },
    Complete { module: ModuleId, step: StepId },
    Import { path: PathBuf },
}

struct Args {
    command: Command,
    db_url: String,
    user: UserId,
    catalog: Option<PathBuf>,
    launch: Option<String>,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url);
        let mut user =
            std::env::var("LEARN_USER_ID").unwrap_or_else(|_| "local-learner".to_string());
        let mut catalog = std::env::var("LEARN_CATALOG").ok().map(PathBuf::from);
        let mut launch = std::env::var("LEARN_LAUNCH_DATE").ok();
        let mut positional = Vec::new();

        let mut args = args;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => user = require_value(&mut args, "--user")?,
                "--catalog" => catalog = Some(PathBuf::from(require_value(&mut args, "--catalog")?)),
                "--launch" => launch = Some(require_value(&mut args, "--launch")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other if other.starts_with("--") => {
                    return Err(ArgsError::UnknownArg(other.to_string()));
                }
                _ => positional.push(arg),
            }
        }

        if user.trim().is_empty() {
            return Err(ArgsError::InvalidUser { raw: user });
        }

        Ok(Self {
            command: parse_command(&positional)?,
            db_url,
            user: UserId::new(user.trim()),
            catalog,
            launch,
        })
    }
}

fn parse_command(positional: &[String]) -> Result<Command, ArgsError> {
    let Some((name, rest)) = positional.split_first() else {
        return Ok(Command::Status);
    };
    let module = || -> Result<ModuleId, ArgsError> {
        number(rest.first(), "module").map(ModuleId::new)
    };
    let step = || -> Result<StepId, ArgsError> { number(rest.get(1), "step").map(StepId::new) };

    let command = match name.as_str() {
        "status" => Command::Status,
        "locks" => Command::Locks,
        "answer" => Command::Answer {
            module: module()?,
            option: number(rest.get(1), "option")?,
        },
        "next" => Command::Next { module: module()? },
        "back" => Command::Back { module: module()? },
        "watch" => Command::Watch {
            module: module()?,
            step: step()?,
        },
        "complete" => Command::Complete {
            module: module()?,
            step: step()?,
        },
        "import" => Command::Import {
            path: rest
                .first()
                .map(PathBuf::from)
                .ok_or(ArgsError::MissingArg { name: "file" })?,
        },
        _ => return Err(ArgsError::UnknownArg(name.clone())),
    };
    Ok(command)
}

fn number(raw: Option<&String>, name: &'static str) -> Result<u32, ArgsError> {
    let raw = raw.ok_or(ArgsError::MissingArg { name })?;
    raw.parse().map_err(|_| ArgsError::InvalidNumber {
        name,
        raw: raw.clone(),
    })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn load_catalog(path: Option<&PathBuf>) -> Result<Catalog, Box<dyn std::error::Error>> {
    let json = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading catalog");
            std::fs::read_to_string(path)?
        }
        None => DEFAULT_CATALOG.to_string(),
    };
    Ok(Catalog::from_json(&json).map_err(CoreError::from)?)
}

fn course_settings(catalog: &Catalog, launch: Option<&str>) -> Result<CourseSettings, CoreError> {
    let mut draft = CourseSettingsDraft::new();
    draft.total_modules = Some(catalog.total_modules());
    if let Some(raw) = launch {
        draft.schedule = Some(WeekSchedule::with_launch(WeekSchedule::parse_launch(raw)?));
    }
    Ok(draft.validate()?)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("app=info,services=info,storage=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let catalog = load_catalog(args.catalog.as_ref())?;
    let settings = course_settings(&catalog, args.launch.as_deref())?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let services =
        CourseServices::new_sqlite(&args.db_url, catalog, settings, Clock::default()).await?;
    info!(db = %args.db_url, user = %args.user, "course services ready");

    let session = services.login(args.user.clone()).await;
    let outcome = execute(&session, args.command).await;
    if let Err(err) = session.progress().sync_now().await {
        eprintln!("progress not synced: {err}");
    }
    session.logout().await;
    outcome
}

async fn execute(session: &LearnerSession, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let progress = session.progress();
    match command {
        Command::Status => print_status(session),
        Command::Locks => {
            for info in progress.all_lock_info() {
                println!(
                    "module {}  {}  (unlocks {})",
                    info.week_id,
                    info.countdown_text,
                    info.unlock_date.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
        Command::Answer { module, option } => {
            let mut navigation = session.navigation(module)?;
            print_events(&navigation.dispatch(NavigationAction::AnswerQuiz { selected: option }));
        }
        Command::Next { module } => {
            let mut navigation = session.navigation(module)?;
            print_events(&navigation.dispatch(NavigationAction::Next));
        }
        Command::Back { module } => {
            let mut navigation = session.navigation(module)?;
            print_events(&navigation.dispatch(NavigationAction::Previous));
        }
        Command::Watch { module, step } => {
            progress.mark_video_watched(module, step);
            println!("module {module} step {step}: video watched");
        }
        Command::Complete { module, step } => {
            progress.complete_step(module, step);
            println!("module {module} step {step}: completed");
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)?;
            let local = serde_json::from_str::<Progress>(&raw)?.normalized();
            let queued = progress.import_local(&local);
            progress.sync_now().await?;

            // A renamed file is not offered for import again.
            let imported = path.with_extension("imported");
            std::fs::rename(&path, &imported)?;
            println!(
                "imported {queued} changes from {} (kept as {})",
                path.display(),
                imported.display()
            );
        }
    }
    Ok(())
}

fn print_status(session: &LearnerSession) {
    let progress = session.progress();
    let position = progress.current_position();
    println!("learner  {}", session.user());
    println!("overall  {}%", progress.overall_progress());
    println!("at       module {} step {}", position.module, position.step);
    println!();

    for module in progress.catalog().modules() {
        let access = match progress.module_access(module.id) {
            ModuleAccess::Granted => "open".to_string(),
            ModuleAccess::Locked { requires } => format!("locked until module {requires} is done"),
            ModuleAccess::TimeLocked(info) => info.countdown_text,
        };
        let done = if progress.is_module_completed(module.id) {
            "  done"
        } else {
            ""
        };
        println!(
            "module {}  {:<24} {:>3}%  {access}{done}",
            module.id,
            module.title,
            progress.module_progress(module.id)
        );
    }

    let status = progress.sync_status();
    println!();
    match (&status.last_error, status.pending_writes) {
        (Some(err), pending) => println!("sync     {pending} pending ({err})"),
        (None, 0) => println!("sync     up to date"),
        (None, pending) => println!("sync     {pending} pending"),
    }
}

fn print_events(events: &[NavigationEvent]) {
    if events.is_empty() {
        println!("nothing to do here yet");
        return;
    }
    for event in events {
        match event {
            NavigationEvent::StepAdvanced { module, from, to } => {
                println!("module {module}: step {from} done, now on step {to}");
            }
            NavigationEvent::StepChanged { module, to, .. } => {
                println!("module {module}: now on step {to}");
            }
            NavigationEvent::QuizAnswered {
                is_correct,
                attempts,
                feedback,
                ..
            } => {
                let verdict = if *is_correct { "correct" } else { "not quite" };
                println!("{verdict} (attempt {attempts})");
                if let Some(feedback) = feedback {
                    println!("  {feedback}");
                }
            }
            NavigationEvent::QuizReset { step, .. } => println!("step {step}: quiz reset"),
            NavigationEvent::QuizRetry { attempts, .. } => println!("try again (attempt {attempts})"),
            NavigationEvent::ModuleCompleted { module } => println!("module {module} completed"),
            NavigationEvent::Error { context, message } => eprintln!("{context}: {message}"),
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
