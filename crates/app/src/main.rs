use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use engine::loopback::{LoopbackCamera, LoopbackScreen, LoopbackTransport};
use engine::{
    ExamBackend, HttpBackend, HttpBackendConfig, SessionController, SessionDeps, SessionError,
    SessionOutcome, StorageBackend,
};
use exam_core::model::{ExamSessionDraft, StudentId, TestId};
use exam_core::{Clock, ProctorSettings};
use storage::repository::Storage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod sim;

use sim::{Anomalies, Candidate, RandomDetection};

const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw:?}"),
            ArgsError::InvalidNumber { flag, raw } => {
                write!(f, "{flag} expects a positive number, got {raw:?}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
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

fn parse_positive(flag: &'static str, raw: String) -> Result<u32, ArgsError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ArgsError::InvalidNumber { flag, raw }),
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  proctor run      [--db <sqlite_url>] [--student <id>] [--test <id>]");
    eprintln!("                   [--duration <secs>] [--questions <n>] [--resume]");
    eprintln!("  proctor progress [--db <sqlite_url>] [--student <id>] [--test <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:proctor.sqlite3");
    eprintln!("  --student demo-student --test demo-test");
    eprintln!("  --duration 120 --questions 10");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_API_BASE_URL, PROCTOR_API_TOKEN, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Progress,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "progress" => Some(Self::Progress),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    student_id: StudentId,
    test_id: TestId,
    duration_seconds: u32,
    question_count: u32,
    resume: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("PROCTOR_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("sqlite:proctor.sqlite3".into()), normalize_sqlite_url);
        let mut student_id = "demo-student".to_owned();
        let mut test_id = "demo-test".to_owned();
        let mut duration_seconds = 120;
        let mut question_count = 10;
        let mut resume = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--student" => student_id = require_value(args, "--student")?,
                "--test" => test_id = require_value(args, "--test")?,
                "--duration" => {
                    duration_seconds = parse_positive("--duration", require_value(args, "--duration")?)?;
                }
                "--questions" => {
                    question_count =
                        parse_positive("--questions", require_value(args, "--questions")?)?;
                }
                "--resume" => resume = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let student_id = StudentId::new(student_id.clone()).map_err(|_| ArgsError::InvalidId {
            flag: "--student",
            raw: student_id,
        })?;
        let test_id = TestId::new(test_id.clone()).map_err(|_| ArgsError::InvalidId {
            flag: "--test",
            raw: test_id,
        })?;

        Ok(Self {
            db_url,
            student_id,
            test_id,
            duration_seconds,
            question_count,
            resume,
        })
    }

    fn draft(&self) -> ExamSessionDraft {
        ExamSessionDraft {
            student_id: self.student_id.clone(),
            student_name: format!("Candidate {}", self.student_id),
            test_id: self.test_id.clone(),
            test_title: format!("Practice test {}", self.test_id),
            question_count: self.question_count,
            total_duration_seconds: self.duration_seconds,
            remaining_seconds: None,
        }
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim();
    let path = Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
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
        .and_then(|rest| rest.split('?').next())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_owned(),
        })?;

    let path = Path::new(path);
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

async fn open_storage(db_url: &str) -> Result<Storage, Box<dyn std::error::Error>> {
    prepare_sqlite_file(db_url)?;
    Ok(Storage::sqlite(db_url).await?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_session(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&args.db_url).await?;
    let backend: Arc<dyn ExamBackend> = match HttpBackendConfig::from_env()? {
        Some(config) => {
            info!(base_url = %config.base_url, "using remote exam service");
            Arc::new(HttpBackend::new(config))
        }
        None => Arc::new(StorageBackend::new(storage)),
    };
    let deps = SessionDeps {
        detection: Arc::new(RandomDetection::new(Anomalies::default())),
        transport: Arc::new(LoopbackTransport::new()),
        camera: Arc::new(LoopbackCamera::new()),
        screen: Arc::new(LoopbackScreen::new()),
        backend,
    };
    let mut controller = SessionController::new(ProctorSettings::default(), Clock::system(), deps);

    let saved = if args.resume {
        controller
            .load_saved_progress(&args.student_id, &args.test_id)
            .await?
    } else {
        None
    };
    match saved {
        Some(saved) => {
            info!(remaining = saved.time_remaining_seconds, "resuming saved attempt");
            controller.resume(args.draft(), &saved).await?;
        }
        None => controller.start(args.draft()).await?,
    }

    let candidate = Candidate::new(args.question_count, 0.02);
    let mut actions = tokio::time::interval(Duration::from_secs(3));
    actions.tick().await;

    loop {
        let ended = tokio::select! {
            event = controller.next_event() => match event {
                Some(event) => controller.handle_event(event).await,
                None => break,
            },
            _ = actions.tick() => candidate.act(&mut controller).await,
        };
        match ended {
            Ok(Some(_)) => break,
            Ok(None) => {}
            Err(SessionError::SubmissionFailed(err)) => {
                warn!(error = %err, "hand-in not acknowledged");
                break;
            }
            Err(err) => warn!(error = %err, "action rejected"),
        }
    }

    let mut attempt = 0;
    while controller.has_pending_submission() && attempt < RETRY_ATTEMPTS {
        attempt += 1;
        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
        match controller.retry_submission().await {
            Ok(receipt) => info!(receipt_id = receipt.id, attempt, "submission delivered"),
            Err(err) => warn!(error = %err, attempt, "retry failed"),
        }
    }

    report(&controller);
    if controller.has_pending_submission() {
        return Err("submission could not be delivered; answers are still held locally".into());
    }
    Ok(())
}

fn report(controller: &SessionController) {
    match controller.outcome() {
        Some(SessionOutcome::Submitted { reason, receipt }) => {
            let receipt = receipt
                .as_ref()
                .map_or_else(|| "pending".to_owned(), |receipt| format!("#{}", receipt.id));
            println!("submitted ({reason}), receipt {receipt}");
        }
        Some(SessionOutcome::Terminated { reason }) => println!("terminated ({reason})"),
        None => println!("session ended without an outcome"),
    }
    if let Some(progress) = controller.progress() {
        println!(
            "answered {}/{} ({} marked for review)",
            progress.answered, progress.total, progress.marked_for_review
        );
    }
    println!(
        "warnings {}, AI violations {}, tab switches {}",
        controller.warning_count(),
        controller.ai_violation_count(),
        controller.tab_switch_count()
    );
    for violation in controller.violations() {
        println!(
            "  {} [{:?}] {}",
            violation.observed_at().format("%H:%M:%S"),
            violation.severity(),
            violation.message()
        );
    }
}

async fn show_progress(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&args.db_url).await?;
    let Some(snapshot) = storage
        .progress
        .load_progress(&args.student_id, &args.test_id)
        .await?
    else {
        println!("no saved progress for {} / {}", args.student_id, args.test_id);
        return Ok(());
    };

    println!(
        "saved {} for {} / {}",
        snapshot.saved_at.format("%Y-%m-%d %H:%M:%S"),
        snapshot.student_id,
        snapshot.test_id
    );
    println!(
        "remaining {}s of {}s, on question {}",
        snapshot.remaining_seconds,
        snapshot.total_duration_seconds,
        snapshot.current_question + 1
    );
    println!(
        "answered {}/{}, visited {}, marked {}, warnings {}",
        snapshot.answers.len(),
        snapshot.question_count,
        snapshot.visited.len(),
        snapshot.marked_for_review.len(),
        snapshot.warning_count
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if argv.first().is_some_and(|first| !first.starts_with("--")) {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match cmd {
        Command::Run => run_session(parsed).await,
        Command::Progress => show_progress(parsed).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
