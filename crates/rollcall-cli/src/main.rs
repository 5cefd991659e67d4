use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::{ByteOrder, DetectedFace, Embedding, IdentityStore};
use rollcall_store::{weekday_name, NewSchedule, SqliteStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn handle_detection(&self, face_json: &str) -> zbus::Result<String>;
    async fn latest_outcome(&self) -> zbus::Result<String>;
    async fn reload_gallery(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration CLI")]
struct Cli {
    /// Attendance database (defaults to $XDG_DATA_HOME/rollcall/attendance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Byte order used for stored embeddings
    #[arg(long, global = true, default_value = "le")]
    byte_order: ByteOrder,

    /// Bus the daemon listens on
    #[arg(long, global = true, value_enum, default_value_t = Bus::Session)]
    bus: Bus,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Bus {
    Session,
    System,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a JSON embedding file
    Enroll {
        #[arg(short, long)]
        name: String,
        /// JSON array of 128 numbers
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// List enrolled identities
    Users,
    /// Manage courses
    #[command(subcommand)]
    Course(CourseCommand),
    /// Manage the weekly timetable
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Print attendance rows for one day
    Report {
        /// Day to report, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Send one detection to rollcalld and print the outcome
    Scan {
        #[arg(short, long)]
        embedding: PathBuf,
        /// Mark the face as covered (relaxed tolerance)
        #[arg(long)]
        masked: bool,
    },
    /// Ask rollcalld to re-read enrolled identities
    Reload,
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum CourseCommand {
    Add { name: String },
    List,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    Add {
        /// Identity id
        #[arg(long)]
        user: i64,
        /// Course id
        #[arg(long)]
        course: i64,
        /// Weekday, e.g. "Monday" or "mon"
        #[arg(long, value_parser = parse_weekday)]
        day: Weekday,
        /// HH:MM or HH:MM:SS
        #[arg(long, value_parser = parse_time)]
        start: NaiveTime,
        #[arg(long, value_parser = parse_time)]
        end: NaiveTime,
    },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(rollcall_store::default_db_path);

    match cli.command {
        Commands::Enroll { name, embedding } => {
            let embedding = read_embedding(&embedding)?;
            let store = open_store(&db_path)?;
            let id = store.add_identity(&name, &embedding, cli.byte_order)?;
            println!("Enrolled {name} as identity {id}");
            println!("Run `rollcall reload` so a running daemon picks it up.");
        }
        Commands::Users => {
            let store = open_store(&db_path)?;
            let rows = store.load_identities()?;
            if rows.is_empty() {
                println!("No identities enrolled");
            }
            for row in rows {
                let state = match Embedding::from_bytes(&row.embedding, cli.byte_order) {
                    Ok(_) => "ok".to_string(),
                    Err(e) => format!("unusable: {e}"),
                };
                println!("{:>4}  {:<24} {state}", row.id, row.name);
            }
        }
        Commands::Course(CourseCommand::Add { name }) => {
            let id = open_store(&db_path)?.add_course(&name)?;
            println!("Added course {name} as {id}");
        }
        Commands::Course(CourseCommand::List) => {
            for course in open_store(&db_path)?.list_courses()? {
                println!("{:>4}  {}", course.course_id, course.name);
            }
        }
        Commands::Schedule(ScheduleCommand::Add {
            user,
            course,
            day,
            start,
            end,
        }) => {
            let store = open_store(&db_path)?;
            let name = enrolled_name(&store, user)?;
            let id = store.add_schedule(&NewSchedule {
                identity_id: user,
                course_id: course,
                weekday: day,
                start,
                end,
            })?;
            println!("Added schedule {id} for {name}");
        }
        Commands::Schedule(ScheduleCommand::List) => {
            let store = open_store(&db_path)?;
            for s in store.list_schedules()? {
                let name = store.identity_name(s.identity_id)?.unwrap_or_default();
                println!(
                    "{:>4}  {:<20} {:<10} {}-{}  {}",
                    s.schedule_id,
                    name,
                    weekday_name(s.weekday),
                    s.start.format("%H:%M"),
                    s.end.format("%H:%M"),
                    s.course.name,
                );
            }
        }
        Commands::Report { date, json } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let rows = open_store(&db_path)?.records_on(date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No attendance recorded on {date}");
            } else {
                for row in rows {
                    println!(
                        "{}  {:<20} {:<20} {}",
                        row.scan_time.format("%H:%M:%S"),
                        row.name,
                        row.course,
                        row.status,
                    );
                }
            }
        }
        Commands::Scan { embedding, masked } => {
            let mut face = DetectedFace::new(read_embedding(&embedding)?.values);
            face.masked = Some(masked);
            let proxy = connect(cli.bus).await?;
            let reply = proxy
                .handle_detection(&serde_json::to_string(&face)?)
                .await
                .context("HandleDetection failed")?;
            print_json(&reply)?;
        }
        Commands::Reload => {
            let count = connect(cli.bus).await?.reload_gallery().await?;
            println!("Gallery reloaded: {count} identities");
        }
        Commands::Status => match connect(cli.bus).await {
            Ok(proxy) => {
                let status = proxy.status().await?;
                print_json(&status)?;
                let latest = proxy.latest_outcome().await?;
                println!("latest: {latest}");
            }
            Err(e) => println!("rollcalld: not connected ({e:#})"),
        },
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path, rollcall_store::DEFAULT_WRITE_TIMEOUT)
        .with_context(|| format!("failed to open {}", path.display()))
}

async fn connect(bus: Bus) -> Result<AttendanceProxy<'static>> {
    let builder = match bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .method_timeout(Duration::from_secs(5))
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    Ok(AttendanceProxy::new(&conn).await?)
}

/// Name of an enrolled identity; an unknown id is an error.
fn enrolled_name(store: &SqliteStore, id: i64) -> Result<String> {
    store
        .identity_name(id)?
        .with_context(|| format!("no enrolled identity with id {id}"))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_embedding(&text).with_context(|| format!("invalid embedding in {}", path.display()))
}

fn parse_embedding(text: &str) -> Result<Embedding> {
    let values: Vec<f64> = serde_json::from_str(text)?;
    Ok(Embedding::new(values)?)
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(s, format).ok())
        .ok_or_else(|| format!("expected HH:MM or HH:MM:SS, got {s:?}"))
}

fn parse_weekday(s: &str) -> Result<Weekday, String> {
    s.parse()
        .map_err(|_| format!("expected a weekday such as Monday or mon, got {s:?}"))
}
