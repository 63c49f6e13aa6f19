use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn mark_live(&self, identity: &str, event: &str, image: Vec<u8>) -> zbus::Result<String>;
    async fn batch_recognize(&self, host: &str, event: &str, image: Vec<u8>)
        -> zbus::Result<String>;
    async fn enroll(&self, identity: &str, scope: &str, image: Vec<u8>) -> zbus::Result<String>;
    async fn erase(&self, identity: &str) -> zbus::Result<String>;
    async fn start_session(&self, host: &str, event: &str) -> zbus::Result<String>;
    async fn end_session(&self, host: &str, event: &str) -> zbus::Result<String>;
    async fn override_record(
        &self,
        host: &str,
        event: &str,
        record: &str,
        status: &str,
    ) -> zbus::Result<String>;
    async fn list_records(&self, event: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a reference face image for an identity within a scope
    Enroll {
        #[arg(short, long)]
        identity: String,
        #[arg(short, long)]
        scope: String,
        /// Path to an image containing exactly one face
        image: String,
    },
    /// Mark your own attendance for an event (1:1 verification)
    Mark {
        #[arg(short, long)]
        identity: String,
        #[arg(short, long)]
        event: String,
        image: String,
    },
    /// Recognize every enrolled face in one image (host only)
    Batch {
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        event: String,
        image: String,
    },
    /// Erase an identity's biometric data (idempotent)
    Erase {
        #[arg(short, long)]
        identity: String,
    },
    /// Start a scheduled session (host only)
    Start {
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        event: String,
    },
    /// End an ongoing session (host only)
    End {
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        event: String,
    },
    /// Manually override a record's status (host only)
    Override {
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        event: String,
        #[arg(short, long)]
        record: String,
        /// present | late | absent
        #[arg(short, long)]
        status: String,
    },
    /// List an event's attendance records
    Records {
        #[arg(short, long)]
        event: String,
    },
    /// Show daemon status
    Status,
}

fn read_image(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {path}"))
}

/// Re-indent the daemon's compact JSON for terminal output.
fn print_payload(payload: &str) {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{payload}"),
        },
        Err(_) => println!("{payload}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus (is rollcalld running?)")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    let payload = match cli.command {
        Commands::Enroll {
            identity,
            scope,
            image,
        } => proxy.enroll(&identity, &scope, read_image(&image)?).await?,
        Commands::Mark {
            identity,
            event,
            image,
        } => {
            proxy
                .mark_live(&identity, &event, read_image(&image)?)
                .await?
        }
        Commands::Batch { host, event, image } => {
            proxy
                .batch_recognize(&host, &event, read_image(&image)?)
                .await?
        }
        Commands::Erase { identity } => proxy.erase(&identity).await?,
        Commands::Start { host, event } => proxy.start_session(&host, &event).await?,
        Commands::End { host, event } => proxy.end_session(&host, &event).await?,
        Commands::Override {
            host,
            event,
            record,
            status,
        } => {
            proxy
                .override_record(&host, &event, &record, &status)
                .await?
        }
        Commands::Records { event } => proxy.list_records(&event).await?,
        Commands::Status => proxy.status().await?,
    };

    print_payload(&payload);
    Ok(())
}
