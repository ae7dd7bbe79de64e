use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod setup;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark attendance for a session from an image file
    Mark {
        /// Session key, e.g. "2026-03-02/CS101"
        session: String,
        /// Path to the image (PNG or JPEG)
        image: PathBuf,
    },
    /// Export the CSV report for a session
    Export {
        /// Session key, e.g. "2026-03-02/CS101"
        session: String,
    },
    /// Show daemon status
    Status,
    /// List enrolled identities
    Labels,
    /// Download and verify the ONNX models
    Setup {
        /// Target directory (defaults to the system or user model dir)
        #[arg(long)]
        model_dir: Option<String>,
        /// Only verify existing files, do not download
        #[arg(long)]
        verify: bool,
    },
}

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and
// `AttendanceProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn mark_attendance(&self, session: &str, image: &[u8]) -> zbus::Result<String>;
    async fn export_report(&self, session: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_labels(&self) -> zbus::Result<String>;
}

/// Connect to the daemon. `ROLLCALL_SESSION_BUS` selects the session
/// bus (development mode); the default is the system bus.
async fn connect() -> Result<AttendanceProxy<'static>> {
    let session_bus = std::env::var("ROLLCALL_SESSION_BUS").is_ok();
    tracing::debug!(session_bus, "connecting to rollcalld");

    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to the bus (is rollcalld running?)")?;

    AttendanceProxy::new(&conn)
        .await
        .context("failed to create daemon proxy")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Mark { session, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            // Cheap pre-flight so an unreadable file fails here instead of
            // round-tripping through the daemon.
            image::load_from_memory(&bytes)
                .with_context(|| format!("{} is not a decodable image", image.display()))?;

            let proxy = connect().await?;
            let raw = proxy.mark_attendance(&session, &bytes).await?;
            print_mark_response(&raw)?;
        }
        Commands::Export { session } => {
            let proxy = connect().await?;
            let path = proxy.export_report(&session).await?;
            println!("report written to {path}");
        }
        Commands::Status => {
            let proxy = connect().await?;
            let raw = proxy.status().await?;
            let status: serde_json::Value =
                serde_json::from_str(&raw).context("daemon returned invalid JSON")?;
            println!("rollcalld {}", status["version"].as_str().unwrap_or("?"));
            println!("  enrolled identities: {}", status["enrolled_identities"]);
            println!("  attendance marks:    {}", status["attendance_marks"]);
            println!("  accept threshold:    {}", status["accept_threshold"]);
        }
        Commands::Labels => {
            let proxy = connect().await?;
            let raw = proxy.list_labels().await?;
            let labels: Vec<serde_json::Value> =
                serde_json::from_str(&raw).context("daemon returned invalid JSON")?;
            if labels.is_empty() {
                println!("no identities enrolled");
            }
            for label in &labels {
                println!(
                    "{}  {}",
                    label["id"].as_str().unwrap_or("?"),
                    label["display_name"].as_str().unwrap_or("?")
                );
            }
        }
        Commands::Setup { model_dir, verify } => {
            setup::run(model_dir, verify)?;
        }
    }

    Ok(())
}

/// Render the mark_attendance JSON response as one line per face.
fn print_mark_response(raw: &str) -> Result<()> {
    let response: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    let session = response["session"].as_str().unwrap_or("?");
    let empty = Vec::new();
    let decisions = response["decisions"].as_array().unwrap_or(&empty);

    println!("session {session}: {} face(s)", decisions.len());
    for decision in decisions {
        let line = describe_decision(decision);
        println!("  {line}");
    }
    Ok(())
}

fn describe_decision(decision: &serde_json::Value) -> String {
    let name = decision["display_name"].as_str().unwrap_or("?");
    match decision["status"].as_str().unwrap_or("?") {
        "accepted" => format!(
            "{name} marked present (confidence {:.2})",
            decision["confidence"].as_f64().unwrap_or(0.0)
        ),
        "already_marked" => format!("{name} already recorded in this session"),
        "rejected" => match decision["reason"].as_str().unwrap_or("?") {
            "no_face" => "no face detected".to_string(),
            "low_confidence" => match decision["confidence"].as_f64() {
                Some(score) => format!("unrecognized face (best score {score:.2})"),
                None => "unrecognized face".to_string(),
            },
            "ambiguous" => format!(
                "ambiguous between {} and {}, retake the image",
                decision["candidates"][0].as_str().unwrap_or("?"),
                decision["candidates"][1].as_str().unwrap_or("?")
            ),
            other => format!("rejected ({other})"),
        },
        other => format!("unexpected status {other:?}"),
    }
}
