use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{EnrollmentBuilder, ModelLoader, ReferenceImage, TracingNotifier};
use rollcall_hw::ImageLoader;
use rollcall_models::{ModelPaths, OnnxAnalyzer};
use std::path::PathBuf;
use std::sync::Arc;

#[zbus::proxy(
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
trait Rollcall {
    async fn status(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance monitor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an enrolled profile from reference images and print it as JSON
    Enroll {
        /// Name of the person in the images
        #[arg(short, long)]
        label: String,
        /// Directory with the detector and recognizer models
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Write the profile here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Reference image paths or file:// URIs
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Show the running daemon's monitor state
    Status,
    /// Stop the running daemon's monitor
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll {
            label,
            model_dir,
            output,
            images,
        } => enroll(&label, model_dir, output, &images).await?,
        Commands::Status => {
            let proxy = connect().await?;
            let status = proxy.status().await.context("Status call failed")?;
            let value: serde_json::Value =
                serde_json::from_str(&status).context("daemon returned invalid JSON")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Stop => {
            let proxy = connect().await?;
            if proxy.stop().await.context("Stop call failed")? {
                println!("monitor stopping");
            } else {
                println!("monitor was already stopping");
            }
        }
    }

    Ok(())
}

async fn connect() -> Result<RollcallProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    RollcallProxy::new(&connection)
        .await
        .context("rollcalld is not running")
}

async fn enroll(
    label: &str,
    model_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    images: &[String],
) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(rollcall_models::default_model_dir);
    let analyzer = Arc::new(OnnxAnalyzer::new(ModelPaths::in_dir(
        &model_dir,
        rollcall_models::DEFAULT_DETECTOR_MODEL,
        rollcall_models::DEFAULT_RECOGNIZER_MODEL,
    )));
    analyzer
        .load_models()
        .await
        .with_context(|| format!("failed to load models from {}", model_dir.display()))?;

    let references: Vec<ReferenceImage> = images.iter().map(|i| ReferenceImage::new(i.as_str())).collect();
    let report = EnrollmentBuilder::new(Arc::new(ImageLoader::new()), analyzer, Arc::new(TracingNotifier))
        .build_report(label, &references)
        .await;

    for skipped in &report.skipped {
        eprintln!("skipped {}: {}", skipped.image, skipped.reason);
    }
    eprintln!(
        "enrolled {} of {} reference images for {label}",
        report.profile.embeddings.len(),
        references.len()
    );

    let json = serde_json::to_string_pretty(&report.profile)?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
