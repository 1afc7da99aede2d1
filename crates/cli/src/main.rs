use anyhow::{Context, Result};
use attendance_core::config::{self, AppConfig};
use attendance_core::enrollment;
use attendance_core::pipeline;
use attendance_core::recognizer::RunOutcome;
use clap::{Parser, Subcommand};
use eduattend::console::ConsoleObserver;
use image::GrayImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            class_name,
            roll_no,
            files,
            detect,
            json,
        } => run_enroll(cfg, class_name, roll_no, files, detect, json).await,
        Commands::Capture {
            class_name,
            roll_no,
            count,
            json,
        } => run_capture(cfg, class_name, roll_no, count, json).await,
        Commands::Train { json } => run_train(cfg, json).await,
        Commands::Recognize { date, json } => run_recognize(cfg, date, json).await,
        Commands::Gallery { json } => run_gallery(cfg, json).await,
        Commands::Status { json } => run_status(cfg, json),
    }
}

#[derive(Parser)]
#[command(name = "eduattend")]
#[command(about = "Face-recognition classroom attendance", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from image files
    Enroll {
        class_name: String,
        roll_no: String,
        /// Face images (png, jpeg, bmp)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Crop each image to its first detected face
        #[arg(long, default_value_t = false)]
        detect: bool,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Capture a burst of face samples from the capture device
    Capture {
        class_name: String,
        roll_no: String,
        /// Number of faces to collect (defaults to capture.samples_per_session)
        #[arg(long)]
        count: Option<usize>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the recognition model from the gallery
    Train {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Run the live recognition loop until a student is marked present
    Recognize {
        /// Attendance column to mark (defaults to today)
        #[arg(long)]
        date: Option<String>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// List enrolled students and their sample counts
    Gallery {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the state of the trained model
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

/// Stop signal raised on Ctrl-C.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

async fn run_enroll(
    cfg: AppConfig,
    class_name: String,
    roll_no: String,
    files: Vec<PathBuf>,
    detect: bool,
    json: bool,
) -> Result<()> {
    let summary =
        pipeline::enroll_files(&cfg, &class_name, &roll_no, files.as_slice(), detect).await?;
    if json {
        let out = serde_json::json!({
            "status": "ok",
            "class_name": summary.class_name,
            "roll_no": summary.roll_no,
            "files": files.len(),
            "stored": summary.stored,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "enrolled {}-{}: stored {} of {} image(s)",
            summary.class_name,
            summary.roll_no,
            summary.stored,
            files.len()
        );
    }
    Ok(())
}

async fn run_capture(
    cfg: AppConfig,
    class_name: String,
    roll_no: String,
    count: Option<usize>,
    json: bool,
) -> Result<()> {
    let count = count.unwrap_or(cfg.capture.samples_per_session);
    let max_frames = cfg.capture.max_capture_frames.max(count);
    let cancel = cancel_on_ctrl_c();

    let capture_cfg = cfg.clone();
    let faces: Vec<GrayImage> = tokio::task::spawn_blocking(move || -> Result<Vec<GrayImage>> {
        let opener = pipeline::build_camera(&capture_cfg);
        let mut detector = pipeline::build_detector(&capture_cfg)?;
        let faces = enrollment::capture_samples(
            opener.as_ref(),
            detector.as_mut(),
            count,
            max_frames,
            &cancel,
        )?;
        Ok(faces)
    })
    .await
    .context("capture task")??;

    if faces.len() < count {
        warn!("collected {} of {} requested face(s)", faces.len(), count);
    }
    let summary = pipeline::enroll(&cfg, &class_name, &roll_no, &faces).await?;
    if json {
        let out = serde_json::json!({
            "status": "ok",
            "class_name": summary.class_name,
            "roll_no": summary.roll_no,
            "requested": count,
            "stored": summary.stored,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "captured {}-{}: stored {} face sample(s)",
            summary.class_name, summary.roll_no, summary.stored
        );
    }
    Ok(())
}

async fn run_train(cfg: AppConfig, json: bool) -> Result<()> {
    let report = pipeline::train(&cfg).await?;
    if json {
        let out = serde_json::json!({
            "status": "ok",
            "identities": report.identities,
            "samples": report.samples,
            "trained_at": report.trained_at,
            "message": report.message(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", report.message());
    }
    Ok(())
}

async fn run_recognize(cfg: AppConfig, date: Option<String>, json: bool) -> Result<()> {
    let date = match date {
        Some(date) => {
            chrono::NaiveDate::parse_from_str(&date, &cfg.workbook.date_format).with_context(|| {
                format!("date {date:?} does not match {}", cfg.workbook.date_format)
            })?;
            date
        }
        None => pipeline::today(&cfg),
    };
    let cancel = cancel_on_ctrl_c();
    let (observer, tally) = ConsoleObserver::new(json);

    let outcome = tokio::task::spawn_blocking(move || {
        let opener = pipeline::build_camera(&cfg);
        let detector = pipeline::build_detector(&cfg)?;
        pipeline::recognize(&cfg, opener, detector, date, cancel, Box::new(observer))
    })
    .await
    .context("recognition task")??;

    let tally = tally.lock().map(|t| t.clone()).unwrap_or_default();
    if json {
        let out = serde_json::json!({
            "status": "ok",
            "result": outcome,
            "frames": tally,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        match &outcome {
            RunOutcome::Marked { identity } => println!(
                "marked {} present (roll {}) after {} frame(s)",
                identity, identity.roll_no, tally.frames
            ),
            RunOutcome::NoMarkMade { reason } => println!(
                "no attendance marked ({reason:?}) after {} frame(s)",
                tally.frames
            ),
        }
    }
    Ok(())
}

async fn run_gallery(cfg: AppConfig, json: bool) -> Result<()> {
    let gallery = pipeline::open_gallery(&cfg).await?;
    let identities = gallery.identities().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&identities)?);
    } else if identities.is_empty() {
        println!("gallery is empty");
    } else {
        for id in &identities {
            println!("{}-{}\t{} sample(s)", id.class_name, id.roll_no, id.samples);
        }
    }
    Ok(())
}

fn run_status(cfg: AppConfig, json: bool) -> Result<()> {
    let store = pipeline::model_store(&cfg);
    let model = store.load().context("read model")?;
    let out = match &model {
        Some(model) => {
            let report = model.report();
            serde_json::json!({
                "trained": true,
                "path": store.path(),
                "trained_at": report.trained_at,
                "identities": report.identities,
                "samples": report.samples,
            })
        }
        None => serde_json::json!({ "trained": false, "path": store.path() }),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        match model {
            Some(model) => {
                let report = model.report();
                println!(
                    "model {} trained {}: {} identities, {} samples",
                    store.path().display(),
                    report.trained_at,
                    report.identities,
                    report.samples
                );
            }
            None => println!("no trained model at {}", store.path().display()),
        }
    }
    Ok(())
}
