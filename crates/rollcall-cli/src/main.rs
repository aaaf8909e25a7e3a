use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::cache::EmbeddingCache;
use rollcall_core::{
    AttendanceLedger, AttendanceStatus, EmbeddingGallery, EuclideanMatcher, FrameSource, Kiosk,
    RecognizeOutcome, RosterStore,
};
use rollcall_hw::{Camera, FrameStream};
use rollcall_vision::OnnxFaceEmbedder;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod config;
mod speech;

use config::Config;
use speech::SpeechAnnouncer;

/// Requested capture size; the driver may pick the nearest it supports.
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance kiosk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every student on the roster
    Students,
    /// Look up a student by roll number (suffix match)
    Search {
        roll: String,
    },
    /// Mark attendance for a student by roll number
    Mark {
        roll: String,
        /// present, absent or leave
        #[arg(short, long, default_value = "present")]
        status: AttendanceStatus,
    },
    /// Recognize a face from the camera and mark that student present
    Recognize,
    /// Register a new student with a reference photo
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        roll: String,
        /// Use this image instead of capturing from the camera
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show today's attendance counts
    Dashboard {
        /// Day to summarize (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the attendance ledger as CSV
    Export {
        path: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Students => {
            let kiosk = open_kiosk(&config, EmbeddingGallery::new())?;
            if kiosk.roster().is_empty() {
                println!("No students registered.");
            }
            for student in kiosk.roster().students() {
                println!("{:<12} {}", student.roll_no, student.name);
            }
        }
        Commands::Search { roll } => {
            let kiosk = open_kiosk(&config, EmbeddingGallery::new())?;
            let card = kiosk.search_student(&roll)?;
            println!("Name:        {}", card.student.name);
            println!("Roll Number: {}", card.student.roll_no);
            match card.photo {
                Some(photo) => println!("Photo:       {}", photo.display()),
                None => println!("Photo:       (none)"),
            }
        }
        Commands::Mark { roll, status } => {
            let kiosk = open_kiosk(&config, EmbeddingGallery::new())?;
            let record = kiosk.mark_attendance(&roll, status, now())?;
            println!(
                "Attendance marked for {} ({}) as {} at {}",
                record.name,
                record.roll_no,
                record.status,
                record.timestamp_string()
            );
        }
        Commands::Recognize => recognize(&config)?,
        Commands::Enroll {
            name,
            roll,
            image,
            yes,
        } => enroll(&config, &name, &roll, image.as_deref(), yes)?,
        Commands::Dashboard { date, json } => {
            let kiosk = open_kiosk(&config, EmbeddingGallery::new())?;
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let summary = kiosk.dashboard(today)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Attendance for {today}");
                println!("  Total students: {}", summary.total_students);
                println!("  Marked today:   {}", summary.total_today);
                println!("  Present:        {}", summary.present_today);
                println!("  Absent:         {}", summary.absent_today);
                println!("  Leave:          {}", summary.leave_today);
            }
        }
        Commands::Export { path } => {
            let ledger = AttendanceLedger::new(&config.ledger_path);
            let rows = ledger
                .export_csv(&path)
                .with_context(|| format!("failed to export to {}", path.display()))?;
            println!("Exported {rows} records to {}", path.display());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found.");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test => {
            println!("Opening {}...", config.camera_device);
            let camera = Camera::open(&config.camera_device, CAPTURE_WIDTH, CAPTURE_HEIGHT)?;
            println!(
                "Negotiated {}x{} {:?}",
                camera.width,
                camera.height,
                camera.pixel_format()
            );
            let frame = camera.capture_frame(config.warmup_frames)?;
            println!(
                "Frame #{}: {}x{}, brightness {:.1}{}",
                frame.sequence,
                frame.image.width(),
                frame.image.height(),
                frame.avg_brightness(),
                if frame.is_dark() { " (dark)" } else { "" }
            );
        }
    }

    Ok(())
}

fn now() -> chrono::NaiveDateTime {
    Local::now().naive_local()
}

/// Create the directories the stores live in and assemble the kiosk.
fn open_kiosk(config: &Config, gallery: EmbeddingGallery) -> Result<Kiosk> {
    std::fs::create_dir_all(&config.faces_dir).with_context(|| {
        format!("failed to create faces directory {}", config.faces_dir.display())
    })?;
    for path in [&config.roster_path, &config.ledger_path, &config.cache_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let roster = RosterStore::load(&config.roster_path)?;
    let ledger = AttendanceLedger::new(&config.ledger_path);
    let mut kiosk = Kiosk::new(roster, gallery, ledger, &config.faces_dir)
        .with_cache(EmbeddingCache::new(&config.cache_path));
    if let Some(speech) = SpeechAnnouncer::from_command(&config.speech_command) {
        kiosk = kiosk.with_announcer(Box::new(speech));
    }
    Ok(kiosk)
}

fn load_embedder(config: &Config) -> Result<OnnxFaceEmbedder> {
    OnnxFaceEmbedder::load(&config.model_dir)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))
}

fn recognize(config: &Config) -> Result<()> {
    let mut embedder = load_embedder(config)?;
    // Directories must exist before the gallery is read.
    let mut kiosk = open_kiosk(config, EmbeddingGallery::new())?;
    let cache = EmbeddingCache::new(&config.cache_path);
    let gallery = EmbeddingGallery::load(&config.faces_dir, &mut embedder, Some(&cache))?;
    if gallery.is_empty() {
        tracing::warn!(dir = %config.faces_dir.display(), "no reference faces enrolled");
    }
    kiosk.set_gallery(gallery);

    let camera = Camera::open(&config.camera_device, CAPTURE_WIDTH, CAPTURE_HEIGHT)?;
    let mut stream = camera.stream()?;
    stream.skip_frames(config.warmup_frames)?;
    let mut frames = CameraFrames { stream };

    println!("Look at the camera...");
    let deadline = Instant::now() + Duration::from_secs(config.recognize_timeout_secs);
    let outcome = kiosk.recognize_and_mark(
        &mut frames,
        &mut embedder,
        &EuclideanMatcher,
        config.match_tolerance,
        || Instant::now() >= deadline,
        now,
    )?;

    match outcome {
        RecognizeOutcome::Marked { record, distance } => println!(
            "Attendance marked for {} ({}) as {} (distance {distance:.3})",
            record.name, record.roll_no, record.status
        ),
        RecognizeOutcome::NotRecognized { frames_examined } => {
            println!("Face not recognized ({frames_examined} frames examined).")
        }
    }
    Ok(())
}

fn enroll(
    config: &Config,
    name: &str,
    roll: &str,
    image_path: Option<&Path>,
    yes: bool,
) -> Result<()> {
    let mut embedder = load_embedder(config)?;
    let mut kiosk = open_kiosk(config, EmbeddingGallery::new())?;

    let photo = match image_path {
        Some(path) => image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?
            .to_rgb8(),
        None => {
            let camera = Camera::open(&config.camera_device, CAPTURE_WIDTH, CAPTURE_HEIGHT)?;
            println!("Capturing photo...");
            camera.capture_frame(config.warmup_frames)?.image
        }
    };

    let pending = kiosk.begin_enrollment(name, roll, photo, &mut embedder)?;
    println!(
        "Captured {}x{} photo of {} ({}).",
        pending.image().width(),
        pending.image().height(),
        pending.student().name,
        pending.student().roll_no
    );

    if yes || confirm("Is this your photo? [y/N] ")? {
        let path = kiosk.confirm_enrollment(pending)?;
        println!("Registered. Reference image saved to {}", path.display());
    } else {
        kiosk.reject_enrollment(pending);
        println!("Enrollment cancelled.");
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer)? == 0 {
        bail!("no answer on stdin; pass --yes to confirm non-interactively");
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Adapts a camera stream to the recognition loop. Capture errors end it.
struct CameraFrames<'a> {
    stream: FrameStream<'a>,
}

impl FrameSource for CameraFrames<'_> {
    fn next_frame(&mut self) -> Option<image::RgbImage> {
        match self.stream.next_frame() {
            Ok(frame) => Some(frame.image),
            Err(e) => {
                tracing::warn!(error = %e, "camera capture failed; ending recognition");
                None
            }
        }
    }
}
