use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use moji_lens::common::{init_logger_exe, ScanStatus};
use moji_lens::detector::contains_japanese;
use moji_lens::image2text::VisionConfig;
use moji_lens::locator::{collect_image_candidates, MIN_IMAGE_SIZE};
use moji_lens::messaging::PageStatus;
use moji_lens::orchestrator::ScanConfig;
use moji_lens::page::Document;
use moji_lens::popup::render_page_status;
use moji_lens::runtime::{Runtime, RuntimeConfig};
use moji_lens::store::LocalStore;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(version, about = "Find Japanese text in page images and read it with a vision model", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "MOJI_LENS_DATA_DIR", help = "directory of the settings and OCR cache database")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a page snapshot for Japanese text and scannable images
    Detect {
        #[arg(help = "page snapshot in JSON format")]
        snapshot: PathBuf,
    },
    /// OCR every image of a page snapshot and write the annotated page as HTML
    Scan {
        #[arg(help = "page snapshot in JSON format")]
        snapshot: PathBuf,
        #[arg(long, short, help = "output HTML file, stdout if omitted")]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 3, help = "number of images processed in parallel")]
        concurrency: usize,
        #[arg(long, env = "MOJI_LENS_VISION_URL", help = "override the vision API endpoint")]
        vision_url: Option<String>,
    },
    /// Store the Anthropic API key
    SetKey { key: String },
}

fn open_store(data_dir: Option<PathBuf>) -> Result<LocalStore> {
    let dir = match data_dir {
        Some(dir) => dir,
        None => LocalStore::default_dir()?,
    };
    log::debug!("Using data dir {}", dir.display());
    Ok(LocalStore::open_dir(&dir)?)
}

fn detect(snapshot: &Path) -> Result<()> {
    let doc = Document::from_path(snapshot)?;
    let candidates = collect_image_candidates(&doc, MIN_IMAGE_SIZE);
    let status = PageStatus {
        has_japanese: contains_japanese(&doc.inner_text()),
        image_count: candidates.len(),
    };

    let (line, _) = render_page_status(Ok(status));
    println!("{}", line);
    for candidate in &candidates {
        println!("  [{}] {}", candidate.kind, candidate.url);
    }
    Ok(())
}

async fn scan(
    store: LocalStore,
    snapshot: &Path,
    output: Option<&Path>,
    concurrency: usize,
    vision_url: Option<String>,
) -> Result<()> {
    let doc = Document::from_path(snapshot)?;

    let mut vision = VisionConfig::new();
    if let Some(url) = vision_url {
        vision = vision.with_url(url);
    }
    let config = RuntimeConfig {
        vision,
        scan: ScanConfig {
            concurrency,
            ..ScanConfig::default()
        },
    };

    let runtime = Runtime::start(store, config);
    let tab = runtime.open_page(doc).await;
    let (line, can_scan) = render_page_status(Ok(tab.status()));
    log::info!("{}", line);
    if tab.status().image_count == 0 {
        log::warn!("Nothing to scan");
    } else if !can_scan {
        log::info!("Scanning anyway");
    }

    let popup = runtime.popup(tab.id());
    let state = popup
        .start_scan(|view| log::info!("{} {}", view.headline, view.detail))
        .await?;

    let html = tab.document().lock().to_html();
    match output {
        Some(path) => {
            std::fs::write(path, html)?;
            log::info!("Annotated page written to {}", path.display());
        }
        None => println!("{}", html),
    }

    let view = moji_lens::popup::render_scan_state(&state);
    if state.status == ScanStatus::Error {
        bail!("{}", view.detail);
    }
    eprintln!("{}. {}", view.headline, view.detail);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger_exe();
    let cli = Cli::parse();

    match cli.command {
        Command::Detect { snapshot } => detect(&snapshot),
        Command::Scan {
            snapshot,
            output,
            concurrency,
            vision_url,
        } => {
            let store = open_store(cli.data_dir)?;
            scan(store, &snapshot, output.as_deref(), concurrency, vision_url).await
        }
        Command::SetKey { key } => {
            let store = open_store(cli.data_dir)?;
            store.set_api_key(&key)?;
            println!("API key saved");
            Ok(())
        }
    }
}
