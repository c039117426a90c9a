use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use folio::{logging, settings};

/// Inspect, search and render paginated documents from the command line
#[derive(Parser)]
#[command(name = "folio", version, about)]
struct Cli {
    /// Configuration file (defaults to the per-user config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Page count and page sizes
    Info { source: String },

    /// Search for text; prints hits as JSON
    Search { source: String, query: String },

    /// Text under a page-relative rectangle
    Select {
        source: String,
        page: i32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },

    /// Bookmark tree as JSON
    Outline { source: String },

    /// Render one page to a PNG file
    Render {
        source: String,
        page: i32,
        #[arg(long, default_value_t = 612)]
        width: u32,
        #[arg(long, default_value_t = 792)]
        height: u32,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rotation: i32,
        #[arg(long, short)]
        out: PathBuf,
    },
}

impl Command {
    #[cfg_attr(not(feature = "pdf"), allow(dead_code))]
    fn source(&self) -> &str {
        match self {
            Self::Info { source }
            | Self::Search { source, .. }
            | Self::Select { source, .. }
            | Self::Outline { source }
            | Self::Render { source, .. } => source,
        }
    }
}

fn main() -> Result<()> {
    better_panic::install();
    let cli = Cli::parse();

    settings::load_settings(cli.config.as_deref());

    let level_name = cli.log_level.clone().unwrap_or_else(settings::get_log_level);
    let level = logging::parse_level(&level_name)?;
    let log_file = cli.log_file.clone().unwrap_or_else(settings::get_log_file);
    logging::init(level, &log_file)
        .with_context(|| format!("Failed to initialise logging to {}", log_file.display()))?;

    info!("Starting folio {}", env!("CARGO_PKG_VERSION"));
    run(cli.command)
}

#[cfg(not(feature = "pdf"))]
fn run(_command: Command) -> Result<()> {
    anyhow::bail!("folio was built without a document backend; rebuild with `--features pdf`")
}

#[cfg(feature = "pdf")]
fn run(command: Command) -> Result<()> {
    use std::sync::Arc;

    use folio::backend::{MupdfHandle, MupdfText};
    use folio::engine::{AcceleratedSlot, DocumentSource, Engine, RenderOutcome, RenderSurface};
    use serde_json::json;

    let options = settings::get_search_options();
    let accelerated = if settings::is_accelerated_text_enabled() {
        let max_hits = options.max_accelerated_hits;
        AcceleratedSlot::probe_with(move || MupdfText::probe(max_hits))
    } else {
        AcceleratedSlot::disabled()
    };

    let engine = Engine::with_options(MupdfHandle::default, accelerated, options)?;
    let id = engine.create()?;
    let page_count = engine
        .load(id, DocumentSource::Uri(command.source().to_string()))
        .resolve()
        .with_context(|| format!("Failed to open {}", command.source()))?;

    let output = match command {
        Command::Info { .. } => {
            let sizes: Vec<_> = (0..page_count)
                .map(|page| engine.page_dimensions(id, i32::try_from(page).unwrap_or(i32::MAX)))
                .collect();
            json!({
                "pageCount": page_count,
                "accelerated": engine.accelerated_available(),
                "pageSizes": sizes,
            })
        }
        Command::Search { query, .. } => json!(engine.search(id, &query).wait_or_default()),
        Command::Select {
            page,
            x,
            y,
            width,
            height,
            ..
        } => json!(engine.select_at(id, page, x, y, width, height).wait_or_default()),
        Command::Outline { .. } => json!(engine.outline(id).wait_or_default()),
        Command::Render {
            page,
            width,
            height,
            scale,
            zoom,
            rotation,
            out,
            ..
        } => {
            let surface = Arc::new(RenderSurface::with_viewport(width, height));
            let outcome = engine.render(id, page, &surface, scale, zoom, rotation);
            if outcome != RenderOutcome::Queued {
                anyhow::bail!("Render was not scheduled: {outcome:?}");
            }
            engine.flush_renders();

            let frame = surface
                .frame()
                .with_context(|| format!("Page {page} could not be rendered"))?;
            let (frame_width, frame_height) = (frame.width(), frame.height());
            let image = image::RgbaImage::from_raw(frame_width, frame_height, frame.pixels().to_vec())
                .context("Rendered frame has an unexpected size")?;
            image
                .save_with_format(&out, image::ImageFormat::Png)
                .with_context(|| format!("Failed to write {}", out.display()))?;

            json!({
                "width": frame_width,
                "height": frame_height,
                "out": out,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    engine.destroy(id);
    Ok(())
}
