use clap::Parser;
use std::path::PathBuf;

use crate::render::RenderOptions;

/// Score card generator sidecar: JSON requests on stdin, responses and events on stdout.
#[derive(Debug, Clone, Parser)]
#[command(name = "reportcardd", version, about)]
pub struct DaemonConfig {
    /// Directory that receives exported cards and the batch package.
    #[arg(long, env = "REPORTCARDD_OUT_DIR", default_value = "reportcards")]
    pub out_dir: PathBuf,

    /// Pause between students during a batch run, in milliseconds.
    #[arg(long, env = "REPORTCARDD_PACING_MS", default_value_t = 100)]
    pub pacing_ms: u64,

    /// Raster scale applied to the 96 dpi card size.
    #[arg(long, env = "REPORTCARDD_SCALE", default_value_t = 2.0)]
    pub scale: f32,

    /// Extra directory of font files.
    #[arg(long, env = "REPORTCARDD_FONT_DIR")]
    pub font_dir: Option<PathBuf>,

    /// Skip loading system fonts.
    #[arg(long, env = "REPORTCARDD_NO_SYSTEM_FONTS")]
    pub no_system_fonts: bool,

    /// tracing filter directive, e.g. `info` or `reportcardd=debug`.
    #[arg(long, env = "REPORTCARDD_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            scale: self.scale,
            load_system_fonts: !self.no_system_fonts,
            font_dir: self.font_dir.clone(),
        }
    }
}
