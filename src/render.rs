use anyhow::Context;
use resvg::tiny_skia;
use resvg::usvg::{self, fontdb};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::card::CardLayout;

const FONT_FAMILY: &str =
    "'Noto Sans CJK SC', 'Source Han Sans SC', 'Microsoft YaHei', 'PingFang SC', 'DejaVu Sans', sans-serif";

/// Turns a card layout into PNG bytes. Implementations are awaited one card at a time.
pub trait CardRenderer: Send + Sync + 'static {
    fn render(&self, layout: CardLayout) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub scale: f32,
    pub load_system_fonts: bool,
    pub font_dir: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            load_system_fonts: true,
            font_dir: None,
        }
    }
}

pub struct SvgRenderer {
    fontdb: Arc<fontdb::Database>,
    scale: f32,
}

impl SvgRenderer {
    pub fn new(opts: &RenderOptions) -> Self {
        let mut db = fontdb::Database::new();
        if opts.load_system_fonts {
            db.load_system_fonts();
        }
        if let Some(dir) = &opts.font_dir {
            db.load_fonts_dir(dir);
        }
        tracing::debug!(faces = db.len(), "font database ready");
        Self {
            fontdb: Arc::new(db),
            scale: if opts.scale > 0.0 { opts.scale } else { 1.0 },
        }
    }
}

impl CardRenderer for SvgRenderer {
    fn render(&self, layout: CardLayout) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send {
        let fontdb = Arc::clone(&self.fontdb);
        let scale = self.scale;
        async move {
            let svg = card_svg(&layout);
            tokio::task::spawn_blocking(move || rasterize(&svg, fontdb, scale))
                .await
                .context("render task did not finish")?
        }
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn text_el(x: f32, y: f32, size: f32, weight: &str, body: &str) -> String {
    format!(
        r#"<text x="{:.1}" y="{:.1}" font-size="{:.1}" font-weight="{}" text-anchor="middle">{}</text>"#,
        x,
        y,
        size,
        weight,
        escape_xml(body)
    )
}

/// Title, identity line, then a bordered subject x exam table filling the page width.
pub fn card_svg(layout: &CardLayout) -> String {
    let (w, h) = layout.paper.dimensions_px();
    let pad = w.min(h) * 0.07;
    let title_size = (h * 0.04).clamp(18.0, 40.0);
    let info_size = title_size * 0.5;

    let mut body = String::new();
    body.push_str(&text_el(w / 2.0, pad + title_size, title_size, "bold", &layout.title));
    let info_y = pad + title_size * 1.6 + info_size;
    body.push_str(&text_el(w / 2.0, info_y, info_size, "normal", &layout.identity_line));

    let table_top = info_y + info_size * 1.5;
    let cols = layout.column_headers.len() + 1;
    let rows = layout.row_labels.len() + 1;
    let col_w = (w - 2.0 * pad) / cols as f32;
    let row_h = ((h - table_top - pad) / rows as f32).min(title_size * 1.4);
    let cell_size = (row_h * 0.42).min(col_w * 0.22).max(6.0);
    let table_w = col_w * cols as f32;
    let table_h = row_h * rows as f32;

    body.push_str(&format!(
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#f0f2f5"/>"##,
        pad, table_top, table_w, row_h
    ));

    let headers = std::iter::once(&layout.corner_header).chain(layout.column_headers.iter());
    for (c, label) in headers.enumerate() {
        let x = pad + col_w * (c as f32 + 0.5);
        body.push_str(&text_el(x, table_top + row_h * 0.5 + cell_size * 0.35, cell_size, "bold", label));
    }
    for (r, label) in layout.row_labels.iter().enumerate() {
        let y = table_top + row_h * (r as f32 + 1.5) + cell_size * 0.35;
        body.push_str(&text_el(pad + col_w * 0.5, y, cell_size, "bold", label));
        let values = layout.cells.get(r).map(|v| v.as_slice()).unwrap_or(&[]);
        for (c, value) in values.iter().enumerate() {
            let x = pad + col_w * (c as f32 + 1.5);
            body.push_str(&text_el(x, y, cell_size, "normal", value));
        }
    }

    for r in 0..=rows {
        let y = table_top + row_h * r as f32;
        body.push_str(&format!(
            r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#333333" stroke-width="1"/>"##,
            pad,
            y,
            pad + table_w,
            y
        ));
    }
    for c in 0..=cols {
        let x = pad + col_w * c as f32;
        body.push_str(&format!(
            r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#333333" stroke-width="1"/>"##,
            x,
            table_top,
            x,
            table_top + table_h
        ));
    }

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w:.0}" height="{h:.0}" viewBox="0 0 {w:.1} {h:.1}"><rect width="100%" height="100%" fill="#ffffff"/><g font-family="{family}" fill="#222222">{body}</g></svg>"##,
        w = w,
        h = h,
        family = FONT_FAMILY,
        body = body
    )
}

fn rasterize(svg: &str, fontdb: Arc<fontdb::Database>, scale: f32) -> anyhow::Result<Vec<u8>> {
    let options = usvg::Options {
        fontdb,
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &options).context("failed to parse card svg")?;
    let size = tree.size();
    let width = (size.width() * scale).ceil() as u32;
    let height = (size.height() * scale).ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .with_context(|| format!("failed to allocate {}x{} pixmap", width, height))?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());
    pixmap.encode_png().context("failed to encode png")
}
