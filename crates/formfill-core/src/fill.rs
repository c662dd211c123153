//! Fill rendering: field values to per-box text draws
//!
//! A field's value is drawn once into every box the field owns. Each draw is
//! centered horizontally in its own box and centered vertically on the
//! baseline, then emitted against the page the box lives on. Planning runs
//! to completion before anything is drawn, so a bad page reference leaves the
//! output document untouched.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::coords::{document_to_pdf, MediaBox, Point};
use crate::error::FormFillError;
use crate::metrics::TextMetrics;
use crate::model::{BoxId, ResolvedBox, ResolvedField};

/// Approximate cap height of the fill font as a fraction of the em
pub const CAP_HEIGHT_RATIO: f64 = 0.7;

/// Page geometry of a destination document
pub trait PageLayout {
    fn page_count(&self) -> u32;

    /// MediaBox of a 1-based page; a page past the end is a document error
    fn media_box(&self, page: u32) -> Result<MediaBox, FormFillError>;
}

/// Destination a fill is drawn into
pub trait OutputDocument: PageLayout + TextMetrics {
    fn draw_text(&mut self, draw: &TextDraw) -> Result<(), FormFillError>;
}

/// One text-draw instruction. `x`/`y` are the baseline origin in PDF user space.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDraw {
    pub field: String,
    pub box_id: BoxId,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub text: String,
}

/// Baseline origin for `text_width` wide text centered in a box.
///
/// Horizontally the text never starts left of the box; over-long values run
/// past its right edge instead.
pub fn place_text(
    b: &ResolvedBox,
    media_box: MediaBox,
    text_width: f64,
    font_size: f64,
) -> Point {
    let x = (b.x + (b.width - text_width) / 2.0).max(b.x);
    let bottom_left = document_to_pdf(Point::new(x, b.y + b.height), media_box);
    let baseline_offset = (b.height - font_size * CAP_HEIGHT_RATIO) / 2.0;
    Point::new(bottom_left.x, bottom_left.y + baseline_offset)
}

/// Compute every draw for a fill without touching the document
pub fn plan<D>(
    doc: &D,
    fields: &[ResolvedField],
    values: &BTreeMap<String, String>,
) -> Result<Vec<TextDraw>, FormFillError>
where
    D: PageLayout + TextMetrics + ?Sized,
{
    for key in values.keys() {
        if !fields.iter().any(|f| &f.name == key) {
            debug!("Ignoring value for unknown field '{}'", key);
        }
    }

    let mut draws = Vec::new();
    for field in fields {
        let text = match values.get(&field.name).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        let text_width = doc.text_width(text, field.font_size);

        for b in &field.boxes {
            if b.page == 0 || b.page > doc.page_count() {
                return Err(FormFillError::Document(format!(
                    "field '{}' box {} is on page {}, document has {} pages",
                    field.name,
                    b.id,
                    b.page,
                    doc.page_count()
                )));
            }
            let media_box = doc.media_box(b.page)?;
            let origin = place_text(b, media_box, text_width, field.font_size);
            debug!(
                "Field '{}' box {} page {}: text at ({:.2}, {:.2})",
                field.name, b.id, b.page, origin.x, origin.y
            );
            draws.push(TextDraw {
                field: field.name.clone(),
                box_id: b.id,
                page: b.page,
                x: origin.x,
                y: origin.y,
                font_size: field.font_size,
                text: text.to_string(),
            });
        }
    }
    Ok(draws)
}

/// Plan a fill and apply it. Returns the draws that were made.
pub fn render<D>(
    doc: &mut D,
    fields: &[ResolvedField],
    values: &BTreeMap<String, String>,
) -> Result<Vec<TextDraw>, FormFillError>
where
    D: OutputDocument + ?Sized,
{
    let draws = plan(&*doc, fields, values)?;
    for draw in &draws {
        doc.draw_text(draw)?;
    }
    Ok(draws)
}
