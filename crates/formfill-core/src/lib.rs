//! Form template filling
//!
//! Users draw boxes over a rendered PDF page at any zoom, group boxes into
//! named fields, and later fill those fields with values that are drawn back
//! into the PDF at the exact document coordinates.
//!
//! - [`coords`]: device space <-> document space <-> PDF user space
//! - [`store::FormStore`]: templates, boxes and fields with their invariants
//! - [`fill`]: per-box text placement against an [`fill::OutputDocument`]
//! - [`pdf::PdfDocument`]: the lopdf implementation of that document
//! - [`session::EditorSession`]: authoring view state and gestures

pub mod boxes;
pub mod convert;
pub mod coords;
pub mod error;
pub mod fields;
pub mod fill;
pub mod metrics;
pub mod model;
pub mod pdf;
pub mod session;
pub mod snapshot;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

pub use convert::{ExportFormat, FormatConverter, SofficeConverter};
pub use coords::{MediaBox, PageViewport, Point, Rect, Zoom};
pub use error::{ErrorKind, FormFillError};
pub use fill::{OutputDocument, PageLayout, TextDraw};
pub use model::{
    BoundingBox, BoxId, BoxPlacement, BoxUpdate, Field, FieldId, FieldUpdate, FillRequest,
    NewField, NewTemplate, ResolvedField, Template, TemplateId, ValueType,
};
pub use pdf::PdfDocument;
pub use session::EditorSession;
pub use snapshot::TemplateSnapshot;
pub use store::FormStore;

/// Result of a fill: the output bytes and what went into them
#[derive(Debug, Clone)]
pub struct FilledExport {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    pub draws: Vec<TextDraw>,
}

/// Draw resolved field values into a PDF and return the new bytes
pub fn fill_pdf(
    source: &[u8],
    fields: &[ResolvedField],
    values: &BTreeMap<String, String>,
) -> Result<(Vec<u8>, Vec<TextDraw>), FormFillError> {
    let mut doc = PdfDocument::load(source)?;
    let draws = fill::render(&mut doc, fields, values)?;
    Ok((doc.save()?, draws))
}

/// Fill a stored template and convert the result. Either a complete document
/// comes back or an error does.
pub fn export_filled(
    store: &FormStore,
    source: &[u8],
    request: &FillRequest,
    format: ExportFormat,
    converter: &dyn FormatConverter,
) -> Result<FilledExport, FormFillError> {
    let template = store.get_template(request.template_id)?;
    let fields = store.resolve(template.id)?;
    let (pdf, draws) = fill_pdf(source, &fields, &request.values)?;
    let bytes = converter.convert(&pdf, format)?;
    info!(
        "Exported template {} as {} ({} draws, {} bytes)",
        template.id,
        format,
        draws.len(),
        bytes.len()
    );
    Ok(FilledExport {
        bytes,
        format,
        draws,
    })
}

/// Attachment name for an export, `filled-<unix millis>.<ext>`
pub fn export_filename(format: ExportFormat, at: DateTime<Utc>) -> String {
    format!("filled-{}.{}", at.timestamp_millis(), format.extension())
}
