//! Coordinate transformation between device space and document space
//!
//! Device space is what the page canvas reports: pixels, top-left origin,
//! scaled by the current zoom factor. Document space is zoom-independent,
//! top-left origin, y increasing downward. Boxes are always stored in
//! document space; the PDF user space (bottom-left origin) only appears at
//! fill time through [`document_to_pdf`].

use serde::{Deserialize, Serialize};

use crate::error::FormFillError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

/// Zoom factor of the page canvas. Always finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Zoom(f64);

impl Zoom {
    pub const ONE: Zoom = Zoom(1.0);

    pub fn new(factor: f64) -> Result<Self, FormFillError> {
        if factor.is_finite() && factor > 0.0 {
            Ok(Zoom(factor))
        } else {
            Err(FormFillError::Validation(format!(
                "zoom must be a positive number, got {}",
                factor
            )))
        }
    }

    pub fn factor(&self) -> f64 {
        self.0
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Zoom::ONE
    }
}

impl<'de> Deserialize<'de> for Zoom {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let factor = f64::deserialize(deserializer)?;
        Zoom::new(factor).map_err(serde::de::Error::custom)
    }
}

/// Convert a device-space point to document space
pub fn to_document_point(p: Point, zoom: Zoom) -> Point {
    Point::new(p.x / zoom.0, p.y / zoom.0)
}

/// Convert a document-space point to device space
pub fn to_device_point(p: Point, zoom: Zoom) -> Point {
    Point::new(p.x * zoom.0, p.y * zoom.0)
}

/// Widths and heights scale like coordinates but carry no origin
pub fn to_document_len(len: f64, zoom: Zoom) -> f64 {
    len / zoom.0
}

pub fn to_device_len(len: f64, zoom: Zoom) -> f64 {
    len * zoom.0
}

pub fn to_document_rect(r: Rect, zoom: Zoom) -> Rect {
    let origin = to_document_point(r.origin(), zoom);
    Rect::new(
        origin.x,
        origin.y,
        to_document_len(r.width, zoom),
        to_document_len(r.height, zoom),
    )
}

pub fn to_device_rect(r: Rect, zoom: Zoom) -> Rect {
    let origin = to_device_point(r.origin(), zoom);
    Rect::new(
        origin.x,
        origin.y,
        to_device_len(r.width, zoom),
        to_device_len(r.height, zoom),
    )
}

/// Page MediaBox as `[x, y, width, height]` in PDF user space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl MediaBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// US Letter, origin at zero
    pub fn letter() -> Self {
        Self::new(0.0, 0.0, 612.0, 792.0)
    }
}

/// Convert document coordinates (top-left origin) to PDF user space (bottom-left origin)
pub fn document_to_pdf(p: Point, media_box: MediaBox) -> Point {
    Point::new(media_box.x + p.x, media_box.y + media_box.height - p.y)
}

/// Convert PDF user space back to document coordinates
pub fn pdf_to_document(p: Point, media_box: MediaBox) -> Point {
    Point::new(p.x - media_box.x, media_box.y + media_box.height - p.y)
}

/// Rendered page as reported by the page canvas: natural size in document
/// units together with the zoom it was rasterized at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f64,
    pub height: f64,
    pub zoom: Zoom,
}

impl PageViewport {
    pub fn new(width: f64, height: f64, zoom: Zoom) -> Self {
        Self {
            width,
            height,
            zoom,
        }
    }

    /// Pixel dimensions of the raster at this zoom
    pub fn device_size(&self) -> (f64, f64) {
        (
            to_device_len(self.width, self.zoom),
            to_device_len(self.height, self.zoom),
        )
    }

    pub fn contains_device(&self, p: Point) -> bool {
        let (w, h) = self.device_size();
        p.x >= 0.0 && p.y >= 0.0 && p.x <= w && p.y <= h
    }

    /// Same page re-rendered at another zoom; nothing of the old scale is kept
    pub fn with_zoom(&self, zoom: Zoom) -> Self {
        Self { zoom, ..*self }
    }

    /// Pull a document-space point back onto the page
    pub fn clamp_document(&self, p: Point) -> Point {
        Point::new(p.x.clamp(0.0, self.width), p.y.clamp(0.0, self.height))
    }
}
