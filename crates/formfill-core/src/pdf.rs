//! lopdf-backed output document
//!
//! Draws are buffered per page and written on [`PdfDocument::save`]. Each
//! touched page gets its existing content wrapped in `q … Q` so leftover
//! graphics state from the source cannot shift or hide the filled text, then
//! one new content stream with the text objects.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use crate::coords::MediaBox;
use crate::error::FormFillError;
use crate::fill::{OutputDocument, PageLayout, TextDraw};
use crate::metrics::{encode_win_ansi, StandardFont, TextMetrics};

/// Guard against cyclic `/Parent` chains
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct PendingPage {
    font_name: Vec<u8>,
    operations: Vec<Operation>,
}

pub struct PdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
    font: StandardFont,
    font_id: Option<ObjectId>,
    pending: BTreeMap<u32, PendingPage>,
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

impl PdfDocument {
    pub fn load(bytes: &[u8]) -> Result<Self, FormFillError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| FormFillError::Document(format!("Failed to parse PDF: {}", e)))?;
        if doc.is_encrypted() {
            return Err(FormFillError::Document(
                "encrypted PDFs are not supported".into(),
            ));
        }
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(FormFillError::Document("PDF has no pages".into()));
        }
        Ok(Self {
            doc,
            pages,
            font: StandardFont::Helvetica,
            font_id: None,
            pending: BTreeMap::new(),
        })
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, FormFillError> {
        (page as usize)
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .copied()
            .ok_or_else(|| {
                FormFillError::Document(format!(
                    "page {} is out of range, document has {} pages",
                    page,
                    self.pages.len()
                ))
            })
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object, FormFillError> {
        match obj {
            Object::Reference(id) => Ok(self.doc.get_object(*id)?),
            other => Ok(other),
        }
    }

    /// Look a key up on the page, falling back to its ancestors
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Result<Option<Object>, FormFillError> {
        let mut current = Some(page_id);
        let mut depth = 0;
        while let Some(id) = current {
            let dict = self.doc.get_dictionary(id)?;
            if let Ok(value) = dict.get(key) {
                return Ok(Some(self.resolve(value)?.clone()));
            }
            current = match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => Some(*parent),
                _ => None,
            };
            depth += 1;
            if depth > MAX_TREE_DEPTH {
                return Err(FormFillError::Document("page tree is too deep".into()));
            }
        }
        Ok(None)
    }

    fn font_object(&mut self) -> ObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set(
            "BaseFont",
            Object::Name(self.font.base_font().as_bytes().to_vec()),
        );
        font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
        let id = self.doc.add_object(font);
        self.font_id = Some(id);
        id
    }

    /// Register the fill font in the page's resources under a name the page
    /// does not use yet. Inherited resources are copied onto the page first.
    fn install_font(&mut self, page_id: ObjectId) -> Result<Vec<u8>, FormFillError> {
        let font_id = self.font_object();

        let mut resources = match self.inherited(page_id, b"Resources")? {
            Some(Object::Dictionary(d)) => d,
            _ => Dictionary::new(),
        };
        let mut fonts = match resources.get(b"Font") {
            Ok(obj) => match self.resolve(obj)? {
                Object::Dictionary(d) => d.clone(),
                _ => Dictionary::new(),
            },
            Err(_) => Dictionary::new(),
        };

        let mut n = 1;
        let name = loop {
            let candidate = format!("FF{}", n);
            if !fonts.has(candidate.as_bytes()) {
                break candidate.into_bytes();
            }
            n += 1;
        };
        fonts.set(name.clone(), Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));

        self.doc
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Resources", Object::Dictionary(resources));
        Ok(name)
    }

    fn existing_contents(&self, page_id: ObjectId) -> Result<Vec<Object>, FormFillError> {
        let page = self.doc.get_dictionary(page_id)?;
        let contents = match page.get(b"Contents") {
            Ok(obj) => obj,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(match contents {
            Object::Array(items) => items.clone(),
            Object::Reference(id) => match self.doc.get_object(*id)? {
                Object::Array(items) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            _ => {
                warn!("Ignoring malformed /Contents on page object {:?}", page_id);
                Vec::new()
            }
        })
    }

    fn flush_page(&mut self, page: u32, pending: PendingPage) -> Result<(), FormFillError> {
        let page_id = self.page_id(page)?;
        let existing = self.existing_contents(page_id)?;

        let open = self
            .doc
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let mut operations = vec![Operation::new("Q", vec![])];
        operations.extend(pending.operations);
        let encoded = Content { operations }
            .encode()
            .map_err(|e| FormFillError::Document(format!("Failed to encode content: {}", e)))?;
        let fill = self
            .doc
            .add_object(Stream::new(Dictionary::new(), encoded));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(open));
        contents.extend(existing);
        contents.push(Object::Reference(fill));

        self.doc
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    /// Write buffered draws into the page trees and serialize the document
    pub fn save(mut self) -> Result<Vec<u8>, FormFillError> {
        let pending = std::mem::take(&mut self.pending);
        let touched = pending.len();
        for (page, p) in pending {
            self.flush_page(page, p)?;
        }

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| FormFillError::Document(format!("Save failed: {}", e)))?;
        debug!("Saved PDF with {} filled pages, {} bytes", touched, buffer.len());
        Ok(buffer)
    }
}

impl PageLayout for PdfDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn media_box(&self, page: u32) -> Result<MediaBox, FormFillError> {
        let page_id = self.page_id(page)?;
        let values = match self.inherited(page_id, b"MediaBox")? {
            Some(Object::Array(items)) => items
                .iter()
                .map(|o| self.resolve(o).ok().and_then(number))
                .collect::<Option<Vec<f64>>>(),
            _ => None,
        };
        match values.as_deref() {
            Some([llx, lly, urx, ury]) => Ok(MediaBox::new(
                llx.min(*urx),
                lly.min(*ury),
                (urx - llx).abs(),
                (ury - lly).abs(),
            )),
            _ => {
                warn!("Page {} has no usable MediaBox, assuming US Letter", page);
                Ok(MediaBox::letter())
            }
        }
    }
}

impl TextMetrics for PdfDocument {
    fn text_width(&self, text: &str, font_size: f64) -> f64 {
        self.font.text_width(text, font_size)
    }
}

impl OutputDocument for PdfDocument {
    fn draw_text(&mut self, draw: &TextDraw) -> Result<(), FormFillError> {
        let page_id = self.page_id(draw.page)?;
        if !self.pending.contains_key(&draw.page) {
            let font_name = self.install_font(page_id)?;
            self.pending.insert(
                draw.page,
                PendingPage {
                    font_name,
                    operations: Vec::new(),
                },
            );
        }
        let pending = self
            .pending
            .get_mut(&draw.page)
            .ok_or_else(|| FormFillError::Document(format!("page {} not prepared", draw.page)))?;

        pending.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(pending.font_name.clone()),
                    Object::Real(draw.font_size as f32),
                ],
            ),
            Operation::new("g", vec![Object::Integer(0)]),
            Operation::new(
                "Td",
                vec![Object::Real(draw.x as f32), Object::Real(draw.y as f32)],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(
                    encode_win_ansi(&draw.text),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]);
        Ok(())
    }
}

/// Number of pages in a PDF byte stream
pub fn page_count(bytes: &[u8]) -> Result<u32, FormFillError> {
    Ok(PdfDocument::load(bytes)?.page_count())
}
