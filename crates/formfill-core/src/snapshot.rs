//! Point-in-time copy of one template's authoring state
//!
//! The persistence layer stores and reloads these; the core never talks to a
//! database itself.

use serde::{Deserialize, Serialize};

use crate::boxes::BoxStore;
use crate::error::FormFillError;
use crate::fields::FieldComposer;
use crate::model::{BoundingBox, BoxPlacement, Field, Template};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSnapshot {
    pub template: Template,
    /// Bumped by every successful mutation of the template
    pub revision: u64,
    pub uniform_height: Option<f64>,
    /// Ordered by `(page, id)`
    pub boxes: Vec<BoundingBox>,
    /// Ordered by id
    pub fields: Vec<Field>,
}

impl TemplateSnapshot {
    /// Rebuild the box and field collections, re-checking every invariant
    /// the live store enforces.
    pub(crate) fn rebuild(&self) -> Result<(BoxStore, FieldComposer), FormFillError> {
        let template_id = self.template.id;
        if self.template.page_count == 0 {
            return Err(FormFillError::Validation(format!(
                "template {} has no pages",
                template_id
            )));
        }

        let mut boxes = BoxStore::new();
        for b in &self.boxes {
            if b.template_id != template_id {
                return Err(FormFillError::Validation(format!(
                    "box {} belongs to template {}, not {}",
                    b.id, b.template_id, template_id
                )));
            }
            if boxes.contains(b.id) {
                return Err(FormFillError::Validation(format!(
                    "box {} appears twice",
                    b.id
                )));
            }
            // Same checks as a fresh create, but the stored height wins over
            // the uniform height so nothing changes on reload
            let prepared = boxes.prepare(
                &BoxPlacement::new(b.page, b.rect()),
                self.template.page_count,
            )?;
            if prepared.rect != b.rect() {
                return Err(FormFillError::Validation(format!(
                    "box {} has out-of-range geometry",
                    b.id
                )));
            }
            boxes.restore(b.clone());
        }
        boxes.set_uniform_height(self.uniform_height)?;

        let mut fields = FieldComposer::new();
        for f in &self.fields {
            if f.template_id != template_id {
                return Err(FormFillError::Validation(format!(
                    "field {} belongs to template {}, not {}",
                    f.id, f.template_id, template_id
                )));
            }
            if fields.get(f.id).is_some() {
                return Err(FormFillError::Validation(format!(
                    "field {} appears twice",
                    f.id
                )));
            }
            fields.restore(f.clone(), &boxes)?;
        }

        Ok((boxes, fields))
    }
}
