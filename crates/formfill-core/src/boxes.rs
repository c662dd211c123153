//! Per-template box collection
//!
//! Owns box geometry only. Whether a box is referenced by a field is the
//! composer's business; [`crate::store::FormStore`] checks both before
//! mutating.

use std::collections::BTreeMap;

use crate::coords::Rect;
use crate::error::FormFillError;
use crate::model::{BoundingBox, BoxId, BoxPlacement, TemplateId};

#[derive(Debug, Clone, Default)]
pub struct BoxStore {
    boxes: BTreeMap<BoxId, BoundingBox>,
    uniform_height: Option<f64>,
}

fn check_dimension(name: &str, value: f64) -> Result<(), FormFillError> {
    if !value.is_finite() {
        return Err(FormFillError::Validation(format!(
            "box {} must be a finite number",
            name
        )));
    }
    if value <= 0.0 {
        return Err(FormFillError::Validation(format!(
            "box {} must be greater than 0, got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_coordinate(name: &str, value: f64) -> Result<f64, FormFillError> {
    if !value.is_finite() {
        return Err(FormFillError::Validation(format!(
            "box {} must be a finite number",
            name
        )));
    }
    Ok(value.max(0.0))
}

impl BoxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BoxId) -> Option<&BoundingBox> {
        self.boxes.get(&id)
    }

    pub fn contains(&self, id: BoxId) -> bool {
        self.boxes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = BoxId> + '_ {
        self.boxes.keys().copied()
    }

    pub fn uniform_height(&self) -> Option<f64> {
        self.uniform_height
    }

    /// Height adopted by every box created while set. `None` turns it off.
    pub fn set_uniform_height(&mut self, height: Option<f64>) -> Result<(), FormFillError> {
        if let Some(h) = height {
            check_dimension("height", h)?;
        }
        self.uniform_height = height;
        Ok(())
    }

    /// Validate a placement against the template and return the geometry
    /// that would actually be stored.
    pub fn prepare(
        &self,
        placement: &BoxPlacement,
        page_count: u32,
    ) -> Result<BoxPlacement, FormFillError> {
        if placement.page == 0 || placement.page > page_count {
            return Err(FormFillError::Validation(format!(
                "page {} is out of range 1..={}",
                placement.page, page_count
            )));
        }

        let rect = placement.rect;
        let x = check_coordinate("x", rect.x)?;
        let y = check_coordinate("y", rect.y)?;
        check_dimension("width", rect.width)?;
        let height = match self.uniform_height {
            Some(h) => h,
            None => {
                check_dimension("height", rect.height)?;
                rect.height
            }
        };

        Ok(BoxPlacement::new(
            placement.page,
            Rect::new(x, y, rect.width, height),
        ))
    }

    fn insert(
        &mut self,
        id: BoxId,
        template_id: TemplateId,
        placement: BoxPlacement,
    ) -> BoundingBox {
        let created = BoundingBox {
            id,
            template_id,
            page: placement.page,
            x: placement.rect.x,
            y: placement.rect.y,
            width: placement.rect.width,
            height: placement.rect.height,
        };
        self.boxes.insert(id, created.clone());
        created
    }

    /// Put an already-validated box back, used when restoring a snapshot
    pub(crate) fn restore(&mut self, b: BoundingBox) {
        self.boxes.insert(b.id, b);
    }

    pub fn create(
        &mut self,
        id: BoxId,
        template_id: TemplateId,
        placement: &BoxPlacement,
        page_count: u32,
    ) -> Result<BoundingBox, FormFillError> {
        let prepared = self.prepare(placement, page_count)?;
        Ok(self.insert(id, template_id, prepared))
    }

    /// Create every placement or none. Ids are only drawn once the whole
    /// batch has validated, and come back in input order.
    pub fn bulk_create(
        &mut self,
        next_id: &mut dyn FnMut() -> BoxId,
        template_id: TemplateId,
        placements: &[BoxPlacement],
        page_count: u32,
    ) -> Result<Vec<BoundingBox>, FormFillError> {
        if placements.is_empty() {
            return Err(FormFillError::Validation(
                "at least one bounding box is required".into(),
            ));
        }

        let prepared = placements
            .iter()
            .enumerate()
            .map(|(i, p)| {
                self.prepare(p, page_count).map_err(|e| match e {
                    FormFillError::Validation(msg) => {
                        FormFillError::Validation(format!("box #{}: {}", i + 1, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(prepared
            .into_iter()
            .map(|p| self.insert(next_id(), template_id, p))
            .collect())
    }

    /// Move the box origin, clamping at the page's top-left corner
    pub fn move_to(&mut self, id: BoxId, x: f64, y: f64) -> Result<BoundingBox, FormFillError> {
        let x = check_coordinate("x", x)?;
        let y = check_coordinate("y", y)?;
        let b = self
            .boxes
            .get_mut(&id)
            .ok_or_else(|| FormFillError::box_not_found(id))?;
        b.x = x;
        b.y = y;
        Ok(b.clone())
    }

    pub fn resize(
        &mut self,
        id: BoxId,
        width: f64,
        height: f64,
    ) -> Result<BoundingBox, FormFillError> {
        check_dimension("width", width)?;
        check_dimension("height", height)?;
        let b = self
            .boxes
            .get_mut(&id)
            .ok_or_else(|| FormFillError::box_not_found(id))?;
        b.width = width;
        b.height = height;
        Ok(b.clone())
    }

    /// Replace position and size together. The box is untouched unless
    /// every value is valid.
    pub fn set_geometry(&mut self, id: BoxId, rect: Rect) -> Result<BoundingBox, FormFillError> {
        let x = check_coordinate("x", rect.x)?;
        let y = check_coordinate("y", rect.y)?;
        check_dimension("width", rect.width)?;
        check_dimension("height", rect.height)?;
        let b = self
            .boxes
            .get_mut(&id)
            .ok_or_else(|| FormFillError::box_not_found(id))?;
        b.x = x;
        b.y = y;
        b.width = rect.width;
        b.height = rect.height;
        Ok(b.clone())
    }

    pub fn remove(&mut self, id: BoxId) -> Option<BoundingBox> {
        self.boxes.remove(&id)
    }

    /// All boxes ordered by `(page, id)`
    pub fn list(&self) -> Vec<BoundingBox> {
        let mut all: Vec<BoundingBox> = self.boxes.values().cloned().collect();
        all.sort_by_key(|b| (b.page, b.id));
        all
    }

    pub fn list_page(&self, page: u32) -> Vec<BoundingBox> {
        // BTreeMap iteration is already id-ordered
        self.boxes
            .values()
            .filter(|b| b.page == page)
            .cloned()
            .collect()
    }
}
