//! Field composition: many boxes to one named field
//!
//! The composer owns the box -> field association. A box id appears in at
//! most one field; the reverse index `owners` is kept in step with every
//! field insert and removal so exclusivity checks never scan.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use crate::boxes::BoxStore;
use crate::error::FormFillError;
use crate::model::{
    BoxId, Field, FieldId, FieldUpdate, NewField, ResolvedBox, ResolvedField, TemplateId,
    DEFAULT_FONT_SIZE,
};

#[derive(Debug, Clone, Default)]
pub struct FieldComposer {
    fields: BTreeMap<FieldId, Field>,
    owners: HashMap<BoxId, FieldId>,
}

fn check_font_size(size: f64) -> Result<f64, FormFillError> {
    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(FormFillError::Validation(format!(
            "font size must be greater than 0, got {}",
            size
        )))
    }
}

/// Collapse repeated ids, keeping the first occurrence
fn ordered_set(ids: &[BoxId]) -> Vec<BoxId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl FieldComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(&id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn owner_of(&self, box_id: BoxId) -> Option<FieldId> {
        self.owners.get(&box_id).copied()
    }

    pub fn is_mapped(&self, box_id: BoxId) -> bool {
        self.owners.contains_key(&box_id)
    }

    fn mapped_conflict(&self, box_id: BoxId) -> Option<FormFillError> {
        let field_id = self.owner_of(box_id)?;
        let name = self
            .fields
            .get(&field_id)
            .map(|f| f.name.as_str())
            .unwrap_or("?");
        Some(FormFillError::Conflict(format!(
            "box {} is already mapped to field '{}'",
            box_id, name
        )))
    }

    /// Check that a box may join a new field
    pub fn select_for_field(&self, box_id: BoxId, boxes: &BoxStore) -> Result<(), FormFillError> {
        if !boxes.contains(box_id) {
            return Err(FormFillError::box_not_found(box_id));
        }
        match self.mapped_conflict(box_id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn create(
        &mut self,
        id: FieldId,
        template_id: TemplateId,
        new: NewField,
        boxes: &BoxStore,
    ) -> Result<Field, FormFillError> {
        let box_ids = ordered_set(&new.box_ids);
        if box_ids.is_empty() {
            return Err(FormFillError::Validation(
                "at least one box must be selected".into(),
            ));
        }

        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(FormFillError::Validation("field name is required".into()));
        }
        if self.fields.values().any(|f| f.name == name) {
            return Err(FormFillError::Validation(format!(
                "field name '{}' already exists in this template",
                name
            )));
        }

        let font_size = check_font_size(new.font_size.unwrap_or(DEFAULT_FONT_SIZE))?;
        let label = match new.label.trim() {
            "" => name.clone(),
            l => l.to_string(),
        };

        // Re-checked here, not only at selection time
        for box_id in &box_ids {
            self.select_for_field(*box_id, boxes)?;
        }

        let field = Field {
            id,
            template_id,
            name,
            label,
            value_type: new.value_type,
            font_size,
            box_ids,
        };
        self.insert(field.clone());
        Ok(field)
    }

    fn insert(&mut self, field: Field) {
        for box_id in &field.box_ids {
            self.owners.insert(*box_id, field.id);
        }
        self.fields.insert(field.id, field);
    }

    /// Put a field back from a snapshot, re-checking exclusivity
    pub(crate) fn restore(&mut self, field: Field, boxes: &BoxStore) -> Result<(), FormFillError> {
        if field.box_ids.is_empty() {
            return Err(FormFillError::Validation(format!(
                "field '{}' has no boxes",
                field.name
            )));
        }
        if self.fields.values().any(|f| f.name == field.name) {
            return Err(FormFillError::Validation(format!(
                "field name '{}' appears twice",
                field.name
            )));
        }
        check_font_size(field.font_size)?;
        for box_id in &field.box_ids {
            self.select_for_field(*box_id, boxes)?;
        }
        self.insert(field);
        Ok(())
    }

    pub fn update(&mut self, id: FieldId, update: FieldUpdate) -> Result<Field, FormFillError> {
        let font_size = update.font_size.map(check_font_size).transpose()?;
        let field = self
            .fields
            .get_mut(&id)
            .ok_or_else(|| FormFillError::field_not_found(id))?;

        if let Some(label) = update.label {
            let label = label.trim();
            if !label.is_empty() {
                field.label = label.to_string();
            }
        }
        if let Some(value_type) = update.value_type {
            field.value_type = value_type;
        }
        if let Some(size) = font_size {
            field.font_size = size;
        }
        Ok(field.clone())
    }

    /// Remove a field and release its boxes to the unmapped pool
    pub fn remove(&mut self, id: FieldId) -> Option<Field> {
        let field = self.fields.remove(&id)?;
        for box_id in &field.box_ids {
            self.owners.remove(box_id);
        }
        Some(field)
    }

    /// Fields ordered by id
    pub fn list(&self) -> Vec<Field> {
        self.fields.values().cloned().collect()
    }

    /// Expand every field with the geometry of its boxes, boxes ordered by `(page, id)`
    pub fn resolve(&self, boxes: &BoxStore) -> Vec<ResolvedField> {
        self.fields
            .values()
            .map(|field| {
                let mut resolved: Vec<ResolvedBox> = field
                    .box_ids
                    .iter()
                    .filter_map(|id| match boxes.get(*id) {
                        Some(b) => Some(ResolvedBox::from(b)),
                        None => {
                            warn!("Field '{}' references missing box {}", field.name, id);
                            None
                        }
                    })
                    .collect();
                resolved.sort_by_key(|b| (b.page, b.id));

                ResolvedField {
                    id: field.id,
                    name: field.name.clone(),
                    label: field.label.clone(),
                    value_type: field.value_type,
                    font_size: field.font_size,
                    boxes: resolved,
                }
            })
            .collect()
    }
}
