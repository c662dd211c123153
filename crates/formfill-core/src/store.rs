//! Template-scoped store for boxes and fields
//!
//! Every template carries its own mutex; all mutations of one template are
//! serialized through it while different templates proceed independently.
//! Box and field ids are global, so two small indexes map them back to their
//! template.
//!
//! Lock order: a template mutex is always taken before an index lock, and the
//! template map lock is never held while waiting on a template mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::boxes::BoxStore;
use crate::error::FormFillError;
use crate::fields::FieldComposer;
use crate::model::{
    BoundingBox, BoxId, BoxPlacement, BoxUpdate, Field, FieldId, FieldUpdate, NewField,
    NewTemplate, ResolvedField, Template, TemplateId,
};
use crate::snapshot::TemplateSnapshot;

#[derive(Debug)]
struct TemplateState {
    template: Template,
    boxes: BoxStore,
    fields: FieldComposer,
    revision: u64,
    /// Set once the template has been removed; late lock holders bail out
    deleted: bool,
}

impl TemplateState {
    fn snapshot(&self) -> TemplateSnapshot {
        TemplateSnapshot {
            template: self.template.clone(),
            revision: self.revision,
            uniform_height: self.boxes.uniform_height(),
            boxes: self.boxes.list(),
            fields: self.fields.list(),
        }
    }

    fn ensure_unmapped(&self, box_id: BoxId, action: &str) -> Result<(), FormFillError> {
        match self.fields.owner_of(box_id).and_then(|f| self.fields.get(f)) {
            Some(field) => Err(FormFillError::Conflict(format!(
                "cannot {} box {}: it is mapped to field '{}'",
                action, box_id, field.name
            ))),
            None => Ok(()),
        }
    }

    fn ensure_box(&self, box_id: BoxId) -> Result<&BoundingBox, FormFillError> {
        self.boxes
            .get(box_id)
            .ok_or_else(|| FormFillError::box_not_found(box_id))
    }
}

fn lock(m: &Mutex<TemplateState>) -> MutexGuard<'_, TemplateState> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strip a trailing `.pdf` (any case) from an upload filename
fn default_template_name(filename: &str) -> String {
    let trimmed = filename.trim();
    let has_extension = |cut: usize| {
        trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".pdf")
    };
    match trimmed.len().checked_sub(4) {
        Some(cut) if has_extension(cut) => trimmed[..cut].to_string(),
        _ => trimmed.to_string(),
    }
}

#[derive(Debug)]
pub struct FormStore {
    templates: RwLock<BTreeMap<TemplateId, Arc<Mutex<TemplateState>>>>,
    box_index: RwLock<HashMap<BoxId, TemplateId>>,
    field_index: RwLock<HashMap<FieldId, TemplateId>>,
    next_template_id: AtomicI64,
    next_box_id: AtomicI64,
    next_field_id: AtomicI64,
}

impl Default for FormStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FormStore {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(BTreeMap::new()),
            box_index: RwLock::new(HashMap::new()),
            field_index: RwLock::new(HashMap::new()),
            next_template_id: AtomicI64::new(1),
            next_box_id: AtomicI64::new(1),
            next_field_id: AtomicI64::new(1),
        }
    }

    fn template_state(&self, id: TemplateId) -> Result<Arc<Mutex<TemplateState>>, FormFillError> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| FormFillError::template_not_found(id))
    }

    fn template_of_box(&self, box_id: BoxId) -> Result<TemplateId, FormFillError> {
        self.box_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&box_id)
            .copied()
            .ok_or_else(|| FormFillError::box_not_found(box_id))
    }

    fn template_of_field(&self, field_id: FieldId) -> Result<TemplateId, FormFillError> {
        self.field_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&field_id)
            .copied()
            .ok_or_else(|| FormFillError::field_not_found(field_id))
    }

    /// Run a read-only closure under the template's lock
    fn read<T>(
        &self,
        id: TemplateId,
        f: impl FnOnce(&TemplateState) -> Result<T, FormFillError>,
    ) -> Result<T, FormFillError> {
        let state = self.template_state(id)?;
        let guard = lock(&state);
        if guard.deleted {
            return Err(FormFillError::template_not_found(id));
        }
        f(&guard)
    }

    /// Run a mutation under the template's lock; the revision moves only on success
    fn mutate<T>(
        &self,
        id: TemplateId,
        f: impl FnOnce(&mut TemplateState) -> Result<T, FormFillError>,
    ) -> Result<T, FormFillError> {
        let state = self.template_state(id)?;
        let mut guard = lock(&state);
        if guard.deleted {
            return Err(FormFillError::template_not_found(id));
        }
        let out = f(&mut guard)?;
        guard.revision += 1;
        Ok(out)
    }

    fn index_boxes(&self, template_id: TemplateId, ids: impl IntoIterator<Item = BoxId>) {
        let mut index = self.box_index.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            index.insert(id, template_id);
        }
    }

    // Templates

    pub fn create_template(&self, new: NewTemplate) -> Result<Template, FormFillError> {
        let filename = new.filename.trim().to_string();
        if filename.is_empty() {
            return Err(FormFillError::Validation("filename is required".into()));
        }
        if new.page_count == 0 {
            return Err(FormFillError::Validation(
                "document must have at least one page".into(),
            ));
        }
        let name = match new.name.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => default_template_name(&filename),
        };

        let template = Template {
            id: self.next_template_id.fetch_add(1, Ordering::SeqCst),
            name,
            filename,
            file_path: new.file_path,
            page_count: new.page_count,
            created_at: Utc::now(),
        };
        let state = TemplateState {
            template: template.clone(),
            boxes: BoxStore::new(),
            fields: FieldComposer::new(),
            revision: 1,
            deleted: false,
        };
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template.id, Arc::new(Mutex::new(state)));

        info!(
            "Created template {} '{}' ({} pages)",
            template.id, template.name, template.page_count
        );
        Ok(template)
    }

    pub fn get_template(&self, id: TemplateId) -> Result<Template, FormFillError> {
        self.read(id, |s| Ok(s.template.clone()))
    }

    /// Newest first
    pub fn list_templates(&self) -> Vec<Template> {
        let states: Vec<_> = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut templates: Vec<Template> = states
            .iter()
            .map(|s| lock(s.as_ref()))
            .filter(|s| !s.deleted)
            .map(|s| s.template.clone())
            .collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        templates
    }

    /// Remove a template together with all of its boxes and fields
    pub fn delete_template(&self, id: TemplateId) -> Result<Template, FormFillError> {
        let state = self
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or_else(|| FormFillError::template_not_found(id))?;

        let mut guard = lock(&state);
        guard.deleted = true;
        {
            let mut boxes = self.box_index.write().unwrap_or_else(PoisonError::into_inner);
            for box_id in guard.boxes.ids() {
                boxes.remove(&box_id);
            }
        }
        {
            let mut fields = self.field_index.write().unwrap_or_else(PoisonError::into_inner);
            for field in guard.fields.list() {
                fields.remove(&field.id);
            }
        }

        info!(
            "Deleted template {} with {} boxes and {} fields",
            id,
            guard.boxes.len(),
            guard.fields.len()
        );
        guard.boxes = BoxStore::new();
        guard.fields = FieldComposer::new();
        Ok(guard.template.clone())
    }

    /// Ids of templates created strictly before `cutoff`
    pub fn templates_older_than(&self, cutoff: DateTime<Utc>) -> Vec<TemplateId> {
        let mut ids: Vec<TemplateId> = self
            .list_templates()
            .into_iter()
            .filter(|t| t.created_at < cutoff)
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn revision(&self, id: TemplateId) -> Result<u64, FormFillError> {
        self.read(id, |s| Ok(s.revision))
    }

    // Boxes

    pub fn create_box(
        &self,
        template_id: TemplateId,
        placement: BoxPlacement,
    ) -> Result<BoundingBox, FormFillError> {
        let created = self.mutate(template_id, |s| {
            let page_count = s.template.page_count;
            s.boxes.prepare(&placement, page_count)?;
            let id = self.next_box_id.fetch_add(1, Ordering::SeqCst);
            let created = s.boxes.create(id, template_id, &placement, page_count)?;
            self.index_boxes(template_id, [created.id]);
            Ok(created)
        })?;
        debug!(
            "Created box {} on page {} of template {}",
            created.id, created.page, template_id
        );
        Ok(created)
    }

    /// All-or-nothing: either every placement becomes a box or none does
    pub fn bulk_create_boxes(
        &self,
        template_id: TemplateId,
        placements: &[BoxPlacement],
    ) -> Result<Vec<BoundingBox>, FormFillError> {
        let created = self.mutate(template_id, |s| {
            let page_count = s.template.page_count;
            let mut next = || self.next_box_id.fetch_add(1, Ordering::SeqCst);
            let created = s
                .boxes
                .bulk_create(&mut next, template_id, placements, page_count)?;
            self.index_boxes(template_id, created.iter().map(|b| b.id));
            Ok(created)
        })?;
        info!(
            "Created {} bounding boxes for template {}",
            created.len(),
            template_id
        );
        Ok(created)
    }

    pub fn get_box(&self, box_id: BoxId) -> Result<BoundingBox, FormFillError> {
        let template_id = self.template_of_box(box_id)?;
        self.read(template_id, |s| s.ensure_box(box_id).cloned())
    }

    pub fn move_box(&self, box_id: BoxId, x: f64, y: f64) -> Result<BoundingBox, FormFillError> {
        let template_id = self.template_of_box(box_id)?;
        self.mutate(template_id, |s| {
            s.ensure_box(box_id)?;
            s.ensure_unmapped(box_id, "move")?;
            s.boxes.move_to(box_id, x, y)
        })
    }

    pub fn resize_box(
        &self,
        box_id: BoxId,
        width: f64,
        height: f64,
    ) -> Result<BoundingBox, FormFillError> {
        let template_id = self.template_of_box(box_id)?;
        self.mutate(template_id, |s| {
            s.ensure_box(box_id)?;
            s.ensure_unmapped(box_id, "resize")?;
            s.boxes.resize(box_id, width, height)
        })
    }

    /// Move and resize in one step: either the whole update lands or the box
    /// keeps its old geometry
    pub fn update_box_geometry(
        &self,
        box_id: BoxId,
        update: BoxUpdate,
    ) -> Result<BoundingBox, FormFillError> {
        if update.is_empty() {
            return Err(FormFillError::Validation(
                "expected at least one of x, y, width, height".into(),
            ));
        }
        let template_id = self.template_of_box(box_id)?;
        self.mutate(template_id, |s| {
            let current = s.ensure_box(box_id)?.rect();
            s.ensure_unmapped(box_id, "update")?;
            s.boxes.set_geometry(box_id, update.apply_to(current))
        })
    }

    /// Boxes referenced by a field cannot be deleted; delete the field first
    pub fn delete_box(&self, box_id: BoxId) -> Result<BoundingBox, FormFillError> {
        let template_id = self.template_of_box(box_id)?;
        let removed = self.mutate(template_id, |s| {
            s.ensure_box(box_id)?;
            s.ensure_unmapped(box_id, "delete")?;
            let removed = s
                .boxes
                .remove(box_id)
                .ok_or_else(|| FormFillError::box_not_found(box_id))?;
            self.box_index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&box_id);
            Ok(removed)
        })?;
        debug!("Deleted box {} from template {}", box_id, template_id);
        Ok(removed)
    }

    pub fn set_uniform_height(
        &self,
        template_id: TemplateId,
        height: Option<f64>,
    ) -> Result<(), FormFillError> {
        self.mutate(template_id, |s| s.boxes.set_uniform_height(height))
    }

    pub fn uniform_height(&self, template_id: TemplateId) -> Result<Option<f64>, FormFillError> {
        self.read(template_id, |s| Ok(s.boxes.uniform_height()))
    }

    /// Give every unmapped box the template's uniform height. Returns the
    /// boxes that changed; mapped boxes keep their geometry.
    pub fn apply_uniform_height(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<BoundingBox>, FormFillError> {
        let updated = self.mutate(template_id, |s| {
            let height = s.boxes.uniform_height().ok_or_else(|| {
                FormFillError::Validation("no uniform height is set for this template".into())
            })?;
            let targets: Vec<BoundingBox> = s
                .boxes
                .list()
                .into_iter()
                .filter(|b| !s.fields.is_mapped(b.id) && b.height != height)
                .collect();
            targets
                .into_iter()
                .map(|b| s.boxes.resize(b.id, b.width, height))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(
            "Applied uniform height to {} boxes of template {}",
            updated.len(),
            template_id
        );
        Ok(updated)
    }

    /// Ordered by `(page, id)`
    pub fn list_boxes(&self, template_id: TemplateId) -> Result<Vec<BoundingBox>, FormFillError> {
        self.read(template_id, |s| Ok(s.boxes.list()))
    }

    pub fn list_boxes_on_page(
        &self,
        template_id: TemplateId,
        page: u32,
    ) -> Result<Vec<BoundingBox>, FormFillError> {
        self.read(template_id, |s| Ok(s.boxes.list_page(page)))
    }

    // Fields

    /// Fails with a conflict when the box already belongs to a field
    pub fn select_for_field(&self, box_id: BoxId) -> Result<BoundingBox, FormFillError> {
        let template_id = self.template_of_box(box_id)?;
        self.read(template_id, |s| {
            s.fields.select_for_field(box_id, &s.boxes)?;
            s.ensure_box(box_id).cloned()
        })
    }

    pub fn create_field(
        &self,
        template_id: TemplateId,
        new: NewField,
    ) -> Result<Field, FormFillError> {
        let field = self.mutate(template_id, |s| {
            {
                let index = self.box_index.read().unwrap_or_else(PoisonError::into_inner);
                for box_id in &new.box_ids {
                    match index.get(box_id) {
                        Some(owner) if *owner != template_id => {
                            return Err(FormFillError::Validation(format!(
                                "box {} belongs to template {}",
                                box_id, owner
                            )));
                        }
                        Some(_) => {}
                        None => return Err(FormFillError::box_not_found(*box_id)),
                    }
                }
            }
            // Exclusivity and name checks run in the composer under this lock
            let id = self.next_field_id.fetch_add(1, Ordering::SeqCst);
            let field = s.fields.create(id, template_id, new, &s.boxes)?;
            self.field_index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(field.id, template_id);
            Ok(field)
        })?;
        info!(
            "Created field '{}' ({}) with {} boxes on template {}",
            field.name,
            field.id,
            field.box_ids.len(),
            template_id
        );
        Ok(field)
    }

    pub fn get_field(&self, field_id: FieldId) -> Result<Field, FormFillError> {
        let template_id = self.template_of_field(field_id)?;
        self.read(template_id, |s| {
            s.fields
                .get(field_id)
                .cloned()
                .ok_or_else(|| FormFillError::field_not_found(field_id))
        })
    }

    pub fn update_field(
        &self,
        field_id: FieldId,
        update: FieldUpdate,
    ) -> Result<Field, FormFillError> {
        let template_id = self.template_of_field(field_id)?;
        self.mutate(template_id, |s| s.fields.update(field_id, update))
    }

    /// Remove the field; its boxes go back to the unmapped pool
    pub fn delete_field(&self, field_id: FieldId) -> Result<Field, FormFillError> {
        let template_id = self.template_of_field(field_id)?;
        let removed = self.mutate(template_id, |s| {
            let removed = s
                .fields
                .remove(field_id)
                .ok_or_else(|| FormFillError::field_not_found(field_id))?;
            self.field_index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&field_id);
            Ok(removed)
        })?;
        info!(
            "Deleted field '{}' ({}), released {} boxes",
            removed.name,
            removed.id,
            removed.box_ids.len()
        );
        Ok(removed)
    }

    /// Ordered by id
    pub fn list_fields(&self, template_id: TemplateId) -> Result<Vec<Field>, FormFillError> {
        self.read(template_id, |s| Ok(s.fields.list()))
    }

    /// Fields with the full geometry of their boxes, the input of a fill
    pub fn resolve(&self, template_id: TemplateId) -> Result<Vec<ResolvedField>, FormFillError> {
        self.read(template_id, |s| Ok(s.fields.resolve(&s.boxes)))
    }

    // Persistence

    pub fn snapshot(&self, template_id: TemplateId) -> Result<TemplateSnapshot, FormFillError> {
        self.read(template_id, |s| Ok(s.snapshot()))
    }

    /// Load a previously saved template. Every invariant is checked again and
    /// id counters move past the restored ids.
    pub fn restore(&self, snapshot: TemplateSnapshot) -> Result<(), FormFillError> {
        let template_id = snapshot.template.id;
        let (boxes, fields) = snapshot.rebuild()?;

        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        if templates.contains_key(&template_id) {
            return Err(FormFillError::Conflict(format!(
                "template {} is already loaded",
                template_id
            )));
        }
        {
            let box_index = self.box_index.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(id) = boxes.ids().find(|id| box_index.contains_key(id)) {
                return Err(FormFillError::Conflict(format!(
                    "box {} is already loaded",
                    id
                )));
            }
            let field_index = self.field_index.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(f) = fields.list().iter().find(|f| field_index.contains_key(&f.id)) {
                return Err(FormFillError::Conflict(format!(
                    "field {} is already loaded",
                    f.id
                )));
            }
        }

        self.index_boxes(template_id, boxes.ids());
        self.field_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(fields.list().iter().map(|f| (f.id, template_id)));

        let max_box = boxes.ids().max().unwrap_or(0);
        let max_field = fields.list().iter().map(|f| f.id).max().unwrap_or(0);
        self.next_template_id
            .fetch_max(template_id + 1, Ordering::SeqCst);
        self.next_box_id.fetch_max(max_box + 1, Ordering::SeqCst);
        self.next_field_id.fetch_max(max_field + 1, Ordering::SeqCst);

        debug!(
            "Restored template {} at revision {} ({} boxes, {} fields)",
            template_id,
            snapshot.revision,
            boxes.len(),
            fields.len()
        );
        templates.insert(
            template_id,
            Arc::new(Mutex::new(TemplateState {
                template: snapshot.template,
                boxes,
                fields,
                revision: snapshot.revision,
                deleted: false,
            })),
        );
        Ok(())
    }
}
