//! Editor session: per-user view state and the pointer gesture machine
//!
//! Everything the authoring UI needs to remember between events lives here
//! (current page, zoom, selection, gesture in progress) instead of in global
//! state. Pointer events arrive in device space; the session converts them
//! with the zoom in effect at that moment, keeps them on the rendered page
//! and only ever hands document-space geometry to the store.

use crate::coords::{to_document_len, to_document_point, MediaBox, PageViewport, Point, Rect, Zoom};
use crate::error::FormFillError;
use crate::model::{
    BoundingBox, BoxId, BoxPlacement, Field, NewField, TemplateId, ValueType,
};
use crate::store::FormStore;

/// Drawn boxes must be wider than this, in document units
pub const MIN_DRAW_WIDTH: f64 = 10.0;

pub const DEFAULT_BOX_HEIGHT: f64 = 20.0;

/// Box under the pointer when a press starts, with its stored geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHit {
    pub box_id: BoxId,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { at: Point, hit: Option<BoxHit> },
    Move { at: Point },
    Up { at: Point },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Idle,
    Drawing { start: Point },
    /// `grab` is the pointer offset from the box origin, in document units
    Dragging {
        box_id: BoxId,
        grab: Point,
        width: f64,
        height: f64,
    },
}

/// What a pointer event produced. Previews are for display only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    Nothing,
    DrawPreview(Rect),
    MovePreview { box_id: BoxId, x: f64, y: f64 },
    Create(BoxPlacement),
    Move { box_id: BoxId, x: f64, y: f64 },
}

#[derive(Debug, Clone)]
pub struct EditorSession {
    template_id: TemplateId,
    page_count: u32,
    current_page: u32,
    viewport: PageViewport,
    selection: Vec<BoxId>,
    box_height: f64,
    gesture: Gesture,
}

impl EditorSession {
    pub fn new(template_id: TemplateId, page_count: u32) -> Result<Self, FormFillError> {
        if page_count == 0 {
            return Err(FormFillError::Validation(
                "document must have at least one page".into(),
            ));
        }
        let letter = MediaBox::letter();
        Ok(Self {
            template_id,
            page_count,
            current_page: 1,
            viewport: PageViewport::new(letter.width, letter.height, Zoom::ONE),
            selection: Vec::new(),
            box_height: DEFAULT_BOX_HEIGHT,
            gesture: Gesture::Idle,
        })
    }

    /// Open a session on a stored template
    pub fn open(store: &FormStore, template_id: TemplateId) -> Result<Self, FormFillError> {
        let template = store.get_template(template_id)?;
        Self::new(template.id, template.page_count)
    }

    pub fn template_id(&self) -> TemplateId {
        self.template_id
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn zoom(&self) -> Zoom {
        self.viewport.zoom
    }

    pub fn viewport(&self) -> PageViewport {
        self.viewport
    }

    /// Natural size of the rendered page in document units. Until the page
    /// reports its size, US Letter is assumed.
    pub fn set_page_size(&mut self, width: f64, height: f64) -> Result<(), FormFillError> {
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(FormFillError::Validation(format!(
                "page size must be positive, got {}x{}",
                width, height
            )));
        }
        if (width, height) != (self.viewport.width, self.viewport.height) {
            self.gesture = Gesture::Idle;
            self.viewport = PageViewport::new(width, height, self.viewport.zoom);
        }
        Ok(())
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn box_height(&self) -> f64 {
        self.box_height
    }

    pub fn set_box_height(&mut self, height: f64) -> Result<(), FormFillError> {
        if !(height.is_finite() && height > 0.0) {
            return Err(FormFillError::Validation(format!(
                "box height must be greater than 0, got {}",
                height
            )));
        }
        self.box_height = height;
        Ok(())
    }

    // Navigation

    pub fn go_to_page(&mut self, page: u32) -> Result<(), FormFillError> {
        if page == 0 || page > self.page_count {
            return Err(FormFillError::Validation(format!(
                "page {} is out of range 1..={}",
                page, self.page_count
            )));
        }
        if page != self.current_page {
            self.gesture = Gesture::Idle;
            self.current_page = page;
        }
        Ok(())
    }

    /// Returns false when already on the last page
    pub fn next_page(&mut self) -> bool {
        if self.current_page >= self.page_count {
            return false;
        }
        self.gesture = Gesture::Idle;
        self.current_page += 1;
        true
    }

    pub fn prev_page(&mut self) -> bool {
        if self.current_page <= 1 {
            return false;
        }
        self.gesture = Gesture::Idle;
        self.current_page -= 1;
        true
    }

    /// Switch zoom. A gesture in flight is dropped since its device-space
    /// anchor no longer means anything.
    pub fn set_zoom(&mut self, zoom: Zoom) {
        if zoom != self.viewport.zoom {
            self.gesture = Gesture::Idle;
            self.viewport = self.viewport.with_zoom(zoom);
        }
    }

    // Selection

    /// Selected boxes in the order they were picked; spans pages
    pub fn selection(&self) -> &[BoxId] {
        &self.selection
    }

    pub fn is_selected(&self, box_id: BoxId) -> bool {
        self.selection.contains(&box_id)
    }

    /// Toggle a box in or out of the selection. Returns whether it is now
    /// selected. Boxes already mapped to a field cannot be selected.
    pub fn toggle_selection(
        &mut self,
        store: &FormStore,
        box_id: BoxId,
    ) -> Result<bool, FormFillError> {
        if let Some(pos) = self.selection.iter().position(|id| *id == box_id) {
            self.selection.remove(pos);
            return Ok(false);
        }
        let b = store.select_for_field(box_id)?;
        if b.template_id != self.template_id {
            return Err(FormFillError::Validation(format!(
                "box {} belongs to template {}",
                box_id, b.template_id
            )));
        }
        self.selection.push(box_id);
        Ok(true)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Turn the selection into a field; the selection is cleared on success
    pub fn create_field(
        &mut self,
        store: &FormStore,
        name: &str,
        label: &str,
        value_type: ValueType,
        font_size: Option<f64>,
    ) -> Result<Field, FormFillError> {
        let field = store.create_field(
            self.template_id,
            NewField {
                name: name.to_string(),
                label: label.to_string(),
                value_type,
                font_size,
                box_ids: self.selection.clone(),
            },
        )?;
        self.selection.clear();
        Ok(field)
    }

    // Gestures

    /// Drawn box from press to release; the bottom edge stays on the page
    fn draw_rect(&self, start: Point, end: Point) -> Rect {
        let height = self.box_height;
        let y = start.y.min((self.viewport.height - height).max(0.0));
        Rect::new(start.x.min(end.x), y, (end.x - start.x).abs(), height)
    }

    /// Origin of a dragged box, kept wholly on the page where it fits
    fn drag_origin(&self, at: Point, grab: Point, width: f64, height: f64) -> (f64, f64) {
        let max_x = (self.viewport.width - width).max(0.0);
        let max_y = (self.viewport.height - height).max(0.0);
        (
            (at.x - grab.x).clamp(0.0, max_x),
            (at.y - grab.y).clamp(0.0, max_y),
        )
    }

    /// Feed one pointer event through the gesture machine. Presses outside
    /// the rendered page are ignored; later points are pulled onto it.
    pub fn handle(&mut self, event: PointerEvent) -> GestureOutcome {
        let viewport = self.viewport;
        let doc = |p: Point| viewport.clamp_document(to_document_point(p, viewport.zoom));

        match (self.gesture, event) {
            (Gesture::Idle, PointerEvent::Down { at, .. }) if !viewport.contains_device(at) => {
                GestureOutcome::Nothing
            }
            (Gesture::Idle, PointerEvent::Down { at, hit: Some(hit) }) => {
                let at = doc(at);
                self.gesture = Gesture::Dragging {
                    box_id: hit.box_id,
                    grab: Point::new(at.x - hit.rect.x, at.y - hit.rect.y),
                    width: hit.rect.width,
                    height: hit.rect.height,
                };
                GestureOutcome::Nothing
            }
            (Gesture::Idle, PointerEvent::Down { at, hit: None }) => {
                self.gesture = Gesture::Drawing { start: doc(at) };
                GestureOutcome::Nothing
            }
            (Gesture::Drawing { start }, PointerEvent::Move { at }) => {
                GestureOutcome::DrawPreview(self.draw_rect(start, doc(at)))
            }
            (Gesture::Drawing { start }, PointerEvent::Up { at }) => {
                self.gesture = Gesture::Idle;
                let rect = self.draw_rect(start, doc(at));
                if rect.width > MIN_DRAW_WIDTH {
                    GestureOutcome::Create(BoxPlacement::new(self.current_page, rect))
                } else {
                    GestureOutcome::Nothing
                }
            }
            (
                Gesture::Dragging {
                    box_id,
                    grab,
                    width,
                    height,
                },
                PointerEvent::Move { at },
            ) => {
                let (x, y) = self.drag_origin(doc(at), grab, width, height);
                GestureOutcome::MovePreview { box_id, x, y }
            }
            (
                Gesture::Dragging {
                    box_id,
                    grab,
                    width,
                    height,
                },
                PointerEvent::Up { at },
            ) => {
                self.gesture = Gesture::Idle;
                let (x, y) = self.drag_origin(doc(at), grab, width, height);
                GestureOutcome::Move { box_id, x, y }
            }
            (_, PointerEvent::Cancel) => {
                self.gesture = Gesture::Idle;
                GestureOutcome::Nothing
            }
            // A second press mid-gesture or stray move/up while idle
            _ => GestureOutcome::Nothing,
        }
    }

    /// Apply a final outcome through the store. Previews and no-ops return `None`.
    pub fn commit(
        &self,
        store: &FormStore,
        outcome: GestureOutcome,
    ) -> Result<Option<BoundingBox>, FormFillError> {
        match outcome {
            GestureOutcome::Create(placement) => {
                store.create_box(self.template_id, placement).map(Some)
            }
            GestureOutcome::Move { box_id, x, y } => store.move_box(box_id, x, y).map(Some),
            GestureOutcome::Nothing
            | GestureOutcome::DrawPreview(_)
            | GestureOutcome::MovePreview { .. } => Ok(None),
        }
    }

    /// Convert a device-space length at the current zoom, e.g. a box height
    /// typed in screen pixels
    pub fn document_len(&self, device_len: f64) -> f64 {
        to_document_len(device_len, self.viewport.zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTemplate;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn zoom(z: f64) -> Zoom {
        Zoom::new(z).unwrap()
    }

    fn store_and_session(pages: u32) -> (FormStore, EditorSession) {
        let store = FormStore::new();
        let template = store
            .create_template(NewTemplate {
                name: None,
                filename: "form.pdf".into(),
                file_path: PathBuf::new(),
                page_count: pages,
            })
            .unwrap();
        let session = EditorSession::open(&store, template.id).unwrap();
        (store, session)
    }

    fn placement(page: u32) -> BoxPlacement {
        BoxPlacement::new(page, Rect::new(0.0, 0.0, 50.0, 20.0))
    }

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Down {
            at: Point::new(x, y),
            hit: None,
        }
    }

    fn up(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Up {
            at: Point::new(x, y),
        }
    }

    #[test]
    fn test_draw_at_zoom_stores_document_units() {
        let (store, mut session) = store_and_session(1);
        session.set_zoom(zoom(2.0));
        session.handle(down(400.0, 200.0));
        // Dragged right to left; origin is the leftmost x and the start y
        let outcome = session.handle(up(200.0, 260.0));
        assert_eq!(
            outcome,
            GestureOutcome::Create(BoxPlacement::new(
                1,
                Rect::new(100.0, 100.0, 100.0, DEFAULT_BOX_HEIGHT)
            ))
        );
        let created = session.commit(&store, outcome).unwrap().unwrap();
        assert_eq!((created.x, created.y, created.width), (100.0, 100.0, 100.0));
        assert_eq!(session.gesture(), Gesture::Idle);
    }

    #[test]
    fn test_narrow_draw_discarded() {
        let (_, mut session) = store_and_session(1);
        session.set_zoom(zoom(0.5));
        session.handle(down(0.0, 0.0));
        // 5 device px at zoom 0.5 is exactly 10 document units: not wider
        assert_eq!(session.handle(up(5.0, 0.0)), GestureOutcome::Nothing);
    }

    #[test]
    fn test_drag_keeps_grab_offset_and_clamps() {
        let (_, mut session) = store_and_session(1);
        session.handle(PointerEvent::Down {
            at: Point::new(110.0, 205.0),
            hit: Some(BoxHit {
                box_id: 7,
                rect: Rect::new(100.0, 200.0, 150.0, 30.0),
            }),
        });
        assert_eq!(
            session.handle(PointerEvent::Move {
                at: Point::new(60.0, 305.0)
            }),
            GestureOutcome::MovePreview {
                box_id: 7,
                x: 50.0,
                y: 300.0
            }
        );
        assert_eq!(
            session.handle(up(2.0, 1.0)),
            GestureOutcome::Move {
                box_id: 7,
                x: 0.0,
                y: 0.0
            }
        );
    }

    #[test]
    fn test_drag_stays_on_page() {
        let (_, mut session) = store_and_session(1);
        session.handle(PointerEvent::Down {
            at: Point::new(110.0, 205.0),
            hit: Some(BoxHit {
                box_id: 7,
                rect: Rect::new(100.0, 200.0, 150.0, 30.0),
            }),
        });
        // Far past the bottom-right corner of a Letter page
        assert_eq!(
            session.handle(up(2000.0, 2000.0)),
            GestureOutcome::Move {
                box_id: 7,
                x: 462.0,
                y: 762.0
            }
        );
    }

    #[test]
    fn test_press_outside_page_is_ignored() {
        let (_, mut session) = store_and_session(1);
        session.set_page_size(300.0, 400.0).unwrap();
        session.set_zoom(zoom(2.0));
        assert_eq!(session.viewport().device_size(), (600.0, 800.0));

        assert_eq!(session.handle(down(650.0, 10.0)), GestureOutcome::Nothing);
        assert_eq!(session.gesture(), Gesture::Idle);
        assert_eq!(session.handle(up(700.0, 10.0)), GestureOutcome::Nothing);

        session.handle(down(590.0, 10.0));
        assert_eq!(
            session.gesture(),
            Gesture::Drawing {
                start: Point::new(295.0, 5.0)
            }
        );
    }

    #[test]
    fn test_draw_is_clipped_to_page() {
        let (_, mut session) = store_and_session(1);
        session.handle(down(500.0, 785.0));
        let outcome = session.handle(up(900.0, 785.0));
        assert_eq!(
            outcome,
            GestureOutcome::Create(BoxPlacement::new(
                1,
                Rect::new(500.0, 772.0, 112.0, DEFAULT_BOX_HEIGHT)
            ))
        );
    }

    #[test]
    fn test_page_size_must_be_positive() {
        let (_, mut session) = store_and_session(1);
        assert!(session.set_page_size(0.0, 792.0).is_err());
        assert!(session.set_page_size(612.0, f64::NAN).is_err());
        assert_eq!(session.viewport().width, 612.0);
    }

    #[test]
    fn test_zoom_change_cancels_gesture() {
        let (_, mut session) = store_and_session(1);
        session.handle(down(10.0, 10.0));
        session.set_zoom(zoom(1.5));
        assert_eq!(session.gesture(), Gesture::Idle);
        assert_eq!(session.handle(up(300.0, 10.0)), GestureOutcome::Nothing);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let (_, mut session) = store_and_session(1);
        session.handle(down(10.0, 10.0));
        assert_eq!(session.handle(PointerEvent::Cancel), GestureOutcome::Nothing);
        assert_eq!(session.gesture(), Gesture::Idle);
    }

    #[test]
    fn test_navigation_bounds() {
        let (_, mut session) = store_and_session(2);
        assert!(!session.prev_page());
        assert!(session.next_page());
        assert!(!session.next_page());
        assert_eq!(session.current_page(), 2);
        assert!(session.go_to_page(3).is_err());
        session.go_to_page(1).unwrap();
        assert_eq!(session.current_page(), 1);
    }

    #[test]
    fn test_selection_spans_pages_and_builds_field() {
        let (store, mut session) = store_and_session(2);
        let a = store
            .create_box(session.template_id(), placement(1))
            .unwrap();
        let b = store
            .create_box(session.template_id(), placement(2))
            .unwrap();

        assert!(session.toggle_selection(&store, a.id).unwrap());
        session.next_page();
        assert!(session.toggle_selection(&store, b.id).unwrap());
        assert_eq!(session.selection(), &[a.id, b.id]);

        let field = session
            .create_field(&store, "address", "Address", ValueType::Text, None)
            .unwrap();
        assert_eq!(field.box_ids, vec![a.id, b.id]);
        assert!(session.selection().is_empty());

        // Mapped now, so it cannot be picked again
        assert!(matches!(
            session.toggle_selection(&store, a.id),
            Err(FormFillError::Conflict(_))
        ));
    }

    #[test]
    fn test_toggle_twice_deselects() {
        let (store, mut session) = store_and_session(1);
        let a = store
            .create_box(session.template_id(), placement(1))
            .unwrap();
        assert!(session.toggle_selection(&store, a.id).unwrap());
        assert!(!session.toggle_selection(&store, a.id).unwrap());
        assert!(!session.is_selected(a.id));
    }

    #[test]
    fn test_create_field_with_empty_selection_fails() {
        let (store, mut session) = store_and_session(1);
        assert!(matches!(
            session.create_field(&store, "x", "", ValueType::Text, None),
            Err(FormFillError::Validation(_))
        ));
    }
}
