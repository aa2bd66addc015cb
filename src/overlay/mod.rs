//! In-canvas editor built on egui.
//!
//! The overlay never talks to the host directly: egui textures go through the
//! adapter and the tessellated meshes come back as [`OverlayCommands`] for the
//! controller to composite. User actions are returned as [`OverlayEdit`]s and
//! applied by the controller after the frame.

mod input;

pub use input::{to_raw_input, InputEvent, Key, Modifiers, PointerButton};

use crate::adapter::{ClipRect, GuiVertex, OverlayCommands, OverlayMesh, TextureHandle, VersionAdapter};
use crate::error::{CompileDiagnostic, HostError};
use crate::media::{StreamState, StreamStatus};
use crate::shader::{ChannelSource, UniformSlot, UniformValue, PRESETS};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An action taken in the overlay, applied by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEdit {
    SetSource(String),
    SetUniform(String, UniformValue),
    Seek(usize),
    SetPlaying(bool),
    SetLooping(bool),
    Restart,
    CancelLoad,
    SetAutoCompile(bool),
    Save,
    Reload,
    OpenFile(PathBuf),
}

/// Everything the panels display. Borrowed from the controller per frame.
pub struct OverlayView<'a> {
    /// Candidate source held by the pipeline.
    pub source: &'a str,
    pub diagnostic: Option<&'a CompileDiagnostic>,
    pub has_program: bool,
    pub uniforms: &'a [(UniformSlot, UniformValue)],
    pub stream: &'a StreamStatus,
    pub auto_compile: bool,
    /// Shader files relative to the workspace root.
    pub files: &'a [PathBuf],
    pub current_file: Option<&'a Path>,
    pub fps: Option<f32>,
}

/// Output of one overlay frame.
#[derive(Debug, Default)]
pub struct OverlayFrame {
    pub commands: OverlayCommands,
    pub edits: Vec<OverlayEdit>,
    /// The pointer is over a panel, so the canvas should ignore it.
    pub wants_pointer: bool,
    pub wants_keyboard: bool,
}

/// Editor text not yet handed to the pipeline.
#[derive(Debug, Default)]
struct Draft {
    text: String,
    /// Edited since the last submit.
    pending: bool,
}

impl Draft {
    /// Follows the pipeline source unless the user has unsubmitted edits.
    fn sync(&mut self, source: &str) {
        if !self.pending && self.text != source {
            self.text = source.to_string();
        }
    }

    fn changed(&mut self, auto_compile: bool, edits: &mut Vec<OverlayEdit>) {
        if auto_compile {
            edits.push(OverlayEdit::SetSource(self.text.clone()));
            self.pending = false;
        } else {
            self.pending = true;
        }
    }

    fn submit(&mut self, edits: &mut Vec<OverlayEdit>) {
        edits.push(OverlayEdit::SetSource(self.text.clone()));
        self.pending = false;
    }
}

pub struct EditorOverlay {
    ctx: egui::Context,
    visible: bool,
    textures: HashMap<egui::TextureId, TextureHandle>,
    to_free: Vec<egui::TextureId>,
    draft: Draft,
    time: f64,
}

impl EditorOverlay {
    pub fn new(visible: bool) -> Self {
        let ctx = egui::Context::default();
        ctx.set_visuals(egui::Visuals::dark());
        Self {
            ctx,
            visible,
            textures: HashMap::new(),
            to_free: Vec::new(),
            draft: Draft::default(),
            time: 0.0,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            debug!("Overlay {}", if visible { "shown" } else { "hidden" });
        }
        self.visible = visible;
    }

    pub fn toggle(&mut self) {
        self.set_visible(!self.visible);
    }

    /// Moves keyboard focus to the source editor, so typed text lands there.
    pub fn focus_editor(&self) {
        self.ctx.memory_mut(|m| m.request_focus(source_editor_id()));
    }

    /// Runs one egui frame. A hidden overlay draws nothing and consumes no input.
    pub fn draw(
        &mut self,
        adapter: &mut VersionAdapter,
        events: &[InputEvent],
        delta: f32,
        view: &OverlayView<'_>,
    ) -> Result<OverlayFrame, HostError> {
        if !self.visible {
            return Ok(OverlayFrame::default());
        }

        for id in self.to_free.drain(..) {
            if let Some(texture) = self.textures.remove(&id) {
                adapter.release_texture(texture);
            }
        }

        self.time += f64::from(delta.max(0.0));
        let raw = to_raw_input(events, adapter.frame_size(), self.time, delta);
        let mut edits = Vec::new();
        let draft = &mut self.draft;
        draft.sync(view.source);
        let ctx = self.ctx.clone();
        let output = ctx.run(raw, |ctx| panels(ctx, view, draft, &mut edits));

        for (id, delta) in &output.textures_delta.set {
            self.apply_texture_delta(adapter, *id, delta)?;
        }
        self.to_free.extend(output.textures_delta.free.iter().copied());

        let primitives = ctx.tessellate(output.shapes, output.pixels_per_point);
        let mut meshes = Vec::with_capacity(primitives.len());
        for primitive in primitives {
            let egui::epaint::Primitive::Mesh(mesh) = primitive.primitive else {
                continue;
            };
            let Some(texture) = self.textures.get(&mesh.texture_id) else {
                warn!("Overlay mesh references unknown texture {:?}", mesh.texture_id);
                continue;
            };
            if mesh.indices.is_empty() {
                continue;
            }
            meshes.push(OverlayMesh {
                texture: *texture,
                clip: clip_rect(primitive.clip_rect, output.pixels_per_point),
                vertices: mesh
                    .vertices
                    .iter()
                    .map(|v| GuiVertex {
                        pos: [v.pos.x, v.pos.y],
                        uv: [v.uv.x, v.uv.y],
                        color: v.color.to_array(),
                    })
                    .collect(),
                indices: mesh.indices,
            });
        }

        Ok(OverlayFrame {
            commands: OverlayCommands { meshes },
            edits,
            wants_pointer: ctx.wants_pointer_input() || ctx.is_pointer_over_area(),
            wants_keyboard: ctx.wants_keyboard_input(),
        })
    }

    fn apply_texture_delta(
        &mut self,
        adapter: &mut VersionAdapter,
        id: egui::TextureId,
        delta: &egui::epaint::ImageDelta,
    ) -> Result<(), HostError> {
        let (width, height, pixels) = delta_pixels(&delta.image);
        if width == 0 || height == 0 {
            return Ok(());
        }
        match (delta.pos, self.textures.get(&id)) {
            (Some([x, y]), Some(texture)) => adapter.write_texture(*texture, [x as u32, y as u32], width, height, &pixels),
            _ => {
                let texture = adapter.upload_texture(&pixels, width, height)?;
                if let Some(old) = self.textures.insert(id, texture) {
                    adapter.release_texture(old);
                }
                Ok(())
            }
        }
    }

    /// Frees every texture the overlay uploaded.
    pub fn release(&mut self, adapter: &mut VersionAdapter) {
        for (_, texture) in self.textures.drain() {
            adapter.release_texture(texture);
        }
        self.to_free.clear();
    }
}

fn delta_pixels(image: &egui::ImageData) -> (u32, u32, Vec<u8>) {
    match image {
        egui::ImageData::Color(image) => {
            let pixels = image.pixels.iter().flat_map(|c| c.to_array()).collect();
            (image.size[0] as u32, image.size[1] as u32, pixels)
        }
        egui::ImageData::Font(font) => {
            let pixels = font.srgba_pixels(None).flat_map(|c| c.to_array()).collect();
            (font.size[0] as u32, font.size[1] as u32, pixels)
        }
    }
}

fn clip_rect(rect: egui::Rect, pixels_per_point: f32) -> ClipRect {
    let min = (rect.min.to_vec2() * pixels_per_point).max(egui::Vec2::ZERO);
    let max = (rect.max.to_vec2() * pixels_per_point).max(min);
    ClipRect {
        x: min.x.round() as u32,
        y: min.y.round() as u32,
        width: (max.x - min.x).round() as u32,
        height: (max.y - min.y).round() as u32,
    }
}

const OK_COLOR: egui::Color32 = egui::Color32::from_rgb(80, 200, 120);
const ERROR_COLOR: egui::Color32 = egui::Color32::from_rgb(230, 90, 90);
const IDLE_COLOR: egui::Color32 = egui::Color32::from_rgb(140, 140, 140);

fn source_editor_id() -> egui::Id {
    egui::Id::new("canvas-source-editor")
}

fn panels(ctx: &egui::Context, view: &OverlayView<'_>, draft: &mut Draft, edits: &mut Vec<OverlayEdit>) {
    egui::Window::new("Shader")
        .default_pos([16.0, 16.0])
        .default_width(460.0)
        .show(ctx, |ui| source_panel(ui, view, draft, edits));

    egui::Window::new("Uniforms")
        .default_pos([500.0, 16.0])
        .default_width(260.0)
        .show(ctx, |ui| uniforms_panel(ui, view.uniforms, edits));

    egui::Window::new("Media")
        .default_pos([500.0, 300.0])
        .default_width(260.0)
        .show(ctx, |ui| playback_panel(ui, view.stream, edits));

    if !view.files.is_empty() {
        egui::Window::new("Files")
            .default_pos([16.0, 520.0])
            .default_open(false)
            .show(ctx, |ui| files_panel(ui, view.files, view.current_file, edits));
    }
}

fn source_panel(ui: &mut egui::Ui, view: &OverlayView<'_>, draft: &mut Draft, edits: &mut Vec<OverlayEdit>) {
    ui.horizontal(|ui| {
        let (rect, _) = ui.allocate_exact_size(egui::vec2(10.0, 10.0), egui::Sense::hover());
        let color = match (view.diagnostic, view.has_program) {
            (Some(_), _) => ERROR_COLOR,
            (None, true) => OK_COLOR,
            (None, false) => IDLE_COLOR,
        };
        ui.painter().circle_filled(rect.center(), 4.0, color);
        let status = match (view.diagnostic, view.has_program) {
            (Some(_), true) => "Error (showing last good)",
            (Some(_), false) => "Error",
            (None, true) => "Compiled",
            (None, false) => "Pass-through",
        };
        ui.label(egui::RichText::new(status).color(color));

        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if let Some(fps) = view.fps {
                ui.label(egui::RichText::new(format!("{:.0} fps", fps)).monospace().weak());
            }
        });
    });

    ui.horizontal(|ui| {
        if ui
            .add_enabled(draft.pending || !view.auto_compile, egui::Button::new("Compile"))
            .clicked()
        {
            draft.submit(edits);
        }
        if ui.button("Save").clicked() {
            if draft.pending {
                draft.submit(edits);
            }
            edits.push(OverlayEdit::Save);
        }
        if ui.button("Reload").clicked() {
            draft.pending = false;
            edits.push(OverlayEdit::Reload);
        }
        let mut auto = view.auto_compile;
        if ui.checkbox(&mut auto, "Auto-compile").changed() {
            edits.push(OverlayEdit::SetAutoCompile(auto));
        }

        let mut chosen = None;
        egui::ComboBox::from_id_salt("preset")
            .selected_text("Presets")
            .show_ui(ui, |ui| {
                for preset in PRESETS {
                    if ui.selectable_label(false, preset.name).clicked() {
                        chosen = Some(preset);
                    }
                }
            });
        if let Some(preset) = chosen {
            draft.text = preset.source.to_string();
            draft.submit(edits);
        }
    });

    if let Some(file) = view.current_file {
        ui.label(egui::RichText::new(file.display().to_string()).small().weak());
    }

    egui::ScrollArea::vertical().max_height(360.0).show(ui, |ui| {
        let editor = egui::TextEdit::multiline(&mut draft.text)
            .id(source_editor_id())
            .code_editor()
            .desired_rows(18)
            .desired_width(f32::INFINITY);
        if ui.add(editor).changed() {
            draft.changed(view.auto_compile, edits);
        }
    });

    if let Some(diagnostic) = view.diagnostic {
        egui::Frame::group(ui.style())
            .corner_radius(egui::CornerRadius::same(6))
            .show(ui, |ui| {
                ui.label(egui::RichText::new(diagnostic.to_string()).monospace().color(ERROR_COLOR));
            });
    }
}

fn uniforms_panel(ui: &mut egui::Ui, uniforms: &[(UniformSlot, UniformValue)], edits: &mut Vec<OverlayEdit>) {
    if uniforms.is_empty() {
        ui.label(egui::RichText::new("No user uniforms").weak());
        return;
    }
    egui::Grid::new("uniforms").num_columns(2).striped(true).show(ui, |ui| {
        for (slot, value) in uniforms {
            ui.label(egui::RichText::new(&slot.name).monospace());
            if let Some(edited) = uniform_editor(ui, &slot.name, *value) {
                edits.push(OverlayEdit::SetUniform(slot.name.clone(), edited));
            }
            ui.end_row();
        }
    });
}

/// Returns the new value when the widget changed it.
fn uniform_editor(ui: &mut egui::Ui, name: &str, value: UniformValue) -> Option<UniformValue> {
    let mut changed = false;
    let edited = match value {
        UniformValue::Float(mut v) => {
            changed = ui.add(egui::DragValue::new(&mut v).speed(0.01)).changed();
            UniformValue::Float(v)
        }
        UniformValue::Int(mut v) => {
            changed = ui.add(egui::DragValue::new(&mut v)).changed();
            UniformValue::Int(v)
        }
        UniformValue::Vec2(mut v) => {
            ui.horizontal(|ui| changed = drag_components(ui, &mut v));
            UniformValue::Vec2(v)
        }
        UniformValue::Vec3(mut v) => {
            ui.horizontal(|ui| {
                changed = drag_components(ui, &mut v);
                changed |= ui.color_edit_button_rgb(&mut v).changed();
            });
            UniformValue::Vec3(v)
        }
        UniformValue::Vec4(mut v) => {
            ui.horizontal(|ui| changed = drag_components(ui, &mut v));
            UniformValue::Vec4(v)
        }
        UniformValue::Channel(mut source) => {
            egui::ComboBox::from_id_salt(name)
                .selected_text(source.label())
                .show_ui(ui, |ui| {
                    for option in ChannelSource::ALL {
                        changed |= ui.selectable_value(&mut source, option, option.label()).changed();
                    }
                });
            UniformValue::Channel(source)
        }
    };
    changed.then_some(edited)
}

fn drag_components(ui: &mut egui::Ui, values: &mut [f32]) -> bool {
    let mut changed = false;
    for v in values {
        changed |= ui.add(egui::DragValue::new(v).speed(0.01)).changed();
    }
    changed
}

fn playback_panel(ui: &mut egui::Ui, stream: &StreamStatus, edits: &mut Vec<OverlayEdit>) {
    let kind = stream.kind.map(|k| k.label()).unwrap_or("none");
    match &stream.state {
        StreamState::Empty => {
            ui.label(egui::RichText::new("No media loaded").weak());
            return;
        }
        StreamState::Loading => {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("Decoding {}", kind));
                if ui.button("Cancel").clicked() {
                    edits.push(OverlayEdit::CancelLoad);
                }
            });
        }
        StreamState::Error(message) => {
            ui.label(egui::RichText::new(message).color(ERROR_COLOR));
        }
        StreamState::Ready => {
            ui.label(format!("{} with {} frame(s)", kind, stream.frame_count));
        }
    }
    if stream.frame_count <= 1 {
        return;
    }

    ui.horizontal(|ui| {
        let label = if stream.playing { "Pause" } else { "Play" };
        if ui.button(label).clicked() {
            edits.push(OverlayEdit::SetPlaying(!stream.playing));
        }
        if ui.button("Restart").clicked() {
            edits.push(OverlayEdit::Restart);
        }
        let mut looping = stream.looping;
        if ui.checkbox(&mut looping, "Loop").changed() {
            edits.push(OverlayEdit::SetLooping(looping));
        }
    });

    let mut index = stream.index;
    let slider = egui::Slider::new(&mut index, 0..=stream.frame_count - 1).text("frame");
    if ui.add(slider).changed() {
        edits.push(OverlayEdit::Seek(index));
    }

    let position = stream.position.as_secs_f32();
    match stream.duration {
        Some(total) => ui.label(egui::RichText::new(format!("{:.2}s / {:.2}s", position, total.as_secs_f32())).monospace()),
        None => ui.label(egui::RichText::new(format!("{:.2}s", position)).monospace()),
    };
}

fn files_panel(ui: &mut egui::Ui, files: &[PathBuf], current: Option<&Path>, edits: &mut Vec<OverlayEdit>) {
    egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
        for file in files {
            let selected = current.is_some_and(|c| c.ends_with(file));
            if ui.selectable_label(selected, file.display().to_string()).clicked() && !selected {
                edits.push(OverlayEdit::OpenFile(file.clone()));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::headless::HeadlessHost;
    use std::time::Duration;

    fn stream_status() -> StreamStatus {
        StreamStatus {
            kind: None,
            state: StreamState::Empty,
            index: 0,
            frame_count: 0,
            playing: true,
            looping: true,
            position: Duration::ZERO,
            duration: None,
        }
    }

    fn adapter() -> (VersionAdapter, crate::adapter::headless::HeadlessProbe) {
        let (host, probe) = HeadlessHost::render_targets(800, 600);
        (VersionAdapter::select("1.21.4", host).unwrap(), probe)
    }

    fn draw(overlay: &mut EditorOverlay, adapter: &mut VersionAdapter, events: &[InputEvent]) -> OverlayFrame {
        let stream = stream_status();
        let view = OverlayView {
            source: "void main() {}",
            diagnostic: None,
            has_program: false,
            uniforms: &[],
            stream: &stream,
            auto_compile: true,
            files: &[],
            current_file: None,
            fps: Some(60.0),
        };
        overlay.draw(adapter, events, 1.0 / 60.0, &view).unwrap()
    }

    #[test]
    fn test_hidden_overlay_draws_nothing() {
        let (mut adapter, probe) = adapter();
        let mut overlay = EditorOverlay::new(false);
        let events = [InputEvent::PointerMoved { x: 20.0, y: 20.0 }];
        let frame = draw(&mut overlay, &mut adapter, &events);
        assert!(frame.commands.is_empty());
        assert!(frame.edits.is_empty());
        assert!(!frame.wants_pointer);
        assert_eq!(probe.texture_uploads(), 0);
    }

    #[test]
    fn test_visible_overlay_produces_meshes_on_uploaded_textures() {
        let (mut adapter, probe) = adapter();
        let mut overlay = EditorOverlay::new(true);
        // New windows are measured invisibly on their first frame.
        draw(&mut overlay, &mut adapter, &[]);
        let frame = draw(&mut overlay, &mut adapter, &[]);
        assert!(!frame.commands.is_empty());
        assert!(probe.texture_uploads() >= 1);
        let known: Vec<u64> = overlay.textures.values().map(|t| t.id()).collect();
        for mesh in &frame.commands.meshes {
            assert!(known.contains(&mesh.texture.id()));
            assert!(mesh.indices.iter().all(|i| (*i as usize) < mesh.vertices.len()));
        }
    }

    #[test]
    fn test_release_frees_overlay_textures() {
        let (mut adapter, probe) = adapter();
        let mut overlay = EditorOverlay::new(true);
        draw(&mut overlay, &mut adapter, &[]);
        assert!(probe.live_textures() >= 1);
        overlay.release(&mut adapter);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_toggle() {
        let mut overlay = EditorOverlay::new(false);
        overlay.toggle();
        assert!(overlay.is_visible());
        overlay.set_visible(false);
        assert!(!overlay.is_visible());
    }

    #[test]
    fn test_typed_text_reaches_focused_editor() {
        let (mut adapter, _probe) = adapter();
        let mut overlay = EditorOverlay::new(true);
        draw(&mut overlay, &mut adapter, &[]);
        draw(&mut overlay, &mut adapter, &[]);

        overlay.focus_editor();
        let frame = draw(&mut overlay, &mut adapter, &[InputEvent::Text("x".to_string())]);
        assert_eq!(frame.edits, vec![OverlayEdit::SetSource("void main() {}x".to_string())]);
    }

    #[test]
    fn test_typed_text_without_focus_is_ignored() {
        let (mut adapter, _probe) = adapter();
        let mut overlay = EditorOverlay::new(true);
        draw(&mut overlay, &mut adapter, &[]);
        draw(&mut overlay, &mut adapter, &[]);

        let frame = draw(&mut overlay, &mut adapter, &[InputEvent::Text("x".to_string())]);
        assert!(frame.edits.is_empty());
    }

    #[test]
    fn test_draft_follows_source_until_edited() {
        let mut draft = Draft::default();
        draft.sync("a");
        assert_eq!(draft.text, "a");

        let mut edits = Vec::new();
        draft.text.push('b');
        draft.changed(false, &mut edits);
        assert!(edits.is_empty());
        draft.sync("a");
        assert_eq!(draft.text, "ab");

        draft.submit(&mut edits);
        assert_eq!(edits, vec![OverlayEdit::SetSource("ab".to_string())]);
        draft.sync("c");
        assert_eq!(draft.text, "c");
    }

    #[test]
    fn test_auto_compile_submits_every_change() {
        let mut draft = Draft::default();
        let mut edits = Vec::new();
        draft.text = "x".to_string();
        draft.changed(true, &mut edits);
        assert_eq!(edits, vec![OverlayEdit::SetSource("x".to_string())]);
        assert!(!draft.pending);
    }

    #[test]
    fn test_clip_rect_scales_and_clamps() {
        let rect = egui::Rect::from_min_max(egui::pos2(-5.0, 10.0), egui::pos2(50.0, 30.0));
        assert_eq!(
            clip_rect(rect, 2.0),
            ClipRect {
                x: 0,
                y: 20,
                width: 100,
                height: 40
            }
        );
    }
}
