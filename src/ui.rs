use egui::{Align2, Color32, Context, FontFamily, FontId, Id, LayerId, Order, Pos2, Rect, Rounding, Style, Visuals};
use glam::{Vec2, Vec4};

/// Text drawing primitive used by the debug HUD.
///
/// Positions are normalized device coordinates: x and y in [-1, 1], y up.
pub trait TextRenderer {
    fn set_color(&mut self, rgba: Vec4);
    fn set_scale(&mut self, scale: Vec2);
    fn draw_text(&mut self, text: &str, x: f32, y: f32, z: f32);
}

/// One queued line of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub ndc: Vec2,
    pub depth: f32,
    pub color: Vec4,
    pub scale: Vec2,
}

// Point size at scale 1.0
const BASE_FONT_SIZE: f32 = 14.0;

/// Collects text during the frame and paints it on an egui foreground layer.
pub struct EguiText {
    runs: Vec<TextRun>,
    color: Vec4,
    scale: Vec2,
}

impl Default for EguiText {
    fn default() -> Self {
        Self::new()
    }
}

impl EguiText {
    pub fn new() -> Self {
        Self {
            runs: Vec::new(),
            color: Vec4::ONE,
            scale: Vec2::ONE,
        }
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    /// Paint and clear everything queued since the last call.
    pub fn paint(&mut self, ctx: &Context) {
        let painter = ctx.layer_painter(LayerId::new(Order::Foreground, Id::new("hmd_debug_text")));
        let screen = ctx.screen_rect();

        // Back to front
        self.runs.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        for run in self.runs.drain(..) {
            let [r, g, b, a] = (run.color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).to_array();
            painter.text(
                ndc_to_screen(run.ndc, screen),
                Align2::LEFT_TOP,
                &run.text,
                FontId::new(BASE_FONT_SIZE * run.scale.y, FontFamily::Monospace),
                Color32::from_rgba_unmultiplied(r as u8, g as u8, b as u8, a as u8),
            );
        }
    }
}

impl TextRenderer for EguiText {
    fn set_color(&mut self, rgba: Vec4) {
        self.color = rgba;
    }

    fn set_scale(&mut self, scale: Vec2) {
        self.scale = scale;
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, z: f32) {
        self.runs.push(TextRun {
            text: text.to_owned(),
            ndc: Vec2::new(x, y),
            depth: z,
            color: self.color,
            scale: self.scale,
        });
    }
}

/// NDC (y up) to egui screen points (y down).
pub fn ndc_to_screen(ndc: Vec2, screen: Rect) -> Pos2 {
    Pos2::new(
        screen.left() + (ndc.x + 1.0) * 0.5 * screen.width(),
        screen.top() + (1.0 - ndc.y) * 0.5 * screen.height(),
    )
}

/// Dark, compact style for the viewer's egui overlay.
pub fn apply_hud_theme(ctx: &Context) {
    let mut style = Style::default();
    style.spacing.item_spacing = egui::vec2(6.0, 4.0);
    style.text_styles.insert(egui::TextStyle::Body, FontId::new(BASE_FONT_SIZE, FontFamily::Monospace));

    let mut visuals = Visuals::dark();
    visuals.window_rounding = Rounding::same(8.0);
    visuals.panel_fill = Color32::from_rgb(30, 30, 35);
    visuals.window_fill = Color32::from_black_alpha(200);
    visuals.selection.bg_fill = Color32::from_rgb(100, 180, 255);

    ctx.set_style(style);
    ctx.set_visuals(visuals);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndc_corners_map_to_screen_corners() {
        let screen = Rect::from_min_size(Pos2::ZERO, egui::vec2(1280.0, 720.0));
        assert_eq!(ndc_to_screen(Vec2::new(-1.0, 1.0), screen), Pos2::new(0.0, 0.0));
        assert_eq!(ndc_to_screen(Vec2::new(1.0, -1.0), screen), Pos2::new(1280.0, 720.0));
        assert_eq!(ndc_to_screen(Vec2::ZERO, screen), Pos2::new(640.0, 360.0));
    }

    #[test]
    fn test_runs_capture_current_color_and_scale() {
        let mut text = EguiText::new();
        text.draw_text("a", 0.0, 0.0, 0.0);
        text.set_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        text.set_scale(Vec2::splat(2.0));
        text.draw_text("b", -0.5, 0.5, 0.0);

        let runs = text.runs();
        assert_eq!(runs[0].color, Vec4::ONE);
        assert_eq!(runs[1].color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(runs[1].scale, Vec2::splat(2.0));
        assert_eq!(runs[1].ndc, Vec2::new(-0.5, 0.5));
    }

    #[test]
    fn test_paint_drains_queue() {
        let ctx = Context::default();
        let mut text = EguiText::new();
        text.draw_text("fps", 0.0, 0.0, 0.0);
        let _ = ctx.run(egui::RawInput::default(), |ctx| text.paint(ctx));
        assert!(text.runs().is_empty());
    }
}
