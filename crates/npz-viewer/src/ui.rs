use crate::data::prepare::{DownsampleStats, SourceSummary};

fn color32(rgb: [f32; 3]) -> egui::Color32 {
    egui::Color32::from_rgb(
        (rgb[0] * 255.0) as u8,
        (rgb[1] * 255.0) as u8,
        (rgb[2] * 255.0) as u8,
    )
}

/// Legend of loaded sources with their colours, plus point totals.
pub fn draw_hud(ctx: &egui::Context, sources: &[SourceSummary], totals: DownsampleStats, zoom: f32) {
    egui::Window::new("Point clouds")
        .anchor(egui::Align2::LEFT_TOP, [10.0, 10.0])
        .resizable(false)
        .collapsible(true)
        .show(ctx, |ui| {
            egui::Grid::new("sources").striped(true).show(ui, |ui| {
                for src in sources {
                    ui.colored_label(color32(src.color), "\u{25A0}");
                    ui.label(src.name.as_str());
                    ui.label(format!("{} / {}", src.stats.kept, src.stats.original));
                    ui.end_row();
                }
            });

            ui.separator();
            ui.label(format!("Original total points: {}", totals.original));
            ui.label(format!("Downsampled total points: {}", totals.kept));
            ui.label(format!("Downsampling ratio: {:.2}%", totals.ratio_percent()));
            ui.label(format!("Zoom: {zoom:.2}"));
        });
}
