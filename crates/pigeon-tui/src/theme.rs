//! Color palette for the feed watch view.

use pigeon_proto::protocol::DownloadStatus;
use ratatui::style::{Color, Modifier, Style};

pub const C_ACCENT: Color = Color::Rgb(255, 95, 95);
pub const C_PRIMARY: Color = Color::Rgb(210, 210, 225);
pub const C_SECONDARY: Color = Color::Rgb(115, 115, 138);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SELECTION_BG: Color = Color::Rgb(28, 28, 40);
pub const C_PANEL_BORDER: Color = Color::Rgb(40, 40, 52);
pub const C_KEY_HINT: Color = Color::Rgb(255, 200, 80);

pub const C_STATUS_PENDING: Color = Color::Rgb(115, 115, 138);
pub const C_STATUS_QUEUED: Color = Color::Rgb(180, 120, 220);
pub const C_STATUS_DOWNLOADING: Color = Color::Rgb(255, 184, 80);
pub const C_STATUS_COMPLETED: Color = Color::Rgb(80, 200, 120);
pub const C_STATUS_FAILED: Color = Color::Rgb(255, 80, 80);

pub const C_TOAST_INFO: Color = Color::Rgb(80, 160, 220);
pub const C_TOAST_SUCCESS: Color = Color::Rgb(80, 200, 120);
pub const C_TOAST_WARNING: Color = Color::Rgb(255, 184, 80);
pub const C_TOAST_ERROR: Color = Color::Rgb(255, 95, 95);

pub fn status_color(status: Option<&DownloadStatus>) -> Color {
    match status {
        Some(DownloadStatus::Pending) => C_STATUS_PENDING,
        Some(DownloadStatus::Queued) => C_STATUS_QUEUED,
        Some(DownloadStatus::Downloading) => C_STATUS_DOWNLOADING,
        Some(DownloadStatus::Completed) => C_STATUS_COMPLETED,
        Some(DownloadStatus::Failed) => C_STATUS_FAILED,
        Some(DownloadStatus::Other(_)) | None => C_MUTED,
    }
}

pub fn style_badge(status: Option<&DownloadStatus>) -> Style {
    Style::default()
        .fg(status_color(status))
        .add_modifier(Modifier::BOLD)
}

pub fn style_title() -> Style {
    Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD)
}

pub fn style_selected() -> Style {
    Style::default().bg(C_SELECTION_BG).fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}
