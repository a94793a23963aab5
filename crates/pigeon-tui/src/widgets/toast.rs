//! Transient notifications, stacked in the top-right corner.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, Paragraph},
    Frame,
};

use crate::controller::Notice;
use crate::theme::{C_TOAST_ERROR, C_TOAST_INFO, C_TOAST_SUCCESS, C_TOAST_WARNING};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    fn lifetime(self) -> Duration {
        match self {
            Self::Info | Self::Success => Duration::from_secs(3),
            Self::Warning => Duration::from_secs(4),
            Self::Error => Duration::from_secs(5),
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Self::Info => "·",
            Self::Success => "✓",
            Self::Warning => "!",
            Self::Error => "✗",
        }
    }

    fn style(self) -> Style {
        let color = match self {
            Self::Info => C_TOAST_INFO,
            Self::Success => C_TOAST_SUCCESS,
            Self::Warning => C_TOAST_WARNING,
            Self::Error => C_TOAST_ERROR,
        };
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    }
}

struct Toast {
    message: String,
    severity: Severity,
    expires: Instant,
}

pub struct ToastManager {
    toasts: VecDeque<Toast>,
    max_visible: usize,
}

impl ToastManager {
    pub fn new() -> Self {
        Self {
            toasts: VecDeque::new(),
            max_visible: 4,
        }
    }

    pub fn push(&mut self, message: impl Into<String>, severity: Severity) {
        self.push_at(message, severity, Instant::now());
    }

    fn push_at(&mut self, message: impl Into<String>, severity: Severity, now: Instant) {
        // A repeated message replaces the visible copy.
        let message = message.into();
        self.toasts.retain(|t| t.message != message);
        self.toasts.push_back(Toast {
            message,
            severity,
            expires: now + severity.lifetime(),
        });
        while self.toasts.len() > self.max_visible * 2 {
            self.toasts.pop_front();
        }
    }

    pub fn notice(&mut self, notice: Notice) {
        match notice {
            Notice::Success(msg) => self.push(msg, Severity::Success),
            Notice::Error(msg) => self.push(msg, Severity::Error),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Info);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Warning);
    }

    /// Drop expired toasts.  Returns true if anything was removed.
    pub fn tick(&mut self) -> bool {
        self.expire(Instant::now())
    }

    fn expire(&mut self, now: Instant) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.expires > now);
        before != self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        if self.is_empty() {
            return;
        }
        let max_width = (area.width / 2).clamp(30, 60).min(area.width);
        let mut y = area.y + 1;

        for toast in self.toasts.iter().rev().take(self.max_visible) {
            if y >= area.y + area.height {
                break;
            }
            let text = format!(" {} {} ", toast.severity.icon(), toast.message);
            let w = (text.chars().count() as u16).min(max_width);
            let toast_area = Rect {
                x: area.x + area.width.saturating_sub(w + 1),
                y,
                width: w,
                height: 1,
            };
            frame.render_widget(Clear, toast_area);
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(text, toast.severity.style()))),
                toast_area,
            );
            y += 1;
        }
    }
}

impl Default for ToastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message_collapses() {
        let mut toasts = ToastManager::new();
        let now = Instant::now();
        toasts.push_at("Episode deleted", Severity::Success, now);
        toasts.push_at("Episode deleted", Severity::Success, now);
        assert_eq!(toasts.toasts.len(), 1);
    }

    #[test]
    fn test_errors_outlive_successes() {
        let mut toasts = ToastManager::new();
        let now = Instant::now();
        toasts.push_at("ok", Severity::Success, now);
        toasts.push_at("boom", Severity::Error, now);

        assert!(toasts.expire(now + Duration::from_millis(3500)));
        assert_eq!(toasts.toasts.len(), 1);
        assert_eq!(toasts.toasts[0].message, "boom");

        assert!(toasts.expire(now + Duration::from_secs(6)));
        assert!(toasts.is_empty());
    }

    #[test]
    fn test_queue_is_capped() {
        let mut toasts = ToastManager::new();
        let now = Instant::now();
        for i in 0..20 {
            toasts.push_at(format!("msg {}", i), Severity::Info, now);
        }
        assert_eq!(toasts.toasts.len(), 8);
        assert_eq!(toasts.toasts.back().unwrap().message, "msg 19");
    }
}
