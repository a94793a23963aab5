//! Scrollable episode list.  Items are borrowed from the controller on each
//! draw; this widget only keeps the cursor and scroll offset.

use pigeon_proto::protocol::Episode;
use ratatui::{
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::sentinel::ViewportSentinel;
use crate::theme;

const BADGE_WIDTH: usize = 11;
const DATE_WIDTH: usize = 10;
const DURATION_WIDTH: usize = 8;

#[derive(Debug, Default)]
pub struct EpisodeList {
    pub selected: usize,
    pub scroll_offset: usize,
}

impl EpisodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the cursor inside `len` items (the list can shrink on reload).
    pub fn clamp(&mut self, len: usize) {
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
        if self.scroll_offset > self.selected {
            self.scroll_offset = self.selected;
        }
    }

    pub fn select_up(&mut self, n: usize) {
        self.selected = self.selected.saturating_sub(n);
    }

    pub fn select_down(&mut self, n: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.selected = (self.selected + n).min(len - 1);
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
        self.scroll_offset = 0;
    }

    pub fn select_last(&mut self, len: usize) {
        self.selected = len.saturating_sub(1);
    }

    pub fn selected_item<'a>(&self, episodes: &'a [Episode]) -> Option<&'a Episode> {
        episodes.get(self.selected)
    }

    pub fn ensure_visible(&mut self, height: usize) {
        if height == 0 {
            return;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + height {
            self.scroll_offset = self.selected + 1 - height;
        }
    }

    /// Index range drawn in `height` rows.
    pub fn visible_range(&self, len: usize, height: usize) -> std::ops::Range<usize> {
        let start = self.scroll_offset.min(len);
        start..(start + height).min(len)
    }

    /// Render and report last-row visibility to `sentinel`.
    pub fn draw(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        episodes: &[Episode],
        loading: bool,
        sentinel: &ViewportSentinel,
    ) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(ratatui::style::Style::default().fg(theme::C_PANEL_BORDER))
            .title(Span::styled(" Episodes ", theme::style_title()));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let height = inner.height as usize;
        self.clamp(episodes.len());
        self.ensure_visible(height);
        let range = self.visible_range(episodes.len(), height);
        let last_visible = !episodes.is_empty() && range.end == episodes.len();

        let mut lines: Vec<Line> = episodes[range.clone()]
            .iter()
            .enumerate()
            .map(|(i, ep)| {
                self.row(ep, range.start + i == self.selected, inner.width as usize)
            })
            .collect();
        if episodes.is_empty() {
            let msg = if loading {
                "Loading episodes…"
            } else {
                "No episodes found for this feed"
            };
            lines.push(Line::from(Span::styled(msg, theme::style_secondary())));
        } else if loading && lines.len() < height {
            lines.push(Line::from(Span::styled("  loading more…", theme::style_secondary())));
        }
        frame.render_widget(Paragraph::new(lines), inner);

        sentinel.observe(last_visible);
    }

    fn row(&self, ep: &Episode, selected: bool, width: usize) -> Line<'static> {
        let status = ep.download_status.as_ref();
        let badge = status.map(|s| s.as_str()).unwrap_or("-");
        let date = ep
            .published_date()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let duration = ep.display_duration().unwrap_or_default();

        let fixed = 1 + BADGE_WIDTH + 1 + 1 + DATE_WIDTH + 1 + DURATION_WIDTH;
        let title_width = width.saturating_sub(fixed);
        let title = pad(&truncate(ep.display_title(), title_width), title_width);

        let mut line = Line::from(vec![
            Span::raw(" "),
            Span::styled(format!("{:<w$}", badge, w = BADGE_WIDTH), theme::style_badge(status)),
            Span::raw(" "),
            Span::raw(title),
            Span::raw(" "),
            Span::styled(format!("{:>w$}", date, w = DATE_WIDTH), theme::style_secondary()),
            Span::raw(" "),
            Span::styled(
                format!("{:>w$}", duration, w = DURATION_WIDTH),
                theme::style_secondary(),
            ),
        ]);
        if selected {
            line = line.style(theme::style_selected());
        }
        line
    }
}

/// Cut `s` to at most `width` terminal columns, marking the cut with `…`.
fn truncate(s: &str, width: usize) -> String {
    if s.width() <= width {
        return s.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

fn pad(s: &str, width: usize) -> String {
    let w = s.width();
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", s, " ".repeat(width - w))
}
