//! App — terminal event loop around one `FeedDetailController`.
//!
//! Architecture:
//! - A blocking reader task forwards crossterm events over a channel.
//! - Controller completions, timer ticks and sentinel callbacks arrive on the
//!   controller's own channel.
//! - The loop draws a frame, then awaits whichever input comes next.  The
//!   controller is only ever touched from this loop.

use std::io::{self, Stdout};
use std::time::Duration;

use pigeon_proto::api::EpisodeApi;
use pigeon_proto::protocol::DownloadStatus;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::controller::{ControllerEvent, FeedDetailController};
use crate::sentinel::ViewportSentinel;
use crate::theme;
use crate::widgets::{episode_list::EpisodeList, toast::ToastManager};

const PAGE_JUMP: usize = 10;

pub struct App<A: EpisodeApi> {
    controller: FeedDetailController<A>,
    sentinel: ViewportSentinel,
    feed_id: String,
    list: EpisodeList,
    toasts: ToastManager,
    /// Episode id awaiting a `y` to confirm deletion.
    pending_delete: Option<String>,
    should_quit: bool,
}

impl<A: EpisodeApi> App<A> {
    pub fn new(
        controller: FeedDetailController<A>,
        sentinel: ViewportSentinel,
        feed_id: String,
    ) -> Self {
        Self {
            controller,
            sentinel,
            feed_id,
            list: EpisodeList::new(),
            toasts: ToastManager::new(),
            pending_delete: None,
            should_quit: false,
        }
    }

    pub async fn run(
        mut self,
        mut controller_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal, &mut controller_rx).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
        controller_rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> anyhow::Result<()> {
        let (input_tx, mut input_rx) = mpsc::channel::<Event>(256);
        tokio::task::spawn_blocking(move || {
            // Poll with a timeout so the thread exits once the loop is gone.
            while !input_tx.is_closed() {
                match event::poll(Duration::from_millis(250)) {
                    Ok(true) => match event::read() {
                        Ok(ev) => {
                            if input_tx.blocking_send(ev).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
        });

        let mut toast_tick = tokio::time::interval(Duration::from_millis(250));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.controller.mount(self.feed_id.clone());

        loop {
            for notice in self.controller.drain_notices() {
                self.toasts.notice(notice);
            }
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(ev) = input_rx.recv() => self.handle_input(ev),
                Some(evt) = controller_rx.recv() => self.controller.handle(evt),
                _ = toast_tick.tick() => {
                    self.toasts.tick();
                }
            }
        }

        debug!("sentinel delivered {} callbacks", self.sentinel.fired());
        self.controller.unmount();
        info!("pigeon-watch exiting");
        Ok(())
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    fn handle_input(&mut self, ev: Event) {
        if let Event::Key(key) = ev {
            if key.kind == KeyEventKind::Press {
                self.handle_key(key);
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if let Some(id) = self.pending_delete.take() {
            if key.code == KeyCode::Char('y') {
                self.controller.delete_episode(&id);
            } else {
                self.toasts.info("Delete cancelled");
            }
            return;
        }

        let len = self.controller.episodes().len();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Char('j') | KeyCode::Down => self.list.select_down(1, len),
            KeyCode::Char('k') | KeyCode::Up => self.list.select_up(1),
            KeyCode::PageDown => self.list.select_down(PAGE_JUMP, len),
            KeyCode::PageUp => self.list.select_up(PAGE_JUMP),
            KeyCode::Char('g') | KeyCode::Home => self.list.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.list.select_last(len),
            KeyCode::Char('r') => self.retry_selected(),
            KeyCode::Char('D') => {
                if let Some(ep) = self.list.selected_item(self.controller.episodes()) {
                    self.pending_delete = Some(ep.id.clone());
                }
            }
            KeyCode::Char('R') => {
                self.list.select_first();
                self.controller.mount(self.feed_id.clone());
            }
            _ => {}
        }
    }

    fn retry_selected(&mut self) {
        let Some(ep) = self.list.selected_item(self.controller.episodes()) else {
            return;
        };
        if !ep.is_failed() {
            self.toasts.warning("Only failed episodes can be retried");
            return;
        }
        let id = ep.id.clone();
        self.controller.retry_episode(&id);
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(2),
                Constraint::Length(1),
            ])
            .split(area);

        self.draw_header(frame, rows[0]);
        self.list.draw(
            frame,
            rows[1],
            self.controller.episodes(),
            self.controller.loading_episodes(),
            &self.sentinel,
        );
        self.draw_detail(frame, rows[2]);
        self.draw_hints(frame, rows[3]);
        self.toasts.draw(frame, area);
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let ctl = &self.controller;
        let mut spans = vec![
            Span::styled(" pigeon-watch ", theme::style_title()),
            Span::styled(format!("feed {} ", self.feed_id), theme::style_secondary()),
            Span::raw(format!(
                "· {} episodes · page {}{} ",
                ctl.episodes().len(),
                ctl.current_page(),
                if ctl.has_more_episodes() { "+" } else { "" }
            )),
        ];
        if ctl.loading_episodes() {
            spans.push(Span::styled("· loading ", theme::style_secondary()));
        }
        if ctl.is_polling() {
            spans.push(Span::styled(
                format!("· ⟳ {} in progress", ctl.active_count()),
                theme::style_badge(Some(&DownloadStatus::Downloading)),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_detail(&self, frame: &mut Frame, area: Rect) {
        let Some(ep) = self.list.selected_item(self.controller.episodes()) else {
            return;
        };
        let mut lines = vec![Line::from(Span::styled(
            format!(" {}", ep.display_title()),
            theme::style_selected(),
        ))];
        let second = if ep.is_failed() {
            ep.error_log
                .as_deref()
                .map(|log| {
                    Span::styled(
                        format!(" {}", first_line(log)),
                        theme::style_badge(ep.download_status.as_ref()),
                    )
                })
        } else {
            ep.description
                .as_deref()
                .map(|d| Span::styled(format!(" {}", first_line(d)), theme::style_secondary()))
        };
        if let Some(span) = second {
            lines.push(Line::from(span));
        }
        frame.render_widget(Paragraph::new(lines), area);
    }

    fn draw_hints(&self, frame: &mut Frame, area: Rect) {
        let line = if let Some(id) = &self.pending_delete {
            let title = self
                .controller
                .episodes()
                .iter()
                .find(|e| &e.id == id)
                .map(|e| e.display_title().to_string())
                .unwrap_or_else(|| id.clone());
            Line::from(vec![
                Span::styled(format!(" Delete \"{}\"? ", title), theme::style_title()),
                Span::styled("y", Style::default().fg(theme::C_KEY_HINT)),
                Span::styled(" to confirm, any other key cancels", theme::style_secondary()),
            ])
        } else {
            let mut spans = vec![Span::raw(" ")];
            for (key, label) in [
                ("j/k", "move"),
                ("r", "retry"),
                ("D", "delete"),
                ("R", "reload"),
                ("q", "quit"),
            ] {
                spans.push(Span::styled(
                    key,
                    Style::default().fg(theme::C_KEY_HINT),
                ));
                spans.push(Span::styled(format!(" {}  ", label), theme::style_secondary()));
            }
            Line::from(spans)
        };
        frame.render_widget(Paragraph::new(line), area);
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
