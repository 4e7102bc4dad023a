use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use docq::client::{BackendClient, ClientError};
use docq::export;
use docq::protocol::{ConversationTurn, Sender};
use docq::transcript::Transcript;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

const INPUT_HEIGHT: u16 = 6;
const BUSY_NOTICE: &str = "A request is already in flight.";

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug)]
pub enum UiEvent {
    Fragment(String),
    AnswerDone { sources: Vec<String> },
    RequestFailed(String),
    StreamInterrupted(String),
    ExportSaved(PathBuf),
    ExportFailed(String),
}

/// At most one backend exchange, ask or export, may be in flight at a time.
/// The permit hands the slot back when the owning flow ends.
#[derive(Debug, Default)]
struct RequestSlot {
    in_flight: AtomicBool,
}

impl RequestSlot {
    fn try_acquire(self: &Arc<Self>) -> Option<SlotPermit> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(SlotPermit {
                slot: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct SlotPermit {
    slot: Arc<RequestSlot>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

struct InputBuffer {
    lines: Vec<String>,
    // Byte offset into the current line, always on a char boundary.
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        if self.cursor_x >= line.len() {
            line.push(c);
            self.cursor_x = line.len();
        } else {
            line.insert(self.cursor_x, c);
            self.cursor_x += c.len_utf8();
        }
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let prev = prev_boundary(line, self.cursor_x);
            line.remove(prev);
            self.cursor_x = prev;
        } else if self.cursor_y > 0 {
            let rest = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.lines[self.cursor_y].len();
            self.lines[self.cursor_y].push_str(&rest);
        }
    }

    fn new_line(&mut self) {
        let rest = self.lines[self.cursor_y].split_off(self.cursor_x);
        self.lines.insert(self.cursor_y + 1, rest);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x = prev_boundary(&self.lines[self.cursor_y], self.cursor_x);
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.lines[self.cursor_y].len();
        }
    }

    fn move_right(&mut self) {
        let line = &self.lines[self.cursor_y];
        if self.cursor_x < line.len() {
            self.cursor_x = next_boundary(line, self.cursor_x);
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = clamp_boundary(&self.lines[self.cursor_y], self.cursor_x);
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = clamp_boundary(&self.lines[self.cursor_y], self.cursor_x);
        }
    }

    fn move_home(&mut self) {
        self.cursor_x = 0;
    }

    fn move_end(&mut self) {
        self.cursor_x = self.lines[self.cursor_y].len();
    }

    fn contents(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn cursor_column(&self) -> usize {
        self.lines[self.cursor_y][..self.cursor_x].chars().count()
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Ask something about your document...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn prev_boundary(line: &str, from: usize) -> usize {
    let mut idx = from.saturating_sub(1);
    while idx > 0 && !line.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_boundary(line: &str, from: usize) -> usize {
    let mut idx = (from + 1).min(line.len());
    while idx < line.len() && !line.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn clamp_boundary(line: &str, desired: usize) -> usize {
    let mut idx = desired.min(line.len());
    while idx > 0 && !line.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub struct UiConfig {
    pub client: BackendClient,
    pub session_id: String,
    pub output_dir: PathBuf,
}

pub struct App {
    transcript: Transcript,
    input: InputBuffer,
    status: Option<String>,
    pending: bool,
    exporting: bool,
    should_quit: bool,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
    client: Arc<BackendClient>,
    session_id: String,
    output_dir: PathBuf,
    slot: Arc<RequestSlot>,
}

impl App {
    pub fn new(config: UiConfig) -> Self {
        let (sender, receiver) = mpsc::channel(100);

        Self {
            transcript: Transcript::new(),
            input: InputBuffer::new(),
            status: None,
            pending: false,
            exporting: false,
            should_quit: false,
            sender,
            receiver,
            client: Arc::new(config.client),
            session_id: config.session_id,
            output_dir: config.output_dir,
            slot: Arc::new(RequestSlot::default()),
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [transcript_area, input_area, status_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(INPUT_HEIGHT),
            Constraint::Length(1),
        ])
        .areas(f.area());

        self.draw_transcript(f, transcript_area);
        self.draw_input(f, input_area);
        self.draw_status(f, status_area);
    }

    fn draw_transcript(&self, f: &mut Frame, area: Rect) {
        let mut lines: Vec<Line<'static>> = Vec::new();
        if self.transcript.is_empty() {
            lines.push(Line::from(Span::styled(
                "Ask a question about your document to get started.",
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )));
        }
        for turn in self.transcript.turns() {
            push_turn_lines(&mut lines, turn);
        }

        let inner_width = area.width.saturating_sub(2).max(1);
        let inner_height = area.height.saturating_sub(2);
        // Keep the newest text in view while the answer grows.
        let scroll = wrapped_height(&lines, inner_width).saturating_sub(inner_height);

        let short_id: String = self.session_id.chars().take(8).collect();
        let paragraph = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" session {} ", short_id)),
            )
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        f.render_widget(paragraph, area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let title = if self.pending {
            " Ask (waiting for the answer...) "
        } else if self.exporting {
            " Ask (export in progress...) "
        } else {
            " Ask (Enter to send, Shift+Enter for a new line, Ctrl+E to export, Esc to quit) "
        };

        let paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);

        let cursor_x = (self.input.cursor_column() + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (area.x + cursor_x).min(area.x + area.width.saturating_sub(2));
        let y = (area.y + 1 + cursor_y).min(area.y + area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let notice = match &self.status {
            Some(notice) => notice.clone(),
            None if self.pending => "Thinking...".to_string(),
            None => String::new(),
        };
        let paragraph = Paragraph::new(Line::from(Span::styled(
            notice,
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        )));
        f.render_widget(paragraph, area);
    }

    fn apply_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Fragment(fragment) => {
                self.transcript.apply_fragment(&fragment);
            }
            UiEvent::AnswerDone { sources } => {
                self.transcript.finish_answer();
                self.pending = false;
                if !sources.is_empty() {
                    self.status =
                        Some(format!("answer drew on {} source snippet(s)", sources.len()));
                }
            }
            UiEvent::RequestFailed(detail) => {
                warn!(%detail, "ask request failed");
                self.transcript.record_request_failure();
                self.pending = false;
            }
            UiEvent::StreamInterrupted(detail) => {
                warn!(%detail, "answer stream interrupted");
                self.pending = false;
                if self.transcript.answer_in_progress() {
                    self.transcript.finish_answer();
                    self.status = Some("The answer was cut off mid-stream.".to_string());
                } else {
                    // Nothing was rendered, so report a failed request.
                    self.transcript.record_request_failure();
                }
            }
            UiEvent::ExportSaved(path) => {
                self.exporting = false;
                self.status = Some(format!("Summary saved to {}", path.display()));
            }
            UiEvent::ExportFailed(detail) => {
                warn!(%detail, "export failed");
                self.exporting = false;
                self.status = Some("Export failed. The conversation is unchanged.".to_string());
            }
        }
    }

    fn submit_question(&mut self) {
        if self.pending || self.exporting {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        }
        if self.input.is_empty() {
            return;
        }
        let question = self.input.contents();
        if question.trim().is_empty() {
            return;
        }
        let Some(permit) = self.slot.try_acquire() else {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        };
        let Some(history) = self.transcript.begin_question(&question) else {
            return;
        };
        self.input.clear();
        self.pending = true;
        self.status = None;

        let client = Arc::clone(&self.client);
        let session_id = self.session_id.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match client.ask(&session_id, &question, history).await {
                Ok(mut answer) => {
                    while let Some(fragment) = answer.next_fragment().await {
                        match fragment {
                            Ok(fragment) => {
                                if sender.send(UiEvent::Fragment(fragment)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                let detail = err.to_string();
                                let event = if matches!(err, ClientError::Stream(_)) {
                                    UiEvent::StreamInterrupted(detail)
                                } else {
                                    UiEvent::RequestFailed(detail)
                                };
                                let _ = sender.send(event).await;
                                return;
                            }
                        }
                    }
                    let sources = answer.sources().to_vec();
                    let _ = sender.send(UiEvent::AnswerDone { sources }).await;
                }
                Err(err) => {
                    let _ = sender.send(UiEvent::RequestFailed(err.to_string())).await;
                }
            }
        });
    }

    fn trigger_export(&mut self) {
        if self.pending || self.exporting {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        }
        if self.transcript.is_empty() {
            self.status = Some("Nothing to export yet.".to_string());
            return;
        }
        let Some(permit) = self.slot.try_acquire() else {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        };
        self.exporting = true;
        self.status = Some("Generating summary...".to_string());

        let client = Arc::clone(&self.client);
        let turns = self.transcript.turns().to_vec();
        let output_dir = self.output_dir.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let saved = match client.export_pdf(&turns).await {
                Ok(payload) => {
                    export::save_summary(&output_dir, &payload).map_err(|err| err.to_string())
                }
                Err(err) => Err(err.to_string()),
            };
            let event = match saved {
                Ok(path) => UiEvent::ExportSaved(path),
                Err(detail) => UiEvent::ExportFailed(detail),
            };
            let _ = sender.send(event).await;
        });
    }

    fn handle_events(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply_event(event);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    return Ok(false);
                }
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('e')
                {
                    self.trigger_export();
                    return Ok(true);
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else {
                            self.submit_question();
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.move_home();
                    }
                    KeyCode::End => {
                        self.input.move_end();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

fn push_turn_lines(lines: &mut Vec<Line<'static>>, turn: &ConversationTurn) {
    let (label, color) = match turn.sender {
        Sender::User => ("You:", Color::Blue),
        Sender::Model => ("Answer:", Color::Yellow),
    };
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);
    lines.push(Line::from(Span::styled(label, header_style)));
    for line in turn.text.lines() {
        lines.push(Line::from(Span::styled(format!("  {}", line), body_style)));
    }
    lines.push(Line::from(""));
}

fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = width as usize;
    let mut total = 0usize;
    for line in lines {
        // Display width in cells, not byte length.
        let len = line.width().max(1);
        total += len.div_ceil(width);
    }
    total.min(u16::MAX as usize) as u16
}

pub fn run_tui(config: UiConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    enable_raw_mode()?;
    let _guard = TerminalGuard::new();
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config);

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events()? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;
    }

    Ok(())
}
