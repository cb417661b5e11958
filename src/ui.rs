//! Terminal UI rendering for the orca dashboard.
//!
//! Layout, top to bottom:
//! - viewport: output of the selected task, ANSI colors preserved
//! - separator
//! - HUD: progress gauge and the task list
//! - status bar: keymap legend and follow indicator
//!
//! Minimal chrome: no borders, whitespace as structure, selection uses the
//! REVERSED modifier so it adapts to the terminal theme.
//!
//! This module renders from RenderState (immutable snapshot) and never
//! mutates application state.

use ansi_to_tui::IntoText;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Clear, Gauge, Paragraph},
    Frame,
};

use crate::event::TaskStatus;
use crate::render::{RenderState, TaskView};
use crate::tea::{Notification, NotificationLevel};

const COLOR_TEXT_DIMMED: Color = Color::Gray;
const COLOR_TEXT_MUTED: Color = Color::DarkGray;
const COLOR_SEPARATOR: Color = Color::White;
const COLOR_GAUGE: Color = Color::Cyan;

const COLOR_STATUS_PENDING: Color = Color::DarkGray;
const COLOR_STATUS_RUNNING: Color = Color::Green;
const COLOR_STATUS_COMPLETED: Color = Color::Cyan;
const COLOR_STATUS_FAILED: Color = Color::Red;
const COLOR_STATUS_CANCELLED: Color = Color::Yellow;

const HUD_HEIGHT: u16 = 8;

const STATUS_WIDTH: usize = 10;
const ID_WIDTH: usize = 8;
const EXIT_WIDTH: usize = 5;
const TIME_WIDTH: usize = 8;
const SPACING: usize = 2;

struct Keybinding(&'static str, &'static str);

const KEYMAP: &[Keybinding] = &[
    Keybinding("j/k", "select"),
    Keybinding("f", "follow"),
    Keybinding("q", "quit"),
];

/// Main render function. Takes an immutable RenderState snapshot.
pub fn draw(frame: &mut Frame, state: &RenderState) {
    render_main_layout(frame, state);

    if let Some(ref notification) = state.notification {
        render_notification(frame, notification, frame.area());
    }
}

fn render_main_layout(frame: &mut Frame, state: &RenderState) {
    let area = frame.area();

    if area.height < 4 {
        render_hud(frame, state, area);
        return;
    }

    let hud_height = HUD_HEIGHT.min(area.height.saturating_sub(3));
    let separator_height = if area.height > hud_height + 2 { 1 } else { 0 };

    let chunks = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(separator_height),
        Constraint::Length(hud_height),
        Constraint::Length(1),
    ])
    .split(area);

    render_viewport(frame, state, chunks[0]);
    if separator_height > 0 {
        render_separator(frame, chunks[1]);
    }
    render_hud(frame, state, chunks[2]);
    render_statusbar(frame, state, chunks[3]);
}

/// Render the viewport: tail of the selected task's output with colors.
fn render_viewport(frame: &mut Frame, state: &RenderState, area: Rect) {
    if state.output.is_empty() {
        let hint = match state.selected_task() {
            Some(task) if task.status == TaskStatus::Pending => "Waiting to start...",
            Some(_) => "No output yet.",
            None => "No tasks.",
        };
        let line = Line::from(Span::styled(hint, Style::default().fg(COLOR_TEXT_MUTED)));
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let text: Text = state.output.as_str().into_text().unwrap_or_default();

    let visible_lines = area.height as usize;
    let start = text.lines.len().saturating_sub(visible_lines);
    let lines: Vec<Line> = text.lines.into_iter().skip(start).collect();

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_separator(frame: &mut Frame, area: Rect) {
    let solid = "─".repeat(area.width as usize);
    let line = Line::from(Span::styled(solid, Style::default().fg(COLOR_SEPARATOR)));
    frame.render_widget(Paragraph::new(line), area);
}

/// Render the HUD: one gauge line, then the task list.
fn render_hud(frame: &mut Frame, state: &RenderState, area: Rect) {
    if area.height == 0 {
        return;
    }
    let chunks = Layout::vertical([Constraint::Length(1), Constraint::Fill(1)]).split(area);
    render_progress_bar(frame, state, chunks[0]);
    render_task_list(frame, state, chunks[1]);
}

fn render_progress_bar(frame: &mut Frame, state: &RenderState, area: Rect) {
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(COLOR_GAUGE).bg(Color::DarkGray))
        .percent(state.percent_done())
        .label(progress_label(state));

    frame.render_widget(gauge, area);
}

fn render_task_list(frame: &mut Frame, state: &RenderState, area: Rect) {
    if area.height == 0 {
        return;
    }
    if state.tasks.is_empty() {
        let msg = Line::from(Span::styled(
            "No tasks yet.",
            Style::default().fg(COLOR_TEXT_DIMMED),
        ));
        frame.render_widget(Paragraph::new(msg), area);
        return;
    }

    let header_height = 1;
    let content_height = (area.height as usize).saturating_sub(header_height);

    // Scrolloff: keep selection centered
    let center = content_height / 2;
    let start = state.selected.saturating_sub(center);
    let end = (start + content_height).min(state.tasks.len());
    let start = end.saturating_sub(content_height);

    let mut lines: Vec<Line> = Vec::with_capacity(content_height + header_height);
    lines.push(render_header_row(area.width));
    lines.extend(
        state
            .tasks
            .iter()
            .enumerate()
            .skip(start)
            .take(content_height)
            .map(|(idx, task)| render_task_row(task, idx == state.selected, area.width)),
    );

    frame.render_widget(Paragraph::new(lines), area);
}

fn label_width(width: u16) -> usize {
    let fixed = STATUS_WIDTH + ID_WIDTH + EXIT_WIDTH + TIME_WIDTH + SPACING * 4;
    (width as usize).saturating_sub(fixed)
}

fn render_header_row(width: u16) -> Line<'static> {
    let style = Style::default()
        .fg(COLOR_TEXT_DIMMED)
        .add_modifier(Modifier::BOLD);

    if width < 40 {
        return Line::from(Span::styled("TASK", style));
    }

    let text = format!(
        "{:<sw$}  {:<iw$}  {:<lw$}  {:<ew$}  {:<tw$}",
        "STATUS",
        "ID",
        "TASK",
        "EXIT",
        "TIME",
        sw = STATUS_WIDTH,
        iw = ID_WIDTH,
        lw = label_width(width),
        ew = EXIT_WIDTH,
        tw = TIME_WIDTH,
    );
    Line::from(Span::styled(text, style))
}

fn render_task_row(task: &TaskView, is_selected: bool, width: u16) -> Line<'static> {
    let selected = Style::default().add_modifier(Modifier::REVERSED);

    if width < 40 {
        let style = if is_selected {
            selected
        } else {
            Style::default().fg(status_color(task.status))
        };
        return Line::from(Span::styled(truncate(&task.label, width as usize), style));
    }

    let lw = label_width(width);
    let status = format!("{:<w$}", task.status.to_string(), w = STATUS_WIDTH);
    let id = format!("{:<w$}", task.id.short(), w = ID_WIDTH);
    let label = format!("{:<w$}", truncate(&task.label, lw), w = lw);
    let exit = format!(
        "{:<w$}",
        task.exit_code.map(|c| c.to_string()).unwrap_or_default(),
        w = EXIT_WIDTH
    );
    let time = format!(
        "{:<w$}",
        task.duration_ms.map(format_duration).unwrap_or_default(),
        w = TIME_WIDTH
    );

    let (status_style, primary_style, secondary_style) = if is_selected {
        (selected, selected, selected)
    } else {
        (
            Style::default().fg(status_color(task.status)),
            Style::default(),
            Style::default().fg(COLOR_TEXT_DIMMED),
        )
    };
    let spacing = " ".repeat(SPACING);

    Line::from(vec![
        Span::styled(status, status_style),
        Span::styled(spacing.clone(), primary_style),
        Span::styled(id, secondary_style),
        Span::styled(spacing.clone(), primary_style),
        Span::styled(label, primary_style),
        Span::styled(spacing.clone(), primary_style),
        Span::styled(exit, secondary_style),
        Span::styled(spacing, primary_style),
        Span::styled(time, secondary_style),
    ])
}

/// Bottom line: '?' toggle, optional keymap legend, follow badge on the right.
fn render_statusbar(frame: &mut Frame, state: &RenderState, area: Rect) {
    frame.render_widget(Paragraph::new(render_keymap_line(state, area.width)), area);
}

fn render_keymap_line(state: &RenderState, width: u16) -> Line<'static> {
    let key_style = Style::default().fg(COLOR_TEXT_DIMMED);
    let desc_style = Style::default().fg(COLOR_TEXT_MUTED);
    let sep_style = Style::default().fg(COLOR_TEXT_MUTED);

    let help_style = if state.show_keymap {
        Style::default()
    } else {
        Style::default().fg(COLOR_TEXT_MUTED)
    };
    let mut spans: Vec<Span> = vec![Span::styled("?", help_style)];

    if state.show_keymap {
        spans.push(Span::styled(" │ ", sep_style));
        for (idx, binding) in KEYMAP.iter().enumerate() {
            if idx > 0 {
                spans.push(Span::styled(" • ", sep_style));
            }
            spans.push(Span::styled(binding.0, key_style));
            spans.push(Span::styled(format!(" {}", binding.1), desc_style));
        }
    }

    let badge = if state.follow { " FOLLOW " } else { "" };
    if !badge.is_empty() {
        let content_width: usize = spans.iter().map(|s| s.content.chars().count()).sum();
        let spacer = (width as usize)
            .saturating_sub(content_width)
            .saturating_sub(badge.len());
        if spacer > 0 {
            spans.push(Span::raw(" ".repeat(spacer)));
        }
        spans.push(Span::styled(
            badge,
            Style::default().fg(Color::Black).bg(COLOR_GAUGE),
        ));
    }

    Line::from(spans)
}

fn render_notification(frame: &mut Frame, notification: &Notification, area: Rect) {
    let notification_area = Rect {
        x: area.x,
        y: area.y + area.height.saturating_sub(1),
        width: area.width,
        height: 1,
    };

    frame.render_widget(Clear, notification_area);

    let line = match notification.level {
        NotificationLevel::Error => Line::from(vec![
            Span::styled(
                "Error: ",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                notification.message.clone(),
                Style::default().fg(Color::Red),
            ),
        ]),
        NotificationLevel::Info => Line::from(Span::styled(
            notification.message.clone(),
            Style::default().fg(Color::Green),
        )),
    };

    frame.render_widget(Paragraph::new(line), notification_area);
}

// Helper functions

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => COLOR_STATUS_PENDING,
        TaskStatus::Running => COLOR_STATUS_RUNNING,
        TaskStatus::Completed => COLOR_STATUS_COMPLETED,
        TaskStatus::Failed => COLOR_STATUS_FAILED,
        TaskStatus::Cancelled => COLOR_STATUS_CANCELLED,
    }
}

fn progress_label(state: &RenderState) -> String {
    let p = state.progress;
    let mut label = format!(
        "{}% ({}/{})",
        state.percent_done(),
        p.finished(),
        p.total
    );
    if p.running > 0 {
        label.push_str(&format!(" · {} running", p.running));
    }
    if p.failed > 0 {
        label.push_str(&format!(" · {} failed", p.failed));
    }
    label
}

/// Format milliseconds as "850ms", "12.3s" or "4m05s".
fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 1).collect();
        format!("{}~", truncated)
    }
}
