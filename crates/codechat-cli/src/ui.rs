//! UI rendering with ratatui.
//!
//! Single-column layout: header, transcript, input line, status bar. The
//! command palette and the help screen are drawn as overlays.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
    ScrollbarState, Wrap,
};
use ratatui::Frame;

use codechat_core::SERVER_COMMANDS;
use codechat_session::{Closure, ConnectionState};

use crate::app::App;
use crate::commands::LOCAL_COMMANDS;
use crate::markdown::render_markdown;
use crate::transcript::{Entry, EntryKind};

/// Horizontal padding inside the transcript.
const PADDING: u16 = 2;

/// Render the UI.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Transcript
            Constraint::Length(1), // Separator
            Constraint::Length(1), // Input
            Constraint::Length(1), // Status
        ])
        .split(area);

    render_header(frame, app, rows[0]);
    render_transcript(frame, app, rows[1]);
    render_input(frame, app, rows[2], rows[3]);
    render_status(frame, app, rows[4]);

    if app.show_help {
        render_help(frame, area);
    } else {
        render_palette(frame, app, rows[1]);
    }
}

fn connection_label(state: ConnectionState) -> (&'static str, Color) {
    match state {
        ConnectionState::Open => ("connected", Color::Green),
        ConnectionState::Connecting => ("connecting", Color::Yellow),
        ConnectionState::Idle => ("offline", Color::Gray),
        ConnectionState::Closed(Closure::Reconnectable) => ("reconnecting", Color::Yellow),
        ConnectionState::Closed(Closure::Terminal) => ("disconnected", Color::Red),
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let (label, color) = connection_label(app.connection_state());
    let settings = app.settings();
    let title = "CODECHAT";
    let info = format!(
        "{} t={} max={} {} ",
        settings.model,
        settings.temperature,
        settings.max_tokens,
        app.server_url()
    );
    let used = title.len() + info.chars().count() + label.len() + 2;
    let gap = usize::from(area.width).saturating_sub(used);

    let line = Line::from(vec![
        Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" ".repeat(gap)),
        Span::raw(info),
        Span::raw("["),
        Span::styled(label, Style::default().fg(color)),
        Span::raw("]"),
    ]);
    frame.render_widget(
        Paragraph::new(line).style(Style::default().bg(Color::DarkGray)),
        area,
    );
}

fn entry_header(entry: &Entry) -> Line<'static> {
    let (label, color) = match entry.kind {
        EntryKind::User => ("[You]", Color::Cyan),
        EntryKind::Assistant => ("[Assistant]", Color::Green),
        EntryKind::Error => ("[Error]", Color::Red),
    };
    Line::from(vec![
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!(" {}", entry.at.format("%H:%M")),
            Style::default().fg(Color::DarkGray),
        ),
    ])
}

fn transcript_lines(app: &App, width: usize) -> Vec<Line<'static>> {
    let transcript = app.transcript();
    let mut lines = Vec::new();

    for entry in transcript.visible() {
        lines.push(entry_header(entry));
        match entry.kind {
            EntryKind::Assistant => {
                lines.extend(render_markdown(&entry.text, width, entry.finalized));
                if !entry.finalized {
                    lines.push(Line::styled("▌", Style::default().fg(Color::DarkGray)));
                }
            }
            EntryKind::User => {
                lines.extend(
                    entry
                        .text
                        .lines()
                        .map(|l| Line::styled(l.to_string(), Style::default().fg(Color::White))),
                );
            }
            EntryKind::Error => {
                lines.push(Line::styled(entry.text.clone(), Style::default().fg(Color::Red)));
            }
        }
        lines.push(Line::default());
    }

    let waiting = transcript
        .entries()
        .last()
        .map_or(true, |e| e.kind != EntryKind::Assistant || e.finalized);
    if transcript.is_generating() && waiting {
        lines.push(Line::from(vec![
            Span::styled(app.spinner_char(), Style::default().fg(Color::Yellow)),
            Span::styled(" thinking...", Style::default().fg(Color::DarkGray)),
        ]));
    }
    lines
}

fn render_transcript(frame: &mut Frame, app: &App, area: Rect) {
    let inner = Rect::new(
        area.x + PADDING,
        area.y,
        area.width.saturating_sub(PADDING * 2 + 1),
        area.height,
    );
    let width = usize::from(inner.width);
    let transcript = app.transcript();

    if transcript.is_empty() && !transcript.is_generating() {
        let hint = Paragraph::new("Type a message and press Enter. Type / for commands.")
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true });
        frame.render_widget(hint, inner);
        return;
    }

    let text = Text::from(transcript_lines(app, width));
    let visible = usize::from(inner.height);
    let total = wrapped_height(&text, width);
    let max_scroll = total.saturating_sub(visible);
    let from_bottom = app.scroll.min(max_scroll);
    let offset = max_scroll - from_bottom;

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(offset).unwrap_or(u16::MAX), 0));
    frame.render_widget(paragraph, inner);

    if total > visible {
        let mut state = ScrollbarState::new(total)
            .position(offset)
            .viewport_content_length(visible);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("▲"))
                .end_symbol(Some("▼")),
            area,
            &mut state,
        );
    }
}

fn render_input(frame: &mut Frame, app: &App, separator: Rect, area: Rect) {
    frame.render_widget(
        Paragraph::new("─".repeat(usize::from(separator.width)))
            .style(Style::default().fg(Color::DarkGray)),
        separator,
    );

    let prompt = "> ";
    let line = Line::from(vec![
        Span::styled(prompt, Style::default().fg(Color::Cyan)),
        Span::styled(app.input.as_str(), Style::default().fg(Color::White)),
    ]);
    frame.render_widget(Paragraph::new(line), area);

    if !app.show_help {
        let column = prompt.len() + app.input.chars().take(app.cursor).count();
        frame.set_cursor_position((
            area.x + u16::try_from(column).unwrap_or(area.width),
            area.y,
        ));
    }
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(error) = &app.error_message {
        Line::from(vec![
            Span::styled(" ERROR: ", Style::default().fg(Color::Red).bold()),
            Span::styled(error.as_str(), Style::default().fg(Color::Red)),
        ])
    } else if let Some(filter) = app.transcript().filter() {
        Line::from(vec![
            Span::styled(" SEARCH ", Style::default().fg(Color::Black).bg(Color::Yellow)),
            Span::raw(format!(" \"{filter}\"  ")),
            Span::styled("/search", Style::default().fg(Color::Yellow)),
            Span::raw(" with no text to clear"),
        ])
    } else if let Some(status) = &app.status_message {
        Line::from(Span::styled(format!(" {status}"), Style::default().fg(Color::Green)))
    } else {
        key_hints(app.is_generating())
    };

    frame.render_widget(
        Paragraph::new(line).style(Style::default().bg(Color::DarkGray)),
        area,
    );
}

fn key_hints(generating: bool) -> Line<'static> {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let mut spans = vec![Span::raw(" "), key("Enter"), Span::raw(":send ")];
    if generating {
        spans.extend([key("Esc"), Span::raw(":stop ")]);
    }
    spans.extend([
        key("PgUp/PgDn"),
        Span::raw(":scroll "),
        key("/help"),
        Span::raw(" "),
        key("Ctrl-C"),
        Span::raw(":quit"),
    ]);
    Line::from(spans)
}

/// Palette popup anchored to the bottom of the transcript area.
fn render_palette(frame: &mut Frame, app: &App, area: Rect) {
    let matches = app.suggestions();
    if matches.is_empty() {
        return;
    }

    let height = u16::try_from(matches.len() + 2)
        .unwrap_or(u16::MAX)
        .min(area.height);
    let width = 44.min(area.width);
    let popup = Rect::new(
        area.x + 1,
        area.y + area.height.saturating_sub(height),
        width,
        height,
    );

    let items: Vec<ListItem> = matches
        .iter()
        .enumerate()
        .map(|(i, command)| {
            let name_style = if i == 0 {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Yellow)
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<12}", command.name), name_style),
                Span::styled(command.description, Style::default().fg(Color::Gray)),
            ]))
        })
        .collect();

    frame.render_widget(Clear, popup);
    frame.render_widget(
        List::new(items).block(
            Block::default()
                .title(" Commands (Tab) ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        ),
        popup,
    );
}

fn render_help(frame: &mut Frame, area: Rect) {
    let popup = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup);

    let heading = |t: &'static str| {
        Line::styled(t, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    };
    let row = |name: &'static str, description: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {name:<12}"), Style::default().fg(Color::Yellow)),
            Span::raw(description),
        ])
    };

    let mut lines = vec![heading("Server commands")];
    lines.extend(SERVER_COMMANDS.iter().map(|c| row(c.name, c.description)));
    lines.push(Line::default());
    lines.push(heading("Client commands"));
    lines.extend(LOCAL_COMMANDS.iter().map(|c| row(c.name, c.description)));
    lines.push(Line::default());
    lines.push(heading("Keys"));
    lines.extend([
        row("Enter", "Send message"),
        row("Esc", "Stop response, dismiss error"),
        row("Tab", "Complete command"),
        row("PgUp/PgDn", "Scroll transcript"),
        row("Ctrl-C", "Quit"),
    ]);

    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .title(" Help (Esc to close) ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false }),
        popup,
    );
}

/// Number of screen rows `text` takes when wrapped to `width`.
fn wrapped_height(text: &Text, width: usize) -> usize {
    if width == 0 {
        return text.lines.len();
    }
    text.lines
        .iter()
        .map(|line| line.width().div_ceil(width).max(1))
        .sum()
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_height_counts_wrapped_rows() {
        let text = Text::from(vec![
            Line::raw("x".repeat(25)),
            Line::default(),
            Line::raw("short"),
        ]);
        assert_eq!(wrapped_height(&text, 10), 3 + 1 + 1);
        assert_eq!(wrapped_height(&text, 0), 3);
    }

    #[test]
    fn centered_rect_is_inside_area() {
        let area = Rect::new(0, 0, 100, 50);
        let rect = centered_rect(60, 70, area);
        assert_eq!(rect.width, 60);
        assert!(rect.x >= 20 && rect.y > 0);
    }
}
