//! Markdown to ratatui text conversion.
//!
//! Assistant replies are rendered as markdown. Fenced code blocks are syntax
//! highlighted with syntect, but only for finished messages: while a reply is
//! still streaming its code is shown plain, so half-written blocks are not
//! re-highlighted on every chunk.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

const THEME: &str = "base16-ocean.dark";

/// Render markdown into styled lines.
///
/// Code lines wider than `width` are truncated rather than wrapped.
pub fn render_markdown(text: &str, width: usize, highlight: bool) -> Vec<Line<'static>> {
    Renderer::new(width, highlight).run(text)
}

// =============================================================================
// Highlighting
// =============================================================================

fn syntax_set() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme() -> Option<&'static Theme> {
    static THEMES: OnceLock<ThemeSet> = OnceLock::new();
    THEMES.get_or_init(ThemeSet::load_defaults).themes.get(THEME)
}

fn plain_code(code: &str) -> Vec<Vec<Span<'static>>> {
    code.lines()
        .map(|line| vec![Span::styled(line.to_string(), Style::default().fg(Color::Yellow))])
        .collect()
}

fn highlight_code(code: &str, lang: &str) -> Vec<Vec<Span<'static>>> {
    let Some(theme) = theme() else {
        return plain_code(code);
    };
    let syntaxes = syntax_set();
    let syntax = syntaxes
        .find_syntax_by_token(lang)
        .unwrap_or_else(|| syntaxes.find_syntax_plain_text());
    let mut highlighter = HighlightLines::new(syntax, theme);

    LinesWithEndings::from(code)
        .map(|line| match highlighter.highlight_line(line, syntaxes) {
            Ok(ranges) => ranges
                .into_iter()
                .filter_map(|(style, piece)| {
                    let piece = piece.trim_end_matches(&['\n', '\r'][..]);
                    (!piece.is_empty()).then(|| Span::styled(piece.to_string(), to_ratatui(style)))
                })
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, lang, "Highlighting failed");
                vec![Span::styled(
                    line.trim_end_matches(&['\n', '\r'][..]).to_string(),
                    Style::default().fg(Color::Yellow),
                )]
            }
        })
        .collect()
}

fn to_ratatui(style: syntect::highlighting::Style) -> Style {
    let fg = style.foreground;
    let mut out = Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b));
    if style.font_style.contains(FontStyle::BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.font_style.contains(FontStyle::ITALIC) {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.font_style.contains(FontStyle::UNDERLINE) {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    out
}

// =============================================================================
// Renderer
// =============================================================================

struct CodeBlock {
    lang: String,
    body: String,
}

struct Renderer {
    width: usize,
    highlight: bool,
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    styles: Vec<Style>,
    code: Option<CodeBlock>,
    /// Next number per open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
}

impl Renderer {
    fn new(width: usize, highlight: bool) -> Self {
        Self {
            width,
            highlight,
            lines: Vec::new(),
            spans: Vec::new(),
            styles: vec![Style::default()],
            code: None,
            lists: Vec::new(),
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, f: impl FnOnce(Style) -> Style) {
        let next = f(self.style());
        self.styles.push(next);
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn flush(&mut self) {
        if !self.spans.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        }
    }

    fn blank(&mut self) {
        self.flush();
        if self.lines.last().is_some_and(|l| !l.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.body.push_str(text);
            return;
        }
        let style = self.style();
        for (i, part) in text.split('\n').enumerate() {
            if i > 0 {
                self.flush();
            }
            if !part.is_empty() {
                self.spans.push(Span::styled(part.to_string(), style));
            }
        }
    }

    fn run(mut self, text: &str) -> Vec<Line<'static>> {
        let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
        for event in parser {
            match event {
                Event::Start(tag) => self.start(tag),
                Event::End(tag) => self.end(tag),
                Event::Text(text) => self.text(&text),
                Event::Code(code) => self.spans.push(Span::styled(
                    format!("`{code}`"),
                    Style::default().fg(Color::Yellow).bg(Color::Rgb(40, 40, 40)),
                )),
                Event::SoftBreak | Event::HardBreak => self.flush(),
                Event::Rule => {
                    self.flush();
                    self.lines.push(Line::styled(
                        "─".repeat(self.width.min(60)),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                _ => {}
            }
        }

        // Unterminated fence while streaming.
        if self.code.is_some() {
            self.code_block();
        }
        self.flush();
        while self.lines.last().is_some_and(|l| l.spans.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }

    fn start(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.blank();
                let marks = match level {
                    HeadingLevel::H1 => "# ",
                    HeadingLevel::H2 => "## ",
                    _ => "### ",
                };
                self.spans
                    .push(Span::styled(marks, Style::default().fg(Color::Magenta)));
                self.push_style(|s| s.fg(Color::Magenta).add_modifier(Modifier::BOLD));
            }
            Tag::BlockQuote(_) => {
                self.flush();
                self.spans
                    .push(Span::styled("│ ", Style::default().fg(Color::Blue)));
                self.push_style(|s| s.fg(Color::Blue));
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let lang = match kind {
                    CodeBlockKind::Fenced(lang) => lang.split_whitespace().next().unwrap_or("").to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBlock {
                    lang,
                    body: String::new(),
                });
            }
            Tag::List(first) => {
                self.flush();
                self.lists.push(first);
            }
            Tag::Item => {
                let depth = self.lists.len().saturating_sub(1);
                let bullet = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let bullet = format!("{}{n}. ", "  ".repeat(depth));
                        *n += 1;
                        bullet
                    }
                    _ => format!("{}• ", "  ".repeat(depth)),
                };
                self.spans
                    .push(Span::styled(bullet, Style::default().fg(Color::Cyan)));
            }
            Tag::Emphasis => self.push_style(|s| s.add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(|s| s.add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => self.push_style(|s| s.add_modifier(Modifier::CROSSED_OUT)),
            Tag::Link { .. } => {
                self.push_style(|s| s.fg(Color::Blue).add_modifier(Modifier::UNDERLINED));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                self.pop_style();
                self.flush();
            }
            TagEnd::Paragraph => self.blank(),
            TagEnd::BlockQuote(_) => {
                self.pop_style();
                self.flush();
            }
            TagEnd::CodeBlock => self.code_block(),
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::Item => self.flush(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link => {
                self.pop_style();
            }
            _ => {}
        }
    }

    fn code_block(&mut self) {
        let Some(CodeBlock { lang, body }) = self.code.take() else {
            return;
        };
        let frame = Style::default().fg(Color::DarkGray);
        let rule = self.width.saturating_sub(lang.len() + 4).min(40);

        self.lines.push(Line::from(vec![
            Span::styled("┌─ ", frame),
            Span::styled(
                lang.clone(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!(" {}", "─".repeat(rule)), frame),
        ]));

        let code_lines = if self.highlight {
            highlight_code(&body, &lang)
        } else {
            plain_code(&body)
        };
        let room = self.width.saturating_sub(4);
        for spans in code_lines {
            let mut line = vec![Span::styled("│ ", frame)];
            line.extend(truncate_spans(spans, room));
            self.lines.push(Line::from(line));
        }

        self.lines.push(Line::styled(
            format!("└{}", "─".repeat(self.width.saturating_sub(2).min(44))),
            frame,
        ));
        self.lines.push(Line::default());
    }
}

/// Cut `spans` to at most `room` characters, marking the cut with `…`.
fn truncate_spans(spans: Vec<Span<'static>>, room: usize) -> Vec<Span<'static>> {
    let total: usize = spans.iter().map(|s| s.content.chars().count()).sum();
    if total <= room {
        return spans;
    }

    let mut left = room.saturating_sub(1);
    let mut out = Vec::new();
    for span in spans {
        if left == 0 {
            break;
        }
        let len = span.content.chars().count();
        if len <= left {
            left -= len;
            out.push(span);
        } else {
            let cut: String = span.content.chars().take(left).collect();
            out.push(Span::styled(cut, span.style));
            left = 0;
        }
    }
    out.push(Span::styled("…", Style::default().fg(Color::DarkGray)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn paragraphs_are_separated_by_blank_lines() {
        let lines = render_markdown("first\n\nsecond", 80, false);
        assert_eq!(plain(&lines), vec!["first", "", "second"]);
    }

    #[test]
    fn lists_get_markers() {
        let lines = render_markdown("1. one\n2. two\n\n- dot", 80, false);
        let text = plain(&lines);
        assert!(text.contains(&"1. one".to_string()));
        assert!(text.contains(&"2. two".to_string()));
        assert!(text.contains(&"• dot".to_string()));
    }

    #[test]
    fn streaming_code_is_not_highlighted() {
        let lines = render_markdown("```rust\nfn main() {}\n```", 80, false);
        let body = &lines[1];
        assert_eq!(body.spans[1].content, "fn main() {}");
        assert_eq!(body.spans[1].style.fg, Some(Color::Yellow));
    }

    #[test]
    fn finished_code_is_highlighted() {
        let lines = render_markdown("```rust\nfn main() {}\n```", 80, true);
        let body = &lines[1];
        assert!(body.spans.len() > 2, "expected several highlighted spans");
        assert!(body
            .spans
            .iter()
            .skip(1)
            .all(|s| matches!(s.style.fg, Some(Color::Rgb(..)))));
    }

    #[test]
    fn unterminated_fence_still_renders() {
        let lines = render_markdown("```py\nprint(1)", 80, false);
        assert!(plain(&lines).iter().any(|l| l.contains("print(1)")));
    }

    #[test]
    fn long_code_lines_are_truncated() {
        let code = format!("```\n{}\n```", "x".repeat(100));
        let lines = render_markdown(&code, 20, false);
        let body = plain(&lines)[1].clone();
        assert!(body.ends_with('…'));
        assert!(body.chars().count() <= 20);
    }
}
