//! Renders the current `App` state into a two-pane layout: a table of every
//! feed's throughput at the top, a detail panel for the selected feed
//! (context ring, LLM query stats) at the bottom.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Frame;

use crate::app::App;

pub fn draw(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(9), Constraint::Length(1)])
        .split(area);

    draw_feed_table(frame, chunks[0], app);
    draw_detail_panel(frame, chunks[1], app);
    draw_status_line(frame, chunks[2], app);
}

fn draw_feed_table(frame: &mut Frame, area: Rect, app: &App) {
    let header = Row::new(vec!["Feed", "Status", "msg/s (1s)", "msg/s (60s)", "Drops", "Parse fail"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.feeds.iter().enumerate().map(|(i, f)| {
        let status = if f.connected { "up" } else { "down" };
        let status_style = if f.connected { Style::default().fg(Color::Green) } else { Style::default().fg(Color::Red) };
        let style = if i == app.selected { Style::default().add_modifier(Modifier::REVERSED) } else { Style::default() };
        Row::new(vec![
            Cell::from(f.name.clone()),
            Cell::from(status).style(status_style),
            Cell::from(format!("{:.1}", f.message_rate_1s)),
            Cell::from(format!("{:.1}", f.message_rate_60s)),
            Cell::from(f.backpressure_drops_total.to_string()),
            Cell::from(f.parse_failures_total.to_string()),
        ])
        .style(style)
    });

    let widths = [
        Constraint::Percentage(30),
        Constraint::Percentage(10),
        Constraint::Percentage(15),
        Constraint::Percentage(15),
        Constraint::Percentage(15),
        Constraint::Percentage(15),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Feeds"));
    frame.render_widget(table, area);
}

fn draw_detail_panel(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default().borders(Borders::ALL).title("Detail");
    let Some(feed) = app.selected_feed() else {
        frame.render_widget(Paragraph::new("no feeds configured").block(block), area);
        return;
    };

    let lines = vec![
        Line::from(vec![Span::raw(format!("feed_id: {}", feed.feed_id))]),
        Line::from(vec![Span::raw(format!(
            "context: {} items, ~{} bytes, oldest {:.0}s",
            feed.context_item_count, feed.context_approx_bytes, feed.context_oldest_age_secs
        ))]),
        Line::from(vec![Span::raw(format!(
            "throughput: {:.1}/s (1s) {:.1}/s (10s) {:.1}/s (60s), {:.0} B/s",
            feed.message_rate_1s, feed.message_rate_10s, feed.message_rate_60s, feed.byte_rate_1s
        ))]),
        Line::from(vec![Span::raw(format!(
            "payload size p50/p95/p99: {}/{}/{}",
            fmt_opt(feed.payload_size_p50),
            fmt_opt(feed.payload_size_p95),
            fmt_opt(feed.payload_size_p99)
        ))]),
        Line::from(vec![Span::raw(format!(
            "llm: {} requests, {} errors, {} in-tok, {} out-tok, {} events in context",
            feed.llm_requests_total, feed.llm_errors_total, feed.llm_input_tokens_total, feed.llm_output_tokens_total, feed.events_in_context_last
        ))]),
        Line::from(vec![Span::raw(format!(
            "ttft p50/p95: {}ms/{}ms, avg gen time: {}ms",
            fmt_opt(feed.ttft_ms_p50),
            fmt_opt(feed.ttft_ms_p95),
            feed.total_gen_ms_avg.map_or_else(|| "-".to_owned(), |v| format!("{v:.0}"))
        ))]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_status_line(frame: &mut Frame, area: Rect, app: &App) {
    let text = match &app.last_error {
        Some(err) => Line::from(Span::styled(format!("poll error: {err}"), Style::default().fg(Color::Red))),
        None => Line::from(Span::raw("q: quit   ↑/↓ or j/k: select feed")),
    };
    frame.render_widget(Paragraph::new(text), area);
}

fn fmt_opt(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}
