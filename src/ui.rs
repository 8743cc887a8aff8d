//! TUI rendering for the toilet radar
//!
//! This module draws the map of the current viewport, the list of toilets in
//! view, the "save me" route panel, the status bar and the place search popup
//! using the `ratatui` crate.

use crate::app::{App, ViewMode};
use crate::fetch::Tier;
use crate::models::{Source, Toilet};
use ratatui::{
    prelude::*,
    widgets::{canvas::*, *},
};
use ratatui::text::Line;

const HELP: &str = " ←↑↓→ pan  +/- zoom  j/k select  c center  s save me  / search  r reload  q quit";

/// Renders one frame of the TUI based on current application state.
///
/// # Arguments
///
/// * `f` - The ratatui frame to draw into (from `terminal.draw()`).
/// * `app` - Current application state.
pub fn render(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(4)])
        .split(f.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(rows[0]);

    render_map(f, app, columns[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(9), Constraint::Length(7)])
        .split(columns[1]);
    render_toilet_list(f, app, side[0]);
    render_details(f, app, side[1]);
    render_route(f, app, side[2]);

    render_status_bar(f, app, rows[1]);

    if app.view_mode == ViewMode::Search {
        render_search_popup(f, app);
    }
}

/// The visible viewport: toilets as dots, the selected one labelled, the user as a crosshair.
fn render_map(f: &mut Frame, app: &App, area: Rect) {
    let bounds = app.viewport.bounds();
    let title = format!(
        " Map · zoom {} · {} ",
        app.viewport.zoom, app.viewport.center
    );

    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title(title).border_type(BorderType::Rounded))
        .marker(symbols::Marker::Braille)
        .x_bounds([bounds.west, bounds.east])
        .y_bounds([bounds.south, bounds.north])
        .paint(|ctx| {
            ctx.draw(&Map {
                color: Color::Rgb(50, 50, 50),
                resolution: MapResolution::High,
            });
            ctx.layer();

            let selected = app.selected_toilet().map(|t| t.id.as_str());
            for toilet in &app.toilets {
                let (x, y) = (toilet.coordinate.lng, toilet.coordinate.lat);
                if Some(toilet.id.as_str()) == selected {
                    ctx.print(
                        x,
                        y,
                        Line::from(vec![
                            Span::styled(
                                "◆ ",
                                Style::default()
                                    .fg(Color::Yellow)
                                    .add_modifier(Modifier::BOLD),
                            ),
                            Span::styled(
                                format!(" {} ", toilet.display_name()),
                                Style::default().fg(Color::Black).bg(Color::Yellow),
                            ),
                        ]),
                    );
                } else {
                    ctx.print(x, y, Line::from(Span::styled("•", toilet_style(toilet))));
                }
            }

            if let Some(estimate) = app.location {
                let coord = estimate.coordinate;
                ctx.print(
                    coord.lng,
                    coord.lat,
                    Line::from(Span::styled(
                        " ⌖ ",
                        Style::default()
                            .fg(source_color(estimate.source))
                            .add_modifier(Modifier::BOLD),
                    )),
                );
            }
        });

    f.render_widget(canvas, area);
}

fn render_toilet_list(f: &mut Frame, app: &App, area: Rect) {
    let origin = app.reference_point();
    let items: Vec<ListItem> = app
        .toilets
        .iter()
        .enumerate()
        .map(|(i, toilet)| {
            let style = if i == app.selected_index {
                Style::default()
                    .fg(Color::Cyan)
                    .bg(Color::Rgb(30, 30, 60))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            ListItem::new(Line::from(vec![
                Span::styled(format!(" {:<24}", truncate(toilet.display_name(), 24)), style),
                Span::styled(
                    format!(" │ {}", format_distance(origin.distance_to(&toilet.coordinate))),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let title = if app.loading {
        " Toilets · loading… ".to_string()
    } else {
        format!(" Toilets ({}) ", app.toilets.len())
    };

    let mut state = ListState::default().with_selected(Some(app.selected_index));
    let list = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    f.render_stateful_widget(list, area, &mut state);
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Details ")
        .borders(Borders::ALL)
        .padding(Padding::horizontal(1));

    let Some(toilet) = app.selected_toilet() else {
        f.render_widget(Paragraph::new("No toilet selected.").block(block), area);
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().add_modifier(Modifier::BOLD));
    let accessible = match toilet.accessible {
        None => "Accessibility unknown",
        Some(true) => "♿ Accessible",
        Some(false) => "Not accessible",
    };
    let cost = match toilet.is_free {
        None => "Cost unknown",
        Some(true) => "Free",
        Some(false) => "Paid",
    };

    let details = vec![
        Line::from(Span::styled(
            toilet.display_name(),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![label("Address: "), Span::raw(toilet.address.as_deref().unwrap_or("N/A"))]),
        Line::from(vec![label("City:    "), Span::raw(toilet.city.as_deref().unwrap_or("N/A"))]),
        Line::from(vec![label("Hours:   "), Span::raw(toilet.open_hours.as_deref().unwrap_or("N/A"))]),
        Line::from(format!(
            "{}  │  {}  │  {}",
            accessible,
            cost,
            toilet.kind.as_deref().unwrap_or("type unknown")
        )),
        Line::from(vec![
            label("Status:  "),
            Span::raw(toilet.status.as_deref().unwrap_or("N/A")),
            Span::styled(
                toilet.notes.as_deref().map(|n| format!("  {}", n)).unwrap_or_default(),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
    ];

    f.render_widget(Paragraph::new(details).wrap(Wrap { trim: true }).block(block), area);
}

fn render_route(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Save Me ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let lines: Vec<Line> = if app.route_pending {
        vec![Line::from("Calculating route...")]
    } else if let Some(route) = &app.route {
        let mut lines: Vec<Line> = route
            .stops
            .iter()
            .enumerate()
            .map(|(i, stop)| {
                Line::from(format!(
                    "{}. {} ({:.2} km)",
                    i + 1,
                    stop.toilet.display_name(),
                    stop.distance / 1000.0
                ))
            })
            .collect();
        lines.push(Line::from(Span::styled(
            route.url.as_str(),
            Style::default().fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
        )));
        lines
    } else if let Some(message) = &app.route_message {
        vec![Line::from(Span::styled(message.as_str(), Style::default().fg(Color::Red)))]
    } else {
        vec![Line::from(Span::styled(
            "Press s for walking directions to the nearest toilets.",
            Style::default().fg(Color::DarkGray),
        ))]
    };

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }).block(block), area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let bold = Style::default().add_modifier(Modifier::BOLD);

    let location = match app.location {
        Some(estimate) => vec![
            Span::styled("  LOCATION: ", bold),
            Span::styled(
                estimate.source.to_string(),
                Style::default().fg(source_color(estimate.source)),
            ),
            Span::raw(format!(" {}", estimate.coordinate)),
            Span::styled(
                app.location_updated
                    .map(|t| format!(" @ {}", t.format("%H:%M:%S")))
                    .unwrap_or_default(),
                Style::default().fg(Color::DarkGray),
            ),
        ],
        None => vec![
            Span::styled("  LOCATION: ", bold),
            Span::styled("locating…", Style::default().fg(Color::DarkGray)),
        ],
    };

    let mut first = location;
    first.extend([
        Span::raw("  │  "),
        Span::styled("SOURCE: ", bold),
        Span::raw(app.tier.map(tier_label).unwrap_or("-")),
        Span::raw("  │  "),
        Span::styled("FETCH: ", bold),
        if app.loading {
            Span::styled("LOADING", Style::default().fg(Color::Yellow))
        } else {
            Span::styled("IDLE", Style::default().fg(Color::Green))
        },
    ]);

    let message = if let Some(notice) = &app.notice {
        Span::styled(format!("  {}", notice.text), Style::default().fg(Color::Cyan))
    } else if let Some(error) = &app.fetch_error {
        Span::styled(format!("  {}", error), Style::default().fg(Color::Red))
    } else if let Some(warning) = &app.location_warning {
        Span::styled(format!("  {}", warning), Style::default().fg(Color::Yellow))
    } else {
        Span::styled(HELP, Style::default().fg(Color::DarkGray))
    };

    let status = Paragraph::new(vec![Line::from(first), Line::from(message)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(status, area);
}

fn render_search_popup(f: &mut Frame, app: &App) {
    let area = centered_rect(60, 50, f.size());
    f.render_widget(Clear, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let input = Paragraph::new(format!("{}▏", app.search_input)).block(
        Block::default().borders(Borders::ALL)
            .title(if app.searching { " Searching… " } else { " Search a place " })
            .border_type(BorderType::Rounded),
    );
    f.render_widget(input, chunks[0]);

    let items: Vec<ListItem> = app
        .search_results
        .iter()
        .map(|r| {
            let kind = r.kind.as_deref().unwrap_or("place");
            ListItem::new(Line::from(vec![
                Span::raw(format!(" {}", r.display_name)),
                Span::styled(format!("  ({})", kind), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let mut state = ListState::default().with_selected(
        (!app.search_results.is_empty()).then_some(app.search_selected),
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Enter search · ↑/↓ pick · Enter go · Esc close "))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Yellow));
    f.render_stateful_widget(list, chunks[1], &mut state);
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

fn source_color(source: Source) -> Color {
    match source {
        Source::Gps => Color::Green,
        Source::Ip => Color::Yellow,
        Source::Default => Color::Red,
    }
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Deterministic => "sampled",
        Tier::InView => "bbox",
        Tier::PrimaryTable => "table",
        Tier::LegacyTable => "legacy",
    }
}

/// Green for free and accessible, white otherwise.
fn toilet_style(toilet: &Toilet) -> Style {
    match (toilet.is_free, toilet.accessible) {
        (Some(true), Some(true)) => Style::default().fg(Color::Green),
        (Some(false), _) => Style::default().fg(Color::Magenta),
        _ => Style::default().fg(Color::White),
    }
}

fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
