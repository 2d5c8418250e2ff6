#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use std::{
    sync::{
        Arc,
        mpsc::{Receiver, TryRecvError},
    },
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use eframe::egui::epaint::Shadow;
use eframe::egui::{
    self, Color32, Frame, Grid, Margin, RichText, Rounding, ScrollArea, Stroke, Vec2b, style::Visuals,
};
use egui_plot::{Bar, BarChart, Legend, Plot, PlotBounds, PlotPoint};
use todoist_analytics::analytics::{Dashboard, compute_dashboard, intensity_level, weekday_label};
use todoist_analytics::cache::SnapshotCache;
use todoist_analytics::client::{ReqwestTransport, TodoistClient};
use todoist_analytics::model::Snapshot;
use todoist_analytics::refresh::{CycleFailure, RefreshCoordinator, RefreshEvent};
use todoist_analytics::report::{format_captured_at, format_elapsed, goal_progress};
use todoist_analytics::settings::{AppSettings, SettingsStore, default_data_dir};
use tracing::{info, warn};

type Coordinator = RefreshCoordinator<TodoistClient<ReqwestTransport>>;

const TOP_COLORS: [Color32; 3] = [
    Color32::from_rgb(74, 144, 226),
    Color32::from_rgb(80, 200, 120),
    Color32::from_rgb(255, 179, 71),
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DashboardTab {
    Overview,
    Activity,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DataOrigin {
    Cache,
    Live,
}

fn main() -> Result<()> {
    todoist_analytics::init_tracing();
    let data_dir = default_data_dir()?;
    let settings_store = SettingsStore::new(&data_dir);

    let mut status_notes = Vec::new();
    let mut settings = match settings_store.load() {
        Ok(settings) => settings,
        Err(err) => {
            let msg = format!("Failed to load saved settings. Using defaults. {err}");
            warn!("{msg}");
            status_notes.push(msg);
            AppSettings::default()
        }
    };
    settings.apply_env_overrides();
    settings.sanitize();

    let cache = Arc::new(SnapshotCache::new(settings.resolved_cache_path(&data_dir)));
    let coordinator = match build_coordinator(&settings, Arc::clone(&cache)) {
        Ok(pair) => Some(pair),
        Err(err) => {
            let msg = format!("Refresh disabled: {err}");
            warn!("{msg}");
            status_notes.push(msg);
            None
        }
    };

    let initial_status = if status_notes.is_empty() {
        None
    } else {
        Some(status_notes.join("\n"))
    };

    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Todoist Analytics",
        native_options,
        Box::new(move |_cc| {
            Box::new(AnalyticsApp::new(
                settings,
                settings_store,
                cache,
                coordinator,
                initial_status,
            ))
        }),
    )
    .map_err(|err| anyhow!("eframe error: {err}"))
}

fn build_coordinator(
    settings: &AppSettings,
    cache: Arc<SnapshotCache>,
) -> Result<(Coordinator, Receiver<RefreshEvent>)> {
    settings.validate()?;
    let client = TodoistClient::from_settings(settings)?;
    Ok(RefreshCoordinator::new(Arc::new(client), cache, &settings.project_id))
}

struct AnalyticsApp {
    settings: AppSettings,
    pending_settings: AppSettings,
    settings_store: SettingsStore,
    coordinator: Option<Coordinator>,
    events: Option<Receiver<RefreshEvent>>,
    snapshot: Option<Arc<Snapshot>>,
    dashboard: Option<Dashboard>,
    origin: DataOrigin,
    last_success: Option<Instant>,
    last_failure: Option<CycleFailure>,
    last_trigger: Instant,
    refresh_interval: Duration,
    status_message: Option<String>,
    status_since: Option<Instant>,
    selected_tab: DashboardTab,
    style_applied: bool,
}

impl AnalyticsApp {
    fn new(
        settings: AppSettings,
        settings_store: SettingsStore,
        cache: Arc<SnapshotCache>,
        coordinator: Option<(Coordinator, Receiver<RefreshEvent>)>,
        initial_status: Option<String>,
    ) -> Self {
        let refresh_interval = Duration::from_secs(settings.refresh_seconds);
        let (status_message, status_since) = match initial_status {
            Some(message) => (Some(message), Some(Instant::now())),
            None => (None, None),
        };
        let (coordinator, events) = match coordinator {
            Some((coordinator, events)) => (Some(coordinator), Some(events)),
            None => (None, None),
        };

        let mut app = Self {
            pending_settings: settings.clone(),
            settings,
            settings_store,
            coordinator,
            events,
            snapshot: None,
            dashboard: None,
            origin: DataOrigin::Cache,
            last_success: None,
            last_failure: None,
            last_trigger: Instant::now(),
            refresh_interval,
            status_message,
            status_since,
            selected_tab: DashboardTab::Overview,
            style_applied: false,
        };

        if let Some(snapshot) = cache.load() {
            info!("showing cached snapshot from {}", format_captured_at(snapshot.captured_at));
            app.show_snapshot(Arc::new(snapshot), DataOrigin::Cache);
        }
        app.trigger_refresh();
        app
    }

    fn show_snapshot(&mut self, snapshot: Arc<Snapshot>, origin: DataOrigin) {
        self.dashboard = Some(compute_dashboard(&snapshot, Utc::now(), self.settings.top_sections));
        self.snapshot = Some(snapshot);
        self.origin = origin;
    }

    fn recompute(&mut self) {
        if let Some(snapshot) = self.snapshot.clone() {
            self.show_snapshot(snapshot, self.origin);
        }
    }

    fn trigger_refresh(&mut self) {
        self.last_trigger = Instant::now();
        if let Some(coordinator) = &self.coordinator {
            coordinator.request_cycle();
        }
    }

    fn is_refreshing(&self) -> bool {
        self.coordinator
            .as_ref()
            .map(|coordinator| coordinator.is_running())
            .unwrap_or(false)
    }

    fn poll_refresh_events(&mut self) {
        loop {
            let event = match &self.events {
                Some(rx) => match rx.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) => return,
                    Err(TryRecvError::Disconnected) => {
                        self.events = None;
                        self.set_status("Refresh worker disconnected.");
                        return;
                    }
                },
                None => return,
            };

            match event {
                RefreshEvent::Succeeded(snapshot) => {
                    self.show_snapshot(snapshot, DataOrigin::Live);
                    self.last_success = Some(Instant::now());
                    self.last_failure = None;
                }
                RefreshEvent::Failed(failure) => {
                    self.set_status(failure.to_string());
                    self.last_failure = Some(failure);
                }
            }
        }
    }

    fn maybe_refresh(&mut self) {
        if self.last_trigger.elapsed() >= self.refresh_interval {
            self.trigger_refresh();
        }
    }

    fn apply_settings(&mut self) {
        let mut new_settings = self.pending_settings.clone();
        new_settings.sanitize();
        if new_settings == self.settings {
            self.set_status("Settings already applied.");
            return;
        }
        self.settings.monthly_goal = new_settings.monthly_goal;
        self.settings.refresh_seconds = new_settings.refresh_seconds;
        self.settings.top_sections = new_settings.top_sections;
        self.pending_settings = self.settings.clone();
        self.refresh_interval = Duration::from_secs(self.settings.refresh_seconds);
        self.recompute();

        // Persist only the display settings on top of the file, never env credentials.
        let save_result = self.settings_store.load().and_then(|mut stored| {
            stored.monthly_goal = self.settings.monthly_goal;
            stored.refresh_seconds = self.settings.refresh_seconds;
            stored.top_sections = self.settings.top_sections;
            self.settings_store.save(&stored)
        });
        match save_result {
            Ok(()) => self.set_status(format!(
                "Refreshing every {}s, monthly goal {}.",
                self.settings.refresh_seconds, self.settings.monthly_goal
            )),
            Err(err) => self.set_status(format!("Applied settings but failed to save them: {err}")),
        }
    }

    fn ensure_style(&mut self, ctx: &egui::Context) {
        if self.style_applied {
            return;
        }
        self.style_applied = true;

        let mut style = (*ctx.style()).clone();
        style.spacing.item_spacing = egui::vec2(12.0, 10.0);
        style.spacing.window_margin = Margin::symmetric(18.0, 14.0);
        style.spacing.button_padding = egui::vec2(10.0, 6.0);
        ctx.set_style(style);

        let mut visuals = Visuals::dark();
        visuals.window_rounding = Rounding::same(12.0);
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(26, 30, 39);
        visuals.widgets.inactive.bg_fill = Color32::from_rgb(36, 41, 52);
        visuals.widgets.hovered.bg_fill = Color32::from_rgb(46, 51, 64);
        visuals.window_shadow = Shadow::NONE;
        ctx.set_visuals(visuals);
    }

    fn render_tab_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            for (tab, label) in [
                (DashboardTab::Overview, "Overview"),
                (DashboardTab::Activity, "Activity"),
            ] {
                let is_active = self.selected_tab == tab;
                let button = egui::Button::new(label)
                    .min_size(egui::vec2(120.0, 32.0))
                    .fill(if is_active {
                        Color32::from_rgb(82, 96, 122)
                    } else {
                        Color32::from_rgb(36, 41, 52)
                    })
                    .rounding(Rounding::same(10.0));
                if ui.add(button).clicked() {
                    self.selected_tab = tab;
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let label = if self.is_refreshing() {
                    "Refreshing…"
                } else {
                    "Refresh now"
                };
                let enabled = self.coordinator.is_some() && !self.is_refreshing();
                if ui.add_enabled(enabled, egui::Button::new(label)).clicked() {
                    self.trigger_refresh();
                }
            });
        });
    }

    fn render_status_banner(&self, ui: &mut egui::Ui) {
        let (title, accent, detail) = match (&self.dashboard, &self.last_failure) {
            (_, Some(failure)) => (
                "Refresh failed",
                Color32::from_rgb(235, 110, 110),
                format!("{}. Showing the last good data.", failure),
            ),
            (Some(dashboard), None) => {
                let origin = match self.origin {
                    DataOrigin::Cache => "cached",
                    DataOrigin::Live => "live",
                };
                let age = self
                    .last_success
                    .map(|success| format!(" ({} ago)", format_elapsed(success.elapsed())))
                    .unwrap_or_default();
                (
                    "Up to date",
                    Color32::from_rgb(90, 200, 140),
                    format!(
                        "Updated {} from {origin} data{age}.",
                        format_captured_at(dashboard.captured_at)
                    ),
                )
            }
            (None, None) => (
                "Loading",
                Color32::from_rgb(130, 140, 170),
                String::from("Fetching tasks from Todoist…"),
            ),
        };

        Frame::group(ui.style())
            .fill(Color32::from_rgb(33, 38, 49))
            .stroke(Stroke::new(1.0, accent))
            .rounding(Rounding::same(12.0))
            .inner_margin(Margin::symmetric(16.0, 12.0))
            .show(ui, |ui| {
                ui.label(RichText::new(title).color(accent).size(18.0).strong());
                ui.add_space(4.0);
                ui.label(detail);
            });
    }

    fn render_overview_tab(&mut self, ui: &mut egui::Ui) {
        let Some(dashboard) = self.dashboard.clone() else {
            ui.label("No data yet.");
            return;
        };

        self.render_summary_cards(ui, &dashboard);
        ui.add_space(16.0);
        ui.columns(2, |columns| {
            columns[0].vertical(|ui| {
                render_section_chart(ui, &dashboard);
            });
            columns[1].vertical(|ui| {
                self.render_top_sections(ui, &dashboard);
                ui.add_space(12.0);
                render_name_list(ui, "Sections without active tasks", &dashboard.sections_without_active);
                render_name_list(
                    ui,
                    "Sections without completions this month",
                    &dashboard.sections_without_completions,
                );
            });
        });

        ui.add_space(16.0);
        ui.collapsing("Settings", |ui| {
            self.render_settings(ui);
        });
    }

    fn render_summary_cards(&self, ui: &mut egui::Ui, dashboard: &Dashboard) {
        let goal = self.settings.monthly_goal;
        let cards = [
            (
                "This month",
                format!("{} / {}", dashboard.monthly_total, goal),
                format!("{:.0}% of goal", goal_progress(dashboard.monthly_total, goal) * 100.0),
                Color32::from_rgb(86, 156, 214),
            ),
            (
                "This week",
                dashboard.weekday_counts.total().to_string(),
                String::from("Completed across all projects"),
                Color32::from_rgb(170, 120, 255),
            ),
            (
                "Active days",
                dashboard.calendar_counts.len().to_string(),
                format!("Best day: {} tasks", dashboard.calendar_max()),
                Color32::from_rgb(255, 170, 90),
            ),
        ];

        ui.horizontal_wrapped(|ui| {
            for (title, value, hint, accent) in cards.iter() {
                ui.scope(|ui| {
                    ui.set_min_width(170.0);
                    Frame::group(ui.style())
                        .fill(Color32::from_rgb(36, 41, 52))
                        .stroke(Stroke::new(1.0, *accent))
                        .rounding(Rounding::same(12.0))
                        .inner_margin(Margin::symmetric(14.0, 12.0))
                        .show(ui, |ui| {
                            ui.label(RichText::new(*title).color(*accent).strong());
                            ui.add_space(6.0);
                            ui.label(RichText::new(value.as_str()).size(22.0).strong());
                            ui.add_space(4.0);
                            ui.label(hint.as_str());
                        });
                });
            }
        });
    }

    fn render_top_sections(&self, ui: &mut egui::Ui, dashboard: &Dashboard) {
        ui.heading(format!("Top {} sections this month", self.settings.top_sections));
        if dashboard.top_sections.is_empty() {
            ui.label("Nothing completed yet this month.");
            return;
        }
        let goal = self.settings.monthly_goal;
        for (idx, (name, count)) in dashboard.top_sections.iter().enumerate() {
            ui.label(RichText::new(name.as_str()).strong());
            ui.add(
                egui::ProgressBar::new(goal_progress(*count, goal))
                    .text(format!("{count} / {goal} tasks"))
                    .fill(TOP_COLORS[idx % TOP_COLORS.len()]),
            );
            ui.add_space(6.0);
        }
    }

    fn render_activity_tab(&self, ui: &mut egui::Ui) {
        let Some(dashboard) = &self.dashboard else {
            ui.label("No data yet.");
            return;
        };
        ui.columns(2, |columns| {
            columns[0].vertical(|ui| {
                render_weekday_chart(ui, dashboard);
            });
            columns[1].vertical(|ui| {
                render_calendar(ui, dashboard);
            });
        });
    }

    fn render_settings(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.horizontal(|ui| {
                ui.label("Monthly goal (tasks)");
                ui.add(
                    egui::DragValue::new(&mut self.pending_settings.monthly_goal)
                        .clamp_range(1..=10_000)
                        .speed(1.0),
                );
            });
            ui.horizontal(|ui| {
                ui.label("Refresh interval (seconds)");
                ui.add(
                    egui::DragValue::new(&mut self.pending_settings.refresh_seconds)
                        .clamp_range(5..=3600)
                        .speed(1.0),
                );
            });
            ui.horizontal(|ui| {
                ui.label("Top sections shown");
                ui.add(
                    egui::DragValue::new(&mut self.pending_settings.top_sections)
                        .clamp_range(1..=10)
                        .speed(0.2),
                );
            });
            if ui.button("Apply settings").clicked() {
                self.apply_settings();
            }
            ui.label(format!("Project: {}", self.settings.project_id));
        });
    }

    fn set_status<S: Into<String>>(&mut self, message: S) {
        self.status_message = Some(message.into());
        self.status_since = Some(Instant::now());
    }

    fn maybe_clear_status(&mut self) {
        if let Some(since) = self.status_since {
            if since.elapsed() > Duration::from_secs(10) {
                self.status_message = None;
                self.status_since = None;
            }
        }
    }
}

fn render_name_list(ui: &mut egui::Ui, title: &str, names: &[String]) {
    ui.collapsing(format!("{title} ({})", names.len()), |ui| {
        if names.is_empty() {
            ui.label("None.");
            return;
        }
        for name in names {
            ui.label(format!("• {name}"));
        }
    });
}

fn render_section_chart(ui: &mut egui::Ui, dashboard: &Dashboard) {
    ui.heading("Completed this month by section");
    let entries = dashboard.monthly_counts.entries();
    if entries.is_empty() {
        ui.label("No completed tasks this month.");
        return;
    }
    let labels = entries.iter().map(|(name, _)| name.clone()).collect();
    let values = entries.iter().map(|(_, count)| *count as f64).collect();
    render_bar_chart(
        ui,
        "section_plot",
        labels,
        values,
        Color32::from_rgb(114, 181, 244),
        "Tasks",
    );
}

fn render_weekday_chart(ui: &mut egui::Ui, dashboard: &Dashboard) {
    ui.heading("This week");
    let labels = dashboard
        .weekday_counts
        .iter()
        .map(|(day, _)| weekday_label(day).to_string())
        .collect();
    let values = dashboard
        .weekday_counts
        .iter()
        .map(|(_, count)| count as f64)
        .collect();
    render_bar_chart(
        ui,
        "weekday_plot",
        labels,
        values,
        Color32::from_rgb(255, 196, 125),
        "Tasks per day",
    );
}

fn render_bar_chart(
    ui: &mut egui::Ui,
    id: &str,
    labels: Vec<String>,
    values: Vec<f64>,
    bar_color: Color32,
    series_name: &str,
) {
    let label_arc = Arc::new(labels);
    let axis_labels = Arc::clone(&label_arc);
    let tooltip_labels = Arc::clone(&label_arc);
    let max_value = values.iter().copied().fold(0.0, f64::max);
    let chart_bars: Vec<Bar> = values
        .iter()
        .enumerate()
        .map(|(idx, value)| Bar::new(idx as f64, *value).width(0.8))
        .collect();
    let series_name = series_name.to_string();

    Plot::new(id)
        .height(220.0)
        .allow_zoom(false)
        .allow_drag(false)
        .include_y(0.0)
        .legend(Legend::default())
        .x_axis_formatter(move |value, _range, _formatter| {
            let idx = value.value.round() as usize;
            axis_labels.get(idx).cloned().unwrap_or_default()
        })
        .label_formatter(move |series, value: &PlotPoint| {
            let idx = value.x.round() as usize;
            let label = tooltip_labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| String::from("?"));
            let count = value.y;
            if series.is_empty() {
                format!("{label}\n{count:.0}")
            } else {
                format!("{series}\n{label}\n{count:.0}")
            }
        })
        .show(ui, move |plot_ui| {
            let upper = if max_value <= 0.0 {
                1.0
            } else {
                (max_value * 1.1).ceil()
            };
            let count = chart_bars.len();
            let x_min = -0.5;
            let x_max = if count == 0 {
                0.5
            } else {
                (count as f64) - 0.5
            };
            let x_max = x_max.max(x_min + 1.0);
            plot_ui.set_auto_bounds(Vec2b::new(false, false));
            plot_ui.set_plot_bounds(PlotBounds::from_min_max([x_min, 0.0], [x_max, upper]));

            let chart = BarChart::new(chart_bars.clone())
                .color(bar_color)
                .name(series_name);
            plot_ui.bar_chart(chart);
        });
}

fn intensity_color(level: u8) -> Color32 {
    match level {
        0 => Color32::from_rgb(40, 45, 56),
        1 => Color32::from_rgb(14, 68, 41),
        2 => Color32::from_rgb(0, 109, 50),
        3 => Color32::from_rgb(38, 166, 65),
        _ => Color32::from_rgb(57, 211, 83),
    }
}

fn render_calendar(ui: &mut egui::Ui, dashboard: &Dashboard) {
    let today = Utc::now().date_naive();
    ui.heading(today.format("%B %Y").to_string());
    let Some(first) = NaiveDate::from_ymd_opt(today.year(), today.month(), 1) else {
        return;
    };
    let next_month = if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
    };
    let Some(last) = next_month.map(|next| next - ChronoDuration::days(1)) else {
        return;
    };
    let max = dashboard.calendar_max();
    let leading = first.weekday().num_days_from_monday() as usize;

    Grid::new("calendar_grid").spacing(egui::vec2(4.0, 4.0)).show(ui, |grid| {
        for (day, _) in dashboard.weekday_counts.iter() {
            grid.label(RichText::new(weekday_label(day)).small());
        }
        grid.end_row();

        for _ in 0..leading {
            grid.label("");
        }
        let mut column = leading;
        let mut day = first;
        while day <= last {
            let count = dashboard.calendar_counts.get(&day).copied().unwrap_or(0);
            let cell = egui::Button::new(RichText::new(day.day().to_string()).small())
                .fill(intensity_color(intensity_level(count, max)))
                .min_size(egui::vec2(30.0, 30.0));
            grid.add(cell)
                .on_hover_text(format!("{}: {count} completed", day.format("%Y-%m-%d")));
            column += 1;
            if column == 7 {
                grid.end_row();
                column = 0;
            }
            day += ChronoDuration::days(1);
        }
    });

    ui.horizontal(|ui| {
        ui.label(RichText::new("Less").small());
        for level in 0..=4 {
            let swatch = egui::Button::new("").fill(intensity_color(level)).min_size(egui::vec2(14.0, 14.0));
            ui.add_enabled(false, swatch);
        }
        ui.label(RichText::new("More").small());
    });
}

impl eframe::App for AnalyticsApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.maybe_clear_status();
        self.ensure_style(ctx);
        self.poll_refresh_events();
        self.maybe_refresh();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Todoist Analytics");
            ui.separator();
            self.render_tab_bar(ui);
            ui.add_space(8.0);
            self.render_status_banner(ui);
            ui.separator();
            ScrollArea::vertical()
                .auto_shrink([false, false])
                .show(ui, |ui| match self.selected_tab {
                    DashboardTab::Overview => self.render_overview_tab(ui),
                    DashboardTab::Activity => self.render_activity_tab(ui),
                });

            if let Some(message) = &self.status_message {
                ui.separator();
                ui.label(message);
            }
        });

        ctx.request_repaint_after(Duration::from_millis(500));
    }
}
