//! In-memory state for the interactive view: the most recent metrics
//! snapshot, which feed row is selected, and the last poll's outcome.

use crate::metrics::{FeedMetrics, MetricsResponse};

pub struct App {
    pub feeds: Vec<FeedMetrics>,
    pub selected: usize,
    pub last_error: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new() -> Self {
        Self { feeds: Vec::new(), selected: 0, last_error: None, should_quit: false }
    }

    pub fn apply_snapshot(&mut self, snapshot: MetricsResponse) {
        self.feeds = snapshot.feeds;
        self.last_error = None;
        if self.selected >= self.feeds.len() {
            self.selected = self.feeds.len().saturating_sub(1);
        }
    }

    pub fn apply_error(&mut self, error: impl std::fmt::Display) {
        self.last_error = Some(error.to_string());
    }

    pub fn select_next(&mut self) {
        if !self.feeds.is_empty() {
            self.selected = (self.selected + 1) % self.feeds.len();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.feeds.is_empty() {
            self.selected = (self.selected + self.feeds.len() - 1) % self.feeds.len();
        }
    }

    pub fn selected_feed(&self) -> Option<&FeedMetrics> {
        self.feeds.get(self.selected)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
