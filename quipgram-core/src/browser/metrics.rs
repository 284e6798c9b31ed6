use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub navigations: u64,
    pub clicks: u64,
    pub pointer_moves: u64,
    pub keystrokes: u64,
    pub typos_corrected: u64,
    pub scrolls: u64,
    pub uploads: u64,
    pub screenshots: u64,
    pub element_timeouts: u64,
}

impl SessionMetrics {
    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_click(&mut self) {
        self.clicks = self.clicks.saturating_add(1);
    }

    pub fn record_pointer_moves(&mut self, count: u64) {
        self.pointer_moves = self.pointer_moves.saturating_add(count);
    }

    pub fn record_keystroke(&mut self) {
        self.keystrokes = self.keystrokes.saturating_add(1);
    }

    pub fn record_typo(&mut self) {
        self.typos_corrected = self.typos_corrected.saturating_add(1);
    }

    pub fn record_scroll(&mut self) {
        self.scrolls = self.scrolls.saturating_add(1);
    }

    pub fn record_upload(&mut self) {
        self.uploads = self.uploads.saturating_add(1);
    }

    pub fn record_screenshot(&mut self) {
        self.screenshots = self.screenshots.saturating_add(1);
    }

    pub fn record_element_timeout(&mut self) {
        self.element_timeouts = self.element_timeouts.saturating_add(1);
    }

    pub fn typo_rate(&self) -> f64 {
        if self.keystrokes == 0 {
            0.0
        } else {
            self.typos_corrected as f64 / self.keystrokes as f64
        }
    }
}
