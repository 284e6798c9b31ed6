use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::behavior::BehaviorProfile;
use super::driver::{BrowserDriver, DriverLauncher};
use super::error::{BrowserError, BrowserResult};
use super::human::{HumanBehaviorSimulator, Keystroke, Point, ScrollDirection};
use super::metrics::SessionMetrics;
use super::selectors::SelectorChain;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screenshot {
    Saved(PathBuf),
    /// Base64-encoded PNG.
    Encoded(String),
}

/// A live browser with human pacing applied to every interactive primitive.
///
/// Commands are strictly sequential (`&mut self`), and every wait is raced
/// against the session's cancellation token so long sequences such as typing
/// a caption stop promptly. The session never retries on its own.
pub struct BrowserSession {
    driver: Box<dyn BrowserDriver>,
    simulator: HumanBehaviorSimulator,
    pointer: Point,
    cancel: CancellationToken,
    metrics: SessionMetrics,
    closed: bool,
}

impl BrowserSession {
    pub async fn initialize(
        launcher: &dyn DriverLauncher,
        profile: BehaviorProfile,
        headless: bool,
        cancel: CancellationToken,
    ) -> BrowserResult<Self> {
        Self::launch_with(
            launcher,
            HumanBehaviorSimulator::new(profile),
            headless,
            cancel,
        )
        .await
    }

    pub async fn launch_with(
        launcher: &dyn DriverLauncher,
        simulator: HumanBehaviorSimulator,
        headless: bool,
        cancel: CancellationToken,
    ) -> BrowserResult<Self> {
        let driver = launcher.launch(headless).await.map_err(|err| match err {
            BrowserError::Launch(_) => err,
            other => BrowserError::Launch(other.to_string()),
        })?;
        info!(headless, "browser session initialized");
        Ok(Self::from_driver(driver, simulator, cancel))
    }

    pub fn from_driver(
        driver: Box<dyn BrowserDriver>,
        simulator: HumanBehaviorSimulator,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            simulator,
            pointer: Point::ORIGIN,
            cancel,
            metrics: SessionMetrics::default(),
            closed: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.closed
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn pointer(&self) -> Point {
        self.pointer
    }

    pub fn profile(&self) -> &BehaviorProfile {
        self.simulator.profile()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.ready()?;
        debug!(url, "navigating");
        self.driver.navigate(url).await?;
        self.metrics.record_navigation();
        self.action_pause().await
    }

    pub async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.ready()?;
        if self.simulator.profile().curved_cursor() {
            let target = self.driver.element_center(selector).await?;
            let steps = self.simulator.profile().cursor_steps();
            let path = self.simulator.bezier_path(self.pointer, target, steps);
            for point in path.iter().skip(1) {
                self.check_cancelled()?;
                self.driver.move_pointer(*point).await?;
                let gap = self.simulator.pause_between(10, 50);
                self.pause(gap).await?;
            }
            self.metrics
                .record_pointer_moves(path.len().saturating_sub(1) as u64);
            self.pointer = target;
        }
        debug!(selector, "clicking");
        self.driver.click(selector).await?;
        self.metrics.record_click();
        self.action_pause().await
    }

    /// Focuses `selector` with a click, then types `text` key by key.
    pub async fn type_text(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        self.click(selector).await?;
        let plan = self.simulator.plan_keystrokes(text);
        debug!(selector, chars = text.chars().count(), "typing");
        for key in plan {
            self.check_cancelled()?;
            match key {
                Keystroke::Char(ch) => {
                    self.driver.key_char(selector, ch).await?;
                    self.metrics.record_keystroke();
                }
                Keystroke::Backspace => {
                    self.driver.key_backspace(selector).await?;
                    self.metrics.record_typo();
                }
                Keystroke::Pause(duration) => self.pause(duration).await?,
            }
        }
        Ok(())
    }

    /// Scrolls by a randomised amount and returns the signed delta issued.
    pub async fn scroll(&mut self, direction: ScrollDirection, base: u32) -> BrowserResult<i64> {
        self.ready()?;
        let delta = self.simulator.scroll_amount(direction, base);
        debug!(%direction, delta, "scrolling");
        self.driver.scroll_by(delta).await?;
        self.metrics.record_scroll();
        let settle = self.simulator.pause_between(500, 1500);
        self.pause(settle).await?;
        Ok(delta)
    }

    pub async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        self.ready()?;
        let started = Instant::now();
        loop {
            self.check_cancelled()?;
            if self.driver.element_exists(selector).await? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                self.metrics.record_element_timeout();
                return Err(BrowserError::ElementNotFound {
                    selector: selector.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            self.pause(ELEMENT_POLL_INTERVAL.min(timeout - elapsed))
                .await?;
        }
    }

    /// Single presence probe, no waiting.
    pub async fn is_present(&mut self, selector: &str) -> BrowserResult<bool> {
        self.ready()?;
        self.driver.element_exists(selector).await
    }

    pub async fn get_text(&mut self, selector: &str) -> BrowserResult<Option<String>> {
        self.ready()?;
        self.driver.text(selector).await
    }

    pub async fn get_all_text(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        self.ready()?;
        self.driver.all_text(selector).await
    }

    pub async fn screenshot(&mut self, path: Option<&Path>) -> BrowserResult<Screenshot> {
        self.ready()?;
        let bytes = self.driver.screenshot().await?;
        self.metrics.record_screenshot();
        match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                tokio::fs::write(path, &bytes).await?;
                debug!(path = %path.display(), bytes = bytes.len(), "screenshot saved");
                Ok(Screenshot::Saved(path.to_path_buf()))
            }
            None => Ok(Screenshot::Encoded(STANDARD.encode(&bytes))),
        }
    }

    pub async fn upload_file(&mut self, selector: &str, path: &Path) -> BrowserResult<()> {
        self.ready()?;
        tokio::fs::metadata(path).await?;
        debug!(selector, path = %path.display(), "uploading file");
        self.driver.set_file_input(selector, path).await?;
        self.metrics.record_upload();
        let settle = self.simulator.pause_between(1000, 2000);
        self.pause(settle).await
    }

    pub async fn evaluate(&mut self, script: &str) -> BrowserResult<Value> {
        self.ready()?;
        self.driver.evaluate(script).await
    }

    /// Lingers as long as a person would need to read `text`.
    pub async fn read(&mut self, text: &str) -> BrowserResult<()> {
        self.ready()?;
        let delay = self.simulator.reading_delay(text);
        self.pause(delay).await
    }

    pub async fn idle(&mut self) -> BrowserResult<()> {
        self.ready()?;
        self.action_pause().await
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.simulator.chance(probability)
    }

    pub fn pick_count(&mut self, bounds: [u32; 2]) -> u32 {
        self.simulator.pick_count(bounds)
    }

    /// First selector in `chain` that appears within `per_selector`.
    pub async fn wait_for_any(
        &mut self,
        chain: &SelectorChain,
        per_selector: Duration,
    ) -> BrowserResult<String> {
        for selector in chain.iter() {
            match self.wait_for_element(selector, per_selector).await {
                Ok(()) => return Ok(selector.to_string()),
                Err(err) if err.is_retryable() => {
                    debug!(control = chain.control(), selector, "selector fallback");
                }
                Err(err) => return Err(err),
            }
        }
        Err(all_failed(chain))
    }

    /// Clicks the first selector in `chain` that appears within `per_selector`.
    pub async fn click_first(
        &mut self,
        chain: &SelectorChain,
        per_selector: Duration,
    ) -> BrowserResult<String> {
        let selector = self.wait_for_any(chain, per_selector).await?;
        self.click(&selector).await?;
        Ok(selector)
    }

    pub async fn type_first(
        &mut self,
        chain: &SelectorChain,
        text: &str,
        per_selector: Duration,
    ) -> BrowserResult<String> {
        let selector = self.wait_for_any(chain, per_selector).await?;
        self.type_text(&selector, text).await?;
        Ok(selector)
    }

    /// Clicks an optional control (cookie banner, "save login" prompt) if one
    /// is on screen. Absence is not an error.
    pub async fn dismiss_optional(&mut self, chain: &SelectorChain) -> BrowserResult<bool> {
        for selector in chain.iter() {
            if self.is_present(selector).await? {
                self.click(selector).await?;
                debug!(control = chain.control(), selector, "optional dialog dismissed");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Safe to call repeatedly; only the first call reaches the driver.
    pub async fn close(&mut self) -> BrowserResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!(
            clicks = self.metrics.clicks,
            keystrokes = self.metrics.keystrokes,
            "closing browser session"
        );
        self.driver.close().await
    }

    fn ready(&self) -> BrowserResult<()> {
        if self.closed {
            return Err(BrowserError::SessionClosed);
        }
        self.check_cancelled()
    }

    fn check_cancelled(&self) -> BrowserResult<()> {
        if self.cancel.is_cancelled() {
            Err(BrowserError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn action_pause(&mut self) -> BrowserResult<()> {
        let delay = self.simulator.action_delay();
        self.pause(delay).await
    }

    async fn pause(&mut self, duration: Duration) -> BrowserResult<()> {
        cancellable_sleep(&self.cancel, duration).await
    }
}

async fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> BrowserResult<()> {
    if cancel.is_cancelled() {
        return Err(BrowserError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(BrowserError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("BrowserSession dropped without explicit close");
        }
    }
}

fn all_failed(chain: &SelectorChain) -> BrowserError {
    BrowserError::AllSelectorsFailed {
        control: chain.control().to_string(),
        tried: chain.selectors().to_vec(),
    }
}
