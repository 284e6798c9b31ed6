use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BrowserResult;
use super::human::Point;

/// Raw command channel to a remote browser.
///
/// Implementations issue exactly one command per call and never sleep,
/// retry or randomise; pacing belongs to [`super::BrowserSession`].
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Centre of the first element matching `selector`, scrolled into view.
    async fn element_center(&mut self, selector: &str) -> BrowserResult<Point>;

    async fn move_pointer(&mut self, point: Point) -> BrowserResult<()>;

    async fn click(&mut self, selector: &str) -> BrowserResult<()>;

    async fn key_char(&mut self, selector: &str, ch: char) -> BrowserResult<()>;

    async fn key_backspace(&mut self, selector: &str) -> BrowserResult<()>;

    async fn scroll_by(&mut self, delta_y: i64) -> BrowserResult<()>;

    async fn element_exists(&mut self, selector: &str) -> BrowserResult<bool>;

    async fn text(&mut self, selector: &str) -> BrowserResult<Option<String>>;

    async fn all_text(&mut self, selector: &str) -> BrowserResult<Vec<String>>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;

    async fn set_file_input(&mut self, selector: &str, path: &Path) -> BrowserResult<()>;

    async fn evaluate(&mut self, script: &str) -> BrowserResult<Value>;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Opens a fresh control channel. Failures here are fatal for the session.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self, headless: bool) -> BrowserResult<Box<dyn BrowserDriver>>;
}
