use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::layout::Point as CdpPoint;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::driver::{BrowserDriver, DriverLauncher};
use super::error::{BrowserError, BrowserResult};
use super::human::Point;
use super::profile::{BrowserProfile, ProfileStore};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Launches Chromium against a persistent profile directory.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<ChromiumSection>,
    profiles: ProfileStore,
}

impl ChromiumLauncher {
    pub fn new(config: ChromiumSection, profiles: ProfileStore) -> Self {
        Self {
            config: Arc::new(config),
            profiles,
        }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
    }

    fn build_chromium_config(
        &self,
        profile: &BrowserProfile,
        user_agent: &str,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window_size;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            });

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={width},{height}"),
            "--no-first-run".to_string(),
            "--disable-features=AutomationControlled".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl DriverLauncher for ChromiumLauncher {
    async fn launch(&self, headless: bool) -> BrowserResult<Box<dyn BrowserDriver>> {
        let profile = self.profiles.open(&self.config.profile_name)?;
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&profile, &user_agent, headless)?;
        info!(
            profile = profile.name(),
            ua = %user_agent,
            headless,
            "launching chromium"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        page.enable_stealth_mode_with_agent(&user_agent)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        profile.touch().await?;

        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            profile,
            handler_task: Some(handler_task),
        }))
    }
}

#[derive(Debug)]
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    profile: BrowserProfile,
    handler_task: Option<JoinHandle<()>>,
}

/// Chromium resolves file inputs from its own working directory, so uploads
/// are always handed over as absolute paths.
async fn upload_path(path: &Path) -> BrowserResult<PathBuf> {
    Ok(tokio::fs::canonicalize(path).await?)
}

async fn find(page: &Page, selector: &str) -> BrowserResult<Element> {
    page.find_element(selector)
        .await
        .map_err(|err| BrowserError::interaction(selector, err))
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn element_center(&mut self, selector: &str) -> BrowserResult<Point> {
        let element = find(&self.page, selector).await?;
        element
            .scroll_into_view()
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        let bbox = element
            .bounding_box()
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(Point::new(
            bbox.x + bbox.width / 2.0,
            bbox.y + bbox.height / 2.0,
        ))
    }

    async fn move_pointer(&mut self, point: Point) -> BrowserResult<()> {
        self.page
            .move_mouse(CdpPoint {
                x: point.x,
                y: point.y,
            })
            .await
            .map_err(BrowserError::page)?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        find(&self.page, selector)
            .await?
            .click()
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(())
    }

    async fn key_char(&mut self, selector: &str, ch: char) -> BrowserResult<()> {
        find(&self.page, selector)
            .await?
            .type_str(ch.to_string())
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(())
    }

    async fn key_backspace(&mut self, selector: &str) -> BrowserResult<()> {
        find(&self.page, selector)
            .await?
            .press_key("Backspace")
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(())
    }

    async fn scroll_by(&mut self, delta_y: i64) -> BrowserResult<()> {
        let script = format!("window.scrollBy({{ top: {delta_y}, behavior: 'smooth' }});");
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|err| BrowserError::page(format!("scroll script failed: {err}")))?;
        Ok(())
    }

    async fn element_exists(&mut self, selector: &str) -> BrowserResult<bool> {
        let found = self
            .page
            .find_elements(selector)
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(!found.is_empty())
    }

    async fn text(&mut self, selector: &str) -> BrowserResult<Option<String>> {
        match self.page.find_element(selector).await {
            Ok(element) => element
                .inner_text()
                .await
                .map_err(|err| BrowserError::interaction(selector, err)),
            Err(_) => Ok(None),
        }
    }

    async fn all_text(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(text) = element
                .inner_text()
                .await
                .map_err(|err| BrowserError::interaction(selector, err))?
            {
                texts.push(text);
            }
        }
        Ok(texts)
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let bytes = self
            .page
            .screenshot(ScreenshotParams::builder().build())
            .await?;
        Ok(bytes)
    }

    async fn set_file_input(&mut self, selector: &str, path: &Path) -> BrowserResult<()> {
        let element = find(&self.page, selector).await?;
        let absolute = upload_path(path).await?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![absolute.to_string_lossy().into_owned()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page
            .execute(params)
            .await
            .map_err(|err| BrowserError::interaction(selector, err))?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> BrowserResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::page(format!("script failed: {err}")))?;
        result
            .into_value::<Value>()
            .map_err(|err| BrowserError::page(format!("script result not json: {err}")))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        info!(profile = self.profile.name(), "shutting down chromium");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!(
                    profile = self.profile.name(),
                    "ChromiumDriver dropped without explicit close"
                );
                handle.abort();
            }
        }
    }
}
