use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::behavior::BehaviorProfile;
use super::driver::DriverLauncher;
use super::error::{BrowserError, BrowserResult};
use super::human::HumanBehaviorSimulator;
use super::session::BrowserSession;

/// Owns at most one live [`BrowserSession`] and hands it out on demand.
///
/// The headless flag is bound at construction, so [`get_or_create`] and
/// [`reset`] always launch in the same mode for the manager's lifetime.
///
/// [`get_or_create`]: BrowserSessionManager::get_or_create
/// [`reset`]: BrowserSessionManager::reset
pub struct BrowserSessionManager {
    launcher: Arc<dyn DriverLauncher>,
    profile: BehaviorProfile,
    headless: bool,
    cancel: CancellationToken,
    seed: Option<u64>,
    session: Option<BrowserSession>,
    launches: u32,
}

impl BrowserSessionManager {
    pub fn new(
        launcher: Arc<dyn DriverLauncher>,
        profile: BehaviorProfile,
        headless: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            launcher,
            profile,
            headless,
            cancel,
            seed: None,
            session: None,
            launches: 0,
        }
    }

    /// Makes every session this manager creates replay the same randomness.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn has_session(&self) -> bool {
        self.session.as_ref().is_some_and(BrowserSession::is_live)
    }

    /// Number of sessions launched over the manager's lifetime.
    pub fn launches(&self) -> u32 {
        self.launches
    }

    pub async fn get_or_create(&mut self) -> BrowserResult<&mut BrowserSession> {
        if !self.has_session() {
            let simulator = match self.seed {
                Some(seed) => HumanBehaviorSimulator::seeded(self.profile.clone(), seed),
                None => HumanBehaviorSimulator::new(self.profile.clone()),
            };
            let session = BrowserSession::launch_with(
                self.launcher.as_ref(),
                simulator,
                self.headless,
                self.cancel.child_token(),
            )
            .await?;
            self.launches = self.launches.saturating_add(1);
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| BrowserError::Unexpected("session vanished after launch".into()))
    }

    /// Replaces the current session with a fresh one. A failed close of the
    /// old session is logged and does not block the relaunch.
    pub async fn reset(&mut self) -> BrowserResult<&mut BrowserSession> {
        info!("resetting browser session");
        if let Err(err) = self.dispose().await {
            warn!(error = %err, "discarding broken session before relaunch");
        }
        self.get_or_create().await
    }

    /// Closes the current session, if any. Calling this with nothing open is
    /// a no-op.
    pub async fn dispose(&mut self) -> BrowserResult<()> {
        match self.session.take() {
            Some(mut session) => {
                let result = session.close().await;
                if let Err(err) = &result {
                    warn!(error = %err, "browser session close reported an error");
                }
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for BrowserSessionManager {
    fn drop(&mut self) {
        if self.has_session() {
            warn!("BrowserSessionManager dropped while a session is still open");
        }
    }
}
