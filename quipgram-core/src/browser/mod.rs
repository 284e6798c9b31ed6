mod automation;
mod behavior;
mod driver;
mod error;
mod human;
mod manager;
mod metrics;
mod profile;
mod selectors;
mod session;

pub use automation::{ChromiumDriver, ChromiumLauncher};
pub use behavior::{BehaviorError, BehaviorProfile};
pub use driver::{BrowserDriver, DriverLauncher};
pub use error::{BrowserError, BrowserResult};
pub use human::{keyboard_neighbors, HumanBehaviorSimulator, Keystroke, Point, ScrollDirection};
pub use manager::BrowserSessionManager;
pub use metrics::SessionMetrics;
pub use profile::{BrowserProfile, ProfileStore};
pub use selectors::SelectorChain;
pub use session::{BrowserSession, Screenshot};
