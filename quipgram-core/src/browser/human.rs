use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::behavior::BehaviorProfile;
use super::error::BrowserError;

/// Hand-measured QWERTY neighbours for `a`..=`z`, indexed by letter offset.
const QWERTY_NEIGHBORS: [&str; 26] = [
    "qwsz",   // a
    "vghn",   // b
    "xdfv",   // c
    "serfcx", // d
    "wsdr",   // e
    "drtgvc", // f
    "ftyhbv", // g
    "gyujnb", // h
    "ujko",   // i
    "huikmn", // j
    "jiolm",  // k
    "kop",    // l
    "njk",    // m
    "bhjm",   // n
    "iklp",   // o
    "ol",     // p
    "wa",     // q
    "edft",   // r
    "awedxz", // s
    "rfgy",   // t
    "yhji",   // u
    "cfgb",   // v
    "qase",   // w
    "zsdc",   // x
    "tghu",   // y
    "asx",    // z
];

/// Neighbour keys for an ASCII letter (either case), `None` for anything else.
pub fn keyboard_neighbors(c: char) -> Option<&'static str> {
    if !c.is_ascii_alphabetic() {
        return None;
    }
    let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
    QWERTY_NEIGHBORS.get(index).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Parses `x,y`; both coordinates must be finite.
impl FromStr for Point {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid =
            || BrowserError::Configuration(format!("invalid point '{value}', expected x,y"));
        let (x, y) = value.split_once(',').ok_or_else(invalid)?;
        let parse = |raw: &str| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|coordinate| coordinate.is_finite())
                .ok_or_else(invalid)
        };
        Ok(Point::new(parse(x)?, parse(y)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        })
    }
}

impl FromStr for ScrollDirection {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            other => Err(BrowserError::Configuration(format!(
                "invalid scroll direction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Keystroke {
    Char(char),
    Backspace,
    Pause(Duration),
}

/// Timing and imperfection model for simulated input.
///
/// Holds no browser state; every method is a draw from the profile's
/// distributions, so a seeded generator makes the output reproducible.
#[derive(Debug, Clone)]
pub struct HumanBehaviorSimulator<R = ChaCha8Rng> {
    profile: BehaviorProfile,
    rng: R,
}

impl HumanBehaviorSimulator<ChaCha8Rng> {
    pub fn new(profile: BehaviorProfile) -> Self {
        Self::with_rng(profile, ChaCha8Rng::from_entropy())
    }

    pub fn seeded(profile: BehaviorProfile, seed: u64) -> Self {
        Self::with_rng(profile, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> HumanBehaviorSimulator<R> {
    pub fn with_rng(profile: BehaviorProfile, rng: R) -> Self {
        Self { profile, rng }
    }

    pub fn profile(&self) -> &BehaviorProfile {
        &self.profile
    }

    pub fn typing_delay(&mut self) -> Duration {
        let ms = self.rng.gen_range(self.profile.typing_delay_range());
        Duration::from_millis(ms)
    }

    pub fn action_delay(&mut self) -> Duration {
        let ms = self.rng.gen_range(self.profile.action_delay_range());
        Duration::from_millis(ms)
    }

    pub fn should_typo(&mut self) -> bool {
        self.rng.gen_bool(self.profile.typo_probability())
    }

    /// Picks a neighbouring key, preserving case. Non-letters come back unchanged.
    pub fn adjacent_key(&mut self, c: char) -> char {
        let Some(neighbors) = keyboard_neighbors(c) else {
            return c;
        };
        let bytes = neighbors.as_bytes();
        let picked = bytes[self.rng.gen_range(0..bytes.len())] as char;
        if c.is_ascii_uppercase() {
            picked.to_ascii_uppercase()
        } else {
            picked
        }
    }

    /// Signed scroll delta: positive scrolls down, negative scrolls up.
    pub fn scroll_amount(&mut self, direction: ScrollDirection, base: u32) -> i64 {
        let base = base as f64;
        let spread = base * self.profile.scroll_variance();
        let offset = if spread > 0.0 {
            self.rng.gen_range(-spread..=spread)
        } else {
            0.0
        };
        let lower = (base - spread).ceil().max(1.0);
        let upper = (base + spread).floor().max(lower);
        let magnitude = (base + offset).round().clamp(lower, upper) as i64;
        match direction {
            ScrollDirection::Down => magnitude,
            ScrollDirection::Up => -magnitude,
        }
    }

    /// Cursor trajectory from `start` to `end`.
    ///
    /// With curved cursor enabled this samples a cubic Bézier at `steps + 1`
    /// evenly spaced parameters, with both control points pushed off the
    /// straight line by up to `cursor_jitter_px`. Disabled, the path is just
    /// the two endpoints.
    pub fn bezier_path(&mut self, start: Point, end: Point, steps: usize) -> Vec<Point> {
        if !self.profile.curved_cursor() {
            return vec![start, end];
        }
        let steps = steps.max(1);
        let dx = end.x - start.x;
        let dy = end.y - start.y;
        let length = (dx * dx + dy * dy).sqrt();
        let normal = if length > f64::EPSILON {
            (-dy / length, dx / length)
        } else {
            (0.0, 1.0)
        };
        let jitter = self.profile.cursor_jitter_px();
        let first = self.control_point(start, (dx, dy), normal, 0.2, 0.4, jitter);
        let second = self.control_point(start, (dx, dy), normal, 0.6, 0.8, jitter);

        let mut path = Vec::with_capacity(steps + 1);
        for idx in 0..=steps {
            let t = idx as f64 / steps as f64;
            path.push(cubic_bezier(start, first, second, end, t));
        }
        path[0] = start;
        path[steps] = end;
        path
    }

    pub fn reading_delay(&mut self, text: &str) -> Duration {
        let words = text.split_whitespace().count();
        if words == 0 {
            return Duration::ZERO;
        }
        let wpm = self.rng.gen_range(200..=300) as f64;
        Duration::from_secs_f64(words as f64 / wpm * 60.0)
    }

    /// Uniform pause in `[min_ms, max_ms]`, used for the fixed settle windows
    /// around scrolling, uploads and pointer moves.
    pub fn pause_between(&mut self, min_ms: u64, max_ms: u64) -> Duration {
        let lower = min_ms.min(max_ms);
        let upper = min_ms.max(max_ms);
        Duration::from_millis(self.rng.gen_range(lower..=upper))
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    pub fn pick_count(&mut self, bounds: [u32; 2]) -> u32 {
        let lower = bounds[0].min(bounds[1]);
        let upper = bounds[0].max(bounds[1]);
        self.rng.gen_range(lower..=upper)
    }

    /// Expands `text` into the key events a person would produce, including
    /// corrected typos: wrong key, short pause, backspace, pause, right key.
    pub fn plan_keystrokes(&mut self, text: &str) -> Vec<Keystroke> {
        let mut plan = Vec::with_capacity(text.len() * 2);
        for (idx, ch) in text.chars().enumerate() {
            if idx > 0 {
                plan.push(Keystroke::Pause(self.typing_delay()));
            }
            if self.should_typo() {
                let wrong = self.adjacent_key(ch);
                plan.push(Keystroke::Char(wrong));
                plan.push(Keystroke::Pause(self.pause_between(100, 300)));
                plan.push(Keystroke::Backspace);
                plan.push(Keystroke::Pause(self.pause_between(200, 500)));
            }
            plan.push(Keystroke::Char(ch));
        }
        plan
    }

    fn control_point(
        &mut self,
        start: Point,
        travel: (f64, f64),
        normal: (f64, f64),
        t_min: f64,
        t_max: f64,
        jitter: f64,
    ) -> Point {
        let t = self.rng.gen_range(t_min..=t_max);
        let offset = self.random_offset(jitter);
        Point::new(
            start.x + travel.0 * t + normal.0 * offset,
            start.y + travel.1 * t + normal.1 * offset,
        )
    }

    fn random_offset(&mut self, max: f64) -> f64 {
        if max <= 0.0 {
            return 0.0;
        }
        let distribution = Uniform::new_inclusive(-max, max);
        self.rng.sample(distribution)
    }
}

fn cubic_bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let a = u * u * u;
    let b = 3.0 * u * u * t;
    let c = 3.0 * u * t * t;
    let d = t * t * t;
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}
