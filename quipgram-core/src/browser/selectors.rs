use std::fmt;

/// Ordered alternatives for one UI control. Callers try them in order and
/// stop at the first that works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorChain {
    control: String,
    selectors: Vec<String>,
}

impl SelectorChain {
    pub fn new<I, S>(control: impl Into<String>, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            control: control.into(),
            selectors: selectors
                .into_iter()
                .map(Into::into)
                .map(|selector: String| selector.trim().to_string())
                .filter(|selector| !selector.is_empty())
                .collect(),
        }
    }

    pub fn control(&self) -> &str {
        &self.control
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.selectors.iter().map(String::as_str)
    }
}

impl fmt::Display for SelectorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.control, self.selectors.join(" | "))
    }
}
