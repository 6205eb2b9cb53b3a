//! Classification of raw dataset names into a metric label and category.
//!
//! Axiell installations name their databases with a category prefix, e.g.
//! `transfer_natural_history`, `newcollect` or `totalobjects`. The prefix
//! becomes the `collection_type` label and the remainder the `dataset_name`.

use std::fmt;

/// Coarse category of a dataset, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Transfer,
    New,
    Total,
    Unknown,
}

/// Prefixes in match priority order. The first match wins.
const PREFIXES: [(&str, Category); 3] = [
    ("transfer", Category::Transfer),
    ("new", Category::New),
    ("total", Category::Total),
];

impl Category {
    /// Label value used in the exposition output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Transfer => "transfer",
            Category::New => "new",
            Category::Total => "total",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw dataset name.
///
/// Matching is a case-sensitive prefix test against `transfer`, `new` and
/// `total`, in that order. The returned label is the name with the matched
/// prefix removed, trimmed of whitespace and of a leading `_` or `-`
/// separator. Names without a known prefix keep their full (trimmed) text
/// and map to [`Category::Unknown`].
///
/// This never fails: every input yields exactly one `(label, category)`.
pub fn classify(raw_name: &str) -> (String, Category) {
    for (prefix, category) in PREFIXES {
        if let Some(rest) = raw_name.strip_prefix(prefix) {
            let label = rest.trim().trim_start_matches(['_', '-']).trim();
            return (label.to_string(), category);
        }
    }

    (raw_name.trim().to_string(), Category::Unknown)
}

/// Classifier applied by the collection pipeline.
///
/// A disabled classifier reports every dataset as [`Category::Unknown`]
/// under its trimmed raw name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    enabled: bool,
}

impl Classifier {
    /// Create a classifier that applies the prefix rules.
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Create a classifier that skips the prefix rules.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Build from the `classifier.enabled` configuration flag.
    pub fn from_enabled(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classify a raw dataset name according to this classifier's mode.
    pub fn classify(&self, raw_name: &str) -> (String, Category) {
        if self.enabled {
            classify(raw_name)
        } else {
            (raw_name.trim().to_string(), Category::Unknown)
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}
