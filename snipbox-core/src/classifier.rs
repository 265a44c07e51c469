//! Output classification (markup promotion)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::protocol::ExecutionResult;

/// An opening angle bracket immediately followed by a letter, closed later on.
static TAG_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z][^>]*>").expect("tag pattern is valid"));

/// Output-mode preference persisted by the calling UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Console,
    Markup,
}

/// What the classifier decided about one result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    /// The caller should switch its output mode to markup downstream.
    pub adopt_markup: bool,
}

/// Promote tag-like textual output to `markup_output`.
///
/// Only successful results are considered, and only when the caller is not
/// already rendering markup. Never re-executes anything.
pub fn classify(result: &mut ExecutionResult, mode: OutputMode) -> Classification {
    if !result.success || mode == OutputMode::Markup {
        return Classification::default();
    }

    match result.output.as_deref() {
        Some(text) if looks_like_markup(text) => {
            result.markup_output = Some(text.to_string());
            Classification { adopt_markup: true }
        }
        _ => Classification::default(),
    }
}

pub fn looks_like_markup(text: &str) -> bool {
    TAG_LIKE.is_match(text)
}
