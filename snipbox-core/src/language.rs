//! Language strategy table
//!
//! Every language a caller can select maps to exactly one [`Strategy`].
//! Supporting a new language means adding a variant here, never adding
//! branches to the evaluators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ExecutionError;
use crate::protocol::ExecutionResult;

/// Language selection persisted by the calling UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    JavaScript,
    Html,
    TypeScript,
    Python,
    Other(String),
}

/// How a language is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Evaluated in the embedded JavaScript runtime.
    Native,
    /// Complete documents are returned untouched; script fragments that
    /// generate markup are evaluated natively.
    StaticPassthrough,
    Unsupported,
}

impl Language {
    pub fn strategy(&self) -> Strategy {
        match self {
            Language::JavaScript => Strategy::Native,
            Language::Html => Strategy::StaticPassthrough,
            Language::TypeScript | Language::Python | Language::Other(_) => Strategy::Unsupported,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Language::JavaScript => "javascript",
            Language::Html => "html",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Other(tag) => tag,
        }
    }
}

impl FromStr for Language {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Ok(match tag.as_str() {
            "javascript" | "js" | "native" | "node" => Language::JavaScript,
            "html" | "htm" | "markup" => Language::Html,
            "typescript" | "ts" => Language::TypeScript,
            "python" | "py" => Language::Python,
            _ => Language::Other(tag),
        })
    }
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(language) => language,
            Err(never) => match never {},
        }
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        Language::from(s.as_str())
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.as_str().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a call before anything crosses a boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Answer immediately without evaluating.
    Respond(ExecutionResult),
    /// Hand the snippet to an evaluator.
    Evaluate,
}

/// Shared pre-dispatch rules, applied identically by every evaluator.
pub fn plan(code: &str, language: &Language) -> Plan {
    let strategy = language.strategy();

    if strategy == Strategy::Unsupported {
        return Plan::Respond(ExecutionResult::failure(
            ExecutionError::UnsupportedLanguage(language.to_string()),
            None,
        ));
    }

    if code.trim().is_empty() {
        return Plan::Respond(ExecutionResult::empty());
    }

    if strategy == Strategy::StaticPassthrough && looks_like_document(code) {
        return Plan::Respond(ExecutionResult::passthrough(code));
    }

    Plan::Evaluate
}

/// True when the snippet is already a complete markup document.
pub fn looks_like_document(code: &str) -> bool {
    let head: String = code
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}
