// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recognise "visit URL, enter code" prompts in device-login CLI output.
//!
//! Matching is purely textual. If a wrapped CLI rewords its prompt the flow
//! times out instead of completing, and the session fails with `Timeout`.

use regex::Regex;

const URL_PATTERN: &str = r#"https?://[^\s"'<>]+"#;

/// A user code follows "enter (the) code" and is upper-case alphanumeric,
/// optionally dash-separated (`ABC-123`, `ABCD12345`).
const CODE_PATTERN: &str =
    r"(?i:enter\s+(?:the\s+)?code)\s*:?\s+([A-Z0-9]{3,}(?:-[A-Z0-9]{3,})*)\b";

/// ANSI CSI escape sequences.
const ANSI_PATTERN: &str = r"\x1b\[[0-9;?]*[A-Za-z]";

/// Compiled prompt patterns.
pub struct PromptPatterns {
    url: Regex,
    code: Regex,
    ansi: Regex,
}

impl std::fmt::Debug for PromptPatterns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptPatterns")
            .field("url", &self.url.as_str())
            .field("code", &self.code.as_str())
            .finish()
    }
}

impl PromptPatterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            url: Regex::new(URL_PATTERN)?,
            code: Regex::new(CODE_PATTERN)?,
            ansi: Regex::new(ANSI_PATTERN)?,
        })
    }

    fn find_url(&self, text: &str) -> Option<String> {
        let m = self.url.find(text)?;
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', ')', ']', '!', '?']);
        (!url.is_empty()).then(|| url.to_owned())
    }

    fn find_code(&self, text: &str) -> Option<String> {
        self.code.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_owned())
    }

    fn strip_ansi(&self, text: &str) -> String {
        self.ansi.replace_all(text, "").into_owned()
    }
}

/// A recognised device-login prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePrompt {
    pub url: String,
    pub user_code: String,
}

/// Accumulates output lines until both a URL and a code have been seen.
///
/// The two halves may arrive on different lines and in either order.
#[derive(Debug)]
pub struct PromptScanner<'p> {
    patterns: &'p PromptPatterns,
    url: Option<String>,
    code: Option<String>,
}

impl<'p> PromptScanner<'p> {
    pub fn new(patterns: &'p PromptPatterns) -> Self {
        Self { patterns, url: None, code: None }
    }

    /// URL seen so far, if any.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Feed one line of output. Returns the prompt once both parts are known.
    pub fn feed(&mut self, line: &str) -> Option<DevicePrompt> {
        let clean = self.patterns.strip_ansi(line);
        if self.url.is_none() {
            self.url = self.patterns.find_url(&clean);
        }
        if self.code.is_none() {
            self.code = self.patterns.find_code(&clean);
        }
        match (&self.url, &self.code) {
            (Some(url), Some(code)) => {
                Some(DevicePrompt { url: url.clone(), user_code: code.clone() })
            }
            _ => None,
        }
    }
}

/// Scan a single chunk of text for a complete prompt.
pub fn parse_prompt(patterns: &PromptPatterns, text: &str) -> Option<DevicePrompt> {
    let mut scanner = PromptScanner::new(patterns);
    text.lines().find_map(|line| scanner.feed(line))
}

#[cfg(test)]
#[path = "device_parse_tests.rs"]
mod tests;
