// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn patterns() -> PromptPatterns {
    PromptPatterns::compile().expect("prompt patterns compile")
}

#[test]
fn builtin_patterns_compile() -> anyhow::Result<()> {
    let patterns = PromptPatterns::compile()?;
    assert_eq!(patterns.strip_ansi("\x1b[1;32mready\x1b[0m"), "ready");
    assert!(format!("{patterns:?}").contains("https?://"));
    Ok(())
}

#[yare::parameterized(
    generic = {
        "To sign in, visit https://example.com and enter code ABC-123",
        "https://example.com", "ABC-123"
    },
    azure = {
        "To sign in, use a web browser to open the page https://microsoft.com/devicelogin and enter the code ABCD12345 to authenticate.",
        "https://microsoft.com/devicelogin", "ABCD12345"
    },
    colon = {
        "Open https://login.example.org/device, then enter the code: WXYZ-9876.",
        "https://login.example.org/device", "WXYZ-9876"
    },
    ansi = {
        "\x1b[93mTo sign in, visit https://example.com/d and enter code QRS-456\x1b[0m",
        "https://example.com/d", "QRS-456"
    },
)]
fn recognises_single_line_prompts(line: &str, url: &str, code: &str) {
    assert_eq!(
        parse_prompt(&patterns(), line),
        Some(DevicePrompt { url: url.to_owned(), user_code: code.to_owned() })
    );
}

#[test]
fn parts_may_arrive_on_separate_lines() {
    let patterns = patterns();
    let mut scanner = PromptScanner::new(&patterns);
    assert_eq!(scanner.feed("Go to https://example.com/device"), None);
    assert_eq!(scanner.feed("waiting..."), None);
    assert_eq!(
        scanner.feed("and enter code KLM-321"),
        Some(DevicePrompt { url: "https://example.com/device".into(), user_code: "KLM-321".into() })
    );
}

#[test]
fn first_url_wins() {
    let patterns = patterns();
    let mut scanner = PromptScanner::new(&patterns);
    scanner.feed("docs: https://first.example.com");
    let prompt = scanner.feed("visit https://second.example.com and enter code AAA-111");
    assert_eq!(prompt.map(|p| p.url), Some("https://first.example.com".to_owned()));
}

#[yare::parameterized(
    no_code      = { "visit https://example.com to continue" },
    no_url       = { "enter code ABC-123" },
    lower_code   = { "visit https://example.com and enter code abc-def" },
    prose        = { "Please enter the code shown below" },
    empty        = { "" },
)]
fn incomplete_output_is_not_a_prompt(text: &str) {
    assert_eq!(parse_prompt(&patterns(), text), None);
}
