//! Formatting utilities for Telegram HTML and plain live-feed text.

use chrono::{DateTime, Utc};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `<a href="...">label</a>` with both parts escaped.
pub fn link(url: &str, label: &str) -> String {
    format!(
        r#"<a href="{}">{}</a>"#,
        escape_html(url),
        escape_html(label)
    )
}

pub fn bold(text: &str) -> String {
    format!("<b>{}</b>", escape_html(text))
}

pub fn italic(text: &str) -> String {
    format!("<i>{}</i>", escape_html(text))
}

/// Collapse newlines and cap length (comments can be long).
pub fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_chars).collect::<String>())
}

/// Deadlines travel as RFC3339; anything else is shown as-is.
pub fn format_deadline(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => dt.with_timezone(&Utc).format("%d.%m.%Y %H:%M").to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Join base URL and a path segment with exactly one slash.
pub fn join_url(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn link_escapes_label_and_url() {
        assert_eq!(
            link("http://h/o?a=1&b=2", "<x>"),
            r#"<a href="http://h/o?a=1&amp;b=2">&lt;x&gt;</a>"#
        );
    }

    #[test]
    fn truncates_by_chars_not_bytes() {
        assert_eq!(truncate_one_line("héllo\nwörld", 20), "héllo wörld");
        assert_eq!(truncate_one_line("ääääää", 3), "äää...");
    }

    #[test]
    fn formats_rfc3339_deadline() {
        assert_eq!(
            format_deadline("2024-05-01T10:30:00+02:00"),
            "01.05.2024 08:30"
        );
        assert_eq!(format_deadline(" 3 days "), "3 days");
    }

    #[test]
    fn joins_urls() {
        assert_eq!(join_url("http://h/orders/", "/42"), "http://h/orders/42");
        assert_eq!(join_url("http://h/orders", "42"), "http://h/orders/42");
    }
}
