use crossterm::style::Color;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Label selector matching the pods of one service.
pub fn service_selector(unit: &str) -> String {
    labels_to_selector(&BTreeMap::from([(
        "cht.service".to_string(),
        unit.to_string(),
    )]))
}

/// Render labels as a `k=v,k=v` selector string.
pub fn labels_to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Strip everything that cannot be part of a pod reference (`pod/name-abc12`).
pub fn sanitize_target(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '/')
        .collect()
}

/// First whitespace-separated token that parses as a pid.
pub fn parse_pid(output: &str) -> Option<u32> {
    output
        .split_whitespace()
        .find_map(|token| token.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

/// Generate a color for a string based on hash.
pub fn get_color(s: &str) -> Color {
    let colors = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Magenta,
        Color::Cyan,
        Color::White,
        Color::Grey,
        Color::AnsiValue(91), // Bright Red
        Color::AnsiValue(92), // Bright Green
        Color::AnsiValue(94), // Bright Blue
        Color::AnsiValue(93), // Bright Yellow
        Color::AnsiValue(95), // Bright Magenta
        Color::AnsiValue(96), // Bright Cyan
    ];
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    let hash = hasher.finish() as u32;
    colors[(hash % colors.len() as u32) as usize]
}
