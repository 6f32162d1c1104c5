//! Strips ANSI noise and non-payload chatter out of raw `chip-tool` output, leaving a single
//! whitespace-joined string of Interaction Model payload tokens ready for the block extractor
//! and grammar parser.

const SKIP_PATTERNS: &[&str] = &[
    "Received Command Response Status",
    "Subscription established with SubscriptionID",
    "Received Command Response Data",
    "SendReadRequest ReadClient",
    "MoveToState ReadClient",
    "All ReadHandler-s are clean",
    "data version filters provided",
    "Refresh LivenessCheckTime for",
    "SubscribeResponse is received",
];

/// Removes `ESC[...m` ANSI escape sequences and commas from a line.
fn strip_ansi_and_commas(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' {
            continue;
        }
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Extracts the 16-hex-digit source node from a `from <fabric>:<hex16>` fragment, normalized to
/// `0x` with leading zeros stripped.
fn extract_source_node(line: &str) -> Option<String> {
    let idx = line.find("from ")?;
    let rest = &line[idx + "from ".len()..];
    let colon = rest.find(':')?;
    let hex = rest[colon + 1..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect::<String>();
    if hex.len() != 16 {
        return None;
    }
    let value = u64::from_str_radix(&hex, 16).ok()?;
    Some(format!("{value:#x}"))
}

/// Strips trailing `(...)` parenthesized type hints from an emitted fragment.
fn strip_type_hints(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut depth = 0usize;
    for c in fragment.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Cleans a raw `chip-tool` output stream down to its Interaction Model payload tokens.
pub fn clean(raw: &str) -> String {
    let mut fragments: Vec<String> = Vec::new();
    let mut pending_node: Option<String> = None;

    for raw_line in raw.lines() {
        let line = strip_ansi_and_commas(raw_line);
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        if tokens[3..].iter().all(|t| t.is_empty()) {
            continue;
        }
        if SKIP_PATTERNS.iter().any(|p| line.contains(p)) {
            continue;
        }
        if line.contains("IM:ReportData") || line.contains("IM:InvokeCommandResponse") {
            if let Some(node) = extract_source_node(&line) {
                pending_node = Some(node);
            }
            continue;
        }
        if tokens[2] != "[DMG]" {
            continue;
        }
        if !line.contains(['[', ']', '{', '}', '=', '(', ')']) {
            continue;
        }
        let body_start = byte_offset_of_token(&line, 3);
        let body = &line[body_start..];
        if line.contains("Endpoint =") || line.contains("EndpointId =") {
            if let Some(node) = &pending_node {
                fragments.push(format!("NodeID = {node}"));
            }
        }
        fragments.push(strip_type_hints(body));
    }

    fragments.join(" ")
}

/// Returns the byte offset where the `n`-th whitespace-separated token (0-indexed) begins.
fn byte_offset_of_token(line: &str, n: usize) -> usize {
    let mut count = 0usize;
    let mut in_token = false;
    for (i, c) in line.char_indices() {
        let is_space = c.is_whitespace();
        if !is_space && !in_token {
            if count == n {
                return i;
            }
            in_token = true;
            count += 1;
        } else if is_space {
            in_token = false;
        }
    }
    line.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_skip_patterns() {
        let raw = "0000 1111 2222 Received Command Response Status for node\n";
        assert_eq!(clean(raw), "");
    }

    #[test]
    fn strips_ansi_and_commas() {
        let raw = "\u{1b}[0m1 2 [DMG] Endpoint = 0x01, foo = bar";
        let cleaned = clean(raw);
        assert!(cleaned.contains("Endpoint = 0x01 foo = bar"));
    }

    #[test]
    fn injects_node_id_before_endpoint() {
        let raw = concat!(
            "1 2 IM:ReportData from 1:000000000000002a\n",
            "1 2 [DMG] Endpoint = 0x01 { Cluster = 0x06 }\n",
        );
        let cleaned = clean(raw);
        assert!(cleaned.starts_with("NodeID = 0x2a"));
        assert!(cleaned.contains("Endpoint = 0x01"));
    }

    #[test]
    fn ignores_short_lines() {
        let raw = "too short\n";
        assert_eq!(clean(raw), "");
    }

    #[test]
    fn strips_type_hint_parens() {
        let raw = "1 2 [DMG] Attribute = 0x0000(int) { foo = 1 }";
        let cleaned = clean(raw);
        assert!(!cleaned.contains("(int)"));
    }
}
