//! Locates balanced `Name = { … }` top-level blocks inside a cleaned log window.
//!
//! Scans character by character maintaining a brace-depth stack. On the first `{` seen at depth
//! zero it looks backwards for the identifier that introduces the block (`Name =`); on the
//! matching closing `}` it emits the substring. Missing leading identifiers are skipped; stray
//! closing braces are ignored once the stack has drained.

/// Extracts every top-level `Name = { ... }` block from cleaned text.
pub fn extract_named_blocks(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut blocks = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut current = String::new();
    let mut recording = false;

    for (i, &c) in chars.iter().enumerate() {
        if c == '{' {
            if stack.is_empty() {
                if let Some(key_start) = find_preceding_key(&chars, i) {
                    current = chars[key_start..i].iter().collect();
                    recording = true;
                }
            }
            stack.push('{');
            if recording {
                current.push('{');
            }
        } else if c == '}' {
            if !stack.is_empty() {
                stack.pop();
            }
            if recording {
                current.push('}');
            }
            if stack.is_empty() && recording {
                blocks.push(current.trim().to_string());
                current.clear();
                recording = false;
            }
        } else if recording {
            current.push(c);
        }
    }
    blocks
}

/// Looks backwards on the current logical line from `brace_index` for an identifier directly
/// followed by `=`, returning the char index the identifier starts at.
fn find_preceding_key(chars: &[char], brace_index: usize) -> Option<usize> {
    let line_start = chars[..brace_index]
        .iter()
        .rposition(|&c| c == '\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut j = brace_index;
    while j > line_start && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    if j == line_start || chars[j - 1] != '=' {
        return None;
    }
    j -= 1;
    while j > line_start && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    let ident_end = j;
    while j > line_start && (chars[j - 1].is_alphanumeric() || chars[j - 1] == '_') {
        j -= 1;
    }
    let ident_start = j;
    if ident_start == ident_end {
        return None;
    }
    Some(ident_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_block() {
        let text = "ReportDataMessage = { AttributeReportIBs = [ 1 2 ] }";
        let blocks = extract_named_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("ReportDataMessage"));
        assert!(blocks[0].ends_with('}'));
    }

    #[test]
    fn extracts_nested_block_as_one() {
        let text = "Outer = { Inner = { X = 1 } Y = 2 }";
        let blocks = extract_named_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains("Inner = { X = 1 }"));
    }

    #[test]
    fn skips_blocks_without_preceding_identifier() {
        let text = "= { X = 1 } Foo = { Y = 2 }";
        let blocks = extract_named_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("Foo"));
    }

    #[test]
    fn ignores_stray_closing_brace() {
        let text = "} Foo = { X = 1 }";
        let blocks = extract_named_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("Foo"));
    }

    #[test]
    fn extracts_multiple_top_level_blocks() {
        let text = "A = { X = 1 } B = { Y = 2 }";
        let blocks = extract_named_blocks(text);
        assert_eq!(blocks.len(), 2);
    }
}
