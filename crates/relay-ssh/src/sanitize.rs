//! Cleans up the wire artefacts PowerShell remoting leaves in captured
//! output: escaped CRLF sequences and, when a command errors before
//! producing real output, a CLIXML envelope instead of plain text.

/// PowerShell remoting escapes literal CR/LF inside some error streams as
/// `_x000D__x000A_`; undo that so stderr reads like a normal message.
pub fn unescape_clixml_newlines(s: &str) -> String {
    s.replace("_x000D__x000A_", "\n").replace("_x000D_", "")
}

/// Strip a `#< CLIXML` envelope down to its human-readable `<S>` text
/// nodes, if present. Output that isn't CLIXML passes through unchanged.
pub fn strip_clixml(s: &str) -> String {
    let trimmed = s.trim_start();
    if !trimmed.starts_with("#< CLIXML") {
        return s.to_string();
    }

    let mut out = String::new();
    let mut rest = trimmed;
    while let Some(start) = rest.find("<S ") {
        let after_tag = &rest[start..];
        let Some(gt) = after_tag.find('>') else { break };
        let body_start = start + gt + 1;
        let Some(end) = rest[body_start..].find("</S>") else { break };
        let text = &rest[body_start..body_start + end];
        out.push_str(&unescape_clixml_newlines(text));
        out.push('\n');
        rest = &rest[body_start + end + "</S>".len()..];
    }
    if out.is_empty() {
        s.to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_for_plain_text() {
        assert_eq!(strip_clixml("plain output"), "plain output");
    }

    #[test]
    fn extracts_text_nodes_from_clixml_envelope() {
        let raw = "#< CLIXML\n<Objs><S S=\"Error\">boom_x000D__x000A_</S></Objs>";
        let cleaned = strip_clixml(raw);
        assert_eq!(cleaned.trim(), "boom");
    }

    #[test]
    fn unescapes_crlf_markers() {
        assert_eq!(unescape_clixml_newlines("a_x000D__x000A_b"), "a\nb");
    }
}
