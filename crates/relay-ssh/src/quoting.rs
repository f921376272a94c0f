//! Command-line construction for the two remote shells the fallback path
//! targets: POSIX `sh` and Windows PowerShell.

use base64::Engine;

/// Single-quote `s` for POSIX shells, escaping embedded single quotes with
/// the standard `'\''` trick (close quote, escaped quote, reopen quote).
pub fn posix_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Join argv into a single `cd <dir> && <argv>` POSIX command line.
pub fn posix_command(working_dir: &str, argv: &[&str]) -> String {
    let quoted_args: Vec<String> = argv.iter().map(|a| posix_quote(a)).collect();
    format!("cd {} && {}", posix_quote(working_dir), quoted_args.join(" "))
}

/// Encode `script` as UTF-16LE base64 for `powershell -EncodedCommand`,
/// which sidesteps quoting entirely by not going through a shell parser
/// for the payload at all.
pub fn windows_encoded_command(script: &str) -> Vec<String> {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    let encoded = base64::engine::general_purpose::STANDARD.encode(utf16);
    vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-EncodedCommand".to_string(),
        encoded,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_quote_escapes_embedded_quotes() {
        assert_eq!(posix_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn posix_command_quotes_dir_and_every_argument() {
        let cmd = posix_command("/tmp/my project", &["git", "status"]);
        assert_eq!(cmd, "cd '/tmp/my project' && 'git' 'status'");
    }

    #[test]
    fn windows_encoded_command_round_trips_through_utf16le_base64() {
        let args = windows_encoded_command("Get-ChildItem");
        assert_eq!(args[0], "-NoProfile");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&args[3])
            .unwrap();
        let units: Vec<u16> = decoded
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(String::from_utf16(&units).unwrap(), "Get-ChildItem");
    }
}
