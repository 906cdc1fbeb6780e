// src/connect/script.rs

//! Script text piped into the guest shell.

/// Wrap `s` in single quotes, escaping embedded single quotes for POSIX sh.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Prefix `script` with one `export KEY='value'` line per variable.
///
/// Keys that are not valid shell identifiers are skipped since `export`
/// would reject them and abort the script. The script itself is passed
/// through byte for byte.
pub fn exported_script<'a, I>(vars: I, script: &[u8]) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (key, value) in vars {
        if !is_shell_identifier(key) {
            continue;
        }
        out.push_str("export ");
        out.push_str(key);
        out.push('=');
        out.push_str(&shell_quote(value));
        out.push('\n');
    }
    let mut out = out.into_bytes();
    out.extend_from_slice(script);
    out
}

fn is_shell_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
