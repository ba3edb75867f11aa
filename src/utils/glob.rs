//! Redis-style glob patterns for the in-process store.

use regex::Regex;

/// Translates a Redis `KEYS`/`SCAN MATCH` glob into an anchored regex.
///
/// Supported syntax:
/// - `*` - any sequence, including empty
/// - `?` - exactly one character
/// - `[abc]`, `[a-z]`, `[^a]` - character classes
/// - `\x` - literal `x`
///
/// An unterminated `[` is matched literally.
///
/// # Errors
///
/// Returns the regex compilation error for malformed classes such as `[z-a]`.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                out.push_str(&regex::escape(&chars[i].to_string()));
            }
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(offset) if offset > 0 => {
                    let class: String = chars[i + 1..i + 1 + offset].iter().collect();
                    out.push('[');
                    out.push_str(&escape_class(&class));
                    out.push(']');
                    i += offset + 1;
                }
                _ => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    Regex::new(&out)
}

/// Escapes characters that are special inside a regex class but literal in a glob class.
fn escape_class(class: &str) -> String {
    let mut out = String::with_capacity(class.len());
    for (idx, c) in class.chars().enumerate() {
        match c {
            '^' if idx == 0 => out.push('^'),
            '-' => out.push('-'),
            '\\' | '[' | ']' | '&' | '~' | '^' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
