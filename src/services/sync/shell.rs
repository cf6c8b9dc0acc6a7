//! Shell quoting and input checks for generated sync commands

use url::Url;

/// Quote `value` for POSIX `sh` as a single-quoted word
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Component, architecture and version names
///
/// Non-empty, made of `[A-Za-z0-9_.+-]` and not starting with `-`.
pub fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
}

/// Mirror URLs must parse and use http, https or ftp
pub fn is_valid_mirror_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "ftp")
                && url.host_str().is_some()
                && !value.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        Err(_) => false,
    }
}

/// Shell line writing `lines` to `path`, one per line
pub fn write_file(path: &str, lines: &[String]) -> String {
    let quoted: Vec<String> = lines.iter().map(|l| quote(l)).collect();
    format!("printf '%s\\n' {} > {}", quoted.join(" "), quote(path))
}
