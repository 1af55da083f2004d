//! Shared helpers: shell quoting and secret masking for logged commands.

use std::borrow::Cow;

/// Quote a single shell argument for the remote POSIX shell.
///
/// All caller-supplied values are routed through here before they are
/// interpolated into a command string.
pub(crate) fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::from(value))
}

/// Key/flag prefixes whose values must never reach the logs.
const SECRET_MARKERS: &[&str] = &[
    "TOKEN=",
    "AUTH_TOKEN=",
    "ACCESS_TOKEN=",
    "PASSWORD=",
    "SECRET=",
    "API_KEY=",
    "--token=",
    "--token ",
    "--password=",
    "--password ",
    "--api-key=",
    "--api-key ",
];

/// Mask secret values in a command string before logging it.
///
/// The key or flag is kept, the value is replaced with `***`. Quoted values
/// are consumed through the closing quote so multi-word secrets do not leak.
pub(crate) fn mask_secrets(command: &str) -> String {
    let mut masked = command.to_string();
    for marker in SECRET_MARKERS {
        let mut from = 0;
        while let Some(offset) = masked[from..].find(marker) {
            let value_start = from + offset + marker.len();
            let value_end = value_start + secret_value_len(&masked[value_start..]);
            masked.replace_range(value_start..value_end, "***");
            from = value_start + "***".len();
        }
    }
    masked
}

/// Length of the value token starting at the beginning of `rest`.
fn secret_value_len(rest: &str) -> usize {
    let mut len = 0;
    let mut closing_quote: Option<char> = None;
    for c in rest.chars() {
        match closing_quote {
            Some(q) => {
                len += c.len_utf8();
                if c == q {
                    return len;
                }
            }
            None if c == '\'' || c == '"' => {
                closing_quote = Some(c);
                len += c.len_utf8();
            }
            None if c.is_whitespace() => return len,
            None => len += c.len_utf8(),
        }
    }
    len
}
