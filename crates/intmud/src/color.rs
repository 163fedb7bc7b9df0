//! Colour markup: `{name}` tokens rendered to ANSI escapes.
//!
//! The token set is closed; unknown tokens pass through unchanged so that
//! literal braces in script output survive. One-letter shorthands cover the
//! eight base colours (lowercase) and their bright variants (uppercase).

/// ANSI SGR code for a token name, or `None` when the token is unknown.
fn sgr_code(name: &str) -> Option<&'static str> {
    Some(match name {
        "reset" | "n" => "0",
        "bold" => "1",
        "dim" => "2",
        "italic" => "3",
        "underline" => "4",
        "reverse" => "7",
        "black" | "k" => "30",
        "red" | "r" => "31",
        "green" | "g" => "32",
        "yellow" | "y" => "33",
        "blue" | "b" => "34",
        "magenta" | "m" => "35",
        "cyan" | "c" => "36",
        "white" | "w" => "37",
        "brightred" | "R" => "91",
        "brightgreen" | "G" => "92",
        "brightyellow" | "Y" => "93",
        "brightblue" | "B" => "94",
        "brightmagenta" | "M" => "95",
        "brightcyan" | "C" => "96",
        "brightwhite" | "W" => "97",
        _ => return None,
    })
}

fn is_known(name: &str) -> bool {
    name == "clear" || sgr_code(name).is_some()
}

/// Replaces known tokens with their escape sequences. `{clear}` clears the
/// screen; everything else becomes `ESC [ <code> m`.
#[must_use]
pub fn render(text: &str) -> String {
    transform(text, |name, out| {
        if name == "clear" {
            out.push_str("\x1b[2J\x1b[H");
            return true;
        }
        if let Some(code) = sgr_code(name) {
            out.push_str("\x1b[");
            out.push_str(code);
            out.push('m');
            return true;
        }
        false
    })
}

/// Removes known tokens, leaving plain text.
#[must_use]
pub fn strip_tokens(text: &str) -> String {
    transform(text, |name, _out| is_known(name))
}

/// Removes ANSI escape sequences (`ESC [ ... <final byte>`) from rendered
/// output.
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            // parameter and intermediate bytes, then one final byte
            for c in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&c) {
                    break;
                }
            }
        }
    }
    out
}

/// Scans `{name}` tokens; `apply` writes the replacement and reports
/// whether the token was recognised. Unrecognised tokens are emitted
/// verbatim.
fn transform(text: &str, apply: impl Fn(&str, &mut String) -> bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if after[..close].chars().all(|c| c.is_ascii_alphanumeric()) => {
                let name = &after[..close];
                if apply(name, &mut out) {
                    rest = &after[close + 1..];
                } else {
                    out.push('{');
                    rest = after;
                }
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_tokens() {
        let rendered = render("{red}hi{reset}");
        assert_eq!(rendered, "\x1b[31mhi\x1b[0m");
    }

    #[test]
    fn shorthands_map_to_the_same_codes() {
        assert_eq!(render("{r}x{n}"), render("{red}x{reset}"));
        assert_eq!(render("{R}"), render("{brightred}"));
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(render("{nope}x"), "{nope}x");
        assert_eq!(strip_tokens("{nope}x"), "{nope}x");
        assert_eq!(render("a{b"), "a{b");
    }

    #[test]
    fn strip_tokens_removes_markup() {
        assert_eq!(strip_tokens("{red}hi{reset}"), "hi");
        assert_eq!(strip_tokens("{bold}{blue}x"), "x");
    }

    #[test]
    fn strip_ansi_round_trip() {
        let rendered = render("{red}hi{reset}");
        assert_eq!(strip_ansi(&rendered), "hi");
        assert_eq!(strip_ansi(&render("{clear}oi")), "oi");
    }
}
