//! Text builtins: case handling, searching, slicing, codecs, hashing,
//! distances, and the `$name` exchange functions.
//!
//! Indices are character-based (0-based offsets, -1 for "not found").

use md5::{Digest as _, Md5};
use sha1::Sha1;

use super::Builtin;
use crate::value::Value;

fn text_arg(args: &[Value], n: usize) -> String {
    args.get(n).map(|v| v.to_text().to_string()).unwrap_or_default()
}

fn int_arg(args: &[Value], n: usize) -> i64 {
    args.get(n).map_or(0, Value::to_i64)
}

pub(super) fn call(builtin: Builtin, args: &[Value]) -> Value {
    let s = text_arg(args, 0);
    match builtin {
        Builtin::TxtTam => Value::Int(s.chars().count() as i64),
        Builtin::TxtMai => Value::from(s.to_uppercase()),
        Builtin::TxtMin => Value::from(s.to_lowercase()),
        Builtin::TxtMaiIni => Value::from(title_case(&s)),
        Builtin::TxtMaiCopia => Value::from(copy_case(&s, &text_arg(args, 1))),
        Builtin::TxtTrocaMai => {
            let mut chars: Vec<char> = s.chars().collect();
            for pos in &args[1..] {
                let Ok(at) = usize::try_from(pos.to_i64()) else { continue };
                if let Some(c) = chars.get_mut(at) {
                    *c = if c.is_uppercase() {
                        c.to_lowercase().next().unwrap_or(*c)
                    } else {
                        c.to_uppercase().next().unwrap_or(*c)
                    };
                }
            }
            Value::from(chars.into_iter().collect::<String>())
        }
        Builtin::TxtProcura => Value::Int(find_chars(
            &s.to_lowercase(),
            &text_arg(args, 1).to_lowercase(),
            int_arg(args, 2),
        )),
        Builtin::TxtProcuraDif => Value::Int(find_chars(&s, &text_arg(args, 1), int_arg(args, 2))),
        Builtin::TxtProcuraMai => Value::Int(find_chars(
            &s.to_uppercase(),
            &text_arg(args, 1).to_uppercase(),
            int_arg(args, 2),
        )),
        Builtin::TxtProcuraLin => {
            let needle = text_arg(args, 1).to_lowercase();
            let found = s
                .lines()
                .position(|line| line.to_lowercase().contains(&needle));
            Value::Int(found.map_or(-1, |at| at as i64))
        }
        Builtin::TxtProcuraPal => {
            let needle = text_arg(args, 1);
            let found = s
                .split_whitespace()
                .position(|word| word.eq_ignore_ascii_case(&needle));
            Value::Int(found.map_or(-1, |at| at as i64))
        }
        Builtin::TxtTroca => Value::from(replace_ci(&s, &text_arg(args, 1), &text_arg(args, 2))),
        Builtin::TxtTrocaDif => {
            let from = text_arg(args, 1);
            if from.is_empty() {
                Value::from(s)
            } else {
                Value::from(s.replace(&from, &text_arg(args, 2)))
            }
        }
        Builtin::TxtApara => Value::from(s.trim().to_string()),
        Builtin::TxtCopia => {
            let start = int_arg(args, 1).max(0);
            let len = args.get(2).map(Value::to_i64);
            let chars = s.chars().skip(usize::try_from(start).unwrap_or(0));
            let out: String = match len {
                Some(len) if len >= 0 => chars.take(usize::try_from(len).unwrap_or(0)).collect(),
                Some(_) => String::new(),
                None => chars.collect(),
            };
            Value::from(out)
        }
        Builtin::TxtPal => {
            let at = int_arg(args, 1).max(0);
            let count = args.get(2).map_or(1, Value::to_i64).max(1);
            let words: Vec<&str> = s.split_whitespace().collect();
            let start = usize::try_from(at).unwrap_or(usize::MAX);
            let end = start.saturating_add(usize::try_from(count).unwrap_or(1)).min(words.len());
            if start >= words.len() {
                Value::from("")
            } else {
                Value::from(words[start..end].join(" "))
            }
        }
        Builtin::TxtLin => {
            let at = usize::try_from(int_arg(args, 1).max(0)).unwrap_or(usize::MAX);
            Value::from(s.lines().nth(at).unwrap_or("").to_string())
        }
        Builtin::TxtPrim => Value::from(s.split_whitespace().next().unwrap_or("").to_string()),
        Builtin::TxtResto => {
            let trimmed = s.trim_start();
            match trimmed.find(char::is_whitespace) {
                Some(at) => Value::from(trimmed[at..].trim_start().to_string()),
                None => Value::from(""),
            }
        }
        Builtin::TxtFim => {
            let n = usize::try_from(int_arg(args, 1).max(0)).unwrap_or(0);
            let total = s.chars().count();
            Value::from(s.chars().skip(total.saturating_sub(n)).collect::<String>())
        }
        Builtin::TxtInv => Value::from(s.chars().rev().collect::<String>()),
        Builtin::TxtRepete => {
            let n = usize::try_from(int_arg(args, 1).max(0)).unwrap_or(0);
            Value::from(s.repeat(n))
        }
        Builtin::TxtEspacos => {
            let n = usize::try_from(int_arg(args, 0).max(0)).unwrap_or(0);
            Value::from(" ".repeat(n))
        }
        Builtin::TxtRemove => {
            let unwanted = text_arg(args, 1);
            Value::from(s.chars().filter(|c| !unwanted.contains(*c)).collect::<String>())
        }
        Builtin::TxtFiltro => Value::from(
            s.chars()
                .filter(|&c| matches!(c, '\n' | '\r' | '\t') || ('\u{20}'..='\u{7e}').contains(&c))
                .collect::<String>(),
        ),
        Builtin::TxtCod => Value::from(at_encode(&s)),
        Builtin::TxtDec => Value::from(at_decode(&s)),
        Builtin::TxtVisivel => Value::from(backslash_encode(&s)),
        Builtin::TxtInvisivel => Value::from(backslash_decode(&s)),
        Builtin::TxtUrlCod => Value::from(url_encode(&s)),
        Builtin::TxtUrlDec => Value::from(url_decode(&s)),
        Builtin::TxtSha1 => {
            let digest = Sha1::digest(s.as_bytes());
            Value::from(hex_lower(&digest))
        }
        Builtin::TxtMd5 => {
            let digest = Md5::digest(s.as_bytes());
            Value::from(hex_lower(&digest))
        }
        Builtin::TxtSenha => Value::from(password_digest(&s)),
        Builtin::TxtDist => {
            let (a, b) = (s.to_lowercase(), text_arg(args, 1).to_lowercase());
            Value::Int(levenshtein(&a, &b))
        }
        Builtin::TxtDistDif => Value::Int(levenshtein(&s, &text_arg(args, 1))),
        Builtin::TxtDistMai => {
            let (a, b) = (s.to_uppercase(), text_arg(args, 1).to_uppercase());
            Value::Int(levenshtein(&a, &b))
        }
        Builtin::TxtNome => Value::Int(i64::from(valid_name(&s))),
        Builtin::TxtConverte => {
            Value::from(convert_encoding(&s, &text_arg(args, 1), &text_arg(args, 2)))
        }
        Builtin::IntSenha => Value::Int(password_score(&s)),
        other => unreachable!("not a text builtin: {other:?}"),
    }
}

/// Uppercases the first letter of each word, leaving the rest unchanged.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            at_word_start = false;
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Applies the case pattern of `model` to `text`, character by character.
fn copy_case(model: &str, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut model_chars = model.chars();
    for c in text.chars() {
        match model_chars.next() {
            Some(m) if m.is_uppercase() => out.extend(c.to_uppercase()),
            Some(m) if m.is_lowercase() => out.extend(c.to_lowercase()),
            _ => out.push(c),
        }
    }
    out
}

/// Character-offset substring search starting at `from`; -1 when absent.
fn find_chars(hay: &str, needle: &str, from: i64) -> i64 {
    if needle.is_empty() {
        return 0;
    }
    let skip = usize::try_from(from.max(0)).unwrap_or(0);
    let hay_chars: Vec<char> = hay.chars().collect();
    let needle_chars: Vec<char> = needle.chars().collect();
    if needle_chars.len() > hay_chars.len() {
        return -1;
    }
    for start in skip..=hay_chars.len() - needle_chars.len() {
        if hay_chars[start..start + needle_chars.len()] == needle_chars[..] {
            return start as i64;
        }
    }
    -1
}

/// Case-insensitive replace-all.
fn replace_ci(hay: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return hay.to_string();
    }
    let lower_hay = hay.to_lowercase();
    let lower_from = from.to_lowercase();
    let mut out = String::with_capacity(hay.len());
    let mut rest = 0;
    let mut search = 0;
    while let Some(at) = lower_hay[search..].find(&lower_from) {
        let at = search + at;
        out.push_str(&hay[rest..at]);
        out.push_str(to);
        rest = at + lower_from.len();
        search = rest;
        if search >= lower_hay.len() {
            break;
        }
    }
    out.push_str(&hay[rest..]);
    out
}

/// `@`-escape codec: `@`, `\`, `"`, and codes below 32 become `@` plus
/// the character shifted up by 64.
fn at_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let code = c as u32;
        if c == '@' || c == '\\' || c == '"' || code < 32 {
            out.push('@');
            out.push(char::from_u32(code + 64).expect("shifted escape code is valid"));
        } else {
            out.push(c);
        }
    }
    out
}

fn at_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '@' {
            match chars.next() {
                Some(escaped) => {
                    let code = (escaped as u32).wrapping_sub(64);
                    out.push(char::from_u32(code).unwrap_or(escaped));
                }
                None => out.push('@'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Makes control characters visible as backslash escapes.
fn backslash_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

fn backslash_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(char::from_digit(u32::from(b >> 4), 16).expect("nibble").to_ascii_uppercase());
            out.push(char::from_digit(u32::from(b & 15), 16).expect("nibble").to_ascii_uppercase());
        }
    }
    out
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from_digit(u32::from(b >> 4), 16).expect("nibble"));
        out.push(char::from_digit(u32::from(b & 15), 16).expect("nibble"));
    }
    out
}

const PASSWORD_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789./";

/// Compact password digest: the first 16 bytes of the SHA-1, packed into
/// 22 characters of a base-64-style alphabet.
fn password_digest(s: &str) -> String {
    let digest = Sha1::digest(s.as_bytes());
    let bytes = &digest[..16];
    let mut out = String::with_capacity(22);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &b in bytes {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 6 {
            bits -= 6;
            out.push(PASSWORD_ALPHABET[(acc >> bits) as usize & 63] as char);
        }
    }
    if bits > 0 {
        out.push(PASSWORD_ALPHABET[(acc << (6 - bits)) as usize & 63] as char);
    }
    out
}

/// Password strength 0–5: lowercase, uppercase, digit, special, and
/// length of at least 8.
fn password_score(s: &str) -> i64 {
    let mut score = 0;
    if s.chars().any(char::is_lowercase) {
        score += 1;
    }
    if s.chars().any(char::is_uppercase) {
        score += 1;
    }
    if s.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    if s.chars().any(|c| !c.is_alphanumeric()) {
        score += 1;
    }
    if s.chars().count() >= 8 {
        score += 1;
    }
    score
}

/// Classic two-row Levenshtein over characters.
fn levenshtein(a: &str, b: &str) -> i64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len() as i64;
    }
    if b.is_empty() {
        return a.len() as i64;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()] as i64
}

/// A valid identifier-style name: a letter, then letters and digits.
fn valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(char::is_alphanumeric)
}

/// Re-encodes text between the named encodings, treating the input as the
/// byte sequence of its current form.
fn convert_encoding(s: &str, from: &str, to: &str) -> String {
    let chars: Vec<char> = match from.to_ascii_lowercase().as_str() {
        "latin1" | "iso8859" => s.bytes().map(char::from).collect(),
        "ascii" => s
            .bytes()
            .map(|b| if b < 0x80 { char::from(b) } else { '?' })
            .collect(),
        "utf16" => {
            let bytes = s.as_bytes();
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            char::decode_utf16(units)
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        _ => s.chars().collect(),
    };
    match to.to_ascii_lowercase().as_str() {
        "latin1" | "iso8859" => chars
            .into_iter()
            .map(|c| if (c as u32) <= 0xFF { c } else { '?' })
            .collect(),
        "ascii" => chars
            .into_iter()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect(),
        "utf16" => {
            let mut out = String::new();
            let mut units = [0u16; 2];
            for c in chars {
                for unit in c.encode_utf16(&mut units) {
                    let [lo, hi] = unit.to_le_bytes();
                    out.push(char::from(lo));
                    out.push(char::from(hi));
                }
            }
            out
        }
        _ => chars.into_iter().collect(),
    }
}

/// `vartroca(text, name, value, ...)` — replaces `$name` tokens with the
/// matching pair's value; unmatched tokens stay as written.
pub(super) fn vartroca(args: &[Value]) -> Value {
    Value::from(exchange(args, false))
}

/// Like `vartroca`, but values pass through the `@`-escape codec.
pub(super) fn vartrocacod(args: &[Value]) -> Value {
    Value::from(exchange(args, true))
}

fn exchange(args: &[Value], encode: bool) -> String {
    let text = text_arg(args, 0);
    let pairs: Vec<(String, String)> = args[1..]
        .chunks(2)
        .filter_map(|pair| {
            let name = pair.first()?.to_text().to_string();
            let value = pair.get(1).map(|v| v.to_text().to_string()).unwrap_or_default();
            Some((name, value))
        })
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        match pairs.iter().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, value)) => {
                if encode {
                    out.push_str(&at_encode(value));
                } else {
                    out.push_str(value);
                }
            }
            None => {
                out.push('$');
                out.push_str(&name);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn searches_and_offsets() {
        assert_eq!(call(Builtin::TxtProcura, &[Value::from("Olá Mundo"), Value::from("mundo")]).to_i64(), 4);
        assert_eq!(call(Builtin::TxtProcuraDif, &[Value::from("Olá Mundo"), Value::from("mundo")]).to_i64(), -1);
        assert_eq!(call(Builtin::TxtProcura, &[Value::from("abcabc"), Value::from("abc"), Value::Int(1)]).to_i64(), 3);
        assert_eq!(call(Builtin::TxtProcuraPal, &[Value::from("uma espada longa"), Value::from("ESPADA")]).to_i64(), 1);
        assert_eq!(call(Builtin::TxtProcuraLin, &[Value::from("um\ndois\ntres"), Value::from("DOIS")]).to_i64(), 1);
    }

    #[test]
    fn case_functions() {
        assert_eq!(&*call(Builtin::TxtMaiIni, &[Value::from("olá meu mundo")]).to_text(), "Olá Meu Mundo");
        assert_eq!(&*call(Builtin::TxtMaiCopia, &[Value::from("AbC"), Value::from("xyz")]).to_text(), "XyZ");
        assert_eq!(&*call(Builtin::TxtTrocaMai, &[Value::from("abc"), Value::Int(0), Value::Int(2)]).to_text(), "AbC");
    }

    #[test]
    fn slicing() {
        assert_eq!(&*call(Builtin::TxtCopia, &[Value::from("paralelo"), Value::Int(4), Value::Int(2)]).to_text(), "le");
        assert_eq!(&*call(Builtin::TxtPal, &[Value::from("um dois tres"), Value::Int(1)]).to_text(), "dois");
        assert_eq!(&*call(Builtin::TxtPal, &[Value::from("um dois tres"), Value::Int(1), Value::Int(2)]).to_text(), "dois tres");
        assert_eq!(&*call(Builtin::TxtLin, &[Value::from("a\nb\nc"), Value::Int(2)]).to_text(), "c");
        assert_eq!(&*call(Builtin::TxtPrim, &[Value::from("  ola mundo ")]).to_text(), "ola");
        assert_eq!(&*call(Builtin::TxtResto, &[Value::from("  ola mundo bom ")]).to_text(), "mundo bom ");
        assert_eq!(&*call(Builtin::TxtFim, &[Value::from("paralelo"), Value::Int(3)]).to_text(), "elo");
        assert_eq!(&*call(Builtin::TxtInv, &[Value::from("abc")]).to_text(), "cba");
        assert_eq!(&*call(Builtin::TxtRepete, &[Value::from("ab"), Value::Int(3)]).to_text(), "ababab");
        assert_eq!(&*call(Builtin::TxtEspacos, &[Value::Int(3)]).to_text(), "   ");
    }

    #[test]
    fn replace_variants() {
        assert_eq!(&*call(Builtin::TxtTroca, &[Value::from("Casa CASA casa"), Value::from("casa"), Value::from("lar")]).to_text(), "lar lar lar");
        assert_eq!(&*call(Builtin::TxtTrocaDif, &[Value::from("Casa casa"), Value::from("casa"), Value::from("lar")]).to_text(), "Casa lar");
    }

    #[test]
    fn filters() {
        assert_eq!(&*call(Builtin::TxtRemove, &[Value::from("banana"), Value::from("an")]).to_text(), "b");
        assert_eq!(&*call(Builtin::TxtFiltro, &[Value::from("ok\u{1}\t çã")]).to_text(), "ok\t ");
    }

    #[test]
    fn at_codec_round_trips_all_codes() {
        for code in 0u32..256 {
            let Some(c) = char::from_u32(code) else { continue };
            let original: String = [c, 'x'].iter().collect();
            let encoded = at_encode(&original);
            assert_eq!(at_decode(&encoded), original, "code {code}");
        }
        // '"' is code 34, escaping to '@' plus code 98 ('b')
        assert_eq!(at_encode("a\"c"), "a@bc");
        // escaped characters never appear raw in the output
        assert!(!at_encode("x\ny\"z\\").contains(['\n', '"', '\\']));
    }

    #[test]
    fn backslash_codec_round_trips() {
        let original = "a\nb\tc\\d\re";
        let visible = backslash_encode(original);
        assert_eq!(visible, "a\\nb\\tc\\\\d\\re");
        assert_eq!(backslash_decode(&visible), original);
    }

    #[test]
    fn url_codec() {
        assert_eq!(url_encode("a b/ç"), "a%20b%2F%C3%A7");
        assert_eq!(url_decode("a%20b%2F%C3%A7"), "a b/ç");
        assert_eq!(url_decode("a+b"), "a b");
    }

    #[test]
    fn hashes_are_stable() {
        assert_eq!(
            &*call(Builtin::TxtSha1, &[Value::from("abc")]).to_text(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            &*call(Builtin::TxtMd5, &[Value::from("abc")]).to_text(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        let compact = call(Builtin::TxtSenha, &[Value::from("segredo")]).to_text();
        assert_eq!(compact.chars().count(), 22);
        // deterministic
        assert_eq!(&*call(Builtin::TxtSenha, &[Value::from("segredo")]).to_text(), &*compact);
    }

    #[test]
    fn distances_are_symmetric() {
        for (a, b) in [("casa", "caso"), ("", "abc"), ("kitten", "sitting"), ("Olá", "ola")] {
            for builtin in [Builtin::TxtDist, Builtin::TxtDistDif, Builtin::TxtDistMai] {
                let d1 = call(builtin, &[Value::from(a), Value::from(b)]).to_i64();
                let d2 = call(builtin, &[Value::from(b), Value::from(a)]).to_i64();
                assert_eq!(d1, d2, "{builtin:?} {a} {b}");
            }
        }
        assert_eq!(call(Builtin::TxtDist, &[Value::from("Casa"), Value::from("casa")]).to_i64(), 0);
        assert_eq!(call(Builtin::TxtDistDif, &[Value::from("Casa"), Value::from("casa")]).to_i64(), 1);
        assert_eq!(call(Builtin::TxtDist, &[Value::from("kitten"), Value::from("sitting")]).to_i64(), 3);
    }

    #[test]
    fn name_validation() {
        assert_eq!(call(Builtin::TxtNome, &[Value::from("Fulano2")]).to_i64(), 1);
        assert_eq!(call(Builtin::TxtNome, &[Value::from("2Fulano")]).to_i64(), 0);
        assert_eq!(call(Builtin::TxtNome, &[Value::from("Fu lano")]).to_i64(), 0);
        assert_eq!(call(Builtin::TxtNome, &[Value::from("")]).to_i64(), 0);
    }

    #[test]
    fn password_scoring() {
        assert_eq!(call(Builtin::IntSenha, &[Value::from("")]).to_i64(), 0);
        assert_eq!(call(Builtin::IntSenha, &[Value::from("abc")]).to_i64(), 1);
        assert_eq!(call(Builtin::IntSenha, &[Value::from("Abc1!")]).to_i64(), 4);
        assert_eq!(call(Builtin::IntSenha, &[Value::from("Abc1!efg")]).to_i64(), 5);
    }

    #[test]
    fn encoding_conversion() {
        // utf8 → latin1 keeps Latin characters as single units
        assert_eq!(convert_encoding("café", "utf8", "latin1"), "café");
        // latin1 → utf8 of the é byte pair shows the classic mojibake
        assert_eq!(convert_encoding("é", "latin1", "utf8"), "Ã©");
        assert_eq!(convert_encoding("héllo", "utf8", "ascii"), "h?llo");
        // utf16 round trip
        let wide = convert_encoding("oi", "utf8", "utf16");
        assert_eq!(convert_encoding(&wide, "utf16", "utf8"), "oi");
    }

    #[test]
    fn vartroca_replaces_pairs() {
        let out = vartroca(&[
            Value::from("hello $name, you are $age"),
            Value::from("name"),
            Value::from("Alice"),
            Value::from("age"),
            Value::Int(30),
        ]);
        assert_eq!(&*out.to_text(), "hello Alice, you are 30");
    }

    #[test]
    fn vartroca_keeps_unknown_tokens() {
        let out = vartroca(&[Value::from("oi $quem"), Value::from("nome"), Value::from("x")]);
        assert_eq!(&*out.to_text(), "oi $quem");
    }

    #[test]
    fn vartrocacod_escapes_values() {
        let out = vartrocacod(&[
            Value::from("v=$v"),
            Value::from("v"),
            Value::from("a\"c"),
        ]);
        assert_eq!(&*out.to_text(), "v=a@bc");
    }
}
