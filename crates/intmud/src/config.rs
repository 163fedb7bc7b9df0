//! Interpreter configuration: the host-supplied record plus the project's
//! `.int` file.
//!
//! The `.int` file is line-oriented `key = value` with `#` comments.
//! Unknown keys are preserved verbatim so scripts can query them.

use indexmap::IndexMap;
use std::path::PathBuf;

/// Default per-invocation instruction budget.
pub const DEFAULT_EXEC_BUDGET: i64 = 5000;

/// Configuration handed to the core by the front end.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the `.int` project file and the sources.
    pub source_dir: PathBuf,
    /// Optional main source file (otherwise the `.int` `incluir` entries
    /// decide what loads).
    pub main_file: Option<String>,
    /// Server port; 0 disables the server layer.
    pub port: u16,
    pub bind_addr: String,
    /// Scheduler tick interval in milliseconds (nominal 100).
    pub tick_ms: u64,
    /// Upper bound of budget-resume cycles worked through per tick.
    pub max_cycles_per_tick: u32,
    pub hot_reload: bool,
    pub int: IntFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            main_file: None,
            port: 0,
            bind_addr: "127.0.0.1".to_string(),
            tick_ms: 100,
            max_cycles_per_tick: 10,
            hot_reload: false,
            int: IntFile::default(),
        }
    }
}

/// Parsed `.int` project file.
#[derive(Debug, Clone)]
pub struct IntFile {
    /// Files or prefixes to load, in order.
    pub incluir: Vec<String>,
    /// Default instruction budget per top-level invocation.
    pub exec_budget: i64,
    /// Console handler enabled.
    pub telatxt: bool,
    /// Log mode integer (passed through to scripts).
    pub log_mode: i64,
    /// 0 ignore / 1 tolerate unbalanced block ends / 2 strict.
    pub err_mode: u8,
    /// Unrestricted mode.
    pub completo: bool,
    /// Unknown keys, preserved verbatim in file order.
    pub extra: IndexMap<String, String>,
}

impl Default for IntFile {
    fn default() -> Self {
        Self {
            incluir: Vec::new(),
            exec_budget: DEFAULT_EXEC_BUDGET,
            telatxt: false,
            log_mode: 0,
            err_mode: 2,
            completo: false,
            extra: IndexMap::new(),
        }
    }
}

impl IntFile {
    /// Parses `.int` text. Malformed lines are skipped; numeric keys fall
    /// back to their defaults when unparsable.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        for raw in text.lines() {
            let line = match raw.find('#') {
                Some(at) => &raw[..at],
                None => raw,
            };
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "incluir" => out.incluir.push(value.to_string()),
                "exec" => {
                    if let Ok(v) = value.parse::<i64>() {
                        if v > 0 {
                            out.exec_budget = v;
                        }
                    }
                }
                "telatxt" => out.telatxt = parse_bool(value),
                "log" => out.log_mode = value.parse().unwrap_or(0),
                "err" => out.err_mode = value.parse().unwrap_or(2),
                "completo" => out.completo = parse_bool(value),
                _ => {
                    out.extra.insert(key, value.to_string());
                }
            }
        }
        out
    }

    /// Reads a key back the way scripts see it (known keys included).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "exec" => Some(self.exec_budget.to_string()),
            "telatxt" => Some(i64::from(self.telatxt).to_string()),
            "log" => Some(self.log_mode.to_string()),
            "err" => Some(self.err_mode.to_string()),
            "completo" => Some(i64::from(self.completo).to_string()),
            other => self.extra.get(other).cloned(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1") || value.eq_ignore_ascii_case("sim") || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_unknown_keys() {
        let f = IntFile::parse(
            "# projeto\nincluir = mapa\nincluir = npc\nexec = 9000\ntelatxt = 1\nerr = 1\nmundo = Valinor\n",
        );
        assert_eq!(f.incluir, vec!["mapa".to_string(), "npc".to_string()]);
        assert_eq!(f.exec_budget, 9000);
        assert!(f.telatxt);
        assert_eq!(f.err_mode, 1);
        assert_eq!(f.extra.get("mundo").map(String::as_str), Some("Valinor"));
        assert_eq!(f.get("mundo").as_deref(), Some("Valinor"));
    }

    #[test]
    fn bad_numbers_keep_defaults() {
        let f = IntFile::parse("exec = muitos\n");
        assert_eq!(f.exec_budget, DEFAULT_EXEC_BUDGET);
    }
}
