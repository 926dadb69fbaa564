//! `.spellworkrc` configuration file parser.
//!
//! Recognises a small command subset:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | set an engine limit |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Setting names are the [`EngineConfig`] field names; any other name is a
//! line error.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::args::split_args;

// ── Engine limits ─────────────────────────────────────────────────────────────

/// Limits and defaults consulted by the sandbox and the automation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Comprehension iterations per evaluator.
    pub max_iterations: usize,
    /// Text node output is truncated past this many characters.
    pub max_text_length: usize,
    /// Upper bound on repeated attack rolls.
    pub max_attack_rolls: i64,
    /// Longest string or list an operator may build.
    pub max_string_length: usize,
    /// Largest exponent accepted by `**`.
    pub max_power: i64,
    /// Natural d20 roll at or above which an attack crits.
    pub default_crit_on: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iterations: 10_000,
            max_text_length: 1020,
            max_attack_rolls: 25,
            max_string_length: 100_000,
            max_power: 4_000_000,
            default_crit_on: 20,
        }
    }
}

impl EngineConfig {
    /// Apply one `name = value` setting.  Returns `Ok(false)` if `name` is
    /// not an engine setting.
    fn apply(&mut self, name: &str, value: &str) -> Result<bool, String> {
        fn num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("/set: '{name}' expects a non-negative number, got '{value}'"))
        }
        match name {
            "max_iterations" => self.max_iterations = num(name, value)?,
            "max_text_length" => self.max_text_length = num(name, value)?,
            "max_attack_rolls" => self.max_attack_rolls = num::<u32>(name, value)?.into(),
            "max_string_length" => self.max_string_length = num(name, value)?,
            "max_power" => self.max_power = num::<u32>(name, value)?.into(),
            "default_crit_on" => {
                let v: u32 = num(name, value)?;
                if !(1..=20).contains(&v) {
                    return Err(format!("/set: 'default_crit_on' must be 1-20, got {v}"));
                }
                self.default_crit_on = v.into();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Parsed configuration.
#[derive(Debug, Default)]
pub struct Config {
    pub engine: EngineConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Unknown directives are silently skipped.  Returns the config and a list
    /// of any parse errors on recognised lines.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let args_str = args_str.trim();

            if cmd == "set" {
                let tokens = split_args(args_str);
                if let Err(msg) = parse_set(&tokens, &mut config) {
                    errors.push(ConfigError { line: lineno, message: msg });
                }
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// First existing config file among `$SPELLWORK_CONFIG`, the platform
    /// config directory and `./.spellworkrc`.
    pub fn find_user_config() -> Option<PathBuf> {
        let env = std::env::var_os("SPELLWORK_CONFIG").map(PathBuf::from);
        let platform = ProjectDirs::from("", "", "spellwork").map(|d| d.config_dir().join("spellworkrc"));
        let local = Some(PathBuf::from(".spellworkrc"));
        [env, platform, local].into_iter().flatten().find(|p| p.is_file())
    }

    /// Load the user's config if one exists, else the defaults.
    pub fn load_user() -> (Self, Vec<ConfigError>) {
        let Some(path) = Self::find_user_config() else {
            return (Config::new(), Vec::new());
        };
        match Self::load_file(&path) {
            Ok(loaded) => {
                log::debug!("loaded config from {}", path.display());
                loaded
            }
            Err(e) => {
                log::warn!("could not read {}: {e}", path.display());
                (Config::new(), Vec::new())
            }
        }
    }
}

// ── /set ─────────────────────────────────────────────────────────────────────

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
fn parse_set(tokens: &[String], config: &mut Config) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some(eq) = tokens[0].find('=') {
        (tokens[0][..eq].to_owned(), tokens[0][eq + 1..].to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    if name.is_empty() {
        return Err("/set: variable name cannot be empty".into());
    }

    if config.engine.apply(&name, &value)? {
        Ok(())
    } else {
        Err(format!("/set: unknown setting '{name}'"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
