//! License policy shared by the patcher and the runtime client.
//!
//! The patcher writes a [`LicensePolicy`] into the output jar as
//! `license.properties`; the runtime reads it back on first use. The file
//! uses the Java properties format so the JVM-side client can load it with
//! `java.util.Properties`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

pub const PROPERTIES_PATH: &str = "license.properties";

pub const DEFAULT_CACHE: Duration = Duration::from_millis(3_600_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10_000);

/// What happens when the license is invalid or cannot be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureMode {
    /// Refuse the entry point and tell the host to unload the plugin.
    KickAndDisable,
    /// Refuse the entry point.
    #[default]
    DisableOnly,
    /// Run anyway; the gate records the invalid verdict for the plugin.
    LimitedMode,
    /// Network failures count as valid.
    AllowOnError,
    /// Network failures count as invalid.
    DenyOnError,
}

/// The two bytecode prologues the injector knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrologueShape {
    /// `invokestatic check; ifne L; <exit>; L:`
    EarlyReturn,
    /// `invokestatic check; pop`
    CallOnly,
}

impl FailureMode {
    pub const ALL: [FailureMode; 5] = [
        FailureMode::KickAndDisable,
        FailureMode::DisableOnly,
        FailureMode::LimitedMode,
        FailureMode::AllowOnError,
        FailureMode::DenyOnError,
    ];

    pub fn shape(self) -> PrologueShape {
        match self {
            FailureMode::LimitedMode => PrologueShape::CallOnly,
            _ => PrologueShape::EarlyReturn,
        }
    }

    /// Verdict when the authority cannot be reached.
    pub fn verdict_on_transport_error(self) -> bool {
        matches!(self, FailureMode::AllowOnError)
    }

    /// Name used in `license.properties`.
    pub fn property_name(self) -> &'static str {
        match self {
            FailureMode::KickAndDisable => "KICK_AND_DISABLE",
            FailureMode::DisableOnly => "DISABLE_ONLY",
            FailureMode::LimitedMode => "LIMITED_MODE",
            FailureMode::AllowOnError => "ALLOW_ON_ERROR",
            FailureMode::DenyOnError => "DENY_ON_ERROR",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureMode::KickAndDisable => "kick-and-disable",
            FailureMode::DisableOnly => "disable-only",
            FailureMode::LimitedMode => "limited-mode",
            FailureMode::AllowOnError => "allow-on-error",
            FailureMode::DenyOnError => "deny-on-error",
        };
        f.write_str(s)
    }
}

impl FromStr for FailureMode {
    type Err = PolicyError;

    /// Accepts `disable-only`, `DISABLE_ONLY` and anything in between.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace('-', "_");
        FailureMode::ALL
            .into_iter()
            .find(|m| m.property_name() == norm)
            .ok_or_else(|| PolicyError::UnknownMode(s.to_string()))
    }
}

/// Everything the runtime needs to validate, plus the injector's
/// return-value policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePolicy {
    pub mode: FailureMode,
    pub server_url: String,
    pub product_id: String,
    /// Empty until the plugin owner fills it in.
    pub license_key: String,
    /// Zero disables caching.
    pub cache_duration: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Allow early exits from methods returning something other than void
    /// or boolean by returning zero / null. Not written to the jar.
    #[serde(default)]
    pub approximate_defaults: bool,
}

impl LicensePolicy {
    pub fn new(server_url: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            mode: FailureMode::default(),
            server_url: server_url.into(),
            product_id: product_id.into(),
            license_key: String::new(),
            cache_duration: DEFAULT_CACHE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            approximate_defaults: false,
        }
    }

    /// Render as a `license.properties` file. Keys are written in a fixed
    /// order with no timestamp, so the output is deterministic.
    pub fn to_properties(&self) -> String {
        let mut out = String::from("#License Configuration\n");
        let entries = [
            ("server.url", self.server_url.clone()),
            ("product.id", self.product_id.clone()),
            ("license.key", self.license_key.clone()),
            ("failure.mode", self.mode.property_name().to_string()),
            ("cache.duration", self.cache_duration.as_millis().to_string()),
            ("connection.timeout", self.connect_timeout.as_millis().to_string()),
            ("read.timeout", self.read_timeout.as_millis().to_string()),
        ];
        for (key, value) in entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(&value));
            out.push('\n');
        }
        out
    }

    /// Parse a `license.properties` file. `server.url` and `product.id`
    /// are required; the rest fall back to defaults, with the failure mode
    /// defaulting to deny-on-error.
    pub fn from_properties(text: &str) -> Result<Self, PolicyError> {
        let props = parse_properties(text);
        let get = |key: &str| {
            props
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let millis = |key: &'static str, default: Duration| -> Result<Duration, PolicyError> {
            match get(key) {
                None => Ok(default),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| PolicyError::InvalidValue { key, value: v.to_string() }),
            }
        };

        let server_url = get("server.url")
            .filter(|v| !v.is_empty())
            .ok_or(PolicyError::MissingKey("server.url"))?;
        let product_id = get("product.id")
            .filter(|v| !v.is_empty())
            .ok_or(PolicyError::MissingKey("product.id"))?;
        let mode = match get("failure.mode") {
            Some(v) => v.parse()?,
            None => FailureMode::DenyOnError,
        };

        Ok(Self {
            mode,
            server_url: server_url.to_string(),
            product_id: product_id.to_string(),
            license_key: get("license.key").unwrap_or_default().to_string(),
            cache_duration: millis("cache.duration", DEFAULT_CACHE)?,
            connect_timeout: millis("connection.timeout", DEFAULT_CONNECT_TIMEOUT)?,
            read_timeout: millis("read.timeout", DEFAULT_READ_TIMEOUT)?,
            approximate_defaults: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Java properties format
// ---------------------------------------------------------------------------

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if i == 0 => out.push_str("\\ "),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Parse properties text into `(key, value)` pairs in file order.
pub fn parse_properties(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut logical = String::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continue;
        }
        logical.push_str(line);
        out.push(split_entry(&logical));
        logical.clear();
    }
    if !logical.is_empty() {
        out.push(split_entry(&logical));
    }
    out
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (String, String) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '=' | ':' | ' ' | '\t' | '\u{c}' => break,
            _ => i += 1,
        }
    }
    let key_end = i.min(chars.len());
    let mut j = key_end;
    while j < chars.len() && matches!(chars[j], ' ' | '\t' | '\u{c}') {
        j += 1;
    }
    if j < chars.len() && matches!(chars[j], '=' | ':') {
        j += 1;
        while j < chars.len() && matches!(chars[j], ' ' | '\t' | '\u{c}') {
            j += 1;
        }
    }
    let key: String = chars[..key_end].iter().collect();
    let value: String = chars[j.min(chars.len())..].iter().collect();
    (unescape(&key), unescape(&value))
}

fn unescape(s: &str) -> String {
    let mut out: Vec<u16> = Vec::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u16; 2];
            out.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t' as u16),
            Some('n') => out.push('\n' as u16),
            Some('r') => out.push('\r' as u16),
            Some('f') => out.push(0x0c),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u16::from_str_radix(&hex, 16) {
                    Ok(unit) if hex.len() == 4 => out.push(unit),
                    _ => out.extend(hex.encode_utf16()),
                }
            }
            Some(other) => {
                let mut buf = [0u16; 2];
                out.extend_from_slice(other.encode_utf16(&mut buf));
            }
            None => {}
        }
    }
    String::from_utf16_lossy(&out)
}
