//! Boot arguments, the enhancer properties file, and platform detection.

use crate::error::{BootError, ConfigError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// `[baseDirectory, propertiesFile, mainModule[/mainClass], args...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootArgs {
    pub base_dir: PathBuf,
    /// `None` when the argument was empty.
    pub properties: Option<PathBuf>,
    pub main: MainSpec,
    pub args: Vec<String>,
}

impl BootArgs {
    pub fn parse<I, S>(args: I) -> Result<Self, BootError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.len() < 3 {
            return Err(BootError::MissingArguments(args.len()));
        }
        let mut it = args.into_iter();
        let base_dir = PathBuf::from(it.next().unwrap_or_default());
        let properties = it.next().filter(|p| !p.is_empty()).map(PathBuf::from);
        let main = MainSpec::parse(&it.next().unwrap_or_default());
        Ok(Self {
            base_dir,
            properties,
            main,
            args: it.collect(),
        })
    }

    /// The properties file as given. Relative paths resolve against the
    /// working directory, not the base directory.
    pub fn properties_path(&self) -> Option<PathBuf> {
        self.properties.clone()
    }
}

/// `module[/class]`. In class-path mode the whole value is a class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainSpec {
    pub module: String,
    pub class: Option<String>,
}

impl MainSpec {
    pub fn parse(value: &str) -> Self {
        match value.split_once('/') {
            Some((module, class)) => Self {
                module: module.to_string(),
                class: Some(class.to_string()).filter(|c| !c.is_empty()),
            },
            None => Self {
                module: value.to_string(),
                class: None,
            },
        }
    }

    /// The original argument text.
    pub fn raw(&self) -> String {
        match &self.class {
            Some(c) => format!("{}/{}", self.module, c),
            None => self.module.clone(),
        }
    }
}

pub const RUNTIME_PATH: &str = "runtime.jar";
const PROXY_UTIL: &str = "proxy_vole.proxy_util";
const PROXY_GSETTINGS: &str = "proxy_vole.gsettings";
const SHUTDOWN_HOOK: &str = "shutdownHook";

// Shorter spellings accepted when the key above is missing.
const RUNTIME_PATH_ALIAS: &str = "runtime.path";
const PROXY_UTIL_ALIAS: &str = "proxy.util";
const PROXY_GSETTINGS_ALIAS: &str = "proxy.gsettings";
const SHUTDOWN_HOOK_ALIAS: &str = "shutdown.hook";

/// Key/value pairs read from a `.properties` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhancerProperties {
    values: BTreeMap<String, String>,
}

impl EnhancerProperties {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse `.properties` text: `key=value`, `key: value` or `key value`;
    /// `#` and `!` start comment lines; a trailing backslash continues the
    /// logical line; `\t`, `\n`, `\r`, `\f`, `\uXXXX` and escaped
    /// separators are decoded.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        let mut lines = text.lines().enumerate();
        while let Some((index, line)) = lines.next() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }
            let mut logical = String::from(trimmed);
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }
            let (key, value) = split_key_value(&logical);
            values.insert(unescape(key, index + 1)?, unescape(value, index + 1)?);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn runtime_path(&self) -> Option<&str> {
        self.get(RUNTIME_PATH).or_else(|| self.get(RUNTIME_PATH_ALIAS))
    }

    pub fn proxy_util(&self, arch: &str) -> Option<&str> {
        self.get_for_arch(PROXY_UTIL, PROXY_UTIL_ALIAS, arch)
    }

    pub fn proxy_gsettings(&self, arch: &str) -> Option<&str> {
        self.get_for_arch(PROXY_GSETTINGS, PROXY_GSETTINGS_ALIAS, arch)
    }

    pub fn shutdown_hook(&self, arch: &str) -> Option<&str> {
        self.get_for_arch(SHUTDOWN_HOOK, SHUTDOWN_HOOK_ALIAS, arch)
    }

    fn get_for_arch(&self, key: &str, alias: &str, arch: &str) -> Option<&str> {
        self.get(&format!("{key}.{arch}"))
            .or_else(|| self.get(&format!("{alias}.{arch}")))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str, line: usize) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or(ConfigError::Escape { line })?;
                out.push(decoded);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    MacOs,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_parts(os: &str, arch: &str) -> Self {
        let os = match os.to_ascii_lowercase().as_str() {
            o if o.contains("windows") => Os::Windows,
            o if o.contains("mac") || o == "darwin" => Os::MacOs,
            _ => Os::Other,
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "w32" | "x86" | "i686" | "i586" | "i386" => "x86",
            other => other,
        };
        Self {
            os,
            arch: arch.to_string(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }
}
