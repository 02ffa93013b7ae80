//! Proxy selection.
//!
//! `SystemProxySelector` is installed in front of the host's default
//! selector. It asks a `ProxySearch` once, at construction, which selector
//! describes the system's proxy settings, and answers `[Direct]` when the
//! search found nothing.

use core::fmt;
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    Direct,
    Http { host: String, port: u16 },
    Socks { host: String, port: u16 },
}

pub trait ProxySelector: Send + Sync {
    /// Proxies to try for `uri`, in order.
    fn select(&self, uri: &Url) -> Vec<Proxy>;
    fn connect_failed(&self, uri: &Url, proxy: &Proxy, error: &io::Error);
}

/// The host's selector: always direct.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProxySelector;

impl ProxySelector for DefaultProxySelector {
    fn select(&self, _uri: &Url) -> Vec<Proxy> {
        vec![Proxy::Direct]
    }
    fn connect_failed(&self, _uri: &Url, _proxy: &Proxy, _error: &io::Error) {}
}

/// Selector built from the conventional `*_proxy` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvProxySelector {
    http: Option<Proxy>,
    https: Option<Proxy>,
    all: Option<Proxy>,
    no_proxy: Vec<String>,
}

fn parse_proxy(value: &str) -> Option<Proxy> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let url = if value.contains("://") {
        Url::parse(value).ok()?
    } else {
        Url::parse(&format!("http://{value}")).ok()?
    };
    let host = url.host_str()?.to_string();
    match url.scheme() {
        "socks" | "socks4" | "socks5" | "socks5h" => Some(Proxy::Socks {
            host,
            port: url.port().unwrap_or(1080),
        }),
        "http" | "https" => Some(Proxy::Http {
            host,
            port: url.port_or_known_default().unwrap_or(80),
        }),
        other => {
            trace!(scheme = other, "unsupported proxy scheme");
            None
        }
    }
}

impl EnvProxySelector {
    /// `None` when no proxy variable is set.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Option<Self> {
        let var = |name: &str| lookup(name).or_else(|| lookup(&name.to_ascii_uppercase()));
        let selector = Self {
            http: var("http_proxy").as_deref().and_then(parse_proxy),
            https: var("https_proxy").as_deref().and_then(parse_proxy),
            all: var("all_proxy").as_deref().and_then(parse_proxy),
            no_proxy: var("no_proxy")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };
        if selector.http.is_none() && selector.https.is_none() && selector.all.is_none() {
            return None;
        }
        Some(selector)
    }

    fn bypass(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.no_proxy.iter().any(|rule| {
            if rule == "*" {
                return true;
            }
            let rule = rule.trim_start_matches('.');
            host == rule || host.ends_with(&format!(".{rule}"))
        })
    }
}

impl ProxySelector for EnvProxySelector {
    fn select(&self, uri: &Url) -> Vec<Proxy> {
        if uri.host_str().map(|h| self.bypass(h)).unwrap_or(false) {
            return vec![Proxy::Direct];
        }
        let specific = match uri.scheme() {
            "https" => self.https.as_ref(),
            "http" => self.http.as_ref(),
            _ => None,
        };
        match specific.or(self.all.as_ref()) {
            Some(p) => vec![p.clone()],
            None => vec![Proxy::Direct],
        }
    }
    fn connect_failed(&self, uri: &Url, proxy: &Proxy, error: &io::Error) {
        debug!(%uri, ?proxy, %error, "proxy connection failed");
    }
}

pub enum Strategy {
    Env,
    Fixed(Arc<dyn ProxySelector>),
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Env => f.write_str("Env"),
            Strategy::Fixed(_) => f.write_str("Fixed"),
        }
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Ordered list of strategies; the first one that yields a selector wins.
pub struct ProxySearch {
    strategies: Vec<Strategy>,
    lookup: Lookup,
}

impl Default for ProxySearch {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySearch {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Read variables through `lookup` instead of the process environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            strategies: Vec::new(),
            lookup: Box::new(lookup),
        }
    }

    pub fn add_strategy(&mut self, strategy: Strategy) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    pub fn proxy_selector(&self) -> Option<Arc<dyn ProxySelector>> {
        for strategy in &self.strategies {
            let found: Option<Arc<dyn ProxySelector>> = match strategy {
                Strategy::Env => EnvProxySelector::from_lookup(&*self.lookup)
                    .map(|s| Arc::new(s) as Arc<dyn ProxySelector>),
                Strategy::Fixed(s) => Some(s.clone()),
            };
            if found.is_some() {
                debug!(?strategy, "proxy search found a selector");
                return found;
            }
            trace!(?strategy, "proxy strategy found nothing");
        }
        None
    }
}

/// Selector installed by the enhancer.
pub struct SystemProxySelector {
    found: Option<Arc<dyn ProxySelector>>,
    next: RwLock<Option<Arc<dyn ProxySelector>>>,
}

impl SystemProxySelector {
    pub fn new(search: &ProxySearch) -> Self {
        Self {
            found: search.proxy_selector(),
            next: RwLock::new(None),
        }
    }

    /// The search the enhancer uses: environment variables only.
    pub fn system() -> Self {
        let mut search = ProxySearch::new();
        search.add_strategy(Strategy::Env);
        Self::new(&search)
    }

    pub fn has_system_proxy(&self) -> bool {
        self.found.is_some()
    }

    /// The selector this one replaced.
    pub fn next_handler(&self) -> Option<Arc<dyn ProxySelector>> {
        self.next.read().clone()
    }

    pub fn set_next_handler(&self, next: Option<Arc<dyn ProxySelector>>) {
        *self.next.write() = next;
    }
}

impl ProxySelector for SystemProxySelector {
    fn select(&self, uri: &Url) -> Vec<Proxy> {
        match &self.found {
            Some(s) => s.select(uri),
            None => vec![Proxy::Direct],
        }
    }
    fn connect_failed(&self, uri: &Url, proxy: &Proxy, error: &io::Error) {
        if let Some(s) = &self.found {
            s.connect_failed(uri, proxy, error);
        }
    }
}
