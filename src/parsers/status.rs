//! strongSwan `ipsec statusall` output
//!
//! Security associations look like:
//!
//! ```text
//! ikev2-vpn[7]: ESTABLISHED 25 minutes ago, 203.0.113.10[vpn]...198.51.100.7[198.51.100.7]
//! ikev2-vpn[7]: Remote EAP identity: alice
//! ```
//!
//! or, with one connection per client, `alice[1]: ESTABLISHED ... ...10.0.0.5[alice]`.
//! Lines sharing the `name[N]:` prefix belong to the same association, so the
//! client name may sit on the ESTABLISHED line or on any of its detail lines.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::warn;

static UPTIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\buptime:[ \t]*([^,\r\n]*)(?:,[ \t]*since[ \t]+([^\r\n]*))?")
        .expect("uptime pattern")
});

static ESTABLISHED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bESTABLISHED\b(?:[ \t]+([^,\r\n]+?)[ \t]+ago)?").expect("established pattern")
});

static SA_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^\s\[\]{}:]+\[\d+\]):").expect("sa prefix pattern"));

static REMOTE_IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\.\.(\d{1,3}(?:\.\d{1,3}){3})\b").expect("remote ip pattern"));

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})\b").expect("ipv4 pattern"));

/// Daemon uptime as printed by the status command
#[derive(Debug, Clone, PartialEq)]
pub struct Uptime {
    /// e.g. "3 hours"
    pub duration: String,
    /// e.g. "Oct 17 06:12:41 2026"
    pub since: Option<String>,
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.since {
            Some(since) => write!(f, "Server uptime: {} since {}.", self.duration, since),
            None => write!(f, "Server uptime: {}.", self.duration),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientState {
    Connected {
        ip: Ipv4Addr,
        /// e.g. "25 minutes"
        age: Option<String>,
    },
    NotConnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub name: String,
    pub state: ClientState,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            ClientState::Connected { ip, age: Some(age) } => {
                write!(f, "Client {} connected {} ago.\nIP-address: {}", self.name, age, ip)
            }
            ClientState::Connected { ip, age: None } => {
                write!(f, "Client {} connected.\nIP-address: {}", self.name, ip)
            }
            ClientState::NotConnected => write!(f, "Client {} is not connected.", self.name),
        }
    }
}

/// Parsed status output. `uptime == None` means the uptime field was missing.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub uptime: Option<Uptime>,
    /// One entry per expected client, in the order given
    pub clients: Vec<ClientStatus>,
}

/// One ESTABLISHED security association
struct Association<'a> {
    /// The ESTABLISHED line
    head: &'a str,
    /// All lines with the same SA prefix (just `head` when unprefixed)
    lines: Vec<&'a str>,
}

impl<'a> Association<'a> {
    fn mentions(&self, client: &Regex) -> bool {
        self.lines.iter().any(|line| client.is_match(line))
    }

    fn age(&self) -> Option<String> {
        ESTABLISHED_RE
            .captures(self.head)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Remote endpoint: `...IP` on the head line, else the last IPv4 after
    /// ESTABLISHED, else the first IPv4 anywhere in the association.
    fn remote_ip(&self) -> Option<Ipv4Addr> {
        let tail = ESTABLISHED_RE
            .find(self.head)
            .map(|m| &self.head[m.end()..])
            .unwrap_or(self.head);

        let remote = REMOTE_IP_RE
            .captures_iter(tail)
            .filter_map(|c| c[1].parse::<Ipv4Addr>().ok())
            .next();
        if remote.is_some() {
            return remote;
        }

        let last_on_head = IPV4_RE
            .captures_iter(tail)
            .filter_map(|c| c[1].parse::<Ipv4Addr>().ok())
            .last();
        if last_on_head.is_some() {
            return last_on_head;
        }

        self.lines
            .iter()
            .flat_map(|line| IPV4_RE.captures_iter(line))
            .filter_map(|c| c[1].parse::<Ipv4Addr>().ok())
            .next()
    }
}

fn sa_prefix(line: &str) -> Option<&str> {
    SA_PREFIX_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn associations(text: &str) -> Vec<Association<'_>> {
    let lines: Vec<&str> = text.lines().collect();

    lines
        .iter()
        .copied()
        .filter(|line| ESTABLISHED_RE.is_match(line))
        .map(|head| {
            let group = match sa_prefix(head) {
                Some(prefix) => lines
                    .iter()
                    .copied()
                    .filter(|l| sa_prefix(l) == Some(prefix))
                    .collect(),
                None => vec![head],
            };
            Association { head, lines: group }
        })
        .collect()
}

/// Extract the uptime field
pub fn parse_uptime(text: &str) -> Option<Uptime> {
    let caps = UPTIME_RE.captures(text)?;
    let duration = caps.get(1)?.as_str().trim();
    if duration.is_empty() {
        return None;
    }
    let since = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    Some(Uptime {
        duration: duration.to_string(),
        since,
    })
}

/// Parse the status output for uptime and the state of each expected client
pub fn parse_status(text: &str, clients: &[String]) -> StatusReport {
    let uptime = parse_uptime(text);
    let associations = associations(text);

    let clients = clients
        .iter()
        .map(|name| ClientStatus {
            name: name.clone(),
            state: client_state(name, &associations),
        })
        .collect();

    StatusReport { uptime, clients }
}

fn client_state(name: &str, associations: &[Association<'_>]) -> ClientState {
    let name = name.trim();
    if name.is_empty() {
        return ClientState::NotConnected;
    }

    let pattern = match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))) {
        Ok(re) => re,
        Err(e) => {
            warn!("Cannot match client {:?}: {}", name, e);
            return ClientState::NotConnected;
        }
    };

    associations
        .iter()
        .filter(|sa| sa.mentions(&pattern))
        .find_map(|sa| {
            sa.remote_ip().map(|ip| ClientState::Connected { ip, age: sa.age() })
        })
        .unwrap_or(ClientState::NotConnected)
}
