//! Host list parsing.
//!
//! One entry per line: `[user@]host[:port]`. IPv6 literals take a port only
//! in brackets (`[fe80::1%eth0]:22`); a bare literal such as `2001:db8::10`
//! is a host with no port.
//! Blank lines and `#` comments are skipped. Duplicates collapse onto the
//! first occurrence, so every returned entry is a distinct host identity.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::FanoutError;

/// Compiled once; the pattern is a valid literal so init cannot fail at runtime.
static ENTRY_RE: OnceLock<Regex> = OnceLock::new();

/// An IPv6 literal: at least two colons, optional `%zone` suffix.
const IPV6: &str = r"[0-9A-Fa-f.]*:[0-9A-Fa-f.]*:[0-9A-Fa-f:.]*(?:%[A-Za-z0-9]+)?";

fn entry_re() -> &'static Regex {
    ENTRY_RE.get_or_init(|| {
        let pattern = format!(
            r"^(?:(?P<user>[A-Za-z0-9._-]+)@)?(?:(?P<bare6>{IPV6})|(?:\[(?P<v6>{IPV6})\]|(?P<host>[A-Za-z0-9_][A-Za-z0-9._-]*))(?::(?P<port>\d{{1,5}}))?)$"
        );
        Regex::new(&pattern).expect("valid literal regex")
    })
}

/// A parsed host entry: where to connect and any per-host overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub user: Option<String>,
    /// Hostname or address, without IPv6 brackets.
    pub host: String,
    pub port: Option<u16>,
}

impl HostTarget {
    /// Parse one `[user@]host[:port]` entry. Returns `None` when malformed
    /// or when the port is outside 1–65535.
    pub fn parse(entry: &str) -> Option<Self> {
        let caps = entry_re().captures(entry)?;
        let host = caps
            .name("host")
            .or_else(|| caps.name("v6"))
            .or_else(|| caps.name("bare6"))
            .map(|m| m.as_str().to_owned())?;
        let port = match caps.name("port") {
            Some(m) => match m.as_str().parse::<u16>() {
                Ok(p) if p > 0 => Some(p),
                _ => return None,
            },
            None => None,
        };
        Some(Self {
            user: caps.name("user").map(|m| m.as_str().to_owned()),
            host,
            port,
        })
    }
}

/// Read and parse the hosts file at `path`.
pub fn load_hosts(path: &Path) -> Result<Vec<String>, FanoutError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FanoutError::HostsFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            FanoutError::HostsFileReadFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        }
    })?;

    parse_hosts(&content, path)
}

/// Parse hosts file content. `path` is only used in error messages.
pub fn parse_hosts(content: &str, path: &Path) -> Result<Vec<String>, FanoutError> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let entry = raw.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if HostTarget::parse(entry).is_none() {
            return Err(FanoutError::InvalidHostEntry {
                path: path.to_path_buf(),
                line: i + 1,
                entry: entry.to_owned(),
            });
        }
        if seen.insert(entry.to_owned()) {
            hosts.push(entry.to_owned());
        } else {
            tracing::debug!(host = entry, line = i + 1, "skipping duplicate host entry");
        }
    }

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Vec<String>, FanoutError> {
        parse_hosts(content, Path::new("hosts.txt"))
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let hosts = parse("web-1\n\n# staging\n  web-2  \n\t\n#db-1\n").unwrap();
        assert_eq!(hosts, vec!["web-1", "web-2"]);
    }

    #[test]
    fn handles_crlf() {
        let hosts = parse("a\r\nb\r\n").unwrap();
        assert_eq!(hosts, vec!["a", "b"]);
    }

    #[test]
    fn collapses_duplicates_keeping_first_position() {
        let hosts = parse("b\na\nb\nc\na\n").unwrap();
        assert_eq!(hosts, vec!["b", "a", "c"]);
    }

    #[test]
    fn empty_file_is_valid() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("# nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_entry_with_line_number() {
        let err = parse("ok-host\nbad host\n").unwrap_err();
        match err {
            FanoutError::InvalidHostEntry { line, entry, .. } => {
                assert_eq!(line, 2);
                assert_eq!(entry, "bad host");
            }
            other => panic!("expected InvalidHostEntry, got {other:?}"),
        }
    }

    #[test]
    fn parses_plain_host() {
        let t = HostTarget::parse("10.0.0.5").unwrap();
        assert_eq!(t.host, "10.0.0.5");
        assert_eq!(t.user, None);
        assert_eq!(t.port, None);
    }

    #[test]
    fn parses_user_and_port_overrides() {
        let t = HostTarget::parse("deploy@web-1.example.com:2222").unwrap();
        assert_eq!(t.user.as_deref(), Some("deploy"));
        assert_eq!(t.host, "web-1.example.com");
        assert_eq!(t.port, Some(2222));
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let t = HostTarget::parse("root@[fe80::1]:22").unwrap();
        assert_eq!(t.host, "fe80::1");
        assert_eq!(t.port, Some(22));
        assert_eq!(t.user.as_deref(), Some("root"));

        assert_eq!(HostTarget::parse("[::1]").unwrap().host, "::1");
    }

    #[test]
    fn parses_bare_ipv6_without_port() {
        let t = HostTarget::parse("2001:db8::10").unwrap();
        assert_eq!(t.host, "2001:db8::10");
        assert_eq!(t.port, None);

        let t = HostTarget::parse("admin@fe80::1").unwrap();
        assert_eq!(t.user.as_deref(), Some("admin"));
        assert_eq!(t.host, "fe80::1");
        assert_eq!(t.port, None);

        assert_eq!(HostTarget::parse("::1").unwrap().host, "::1");
        assert_eq!(HostTarget::parse("::ffff:10.0.0.1").unwrap().host, "::ffff:10.0.0.1");
    }

    #[test]
    fn single_colon_is_still_a_port() {
        let t = HostTarget::parse("web-1:2222").unwrap();
        assert_eq!(t.host, "web-1");
        assert_eq!(t.port, Some(2222));
    }

    #[test]
    fn parses_ipv6_zone_ids() {
        let t = HostTarget::parse("[fe80::1%eth0]:2222").unwrap();
        assert_eq!(t.host, "fe80::1%eth0");
        assert_eq!(t.port, Some(2222));

        assert_eq!(HostTarget::parse("fe80::1%en0").unwrap().host, "fe80::1%en0");
        assert!(HostTarget::parse("fe80::1%").is_none());
        assert!(HostTarget::parse("fe80::1%eth0;id").is_none());
    }

    #[test]
    fn host_list_accepts_ipv6_literals() {
        let hosts = parse("web-1\nfe80::1\n2001:db8::10\n[fe80::2%eth0]:22\n").unwrap();
        assert_eq!(hosts, vec!["web-1", "fe80::1", "2001:db8::10", "[fe80::2%eth0]:22"]);
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(HostTarget::parse("h:0").is_none());
        assert!(HostTarget::parse("h:70000").is_none());
        assert!(HostTarget::parse("h:65535").is_some());
    }

    #[test]
    fn rejects_leading_dash() {
        assert!(HostTarget::parse("-oProxyCommand=sh").is_none());
        assert!(HostTarget::parse("-v").is_none());
        assert!(HostTarget::parse("web-1").is_some());
    }

    #[test]
    fn load_hosts_reports_missing_file() {
        let err = load_hosts(Path::new("/nonexistent/hosts.txt")).unwrap_err();
        assert!(matches!(err, FanoutError::HostsFileNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn load_hosts_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        assert_eq!(load_hosts(&path).unwrap(), vec!["a", "b"]);
    }
}
