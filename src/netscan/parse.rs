//! Connection-table text parsing and address classification.
//!
//! The parsers are deliberately forgiving: a short or malformed line is
//! skipped, never an error, because the surrounding enumeration is
//! best-effort by contract.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use indexmap::IndexMap;

use crate::models::UNKNOWN_PROCESS;

/// Whether a textual address is a valid, public (external) IP.
///
/// Returns `false` for anything that does not parse, and for private,
/// loopback, link-local, multicast, and reserved allocations of either
/// family.
pub fn is_external(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(addr) => is_external_addr(addr),
        Err(_) => false,
    }
}

fn is_external_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_external_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_external_v4(mapped);
            }
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || is_unique_local_v6(v6)
                || is_link_local_v6(v6)
                || is_documentation_v6(v6))
        }
    }
}

fn is_external_v4(v4: Ipv4Addr) -> bool {
    !(v4.is_unspecified()
        || v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_multicast()
        || v4.is_broadcast()
        || v4.is_documentation()
        || is_shared_v4(v4)
        || is_benchmarking_v4(v4)
        || is_reserved_v4(v4))
}

// 100.64.0.0/10, RFC 6598 carrier-grade NAT space.
fn is_shared_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    a == 100 && (b & 0b1100_0000) == 0b0100_0000
}

// 198.18.0.0/15, RFC 2544 benchmarking.
fn is_benchmarking_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    a == 198 && (b & 0xfe) == 18
}

// 240.0.0.0/4 minus the broadcast address.
fn is_reserved_v4(v4: Ipv4Addr) -> bool {
    (v4.octets()[0] & 0xf0) == 0xf0 && !v4.is_broadcast()
}

// fc00::/7
fn is_unique_local_v6(v6: Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

// fe80::/10
fn is_link_local_v6(v6: Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

// 2001:db8::/32
fn is_documentation_v6(v6: Ipv6Addr) -> bool {
    v6.segments()[0] == 0x2001 && v6.segments()[1] == 0xdb8
}

/// Extracts the address part from an `address:port` token, handling the
/// bracketed IPv6 form. Returns `None` when no port separator is present.
pub(crate) fn strip_port(token: &str) -> Option<&str> {
    if let Some(rest) = token.strip_prefix('[') {
        // "[2001:db8::1]:443" -> "2001:db8::1"
        return rest.split_once("]:").map(|(ip, _)| ip);
    }
    if !token.contains(':') {
        return None;
    }
    token.rsplit_once(':').map(|(ip, _)| ip)
}

/// Parses `ss`/`netstat` output on Unix into a map of external remote IP to
/// owning process name, in line order.
pub(crate) fn parse_socket_table(output: &str, is_ss: bool) -> IndexMap<String, String> {
    let mut connections = IndexMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("Proto")
            || line.starts_with("Netid")
            || line.starts_with("State")
            || line.starts_with("Active")
        {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }

        let (peer, process_cols): (&str, &[&str]) = if is_ss {
            // Netid Recv-Q Send-Q Local:Port Peer:Port [Process]
            // The established-state filter is applied by the command itself.
            if !matches!(parts[0], "tcp" | "udp") {
                continue;
            }
            (parts[4], parts.get(5..).unwrap_or(&[]))
        } else {
            // Proto Recv-Q Send-Q Local Foreign State [PID/Program]
            let state = if parts.len() > 5 { parts[5] } else { parts[4] };
            if !state.contains("ESTABLISHED") {
                continue;
            }
            (parts[4], parts.get(6..).unwrap_or(&[]))
        };

        let Some(ip) = strip_port(peer) else { continue };
        if !is_external(ip) {
            continue;
        }

        let process_name = if is_ss {
            process_from_ss(process_cols)
        } else {
            process_from_netstat(process_cols)
        };
        connections.insert(ip.to_string(), process_name);
    }

    connections
}

/// Parses Windows `netstat -ano` output into `(remote_ip, pid)` pairs for
/// external addresses. Process names are resolved separately per PID.
pub(crate) fn parse_windows_netstat(output: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Proto") || line.starts_with("Active") {
            continue;
        }

        // TCP local foreign state PID
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }
        let foreign = parts[2];
        let pid = parts[parts.len() - 1];

        let Some(ip) = strip_port(foreign) else {
            continue;
        };
        if !is_external(ip) {
            continue;
        }
        pairs.push((ip.to_string(), pid.to_string()));
    }

    pairs
}

// ss reports the owner as users:(("name",pid=1234,fd=5))
fn process_from_ss(cols: &[&str]) -> String {
    let joined = cols.join(" ");
    if let Some(start) = joined.find("((\"") {
        let rest = &joined[start + 3..];
        if let Some(end) = rest.find("\",") {
            return rest[..end].to_string();
        }
    }
    UNKNOWN_PROCESS.to_string()
}

// netstat reports the owner as PID/program_name
fn process_from_netstat(cols: &[&str]) -> String {
    let joined = cols.join(" ");
    match joined.rsplit_once('/') {
        Some((_, name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => UNKNOWN_PROCESS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_external_public_addresses() {
        assert!(is_external("8.8.8.8"));
        assert!(is_external("93.184.216.34"));
        assert!(is_external("2606:4700:4700::1111"));
    }

    #[test]
    fn test_is_external_rejects_special_ranges() {
        // Private / loopback / link-local / multicast / reserved
        assert!(!is_external("192.168.1.5"));
        assert!(!is_external("10.0.0.1"));
        assert!(!is_external("172.16.0.1"));
        assert!(!is_external("127.0.0.1"));
        assert!(!is_external("169.254.1.1"));
        assert!(!is_external("224.0.0.1"));
        assert!(!is_external("255.255.255.255"));
        assert!(!is_external("240.0.0.1"));
        assert!(!is_external("0.0.0.0"));
        assert!(!is_external("100.64.0.1"));
        assert!(!is_external("198.18.0.1"));
        assert!(!is_external("192.0.2.1"));
        // IPv6 equivalents
        assert!(!is_external("::1"));
        assert!(!is_external("::"));
        assert!(!is_external("fe80::1"));
        assert!(!is_external("fc00::1"));
        assert!(!is_external("fd12:3456::1"));
        assert!(!is_external("ff02::1"));
        assert!(!is_external("2001:db8::1"));
        // Mapped IPv4 follows the IPv4 rules
        assert!(!is_external("::ffff:192.168.1.1"));
        assert!(is_external("::ffff:8.8.8.8"));
    }

    #[test]
    fn test_is_external_rejects_garbage() {
        assert!(!is_external(""));
        assert!(!is_external("*"));
        assert!(!is_external("not-an-ip"));
        assert!(!is_external("999.1.1.1"));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("1.2.3.4:443"), Some("1.2.3.4"));
        assert_eq!(strip_port("[::1]:443"), Some("::1"));
        assert_eq!(strip_port("[2001:db8::1]:8080"), Some("2001:db8::1"));
        assert_eq!(strip_port("2001:db8::1:443"), Some("2001:db8::1"));
        assert_eq!(strip_port("no-port"), None);
        assert_eq!(strip_port("[unclosed:443"), None);
    }

    #[test]
    fn test_parse_ss_output() {
        // With `state established` the State column is omitted.
        let output = "\
Netid Recv-Q Send-Q Local Address:Port  Peer Address:Port  Process
tcp   0      0      192.168.1.10:55304  93.184.216.34:443  users:((\"firefox\",pid=2211,fd=88))
tcp   0      0      192.168.1.10:41000  192.168.1.1:53     users:((\"dnsmasq\",pid=88,fd=4))
udp   0      0      192.168.1.10:5353   8.8.8.8:443
";
        let map = parse_socket_table(output, true);
        assert_eq!(map.len(), 2);
        assert_eq!(map["93.184.216.34"], "firefox");
        // No process column at all falls back to Unknown
        assert_eq!(map["8.8.8.8"], "Unknown");
    }

    #[test]
    fn test_parse_netstat_output() {
        let output = "\
Active Internet connections (w/o servers)
Proto Recv-Q Send-Q Local Address      Foreign Address     State       PID/Program name
tcp        0      0 192.168.1.10:5530  93.184.216.34:443   ESTABLISHED 2211/firefox
tcp        0      0 192.168.1.10:4100  10.0.0.7:22         ESTABLISHED 99/ssh
tcp        0      0 192.168.1.10:8080  1.1.1.1:443         TIME_WAIT   -
";
        let map = parse_socket_table(output, false);
        assert_eq!(map.len(), 1);
        assert_eq!(map["93.184.216.34"], "firefox");
    }

    #[test]
    fn test_parse_windows_netstat() {
        let output = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    192.168.1.10:49723     93.184.216.34:443      ESTABLISHED     4321
  TCP    192.168.1.10:49724     192.168.1.1:139        ESTABLISHED     4
  TCP    [::1]:49725            [2606:4700::6810:85e5]:443  ESTABLISHED 777
";
        let pairs = parse_windows_netstat(output);
        assert_eq!(
            pairs,
            vec![
                ("93.184.216.34".to_string(), "4321".to_string()),
                ("2606:4700::6810:85e5".to_string(), "777".to_string()),
            ]
        );
    }

    #[test]
    fn test_short_lines_are_skipped() {
        let map = parse_socket_table("tcp ESTAB\n\ngarbage\n", true);
        assert!(map.is_empty());
    }
}
