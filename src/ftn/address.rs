//! FTN network addresses (`zone:net/node.point@domain`).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Errors produced while parsing an FTN address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address '{0}' is missing the zone separator ':'")]
    MissingZone(String),

    #[error("address '{0}' is missing the net separator '/'")]
    MissingNet(String),

    #[error("address '{text}' has an invalid {part} component")]
    InvalidNumber { text: String, part: &'static str },
}

/// A 4D FTN address plus an optional domain name.
///
/// Equality, ordering and hashing only consider the `(zone, net, node, point)` tuple; the
/// domain is carried for display only.
#[derive(Debug, Clone)]
pub struct FidoAddress {
    zone: u16,
    net: u16,
    node: u16,
    point: u16,
    domain: Option<String>,
}

impl FidoAddress {
    pub fn new(zone: u16, net: u16, node: u16, point: u16) -> Self {
        Self { zone, net, node, point, domain: None }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        let d = domain.into();
        self.domain = if d.is_empty() { None } else { Some(d) };
        self
    }

    pub fn zone(&self) -> u16 { self.zone }
    pub fn net(&self) -> u16 { self.net }
    pub fn node(&self) -> u16 { self.node }
    pub fn point(&self) -> u16 { self.point }
    pub fn domain(&self) -> Option<&str> { self.domain.as_deref() }

    fn tuple(&self) -> (u16, u16, u16, u16) {
        (self.zone, self.net, self.node, self.point)
    }

    /// `zone:net/node`, as used on origin, INTL and MSGID lines.
    pub fn zone_net_node(&self) -> String {
        format!("{}:{}/{}", self.zone, self.net, self.node)
    }

    /// `net/node`, as used on SEEN-BY lines.
    pub fn net_node(&self) -> String {
        format!("{}/{}", self.net, self.node)
    }

    /// The address without its domain, with the point only when non-zero.
    pub fn as_4d_string(&self) -> String {
        if self.point == 0 {
            self.zone_net_node()
        } else {
            format!("{}.{}", self.zone_net_node(), self.point)
        }
    }
}

impl PartialEq for FidoAddress {
    fn eq(&self, other: &Self) -> bool {
        self.tuple() == other.tuple()
    }
}

impl Eq for FidoAddress {}

impl Hash for FidoAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tuple().hash(state);
    }
}

impl PartialOrd for FidoAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FidoAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tuple().cmp(&other.tuple())
    }
}

impl fmt::Display for FidoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_4d_string())?;
        if let Some(d) = &self.domain {
            write!(f, "@{}", d)?;
        }
        Ok(())
    }
}

fn parse_part(text: &str, value: &str, part: &'static str) -> Result<u16, AddressError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidNumber { text: text.to_string(), part })
}

/// Parse `zone:net/node[.point][@domain]`.
pub fn parse_address(text: &str) -> Result<FidoAddress, AddressError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }
    let (addr, domain) = match trimmed.split_once('@') {
        Some((a, d)) => (a, Some(d.trim())),
        None => (trimmed, None),
    };
    let (zone, rest) = addr
        .split_once(':')
        .ok_or_else(|| AddressError::MissingZone(trimmed.to_string()))?;
    let (net, rest) = rest
        .split_once('/')
        .ok_or_else(|| AddressError::MissingNet(trimmed.to_string()))?;
    let (node, point) = match rest.split_once('.') {
        Some((n, p)) => (n, Some(p)),
        None => (rest, None),
    };
    let mut address = FidoAddress::new(
        parse_part(trimmed, zone, "zone")?,
        parse_part(trimmed, net, "net")?,
        parse_part(trimmed, node, "node")?,
        match point {
            Some(p) => parse_part(trimmed, p, "point")?,
            None => 0,
        },
    );
    if let Some(d) = domain {
        address = address.with_domain(d);
    }
    Ok(address)
}

impl FromStr for FidoAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}

/// Address carried on the ` * Origin:` line of a message body: the last parenthesised
/// address on that line.
pub fn address_from_origin_line(text: &str) -> Option<FidoAddress> {
    text.split(['\r', '\n'])
        .filter(|line| line.starts_with(" * Origin:"))
        .last()
        .and_then(last_parenthesised_address)
}

/// Address embedded in a local "to" field such as `JOHN DOE (1:2/3)`.
///
/// Falls back to the first whitespace separated token that parses as an address.
pub fn address_from_line(line: &str) -> Option<FidoAddress> {
    if let Some(a) = last_parenthesised_address(line) {
        return Some(a);
    }
    line.split_whitespace()
        .find_map(|token| parse_address(token.trim_matches(|c| c == '@' || c == ',')).ok())
}

fn last_parenthesised_address(line: &str) -> Option<FidoAddress> {
    let open = line.rfind('(')?;
    let close = open + line[open..].find(')')?;
    parse_address(&line[open + 1..close]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_short_forms() {
        let a = parse_address("1:218/700.5@fidonet").unwrap();
        assert_eq!((a.zone(), a.net(), a.node(), a.point()), (1, 218, 700, 5));
        assert_eq!(a.domain(), Some("fidonet"));
        assert_eq!(a.to_string(), "1:218/700.5@fidonet");

        let b: FidoAddress = "21:2/100".parse().unwrap();
        assert_eq!(b.point(), 0);
        assert_eq!(b.to_string(), "21:2/100");
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert_eq!(parse_address(""), Err(AddressError::Empty));
        assert!(matches!(parse_address("218/700"), Err(AddressError::MissingZone(_))));
        assert!(matches!(parse_address("1:218"), Err(AddressError::MissingNet(_))));
        assert!(matches!(
            parse_address("1:2x/3"),
            Err(AddressError::InvalidNumber { part: "net", .. })
        ));
        assert!(parse_address("1:2/*").is_err());
    }

    #[test]
    fn equality_ignores_domain() {
        let a = parse_address("1:2/3@fidonet").unwrap();
        let b = parse_address("1:2/3").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, parse_address("1:2/3.1").unwrap());
    }

    #[test]
    fn finds_origin_address() {
        let text = "Hello\r--- ftngate\r * Origin: My BBS (telnet 1:2/3) (1:218/700)\r";
        assert_eq!(
            address_from_origin_line(text),
            Some(FidoAddress::new(1, 218, 700, 0))
        );
        assert_eq!(address_from_origin_line("no origin here"), None);
    }

    #[test]
    fn finds_address_in_to_line() {
        assert_eq!(
            address_from_line("JOHN DOE (1:2/3)"),
            Some(FidoAddress::new(1, 2, 3, 0))
        );
        assert_eq!(
            address_from_line("sysop @21:1/100.2"),
            Some(FidoAddress::new(21, 1, 100, 2))
        );
        assert_eq!(address_from_line("JOHN DOE"), None);
    }
}
