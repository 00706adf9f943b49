//! Route-mask matching and neighbour selection.
//!
//! Each configured neighbour carries a space separated mask string. Tokens are one of
//! `*`, a full address, `zone:*` or `zone:net/*`, optionally prefixed with `!`. Tokens are
//! evaluated left to right and the last token that matches decides the outcome, so
//! `1:* !1:2/3` routes all of zone 1 except `1:2/3`.

use log::{debug, warn};

use super::address::{parse_address, FidoAddress};

/// One entry of the neighbour table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub neighbor: FidoAddress,
    pub routes: String,
}

impl RouteEntry {
    pub fn new(neighbor: FidoAddress, routes: impl Into<String>) -> Self {
        Self { neighbor, routes: routes.into() }
    }
}

/// Result of matching one token against an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenMatch {
    Include,
    Exclude,
    NoMatch,
}

fn match_token(token: &str, dest: &FidoAddress) -> TokenMatch {
    let (negated, body) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let hit = match body {
        "*" => true,
        _ if body.ends_with("/*") => {
            let prefix = &body[..body.len() - 2];
            match prefix.split_once(':') {
                Some((zone, net)) => match (zone.parse::<u16>(), net.parse::<u16>()) {
                    (Ok(z), Ok(n)) => z == dest.zone() && n == dest.net(),
                    _ => {
                        warn!("Malformed route token '{}'", token);
                        false
                    }
                },
                None => {
                    warn!("Malformed route token '{}'", token);
                    false
                }
            }
        }
        _ if body.ends_with(":*") => match body[..body.len() - 2].parse::<u16>() {
            Ok(z) => z == dest.zone(),
            Err(_) => {
                warn!("Malformed route token '{}'", token);
                false
            }
        },
        _ => match parse_address(body) {
            Ok(a) => a == *dest,
            Err(e) => {
                warn!("Malformed route token '{}': {}", token, e);
                false
            }
        },
    };
    match (hit, negated) {
        (false, _) => TokenMatch::NoMatch,
        (true, false) => TokenMatch::Include,
        (true, true) => TokenMatch::Exclude,
    }
}

/// Returns true when `mask` routes `dest`. The last matching token wins.
pub fn matches_mask(mask: &str, dest: &FidoAddress) -> bool {
    let mut result = false;
    for token in mask.split_whitespace() {
        match match_token(token, dest) {
            TokenMatch::Include => result = true,
            TokenMatch::Exclude => result = false,
            TokenMatch::NoMatch => {}
        }
    }
    result
}

/// Pick the neighbour a message for `dest` must be handed to.
///
/// A destination that is itself a neighbour is routed directly; otherwise the first entry
/// (in table order) whose mask matches wins. `None` leaves the fallback to the caller.
pub fn find_route(dest: &FidoAddress, table: &[RouteEntry]) -> Option<FidoAddress> {
    if let Some(direct) = table.iter().find(|e| e.neighbor == *dest) {
        debug!("{} is a direct neighbour", dest);
        return Some(direct.neighbor.clone());
    }
    let found = table
        .iter()
        .find(|e| matches_mask(&e.routes, dest))
        .map(|e| e.neighbor.clone());
    match &found {
        Some(via) => debug!("Routing {} via {}", dest, via),
        None => debug!("No route found for {}", dest),
    }
    found
}
