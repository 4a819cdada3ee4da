//! Routing index
//!
//! Read-mostly three-level lookup built once per supervisor run:
//! port → source-ip (0 = any) → path, where literal paths live in a multimap
//! and wildcard paths are precompiled to anchored regexes. Building the index
//! also yields the worker plan: which UDP listeners and senders must exist.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use regex_lite::Regex;
use tracing::debug;

use patchbay_core::status::StatusId;
use patchbay_core::types::{Protocol, Route, RouteDestination};
use patchbay_core::Addr;

use crate::nic::Nic;

/// One destination plus the state ids its traffic lights up.
#[derive(Debug, Clone)]
pub(crate) struct RouteDst {
    pub dst: RouteDestination,
    pub src_state_id: Option<StatusId>,
    pub dst_state_id: Option<StatusId>,
}

#[derive(Debug)]
pub(crate) struct WildcardRoutes {
    pub path: String,
    pub pattern: Regex,
    pub dsts: Vec<RouteDst>,
}

#[derive(Debug, Default)]
pub(crate) struct PathRoutes {
    pub literal: HashMap<String, Vec<RouteDst>>,
    pub wildcard: Vec<WildcardRoutes>,
}

impl PathRoutes {
    /// Collect destinations for one (is_osc, path) pair, mirroring the
    /// matching rules: exact path, then wildcards, then the no-path bucket
    /// which matches everything including non-OSC packets.
    fn collect<'a>(&'a self, is_osc: bool, path: &str, out: &mut Vec<&'a RouteDst>) {
        if is_osc && !path.is_empty() {
            if let Some(dsts) = self.literal.get(path) {
                out.extend(dsts.iter());
            }
            for wild in &self.wildcard {
                if wild.pattern.is_match(path) {
                    out.extend(wild.dsts.iter());
                }
            }
        }

        if let Some(dsts) = self.literal.get("") {
            out.extend(dsts.iter());
        }
    }
}

/// The immutable routing table. Only the supervisor/dispatcher reads it.
#[derive(Debug, Default)]
pub(crate) struct RoutingIndex {
    by_port: HashMap<u16, HashMap<u32, PathRoutes>>,
}

impl RoutingIndex {
    /// Collect every destination matching a packet received on `port` from
    /// `src_ip`: entries keyed to that source ip plus the any-source entries.
    pub fn collect<'a>(
        &'a self,
        port: u16,
        src_ip: u32,
        is_osc: bool,
        path: &str,
        out: &mut Vec<&'a RouteDst>,
    ) {
        let Some(by_ip) = self.by_port.get(&port) else {
            return;
        };
        if let Some(routes) = by_ip.get(&src_ip) {
            routes.collect(is_osc, path, out);
        }
        if src_ip != 0 {
            if let Some(routes) = by_ip.get(&0) {
                routes.collect(is_osc, path, out);
            }
        }
    }
}

/// A UDP listener the supervisor must run.
#[derive(Debug)]
pub(crate) struct ListenerSpec {
    pub addr: Addr,
    pub multicast_ip: String,
    pub protocol: Protocol,
    pub state_id: Option<StatusId>,
}

/// A UDP sender the supervisor must run.
#[derive(Debug)]
pub(crate) struct SenderSpec {
    pub addr: Addr,
    pub state_id: Option<StatusId>,
}

#[derive(Debug, Default)]
pub(crate) struct IndexBuild {
    pub index: RoutingIndex,
    pub listeners: Vec<ListenerSpec>,
    pub senders: Vec<SenderSpec>,
}

/// Build the index and worker plan from the route set.
///
/// Routes without a source port are dropped; duplicate (src, dst) pairs keep
/// the first occurrence; a zero destination port inherits the source port.
/// Destinations addressed at a configured TCP client never get a UDP sender.
pub(crate) fn build(
    routes: &[Route],
    tcp_client_addrs: &BTreeSet<Addr>,
    nics: &[Nic],
) -> IndexBuild {
    let mut build = IndexBuild::default();
    let mut seen: Vec<&Route> = Vec::new();

    for route in routes {
        if route.src.addr.port == 0 {
            debug!(label = %route.label, "dropping route with no source port");
            continue;
        }
        if seen
            .iter()
            .any(|r| r.src == route.src && r.dst == route.dst)
        {
            debug!(label = %route.label, "dropping duplicate route");
            continue;
        }
        seen.push(route);

        plan_listeners(route, nics, &mut build.listeners);

        let mut dst = route.dst.clone();
        if dst.addr.port == 0 {
            dst.addr.port = route.src.addr.port;
        }

        if !dst.addr.ip.is_empty() && !tcp_client_addrs.contains(&dst.addr) {
            let exists = build.senders.iter().any(|s| s.addr == dst.addr);
            if !exists {
                build.senders.push(SenderSpec {
                    addr: dst.addr.clone(),
                    state_id: route.dst_state_id,
                });
            }
        }

        insert(&mut build.index, route, dst);
    }

    build
}

/// Ensure a listener exists on every interface the route's source reaches:
/// all of them for an unspecified source, otherwise the interfaces whose
/// address or subnet matches.
fn plan_listeners(route: &Route, nics: &[Nic], listeners: &mut Vec<ListenerSpec>) {
    let src_ip: Option<Ipv4Addr> = route.src.addr.ip.parse().ok();

    for nic in nics {
        let matches = route.src.addr.ip.is_empty()
            || src_ip == Some(nic.ip)
            || src_ip.map(|ip| nic.contains(ip)).unwrap_or(false);
        if !matches {
            continue;
        }

        let addr = Addr::new(&nic.ip.to_string(), route.src.addr.port);
        if listeners.iter().any(|l| l.addr == addr) {
            continue;
        }
        listeners.push(ListenerSpec {
            addr,
            multicast_ip: route.src.multicast_ip.clone(),
            protocol: route.src.protocol,
            state_id: route.src_state_id,
        });
    }
}

fn insert(index: &mut RoutingIndex, route: &Route, dst: RouteDestination) {
    let by_ip = index.by_port.entry(route.src.addr.port).or_default();
    let path_routes = by_ip.entry(route.src.addr.ip_u32()).or_default();

    let route_dst = RouteDst {
        dst,
        src_state_id: route.src_state_id,
        dst_state_id: route.dst_state_id,
    };

    if route.src.path.contains('*') {
        if let Some(wild) = path_routes
            .wildcard
            .iter_mut()
            .find(|w| w.path == route.src.path)
        {
            wild.dsts.push(route_dst);
            return;
        }
        match compile_wildcard(&route.src.path) {
            Some(pattern) => path_routes.wildcard.push(WildcardRoutes {
                path: route.src.path.clone(),
                pattern,
                dsts: vec![route_dst],
            }),
            None => debug!(path = %route.src.path, "unusable wildcard path"),
        }
    } else {
        path_routes
            .literal
            .entry(route.src.path.clone())
            .or_default()
            .push(route_dst);
    }
}

/// Compile a `*` glob into an anchored regex. `*` matches any run of
/// characters, `/` included; everything else is literal.
fn compile_wildcard(glob: &str) -> Option<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            c if "\\.+?()[]{}|^$".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_core::types::RouteSource;

    fn route(src_ip: &str, src_port: u16, src_path: &str, dst_ip: &str, dst_port: u16) -> Route {
        Route {
            label: "test".into(),
            src: RouteSource {
                addr: Addr::new(src_ip, src_port),
                path: src_path.into(),
                ..Default::default()
            },
            dst: RouteDestination {
                addr: Addr::new(dst_ip, dst_port),
                ..Default::default()
            },
            src_state_id: None,
            dst_state_id: None,
        }
    }

    fn loopback_nics() -> Vec<Nic> {
        vec![Nic {
            ip: Ipv4Addr::new(127, 0, 0, 1),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        }]
    }

    fn collect_paths(index: &RoutingIndex, port: u16, src_ip: u32, path: &str) -> usize {
        let mut out = Vec::new();
        index.collect(port, src_ip, true, path, &mut out);
        out.len()
    }

    #[test]
    fn drops_portless_and_duplicate_routes() {
        let routes = vec![
            route("", 0, "/a", "10.0.0.1", 9000),
            route("", 8000, "/a", "10.0.0.1", 9000),
            route("", 8000, "/a", "10.0.0.1", 9000),
        ];
        let build = build(&routes, &BTreeSet::new(), &loopback_nics());
        assert_eq!(collect_paths(&build.index, 8000, 0, "/a"), 1);
        assert_eq!(build.senders.len(), 1);
    }

    #[test]
    fn inherits_source_port() {
        let routes = vec![route("", 8000, "", "10.0.0.1", 0)];
        let build = build(&routes, &BTreeSet::new(), &loopback_nics());
        assert_eq!(build.senders[0].addr, Addr::new("10.0.0.1", 8000));
    }

    #[test]
    fn wildcard_and_exact_matching() {
        let routes = vec![
            route("", 8000, "/eos/out/event/*", "10.0.0.1", 9000),
            route("", 8000, "/exact", "10.0.0.2", 9000),
        ];
        let build = build(&routes, &BTreeSet::new(), &loopback_nics());

        assert_eq!(
            collect_paths(&build.index, 8000, 0, "/eos/out/event/cue/1/fire"),
            1
        );
        assert_eq!(collect_paths(&build.index, 8000, 0, "/exact"), 1);
        assert_eq!(collect_paths(&build.index, 8000, 0, "/other"), 0);
        assert_eq!(collect_paths(&build.index, 9999, 0, "/exact"), 0);
    }

    #[test]
    fn source_ip_buckets() {
        let mut any = route("", 8000, "", "10.0.0.1", 9000);
        any.label = "any".into();
        let mut specific = route("192.168.1.5", 8000, "", "10.0.0.2", 9000);
        specific.label = "specific".into();

        let nics = vec![Nic {
            ip: Ipv4Addr::new(192, 168, 1, 20),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }];
        let build = build(&[any, specific], &BTreeSet::new(), &nics);

        // from the specific source: both the specific and any-source entries
        let from_specific = u32::from(Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(collect_paths(&build.index, 8000, from_specific, "/x"), 2);
        // from elsewhere: only the any-source entry
        let other = u32::from(Ipv4Addr::new(192, 168, 1, 6));
        assert_eq!(collect_paths(&build.index, 8000, other, "/x"), 1);
    }

    #[test]
    fn tcp_destinations_get_no_sender() {
        let mut clients = BTreeSet::new();
        clients.insert(Addr::new("10.0.0.1", 3032));
        let routes = vec![route("", 8000, "", "10.0.0.1", 3032)];
        let build = build(&routes, &clients, &loopback_nics());
        assert!(build.senders.is_empty());
    }

    #[test]
    fn empty_path_matches_non_osc() {
        let routes = vec![
            route("", 8000, "", "10.0.0.1", 9000),
            route("", 8000, "/a", "10.0.0.2", 9000),
        ];
        let build = build(&routes, &BTreeSet::new(), &loopback_nics());

        let mut out = Vec::new();
        build.index.collect(8000, 0, false, "", &mut out);
        assert_eq!(out.len(), 1);
    }
}
