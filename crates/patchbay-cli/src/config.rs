//! Routing-table file format
//!
//! The legacy line format: comma-separated fields with `"` quoting, quotes
//! inside fields doubled, newlines in scripts escaped as `\n`. Two line
//! shapes share one file:
//!
//! ```text
//! label, in_ip, in_port, in_path, in_min, in_max,
//!        out_ip, out_port, out_path, out_min, out_max
//!        [, script_text, multicast_ip, in_protocol, out_protocol]
//! label, is_server(0|1), frame_mode(0|1), ip, port
//! ```
//!
//! Route lines carry at least 11 fields, TCP endpoint lines exactly 5.
//! Unparsable lines are skipped. Transform cells are empty when disabled.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use patchbay_core::status::{StatusId, StatusTable};
use patchbay_core::types::{
    FrameMode, Protocol, Route, RouteDestination, RouteSource, TcpEndpoint, Transform,
};
use patchbay_core::Addr;

/// A loaded routing table with status rows pre-registered: one shared row
/// per distinct source address, destination address, and TCP endpoint.
#[derive(Debug, Default)]
pub struct RouterConfig {
    pub routes: Vec<Route>,
    pub endpoints: Vec<TcpEndpoint>,
    pub status: StatusTable,
    /// Human-readable name for each registered status row.
    pub labels: Vec<String>,
}

pub fn load(path: &Path) -> Result<RouterConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse(&text))
}

pub fn parse(text: &str) -> RouterConfig {
    let mut config = RouterConfig::default();
    let mut src_ids: BTreeMap<Addr, StatusId> = BTreeMap::new();
    let mut dst_ids: BTreeMap<Addr, StatusId> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let items = split_quoted(line);
        if items.len() >= 11 {
            if let Some(route) = parse_route(&items) {
                register_route(&mut config, &mut src_ids, &mut dst_ids, route);
            }
        } else if items.len() == 5 {
            if let Some(endpoint) = parse_endpoint(&items) {
                register_endpoint(&mut config, endpoint);
            }
        }
    }

    config
}

fn parse_route(items: &[String]) -> Option<Route> {
    let src_port: u16 = items[2].trim().parse().ok()?;
    let dst_port: u16 = if items[7].trim().is_empty() {
        0
    } else {
        items[7].trim().parse().ok()?
    };

    let script_text = items
        .get(11)
        .map(|s| s.replace("\\n", "\n"))
        .unwrap_or_default();

    Some(Route {
        label: items[0].clone(),
        src: RouteSource {
            addr: Addr::new(&items[1], src_port),
            multicast_ip: items.get(12).cloned().unwrap_or_default(),
            protocol: parse_protocol(items.get(13)),
            path: items[3].clone(),
        },
        dst: RouteDestination {
            addr: Addr::new(&items[6], dst_port),
            protocol: parse_protocol(items.get(14)),
            path: items[8].clone(),
            in_min: parse_transform(&items[4]),
            in_max: parse_transform(&items[5]),
            out_min: parse_transform(&items[9]),
            out_max: parse_transform(&items[10]),
            script: !script_text.is_empty(),
            script_text,
        },
        src_state_id: None,
        dst_state_id: None,
    })
}

fn parse_endpoint(items: &[String]) -> Option<TcpEndpoint> {
    let server = items[1].trim().parse::<i32>().ok()? != 0;
    let frame_mode = match items[2].trim().parse::<i32>().ok()? {
        0 => FrameMode::LengthPrefix,
        1 => FrameMode::Slip,
        _ => return None,
    };
    let port: u16 = items[4].trim().parse().ok()?;

    Some(TcpEndpoint {
        label: items[0].clone(),
        server,
        frame_mode,
        addr: Addr::new(&items[3], port),
        state_id: None,
    })
}

fn register_route(
    config: &mut RouterConfig,
    src_ids: &mut BTreeMap<Addr, StatusId>,
    dst_ids: &mut BTreeMap<Addr, StatusId>,
    mut route: Route,
) {
    let src_id = *src_ids.entry(route.src.addr.clone()).or_insert_with(|| {
        config.labels.push(format!("in {}", route.src.addr));
        config.status.register()
    });
    let dst_id = *dst_ids.entry(route.dst.addr.clone()).or_insert_with(|| {
        config.labels.push(format!("out {}", route.dst.addr));
        config.status.register()
    });
    route.src_state_id = Some(src_id);
    route.dst_state_id = Some(dst_id);
    config.routes.push(route);
}

fn register_endpoint(config: &mut RouterConfig, mut endpoint: TcpEndpoint) {
    let role = if endpoint.server { "server" } else { "client" };
    config.labels.push(format!("tcp {role} {}", endpoint.addr));
    endpoint.state_id = Some(config.status.register());
    config.endpoints.push(endpoint);
}

fn parse_protocol(item: Option<&String>) -> Protocol {
    match item.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("1") | Some("psn") => Protocol::Psn,
        _ => Protocol::Osc,
    }
}

fn parse_transform(item: &str) -> Transform {
    match item.trim().parse::<f32>() {
        Ok(value) => Transform::enabled(value),
        Err(_) => Transform::default(),
    }
}

/// Split one line on unquoted commas, trimming items, stripping surrounding
/// quotes, and collapsing doubled quotes.
fn split_quoted(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let len = chars.len();
    let mut items = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for i in 0..=len {
        if i >= len || (chars[i] == ',' && !quoted) {
            let raw: String = chars[start..i].iter().collect();
            let mut item = raw.trim().to_owned();
            if item.len() >= 2 && item.starts_with('"') && item.ends_with('"') {
                item = item[1..item.len() - 1].to_owned();
            }
            items.push(item.replace("\"\"", "\""));
            start = i + 1;
        } else if chars[i] == '"' {
            if !quoted {
                quoted = true;
            } else if i + 1 >= len || chars[i + 1] != '"' {
                quoted = false;
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_fields() {
        assert_eq!(
            split_quoted("a, b , c"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(split_quoted("a,,c"), vec!["a", "", "c"]);
    }

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(
            split_quoted(r#""with, comma", plain"#),
            vec!["with, comma".to_owned(), "plain".to_owned()]
        );
        assert_eq!(
            split_quoted(r#""say ""hi""", x"#),
            vec![r#"say "hi""#.to_owned(), "x".to_owned()]
        );
    }

    #[test]
    fn parses_a_minimal_route_line() {
        let config = parse("cue fire, , 8000, /a, , , 127.0.0.1, 8001, /b, , ");
        assert_eq!(config.routes.len(), 1);

        let route = &config.routes[0];
        assert_eq!(route.label, "cue fire");
        assert_eq!(route.src.addr, Addr::new("", 8000));
        assert_eq!(route.src.path, "/a");
        assert_eq!(route.dst.addr, Addr::new("127.0.0.1", 8001));
        assert_eq!(route.dst.path, "/b");
        assert!(!route.dst.has_any_transform());
        assert!(!route.dst.script);
        assert_eq!(route.src_state_id, Some(0));
        assert_eq!(route.dst_state_id, Some(1));
    }

    #[test]
    fn parses_transforms_and_protocols() {
        let config =
            parse("scaled, , 8000, /vol, 0, 1, 10.0.0.9, 9000, , 0, 100, , , 0, 1");
        let route = &config.routes[0];
        assert!(route.dst.in_min.enabled);
        assert!((route.dst.in_max.value - 1.0).abs() < f32::EPSILON);
        assert!(route.dst.out_max.enabled);
        assert!((route.dst.out_max.value - 100.0).abs() < f32::EPSILON);
        assert_eq!(route.src.protocol, Protocol::Osc);
        assert_eq!(route.dst.protocol, Protocol::Psn);
    }

    #[test]
    fn parses_script_with_escaped_newlines() {
        let config = parse(
            r#"scripted, , 8000, , , , 10.0.0.9, 9000, , , , "OSC = ""/x""\nARGS = (1)""#,
        );
        let route = &config.routes[0];
        assert!(route.dst.script);
        assert_eq!(route.dst.script_text, "OSC = \"/x\"\nARGS = (1)");
    }

    #[test]
    fn parses_tcp_endpoint_lines() {
        let config = parse("console, 0, 0, 10.0.0.5, 3032\nreceiver, 1, 1, , 4000\n");
        assert_eq!(config.endpoints.len(), 2);

        assert!(!config.endpoints[0].server);
        assert_eq!(config.endpoints[0].frame_mode, FrameMode::LengthPrefix);
        assert_eq!(config.endpoints[0].addr, Addr::new("10.0.0.5", 3032));

        assert!(config.endpoints[1].server);
        assert_eq!(config.endpoints[1].frame_mode, FrameMode::Slip);
        assert_eq!(config.endpoints[1].addr, Addr::new("", 4000));
    }

    #[test]
    fn shares_status_ids_per_address() {
        let config = parse(
            "a, , 8000, /a, , , 127.0.0.1, 9000, , , \n\
             b, , 8000, /b, , , 127.0.0.1, 9000, , , \n\
             c, , 8100, /c, , , 127.0.0.1, 9100, , , \n",
        );
        assert_eq!(config.routes.len(), 3);
        // first two routes share both rows; the third gets fresh ones
        assert_eq!(config.routes[0].src_state_id, config.routes[1].src_state_id);
        assert_eq!(config.routes[0].dst_state_id, config.routes[1].dst_state_id);
        assert_ne!(config.routes[0].src_state_id, config.routes[2].src_state_id);
        assert_eq!(config.status.len(), 4);
        assert_eq!(config.labels.len(), 4);
    }

    #[test]
    fn skips_malformed_lines() {
        let config = parse("not a route\njunk, fields, here\n");
        assert!(config.routes.is_empty());
        assert!(config.endpoints.is_empty());
    }
}
