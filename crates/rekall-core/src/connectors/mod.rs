//! Connectors (C7): extract URLs + context from external tool histories.
//! See `spec.md` §4.7.

mod claude_cli;
mod cursor_ide;

pub use claude_cli::ClaudeCli;
pub use cursor_ide::CursorIde;

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;

use crate::entry::{ImportSource, InboxEntry};
use crate::error::Result;
use crate::ids::new_id_at;

/// Private/reserved IPv4 ranges a captured URL must not resolve into
/// (`spec.md` §4.7, resolving the CIDR-matching Open Question in §9 — the
/// source checked string prefixes `"10."`/`"192.168."`, which over-matches
/// hosts like `10.example.com`; this parses and matches real CIDRs).
const RESERVED_V4_RANGES: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "127.0.0.0/8"];

/// Reserved URL schemes, checked before attempting to parse as http(s).
const RESERVED_SCHEME_PREFIXES: &[&str] = &["file://", "chrome://", "about:"];

/// Validate a captured URL against the shared reserved set (§4.7). Returns
/// `Err(reason)` rather than a `CoreError`: validation failures are written
/// to Bronze as `is_valid = false` with this string, never surfaced as a
/// hard error.
pub fn validate_url(raw: &str) -> std::result::Result<(), String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    for scheme in RESERVED_SCHEME_PREFIXES {
        if lower.starts_with(scheme) {
            return Err(format!("reserved scheme: {scheme}"));
        }
    }

    let parsed = url::Url::parse(trimmed).map_err(|e| format!("unparseable url: {e}"))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("unsupported scheme: {}", parsed.scheme()));
    }
    let host = parsed.host_str().ok_or_else(|| "url has no host".to_string())?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err("localhost is reserved".into());
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_reserved_ip(ip) {
            return Err(format!("reserved address: {ip}"));
        }
    }
    Ok(())
}

fn is_reserved_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST
            || RESERVED_V4_RANGES
                .iter()
                .any(|cidr| cidr.parse::<Ipv4Net>().is_ok_and(|net| net.contains(&v4))),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Construct a Bronze row for a captured URL, running [`validate_url`] and
/// setting `is_valid`/`validation_error` accordingly. Rejected URLs are
/// still written to Bronze (§4.7) — they are simply never enriched.
#[allow(clippy::too_many_arguments)]
pub fn build_inbox_entry(
    url: &str,
    cli_source: &str,
    project: Option<String>,
    conversation_id: Option<String>,
    user_query: Option<String>,
    assistant_snippet: Option<String>,
    captured_at: DateTime<Utc>,
    import_source: ImportSource,
) -> InboxEntry {
    let domain = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let validation = validate_url(url);
    InboxEntry {
        id: new_id_at(captured_at),
        url: url.to_string(),
        domain,
        cli_source: cli_source.to_string(),
        project,
        conversation_id,
        user_query,
        assistant_snippet,
        captured_at,
        import_source,
        is_valid: validation.is_ok(),
        validation_error: validation.err(),
        enriched_at: None,
    }
}

/// Capability set a connector implements (§4.7).
pub trait Connector {
    /// Stable identifier used as the `ConnectorImport.connector` key.
    fn name(&self) -> &'static str;

    /// Whether this connector's backing data is present on this machine.
    fn available(&self) -> bool;

    /// History sources this connector can drain (e.g. per-project files).
    fn list_history_sources(&self) -> Vec<PathBuf>;

    /// Extract InboxEntry rows from `source`, resuming after `since_marker`
    /// if given. A record is only considered processed once the
    /// enrichment job commits it (§4.7) — this connector does not mark
    /// anything itself beyond returning the marker for the caller to
    /// persist via [`Connector::provide_marker`].
    fn extract(&self, source: &Path, since_marker: Option<&str>) -> Result<Vec<InboxEntry>>;

    /// Opaque resumption marker for `source`, monotonic per history source.
    fn provide_marker(&self, source: &Path) -> Option<String>;
}
