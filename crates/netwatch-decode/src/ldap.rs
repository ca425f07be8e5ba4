//! LDAP Protocol Decoder
//!
//! Walks BER-encoded LDAPv3 messages far enough to analyze search requests:
//! base DN, a best-effort filter string and requested attribute names. The
//! attribute list is matched against a fixed vocabulary rather than fully
//! traversed; filter text is recovered as printable substrings, not a real
//! BER filter grammar.
//!
//! Detects directory reconnaissance: sensitive attribute access, queries
//! against sensitive bases, enumeration volume, Kerberoasting and AS-REP
//! roasting patterns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use netwatch_common::{PacketFlow, Severity, ThreatEvent, ThreatType};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ports carrying LDAP traffic (plain, TLS, global catalog)
pub const LDAP_PORTS: &[u16] = &[389, 636, 3268, 3269];

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;

const OP_SEARCH_REQUEST: u8 = 3;

/// Attributes whose retrieval is credential-theft adjacent
const SENSITIVE_ATTRS: &[&str] = &[
    "userpassword",
    "unicodepwd",
    "ntpasswordhash",
    "lmpasswordhash",
    "supplementalcredentials",
    "msds-managedpasswordid",
    "msds-managedpassword",
    "msds-groupmsamembership",
    "serviceprincipalname",
    "msds-allowedtodelegateto",
    "msds-allowedtoactonbehalfofotheridentity",
    "sidhistory",
    "admincount",
    "member",
    "memberof",
    "primarygroupid",
    "objectsid",
    "objectguid",
];

/// Search bases that legitimate clients rarely touch
const SENSITIVE_BASES: &[&str] = &[
    "cn=configuration",
    "cn=schema",
    "cn=system",
    "cn=builtin",
    "cn=ntds quotas",
    "cn=infrastructure",
];

/// Attribute-name vocabulary used instead of full BER attribute-list
/// traversal; the list is deeply nested and a substring scan recovers what
/// the heuristics need.
const COMMON_ATTRS: &[&str] = &[
    "objectclass",
    "cn",
    "sn",
    "givenname",
    "displayname",
    "samaccountname",
    "userprincipalname",
    "mail",
    "member",
    "memberof",
    "distinguishedname",
    "objectsid",
    "objectguid",
    "serviceprincipalname",
    "admincount",
    "useraccountcontrol",
    "lastlogon",
    "pwdlastset",
    "accountexpires",
    "description",
    "userpassword",
    "unicodepwd",
    "ntpasswordhash",
];

/// UF_DONT_REQUIRE_PREAUTH, the AS-REP roasting marker
const ASREP_UAC_BIT: &str = "4194304";

/// LDAP decoder configuration
#[derive(Clone, Debug)]
pub struct LdapConfig {
    /// Search-request count that constitutes enumeration
    pub enumeration_threshold: usize,
    /// Window for the enumeration count, seconds
    pub enumeration_window_secs: i64,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            enumeration_threshold: 20,
            enumeration_window_secs: 60,
        }
    }
}

/// Decoded search request
#[derive(Debug, Clone, Default)]
struct SearchRequest {
    base_dn: String,
    filter: String,
    attributes: Vec<String>,
}

/// Per-(source, destination) operation accumulator
struct LdapSession {
    operations: VecDeque<(DateTime<Utc>, String)>,
    last_seen: DateTime<Utc>,
}

/// Per-source query history for enumeration detection
#[derive(Default)]
struct QueryTracker {
    queries: VecDeque<(DateTime<Utc>, String)>,
    attrs: HashSet<String>,
}

#[derive(Debug, Default)]
struct LdapCounters {
    ldap_packets: AtomicU64,
    search_requests: AtomicU64,
    sensitive_attr_queries: AtomicU64,
    sensitive_base_queries: AtomicU64,
    enumeration_events: AtomicU64,
    recon_patterns: AtomicU64,
}

/// Decoder statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct LdapStats {
    pub ldap_packets: u64,
    pub search_requests: u64,
    pub sensitive_attr_queries: u64,
    pub sensitive_base_queries: u64,
    pub enumeration_events: u64,
    pub recon_patterns: u64,
    pub active_sessions: u64,
    pub tracked_sources: u64,
}

/// LDAP search-request decoder with per-source pattern state
pub struct LdapDecoder {
    config: LdapConfig,
    sessions: DashMap<(IpAddr, IpAddr), LdapSession>,
    query_tracker: DashMap<IpAddr, QueryTracker>,
    counters: LdapCounters,
}

impl LdapDecoder {
    pub fn new(config: LdapConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            query_tracker: DashMap::new(),
            counters: LdapCounters::default(),
        }
    }

    /// Analyze one packet payload from an LDAP port
    pub fn analyze(&self, data: &[u8], flow: &PacketFlow) -> Vec<ThreatEvent> {
        self.analyze_at(data, flow, Utc::now())
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn analyze_at(
        &self,
        data: &[u8],
        flow: &PacketFlow,
        now: DateTime<Utc>,
    ) -> Vec<ThreatEvent> {
        if data.len() < 10 {
            return Vec::new();
        }

        self.counters.ldap_packets.fetch_add(1, Ordering::Relaxed);

        let Some((operation, search)) = parse_ldap_message(data) else {
            return Vec::new();
        };
        if operation != OP_SEARCH_REQUEST {
            return Vec::new();
        }
        let Some(search) = search else {
            return Vec::new();
        };

        self.counters.search_requests.fetch_add(1, Ordering::Relaxed);

        let src = flow.src_ip.to_string();
        let dst = flow.dst_ip.to_string();
        let base_lower = search.base_dn.to_lowercase();
        let filter_lower = search.filter.to_lowercase();
        let mut events = Vec::new();

        {
            let mut session = self
                .sessions
                .entry((flow.src_ip, flow.dst_ip))
                .or_insert_with(|| LdapSession {
                    operations: VecDeque::new(),
                    last_seen: now,
                });
            session
                .operations
                .push_back((now, format!("search {}", search.base_dn)));
            while session.operations.len() > 100 {
                session.operations.pop_front();
            }
            session.last_seen = now;
        }

        let (recent_queries, unique_bases, attr_count) = {
            let mut tracker = self.query_tracker.entry(flow.src_ip).or_default();
            tracker.queries.push_back((now, search.base_dn.clone()));
            while tracker.queries.len() > 200 {
                tracker.queries.pop_front();
            }
            for attr in &search.attributes {
                tracker.attrs.insert(attr.clone());
            }

            let window_start =
                now - chrono::Duration::seconds(self.config.enumeration_window_secs);
            let recent: Vec<&String> = tracker
                .queries
                .iter()
                .filter(|(t, _)| *t >= window_start)
                .map(|(_, base)| base)
                .collect();
            let unique: HashSet<&String> = recent.iter().copied().collect();
            (recent.len(), unique.len(), tracker.attrs.len())
        };

        let sensitive_requested: Vec<String> = search
            .attributes
            .iter()
            .filter(|a| SENSITIVE_ATTRS.contains(&a.to_lowercase().as_str()))
            .cloned()
            .collect();
        if !sensitive_requested.is_empty() {
            self.counters
                .sensitive_attr_queries
                .fetch_add(1, Ordering::Relaxed);
            events.push(
                ThreatEvent::new(
                    ThreatType::LdapSensitiveAttrQuery,
                    Severity::High,
                    &src,
                    &dst,
                    format!(
                        "LDAP query for sensitive attributes: {}",
                        sensitive_requested.join(", ")
                    ),
                )
                .with_detail("base_dn", search.base_dn.clone())
                .with_detail("sensitive_attrs", sensitive_requested)
                .with_detail("all_attrs", search.attributes.clone()),
            );
        }

        if let Some(base) = SENSITIVE_BASES.iter().find(|b| base_lower.contains(*b)) {
            self.counters
                .sensitive_base_queries
                .fetch_add(1, Ordering::Relaxed);
            events.push(
                ThreatEvent::new(
                    ThreatType::LdapSensitiveBaseQuery,
                    Severity::Medium,
                    &src,
                    &dst,
                    format!("LDAP query on sensitive base: {}", search.base_dn),
                )
                .with_detail("base_dn", search.base_dn.clone())
                .with_detail("matched_base", *base)
                .with_detail("filter", search.filter.clone()),
            );
        }

        if recent_queries == self.config.enumeration_threshold {
            self.counters
                .enumeration_events
                .fetch_add(1, Ordering::Relaxed);
            events.push(
                ThreatEvent::new(
                    ThreatType::LdapEnumeration,
                    Severity::Medium,
                    &src,
                    &dst,
                    format!(
                        "LDAP enumeration: {recent_queries} queries to {unique_bases} bases in {} seconds",
                        self.config.enumeration_window_secs
                    ),
                )
                .with_detail("query_count", recent_queries)
                .with_detail("unique_bases", unique_bases)
                .with_detail("unique_attrs", attr_count)
                .with_detail("window_seconds", self.config.enumeration_window_secs),
            );
        }

        if let Some(event) =
            self.check_recon_pattern(&filter_lower, &base_lower, &search, &src, &dst)
        {
            events.push(event);
        }

        events
    }

    /// Known credential-theft reconnaissance shapes in the filter text.
    fn check_recon_pattern(
        &self,
        filter_lower: &str,
        base_lower: &str,
        search: &SearchRequest,
        src: &str,
        dst: &str,
    ) -> Option<ThreatEvent> {
        let (event_type, severity, description) = if filter_lower
            .contains("serviceprincipalname")
            && !base_lower.contains("serviceprincipalname")
        {
            (
                ThreatType::LdapSpnEnumeration,
                Severity::High,
                "LDAP SPN enumeration (Kerberoasting reconnaissance)",
            )
        } else if filter_lower.contains("useraccountcontrol")
            && search.filter.contains(ASREP_UAC_BIT)
        {
            (
                ThreatType::LdapAsrepEnumeration,
                Severity::High,
                "LDAP enumeration for AS-REP roastable accounts",
            )
        } else if filter_lower.contains("admincount=1") || filter_lower.contains("domain admins")
        {
            (
                ThreatType::LdapAdminEnumeration,
                Severity::Medium,
                "LDAP enumeration for privileged accounts",
            )
        } else {
            return None;
        };

        self.counters.recon_patterns.fetch_add(1, Ordering::Relaxed);

        Some(
            ThreatEvent::new(event_type, severity, src, dst, description)
                .with_detail("filter", search.filter.clone())
                .with_detail("base_dn", search.base_dn.clone()),
        )
    }

    /// Drop sessions and trackers idle beyond `max_age_secs`
    pub fn clear_idle_sessions(&self, max_age_secs: i64, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(max_age_secs);
        self.sessions.retain(|_, s| s.last_seen >= cutoff);
        self.query_tracker.retain(|_, t| {
            t.queries
                .back()
                .map(|(ts, _)| *ts >= cutoff)
                .unwrap_or(false)
        });
    }

    pub fn get_stats(&self) -> LdapStats {
        LdapStats {
            ldap_packets: self.counters.ldap_packets.load(Ordering::Relaxed),
            search_requests: self.counters.search_requests.load(Ordering::Relaxed),
            sensitive_attr_queries: self
                .counters
                .sensitive_attr_queries
                .load(Ordering::Relaxed),
            sensitive_base_queries: self
                .counters
                .sensitive_base_queries
                .load(Ordering::Relaxed),
            enumeration_events: self.counters.enumeration_events.load(Ordering::Relaxed),
            recon_patterns: self.counters.recon_patterns.load(Ordering::Relaxed),
            active_sessions: self.sessions.len() as u64,
            tracked_sources: self.query_tracker.len() as u64,
        }
    }
}

impl Default for LdapDecoder {
    fn default() -> Self {
        Self::new(LdapConfig::default())
    }
}

// =============================================================================
// BER walking
// =============================================================================

/// Parse the BER envelope: SEQUENCE, INTEGER message id, tagged operation.
/// Returns the operation code and the decoded search request body when the
/// operation is a search.
fn parse_ldap_message(data: &[u8]) -> Option<(u8, Option<SearchRequest>)> {
    if *data.first()? != TAG_SEQUENCE {
        return None;
    }

    let (_, offset) = parse_ber_length(data, 1)?;

    if *data.get(offset)? != TAG_INTEGER {
        return None;
    }
    let (id_len, offset) = parse_ber_length(data, offset + 1)?;
    if id_len == 0 || id_len > 8 {
        return None;
    }
    // message id value is not needed by any heuristic; skip it
    let offset = offset + id_len;

    let op_tag = *data.get(offset)?;
    let operation = op_tag & 0x1f;
    let (op_len, offset) = parse_ber_length(data, offset + 1)?;

    let search = if operation == OP_SEARCH_REQUEST {
        let end = (offset + op_len).min(data.len());
        data.get(offset..end).map(parse_search_request)
    } else {
        None
    };

    Some((operation, search))
}

/// BER length: short form (one byte) or long form (0x80 | n, then n octets).
fn parse_ber_length(data: &[u8], offset: usize) -> Option<(usize, usize)> {
    let length_byte = *data.get(offset)?;
    let offset = offset + 1;

    if length_byte & 0x80 == 0 {
        return Some((length_byte as usize, offset));
    }

    let num_octets = (length_byte & 0x7f) as usize;
    if num_octets == 0 || num_octets > 8 {
        return None;
    }
    let bytes = data.get(offset..offset + num_octets)?;
    let mut length = 0usize;
    for &b in bytes {
        length = length.checked_mul(256)?.checked_add(b as usize)?;
    }
    Some((length, offset + num_octets))
}

fn parse_search_request(data: &[u8]) -> SearchRequest {
    let mut request = SearchRequest::default();
    let mut offset = 0;

    // Base DN
    if data.first() == Some(&TAG_OCTET_STRING) {
        if let Some((len, next)) = parse_ber_length(data, 1) {
            if let Some(bytes) = data.get(next..next + len) {
                request.base_dn = String::from_utf8_lossy(bytes).into_owned();
                offset = next + len;
            }
        }
    }

    // Skip scope, derefAliases, sizeLimit, timeLimit, typesOnly
    for _ in 0..5 {
        if offset >= data.len() {
            break;
        }
        offset += 1;
        match parse_ber_length(data, offset) {
            Some((len, next)) => offset = next + len,
            None => break,
        }
    }

    // The filter is a nested BER structure; recover printable substrings
    if let Some(filter_data) = data.get(offset.min(data.len())..) {
        request.filter = extract_printable(filter_data);
    }

    // Attribute lists are deeply nested; a vocabulary scan over the whole
    // body recovers the names the heuristics care about
    request.attributes = extract_attributes(data);

    request
}

/// Printable-ASCII runs from raw filter bytes, joined with spaces.
fn extract_printable(data: &[u8]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();

    for &b in data {
        if (0x20..=0x7e).contains(&b) {
            current.push(b as char);
        } else if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
        .into_iter()
        .filter(|p| {
            (p.len() > 2 && p.chars().all(char::is_alphanumeric)) || p.contains('=')
        })
        .take(10)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Vocabulary scan for requested attribute names.
fn extract_attributes(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data).to_lowercase();
    COMMON_ATTRS
        .iter()
        .filter(|attr| text.contains(**attr))
        .map(|attr| attr.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flow(src: &str, dst: &str) -> PacketFlow {
        PacketFlow::new(src.parse().unwrap(), dst.parse().unwrap(), 50100, 389)
    }

    fn ber_len(len: usize) -> Vec<u8> {
        if len < 128 {
            vec![len as u8]
        } else {
            vec![0x81, len as u8]
        }
    }

    /// BER-encode a search request with the given base DN and raw filter text
    fn search_request(base: &str, filter: &str) -> Vec<u8> {
        let mut body = vec![TAG_OCTET_STRING];
        body.extend(ber_len(base.len()));
        body.extend_from_slice(base.as_bytes());
        // scope, derefAliases, sizeLimit, timeLimit, typesOnly
        for (tag, value) in [(0x0au8, 2u8), (0x0a, 0), (0x02, 0), (0x02, 0), (0x01, 0)] {
            body.extend_from_slice(&[tag, 1, value]);
        }
        body.extend_from_slice(filter.as_bytes());

        let mut message = vec![TAG_INTEGER, 1, 1];
        message.push(0x63); // APPLICATION 3 = SearchRequest
        message.extend(ber_len(body.len()));
        message.extend(body);

        let mut out = vec![TAG_SEQUENCE];
        out.extend(ber_len(message.len()));
        out.extend(message);
        out
    }

    #[test]
    fn test_sensitive_attribute_query() {
        let decoder = LdapDecoder::default();
        let data = search_request("dc=corp,dc=local", "(objectClass=user) unicodePwd");
        let events = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));

        let hit = events
            .iter()
            .find(|e| e.event_type == ThreatType::LdapSensitiveAttrQuery)
            .expect("sensitive attr event");
        assert_eq!(hit.severity, Severity::High);
    }

    #[test]
    fn test_sensitive_base_query() {
        let decoder = LdapDecoder::default();
        let data = search_request("CN=Configuration,DC=corp,DC=local", "(objectClass=*)");
        let events = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));

        let hit = events
            .iter()
            .find(|e| e.event_type == ThreatType::LdapSensitiveBaseQuery)
            .expect("sensitive base event");
        assert_eq!(hit.severity, Severity::Medium);
    }

    #[test]
    fn test_spn_enumeration() {
        let decoder = LdapDecoder::default();
        let data = search_request("dc=corp,dc=local", "(servicePrincipalName=*)");
        let events = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));

        assert!(events.iter().any(|e| {
            e.event_type == ThreatType::LdapSpnEnumeration && e.severity == Severity::High
        }));
    }

    #[test]
    fn test_asrep_roasting_recon() {
        let decoder = LdapDecoder::default();
        let data = search_request(
            "dc=corp,dc=local",
            "(userAccountControl:1.2.840.113556.1.4.803:=4194304)",
        );
        let events = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));

        assert!(events.iter().any(|e| {
            e.event_type == ThreatType::LdapAsrepEnumeration && e.severity == Severity::High
        }));
    }

    #[test]
    fn test_admin_enumeration() {
        let decoder = LdapDecoder::default();
        let data = search_request("dc=corp,dc=local", "(adminCount=1)");
        let events = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));

        assert!(events.iter().any(|e| {
            e.event_type == ThreatType::LdapAdminEnumeration && e.severity == Severity::Medium
        }));
    }

    #[test]
    fn test_enumeration_threshold_fires_once() {
        let decoder = LdapDecoder::default();
        let f = flow("10.0.0.5", "10.0.0.10");
        let data = search_request("dc=corp,dc=local", "(cn=printer)");
        let t0 = Utc::now();

        let mut enumeration_events = 0;
        for i in 0..25 {
            let now = t0 + chrono::Duration::seconds(i);
            enumeration_events += decoder
                .analyze_at(&data, &f, now)
                .iter()
                .filter(|e| e.event_type == ThreatType::LdapEnumeration)
                .count();
        }
        assert_eq!(enumeration_events, 1);
    }

    #[test]
    fn test_non_search_operation_ignored() {
        let decoder = LdapDecoder::default();
        // BindRequest (APPLICATION 0)
        let data = vec![
            TAG_SEQUENCE, 12, TAG_INTEGER, 1, 1, 0x60, 7, 2, 1, 3, 4, 2, b'c', b'n',
        ];
        assert!(decoder
            .analyze(&data, &flow("10.0.0.5", "10.0.0.10"))
            .is_empty());
    }

    #[test]
    fn test_non_ldap_bytes_ignored() {
        let decoder = LdapDecoder::default();
        assert!(decoder
            .analyze(b"GET / HTTP/1.1\r\nHost: x\r\n", &flow("10.0.0.5", "10.0.0.10"))
            .is_empty());
    }

    #[test]
    fn test_long_form_ber_length() {
        assert_eq!(parse_ber_length(&[0x05], 0), Some((5, 1)));
        assert_eq!(parse_ber_length(&[0x81, 0xc8], 0), Some((200, 2)));
        assert_eq!(parse_ber_length(&[0x82, 0x01, 0x00], 0), Some((256, 3)));
        assert_eq!(parse_ber_length(&[0x80], 0), None);
        assert_eq!(parse_ber_length(&[0x84, 0x01], 0), None);
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let decoder = LdapDecoder::default();
            let _ = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));
        }

        #[test]
        fn test_mangled_search_never_panics(garbage in proptest::collection::vec(any::<u8>(), 0..128)) {
            let decoder = LdapDecoder::default();
            let mut data = vec![TAG_SEQUENCE, 0x82, 0x00, 0x60, TAG_INTEGER, 1, 1, 0x63, 0x40];
            data.extend(&garbage);
            let _ = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.10"));
        }
    }
}
