//! TLS Handshake Decoder
//!
//! Extracts security metadata from TLS handshakes without decryption:
//! JA3/JA3S fingerprints, SNI, ALPN, negotiated versions and ciphers,
//! certificate chain heuristics, ESNI/ECH detection and domain-fronting
//! correlation between a Client Hello's SNI and the certificate presented
//! on the reverse flow.
//!
//! The decoder is a best-effort classifier: any structural mismatch returns
//! `TlsMessageKind::NotTls` with no events.

use crate::cert::{self, CertificateInfo};
use crate::{is_grease, read_u16, read_u24};
use chrono::{DateTime, Utc};
use lru::LruCache;
use md5::{Digest, Md5};
use netwatch_common::{FlowKey, PacketFlow, Severity, ThreatEvent, ThreatType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

const CONTENT_TYPE_HANDSHAKE: u8 = 22;

const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const HANDSHAKE_SERVER_HELLO: u8 = 2;
const HANDSHAKE_CERTIFICATE: u8 = 11;

const EXT_SNI: u16 = 0;
const EXT_SUPPORTED_GROUPS: u16 = 10;
const EXT_EC_POINT_FORMATS: u16 = 11;
const EXT_ALPN: u16 = 16;
const EXT_SUPPORTED_VERSIONS: u16 = 43;
const EXT_ENCRYPTED_CLIENT_HELLO: u16 = 0xfe0d;
const EXT_ESNI: u16 = 0xffce;

/// Weak or deprecated cipher suites with their IANA names
const WEAK_CIPHERS: &[(u16, &str)] = &[
    (0x0000, "TLS_NULL_WITH_NULL_NULL"),
    (0x0001, "TLS_RSA_WITH_NULL_MD5"),
    (0x0002, "TLS_RSA_WITH_NULL_SHA"),
    (0x0003, "TLS_RSA_EXPORT_WITH_RC4_40_MD5"),
    (0x0004, "TLS_RSA_WITH_RC4_128_MD5"),
    (0x0005, "TLS_RSA_WITH_RC4_128_SHA"),
    (0x0006, "TLS_RSA_EXPORT_WITH_RC2_CBC_40_MD5"),
    (0x0008, "TLS_RSA_EXPORT_WITH_DES40_CBC_SHA"),
    (0x0009, "TLS_RSA_WITH_DES_CBC_SHA"),
    (0x000a, "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0x0011, "TLS_DHE_DSS_EXPORT_WITH_DES40_CBC_SHA"),
    (0x0014, "TLS_DHE_RSA_EXPORT_WITH_DES40_CBC_SHA"),
    (0x0017, "TLS_DH_anon_EXPORT_WITH_RC4_40_MD5"),
    (0x0019, "TLS_DH_anon_EXPORT_WITH_DES40_CBC_SHA"),
    (0x002f, "TLS_RSA_WITH_AES_128_CBC_SHA"),
    (0x0035, "TLS_RSA_WITH_AES_256_CBC_SHA"),
];

/// Modern cipher suites; a client offering none of these alongside weak
/// suites is flagged
const STRONG_CIPHERS: &[(u16, &str)] = &[
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
    (0xc02b, "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    (0xc02c, "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    (0xc02f, "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    (0xc030, "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    (0xcca8, "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0xcca9, "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
];

/// CDN provider suffixes used to downgrade domain-fronting severity
const CDN_PROVIDERS: &[(&str, &str)] = &[
    ("cloudfront.net", "Amazon CloudFront"),
    ("cloudflare.com", "Cloudflare"),
    ("akamaized.net", "Akamai"),
    ("azureedge.net", "Azure CDN"),
    ("fastly.net", "Fastly"),
    ("googleapis.com", "Google"),
    ("googleusercontent.com", "Google"),
];

/// Built-in malicious JA3 hashes; extended at runtime from threat feeds
const KNOWN_MALICIOUS_JA3: &[(&str, &str)] = &[
    ("72a589da586844d7f0818ce684948eea", "Cobalt Strike"),
    ("6734f37431670b3ab4292b8f60f29984", "Metasploit Meterpreter"),
    ("e7d705a3286e19ea42f587b344ee6865", "Empire"),
    ("51c64c77e60f3980eea90869b68c58a8", "TrickBot"),
    ("4d7a28d6f2263ed61de88ca66eb2e04b", "Emotet"),
];

fn version_name(version: u16) -> String {
    match version {
        0x0300 => "SSL 3.0".to_string(),
        0x0301 => "TLS 1.0".to_string(),
        0x0302 => "TLS 1.1".to_string(),
        0x0303 => "TLS 1.2".to_string(),
        0x0304 => "TLS 1.3".to_string(),
        other => format!("Unknown (0x{other:04x})"),
    }
}

fn weak_cipher_name(cipher: u16) -> Option<&'static str> {
    WEAK_CIPHERS
        .iter()
        .find(|(id, _)| *id == cipher)
        .map(|(_, name)| *name)
}

fn cipher_name(cipher: u16) -> String {
    if let Some(name) = weak_cipher_name(cipher) {
        return name.to_string();
    }
    STRONG_CIPHERS
        .iter()
        .find(|(id, _)| *id == cipher)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Unknown (0x{cipher:04x})"))
}

/// MD5 hex digest used for JA3/JA3S. An identification fingerprint matching
/// the published algorithm, not a security primitive.
pub fn fingerprint_hash(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// What the record turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMessageKind {
    ClientHello,
    ServerHello,
    Certificate,
    NotTls,
}

/// Decoder output for one packet
#[derive(Debug, Clone)]
pub struct TlsAnalysis {
    pub message: TlsMessageKind,
    pub events: Vec<ThreatEvent>,
}

impl TlsAnalysis {
    fn not_tls() -> Self {
        Self {
            message: TlsMessageKind::NotTls,
            events: Vec::new(),
        }
    }
}

/// Parsed Client Hello
#[derive(Debug, Clone, Default)]
struct ClientHelloInfo {
    legacy_version: u16,
    effective_version: u16,
    cipher_suites: Vec<u16>,
    extensions: Vec<u16>,
    supported_groups: Vec<u16>,
    ec_point_formats: Vec<u8>,
    supported_versions: Vec<u16>,
    sni: Option<String>,
    alpn: Vec<String>,
    has_esni: bool,
    has_ech: bool,
    ja3_string: String,
    ja3_hash: String,
}

/// Parsed Server Hello
#[derive(Debug, Clone, Default)]
struct ServerHelloInfo {
    negotiated_version: u16,
    cipher_suite: u16,
    ja3s_hash: String,
}

/// Parsed Certificate message
#[derive(Debug, Clone, Default)]
struct CertificateChainInfo {
    certificates: Vec<CertificateInfo>,
    has_self_signed: bool,
    has_expired: bool,
}

/// Accumulated per-flow handshake state. Created on the first Client Hello
/// seen for a flow key, updated by subsequent Server Hello and Certificate
/// messages on the reverse flow, evicted by cache capacity.
#[derive(Debug, Clone, Serialize)]
pub struct TlsSessionState {
    pub sni: Option<String>,
    pub offered_version: String,
    pub negotiated_version: Option<String>,
    pub negotiated_cipher: Option<String>,
    pub alpn: Vec<String>,
    pub has_esni: bool,
    pub has_ech: bool,
    pub ja3: String,
    pub ja3s: Option<String>,
    pub cert_domains: Vec<String>,
    pub cert_self_signed: bool,
    pub cert_expired: bool,
    pub client_hello_at: DateTime<Utc>,
}

/// TLS decoder configuration
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub detect_weak_ciphers: bool,
    pub detect_self_signed: bool,
    pub detect_expired_certs: bool,
    pub detect_domain_fronting: bool,
    pub detect_esni_ech: bool,
    /// Extra JA3 hash -> malware family entries merged over the built-ins
    pub ja3_blocklist: HashMap<String, String>,
    /// Bound on tracked flows
    pub session_cache_size: usize,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            detect_weak_ciphers: true,
            detect_self_signed: true,
            detect_expired_certs: true,
            detect_domain_fronting: true,
            detect_esni_ech: true,
            ja3_blocklist: HashMap::new(),
            session_cache_size: 10_000,
        }
    }
}

#[derive(Debug, Default)]
struct TlsCounters {
    packets_analyzed: AtomicU64,
    client_hellos: AtomicU64,
    server_hellos: AtomicU64,
    certificates_extracted: AtomicU64,
    tls13_sessions: AtomicU64,
    esni_detected: AtomicU64,
    ech_detected: AtomicU64,
    weak_ciphers_detected: AtomicU64,
    self_signed_certs: AtomicU64,
    expired_certs: AtomicU64,
    domain_fronting_suspected: AtomicU64,
    malicious_ja3_detected: AtomicU64,
}

/// Decoder statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TlsStats {
    pub packets_analyzed: u64,
    pub client_hellos: u64,
    pub server_hellos: u64,
    pub certificates_extracted: u64,
    pub tls13_sessions: u64,
    pub esni_detected: u64,
    pub ech_detected: u64,
    pub weak_ciphers_detected: u64,
    pub self_signed_certs: u64,
    pub expired_certs: u64,
    pub domain_fronting_suspected: u64,
    pub malicious_ja3_detected: u64,
    pub active_sessions: u64,
}

/// TLS handshake decoder with per-flow correlation state
pub struct TlsDecoder {
    config: TlsConfig,
    ja3_blocklist: HashMap<String, String>,
    sessions: Mutex<LruCache<FlowKey, TlsSessionState>>,
    counters: TlsCounters,
}

impl TlsDecoder {
    pub fn new(config: TlsConfig) -> Self {
        let mut ja3_blocklist: HashMap<String, String> = KNOWN_MALICIOUS_JA3
            .iter()
            .map(|(hash, family)| (hash.to_string(), family.to_string()))
            .collect();
        ja3_blocklist.extend(config.ja3_blocklist.clone());

        let capacity = NonZeroUsize::new(config.session_cache_size.max(1)).unwrap();

        Self {
            config,
            ja3_blocklist,
            sessions: Mutex::new(LruCache::new(capacity)),
            counters: TlsCounters::default(),
        }
    }

    /// Add a JA3 hash to the blocklist at runtime
    pub fn add_ja3_blocklist(&mut self, ja3_hash: &str, malware_family: &str) {
        tracing::info!(ja3 = ja3_hash, family = malware_family, "JA3 blocklisted");
        self.ja3_blocklist
            .insert(ja3_hash.to_string(), malware_family.to_string());
    }

    /// Analyze one packet payload believed to start at a TLS record boundary
    pub fn analyze(&self, data: &[u8], flow: &PacketFlow) -> TlsAnalysis {
        self.analyze_at(data, flow, Utc::now())
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn analyze_at(&self, data: &[u8], flow: &PacketFlow, now: DateTime<Utc>) -> TlsAnalysis {
        // Quick reject before any work
        if data.len() < 6 || data[0] != CONTENT_TYPE_HANDSHAKE {
            return TlsAnalysis::not_tls();
        }

        let Some(record_length) = read_u16(data, 3).map(usize::from) else {
            return TlsAnalysis::not_tls();
        };
        let Some(handshake) = data.get(5..5 + record_length) else {
            return TlsAnalysis::not_tls();
        };
        if handshake.len() < 4 {
            return TlsAnalysis::not_tls();
        }

        self.counters.packets_analyzed.fetch_add(1, Ordering::Relaxed);

        let body = &handshake[4..];
        match handshake[0] {
            HANDSHAKE_CLIENT_HELLO => match parse_client_hello(body) {
                Some(hello) => TlsAnalysis {
                    message: TlsMessageKind::ClientHello,
                    events: self.handle_client_hello(hello, flow, now),
                },
                None => TlsAnalysis::not_tls(),
            },
            HANDSHAKE_SERVER_HELLO => match parse_server_hello(body) {
                Some(hello) => TlsAnalysis {
                    message: TlsMessageKind::ServerHello,
                    events: self.handle_server_hello(hello, flow),
                },
                None => TlsAnalysis::not_tls(),
            },
            HANDSHAKE_CERTIFICATE => match parse_certificate_message(body, now) {
                Some(chain) => TlsAnalysis {
                    message: TlsMessageKind::Certificate,
                    events: self.handle_certificate(chain, flow),
                },
                None => TlsAnalysis::not_tls(),
            },
            _ => TlsAnalysis::not_tls(),
        }
    }

    fn handle_client_hello(
        &self,
        hello: ClientHelloInfo,
        flow: &PacketFlow,
        now: DateTime<Utc>,
    ) -> Vec<ThreatEvent> {
        self.counters.client_hellos.fetch_add(1, Ordering::Relaxed);
        if hello.effective_version == 0x0304 {
            self.counters.tls13_sessions.fetch_add(1, Ordering::Relaxed);
        }

        let src = flow.src_ip.to_string();
        let dst = flow.dst_ip.to_string();
        let tls_version = version_name(hello.effective_version);
        let mut events = Vec::new();

        if self.config.detect_esni_ech {
            if hello.has_esni {
                self.counters.esni_detected.fetch_add(1, Ordering::Relaxed);
                events.push(
                    ThreatEvent::new(
                        ThreatType::EsniDetected,
                        Severity::Low,
                        &src,
                        &dst,
                        "Encrypted SNI (ESNI) detected - hostname hidden",
                    )
                    .with_detail("tls_version", tls_version.clone()),
                );
            }
            if hello.has_ech {
                self.counters.ech_detected.fetch_add(1, Ordering::Relaxed);
                events.push(
                    ThreatEvent::new(
                        ThreatType::EchDetected,
                        Severity::Low,
                        &src,
                        &dst,
                        "Encrypted Client Hello (ECH) detected",
                    )
                    .with_detail("tls_version", tls_version.clone()),
                );
            }
        }

        if hello.sni.is_none() {
            events.push(ThreatEvent::new(
                ThreatType::MissingSni,
                Severity::Low,
                &src,
                &dst,
                "Client Hello without SNI extension",
            ));
        }

        if self.config.detect_weak_ciphers {
            let weak_offered: Vec<u16> = hello
                .cipher_suites
                .iter()
                .copied()
                .filter(|c| weak_cipher_name(*c).is_some())
                .collect();
            let strong_offered = hello
                .cipher_suites
                .iter()
                .any(|c| STRONG_CIPHERS.iter().any(|(id, _)| id == c));

            if !weak_offered.is_empty() && !strong_offered {
                let names: Vec<String> = weak_offered
                    .iter()
                    .take(5)
                    .map(|c| cipher_name(*c))
                    .collect();
                events.push(
                    ThreatEvent::new(
                        ThreatType::WeakCiphersOnly,
                        Severity::Medium,
                        &src,
                        &dst,
                        "Client only offers weak/deprecated cipher suites",
                    )
                    .with_detail("weak_ciphers", names)
                    .with_detail("sni", hello.sni.clone().unwrap_or_default()),
                );
            }
        }

        if matches!(hello.effective_version, 0x0300 | 0x0301 | 0x0302) {
            events.push(
                ThreatEvent::new(
                    ThreatType::LegacyTlsVersion,
                    Severity::Medium,
                    &src,
                    &dst,
                    format!("Legacy TLS version in use: {tls_version}"),
                )
                .with_detail("version", tls_version.clone())
                .with_detail("sni", hello.sni.clone().unwrap_or_default()),
            );
        }

        if let Some(family) = self.ja3_blocklist.get(&hello.ja3_hash) {
            self.counters
                .malicious_ja3_detected
                .fetch_add(1, Ordering::Relaxed);
            events.push(
                ThreatEvent::new(
                    ThreatType::MaliciousJa3Fingerprint,
                    Severity::Critical,
                    &src,
                    &dst,
                    format!("Known malicious JA3 fingerprint: {family}"),
                )
                .with_detail("ja3", hello.ja3_hash.clone())
                .with_detail("ja3_string", hello.ja3_string.clone())
                .with_detail("malware_family", family.clone())
                .with_detail("sni", hello.sni.clone().unwrap_or_default()),
            );
        }

        // Record the session for later Server Hello / Certificate correlation
        self.sessions.lock().put(
            flow.key(),
            TlsSessionState {
                sni: hello.sni,
                offered_version: tls_version,
                negotiated_version: None,
                negotiated_cipher: None,
                alpn: hello.alpn,
                has_esni: hello.has_esni,
                has_ech: hello.has_ech,
                ja3: hello.ja3_hash,
                ja3s: None,
                cert_domains: Vec::new(),
                cert_self_signed: false,
                cert_expired: false,
                client_hello_at: now,
            },
        );

        events
    }

    fn handle_server_hello(&self, hello: ServerHelloInfo, flow: &PacketFlow) -> Vec<ThreatEvent> {
        self.counters.server_hellos.fetch_add(1, Ordering::Relaxed);

        // Fold the negotiation outcome into the client's session
        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(&flow.reverse_key()) {
                session.negotiated_version = Some(version_name(hello.negotiated_version));
                session.negotiated_cipher = Some(cipher_name(hello.cipher_suite));
                session.ja3s = Some(hello.ja3s_hash.clone());
            }
        }

        let mut events = Vec::new();

        if self.config.detect_weak_ciphers && weak_cipher_name(hello.cipher_suite).is_some() {
            self.counters
                .weak_ciphers_detected
                .fetch_add(1, Ordering::Relaxed);
            let name = cipher_name(hello.cipher_suite);
            events.push(
                ThreatEvent::new(
                    ThreatType::WeakCipherNegotiated,
                    Severity::High,
                    flow.src_ip.to_string(),
                    flow.dst_ip.to_string(),
                    format!("Weak cipher suite negotiated: {name}"),
                )
                .with_detail("cipher_suite", name)
                .with_detail("cipher_id", format!("0x{:04x}", hello.cipher_suite))
                .with_detail("tls_version", version_name(hello.negotiated_version))
                .with_detail("ja3s", hello.ja3s_hash.clone()),
            );
        }

        events
    }

    fn handle_certificate(
        &self,
        chain: CertificateChainInfo,
        flow: &PacketFlow,
    ) -> Vec<ThreatEvent> {
        self.counters
            .certificates_extracted
            .fetch_add(1, Ordering::Relaxed);

        let src = flow.src_ip.to_string();
        let dst = flow.dst_ip.to_string();
        let mut events = Vec::new();

        // Fold the chain summary into the client's session
        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(&flow.reverse_key()) {
                session.cert_domains = chain
                    .certificates
                    .iter()
                    .flat_map(|c| c.san_domains.iter().cloned())
                    .collect();
                session.cert_self_signed = chain.has_self_signed;
                session.cert_expired = chain.has_expired;
            }
        }

        if self.config.detect_self_signed && chain.has_self_signed {
            self.counters
                .self_signed_certs
                .fetch_add(1, Ordering::Relaxed);
            let leaf = chain.certificates.first();
            events.push(
                ThreatEvent::new(
                    ThreatType::SelfSignedCertificate,
                    Severity::Medium,
                    &src,
                    &dst,
                    "Self-signed certificate detected",
                )
                .with_detail(
                    "subject_cn",
                    leaf.map(|c| c.subject_cn.clone()).unwrap_or_default(),
                )
                .with_detail(
                    "san_domains",
                    leaf.map(|c| c.san_domains.iter().take(5).cloned().collect::<Vec<_>>())
                        .unwrap_or_default(),
                )
                .with_detail("chain_length", chain.certificates.len()),
            );
        }

        if self.config.detect_expired_certs && chain.has_expired {
            self.counters.expired_certs.fetch_add(1, Ordering::Relaxed);
            events.push(
                ThreatEvent::new(
                    ThreatType::ExpiredCertificate,
                    Severity::Medium,
                    &src,
                    &dst,
                    "Expired TLS certificate detected",
                )
                .with_detail("chain_length", chain.certificates.len()),
            );
        }

        if self.config.detect_domain_fronting {
            if let Some(event) = self.detect_domain_fronting(&chain, flow) {
                events.push(event);
            }
        }

        events
    }

    /// Compare the SNI recorded at Client Hello time against the certificate
    /// presented on the reverse flow. Exact, suffix and wildcard matches all
    /// count as consistent.
    fn detect_domain_fronting(
        &self,
        chain: &CertificateChainInfo,
        flow: &PacketFlow,
    ) -> Option<ThreatEvent> {
        let mut cert_domains: Vec<String> = Vec::new();
        for cert in &chain.certificates {
            if !cert.subject_cn.is_empty() {
                cert_domains.push(cert.subject_cn.to_lowercase());
            }
            for san in &cert.san_domains {
                cert_domains.push(san.to_lowercase());
            }
        }

        let sni = {
            let mut sessions = self.sessions.lock();
            sessions
                .get(&flow.reverse_key())
                .and_then(|s| s.sni.clone())?
        };
        if cert_domains.is_empty() {
            return None;
        }

        let sni_lower = sni.to_lowercase();
        let matches = cert_domains.iter().any(|domain| {
            sni_lower == *domain
                || sni_lower.ends_with(&format!(".{domain}"))
                || (domain.starts_with("*.") && sni_lower.ends_with(&domain[1..]))
        });
        if matches {
            return None;
        }

        let cdn = CDN_PROVIDERS
            .iter()
            .find(|(suffix, _)| sni_lower.contains(suffix));

        self.counters
            .domain_fronting_suspected
            .fetch_add(1, Ordering::Relaxed);

        let severity = if cdn.is_some() {
            Severity::Medium
        } else {
            Severity::High
        };

        Some(
            ThreatEvent::new(
                ThreatType::DomainFrontingSuspected,
                severity,
                flow.src_ip.to_string(),
                flow.dst_ip.to_string(),
                format!("Potential domain fronting: SNI \"{sni}\" does not match certificate"),
            )
            .with_detail("sni", sni)
            .with_detail(
                "cert_domains",
                cert_domains.into_iter().take(5).collect::<Vec<_>>(),
            )
            .with_detail("is_cdn", cdn.is_some())
            .with_detail(
                "cdn_provider",
                cdn.map(|(_, name)| *name).unwrap_or_default(),
            ),
        )
    }

    /// Snapshot the accumulated handshake state for a flow
    pub fn session(&self, key: &FlowKey) -> Option<TlsSessionState> {
        self.sessions.lock().get(key).cloned()
    }

    /// Drop sessions whose Client Hello is older than `max_age_secs`
    pub fn clear_idle_sessions(&self, max_age_secs: i64, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock();
        let stale: Vec<FlowKey> = sessions
            .iter()
            .filter(|(_, s)| (now - s.client_hello_at).num_seconds() > max_age_secs)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            sessions.pop(&key);
        }
    }

    pub fn get_stats(&self) -> TlsStats {
        TlsStats {
            packets_analyzed: self.counters.packets_analyzed.load(Ordering::Relaxed),
            client_hellos: self.counters.client_hellos.load(Ordering::Relaxed),
            server_hellos: self.counters.server_hellos.load(Ordering::Relaxed),
            certificates_extracted: self
                .counters
                .certificates_extracted
                .load(Ordering::Relaxed),
            tls13_sessions: self.counters.tls13_sessions.load(Ordering::Relaxed),
            esni_detected: self.counters.esni_detected.load(Ordering::Relaxed),
            ech_detected: self.counters.ech_detected.load(Ordering::Relaxed),
            weak_ciphers_detected: self.counters.weak_ciphers_detected.load(Ordering::Relaxed),
            self_signed_certs: self.counters.self_signed_certs.load(Ordering::Relaxed),
            expired_certs: self.counters.expired_certs.load(Ordering::Relaxed),
            domain_fronting_suspected: self
                .counters
                .domain_fronting_suspected
                .load(Ordering::Relaxed),
            malicious_ja3_detected: self
                .counters
                .malicious_ja3_detected
                .load(Ordering::Relaxed),
            active_sessions: self.sessions.lock().len() as u64,
        }
    }
}

impl Default for TlsDecoder {
    fn default() -> Self {
        Self::new(TlsConfig::default())
    }
}

// =============================================================================
// Wire parsing
// =============================================================================

fn parse_client_hello(data: &[u8]) -> Option<ClientHelloInfo> {
    if data.len() < 38 {
        return None;
    }

    let mut info = ClientHelloInfo {
        legacy_version: read_u16(data, 0)?,
        ..Default::default()
    };

    // version(2) + random(32)
    let mut pos = 34;

    let session_id_len = *data.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_len = read_u16(data, pos)? as usize;
    pos += 2;
    let cipher_bytes = data.get(pos..pos + cipher_len)?;
    for pair in cipher_bytes.chunks_exact(2) {
        let cs = u16::from_be_bytes([pair[0], pair[1]]);
        if !is_grease(cs) {
            info.cipher_suites.push(cs);
        }
    }
    pos += cipher_len;

    let compression_len = *data.get(pos)? as usize;
    pos += 1 + compression_len;

    if let Some(ext_len) = read_u16(data, pos).map(usize::from) {
        pos += 2;
        let ext_end = (pos + ext_len).min(data.len());

        while pos + 4 <= ext_end {
            let ext_type = read_u16(data, pos)?;
            let ext_data_len = read_u16(data, pos + 2)? as usize;
            pos += 4;

            if !is_grease(ext_type) {
                info.extensions.push(ext_type);
            }

            let ext_data = data
                .get(pos..pos + ext_data_len)
                .filter(|_| pos + ext_data_len <= ext_end)
                .unwrap_or(&[]);

            match ext_type {
                EXT_SNI => info.sni = parse_sni(ext_data),
                EXT_SUPPORTED_GROUPS => {
                    info.supported_groups = parse_u16_list_prefixed(ext_data);
                }
                EXT_EC_POINT_FORMATS => {
                    if let Some(&formats_len) = ext_data.first() {
                        let end = (1 + formats_len as usize).min(ext_data.len());
                        info.ec_point_formats.extend_from_slice(&ext_data[1..end]);
                    }
                }
                EXT_ALPN => info.alpn = parse_alpn(ext_data),
                EXT_SUPPORTED_VERSIONS => {
                    info.supported_versions = parse_supported_versions(ext_data);
                }
                EXT_ESNI => info.has_esni = true,
                EXT_ENCRYPTED_CLIENT_HELLO => info.has_ech = true,
                _ => {}
            }

            pos += ext_data_len;
        }
    }

    // TLS 1.3 hides the real version inside supported_versions
    info.effective_version = info
        .supported_versions
        .iter()
        .copied()
        .max()
        .unwrap_or(info.legacy_version);

    let (ja3_string, ja3_hash) = compute_ja3(&info);
    info.ja3_string = ja3_string;
    info.ja3_hash = ja3_hash;

    Some(info)
}

fn parse_server_hello(data: &[u8]) -> Option<ServerHelloInfo> {
    if data.len() < 38 {
        return None;
    }

    let legacy_version = read_u16(data, 0)?;
    let mut pos = 34;

    let session_id_len = *data.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_suite = read_u16(data, pos)?;
    pos += 2;

    // compression method
    pos += 1;

    let mut extensions = Vec::new();
    let mut negotiated_version = legacy_version;

    if let Some(ext_len) = read_u16(data, pos).map(usize::from) {
        pos += 2;
        let ext_end = (pos + ext_len).min(data.len());

        while pos + 4 <= ext_end {
            let ext_type = read_u16(data, pos)?;
            let ext_data_len = read_u16(data, pos + 2)? as usize;
            pos += 4;

            if !is_grease(ext_type) {
                extensions.push(ext_type);
            }

            if ext_type == EXT_SUPPORTED_VERSIONS && ext_data_len == 2 {
                if let Some(v) = read_u16(data, pos) {
                    negotiated_version = v;
                }
            }

            pos += ext_data_len;
        }
    }

    // JA3S = MD5(Version,Cipher,Extensions) from the server's perspective
    let ext_str = extensions
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("-");
    let ja3s_string = format!("{legacy_version},{cipher_suite},{ext_str}");
    let ja3s_hash = fingerprint_hash(&ja3s_string);

    Some(ServerHelloInfo {
        negotiated_version,
        cipher_suite,
        ja3s_hash,
    })
}

fn parse_certificate_message(data: &[u8], now: DateTime<Utc>) -> Option<CertificateChainInfo> {
    let total_len = read_u24(data, 0)?;
    let mut chain = CertificateChainInfo::default();

    let mut offset = 3;
    let end = (3 + total_len).min(data.len());

    while offset + 3 <= end {
        let Some(cert_len) = read_u24(data, offset) else {
            break;
        };
        offset += 3;

        let Some(der) = data.get(offset..offset + cert_len) else {
            break;
        };

        let is_leaf = chain.certificates.is_empty();
        let info = cert::extract(der, is_leaf, now);
        chain.has_self_signed |= info.is_self_signed;
        chain.has_expired |= info.is_expired;
        chain.certificates.push(info);

        offset += cert_len;
    }

    if chain.certificates.is_empty() {
        None
    } else {
        Some(chain)
    }
}

/// SNI extension: list length(2) + type(1) + name length(2) + name
fn parse_sni(data: &[u8]) -> Option<String> {
    if data.len() < 5 || data[2] != 0 {
        return None;
    }
    let name_len = read_u16(data, 3)? as usize;
    let name = data.get(5..5 + name_len)?;
    Some(String::from_utf8_lossy(name).into_owned())
}

/// ALPN extension: list length(2) then length-prefixed protocol names
fn parse_alpn(data: &[u8]) -> Vec<String> {
    let mut protocols = Vec::new();
    let Some(list_len) = read_u16(data, 0).map(usize::from) else {
        return protocols;
    };

    let mut offset = 2;
    let end = (2 + list_len).min(data.len());
    while offset < end {
        let proto_len = data[offset] as usize;
        offset += 1;
        if let Some(bytes) = data.get(offset..offset + proto_len) {
            protocols.push(String::from_utf8_lossy(bytes).into_owned());
        }
        offset += proto_len;
    }
    protocols
}

/// supported_versions extension: 1-byte list length then u16 versions
fn parse_supported_versions(data: &[u8]) -> Vec<u16> {
    let mut versions = Vec::new();
    let Some(&list_len) = data.first() else {
        return versions;
    };

    let end = (1 + list_len as usize).min(data.len());
    let mut i = 1;
    while i + 2 <= end {
        let v = u16::from_be_bytes([data[i], data[i + 1]]);
        if !is_grease(v) {
            versions.push(v);
        }
        i += 2;
    }
    versions
}

/// 2-byte-length-prefixed list of u16s (supported groups), GREASE-filtered
fn parse_u16_list_prefixed(data: &[u8]) -> Vec<u16> {
    let mut out = Vec::new();
    let Some(list_len) = read_u16(data, 0).map(usize::from) else {
        return out;
    };

    let end = (2 + list_len).min(data.len());
    let mut i = 2;
    while i + 2 <= end {
        let v = u16::from_be_bytes([data[i], data[i + 1]]);
        if !is_grease(v) {
            out.push(v);
        }
        i += 2;
    }
    out
}

/// JA3 = MD5(Version,Ciphers,Extensions,Groups,PointFormats), GREASE-filtered,
/// fields dash-joined in decimal. Must match the published algorithm
/// byte-for-byte for blocklist interoperability.
fn compute_ja3(info: &ClientHelloInfo) -> (String, String) {
    let join = |values: &[u16]| {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("-")
    };
    let formats = info
        .ec_point_formats
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("-");

    let ja3_string = format!(
        "{},{},{},{},{}",
        info.legacy_version,
        join(&info.cipher_suites),
        join(&info.extensions),
        join(&info.supported_groups),
        formats
    );
    let ja3_hash = fingerprint_hash(&ja3_string);
    (ja3_string, ja3_hash)
}
