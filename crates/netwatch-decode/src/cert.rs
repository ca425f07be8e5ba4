//! Certificate Heuristic Extractor
//!
//! Pulls identity metadata out of raw DER certificate bytes by scanning for
//! known OID byte sequences rather than walking the full X.509 grammar.
//! This is deliberately NOT a validator: it tolerates arbitrary input and
//! returns empty fields when a marker cannot be located. A future strict
//! parser belongs in its own module; nothing here verifies signatures or
//! chain of trust.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Subject Common Name attribute (2.5.4.3)
const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
/// Organization attribute (2.5.4.10)
const OID_ORGANIZATION: &[u8] = &[0x55, 0x04, 0x0a];
/// Subject Alternative Name extension (2.5.29.17)
const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];

/// DER tag for a SAN dNSName entry
const TAG_DNS_NAME: u8 = 0x82;
/// DER tag for UTCTime
const TAG_UTC_TIME: u8 = 0x17;

/// How far past the SAN OID to scan for dNSName entries
const SAN_SEARCH_WINDOW: usize = 500;
/// Cap on extracted SAN domains
const MAX_SAN_DOMAINS: usize = 20;

/// Metadata extracted from one certificate. Immutable after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_cn: String,
    pub issuer_org: String,
    pub san_domains: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub is_self_signed: bool,
    pub is_expired: bool,
    pub is_not_yet_valid: bool,
    pub is_leaf: bool,
    /// SHA-256 of the raw DER bytes
    pub sha256: String,
    pub raw_length: usize,
}

/// Extract certificate metadata from DER bytes.
///
/// Self-signed detection is an approximation carried over for blocklist
/// compatibility: it substring-matches the subject CN inside the issuer
/// organization, which is NOT the cryptographic check (exact DN equality
/// plus signature verification with the embedded key).
pub fn extract(der: &[u8], is_leaf: bool, now: DateTime<Utc>) -> CertificateInfo {
    let subject_cn = find_attribute_string(der, OID_COMMON_NAME);
    let issuer_org = find_attribute_string(der, OID_ORGANIZATION);

    let is_self_signed = !subject_cn.is_empty()
        && !issuer_org.is_empty()
        && issuer_org
            .to_lowercase()
            .contains(&subject_cn.to_lowercase());

    let (not_before, not_after) = find_validity_window(der);
    let is_expired = not_after.map(|t| t < now).unwrap_or(false);
    let is_not_yet_valid = not_before.map(|t| t > now).unwrap_or(false);

    CertificateInfo {
        subject_cn,
        issuer_org,
        san_domains: find_san_domains(der),
        not_before,
        not_after,
        is_self_signed,
        is_expired,
        is_not_yet_valid,
        is_leaf,
        sha256: hex::encode(Sha256::digest(der)),
        raw_length: der.len(),
    }
}

/// Locate an OID and return the length-prefixed string following its tag
/// byte. Empty string when the OID is absent or the bytes don't line up.
fn find_attribute_string(der: &[u8], oid: &[u8]) -> String {
    let Some(pos) = find_subslice(der, oid) else {
        return String::new();
    };

    // After the OID content: string tag (1 byte), length (1 byte), value
    let len_idx = pos + oid.len() + 1;
    let Some(&str_len) = der.get(len_idx) else {
        return String::new();
    };

    let start = len_idx + 1;
    let end = start + str_len as usize;
    match der.get(start..end) {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => String::new(),
    }
}

/// Scan past the SAN extension OID for dNSName entries.
fn find_san_domains(der: &[u8]) -> Vec<String> {
    let mut domains = Vec::new();

    let Some(pos) = find_subslice(der, OID_SUBJECT_ALT_NAME) else {
        return domains;
    };

    let window_end = (pos + SAN_SEARCH_WINDOW).min(der.len());
    let window = &der[pos..window_end];

    let mut i = 0;
    while i + 2 < window.len() && domains.len() < MAX_SAN_DOMAINS {
        if window[i] == TAG_DNS_NAME {
            let len = window[i + 1] as usize;
            if let Some(bytes) = window.get(i + 2..i + 2 + len) {
                let domain = String::from_utf8_lossy(bytes);
                if !domain.is_empty() && domain.contains('.') {
                    domains.push(domain.into_owned());
                }
            }
            i += 2 + len;
        } else {
            i += 1;
        }
    }

    domains
}

/// Find the first UTCTime pair in the DER and treat it as the validity
/// window. The Validity SEQUENCE is the only place two adjacent UTCTime
/// values occur in a certificate, so the first two hits are notBefore and
/// notAfter.
fn find_validity_window(der: &[u8]) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut times = Vec::with_capacity(2);
    let mut i = 0;

    while i + 15 <= der.len() && times.len() < 2 {
        if der[i] == TAG_UTC_TIME && der[i + 1] == 13 {
            if let Some(ts) = parse_utc_time(&der[i + 2..i + 15]) {
                times.push(ts);
                i += 15;
                continue;
            }
        }
        i += 1;
    }

    let mut iter = times.into_iter();
    (iter.next(), iter.next())
}

/// Parse a 13-byte UTCTime body: `YYMMDDHHMMSSZ`.
fn parse_utc_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if bytes.len() != 13 || bytes[12] != b'Z' {
        return None;
    }

    let digits: Vec<u32> = bytes[..12]
        .iter()
        .map(|b| (*b as char).to_digit(10))
        .collect::<Option<_>>()?;

    let yy = digits[0] * 10 + digits[1];
    // X.509 pivot: 00-49 => 20xx, 50-99 => 19xx
    let year = if yy >= 50 { 1900 + yy } else { 2000 + yy } as i32;
    let month = digits[2] * 10 + digits[3];
    let day = digits[4] * 10 + digits[5];
    let hour = digits[6] * 10 + digits[7];
    let minute = digits[8] * 10 + digits[9];
    let second = digits[10] * 10 + digits[11];

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let dt = date.and_hms_opt(hour, minute, second)?;
    Some(DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic DER fragment: OID + string tag + length + value
    fn attr(oid: &[u8], value: &str) -> Vec<u8> {
        let mut out = oid.to_vec();
        out.push(0x0c); // UTF8String
        out.push(value.len() as u8);
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn san(domains: &[&str]) -> Vec<u8> {
        let mut out = OID_SUBJECT_ALT_NAME.to_vec();
        out.push(0x04); // wrapping OCTET STRING, scanned over
        for d in domains {
            out.push(TAG_DNS_NAME);
            out.push(d.len() as u8);
            out.extend_from_slice(d.as_bytes());
        }
        out
    }

    fn utc(s: &str) -> Vec<u8> {
        let mut out = vec![TAG_UTC_TIME, 13];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_cn_and_org_extraction() {
        let mut der = attr(OID_COMMON_NAME, "www.example.com");
        der.extend(attr(OID_ORGANIZATION, "Example Corp"));

        let info = extract(&der, true, Utc::now());
        assert_eq!(info.subject_cn, "www.example.com");
        assert_eq!(info.issuer_org, "Example Corp");
        assert!(!info.is_self_signed);
    }

    #[test]
    fn test_self_signed_heuristic() {
        let mut der = attr(OID_COMMON_NAME, "internal-ca");
        der.extend(attr(OID_ORGANIZATION, "Internal-CA Root"));

        let info = extract(&der, true, Utc::now());
        assert!(info.is_self_signed);
    }

    #[test]
    fn test_san_extraction() {
        let der = san(&["cdn.akamaized.net", "static.akamaized.net"]);
        let info = extract(&der, true, Utc::now());
        assert_eq!(
            info.san_domains,
            vec!["cdn.akamaized.net", "static.akamaized.net"]
        );
    }

    #[test]
    fn test_expired_certificate() {
        let mut der = utc("200101000000Z");
        der.extend(utc("210101000000Z"));

        let info = extract(&der, true, Utc::now());
        assert!(info.is_expired);
        assert!(!info.is_not_yet_valid);
        assert_eq!(
            info.not_after.unwrap(),
            DateTime::parse_from_rfc3339("2021-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_garbage_input_yields_empty_fields() {
        let info = extract(&[0xde, 0xad, 0xbe, 0xef], true, Utc::now());
        assert!(info.subject_cn.is_empty());
        assert!(info.san_domains.is_empty());
        assert!(info.not_after.is_none());
        assert!(!info.is_self_signed);
    }

    #[test]
    fn test_truncated_attribute() {
        // OID present but length byte points past the buffer
        let mut der = OID_COMMON_NAME.to_vec();
        der.push(0x0c);
        der.push(200);
        der.extend_from_slice(b"short");

        let info = extract(&der, true, Utc::now());
        assert!(info.subject_cn.is_empty());
    }
}
