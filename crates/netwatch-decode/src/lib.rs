//! NetWatch Wire Decoders
//!
//! Best-effort protocol decoders that turn raw packet payloads into typed
//! threat events:
//!
//! - **TLS**: handshake metadata extraction without decryption — JA3/JA3S
//!   fingerprints, SNI, ALPN, cipher policy, certificate heuristics,
//!   domain-fronting correlation
//! - **SMB**: SMB1/SMB2 command dispatch, administrative share and sensitive
//!   file detection, lateral-movement and enumeration patterns
//! - **LDAP**: BER-walked search requests, sensitive attribute/base
//!   detection, Kerberoasting and AS-REP roasting reconnaissance
//!
//! Every decoder is a classifier over noisy traffic, not a validator:
//! truncated or malformed byte sequences yield no events and never an error.

pub mod cert;
pub mod ldap;
pub mod smb;
pub mod tls;

pub use ldap::{LdapConfig, LdapDecoder, LdapStats};
pub use smb::{SmbConfig, SmbDecoder, SmbStats};
pub use tls::{TlsAnalysis, TlsConfig, TlsDecoder, TlsMessageKind, TlsSessionState, TlsStats};

/// GREASE values excluded from fingerprints and policy checks (RFC 8701)
pub(crate) fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 12) == ((value >> 4) & 0x0f)
}

/// Big-endian u16 read, length-checked
pub(crate) fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Big-endian 3-byte length read (TLS handshake/certificate lengths)
pub(crate) fn read_u24(data: &[u8], offset: usize) -> Option<usize> {
    let bytes = data.get(offset..offset + 3)?;
    Some(((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize)
}

/// Little-endian u16 read (SMB2 header fields)
pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grease_values() {
        for v in [
            0x0a0au16, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a,
            0x9a9a, 0xaaaa, 0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
        ] {
            assert!(is_grease(v), "{v:#06x} should be GREASE");
        }

        assert!(!is_grease(0x1301));
        assert!(!is_grease(0xc02f));
        assert!(!is_grease(0x0a1a));
        assert!(!is_grease(0x002a));
    }

    #[test]
    fn test_bounded_reads() {
        let data = [0x01u8, 0x02, 0x03];
        assert_eq!(read_u16(&data, 0), Some(0x0102));
        assert_eq!(read_u16(&data, 2), None);
        assert_eq!(read_u24(&data, 0), Some(0x010203));
        assert_eq!(read_u24(&data, 1), None);
        assert_eq!(read_u16_le(&data, 0), Some(0x0201));
    }
}
