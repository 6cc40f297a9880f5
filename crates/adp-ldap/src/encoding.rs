//! String and binary encodings AD expects over LDAP.

use adp_core::ids::validate_guid;
use adp_core::{AdError, AdResult};

/// Escape a value for use inside a search filter (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// Every byte as `\xx`, for binary filter assertions.
pub fn escape_filter_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

/// Escape an attribute value for use in an RDN (RFC 4514).
pub fn escape_rdn_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len() * 2);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\00"),
            ' ' if i == 0 || i == last => out.push_str("\\20"),
            '#' if i == 0 => out.push_str("\\23"),
            c => out.push(c),
        }
    }
    out
}

/// `DC=example,DC=com` for `EXAMPLE.COM`.
pub fn domain_dn_from_realm(realm: &str) -> String {
    realm
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| format!("DC={}", p.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}

/// DN of the parent container. A container that already is a DN is used
/// as is; a bare name becomes `CN=<container>,<domainDN>`.
pub fn container_dn(container: &str, domain_dn: &str) -> String {
    let container = container.trim();
    if container.contains('=') {
        container.to_string()
    } else if container.is_empty() {
        domain_dn.to_string()
    } else {
        format!("CN={},{}", escape_rdn_value(container), domain_dn)
    }
}

/// `CN=<name>,CN=<container>,<domainDN>`.
pub fn build_dn(name: &str, container: &str, domain_dn: &str) -> String {
    format!("CN={},{}", escape_rdn_value(name), container_dn(container, domain_dn))
}

/// `unicodePwd` value: the password in double quotes, UTF-16LE, no BOM.
pub fn encode_password(password: &str) -> Vec<u8> {
    format!("\"{}\"", password)
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// `objectGUID` bytes of a GUID string: the first three groups are
/// little-endian, the rest is in string order.
pub fn guid_to_bytes(guid: &str) -> AdResult<[u8; 16]> {
    let bare = validate_guid(guid)?.replace('-', "");
    let decoded = hex::decode(&bare).map_err(|e| AdError::validation(format!("'{}' is not a valid GUID: {}", guid, e)))?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&decoded);
    raw[0..4].reverse();
    raw[4..6].reverse();
    raw[6..8].reverse();
    Ok(raw)
}

pub fn guid_from_bytes(bytes: &[u8]) -> AdResult<String> {
    if bytes.len() != 16 {
        return Err(AdError::parse(format!("objectGUID has {} bytes, expected 16", bytes.len())));
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(bytes);
    raw[0..4].reverse();
    raw[4..6].reverse();
    raw[6..8].reverse();
    let h = hex::encode(raw);
    Ok(format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32]))
}

/// `(objectGUID=\xx...)`
pub fn guid_filter(guid: &str) -> AdResult<String> {
    Ok(format!("(objectGUID={})", escape_filter_bytes(&guid_to_bytes(guid)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "01234567-89ab-cdef-0123-456789abcdef";
    const G_BYTES: [u8; 16] = [
        0x67, 0x45, 0x23, 0x01, 0xab, 0x89, 0xef, 0xcd, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
    ];

    #[test]
    fn filter_escaping() {
        assert_eq!(escape_filter_value("a*(b)\\c\0"), "a\\2a\\28b\\29\\5cc\\00");
        assert_eq!(escape_filter_value("plain"), "plain");
    }

    #[test]
    fn rdn_escaping() {
        assert_eq!(escape_rdn_value("Smith, John"), "Smith\\, John");
        assert_eq!(escape_rdn_value(" lead"), "\\20lead");
        assert_eq!(escape_rdn_value("trail "), "trail\\20");
        assert_eq!(escape_rdn_value("#1"), "\\231");
        assert_eq!(escape_rdn_value("a=b+c"), "a\\=b\\+c");
        assert_eq!(escape_rdn_value("Zoë "), "Zoë\\20");
    }

    #[test]
    fn dn_construction() {
        assert_eq!(build_dn("alice", "Users", "DC=x,DC=com"), "CN=alice,CN=Users,DC=x,DC=com");
        assert_eq!(
            build_dn("alice", "OU=Sales,DC=x,DC=com", "DC=x,DC=com"),
            "CN=alice,OU=Sales,DC=x,DC=com"
        );
        assert_eq!(domain_dn_from_realm("EXAMPLE.COM"), "DC=example,DC=com");
    }

    #[test]
    fn password_is_quoted_utf16le() {
        assert_eq!(encode_password("ab"), vec![0x22, 0, 0x61, 0, 0x62, 0, 0x22, 0]);
    }

    #[test]
    fn guid_bytes_are_mixed_endian() {
        assert_eq!(guid_to_bytes(G).unwrap(), G_BYTES);
        assert_eq!(guid_to_bytes(&format!("{{{}}}", G.to_uppercase())).unwrap(), G_BYTES);
        assert_eq!(guid_from_bytes(&G_BYTES).unwrap(), G);
        assert!(guid_from_bytes(&G_BYTES[..8]).is_err());
        assert!(guid_to_bytes("not-a-guid").is_err());
    }

    #[test]
    fn guid_search_filter() {
        assert_eq!(
            guid_filter(G).unwrap(),
            "(objectGUID=\\67\\45\\23\\01\\ab\\89\\ef\\cd\\01\\23\\45\\67\\89\\ab\\cd\\ef)"
        );
    }
}
