//! Minimal SPNEGO (RFC 4178) framing for Kerberos mechanism tokens.

/// DER-encoded OID 1.3.6.1.5.5.2 (SPNEGO).
const SPNEGO_OID: &[u8] = &[0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// DER-encoded OID 1.2.840.113554.1.2.2 (Kerberos V5).
const KRB5_OID: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02,
];

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(0x80 | bytes.len() as u8);
    out.extend_from_slice(&bytes);
    out
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&der_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// Offset of the content of a DER header at the start of `token`.
fn header_len(token: &[u8]) -> Option<usize> {
    let first = *token.get(1)?;
    if first < 0x80 {
        Some(2)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || token.len() < 2 + n {
            None
        } else {
            Some(2 + n)
        }
    }
}

/// Whether the token is already an SPNEGO InitialContextToken or a bare
/// NegTokenResp.
pub fn is_spnego(token: &[u8]) -> bool {
    match token.first() {
        Some(0x60) => header_len(token)
            .map(|h| token[h..].starts_with(SPNEGO_OID))
            .unwrap_or(false),
        Some(0xa1) => true,
        _ => false,
    }
}

/// Wrap a Kerberos mechanism token in a NegTokenInit offering only krb5.
pub fn wrap_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = der(0xa0, &der(0x30, KRB5_OID));
    let mech_token = der(0xa2, &der(0x04, mech_token));
    let mut seq = mech_types;
    seq.extend_from_slice(&mech_token);
    let neg_token_init = der(0xa0, &der(0x30, &seq));

    let mut inner = SPNEGO_OID.to_vec();
    inner.extend_from_slice(&neg_token_init);
    der(0x60, &inner)
}

/// Pass SPNEGO tokens through and wrap anything else.
pub fn ensure_wrapped(token: Vec<u8>) -> Vec<u8> {
    if is_spnego(&token) {
        token
    } else {
        wrap_init(&token)
    }
}
