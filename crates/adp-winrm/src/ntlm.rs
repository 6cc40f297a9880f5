//! NTLMv2 message construction (MS-NLMP).
//!
//! Implements the three-message handshake:
//! 1. Client sends Type 1 (Negotiate) message
//! 2. Server responds with Type 2 (Challenge) message
//! 3. Client sends Type 3 (Authenticate) message

use adp_core::{AdError, AdResult};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// AV pair id carrying the server's FILETIME.
const MSV_AV_TIMESTAMP: u16 = 0x0007;
const MSV_AV_EOL: u16 = 0x0000;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Decoded Type 2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    /// Server timestamp from the target info, if present.
    pub fn timestamp(&self) -> Option<u64> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            if id == MSV_AV_EOL || rest.len() < 4 + len {
                return None;
            }
            if id == MSV_AV_TIMESTAMP && len == 8 {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&rest[4..12]);
                return Some(u64::from_le_bytes(ts));
            }
            rest = &rest[4 + len..];
        }
        None
    }
}

/// Client credentials for one handshake.
#[derive(Clone)]
pub struct NtlmCredentials {
    pub username: String,
    pub password: String,
    pub domain: String,
    pub workstation: String,
}

impl NtlmCredentials {
    /// Split `DOMAIN\user` and `user@domain` forms.
    pub fn from_login(login: &str, password: &str) -> Self {
        let (domain, username) = if let Some((d, u)) = login.split_once('\\') {
            (d.to_string(), u.to_string())
        } else if let Some((u, d)) = login.split_once('@') {
            (d.to_string(), u.to_string())
        } else {
            (String::new(), login.to_string())
        };
        let workstation = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "WORKSTATION".to_string())
            .to_uppercase();
        Self {
            username,
            password: password.to_string(),
            domain,
            workstation,
        }
    }
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> AdResult<[u8; 16]> {
    let mut mac = Hmac::<Md5>::new_from_slice(key)
        .map_err(|e| AdError::auth(format!("HMAC error: {}", e)))?;
    for p in parts {
        mac.update(p);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// NT hash: MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(utf16le(password)));
    out
}

/// NTOWFv2: HMAC-MD5(NT hash, UTF16LE(UPPER(user) + domain)).
pub fn ntowf_v2(creds: &NtlmCredentials) -> AdResult<[u8; 16]> {
    let identity = utf16le(&format!("{}{}", creds.username.to_uppercase(), creds.domain));
    hmac_md5(&nt_hash(&creds.password), &[&identity])
}

/// Current time as a Windows FILETIME (100 ns ticks since 1601).
pub fn filetime_now() -> u64 {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000
        + u64::from(since_epoch.subsec_nanos() / 100)
}

/// Build NTLM Type 1 (Negotiate) message.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation buffers.
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

fn read_security_buffer(msg: &[u8], at: usize) -> AdResult<&[u8]> {
    if msg.len() < at + 8 {
        return Err(AdError::auth("invalid NTLM challenge: truncated header"));
    }
    let len = u16::from_le_bytes([msg[at], msg[at + 1]]) as usize;
    let offset = u32::from_le_bytes([msg[at + 4], msg[at + 5], msg[at + 6], msg[at + 7]]) as usize;
    msg.get(offset..offset + len)
        .ok_or_else(|| AdError::auth("invalid NTLM challenge: buffer out of range"))
}

/// Parse NTLM Type 2 (Challenge) message.
pub fn parse_challenge(msg: &[u8]) -> AdResult<Challenge> {
    if msg.len() < 32 || &msg[..8] != SIGNATURE {
        return Err(AdError::auth("invalid NTLM challenge: bad signature"));
    }
    let msg_type = u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]);
    if msg_type != 2 {
        return Err(AdError::auth(format!(
            "invalid NTLM challenge: message type {}",
            msg_type
        )));
    }
    let flags = u32::from_le_bytes([msg[20], msg[21], msg[22], msg[23]]);
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&msg[24..32]);
    let target_info = if flags & NEGOTIATE_TARGET_INFO != 0 && msg.len() >= 48 {
        read_security_buffer(msg, 40)?.to_vec()
    } else {
        Vec::new()
    };
    Ok(Challenge {
        flags,
        server_challenge,
        target_info,
    })
}

/// NTLMv2 client blob (MS-NLMP 2.2.2.7).
fn client_blob(timestamp: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

/// Build NTLM Type 3 (Authenticate) message with explicit randomness, so
/// the computation can be checked against known vectors.
pub fn authenticate_message_with(
    creds: &NtlmCredentials,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now: u64,
) -> AdResult<Vec<u8>> {
    let ntlmv2_hash = ntowf_v2(creds)?;
    let server_timestamp = challenge.timestamp();
    let timestamp = server_timestamp.unwrap_or(now);

    let blob = client_blob(timestamp, &client_challenge, &challenge.target_info);
    let nt_proof = hmac_md5(&ntlmv2_hash, &[&challenge.server_challenge, &blob])?;
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // With a server timestamp the LM response is all zeroes.
    let lm_response = if server_timestamp.is_some() {
        vec![0u8; 24]
    } else {
        let mut lm = hmac_md5(&ntlmv2_hash, &[&challenge.server_challenge, &client_challenge])?.to_vec();
        lm.extend_from_slice(&client_challenge);
        lm
    };

    let domain = utf16le(&creds.domain);
    let user = utf16le(&creds.username);
    let workstation = utf16le(&creds.workstation);

    // Fixed header (64) + version (8) + MIC (16).
    let payload_offset: u32 = 88;
    let mut msg = Vec::with_capacity(
        payload_offset as usize
            + lm_response.len()
            + nt_response.len()
            + domain.len()
            + user.len()
            + workstation.len(),
    );
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());

    let mut offset = payload_offset;
    for field in [&lm_response, &nt_response, &domain, &user, &workstation] {
        let len = field.len() as u16;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&offset.to_le_bytes());
        offset += u32::from(len);
    }
    // Encrypted random session key (empty)
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    let flags = CLIENT_FLAGS & (challenge.flags | NEGOTIATE_UNICODE | NEGOTIATE_NTLM);
    msg.extend_from_slice(&flags.to_le_bytes());

    msg.resize(payload_offset as usize, 0);
    msg.extend_from_slice(&lm_response);
    msg.extend_from_slice(&nt_response);
    msg.extend_from_slice(&domain);
    msg.extend_from_slice(&user);
    msg.extend_from_slice(&workstation);
    Ok(msg)
}

/// Build NTLM Type 3 (Authenticate) message.
pub fn authenticate_message(creds: &NtlmCredentials, challenge: &Challenge) -> AdResult<Vec<u8>> {
    authenticate_message_with(creds, challenge, rand::random(), filetime_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> NtlmCredentials {
        NtlmCredentials {
            username: "User".into(),
            password: "Password".into(),
            domain: "Domain".into(),
            workstation: "COMPUTER".into(),
        }
    }

    fn challenge_message(target_info: &[u8]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0u8; 8]); // target name
        msg.extend_from_slice(&(NEGOTIATE_UNICODE | NEGOTIATE_TARGET_INFO | NEGOTIATE_NTLM).to_le_bytes());
        msg.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        msg.extend_from_slice(&[0u8; 8]);
        let len = target_info.len() as u16;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(target_info);
        msg
    }

    #[test]
    fn nt_hash_matches_reference_vector() {
        // MS-NLMP 4.2.4.1.1: NTOWFv1("Password")
        assert_eq!(
            nt_hash("Password"),
            [
                0xa4, 0xf4, 0x9c, 0x40, 0x65, 0x10, 0xbd, 0xca, 0xb6, 0x82, 0x4e, 0xe7, 0xc3,
                0x0f, 0xd8, 0x52
            ]
        );
    }

    #[test]
    fn ntowf_v2_matches_reference_vector() {
        // MS-NLMP 4.2.4.1.1: NTOWFv2("Password", "User", "Domain")
        assert_eq!(
            ntowf_v2(&creds()).unwrap(),
            [
                0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e,
                0xf0, 0x2e, 0x3f
            ]
        );
    }

    #[test]
    fn negotiate_message_shape() {
        let msg = negotiate_message();
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 1);
        assert_eq!(msg.len(), 32);
    }

    #[test]
    fn parses_challenge_with_timestamp() {
        let mut info = Vec::new();
        info.extend_from_slice(&MSV_AV_TIMESTAMP.to_le_bytes());
        info.extend_from_slice(&8u16.to_le_bytes());
        info.extend_from_slice(&42u64.to_le_bytes());
        info.extend_from_slice(&[0, 0, 0, 0]);
        let c = parse_challenge(&challenge_message(&info)).unwrap();
        assert_eq!(c.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(c.target_info, info);
        assert_eq!(c.timestamp(), Some(42));
    }

    #[test]
    fn rejects_non_challenge() {
        assert!(parse_challenge(&negotiate_message()).is_err());
        assert!(parse_challenge(b"short").is_err());
    }

    #[test]
    fn authenticate_message_layout() {
        let c = parse_challenge(&challenge_message(&[0, 0, 0, 0])).unwrap();
        let msg = authenticate_message_with(&creds(), &c, [9; 8], 7).unwrap();
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 3);

        // NT response: 16-byte proof + 28-byte blob header + target info + 4
        let nt_len = u16::from_le_bytes([msg[20], msg[21]]) as usize;
        assert_eq!(nt_len, 16 + 28 + 4 + 4);
        let nt_off = u32::from_le_bytes([msg[24], msg[25], msg[26], msg[27]]) as usize;
        let blob = &msg[nt_off + 16..nt_off + nt_len];
        assert_eq!(&blob[..4], &[1, 1, 0, 0]);
        assert_eq!(&blob[8..16], &7u64.to_le_bytes());
        assert_eq!(&blob[16..24], &[9; 8]);

        let user_len = u16::from_le_bytes([msg[36], msg[37]]) as usize;
        let user_off = u32::from_le_bytes([msg[40], msg[41], msg[42], msg[43]]) as usize;
        assert_eq!(&msg[user_off..user_off + user_len], utf16le("User").as_slice());
    }

    #[test]
    fn splits_login_forms() {
        let c = NtlmCredentials::from_login("CORP\\alice", "pw");
        assert_eq!((c.domain.as_str(), c.username.as_str()), ("CORP", "alice"));
        let c = NtlmCredentials::from_login("alice@corp.example", "pw");
        assert_eq!((c.domain.as_str(), c.username.as_str()), ("corp.example", "alice"));
        let c = NtlmCredentials::from_login("alice", "pw");
        assert_eq!(c.domain, "");
    }
}
