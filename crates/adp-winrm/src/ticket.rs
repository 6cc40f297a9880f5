//! Keytab logins without a system Kerberos library.
//!
//! The AS, TGS and AP messages come from the `sspi` generators; only the
//! client key differs from a password login, so the encrypted timestamp and
//! the AS-REP decryption are done here with the keytab key. PA-FX-FAST is
//! not used and the KDC is assumed to require pre-authentication.

use crate::kerberos::{KdcNetworkClient, Keytab, KeytabEntry, Krb5Config};
use adp_core::{AdError, AdResult};
use log::debug;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2,
    ExplicitContextTag8, IntegerAsn1, ObjectIdentifierAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::gss_api::{AP_REQ_TOKEN_ID, AUTHENTICATOR_CHECKSUM_TYPE};
use picky_krb::constants::key_usages::AS_REP_ENC;
use picky_krb::constants::types::{
    NT_PRINCIPAL, PA_ENC_TIMESTAMP, PA_ENC_TIMESTAMP_KEY_USAGE, PA_PAC_REQUEST_TYPE,
};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{
    EncryptedData, KerbPaPacRequest, KerberosStringAsn1, KerberosTime, PaData, PaEncTsEnc,
    PrincipalName,
};
use picky_krb::gss_api::{ApplicationTag0, KrbMessage};
use picky_krb::messages::{AsRep, EncAsRepPart, KrbError, TgsRep};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sspi::kerberos::client::extractors::extract_session_key_from_tgs_rep;
use sspi::kerberos::client::generators::{
    generate_ap_req, generate_as_req, generate_as_req_kdc_body, generate_authenticator,
    generate_tgs_req, ChecksumOptions, ChecksumValues, EncKey, GenerateAsReqOptions,
    GenerateAuthenticatorOptions, GenerateTgsReqOptions, AUTHENTICATOR_DEFAULT_CHECKSUM,
};
use sspi::kerberos::EncryptionParams;
use sspi::{ClientRequestFlags, Secret};
use std::fmt::Debug;
use time::OffsetDateTime;

const TGT_SERVICE: &str = "krbtgt";
const GSS_C_MUTUAL_FLAG: u32 = 0x02;

/// Where and how to log in.
pub struct TicketRequest<'a> {
    pub principal: &'a str,
    pub spn: &'a str,
    pub kdc: &'a str,
    pub hostname: &'a str,
    pub config: &'a Krb5Config,
}

fn auth_err(e: impl std::fmt::Display) -> AdError {
    AdError::auth(format!("Kerberos authentication failed: {}", e))
}

/// The keytab entry to authenticate with: the first permitted encryption
/// type the keytab holds for `principal`, newest key version first.
pub fn select_key<'k>(
    keytab: &'k Keytab,
    principal: &str,
    permitted: &[CipherSuite],
) -> AdResult<(&'k KeytabEntry, CipherSuite)> {
    for suite in permitted {
        let wanted = u32::from(suite);
        let best = keytab
            .entries
            .iter()
            .filter(|e| e.principal().eq_ignore_ascii_case(principal))
            .filter(|e| u32::from(e.enctype) == wanted)
            .max_by_key(|e| e.kvno);
        if let Some(entry) = best {
            return Ok((entry, suite.clone()));
        }
    }
    Err(AdError::transport(format!(
        "keytab holds no key for '{}' with a permitted encryption type",
        principal
    )))
}

/// PA-ENC-TIMESTAMP for `now`, encrypted with the client key.
pub fn encrypted_timestamp(suite: &CipherSuite, key: &[u8], now: OffsetDateTime) -> AdResult<PaData> {
    let timestamp = PaEncTsEnc {
        patimestamp: ExplicitContextTag0::from(KerberosTime::from(GeneralizedTime::from(now))),
        pausec: Optional::from(Some(ExplicitContextTag1::from(IntegerAsn1::from(
            now.microsecond().to_be_bytes().to_vec(),
        )))),
    };
    let plain = picky_asn1_der::to_vec(&timestamp).map_err(auth_err)?;
    let cipher = suite
        .cipher()
        .encrypt(key, PA_ENC_TIMESTAMP_KEY_USAGE, &plain)
        .map_err(auth_err)?;
    let data = EncryptedData {
        etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(suite)])),
        kvno: Optional::from(None),
        cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
    };
    Ok(PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_ENC_TIMESTAMP.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
            picky_asn1_der::to_vec(&data).map_err(auth_err)?,
        )),
    })
}

fn pac_request() -> AdResult<PaData> {
    let request = KerbPaPacRequest {
        include_pac: ExplicitContextTag0::from(true),
    };
    Ok(PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_PAC_REQUEST_TYPE.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
            picky_asn1_der::to_vec(&request).map_err(auth_err)?,
        )),
    })
}

/// RFC 4120 error codes worth naming in a message.
pub fn krb_error_name(code: u32) -> &'static str {
    match code {
        6 => "client not found",
        7 => "service not found",
        14 => "encryption type not supported",
        18 => "client credentials revoked",
        23 => "password expired",
        24 => "pre-authentication failed",
        25 => "pre-authentication required",
        31 => "integrity check failed",
        37 => "clock skew too great",
        _ => "KDC error",
    }
}

/// The expected reply, or the KDC's KRB-ERROR as an Auth error.
fn decode_reply<T: DeserializeOwned>(reply: &[u8], what: &str) -> AdResult<T> {
    if let Ok(message) = picky_asn1_der::from_bytes::<T>(reply) {
        return Ok(message);
    }
    match picky_asn1_der::from_bytes::<KrbError>(reply) {
        Ok(err) => {
            let code = err.0.error_code.0;
            Err(AdError::auth(format!(
                "KDC rejected the {}: {} ({})",
                what,
                krb_error_name(code),
                code
            )))
        }
        Err(e) => Err(AdError::auth(format!("unreadable KDC reply to the {}: {}", what, e))),
    }
}

/// TGT session key and its encryption type, from an AS-REP sealed with
/// the client key.
fn as_session_key(
    as_rep: &AsRep,
    suite: &CipherSuite,
    key: &[u8],
) -> AdResult<(Secret<Vec<u8>>, CipherSuite)> {
    let plain = suite
        .cipher()
        .decrypt(key, AS_REP_ENC, &as_rep.0.enc_part.0.cipher.0 .0)
        .map_err(auth_err)?;
    let part: EncAsRepPart = picky_asn1_der::from_bytes(&plain).map_err(auth_err)?;
    let key_type = CipherSuite::try_from(part.0.key.0.key_type.0.as_unsigned_bytes_be())
        .map_err(auth_err)?;
    Ok((part.0.key.0.key_value.0 .0.into(), key_type))
}

/// RFC 4121 authenticator checksum with the given GSS flags.
pub fn gss_checksum(flags: u32) -> ChecksumValues {
    let mut bytes = AUTHENTICATOR_DEFAULT_CHECKSUM;
    bytes[20..24].copy_from_slice(&flags.to_le_bytes());
    ChecksumValues::from(bytes)
}

/// Frame a Kerberos message as a GSS-API initial context token.
pub fn gss_frame<T: Serialize + Debug + PartialEq>(token_id: [u8; 2], message: T) -> AdResult<Vec<u8>> {
    let framed = ApplicationTag0(KrbMessage {
        krb5_oid: ObjectIdentifierAsn1::from(picky_asn1_x509::oids::krb5()),
        krb5_token_id: token_id,
        krb_msg: message,
    });
    picky_asn1_der::to_vec(&framed).map_err(auth_err)
}

fn random_key(suite: &CipherSuite) -> Vec<u8> {
    let cipher = suite.cipher();
    let seed = (0..cipher.key_size()).map(|_| rand::random::<u8>()).collect();
    cipher.random_to_key(seed)
}

/// Log in with the keytab and return the GSS-framed AP-REQ for the SPN.
pub fn keytab_ap_req(
    request: &TicketRequest<'_>,
    keytab: &Keytab,
    network: &KdcNetworkClient,
) -> AdResult<Vec<u8>> {
    let permitted = request.config.permitted_ciphers();
    let (entry, suite) = select_key(keytab, request.principal, &permitted)?;
    let realm = entry.realm.to_uppercase();
    let udp_limit = request.config.udp_preference_limit();
    debug!(
        "Keytab login for {} (kvno {}, enctype {})",
        entry.principal(),
        entry.kvno,
        entry.enctype
    );

    // AS exchange.
    let nonce = rand::random::<u32>().to_be_bytes();
    let mut body = generate_as_req_kdc_body(&GenerateAsReqOptions {
        realm: &realm,
        username: entry.components.join("/").as_str(),
        cname_type: NT_PRINCIPAL,
        snames: &[TGT_SERVICE, &realm],
        nonce: &nonce,
        hostname: request.hostname,
        context_requirements: ClientRequestFlags::MUTUAL_AUTH,
    })
    .map_err(auth_err)?;
    let components = entry
        .components
        .iter()
        .map(|c| IA5String::from_string(c.clone()).map(KerberosStringAsn1::from))
        .collect::<Result<Vec<_>, _>>()
        .map_err(auth_err)?;
    body.cname = Optional::from(Some(ExplicitContextTag1::from(PrincipalName {
        name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![NT_PRINCIPAL])),
        name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(components)),
    })));
    body.etype = ExplicitContextTag8::from(Asn1SequenceOf::from(
        permitted
            .iter()
            .map(|s| IntegerAsn1::from(vec![u8::from(s)]))
            .collect::<Vec<_>>(),
    ));

    let pa_datas = vec![
        encrypted_timestamp(&suite, &entry.key, OffsetDateTime::now_utc())?,
        pac_request()?,
    ];
    let as_req = picky_asn1_der::to_vec(&generate_as_req(pa_datas, body)).map_err(auth_err)?;
    let reply = network.exchange(request.kdc, &realm, &as_req, udp_limit)?;
    let as_rep: AsRep = decode_reply(&reply, "AS request")?;
    let (tgt_key, session_suite) = as_session_key(&as_rep, &suite, &entry.key)?;
    debug!("AS exchange finished for {}", entry.principal());

    // TGS exchange.
    let mut enc_params = EncryptionParams::default_for_client();
    enc_params.encryption_type = Some(session_suite.clone());
    let mut authenticator = generate_authenticator(GenerateAuthenticatorOptions {
        kdc_rep: &as_rep.0,
        seq_num: Some(rand::random::<u32>()),
        sub_key: None,
        checksum: None,
        channel_bindings: None,
        extensions: Vec::new(),
    })
    .map_err(auth_err)?;
    let crealm = as_rep.0.crealm.0.to_string();
    let tgs_req = generate_tgs_req(GenerateTgsReqOptions {
        realm: &crealm,
        service_principal: request.spn,
        session_key: &tgt_key,
        ticket: as_rep.0.ticket.0,
        authenticator: &mut authenticator,
        additional_tickets: None,
        enc_params: &enc_params,
        context_requirements: ClientRequestFlags::MUTUAL_AUTH,
    })
    .map_err(auth_err)?;
    let tgs_req = picky_asn1_der::to_vec(&tgs_req).map_err(auth_err)?;
    let reply = network.exchange(request.kdc, &realm, &tgs_req, udp_limit)?;
    let tgs_rep: TgsRep = decode_reply(&reply, "TGS request")?;
    let service_key =
        extract_session_key_from_tgs_rep(&tgs_rep, &tgt_key, &enc_params).map_err(auth_err)?;
    debug!("TGS exchange finished for {}", request.spn);

    // AP-REQ for the service.
    let authenticator = generate_authenticator(GenerateAuthenticatorOptions {
        kdc_rep: &tgs_rep.0,
        seq_num: Some(rand::random::<u32>()),
        sub_key: Some(EncKey {
            key_type: session_suite.clone(),
            key_value: random_key(&session_suite),
        }),
        checksum: Some(ChecksumOptions {
            checksum_type: AUTHENTICATOR_CHECKSUM_TYPE.to_vec(),
            checksum_value: gss_checksum(GSS_C_MUTUAL_FLAG),
        }),
        channel_bindings: None,
        extensions: Vec::new(),
    })
    .map_err(auth_err)?;
    let ap_req = generate_ap_req(
        tgs_rep.0.ticket.0,
        &service_key,
        &authenticator,
        &enc_params,
        ClientRequestFlags::MUTUAL_AUTH.into(),
    )
    .map_err(auth_err)?;
    gss_frame(AP_REQ_TOKEN_ID, ap_req)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(components: &[&str], kvno: u32, enctype: u16) -> KeytabEntry {
        KeytabEntry {
            realm: "EXAMPLE.COM".into(),
            components: components.iter().map(|c| c.to_string()).collect(),
            kvno,
            enctype,
            timestamp: 0,
            key: vec![kvno as u8; if enctype == 18 { 32 } else { 16 }],
        }
    }

    #[test]
    fn key_selection_follows_permitted_order_then_kvno() {
        let keytab = Keytab {
            entries: vec![
                entry(&["svc-adp"], 2, 18),
                entry(&["svc-adp"], 4, 18),
                entry(&["svc-adp"], 5, 17),
                entry(&["other"], 9, 18),
            ],
        };
        let aes256 = CipherSuite::Aes256CtsHmacSha196;
        let aes128 = CipherSuite::Aes128CtsHmacSha196;

        let (e, suite) = select_key(&keytab, "svc-adp@EXAMPLE.COM", &[aes256.clone(), aes128.clone()]).unwrap();
        assert_eq!((e.kvno, suite), (4, aes256.clone()));

        let (e, suite) = select_key(&keytab, "SVC-ADP@example.com", &[aes128.clone(), aes256]).unwrap();
        assert_eq!((e.kvno, suite), (5, aes128.clone()));

        let only_rc4 = Keytab { entries: vec![entry(&["svc-adp"], 1, 23)] };
        let err = select_key(&only_rc4, "svc-adp@EXAMPLE.COM", &[aes128]).unwrap_err();
        assert_eq!(err.kind, adp_core::AdErrorKind::Transport);
    }

    #[test]
    fn timestamp_decrypts_with_the_keytab_key() {
        let suite = CipherSuite::Aes256CtsHmacSha196;
        let key = [0x42u8; 32];
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let pa = encrypted_timestamp(&suite, &key, now).unwrap();
        assert_eq!(pa.padata_type.0 .0, PA_ENC_TIMESTAMP.to_vec());

        let data: EncryptedData = picky_asn1_der::from_bytes(&pa.padata_data.0 .0).unwrap();
        assert_eq!(data.etype.0 .0, vec![18]);
        let plain = suite
            .cipher()
            .decrypt(&key, PA_ENC_TIMESTAMP_KEY_USAGE, &data.cipher.0 .0)
            .unwrap();
        let ts: PaEncTsEnc = picky_asn1_der::from_bytes(&plain).unwrap();
        assert_eq!(ts.patimestamp.0, KerberosTime::from(GeneralizedTime::from(now)));

        assert!(suite
            .cipher()
            .decrypt(&[0x43u8; 32], PA_ENC_TIMESTAMP_KEY_USAGE, &data.cipher.0 .0)
            .is_err());
    }

    #[test]
    fn checksum_carries_flags_little_endian() {
        let bytes: Vec<u8> = gss_checksum(GSS_C_MUTUAL_FLAG).into();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..4], &[0x10, 0, 0, 0]);
        assert_eq!(&bytes[20..], &[0x02, 0, 0, 0]);
    }

    #[test]
    fn gss_framing_carries_krb5_oid_and_token_id() {
        let token = gss_frame(AP_REQ_TOKEN_ID, IntegerAsn1::from(vec![0x05])).unwrap();
        assert_eq!(token[0], 0x60);
        let oid = [0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
        let at = token.windows(oid.len()).position(|w| w == oid).unwrap();
        assert_eq!(&token[at + oid.len()..at + oid.len() + 2], &AP_REQ_TOKEN_ID);
        assert_eq!(&token[at + oid.len() + 2..], &[0x02, 0x01, 0x05]);
    }

    #[test]
    fn error_codes_are_named() {
        assert_eq!(krb_error_name(24), "pre-authentication failed");
        assert_eq!(krb_error_name(37), "clock skew too great");
        assert_eq!(krb_error_name(99), "KDC error");
    }

    #[test]
    fn garbage_reply_is_auth_error() {
        let err = decode_reply::<AsRep>(&[0x01, 0x02], "AS request").unwrap_err();
        assert_eq!(err.kind, adp_core::AdErrorKind::Auth);
        assert!(err.message.contains("AS request"));
    }
}
