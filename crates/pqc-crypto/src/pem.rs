//! PEM armour.
//!
//! Base64 body wrapped at 64 columns between `-----BEGIN <label>-----` and
//! `-----END <label>-----` lines.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Label for certificates.
pub const CERTIFICATE: &str = "CERTIFICATE";
/// Label for certification requests.
pub const CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";
/// Label for revocation lists.
pub const X509_CRL: &str = "X509 CRL";
/// Label for public keys.
pub const PUBLIC_KEY: &str = "PUBLIC KEY";
/// Label for private keys.
pub const PRIVATE_KEY: &str = "PRIVATE KEY";

/// Encodes bytes as a PEM block.
#[must_use]
pub fn encode(label: &str, der: &[u8]) -> String {
    let b64 = STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Decodes the first PEM block with the given label.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the markers are missing or the body is not base64.
pub fn decode(label: &str, pem: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem
        .find(&begin)
        .ok_or_else(|| Error::Parse(format!("missing '{begin}' marker")))?
        + begin.len();
    let stop = pem[start..]
        .find(&end)
        .ok_or_else(|| Error::Parse(format!("missing '{end}' marker")))?
        + start;

    let body: String = pem[start..stop]
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(Error::Parse(format!("empty {label} body")));
    }

    STANDARD
        .decode(body.as_bytes())
        .map_err(|e| Error::Parse(format!("invalid base64 in {label}: {e}")))
}

/// Returns the label of the first PEM block, if any.
#[must_use]
pub fn label_of(pem: &str) -> Option<&str> {
    let rest = pem.trim_start().strip_prefix("-----BEGIN ")?;
    let end = rest.find("-----")?;
    Some(&rest[..end])
}

/// Cheap structural check used to reject obviously malformed input early.
#[must_use]
pub fn looks_like_pem(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("-----BEGIN ")
        && trimmed.ends_with("-----")
        && trimmed.contains("-----END ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_wraps_lines() {
        let pem = encode(CERTIFICATE, &[7u8; 200]);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|l| l.len() <= 64 || l.starts_with("-----")));
    }

    #[test]
    fn decode_rejects_wrong_label() {
        let pem = encode(PUBLIC_KEY, b"abc");
        assert!(decode(CERTIFICATE, &pem).is_err());
    }

    #[test]
    fn decode_rejects_garbage_body() {
        let pem = "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n";
        assert!(matches!(decode(CERTIFICATE, pem), Err(Error::Parse(_))));
    }

    #[test]
    fn decode_rejects_empty_body() {
        let pem = "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n";
        assert!(decode(CERTIFICATE, pem).is_err());
    }

    #[test]
    fn label_detection() {
        let pem = encode(X509_CRL, b"x");
        assert_eq!(label_of(&pem), Some("X509 CRL"));
        assert_eq!(label_of("hello"), None);
        assert!(looks_like_pem(&pem));
        assert!(!looks_like_pem("not pem"));
    }

    #[test]
    fn decode_tolerates_crlf_and_surrounding_text() {
        let pem = encode(CERTIFICATE_REQUEST, b"request-bytes").replace('\n', "\r\n");
        let wrapped = format!("leading text\r\n{pem}trailing");
        assert_eq!(decode(CERTIFICATE_REQUEST, &wrapped).unwrap(), b"request-bytes");
    }

    proptest! {
        #[test]
        fn arbitrary_payloads_survive_armour(
            data in proptest::collection::vec(any::<u8>(), 1..512)
        ) {
            let pem = encode(PRIVATE_KEY, &data);
            prop_assert_eq!(decode(PRIVATE_KEY, &pem).unwrap(), data);
        }
    }
}
