//! Gateway message signatures.
//!
//! Every signed message is a digest over an ordered list of fields followed by
//! the merchant secret. Payment requests, status queries and callbacks differ
//! only in which fields take part and in their order, so each kind is a field
//! list plus an algorithm rather than its own function body.

use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedField {
    MerchantId,
    OrderRef,
    Amount,
    Timestamp,
}

const PAYMENT_REQUEST_FIELDS: &[SignedField] = &[
    SignedField::MerchantId,
    SignedField::OrderRef,
    SignedField::Amount,
];

const STATUS_QUERY_FIELDS: &[SignedField] = &[
    SignedField::MerchantId,
    SignedField::OrderRef,
    SignedField::Timestamp,
];

const CALLBACK_FIELDS: &[SignedField] = &[
    SignedField::MerchantId,
    SignedField::Amount,
    SignedField::OrderRef,
    SignedField::Timestamp,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// `md5(fields || secret)`
    Md5,
    /// `sha256(fields || secret)`
    Sha256,
    /// `hmac_sha256(key = secret, fields)`
    HmacSha256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Md5 => f.write_str("md5"),
            DigestAlgorithm::Sha256 => f.write_str("sha256"),
            DigestAlgorithm::HmacSha256 => f.write_str("hmac-sha256"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "hmac-sha256" | "hmac_sha256" => Ok(DigestAlgorithm::HmacSha256),
            other => Err(format!("unknown digest algorithm '{}'", other)),
        }
    }
}

/// Digest algorithm per message kind.
///
/// The gateway's API versions do not agree on one algorithm, so each message
/// kind keeps the one it is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAlgorithms {
    pub payment_request: DigestAlgorithm,
    pub status_query: DigestAlgorithm,
    pub callback: DigestAlgorithm,
}

impl Default for SignatureAlgorithms {
    fn default() -> Self {
        Self {
            payment_request: DigestAlgorithm::Md5,
            status_query: DigestAlgorithm::Sha256,
            callback: DigestAlgorithm::Md5,
        }
    }
}

impl FromStr for SignatureAlgorithms {
    type Err = String;

    /// Parses `payment_request,status_query,callback`, e.g. `md5,sha256,md5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!(
                "expected three comma-separated algorithms, got '{}'",
                s
            ));
        }

        Ok(Self {
            payment_request: parts[0].parse()?,
            status_query: parts[1].parse()?,
            callback: parts[2].parse()?,
        })
    }
}

impl fmt::Display for SignatureAlgorithms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.payment_request, self.status_query, self.callback
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SignedValues<'a> {
    order_ref: &'a str,
    amount: &'a str,
    timestamp: &'a str,
}

/// Signs outbound gateway requests and verifies inbound callbacks.
#[derive(Debug)]
pub struct SignatureCodec {
    merchant_id: String,
    secret: SecretString,
    algorithms: SignatureAlgorithms,
}

impl SignatureCodec {
    pub fn new(
        merchant_id: impl Into<String>,
        secret: SecretString,
        algorithms: SignatureAlgorithms,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            secret,
            algorithms,
        }
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn sign_payment_request(&self, order_ref: &str, amount: &str) -> String {
        self.digest(
            PAYMENT_REQUEST_FIELDS,
            self.algorithms.payment_request,
            SignedValues {
                order_ref,
                amount,
                ..Default::default()
            },
        )
    }

    pub fn sign_status_query(&self, order_ref: &str, timestamp: &str) -> String {
        self.digest(
            STATUS_QUERY_FIELDS,
            self.algorithms.status_query,
            SignedValues {
                order_ref,
                timestamp,
                ..Default::default()
            },
        )
    }

    /// Expected digest of a callback; exposed for gateway simulators in tests.
    pub fn sign_callback(&self, amount: &str, order_ref: &str, timestamp: &str) -> String {
        self.digest(
            CALLBACK_FIELDS,
            self.algorithms.callback,
            SignedValues {
                order_ref,
                amount,
                timestamp,
            },
        )
    }

    /// Recomputes the callback digest and compares it in constant time.
    ///
    /// `amount` must be the exact string the gateway sent. Empty or non-hex
    /// digests never verify.
    pub fn verify_callback(
        &self,
        amount: &str,
        order_ref: &str,
        timestamp: &str,
        received: &str,
    ) -> bool {
        let received = received.trim();
        if received.is_empty() || !received.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }

        let expected = self.sign_callback(amount, order_ref, timestamp);
        constant_time_compare(
            expected.as_bytes(),
            received.to_ascii_lowercase().as_bytes(),
        )
    }

    fn digest(
        &self,
        fields: &[SignedField],
        algorithm: DigestAlgorithm,
        values: SignedValues<'_>,
    ) -> String {
        let message: String = fields
            .iter()
            .map(|field| match field {
                SignedField::MerchantId => self.merchant_id.as_str(),
                SignedField::OrderRef => values.order_ref,
                SignedField::Amount => values.amount,
                SignedField::Timestamp => values.timestamp,
            })
            .collect();
        let secret = self.secret.expose_secret().as_bytes();

        let bytes = match algorithm {
            DigestAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(message.as_bytes());
                hasher.update(secret);
                hasher.finalize().to_vec()
            }
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(message.as_bytes());
                hasher.update(secret);
                hasher.finalize().to_vec()
            }
            DigestAlgorithm::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
                mac.update(message.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
        };

        hex::encode(bytes)
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERCHANT: &str = "D0001";
    const SECRET: &str = "test-merchant-key";

    fn codec(algorithms: SignatureAlgorithms) -> SignatureCodec {
        SignatureCodec::new(MERCHANT, SecretString::new(SECRET.to_string()), algorithms)
    }

    fn md5_hex(input: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn sha256_hex(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[test]
    fn payment_request_concatenates_merchant_order_amount_secret() {
        let codec = codec(SignatureAlgorithms::default());
        let signature = codec.sign_payment_request("TRX-1-X7-1", "150000");
        assert_eq!(
            signature,
            md5_hex("D0001TRX-1-X7-1150000test-merchant-key")
        );
    }

    #[test]
    fn status_query_uses_timestamp_and_its_own_algorithm() {
        let codec = codec(SignatureAlgorithms::default());
        let signature = codec.sign_status_query("TRX-1-X7-1", "2026-03-01 08:00:00");
        assert_eq!(
            signature,
            sha256_hex("D0001TRX-1-X7-12026-03-01 08:00:00test-merchant-key")
        );
    }

    #[test]
    fn callback_orders_amount_before_order_ref() {
        let codec = codec(SignatureAlgorithms::default());
        let signature = codec.sign_callback("150000", "TRX-1-X7-1", "2026-03-01 08:00:00");
        assert_eq!(
            signature,
            md5_hex("D0001150000TRX-1-X7-12026-03-01 08:00:00test-merchant-key")
        );
    }

    #[test]
    fn hmac_variant_keys_with_secret() {
        let algorithms = SignatureAlgorithms {
            payment_request: DigestAlgorithm::HmacSha256,
            ..Default::default()
        };
        let codec = codec(algorithms);

        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(b"D0001TRX-1-X7-1150000");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(codec.sign_payment_request("TRX-1-X7-1", "150000"), expected);
    }

    #[test]
    fn verifies_own_callback_signature() {
        let codec = codec(SignatureAlgorithms::default());
        let digest = codec.sign_callback("150000", "TRX-1-X7-1", "2026-03-01 08:00:00");
        assert!(codec.verify_callback("150000", "TRX-1-X7-1", "2026-03-01 08:00:00", &digest));
        assert!(codec.verify_callback(
            "150000",
            "TRX-1-X7-1",
            "2026-03-01 08:00:00",
            &digest.to_uppercase()
        ));
    }

    #[test]
    fn rejects_tampered_amount() {
        let codec = codec(SignatureAlgorithms::default());
        let digest = codec.sign_callback("150000", "TRX-1-X7-1", "2026-03-01 08:00:00");
        assert!(!codec.verify_callback("1", "TRX-1-X7-1", "2026-03-01 08:00:00", &digest));
    }

    #[test]
    fn amount_formatting_is_significant() {
        let codec = codec(SignatureAlgorithms::default());
        let digest = codec.sign_callback("150000", "TRX-1-X7-1", "t");
        assert!(!codec.verify_callback("150000.00", "TRX-1-X7-1", "t", &digest));
    }

    #[test]
    fn payment_request_digest_does_not_verify_as_callback() {
        let codec = codec(SignatureAlgorithms::default());
        let digest = codec.sign_payment_request("TRX-1-X7-1", "150000");
        assert!(!codec.verify_callback("150000", "TRX-1-X7-1", "", &digest));
        assert!(!codec.verify_callback("150000", "TRX-1-X7-1", "2026-03-01 08:00:00", &digest));
    }

    #[test]
    fn rejects_malformed_digests() {
        let codec = codec(SignatureAlgorithms::default());
        assert!(!codec.verify_callback("150000", "TRX-1-X7-1", "t", ""));
        assert!(!codec.verify_callback("150000", "TRX-1-X7-1", "t", "not-hex"));
        assert!(!codec.verify_callback("150000", "TRX-1-X7-1", "t", "abcd"));
    }

    #[test]
    fn different_secret_does_not_verify() {
        let signer = codec(SignatureAlgorithms::default());
        let verifier = SignatureCodec::new(
            MERCHANT,
            SecretString::new("other-key".to_string()),
            SignatureAlgorithms::default(),
        );
        let digest = signer.sign_callback("150000", "TRX-1-X7-1", "t");
        assert!(!verifier.verify_callback("150000", "TRX-1-X7-1", "t", &digest));
    }

    #[test]
    fn parses_algorithm_triplet() {
        let parsed: SignatureAlgorithms = "md5, hmac-sha256 ,SHA256".parse().unwrap();
        assert_eq!(parsed.payment_request, DigestAlgorithm::Md5);
        assert_eq!(parsed.status_query, DigestAlgorithm::HmacSha256);
        assert_eq!(parsed.callback, DigestAlgorithm::Sha256);
        assert_eq!(parsed.to_string(), "md5,hmac-sha256,sha256");

        assert!("md5,sha256".parse::<SignatureAlgorithms>().is_err());
        assert!("md5,sha1,md5".parse::<SignatureAlgorithms>().is_err());
    }
}
