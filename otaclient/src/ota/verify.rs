// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use base64::{Engine, engine::general_purpose::STANDARD};
use ring::digest::{Context, SHA256};
use rsa::RsaPublicKey;
use tracing::{debug, warn};

use crate::{
    crypto::{self, MAX_KEY_SIZE, RsaPublicKeyExt, SignatureAlgorithm},
    ota::{DownloadedPayload, Error, Result, SignatureFailure, VerifiedPayload},
};

/// Largest decoded signature we accept. This matches the largest supported
/// RSA key.
pub const MAX_SIGNATURE_SIZE: usize = MAX_KEY_SIZE;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut context = Context::new(&SHA256);
    context.update(data);

    let mut digest = [0u8; 32];
    digest.copy_from_slice(context.finish().as_ref());
    digest
}

/// Decode a base64 signature, rejecting anything that could not fit in
/// [`MAX_SIGNATURE_SIZE`] bytes before decoding it.
pub fn decode_signature(encoded: &str) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    let max_encoded = MAX_SIGNATURE_SIZE.div_ceil(3) * 4;

    if encoded.len() > max_encoded {
        return Err(Error::SignatureTooLarge(
            encoded.len() / 4 * 3,
            MAX_SIGNATURE_SIZE,
        ));
    }

    let signature = STANDARD.decode(encoded).map_err(|e| {
        Error::SignatureInvalid(format!("failed to decode: {e}"), SignatureFailure::Decode)
    })?;

    if signature.is_empty() {
        return Err(Error::SignatureInvalid(
            "empty signature".to_owned(),
            SignatureFailure::Decode,
        ));
    } else if signature.len() > MAX_SIGNATURE_SIZE {
        return Err(Error::SignatureTooLarge(signature.len(), MAX_SIGNATURE_SIZE));
    }

    Ok(signature)
}

/// Check `data` against an expected hex SHA-256 digest and, if
/// `signature_required` is set, a base64 signature over that digest.
///
/// The digest is always checked first. A signature is never examined for data
/// whose digest already failed. When `signature_required` is false, any
/// supplied signature is ignored entirely.
pub fn verify_integrity(
    data: &[u8],
    expected_hash_hex: &str,
    signature: Option<&str>,
    public_key: Option<&RsaPublicKey>,
    algorithm: SignatureAlgorithm,
    signature_required: bool,
) -> Result<()> {
    let digest = sha256(data);
    let actual = hex::encode(digest);

    if !actual.eq_ignore_ascii_case(expected_hash_hex.trim()) {
        return Err(Error::HashMismatch {
            expected: expected_hash_hex.to_ascii_lowercase(),
            actual,
        });
    }

    debug!("Digest matches: {actual}");

    if !signature_required {
        return Ok(());
    }

    let Some(signature) = signature.filter(|s| !s.is_empty()) else {
        return Err(Error::SignatureMissing);
    };
    let Some(public_key) = public_key else {
        return Err(Error::PublicKeyMissing);
    };

    let signature = decode_signature(signature)?;

    public_key
        .verify_sig(algorithm, &digest, &signature)
        .map_err(|e| {
            let reason = match e {
                crypto::Error::RsaVerify(e) => format!("cryptographic check failed: {e}"),
                e => e.to_string(),
            };
            Error::SignatureInvalid(reason, SignatureFailure::Crypto)
        })?;

    debug!("Signature is valid ({algorithm:?})");

    Ok(())
}

/// Turns a [`DownloadedPayload`] into a [`VerifiedPayload`].
#[derive(Clone, Debug)]
pub struct IntegrityVerifier {
    public_key: Option<RsaPublicKey>,
    algorithm: SignatureAlgorithm,
    signature_required: bool,
}

impl IntegrityVerifier {
    /// Verifier that requires a valid signature made by `public_key`.
    pub fn new(public_key: RsaPublicKey, algorithm: SignatureAlgorithm) -> Self {
        Self {
            public_key: Some(public_key),
            algorithm,
            signature_required: true,
        }
    }

    /// Verifier that only checks the digest. Anyone who can tamper with the
    /// descriptor can then get arbitrary firmware installed, so this is only
    /// for development.
    pub fn digest_only() -> Self {
        warn!("Firmware signature verification is disabled");

        Self {
            public_key: None,
            algorithm: SignatureAlgorithm::default(),
            signature_required: false,
        }
    }

    pub fn signature_required(&self) -> bool {
        self.signature_required
    }

    /// Check the payload. The payload is consumed either way, so a failed
    /// image cannot be retried against the installer by accident.
    pub fn verify(
        &self,
        payload: DownloadedPayload,
        expected_hash_hex: &str,
        signature: Option<&str>,
    ) -> Result<VerifiedPayload> {
        verify_integrity(
            &payload.data,
            expected_hash_hex,
            signature,
            self.public_key.as_ref(),
            self.algorithm,
            self.signature_required,
        )?;

        Ok(VerifiedPayload { data: payload.data })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::OnceLock;

    use assert_matches::assert_matches;
    use rsa::RsaPrivateKey;

    use crate::ota::ErrorCode;

    use super::*;

    const PAYLOAD: &[u8] = b"0123456789";
    const PAYLOAD_SHA256: &str =
        "84d89877f0d4041efb6bf91a16f0248f2fd573e6af05c19f96bedb9f882f7882";

    pub(crate) fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| crypto::generate_rsa_key(1024).unwrap())
    }

    pub(crate) fn sign(data: &[u8], algo: SignatureAlgorithm) -> String {
        let signature = crypto::sign_digest(test_key(), algo, &sha256(data)).unwrap();
        STANDARD.encode(signature)
    }

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(test_key().to_public_key(), SignatureAlgorithm::Sha256WithRsaPss)
    }

    #[test]
    fn known_digest() {
        assert_eq!(hex::encode(sha256(PAYLOAD)), PAYLOAD_SHA256);
    }

    #[test]
    fn hash_only() {
        verify_integrity(
            PAYLOAD,
            PAYLOAD_SHA256,
            None,
            None,
            SignatureAlgorithm::default(),
            false,
        )
        .unwrap();
    }

    #[test]
    fn hash_case_insensitive() {
        verify_integrity(
            PAYLOAD,
            &PAYLOAD_SHA256.to_ascii_uppercase(),
            None,
            None,
            SignatureAlgorithm::default(),
            false,
        )
        .unwrap();
    }

    #[test]
    fn single_bit_flip() {
        for byte in 0..PAYLOAD.len() {
            for bit in 0..8 {
                let mut data = PAYLOAD.to_vec();
                data[byte] ^= 1 << bit;

                let err = verify_integrity(
                    &data,
                    PAYLOAD_SHA256,
                    None,
                    None,
                    SignatureAlgorithm::default(),
                    false,
                )
                .unwrap_err();
                assert_matches!(err, Error::HashMismatch { .. });
                assert_eq!(err.code(), ErrorCode::VerificationError);
            }
        }
    }

    #[test]
    fn hash_checked_before_signature() {
        let signature = sign(PAYLOAD, SignatureAlgorithm::Sha256WithRsaPss);

        let err = verifier()
            .verify(
                DownloadedPayload::new(b"9876543210".to_vec()),
                PAYLOAD_SHA256,
                Some(&signature),
            )
            .unwrap_err();
        assert_matches!(err, Error::HashMismatch { .. });
    }

    #[test]
    fn valid_signature() {
        for algo in [
            SignatureAlgorithm::Sha256WithRsaPss,
            SignatureAlgorithm::Sha256WithRsaPkcs1v15,
        ] {
            let verifier = IntegrityVerifier::new(test_key().to_public_key(), algo);
            let signature = sign(PAYLOAD, algo);

            let verified = verifier
                .verify(
                    DownloadedPayload::new(PAYLOAD.to_vec()),
                    PAYLOAD_SHA256,
                    Some(&signature),
                )
                .unwrap();
            assert_eq!(verified.as_bytes(), PAYLOAD);
        }
    }

    #[test]
    fn corrupted_signature() {
        let signature = sign(PAYLOAD, SignatureAlgorithm::Sha256WithRsaPss);
        let mut raw = STANDARD.decode(&signature).unwrap();

        for i in [0, raw.len() / 2, raw.len() - 1] {
            raw[i] ^= 0x01;
            let corrupted = STANDARD.encode(&raw);
            raw[i] ^= 0x01;

            let err = verifier()
                .verify(
                    DownloadedPayload::new(PAYLOAD.to_vec()),
                    PAYLOAD_SHA256,
                    Some(&corrupted),
                )
                .unwrap_err();
            assert_matches!(err, Error::SignatureInvalid(_, SignatureFailure::Crypto));
            assert_eq!(err.code(), ErrorCode::VerificationError);
        }
    }

    #[test]
    fn signature_for_other_data() {
        let signature = sign(b"other", SignatureAlgorithm::Sha256WithRsaPss);

        let err = verifier()
            .verify(
                DownloadedPayload::new(PAYLOAD.to_vec()),
                PAYLOAD_SHA256,
                Some(&signature),
            )
            .unwrap_err();
        assert_matches!(err, Error::SignatureInvalid(_, SignatureFailure::Crypto));
    }

    #[test]
    fn undecodable_signature() {
        let err = verifier()
            .verify(
                DownloadedPayload::new(PAYLOAD.to_vec()),
                PAYLOAD_SHA256,
                Some("not*base64!"),
            )
            .unwrap_err();
        assert_matches!(err, Error::SignatureInvalid(_, SignatureFailure::Decode));
        assert_eq!(err.code(), ErrorCode::VerificationError);
    }

    #[test]
    fn oversized_signature() {
        let encoded = STANDARD.encode([0u8; MAX_SIGNATURE_SIZE + 1]);

        let err = verifier()
            .verify(
                DownloadedPayload::new(PAYLOAD.to_vec()),
                PAYLOAD_SHA256,
                Some(&encoded),
            )
            .unwrap_err();
        assert_matches!(err, Error::SignatureTooLarge(_, MAX_SIGNATURE_SIZE));
        assert_eq!(err.code(), ErrorCode::VerificationError);
    }

    #[test]
    fn missing_signature() {
        for signature in [None, Some("")] {
            let err = verifier()
                .verify(
                    DownloadedPayload::new(PAYLOAD.to_vec()),
                    PAYLOAD_SHA256,
                    signature,
                )
                .unwrap_err();
            assert_matches!(err, Error::SignatureMissing);
        }

        // Regardless of whether the hash is correct.
        let err = verifier()
            .verify(
                DownloadedPayload::new(PAYLOAD.to_vec()),
                &"0".repeat(64),
                None,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VerificationError);
    }

    #[test]
    fn required_without_key() {
        let signature = sign(PAYLOAD, SignatureAlgorithm::Sha256WithRsaPss);

        let err = verify_integrity(
            PAYLOAD,
            PAYLOAD_SHA256,
            Some(&signature),
            None,
            SignatureAlgorithm::Sha256WithRsaPss,
            true,
        )
        .unwrap_err();
        assert_matches!(err, Error::PublicKeyMissing);
    }

    #[test]
    fn disabled_ignores_bad_signature() {
        let verifier = IntegrityVerifier::digest_only();
        assert!(!verifier.signature_required());

        verifier
            .verify(
                DownloadedPayload::new(PAYLOAD.to_vec()),
                PAYLOAD_SHA256,
                Some("garbage"),
            )
            .unwrap();
    }
}
