use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base32::Alphabet::RFC4648;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, TOTP};

const SECRET_BYTE_LENGTH: usize = 20;
const CODE_DIGITS: usize = 6;
pub const STEP_SECONDS: u64 = 30;
const ALLOWED_SKEW: u8 = 1;
const NONCE_LENGTH: usize = 12;
const ENCRYPTED_PREFIX: &str = "enc:v1";

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LENGTH: usize = 8;
// No 0/O, 1/I/L: codes get typed in from paper.
const BACKUP_CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

type HmacSha256 = Hmac<Sha256>;

/// Generates a random base32-encoded secret suitable for RFC6238 TOTP.
pub fn generate_totp_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTE_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    base32::encode(RFC4648 { padding: false }, &bytes)
}

/// Produces an `otpauth://` URI that authenticator apps can import.
pub fn generate_otpauth_uri(issuer: &str, account_name: &str, secret: &str) -> Result<String> {
    let totp = labelled_totp(issuer, account_name, secret)?;
    Ok(totp.get_url())
}

/// Renders the `otpauth://` URI as a base64-encoded PNG QR code.
pub fn generate_qr_code(issuer: &str, account_name: &str, secret: &str) -> Result<String> {
    let totp = labelled_totp(issuer, account_name, secret)?;
    totp.get_qr_base64()
        .map_err(|e| anyhow!("Failed to render QR code: {}", e))
}

/// Validates a TOTP code at `unix_time`, accepting one step either side.
pub fn verify_totp_code_at(secret: &str, code: &str, unix_time: u64) -> Result<bool> {
    let sanitized_code = code.trim();
    if sanitized_code.len() != CODE_DIGITS || !sanitized_code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    let totp = build_totp(secret)?;
    Ok(totp.check(sanitized_code, unix_time))
}

/// Generates the code an authenticator would display at `unix_time`.
pub fn generate_totp_code_at(secret: &str, unix_time: u64) -> Result<String> {
    Ok(build_totp(secret)?.generate(unix_time))
}

/// Encrypts a TOTP secret before persisting it.
pub fn protect_totp_secret(secret: &str, key_material: &str) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(key_material, b"totp-secret");
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| anyhow!("Invalid MFA key"))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, secret.as_bytes())
        .map_err(|_| anyhow!("Failed to encrypt MFA secret"))?;

    Ok(format!(
        "{}:{}:{}",
        ENCRYPTED_PREFIX,
        STANDARD_NO_PAD.encode(nonce_bytes),
        STANDARD_NO_PAD.encode(ciphertext)
    ))
}

/// Decrypts a stored TOTP secret.
pub fn recover_totp_secret(stored: &str, key_material: &str) -> Result<String> {
    let remainder = stored
        .strip_prefix(ENCRYPTED_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| anyhow!("Stored MFA secret is not encrypted"))?;

    let (nonce_part, cipher_part) = remainder
        .split_once(':')
        .filter(|(nonce, cipher)| !nonce.is_empty() && !cipher.is_empty())
        .ok_or_else(|| anyhow!("Invalid encrypted MFA secret format"))?;

    let nonce_bytes = STANDARD_NO_PAD
        .decode(nonce_part)
        .map_err(|_| anyhow!("Invalid nonce encoding"))?;
    if nonce_bytes.len() != NONCE_LENGTH {
        return Err(anyhow!("Invalid nonce length"));
    }
    let ciphertext = STANDARD_NO_PAD
        .decode(cipher_part)
        .map_err(|_| anyhow!("Invalid ciphertext encoding"))?;

    let key = derive_key(key_material, b"totp-secret");
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| anyhow!("Invalid MFA key"))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| anyhow!("Failed to decrypt MFA secret"))?;

    String::from_utf8(plaintext).map_err(|_| anyhow!("Invalid UTF-8 in decrypted MFA secret"))
}

/// Generates a fresh batch of human-friendly backup codes (`XXXX-XXXX`).
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let raw: String = (0..BACKUP_CODE_LENGTH)
                .map(|_| {
                    let idx = rng.gen_range(0..BACKUP_CODE_ALPHABET.len());
                    BACKUP_CODE_ALPHABET[idx] as char
                })
                .collect();
            format!("{}-{}", &raw[..4], &raw[4..])
        })
        .collect()
}

/// Strips separators and whitespace and upper-cases a submitted backup code.
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Keyed digest of a backup code. Deterministic so a submitted code can be
/// matched against the stored set without keeping plaintext.
pub fn hash_backup_code(code: &str, key_material: &str) -> Result<String> {
    let key = derive_key(key_material, b"backup-code");
    // `KeyInit` is in scope for AES-GCM too, so name the trait explicitly.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
        .map_err(|_| anyhow!("Invalid backup code key"))?;
    mac.update(normalize_backup_code(code).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn derive_key(key_material: &str, purpose: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key_material.as_bytes());
    hasher.update(b"|");
    hasher.update(purpose);
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn labelled_totp(issuer: &str, account_name: &str, secret: &str) -> Result<TOTP> {
    if issuer.contains(':') {
        return Err(anyhow!("Issuer must not contain ':'"));
    }
    let sanitized_account = account_name.trim();
    if sanitized_account.contains(':') {
        return Err(anyhow!("Account name must not contain ':'"));
    }
    build_totp_with_labels(secret, Some(issuer), sanitized_account)
}

fn build_totp(secret: &str) -> Result<TOTP> {
    build_totp_with_labels(secret, None, "")
}

fn build_totp_with_labels(secret: &str, issuer: Option<&str>, account_name: &str) -> Result<TOTP> {
    let secret_bytes = decode_secret(secret)?;
    TOTP::new(
        Algorithm::SHA1,
        CODE_DIGITS,
        ALLOWED_SKEW,
        STEP_SECONDS,
        secret_bytes,
        issuer.map(|value| value.to_string()),
        account_name.to_string(),
    )
    .map_err(|e| anyhow!("Failed to configure TOTP: {}", e))
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let cleaned = secret.trim().replace(' ', "").to_uppercase();
    base32::decode(RFC4648 { padding: false }, cleaned.as_str())
        .ok_or_else(|| anyhow!("Invalid base32 secret"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "unit-test-mfa-key";

    #[test]
    fn current_code_verifies() {
        let secret = generate_totp_secret();
        let now = 1_700_000_000u64;
        let current = generate_totp_code_at(&secret, now).expect("generate");
        assert!(verify_totp_code_at(&secret, &current, now).unwrap());
    }

    #[test]
    fn adjacent_steps_are_accepted_and_farther_ones_rejected() {
        let secret = generate_totp_secret();
        let now = 1_700_000_000u64;
        let previous = generate_totp_code_at(&secret, now - STEP_SECONDS).unwrap();
        let next = generate_totp_code_at(&secret, now + STEP_SECONDS).unwrap();
        let stale = generate_totp_code_at(&secret, now - 3 * STEP_SECONDS).unwrap();
        let early = generate_totp_code_at(&secret, now + 3 * STEP_SECONDS).unwrap();

        assert!(verify_totp_code_at(&secret, &previous, now).unwrap());
        assert!(verify_totp_code_at(&secret, &next, now).unwrap());
        let current = generate_totp_code_at(&secret, now).unwrap();
        if stale != current && stale != previous && stale != next {
            assert!(!verify_totp_code_at(&secret, &stale, now).unwrap());
        }
        if early != current && early != previous && early != next {
            assert!(!verify_totp_code_at(&secret, &early, now).unwrap());
        }
    }

    #[test]
    fn malformed_codes_are_rejected_without_error() {
        let secret = generate_totp_secret();
        assert!(!verify_totp_code_at(&secret, "12345", 1_700_000_000).unwrap());
        assert!(!verify_totp_code_at(&secret, "abcdef", 1_700_000_000).unwrap());
        assert!(!verify_totp_code_at(&secret, "", 1_700_000_000).unwrap());
    }

    #[test]
    fn otpauth_uri_carries_issuer_and_account() {
        let secret = generate_totp_secret();
        let uri = generate_otpauth_uri("Gatehouse", "alice@example.com", &secret).unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("issuer=Gatehouse"));
        assert!(generate_otpauth_uri("Bad:Issuer", "alice", &secret).is_err());
    }

    #[test]
    fn protect_and_recover_totp_secret_round_trip() {
        let secret = generate_totp_secret();
        let encrypted = protect_totp_secret(&secret, KEY).expect("encrypt");
        assert!(encrypted.starts_with("enc:v1:"));
        assert!(!encrypted.contains(&secret));

        let decrypted = recover_totp_secret(&encrypted, KEY).expect("decrypt");
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn recover_totp_secret_rejects_wrong_key_and_plaintext() {
        let secret = generate_totp_secret();
        let encrypted = protect_totp_secret(&secret, KEY).unwrap();
        assert!(recover_totp_secret(&encrypted, "another-key").is_err());
        assert!(recover_totp_secret(&secret, KEY).is_err());
    }

    #[test]
    fn backup_codes_are_unique_and_formatted() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), BACKUP_CODE_LENGTH + 1);
            assert_eq!(&code[4..5], "-");
        }
        let mut deduped = codes.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }

    #[test]
    fn backup_code_hash_ignores_formatting() {
        let a = hash_backup_code("abcd-efgh", KEY).unwrap();
        let b = hash_backup_code("ABCDEFGH", KEY).unwrap();
        let c = hash_backup_code(" abcd efgh ", KEY).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, hash_backup_code("ABCDEFGH", "other-key").unwrap());
    }
}
