use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;
/// Salt length in bytes.
const SALT_SIZE: usize = 16;

/// A well-formed Argon2id hash with the same cost parameters as
/// [`hash_password`]. No password verifies against it.
pub const DUMMY_PASSWORD_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$Y0ea1poJCyWCd+yPum+ZQQ$NJ/rxIxx1nmNWTIb77VlLAbamRF5yUXifmcvzzfo3b0";

#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordHashError(pub String);

fn argon2() -> Result<Argon2<'static>, PasswordHashError> {
    let params = ParamsBuilder::new()
        .m_cost(ARGON2_MEMORY_MB * 1024)
        .t_cost(ARGON2_ITERATIONS)
        .p_cost(ARGON2_PARALLELISM)
        .build()
        .map_err(|e| PasswordHashError(format!("Argon2 params: {}", e)))?;

    Ok(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
}

/// Hashes a password using Argon2id and returns the PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordHashError> {
    let password_bytes = Zeroizing::new(password.as_bytes().to_vec());

    let mut salt_bytes = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| PasswordHashError(format!("Salt encoding error: {}", e)))?;

    let hash = argon2()?
        .hash_password(&password_bytes, &salt)
        .map_err(|e| PasswordHashError(format!("Argon2 hash error: {}", e)))?
        .to_string();

    tracing::debug!("Password hashed with Argon2id");
    Ok(hash)
}

/// Checks `password` against a stored PHC string.
///
/// Parameters are read from the hash itself, so hashes made with older cost
/// settings keep verifying.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordHashError> {
    let password_bytes = Zeroizing::new(password.as_bytes().to_vec());
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| PasswordHashError(format!("Hash parse error: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(&password_bytes, &parsed_hash)
        .is_ok())
}

/// Runs a full verification against [`DUMMY_PASSWORD_HASH`] and discards the
/// result, so a login for an unknown user costs as much as a wrong password.
pub fn burn_verification(password: &str) {
    if let Err(e) = verify_password(password, DUMMY_PASSWORD_HASH) {
        tracing::error!("❌ Dummy password verification failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("P@ss1234").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("P@ss1234", &hash).unwrap());
        assert!(!verify_password("P@ss12345", &hash).unwrap());
    }

    #[test]
    fn dummy_hash_parses_and_matches_nothing() {
        let parsed = PasswordHash::new(DUMMY_PASSWORD_HASH).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert_eq!(parsed.params.get_decimal("m"), Some(ARGON2_MEMORY_MB * 1024));
        assert_eq!(parsed.params.get_decimal("t"), Some(ARGON2_ITERATIONS));

        assert!(!verify_password("P@ss1234", DUMMY_PASSWORD_HASH).unwrap());
        assert!(!verify_password("", DUMMY_PASSWORD_HASH).unwrap());
        burn_verification("anything");
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(verify_password("whatever", "not-a-phc-string").is_err());
    }
}
