use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use super::{KEY_LEN, SALT_LEN};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // default memory cost
            mem_cost_kib: 64 * 1024, // 64 MiB
            // default number of iterations
            time_cost: 3,
            // default number of threads
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> VaultResult<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.mem_cost_kib < 8 {
            return Err(VaultError::Crypto("argon2 memory cost too low".into()));
        }
        if self.time_cost < 1 {
            return Err(VaultError::Crypto("argon2 time cost must be >= 1".into()));
        }
        if self.parallelism < 1 {
            return Err(VaultError::Crypto("argon2 parallelism must be >= 1".into()));
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return Err(VaultError::Crypto(
                "argon2 memory cost must be at least 8 * parallelism".into(),
            ));
        }
        Ok(())
    }
}

/// Derives the vault key from a password and the persisted salt.
///
/// Deterministic: the same password and salt always yield the same key.
pub fn derive_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    kdf: KdfParams,
) -> VaultResult<[u8; KEY_LEN]> {
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| VaultError::Crypto(format!("failed to construct Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::Crypto(format!("argon2 key derivation failed {e}")))?;

    Ok(key)
}
