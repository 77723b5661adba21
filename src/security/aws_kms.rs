// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AWS KMS master-key authority.
//!
//! The KEK never leaves AWS KMS; data keys are generated locally and
//! wrapped/unwrapped server-side with `Encrypt`/`Decrypt`. Unwrapped
//! material is never cached.

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::error::SecurityError;
use super::kms::{MasterKeyAuthority, WrappedMaterial};

/// AWS KMS-backed master-key authority.
pub struct AwsKms {
    client: KmsClient,
    key_id: String,
}

impl AwsKms {
    /// Connects to AWS KMS using the default credential chain.
    ///
    /// # Arguments
    /// * `key_id` - The ARN or alias of the KMS key to use as KEK
    pub async fn new(key_id: String) -> Result<Self, SecurityError> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = KmsClient::new(&config);

        // Verify the key exists and we have access
        client
            .describe_key()
            .key_id(&key_id)
            .send()
            .await
            .map_err(|e| SecurityError::AuthorityUnavailable(format!("AWS KMS key {}: {}", key_id, e)))?;

        info!(key_id = %key_id, "Connected to AWS KMS");

        Ok(Self { client, key_id })
    }

    /// Creates from an existing AWS SDK config.
    pub fn from_config(config: &aws_config::SdkConfig, key_id: String) -> Self {
        Self {
            client: KmsClient::new(config),
            key_id,
        }
    }
}

#[async_trait]
impl MasterKeyAuthority for AwsKms {
    #[instrument(skip(self, plaintext_key), fields(kms = "aws"))]
    async fn wrap(&self, plaintext_key: &[u8]) -> Result<WrappedMaterial, SecurityError> {
        let output = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext_key.to_vec()))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "AWS KMS encrypt failed");
                SecurityError::AuthorityUnavailable(format!("AWS KMS encrypt: {}", e))
            })?;

        let ciphertext = output
            .ciphertext_blob()
            .ok_or_else(|| SecurityError::Encryption("No ciphertext from KMS".into()))?
            .as_ref()
            .to_vec();

        Ok(WrappedMaterial {
            ciphertext,
            master_key_id: self.key_id.clone(),
        })
    }

    #[instrument(skip(self, ciphertext), fields(kms = "aws"))]
    async fn unwrap(
        &self,
        ciphertext: &[u8],
        master_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        let output = self
            .client
            .decrypt()
            .key_id(master_key_id)
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "AWS KMS decrypt failed");
                SecurityError::Decryption(format!("AWS KMS decrypt: {}", e))
            })?;

        let plaintext = output
            .plaintext()
            .ok_or_else(|| SecurityError::Decryption("No plaintext from KMS".into()))?;

        Ok(Zeroizing::new(plaintext.as_ref().to_vec()))
    }

    fn master_key_id(&self) -> String {
        self.key_id.clone()
    }
}
