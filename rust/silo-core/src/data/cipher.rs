use serde::{Deserialize, Serialize};

/// An opaque encrypted payload as produced by the upstream crypto layer: an
/// initialization vector, an authentication tag and the ciphertext itself,
/// all base64-encoded. Replication copies these verbatim and never attempts
/// to decrypt or re-encrypt them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherText {
    /// Initialization vector used for this payload
    pub iv: String,
    /// Authentication tag over the ciphertext
    pub tag: String,
    /// The encrypted bytes
    pub data: String,
}

impl CipherText {
    /// Assemble a [CipherText] from its three parts
    pub fn new(iv: impl Into<String>, tag: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            iv: iv.into(),
            tag: tag.into(),
            data: data.into(),
        }
    }
}

/// How the plaintext was encoded before encryption
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEncoding {
    /// Plaintext was UTF-8
    #[default]
    Utf8,
    /// Plaintext was base64-encoded binary
    Base64,
}
