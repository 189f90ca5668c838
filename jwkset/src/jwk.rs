//! JSON Web Key definitions
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{KeyError, KeyResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Key type classification (RFC 7518 Section 6.1, RFC 8037)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "OKP")]
    Okp,
    #[serde(rename = "RSA")]
    Rsa,
    /// Symmetric key
    #[serde(rename = "oct")]
    Oct,
}

/// Intended use of the public key (RFC 7517 Section 4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
    Enc,
}

/// Permitted key operations (RFC 7517 Section 4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyOp {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    WrapKey,
    UnwrapKey,
    DeriveKey,
    DeriveBits,
}

impl KeyOp {
    /// Whether this operation is consistent with the given `use` value
    fn allowed_for(&self, key_use: KeyUse) -> bool {
        match key_use {
            KeyUse::Sig => matches!(self, KeyOp::Sign | KeyOp::Verify),
            KeyUse::Enc => !matches!(self, KeyOp::Sign | KeyOp::Verify),
        }
    }
}

/// Additional RSA prime information (RFC 7518 Section 6.3.2.7)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherPrime {
    pub r: String,
    pub d: String,
    pub t: String,
}

/// A single JSON Web Key
///
/// Key material is carried in its base64url JSON form. The store never
/// decodes it; it only routes, filters and validates members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: KeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<KeyOp>,

    // EC and OKP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    // RSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // Private members. `d` is shared by EC, OKP and RSA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oth: Vec<OtherPrime>,

    // Symmetric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,

    // X.509
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5u: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,
    #[serde(rename = "x5t#S256", default, skip_serializing_if = "Option::is_none")]
    pub x5t_s256: Option<String>,
}

/// A JSON Web Key Set as exchanged on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Options controlling how a key is marshaled for export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Include private key members
    pub private: bool,
}

impl MarshalOptions {
    pub fn public() -> Self {
        Self { private: false }
    }

    pub fn private() -> Self {
        Self { private: true }
    }
}

/// Options controlling key validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Skip all validation
    pub skip_all: bool,
    /// Skip the `key_ops`/`use` consistency checks
    pub skip_key_ops: bool,
    /// Skip X.509 metadata checks
    pub skip_metadata: bool,
}

impl Jwk {
    /// Create a key of the given type with only an ID set
    pub fn new(kty: KeyType, kid: impl Into<String>) -> Self {
        Self {
            kty,
            kid: Some(kid.into()),
            alg: None,
            key_use: None,
            key_ops: Vec::new(),
            crv: None,
            x: None,
            y: None,
            n: None,
            e: None,
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            oth: Vec::new(),
            k: None,
            x5u: None,
            x5c: Vec::new(),
            x5t: None,
            x5t_s256: None,
        }
    }

    /// Key ID, or the empty string when absent
    pub fn kid(&self) -> &str {
        self.kid.as_deref().unwrap_or("")
    }

    /// Whether any private member is present
    pub fn has_private(&self) -> bool {
        self.d.is_some()
            || self.p.is_some()
            || self.q.is_some()
            || self.dp.is_some()
            || self.dq.is_some()
            || self.qi.is_some()
            || !self.oth.is_empty()
            || self.k.is_some()
    }

    /// Copy of this key with every private member removed
    pub fn to_public(&self) -> Jwk {
        Jwk {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            oth: Vec::new(),
            k: None,
            ..self.clone()
        }
    }

    /// Marshal this key for export
    ///
    /// Symmetric keys have no public form, so asking for one is an
    /// [`KeyError::InvalidOptions`] failure.
    pub fn marshal(
        &self,
        marshal: MarshalOptions,
        validate: ValidateOptions,
    ) -> KeyResult<Jwk> {
        self.validate(&validate)?;
        if marshal.private {
            return Ok(self.clone());
        }
        if self.kty == KeyType::Oct {
            return Err(KeyError::InvalidOptions(format!(
                "symmetric key {:?} cannot be marshaled without private material",
                self.kid()
            )));
        }
        Ok(self.to_public())
    }

    /// Check the key's members against its type and metadata rules
    pub fn validate(&self, options: &ValidateOptions) -> KeyResult<()> {
        if options.skip_all {
            return Ok(());
        }

        let missing = |member: &str| {
            KeyError::Validation(format!(
                "{:?} key {:?} is missing required member {:?}",
                self.kty,
                self.kid(),
                member
            ))
        };
        match self.kty {
            KeyType::Rsa => {
                self.n.as_ref().ok_or_else(|| missing("n"))?;
                self.e.as_ref().ok_or_else(|| missing("e"))?;
            }
            KeyType::Ec => {
                self.crv.as_ref().ok_or_else(|| missing("crv"))?;
                self.x.as_ref().ok_or_else(|| missing("x"))?;
                self.y.as_ref().ok_or_else(|| missing("y"))?;
            }
            KeyType::Okp => {
                self.crv.as_ref().ok_or_else(|| missing("crv"))?;
                self.x.as_ref().ok_or_else(|| missing("x"))?;
            }
            KeyType::Oct => {
                self.k.as_ref().ok_or_else(|| missing("k"))?;
            }
        }

        if !options.skip_key_ops {
            let mut seen = HashSet::new();
            for op in &self.key_ops {
                if !seen.insert(op) {
                    return Err(KeyError::Validation(format!(
                        "key {:?} lists operation {:?} more than once",
                        self.kid(),
                        op
                    )));
                }
                if let Some(key_use) = self.key_use {
                    if !op.allowed_for(key_use) {
                        return Err(KeyError::Validation(format!(
                            "key {:?} operation {:?} conflicts with use {:?}",
                            self.kid(),
                            op,
                            key_use
                        )));
                    }
                }
            }
        }

        if !options.skip_metadata {
            if let Some(x5u) = &self.x5u {
                let https = Url::parse(x5u)
                    .map(|url| url.scheme() == "https")
                    .unwrap_or(false);
                if !https {
                    return Err(KeyError::Validation(format!(
                        "key {:?} x5u must be an https URL: {}",
                        self.kid(),
                        x5u
                    )));
                }
            }
            // SHA-1 and SHA-256 thumbprints
            for (name, value, digest_len) in [
                ("x5t", &self.x5t, 20),
                ("x5t#S256", &self.x5t_s256, 32),
            ] {
                if let Some(value) = value {
                    let decoded = URL_SAFE_NO_PAD.decode(value).map_err(|e| {
                        KeyError::Validation(format!(
                            "key {:?} member {} is not base64url: {}",
                            self.kid(),
                            name,
                            e
                        ))
                    })?;
                    if decoded.len() != digest_len {
                        return Err(KeyError::Validation(format!(
                            "key {:?} member {} decodes to {} bytes, expected {}",
                            self.kid(),
                            name,
                            decoded.len(),
                            digest_len
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
