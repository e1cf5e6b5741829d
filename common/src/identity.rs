use serde::{Deserialize, Serialize};
use strum::Display;

// A resolved party: the organization that signs and the node that transports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub org: String,
    pub node: String,
}

// Author + signing key pair carried by outbound messages.
// The key may be left empty and resolved against the local identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRef {
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerifierType {
    EthAddress,
    Ed25519,
}
