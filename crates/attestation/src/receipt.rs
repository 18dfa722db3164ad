//! Signed Receipt Parsing and Signer Recovery

use crate::error::VerificationError;
use alloy_primitives::{address, b256, Address, Signature, B256, U256};
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use serde::Deserialize;
use std::borrow::Cow;

sol! {
    /// Typed-data schema indexers sign for every query response.
    #[derive(Debug, PartialEq, Eq)]
    struct Receipt {
        bytes32 requestCID;
        bytes32 responseCID;
        bytes32 subgraphDeploymentID;
    }
}

/// Arbitrum One
const DOMAIN_CHAIN_ID: u64 = 42161;
/// DisputeManager on Arbitrum One
const DISPUTE_MANAGER: Address = address!("0ab2b043138352413bb02e67e626a70320e3bd46");
const DOMAIN_SALT: B256 =
    b256!("a070ffb1cd7409649bf77822cce74495468e06dbfaef09556838bf188679b9c2");

/// EIP-712 domain under which gateway attestations are signed
pub fn graph_protocol_domain() -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed("Graph Protocol")),
        Some(Cow::Borrowed("0")),
        Some(U256::from(DOMAIN_CHAIN_ID)),
        Some(DISPUTE_MANAGER),
        Some(DOMAIN_SALT),
    )
}

/// Wire shape of the attestation header. Every field is optional here so a
/// missing one can be reported by name instead of as a generic parse error.
#[derive(Debug, Deserialize)]
struct RawAttestation {
    #[serde(rename = "requestCID")]
    request_cid: Option<B256>,
    #[serde(rename = "responseCID")]
    response_cid: Option<B256>,
    #[serde(rename = "subgraphDeploymentID")]
    subgraph_deployment_id: Option<B256>,
    r: Option<B256>,
    s: Option<B256>,
    v: Option<RecoveryByte>,
}

/// `v` arrives as a JSON number from most gateways, occasionally as a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecoveryByte {
    Number(u64),
    Text(String),
}

impl RecoveryByte {
    fn value(&self) -> Result<u64, VerificationError> {
        match self {
            RecoveryByte::Number(n) => Ok(*n),
            RecoveryByte::Text(s) => {
                let parsed = match s.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse::<u64>(),
                };
                parsed.map_err(|e| VerificationError::Malformed(format!("v: {e}")))
            }
        }
    }
}

/// A fully-populated attestation, ready for signer recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub request_cid: B256,
    pub response_cid: B256,
    pub subgraph_deployment_id: B256,
    pub r: B256,
    pub s: B256,
    pub v: u64,
}

impl Attestation {
    /// Parse the JSON header value, failing if any field is absent
    pub fn parse(payload: &str) -> Result<Self, VerificationError> {
        let raw: RawAttestation = serde_json::from_str(payload)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;

        Ok(Self {
            request_cid: raw.request_cid.ok_or(VerificationError::MissingField("requestCID"))?,
            response_cid: raw
                .response_cid
                .ok_or(VerificationError::MissingField("responseCID"))?,
            subgraph_deployment_id: raw
                .subgraph_deployment_id
                .ok_or(VerificationError::MissingField("subgraphDeploymentID"))?,
            r: raw.r.ok_or(VerificationError::MissingField("r"))?,
            s: raw.s.ok_or(VerificationError::MissingField("s"))?,
            v: raw.v.ok_or(VerificationError::MissingField("v"))?.value()?,
        })
    }

    /// The signed content fields
    pub fn receipt(&self) -> Receipt {
        Receipt {
            requestCID: self.request_cid,
            responseCID: self.response_cid,
            subgraphDeploymentID: self.subgraph_deployment_id,
        }
    }

    /// Recover the allocation address that signed this receipt
    pub fn recover_signer(&self) -> Result<Address, VerificationError> {
        // Both legacy (27/28) and raw parity (0/1) encodings are in the wild
        let y_parity = match self.v {
            0 | 27 => false,
            1 | 28 => true,
            other => {
                return Err(VerificationError::Recovery(format!("unsupported v value {other}")))
            }
        };

        let signature = Signature::new(
            U256::from_be_slice(self.r.as_slice()),
            U256::from_be_slice(self.s.as_slice()),
            y_parity,
        );
        let digest = self.receipt().eip712_signing_hash(&graph_protocol_domain());

        signature
            .recover_address_from_prehash(&digest)
            .map_err(|e| VerificationError::Recovery(e.to_string()))
    }

    /// Lower-cased `0x` address of the signer, used as the proof id
    pub fn allocation_id(&self) -> Result<String, VerificationError> {
        Ok(self.recover_signer()?.to_string().to_lowercase())
    }
}
