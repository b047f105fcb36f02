//! Protocol message codec
//!
//! Pulls the cross-chain message out of a burn receipt and decodes its wire format.
//! Everything here is pure: no I/O, no shared state.
//!
//! Message layout (big-endian, packed):
//!
//! | offset | size | field              |
//! |--------|------|--------------------|
//! | 0      | 4    | version            |
//! | 4      | 4    | source domain      |
//! | 8      | 4    | destination domain |
//! | 12     | 8    | nonce              |
//! | 20     | 32   | sender             |
//! | 52     | 32   | recipient          |
//! | 84     | 32   | destination caller |
//! | 116    | ..   | body               |
//!
//! Burn body: version (4), burn token (32), mint recipient (32), amount (32), message sender (32).

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use thiserror::Error;

use crate::transfer::types::DomainId;

/// Event emitted by the message transmitter for every outgoing message
pub const MESSAGE_SENT_EVENT: &str = "MessageSent(bytes)";

const HEADER_LEN: usize = 116;
const BURN_BODY_LEN: usize = 132;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("no log with topic {topic:?} ({signature}) in receipt")]
    EventNotFound { signature: String, topic: H256 },
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("{what} too short: {len} bytes, need {min}")]
    Truncated {
        what: &'static str,
        len: usize,
        min: usize,
    },
}

/// Message bytes and their hash as found in a receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub bytes: Bytes,
    pub hash: H256,
}

/// Topic of an event: keccak-256 of its canonical signature
pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// Hash used as the oracle lookup key
pub fn message_hash(message: &[u8]) -> H256 {
    H256::from(keccak256(message))
}

/// Find the first log whose topic matches `event_signature` and decode its `bytes` payload.
///
/// The protocol emits at most one message per burn, so later matches are ignored.
pub fn extract_message(
    receipt: &TransactionReceipt,
    event_signature: &str,
) -> Result<ExtractedMessage, CodecError> {
    let topic = event_topic(event_signature);
    let log = receipt
        .logs
        .iter()
        .find(|log| log.topics.first() == Some(&topic))
        .ok_or_else(|| CodecError::EventNotFound {
            signature: event_signature.to_string(),
            topic,
        })?;

    let tokens = abi::decode(&[ParamType::Bytes], &log.data)
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
    let bytes = match tokens.into_iter().next() {
        Some(Token::Bytes(bytes)) => bytes,
        other => {
            return Err(CodecError::MalformedPayload(format!(
                "expected a bytes payload, got {:?}",
                other
            )))
        }
    };

    let hash = message_hash(&bytes);
    Ok(ExtractedMessage {
        bytes: Bytes::from(bytes),
        hash,
    })
}

/// Left-pad a 20-byte address into the protocol's 32-byte form
pub fn address_to_bytes32(address: Address) -> H256 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_bytes());
    H256(out)
}

/// Canonical form of a hex EVM recipient
pub fn canonical_address(recipient: &str) -> Result<H256, CodecError> {
    let trimmed = recipient.trim();
    if !trimmed.starts_with("0x") {
        return Err(CodecError::InvalidAddress(recipient.to_string()));
    }
    trimmed
        .parse::<Address>()
        .map(address_to_bytes32)
        .map_err(|_| CodecError::InvalidAddress(recipient.to_string()))
}

/// Message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub version: u32,
    pub source_domain: DomainId,
    pub destination_domain: DomainId,
    pub nonce: u64,
    pub sender: H256,
    pub recipient: H256,
    pub destination_caller: H256,
    pub body: Bytes,
}

impl ProtocolMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                what: "message header",
                len: bytes.len(),
                min: HEADER_LEN,
            });
        }

        Ok(Self {
            version: be_u32(&bytes[0..4]),
            source_domain: DomainId::new(be_u32(&bytes[4..8])),
            destination_domain: DomainId::new(be_u32(&bytes[8..12])),
            nonce: be_u64(&bytes[12..20]),
            sender: H256::from_slice(&bytes[20..52]),
            recipient: H256::from_slice(&bytes[52..84]),
            destination_caller: H256::from_slice(&bytes[84..116]),
            body: Bytes::from(bytes[HEADER_LEN..].to_vec()),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.source_domain.as_u32().to_be_bytes());
        out.extend_from_slice(&self.destination_domain.as_u32().to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(self.recipient.as_bytes());
        out.extend_from_slice(self.destination_caller.as_bytes());
        out.extend_from_slice(&self.body);
        Bytes::from(out)
    }
}

/// Body of a burn message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    pub version: u32,
    pub burn_token: H256,
    pub mint_recipient: H256,
    pub amount: U256,
    pub message_sender: H256,
}

impl BurnMessage {
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < BURN_BODY_LEN {
            return Err(CodecError::Truncated {
                what: "burn message body",
                len: body.len(),
                min: BURN_BODY_LEN,
            });
        }

        Ok(Self {
            version: be_u32(&body[0..4]),
            burn_token: H256::from_slice(&body[4..36]),
            mint_recipient: H256::from_slice(&body[36..68]),
            amount: U256::from_big_endian(&body[68..100]),
            message_sender: H256::from_slice(&body[100..132]),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut amount = [0u8; 32];
        self.amount.to_big_endian(&mut amount);

        let mut out = Vec::with_capacity(BURN_BODY_LEN);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(self.burn_token.as_bytes());
        out.extend_from_slice(self.mint_recipient.as_bytes());
        out.extend_from_slice(&amount);
        out.extend_from_slice(self.message_sender.as_bytes());
        Bytes::from(out)
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Log;

    fn sample_message() -> ProtocolMessage {
        let body = BurnMessage {
            version: 0,
            burn_token: address_to_bytes32(Address::repeat_byte(0x1c)),
            mint_recipient: address_to_bytes32(Address::repeat_byte(0xaa)),
            amount: U256::from(1_000_000u64),
            message_sender: address_to_bytes32(Address::repeat_byte(0x55)),
        };
        ProtocolMessage {
            version: 0,
            source_domain: DomainId::ETHEREUM,
            destination_domain: DomainId::BASE,
            nonce: 261_042,
            sender: H256::repeat_byte(0x9f),
            recipient: H256::repeat_byte(0x78),
            destination_caller: H256::zero(),
            body: body.encode(),
        }
    }

    fn log_with(topic: H256, data: Vec<u8>) -> Log {
        Log {
            topics: vec![topic],
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonical_address_left_pads() {
        let canonical = canonical_address("0x7865fAfC2db2093669d92c0F33AeEF291086BEFD").unwrap();
        assert_eq!(&canonical.as_bytes()[..12], &[0u8; 12]);
        assert_eq!(
            Address::from_slice(&canonical.as_bytes()[12..]),
            "0x7865fAfC2db2093669d92c0F33AeEF291086BEFD".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_canonical_address_rejects_garbage() {
        for input in [
            "",
            "0x1234",
            "not-an-address",
            "7865fAfC2db2093669d92c0F33AeEF291086BEFD",
            "0X7865fAfC2db2093669d92c0F33AeEF291086BEFD",
        ] {
            assert!(
                matches!(canonical_address(input), Err(CodecError::InvalidAddress(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_extract_message() {
        let message = sample_message().encode();
        let receipt = TransactionReceipt {
            logs: vec![
                log_with(event_topic("Transfer(address,address,uint256)"), vec![0u8; 32]),
                log_with(
                    event_topic(MESSAGE_SENT_EVENT),
                    abi::encode(&[Token::Bytes(message.to_vec())]),
                ),
            ],
            ..Default::default()
        };

        let extracted = extract_message(&receipt, MESSAGE_SENT_EVENT).unwrap();
        assert_eq!(extracted.bytes, message);
        assert_eq!(extracted.hash, message_hash(&message));
    }

    #[test]
    fn test_extract_message_event_not_found() {
        let receipt = TransactionReceipt {
            logs: vec![log_with(event_topic("Approval(address,address,uint256)"), vec![])],
            ..Default::default()
        };

        let err = extract_message(&receipt, MESSAGE_SENT_EVENT).unwrap_err();
        assert_eq!(
            err,
            CodecError::EventNotFound {
                signature: MESSAGE_SENT_EVENT.to_string(),
                topic: event_topic(MESSAGE_SENT_EVENT),
            }
        );
    }

    #[test]
    fn test_extract_message_malformed_payload() {
        let receipt = TransactionReceipt {
            logs: vec![log_with(event_topic(MESSAGE_SENT_EVENT), vec![0xde, 0xad])],
            ..Default::default()
        };

        assert!(matches!(
            extract_message(&receipt, MESSAGE_SENT_EVENT),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_protocol_message_decode() {
        let original = sample_message();
        let decoded = ProtocolMessage::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);

        let burn = BurnMessage::decode(&decoded.body).unwrap();
        assert_eq!(burn.amount, U256::from(1_000_000u64));
        assert_eq!(burn.mint_recipient, address_to_bytes32(Address::repeat_byte(0xaa)));
    }

    #[test]
    fn test_decode_truncated() {
        let err = ProtocolMessage::decode(&[0u8; 20]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                what: "message header",
                len: 20,
                min: HEADER_LEN
            }
        );

        assert!(matches!(BurnMessage::decode(&[0u8; 100]), Err(CodecError::Truncated { .. })));
    }
}
