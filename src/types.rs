//! Common type definitions for the Ember chain engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Implements a 32-byte hash newtype with hex Display and serde support.
macro_rules! impl_hash_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// The all-zero hash.
            pub fn all_zeros() -> Self {
                Self([0u8; 32])
            }

            /// Construct from raw bytes.
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse from a hex string.
            pub fn from_hex(hex_str: &str) -> Result<Self, String> {
                let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
                let bytes =
                    hex::decode(hex_str).map_err(|e| format!("Invalid hex: {}", e))?;
                if bytes.len() != 32 {
                    return Err(format!(
                        "Invalid hash length: expected 32 bytes, got {}",
                        bytes.len()
                    ));
                }
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_hash_newtype!(BlockHash, "Hash identifying a block header.");
impl_hash_newtype!(TxId, "Hash identifying a transaction.");
impl_hash_newtype!(MerkleRoot, "Commitment to the transactions of a block.");

/// An account address.
///
/// Addresses are opaque strings here; key derivation and signing belong to
/// the wallet, which is outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// The designated system address used by reward transactions.
    pub fn system() -> Self {
        Address("system".to_string())
    }

    /// Whether this is the system address.
    pub fn is_system(&self) -> bool {
        self.0 == "system"
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// A block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of the block in the chain.
    pub height: u64,
    /// Hash of the previous block header.
    pub previous_hash: BlockHash,
    /// Commitment to the block's transactions.
    pub merkle_root: MerkleRoot,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Proof-of-work difficulty. Valid headers carry a difficulty of at
    /// least 1.
    pub difficulty: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Header format version.
    pub version: u32,
}

impl BlockHeader {
    /// Compute the block hash. A pure function of the header fields.
    pub fn block_hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.merkle_root.as_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.difficulty.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.version.to_be_bytes());
        BlockHash(hasher.finalize().into())
    }
}

/// Reference to an output of a prior transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction that created the output.
    pub txid: TxId,
    /// Index of the output within that transaction.
    pub vout: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A transaction input.
///
/// Carries the value and owner of the consumed output so a block can be
/// reverted without consulting historical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Output being spent.
    pub outpoint: OutPoint,
    /// Value of the consumed output.
    pub value: u64,
    /// Owner of the consumed output.
    pub owner: Address,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value of the output.
    pub value: u64,
    /// Address the output is payable to.
    pub owner: Address,
}

/// Domain-specific effect of a transaction beyond value transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// Plain value transfer.
    Transfer,
    /// Block reward entry. The height makes each reward txid unique.
    Coinbase { height: u64 },
    /// Write to contract storage.
    ContractWrite {
        contract: String,
        key: String,
        value: String,
    },
    /// Vote on a governance proposal.
    GovernanceVote { proposal: String, approve: bool },
    /// Certificate attesting that a supermajority of validators consider a
    /// block irreversible.
    FinalityCertificate {
        height: u64,
        block_hash: BlockHash,
        signers: u32,
    },
}

/// A transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Originating address.
    pub sender: Address,
    /// Per-sender sequence number. Reward transactions and legacy
    /// fee-ordered transactions carry no nonce.
    pub nonce: Option<u64>,
    /// Fee offered to the block producer.
    pub fee: u64,
    /// Outputs consumed.
    pub inputs: Vec<TxInput>,
    /// Outputs created.
    pub outputs: Vec<TxOutput>,
    /// Domain-specific effect.
    pub payload: TxPayload,
}

impl Transaction {
    /// Compute the transaction id. A pure function of the content.
    pub fn txid(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.0.as_bytes());
        hasher.update([self.sender.0.len() as u8]);
        match self.nonce {
            Some(n) => {
                hasher.update([1u8]);
                hasher.update(n.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.fee.to_be_bytes());
        for input in &self.inputs {
            hasher.update(input.outpoint.txid.as_bytes());
            hasher.update(input.outpoint.vout.to_be_bytes());
            hasher.update(input.value.to_be_bytes());
            hasher.update(input.owner.0.as_bytes());
        }
        for output in &self.outputs {
            hasher.update(output.value.to_be_bytes());
            hasher.update(output.owner.0.as_bytes());
        }
        match &self.payload {
            TxPayload::Transfer => hasher.update([0u8]),
            TxPayload::Coinbase {
                height,
            } => {
                hasher.update([1u8]);
                hasher.update(height.to_be_bytes());
            }
            TxPayload::ContractWrite {
                contract,
                key,
                value,
            } => {
                hasher.update([2u8]);
                hasher.update(contract.as_bytes());
                hasher.update([0u8]);
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
                hasher.update(value.as_bytes());
            }
            TxPayload::GovernanceVote {
                proposal,
                approve,
            } => {
                hasher.update([3u8]);
                hasher.update(proposal.as_bytes());
                hasher.update([*approve as u8]);
            }
            TxPayload::FinalityCertificate {
                height,
                block_hash,
                signers,
            } => {
                hasher.update([4u8]);
                hasher.update(height.to_be_bytes());
                hasher.update(block_hash.as_bytes());
                hasher.update(signers.to_be_bytes());
            }
        }
        TxId(hasher.finalize().into())
    }

    /// Whether this is the designated reward entry.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.payload, TxPayload::Coinbase { .. })
    }
}

/// Compute the merkle commitment over a block's transactions.
///
/// Pairwise tree with the last entry duplicated on odd levels. An empty
/// transaction list commits to the all-zero root.
pub fn compute_merkle_root(transactions: &[Transaction]) -> MerkleRoot {
    if transactions.is_empty() {
        return MerkleRoot::all_zeros();
    }

    let mut level: Vec<[u8; 32]> =
        transactions.iter().map(|tx| tx.txid().0).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 {
                pair[1]
            } else {
                pair[0]
            };
            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().into());
        }
        level = next;
    }

    MerkleRoot(level[0])
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The hash of the block's header.
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// The block's height.
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

/// Canonical chain headers with a reverse hash index.
///
/// Headers are stored by height starting from genesis; the index maps
/// `hash -> height` for O(1) ancestry checks.
#[derive(Clone, Default)]
pub struct ChainState {
    headers: Vec<BlockHeader>,
    hash_index: HashMap<BlockHash, u64>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the current tip, or None for an empty chain.
    pub fn tip_height(&self) -> Option<u64> {
        self.headers.len().checked_sub(1).map(|h| h as u64)
    }

    /// Header at the current tip.
    pub fn tip_header(&self) -> Option<&BlockHeader> {
        self.headers.last()
    }

    /// Hash of the current tip.
    pub fn tip_hash(&self) -> Option<BlockHash> {
        self.headers.last().map(|h| h.block_hash())
    }

    /// Header at the given height.
    pub fn header_at_height(&self, height: u64) -> Option<&BlockHeader> {
        self.headers.get(height as usize)
    }

    /// Height of the header with the given hash, if it is on the canonical
    /// chain.
    pub fn height_of(&self, hash: &BlockHash) -> Option<u64> {
        self.hash_index.get(hash).copied()
    }

    /// Whether the given hash is on the canonical chain.
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.hash_index.contains_key(hash)
    }

    /// Append a header at the tip. The header's height must equal the next
    /// height; linkage is the caller's responsibility (validated upstream).
    pub fn add_header(&mut self, header: BlockHeader) {
        self.hash_index.insert(header.block_hash(), header.height);
        self.headers.push(header);
    }

    /// Remove and return the tip header.
    pub fn remove_tip(&mut self) -> Option<BlockHeader> {
        let header = self.headers.pop()?;
        self.hash_index.remove(&header.block_hash());
        Some(header)
    }

    /// Headers from `from_height` (exclusive) to the tip, ascending.
    pub fn headers_above(&self, from_height: u64) -> &[BlockHeader] {
        let start = (from_height + 1) as usize;
        self.headers.get(start..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl fmt::Debug for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainState")
            .field("headers", &format!("{} headers", self.headers.len()))
            .field("tip_height", &self.tip_height())
            .field("tip_hash", &self.tip_hash())
            .finish()
    }
}

/// Event emitted when a reorganization completes.
#[derive(Debug, Clone)]
pub struct ReorgEvent {
    /// The common ancestor where the chains diverged.
    pub common_ancestor: BlockHash,
    /// Height of the common ancestor.
    pub common_height: u64,
    /// Headers removed from the canonical chain, tip first.
    pub disconnected: Vec<BlockHeader>,
    /// Headers added to the canonical chain, ascending.
    pub connected: Vec<BlockHeader>,
    /// Non-reward transactions from the disconnected blocks, candidates
    /// for re-admission to the mempool.
    pub affected_transactions: Vec<Transaction>,
}

/// Structured result of a reorganization attempt.
///
/// Rejection is an expected outcome (the old tip stays canonical), not a
/// fault; truly exceptional failures surface as errors instead.
#[derive(Debug, Clone)]
pub enum ReorgOutcome {
    /// The chain switched to the new tip.
    Completed { event: ReorgEvent },
    /// The reorganization was aborted; the old tip remains canonical.
    Rejected { old_tip: BlockHash, reason: String },
}

impl ReorgOutcome {
    /// Whether the reorganization completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, ReorgOutcome::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_hash_is_pure() {
        let header = BlockHeader {
            height: 7,
            previous_hash: BlockHash::all_zeros(),
            merkle_root: MerkleRoot::all_zeros(),
            timestamp: 1_700_000_000,
            difficulty: 8,
            nonce: 42,
            version: 1,
        };
        assert_eq!(header.block_hash(), header.block_hash());

        let mut changed = header;
        changed.nonce = 43;
        assert_ne!(header.block_hash(), changed.block_hash());
    }

    #[test]
    fn test_hash_hex_round_trip() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        let parsed = BlockHash::from_hex(&hash.to_string()).unwrap();
        assert_eq!(hash, parsed);

        assert!(BlockHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_txid_distinguishes_payloads() {
        let base = Transaction {
            sender: Address::from("alice"),
            nonce: Some(0),
            fee: 10,
            inputs: vec![],
            outputs: vec![],
            payload: TxPayload::Transfer,
        };
        let mut vote = base.clone();
        vote.payload = TxPayload::GovernanceVote {
            proposal: "p-1".to_string(),
            approve: true,
        };
        assert_ne!(base.txid(), vote.txid());
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let tx = |nonce| Transaction {
            sender: Address::from("alice"),
            nonce: Some(nonce),
            fee: 1,
            inputs: vec![],
            outputs: vec![],
            payload: TxPayload::Transfer,
        };
        let a = tx(0);
        let b = tx(1);
        let c = tx(2);
        let forward = compute_merkle_root(&[a.clone(), b.clone(), c.clone()]);
        let reversed = compute_merkle_root(&[c, b, a]);
        assert_ne!(forward, reversed);
        assert_eq!(compute_merkle_root(&[]), MerkleRoot::all_zeros());
    }

    #[test]
    fn test_chain_state_index() {
        let mut state = ChainState::new();
        assert!(state.tip_height().is_none());

        let genesis = BlockHeader {
            height: 0,
            previous_hash: BlockHash::all_zeros(),
            merkle_root: MerkleRoot::all_zeros(),
            timestamp: 0,
            difficulty: 1,
            nonce: 0,
            version: 1,
        };
        state.add_header(genesis);
        assert_eq!(state.tip_height(), Some(0));
        assert_eq!(state.height_of(&genesis.block_hash()), Some(0));

        let removed = state.remove_tip().unwrap();
        assert_eq!(removed, genesis);
        assert!(!state.contains(&genesis.block_hash()));
    }
}
