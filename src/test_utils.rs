//! Shared helpers for building test chains, blocks and transactions.

use crate::types::{
    compute_merkle_root, Address, Block, BlockHash, BlockHeader, MerkleRoot, OutPoint,
    Transaction, TxInput, TxOutput, TxPayload,
};

/// A genesis header with a small fixed difficulty.
pub fn genesis_header() -> BlockHeader {
    BlockHeader {
        height: 0,
        previous_hash: BlockHash::all_zeros(),
        merkle_root: MerkleRoot::all_zeros(),
        timestamp: 1_700_000_000,
        difficulty: 4,
        nonce: 0,
        version: 1,
    }
}

/// A header extending `prev` at the same difficulty.
pub fn header_extending(prev: &BlockHeader, nonce: u64) -> BlockHeader {
    BlockHeader {
        height: prev.height + 1,
        previous_hash: prev.block_hash(),
        merkle_root: MerkleRoot::all_zeros(),
        timestamp: prev.timestamp + 600,
        difficulty: prev.difficulty,
        nonce,
        version: 1,
    }
}

/// A header extending `prev` at an explicit difficulty.
pub fn header_with_difficulty(prev: &BlockHeader, nonce: u64, difficulty: u32) -> BlockHeader {
    BlockHeader {
        difficulty,
        ..header_extending(prev, nonce)
    }
}

/// Assemble a block, fixing up the header's merkle commitment to match the
/// body.
pub fn block_with(mut header: BlockHeader, transactions: Vec<Transaction>) -> Block {
    header.merkle_root = compute_merkle_root(&transactions);
    Block {
        header,
        transactions,
    }
}

/// A chain of `len` empty-bodied headers from genesis.
pub fn chain_of(len: usize, difficulty: u32) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(len);
    let mut genesis = genesis_header();
    genesis.difficulty = difficulty;
    headers.push(genesis);
    for i in 1..len {
        headers.push(header_extending(&headers[i - 1], i as u64));
    }
    headers
}

/// A chain of `len` empty-bodied blocks from genesis.
pub fn build_chain(len: usize) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(len);
    blocks.push(block_with(genesis_header(), vec![]));
    for i in 1..len {
        let header = header_extending(&blocks[i - 1].header, i as u64);
        blocks.push(block_with(header, vec![]));
    }
    blocks
}

/// A reward transaction paying the block producer.
pub fn reward_tx(height: u64, amount: u64) -> Transaction {
    Transaction {
        sender: Address::system(),
        nonce: None,
        fee: 0,
        inputs: vec![],
        outputs: vec![TxOutput {
            value: amount,
            owner: Address::from("miner"),
        }],
        payload: TxPayload::Coinbase {
            height,
        },
    }
}

/// A minimal nonced transfer with no inputs or outputs.
pub fn nonced_tx(sender: &str, nonce: u64, fee: u64) -> Transaction {
    Transaction {
        sender: Address::from(sender),
        nonce: Some(nonce),
        fee,
        inputs: vec![],
        outputs: vec![],
        payload: TxPayload::Transfer,
    }
}

/// A nonce-less transaction distinguished by a salt output.
pub fn fee_tx(sender: &str, fee: u64, salt: u64) -> Transaction {
    Transaction {
        sender: Address::from(sender),
        nonce: None,
        fee,
        inputs: vec![],
        outputs: vec![TxOutput {
            value: salt,
            owner: Address::from(sender),
        }],
        payload: TxPayload::Transfer,
    }
}

/// A nonced transfer creating one output for `receiver`.
pub fn nonced_pay_tx(sender: &str, nonce: u64, receiver: &str, value: u64) -> Transaction {
    Transaction {
        sender: Address::from(sender),
        nonce: Some(nonce),
        fee: 1,
        inputs: vec![],
        outputs: vec![TxOutput {
            value,
            owner: Address::from(receiver),
        }],
        payload: TxPayload::Transfer,
    }
}

/// A transfer spending output `vout` of `source`, paying `amount` to `to`
/// with any remainder returned to `from`.
pub fn transfer_tx(
    source: &Transaction,
    vout: u32,
    from: &str,
    nonce: u64,
    to: &str,
    amount: u64,
) -> Transaction {
    let consumed = &source.outputs[vout as usize];
    let mut outputs = vec![TxOutput {
        value: amount,
        owner: Address::from(to),
    }];
    if consumed.value > amount {
        outputs.push(TxOutput {
            value: consumed.value - amount,
            owner: Address::from(from),
        });
    }
    Transaction {
        sender: Address::from(from),
        nonce: Some(nonce),
        fee: 0,
        inputs: vec![TxInput {
            outpoint: OutPoint {
                txid: source.txid(),
                vout,
            },
            value: consumed.value,
            owner: Address::from(from),
        }],
        outputs,
        payload: TxPayload::Transfer,
    }
}

/// A contract storage write.
pub fn contract_tx(
    sender: &str,
    nonce: u64,
    contract: &str,
    key: &str,
    value: &str,
) -> Transaction {
    Transaction {
        sender: Address::from(sender),
        nonce: Some(nonce),
        fee: 1,
        inputs: vec![],
        outputs: vec![],
        payload: TxPayload::ContractWrite {
            contract: contract.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        },
    }
}

/// A governance vote.
pub fn vote_tx(sender: &str, nonce: u64, proposal: &str, approve: bool) -> Transaction {
    Transaction {
        sender: Address::from(sender),
        nonce: Some(nonce),
        fee: 1,
        inputs: vec![],
        outputs: vec![],
        payload: TxPayload::GovernanceVote {
            proposal: proposal.to_string(),
            approve,
        },
    }
}

/// A finality certificate carried by a relayer without a nonce.
pub fn cert_tx(height: u64, block_hash: BlockHash, signers: u32) -> Transaction {
    Transaction {
        sender: Address::from("relayer"),
        nonce: None,
        fee: 0,
        inputs: vec![],
        outputs: vec![],
        payload: TxPayload::FinalityCertificate {
            height,
            block_hash,
            signers,
        },
    }
}
