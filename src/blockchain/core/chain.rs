use alloy_primitives::{Address, B256, U256};
use sha2::{Digest, Sha256};

/// Number of the genesis header.
pub const GENESIS_NUMBER: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: B256,
    pub state_root: B256,
    pub beneficiary: Option<Address>,
    pub author: Address,
    pub difficulty: U256,
    /// Cumulative chain weight up to and including this header. Filled in by
    /// the block tree once the parent is known; never part of the hash.
    pub total_difficulty: Option<U256>,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    pub fn new(number: u64, parent_hash: B256, difficulty: U256) -> Self {
        Self {
            number,
            parent_hash,
            state_root: B256::ZERO,
            beneficiary: None,
            author: Address::ZERO,
            difficulty,
            total_difficulty: None,
            gas_limit: 8_000_000,
            timestamp: 0,
            extra_data: Vec::new(),
        }
    }

    pub fn genesis(difficulty: U256) -> Self {
        let mut header = Self::new(GENESIS_NUMBER, B256::ZERO, difficulty);
        header.total_difficulty = Some(difficulty);
        header
    }

    pub fn hash(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_le_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.state_root);
        if let Some(beneficiary) = self.beneficiary {
            hasher.update(beneficiary);
        }
        hasher.update(self.author);
        hasher.update(self.difficulty.to_be_bytes::<32>());
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(&self.extra_data);
        let digest: [u8; 32] = hasher.finalize().into();
        B256::from(digest)
    }

    pub fn is_genesis(&self) -> bool {
        self.number == GENESIS_NUMBER
    }

    /// The account credited for this block: the beneficiary when set,
    /// otherwise the sealing author.
    pub fn miner(&self) -> Address {
        self.beneficiary.unwrap_or(self.author)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub sender: Option<Address>,
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Transaction {
    /// Intrinsic gas of a plain value transfer.
    pub const BASE_TX_GAS_COST: u64 = 21_000;

    pub fn transfer(sender: Address, to: Address, nonce: u64, value: U256) -> Self {
        Self {
            sender: Some(sender),
            to: Some(to),
            nonce,
            gas_price: U256::from(1u64),
            gas_limit: Self::BASE_TX_GAS_COST,
            value,
            data: Vec::new(),
        }
    }

    pub fn hash(&self) -> B256 {
        let mut hasher = Sha256::new();
        if let Some(sender) = self.sender {
            hasher.update(sender);
        }
        if let Some(to) = self.to {
            hasher.update(to);
        }
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.gas_price.to_be_bytes::<32>());
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.value.to_be_bytes::<32>());
        hasher.update(&self.data);
        let digest: [u8; 32] = hasher.finalize().into();
        B256::from(digest)
    }

    /// Maximum amount the sender can be charged: `gas_price * gas_limit + value`.
    pub fn max_cost(&self) -> U256 {
        self.gas_price
            .saturating_mul(U256::from(self.gas_limit))
            .saturating_add(self.value)
    }

    pub fn short(&self) -> String {
        let hash = self.hash();
        format!("tx {}.. nonce {}", hex::encode(&hash[..4]), self.nonce)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    pub fn short(&self) -> String {
        let hash = self.hash();
        format!("{} ({}..)", self.header.number, hex::encode(&hash[..4]))
    }
}

/// Build `count` headers on top of `parent`, each one linked to the previous.
pub fn build_chain(parent: &BlockHeader, count: usize, difficulty: U256, salt: u8) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut parent_hash = parent.hash();
    let mut number = parent.number;
    for _ in 0..count {
        number += 1;
        let mut header = BlockHeader::new(number, parent_hash, difficulty);
        header.timestamp = number * 15;
        header.extra_data = vec![salt];
        parent_hash = header.hash();
        headers.push(header);
    }
    headers
}
