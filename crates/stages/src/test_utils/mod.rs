//! Mocks for stage tests: a canned chain and a canned probe VM.

use crate::{
    probe::{
        CallOutcome, ProbeVm, VmFactory, ERC1167_PREFIX, ERC1167_SUFFIX, SEL_ASSET, SEL_DECIMALS,
        SEL_NAME, SEL_SUPPORTS_INTERFACE, SEL_SYMBOL, SEL_TOTAL_ASSETS,
    },
    ChainReader, StageError, TxLogs,
};
use alloy_consensus::Header;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, Log, LogData, B256};
use std::collections::{BTreeMap, HashMap};

/// In-memory canonical chain.
#[derive(Debug, Default, Clone)]
pub struct MockChain {
    headers: BTreeMap<u64, Header>,
    withdrawals: BTreeMap<u64, Vec<Withdrawal>>,
    logs: BTreeMap<u64, Vec<TxLogs>>,
}

impl MockChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block with the given fee recipient.
    pub fn add_block(&mut self, block_num: u64, coinbase: Address) {
        self.headers.insert(
            block_num,
            Header { number: block_num, beneficiary: coinbase, ..Default::default() },
        );
    }

    /// Attaches withdrawals to a block.
    pub fn add_withdrawals(&mut self, block_num: u64, withdrawals: Vec<Withdrawal>) {
        self.withdrawals.insert(block_num, withdrawals);
    }

    /// Attaches one transaction's logs to a block.
    pub fn add_tx_logs(&mut self, block_num: u64, eth_tx: u64, logs: Vec<Log>) {
        self.logs.entry(block_num).or_default().push(TxLogs { block_num, eth_tx, logs });
    }

    /// Highest block number on the chain.
    pub fn tip(&self) -> u64 {
        self.headers.keys().next_back().copied().unwrap_or(0)
    }
}

impl ChainReader for MockChain {
    fn header(&self, block_num: u64) -> Result<Option<Header>, StageError> {
        Ok(self.headers.get(&block_num).cloned())
    }

    fn withdrawals(&self, block_num: u64) -> Result<Vec<Withdrawal>, StageError> {
        Ok(self.withdrawals.get(&block_num).cloned().unwrap_or_default())
    }

    fn tx_logs(&self, block_num: u64) -> Result<Vec<TxLogs>, StageError> {
        Ok(self.logs.get(&block_num).cloned().unwrap_or_default())
    }
}

/// Builds a `Transfer`-style log with the given topics.
pub fn transfer_log(token: Address, topic0: B256, from: Address, to: Address, nft: bool) -> Log {
    let mut topics = vec![topic0, from.into_word(), to.into_word()];
    if nft {
        // Token id as a third indexed argument.
        topics.push(B256::with_last_byte(1));
    }
    Log { address: token, data: LogData::new_unchecked(topics, Default::default()) }
}

/// Canned probe VM: unknown calls revert, unknown addresses have no code.
#[derive(Debug, Default, Clone)]
pub struct MockVm {
    calls: HashMap<(Address, Vec<u8>), CallOutcome>,
    codes: HashMap<Address, Vec<u8>>,
}

/// A left-padded `bool` word.
pub fn bool_word(b: bool) -> Vec<u8> {
    let mut w = vec![0u8; 32];
    w[31] = u8::from(b);
    w
}

/// A left-padded `uint8` word.
pub fn u8_word(v: u8) -> Vec<u8> {
    let mut w = vec![0u8; 32];
    w[31] = v;
    w
}

/// A left-padded address word.
pub fn address_word(addr: Address) -> Vec<u8> {
    addr.into_word().to_vec()
}

/// An ABI-encoded dynamic string blob.
pub fn string_blob(s: &str) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    out[31] = 32; // offset
    out[63] = s.len() as u8;
    out.extend_from_slice(s.as_bytes());
    out.resize(64 + s.len().div_ceil(32) * 32, 0);
    out
}

fn supports_interface_calldata(id: [u8; 4]) -> Vec<u8> {
    let mut input = vec![0u8; 36];
    input[..4].copy_from_slice(&SEL_SUPPORTS_INTERFACE);
    input[4..8].copy_from_slice(&id);
    input
}

impl MockVm {
    /// An empty VM.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cans the response for one exact call.
    pub fn set_call(&mut self, addr: Address, input: Vec<u8>, outcome: CallOutcome) {
        self.calls.insert((addr, input), outcome);
    }

    /// Cans the deployed bytecode of `addr`.
    pub fn set_code(&mut self, addr: Address, code: Vec<u8>) {
        self.codes.insert(addr, code);
    }

    /// Cans an ERC165-compliant contract supporting the listed interface
    /// ids (0x01ffc9a7 is implied; 0xffffffff answers false).
    pub fn deploy_erc165(&mut self, addr: Address, interface_ids: &[[u8; 4]]) {
        self.set_call(
            addr,
            supports_interface_calldata([0x01, 0xff, 0xc9, 0xa7]),
            CallOutcome::success(bool_word(true)),
        );
        self.set_call(
            addr,
            supports_interface_calldata([0xff, 0xff, 0xff, 0xff]),
            CallOutcome::success(bool_word(false)),
        );
        for id in interface_ids {
            self.set_call(
                addr,
                supports_interface_calldata(*id),
                CallOutcome::success(bool_word(true)),
            );
        }
    }

    /// Cans a well-behaved ERC20 token.
    pub fn deploy_erc20(&mut self, addr: Address) {
        self.set_call(addr, SEL_DECIMALS.to_vec(), CallOutcome::success(u8_word(18)));
        self.set_call(addr, SEL_NAME.to_vec(), CallOutcome::success(string_blob("Token")));
        self.set_call(addr, SEL_SYMBOL.to_vec(), CallOutcome::success(string_blob("TKN")));
    }

    /// Cans an ERC4626 vault on top of an ERC20 deployment.
    pub fn deploy_erc4626(&mut self, addr: Address, asset: Address) {
        self.deploy_erc20(addr);
        self.set_call(addr, SEL_ASSET.to_vec(), CallOutcome::success(address_word(asset)));
        self.set_call(addr, SEL_TOTAL_ASSETS.to_vec(), CallOutcome::success(u8_word(0)));
    }

    /// Cans an ERC1167 minimal proxy pointing at `implementation`.
    pub fn deploy_erc1167(&mut self, addr: Address, implementation: Address) {
        let mut code = Vec::with_capacity(45);
        code.extend_from_slice(&ERC1167_PREFIX);
        code.extend_from_slice(implementation.as_slice());
        code.extend_from_slice(&ERC1167_SUFFIX);
        self.set_code(addr, code);
    }
}

impl ProbeVm for MockVm {
    fn static_call(&mut self, addr: Address, input: &[u8]) -> Result<CallOutcome, StageError> {
        Ok(self.calls.get(&(addr, input.to_vec())).cloned().unwrap_or_else(CallOutcome::revert))
    }

    fn code(&mut self, addr: Address) -> Result<Vec<u8>, StageError> {
        Ok(self.codes.get(&addr).cloned().unwrap_or_default())
    }
}

/// Factory handing each consumer a clone of the canned VM.
#[derive(Debug, Default, Clone)]
pub struct MockVmFactory(pub MockVm);

impl VmFactory for MockVmFactory {
    fn probe_vm(&self) -> Result<Box<dyn ProbeVm + Send + '_>, StageError> {
        Ok(Box::new(self.0.clone()))
    }
}
