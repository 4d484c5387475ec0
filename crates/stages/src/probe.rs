//! Contract-class probing.
//!
//! A [`Prober`] evaluates the contents of an address and decides whether
//! it belongs to a contract-standard category, returning the attribute
//! bits to record. Probers run against a [`ProbeVm`] capability: static
//! calls over a state snapshot plus bytecode fetch. Per-contract failures
//! (reverts, malformed return data) simply mean "no match"; only internal
//! VM errors propagate.

use crate::StageError;
use alloy_primitives::Address;
use explorer_kv::tables::{
    ADDR_ATTR_ERC1155, ADDR_ATTR_ERC1167, ADDR_ATTR_ERC165, ADDR_ATTR_ERC20, ADDR_ATTR_ERC4626,
    ADDR_ATTR_ERC721, ADDR_ATTR_ERC721_MD,
};
use roaring::RoaringTreemap;

/// `name()`
pub(crate) const SEL_NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
/// `symbol()`
pub(crate) const SEL_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
/// `decimals()`
pub(crate) const SEL_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `supportsInterface(bytes4)`
pub(crate) const SEL_SUPPORTS_INTERFACE: [u8; 4] = [0x01, 0xff, 0xc9, 0xa7];
/// `asset()`
pub(crate) const SEL_ASSET: [u8; 4] = [0x38, 0xd5, 0x2e, 0x0f];
/// `totalAssets()`
pub(crate) const SEL_TOTAL_ASSETS: [u8; 4] = [0x01, 0xe1, 0xd1, 0x14];
/// `junkjunkjunk()`, a function no honest contract implements; used to
/// catch contracts that answer the same bytes to any selector.
pub(crate) const SEL_JUNK: [u8; 4] = [0x12, 0x00, 0xe2, 0x6a];

/// ERC165 interface id of ERC165 itself.
pub(crate) const IID_ERC165: [u8; 4] = [0x01, 0xff, 0xc9, 0xa7];
/// The id ERC165 requires `supportsInterface` to reject.
pub(crate) const IID_INVALID: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
/// ERC721 interface id.
pub(crate) const IID_ERC721: [u8; 4] = [0x80, 0xac, 0x58, 0xcd];
/// ERC721 metadata-extension interface id.
pub(crate) const IID_ERC721_METADATA: [u8; 4] = [0x5b, 0x5e, 0x13, 0x9f];
/// ERC1155 interface id.
pub(crate) const IID_ERC1155: [u8; 4] = [0xd9, 0xb6, 0x7a, 0x26];

/// ERC1167 minimal proxy runtime code, around the embedded implementation
/// address.
pub(crate) const ERC1167_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
pub(crate) const ERC1167_SUFFIX: [u8; 15] =
    [0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3];

/// Result of one static call against an untrusted contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// True when the call reverted or ran out of gas.
    pub reverted: bool,
    /// Return (or revert) data.
    pub output: Vec<u8>,
}

impl CallOutcome {
    /// A successful call returning `output`.
    pub fn success(output: Vec<u8>) -> Self {
        Self { reverted: false, output }
    }

    /// A reverted call.
    pub const fn revert() -> Self {
        Self { reverted: true, output: Vec::new() }
    }
}

/// The slice of EVM capability probers need: static calls and bytecode
/// reads over a fixed state snapshot. Hosts implement this against their
/// execution engine.
pub trait ProbeVm {
    /// Executes a static call of `input` against `addr`.
    ///
    /// Reverts are reported through [`CallOutcome::reverted`]; an `Err` is
    /// an internal machine failure and aborts the stage.
    fn static_call(&mut self, addr: Address, input: &[u8]) -> Result<CallOutcome, StageError>;

    /// Deployed bytecode of `addr`; empty for non-contracts.
    fn code(&mut self, addr: Address) -> Result<Vec<u8>, StageError>;
}

/// Creates one [`ProbeVm`] per consumer; concurrent executors call it once
/// per worker thread.
pub trait VmFactory: Send + Sync {
    /// Creates a VM over the current state snapshot.
    fn probe_vm(&self) -> Result<Box<dyn ProbeVm + Send + '_>, StageError>;
}

/// Classifies one address. Implementations are stateless or cache-only and
/// are shared across a stage run.
pub trait Prober: Send + Sync {
    /// Probes `addr` at `block_num`. `source_k`/`source_v` are the raw
    /// source-table entry that scheduled this probe; most probers ignore
    /// them. `None` means the address does not match.
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        block_num: u64,
        addr: Address,
        source_k: &[u8],
        source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError>;
}

/// Creates a prober instance; concurrent executors call it per worker.
pub type ProberFactory = fn() -> Box<dyn Prober>;

fn attr_bitmap(bits: &[u64]) -> RoaringTreemap {
    let mut bm = RoaringTreemap::new();
    for b in bits {
        bm.insert(*b);
    }
    bm
}

/// Decodes a strictly ABI-encoded `bool` word. `None` for malformed data
/// (which means "no match", not an error).
fn decode_bool(output: &[u8]) -> Option<bool> {
    if output.len() < 32 || output[..31].iter().any(|b| *b != 0) || output[31] > 1 {
        return None;
    }
    Some(output[31] == 1)
}

/// `supportsInterface(id)` under strict ERC165 decoding.
fn supports_interface(
    vm: &mut dyn ProbeVm,
    addr: Address,
    interface_id: [u8; 4],
) -> Result<Option<bool>, StageError> {
    let mut input = [0u8; 36];
    input[..4].copy_from_slice(&SEL_SUPPORTS_INTERFACE);
    input[4..8].copy_from_slice(&interface_id);
    let ret = vm.static_call(addr, &input)?;
    if ret.reverted {
        return Ok(None);
    }
    Ok(decode_bool(&ret.output))
}

/// Detects ERC20 tokens: `decimals()`, `name()` and `symbol()` must all
/// answer, and the answers must diverge from a junk selector's (contracts
/// that return the same raw value no matter what you call are rejected).
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc20Prober;

/// Creates an [`Erc20Prober`].
pub fn new_erc20_prober() -> Box<dyn Prober> {
    Box::new(Erc20Prober)
}

impl Prober for Erc20Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        let decimals = vm.static_call(addr, &SEL_DECIMALS)?;
        if decimals.reverted || decode_u8_word(&decimals.output).is_none() {
            return Ok(None);
        }
        let name = vm.static_call(addr, &SEL_NAME)?;
        if name.reverted || name.output.len() < 64 {
            return Ok(None);
        }
        let symbol = vm.static_call(addr, &SEL_SYMBOL)?;
        if symbol.reverted || symbol.output.len() < 64 {
            return Ok(None);
        }

        // Faulty catch-all contracts answer the same junk to a random
        // signature as to name/symbol/decimals, which makes no sense.
        let junk = vm.static_call(addr, &SEL_JUNK)?;
        if !junk.reverted
            && junk.output == name.output
            && junk.output == symbol.output
            && junk.output == decimals.output
        {
            return Ok(None);
        }

        Ok(Some(attr_bitmap(&[ADDR_ATTR_ERC20])))
    }
}

/// Decodes a `uint8` word (`decimals()`).
fn decode_u8_word(output: &[u8]) -> Option<u8> {
    if output.len() < 32 || output[..31].iter().any(|b| *b != 0) {
        return None;
    }
    Some(output[31])
}

/// Detects ERC165 per the two-call protocol of the specification:
/// `supportsInterface(0x01ffc9a7)` must be true and
/// `supportsInterface(0xffffffff)` must be false.
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc165Prober;

/// Creates an [`Erc165Prober`].
pub fn new_erc165_prober() -> Box<dyn Prober> {
    Box::new(Erc165Prober)
}

impl Prober for Erc165Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        if supports_interface(vm, addr, IID_ERC165)? != Some(true) {
            return Ok(None);
        }
        if supports_interface(vm, addr, IID_INVALID)? != Some(false) {
            return Ok(None);
        }
        Ok(Some(attr_bitmap(&[ADDR_ATTR_ERC165])))
    }
}

/// Detects ERC721 tokens through ERC165; the metadata extension gets its
/// own attribute bit on top of the base one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc721Prober;

/// Creates an [`Erc721Prober`].
pub fn new_erc721_prober() -> Box<dyn Prober> {
    Box::new(Erc721Prober)
}

impl Prober for Erc721Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        if supports_interface(vm, addr, IID_ERC721)? != Some(true) {
            return Ok(None);
        }
        let mut bits = attr_bitmap(&[ADDR_ATTR_ERC721]);
        if supports_interface(vm, addr, IID_ERC721_METADATA)? == Some(true) {
            bits.insert(ADDR_ATTR_ERC721_MD);
        }
        Ok(Some(bits))
    }
}

/// Detects ERC1155 tokens through ERC165.
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc1155Prober;

/// Creates an [`Erc1155Prober`].
pub fn new_erc1155_prober() -> Box<dyn Prober> {
    Box::new(Erc1155Prober)
}

impl Prober for Erc1155Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        if supports_interface(vm, addr, IID_ERC1155)? != Some(true) {
            return Ok(None);
        }
        Ok(Some(attr_bitmap(&[ADDR_ATTR_ERC1155])))
    }
}

/// Detects ERC1167 minimal proxies by their fixed 45-byte runtime code.
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc1167Prober;

/// Creates an [`Erc1167Prober`].
pub fn new_erc1167_prober() -> Box<dyn Prober> {
    Box::new(Erc1167Prober)
}

/// The implementation address a minimal proxy delegates to, if `code` is
/// the canonical ERC1167 runtime.
pub fn erc1167_implementation(code: &[u8]) -> Option<Address> {
    if code.len() != ERC1167_PREFIX.len() + 20 + ERC1167_SUFFIX.len() {
        return None;
    }
    if !code.starts_with(&ERC1167_PREFIX) || !code.ends_with(&ERC1167_SUFFIX) {
        return None;
    }
    Some(Address::from_slice(&code[ERC1167_PREFIX.len()..ERC1167_PREFIX.len() + 20]))
}

impl Prober for Erc1167Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        let code = vm.code(addr)?;
        if erc1167_implementation(&code).is_none() {
            return Ok(None);
        }
        Ok(Some(attr_bitmap(&[ADDR_ATTR_ERC1167])))
    }
}

/// Detects ERC4626 vaults among ERC20 matches: `asset()` must return an
/// address and `totalAssets()` a word.
#[derive(Debug, Default, Clone, Copy)]
pub struct Erc4626Prober;

/// Creates an [`Erc4626Prober`].
pub fn new_erc4626_prober() -> Box<dyn Prober> {
    Box::new(Erc4626Prober)
}

impl Prober for Erc4626Prober {
    fn probe(
        &self,
        vm: &mut dyn ProbeVm,
        _block_num: u64,
        addr: Address,
        _source_k: &[u8],
        _source_v: &[u8],
    ) -> Result<Option<RoaringTreemap>, StageError> {
        let asset = vm.static_call(addr, &SEL_ASSET)?;
        if asset.reverted || !is_address_word(&asset.output) {
            return Ok(None);
        }
        let total = vm.static_call(addr, &SEL_TOTAL_ASSETS)?;
        if total.reverted || total.output.len() < 32 {
            return Ok(None);
        }
        Ok(Some(attr_bitmap(&[ADDR_ATTR_ERC4626])))
    }
}

/// A 32-byte word holding a left-padded 20-byte address.
fn is_address_word(output: &[u8]) -> bool {
    output.len() >= 32 && output[..12].iter().all(|b| *b == 0)
}
