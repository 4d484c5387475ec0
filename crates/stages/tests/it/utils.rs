use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::Address;
use explorer_index::{CancelToken, IndexParams};
use explorer_kv::{mem::MemDb, tables, KvDb, KvRwTx as _};
use explorer_stages::{
    catalog::standard_stages,
    stage::{save_stage_progress, StageId},
    test_utils::{transfer_log, MockChain, MockVm, MockVmFactory},
    transfers::TRANSFER_TOPIC,
    Stage, StageRunner,
};

pub(crate) fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

/// Well-known actors of the test fixture.
pub(crate) struct Fixture {
    pub db: MemDb,
    pub chain: MockChain,
    pub vms: MockVmFactory,
    pub stages: Vec<Stage>,
    pub token20: Address,
    pub token721: Address,
    pub token1155: Address,
    pub proxy: Address,
    pub vault: Address,
    pub alice: Address,
    pub bob: Address,
}

/// Builds a 10-block chain:
///
/// - deployments: ERC20 @1, ERC721 @2, ERC1155 @3, proxy @4, vault @5
/// - transfers: ERC20 alice->bob @6 (tx 106), ERC721 bob->alice @7 (tx 107),
///   ERC20 bob->alice @8 (tx 108)
/// - withdrawals @9 (indices 0..=2) and @10 (indices 3..=4)
/// - distinct coinbases per block (block parity selects one of two).
pub(crate) fn fixture() -> Fixture {
    let token20 = addr(0x20);
    let token721 = addr(0x21);
    let token1155 = addr(0x55);
    let proxy = addr(0x67);
    let vault = addr(0x46);
    let alice = addr(0xa1);
    let bob = addr(0xb0);

    let mut chain = MockChain::new();
    // First sync starts at genesis.
    chain.add_block(0, Address::ZERO);
    for block in 1..=10u64 {
        chain.add_block(block, if block % 2 == 0 { addr(0xc2) } else { addr(0xc1) });
    }
    chain.add_tx_logs(6, 106, vec![transfer_log(token20, TRANSFER_TOPIC, alice, bob, false)]);
    chain.add_tx_logs(7, 107, vec![transfer_log(token721, TRANSFER_TOPIC, bob, alice, true)]);
    chain.add_tx_logs(8, 108, vec![transfer_log(token20, TRANSFER_TOPIC, bob, alice, false)]);
    chain.add_withdrawals(
        9,
        (0..=2u64).map(|i| withdrawal(i, if i == 2 { bob } else { alice })).collect(),
    );
    chain.add_withdrawals(10, (3..=4u64).map(|i| withdrawal(i, bob)).collect());

    let mut vm = MockVm::new();
    vm.deploy_erc20(token20);
    vm.deploy_erc165(token721, &[[0x80, 0xac, 0x58, 0xcd], [0x5b, 0x5e, 0x13, 0x9f]]);
    vm.deploy_erc165(token1155, &[[0xd9, 0xb6, 0x7a, 0x26]]);
    vm.deploy_erc1167(proxy, addr(0xee));
    vm.deploy_erc4626(vault, token20);

    let db = MemDb::new();
    let tx = db.begin_rw().unwrap();
    for (block, contract) in
        [(1u64, token20), (2, token721), (3, token1155), (4, proxy), (5, vault)]
    {
        tx.put(tables::DEPLOYMENTS, &block.to_be_bytes(), contract.as_slice()).unwrap();
    }
    save_stage_progress(&*tx, StageId::BODIES, chain.tip()).unwrap();
    tx.commit().unwrap();

    Fixture {
        db,
        chain,
        vms: MockVmFactory(vm),
        stages: standard_stages(IndexParams::default()),
        token20,
        token721,
        token1155,
        proxy,
        vault,
        alice,
        bob,
    }
}

pub(crate) fn withdrawal(index: u64, address: Address) -> Withdrawal {
    Withdrawal { index, validator_index: index, address, amount: 32 }
}

impl Fixture {
    /// Runs every stage forward.
    pub(crate) fn run_forward(&self) {
        let cancel = CancelToken::new();
        let runner =
            StageRunner { db: &self.db, chain: &self.chain, vms: &self.vms, cancel: &cancel };
        for stage in &self.stages {
            runner.run(stage).unwrap();
        }
    }

    /// Unwinds every stage to `unwind_point`, in reverse catalog order.
    pub(crate) fn unwind_to(&self, unwind_point: u64) {
        let cancel = CancelToken::new();
        let runner =
            StageRunner { db: &self.db, chain: &self.chain, vms: &self.vms, cancel: &cancel };
        for stage in self.stages.iter().rev() {
            runner.unwind(stage, unwind_point).unwrap();
        }
    }
}
