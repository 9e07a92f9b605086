// Block-chain engine: connecting blocks, retargets, reorganization

use crate::consensus::pow::{decode_compact, encode_compact, U256};
use crate::core::Block;
use crate::error::{ChainError, StoreError, VerificationError};
use crate::params::NetworkParams;
use crate::storage::{BlockStore, StoredBlock};
use crate::wallet::{ChainKind, Wallet};
use std::sync::{Arc, Mutex};

/// Tracks the proof-of-work chain over a header store and feeds the
/// wallet every transaction that concerns it.
///
/// The store holds headers only; transaction bodies flow through to
/// the wallet at connect time and are never persisted here.
pub struct BlockChain {
    params: NetworkParams,
    store: Box<dyn BlockStore>,
    wallet: Arc<Mutex<Wallet>>,
    chain_head: StoredBlock,
    /// Blocks whose parent we have not seen yet. Held in memory only;
    /// they connect when the parent arrives or vanish on shutdown.
    unconnected: Vec<Block>,
}

impl BlockChain {
    pub fn new(
        params: NetworkParams,
        wallet: Arc<Mutex<Wallet>>,
        store: Box<dyn BlockStore>,
    ) -> Result<Self, StoreError> {
        let chain_head = store.chain_head()?;
        log::info!(
            "chain head is at height {}: {}",
            chain_head.height,
            chain_head.hash()
        );
        Ok(Self {
            params,
            store,
            wallet,
            chain_head,
            unconnected: Vec::new(),
        })
    }

    pub fn chain_head(&self) -> &StoredBlock {
        &self.chain_head
    }

    pub fn best_chain_height(&self) -> u32 {
        self.chain_head.height
    }

    pub fn genesis_hash(&self) -> crate::core::Hash256 {
        self.params.genesis.hash()
    }

    /// Connect a block. Returns `true` if it extended a chain (best or
    /// side), `false` if its parent is unknown. Verification failures
    /// reject the block and leave chain and store untouched.
    pub fn add(&mut self, block: Block) -> Result<bool, ChainError> {
        let block_hash = block.hash();
        if block_hash == self.chain_head.hash() || self.store.get(&block_hash)?.is_some() {
            // Duplicate.
            return Ok(true);
        }

        block.verify(&self.params)?;

        let Some(prev) = self.store.get(&block.header.prev_block_hash)? else {
            log::warn!(
                "block {} does not connect: parent {} unknown",
                block_hash,
                block.header.prev_block_hash
            );
            self.unconnected.push(block);
            return Ok(false);
        };

        self.check_difficulty_transition(&prev, &block)?;

        let new_stored = prev.build_next(block.header.clone());
        self.store.put(&new_stored)?;
        self.connect(new_stored, &block)?;

        self.try_connecting_unconnected()?;
        Ok(true)
    }

    fn connect(&mut self, new_stored: StoredBlock, block: &Block) -> Result<(), ChainError> {
        let block_hash = new_stored.hash();

        if new_stored.header.prev_block_hash == self.chain_head.hash() {
            // The normal case: extends the best chain.
            self.set_chain_head(new_stored)?;
            log::debug!("chain is now {} blocks high", self.chain_head.height);
            self.notify_wallet(block, block_hash, ChainKind::BestChain);
        } else if new_stored.chain_work > self.chain_head.chain_work {
            // A side chain overtook us. The wallet learns the block's
            // transactions before the replay walks over it.
            log::info!("block {} is causing a re-organize", block_hash);
            self.notify_wallet(block, block_hash, ChainKind::SideChain);
            self.reorganize(new_stored)?;
        } else {
            log::info!(
                "block {} forks the chain at height {} but is not preferred",
                block_hash,
                new_stored.height
            );
            self.notify_wallet(block, block_hash, ChainKind::SideChain);
        }
        Ok(())
    }

    fn notify_wallet(&self, block: &Block, block_hash: crate::core::Hash256, kind: ChainKind) {
        let mut wallet = self.wallet.lock().expect("wallet lock poisoned");
        for tx in &block.transactions {
            if wallet.is_relevant(tx) {
                wallet.receive(tx, Some(block_hash), kind);
            }
        }
    }

    /// The current best chain has been beaten by a side chain with
    /// more cumulative work. Walk both back to the common ancestor,
    /// unwind the old branch through the wallet, replay the new one,
    /// and only then move the head pointer.
    fn reorganize(&mut self, new_head: StoredBlock) -> Result<(), ChainError> {
        let mut old_cursor = self.chain_head.clone();
        let mut new_cursor = new_head.clone();
        let mut old_branch = Vec::new(); // tip -> fork order
        let mut new_branch = Vec::new();

        while old_cursor.height > new_cursor.height {
            old_branch.push(old_cursor.clone());
            old_cursor = self.get_prev(&old_cursor)?;
        }
        while new_cursor.height > old_cursor.height {
            new_branch.push(new_cursor.clone());
            new_cursor = self.get_prev(&new_cursor)?;
        }
        while old_cursor.hash() != new_cursor.hash() {
            old_branch.push(old_cursor.clone());
            old_cursor = self.get_prev(&old_cursor)?;
            new_branch.push(new_cursor.clone());
            new_cursor = self.get_prev(&new_cursor)?;
        }
        let fork = old_cursor;
        log::info!(
            "re-organize after split at height {}: {} blocks out, {} blocks in",
            fork.height,
            old_branch.len(),
            new_branch.len()
        );

        {
            let mut wallet = self.wallet.lock().expect("wallet lock poisoned");
            for stored in &old_branch {
                wallet.disconnect_block(stored.hash());
            }
            for stored in new_branch.iter().rev() {
                wallet.connect_block(stored.hash());
            }
        }

        self.set_chain_head(new_head)?;
        Ok(())
    }

    fn get_prev(&self, block: &StoredBlock) -> Result<StoredBlock, StoreError> {
        self.store
            .get(&block.header.prev_block_hash)?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "parent {} of {} missing from store",
                    block.header.prev_block_hash,
                    block.hash()
                ))
            })
    }

    fn set_chain_head(&mut self, new_head: StoredBlock) -> Result<(), StoreError> {
        self.store.set_chain_head(&new_head)?;
        self.chain_head = new_head;
        Ok(())
    }

    /// Retry blocks that arrived before their parent.
    fn try_connecting_unconnected(&mut self) -> Result<(), ChainError> {
        loop {
            let Some(pos) = self.unconnected.iter().position(|b| {
                matches!(self.store.get(&b.header.prev_block_hash), Ok(Some(_)))
            }) else {
                return Ok(());
            };
            let block = self.unconnected.swap_remove(pos);
            log::info!("connecting previously unconnected block {}", block.hash());
            self.add(block)?;
        }
    }

    /// At a retarget boundary the difficulty must follow from the
    /// elapsed time of the closing window; everywhere else it must be
    /// inherited unchanged.
    fn check_difficulty_transition(
        &self,
        prev: &StoredBlock,
        block: &Block,
    ) -> Result<(), ChainError> {
        let next_height = prev.height + 1;
        if next_height % self.params.interval != 0 {
            if block.header.bits != prev.header.bits {
                return Err(VerificationError::new(format!(
                    "Unexpected change in difficulty at height {}: {:08x} vs {:08x}",
                    next_height, block.header.bits, prev.header.bits
                ))
                .into());
            }
            return Ok(());
        }

        // Walk back to the first block of the closing window.
        let mut cursor = prev.clone();
        for _ in 0..self.params.interval - 1 {
            cursor = self.get_prev(&cursor)?;
        }
        let start_time = cursor.header.timestamp;

        let timespan = self.params.target_timespan as i64;
        let elapsed =
            (block.header.timestamp as i64 - start_time as i64).clamp(timespan / 4, timespan * 4);

        let old_target = decode_compact(prev.header.bits);
        let limit = decode_compact(self.params.proof_of_work_limit);

        // Scale exactly: t*e/ts == (t/ts)*e + (t%ts)*e/ts, without
        // leaving 256 bits; anything that would overflow is beyond the
        // limit anyway.
        let ts = U256::from(timespan as u64);
        let e = U256::from(elapsed as u64);
        let (scaled, overflow) = (old_target / ts).overflowing_mul(e);
        let mut new_target = if overflow {
            limit
        } else {
            scaled
                .checked_add((old_target % ts) * e / ts)
                .unwrap_or(limit)
        };
        if new_target > limit {
            new_target = limit;
        }

        let expected = encode_compact(new_target, false);
        if block.header.bits != expected {
            return Err(VerificationError::new(format!(
                "Unexpected change in difficulty at height {}: {:08x} vs expected {:08x}",
                next_height, block.header.bits, expected
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BLOCK_SUBSIDY;
    use crate::storage::MemoryBlockStore;
    use crate::wallet::{Address, BalanceType, EcKey};

    struct Fixture {
        params: NetworkParams,
        chain: BlockChain,
        wallet: Arc<Mutex<Wallet>>,
        address: Address,
        other: Address,
        genesis: Block,
    }

    fn fixture() -> Fixture {
        let params = NetworkParams::unit_tests();
        let mut wallet = Wallet::new(params.clone());
        let key = EcKey::new();
        let address = key.to_address(&params);
        wallet.add_key(key);
        let wallet = Arc::new(Mutex::new(wallet));

        let store = Box::new(MemoryBlockStore::new(&params));
        let chain = BlockChain::new(params.clone(), wallet.clone(), store).unwrap();
        let genesis = params.genesis.clone();
        let other = EcKey::new().to_address(&params);

        Fixture {
            params,
            chain,
            wallet,
            address,
            other,
            genesis,
        }
    }

    fn time_at(genesis: &Block, offset: u32) -> u32 {
        genesis.header.timestamp + offset
    }

    #[test]
    fn test_add_extends_best_chain_and_pays_wallet() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 10));

        assert!(f.chain.add(b1.clone()).unwrap());
        assert_eq!(f.chain.best_chain_height(), 1);
        assert_eq!(f.chain.chain_head().hash(), b1.hash());

        let wallet = f.wallet.lock().unwrap();
        assert_eq!(wallet.balance(BalanceType::Available), BLOCK_SUBSIDY as i64);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 10));

        assert!(f.chain.add(b1.clone()).unwrap());
        assert!(f.chain.add(b1.clone()).unwrap());

        assert_eq!(f.chain.best_chain_height(), 1);
        let wallet = f.wallet.lock().unwrap();
        assert_eq!(wallet.balance(BalanceType::Available), BLOCK_SUBSIDY as i64);
    }

    #[test]
    fn test_unconnected_blocks_connect_when_parent_arrives() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.other, time_at(&f.genesis, 10));
        let b2 = b1.create_next_block(&f.other, time_at(&f.genesis, 20));
        let b3 = b2.create_next_block(&f.other, time_at(&f.genesis, 30));

        assert!(f.chain.add(b1.clone()).unwrap());
        // b3 before b2: does not connect, head stays at b1.
        assert!(!f.chain.add(b3.clone()).unwrap());
        assert_eq!(f.chain.chain_head().hash(), b1.hash());

        // b2 arrives and pulls b3 in behind it.
        assert!(f.chain.add(b2.clone()).unwrap());
        assert_eq!(f.chain.chain_head().hash(), b3.hash());
        assert_eq!(f.chain.best_chain_height(), 3);
    }

    #[test]
    fn test_side_chain_does_not_touch_balance() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 10));
        assert!(f.chain.add(b1.clone()).unwrap());

        // Same height fork, also paying us: equal work, stays a side
        // chain, and the balance must not move.
        let b2 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 20));
        assert!(f.chain.add(b2).unwrap());

        assert_eq!(f.chain.chain_head().hash(), b1.hash());
        let wallet = f.wallet.lock().unwrap();
        assert_eq!(wallet.balance(BalanceType::Available), BLOCK_SUBSIDY as i64);
    }

    #[test]
    fn test_reorganize_moves_coins_back_to_pending() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 10));
        assert!(f.chain.add(b1.clone()).unwrap());
        assert_eq!(
            f.wallet.lock().unwrap().balance(BalanceType::Available),
            BLOCK_SUBSIDY as i64
        );

        // A heavier side chain paying someone else takes over.
        let s1 = f.genesis.create_next_block(&f.other, time_at(&f.genesis, 20));
        let s2 = s1.create_next_block(&f.other, time_at(&f.genesis, 30));
        assert!(f.chain.add(s1.clone()).unwrap());
        assert_eq!(f.chain.chain_head().hash(), b1.hash());
        assert!(f.chain.add(s2.clone()).unwrap());

        assert_eq!(f.chain.chain_head().hash(), s2.hash());
        assert_eq!(f.chain.best_chain_height(), 2);

        let wallet = f.wallet.lock().unwrap();
        assert_eq!(wallet.balance(BalanceType::Available), 0);
        // The disconnected coinbase is pending again.
        assert!(wallet.is_pending(&b1.transactions[0].txid()));
    }

    #[test]
    fn test_reorganize_requires_more_work() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.address, time_at(&f.genesis, 10));
        let b2 = b1.create_next_block(&f.address, time_at(&f.genesis, 20));
        assert!(f.chain.add(b1.clone()).unwrap());
        assert!(f.chain.add(b2.clone()).unwrap());
        let head_work = f.chain.chain_head().chain_work;

        // A one-block fork has strictly less work; nothing changes.
        let s1 = f.genesis.create_next_block(&f.other, time_at(&f.genesis, 30));
        assert!(f.chain.add(s1).unwrap());
        assert_eq!(f.chain.chain_head().hash(), b2.hash());
        assert_eq!(f.chain.chain_head().chain_work, head_work);
    }

    #[test]
    fn test_difficulty_transition() {
        let mut f = fixture();
        // Mine interval-1 blocks, two seconds apart.
        let mut prev = f.genesis.clone();
        for i in 1..f.params.interval {
            let block = prev.create_next_block(&f.other, time_at(&f.genesis, 2 * i));
            assert!(f.chain.add(block.clone()).unwrap());
            prev = block;
        }

        // The retarget block with unchanged difficulty must be
        // rejected.
        let bad = prev.create_next_block(&f.other, time_at(&f.genesis, 2 * f.params.interval));
        let err = f.chain.add(bad).unwrap_err();
        match err {
            ChainError::Verification(e) => {
                assert!(e.0.contains("Unexpected change in difficulty"), "{}", e.0)
            }
            other => panic!("expected verification error, got {:?}", other),
        }

        // With the retargeted difficulty it is accepted. Elapsed time
        // clamps to timespan/4, so the target divides by four.
        let mut good = prev.create_next_block(&f.other, time_at(&f.genesis, 2 * f.params.interval));
        good.header.bits = 0x201fffff;
        good.header.solve();
        assert!(f.chain.add(good.clone()).unwrap());
        assert_eq!(f.chain.chain_head().hash(), good.hash());
    }

    #[test]
    fn test_difficulty_cannot_change_off_boundary() {
        let mut f = fixture();
        let mut b1 = f.genesis.create_next_block(&f.other, time_at(&f.genesis, 10));
        b1.header.bits = 0x201fffff;
        b1.header.solve();

        let err = f.chain.add(b1).unwrap_err();
        match err {
            ChainError::Verification(e) => {
                assert!(e.0.contains("Unexpected change in difficulty"), "{}", e.0)
            }
            other => panic!("expected verification error, got {:?}", other),
        }
        assert_eq!(f.chain.best_chain_height(), 0);
    }

    #[test]
    fn test_bad_difficulty_target_is_rejected() {
        // A target past the network limit fails verification outright.
        let params = NetworkParams::testnet();
        let wallet = Arc::new(Mutex::new(Wallet::new(params.clone())));
        let store = Box::new(MemoryBlockStore::new(&params));
        let mut chain = BlockChain::new(params.clone(), wallet, store).unwrap();

        // Built by hand: create_next_block would grind a real-difficulty
        // nonce. The easiest possible target solves instantly but lies
        // beyond the testnet limit.
        let other = EcKey::new().to_address(&params);
        let coinbase = crate::core::Transaction::coinbase(
            vec![0x01, 0x02],
            crate::core::TxOutput::new(BLOCK_SUBSIDY, other.script_pubkey()),
        );
        let merkle_root = Block::calculate_merkle_root(std::slice::from_ref(&coinbase));
        let mut header = crate::core::BlockHeader::new(
            1,
            params.genesis.hash(),
            merkle_root,
            params.genesis.header.timestamp + 600,
            0x207fffff,
            0,
        );
        header.solve();
        let block = Block::new(header, vec![coinbase]);

        let err = chain.add(block).unwrap_err();
        match err {
            ChainError::Verification(e) => {
                assert!(e.0.contains("Difficulty target is bad"), "{}", e.0)
            }
            other => panic!("expected verification error, got {:?}", other),
        }
        assert_eq!(chain.best_chain_height(), 0);
    }

    #[test]
    fn test_accepted_blocks_satisfy_pow_invariant() {
        let mut f = fixture();
        let limit = decode_compact(f.params.proof_of_work_limit);

        let mut prev = f.genesis.clone();
        for i in 1..4u32 {
            let block = prev.create_next_block(&f.other, time_at(&f.genesis, 10 * i));
            assert!(f.chain.add(block.clone()).unwrap());

            let target = decode_compact(block.header.bits);
            assert!(crate::consensus::pow::hash_to_u256(&block.hash()) <= target);
            assert!(target <= limit);
            prev = block;
        }
    }

    #[test]
    fn test_chain_work_grows_with_each_block() {
        let mut f = fixture();
        let b1 = f.genesis.create_next_block(&f.other, time_at(&f.genesis, 10));
        let genesis_work = f.chain.chain_head().chain_work;
        assert!(f.chain.add(b1).unwrap());
        assert!(f.chain.chain_head().chain_work > genesis_work);
    }
}
