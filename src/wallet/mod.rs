// Wallet: keys, transaction pools, balances, spending

mod keystore;

pub use keystore::{Address, EcKey};

use crate::core::script::SIGHASH_ALL;
use crate::core::{
    to_friendly_string, Amount, Hash256, OutPoint, Script, Serializable, Transaction, TxInput,
    TxOutput,
};
use crate::error::WalletError;
use crate::params::NetworkParams;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// How a block relates to the chain when the wallet hears about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    BestChain,
    SideChain,
}

/// Which balance to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceType {
    /// Confirmed outputs not spent by any known transaction, confirmed
    /// or pending. This is what can be spent right now.
    Available,
    /// Available plus pending receipts, minus pending spends of our
    /// confirmed outputs. What the balance will be once everything in
    /// flight confirms.
    Estimated,
}

/// Observer for wallet events. Listeners run on the thread that
/// produced the event and must not call back into the wallet.
pub trait WalletListener: Send + Sync {
    fn coins_received(
        &self,
        _wallet: &Wallet,
        _tx: &Transaction,
        _prev_balance: Amount,
        _new_balance: Amount,
    ) {
    }

    fn dead_transaction(&self, _wallet: &Wallet, _dead: &Transaction, _replacement: &Transaction) {}
}

enum Event {
    CoinsReceived {
        tx: Transaction,
        prev_balance: Amount,
        new_balance: Amount,
    },
    Dead {
        dead: Transaction,
        replacement: Transaction,
    },
}

/// A transaction tracked by the wallet, with its confirmation state.
#[derive(Debug, Clone)]
struct WalletTx {
    txid: Hash256,
    tx: Transaction,
    /// Best-chain block this transaction appeared in, if confirmed.
    appeared_in: Option<Hash256>,
    /// Confirmed spends of this transaction's outputs: index -> spender.
    spent_by: HashMap<u32, Hash256>,
    /// The double-spend that sent this transaction to the dead pool.
    killed_by: Option<Hash256>,
}

impl WalletTx {
    fn new(tx: Transaction) -> Self {
        Self {
            txid: tx.txid(),
            tx,
            appeared_in: None,
            spent_by: HashMap::new(),
            killed_by: None,
        }
    }
}

/// A txid -> transaction map preserving insertion order. Coin
/// selection depends on the order, so a plain HashMap will not do.
#[derive(Debug, Clone, Default)]
struct Pool {
    order: Vec<Hash256>,
    map: HashMap<Hash256, WalletTx>,
}

impl Pool {
    fn insert(&mut self, entry: WalletTx) {
        let txid = entry.txid;
        if self.map.insert(txid, entry).is_none() {
            self.order.push(txid);
        }
    }

    fn remove(&mut self, txid: &Hash256) -> Option<WalletTx> {
        let entry = self.map.remove(txid)?;
        self.order.retain(|h| h != txid);
        Some(entry)
    }

    fn get(&self, txid: &Hash256) -> Option<&WalletTx> {
        self.map.get(txid)
    }

    fn get_mut(&mut self, txid: &Hash256) -> Option<&mut WalletTx> {
        self.map.get_mut(txid)
    }

    fn contains(&self, txid: &Hash256) -> bool {
        self.map.contains_key(txid)
    }

    fn iter(&self) -> impl Iterator<Item = &WalletTx> {
        self.order.iter().filter_map(|h| self.map.get(h))
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

const WALLET_FILE_VERSION: u32 = 1;

/// Tracks keys and the lifecycle of every transaction that touches
/// them. Each relevant transaction lives in exactly one pool:
///
/// - `unspent`: confirmed, at least one of our outputs still spendable
/// - `spent`: confirmed, all our outputs consumed by later transactions
/// - `pending`: created or seen, not yet in the best chain
/// - `dead`: double-spent; a conflicting transaction confirmed first
///
/// An `inactive` side pool remembers transactions seen on side chains
/// so a reorganization can replay them.
pub struct Wallet {
    params: NetworkParams,
    pub keychain: Vec<EcKey>,
    unspent: Pool,
    spent: Pool,
    pending: Pool,
    dead: Pool,
    inactive: Pool,
    /// Relevant txids per block, for reorg disconnect/replay.
    block_txids: HashMap<Hash256, Vec<Hash256>>,
    listeners: Vec<Arc<dyn WalletListener>>,
}

impl Wallet {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            keychain: Vec::new(),
            unspent: Pool::default(),
            spent: Pool::default(),
            pending: Pool::default(),
            dead: Pool::default(),
            inactive: Pool::default(),
            block_txids: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn add_key(&mut self, key: EcKey) {
        self.keychain.push(key);
    }

    pub fn add_listener(&mut self, listener: Arc<dyn WalletListener>) {
        self.listeners.push(listener);
    }

    fn key_hashes(&self) -> Vec<[u8; 20]> {
        self.keychain.iter().map(|k| k.pubkey_hash()).collect()
    }

    fn is_mine_script(&self, script_pubkey: &[u8]) -> bool {
        match Script::pubkey_hash_of(script_pubkey) {
            Some(hash) => self.keychain.iter().any(|k| k.pubkey_hash() == hash),
            None => false,
        }
    }

    /// Sum of this transaction's outputs that pay one of our keys.
    pub fn value_sent_to_me(&self, tx: &Transaction) -> Amount {
        tx.outputs
            .iter()
            .filter(|out| self.is_mine_script(&out.script_pubkey))
            .map(|out| out.value as Amount)
            .sum()
    }

    /// Sum of this transaction's inputs that resolve to outputs of
    /// ours, looked up across all pools.
    pub fn value_sent_from_me(&self, tx: &Transaction) -> Amount {
        let mut total = 0;
        for input in &tx.inputs {
            let op = input.outpoint;
            let entry = self
                .unspent
                .get(&op.txid)
                .or_else(|| self.spent.get(&op.txid))
                .or_else(|| self.pending.get(&op.txid));
            if let Some(entry) = entry {
                if let Some(out) = entry.tx.outputs.get(op.index as usize) {
                    if self.is_mine_script(&out.script_pubkey) {
                        total += out.value as Amount;
                    }
                }
            }
        }
        total
    }

    /// Does this transaction touch the wallet at all?
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        self.value_sent_to_me(tx) > 0 || self.value_sent_from_me(tx) > 0
    }

    /// Called by the chain for every relevant transaction in a
    /// connecting block, and for loose transactions (`block` None).
    pub fn receive(&mut self, tx: &Transaction, block: Option<Hash256>, kind: ChainKind) {
        match kind {
            ChainKind::SideChain => self.receive_side_chain(tx, block),
            ChainKind::BestChain => self.receive_best_chain(tx, block),
        }
    }

    fn receive_side_chain(&mut self, tx: &Transaction, block: Option<Hash256>) {
        if !self.is_relevant(tx) {
            return;
        }
        let txid = tx.txid();
        log::debug!("remembering side chain tx {}", txid);

        if let Some(hash) = block {
            let txids = self.block_txids.entry(hash).or_default();
            if !txids.contains(&txid) {
                txids.push(txid);
            }
        }

        // Keep the body for reorg replay unless already tracked.
        let known = self.pending.contains(&txid)
            || self.unspent.contains(&txid)
            || self.spent.contains(&txid)
            || self.dead.contains(&txid)
            || self.inactive.contains(&txid);
        if !known {
            self.inactive.insert(WalletTx::new(tx.clone()));
        }
    }

    fn receive_best_chain(&mut self, tx: &Transaction, block: Option<Hash256>) {
        let value_to_me = self.value_sent_to_me(tx);
        let value_from_me = self.value_sent_from_me(tx);
        if value_to_me == 0 && value_from_me == 0 {
            return;
        }
        let txid = tx.txid();

        let block_hash = match block {
            Some(hash) => hash,
            None => {
                // Loose transaction: park it until a block confirms it.
                if !self.pending.contains(&txid) {
                    log::info!("received pending tx {}", txid);
                    self.pending.insert(WalletTx::new(tx.clone()));
                }
                return;
            }
        };

        // Already processed for this block (reorg replay idempotency).
        if let Some(entry) = self.unspent.get(&txid).or_else(|| self.spent.get(&txid)) {
            if entry.appeared_in == Some(block_hash) {
                return;
            }
        }

        log::info!(
            "received tx {} in block {}: sent to me {}, sent from me {}",
            txid,
            block_hash,
            to_friendly_string(value_to_me),
            to_friendly_string(value_from_me)
        );

        let prev_balance = self.balance(BalanceType::Available);
        let key_hashes = self.key_hashes();
        let mine = |script: &[u8]| {
            Script::pubkey_hash_of(script).is_some_and(|h| key_hashes.contains(&h))
        };
        let mut events = Vec::new();

        // Normal confirmation path: our pending send, or a side-chain
        // tx now on the best chain.
        let mut entry = self
            .pending
            .remove(&txid)
            .or_else(|| self.inactive.remove(&txid))
            .or_else(|| self.dead.remove(&txid))
            .unwrap_or_else(|| WalletTx::new(tx.clone()));
        entry.appeared_in = Some(block_hash);
        entry.killed_by = None;

        // Mark the outputs this transaction consumes as spent.
        for input in &tx.inputs {
            let op = input.outpoint;
            let prev = self
                .unspent
                .get_mut(&op.txid)
                .or_else(|| self.spent.get_mut(&op.txid));
            if let Some(prev) = prev {
                if prev
                    .tx
                    .outputs
                    .get(op.index as usize)
                    .is_some_and(|out| mine(&out.script_pubkey))
                {
                    prev.spent_by.insert(op.index, txid);
                }
            }
        }
        self.sweep_fully_spent();

        // Double-spend detection: any other transaction claiming one of
        // the same outpoints loses and goes to the dead pool.
        let spent_points: HashSet<OutPoint> = tx.inputs.iter().map(|i| i.outpoint).collect();
        let mut conflicts = Vec::new();
        for pool in [&self.pending, &self.unspent, &self.spent] {
            for candidate in pool.iter() {
                if candidate.txid != txid
                    && candidate
                        .tx
                        .inputs
                        .iter()
                        .any(|i| spent_points.contains(&i.outpoint))
                {
                    conflicts.push(candidate.txid);
                }
            }
        }
        for conflict_id in conflicts {
            let mut conflict = self
                .pending
                .remove(&conflict_id)
                .or_else(|| self.unspent.remove(&conflict_id))
                .or_else(|| self.spent.remove(&conflict_id))
                .expect("conflict was found in a pool");
            log::warn!("saw double spend: {} killed by {}", conflict_id, txid);
            conflict.killed_by = Some(txid);
            conflict.appeared_in = None;
            let dead_tx = conflict.tx.clone();
            self.dead.insert(conflict);
            events.push(Event::Dead {
                dead: dead_tx,
                replacement: tx.clone(),
            });
        }

        // Place the transaction in its pool.
        if value_to_me > 0 {
            let all_mine_spent = tx
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, out)| self.is_mine_script(&out.script_pubkey))
                .all(|(i, _)| entry.spent_by.contains_key(&(i as u32)));
            if all_mine_spent && !entry.spent_by.is_empty() {
                self.spent.insert(entry);
            } else {
                self.unspent.insert(entry);
            }
        } else {
            // A send of ours with no change output.
            self.spent.insert(entry);
        }

        let txids = self.block_txids.entry(block_hash).or_default();
        if !txids.contains(&txid) {
            txids.push(txid);
        }

        if value_to_me > 0 {
            let new_balance = self.balance(BalanceType::Available);
            events.push(Event::CoinsReceived {
                tx: tx.clone(),
                prev_balance,
                new_balance,
            });
        }

        self.fire(events);
    }

    /// Move transactions whose paying outputs are all consumed from
    /// `unspent` to `spent`.
    fn sweep_fully_spent(&mut self) {
        let fully_spent: Vec<Hash256> = self
            .unspent
            .iter()
            .filter(|entry| {
                let mut any = false;
                let all = entry
                    .tx
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(_, out)| self.is_mine_script(&out.script_pubkey))
                    .all(|(i, _)| {
                        any = true;
                        entry.spent_by.contains_key(&(i as u32))
                    });
                any && all
            })
            .map(|entry| entry.txid)
            .collect();
        for txid in fully_spent {
            let entry = self.unspent.remove(&txid).expect("txid came from unspent");
            self.spent.insert(entry);
        }
    }

    /// Reorg primitive: undo a block's effects. Its transactions drop
    /// back to pending, the spend marks they made are cleared, and
    /// anything they killed revives.
    pub fn disconnect_block(&mut self, block_hash: Hash256) {
        let txids = self.block_txids.get(&block_hash).cloned().unwrap_or_default();
        // Undo in reverse so spenders are handled before spendees.
        for txid in txids.iter().rev() {
            let from_unspent = self.unspent.contains(txid);
            let entry = if from_unspent {
                self.unspent.remove(txid)
            } else {
                self.spent.remove(txid)
            };
            let Some(mut entry) = entry else { continue };
            if entry.appeared_in != Some(block_hash) {
                // Confirmed elsewhere since; leave it alone.
                if from_unspent {
                    self.unspent.insert(entry);
                } else {
                    self.spent.insert(entry);
                }
                continue;
            }
            log::info!("disconnecting tx {} from block {}", txid, block_hash);

            let tx = entry.tx.clone();
            self.clear_spend_marks(&tx, *txid);
            entry.appeared_in = None;
            self.pending.insert(entry);

            // Revive transactions this one had double-spent to death.
            let killed: Vec<Hash256> = self
                .dead
                .iter()
                .filter(|d| d.killed_by == Some(*txid))
                .map(|d| d.txid)
                .collect();
            for dead_id in killed {
                let mut dead = self.dead.remove(&dead_id).expect("txid came from dead");
                log::info!("reviving dead tx {}", dead_id);
                dead.killed_by = None;
                dead.appeared_in = None;
                self.pending.insert(dead);
            }
        }
    }

    /// Reorg primitive: replay a remembered block onto the best chain.
    pub fn connect_block(&mut self, block_hash: Hash256) {
        let txids = self.block_txids.get(&block_hash).cloned().unwrap_or_default();
        for txid in txids {
            let tx = self
                .inactive
                .get(&txid)
                .or_else(|| self.pending.get(&txid))
                .or_else(|| self.unspent.get(&txid))
                .or_else(|| self.spent.get(&txid))
                .or_else(|| self.dead.get(&txid))
                .map(|entry| entry.tx.clone());
            if let Some(tx) = tx {
                self.receive_best_chain(&tx, Some(block_hash));
            }
        }
    }

    fn clear_spend_marks(&mut self, tx: &Transaction, spender: Hash256) {
        for input in &tx.inputs {
            let op = input.outpoint;
            let prev = self
                .spent
                .get_mut(&op.txid)
                .or_else(|| self.unspent.get_mut(&op.txid));
            if let Some(prev) = prev {
                if prev.spent_by.get(&op.index) == Some(&spender) {
                    prev.spent_by.remove(&op.index);
                }
            }
        }
        // Anything in `spent` with a live paying output moves back.
        let revivable: Vec<Hash256> = self
            .spent
            .iter()
            .filter(|entry| {
                entry
                    .tx
                    .outputs
                    .iter()
                    .enumerate()
                    .any(|(i, out)| {
                        self.is_mine_script(&out.script_pubkey)
                            && !entry.spent_by.contains_key(&(i as u32))
                    })
            })
            .map(|entry| entry.txid)
            .collect();
        for txid in revivable {
            let entry = self.spent.remove(&txid).expect("txid came from spent");
            self.unspent.insert(entry);
        }
    }

    /// Compute a balance. See [`BalanceType`].
    pub fn balance(&self, balance_type: BalanceType) -> Amount {
        let pending_spends: HashSet<OutPoint> = self
            .pending
            .iter()
            .flat_map(|entry| entry.tx.inputs.iter().map(|i| i.outpoint))
            .collect();

        let mut confirmed = 0;
        let mut available = 0;
        for entry in self.unspent.iter() {
            for (i, out) in entry.tx.outputs.iter().enumerate() {
                if !self.is_mine_script(&out.script_pubkey) {
                    continue;
                }
                if entry.spent_by.contains_key(&(i as u32)) {
                    continue;
                }
                confirmed += out.value as Amount;
                if !pending_spends.contains(&OutPoint::new(entry.txid, i as u32)) {
                    available += out.value as Amount;
                }
            }
        }

        match balance_type {
            BalanceType::Available => available.max(0),
            BalanceType::Estimated => {
                let mut estimated = confirmed;
                for entry in self.pending.iter() {
                    estimated += self.value_sent_to_me(&entry.tx);
                }
                // Each confirmed output of ours is subtracted once, no
                // matter how many pending transactions claim it; the
                // outpoint set already collapses conflicting spends.
                for op in &pending_spends {
                    if let Some(prev) = self.unspent.get(&op.txid) {
                        if let Some(out) = prev.tx.outputs.get(op.index as usize) {
                            if self.is_mine_script(&out.script_pubkey)
                                && !prev.spent_by.contains_key(&op.index)
                            {
                                estimated -= out.value as Amount;
                            }
                        }
                    }
                }
                estimated.max(0)
            }
        }
    }

    /// Build and sign a transaction paying `value` to `to`, with change
    /// to `change_address` or the first keychain key.
    ///
    /// Stateless: the wallet is not touched until `confirm_send`, so
    /// two calls produce two conflicting spends of the same outputs.
    pub fn create_send(
        &self,
        to: &Address,
        value: Amount,
        change_address: Option<&Address>,
    ) -> Result<Transaction, WalletError> {
        // Coin selection: confirmed unspent outputs in insertion order.
        let mut selected: Vec<(OutPoint, Vec<u8>)> = Vec::new();
        let mut total: Amount = 0;
        'selection: for entry in self.unspent.iter() {
            for (i, out) in entry.tx.outputs.iter().enumerate() {
                if !self.is_mine_script(&out.script_pubkey)
                    || entry.spent_by.contains_key(&(i as u32))
                {
                    continue;
                }
                selected.push((
                    OutPoint::new(entry.txid, i as u32),
                    out.script_pubkey.clone(),
                ));
                total += out.value as Amount;
                if total >= value {
                    break 'selection;
                }
            }
        }
        if total < value {
            return Err(WalletError::InsufficientFunds {
                available: total,
                needed: value,
            });
        }

        let mut outputs = vec![TxOutput::new(value as u64, to.script_pubkey())];
        let change = total - value;
        if change > 0 {
            let change_script = match change_address {
                Some(addr) => addr.script_pubkey(),
                None => self
                    .keychain
                    .first()
                    .ok_or(WalletError::EmptyKeychain)?
                    .to_address(&self.params)
                    .script_pubkey(),
            };
            outputs.push(TxOutput::new(change as u64, change_script));
        }

        let inputs = selected
            .iter()
            .map(|(op, _)| TxInput::new(*op, Vec::new()))
            .collect();
        let mut tx = Transaction::new(inputs, outputs);

        // Sign every input against the output script it spends.
        for (i, (_, connected_script)) in selected.iter().enumerate() {
            let hash = Script::pubkey_hash_of(connected_script)
                .expect("selected outputs are pay-to-address");
            let key = self
                .keychain
                .iter()
                .find(|k| k.pubkey_hash() == hash)
                .ok_or(WalletError::EmptyKeychain)?;

            let digest = tx.hash_for_signature(i, connected_script, SIGHASH_ALL);
            let mut sig_and_type = key.sign(&digest);
            sig_and_type.push(SIGHASH_ALL as u8);
            tx.inputs[i].script_sig = Script::p2pkh_script_sig(&sig_and_type, &key.public_bytes());
        }

        log::info!(
            "created send of {} to {} using {} inputs",
            to_friendly_string(value),
            to,
            tx.inputs.len()
        );
        Ok(tx)
    }

    /// Commit a created transaction to the pending pool; its inputs are
    /// considered spent for the available balance from here on.
    pub fn confirm_send(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        if !self.pending.contains(&txid) {
            self.pending.insert(WalletTx::new(tx.clone()));
        }
    }

    fn fire(&self, events: Vec<Event>) {
        for event in &events {
            for listener in &self.listeners {
                match event {
                    Event::CoinsReceived {
                        tx,
                        prev_balance,
                        new_balance,
                    } => listener.coins_received(self, tx, *prev_balance, *new_balance),
                    Event::Dead { dead, replacement } => {
                        listener.dead_transaction(self, dead, replacement)
                    }
                }
            }
        }
    }

    // Pool inspection, mostly for tests and diagnostics.

    pub fn pool_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.unspent.len(),
            self.spent.len(),
            self.pending.len(),
            self.dead.len(),
        )
    }

    pub fn is_pending(&self, txid: &Hash256) -> bool {
        self.pending.contains(txid)
    }

    pub fn is_dead(&self, txid: &Hash256) -> bool {
        self.dead.contains(txid)
    }

    pub fn is_unspent(&self, txid: &Hash256) -> bool {
        self.unspent.contains(txid)
    }

    pub fn is_spent(&self, txid: &Hash256) -> bool {
        self.spent.contains(txid)
    }

    /// Save the complete wallet state. Written to a sibling temp file
    /// and renamed into place so a crash cannot truncate the wallet.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let path = path.as_ref();
        let file = WalletFileData {
            version: WALLET_FILE_VERSION,
            network: self.params.id.name().to_string(),
            keys: self
                .keychain
                .iter()
                .map(|k| hex::encode(k.secret_bytes()))
                .collect(),
            unspent: pool_records(&self.unspent),
            spent: pool_records(&self.spent),
            pending: pool_records(&self.pending),
            dead: pool_records(&self.dead),
            inactive: pool_records(&self.inactive),
            blocks: self
                .block_txids
                .iter()
                .map(|(hash, txids)| BlockRecord {
                    hash: hash.to_hex(),
                    txids: txids.iter().map(|t| t.to_hex()).collect(),
                })
                .collect(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| WalletError::BadFormat(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        log::debug!("saved wallet to {}", path.display());
        Ok(())
    }

    /// Load a wallet previously written by `save_to_file`.
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        params: NetworkParams,
    ) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let file: WalletFileData =
            serde_json::from_str(&json).map_err(|e| WalletError::BadFormat(e.to_string()))?;
        if file.version != WALLET_FILE_VERSION {
            return Err(WalletError::BadFormat(format!(
                "unsupported wallet version {}",
                file.version
            )));
        }

        let mut wallet = Wallet::new(params);
        for key_hex in &file.keys {
            let bytes = hex::decode(key_hex).map_err(|e| WalletError::BadFormat(e.to_string()))?;
            let key = EcKey::from_secret_bytes(&bytes).map_err(WalletError::BadFormat)?;
            wallet.add_key(key);
        }

        wallet.unspent = load_pool(&file.unspent)?;
        wallet.spent = load_pool(&file.spent)?;
        wallet.pending = load_pool(&file.pending)?;
        wallet.dead = load_pool(&file.dead)?;
        wallet.inactive = load_pool(&file.inactive)?;
        for record in &file.blocks {
            let hash = Hash256::from_hex(&record.hash).map_err(WalletError::BadFormat)?;
            let mut txids = Vec::with_capacity(record.txids.len());
            for txid in &record.txids {
                txids.push(Hash256::from_hex(txid).map_err(WalletError::BadFormat)?);
            }
            wallet.block_txids.insert(hash, txids);
        }
        Ok(wallet)
    }
}

#[derive(Serialize, Deserialize)]
struct WalletFileData {
    version: u32,
    network: String,
    keys: Vec<String>,
    unspent: Vec<TxRecord>,
    spent: Vec<TxRecord>,
    pending: Vec<TxRecord>,
    dead: Vec<TxRecord>,
    inactive: Vec<TxRecord>,
    blocks: Vec<BlockRecord>,
}

#[derive(Serialize, Deserialize)]
struct TxRecord {
    raw: String,
    appeared_in: Option<String>,
    spent_by: Vec<(u32, String)>,
    killed_by: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct BlockRecord {
    hash: String,
    txids: Vec<String>,
}

fn pool_records(pool: &Pool) -> Vec<TxRecord> {
    pool.iter()
        .map(|entry| TxRecord {
            raw: hex::encode(entry.tx.serialize()),
            appeared_in: entry.appeared_in.map(|h| h.to_hex()),
            spent_by: entry
                .spent_by
                .iter()
                .map(|(i, h)| (*i, h.to_hex()))
                .collect(),
            killed_by: entry.killed_by.map(|h| h.to_hex()),
        })
        .collect()
}

fn load_pool(records: &[TxRecord]) -> Result<Pool, WalletError> {
    let mut pool = Pool::default();
    for record in records {
        let raw = hex::decode(&record.raw).map_err(|e| WalletError::BadFormat(e.to_string()))?;
        let tx = Transaction::deserialize(&raw).map_err(WalletError::BadFormat)?;
        let mut entry = WalletTx::new(tx);
        entry.appeared_in = match &record.appeared_in {
            Some(h) => Some(Hash256::from_hex(h).map_err(WalletError::BadFormat)?),
            None => None,
        };
        for (index, spender) in &record.spent_by {
            entry
                .spent_by
                .insert(*index, Hash256::from_hex(spender).map_err(WalletError::BadFormat)?);
        }
        entry.killed_by = match &record.killed_by {
            Some(h) => Some(Hash256::from_hex(h).map_err(WalletError::BadFormat)?),
            None => None,
        };
        pool.insert(entry);
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{to_nanocoins, COIN};
    use std::sync::Mutex;

    fn fresh_wallet() -> (Wallet, Address) {
        let params = NetworkParams::unit_tests();
        let mut wallet = Wallet::new(params.clone());
        let key = EcKey::new();
        let address = key.to_address(&params);
        wallet.add_key(key);
        (wallet, address)
    }

    fn other_address() -> Address {
        EcKey::new().to_address(&NetworkParams::unit_tests())
    }

    /// A confirmed-style transaction paying `value` to `address` from
    /// an unknown outpoint.
    fn payment_to(address: &Address, value: Amount, salt: u8) -> Transaction {
        Transaction::new(
            vec![TxInput::new(
                OutPoint::new(Hash256::new([salt; 32]), 0),
                vec![salt],
            )],
            vec![TxOutput::new(value as u64, address.script_pubkey())],
        )
    }

    fn block_hash(n: u8) -> Hash256 {
        Hash256::new([n; 32])
    }

    #[derive(Default)]
    struct RecordingListener {
        received: Mutex<Vec<(Amount, Amount, Hash256)>>,
        dead: Mutex<Vec<(Hash256, Hash256)>>,
    }

    impl WalletListener for RecordingListener {
        fn coins_received(
            &self,
            _wallet: &Wallet,
            tx: &Transaction,
            prev_balance: Amount,
            new_balance: Amount,
        ) {
            self.received
                .lock()
                .unwrap()
                .push((prev_balance, new_balance, tx.txid()));
        }

        fn dead_transaction(
            &self,
            _wallet: &Wallet,
            dead: &Transaction,
            replacement: &Transaction,
        ) {
            self.dead
                .lock()
                .unwrap()
                .push((dead.txid(), replacement.txid()));
        }
    }

    #[test]
    fn test_receive_updates_balance() {
        let (mut wallet, address) = fresh_wallet();
        let tx = payment_to(&address, COIN, 1);

        wallet.receive(&tx, Some(block_hash(10)), ChainKind::BestChain);

        assert_eq!(wallet.balance(BalanceType::Available), COIN);
        assert_eq!(wallet.balance(BalanceType::Estimated), COIN);
        assert!(wallet.is_unspent(&tx.txid()));
    }

    #[test]
    fn test_listener_event_on_receive() {
        let (mut wallet, address) = fresh_wallet();
        let listener = Arc::new(RecordingListener::default());
        wallet.add_listener(listener.clone());

        let tx = payment_to(&address, COIN, 1);
        wallet.receive(&tx, Some(block_hash(10)), ChainKind::BestChain);

        let received = listener.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (0, COIN, tx.txid()));
    }

    #[test]
    fn test_side_chain_receive_does_not_change_balance() {
        let (mut wallet, address) = fresh_wallet();
        let best = payment_to(&address, COIN, 1);
        wallet.receive(&best, Some(block_hash(10)), ChainKind::BestChain);

        let side = payment_to(&address, 2 * COIN, 2);
        wallet.receive(&side, Some(block_hash(11)), ChainKind::SideChain);

        assert_eq!(wallet.balance(BalanceType::Available), COIN);
        assert_eq!(wallet.balance(BalanceType::Estimated), COIN);
    }

    #[test]
    fn test_basic_spend_lifecycle() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);
        assert_eq!(wallet.balance(BalanceType::Available), COIN);

        let to = other_address();
        let half = to_nanocoins("0.50").unwrap();
        let send = wallet.create_send(&to, half, None).unwrap();

        // Exactly one input, spending our coin, signed by our key.
        assert_eq!(send.inputs.len(), 1);
        assert_eq!(send.inputs[0].outpoint.txid, incoming.txid());
        let from_hash = send.inputs[0].from_address_hash().unwrap();
        assert_eq!(from_hash, address.hash160);

        // Wallet state untouched until confirm_send.
        assert_eq!(wallet.balance(BalanceType::Available), COIN);

        wallet.confirm_send(&send);
        let available = wallet.balance(BalanceType::Available);
        let estimated = wallet.balance(BalanceType::Estimated);
        assert!(available < estimated);
        assert_eq!(estimated, half);

        // The spend comes back in a block.
        wallet.receive(&send, Some(block_hash(11)), ChainKind::BestChain);
        assert_eq!(wallet.balance(BalanceType::Available), half);
        assert!(wallet.is_spent(&incoming.txid()));
        assert!(wallet.is_unspent(&send.txid()));
    }

    #[test]
    fn test_send_signature_verifies() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let send = wallet
            .create_send(&other_address(), to_nanocoins("0.25").unwrap(), None)
            .unwrap();

        let connected = address.script_pubkey();
        let digest = send.hash_for_signature(0, &connected, SIGHASH_ALL);
        assert!(Script::verify_p2pkh(
            &send.inputs[0].script_sig,
            &connected,
            digest.as_bytes()
        )
        .unwrap());
    }

    #[test]
    fn test_block_chain_catch_up() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let tenth = to_nanocoins("0.10").unwrap();
        let send1 = wallet.create_send(&other_address(), tenth, None).unwrap();
        wallet.confirm_send(&send1);
        wallet.receive(&send1, Some(block_hash(11)), ChainKind::BestChain);
        assert_eq!(to_friendly_string(wallet.balance(BalanceType::Available)), "0.90");

        let send2 = wallet.create_send(&other_address(), tenth, None).unwrap();
        wallet.confirm_send(&send2);
        wallet.receive(&send2, Some(block_hash(12)), ChainKind::BestChain);
        assert_eq!(to_friendly_string(wallet.balance(BalanceType::Available)), "0.80");
    }

    #[test]
    fn test_create_send_insufficient_funds() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let result = wallet.create_send(&other_address(), 2 * COIN, None);
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { available, .. }) if available == COIN
        ));
    }

    #[test]
    fn test_create_send_is_stateless() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let half = to_nanocoins("0.50").unwrap();
        let s1 = wallet.create_send(&other_address(), half, None).unwrap();
        let s2 = wallet.create_send(&other_address(), half, None).unwrap();

        // Distinct transactions spending the same outputs.
        assert_ne!(s1.txid(), s2.txid());
        assert_eq!(s1.inputs[0].outpoint, s2.inputs[0].outpoint);
    }

    #[test]
    fn test_estimated_balance_with_conflicting_pending_sends() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let half = to_nanocoins("0.50").unwrap();
        let s1 = wallet.create_send(&other_address(), half, None).unwrap();
        let s2 = wallet.create_send(&other_address(), half, None).unwrap();
        wallet.confirm_send(&s1);
        wallet.confirm_send(&s2);

        // Both sends claim the same confirmed output. Its value comes
        // off the estimate once, not once per conflicting spend: two
        // 0.50 change outputs pending against one 1.00 coin.
        assert_eq!(wallet.balance(BalanceType::Available), 0);
        assert_eq!(wallet.balance(BalanceType::Estimated), COIN);
    }

    #[test]
    fn test_finney_attack_kills_pending_send() {
        let (mut wallet, address) = fresh_wallet();
        let listener = Arc::new(RecordingListener::default());
        wallet.add_listener(listener.clone());

        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let half = to_nanocoins("0.50").unwrap();
        let s1 = wallet.create_send(&other_address(), half, None).unwrap();
        let s2 = wallet.create_send(&other_address(), half, None).unwrap();

        wallet.confirm_send(&s1);
        assert!(wallet.is_pending(&s1.txid()));

        // The conflicting spend confirms first.
        wallet.receive(&s2, Some(block_hash(11)), ChainKind::BestChain);

        assert!(wallet.is_dead(&s1.txid()));
        let dead = listener.dead.lock().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0], (s1.txid(), s2.txid()));
    }

    #[test]
    fn test_pool_membership_is_disjoint() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let send = wallet
            .create_send(&other_address(), to_nanocoins("0.40").unwrap(), None)
            .unwrap();
        wallet.confirm_send(&send);
        wallet.receive(&send, Some(block_hash(11)), ChainKind::BestChain);

        for txid in [incoming.txid(), send.txid()] {
            let memberships = [
                wallet.is_unspent(&txid),
                wallet.is_spent(&txid),
                wallet.is_pending(&txid),
                wallet.is_dead(&txid),
            ]
            .iter()
            .filter(|&&m| m)
            .count();
            assert_eq!(memberships, 1, "tx {} is in {} pools", txid, memberships);
        }
    }

    #[test]
    fn test_available_monotonic_under_confirm_send() {
        let (mut wallet, address) = fresh_wallet();
        wallet.receive(&payment_to(&address, COIN, 1), Some(block_hash(10)), ChainKind::BestChain);
        wallet.receive(&payment_to(&address, COIN, 2), Some(block_hash(10)), ChainKind::BestChain);

        let mut last = wallet.balance(BalanceType::Available);
        for value in ["0.30", "1.20"] {
            let send = wallet
                .create_send(&other_address(), to_nanocoins(value).unwrap(), None)
                .unwrap();
            wallet.confirm_send(&send);
            let now = wallet.balance(BalanceType::Available);
            assert!(now <= last);
            last = now;
        }
        assert!(last >= 0);
    }

    #[test]
    fn test_disconnect_returns_tx_to_pending() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);
        assert_eq!(wallet.balance(BalanceType::Available), COIN);

        wallet.disconnect_block(block_hash(10));

        assert!(wallet.is_pending(&incoming.txid()));
        assert_eq!(wallet.balance(BalanceType::Available), 0);
        // Estimated still counts the pending receipt.
        assert_eq!(wallet.balance(BalanceType::Estimated), COIN);
    }

    #[test]
    fn test_disconnect_revives_killed_tx() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);

        let half = to_nanocoins("0.50").unwrap();
        let s1 = wallet.create_send(&other_address(), half, None).unwrap();
        let s2 = wallet.create_send(&other_address(), half, None).unwrap();
        wallet.confirm_send(&s1);
        wallet.receive(&s2, Some(block_hash(11)), ChainKind::BestChain);
        assert!(wallet.is_dead(&s1.txid()));

        // The block carrying the winning double-spend is disconnected.
        wallet.disconnect_block(block_hash(11));

        assert!(wallet.is_pending(&s1.txid()));
        assert!(wallet.is_pending(&s2.txid()));
        assert!(!wallet.is_dead(&s1.txid()));
    }

    #[test]
    fn test_side_chain_then_connect_replays_tx() {
        let (mut wallet, address) = fresh_wallet();
        let tx = payment_to(&address, COIN, 1);

        wallet.receive(&tx, Some(block_hash(20)), ChainKind::SideChain);
        assert_eq!(wallet.balance(BalanceType::Available), 0);

        // Reorg: the side chain becomes the best chain.
        wallet.connect_block(block_hash(20));

        assert_eq!(wallet.balance(BalanceType::Available), COIN);
        assert!(wallet.is_unspent(&tx.txid()));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (mut wallet, address) = fresh_wallet();
        let incoming = payment_to(&address, COIN, 1);
        wallet.receive(&incoming, Some(block_hash(10)), ChainKind::BestChain);
        let send = wallet
            .create_send(&other_address(), to_nanocoins("0.30").unwrap(), None)
            .unwrap();
        wallet.confirm_send(&send);

        let path = std::env::temp_dir().join(format!("bitlight-wallet-{}.json", std::process::id()));
        wallet.save_to_file(&path).unwrap();

        let loaded = Wallet::load_from_file(&path, NetworkParams::unit_tests()).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.keychain.len(), 1);
        assert_eq!(
            loaded.keychain[0].public_bytes(),
            wallet.keychain[0].public_bytes()
        );
        assert!(loaded.is_unspent(&incoming.txid()));
        assert!(loaded.is_pending(&send.txid()));
        assert_eq!(
            loaded.balance(BalanceType::Available),
            wallet.balance(BalanceType::Available)
        );
        assert_eq!(
            loaded.balance(BalanceType::Estimated),
            wallet.balance(BalanceType::Estimated)
        );
    }

    #[test]
    fn test_loose_tx_goes_to_pending_without_event() {
        let (mut wallet, address) = fresh_wallet();
        let listener = Arc::new(RecordingListener::default());
        wallet.add_listener(listener.clone());

        let tx = payment_to(&address, COIN, 1);
        wallet.receive(&tx, None, ChainKind::BestChain);

        assert!(wallet.is_pending(&tx.txid()));
        assert_eq!(wallet.balance(BalanceType::Available), 0);
        assert_eq!(wallet.balance(BalanceType::Estimated), COIN);
        assert!(listener.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_irrelevant_tx_is_ignored() {
        let (mut wallet, _) = fresh_wallet();
        let stranger = payment_to(&other_address(), COIN, 3);
        wallet.receive(&stranger, Some(block_hash(10)), ChainKind::BestChain);
        assert_eq!(wallet.pool_sizes(), (0, 0, 0, 0));
    }
}
