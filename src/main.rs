// Demo client: connect to a local node, download the chain, and
// print wallet activity.

use bitlight::core::{to_friendly_string, Amount};
use bitlight::wallet::{BalanceType, EcKey, Wallet, WalletListener};
use bitlight::{BlockChain, NetworkParams, Peer, SledBlockStore, Transaction};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(about = "Lightweight SPV Bitcoin client")]
struct Cli {
    /// Chain to follow: pass "testnet" for the test network.
    network: Option<String>,

    /// Node to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Data directory for the wallet and block store.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

struct PrintingListener;

impl WalletListener for PrintingListener {
    fn coins_received(
        &self,
        _wallet: &Wallet,
        tx: &Transaction,
        prev_balance: Amount,
        new_balance: Amount,
    ) {
        println!(
            "received {} in tx {}, balance now {}",
            to_friendly_string(new_balance - prev_balance),
            tx.txid(),
            to_friendly_string(new_balance)
        );
    }

    fn dead_transaction(&self, _wallet: &Wallet, dead: &Transaction, replacement: &Transaction) {
        println!("tx {} double-spent by {}", dead.txid(), replacement.txid());
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let params = match cli.network.as_deref() {
        Some("testnet") => NetworkParams::testnet(),
        Some(other) => {
            eprintln!("unknown network '{}', expected 'testnet'", other);
            std::process::exit(1);
        }
        None => NetworkParams::production(),
    };

    if let Err(e) = run(params, cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(params: NetworkParams, cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&cli.data_dir)?;
    let wallet_path = cli.data_dir.join("wallet.json");

    let mut wallet = if wallet_path.exists() {
        Wallet::load_from_file(&wallet_path, params.clone())?
    } else {
        let mut wallet = Wallet::new(params.clone());
        wallet.add_key(EcKey::new());
        wallet.save_to_file(&wallet_path)?;
        wallet
    };
    wallet.add_listener(Arc::new(PrintingListener));
    println!(
        "receive address: {}",
        wallet.keychain[0].to_address(&params)
    );
    println!(
        "balance: {}",
        to_friendly_string(wallet.balance(BalanceType::Available))
    );
    let wallet = Arc::new(Mutex::new(wallet));

    let store = SledBlockStore::open(cli.data_dir.join("blockstore"), &params)?;
    let chain = Arc::new(Mutex::new(BlockChain::new(
        params.clone(),
        wallet.clone(),
        Box::new(store),
    )?));

    let node = SocketAddr::new(cli.host, params.port);
    let our_height = chain.lock().unwrap().best_chain_height();
    let mut peer = Peer::connect(node, params, our_height).await?;
    peer.handshake().await?;
    peer.start_blockchain_download(&chain).await?;

    // The reader loop runs until the node hangs up.
    peer.run(chain.clone(), wallet.clone()).await?;

    let wallet = wallet.lock().unwrap();
    wallet.save_to_file(&wallet_path)?;
    println!(
        "final balance: {}",
        to_friendly_string(wallet.balance(BalanceType::Available))
    );
    Ok(())
}
