use crate::{
    countdown::DEFAULT_ROUND_WINDOW,
    scheduler::DEFAULT_POLL_INTERVAL,
    wallets,
};
use alloy::primitives::Address;
use clap::{
    Parser,
    ValueEnum,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    bail,
    eyre,
};
use deployments::{
    DEPLOYMENTS_ROOT,
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use generated_abi::{
    DEFAULT_TOKEN_DECIMALS,
    DEFAULT_TOKEN_SYMBOL,
    MULTICALL3_ADDRESS,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum NetworkTarget {
    Base,
    BaseSepolia,
    Local,
}

impl From<NetworkTarget> for DeploymentEnv {
    fn from(target: NetworkTarget) -> Self {
        match target {
            NetworkTarget::Base => DeploymentEnv::Base,
            NetworkTarget::BaseSepolia => DeploymentEnv::BaseSepolia,
            NetworkTarget::Local => DeploymentEnv::Local,
        }
    }
}

/// Terminal client for the Time Tomb pot.
#[derive(Clone, Debug, Parser)]
#[command(name = "time-tomb", version, about)]
pub struct Cli {
    /// Network to connect to.
    #[arg(long, value_enum, env = "TIME_TOMB_NETWORK")]
    pub network: NetworkTarget,

    /// Override the network's default RPC endpoint.
    #[arg(long, env = "TIME_TOMB_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Pot contract; defaults to the latest deployment record.
    #[arg(long, env = "TIME_TOMB_POT_ADDRESS")]
    pub pot_address: Option<Address>,

    /// Deposit token; defaults to the latest deployment record.
    #[arg(long, env = "TIME_TOMB_TOKEN_ADDRESS")]
    pub token_address: Option<Address>,

    /// Multicall3 contract used for batched reads; defaults to the record,
    /// then the canonical deployment.
    #[arg(long, env = "TIME_TOMB_MULTICALL_ADDRESS")]
    pub multicall_address: Option<Address>,

    /// Keystore name to play with. Without it the client is read-only.
    #[arg(long, env = "TIME_TOMB_WALLET")]
    pub wallet: Option<String>,

    /// Keystore directory (defaults to ~/.foundry/keystores).
    #[arg(long, env = "TIME_TOMB_WALLET_DIR")]
    pub wallet_dir: Option<String>,

    #[arg(long, env = "TIME_TOMB_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval_secs: u64,

    /// Reference window for the countdown progress bar (default 24h).
    #[arg(long, env = "TIME_TOMB_ROUND_WINDOW_SECS")]
    pub round_window_secs: Option<u64>,

    #[arg(long, env = "TIME_TOMB_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    #[arg(long, env = "TIME_TOMB_DEPLOYMENTS_DIR", default_value = DEPLOYMENTS_ROOT)]
    pub deployments_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletSelection {
    pub name: String,
    pub dir: PathBuf,
}

/// Startup configuration, resolved once and passed by reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub env: DeploymentEnv,
    pub rpc_url: String,
    pub pot_address: Address,
    pub token_address: Address,
    pub multicall_address: Address,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub wallet: Option<WalletSelection>,
    pub poll_interval: Duration,
    pub round_window: Duration,
    pub log_dir: PathBuf,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let env = DeploymentEnv::from(cli.network);
        let store = DeploymentStore::in_root(&cli.deployments_dir, env)
            .map_err(|e| eyre!(e))
            .wrap_err("Failed to open deployment records")?;
        let record = store
            .latest()
            .map_err(|e| eyre!(e))
            .wrap_err("Failed to read deployment records")?;
        Self::resolve(cli, record)
    }

    /// CLI and environment values win; the deployment record fills the gaps.
    pub fn resolve(cli: Cli, record: Option<DeploymentRecord>) -> Result<Self> {
        let env = DeploymentEnv::from(cli.network);
        let record = record.filter(|record| {
            let matches = record.is_for_chain(env.chain_id());
            if !matches {
                warn!(
                    record_chain = record.chain_id,
                    expected = env.chain_id(),
                    "ignoring deployment record for another chain"
                );
            }
            matches
        });

        let pot_address = match cli.pot_address {
            Some(address) => address,
            None => record_address(record.as_ref(), "pot", |r| &r.pot_address)?,
        };
        let token_address = match cli.token_address {
            Some(address) => address,
            None => record_address(record.as_ref(), "token", |r| &r.token_address)?,
        };

        let multicall_address = match (cli.multicall_address, record.as_ref()) {
            (Some(address), _) => address,
            (None, Some(DeploymentRecord {
                multicall_address: Some(raw),
                ..
            })) => raw
                .parse()
                .wrap_err("Deployment record has an invalid multicall address")?,
            (None, _) => MULTICALL3_ADDRESS,
        };

        if cli.poll_interval_secs == 0 {
            bail!("--poll-interval-secs must be at least 1");
        }
        let round_window_secs = cli
            .round_window_secs
            .or(record.as_ref().and_then(|r| r.round_window_secs))
            .unwrap_or(DEFAULT_ROUND_WINDOW.as_secs());
        if round_window_secs == 0 {
            bail!("--round-window-secs must be at least 1");
        }

        let wallet = match cli.wallet {
            Some(name) => Some(WalletSelection {
                name,
                dir: wallets::resolve_wallet_dir(cli.wallet_dir.as_deref())?,
            }),
            None => None,
        };

        Ok(Self {
            env,
            rpc_url: cli
                .rpc_url
                .unwrap_or_else(|| env.default_rpc_url().to_string()),
            pot_address,
            token_address,
            multicall_address,
            token_symbol: record
                .as_ref()
                .and_then(|r| r.token_symbol.clone())
                .unwrap_or_else(|| DEFAULT_TOKEN_SYMBOL.to_string()),
            token_decimals: record
                .as_ref()
                .and_then(|r| r.token_decimals)
                .unwrap_or(DEFAULT_TOKEN_DECIMALS),
            wallet,
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            round_window: Duration::from_secs(round_window_secs),
            log_dir: cli.log_dir,
        })
    }
}

fn record_address(
    record: Option<&DeploymentRecord>,
    what: &str,
    field: impl Fn(&DeploymentRecord) -> &String,
) -> Result<Address> {
    let Some(record) = record else {
        bail!(
            "No {what} address: pass --{what}-address (or TIME_TOMB_{}_ADDRESS) or register a deployment",
            what.to_uppercase()
        );
    };
    field(record)
        .parse()
        .wrap_err_with(|| format!("Deployment record has an invalid {what} address"))
}
