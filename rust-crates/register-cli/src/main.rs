use alloy::{
    primitives::{
        Address,
        U256,
        utils::format_units,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
};
use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use clap::{
    Parser,
    Subcommand,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use generated_abi::{
    erc20_types::Erc20,
    pot_types::TimeTomb,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "time-tomb-register",
    about = "Record Time Tomb deployments and inspect pot state",
    version
)]
struct Args {
    /// base, base-sepolia or local
    #[arg(long, env = "TIME_TOMB_NETWORK")]
    network: DeploymentEnv,

    /// Override RPC URL
    #[arg(long, env = "TIME_TOMB_RPC_URL")]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe a pot and its token on-chain, then append a deployment record
    Register {
        #[arg(long)]
        pot: Address,
        #[arg(long)]
        token: Address,
        /// Block the pot was deployed at, if known
        #[arg(long)]
        deployment_block: Option<u64>,
        /// Reference window for the client's countdown bar
        #[arg(long)]
        round_window_secs: Option<u64>,
        /// Multicall3 contract, for chains without the canonical deployment
        #[arg(long)]
        multicall: Option<Address>,
    },
    /// Print the state of the latest registered pot
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    deployments::ensure_structure().context("initializing deployment directories")?;

    let env = args.network;
    let rpc_url = args
        .rpc_url
        .clone()
        .unwrap_or_else(|| env.default_rpc_url().to_string());
    let provider = connect(&rpc_url, env).await?;
    let store = DeploymentStore::new(env).context("opening deployment store")?;

    match args.command {
        Command::Register {
            pot,
            token,
            deployment_block,
            round_window_secs,
            multicall,
        } => {
            let token_contract = Erc20::new(token, &provider);
            let decimals = token_contract
                .decimals()
                .call()
                .await
                .context("reading token decimals")?;
            let symbol = token_contract
                .symbol()
                .call()
                .await
                .context("reading token symbol")?;
            let end_time = TimeTomb::new(pot, &provider)
                .gameEndTime()
                .call()
                .await
                .context("probing pot contract; is this a Time Tomb address?")?;
            info!(%pot, %token, %symbol, decimals, %end_time, "probed deployment");

            let mut record = DeploymentRecord::new(
                env,
                pot.to_string(),
                token.to_string(),
                rpc_url.clone(),
            );
            record.token_symbol = Some(symbol);
            record.token_decimals = Some(decimals);
            record.deployment_block = deployment_block;
            record.round_window_secs = round_window_secs;
            record.multicall_address = multicall.map(|address| address.to_string());
            store.append(record).context("recording deployment")?;
            println!("Deployment metadata written to {}", store.path().display());
        }
        Command::Status => {
            let record = latest_record(&store)?;
            print_status(&provider, &record).await?;
        }
    }
    Ok(())
}

async fn connect(rpc_url: &str, env: DeploymentEnv) -> Result<DynProvider> {
    let provider = ProviderBuilder::new()
        .connect(rpc_url)
        .await
        .with_context(|| format!("failed to connect to {rpc_url}"))?
        .erased();
    let chain_id = provider
        .get_chain_id()
        .await
        .context("fetching chain id")?;
    if chain_id != env.chain_id() {
        bail!(
            "{rpc_url} reports chain id {chain_id} but {env} expects {}",
            env.chain_id()
        );
    }
    Ok(provider)
}

async fn print_status(provider: &DynProvider, record: &DeploymentRecord) -> Result<()> {
    let pot: Address = record
        .pot_address
        .parse()
        .context("parsing stored pot address")?;
    let token: Address = record
        .token_address
        .parse()
        .context("parsing stored token address")?;
    let decimals = record
        .token_decimals
        .unwrap_or(generated_abi::DEFAULT_TOKEN_DECIMALS);
    let symbol = record
        .token_symbol
        .as_deref()
        .unwrap_or(generated_abi::DEFAULT_TOKEN_SYMBOL);

    let pot_contract = TimeTomb::new(pot, provider);
    let total = pot_contract
        .totalDeposited()
        .call()
        .await
        .context("reading totalDeposited")?;
    let remaining = pot_contract
        .getRemainingTime()
        .call()
        .await
        .context("reading getRemainingTime")?;
    let leader = pot_contract
        .currentLeader()
        .call()
        .await
        .context("reading currentLeader")?;
    let balance = Erc20::new(token, provider)
        .balanceOf(pot)
        .call()
        .await
        .context("reading pot token balance")?;

    println!("Pot {pot} ({symbol} at {token})");
    println!("  Total deposited:  {} {symbol}", amount(total, decimals)?);
    println!("  Contract balance: {} {symbol}", amount(balance, decimals)?);
    println!("  Remaining:        {}", remaining_text(remaining));
    if leader == Address::ZERO {
        println!("  Leader:           none yet");
    } else {
        println!("  Leader:           {leader}");
    }
    Ok(())
}

fn amount(raw: U256, decimals: u8) -> Result<String> {
    format_units(raw, decimals).map_err(|e| anyhow!("formatting amount: {e}"))
}

fn remaining_text(secs: U256) -> String {
    let secs = u64::try_from(secs).unwrap_or(u64::MAX);
    if secs == 0 {
        return "closed".to_string();
    }
    format!(
        "{}d {:02}h {:02}m {:02}s",
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

fn latest_record(store: &DeploymentStore) -> Result<DeploymentRecord> {
    store
        .latest()
        .context("loading deployment records")?
        .ok_or_else(|| anyhow!("no deployments found for this environment"))
}
