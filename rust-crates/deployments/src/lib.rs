use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeploymentEnv {
    Base,
    BaseSepolia,
    Local,
}

impl DeploymentEnv {
    pub const ALL: [DeploymentEnv; 3] = [
        DeploymentEnv::Base,
        DeploymentEnv::BaseSepolia,
        DeploymentEnv::Local,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Base => "base",
            DeploymentEnv::BaseSepolia => "base-sepolia",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            DeploymentEnv::Base => 8453,
            DeploymentEnv::BaseSepolia => 84532,
            DeploymentEnv::Local => 31337,
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            DeploymentEnv::Base => "https://mainnet.base.org",
            DeploymentEnv::BaseSepolia => "https://sepolia.base.org",
            DeploymentEnv::Local => "http://localhost:8545",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Base => "Base",
            DeploymentEnv::BaseSepolia => "Base Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DeploymentEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        DeploymentEnv::ALL
            .into_iter()
            .find(|env| env.dir_name() == s)
            .ok_or_else(|| {
                anyhow!("unknown network '{s}'; expected base, base-sepolia or local")
            })
    }
}

/// Addresses and token metadata for one registered pot contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub pot_address: String,
    pub token_address: String,
    pub chain_id: u64,
    pub network_url: String,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub token_decimals: Option<u8>,
    #[serde(default)]
    pub deployment_block: Option<u64>,
    #[serde(default)]
    pub round_window_secs: Option<u64>,
    /// Multicall3 contract when the chain does not use the canonical address.
    #[serde(default)]
    pub multicall_address: Option<String>,
}

impl DeploymentRecord {
    pub fn new(
        env: DeploymentEnv,
        pot_address: impl Into<String>,
        token_address: impl Into<String>,
        network_url: impl Into<String>,
    ) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            pot_address: pot_address.into(),
            token_address: token_address.into(),
            chain_id: env.chain_id(),
            network_url: network_url.into(),
            token_symbol: None,
            token_decimals: None,
            deployment_block: None,
            round_window_secs: None,
            multicall_address: None,
        }
    }

    pub fn is_for_chain(&self, chain_id: u64) -> bool {
        self.chain_id == chain_id
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    /// Opens (creating if needed) the store for `env` under [`DEPLOYMENTS_ROOT`].
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first.
    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }
}

pub fn ensure_structure() -> Result<()> {
    for env in DeploymentEnv::ALL {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create deployments directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    if let Ok(records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(vec![record]);
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON at {}; expected a deployment object or a list of them",
        path.as_ref().display()
    ))
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .context("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment records")?;
    Ok(())
}
