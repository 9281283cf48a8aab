use std::{collections::HashMap, fmt::Display, num::ParseIntError, str::FromStr};

use ethers::types::Address;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::{provider::ProviderRef, Error};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainIdError {
    #[error("Chain id provided in bad format")]
    BadFormat,

    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),
}

/// Chain identifier in its canonical `0x`-hex form. Wallet configs ship
/// both hex (`"0xA869"`) and decimal (`"80001"`) spellings; both parse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl ChainId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ChainIdError::BadFormat);
        }

        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return Ok(Self(u64::from_str_radix(hex, 16)?));
        }

        Ok(Self(s.parse::<u64>()?))
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:#x}", self.0))
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{self}"))
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<ChainId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;

        s.parse::<ChainId>().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Chain configuration, immutable once loaded for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<Url>,
    pub block_explorer_urls: Vec<Url>,
    /// Logical contract name to deployed address, e.g. `veToken`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub contracts: HashMap<String, Address>,
}

impl NetworkConfig {
    pub fn contract(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).copied()
    }

    /// The `wallet_addEthereumChain` parameter literal. The contracts map
    /// is session-local and never leaves the dApp.
    pub fn add_chain_params(&self) -> serde_json::Value {
        json!({
            "chainId": self.chain_id,
            "chainName": self.chain_name,
            "nativeCurrency": self.native_currency,
            "rpcUrls": self.rpc_urls,
            "blockExplorerUrls": self.block_explorer_urls,
        })
    }

    pub fn avalanche_testnet() -> Self {
        Self {
            chain_id: "0xA869".parse().expect("valid built-in chain id"),
            chain_name: "Avalanche Testnet C-Chain".to_string(),
            native_currency: NativeCurrency {
                name: "Avalanche".to_string(),
                symbol: "AVAX".to_string(),
                decimals: 18,
            },
            rpc_urls: vec![Url::parse("https://api.avax-test.network/ext/bc/C/rpc")
                .expect("valid built-in url")],
            block_explorer_urls: vec![Url::parse("https://cchain.explorer.avax-test.network/")
                .expect("valid built-in url")],
            contracts: HashMap::new(),
        }
    }

    pub fn polygon_testnet() -> Self {
        Self {
            chain_id: "80001".parse().expect("valid built-in chain id"),
            chain_name: "Polygon Mumbai Testnet".to_string(),
            native_currency: NativeCurrency {
                name: "Matic".to_string(),
                symbol: "MATIC".to_string(),
                decimals: 18,
            },
            rpc_urls: vec![
                Url::parse("https://rpc-mumbai.maticvigil.com/").expect("valid built-in url")
            ],
            block_explorer_urls: vec![
                Url::parse("https://mumbai.polygonscan.com/").expect("valid built-in url")
            ],
            contracts: HashMap::new(),
        }
    }
}

/// Read-only set of networks the dApp is willing to operate on, loaded
/// once at session start.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: HashMap<ChainId, NetworkConfig>,
}

impl NetworkRegistry {
    pub fn new(configs: Vec<NetworkConfig>) -> Self {
        Self { networks: configs.into_iter().map(|c| (c.chain_id, c)).collect() }
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let configs: Vec<NetworkConfig> =
            serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self::new(configs))
    }

    pub fn contains(&self, chain_id: &ChainId) -> bool {
        self.networks.contains_key(chain_id)
    }

    pub fn resolve(&self, chain_id: &ChainId) -> Result<&NetworkConfig, Error> {
        self.networks.get(chain_id).ok_or(Error::UnknownNetwork(*chain_id))
    }

    /// Asks the wallet to add/switch to the given chain. A rejection is
    /// reported, never retried.
    pub async fn request_switch(
        &self,
        provider: &ProviderRef,
        config: &NetworkConfig,
    ) -> Result<(), Error> {
        provider
            .request("wallet_addEthereumChain", json!([config.add_chain_params()]))
            .await
            .map_err(|err| {
                if err.is_user_rejection() {
                    Error::UserRejected
                } else {
                    Error::Rpc(err)
                }
            })?;
        Ok(())
    }
}
