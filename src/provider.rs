use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::Address,
    utils::hex,
};
use futures::channel::mpsc::UnboundedSender;
use log::warn;
use serde_json::Value;

use super::network::ChainId;

/// EIP-1193 error code emitted when the user dismisses a wallet prompt.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Error reported by the provider capability for a single request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_CODE
    }

    /// Server and transport failures worth retrying on read paths.
    pub fn is_transient(&self) -> bool {
        matches!(self.code, -32099..=-32000 | -32603)
    }
}

/// A message pushed by the wallet provider, delivered in arrival order to
/// the session dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    Connect { chain_id: Option<ChainId> },
    Disconnect,
    ChainChanged(ChainId),
    AccountsChanged(Vec<Address>),
    Log { contract: Address, event: String, values: Vec<Value> },
}

/// Names a contract event together with its canonical signature, e.g.
/// `Deposit` / `Deposit(address,uint256,uint256)`. The signature drives
/// topic hashing and argument decoding in the underlying binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSpec {
    pub name: String,
    pub signature: String,
}

impl EventSpec {
    pub fn new(name: &str, signature: &str) -> Self {
        Self { name: name.to_string(), signature: signature.to_string() }
    }
}

/// The injected wallet capability.
///
/// Implementations wrap whatever object the host environment exposes
/// (`window.ethereum` in a browser, a scripted double in tests). All
/// registration entry points are synchronous so callers can hold them
/// inside a critical section without suspension.
#[async_trait(?Send)]
pub trait Provider {
    /// Issues a raw `request({method, params})` round trip.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Legacy authorization path, used when `eth_requestAccounts` yields
    /// no accounts.
    async fn enable(&self) -> Result<Vec<String>, RpcError>;

    /// Attaches the lifecycle listener. At most one listener is active;
    /// attaching again replaces the previous one.
    fn set_listener(&self, tx: UnboundedSender<ProviderMessage>);

    fn clear_listener(&self);

    /// Read-only contract call against the provider.
    async fn call(&self, to: Address, signature: &str, args: &[Token]) -> Result<Value, RpcError>;

    /// Signer-bound mutating call from `from`.
    async fn send(
        &self,
        from: Address,
        to: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<Value, RpcError>;

    /// Starts emitting `ProviderMessage::Log` for the given pair.
    fn watch(&self, contract: Address, event: &EventSpec) -> Result<(), RpcError>;

    fn unwatch(&self, contract: Address, event_name: &str) -> Result<(), RpcError>;
}

pub type ProviderRef = Arc<dyn Provider>;

/// Full-length hex form of an address. `Display` on `H160` elides the
/// middle, so wire formatting must go through `Debug`.
pub fn address_hex(address: &Address) -> String {
    format!("{address:?}")
}

/// Maps typed call arguments onto the untyped wire values used for
/// coalescing keys and test doubles. Unsigned values keep their decimal
/// string form so precision survives the JSON boundary.
pub fn token_value(token: &Token) -> Value {
    match token {
        Token::Address(address) => Value::String(address_hex(address)),
        Token::Uint(value) | Token::Int(value) => Value::String(value.to_string()),
        Token::Bool(value) => Value::Bool(*value),
        Token::String(value) => Value::String(value.clone()),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => {
            Value::String(format!("0x{}", hex::encode(bytes)))
        }
        Token::Array(inner) | Token::FixedArray(inner) | Token::Tuple(inner) => {
            Value::Array(inner.iter().map(token_value).collect())
        }
    }
}

/// Accounts arrive as hex strings; entries that do not parse are dropped
/// rather than poisoning the whole update.
pub(crate) fn parse_accounts(values: &[Value]) -> Vec<Address> {
    values
        .iter()
        .filter_map(|value| value.as_str())
        .filter_map(|raw| match raw.parse::<Address>() {
            Ok(address) => Some(address),
            Err(_) => {
                warn!("ignoring unparseable account address {raw}");
                None
            }
        })
        .collect()
}
