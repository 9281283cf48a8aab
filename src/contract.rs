use std::{cell::RefCell, collections::HashMap, sync::Arc, time::Duration};

use ethers::{abi::Token, types::Address};
use futures::channel::oneshot;
use log::{debug, warn};
use serde_json::Value;

use super::{
    provider::{token_value, ProviderRef, RpcError},
    time, Error, State,
};

const READ_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(150);

type ReadKey = (Address, String, String);
type ReadWaiters = Vec<oneshot::Sender<Result<Value, RpcError>>>;

/// Executes contract calls through the provider capability. Read calls
/// need no identity; mutating calls are signer-bound and gated on the
/// session being `Connected`.
#[derive(Clone)]
pub struct ContractProxy {
    provider: Arc<RefCell<Option<ProviderRef>>>,
    state: Arc<RefCell<State>>,
    account: Arc<RefCell<Option<Address>>>,
    pending_reads: Arc<RefCell<HashMap<ReadKey, ReadWaiters>>>,
}

impl ContractProxy {
    pub(crate) fn new(
        provider: Arc<RefCell<Option<ProviderRef>>>,
        state: Arc<RefCell<State>>,
        account: Arc<RefCell<Option<Address>>>,
    ) -> Self {
        Self { provider, state, account, pending_reads: Arc::new(RefCell::new(HashMap::new())) }
    }

    /// Read-only call. Works in any connection state as long as a
    /// provider handle exists. Reads with an identical
    /// (contract, method, args) key issued while one is in flight attach
    /// to the same underlying request; the key carries the serialized
    /// arguments, so results never cross argument sets. Transient RPC
    /// failures retry a bounded number of times with backoff.
    pub async fn read_call(
        &self,
        contract: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<Value, Error> {
        let provider = self.provider.borrow().clone().ok_or(Error::ProviderNotFound)?;
        let key = read_key(contract, signature, args);

        let attached = {
            let mut pending = self.pending_reads.borrow_mut();
            match pending.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    pending.insert(key.clone(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = attached {
            debug!("coalescing read {signature} on {contract:?}");
            return match rx.await {
                Ok(result) => result.map_err(Error::Rpc),
                Err(_) => Err(Error::Rpc(RpcError::new(-32603, "coalesced read dropped"))),
            };
        }

        let result = read_with_retry(&provider, contract, signature, args).await;
        let waiters = self.pending_reads.borrow_mut().remove(&key).unwrap_or_default();
        for waiter in waiters {
            _ = waiter.send(result.clone());
        }
        result.map_err(Error::Rpc)
    }

    /// Signer-bound mutating call. Fails fast without a network request
    /// when no signer is available, and is never retried.
    pub async fn mutating_call(
        &self,
        contract: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<Value, Error> {
        match &*self.state.borrow() {
            State::Connected => {}
            State::WrongNetwork => return Err(Error::WrongNetwork),
            _ => return Err(Error::NoSigner),
        }
        let from = (*self.account.borrow()).ok_or(Error::NoSigner)?;
        let provider = self.provider.borrow().clone().ok_or(Error::NoSigner)?;

        Ok(provider.send(from, contract, signature, args).await?)
    }
}

async fn read_with_retry(
    provider: &ProviderRef,
    contract: Address,
    signature: &str,
    args: &[Token],
) -> Result<Value, RpcError> {
    let mut attempt = 0;
    loop {
        match provider.call(contract, signature, args).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < READ_RETRIES => {
                attempt += 1;
                warn!("read {signature} failed ({err}), retry {attempt}/{READ_RETRIES}");
                time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn read_key(contract: Address, signature: &str, args: &[Token]) -> ReadKey {
    let args = Value::Array(args.iter().map(token_value).collect()).to_string();
    (contract, signature.to_string(), args)
}
