use std::sync::Arc;

use ethers::{
    abi::Token,
    types::{Address, U256},
};
use futures::channel::mpsc::UnboundedReceiver;
use serde_json::Value;

use super::{
    contract::ContractProxy,
    hub::{parse_u256, EventHub, EventPayload, HubMessage, SubscriptionHandle},
    provider::{EventSpec, RpcError},
    Error,
};

pub fn deposit_event() -> EventSpec {
    EventSpec::new("Deposit", "Deposit(address,uint256,uint256)")
}

pub fn withdraw_event() -> EventSpec {
    EventSpec::new("Withdraw", "Withdraw(address,uint256,uint256)")
}

/// Typed client for the vote-escrow token contract: balance and lock
/// reads against the provider, signer-bound lock/withdraw mutations, and
/// the Deposit/Withdraw event subscriptions.
#[derive(Clone)]
pub struct VeTokenClient {
    address: Address,
    proxy: ContractProxy,
    hub: EventHub,
}

impl VeTokenClient {
    pub fn new(address: Address, proxy: ContractProxy, hub: EventHub) -> Self {
        Self { address, proxy, hub }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn locked_amount(&self, account: Address) -> Result<U256, Error> {
        self.read_u256("lockedAmount(address)", &[Token::Address(account)]).await
    }

    pub async fn locked_end(&self, account: Address) -> Result<U256, Error> {
        self.read_u256("lockedEnd(address)", &[Token::Address(account)]).await
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256, Error> {
        self.read_u256("balanceOf(address)", &[Token::Address(account)]).await
    }

    pub async fn total_supply(&self) -> Result<U256, Error> {
        self.read_u256("totalSupply()", &[]).await
    }

    /// Locks `amount` until `unlock_time`. Returns the transaction
    /// result as reported by the wallet.
    pub async fn create_lock(&self, amount: U256, unlock_time: U256) -> Result<Value, Error> {
        self.proxy
            .mutating_call(
                self.address,
                "createLock(uint256,uint256)",
                &[Token::Uint(amount), Token::Uint(unlock_time)],
            )
            .await
    }

    pub async fn withdraw(&self) -> Result<Value, Error> {
        self.proxy.mutating_call(self.address, "withdraw()", &[]).await
    }

    pub fn deposits(
        &self,
    ) -> Result<(SubscriptionHandle, UnboundedReceiver<HubMessage>), Error> {
        self.hub.subscribe(self.address, deposit_event(), Arc::new(EventPayload::decode_deposit))
    }

    pub fn withdrawals(
        &self,
    ) -> Result<(SubscriptionHandle, UnboundedReceiver<HubMessage>), Error> {
        self.hub.subscribe(self.address, withdraw_event(), Arc::new(EventPayload::decode_withdraw))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.hub.unsubscribe(handle)
    }

    async fn read_u256(&self, signature: &str, args: &[Token]) -> Result<U256, Error> {
        let value = self.proxy.read_call(self.address, signature, args).await?;
        parse_u256(&value).ok_or_else(|| {
            Error::Rpc(RpcError::new(-32700, format!("unexpected result for {signature}")))
        })
    }
}
