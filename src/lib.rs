pub mod contract;
pub mod detect;
pub mod event;
pub mod hub;
#[cfg(target_arch = "wasm32")]
pub mod injected;
pub mod network;
pub mod provider;
#[cfg(test)]
pub(crate) mod test_util;
pub(crate) mod time;
pub mod ve_token;

use std::{
    cell::{Cell, RefCell},
    sync::Arc,
};

use ethers::types::{Address, U256};
use futures::{
    channel::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    StreamExt,
};
use log::{debug, warn};
use serde_json::{json, Value};

use self::{
    contract::ContractProxy,
    detect::Detector,
    event::{broadcast, SessionEvent},
    hub::{parse_u256, DecodeError, EventHub},
    network::{ChainId, ChainIdError, NetworkConfig, NetworkRegistry},
    provider::{address_hex, parse_accounts, ProviderMessage, ProviderRef, RpcError},
};

/// Connection lifecycle. Exactly one state is active; transitions are
/// driven by `connect`/`disconnect` and provider-pushed events.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Disconnected,
    Detecting,
    AwaitingAuthorization,
    Connected,
    WrongNetwork,
    Error(Error),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("No injected wallet provider found")]
    ProviderNotFound,

    #[error("Multiple injected providers announced, proceeding with {0}")]
    MultipleProviders(String),

    #[error("User rejected the request")]
    UserRejected,

    #[error("Unknown network {0}")]
    UnknownNetwork(ChainId),

    #[error("Connected to the wrong network")]
    WrongNetwork,

    #[error("No signer available")]
    NoSigner,

    #[error("Invalid network configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ChainId(#[from] ChainIdError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The wallet connection session. Owns the connection state machine, the
/// current account and network, the contract event hub and the call
/// proxy. Constructed once at the composition root and passed around by
/// reference; there is no process-wide state outside this object.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct WalletSession {
    detector: Detector,
    registry: Arc<NetworkRegistry>,
    provider: Arc<RefCell<Option<ProviderRef>>>,
    state: Arc<RefCell<State>>,
    account: Arc<RefCell<Option<Address>>>,
    network: Arc<RefCell<Option<NetworkConfig>>>,
    watchers: Arc<RefCell<Vec<UnboundedSender<SessionEvent>>>>,
    messages: UnboundedSender<ProviderMessage>,
    inbox: Arc<RefCell<Option<UnboundedReceiver<ProviderMessage>>>>,
    connect_waiters: Arc<RefCell<Vec<oneshot::Sender<Result<Address, Error>>>>>,
    connecting: Arc<Cell<bool>>,
    listener_attached: Arc<Cell<bool>>,
    hub: EventHub,
    proxy: ContractProxy,
}

impl WalletSession {
    pub fn new(registry: NetworkRegistry, detector: Detector) -> Self {
        let (messages, inbox) = mpsc::unbounded();
        let provider = Arc::new(RefCell::new(None));
        let state = Arc::new(RefCell::new(State::Disconnected));
        let account = Arc::new(RefCell::new(None));
        let watchers = Arc::new(RefCell::new(Vec::new()));
        let hub = EventHub::new(provider.clone(), watchers.clone());
        let proxy = ContractProxy::new(provider.clone(), state.clone(), account.clone());

        Self {
            detector,
            registry: Arc::new(registry),
            provider,
            state,
            account,
            network: Arc::new(RefCell::new(None)),
            watchers,
            messages,
            inbox: Arc::new(RefCell::new(Some(inbox))),
            connect_waiters: Arc::new(RefCell::new(Vec::new())),
            connecting: Arc::new(Cell::new(false)),
            listener_attached: Arc::new(Cell::new(false)),
            hub,
            proxy,
        }
    }

    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    pub fn account(&self) -> Option<Address> {
        *self.account.borrow()
    }

    pub fn network(&self) -> Option<NetworkConfig> {
        self.network.borrow().clone()
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), State::Connected)
    }

    pub fn hub(&self) -> EventHub {
        self.hub.clone()
    }

    pub fn contracts(&self) -> ContractProxy {
        self.proxy.clone()
    }

    /// Subscribes to the push stream of state, account and network
    /// changes plus the observability events.
    pub fn watch(&self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.watchers.borrow_mut().push(tx);
        rx
    }

    /// Dispatcher task: drains provider messages in arrival order. Spawn
    /// once from the composition root. Each message updates state
    /// synchronously, so no subsequently queued task observes a stale
    /// session.
    pub async fn run(&self) {
        let inbox = self.inbox.borrow_mut().take();
        let Some(mut inbox) = inbox else {
            warn!("session dispatcher is already running");
            return;
        };
        while let Some(message) = inbox.next().await {
            self.apply(message);
        }
    }

    /// Connects to the injected wallet. Single-flight: calls overlapping
    /// an in-flight attempt attach to it and settle with the same
    /// outcome, never triggering a second authorization prompt.
    pub async fn connect(&self) -> Result<Address, Error> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut waiters = self.connect_waiters.borrow_mut();
            waiters.push(tx);
            if self.connecting.get() {
                false
            } else {
                self.connecting.set(true);
                true
            }
        };

        if leader {
            let result = self.drive_connect().await;
            self.connecting.set(false);
            let pending = std::mem::take(&mut *self.connect_waiters.borrow_mut());
            for waiter in pending {
                _ = waiter.send(result.clone());
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ProviderNotFound),
        }
    }

    /// Silent resume of an already-authorized session (`eth_accounts`,
    /// no prompt). `Ok(None)` when nothing is authorized or no provider
    /// is injected; a no-op while a connect attempt is in flight.
    pub async fn resume(&self) -> Result<Option<Address>, Error> {
        if self.connecting.get() {
            return Ok(None);
        }

        let existing = self.provider.borrow().clone();
        let provider = match existing {
            Some(provider) => provider,
            None => {
                let Ok(detection) = self.detector.detect().await else {
                    return Ok(None);
                };
                if let Some(warning) = detection.warning {
                    broadcast(&self.watchers, SessionEvent::Warning(warning));
                }
                *self.provider.borrow_mut() = Some(detection.provider.clone());
                detection.provider
            }
        };
        self.attach_listener(&provider);

        let value = provider.request("eth_accounts", json!([])).await?;
        let accounts = parse_accounts(value.as_array().map(Vec::as_slice).unwrap_or_default());
        let Some(address) = accounts.first().copied() else {
            return Ok(None);
        };
        self.set_account(Some(address));

        let chain_id = self.current_chain(&provider).await?;
        self.apply_chain(chain_id);
        Ok(Some(address))
    }

    /// Tears the session down: account cleared, contract watches and the
    /// provider lifecycle listener dropped.
    pub fn disconnect(&self) {
        self.hub.clear();
        if let Some(provider) = self.provider.borrow().clone() {
            provider.clear_listener();
        }
        self.listener_attached.set(false);
        self.set_account(None);
        *self.network.borrow_mut() = None;
        self.set_state(State::Disconnected);
    }

    /// Native balance of the current account.
    pub async fn balance(&self) -> Result<U256, Error> {
        let address = self.account().ok_or(Error::NoSigner)?;
        let provider = self.provider.borrow().clone().ok_or(Error::ProviderNotFound)?;
        let value = provider
            .request("eth_getBalance", json!([address_hex(&address), "latest"]))
            .await?;
        parse_u256(&value).ok_or_else(|| {
            Error::Rpc(RpcError::new(-32700, "eth_getBalance result must be a quantity"))
        })
    }

    /// Asks the wallet to add/switch to a registry-known chain.
    pub async fn switch_network(&self, chain_id: ChainId) -> Result<(), Error> {
        let config = self.registry.resolve(&chain_id)?.clone();
        let provider = self.provider.borrow().clone().ok_or(Error::ProviderNotFound)?;
        self.registry.request_switch(&provider, &config).await
    }

    async fn drive_connect(&self) -> Result<Address, Error> {
        self.set_state(State::Detecting);
        let existing = self.provider.borrow().clone();
        let provider = match existing {
            Some(provider) => provider,
            None => match self.detector.detect().await {
                Ok(detection) => {
                    if let Some(warning) = detection.warning {
                        broadcast(&self.watchers, SessionEvent::Warning(warning));
                    }
                    *self.provider.borrow_mut() = Some(detection.provider.clone());
                    detection.provider
                }
                Err(err) => {
                    self.set_state(State::Error(err.clone()));
                    return Err(err);
                }
            },
        };
        self.attach_listener(&provider);

        self.set_state(State::AwaitingAuthorization);
        let accounts = match provider.request("eth_requestAccounts", json!([])).await {
            Ok(value) => {
                parse_accounts(value.as_array().map(Vec::as_slice).unwrap_or_default())
            }
            Err(err) => return Err(self.fail_authorization(err)),
        };
        let accounts = if accounts.is_empty() {
            debug!("eth_requestAccounts yielded no accounts, trying legacy enable()");
            match provider.enable().await {
                Ok(raw) => {
                    let raw = raw.into_iter().map(Value::String).collect::<Vec<_>>();
                    parse_accounts(&raw)
                }
                Err(err) => return Err(self.fail_authorization(err)),
            }
        } else {
            accounts
        };
        let Some(address) = accounts.first().copied() else {
            self.set_state(State::Disconnected);
            return Err(Error::UserRejected);
        };
        self.set_account(Some(address));

        match self.current_chain(&provider).await {
            Ok(chain_id) => self.apply_chain(chain_id),
            Err(err) => {
                self.set_state(State::Error(err.clone()));
                return Err(err);
            }
        }
        Ok(address)
    }

    fn fail_authorization(&self, err: RpcError) -> Error {
        if err.is_user_rejection() {
            self.set_state(State::Disconnected);
            Error::UserRejected
        } else {
            let err = Error::Rpc(err);
            self.set_state(State::Error(err.clone()));
            err
        }
    }

    async fn current_chain(&self, provider: &ProviderRef) -> Result<ChainId, Error> {
        let value = provider.request("eth_chainId", json!([])).await?;
        let raw = value.as_str().ok_or_else(|| {
            Error::Rpc(RpcError::new(-32700, "eth_chainId result must be a string"))
        })?;
        Ok(raw.parse::<ChainId>()?)
    }

    /// Applies a chain id: `Connected` when the registry knows it,
    /// `WrongNetwork` otherwise.
    fn apply_chain(&self, chain_id: ChainId) {
        match self.registry.resolve(&chain_id) {
            Ok(config) => {
                *self.network.borrow_mut() = Some(config.clone());
                broadcast(&self.watchers, SessionEvent::NetworkChanged(chain_id));
                self.set_state(State::Connected);
            }
            Err(_) => {
                warn!("chain {chain_id} is not in the network registry");
                *self.network.borrow_mut() = None;
                broadcast(&self.watchers, SessionEvent::NetworkChanged(chain_id));
                self.set_state(State::WrongNetwork);
            }
        }
    }

    fn attach_listener(&self, provider: &ProviderRef) {
        if self.listener_attached.get() {
            return;
        }
        provider.set_listener(self.messages.clone());
        self.listener_attached.set(true);
        debug!("provider lifecycle listener attached");
    }

    fn set_state(&self, state: State) {
        *self.state.borrow_mut() = state.clone();
        debug!("connection state -> {state:?}");
        broadcast(&self.watchers, SessionEvent::StateChanged(state));
    }

    fn set_account(&self, account: Option<Address>) {
        *self.account.borrow_mut() = account;
        broadcast(&self.watchers, SessionEvent::AccountChanged(account));
    }

    /// One provider message, applied synchronously in arrival order.
    fn apply(&self, message: ProviderMessage) {
        match message {
            ProviderMessage::Connect { chain_id } => {
                debug!("provider announced connectivity on {chain_id:?}");
            }
            ProviderMessage::Disconnect => {
                debug!("provider reported disconnect");
                self.disconnect();
            }
            ProviderMessage::ChainChanged(chain_id) => {
                let active =
                    matches!(*self.state.borrow(), State::Connected | State::WrongNetwork);
                if active {
                    self.apply_chain(chain_id);
                } else {
                    debug!("ignoring chainChanged({chain_id}) outside an active session");
                }
            }
            ProviderMessage::AccountsChanged(accounts) => {
                let active =
                    matches!(*self.state.borrow(), State::Connected | State::WrongNetwork);
                match accounts.first().copied() {
                    Some(address) => self.set_account(Some(address)),
                    None => {
                        self.set_account(None);
                        if active {
                            self.set_state(State::Disconnected);
                        }
                    }
                }
            }
            ProviderMessage::Log { contract, event, values } => {
                self.hub.deliver(contract, &event, &values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detect::{DetectBackend, Detected, ProviderInfo},
        test_util::{MockBackend, MockProvider},
    };
    use futures::{
        executor::{block_on, LocalPool},
        future,
        task::LocalSpawnExt,
    };
    use std::time::Duration;

    fn holder() -> Address {
        "0x00000000000000000000000000000000000000aa".parse().unwrap()
    }

    fn other() -> Address {
        "0x00000000000000000000000000000000000000bb".parse().unwrap()
    }

    fn session_with(mock: &MockProvider) -> WalletSession {
        let backend = Arc::new(MockBackend::new());
        backend.push_probe(vec![Detected {
            provider: mock.clone().into_ref(),
            info: ProviderInfo { name: "MetaMask".to_string(), rdns: None },
        }]);
        let detector =
            Detector::new(backend as Arc<dyn DetectBackend>, Duration::from_millis(20))
                .with_poll_interval(Duration::from_millis(5));
        let registry = NetworkRegistry::new(vec![
            NetworkConfig::avalanche_testnet(),
            NetworkConfig::polygon_testnet(),
        ]);
        WalletSession::new(registry, detector)
    }

    fn script_happy_connect(mock: &MockProvider) {
        mock.script(
            "eth_requestAccounts",
            Ok(json!(["0x00000000000000000000000000000000000000aa"])),
        );
        mock.script("eth_chainId", Ok(json!("0xa869")));
    }

    #[test]
    fn connect_reaches_connected_with_account_and_network() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);

        let address = block_on(session.connect()).unwrap();
        assert_eq!(address, holder());
        assert_eq!(session.state(), State::Connected);
        assert_eq!(session.account(), Some(holder()));
        assert_eq!(
            session.network().map(|config| config.chain_id),
            Some(ChainId::new(43113))
        );
        assert_eq!(mock.listener_sets(), 1);
    }

    #[test]
    fn concurrent_connects_share_one_authorization_request() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        let release = mock.script_gated("eth_requestAccounts");
        mock.script("eth_chainId", Ok(json!("0xa869")));

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let session = session.clone();
                spawner
                    .spawn_local_with_handle(async move { session.connect().await })
                    .unwrap()
            })
            .collect();

        pool.run_until_stalled();
        assert_eq!(mock.requests_for("eth_requestAccounts"), 1);

        release
            .send(Ok(json!(["0x00000000000000000000000000000000000000aa"])))
            .unwrap();
        let results = pool.run_until(future::join_all(handles));
        assert_eq!(results.len(), 3);
        for result in results {
            assert_eq!(result.unwrap(), holder());
        }
        assert_eq!(mock.requests_for("eth_requestAccounts"), 1);
    }

    #[test]
    fn user_rejection_settles_back_to_disconnected() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        mock.script("eth_requestAccounts", Err(RpcError::new(4001, "User rejected")));

        let result = block_on(session.connect());
        assert_eq!(result.unwrap_err(), Error::UserRejected);
        assert_eq!(session.state(), State::Disconnected);
        assert_eq!(session.account(), None);
    }

    #[test]
    fn missing_provider_settles_into_error_state() {
        let backend = Arc::new(MockBackend::new());
        let detector =
            Detector::new(backend as Arc<dyn DetectBackend>, Duration::from_millis(20))
                .with_poll_interval(Duration::from_millis(5));
        let session =
            WalletSession::new(NetworkRegistry::new(vec![NetworkConfig::avalanche_testnet()]), detector);

        let result = block_on(session.connect());
        assert_eq!(result.unwrap_err(), Error::ProviderNotFound);
        assert_eq!(session.state(), State::Error(Error::ProviderNotFound));
    }

    #[test]
    fn legacy_enable_fallback_engages_on_empty_accounts() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        mock.script("eth_requestAccounts", Ok(json!([])));
        mock.script_enable(Ok(vec!["0x00000000000000000000000000000000000000aa".to_string()]));
        mock.script("eth_chainId", Ok(json!("0xa869")));

        let address = block_on(session.connect()).unwrap();
        assert_eq!(address, holder());
        assert_eq!(mock.enable_count(), 1);
        assert_eq!(session.state(), State::Connected);
    }

    #[test]
    fn empty_accounts_after_fallback_count_as_rejection() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        mock.script("eth_requestAccounts", Ok(json!([])));
        mock.script_enable(Ok(Vec::new()));

        let result = block_on(session.connect());
        assert_eq!(result.unwrap_err(), Error::UserRejected);
        assert_eq!(session.state(), State::Disconnected);
        assert_eq!(mock.enable_count(), 1);
    }

    #[test]
    fn account_updates_are_last_write_wins() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        {
            let session = session.clone();
            spawner.spawn_local(async move { session.run().await }).unwrap();
        }
        let connected = {
            let session = session.clone();
            spawner
                .spawn_local_with_handle(async move { session.connect().await })
                .unwrap()
        };
        pool.run_until(connected).unwrap();

        mock.emit(ProviderMessage::AccountsChanged(vec![holder()]));
        mock.emit(ProviderMessage::AccountsChanged(Vec::new()));
        mock.emit(ProviderMessage::AccountsChanged(vec![other()]));
        pool.run_until_stalled();

        assert_eq!(session.account(), Some(other()));
        // the empty update tore the connection down; the late account
        // arrival does not resurrect it
        assert_eq!(session.state(), State::Disconnected);
    }

    #[test]
    fn unknown_chain_drives_wrong_network_and_recovers() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        {
            let session = session.clone();
            spawner.spawn_local(async move { session.run().await }).unwrap();
        }
        let connected = {
            let session = session.clone();
            spawner
                .spawn_local_with_handle(async move { session.connect().await })
                .unwrap()
        };
        pool.run_until(connected).unwrap();

        mock.emit(ProviderMessage::ChainChanged(ChainId::new(1)));
        pool.run_until_stalled();
        assert_eq!(session.state(), State::WrongNetwork);
        assert_eq!(session.network(), None);

        mock.emit(ProviderMessage::ChainChanged(ChainId::new(80001)));
        pool.run_until_stalled();
        assert_eq!(session.state(), State::Connected);
        assert_eq!(
            session.network().map(|config| config.chain_id),
            Some(ChainId::new(80001))
        );
    }

    #[test]
    fn reconnecting_does_not_reregister_the_lifecycle_listener() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);
        block_on(session.connect()).unwrap();

        script_happy_connect(&mock);
        block_on(session.connect()).unwrap();
        assert_eq!(mock.listener_sets(), 1);
    }

    #[test]
    fn disconnect_clears_account_listeners_and_watches() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);
        block_on(session.connect()).unwrap();

        let contract: Address = "0x00000000000000000000000000000000000000c0".parse().unwrap();
        let spec = provider::EventSpec::new("Deposit", "Deposit(address,uint256,uint256)");
        let _sub = session
            .hub()
            .subscribe(contract, spec, Arc::new(hub::EventPayload::decode_deposit))
            .unwrap();

        session.disconnect();
        assert_eq!(session.state(), State::Disconnected);
        assert_eq!(session.account(), None);
        assert_eq!(session.network(), None);
        assert!(!mock.has_listener());
        assert_eq!(mock.unwatch_calls(contract, "Deposit"), 1);
    }

    #[test]
    fn provider_disconnect_event_tears_the_session_down() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        {
            let session = session.clone();
            spawner.spawn_local(async move { session.run().await }).unwrap();
        }
        let connected = {
            let session = session.clone();
            spawner
                .spawn_local_with_handle(async move { session.connect().await })
                .unwrap()
        };
        pool.run_until(connected).unwrap();

        mock.emit(ProviderMessage::Disconnect);
        pool.run_until_stalled();
        assert_eq!(session.state(), State::Disconnected);
        assert_eq!(session.account(), None);
    }

    #[test]
    fn contract_logs_flow_through_the_dispatcher_to_the_hub() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        {
            let session = session.clone();
            spawner.spawn_local(async move { session.run().await }).unwrap();
        }
        let connected = {
            let session = session.clone();
            spawner
                .spawn_local_with_handle(async move { session.connect().await })
                .unwrap()
        };
        pool.run_until(connected).unwrap();

        let contract: Address = "0x00000000000000000000000000000000000000c0".parse().unwrap();
        let spec = provider::EventSpec::new("Deposit", "Deposit(address,uint256,uint256)");
        let (_handle, mut rx) = session
            .hub()
            .subscribe(contract, spec, Arc::new(hub::EventPayload::decode_deposit))
            .unwrap();

        mock.emit(ProviderMessage::Log {
            contract,
            event: "Deposit".to_string(),
            values: vec![
                json!("0x00000000000000000000000000000000000000aa"),
                json!("100"),
                json!(12345),
            ],
        });
        pool.run_until_stalled();

        assert!(matches!(rx.try_next().unwrap(), Some(hub::HubMessage::Event(_))));
    }

    #[test]
    fn resume_connects_silently_without_a_prompt() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        mock.script(
            "eth_accounts",
            Ok(json!(["0x00000000000000000000000000000000000000aa"])),
        );
        mock.script("eth_chainId", Ok(json!("0xa869")));

        let resumed = block_on(session.resume()).unwrap();
        assert_eq!(resumed, Some(holder()));
        assert_eq!(session.state(), State::Connected);
        assert_eq!(mock.requests_for("eth_requestAccounts"), 0);
    }

    #[test]
    fn resume_without_authorization_stays_disconnected() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        mock.script("eth_accounts", Ok(json!([])));

        let resumed = block_on(session.resume()).unwrap();
        assert_eq!(resumed, None);
        assert_eq!(session.state(), State::Disconnected);
        assert_eq!(session.account(), None);
    }

    #[test]
    fn balance_reads_the_current_account() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);
        block_on(session.connect()).unwrap();

        mock.script("eth_getBalance", Ok(json!("0x2a")));
        let balance = block_on(session.balance()).unwrap();
        assert_eq!(balance, U256::from(42u64));

        session.disconnect();
        assert_eq!(block_on(session.balance()).unwrap_err(), Error::NoSigner);
    }

    #[test]
    fn watchers_observe_the_connect_transition_sequence() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);
        let mut events = session.watch();

        block_on(session.connect()).unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(event)) = events.try_next() {
            seen.push(event);
        }
        assert_eq!(seen.first(), Some(&SessionEvent::StateChanged(State::Detecting)));
        assert!(seen.contains(&SessionEvent::StateChanged(State::AwaitingAuthorization)));
        assert!(seen.contains(&SessionEvent::AccountChanged(Some(holder()))));
        assert!(seen.contains(&SessionEvent::NetworkChanged(ChainId::new(43113))));
        assert_eq!(seen.last(), Some(&SessionEvent::StateChanged(State::Connected)));
    }

    #[test]
    fn switch_network_requires_a_known_chain() {
        let mock = MockProvider::new();
        let session = session_with(&mock);
        script_happy_connect(&mock);
        block_on(session.connect()).unwrap();

        assert_eq!(
            block_on(session.switch_network(ChainId::new(1))).unwrap_err(),
            Error::UnknownNetwork(ChainId::new(1))
        );

        mock.script("wallet_addEthereumChain", Ok(Value::Null));
        block_on(session.switch_network(ChainId::new(80001))).unwrap();
        assert_eq!(mock.requests_for("wallet_addEthereumChain"), 1);
    }
}
