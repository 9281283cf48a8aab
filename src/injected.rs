use std::{cell::RefCell, collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    abi::{self, HumanReadableParser, ParamType, Token},
    types::{Address, H256},
    utils::{hex, id, keccak256},
};
use futures::channel::mpsc::UnboundedSender;
use js_sys::{Array, Function, Promise, Reflect};
use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};

use super::{
    detect::{DetectBackend, Detected, Detector, ProviderInfo},
    network::ChainId,
    provider::{address_hex, token_value, EventSpec, Provider, ProviderMessage, RpcError},
};

/// Detector over the browser's injected provider, polling for the
/// asynchronous `window.ethereum` announcement.
pub fn injected_detector(timeout: Duration) -> Detector {
    Detector::new(Arc::new(InjectedBackend), timeout)
}

/// Probes `window.ethereum`, unfolding the `providers` multiplex array
/// some extensions install when several wallets coexist.
pub struct InjectedBackend;

impl DetectBackend for InjectedBackend {
    fn probe(&self) -> Vec<Detected> {
        let Some(ethereum) = window_ethereum() else {
            return Vec::new();
        };

        let mut found = Vec::new();
        if let Ok(list) = Reflect::get(&ethereum, &JsValue::from_str("providers")) {
            if Array::is_array(&list) {
                for value in Array::from(&list).iter() {
                    found.push(detected_from(value));
                }
            }
        }
        if found.is_empty() {
            found.push(detected_from(ethereum));
        }
        found
    }
}

fn window_ethereum() -> Option<JsValue> {
    let window: JsValue = gloo_utils::window().into();
    let value = Reflect::get(&window, &JsValue::from_str("ethereum")).ok()?;
    if value.is_null() || value.is_undefined() {
        return None;
    }
    Some(value)
}

fn detected_from(raw: JsValue) -> Detected {
    let info = provider_info(&raw);
    Detected { provider: Arc::new(InjectedProvider::new(raw)), info }
}

fn provider_info(raw: &JsValue) -> ProviderInfo {
    let flag = |key: &str| {
        Reflect::get(raw, &JsValue::from_str(key))
            .ok()
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    };
    let name = if flag("isMetaMask") {
        "MetaMask"
    } else if flag("isCoinbaseWallet") {
        "Coinbase Wallet"
    } else if flag("isBraveWallet") {
        "Brave Wallet"
    } else {
        "Unknown"
    };
    let rdns = Reflect::get(raw, &JsValue::from_str("rdns"))
        .ok()
        .and_then(|value| value.as_string());
    ProviderInfo { name: name.to_string(), rdns }
}

#[derive(Default)]
struct Hooks {
    connect: Option<Closure<dyn FnMut(JsValue)>>,
    disconnect: Option<Closure<dyn FnMut(JsValue)>>,
    chain_changed: Option<Closure<dyn FnMut(JsValue)>>,
    accounts_changed: Option<Closure<dyn FnMut(JsValue)>>,
    message: Option<Closure<dyn FnMut(JsValue)>>,
}

struct WatchEntry {
    topic0: H256,
    params: Vec<ParamType>,
    subscription: Option<String>,
}

struct Inner {
    raw: JsValue,
    listener: RefCell<Option<UnboundedSender<ProviderMessage>>>,
    hooks: RefCell<Hooks>,
    watches: RefCell<HashMap<(Address, String), WatchEntry>>,
}

/// EIP-1193 adapter over an injected provider object.
pub struct InjectedProvider {
    inner: Arc<Inner>,
}

impl InjectedProvider {
    pub fn new(raw: JsValue) -> Self {
        Self {
            inner: Arc::new(Inner {
                raw,
                listener: RefCell::new(None),
                hooks: RefCell::new(Hooks::default()),
                watches: RefCell::new(HashMap::new()),
            }),
        }
    }

    fn ensure_message_hook(&self) {
        let mut hooks = self.inner.hooks.borrow_mut();
        if hooks.message.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let message = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            if let Err(err) = handle_subscription_message(&inner, value) {
                debug!("dropping undecodable subscription message: {err}");
            }
        });
        register(&self.inner.raw, "message", &message);
        hooks.message = Some(message);
    }
}

#[async_trait(?Send)]
impl Provider for InjectedProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        raw_request(&self.inner.raw, method, &params).await
    }

    async fn enable(&self) -> Result<Vec<String>, RpcError> {
        let enable_fn = provider_fn(&self.inner.raw, "enable")
            .ok_or_else(|| RpcError::new(-32601, "provider does not expose enable"))?;
        let promise = enable_fn
            .call0(&self.inner.raw)
            .map_err(js_rpc_error)?
            .dyn_into::<Promise>()
            .map_err(|_| RpcError::new(-32603, "enable did not return a promise"))?;
        let result = JsFuture::from(promise).await.map_err(js_rpc_error)?;
        serde_wasm_bindgen::from_value(result)
            .map_err(|err| RpcError::new(-32700, format!("failed to decode enable result: {err}")))
    }

    fn set_listener(&self, tx: UnboundedSender<ProviderMessage>) {
        *self.inner.listener.borrow_mut() = Some(tx);

        let mut hooks = self.inner.hooks.borrow_mut();
        if hooks.accounts_changed.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let connect = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            let chain_id = Reflect::get(&value, &JsValue::from_str("chainId"))
                .ok()
                .and_then(js_chain_id);
            notify(&inner, ProviderMessage::Connect { chain_id });
        });
        register(&self.inner.raw, "connect", &connect);
        hooks.connect = Some(connect);

        let inner = self.inner.clone();
        let disconnect = Closure::<dyn FnMut(JsValue)>::new(move |_value: JsValue| {
            notify(&inner, ProviderMessage::Disconnect);
        });
        register(&self.inner.raw, "disconnect", &disconnect);
        hooks.disconnect = Some(disconnect);

        let inner = self.inner.clone();
        let chain_changed = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            match js_chain_id(value) {
                Some(chain_id) => notify(&inner, ProviderMessage::ChainChanged(chain_id)),
                None => warn!("ignoring chainChanged with an undecodable chain id"),
            }
        });
        register(&self.inner.raw, "chainChanged", &chain_changed);
        hooks.chain_changed = Some(chain_changed);

        let inner = self.inner.clone();
        let accounts_changed = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            let mut accounts = Vec::new();
            if Array::is_array(&value) {
                for item in Array::from(&value).iter() {
                    if let Some(raw) = item.as_string() {
                        if let Ok(address) = raw.parse::<Address>() {
                            accounts.push(address);
                        }
                    }
                }
            }
            notify(&inner, ProviderMessage::AccountsChanged(accounts));
        });
        register(&self.inner.raw, "accountsChanged", &accounts_changed);
        hooks.accounts_changed = Some(accounts_changed);
    }

    fn clear_listener(&self) {
        *self.inner.listener.borrow_mut() = None;
        let mut hooks = self.inner.hooks.borrow_mut();
        let registered = [
            ("connect", hooks.connect.take()),
            ("disconnect", hooks.disconnect.take()),
            ("chainChanged", hooks.chain_changed.take()),
            ("accountsChanged", hooks.accounts_changed.take()),
        ];
        for (event, hook) in registered {
            if let Some(hook) = hook {
                unregister(&self.inner.raw, event, &hook);
            }
        }
    }

    async fn call(&self, to: Address, signature: &str, args: &[Token]) -> Result<Value, RpcError> {
        let data = calldata(signature, args);
        let params = json!([{ "to": address_hex(&to), "data": data }, "latest"]);
        raw_request(&self.inner.raw, "eth_call", &params).await
    }

    async fn send(
        &self,
        from: Address,
        to: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<Value, RpcError> {
        let data = calldata(signature, args);
        let params = json!([{
            "from": address_hex(&from),
            "to": address_hex(&to),
            "data": data,
        }]);
        raw_request(&self.inner.raw, "eth_sendTransaction", &params).await
    }

    fn watch(&self, contract: Address, event: &EventSpec) -> Result<(), RpcError> {
        let parsed = HumanReadableParser::parse_event(&format!("event {}", event.signature))
            .map_err(|err| RpcError::new(-32602, format!("invalid event signature: {err}")))?;
        let params = parsed.inputs.iter().map(|input| input.kind.clone()).collect();
        let topic0 = H256::from(keccak256(event.signature.as_bytes()));

        self.ensure_message_hook();
        let key = (contract, event.name.clone());
        self.inner
            .watches
            .borrow_mut()
            .insert(key.clone(), WatchEntry { topic0, params, subscription: None });

        let inner = self.inner.clone();
        spawn_local(async move {
            let params =
                json!(["logs", { "address": address_hex(&key.0), "topics": [format!("{topic0:?}")] }]);
            match raw_request(&inner.raw, "eth_subscribe", &params).await {
                Ok(Value::String(subscription)) => {
                    if let Some(entry) = inner.watches.borrow_mut().get_mut(&key) {
                        entry.subscription = Some(subscription);
                    }
                }
                Ok(other) => warn!("eth_subscribe returned an unexpected id: {other}"),
                Err(err) => error!("eth_subscribe failed for {}: {err}", key.1),
            }
        });
        Ok(())
    }

    fn unwatch(&self, contract: Address, event_name: &str) -> Result<(), RpcError> {
        let entry =
            self.inner.watches.borrow_mut().remove(&(contract, event_name.to_string()));
        let Some(WatchEntry { subscription: Some(subscription), .. }) = entry else {
            return Ok(());
        };

        let inner = self.inner.clone();
        spawn_local(async move {
            if let Err(err) =
                raw_request(&inner.raw, "eth_unsubscribe", &json!([subscription])).await
            {
                warn!("eth_unsubscribe failed: {err}");
            }
        });
        Ok(())
    }
}

#[derive(Deserialize)]
struct SubscriptionNotice {
    #[serde(rename = "type")]
    kind: String,
    data: SubscriptionData,
}

#[derive(Deserialize)]
struct SubscriptionData {
    subscription: String,
    result: LogResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogResult {
    address: Address,
    topics: Vec<H256>,
    data: String,
}

fn handle_subscription_message(inner: &Arc<Inner>, value: JsValue) -> Result<(), RpcError> {
    let notice: SubscriptionNotice = serde_wasm_bindgen::from_value(value)
        .map_err(|err| RpcError::new(-32700, format!("{err}")))?;
    if notice.kind != "eth_subscription" {
        return Ok(());
    }

    let log = notice.data.result;
    let message = {
        let watches = inner.watches.borrow();
        let matched = watches.iter().find(|((address, _), entry)| {
            entry.subscription.as_deref() == Some(notice.data.subscription.as_str())
                || (*address == log.address && log.topics.first() == Some(&entry.topic0))
        });
        let Some(((contract, name), entry)) = matched else {
            return Ok(());
        };

        let bytes = hex::decode(log.data.trim_start_matches("0x"))
            .map_err(|err| RpcError::new(-32700, format!("log data is not hex: {err}")))?;
        let tokens = abi::decode(&entry.params, &bytes)
            .map_err(|err| RpcError::new(-32700, format!("log data does not decode: {err}")))?;
        let values = tokens.iter().map(token_value).collect();
        ProviderMessage::Log { contract: *contract, event: name.clone(), values }
    };
    notify(inner, message);
    Ok(())
}

async fn raw_request(raw: &JsValue, method: &str, params: &Value) -> Result<Value, RpcError> {
    let request_fn = provider_fn(raw, "request")
        .ok_or_else(|| RpcError::new(-32601, "provider does not expose request"))?;

    let payload = serde_wasm_bindgen::to_value(&json!({ "method": method, "params": params }))
        .map_err(|err| RpcError::new(-32700, format!("failed to encode request: {err}")))?;
    let promise = request_fn
        .call1(raw, &payload)
        .map_err(js_rpc_error)?
        .dyn_into::<Promise>()
        .map_err(|_| RpcError::new(-32603, "provider request did not return a promise"))?;
    let result = JsFuture::from(promise).await.map_err(js_rpc_error)?;
    serde_wasm_bindgen::from_value(result)
        .map_err(|err| RpcError::new(-32700, format!("failed to decode response: {err}")))
}

fn calldata(signature: &str, args: &[Token]) -> String {
    format!("0x{}{}", hex::encode(id(signature)), hex::encode(abi::encode(args)))
}

fn provider_fn(raw: &JsValue, key: &str) -> Option<Function> {
    Reflect::get(raw, &JsValue::from_str(key))
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
}

fn register(raw: &JsValue, event: &str, hook: &Closure<dyn FnMut(JsValue)>) {
    let Some(on) = provider_fn(raw, "on").or_else(|| provider_fn(raw, "addListener")) else {
        warn!("provider does not expose on/addListener");
        return;
    };
    if let Err(err) = on.call2(raw, &JsValue::from_str(event), hook.as_ref().unchecked_ref()) {
        error!("failed to register {event} handler: {err:?}");
    }
}

fn unregister(raw: &JsValue, event: &str, hook: &Closure<dyn FnMut(JsValue)>) {
    let Some(off) = provider_fn(raw, "removeListener").or_else(|| provider_fn(raw, "off"))
    else {
        return;
    };
    if let Err(err) = off.call2(raw, &JsValue::from_str(event), hook.as_ref().unchecked_ref()) {
        error!("failed to deregister {event} handler: {err:?}");
    }
}

fn notify(inner: &Arc<Inner>, message: ProviderMessage) {
    if let Some(tx) = inner.listener.borrow().as_ref() {
        _ = tx.unbounded_send(message);
    }
}

fn js_chain_id(value: JsValue) -> Option<ChainId> {
    if let Some(raw) = value.as_string() {
        return raw.parse().ok();
    }
    value.as_f64().map(|number| ChainId::new(number as u64))
}
