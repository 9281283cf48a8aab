use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use ethers::{abi::Token, types::Address};
use futures::channel::{mpsc::UnboundedSender, oneshot};
use serde_json::Value;

use super::{
    detect::{DetectBackend, Detected},
    provider::{EventSpec, Provider, ProviderMessage, ProviderRef, RpcError},
};

type Scripted = Result<Value, RpcError>;

enum Response {
    Ready(Scripted),
    Gated(oneshot::Receiver<Scripted>),
}

#[derive(Default)]
struct Inner {
    requests: RefCell<Vec<(String, Value)>>,
    scripted_requests: RefCell<HashMap<String, VecDeque<Response>>>,
    scripted_calls: RefCell<HashMap<String, VecDeque<Response>>>,
    scripted_sends: RefCell<HashMap<String, VecDeque<Scripted>>>,
    scripted_enables: RefCell<VecDeque<Result<Vec<String>, RpcError>>>,
    call_counts: RefCell<HashMap<String, usize>>,
    sends: RefCell<Vec<(Address, Address, String)>>,
    enables: Cell<usize>,
    watch_counts: RefCell<HashMap<(Address, String), usize>>,
    unwatch_counts: RefCell<HashMap<(Address, String), usize>>,
    listener: RefCell<Option<UnboundedSender<ProviderMessage>>>,
    listener_sets: Cell<usize>,
}

/// Scripted provider double. Each method pops the next scripted response
/// for its key; unscripted requests fail loudly so tests state their
/// expectations up front.
#[derive(Clone, Default)]
pub(crate) struct MockProvider {
    inner: Arc<Inner>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> ProviderRef {
        Arc::new(self)
    }

    pub fn script(&self, method: &str, response: Scripted) {
        self.inner
            .scripted_requests
            .borrow_mut()
            .entry(method.to_string())
            .or_default()
            .push_back(Response::Ready(response));
    }

    /// Scripts a request that stays in flight until the returned sender
    /// resolves it.
    pub fn script_gated(&self, method: &str) -> oneshot::Sender<Scripted> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .scripted_requests
            .borrow_mut()
            .entry(method.to_string())
            .or_default()
            .push_back(Response::Gated(rx));
        tx
    }

    pub fn script_call(&self, signature: &str, response: Scripted) {
        self.inner
            .scripted_calls
            .borrow_mut()
            .entry(signature.to_string())
            .or_default()
            .push_back(Response::Ready(response));
    }

    /// Scripts a call that stays in flight until the returned sender
    /// resolves it. Lets tests overlap reads deterministically.
    pub fn script_call_gated(&self, signature: &str) -> oneshot::Sender<Scripted> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .scripted_calls
            .borrow_mut()
            .entry(signature.to_string())
            .or_default()
            .push_back(Response::Gated(rx));
        tx
    }

    pub fn script_send(&self, signature: &str, response: Scripted) {
        self.inner
            .scripted_sends
            .borrow_mut()
            .entry(signature.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_enable(&self, response: Result<Vec<String>, RpcError>) {
        self.inner.scripted_enables.borrow_mut().push_back(response);
    }

    pub fn requests_for(&self, method: &str) -> usize {
        self.inner.requests.borrow().iter().filter(|(m, _)| m == method).count()
    }

    pub fn call_count(&self, signature: &str) -> usize {
        self.inner.call_counts.borrow().get(signature).copied().unwrap_or(0)
    }

    pub fn send_count(&self) -> usize {
        self.inner.sends.borrow().len()
    }

    pub fn last_send_from(&self) -> Option<Address> {
        self.inner.sends.borrow().last().map(|(from, _, _)| *from)
    }

    pub fn enable_count(&self) -> usize {
        self.inner.enables.get()
    }

    pub fn watch_calls(&self, contract: Address, event: &str) -> usize {
        self.inner
            .watch_counts
            .borrow()
            .get(&(contract, event.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn unwatch_calls(&self, contract: Address, event: &str) -> usize {
        self.inner
            .unwatch_counts
            .borrow()
            .get(&(contract, event.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_listener(&self) -> bool {
        self.inner.listener.borrow().is_some()
    }

    pub fn listener_sets(&self) -> usize {
        self.inner.listener_sets.get()
    }

    /// Pushes a provider message at the attached listener, as the wallet
    /// would.
    pub fn emit(&self, message: ProviderMessage) {
        let listener = self.inner.listener.borrow();
        let tx = listener.as_ref().expect("a lifecycle listener is attached");
        tx.unbounded_send(message).expect("session dispatcher is alive");
    }

    async fn resolve(response: Response) -> Scripted {
        match response {
            Response::Ready(result) => result,
            Response::Gated(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RpcError::new(-32603, "gated response dropped"))),
        }
    }
}

#[async_trait(?Send)]
impl Provider for MockProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.inner.requests.borrow_mut().push((method.to_string(), params));
        let next = self
            .inner
            .scripted_requests
            .borrow_mut()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match next {
            Some(response) => Self::resolve(response).await,
            None => Err(RpcError::new(-32601, format!("unscripted method {method}"))),
        }
    }

    async fn enable(&self) -> Result<Vec<String>, RpcError> {
        self.inner.enables.set(self.inner.enables.get() + 1);
        self.inner
            .scripted_enables
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn set_listener(&self, tx: UnboundedSender<ProviderMessage>) {
        self.inner.listener_sets.set(self.inner.listener_sets.get() + 1);
        *self.inner.listener.borrow_mut() = Some(tx);
    }

    fn clear_listener(&self) {
        *self.inner.listener.borrow_mut() = None;
    }

    async fn call(
        &self,
        _to: Address,
        signature: &str,
        _args: &[Token],
    ) -> Result<Value, RpcError> {
        *self.inner.call_counts.borrow_mut().entry(signature.to_string()).or_default() += 1;
        let next = self
            .inner
            .scripted_calls
            .borrow_mut()
            .get_mut(signature)
            .and_then(VecDeque::pop_front);
        match next {
            Some(response) => Self::resolve(response).await,
            None => Err(RpcError::new(-32601, format!("unscripted call {signature}"))),
        }
    }

    async fn send(
        &self,
        from: Address,
        to: Address,
        signature: &str,
        _args: &[Token],
    ) -> Result<Value, RpcError> {
        self.inner.sends.borrow_mut().push((from, to, signature.to_string()));
        let next = self
            .inner
            .scripted_sends
            .borrow_mut()
            .get_mut(signature)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Err(RpcError::new(-32601, format!("unscripted send {signature}"))))
    }

    fn watch(&self, contract: Address, event: &EventSpec) -> Result<(), RpcError> {
        *self
            .inner
            .watch_counts
            .borrow_mut()
            .entry((contract, event.name.clone()))
            .or_default() += 1;
        Ok(())
    }

    fn unwatch(&self, contract: Address, event_name: &str) -> Result<(), RpcError> {
        *self
            .inner
            .unwatch_counts
            .borrow_mut()
            .entry((contract, event_name.to_string()))
            .or_default() += 1;
        Ok(())
    }
}

/// Scripted detection backend. Probes pop queued announcements; an empty
/// queue announces nothing.
#[derive(Default)]
pub(crate) struct MockBackend {
    probes: Cell<usize>,
    queued: RefCell<VecDeque<Vec<Detected>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_probe(&self, announced: Vec<Detected>) {
        self.queued.borrow_mut().push_back(announced);
    }

    pub fn probes(&self) -> usize {
        self.probes.get()
    }
}

impl DetectBackend for MockBackend {
    fn probe(&self) -> Vec<Detected> {
        self.probes.set(self.probes.get() + 1);
        self.queued.borrow_mut().pop_front().unwrap_or_default()
    }
}
