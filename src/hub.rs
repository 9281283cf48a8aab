use std::{
    cell::{Cell, RefCell},
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use ethers::types::{Address, U256};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::{debug, warn};
use serde_json::Value;

use super::{
    event::{broadcast, SessionEvent},
    provider::{EventSpec, ProviderRef},
    Error,
};

/// A single event occurrence failed to decode. The underlying listener
/// keeps operating; the failure is reported once to every subscriber.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to decode {event_name} event: {reason}")]
pub struct DecodeError {
    pub event_name: String,
    pub reason: String,
    pub raw: Value,
}

impl DecodeError {
    pub fn new(event_name: &str, reason: &str, raw: &[Value]) -> Self {
        Self {
            event_name: event_name.to_string(),
            reason: reason.to_string(),
            raw: Value::Array(raw.to_vec()),
        }
    }
}

/// Decoded contract event, arguments in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Deposit { address: Address, amount: U256, time: U256 },
    Withdraw { address: Address, amount: U256, time: U256 },
}

impl EventPayload {
    pub fn decode_deposit(values: &[Value]) -> Result<Self, DecodeError> {
        let (address, amount, time) = decode_amount_time("Deposit", values)?;
        Ok(Self::Deposit { address, amount, time })
    }

    pub fn decode_withdraw(values: &[Value]) -> Result<Self, DecodeError> {
        let (address, amount, time) = decode_amount_time("Withdraw", values)?;
        Ok(Self::Withdraw { address, amount, time })
    }
}

fn decode_amount_time(
    event_name: &str,
    values: &[Value],
) -> Result<(Address, U256, U256), DecodeError> {
    let [address, amount, time] = values else {
        return Err(DecodeError::new(event_name, "expected 3 arguments", values));
    };
    let address = address
        .as_str()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| DecodeError::new(event_name, "argument 0 is not an address", values))?;
    let amount = parse_u256(amount)
        .ok_or_else(|| DecodeError::new(event_name, "argument 1 is not an amount", values))?;
    let time = parse_u256(time)
        .ok_or_else(|| DecodeError::new(event_name, "argument 2 is not a timestamp", values))?;
    Ok((address, amount, time))
}

pub(crate) fn parse_u256(value: &Value) -> Option<U256> {
    match value {
        Value::String(raw) => {
            if let Some(hex) = raw.strip_prefix("0x") {
                U256::from_str_radix(hex, 16).ok()
            } else {
                U256::from_dec_str(raw).ok()
            }
        }
        Value::Number(number) => number.as_u64().map(U256::from),
        _ => None,
    }
}

/// What a subscriber receives for each underlying occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Event(EventPayload),
    DecodeFailed(DecodeError),
}

pub type Decoder = Arc<dyn Fn(&[Value]) -> Result<EventPayload, DecodeError>>;

#[derive(Clone)]
pub struct SubscriptionHandle {
    pub contract: Address,
    pub event_name: String,
    id: u64,
}

struct Broadcaster {
    decoder: Decoder,
    subscribers: Vec<(u64, UnboundedSender<HubMessage>)>,
}

/// Fan-out hub for contract events. Holds at most one underlying
/// provider listener per `(contract, event)` pair regardless of the
/// number of logical subscribers, and deregisters it when the last
/// subscriber goes away.
#[derive(Clone)]
pub struct EventHub {
    provider: Arc<RefCell<Option<ProviderRef>>>,
    entries: Arc<RefCell<HashMap<(Address, String), Broadcaster>>>,
    next_id: Arc<Cell<u64>>,
    watchers: Arc<RefCell<Vec<UnboundedSender<SessionEvent>>>>,
}

impl EventHub {
    pub(crate) fn new(
        provider: Arc<RefCell<Option<ProviderRef>>>,
        watchers: Arc<RefCell<Vec<UnboundedSender<SessionEvent>>>>,
    ) -> Self {
        Self {
            provider,
            entries: Arc::new(RefCell::new(HashMap::new())),
            next_id: Arc::new(Cell::new(0)),
            watchers,
        }
    }

    /// Registers a logical subscriber. The first subscriber for a pair
    /// registers the one underlying listener; the whole section runs
    /// without suspension.
    pub fn subscribe(
        &self,
        contract: Address,
        spec: EventSpec,
        decoder: Decoder,
    ) -> Result<(SubscriptionHandle, UnboundedReceiver<HubMessage>), Error> {
        let provider = self.provider.borrow().clone().ok_or(Error::ProviderNotFound)?;
        let (tx, rx) = mpsc::unbounded();
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let key = (contract, spec.name.clone());
        let count = {
            let mut entries = self.entries.borrow_mut();
            match entries.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let subscribers = &mut occupied.get_mut().subscribers;
                    subscribers.push((id, tx));
                    subscribers.len()
                }
                Entry::Vacant(vacant) => {
                    provider.watch(contract, &spec)?;
                    vacant.insert(Broadcaster { decoder, subscribers: vec![(id, tx)] });
                    1
                }
            }
        };

        debug!("subscribed to {} on {contract:?}, {count} active", spec.name);
        broadcast(
            &self.watchers,
            SessionEvent::SubscriberCount { contract, event: key.1.clone(), count },
        );
        Ok((SubscriptionHandle { contract, event_name: key.1, id }, rx))
    }

    /// Drops a logical subscriber; deregisters the underlying listener
    /// when the count reaches zero. Unsubscribing a dead handle is a
    /// no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let key = (handle.contract, handle.event_name.clone());
        let remaining = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&key) else { return };
            let before = entry.subscribers.len();
            entry.subscribers.retain(|(id, _)| *id != handle.id);
            if entry.subscribers.len() == before {
                return;
            }
            let remaining = entry.subscribers.len();
            if remaining == 0 {
                entries.remove(&key);
            }
            remaining
        };

        if remaining == 0 {
            if let Some(provider) = self.provider.borrow().clone() {
                if let Err(err) = provider.unwatch(handle.contract, &handle.event_name) {
                    warn!("failed to deregister {} listener: {err}", handle.event_name);
                }
            }
        }
        debug!("unsubscribed from {} on {:?}, {remaining} active", handle.event_name, handle.contract);
        broadcast(
            &self.watchers,
            SessionEvent::SubscriberCount {
                contract: handle.contract,
                event: handle.event_name.clone(),
                count: remaining,
            },
        );
    }

    /// Decodes one raw occurrence and notifies every current subscriber
    /// in subscription order. Called by the session dispatcher.
    pub(crate) fn deliver(&self, contract: Address, event: &str, values: &[Value]) {
        let key = (contract, event.to_string());
        let (decoder, subscribers) = {
            let entries = self.entries.borrow();
            let Some(entry) = entries.get(&key) else {
                debug!("dropping {event} occurrence with no subscribers");
                return;
            };
            (entry.decoder.clone(), entry.subscribers.clone())
        };

        let message = match decoder(values) {
            Ok(payload) => HubMessage::Event(payload),
            Err(err) => {
                warn!("{err}");
                broadcast(&self.watchers, SessionEvent::DecodeFailed(err.clone()));
                HubMessage::DecodeFailed(err)
            }
        };
        for (_, tx) in &subscribers {
            _ = tx.unbounded_send(message.clone());
        }
    }

    /// Drops every subscription together with its underlying listener.
    pub(crate) fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let Some(provider) = self.provider.borrow().clone() else { return };
        for ((contract, event_name), _) in entries {
            if let Err(err) = provider.unwatch(contract, &event_name) {
                warn!("failed to deregister {event_name} listener: {err}");
            }
        }
    }
}
