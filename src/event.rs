use std::cell::RefCell;

use ethers::types::Address;
use futures::channel::mpsc::UnboundedSender;

use super::{hub::DecodeError, network::ChainId, Error, State};

/// Session-level event pushed to every watcher: state and account
/// changes for UI consumers, plus the observability signals a
/// logging/metrics collaborator consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(State),
    AccountChanged(Option<Address>),
    NetworkChanged(ChainId),
    SubscriberCount { contract: Address, event: String, count: usize },
    DecodeFailed(DecodeError),
    Warning(Error),
}

/// Delivers to every live watcher, dropping the ones whose receiver is
/// gone.
pub(crate) fn broadcast(
    watchers: &RefCell<Vec<UnboundedSender<SessionEvent>>>,
    event: SessionEvent,
) {
    watchers.borrow_mut().retain(|tx| tx.unbounded_send(event.clone()).is_ok());
}
