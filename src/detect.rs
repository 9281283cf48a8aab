use std::{
    cell::{Cell, RefCell},
    sync::Arc,
    time::Duration,
};

use futures::channel::oneshot;
use log::{debug, warn};

use super::{provider::ProviderRef, time, Error};

/// Identity reported by an announcing provider (EIP-6963 shape, as far
/// as injected wallets expose it).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderInfo {
    pub name: String,
    pub rdns: Option<String>,
}

/// One announced provider handle with its claimed identity.
#[derive(Clone)]
pub struct Detected {
    pub provider: ProviderRef,
    pub info: ProviderInfo,
}

/// Synchronous probe for announced providers. The browser backend reads
/// `window.ethereum`; tests script the announcements.
pub trait DetectBackend {
    fn probe(&self) -> Vec<Detected>;
}

/// Outcome of a successful detection. `warning` carries the non-fatal
/// multiple-providers signal when the announcements disagreed on
/// identity; the first handle is used regardless.
#[derive(Clone)]
pub struct Detection {
    pub provider: ProviderRef,
    pub warning: Option<Error>,
}

/// Bounded-wait provider detector. Browser injection is asynchronous and
/// may never arrive, so the wait polls up to a timeout. Overlapping
/// `detect` calls share one in-flight poll loop.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<dyn DetectBackend>,
    timeout: Duration,
    poll: Duration,
    waiters: Arc<RefCell<Vec<oneshot::Sender<Result<Detection, Error>>>>>,
    probing: Arc<Cell<bool>>,
}

impl Detector {
    pub fn new(backend: Arc<dyn DetectBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            poll: Duration::from_millis(100),
            waiters: Arc::new(RefCell::new(Vec::new())),
            probing: Arc::new(Cell::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    pub async fn detect(&self) -> Result<Detection, Error> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut waiters = self.waiters.borrow_mut();
            waiters.push(tx);
            if self.probing.get() {
                false
            } else {
                self.probing.set(true);
                true
            }
        };

        if leader {
            let result = self.poll_until_found().await;
            self.probing.set(false);
            let pending = std::mem::take(&mut *self.waiters.borrow_mut());
            for waiter in pending {
                _ = waiter.send(result.clone());
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ProviderNotFound),
        }
    }

    async fn poll_until_found(&self) -> Result<Detection, Error> {
        let attempts =
            (self.timeout.as_millis() / self.poll.as_millis().max(1)).max(1) as u32;
        for attempt in 0..attempts {
            let mut found = self.backend.probe();
            if !found.is_empty() {
                let warning = identity_warning(&found);
                if let Some(warning) = &warning {
                    warn!("{warning}");
                }
                let first = found.remove(0);
                debug!("wallet provider {:?} detected after {} probes", first.info.name, attempt + 1);
                return Ok(Detection { provider: first.provider, warning });
            }
            if attempt + 1 < attempts {
                time::sleep(self.poll).await;
            }
        }

        Err(Error::ProviderNotFound)
    }
}

fn identity_warning(found: &[Detected]) -> Option<Error> {
    let first = &found[0].info;
    if found.len() > 1 && found.iter().any(|candidate| &candidate.info != first) {
        return Some(Error::MultipleProviders(first.name.clone()));
    }
    None
}
