//! Exclusive ownership of the shared audio device
//!
//! Playback and capture never run at the same time. Each side registers a
//! [`DeviceClient`]; acquiring the device for one role asks the other
//! role's client to let go. The request is made after the arbiter's lock
//! is released, so a client may call back into the arbiter.

use std::sync::{Mutex, Weak};

/// Who is using the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Playback,
    Capture,
}

impl DeviceRole {
    pub fn other(self) -> Self {
        match self {
            DeviceRole::Playback => DeviceRole::Capture,
            DeviceRole::Capture => DeviceRole::Playback,
        }
    }
}

/// A party that can be asked to give up the device
pub trait DeviceClient: Send + Sync {
    /// Stop using the device
    ///
    /// Returns once the device is no longer in use, or after a bounded wait.
    /// Called without the arbiter's lock held.
    fn relinquish(&self);
}

#[derive(Default)]
struct ArbiterState {
    owner: Option<DeviceRole>,
    playback: Option<Weak<dyn DeviceClient>>,
    capture: Option<Weak<dyn DeviceClient>>,
}

impl ArbiterState {
    fn client(&self, role: DeviceRole) -> Option<&Weak<dyn DeviceClient>> {
        match role {
            DeviceRole::Playback => self.playback.as_ref(),
            DeviceRole::Capture => self.capture.as_ref(),
        }
    }
}

#[derive(Default)]
pub struct DeviceArbiter {
    state: Mutex<ArbiterState>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client that answers for `role`
    pub fn register(&self, role: DeviceRole, client: Weak<dyn DeviceClient>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match role {
            DeviceRole::Playback => state.playback = Some(client),
            DeviceRole::Capture => state.capture = Some(client),
        }
    }

    /// Take the device for `role`, evicting the other role if it holds it
    ///
    /// Returns the role that was evicted, if any.
    pub fn acquire(&self, role: DeviceRole) -> Option<DeviceRole> {
        let evicted = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let previous = state.owner.replace(role);
            match previous {
                Some(holder) if holder != role => {
                    Some((holder, state.client(holder).and_then(Weak::upgrade)))
                }
                _ => None,
            }
        };

        let (holder, client) = evicted?;
        log::info!("{:?} takes the audio device from {:?}", role, holder);
        if let Some(client) = client {
            client.relinquish();
        }
        Some(holder)
    }

    /// Give the device up if `role` still holds it
    pub fn release(&self, role: DeviceRole) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.owner == Some(role) {
            state.owner = None;
        }
    }

    pub fn owner(&self) -> Option<DeviceRole> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).owner
    }
}
