//! Connectivity Monitor: the online/offline signal that gates sync.
//!
//! The signal comes from platform network events or a manual toggle. It is
//! published on a `watch` channel; the sync worker runs a pass immediately
//! when it flips to online. The last known value is persisted under
//! `chw_connectivity`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::store::{get_setting, keys, set_setting, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
    Unchanged,
}

pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state,
            settings: None,
        }
    }

    /// Restore the last persisted state (online if never saved) and persist
    /// every change from now on.
    pub fn load(settings: Arc<dyn SettingsStore>) -> Self {
        let online = match get_setting::<bool>(settings.as_ref(), keys::CONNECTIVITY) {
            Ok(saved) => saved.unwrap_or(true),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read saved connectivity; assuming online");
                true
            }
        };
        let mut monitor = Self::new(online);
        monitor.settings = Some(settings);
        monitor
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receivers are notified only when the value actually changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn set_online(&self, online: bool) -> Transition {
        let mut previous = online;
        self.state.send_if_modified(|current| {
            previous = *current;
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        let transition = match (previous, online) {
            (false, true) => Transition::CameOnline,
            (true, false) => Transition::WentOffline,
            _ => Transition::Unchanged,
        };
        if transition == Transition::Unchanged {
            return transition;
        }

        tracing::info!(online, "Connectivity changed");
        if let Some(settings) = &self.settings {
            if let Err(e) = set_setting(settings.as_ref(), keys::CONNECTIVITY, &online) {
                tracing::warn!(error = %e, "Failed to save connectivity state");
            }
        }
        transition
    }

    /// Manual online/offline switch.
    pub fn toggle(&self) -> Transition {
        self.set_online(!self.is_online())
    }
}
