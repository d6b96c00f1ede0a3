use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    action::Action,
    roster::{default_roster, RosterSource},
    storage::{PersistenceBridge, Slice},
    store::{Dispatcher, Store, StoreHandle},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RosterOrigin {
    Remote,
    Fallback,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HydrationReport {
    pub roster: RosterOrigin,
    pub restored: Vec<Slice>,
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Everything one hydration run needs, detached from the `Store` borrow so the
/// run can outlive the caller's stack frame and still stop when the store goes.
struct Hydration {
    handle: StoreHandle,
    roster: Arc<dyn RosterSource>,
    persistence: Option<PersistenceBridge>,
    auto_select_limit: usize,
    shutdown: watch::Receiver<bool>,
}

impl Hydration {
    async fn run(self) -> HydrationReport {
        let (roster, restored) = tokio::join!(self.hydrate_roster(), self.hydrate_local());
        info!(roster = ?roster, restored = restored.len(), "hydration finished");
        HydrationReport { roster, restored }
    }

    async fn hydrate_roster(&self) -> RosterOrigin {
        if *self.shutdown.borrow() {
            return RosterOrigin::Cancelled;
        }

        let fetched = tokio::select! {
            result = self.roster.fetch_roster() => result,
            _ = wait_for_shutdown(self.shutdown.clone()) => return RosterOrigin::Cancelled,
        };

        let (advisors, origin) = match fetched {
            Ok(advisors) => (advisors, RosterOrigin::Remote),
            Err(error) => {
                warn!(error = %error, "advisor roster fetch failed, using built-in panel");
                (default_roster(), RosterOrigin::Fallback)
            }
        };

        let selected = advisors
            .iter()
            .take(self.auto_select_limit)
            .cloned()
            .collect();
        let applied = self
            .handle
            .dispatch(Action::SetAdvisors(advisors))
            .and_then(|_| self.handle.dispatch(Action::SelectAdvisors(selected)));
        match applied {
            Ok(_) => origin,
            Err(_) => RosterOrigin::Cancelled,
        }
    }

    async fn hydrate_local(&self) -> Vec<Slice> {
        if *self.shutdown.borrow() {
            return Vec::new();
        }
        let Some(persistence) = self.persistence.clone() else {
            return Vec::new();
        };

        let loaded = tokio::select! {
            loaded = tokio::task::spawn_blocking(move || persistence.load()) => loaded,
            _ = wait_for_shutdown(self.shutdown.clone()) => return Vec::new(),
        };
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(error = %error, "local restore task failed");
                return Vec::new();
            }
        };

        match self.handle.dispatch(Action::LoadUserData(loaded.fragment)) {
            Ok(_) => loaded.restored,
            Err(_) => Vec::new(),
        }
    }
}

impl Store {
    fn hydration(&self) -> Hydration {
        Hydration {
            handle: self.handle(),
            roster: self.inner.roster.clone(),
            persistence: self.inner.persistence.clone(),
            auto_select_limit: self.inner.config.auto_select_limit,
            shutdown: self.inner.shutdown.subscribe(),
        }
    }

    /// One-shot startup hydration. The roster fetch and the local restore run
    /// side by side; neither waits on nor fails because of the other.
    pub async fn hydrate(&self) -> HydrationReport {
        self.hydration().run().await
    }

    /// Runs hydration on the tokio runtime. The task holds no strong reference
    /// to the store: disposing or dropping the store cancels whatever is still
    /// in flight and nothing is dispatched afterwards.
    pub fn spawn_hydration(&self) -> JoinHandle<HydrationReport> {
        tokio::spawn(self.hydration().run())
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin};

    use anyhow::Result;

    use super::*;
    use crate::{
        config::StoreConfig,
        models::{Advisor, Document, DocumentStatus, Settings},
        roster::{RosterSource, StaticRoster},
        storage::{KeyValueStore, MemoryStore, PersistenceBridge},
    };

    struct FailingRoster;

    impl RosterSource for FailingRoster {
        fn fetch_roster<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>> {
            Box::pin(async { Err(anyhow::anyhow!("backend unreachable")) })
        }
    }

    struct PendingRoster;

    impl RosterSource for PendingRoster {
        fn fetch_roster<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>> {
            Box::pin(std::future::pending::<Result<Vec<Advisor>>>())
        }
    }

    fn advisors(ids: &[&str]) -> Vec<Advisor> {
        ids.iter()
            .map(|id| Advisor {
                id: id.to_string(),
                name: id.to_string(),
                ..Advisor::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn remote_roster_auto_selects_prefix() {
        let store = Store::create(
            StoreConfig::default(),
            None,
            Arc::new(StaticRoster::new(advisors(&["a", "b", "c", "d"]))),
        );

        let report = store.hydrate().await;
        let state = store.state();

        assert_eq!(report.roster, RosterOrigin::Remote);
        assert_eq!(state.advisors.len(), 4);
        let selected: Vec<String> = state
            .selected_advisors()
            .into_iter()
            .map(|advisor| advisor.id.clone())
            .collect();
        assert_eq!(selected, vec!["a", "b", "c"]);
        assert!(!state.advisors_loading);
    }

    #[tokio::test]
    async fn roster_failure_falls_back_and_local_restore_still_runs() {
        let memory = Arc::new(MemoryStore::new());
        let docs = vec![Document::new("d1", "plan.pdf", DocumentStatus::Ready)];
        memory
            .set("documents", &serde_json::to_string(&docs).unwrap())
            .unwrap();
        memory.set("settings", "{not json").unwrap();

        let store = Store::create(
            StoreConfig::default(),
            Some(PersistenceBridge::new(memory)),
            Arc::new(FailingRoster),
        );

        let report = store.hydrate().await;
        let state = store.state();

        assert_eq!(report.roster, RosterOrigin::Fallback);
        assert_eq!(report.restored, vec![Slice::Documents]);
        assert_eq!(state.advisors.as_slice(), default_roster().as_slice());
        assert_eq!(state.selected_advisor_ids.len(), 3);
        assert_eq!(*state.documents, docs);
        assert_eq!(*state.settings, Settings::default());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn disposing_the_store_cancels_a_pending_roster_fetch() {
        let store = Store::create(StoreConfig::default(), None, Arc::new(PendingRoster));
        let handle = store.handle();

        let hydration = store.spawn_hydration();
        tokio::task::yield_now().await;
        store.dispose();

        let report = hydration.await.unwrap();
        assert_eq!(report.roster, RosterOrigin::Cancelled);
        assert!(report.restored.is_empty());
        assert!(!handle.is_live());
    }

    #[tokio::test]
    async fn spawned_hydration_completes_while_the_store_lives() {
        let store = Store::create(
            StoreConfig::default(),
            None,
            Arc::new(StaticRoster::new(advisors(&["a", "b"]))),
        );

        let report = store.spawn_hydration().await.unwrap();

        assert_eq!(report.roster, RosterOrigin::Remote);
        assert_eq!(store.state().selected_advisor_ids.len(), 2);
    }
}
