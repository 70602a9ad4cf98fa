//! In-process registry adaptor with ZooKeeper-flavored semantics: tree
//! paths, one-shot watches, ephemeral nodes bound to a simulated session.
//! Backs embedded deployments and every test in the crate.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::RegistryBackend;
use super::RegistryEvent;
use super::RegistryEventKind;
use super::RegistryResult;
use super::WatchObserver;
use crate::RegistryError;

struct NodeEntry {
    data: Vec<u8>,
    ephemeral: bool,
}

#[derive(Default)]
struct MemState {
    nodes: BTreeMap<String, NodeEntry>,
    exists_watches: HashMap<String, Vec<WatchObserver>>,
    child_watches: HashMap<String, Vec<WatchObserver>>,
    data_watches: HashMap<String, Vec<WatchObserver>>,
    session_expired: bool,
}

pub struct MemoryRegistry {
    state: Mutex<MemState>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let mut state = MemState::default();
        state.nodes.insert(
            "/".to_string(),
            NodeEntry {
                data: Vec::new(),
                ephemeral: false,
            },
        );
        MemoryRegistry {
            state: Mutex::new(state),
        }
    }

    /// Simulate losing the session: every armed watch receives a session
    /// event, ephemeral nodes are dropped and all calls fail with
    /// `SessionExpired` until `reconnect` is invoked.
    pub fn expire_session(&self) {
        let fires = {
            let mut state = self.state.lock();
            state.session_expired = true;

            let ephemerals: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, entry)| entry.ephemeral)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &ephemerals {
                state.nodes.remove(path);
            }

            let mut fires: Vec<(WatchObserver, RegistryEvent)> = Vec::new();
            let state = &mut *state;
            for map in [
                &mut state.exists_watches,
                &mut state.child_watches,
                &mut state.data_watches,
            ] {
                for (_, observers) in map.drain() {
                    for observer in observers {
                        fires.push((observer, RegistryEvent::session()));
                    }
                }
            }
            fires
        };
        for (observer, event) in fires {
            observer(event);
        }
    }

    pub fn reconnect(&self) {
        self.state.lock().session_expired = false;
    }

    /// Deliver a spurious children-changed event without touching state.
    /// Watch delivery in a real ensemble can duplicate; tests use this to
    /// prove the consumers tolerate it.
    pub fn fire_children_changed(
        &self,
        path: &str,
    ) {
        let fires = {
            let mut state = self.state.lock();
            drain(&mut state.child_watches, path)
        };
        let event = RegistryEvent {
            path: path.to_string(),
            kind: RegistryEventKind::ChildrenChanged,
        };
        for observer in fires {
            observer(event.clone());
        }
    }

    fn check_session(state: &MemState) -> RegistryResult<()> {
        if state.session_expired {
            return Err(RegistryError::SessionExpired);
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> RegistryResult<()> {
    if path.is_empty() || !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
        return Err(RegistryError::Backend(format!("invalid path: {path}")));
    }
    Ok(())
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn child_names(
    nodes: &BTreeMap<String, NodeEntry>,
    path: &str,
) -> Vec<String> {
    let prefix = if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    };
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, _)| {
            let rest = &key[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                None
            } else {
                Some(rest.to_string())
            }
        })
        .collect()
}

fn drain(
    map: &mut HashMap<String, Vec<WatchObserver>>,
    path: &str,
) -> Vec<WatchObserver> {
    map.remove(path).unwrap_or_default()
}

fn arm(
    map: &mut HashMap<String, Vec<WatchObserver>>,
    path: &str,
    watch: Option<WatchObserver>,
) {
    if let Some(observer) = watch {
        map.entry(path.to_string()).or_default().push(observer);
    }
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn exists(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<bool> {
        validate_path(path)?;
        let mut state = self.state.lock();
        Self::check_session(&state)?;
        arm(&mut state.exists_watches, path, watch);
        Ok(state.nodes.contains_key(path))
    }

    async fn get_children(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<Vec<String>> {
        validate_path(path)?;
        let mut state = self.state.lock();
        Self::check_session(&state)?;
        if !state.nodes.contains_key(path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        arm(&mut state.child_watches, path, watch);
        Ok(child_names(&state.nodes, path))
    }

    async fn get_data(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<Vec<u8>> {
        validate_path(path)?;
        let mut state = self.state.lock();
        Self::check_session(&state)?;
        let data = match state.nodes.get(path) {
            Some(entry) => entry.data.clone(),
            None => return Err(RegistryError::NoNode(path.to_string())),
        };
        arm(&mut state.data_watches, path, watch);
        Ok(data)
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        ephemeral: bool,
    ) -> RegistryResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(RegistryError::NodeExists(path.to_string()));
        }
        let fires = {
            let mut state = self.state.lock();
            Self::check_session(&state)?;
            if state.nodes.contains_key(path) {
                return Err(RegistryError::NodeExists(path.to_string()));
            }
            let parent = parent_of(path);
            if !state.nodes.contains_key(parent) {
                return Err(RegistryError::NoNode(parent.to_string()));
            }
            state.nodes.insert(path.to_string(), NodeEntry { data, ephemeral });
            trace!(path, ephemeral, "registry node created");

            let mut fires: Vec<(WatchObserver, RegistryEvent)> = Vec::new();
            for observer in drain(&mut state.exists_watches, path) {
                fires.push((
                    observer,
                    RegistryEvent {
                        path: path.to_string(),
                        kind: RegistryEventKind::Created,
                    },
                ));
            }
            for observer in drain(&mut state.child_watches, parent) {
                fires.push((
                    observer,
                    RegistryEvent {
                        path: parent.to_string(),
                        kind: RegistryEventKind::ChildrenChanged,
                    },
                ));
            }
            fires
        };
        for (observer, event) in fires {
            observer(event);
        }
        Ok(())
    }

    async fn ensure_path(
        &self,
        path: &str,
    ) -> RegistryResult<()> {
        validate_path(path)?;
        let mut missing: Vec<String> = Vec::new();
        let mut current = path;
        loop {
            if current == "/" {
                break;
            }
            missing.push(current.to_string());
            current = parent_of(current);
        }
        // walk top-down so parents exist before children
        for node in missing.into_iter().rev() {
            match self.create(&node, Vec::new(), false).await {
                Ok(()) | Err(RegistryError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        path: &str,
    ) -> RegistryResult<()> {
        validate_path(path)?;
        let fires = {
            let mut state = self.state.lock();
            Self::check_session(&state)?;
            if !state.nodes.contains_key(path) {
                return Err(RegistryError::NoNode(path.to_string()));
            }
            if !child_names(&state.nodes, path).is_empty() {
                return Err(RegistryError::Backend(format!("node {path} has children")));
            }
            state.nodes.remove(path);
            trace!(path, "registry node deleted");

            let parent = parent_of(path);
            let mut fires: Vec<(WatchObserver, RegistryEvent)> = Vec::new();
            let deleted = RegistryEvent {
                path: path.to_string(),
                kind: RegistryEventKind::Deleted,
            };
            for observer in drain(&mut state.exists_watches, path) {
                fires.push((observer, deleted.clone()));
            }
            for observer in drain(&mut state.data_watches, path) {
                fires.push((observer, deleted.clone()));
            }
            for observer in drain(&mut state.child_watches, path) {
                fires.push((observer, deleted.clone()));
            }
            for observer in drain(&mut state.child_watches, parent) {
                fires.push((
                    observer,
                    RegistryEvent {
                        path: parent.to_string(),
                        kind: RegistryEventKind::ChildrenChanged,
                    },
                ));
            }
            fires
        };
        for (observer, event) in fires {
            observer(event);
        }
        Ok(())
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> RegistryResult<()> {
        validate_path(path)?;
        let fires = {
            let mut state = self.state.lock();
            Self::check_session(&state)?;
            match state.nodes.get_mut(path) {
                Some(entry) => entry.data = data,
                None => return Err(RegistryError::NoNode(path.to_string())),
            }

            let changed = RegistryEvent {
                path: path.to_string(),
                kind: RegistryEventKind::DataChanged,
            };
            let mut fires: Vec<(WatchObserver, RegistryEvent)> = Vec::new();
            for observer in drain(&mut state.data_watches, path) {
                fires.push((observer, changed.clone()));
            }
            for observer in drain(&mut state.exists_watches, path) {
                fires.push((observer, changed.clone()));
            }
            fires
        };
        for (observer, event) in fires {
            observer(event);
        }
        Ok(())
    }
}
