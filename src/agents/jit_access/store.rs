//! JIT request store
//!
//! Each request sits behind its own async mutex. A transition holds that
//! lock across its provisioning call, so grant and revoke of one request
//! never interleave.
//!
//! With a state file every saved request is written through to disk as a
//! JSON array, so a restarted process can find the assignments it still
//! has to revoke.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{JitAccessRequest, JitState};

pub type RequestEntry = Arc<Mutex<JitAccessRequest>>;

/// Immutable identity of a request next to its lockable state, so lookups
/// by (requester, permission set) never wait on an in-flight transition
struct Slot {
    requester: String,
    permission_set: String,
    entry: RequestEntry,
}

/// Last saved copy of every request and the file it lives in
struct Journal {
    path: PathBuf,
    saved: Mutex<HashMap<Uuid, JitAccessRequest>>,
}

impl Journal {
    async fn flush(&self, saved: &HashMap<Uuid, JitAccessRequest>) -> Result<()> {
        let mut requests: Vec<&JitAccessRequest> = saved.values().collect();
        requests.sort_by_key(|r| r.created_at);
        let bytes = serde_json::to_vec_pretty(&requests)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write JIT state: {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace JIT state: {:?}", self.path))?;
        Ok(())
    }
}

/// A request still owes a revoke once provisioning was attempted
fn holds_assignment(request: &JitAccessRequest) -> bool {
    request.state != JitState::Revoked
        && (request.state == JitState::Granted || request.grant_attempted)
}

#[derive(Default)]
pub struct JitStore {
    requests: RwLock<HashMap<Uuid, Slot>>,
    journal: Option<Journal>,
}

impl JitStore {
    /// Memory only; nothing survives the process
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the state file at `path` (missing means empty) and write every
    /// later save back to it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let loaded: Vec<JitAccessRequest> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("JIT state file is not valid JSON: {:?}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read JIT state: {:?}", path))
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create JIT state directory: {:?}", parent))?;
        }

        info!(path = ?path, requests = %loaded.len(), "JIT state loaded");

        let mut requests = HashMap::new();
        let mut saved = HashMap::new();
        for request in loaded {
            saved.insert(request.request_id, request.clone());
            requests.insert(request.request_id, slot(request));
        }

        Ok(Self {
            requests: RwLock::new(requests),
            journal: Some(Journal {
                path,
                saved: Mutex::new(saved),
            }),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.journal.is_some()
    }

    /// Add a new request; it is saved before it becomes visible
    pub async fn insert(&self, request: JitAccessRequest) -> Result<()> {
        self.save(&request).await?;
        let id = request.request_id;
        self.requests.write().await.insert(id, slot(request));
        Ok(())
    }

    /// Write a request's current state through to the state file.
    /// A memory-only store has nothing to do.
    pub async fn save(&self, request: &JitAccessRequest) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let mut saved = journal.saved.lock().await;
        saved.insert(request.request_id, request.clone());
        journal.flush(&saved).await?;
        debug!(request = %request.request_id, state = %request.state, "JIT state saved");
        Ok(())
    }

    /// Lockable entry for a transition
    pub async fn entry(&self, id: &Uuid) -> Option<RequestEntry> {
        self.requests.read().await.get(id).map(|s| s.entry.clone())
    }

    /// Point-in-time copy
    pub async fn get(&self, id: &Uuid) -> Option<JitAccessRequest> {
        let entry = self.entry(id).await?;
        let request = entry.lock().await;
        Some(request.clone())
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Requests that were granted, or may be partially granted, and are
    /// not yet revoked
    pub async fn pending_revokes(&self) -> Vec<JitAccessRequest> {
        let entries: Vec<RequestEntry> = self
            .requests
            .read()
            .await
            .values()
            .map(|s| s.entry.clone())
            .collect();

        let mut pending = Vec::new();
        for entry in entries {
            let request = entry.lock().await;
            if holds_assignment(&request) {
                pending.push(request.clone());
            }
        }
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Another request for the same requester and permission set that holds
    /// (or may hold) the assignment. A request in the middle of a transition
    /// counts as holding it.
    pub async fn assignment_holder(
        &self,
        requester: &str,
        permission_set: &str,
        exclude: &Uuid,
    ) -> Option<Uuid> {
        let requests = self.requests.read().await;
        requests.iter().find_map(|(id, s)| {
            if id == exclude || s.requester != requester || s.permission_set != permission_set {
                return None;
            }
            match s.entry.try_lock() {
                Ok(request) if !holds_assignment(&request) => None,
                _ => Some(*id),
            }
        })
    }

    /// Drop revoked requests whose revoke is at or before `cutoff`. Requests
    /// in `keep` and requests mid-transition are left alone.
    pub async fn prune(&self, cutoff: DateTime<Utc>, keep: &HashSet<Uuid>) -> Result<usize> {
        let removed: Vec<Uuid> = {
            let mut requests = self.requests.write().await;
            let expired: Vec<Uuid> = requests
                .iter()
                .filter(|(id, _)| !keep.contains(*id))
                .filter(|(_, s)| match s.entry.try_lock() {
                    Ok(request) => {
                        request.state == JitState::Revoked
                            && request.revoked_at.map(|at| at <= cutoff).unwrap_or(false)
                    }
                    Err(_) => false,
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                requests.remove(id);
            }
            expired
        };

        if removed.is_empty() {
            return Ok(0);
        }
        if let Some(journal) = &self.journal {
            let mut saved = journal.saved.lock().await;
            for id in &removed {
                saved.remove(id);
            }
            journal.flush(&saved).await?;
        }
        Ok(removed.len())
    }
}

fn slot(request: JitAccessRequest) -> Slot {
    Slot {
        requester: request.requester.clone(),
        permission_set: request.target_permission_set.clone(),
        entry: Arc::new(Mutex::new(request)),
    }
}
