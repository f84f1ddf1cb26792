use super::rules::{RuleError, RulePolicy, RuleSet};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Summary of the rule set currently in force.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSetInfo {
    pub version: String,
    /// Bumped on every successful install, starting at 1
    pub revision: u64,
    pub rule_count: usize,
    pub source: String,
    pub loaded_at: DateTime<Utc>,
}

/// Owner of the live rule table.
///
/// Readers take a cheap `Arc` snapshot, so a message is always classified
/// against exactly one version even while a reload swaps the table.
pub struct RuleSource {
    path: Option<PathBuf>,
    policy: RulePolicy,
    current: RwLock<Arc<RuleSet>>,
    loaded_at: RwLock<DateTime<Utc>>,
    revision: AtomicU64,
    modified: Mutex<Option<SystemTime>>,
}

impl RuleSource {
    /// Load from `path` if given, the built-in table otherwise.
    pub fn load(path: Option<PathBuf>, policy: RulePolicy) -> Result<Self, RuleError> {
        let (rules, modified) = match &path {
            Some(p) => (RuleSet::from_file(p, &policy)?, modified_at(p)),
            None => (RuleSet::builtin(&policy), None),
        };

        let source = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "builtin".into());
        tracing::info!(
            version = rules.version(),
            rules = rules.len(),
            source = %source,
            "moderation rules loaded"
        );

        Ok(Self {
            path,
            policy,
            current: RwLock::new(Arc::new(rules)),
            loaded_at: RwLock::new(Utc::now()),
            revision: AtomicU64::new(1),
            modified: Mutex::new(modified),
        })
    }

    pub fn builtin(policy: RulePolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::builtin(&policy))),
            path: None,
            policy,
            loaded_at: RwLock::new(Utc::now()),
            revision: AtomicU64::new(1),
            modified: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().await.clone()
    }

    pub async fn info(&self) -> RuleSetInfo {
        let rules = self.snapshot().await;
        RuleSetInfo {
            version: rules.version().to_string(),
            revision: self.revision.load(Ordering::SeqCst),
            rule_count: rules.len(),
            source: self.source_name(),
            loaded_at: *self.loaded_at.read().await,
        }
    }

    /// Swap in an already compiled table.
    pub async fn install(&self, rules: RuleSet) -> RuleSetInfo {
        {
            let mut current = self.current.write().await;
            *current = Arc::new(rules);
            *self.loaded_at.write().await = Utc::now();
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        let info = self.info().await;
        tracing::info!(
            version = %info.version,
            revision = info.revision,
            rules = info.rule_count,
            "moderation rules installed"
        );
        info
    }

    /// Re-read the rule file. On failure the previous table stays in force.
    pub async fn reload(&self) -> Result<RuleSetInfo, RuleError> {
        let Some(path) = self.path.clone() else {
            return Ok(self.info().await);
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RuleError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            });

        let compiled = content.and_then(|json| RuleSet::from_json(&json, &self.policy));
        // a broken file is retried once it changes again, not on every tick
        *self.modified.lock().await = modified_at(&path);
        match compiled {
            Ok(rules) => {
                metrics::RULE_RELOADS_TOTAL.with_label_values(&["ok"]).inc();
                Ok(self.install(rules).await)
            }
            Err(e) => {
                metrics::RULE_RELOADS_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!(error = %e, "rule reload rejected, keeping previous rules");
                Err(e)
            }
        }
    }

    /// Reload when the file's modification time moved since the last load.
    pub async fn reload_if_changed(&self) -> Option<Result<RuleSetInfo, RuleError>> {
        let path = self.path.as_ref()?;
        let seen = modified_at(path);
        {
            let last = self.modified.lock().await;
            if seen.is_none() || *last == seen {
                return None;
            }
        }
        Some(self.reload().await)
    }

    /// Poll the rule file every `interval`.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        self.path.as_ref()?;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(Err(e)) = self.reload_if_changed().await {
                    tracing::debug!(error = %e, "rule file change ignored");
                }
            }
        }))
    }

    fn source_name(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "builtin".to_string())
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
