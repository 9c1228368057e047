// ABOUTME: Dependency scheduler deciding which apps may have their Pods created.
// ABOUTME: Owns observed statuses plus the pending and needs-ready sets.

use super::status::AppStatus;
use crate::config::DependencyCondition;
use std::collections::{BTreeMap, BTreeSet};

/// Scheduling state for one run. Only the convergence loop mutates it.
#[derive(Debug, Clone)]
pub struct Scheduler {
    depends_on: BTreeMap<String, BTreeMap<String, DependencyCondition>>,
    statuses: BTreeMap<String, AppStatus>,
    pending: BTreeSet<String>,
    needs_ready: BTreeSet<String>,
}

impl Scheduler {
    /// Every app starts pending with status `Other`.
    pub fn new(
        depends_on: impl IntoIterator<Item = (String, BTreeMap<String, DependencyCondition>)>,
    ) -> Self {
        let depends_on: BTreeMap<_, _> = depends_on.into_iter().collect();
        Self {
            statuses: depends_on
                .keys()
                .map(|name| (name.clone(), AppStatus::Other))
                .collect(),
            pending: depends_on.keys().cloned().collect(),
            needs_ready: BTreeSet::new(),
            depends_on,
        }
    }

    pub fn status(&self, app: &str) -> AppStatus {
        self.statuses.get(app).copied().unwrap_or_default()
    }

    /// Merge an observation; returns true when the stored status advanced.
    pub fn observe(&mut self, app: &str, observed: AppStatus) -> bool {
        let Some(current) = self.statuses.get_mut(app) else {
            return false;
        };
        if observed > *current {
            *current = observed;
            true
        } else {
            false
        }
    }

    /// Remove and return every pending app whose dependencies are satisfied.
    ///
    /// Dependency-free apps are admissible immediately. Calling this again
    /// without new observations returns nothing.
    pub fn admit(&mut self) -> Vec<String> {
        let admitted: Vec<String> = self
            .pending
            .iter()
            .filter(|app| self.is_admissible(app))
            .cloned()
            .collect();
        for app in &admitted {
            self.pending.remove(app);
        }
        admitted
    }

    fn is_admissible(&self, app: &str) -> bool {
        self.depends_on
            .get(app)
            .map(|deps| {
                deps.iter()
                    .all(|(dep, condition)| self.status(dep).satisfies(*condition))
            })
            .unwrap_or(true)
    }

    /// Record that the app's Pod exists; it must now reach Ready.
    pub fn mark_created(&mut self, app: &str) {
        self.needs_ready.insert(app.to_string());
    }

    /// Whether a Pod for this app was created in this run.
    pub fn is_created(&self, app: &str) -> bool {
        self.needs_ready.contains(app)
    }

    pub fn created(&self) -> &BTreeSet<String> {
        &self.needs_ready
    }

    pub fn pending(&self) -> &BTreeSet<String> {
        &self.pending
    }

    /// Nothing left to schedule and every created app is Ready or Completed.
    pub fn all_converged(&self) -> bool {
        self.pending.is_empty()
            && self
                .needs_ready
                .iter()
                .all(|app| self.status(app).is_converged())
    }
}
