// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Name → engine lookup and resume-token extraction fan-out.

use super::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use swb_core::{Job, ResumeToken};

/// Registry of available engines, keyed by engine id.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.id().to_string(), engine);
    }

    /// Look up an engine by id. Composite ids like `"claude:variant"`
    /// fall back to the prefix before the colon.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Engine>> {
        if let Some(engine) = self.engines.get(id) {
            return Some(Arc::clone(engine));
        }
        let (prefix, _) = id.split_once(':')?;
        self.engines.get(prefix).map(Arc::clone)
    }

    /// Resolve the engine a job should run against.
    ///
    /// Precedence: explicit `job.engine_id`, then the resume token's
    /// engine, then the configured default. Returns the requested id on
    /// lookup failure so the caller can build an error message.
    pub fn resolve(&self, job: &Job, default_engine: &str) -> Result<Arc<dyn Engine>, String> {
        let requested = job
            .engine_id
            .as_deref()
            .or(job.resume.as_ref().map(|r| r.engine.as_str()))
            .unwrap_or(default_engine);
        self.get(requested).ok_or_else(|| requested.to_string())
    }

    /// Try each registered engine's resume-line parser; first hit wins.
    pub fn extract_resume(&self, line: &str) -> Option<ResumeToken> {
        self.engines.values().find_map(|e| e.extract_resume(line))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
