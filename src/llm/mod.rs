//! Oracle interface and prompt plumbing.
//!
//! Every non-deterministic text generator (planner, engineer, reviewer, PR
//! writer) goes through the single [`TextOracle`] capability so tests can
//! substitute scripted fakes. Structure is never expected from the oracle
//! itself; the parsers in [`parse`] impose it.

pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

use anyhow::Result;
use async_trait::async_trait;

/// A single prompt for the generative oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub system: String,
    pub user: String,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// The generative text oracle: untrusted, non-deterministic text in, text out.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn generate(&self, request: OracleRequest) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{OracleRequest, TextOracle};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Oracle fake that replays a fixed script of responses and records
    /// every request it sees.
    pub(crate) struct ScriptedOracle {
        responses: Mutex<VecDeque<String>>,
        pub requests: Mutex<Vec<OracleRequest>>,
    }

    impl ScriptedOracle {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn request_user(&self, index: usize) -> String {
            self.requests.lock().unwrap()[index].user.clone()
        }
    }

    #[async_trait]
    impl TextOracle for ScriptedOracle {
        async fn generate(&self, request: OracleRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("oracle script exhausted"))
        }
    }
}
