//! Identifier generation for new entities.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::{EntityId, IdError};

/// Base64 alphabet without padding.
pub const ID_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// 22 symbols of 6 bits each: 132 bits of entropy. Collisions are not checked.
pub const ID_LEN: usize = 22;

/// Default identifier: `ID_LEN` symbols drawn uniformly from `ID_ALPHABET`.
pub fn random_id() -> EntityId {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

type StrategyFn = dyn Fn() -> anyhow::Result<String> + Send + Sync;

/// Pluggable identifier strategy carried by a schema.
#[derive(Clone)]
pub struct IdStrategy {
    f: Arc<StrategyFn>,
    custom: bool,
}

impl IdStrategy {
    /// Wrap an infallible generator.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self { f: Arc::new(move || Ok(f())), custom: true }
    }

    /// Wrap a generator that may fail; its error reaches the caller unchanged.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f), custom: true }
    }

    pub fn is_custom(&self) -> bool { self.custom }

    pub fn generate(&self) -> Result<EntityId, IdError> {
        (self.f)().map_err(IdError)
    }
}

impl Default for IdStrategy {
    fn default() -> Self {
        Self { f: Arc::new(|| Ok(random_id())), custom: false }
    }
}

impl fmt::Debug for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.custom { "IdStrategy(custom)" } else { "IdStrategy(random)" })
    }
}
