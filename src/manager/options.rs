use crate::cas::{CasCondition, CasMode, CasResultListener};
use crate::core::ConsistencyLevel;
use std::fmt;
use std::sync::Arc;

/// Per-call write and read options.
///
/// Nothing set here outlives the call it is passed to.
#[derive(Clone, Default)]
pub struct Options {
    consistency: Option<ConsistencyLevel>,
    ttl: Option<u32>,
    timestamp: Option<i64>,
    condition: Option<CasMode>,
    cas_listener: Option<Arc<dyn CasResultListener>>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("consistency", &self.consistency)
            .field("ttl", &self.ttl)
            .field("timestamp", &self.timestamp)
            .field("condition", &self.condition)
            .field("cas_listener", &self.cas_listener.is_some())
            .finish()
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        self.consistency
    }

    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn condition(&self) -> Option<&CasMode> {
        self.condition.as_ref()
    }

    pub fn cas_listener(&self) -> Option<&Arc<dyn CasResultListener>> {
        self.cas_listener.as_ref()
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
        self.options.consistency = Some(level);
        self
    }

    /// Time to live, in seconds, of every column the statement writes.
    pub fn ttl(mut self, seconds: u32) -> Self {
        self.options.ttl = Some(seconds);
        self
    }

    /// Explicit write timestamp, in microseconds.
    pub fn timestamp(mut self, micros: i64) -> Self {
        self.options.timestamp = Some(micros);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.options.condition = Some(CasMode::IfNotExists);
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.options.condition = Some(CasMode::IfExists);
        self
    }

    /// Adds a column condition; replaces any existence check.
    pub fn condition(mut self, condition: CasCondition) -> Self {
        match &mut self.options.condition {
            Some(CasMode::Conditions(conditions)) => conditions.push(condition),
            _ => self.options.condition = Some(CasMode::Conditions(vec![condition])),
        }
        self
    }

    pub fn conditions(self, conditions: impl IntoIterator<Item = CasCondition>) -> Self {
        conditions.into_iter().fold(self, OptionsBuilder::condition)
    }

    /// Routes rejected conditional writes to `listener` instead of failing.
    pub fn cas_listener(mut self, listener: Arc<dyn CasResultListener>) -> Self {
        self.options.cas_listener = Some(listener);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
