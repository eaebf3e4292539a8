//! Retention policy of a managed table.

use common::StepUnit;
use common::config::TableGroupConfig;
use std::fmt;
use thiserror::Error;

/// How many partitions a table keeps on each side of "now", and at which
/// calendar granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    step: StepUnit,
    retention: u32,
    look_ahead: u32,
}

impl RetentionPolicy {
    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Both lengths must be at least one: retention so that the current
    /// partition is never expired, look-ahead so that there is always a
    /// future partition to write into.
    pub fn new(step: StepUnit, retention: u32, look_ahead: u32) -> Result<Self, PolicyError> {
        if retention == 0 {
            return Err(PolicyError::ZeroRetention);
        }
        if look_ahead == 0 {
            return Err(PolicyError::ZeroLookAhead);
        }

        Ok(Self {
            step,
            retention,
            look_ahead,
        })
    }

    pub fn step(&self) -> StepUnit {
        self.step
    }

    /// Number of past steps to keep.
    pub fn retention(&self) -> u32 {
        self.retention
    }

    /// Number of future steps to pre-create.
    pub fn look_ahead(&self) -> u32 {
        self.look_ahead
    }
}

impl TryFrom<&TableGroupConfig> for RetentionPolicy {
    type Error = PolicyError;

    fn try_from(group: &TableGroupConfig) -> Result<Self, Self::Error> {
        Self::new(group.step, group.retention, group.look_ahead)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step={}, retention={}, look_ahead={}",
            self.step, self.retention, self.look_ahead
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Retention length must be at least 1")]
    ZeroRetention,

    #[error("Look-ahead length must be at least 1")]
    ZeroLookAhead,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejects_zero_lengths() {
        assert_eq!(
            RetentionPolicy::new(StepUnit::Day, 0, 7),
            Err(PolicyError::ZeroRetention)
        );
        assert_eq!(
            RetentionPolicy::new(StepUnit::Month, 12, 0),
            Err(PolicyError::ZeroLookAhead)
        );
    }

    #[test]
    fn test_policy_from_group() {
        let group = TableGroupConfig {
            step: StepUnit::Month,
            retention: 12,
            look_ahead: 3,
            tables: vec!["trends".to_string()],
        };
        let policy = RetentionPolicy::try_from(&group).unwrap();
        assert_eq!(policy.step(), StepUnit::Month);
        assert_eq!(policy.retention(), 12);
        assert_eq!(policy.look_ahead(), 3);
        assert_eq!(policy.to_string(), "step=month, retention=12, look_ahead=3");
    }
}
