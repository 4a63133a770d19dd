//! Service auto-scaling policy

use std::time::Duration;

/// Target-tracking auto-scaling configuration for an environment's service
///
/// Every environment uses [`AutoScalingConfig::default`]: one to four tasks,
/// tracking 70% average CPU and 70% average memory, with one minute cooldowns
/// in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoScalingConfig {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub cpu_target_percent: f64,
    pub memory_target_percent: f64,
    pub scale_in_cooldown: Duration,
    pub scale_out_cooldown: Duration,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            min_capacity: 1,
            max_capacity: 4,
            cpu_target_percent: 70.0,
            memory_target_percent: 70.0,
            scale_in_cooldown: Duration::from_secs(60),
            scale_out_cooldown: Duration::from_secs(60),
        }
    }
}
