//! Admission rules for SR-IOV FEC configuration
//!
//! Shared by the cluster reconciler (invalid configs are reported as `Failed`)
//! and the node configurator (malformed queue tables are never written).

use crate::bbdev::{ACC100BBDevConfig, BBDevConfig, N3000BBDevConfig, QueueGroupConfig};
use crate::sriov_fec_cluster_config::SriovFecClusterConfigSpec;
use crate::sriov_fec_node_config::PhysicalFunctionConfigExt;
use thiserror::Error;

const MAX_N3000_QUEUES: u32 = 32;
const MAX_ACC100_QUEUE_GROUPS: u32 = 8;
const MAX_ACC100_AQS_PER_GROUP: u32 = 16;
const MAX_ACC100_AQ_DEPTH_LOG2: u32 = 4;
const MAX_ACC100_VF_BUNDLES: u32 = 16;
const MAX_ACC100_QUEUE_SIZE: u32 = 1024;

/// Reasons a configuration is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("only one bbDevConfig field may be specified: n3000 or acc100")]
    MultipleDeviceConfigs,

    #[error("{direction} queue {queue} is {value}, must be no more than 32")]
    QueueOutOfRange {
        direction: &'static str,
        queue: usize,
        value: u32,
    },

    #[error("sum of all specified queues must be no more than 32 ({direction}: {total})")]
    QueueSumExceeded { direction: &'static str, total: u32 },

    #[error("sum of all numQueueGroups should not be larger than 8 (got {0})")]
    QueueGroupSumExceeded(u32),

    #[error("{field} is {value}, must be no more than {max}")]
    FieldOutOfRange {
        field: String,
        value: u32,
        max: u32,
    },

    #[error("numVfBundles ({num_vf_bundles}) must be equal to vfAmount ({vf_amount})")]
    VfBundlesMismatch { num_vf_bundles: u32, vf_amount: u32 },

    #[error("non-zero numVfBundles ({0}) with vfAmount equal to 0")]
    VfBundlesWithoutVfs(u32),
}

impl SriovFecClusterConfigSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let pf = &self.physical_function;
        validate_bbdev_config(&pf.bb_dev_config, pf.vf_amount)
    }
}

impl PhysicalFunctionConfigExt {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_bbdev_config(&self.bb_dev_config, self.vf_amount)
    }
}

/// Validates a queue configuration against the VF count it will be applied with.
pub fn validate_bbdev_config(config: &BBDevConfig, vf_amount: u32) -> Result<(), ValidationError> {
    match (&config.n3000, &config.acc100) {
        (Some(_), Some(_)) => Err(ValidationError::MultipleDeviceConfigs),
        (Some(n3000), None) => validate_n3000(n3000),
        (None, Some(acc100)) => validate_acc100(acc100, vf_amount),
        (None, None) => Ok(()),
    }
}

fn validate_n3000(config: &N3000BBDevConfig) -> Result<(), ValidationError> {
    for (direction, link) in [("uplink", &config.uplink), ("downlink", &config.downlink)] {
        let queues = link.queues.as_array();
        if let Some((queue, &value)) = queues
            .iter()
            .enumerate()
            .find(|(_, v)| **v > MAX_N3000_QUEUES)
        {
            return Err(ValidationError::QueueOutOfRange {
                direction,
                queue,
                value,
            });
        }
        let total = link.queues.total();
        if total > MAX_N3000_QUEUES {
            return Err(ValidationError::QueueSumExceeded { direction, total });
        }
    }
    Ok(())
}

fn validate_acc100(config: &ACC100BBDevConfig, vf_amount: u32) -> Result<(), ValidationError> {
    check_max("numVfBundles", config.num_vf_bundles, MAX_ACC100_VF_BUNDLES)?;
    check_max("maxQueueSize", config.max_queue_size, MAX_ACC100_QUEUE_SIZE)?;

    let groups = [
        ("uplink4G", &config.uplink_4g),
        ("downlink4G", &config.downlink_4g),
        ("uplink5G", &config.uplink_5g),
        ("downlink5G", &config.downlink_5g),
    ];
    for (name, group) in groups {
        validate_queue_group(name, group)?;
    }

    let total = config.total_queue_groups();
    if total > MAX_ACC100_QUEUE_GROUPS {
        return Err(ValidationError::QueueGroupSumExceeded(total));
    }

    if vf_amount == 0 {
        if config.num_vf_bundles != 0 {
            return Err(ValidationError::VfBundlesWithoutVfs(config.num_vf_bundles));
        }
    } else if config.num_vf_bundles != vf_amount {
        return Err(ValidationError::VfBundlesMismatch {
            num_vf_bundles: config.num_vf_bundles,
            vf_amount,
        });
    }
    Ok(())
}

fn validate_queue_group(name: &str, group: &QueueGroupConfig) -> Result<(), ValidationError> {
    check_max(
        &format!("{name}.numQueueGroups"),
        group.num_queue_groups,
        MAX_ACC100_QUEUE_GROUPS,
    )?;
    check_max(
        &format!("{name}.numAqsPerGroups"),
        group.num_aqs_per_groups,
        MAX_ACC100_AQS_PER_GROUP,
    )?;
    check_max(
        &format!("{name}.aqDepthLog2"),
        group.aq_depth_log2,
        MAX_ACC100_AQ_DEPTH_LOG2,
    )
}

fn check_max(field: &str, value: u32, max: u32) -> Result<(), ValidationError> {
    if value > max {
        return Err(ValidationError::FieldOutOfRange {
            field: field.to_string(),
            value,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbdev::{UplinkDownlink, UplinkDownlinkQueues};

    fn n3000(uplink: UplinkDownlinkQueues) -> BBDevConfig {
        BBDevConfig {
            n3000: Some(N3000BBDevConfig {
                uplink: UplinkDownlink {
                    bandwidth: 3,
                    load_balance: 128,
                    queues: uplink,
                },
                ..Default::default()
            }),
            acc100: None,
        }
    }

    fn acc100(num_vf_bundles: u32, groups: [u32; 4]) -> BBDevConfig {
        let group = |n| QueueGroupConfig {
            num_queue_groups: n,
            num_aqs_per_groups: 16,
            aq_depth_log2: 4,
        };
        BBDevConfig {
            n3000: None,
            acc100: Some(ACC100BBDevConfig {
                pf_mode: false,
                num_vf_bundles,
                max_queue_size: 1024,
                uplink_4g: group(groups[0]),
                downlink_4g: group(groups[1]),
                uplink_5g: group(groups[2]),
                downlink_5g: group(groups[3]),
            }),
        }
    }

    #[test]
    fn test_uplink_sum_of_40_is_rejected() {
        let config = n3000(UplinkDownlinkQueues {
            vf0: 20,
            vf6: 10,
            vf7: 10,
            ..Default::default()
        });

        let err = validate_bbdev_config(&config, 3).unwrap_err();
        assert_eq!(
            err,
            ValidationError::QueueSumExceeded {
                direction: "uplink",
                total: 40
            }
        );
        assert!(err
            .to_string()
            .contains("sum of all specified queues must be no more than 32"));
    }

    #[test]
    fn test_n3000_queues_at_limit_accepted() {
        let config = n3000(UplinkDownlinkQueues {
            vf0: 16,
            vf1: 16,
            ..Default::default()
        });
        assert!(validate_bbdev_config(&config, 2).is_ok());
    }

    #[test]
    fn test_single_queue_over_32_rejected() {
        let config = n3000(UplinkDownlinkQueues {
            vf3: 33,
            ..Default::default()
        });
        assert!(matches!(
            validate_bbdev_config(&config, 1),
            Err(ValidationError::QueueOutOfRange { queue: 3, value: 33, .. })
        ));
    }

    #[test]
    fn test_both_device_configs_rejected() {
        let mut config = acc100(16, [2, 2, 2, 2]);
        config.n3000 = Some(N3000BBDevConfig::default());
        assert_eq!(
            validate_bbdev_config(&config, 16),
            Err(ValidationError::MultipleDeviceConfigs)
        );
    }

    #[test]
    fn test_acc100_queue_group_sum() {
        assert!(validate_bbdev_config(&acc100(16, [2, 2, 2, 2]), 16).is_ok());
        assert_eq!(
            validate_bbdev_config(&acc100(16, [4, 4, 0, 1]), 16),
            Err(ValidationError::QueueGroupSumExceeded(9))
        );
    }

    #[test]
    fn test_acc100_vf_bundles_must_match_vf_amount() {
        assert_eq!(
            validate_bbdev_config(&acc100(16, [2, 2, 2, 2]), 4),
            Err(ValidationError::VfBundlesMismatch {
                num_vf_bundles: 16,
                vf_amount: 4
            })
        );
        assert_eq!(
            validate_bbdev_config(&acc100(16, [2, 2, 2, 2]), 0),
            Err(ValidationError::VfBundlesWithoutVfs(16))
        );
        assert!(validate_bbdev_config(&acc100(0, [0, 0, 0, 0]), 0).is_ok());
    }

    #[test]
    fn test_acc100_field_limits() {
        let mut config = acc100(16, [2, 2, 2, 2]);
        if let Some(acc) = config.acc100.as_mut() {
            acc.uplink_5g.aq_depth_log2 = 5;
        }
        let err = validate_bbdev_config(&config, 16).unwrap_err();
        assert_eq!(err.to_string(), "uplink5G.aqDepthLog2 is 5, must be no more than 4");
    }

    #[test]
    fn test_empty_config_is_valid() {
        assert!(validate_bbdev_config(&BBDevConfig::default(), 0).is_ok());
    }
}
