//! Static membership
//!
//! Member number and total come from configuration and never change.

use std::time::Duration;

use crate::error::{CohortError, Result};

use super::{MemberIdentity, MembershipConfig, MembershipModel};

/// Membership fixed at configuration time
#[derive(Debug, Clone)]
pub struct FixedMembership {
    model: MembershipModel,
}

impl FixedMembership {
    /// Build from a static member number and total
    pub fn new(name: impl Into<String>, config: &MembershipConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model: MembershipModel {
                members: vec![MemberIdentity::new(name)],
                leader: None,
                member_number: config.member_number,
                total_members: config.total_members,
                rebalance_delay: config.rebalance_delay,
            },
        })
    }

    /// Build from an ordinal-suffixed node name: `name-N` is member `N + 1`
    /// of `total_members`, the naming scheme of stateful-set deployments.
    pub fn from_ordinal_name(
        name: &str,
        total_members: u32,
        rebalance_delay: Duration,
    ) -> Result<Self> {
        let ordinal: u32 = name
            .rsplit('-')
            .next()
            .and_then(|suffix| suffix.parse().ok())
            .ok_or_else(|| CohortError::InvalidNodeName {
                name: name.to_string(),
            })?;
        if ordinal >= total_members {
            return Err(CohortError::InvalidConfig {
                reason: format!(
                    "ordinal {ordinal} of node {name} exceeds total of {total_members} members"
                ),
            });
        }
        Ok(Self {
            model: MembershipModel {
                members: vec![MemberIdentity::new(name)],
                leader: None,
                member_number: ordinal + 1,
                total_members,
                rebalance_delay,
            },
        })
    }

    /// The configured model; never blocks
    pub async fn get_info(&self) -> Result<MembershipModel> {
        Ok(self.model.clone())
    }

    /// Nothing to stop
    pub async fn close(&self) {}
}
