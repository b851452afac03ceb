//! Placement info passed to the embedding application
//!
//! The registry tells its application which slice of the group it owns
//! through an `InfoHandler`. Handlers run inside the registry's critical
//! section and must return quickly.

use tracing::info;

/// This node's placement inside the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoModel {
    /// One-based ordinal of this member
    pub member_number: u32,
    /// Size of the group including this member
    pub total_members: u32,
}

impl InfoModel {
    pub fn new(member_number: u32, total_members: u32) -> Self {
        Self {
            member_number,
            total_members,
        }
    }
}

/// Callback invoked when this node's placement changes.
///
/// Called only on structural change; repeated identical placements are
/// filtered out by the registry. Implementations must not block.
pub trait InfoHandler: Send + Sync {
    fn on_model_change(&self, model: &InfoModel);
}

/// Handler that only logs placement changes
#[derive(Debug, Default)]
pub struct LoggingInfoHandler;

impl InfoHandler for LoggingInfoHandler {
    fn on_model_change(&self, model: &InfoModel) {
        info!(
            "Placement changed: member {} of {}",
            model.member_number, model.total_members
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_model_equality_is_structural() {
        assert_eq!(InfoModel::new(1, 4), InfoModel::new(1, 4));
        assert_ne!(InfoModel::new(1, 4), InfoModel::new(2, 4));
        assert_ne!(InfoModel::new(1, 4), InfoModel::new(1, 5));
    }
}
