//! Resource allocation and node selection for workloads.
//!
//! A workload carries a memory profile and a placement hint; this module
//! turns both into concrete requests/limits and scheduling constraints,
//! checking that the declared node groups can actually hold what is
//! assigned to them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RunsOn;
use crate::errors::{Error, Result};
use crate::naming::MASTER_GROUP;

/// Memory the OS and cluster runtime keep for themselves on every node.
const SYSTEM_RESERVED_MB: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Minimal,
    Small,
    Medium,
    Large,
}

impl Profile {
    pub fn request_mb(self) -> u32 {
        match self {
            Self::Minimal => 128,
            Self::Small => 256,
            Self::Medium => 512,
            Self::Large => 1024,
        }
    }

    /// Limits are twice the request; bursty workloads get headroom
    /// without starving neighbors.
    pub fn limit_mb(self) -> u32 {
        self.request_mb() * 2
    }
}

/// Where the scheduler may place a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelection {
    /// No hint: pin to the master group.
    Master,
    /// Single group: hard node selector.
    Pinned(String),
    /// Several groups: soft node affinity across them.
    Spread(Vec<String>),
}

pub fn node_selection(runs_on: Option<&RunsOn>) -> NodeSelection {
    match runs_on {
        None => NodeSelection::Master,
        Some(runs_on) => {
            let groups = runs_on.groups();
            if groups.len() == 1 {
                NodeSelection::Pinned(groups[0].to_string())
            } else {
                NodeSelection::Spread(groups.iter().map(|g| g.to_string()).collect())
            }
        }
    }
}

impl NodeSelection {
    /// The value of the `server-group` node label this selection targets,
    /// when it is a hard pin.
    pub fn pinned_group(&self) -> Option<&str> {
        match self {
            Self::Master => Some(MASTER_GROUP),
            Self::Pinned(group) => Some(group),
            Self::Spread(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadDemand {
    pub name: String,
    pub profile: Profile,
    pub replicas: u32,
    pub runs_on: Option<RunsOn>,
}

/// Verify every group has room for the requests pinned onto it. Spread
/// workloads are charged to their first group; the scheduler balances
/// the rest.
pub fn check_fit(
    demands: &[WorkloadDemand],
    group_memory_mb: &HashMap<String, u32>,
) -> Result<()> {
    let mut used: HashMap<String, u32> = HashMap::new();
    for demand in demands {
        let group = match node_selection(demand.runs_on.as_ref()) {
            NodeSelection::Master => MASTER_GROUP.to_string(),
            NodeSelection::Pinned(group) => group,
            NodeSelection::Spread(groups) => groups
                .first()
                .cloned()
                .unwrap_or_else(|| MASTER_GROUP.to_string()),
        };
        *used.entry(group).or_default() += demand.profile.request_mb() * demand.replicas;
    }

    for (group, requested) in &used {
        let Some(capacity) = group_memory_mb.get(group) else {
            // Unknown instance type: nothing to check against.
            continue;
        };
        let available = capacity.saturating_sub(SYSTEM_RESERVED_MB);
        if *requested > available {
            return Err(Error::Configuration(format!(
                "group {:?} has {}MB usable but workloads request {}MB; use a larger instance type or move workloads",
                group, available, requested
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_memory_table() {
        assert_eq!(Profile::Minimal.request_mb(), 128);
        assert_eq!(Profile::Small.request_mb(), 256);
        assert_eq!(Profile::Medium.request_mb(), 512);
        assert_eq!(Profile::Large.request_mb(), 1024);
        assert_eq!(Profile::Large.limit_mb(), 2048);
    }

    #[test]
    fn test_node_selection_defaults_to_master() {
        assert_eq!(node_selection(None), NodeSelection::Master);
        assert_eq!(node_selection(None).pinned_group(), Some("master"));
    }

    #[test]
    fn test_node_selection_single_group_is_pinned() {
        let runs_on = RunsOn::Group("workers".to_string());
        assert_eq!(
            node_selection(Some(&runs_on)),
            NodeSelection::Pinned("workers".to_string())
        );
    }

    #[test]
    fn test_node_selection_multiple_groups_spread() {
        let runs_on = RunsOn::Groups(vec!["a".to_string(), "b".to_string()]);
        let selection = node_selection(Some(&runs_on));
        assert_eq!(
            selection,
            NodeSelection::Spread(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(selection.pinned_group(), None);
    }

    #[test]
    fn test_fit_rejects_overcommitted_group() {
        let demands = vec![WorkloadDemand {
            name: "web".to_string(),
            profile: Profile::Large,
            replicas: 4,
            runs_on: None,
        }];
        // 4 × 1024MB requested, 4096 - 512 = 3584MB usable.
        let groups = HashMap::from([("master".to_string(), 4096)]);
        let err = check_fit(&demands, &groups).unwrap_err();
        assert!(
            format!("{err}").contains("master"),
            "Expected group name in: {err}"
        );
    }

    #[test]
    fn test_fit_accepts_reasonable_demand() {
        let demands = vec![
            WorkloadDemand {
                name: "web".to_string(),
                profile: Profile::Small,
                replicas: 2,
                runs_on: None,
            },
            WorkloadDemand {
                name: "postgres".to_string(),
                profile: Profile::Medium,
                replicas: 1,
                runs_on: None,
            },
        ];
        let groups = HashMap::from([("master".to_string(), 4096)]);
        assert!(check_fit(&demands, &groups).is_ok());
    }

    #[test]
    fn test_fit_ignores_unknown_groups() {
        let demands = vec![WorkloadDemand {
            name: "web".to_string(),
            profile: Profile::Large,
            replicas: 10,
            runs_on: Some(RunsOn::Group("exotic".to_string())),
        }];
        assert!(check_fit(&demands, &HashMap::new()).is_ok());
    }
}
