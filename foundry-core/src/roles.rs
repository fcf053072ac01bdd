//! Role Planner (C6): a pure function deriving per-node roles from the
//! ordered inventory plus optional explicit overrides.

use thiserror::Error;

use foundry_common::Error as CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRole {
    pub is_control_plane: bool,
    pub is_worker: bool,
    pub explicit: bool,
}

impl NodeRole {
    pub const fn control_plane() -> Self {
        Self {
            is_control_plane: true,
            is_worker: true,
            explicit: true,
        }
    }
    pub const fn worker_only() -> Self {
        Self {
            is_control_plane: false,
            is_worker: true,
            explicit: true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("no hosts with cluster roles")]
    EmptyInventory,
    #[error("unknown explicit role: {0}")]
    UnknownExplicitRole(String),
}

impl From<RoleError> for CoreError {
    fn from(e: RoleError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

/// Maps an explicit role string per §4.6 rule 2.
pub fn explicit_role(value: &str) -> Result<NodeRole, RoleError> {
    match value {
        "control-plane" => Ok(NodeRole {
            is_control_plane: true,
            is_worker: false,
            explicit: true,
        }),
        "worker" => Ok(NodeRole {
            is_control_plane: false,
            is_worker: true,
            explicit: true,
        }),
        "both" => Ok(NodeRole {
            is_control_plane: true,
            is_worker: true,
            explicit: true,
        }),
        other => Err(RoleError::UnknownExplicitRole(other.to_string())),
    }
}

/// `Plan(nodes, explicit_overrides) -> roles`. `overrides[i]` is the
/// explicit role string for node `i`, if any.
pub fn plan(node_count: usize, overrides: &[Option<String>]) -> Result<Vec<NodeRole>, RoleError> {
    if node_count == 0 {
        return Err(RoleError::EmptyInventory);
    }

    let mut roles = Vec::with_capacity(node_count);
    for i in 0..node_count {
        let override_value = overrides.get(i).and_then(|o| o.as_ref());
        let role = if let Some(value) = override_value {
            explicit_role(value)?
        } else {
            auto_assign(node_count, i)
        };
        roles.push(role);
    }
    Ok(roles)
}

fn auto_assign(n: usize, i: usize) -> NodeRole {
    let is_control_plane = match n {
        1 => i == 0,
        2 => i == 0,
        _ => i < 3,
    };
    NodeRole {
        is_control_plane,
        is_worker: true,
        explicit: false,
    }
}

/// Lowest index with `is_control_plane = true`, if any.
pub fn first_control_plane(roles: &[NodeRole]) -> Option<usize> {
    roles.iter().position(|r| r.is_control_plane)
}

/// Role for a node being added to an already-running cluster: `≥3`
/// existing control-plane hosts forces worker, otherwise both, unless an
/// explicit override is given.
pub fn plan_add_node(
    existing_cp_count: usize,
    explicit: Option<&str>,
) -> Result<NodeRole, RoleError> {
    if let Some(value) = explicit {
        return explicit_role(value);
    }
    if existing_cp_count >= 3 {
        Ok(NodeRole {
            is_control_plane: false,
            is_worker: true,
            explicit: false,
        })
    } else {
        Ok(NodeRole {
            is_control_plane: true,
            is_worker: true,
            explicit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inventory_is_an_error() {
        assert_eq!(plan(0, &[]), Err(RoleError::EmptyInventory));
    }

    #[test]
    fn single_node_is_control_plane_and_worker() {
        let roles = plan(1, &[None]).unwrap();
        assert_eq!(roles, vec![NodeRole { is_control_plane: true, is_worker: true, explicit: false }]);
    }

    #[test]
    fn two_nodes_first_is_cp_second_is_worker_only() {
        let roles = plan(2, &[None, None]).unwrap();
        assert!(roles[0].is_control_plane && roles[0].is_worker);
        assert!(!roles[1].is_control_plane && roles[1].is_worker);
    }

    #[test]
    fn three_or_more_first_three_are_cp_rest_worker_only() {
        let roles = plan(5, &[None, None, None, None, None]).unwrap();
        for (i, role) in roles.iter().enumerate() {
            assert_eq!(role.is_control_plane, i < 3);
            assert!(role.is_worker);
        }
        assert_eq!(roles.len(), 5);
        assert_eq!(roles.iter().filter(|r| r.is_control_plane).count(), 3);
    }

    #[test]
    fn sum_of_control_plane_is_min_n_3_and_sum_of_worker_is_n() {
        for n in 1..=10 {
            let overrides = vec![None; n];
            let roles = plan(n, &overrides).unwrap();
            assert_eq!(roles.len(), n);
            assert_eq!(
                roles.iter().filter(|r| r.is_control_plane).count(),
                n.min(3)
            );
            assert_eq!(roles.iter().filter(|r| r.is_worker).count(), n);
        }
    }

    #[test]
    fn explicit_override_takes_precedence_over_auto_assignment() {
        let overrides = vec![Some("worker".to_string()), None, None];
        let roles = plan(3, &overrides).unwrap();
        assert!(!roles[0].is_control_plane);
        assert!(roles[0].explicit);
    }

    #[test]
    fn unknown_explicit_role_is_an_error() {
        assert!(explicit_role("manager").is_err());
    }

    #[test]
    fn first_control_plane_is_lowest_index() {
        let roles = plan(3, &[None, None, None]).unwrap();
        assert_eq!(first_control_plane(&roles), Some(0));
    }

    #[test]
    fn add_node_after_three_cps_forces_worker() {
        let role = plan_add_node(3, None).unwrap();
        assert!(!role.is_control_plane);
        assert!(role.is_worker);
    }

    #[test]
    fn add_node_before_three_cps_is_both() {
        let role = plan_add_node(1, None).unwrap();
        assert!(role.is_control_plane);
        assert!(role.is_worker);
    }
}
