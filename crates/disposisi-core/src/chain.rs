//! Organizational routing chain.
//!
//! A letter enters at the first role and can only move downstream. Which roles
//! may close a hop (terminal acceptors) is organization policy and is held
//! alongside the order.

use serde::{Deserialize, Serialize};

use crate::model::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChain {
    order: Vec<Role>,
    terminal_acceptors: Vec<Role>,
}

impl Default for RoleChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoleChain {
    /// Build a chain from an explicit order. Duplicate roles keep their first position.
    pub fn new(order: Vec<Role>, terminal_acceptors: Vec<Role>) -> Self {
        let mut deduped: Vec<Role> = Vec::with_capacity(order.len());
        for role in order {
            if !deduped.contains(&role) {
                deduped.push(role);
            }
        }
        Self {
            order: deduped,
            terminal_acceptors,
        }
    }

    /// department head → secretary → division head → staff.
    ///
    /// Every role below the department head may close the routing.
    pub fn standard() -> Self {
        Self::new(
            vec![
                Role::DepartmentHead,
                Role::Secretary,
                Role::DivisionHead,
                Role::Staff,
            ],
            vec![Role::Secretary, Role::DivisionHead, Role::Staff],
        )
    }

    /// Role that receives the intake hop.
    pub fn entry(&self) -> Option<Role> {
        self.order.first().copied()
    }

    pub fn roles(&self) -> &[Role] {
        &self.order
    }

    pub fn contains(&self, role: Role) -> bool {
        self.order.contains(&role)
    }

    /// Roles a hop held by `role` may be forwarded to, nearest first.
    ///
    /// Empty when `role` is last in the chain or not part of it.
    pub fn downstream(&self, role: Role) -> &[Role] {
        match self.order.iter().position(|r| *r == role) {
            Some(idx) => &self.order[idx + 1..],
            None => &[],
        }
    }

    pub fn has_successor(&self, role: Role) -> bool {
        !self.downstream(role).is_empty()
    }

    pub fn can_forward(&self, from: Role, to: Role) -> bool {
        self.downstream(from).contains(&to)
    }

    pub fn is_terminal_acceptor(&self, role: Role) -> bool {
        self.contains(role) && self.terminal_acceptors.contains(&role)
    }
}
