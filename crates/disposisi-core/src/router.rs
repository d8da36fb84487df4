//! Role → view and action mapping.
//!
//! Resolution fails closed: a role without a route gets `Forbidden`, never a
//! fallback view.

use std::collections::HashMap;

use serde::Serialize;

use crate::chain::RoleChain;
use crate::error::PortalError;
use crate::model::{Disposition, DispositionStatus, Role, TransitionAction};

/// Disposition desk rendered for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    DepartmentHeadDesk,
    SecretaryDesk,
    DivisionHeadDesk,
    StaffDesk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRoute {
    pub view: ViewKind,
    pub allowed: Vec<TransitionAction>,
}

/// What a viewer may do with one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub view: ViewKind,
    pub read_only: bool,
    pub actions: Vec<TransitionAction>,
    /// Legal forward targets, empty unless `Forward` is in `actions`.
    pub forward_targets: Vec<Role>,
}

impl RouteDecision {
    pub fn permits(&self, action: TransitionAction) -> bool {
        self.actions.contains(&action)
    }
}

#[derive(Debug, Clone)]
pub struct RoleRouter {
    chain: RoleChain,
    routes: HashMap<Role, RoleRoute>,
}

impl Default for RoleRouter {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoleRouter {
    /// A router with no routes; every role resolves to `Forbidden` until mapped.
    pub fn new(chain: RoleChain) -> Self {
        Self {
            chain,
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, role: Role, route: RoleRoute) -> Self {
        self.routes.insert(role, route);
        self
    }

    /// Routes for the standard chain. The operator role has no desk.
    pub fn standard() -> Self {
        use TransitionAction::*;

        Self::new(RoleChain::standard())
            .with_route(
                Role::DepartmentHead,
                RoleRoute {
                    view: ViewKind::DepartmentHeadDesk,
                    allowed: vec![Read, Start, Forward],
                },
            )
            .with_route(
                Role::Secretary,
                RoleRoute {
                    view: ViewKind::SecretaryDesk,
                    allowed: vec![Read, Start, Forward, Complete],
                },
            )
            .with_route(
                Role::DivisionHead,
                RoleRoute {
                    view: ViewKind::DivisionHeadDesk,
                    allowed: vec![Read, Start, Forward, Complete],
                },
            )
            .with_route(
                Role::Staff,
                RoleRoute {
                    view: ViewKind::StaffDesk,
                    allowed: vec![Read, Start, Complete],
                },
            )
    }

    pub fn chain(&self) -> &RoleChain {
        &self.chain
    }

    fn route(&self, role: Role) -> Result<&RoleRoute, PortalError> {
        self.routes
            .get(&role)
            .ok_or_else(|| PortalError::Forbidden(format!("no disposition view for {role}")))
    }

    /// Desk for a role's inbox.
    pub fn view_for(&self, role: Role) -> Result<ViewKind, PortalError> {
        Ok(self.route(role)?.view)
    }

    /// Action set for `role` looking at `hop`.
    pub fn resolve(&self, role: Role, hop: &Disposition) -> Result<RouteDecision, PortalError> {
        let route = self.route(role)?;

        if role != hop.target_role {
            return Ok(RouteDecision {
                view: route.view,
                read_only: true,
                actions: Vec::new(),
                forward_targets: Vec::new(),
            });
        }

        let actions: Vec<TransitionAction> = TransitionAction::ALL
            .into_iter()
            .filter(|a| route.allowed.contains(a))
            .filter(|a| self.legal(*a, hop))
            .collect();
        let forward_targets = if actions.contains(&TransitionAction::Forward) {
            self.chain.downstream(hop.target_role).to_vec()
        } else {
            Vec::new()
        };

        Ok(RouteDecision {
            view: route.view,
            read_only: actions.is_empty(),
            actions,
            forward_targets,
        })
    }

    /// Resolve from a raw role claim. Unparseable claims are `Forbidden`.
    pub fn resolve_claim(&self, claim: &str, hop: &Disposition) -> Result<RouteDecision, PortalError> {
        let role: Role = claim.parse().map_err(PortalError::Forbidden)?;
        self.resolve(role, hop)
    }

    fn legal(&self, action: TransitionAction, hop: &Disposition) -> bool {
        match action {
            TransitionAction::Read => hop.status == DispositionStatus::Pending,
            TransitionAction::Start => hop.status == DispositionStatus::Read,
            TransitionAction::Forward => {
                hop.is_active() && self.chain.has_successor(hop.target_role)
            }
            TransitionAction::Complete => {
                hop.is_active() && self.chain.is_terminal_acceptor(hop.target_role)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{DocumentId, HopId};

    fn hop(target: Role, status: DispositionStatus) -> Disposition {
        Disposition {
            id: HopId(1),
            document_id: DocumentId(1),
            from_role: None,
            target_role: target,
            instruction: "review".into(),
            note: None,
            deadline: None,
            status,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn head_on_pending_hop() {
        let router = RoleRouter::standard();
        let decision = router
            .resolve(
                Role::DepartmentHead,
                &hop(Role::DepartmentHead, DispositionStatus::Pending),
            )
            .unwrap();
        assert_eq!(decision.view, ViewKind::DepartmentHeadDesk);
        assert_eq!(
            decision.actions,
            vec![TransitionAction::Read, TransitionAction::Forward]
        );
        assert_eq!(
            decision.forward_targets,
            vec![Role::Secretary, Role::DivisionHead, Role::Staff]
        );
        assert!(!decision.read_only);
    }

    #[test]
    fn other_roles_are_read_only() {
        let router = RoleRouter::standard();
        let decision = router
            .resolve(Role::Staff, &hop(Role::Secretary, DispositionStatus::Pending))
            .unwrap();
        assert!(decision.read_only);
        assert!(decision.actions.is_empty());
        assert_eq!(decision.view, ViewKind::StaffDesk);
    }

    #[test]
    fn staff_can_only_complete_after_reading() {
        let router = RoleRouter::standard();
        let decision = router
            .resolve(Role::Staff, &hop(Role::Staff, DispositionStatus::Read))
            .unwrap();
        assert_eq!(
            decision.actions,
            vec![TransitionAction::Start, TransitionAction::Complete]
        );
        assert!(decision.forward_targets.is_empty());
    }

    #[test]
    fn terminal_hop_has_no_actions() {
        let router = RoleRouter::standard();
        let decision = router
            .resolve(
                Role::Secretary,
                &hop(Role::Secretary, DispositionStatus::Completed),
            )
            .unwrap();
        assert!(decision.read_only);
        assert!(!decision.permits(TransitionAction::Forward));
    }

    #[test]
    fn unmapped_role_fails_closed() {
        let router = RoleRouter::standard();
        let err = router
            .resolve(Role::Operator, &hop(Role::Operator, DispositionStatus::Pending))
            .unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(_)));

        let empty = RoleRouter::new(RoleChain::standard());
        assert!(matches!(
            empty.view_for(Role::DepartmentHead),
            Err(PortalError::Forbidden(_))
        ));
    }

    #[test]
    fn unknown_claim_fails_closed() {
        let router = RoleRouter::standard();
        let target = hop(Role::Secretary, DispositionStatus::Pending);
        assert!(matches!(
            router.resolve_claim("superuser", &target),
            Err(PortalError::Forbidden(_))
        ));
        assert!(router.resolve_claim("secretary", &target).is_ok());
    }
}
