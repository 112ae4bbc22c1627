// ── Permission model ──
//
// Role checks gate which actions a client offers. Nothing enforces them
// server-side, so callers re-check against the live family document
// (see `FamilyRegistry::watch_permission`) rather than a cached role.

use crate::model::Role;

/// `true` when `user_role` is at least `required` in `Guest < Member < Owner`.
pub fn has_required_role(user_role: Role, required: Role) -> bool {
    user_role.satisfies(required)
}

/// Like [`has_required_role`], for a user who may not be a member at all.
pub fn member_has_role(user_role: Option<Role>, required: Role) -> bool {
    user_role.is_some_and(|role| has_required_role(role, required))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Role; 3] = [Role::Guest, Role::Member, Role::Owner];

    #[test]
    fn reflexive() {
        for role in ALL {
            assert!(has_required_role(role, role), "{role} should satisfy itself");
        }
    }

    #[test]
    fn ordering() {
        assert!(!has_required_role(Role::Guest, Role::Owner));
        assert!(!has_required_role(Role::Guest, Role::Member));
        assert!(!has_required_role(Role::Member, Role::Owner));
        assert!(has_required_role(Role::Owner, Role::Guest));
        assert!(has_required_role(Role::Owner, Role::Member));
        assert!(has_required_role(Role::Member, Role::Guest));
    }

    #[test]
    fn monotonic() {
        for (i, held) in ALL.iter().enumerate() {
            for (j, required) in ALL.iter().enumerate() {
                assert_eq!(has_required_role(*held, *required), i >= j);
            }
        }
    }

    #[test]
    fn non_member_has_nothing() {
        assert!(!member_has_role(None, Role::Guest));
        assert!(member_has_role(Some(Role::Guest), Role::Guest));
    }
}
