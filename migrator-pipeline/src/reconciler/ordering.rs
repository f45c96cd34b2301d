use std::collections::{BTreeMap, BTreeSet};

use migrator_shared::types::{EntityType, GroupMember, OrderingViolation, OrderingViolationKind};
use uuid::Uuid;

/// Order number updates that make every group contiguous from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub groups: usize,
    pub updates: Vec<(Uuid, i32)>,
}

fn by_parent(members: &[GroupMember]) -> BTreeMap<Option<Uuid>, Vec<&GroupMember>> {
    let mut groups: BTreeMap<Option<Uuid>, Vec<&GroupMember>> = BTreeMap::new();
    for member in members {
        groups.entry(member.parent_id).or_default().push(member);
    }
    groups
}

fn group_violations(
    entity: EntityType,
    parent_id: Option<Uuid>,
    group: &[&GroupMember],
) -> Vec<OrderingViolation> {
    let violation = |kind, members: Vec<Uuid>| OrderingViolation {
        entity,
        parent_id,
        kind,
        members,
    };
    let mut found = Vec::new();

    let nulls: Vec<Uuid> = group
        .iter()
        .filter(|m| m.order_number.is_none())
        .map(|m| m.id)
        .collect();
    if !nulls.is_empty() {
        found.push(violation(OrderingViolationKind::NullOrder, nulls));
    }

    let mut by_number: BTreeMap<i32, Vec<Uuid>> = BTreeMap::new();
    for member in group {
        if let Some(number) = member.order_number {
            by_number.entry(number).or_default().push(member.id);
        }
    }
    let repeated: Vec<Uuid> = by_number
        .values()
        .filter(|ids| ids.len() > 1)
        .flatten()
        .copied()
        .collect();
    if !repeated.is_empty() {
        found.push(violation(OrderingViolationKind::Duplicate, repeated));
    }

    // Distinct numbers must be exactly 1..=k.
    let contiguous = by_number.keys().copied().eq(1..=by_number.len() as i32);
    if !contiguous {
        found.push(violation(
            OrderingViolationKind::Gap,
            group.iter().map(|m| m.id).collect(),
        ));
    }
    found
}

/// Every ordering defect among `members`, grouped by parent.
pub fn violations(entity: EntityType, members: &[GroupMember]) -> Vec<OrderingViolation> {
    by_parent(members)
        .into_iter()
        .flat_map(|(parent_id, group)| group_violations(entity, parent_id, &group))
        .collect()
}

/// Renumbers broken groups: members with a number keep their relative order
/// and come first, then those without; ties go to the older row, then the
/// lower id. Rows already holding their new number are left out.
pub fn plan_repair(members: &[GroupMember]) -> RepairPlan {
    let mut plan = RepairPlan::default();
    for (_, mut group) in by_parent(members) {
        let numbers: Vec<i32> = group.iter().filter_map(|m| m.order_number).collect();
        let distinct: BTreeSet<i32> = numbers.iter().copied().collect();
        let healthy = numbers.len() == group.len()
            && distinct.len() == numbers.len()
            && distinct.iter().copied().eq(1..=distinct.len() as i32);
        if healthy {
            continue;
        }

        group.sort_by_key(|m| (m.order_number.is_none(), m.order_number, m.created_at, m.id));
        plan.groups += 1;
        for (idx, member) in group.iter().enumerate() {
            let Ok(position) = i32::try_from(idx + 1) else {
                break;
            };
            if member.order_number != Some(position) {
                plan.updates.push((member.id, position));
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn member(id: u128, order_number: Option<i32>, created: i64) -> GroupMember {
        GroupMember {
            id: Uuid::from_u128(id),
            parent_id: Some(Uuid::from_u128(100)),
            order_number,
            content: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(created),
        }
    }

    #[test]
    fn repairs_nulls_and_repeats_by_creation_time() {
        // [1, null, 1, 4, null], created in id order.
        let members = vec![
            member(1, Some(1), 0),
            member(2, None, 1),
            member(3, Some(1), 2),
            member(4, Some(4), 3),
            member(5, None, 4),
        ];

        let plan = plan_repair(&members);
        let assigned: BTreeMap<Uuid, i32> = plan.updates.iter().copied().collect();
        let final_order = |id: u128| {
            assigned
                .get(&Uuid::from_u128(id))
                .copied()
                .or(members[id as usize - 1].order_number)
        };

        assert_eq!(plan.groups, 1);
        assert_eq!(
            (1..=5).map(final_order).collect::<Vec<_>>(),
            vec![Some(1), Some(4), Some(2), Some(3), Some(5)]
        );
        // Member 1 already holds 1 and is not rewritten.
        assert!(!assigned.contains_key(&Uuid::from_u128(1)));
    }

    #[test]
    fn healthy_group_needs_no_updates() {
        let members = vec![member(1, Some(2), 0), member(2, Some(1), 1)];
        assert_eq!(plan_repair(&members), RepairPlan::default());
        assert!(violations(EntityType::Question, &members).is_empty());
    }

    #[test]
    fn classifies_violations() {
        let members = vec![member(1, Some(1), 0), member(2, Some(1), 1), member(3, Some(3), 2), member(4, None, 3)];
        let kinds: Vec<_> = violations(EntityType::Choice, &members)
            .into_iter()
            .map(|v| v.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OrderingViolationKind::NullOrder,
                OrderingViolationKind::Duplicate,
                OrderingViolationKind::Gap
            ]
        );
    }
}
