use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Routine, RoutineGroup};

/// Anything displayed in a manually ordered sibling list.
pub trait Ordered {
    fn id(&self) -> &str;
    fn order(&self) -> i64;
    fn set_order(&mut self, order: i64);
}

impl Ordered for Routine {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

impl Ordered for RoutineGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDirection {
    Up,
    Down,
}

impl FromStr for MoveDirection {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveDirection::Up => f.write_str("up"),
            MoveDirection::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub id: String,
    pub order: i64,
}

/// Display order: ascending `order`, ties broken by id.
pub fn sort_by_order<'a, T, I>(items: I) -> Vec<&'a T>
where
    T: Ordered + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut sorted: Vec<&T> = items.into_iter().collect();
    sorted.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
    sorted
}

/// The group a routine is listed under. A group id that matches no existing
/// group lists the routine as ungrouped.
pub fn listed_group<'a>(routine: &'a Routine, groups: &[RoutineGroup]) -> Option<&'a str> {
    routine
        .group_id
        .as_deref()
        .filter(|group_id| groups.iter().any(|group| group.id == *group_id))
}

/// Routines listed in the same section as `group_id`, stale group ids included
/// in the ungrouped section.
pub fn section_siblings<'a>(
    routines: &'a [Routine],
    groups: &[RoutineGroup],
    group_id: Option<&str>,
) -> Vec<&'a Routine> {
    sort_by_order(
        routines
            .iter()
            .filter(|routine| listed_group(routine, groups) == group_id),
    )
}

pub fn next_order<'a, T, I>(siblings: I) -> i64
where
    T: Ordered + 'a,
    I: IntoIterator<Item = &'a T>,
{
    siblings
        .into_iter()
        .map(|item| item.order())
        .max()
        .map_or(0, |max| max + 1)
}

/// Order changes needed to move the item at `index` of an already sorted list.
///
/// Distinct neighbours swap their values, which touches exactly two documents.
/// Equal neighbours cannot be separated by a swap, so the whole list is
/// renumbered and only the items whose value changes are returned. An empty
/// plan means the move is a no-op.
pub fn plan_move_at<T: Ordered>(sorted: &[&T], index: usize, direction: MoveDirection) -> Vec<OrderAssignment> {
    let target = match direction {
        MoveDirection::Up if index > 0 => index - 1,
        MoveDirection::Down if index + 1 < sorted.len() => index + 1,
        _ => return Vec::new(),
    };
    if index >= sorted.len() {
        return Vec::new();
    }

    let current = sorted[index];
    let neighbour = sorted[target];
    if current.order() != neighbour.order() {
        return vec![
            OrderAssignment {
                id: current.id().to_string(),
                order: neighbour.order(),
            },
            OrderAssignment {
                id: neighbour.id().to_string(),
                order: current.order(),
            },
        ];
    }

    let mut reordered: Vec<&T> = sorted.to_vec();
    reordered.swap(index, target);
    reordered
        .iter()
        .enumerate()
        .filter(|(position, item)| item.order() != *position as i64)
        .map(|(position, item)| OrderAssignment {
            id: item.id().to_string(),
            order: position as i64,
        })
        .collect()
}

/// Looks the item up by id among unsorted siblings. Unknown ids yield `None`.
pub fn plan_move<T: Ordered>(siblings: &[&T], id: &str, direction: MoveDirection) -> Option<Vec<OrderAssignment>> {
    let sorted = sort_by_order(siblings.iter().copied());
    let index = sorted.iter().position(|item| item.id() == id)?;
    Some(plan_move_at(&sorted, index, direction))
}

/// Applies a plan locally, e.g. to render the result before the store echoes it.
pub fn apply<T: Ordered>(items: &mut [T], plan: &[OrderAssignment]) {
    for assignment in plan {
        if let Some(item) = items.iter_mut().find(|item| item.id() == assignment.id) {
            item.set_order(assignment.order);
        }
    }
}
