//! Ordered collections: category membership, category order, variable order.
//!
//! All positions are clamped to `[0, len]`; an absent position appends.

use tracing::debug;

use shortcuts_types::{insert_clamped, CategoryId, ShortcutId, VariableId};

use crate::error::{StoreError, StoreResult};
use crate::txn::Transaction;

impl Transaction<'_> {
    /// Remove a shortcut from every category listing it.
    ///
    /// Returns the first (category, index) it was found at.
    pub(crate) fn detach_shortcut(&mut self, shortcut_id: ShortcutId) -> Option<(CategoryId, usize)> {
        let mut first = None;
        for category_id in self.state().categories_containing(shortcut_id) {
            let Some(mut category) = self.state().category(category_id).cloned() else {
                continue;
            };
            if first.is_none() {
                first = category.position_of(shortcut_id).map(|i| (category_id, i));
            }
            category.shortcuts.retain(|id| *id != shortcut_id);
            self.put_category(category);
        }
        first
    }

    pub(crate) fn insert_into_category(
        &mut self,
        category_id: CategoryId,
        shortcut_id: ShortcutId,
        position: Option<usize>,
    ) -> StoreResult<()> {
        let mut category = self
            .state()
            .category(category_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", category_id))?;
        insert_clamped(&mut category.shortcuts, shortcut_id, position);
        self.put_category(category);
        Ok(())
    }

    /// Move a shortcut to `position` within `target`, or within its current
    /// category when no target is given.
    ///
    /// Unknown shortcuts, unknown targets and shortcuts with no owning category
    /// make this a no-op returning `false`. On success the shortcut is listed in
    /// exactly one category.
    pub fn move_shortcut(
        &mut self,
        shortcut_id: ShortcutId,
        target: Option<CategoryId>,
        position: Option<usize>,
    ) -> bool {
        if shortcut_id.is_temporary() || self.state().committed_shortcut(shortcut_id).is_none() {
            debug!(shortcut = %shortcut_id, "Move ignored, shortcut not found");
            return false;
        }
        let target = match target {
            Some(id) => self.state().category(id).map(|c| c.id),
            None => self.state().owner_of(shortcut_id),
        };
        let Some(target) = target else {
            debug!(shortcut = %shortcut_id, "Move ignored, category not resolved");
            return false;
        };

        self.detach_shortcut(shortcut_id);
        let mut category = match self.state().category(target).cloned() {
            Some(category) => category,
            None => return false,
        };
        let index = insert_clamped(&mut category.shortcuts, shortcut_id, position);
        self.put_category(category);
        debug!(shortcut = %shortcut_id, category = %target, index, "Shortcut moved");
        true
    }

    /// Reorder a category within the Base.
    pub fn move_category(&mut self, category_id: CategoryId, position: Option<usize>) -> bool {
        let Some(mut base) = self.state().base().cloned() else {
            return false;
        };
        if !base.categories.contains(&category_id) {
            return false;
        }
        base.categories.retain(|id| *id != category_id);
        insert_clamped(&mut base.categories, category_id, position);
        self.put_base(base);
        true
    }

    /// Reorder a variable within the Base.
    pub fn move_variable(&mut self, variable_id: VariableId, position: Option<usize>) -> bool {
        let Some(mut base) = self.state().base().cloned() else {
            return false;
        };
        if !base.variables.contains(&variable_id) {
            return false;
        }
        base.variables.retain(|id| *id != variable_id);
        insert_clamped(&mut base.variables, variable_id, position);
        self.put_base(base);
        true
    }
}

#[cfg(test)]
mod tests {
    use shortcuts_types::{EntityKind, LayoutType, Shortcut};

    use crate::clock::MonotonicClock;
    use crate::state::StoreState;
    use crate::txn::Transaction;

    use super::*;

    /// C1 = [A, B, C], C2 = [D]
    fn two_categories() -> (StoreState, CategoryId, CategoryId) {
        let mut state = StoreState::default();
        let clock = MonotonicClock::new();
        let (c1, c2) = {
            let mut tx = Transaction::new(&mut state, &clock);
            tx.ensure_base("One");
            let c1 = tx.state().first_category().unwrap();
            let c2 = tx.create_category("Two", LayoutType::Linear);
            for (name, category) in [("A", c1), ("B", c1), ("C", c1), ("D", c2)] {
                let id = ShortcutId(tx.allocate_id(EntityKind::Shortcut));
                let mut s = Shortcut::create_new(id);
                s.name = name.into();
                tx.put_shortcut(s).unwrap();
                tx.insert_into_category(category, id, None).unwrap();
            }
            (c1, c2)
        };
        (state, c1, c2)
    }

    fn run<R>(state: &mut StoreState, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let clock = MonotonicClock::new();
        let mut tx = Transaction::new(state, &clock);
        f(&mut tx)
    }

    fn listing(state: &StoreState, id: CategoryId) -> Vec<u64> {
        state.category(id).unwrap().shortcuts.iter().map(|s| s.0).collect()
    }

    #[test]
    fn move_across_categories() {
        let (mut state, c1, c2) = two_categories();
        assert!(run(&mut state, |tx| tx.move_shortcut(ShortcutId(2), Some(c2), Some(0))));
        assert_eq!(listing(&state, c1), vec![1, 3]);
        assert_eq!(listing(&state, c2), vec![2, 4]);
        assert!(state.invariant_violations().is_empty());
    }

    #[test]
    fn move_within_category_without_target() {
        let (mut state, c1, _) = two_categories();
        assert!(run(&mut state, |tx| tx.move_shortcut(ShortcutId(1), None, Some(2))));
        assert_eq!(listing(&state, c1), vec![2, 3, 1]);
    }

    #[test]
    fn position_is_clamped() {
        let (mut state, _, c2) = two_categories();
        assert!(run(&mut state, |tx| tx.move_shortcut(ShortcutId(1), Some(c2), Some(99))));
        assert_eq!(listing(&state, c2), vec![4, 1]);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let (mut state, c1, _) = two_categories();
        let before = state.clone();
        let moved = run(&mut state, |tx| {
            let a = tx.move_shortcut(ShortcutId(42), Some(c1), None);
            let b = tx.move_shortcut(ShortcutId(1), Some(CategoryId(42)), None);
            let c = tx.move_shortcut(ShortcutId::TEMPORARY, None, None);
            (a, b, c, tx.is_empty())
        });
        assert_eq!(moved, (false, false, false, true));
        assert_eq!(state, before);
    }

    #[test]
    fn repairs_double_membership() {
        let (mut state, c1, c2) = two_categories();
        run(&mut state, |tx| {
            let mut broken = tx.state().category(c2).cloned().unwrap();
            broken.shortcuts.push(ShortcutId(1));
            tx.put_category(broken);
        });
        assert!(!state.invariant_violations().is_empty());

        assert!(run(&mut state, |tx| tx.move_shortcut(ShortcutId(1), None, Some(0))));
        assert_eq!(listing(&state, c1), vec![1, 2, 3]);
        assert_eq!(listing(&state, c2), vec![4]);
        assert!(state.invariant_violations().is_empty());
    }

    #[test]
    fn reorder_categories() {
        let (mut state, c1, c2) = two_categories();
        assert!(run(&mut state, |tx| tx.move_category(c2, Some(0))));
        assert_eq!(state.base().unwrap().categories, vec![c2, c1]);
        assert!(!run(&mut state, |tx| tx.move_category(CategoryId(99), Some(0))));
    }
}
