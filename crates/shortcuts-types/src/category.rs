use serde::{Deserialize, Serialize};

use crate::ids::{CategoryId, ShortcutId, VariableId};

/// How a category's shortcuts are laid out by the presentation layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutType {
    #[default]
    Linear,
    Grid,
}

/// An ordered, duplicate-free group of shortcuts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub layout_type: LayoutType,
    pub shortcuts: Vec<ShortcutId>,
}

impl Category {
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            layout_type: LayoutType::default(),
            shortcuts: Vec::new(),
        }
    }

    pub fn contains(&self, shortcut_id: ShortcutId) -> bool {
        self.shortcuts.contains(&shortcut_id)
    }

    pub fn position_of(&self, shortcut_id: ShortcutId) -> Option<usize> {
        self.shortcuts.iter().position(|id| *id == shortcut_id)
    }
}

/// Singleton root: display order of categories and variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    pub categories: Vec<CategoryId>,
    pub variables: Vec<VariableId>,
}

/// Insert `item` at `position` clamped to `[0, len]`, or append when no position is given.
pub fn insert_clamped<T>(items: &mut Vec<T>, item: T, position: Option<usize>) -> usize {
    let index = position.map_or(items.len(), |p| p.min(items.len()));
    items.insert(index, item);
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_clamps_to_bounds() {
        let mut items = vec![1, 2, 3];
        assert_eq!(insert_clamped(&mut items, 9, Some(42)), 3);
        assert_eq!(items, vec![1, 2, 3, 9]);

        assert_eq!(insert_clamped(&mut items, 0, Some(0)), 0);
        assert_eq!(items, vec![0, 1, 2, 3, 9]);

        assert_eq!(insert_clamped(&mut items, 7, None), 5);
        assert_eq!(items.last(), Some(&7));
    }

    #[test]
    fn position_lookup() {
        let mut category = Category::new(CategoryId(1), "Main");
        category.shortcuts = vec![ShortcutId(3), ShortcutId(5)];
        assert_eq!(category.position_of(ShortcutId(5)), Some(1));
        assert!(category.contains(ShortcutId(3)));
        assert!(!category.contains(ShortcutId(4)));
    }
}
