//! Materialized store state.
//!
//! `StoreState` is the fold of every committed `Mutation`. The writer task owns
//! the master copy; readers get immutable `Arc<StoreState>` snapshots and a
//! transaction mutates a private clone.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shortcuts_types::{
    AppLock, Base, Category, CategoryId, EntityKind, ExecutionId, PendingExecution, Shortcut,
    ShortcutId, Variable, VariableId,
};

use crate::record::{Mutation, RecordBody, WalRecord};

/// The shadow copy held by an open staging session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Staged<E, I> {
    /// Token of the session that owns this shadow.
    pub session: Uuid,
    /// Entity being edited, `None` when creating.
    pub origin: Option<I>,
    /// Where a newly created entity is placed on commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_category: Option<CategoryId>,
    pub entity: E,
}

pub type StagedShortcut = Staged<Shortcut, ShortcutId>;
pub type StagedVariable = Staged<Variable, VariableId>;

/// Serializable form of the whole state, written by compaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateImage {
    pub base: Option<Base>,
    pub categories: Vec<Category>,
    pub shortcuts: Vec<Shortcut>,
    pub variables: Vec<Variable>,
    pub executions: Vec<PendingExecution>,
    pub app_lock: Option<AppLock>,
    pub staged_shortcut: Option<StagedShortcut>,
    pub staged_variable: Option<StagedVariable>,
    pub watermarks: Vec<(EntityKind, u64)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreState {
    base: Option<Base>,
    categories: BTreeMap<CategoryId, Category>,
    shortcuts: BTreeMap<ShortcutId, Shortcut>,
    variables: BTreeMap<VariableId, Variable>,
    executions: BTreeMap<ExecutionId, PendingExecution>,
    app_lock: Option<AppLock>,
    staged_shortcut: Option<StagedShortcut>,
    staged_variable: Option<StagedVariable>,
    /// Highest id ever handed out per kind, including deleted ones.
    watermarks: BTreeMap<EntityKind, u64>,
    /// Derived shortcut -> owning category index. Rebuilt on load.
    owners: HashMap<ShortcutId, CategoryId>,
}

impl StoreState {
    pub fn from_image(image: StateImage) -> Self {
        let mut state = StoreState {
            base: image.base,
            categories: image.categories.into_iter().map(|c| (c.id, c)).collect(),
            shortcuts: image.shortcuts.into_iter().map(|s| (s.id, s)).collect(),
            variables: image.variables.into_iter().map(|v| (v.id, v)).collect(),
            executions: image.executions.into_iter().map(|e| (e.id, e)).collect(),
            app_lock: image.app_lock,
            staged_shortcut: image.staged_shortcut,
            staged_variable: image.staged_variable,
            watermarks: image.watermarks.into_iter().collect(),
            owners: HashMap::new(),
        };
        state.rebuild_index();
        state
    }

    pub fn to_image(&self) -> StateImage {
        StateImage {
            base: self.base.clone(),
            categories: self.categories.values().cloned().collect(),
            shortcuts: self.shortcuts.values().cloned().collect(),
            variables: self.variables.values().cloned().collect(),
            executions: self.executions.values().cloned().collect(),
            app_lock: self.app_lock.clone(),
            staged_shortcut: self.staged_shortcut.clone(),
            staged_variable: self.staged_variable.clone(),
            watermarks: self.watermarks.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    /// Apply a replayed WAL record.
    pub(crate) fn apply_record(&mut self, record: &WalRecord) {
        match &record.body {
            RecordBody::Transaction { mutations } => {
                for mutation in mutations {
                    self.apply(mutation);
                }
            }
            RecordBody::Snapshot { state } => {
                *self = StoreState::from_image(state.clone());
            }
        }
    }

    pub(crate) fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::PutBase(base) => self.base = Some(base.clone()),
            Mutation::PutCategory(category) => {
                if let Some(old) = self.categories.get(&category.id) {
                    for id in &old.shortcuts {
                        if self.owners.get(id) == Some(&category.id) {
                            self.owners.remove(id);
                        }
                    }
                }
                for id in &category.shortcuts {
                    self.owners.entry(*id).or_insert(category.id);
                }
                self.categories.insert(category.id, category.clone());
            }
            Mutation::DeleteCategory(id) => {
                self.categories.remove(id);
                self.owners.retain(|_, owner| owner != id);
            }
            Mutation::PutShortcut(shortcut) => {
                self.shortcuts.insert(shortcut.id, shortcut.clone());
            }
            Mutation::DeleteShortcut(id) => {
                self.shortcuts.remove(id);
            }
            Mutation::PutVariable(variable) => {
                self.variables.insert(variable.id, variable.clone());
            }
            Mutation::DeleteVariable(id) => {
                self.variables.remove(id);
            }
            Mutation::PutExecution(execution) => {
                self.executions.insert(execution.id, execution.clone());
            }
            Mutation::DeleteExecution(id) => {
                self.executions.remove(id);
            }
            Mutation::SetAppLock(lock) => self.app_lock = lock.clone(),
            Mutation::StageShortcut(staged) => self.staged_shortcut = staged.clone(),
            Mutation::StageVariable(staged) => self.staged_variable = staged.clone(),
            Mutation::AdvanceWatermark { kind, id } => {
                let mark = self.watermarks.entry(*kind).or_insert(0);
                *mark = (*mark).max(*id);
            }
        }
    }

    /// Recompute the owner index from category membership, first match in
    /// display order winning.
    pub(crate) fn rebuild_index(&mut self) {
        self.owners.clear();
        let ordered: Vec<CategoryId> = self
            .base
            .iter()
            .flat_map(|b| b.categories.iter().copied())
            .chain(self.categories.keys().copied())
            .collect();
        for category_id in ordered {
            if let Some(category) = self.categories.get(&category_id) {
                for id in &category.shortcuts {
                    self.owners.entry(*id).or_insert(category_id);
                }
            }
        }
    }

    // ---- Identifiers ----

    pub fn watermark(&self, kind: EntityKind) -> u64 {
        self.watermarks.get(&kind).copied().unwrap_or(0)
    }

    /// Largest id currently present for `kind`.
    pub fn max_id(&self, kind: EntityKind) -> u64 {
        let last = match kind {
            EntityKind::Category => self.categories.keys().next_back().map(|id| id.0),
            EntityKind::Shortcut => self.shortcuts.keys().next_back().map(|id| id.0),
            EntityKind::Variable => self.variables.keys().next_back().map(|id| id.0),
            EntityKind::PendingExecution => self.executions.keys().next_back().map(|id| id.0),
        };
        last.unwrap_or(0)
    }

    /// The id the next allocation for `kind` will return.
    pub fn next_id(&self, kind: EntityKind) -> u64 {
        self.max_id(kind).max(self.watermark(kind)) + 1
    }

    // ---- Base and categories ----

    pub fn base(&self) -> Option<&Base> {
        self.base.as_ref()
    }

    /// Categories in display order.
    pub fn categories(&self) -> Vec<&Category> {
        self.base
            .iter()
            .flat_map(|b| b.categories.iter())
            .filter_map(|id| self.categories.get(id))
            .collect()
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn first_category(&self) -> Option<CategoryId> {
        self.base
            .as_ref()
            .and_then(|b| b.categories.iter().find(|id| self.categories.contains_key(id)))
            .copied()
    }

    /// Every category listing `shortcut_id`, display order first.
    pub fn categories_containing(&self, shortcut_id: ShortcutId) -> Vec<CategoryId> {
        let mut found: Vec<CategoryId> = self
            .categories()
            .into_iter()
            .filter(|c| c.contains(shortcut_id))
            .map(|c| c.id)
            .collect();
        for category in self.categories.values() {
            if category.contains(shortcut_id) && !found.contains(&category.id) {
                found.push(category.id);
            }
        }
        found
    }

    /// The category a shortcut belongs to.
    pub fn owner_of(&self, shortcut_id: ShortcutId) -> Option<CategoryId> {
        if let Some(owner) = self.owners.get(&shortcut_id) {
            if self
                .categories
                .get(owner)
                .is_some_and(|c| c.contains(shortcut_id))
            {
                return Some(*owner);
            }
        }
        self.categories_containing(shortcut_id).first().copied()
    }

    pub fn position_of(&self, shortcut_id: ShortcutId) -> Option<(CategoryId, usize)> {
        let owner = self.owner_of(shortcut_id)?;
        let index = self.categories.get(&owner)?.position_of(shortcut_id)?;
        Some((owner, index))
    }

    // ---- Shortcuts ----

    /// Look up a shortcut; the temporary id resolves to the staged shadow.
    pub fn shortcut(&self, id: ShortcutId) -> Option<&Shortcut> {
        if id.is_temporary() {
            return self.staged_shortcut.as_ref().map(|s| &s.entity);
        }
        self.shortcuts.get(&id)
    }

    pub fn committed_shortcut(&self, id: ShortcutId) -> Option<&Shortcut> {
        self.shortcuts.get(&id)
    }

    /// Committed shortcuts in display order, followed by any not listed in a
    /// category.
    pub fn shortcuts(&self) -> Vec<&Shortcut> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.shortcuts.len());
        for category in self.categories() {
            for id in &category.shortcuts {
                if seen.insert(*id) {
                    if let Some(shortcut) = self.shortcuts.get(id) {
                        out.push(shortcut);
                    }
                }
            }
        }
        for shortcut in self.shortcuts.values() {
            if !seen.contains(&shortcut.id) {
                out.push(shortcut);
            }
        }
        out
    }

    pub fn shortcut_count(&self) -> usize {
        self.shortcuts.len()
    }

    /// Case-insensitive lookup among committed shortcuts.
    pub fn shortcut_by_name(&self, name: &str) -> Option<&Shortcut> {
        self.shortcuts().into_iter().find(|s| s.name_matches(name))
    }

    pub fn staged_shortcut(&self) -> Option<&StagedShortcut> {
        self.staged_shortcut.as_ref()
    }

    // ---- Variables ----

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        if id.is_temporary() {
            return self.staged_variable.as_ref().map(|s| &s.entity);
        }
        self.variables.get(&id)
    }

    pub fn committed_variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(&id)
    }

    /// Committed variables in display order.
    pub fn variables(&self) -> Vec<&Variable> {
        let listed: Vec<VariableId> = self
            .base
            .iter()
            .flat_map(|b| b.variables.iter().copied())
            .collect();
        let mut out: Vec<&Variable> = listed
            .iter()
            .filter_map(|id| self.variables.get(id))
            .collect();
        out.extend(self.variables.values().filter(|v| !listed.contains(&v.id)));
        out
    }

    pub fn variable_by_key(&self, key: &str) -> Option<&Variable> {
        self.variables().into_iter().find(|v| v.key == key)
    }

    pub fn staged_variable(&self) -> Option<&StagedVariable> {
        self.staged_variable.as_ref()
    }

    // ---- Pending executions ----

    /// Pending executions in queue order.
    pub fn pending_executions(&self) -> Vec<&PendingExecution> {
        let mut out: Vec<&PendingExecution> = self.executions.values().collect();
        out.sort_by(|a, b| a.queue_order(b));
        out
    }

    pub fn execution(&self, id: ExecutionId) -> Option<&PendingExecution> {
        self.executions.get(&id)
    }

    /// Earliest pending execution for a shortcut.
    pub fn execution_for_shortcut(&self, shortcut_id: ShortcutId) -> Option<&PendingExecution> {
        self.pending_executions()
            .into_iter()
            .find(|e| e.shortcut_id == shortcut_id)
    }

    pub fn executions_for_shortcut(&self, shortcut_id: ShortcutId) -> Vec<ExecutionId> {
        self.executions
            .values()
            .filter(|e| e.shortcut_id == shortcut_id)
            .map(|e| e.id)
            .collect()
    }

    // ---- App lock ----

    pub fn app_lock(&self) -> Option<&AppLock> {
        self.app_lock.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.app_lock.is_some()
    }

    /// Structural problems in the state, empty when consistent.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let Some(base) = &self.base else {
            problems.push("base is missing".to_string());
            return problems;
        };

        let mut listed_categories = HashSet::new();
        for id in &base.categories {
            if !listed_categories.insert(*id) {
                problems.push(format!("{id} listed twice in base"));
            }
            if !self.categories.contains_key(id) {
                problems.push(format!("base lists missing {id}"));
            }
        }
        for id in self.categories.keys() {
            if !listed_categories.contains(id) {
                problems.push(format!("{id} is not listed in base"));
            }
        }

        let mut membership: HashMap<ShortcutId, usize> = HashMap::new();
        for category in self.categories.values() {
            let mut local = HashSet::new();
            for id in &category.shortcuts {
                if !local.insert(*id) {
                    problems.push(format!("{id} listed twice in {}", category.id));
                }
                if !self.shortcuts.contains_key(id) {
                    problems.push(format!("{} lists missing {id}", category.id));
                }
                *membership.entry(*id).or_default() += 1;
            }
        }
        for id in self.shortcuts.keys() {
            match membership.get(id).copied().unwrap_or(0) {
                1 => {}
                0 => problems.push(format!("{id} belongs to no category")),
                n => problems.push(format!("{id} belongs to {n} categories")),
            }
        }

        for id in &base.variables {
            if !self.variables.contains_key(id) {
                problems.push(format!("base lists missing {id}"));
            }
        }
        for execution in self.executions.values() {
            if !self.shortcuts.contains_key(&execution.shortcut_id) {
                problems.push(format!(
                    "{} references missing {}",
                    execution.id, execution.shortcut_id
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> StoreState {
        let mut state = StoreState::default();
        let mut c1 = Category::new(CategoryId(1), "One");
        c1.shortcuts = vec![ShortcutId(1), ShortcutId(2)];
        let mut c2 = Category::new(CategoryId(2), "Two");
        c2.shortcuts = vec![ShortcutId(3)];
        state.apply(&Mutation::PutBase(Base {
            categories: vec![CategoryId(1), CategoryId(2)],
            variables: vec![],
        }));
        state.apply(&Mutation::PutCategory(c1));
        state.apply(&Mutation::PutCategory(c2));
        for id in 1..=3 {
            let mut s = Shortcut::create_new(ShortcutId(id));
            s.name = format!("Shortcut {id}");
            state.apply(&Mutation::PutShortcut(s));
        }
        state
    }

    #[test]
    fn owner_index_follows_category_puts() {
        let mut state = seeded();
        assert_eq!(state.owner_of(ShortcutId(2)), Some(CategoryId(1)));

        let mut c1 = state.category(CategoryId(1)).unwrap().clone();
        c1.shortcuts.retain(|id| *id != ShortcutId(2));
        let mut c2 = state.category(CategoryId(2)).unwrap().clone();
        c2.shortcuts.push(ShortcutId(2));
        state.apply(&Mutation::PutCategory(c1));
        state.apply(&Mutation::PutCategory(c2));

        assert_eq!(state.owner_of(ShortcutId(2)), Some(CategoryId(2)));
        assert_eq!(state.position_of(ShortcutId(2)), Some((CategoryId(2), 1)));
        assert!(state.invariant_violations().is_empty());
    }

    #[test]
    fn next_id_respects_watermark() {
        let mut state = seeded();
        assert_eq!(state.next_id(EntityKind::Shortcut), 4);

        state.apply(&Mutation::AdvanceWatermark {
            kind: EntityKind::Shortcut,
            id: 9,
        });
        assert_eq!(state.next_id(EntityKind::Shortcut), 10);
        assert_eq!(state.next_id(EntityKind::Variable), 1);
    }

    #[test]
    fn temporary_id_resolves_to_shadow() {
        let mut state = seeded();
        assert!(state.shortcut(ShortcutId::TEMPORARY).is_none());

        let staged = Staged {
            session: Uuid::new_v4(),
            origin: None,
            target_category: None,
            entity: Shortcut::create_new(ShortcutId::TEMPORARY),
        };
        state.apply(&Mutation::StageShortcut(Some(staged)));
        assert!(state.shortcut(ShortcutId::TEMPORARY).is_some());
        assert_eq!(state.shortcuts().len(), 3);
    }

    #[test]
    fn image_roundtrip_rebuilds_index() {
        let state = seeded();
        let restored = StoreState::from_image(state.to_image());
        assert_eq!(restored, state);
        assert_eq!(restored.owner_of(ShortcutId(3)), Some(CategoryId(2)));
    }

    #[test]
    fn name_lookup_ignores_case() {
        let state = seeded();
        let found = state.shortcut_by_name("SHORTCUT 3").unwrap();
        assert_eq!(found.id, ShortcutId(3));
    }

    #[test]
    fn detects_double_membership() {
        let mut state = seeded();
        let mut c2 = state.category(CategoryId(2)).unwrap().clone();
        c2.shortcuts.push(ShortcutId(1));
        state.apply(&Mutation::PutCategory(c2));

        assert_eq!(state.owner_of(ShortcutId(1)), Some(CategoryId(1)));
        let problems = state.invariant_violations();
        assert_eq!(problems, vec!["sc:1 belongs to 2 categories".to_string()]);
    }
}
