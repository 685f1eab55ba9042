use chrono::{DateTime, Utc};
use tracing::debug;

use shortcuts_types::{
    AppLock, Base, Category, CategoryId, EntityKind, ExecutionId, LayoutType, PendingExecution,
    Shortcut, ShortcutId, Variable, VariableId,
};

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::record::Mutation;
use crate::state::{StagedShortcut, StagedVariable, StoreState};

/// A unit of work running against a private copy of the store state.
///
/// Every change is applied to the working copy immediately, so later reads in
/// the same unit observe earlier writes, and recorded for the WAL. Nothing is
/// visible outside until the writer makes the record durable.
pub struct Transaction<'a> {
    state: &'a mut StoreState,
    clock: &'a dyn Clock,
    mutations: Vec<Mutation>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(state: &'a mut StoreState, clock: &'a dyn Clock) -> Self {
        Self {
            state,
            clock,
            mutations: Vec::new(),
        }
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    /// The working state, including this transaction's own writes.
    pub fn state(&self) -> &StoreState {
        self.state
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn record(&mut self, mutation: Mutation) {
        self.state.apply(&mutation);
        self.mutations.push(mutation);
    }

    /// Allocate an id strictly greater than any id of `kind` ever handed out.
    pub fn allocate_id(&mut self, kind: EntityKind) -> u64 {
        let id = self.state.next_id(kind);
        self.record(Mutation::AdvanceWatermark { kind, id });
        debug!(kind = %kind, id, "Allocated id");
        id
    }

    // ---- Record-level writes ----

    pub fn put_base(&mut self, base: Base) {
        self.record(Mutation::PutBase(base));
    }

    pub fn put_category(&mut self, category: Category) {
        self.record(Mutation::PutCategory(category));
    }

    /// Insert or replace a shortcut record. Does not touch category membership.
    pub fn put_shortcut(&mut self, shortcut: Shortcut) -> StoreResult<()> {
        if shortcut.id.is_temporary() {
            return Err(StoreError::rejected(
                "the temporary shortcut id is reserved for staging",
            ));
        }
        self.record(Mutation::PutShortcut(shortcut));
        Ok(())
    }

    pub fn put_variable(&mut self, variable: Variable) -> StoreResult<()> {
        if variable.id.is_temporary() {
            return Err(StoreError::rejected(
                "the temporary variable id is reserved for staging",
            ));
        }
        self.record(Mutation::PutVariable(variable));
        Ok(())
    }

    pub fn put_execution(&mut self, execution: PendingExecution) {
        self.record(Mutation::PutExecution(execution));
    }

    pub fn delete_execution(&mut self, id: ExecutionId) -> bool {
        if self.state.execution(id).is_none() {
            return false;
        }
        self.record(Mutation::DeleteExecution(id));
        true
    }

    pub fn set_app_lock(&mut self, lock: Option<AppLock>) {
        if self.state.app_lock() == lock.as_ref() {
            return;
        }
        self.record(Mutation::SetAppLock(lock));
    }

    pub(crate) fn stage_shortcut(&mut self, staged: Option<StagedShortcut>) {
        if staged.is_none() && self.state.staged_shortcut().is_none() {
            return;
        }
        self.record(Mutation::StageShortcut(staged));
    }

    pub(crate) fn stage_variable(&mut self, staged: Option<StagedVariable>) {
        if staged.is_none() && self.state.staged_variable().is_none() {
            return;
        }
        self.record(Mutation::StageVariable(staged));
    }

    fn base_or_default(&self) -> Base {
        self.state.base().cloned().unwrap_or_default()
    }

    // ---- Entity management ----

    /// Create the Base root and a first category when the store is empty.
    pub fn ensure_base(&mut self, default_category_name: &str) -> bool {
        if self.state.base().is_some() {
            return false;
        }
        let id = CategoryId(self.allocate_id(EntityKind::Category));
        self.put_category(Category::new(id, default_category_name));
        self.put_base(Base {
            categories: vec![id],
            variables: Vec::new(),
        });
        true
    }

    pub fn create_category(&mut self, name: &str, layout_type: LayoutType) -> CategoryId {
        let id = CategoryId(self.allocate_id(EntityKind::Category));
        let mut category = Category::new(id, name);
        category.layout_type = layout_type;
        self.put_category(category);
        let mut base = self.base_or_default();
        base.categories.push(id);
        self.put_base(base);
        id
    }

    pub fn rename_category(&mut self, id: CategoryId, name: &str) -> StoreResult<()> {
        let mut category = self
            .state
            .category(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", id))?;
        category.name = name.to_string();
        self.put_category(category);
        Ok(())
    }

    pub fn set_category_layout(&mut self, id: CategoryId, layout_type: LayoutType) -> StoreResult<()> {
        let mut category = self
            .state
            .category(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", id))?;
        category.layout_type = layout_type;
        self.put_category(category);
        Ok(())
    }

    /// Delete a category together with every shortcut it lists.
    ///
    /// The last remaining category cannot be deleted.
    pub fn delete_category(&mut self, id: CategoryId) -> StoreResult<bool> {
        let Some(category) = self.state.category(id).cloned() else {
            return Ok(false);
        };
        let mut base = self.base_or_default();
        if base.categories.iter().filter(|c| **c != id).count() == 0 {
            return Err(StoreError::rejected("cannot delete the last category"));
        }
        for shortcut_id in &category.shortcuts {
            self.delete_shortcut(*shortcut_id);
        }
        base.categories.retain(|c| *c != id);
        self.put_base(base);
        self.record(Mutation::DeleteCategory(id));
        Ok(true)
    }

    /// Update a committed shortcut in place. Identity and position are kept.
    pub fn update_shortcut<F>(&mut self, id: ShortcutId, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Shortcut),
    {
        let mut shortcut = self
            .state
            .committed_shortcut(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("shortcut", id))?;
        update(&mut shortcut);
        shortcut.id = id;
        self.put_shortcut(shortcut)
    }

    /// Delete a shortcut, its children, its category membership and its
    /// pending executions. Deleting the temporary id clears the staged shadow.
    pub fn delete_shortcut(&mut self, id: ShortcutId) -> bool {
        if id.is_temporary() {
            let existed = self.state.staged_shortcut().is_some();
            self.stage_shortcut(None);
            return existed;
        }
        let existed = self.state.committed_shortcut(id).is_some();
        self.detach_shortcut(id);
        for execution_id in self.state.executions_for_shortcut(id) {
            self.record(Mutation::DeleteExecution(execution_id));
        }
        if existed {
            self.record(Mutation::DeleteShortcut(id));
        }
        existed
    }

    /// Copy a shortcut under a fresh id, placed directly after the original.
    pub fn duplicate_shortcut(&mut self, id: ShortcutId, name_suffix: &str) -> StoreResult<ShortcutId> {
        let source = self
            .state
            .committed_shortcut(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("shortcut", id))?;
        let new_id = ShortcutId(self.allocate_id(EntityKind::Shortcut));
        let mut copy = source.detach(new_id);
        copy.name.push_str(name_suffix);
        self.put_shortcut(copy)?;

        match self.state.position_of(id) {
            Some((category, index)) => self.insert_into_category(category, new_id, Some(index + 1)),
            None => {
                let category = self
                    .state
                    .first_category()
                    .ok_or_else(|| StoreError::rejected("no category to place the copy in"))?;
                self.insert_into_category(category, new_id, None)
            }
        }?;
        Ok(new_id)
    }

    pub fn update_variable<F>(&mut self, id: VariableId, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Variable),
    {
        let mut variable = self
            .state
            .committed_variable(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("variable", id))?;
        update(&mut variable);
        variable.id = id;
        self.put_variable(variable)
    }

    pub fn delete_variable(&mut self, id: VariableId) -> bool {
        if id.is_temporary() {
            let existed = self.state.staged_variable().is_some();
            self.stage_variable(None);
            return existed;
        }
        let existed = self.state.committed_variable(id).is_some();
        let mut base = self.base_or_default();
        if base.variables.contains(&id) {
            base.variables.retain(|v| *v != id);
            self.put_base(base);
        }
        if existed {
            self.record(Mutation::DeleteVariable(id));
        }
        existed
    }
}
