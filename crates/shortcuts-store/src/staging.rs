//! Edit-with-discard staging.
//!
//! A session keeps a durable shadow of the entity under its kind's temporary
//! id. Edits go to the shadow; committing replaces or creates the real entity
//! in one unit of work, discarding drops the shadow. At most one shadow exists
//! per kind: beginning a new session replaces any stale one.

use std::fmt::Debug;
use std::marker::PhantomData;

use tracing::{debug, info};
use uuid::Uuid;

use shortcuts_types::{CategoryId, EntityKind, Shortcut, ShortcutId, Variable, VariableId};

use crate::error::{StoreError, StoreResult};
use crate::router::Observer;
use crate::state::{Staged, StoreState};
use crate::store::Store;
use crate::txn::Transaction;

/// An entity kind that can be edited through a staging session.
pub trait Stageable: Clone + PartialEq + Debug + Send + Sync + 'static {
    type Id: Copy + Eq + Debug + std::fmt::Display + Send + Sync + 'static;

    const KIND: EntityKind;
    const TEMPORARY: Self::Id;

    fn id_from_raw(raw: u64) -> Self::Id;
    fn set_id(&mut self, id: Self::Id);
    /// Blank entity presented when creating.
    fn blank(id: Self::Id) -> Self;
    /// Copy with a new identity, children included.
    fn copy_as(&self, id: Self::Id) -> Self;
    /// Content equality, ignoring identities.
    fn same_content(&self, other: &Self) -> bool;

    fn committed(state: &StoreState, id: Self::Id) -> Option<&Self>;
    fn staged(state: &StoreState) -> Option<&Staged<Self, Self::Id>>;
    fn put_staged(tx: &mut Transaction<'_>, staged: Option<Staged<Self, Self::Id>>);
    /// Write the final entity under its real id. `created` means no committed
    /// entity existed before.
    fn place(
        tx: &mut Transaction<'_>,
        entity: Self,
        created: bool,
        target_category: Option<CategoryId>,
    ) -> StoreResult<()>;
}

impl Stageable for Shortcut {
    type Id = ShortcutId;

    const KIND: EntityKind = EntityKind::Shortcut;
    const TEMPORARY: ShortcutId = ShortcutId::TEMPORARY;

    fn id_from_raw(raw: u64) -> ShortcutId {
        ShortcutId(raw)
    }

    fn set_id(&mut self, id: ShortcutId) {
        self.id = id;
    }

    fn blank(id: ShortcutId) -> Self {
        Shortcut::create_new(id)
    }

    fn copy_as(&self, id: ShortcutId) -> Self {
        self.detach(id)
    }

    fn same_content(&self, other: &Self) -> bool {
        self.is_same_as(other)
    }

    fn committed(state: &StoreState, id: ShortcutId) -> Option<&Self> {
        state.committed_shortcut(id)
    }

    fn staged(state: &StoreState) -> Option<&Staged<Self, ShortcutId>> {
        state.staged_shortcut()
    }

    fn put_staged(tx: &mut Transaction<'_>, staged: Option<Staged<Self, ShortcutId>>) {
        tx.stage_shortcut(staged);
    }

    fn place(
        tx: &mut Transaction<'_>,
        entity: Self,
        created: bool,
        target_category: Option<CategoryId>,
    ) -> StoreResult<()> {
        let id = entity.id;
        if !created {
            // Membership is keyed by id, so replacing the record keeps the
            // shortcut at its position.
            tx.put_shortcut(entity)?;
            return Ok(());
        }
        let category = target_category
            .filter(|c| tx.state().category(*c).is_some())
            .or_else(|| tx.state().first_category())
            .ok_or_else(|| StoreError::rejected("no category to place the shortcut in"))?;
        tx.put_shortcut(entity)?;
        tx.insert_into_category(category, id, None)
    }
}

impl Stageable for Variable {
    type Id = VariableId;

    const KIND: EntityKind = EntityKind::Variable;
    const TEMPORARY: VariableId = VariableId::TEMPORARY;

    fn id_from_raw(raw: u64) -> VariableId {
        VariableId(raw)
    }

    fn set_id(&mut self, id: VariableId) {
        self.id = id;
    }

    fn blank(id: VariableId) -> Self {
        Variable::create_new(id)
    }

    fn copy_as(&self, id: VariableId) -> Self {
        self.detach(id)
    }

    fn same_content(&self, other: &Self) -> bool {
        self.is_same_as(other)
    }

    fn committed(state: &StoreState, id: VariableId) -> Option<&Self> {
        state.committed_variable(id)
    }

    fn staged(state: &StoreState) -> Option<&Staged<Self, VariableId>> {
        state.staged_variable()
    }

    fn put_staged(tx: &mut Transaction<'_>, staged: Option<Staged<Self, VariableId>>) {
        tx.stage_variable(staged);
    }

    fn place(
        tx: &mut Transaction<'_>,
        entity: Self,
        created: bool,
        _target_category: Option<CategoryId>,
    ) -> StoreResult<()> {
        let id = entity.id;
        tx.put_variable(entity)?;
        if created {
            let mut base = tx.state().base().cloned().unwrap_or_default();
            base.variables.push(id);
            tx.put_base(base);
        }
        Ok(())
    }
}

/// The shadow owned by `session`, if it is still the active one.
fn owned_shadow<E: Stageable>(state: &StoreState, session: Uuid) -> Option<&Staged<E, E::Id>> {
    E::staged(state).filter(|staged| staged.session == session)
}

/// An open edit of one entity.
///
/// `commit` and `discard` consume the session. A session whose shadow was
/// replaced by a newer `begin` reports `StoreError::StagingInactive`.
pub struct StagingSession<E: Stageable> {
    store: Store,
    session: Uuid,
    origin: Option<E::Id>,
    _kind: PhantomData<fn() -> E>,
}

pub type ShortcutEditor = StagingSession<Shortcut>;
pub type VariableEditor = StagingSession<Variable>;

impl<E: Stageable> StagingSession<E> {
    /// Begin editing `existing`, or creating when it is `None` or unknown.
    pub async fn begin(store: &Store, existing: Option<E::Id>) -> StoreResult<Self> {
        Self::begin_in(store, existing, None).await
    }

    /// Like `begin`; a created shortcut is appended to `target_category`
    /// instead of the first category.
    pub async fn begin_in(
        store: &Store,
        existing: Option<E::Id>,
        target_category: Option<CategoryId>,
    ) -> StoreResult<Self> {
        let session = Uuid::new_v4();
        let origin = store
            .commit(move |tx| {
                let copied = existing.and_then(|id| {
                    E::committed(tx.state(), id).map(|entity| (id, entity.copy_as(E::TEMPORARY)))
                });
                let (origin, entity) = match copied {
                    Some((id, copy)) => (Some(id), copy),
                    None => (None, E::blank(E::TEMPORARY)),
                };
                E::put_staged(
                    tx,
                    Some(Staged {
                        session,
                        origin,
                        target_category,
                        entity,
                    }),
                );
                Ok(origin)
            })
            .await?;

        let kind = E::KIND;
        if existing.is_some() && origin.is_none() {
            debug!(kind = %kind, requested = ?existing, "Entity not found, staging a new one");
        }
        debug!(kind = %kind, origin = ?origin, "Staging session started");

        Ok(Self {
            store: store.clone(),
            session,
            origin,
            _kind: PhantomData,
        })
    }

    /// The committed entity being edited, `None` for a creation session.
    pub fn origin(&self) -> Option<E::Id> {
        self.origin
    }

    pub fn is_active(&self) -> bool {
        owned_shadow::<E>(&self.store.snapshot(), self.session).is_some()
    }

    /// Current content of the shadow.
    pub fn current(&self) -> StoreResult<E> {
        owned_shadow::<E>(&self.store.snapshot(), self.session)
            .map(|staged| staged.entity.clone())
            .ok_or(StoreError::StagingInactive)
    }

    /// Apply `edit` to the shadow as one commit.
    pub async fn mutate<F>(&self, edit: F) -> StoreResult<()>
    where
        F: FnOnce(&mut E) + Send + 'static,
    {
        let session = self.session;
        self.store
            .commit(move |tx| {
                let mut staged = owned_shadow::<E>(tx.state(), session)
                    .cloned()
                    .ok_or(StoreError::StagingInactive)?;
                edit(&mut staged.entity);
                staged.entity.set_id(E::TEMPORARY);
                E::put_staged(tx, Some(staged));
                Ok(())
            })
            .await
    }

    /// Whether the shadow differs from what it started as, identities ignored.
    pub fn has_changes(&self) -> StoreResult<bool> {
        let state = self.store.snapshot();
        let staged = owned_shadow::<E>(&state, self.session).ok_or(StoreError::StagingInactive)?;
        let changed = match staged.origin.and_then(|id| E::committed(&state, id)) {
            Some(original) => !staged.entity.same_content(original),
            None => !staged.entity.same_content(&E::blank(E::TEMPORARY)),
        };
        Ok(changed)
    }

    /// Observe the shadow.
    pub async fn observe(&self) -> Observer<Option<E>> {
        let session = self.session;
        self.store
            .observe_with(move |state| {
                owned_shadow::<E>(state, session).map(|staged| staged.entity.clone())
            })
            .await
    }

    /// Make the shadow real and end the session. Returns the entity's id:
    /// the original id when editing, a freshly allocated one when creating.
    pub async fn commit(self) -> StoreResult<E::Id> {
        let session = self.session;
        let id = self
            .store
            .commit(move |tx| {
                let staged = owned_shadow::<E>(tx.state(), session)
                    .cloned()
                    .ok_or(StoreError::StagingInactive)?;
                let existing = staged
                    .origin
                    .filter(|id| E::committed(tx.state(), *id).is_some());
                let id = match existing {
                    Some(id) => id,
                    None => E::id_from_raw(tx.allocate_id(E::KIND)),
                };
                let entity = staged.entity.copy_as(id);
                E::place(tx, entity, existing.is_none(), staged.target_category)?;
                E::put_staged(tx, None);
                Ok(id)
            })
            .await?;
        let kind = E::KIND;
        info!(kind = %kind, id = %id, "Staged entity committed");
        Ok(id)
    }

    /// Drop the shadow and end the session. Committed state is untouched.
    pub async fn discard(self) -> StoreResult<()> {
        let session = self.session;
        self.store
            .commit(move |tx| {
                if owned_shadow::<E>(tx.state(), session).is_some() {
                    E::put_staged(tx, None);
                }
                Ok(())
            })
            .await?;
        let kind = E::KIND;
        debug!(kind = %kind, "Staging session discarded");
        Ok(())
    }
}
