//! The tracking scope.

use crate::config::TrackingConfig;
use crate::entry::EntityEntry;
use crate::error::{TrackError, TrackResult};
use crate::local::LocalView;
use crate::model::Model;
use crate::object::{EntityHandle, ObjectView, ObjectViewMut};
use crate::persist::PersistenceSink;
use crate::tracker::DiscoveryPolicy;
use crate::tracking::{AttachMode, EntityState, GraphNode, StateManager};
use crate::valuegen::ValueGeneratorSelector;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One unit of work: the entity instances it owns and everything known
/// about their tracking state.
///
/// A context is single-writer. Every operation runs to completion on the
/// calling thread; callers that share a context between threads must
/// serialize access themselves.
///
/// # Example
///
/// ```rust
/// use entitrack_core::{Context, EntityState, ModelBuilder, ValueType};
///
/// let mut builder = ModelBuilder::new();
/// builder
///     .entity("Blog", |e| {
///         e.property("Id", ValueType::Int);
///     })
///     .entity("Post", |e| {
///         e.property("Id", ValueType::Int);
///     });
/// builder.has_many("Blog", Some("Posts"), "Post", Some("Blog"));
/// let model = builder.build().unwrap();
///
/// let mut ctx = Context::new(model);
/// let blog = ctx.create("Blog").unwrap();
/// let post = ctx.create("Post").unwrap();
/// ctx.object_mut(blog).unwrap().set("Id", 1).unwrap();
/// ctx.object_mut(blog).unwrap().collection_mut("Posts").unwrap().insert(post);
///
/// ctx.attach(blog).unwrap();
/// assert_eq!(ctx.entry(blog).unwrap().state(), EntityState::Unchanged);
/// assert_eq!(ctx.entry(post).unwrap().state(), EntityState::Added);
/// assert_eq!(ctx.entry(post).unwrap().current_value_as::<Option<i32>>("BlogId").unwrap(), Some(1));
/// ```
pub struct Context {
    sm: StateManager,
    disposed: bool,
}

impl Context {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_config(model, TrackingConfig::default())
    }

    /// Creates a context with a custom configuration.
    #[must_use]
    pub fn with_config(model: Arc<Model>, config: TrackingConfig) -> Self {
        Self {
            sm: StateManager::new(model, config),
            disposed: false,
        }
    }

    /// The model this context tracks.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.sm.model
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TrackingConfig {
        &self.sm.config
    }

    /// Returns the configuration for adjustment at runtime.
    pub fn config_mut(&mut self) -> TrackResult<&mut TrackingConfig> {
        self.ensure_open()?;
        Ok(&mut self.sm.config)
    }

    /// Replaces the policy that decides the state of entities discovered by
    /// fixup.
    pub fn set_discovery_policy(&mut self, policy: impl DiscoveryPolicy + 'static) -> TrackResult<()> {
        self.ensure_open()?;
        self.sm.discovery = Box::new(policy);
        Ok(())
    }

    /// Value generators used for keys that need a value when added.
    pub fn value_generators_mut(&mut self) -> TrackResult<&mut ValueGeneratorSelector> {
        self.ensure_open()?;
        Ok(&mut self.sm.generators)
    }

    /// Creates an untracked instance of an entity type.
    pub fn create(&mut self, entity_type: &str) -> TrackResult<EntityHandle> {
        self.ensure_open()?;
        self.sm.create(entity_type)
    }

    /// Reads an instance as user code sees it.
    pub fn object(&self, handle: EntityHandle) -> TrackResult<ObjectView<'_>> {
        self.ensure_open()?;
        let object = self.sm.objects.get(handle)?;
        Ok(ObjectView::new(self.sm.model.entity_type(object.entity_type()), object))
    }

    /// Writes to an instance without the tracker's knowledge. The writes are
    /// reconciled by the next change detection pass.
    pub fn object_mut(&mut self, handle: EntityHandle) -> TrackResult<ObjectViewMut<'_>> {
        self.ensure_open()?;
        let object = self.sm.objects.get_mut(handle)?;
        let entity_type = self.sm.model.entity_type(object.entity_type());
        Ok(ObjectViewMut::new(entity_type, object))
    }

    /// Entry for an instance, tracked or not.
    pub fn entry(&mut self, handle: EntityHandle) -> TrackResult<EntityEntry<'_>> {
        self.ensure_open()?;
        let entity_type = self.sm.type_id(handle)?;
        Ok(EntityEntry::new(&mut self.sm, handle, entity_type))
    }

    /// Tracks the graph reachable from `entity`; every untracked entity
    /// becomes `Added`.
    pub fn add(&mut self, entity: EntityHandle) -> TrackResult<()> {
        self.attach_with(entity, AttachMode::Add)
    }

    /// Tracks the graph reachable from `entity`; entities with a key set
    /// become `Unchanged` and the rest `Added`.
    pub fn attach(&mut self, entity: EntityHandle) -> TrackResult<()> {
        self.attach_with(entity, AttachMode::Attach)
    }

    /// Tracks the graph reachable from `entity`; entities with a key set
    /// become `Modified` and the rest `Added`.
    pub fn update(&mut self, entity: EntityHandle) -> TrackResult<()> {
        self.attach_with(entity, AttachMode::Update)
    }

    /// [`add`](Self::add) for several roots.
    pub fn add_range(&mut self, entities: &[EntityHandle]) -> TrackResult<()> {
        entities.iter().try_for_each(|&e| self.add(e))
    }

    /// [`attach`](Self::attach) for several roots.
    pub fn attach_range(&mut self, entities: &[EntityHandle]) -> TrackResult<()> {
        entities.iter().try_for_each(|&e| self.attach(e))
    }

    /// [`update`](Self::update) for several roots.
    pub fn update_range(&mut self, entities: &[EntityHandle]) -> TrackResult<()> {
        entities.iter().try_for_each(|&e| self.update(e))
    }

    fn attach_with(&mut self, entity: EntityHandle, mode: AttachMode) -> TrackResult<()> {
        self.ensure_open()?;
        debug!("{:?} {}", mode, self.sm.describe(entity));
        self.sm.attach_graph(entity, mode, None)
    }

    /// Marks an entity for deletion. An `Added` entity is detached instead;
    /// an untracked one is attached first.
    pub fn remove(&mut self, entity: EntityHandle) -> TrackResult<()> {
        self.ensure_open()?;
        if self.sm.state(entity) == EntityState::Detached {
            self.sm.attach_graph(entity, AttachMode::Attach, None)?;
        }
        self.sm.set_state(entity, EntityState::Deleted)
    }

    /// [`remove`](Self::remove) for several entities.
    pub fn remove_range(&mut self, entities: &[EntityHandle]) -> TrackResult<()> {
        entities.iter().try_for_each(|&e| self.remove(e))
    }

    /// Walks the untracked graph reachable from `root`, letting `callback`
    /// decide each node's state. Traversal continues past a node only if
    /// the callback tracked it.
    pub fn track_graph<F>(&mut self, root: EntityHandle, callback: F) -> TrackResult<()>
    where
        F: FnMut(&mut GraphNode<'_, ()>) -> TrackResult<()>,
    {
        self.ensure_open()?;
        self.sm.track_graph(root, callback)
    }

    /// Walks the graph reachable from `root`, threading `state` through the
    /// callback. Children of a node are visited only if the callback
    /// returns true; the callback is responsible for stopping at cycles.
    pub fn track_graph_with_state<S, F>(&mut self, root: EntityHandle, state: S, callback: F) -> TrackResult<S>
    where
        F: FnMut(&mut GraphNode<'_, S>) -> TrackResult<bool>,
    {
        self.ensure_open()?;
        self.sm.track_graph_with_state(root, state, callback)
    }

    /// Reconciles raw instance writes with the tracked state.
    pub fn detect_changes(&mut self) -> TrackResult<()> {
        self.ensure_open()?;
        self.sm.detect_changes()
    }

    /// Returns true if any entry is `Added`, `Modified` or `Deleted`.
    pub fn has_changes(&mut self) -> TrackResult<bool> {
        self.auto_detect()?;
        Ok(self.sm.has_changes())
    }

    /// Handles of every tracked entity.
    pub fn entries(&mut self) -> TrackResult<Vec<EntityHandle>> {
        self.auto_detect()?;
        Ok(self.sm.tracked_handles())
    }

    /// Tracked entries of one entity type.
    pub fn local(&mut self, entity_type: &str) -> TrackResult<LocalView<'_>> {
        self.auto_detect()?;
        let id = self.sm.model.entity_type_by_name(entity_type)?.id();
        Ok(LocalView::new(&mut self.sm, id))
    }

    /// Marks everything as saved: `Added` and `Modified` become
    /// `Unchanged` and `Deleted` entities are detached.
    pub fn accept_all_changes(&mut self) -> TrackResult<()> {
        self.ensure_open()?;
        self.sm.accept_all_changes()
    }

    /// Hands pending changes to `sink` and accepts them. Returns the number
    /// of entities written.
    ///
    /// If the sink fails, nothing is accepted.
    pub fn save_changes(&mut self, sink: &mut dyn PersistenceSink) -> TrackResult<usize> {
        self.auto_detect()?;
        self.sm.save_changes(sink)
    }

    /// Applies deferred cascade deletes and orphan deletes now.
    pub fn cascade_changes(&mut self) -> TrackResult<()> {
        self.ensure_open()?;
        self.sm.cascade_changes()
    }

    /// Stops tracking every entity. Instances stay valid.
    pub fn clear(&mut self) -> TrackResult<()> {
        self.ensure_open()?;
        self.sm.clear();
        Ok(())
    }

    /// Ends the unit of work. Every later call fails with
    /// [`TrackError::ContextDisposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.sm.clear();
        self.disposed = true;
        debug!("Context disposed");
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_open(&self) -> TrackResult<()> {
        if self.disposed {
            Err(TrackError::ContextDisposed)
        } else {
            Ok(())
        }
    }

    fn auto_detect(&mut self) -> TrackResult<()> {
        self.ensure_open()?;
        if self.sm.config.auto_detect_changes {
            self.sm.detect_changes()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("tracked", &self.sm.tracked_handles().len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
