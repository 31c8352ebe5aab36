//! Work plan: accumulates work items for one scope and compiles them into
//! a minimal, ordered operation list.
//!
//! Per-entity work is merged by key, so the compiled output holds at most
//! one operation per (tenant, type, id). Type-level work (purge-all and
//! delete-by-query) keeps its own slot in submission order. Changes to
//! embedded entities cascade a reindex to their indexed containers,
//! bounded by the per-relation depth.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use sync_types::{
    DeletionQuery, EntityKey, EntitySnapshot, EntityType, IndexOperation, TenantId, WorkItem,
    WorkKind,
};

use crate::metadata::EntityRegistry;

/// Merged state of one entity's pending work.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    Add(Arc<EntitySnapshot>),
    Update(Arc<EntitySnapshot>),
    Delete,
    /// Sticky: later work on the key is ignored
    Purge,
}

impl PendingChange {
    /// Fold an incoming change into the existing one.
    pub fn merge(self, incoming: PendingChange) -> PendingChange {
        use PendingChange::*;
        match (self, incoming) {
            (Purge, _) | (_, Purge) => Purge,
            (Add(_), Delete) => Delete,
            (Add(_), Add(latest)) | (Add(_), Update(latest)) => Add(latest),
            (Delete, Add(latest)) | (Delete, Update(latest)) => Update(latest),
            (Delete, Delete) => Delete,
            (Update(_), Add(latest)) | (Update(_), Update(latest)) => Update(latest),
            (Update(_), Delete) => Delete,
        }
    }

    fn is_removal(&self) -> bool {
        matches!(self, PendingChange::Delete | PendingChange::Purge)
    }

    fn into_operation(self, key: EntityKey) -> IndexOperation {
        match self {
            PendingChange::Add(document) => IndexOperation::Add { key, document },
            PendingChange::Update(document) => IndexOperation::Update { key, document },
            PendingChange::Delete | PendingChange::Purge => IndexOperation::Delete { key },
        }
    }
}

/// Remaining hops of a cascade walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthBudget {
    remaining: u32,
}

impl DepthBudget {
    pub fn new(max: u32) -> Self {
        Self { remaining: max }
    }

    pub fn unbounded() -> Self {
        Self::new(u32::MAX)
    }

    /// Budget limited to at most `max` further hops.
    pub fn narrow(self, max: u32) -> Self {
        Self {
            remaining: self.remaining.min(max),
        }
    }

    /// Budget after taking one hop.
    pub fn descend(self) -> Self {
        Self {
            remaining: self.remaining.saturating_sub(1),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    seq: u64,
    change: PendingChange,
}

#[derive(Debug, Clone)]
enum TypeLevelWork {
    PurgeAll,
    DeleteByQuery(DeletionQuery),
}

#[derive(Debug, Clone)]
struct TypeLevelEntry {
    seq: u64,
    entity_type: EntityType,
    tenant: Option<TenantId>,
    work: TypeLevelWork,
}

impl TypeLevelEntry {
    fn to_operation(&self) -> IndexOperation {
        match &self.work {
            TypeLevelWork::PurgeAll => IndexOperation::PurgeAll {
                entity_type: self.entity_type.clone(),
                tenant: self.tenant.clone(),
            },
            TypeLevelWork::DeleteByQuery(query) => IndexOperation::DeleteByQuery {
                entity_type: self.entity_type.clone(),
                tenant: self.tenant.clone(),
                query: query.clone(),
            },
        }
    }
}

type Scope = (EntityType, Option<TenantId>);

/// Accumulator and optimizer for the work of one scope.
pub struct WorkPlan {
    registry: Arc<EntityRegistry>,
    entries: HashMap<EntityKey, PendingEntry>,
    type_level: Vec<TypeLevelEntry>,
    last_type_level_seq: HashMap<Scope, u64>,
    next_seq: u64,
}

impl WorkPlan {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            entries: HashMap::new(),
            type_level: Vec::new(),
            last_type_level_seq: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Merge one work item, cascading to containers of its entity.
    pub fn add_work(&mut self, item: WorkItem) {
        trace!(work = %item, "Adding work to plan");
        match item.kind() {
            WorkKind::PurgeAll => self.add_purge_all(item.entity_type(), item.tenant()),
            WorkKind::DeleteByQuery => match item.query() {
                Some(query) => self.add_type_level(
                    item.entity_type(),
                    item.tenant(),
                    TypeLevelWork::DeleteByQuery(query.clone()),
                ),
                None => warn!(work = %item, "Delete-by-query without a query ignored"),
            },
            _ => self.add_entity_work(&item),
        }
    }

    /// Approximate number of pending operations (cascades included).
    pub fn size(&self) -> usize {
        self.entries.len() + self.type_level.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Ordered operation list; calling it again without new work yields the
    /// same list.
    pub fn compile(&self) -> Vec<IndexOperation> {
        let mut ordered: Vec<(u64, IndexOperation)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.seq, entry.change.clone().into_operation(key.clone())))
            .chain(self.type_level.iter().map(|e| (e.seq, e.to_operation())))
            .collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        debug!(operations = ordered.len(), "Compiled work plan");
        ordered.into_iter().map(|(_, op)| op).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.type_level.clear();
        self.last_type_level_seq.clear();
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// A purge-all without a tenant removes the type across every tenant.
    fn add_purge_all(&mut self, entity_type: &EntityType, tenant: Option<&TenantId>) {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            !(key.entity_type == *entity_type && tenant_covers(tenant, key.tenant.as_ref()))
        });
        self.type_level.retain(|e| {
            !(e.entity_type == *entity_type && tenant_covers(tenant, e.tenant.as_ref()))
        });
        debug!(
            entity_type = %entity_type,
            discarded = before - self.entries.len(),
            "Purge-all supersedes pending entity work"
        );
        self.add_type_level(entity_type, tenant, TypeLevelWork::PurgeAll);
    }

    fn add_type_level(&mut self, entity_type: &EntityType, tenant: Option<&TenantId>, work: TypeLevelWork) {
        if !self.registry.is_indexed(entity_type) {
            debug!(entity_type = %entity_type, "Type-level work for a type without index ignored");
            return;
        }
        let seq = self.take_seq();
        self.last_type_level_seq
            .insert((entity_type.clone(), tenant.cloned()), seq);
        self.type_level.push(TypeLevelEntry {
            seq,
            entity_type: entity_type.clone(),
            tenant: tenant.cloned(),
            work,
        });
    }

    fn add_entity_work(&mut self, item: &WorkItem) {
        let Some(key) = item.key() else {
            warn!(work = %item, "Entity work without an identifier ignored");
            return;
        };

        let change = match (item.kind(), item.entity()) {
            (WorkKind::Add, Some(entity)) => PendingChange::Add(entity.clone()),
            (WorkKind::Update | WorkKind::Collection | WorkKind::Index, Some(entity)) => {
                PendingChange::Update(entity.clone())
            }
            (WorkKind::Delete, _) => PendingChange::Delete,
            (WorkKind::Purge, _) => PendingChange::Purge,
            (kind, _) => {
                warn!(work = %item, kind = %kind, "Work needs an entity snapshot; ignored");
                return;
            }
        };

        if self.registry.is_indexed(&key.entity_type) {
            self.record(key.clone(), change, false);
        }

        if let Some(entity) = item.entity() {
            let mut visited = self.registry.detect_cycles().then(|| {
                let mut visited = HashSet::new();
                visited.insert(key);
                visited
            });
            self.cascade(entity, item.tenant(), DepthBudget::unbounded(), &mut visited);
        }
    }

    /// Merge a change into the entry for `key`.
    ///
    /// A cascaded reindex never revives a pending removal.
    fn record(&mut self, key: EntityKey, change: PendingChange, cascaded: bool) {
        let barrier = self.barrier_for(&key);

        if let Some(entry) = self.entries.get(&key) {
            if cascaded && entry.change.is_removal() {
                trace!(key = %key, "Cascade skipped for pending removal");
                return;
            }
        }
        let fresh = self.next_seq;

        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.change = entry.change.clone().merge(change);
                if barrier.is_some_and(|b| b > entry.seq) {
                    entry.seq = fresh;
                    self.next_seq += 1;
                }
            }
            None => {
                let seq = self.take_seq();
                self.entries.insert(key, PendingEntry { seq, change });
            }
        }
    }

    /// Latest type-level work reaching the key: its own tenant's, or the
    /// tenant-less one that spans every tenant.
    fn barrier_for(&self, key: &EntityKey) -> Option<u64> {
        let scoped = self
            .last_type_level_seq
            .get(&(key.entity_type.clone(), key.tenant.clone()))
            .copied();
        let type_wide = match key.tenant {
            Some(_) => self
                .last_type_level_seq
                .get(&(key.entity_type.clone(), None))
                .copied(),
            None => None,
        };
        scoped.max(type_wide)
    }

    fn cascade(
        &mut self,
        entity: &EntitySnapshot,
        tenant: Option<&TenantId>,
        budget: DepthBudget,
        visited: &mut Option<HashSet<EntityKey>>,
    ) {
        let links = self.registry.containment().containers_of(entity);
        for link in links {
            let Some(max) = self.registry.relation_depth(&entity.entity_type, &link.relation) else {
                trace!(
                    entity_type = %entity.entity_type,
                    relation = %link.relation,
                    "Relation not declared as contained-in"
                );
                continue;
            };
            let hop = budget.narrow(max);
            if hop.is_exhausted() {
                continue;
            }

            let container = &link.container;
            let key = container.key(tenant);
            if let Some(visited) = visited.as_mut() {
                if !visited.insert(key.clone()) {
                    debug!(key = %key, "Containment cycle detected; not revisiting");
                    continue;
                }
            }

            if self.registry.is_indexed(&container.entity_type) {
                self.record(key, PendingChange::Update(container.clone()), true);
            }
            self.cascade(container, tenant, hop.descend(), visited);
        }
    }
}

fn tenant_covers(scope: Option<&TenantId>, tenant: Option<&TenantId>) -> bool {
    scope.is_none() || scope == tenant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityBinding;
    use crate::routing::NotShardedStrategy;
    use pretty_assertions::assert_eq;

    fn registry_with(detect_cycles: bool) -> Arc<EntityRegistry> {
        Arc::new(
            EntityRegistry::builder()
                .bind(
                    EntityBinding::indexed("Book", Arc::new(NotShardedStrategy::new("Book")))
                        .with_contained_in("series", None),
                )
                .bind(
                    EntityBinding::indexed("Author", Arc::new(NotShardedStrategy::new("Author")))
                        .with_contained_in("books", Some(1)),
                )
                .bind(
                    EntityBinding::indexed("Series", Arc::new(NotShardedStrategy::new("Series")))
                        .with_contained_in("books", None),
                )
                .bind(EntityBinding::contained_only("Address").with_contained_in("author", Some(2)))
                .default_max_depth(3)
                .detect_cycles(detect_cycles)
                .build(),
        )
    }

    fn plan() -> WorkPlan {
        WorkPlan::new(registry_with(true))
    }

    fn book(id: &str, title: &str) -> EntitySnapshot {
        EntitySnapshot::new("Book", id).with_field("title", title)
    }

    fn key(entity_type: &str, id: &str) -> EntityKey {
        EntityKey::new(entity_type, id)
    }

    #[test]
    fn test_merge_rules() {
        use PendingChange::*;
        let a = Arc::new(book("1", "a"));
        let b = Arc::new(book("1", "b"));

        assert_eq!(Add(a.clone()).merge(Delete), Delete);
        assert_eq!(Add(a.clone()).merge(Update(b.clone())), Add(b.clone()));
        assert_eq!(Delete.merge(Add(b.clone())), Update(b.clone()));
        assert_eq!(Delete.merge(Update(b.clone())), Update(b.clone()));
        assert_eq!(Update(a.clone()).merge(Add(b.clone())), Update(b.clone()));
        assert_eq!(Update(a.clone()).merge(Delete), Delete);
        assert_eq!(Update(a.clone()).merge(Purge), Purge);
        assert_eq!(Purge.merge(Add(b)), Purge);
    }

    #[test]
    fn test_add_then_delete_yields_delete() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "Dune")));
        plan.add_work(WorkItem::delete(book("1", "Dune")));
        assert_eq!(
            plan.compile(),
            vec![IndexOperation::Delete { key: key("Book", "1") }]
        );
    }

    #[test]
    fn test_delete_then_add_yields_update() {
        let mut plan = plan();
        plan.add_work(WorkItem::delete_by_id("Book", "1"));
        plan.add_work(WorkItem::add(book("1", "Dune")));
        let ops = plan.compile();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], IndexOperation::Update { document, .. } if document.field("title") == Some("Dune")));
    }

    #[test]
    fn test_repeated_updates_keep_last_snapshot() {
        let mut plan = plan();
        for i in 0..5 {
            plan.add_work(WorkItem::update(book("1", &format!("v{}", i))));
        }
        let ops = plan.compile();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], IndexOperation::Update { document, .. } if document.field("title") == Some("v4")));
    }

    #[test]
    fn test_add_then_update_keeps_add_with_latest() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "Dune")));
        plan.add_work(WorkItem::update(book("1", "Dune Messiah")));
        let ops = plan.compile();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], IndexOperation::Add { document, .. } if document.field("title") == Some("Dune Messiah")));
    }

    #[test]
    fn test_collection_and_index_merge_as_update() {
        let mut plan = plan();
        plan.add_work(WorkItem::collection(book("1", "a")));
        plan.add_work(WorkItem::index(book("2", "b")));
        let ops = plan.compile();
        assert!(ops.iter().all(|op| matches!(op, IndexOperation::Update { .. })));
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_purge_is_sticky() {
        let mut plan = plan();
        plan.add_work(WorkItem::purge("Book", "1"));
        plan.add_work(WorkItem::add(book("1", "Dune")));
        assert_eq!(
            plan.compile(),
            vec![IndexOperation::Delete { key: key("Book", "1") }]
        );
    }

    #[test]
    fn test_purge_all_discards_earlier_entity_work() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")));
        plan.add_work(WorkItem::add(book("2", "b")));
        plan.add_work(WorkItem::add(EntitySnapshot::new("Author", "7")));
        plan.add_work(WorkItem::purge_all("Book"));
        plan.add_work(WorkItem::add(book("3", "c")));

        let ops = plan.compile();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], IndexOperation::Add { key, .. } if key.entity_type.as_str() == "Author"));
        assert!(matches!(&ops[1], IndexOperation::PurgeAll { entity_type, .. } if entity_type.as_str() == "Book"));
        assert!(matches!(&ops[2], IndexOperation::Add { key, .. } if key.id.as_str() == "3"));
    }

    #[test]
    fn test_entity_merged_after_type_level_work_moves_behind_it() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")));
        plan.add_work(WorkItem::delete_by_query("Book", DeletionQuery::term("title", "a")));
        plan.add_work(WorkItem::update(book("1", "b")));

        let ops = plan.compile();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], IndexOperation::DeleteByQuery { .. }));
        assert!(matches!(&ops[1], IndexOperation::Add { document, .. } if document.field("title") == Some("b")));
    }

    #[test]
    fn test_delete_by_query_keeps_relative_order() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")));
        plan.add_work(WorkItem::delete_by_query("Book", DeletionQuery::term("title", "x")));
        plan.add_work(WorkItem::add(book("2", "b")));

        let kinds: Vec<String> = plan.compile().iter().map(|op| op.to_string()).collect();
        assert_eq!(kinds, vec!["add(Book#1)", "delete_by_query(Book)", "add(Book#2)"]);
    }

    #[test]
    fn test_tenants_never_merge() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")).with_tenant("t1"));
        plan.add_work(WorkItem::delete(book("1", "a")).with_tenant("t2"));
        plan.add_work(WorkItem::purge_all("Book").with_tenant("t3"));
        assert_eq!(plan.size(), 3);
        assert_eq!(plan.compile().len(), 3);
    }

    #[test]
    fn test_purge_all_without_tenant_spans_tenants() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")).with_tenant("t1"));
        plan.add_work(WorkItem::add(book("2", "a")).with_tenant("t2"));
        plan.add_work(WorkItem::delete_by_query("Book", DeletionQuery::term("title", "a")).with_tenant("t2"));
        plan.add_work(WorkItem::purge_all("Book"));
        plan.add_work(WorkItem::update(book("1", "b")).with_tenant("t1"));

        let kinds: Vec<String> = plan.compile().iter().map(|op| op.to_string()).collect();
        assert_eq!(kinds, vec!["purge_all(Book)", "update(Book#1@t1)"]);
    }

    #[test]
    fn test_type_wide_barrier_orders_tenant_work() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")).with_tenant("t1"));
        plan.add_work(WorkItem::delete_by_query("Book", DeletionQuery::term("title", "a")));
        plan.add_work(WorkItem::update(book("1", "b")).with_tenant("t1"));

        let ops = plan.compile();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], IndexOperation::DeleteByQuery { tenant: None, .. }));
        assert!(matches!(&ops[1], IndexOperation::Add { document, .. } if document.field("title") == Some("b")));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")));
        plan.add_work(WorkItem::purge_all("Author"));
        assert_eq!(plan.compile(), plan.compile());
    }

    #[test]
    fn test_cascade_reindexes_indexed_container() {
        let mut plan = plan();
        let author = EntitySnapshot::new("Author", "7").with_field("name", "Herbert");
        let address = EntitySnapshot::new("Address", "3").contained_in("author", author);
        plan.add_work(WorkItem::update(address));

        let ops = plan.compile();
        assert_eq!(ops.len(), 1, "contained-only type emits no operation itself");
        assert!(matches!(&ops[0], IndexOperation::Update { key, .. } if key == &EntityKey::new("Author", "7")));
    }

    #[test]
    fn test_cascade_respects_relation_depth() {
        let mut plan = plan();
        let series = EntitySnapshot::new("Series", "s");
        let book = book("1", "a").contained_in("series", series.clone());
        let author = EntitySnapshot::new("Author", "7").contained_in("books", book);
        let address = EntitySnapshot::new("Address", "3").contained_in("author", author);
        plan.add_work(WorkItem::update(address));

        let keys: HashSet<String> = plan.compile().iter().map(|op| op.to_string()).collect();
        assert!(keys.contains("update(Author#7)"));
        assert!(keys.contains("update(Book#1)"));
        assert!(!keys.contains("update(Series#s)"), "depth 2 stops before Series");
    }

    #[test]
    fn test_cascade_never_resurrects_deleted_container() {
        let mut plan = plan();
        plan.add_work(WorkItem::delete_by_id("Author", "7"));
        let author = EntitySnapshot::new("Author", "7");
        plan.add_work(WorkItem::update(
            EntitySnapshot::new("Address", "3").contained_in("author", author),
        ));
        assert_eq!(
            plan.compile(),
            vec![IndexOperation::Delete { key: key("Author", "7") }]
        );
    }

    #[test]
    fn test_cycle_detection_bounds_walk() {
        // Book and Series embed each other.
        let series = EntitySnapshot::new("Series", "s").contained_in("books", book("1", "a"));
        let cyclic = book("1", "a").contained_in("series", series);

        let mut plan = WorkPlan::new(registry_with(true));
        plan.add_work(WorkItem::update(cyclic.clone()));
        assert_eq!(plan.size(), 2);

        let mut plan = WorkPlan::new(registry_with(false));
        plan.add_work(WorkItem::update(cyclic));
        assert_eq!(plan.size(), 2);
    }

    #[test]
    fn test_depth_budget() {
        let budget = DepthBudget::unbounded().narrow(2);
        assert!(!budget.is_exhausted());
        assert!(!budget.descend().is_exhausted());
        assert!(budget.descend().descend().is_exhausted());
        assert!(budget.descend().descend().descend().is_exhausted());
        assert_eq!(DepthBudget::new(5).narrow(1), DepthBudget::new(1));
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut plan = plan();
        plan.add_work(WorkItem::add(book("1", "a")));
        plan.add_work(WorkItem::purge_all("Author"));
        plan.clear();
        assert!(plan.is_empty());
        assert!(plan.compile().is_empty());
    }
}
