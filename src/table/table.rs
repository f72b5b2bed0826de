//! Generic table orchestrator
//!
//! Owns the column set, sort order, restriction and row membership of one
//! table. Every membership change funnels through the same pipeline:
//! fetch a batch, resolve sub-restrictions once, match each row, account
//! it in the category registry, then place it in the index.
//!
//! All mutable state sits behind one lock held for the full duration of
//! each public operation. Reloads build a complete new view before swapping
//! it in, so a failed reload leaves the previous view untouched.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::category::{Category, CategoryId, CategoryInfo, CategoryRegistry};
use crate::config::TableConfig;
use crate::errors::{TableError, TableResult};
use crate::index::{Bookmark, MemoryIndex, ObjectId, RowAction, RowIndex, RowKey, SortKey};
use crate::observability::{log_event, Event, MetricsSnapshot, ObservationScope, TableMetrics};
use crate::props::tags::{
    MSGFLAG_READ, PR_CONTENT_COUNT, PR_CONTENT_UNREAD, PR_DEPTH, PR_ENTRYID, PR_INSTANCE_KEY,
    PR_MESSAGE_FLAGS, PR_OBJECT_ID, PR_ROW_TYPE,
};
use crate::props::{PropTag, PropValue, PropertyBag};
use crate::restriction::{RelOp, Restriction, RowMatcher, SubRestrictionResults, SubRestrictionRunner};

use super::loader::{NotificationSink, PermissionCheck, RowLoader};
use super::notify::TableNotification;
use super::row::{RowProjector, TableRow};
use super::sort::{SortColumn, SortOrderSet};

/// Columns reported before `set_columns` is called
pub const DEFAULT_COLUMNS: [PropTag; 3] = [PR_OBJECT_ID, PR_INSTANCE_KEY, PR_ROW_TYPE];

/// Kind of membership change fed to `update_rows`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    /// Everything may have changed; rebuild from the loader
    WholeTableInvalidated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
            ChangeKind::WholeTableInvalidated => "invalidated",
        }
    }
}

/// Options of `query_rows`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    /// Read the rows before the cursor, nearest first
    pub reverse: bool,
    /// Leave the cursor where it is
    pub no_advance: bool,
}

impl QueryFlags {
    pub fn reverse() -> Self {
        Self {
            reverse: true,
            no_advance: false,
        }
    }

    pub fn no_advance() -> Self {
        Self {
            reverse: false,
            no_advance: true,
        }
    }
}

/// Installed restriction with its sub-restriction subtrees
struct Filter {
    matcher: RowMatcher,
    subs: SubRestrictionRunner,
    columns: Vec<PropTag>,
}

impl Filter {
    fn new(restriction: Restriction, max_depth: usize) -> TableResult<Self> {
        let matcher = RowMatcher::new(restriction, max_depth)?;
        let subs = SubRestrictionRunner::new(matcher.restriction(), max_depth)?;
        let mut columns = matcher.restriction().columns();
        columns.push(PR_OBJECT_ID);
        Ok(Self {
            matcher,
            subs,
            columns,
        })
    }

    fn batch_size(&self, config: &TableConfig) -> usize {
        config.batch_size_for(!self.subs.is_empty()).max(1)
    }

    fn resolve(&self, loader: &dyn RowLoader, parents: &[ObjectId]) -> TableResult<SubRestrictionResults> {
        if self.subs.is_empty() {
            return Ok(SubRestrictionResults::default());
        }
        self.subs.run(loader, parents)
    }
}

fn is_computed(tag: PropTag) -> bool {
    matches!(
        tag,
        PR_INSTANCE_KEY | PR_ROW_TYPE | PR_DEPTH | PR_CONTENT_COUNT | PR_CONTENT_UNREAD
    )
}

/// Unread unless the read bit is set. Rows without flags count as read.
fn is_unread(row: &PropertyBag) -> bool {
    matches!(row.get(PR_MESSAGE_FLAGS), Some(PropValue::Long(flags)) if flags & MSGFLAG_READ == 0)
}

fn push_tag(tags: &mut Vec<PropTag>, tag: PropTag) {
    let tag = tag.normalized();
    if !is_computed(tag) && !tags.contains(&tag) {
        tags.push(tag);
    }
}

/// Everything one pass of the row pipeline reads
struct Pipeline<'a> {
    loader: &'a dyn RowLoader,
    sink: &'a dyn NotificationSink,
    metrics: &'a TableMetrics,
    config: &'a TableConfig,
    sort: &'a SortOrderSet,
    filter: Option<&'a Filter>,
    columns: &'a [PropTag],
    /// Multi-valued column objects fan out on
    instance: Option<PropTag>,
    unicode: bool,
    notify: bool,
}

impl<'a> Pipeline<'a> {
    fn projector(&self) -> RowProjector<'a> {
        RowProjector::new(self.columns, self.unicode)
    }

    fn emit(&self, build: impl FnOnce() -> TableNotification) {
        if self.notify {
            self.sink.emit(build());
            self.metrics.increment_notifications();
        }
    }

    /// Tags fetched for membership changes
    fn fetch_tags(&self) -> Vec<PropTag> {
        let mut tags = Vec::new();
        for tag in self.sort.projection() {
            push_tag(&mut tags, tag);
        }
        if let Some(filter) = self.filter {
            for &tag in &filter.columns {
                push_tag(&mut tags, tag);
            }
        }
        for tag in self.column_tags() {
            push_tag(&mut tags, tag);
        }
        push_tag(&mut tags, PR_MESSAGE_FLAGS);
        tags
    }

    /// Tags fetched to project rows for the caller
    fn column_tags(&self) -> Vec<PropTag> {
        let mut tags = Vec::new();
        for &tag in self.columns {
            push_tag(&mut tags, tag);
        }
        if let Some(tag) = self.instance {
            push_tag(&mut tags, tag);
        }
        push_tag(&mut tags, PR_OBJECT_ID);
        tags
    }

    fn batch_size(&self) -> usize {
        match self.filter {
            Some(filter) => filter.batch_size(self.config),
            None => self.config.batch_size.max(1),
        }
    }

    /// Rows the object fans out into; the bag decides when the loader
    /// cannot count.
    fn fan_out(&self, object_id: ObjectId, tag: PropTag, bag: &PropertyBag) -> TableResult<u32> {
        match self.loader.fan_out_count(object_id, tag) {
            Ok(count) => Ok(count.max(1)),
            Err(TableError::NoSupport(_)) => Ok(bag.instance_count(tag)),
            Err(e) => Err(e),
        }
    }

    /// The fan-out row's view of a fetched object
    fn leaf_bag(&self, bags: &HashMap<ObjectId, PropertyBag>, key: RowKey) -> PropertyBag {
        let bag = bags.get(&key.object_id).cloned().unwrap_or_default();
        match self.instance {
            Some(tag) => bag.instance_row(tag, key.order_id),
            None => bag,
        }
    }
}

fn log_fetch_failure(object_id: ObjectId, error: &TableError) {
    let object_id = object_id.to_string();
    log_event(
        Event::RowFetchFailed,
        &[("code", error.code()), ("object_id", object_id.as_str())],
    );
}

/// Index, categories and membership of one sort/restriction combination
struct View<I> {
    index: I,
    categories: CategoryRegistry,
    /// Order ids currently in the index, per object
    members: HashMap<ObjectId, BTreeSet<u32>>,
}

impl<I: RowIndex + Default> View<I> {
    fn new(sort: &SortOrderSet) -> Self {
        Self {
            index: I::default(),
            categories: CategoryRegistry::new(sort.category_levels(), sort.expand_depth()),
            members: HashMap::new(),
        }
    }

    fn is_visible(&self, key: RowKey) -> bool {
        self.index.is_hidden(key) == Some(false)
    }

    // =========================================================================
    // Membership pipeline
    // =========================================================================

    fn add_objects(&mut self, p: &Pipeline<'_>, ids: &[ObjectId]) -> TableResult<()> {
        let tags = p.fetch_tags();

        for chunk in ids.chunks(p.batch_size()) {
            let rows = p.loader.fetch_rows(chunk, &tags)?;
            let subs = match p.filter {
                Some(filter) => filter.resolve(p.loader, chunk)?,
                None => SubRestrictionResults::default(),
            };

            for (&object_id, row) in chunk.iter().zip(rows) {
                match row {
                    Ok(_) if subs.is_failed(object_id) => p.metrics.increment_rows_skipped(),
                    Ok(bag) => self.apply_object(p, object_id, bag, &subs)?,
                    // Gone between notification and fetch
                    Err(TableError::NotFound(_)) => self.delete_object(p, object_id)?,
                    Err(e) if e.is_row_level() => {
                        p.metrics.increment_rows_skipped();
                        log_fetch_failure(object_id, &e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn apply_object(
        &mut self,
        p: &Pipeline<'_>,
        object_id: ObjectId,
        mut bag: PropertyBag,
        subs: &SubRestrictionResults,
    ) -> TableResult<()> {
        if bag.object_id().is_none() {
            bag.insert(PR_OBJECT_ID, PropValue::Long(object_id as i32));
        }

        let count = match p.instance {
            Some(tag) => match p.fan_out(object_id, tag, &bag) {
                Ok(count) => count,
                Err(TableError::NotFound(_)) => return self.delete_object(p, object_id),
                Err(e) if e.is_row_level() => {
                    p.metrics.increment_rows_skipped();
                    log_fetch_failure(object_id, &e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            None => 1,
        };

        // Each fan-out row is matched on its own instance value
        let rows: Vec<PropertyBag> = match p.instance {
            Some(tag) => (0..count).map(|order| bag.instance_row(tag, order)).collect(),
            None => vec![bag],
        };
        let mut kept = Vec::with_capacity(rows.len());
        for (order, row) in (0..count).zip(rows) {
            let matched = match p.filter {
                Some(filter) => filter.matcher.matches(&row, subs)?,
                None => true,
            };
            if matched {
                kept.push((order, row));
            } else {
                p.metrics.increment_rows_filtered();
            }
        }

        let previous = self.members.remove(&object_id).unwrap_or_default();
        for order in previous {
            if !kept.iter().any(|(o, _)| *o == order) {
                self.delete_leaf(p, RowKey::new(object_id, order))?;
            }
        }

        if kept.is_empty() {
            return Ok(());
        }
        for (order, row) in &kept {
            self.upsert_leaf(p, RowKey::new(object_id, *order), row)?;
        }
        self.members
            .insert(object_id, kept.iter().map(|(order, _)| *order).collect());
        Ok(())
    }

    fn upsert_leaf(&mut self, p: &Pipeline<'_>, key: RowKey, row: &PropertyBag) -> TableResult<()> {
        let change = self.categories.add_leaf(key, row, is_unread(row));
        let mut notified = self.apply_structure(p, &change.removed, &change.resorted, &change.created, key)?;

        let category = self.categories.leaf_category(key);
        let sort_keys = p.sort.leaf_sort_keys(row, &self.categories, category);
        let hidden = self.categories.leaf_hidden(key);
        let was_visible = self.is_visible(key);

        let (action, previous) = self.index.update_row(key, sort_keys, hidden);
        if action == RowAction::Added {
            p.metrics.increment_rows_added();
        }

        if hidden {
            if was_visible {
                p.emit(|| TableNotification::deleted(key));
            }
        } else {
            let action = if was_visible { action } else { RowAction::Added };
            let depth = self.categories.depth();
            p.emit(|| {
                TableNotification::new(action, key, previous, Some(p.projector().leaf(key, row, depth)))
            });
        }

        notified.insert(key);
        self.notify_modified(p, &change.modified, &notified);
        Ok(())
    }

    fn delete_object(&mut self, p: &Pipeline<'_>, object_id: ObjectId) -> TableResult<()> {
        let Some(orders) = self.members.remove(&object_id) else {
            return Ok(());
        };
        for order in orders {
            self.delete_leaf(p, RowKey::new(object_id, order))?;
        }
        Ok(())
    }

    fn delete_leaf(&mut self, p: &Pipeline<'_>, key: RowKey) -> TableResult<()> {
        let was_visible = self.is_visible(key);
        if self.index.delete_row(key) {
            p.metrics.increment_rows_deleted();
            if was_visible {
                p.emit(|| TableNotification::deleted(key));
            }
        }

        let change = self.categories.remove_leaf(key);
        let mut notified = self.apply_structure(p, &change.removed, &change.resorted, &[], key)?;
        notified.insert(key);
        self.notify_modified(p, &change.modified, &notified);
        Ok(())
    }

    // =========================================================================
    // Category side effects
    // =========================================================================

    /// Drop released categories, re-sort moved ones, insert new ones.
    /// Returns the rows that already got a notification.
    fn apply_structure(
        &mut self,
        p: &Pipeline<'_>,
        removed: &[RowKey],
        resorted: &[CategoryId],
        created: &[CategoryId],
        leaf: RowKey,
    ) -> TableResult<HashSet<RowKey>> {
        let mut notified = HashSet::new();

        for &key in removed {
            let was_visible = self.is_visible(key);
            if self.index.delete_row(key) {
                p.metrics.increment_categories_removed();
                let category = key.order_id.to_string();
                log_event(Event::CategoryRemoved, &[("category", category.as_str())]);
                if was_visible {
                    p.emit(|| TableNotification::deleted(key));
                }
                notified.insert(key);
            }
        }

        for &id in resorted {
            self.resort(p, id, leaf, &mut notified)?;
        }

        for &id in created {
            let Some(category) = self.categories.get(id) else {
                continue;
            };
            let (key, hidden, depth) = (category.key, category.hidden, category.depth);
            let prefix = self.categories.sort_prefix(id);
            let (action, previous) = self.index.update_row(key, prefix, hidden);

            p.metrics.increment_categories_created();
            let category = key.order_id.to_string();
            let depth = depth.to_string();
            log_event(
                Event::CategoryCreated,
                &[("category", category.as_str()), ("depth", depth.as_str())],
            );
            if !hidden {
                p.emit(|| {
                    TableNotification::new(
                        action,
                        key,
                        previous,
                        p.projector().category(&self.categories, id),
                    )
                });
            }
            notified.insert(key);
        }

        Ok(notified)
    }

    /// Localized re-sort: rewrite the aggregate component of the category
    /// row and of every row under its sort prefix.
    fn resort(
        &mut self,
        p: &Pipeline<'_>,
        id: CategoryId,
        leaf: RowKey,
        notified: &mut HashSet<RowKey>,
    ) -> TableResult<()> {
        let Some(category) = self.categories.get(id) else {
            return Ok(());
        };
        let cat_key = category.key;
        let (Some(position), Some(component)) = (
            self.categories.aggregate_position(category.depth),
            self.categories.aggregate_component(id),
        ) else {
            return Ok(());
        };
        if !self.index.contains(cat_key) {
            return Ok(());
        }

        let mut rows = vec![cat_key];
        rows.extend(self.index.rows_by_sort_prefix(cat_key)?);

        p.metrics.increment_minmax_resorts();
        let category = cat_key.order_id.to_string();
        let count = rows.len().to_string();
        log_event(
            Event::MinMaxResort,
            &[("category", category.as_str()), ("rows", count.as_str())],
        );

        for key in rows {
            let visible = self.is_visible(key);
            let (action, previous) =
                self.index
                    .update_partial_sort_key(key, position, component.clone())?;
            if key == leaf || !visible {
                continue;
            }
            p.emit(|| {
                let row = if key.is_category() {
                    self.categories
                        .id_for_row(key)
                        .and_then(|cid| p.projector().category(&self.categories, cid))
                } else {
                    None
                };
                TableNotification::new(action, key, previous, row)
            });
            notified.insert(key);
        }
        Ok(())
    }

    /// MODIFIED for visible categories whose counts changed
    fn notify_modified(
        &mut self,
        p: &Pipeline<'_>,
        modified: &[CategoryId],
        notified: &HashSet<RowKey>,
    ) {
        if !p.notify {
            return;
        }
        for &id in modified {
            let Some(key) = self.categories.get(id).map(|c| c.key) else {
                continue;
            };
            if notified.contains(&key) || !self.is_visible(key) {
                continue;
            }
            let Some(sort_keys) = self.index.sort_keys(key).map(<[SortKey]>::to_vec) else {
                continue;
            };
            let (_, previous) = self.index.update_row(key, sort_keys, false);
            p.emit(|| {
                TableNotification::new(
                    RowAction::Modified,
                    key,
                    previous,
                    p.projector().category(&self.categories, id),
                )
            });
        }
    }

    // =========================================================================
    // Expand / collapse
    // =========================================================================

    /// Rows that became visible, in table order
    fn expand(&mut self, id: CategoryId) -> TableResult<Vec<RowKey>> {
        let Some(category) = self.categories.get(id) else {
            return Err(TableError::not_found(format!("category {}", id)));
        };
        let (key, hidden) = (category.key, category.hidden);

        if self.categories.set_expanded(id, true) == Some(true) || hidden {
            return Ok(Vec::new());
        }

        let mut shown = self.index.unhide_rows(key)?;
        let mut rehidden = HashSet::new();
        for child in self.categories.descendants(id) {
            let parent_hides = self
                .categories
                .get(child)
                .and_then(|c| c.parent)
                .and_then(|parent| self.categories.get(parent))
                .map_or(false, Category::hides_children);
            self.categories.set_hidden(child, parent_hides);

            if let Some(c) = self.categories.get(child) {
                if !c.hidden && !c.expanded {
                    let child_key = c.key;
                    rehidden.extend(self.index.hide_rows(child_key)?);
                }
            }
        }
        shown.retain(|k| !rehidden.contains(k));
        Ok(shown)
    }

    /// Number of rows hidden
    fn collapse(&mut self, id: CategoryId) -> TableResult<usize> {
        let Some(category) = self.categories.get(id) else {
            return Err(TableError::not_found(format!("category {}", id)));
        };
        let (key, hidden) = (category.key, category.hidden);

        if self.categories.set_expanded(id, false) == Some(false) {
            return Ok(0);
        }
        for child in self.categories.descendants(id) {
            self.categories.set_expanded(child, false);
            self.categories.set_hidden(child, true);
        }
        if hidden {
            return Ok(0);
        }
        Ok(self.index.hide_rows(key)?.len())
    }

    // =========================================================================
    // Reading rows
    // =========================================================================

    /// Fetch leaf objects for `keys`; objects that fail are left out.
    fn load_rows(
        &self,
        p: &Pipeline<'_>,
        keys: &[RowKey],
        tags: &[PropTag],
    ) -> TableResult<HashMap<ObjectId, PropertyBag>> {
        let mut ids: Vec<ObjectId> = keys
            .iter()
            .filter(|k| !k.is_category())
            .map(|k| k.object_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut bags = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(p.config.batch_size.max(1)) {
            for (&object_id, row) in chunk.iter().zip(p.loader.fetch_rows(chunk, tags)?) {
                match row {
                    Ok(mut bag) => {
                        if bag.object_id().is_none() {
                            bag.insert(PR_OBJECT_ID, PropValue::Long(object_id as i32));
                        }
                        bags.insert(object_id, bag);
                    }
                    Err(e) if e.is_row_level() => log_fetch_failure(object_id, &e),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(bags)
    }

    fn project_rows(&self, p: &Pipeline<'_>, keys: &[RowKey]) -> TableResult<Vec<TableRow>> {
        let bags = self.load_rows(p, keys, &p.column_tags())?;
        let projector = p.projector();
        let depth = self.categories.depth();

        Ok(keys
            .iter()
            .filter_map(|&key| {
                if key.is_category() {
                    self.categories
                        .id_for_row(key)
                        .and_then(|id| projector.category(&self.categories, id))
                } else {
                    Some(projector.leaf(key, &p.leaf_bag(&bags, key), depth))
                }
            })
            .collect())
    }

    /// A category row as a property bag, for matching
    fn category_bag(&self, key: RowKey, tags: &[PropTag]) -> PropertyBag {
        self.categories
            .id_for_row(key)
            .and_then(|id| RowProjector::new(tags, true).category(&self.categories, id))
            .map(|row| {
                row.props
                    .into_iter()
                    .filter(|prop| !prop.value.is_error())
                    .map(|prop| (prop.tag, prop.value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Scan from `origin` for the first row matching `filter`
    fn scan(
        &mut self,
        p: &Pipeline<'_>,
        filter: &Filter,
        origin: Bookmark,
        backward: bool,
    ) -> TableResult<Option<RowKey>> {
        self.index.seek(origin, 0)?;
        let batch = filter.batch_size(p.config);

        loop {
            let keys = self.index.query_rows(batch, backward, true);
            if keys.is_empty() {
                return Ok(None);
            }

            let bags = self.load_rows(p, &keys, &filter.columns)?;
            let parents: Vec<ObjectId> = bags.keys().copied().collect();
            let subs = filter.resolve(p.loader, &parents)?;

            for &key in &keys {
                if !key.is_category() && subs.is_failed(key.object_id) {
                    p.metrics.increment_rows_skipped();
                    continue;
                }
                let bag = if key.is_category() {
                    self.category_bag(key, &filter.columns)
                } else {
                    p.leaf_bag(&bags, key)
                };
                if filter.matcher.matches(&bag, &subs)? {
                    return Ok(Some(key));
                }
            }
        }
    }
}

enum FastPath {
    Row(RowKey),
    Missing,
    NotApplicable,
}

struct TableState<I> {
    columns: Vec<PropTag>,
    sort: SortOrderSet,
    filter: Option<Filter>,
    unicode: bool,
    populated: bool,
    view: View<I>,
}

/// A live table over the objects of one row loader.
///
/// `I` is the row index implementation; the in-memory index is the default.
pub struct GenericTable<I: RowIndex + Default = MemoryIndex> {
    loader: Arc<dyn RowLoader>,
    permissions: Arc<dyn PermissionCheck>,
    sink: Arc<dyn NotificationSink>,
    config: TableConfig,
    metrics: TableMetrics,
    state: RwLock<TableState<I>>,
}

impl<I: RowIndex + Default> GenericTable<I> {
    /// Create an empty, unpopulated table. The first read populates it.
    pub fn new(
        loader: Arc<dyn RowLoader>,
        permissions: Arc<dyn PermissionCheck>,
        sink: Arc<dyn NotificationSink>,
        config: TableConfig,
    ) -> Self {
        let sort = SortOrderSet::default();
        let state = TableState {
            columns: DEFAULT_COLUMNS.to_vec(),
            view: View::new(&sort),
            sort,
            filter: None,
            unicode: config.unicode_output,
            populated: false,
        };
        Self {
            loader,
            permissions,
            sink,
            config,
            metrics: TableMetrics::new(),
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> TableResult<RwLockReadGuard<'_, TableState<I>>> {
        self.state
            .read()
            .map_err(|_| TableError::Internal("table state lock poisoned".into()))
    }

    fn write(&self) -> TableResult<RwLockWriteGuard<'_, TableState<I>>> {
        self.state
            .write()
            .map_err(|_| TableError::Internal("table state lock poisoned".into()))
    }

    fn pipeline<'a>(
        &'a self,
        sort: &'a SortOrderSet,
        filter: Option<&'a Filter>,
        columns: &'a [PropTag],
        unicode: bool,
        notify: bool,
    ) -> Pipeline<'a> {
        Pipeline {
            loader: self.loader.as_ref(),
            sink: self.sink.as_ref(),
            metrics: &self.metrics,
            config: &self.config,
            sort,
            filter,
            columns,
            instance: sort
                .instance_column()
                .or_else(|| columns.iter().copied().find(|tag| tag.is_instance())),
            unicode,
            notify,
        }
    }

    /// Build a complete view from every accessible object
    fn build_view(
        &self,
        sort: &SortOrderSet,
        filter: Option<&Filter>,
        columns: &[PropTag],
        unicode: bool,
    ) -> TableResult<View<I>> {
        let ids: Vec<ObjectId> = self
            .loader
            .list_all_object_ids()?
            .into_iter()
            .filter(|&id| self.permissions.can_access(id))
            .collect();

        let mut view = View::new(sort);
        let p = self.pipeline(sort, filter, columns, unicode, false);
        view.add_objects(&p, &ids)?;
        Ok(view)
    }

    fn rebuild(
        &self,
        reason: &str,
        sort: &SortOrderSet,
        filter: Option<&Filter>,
        columns: &[PropTag],
        unicode: bool,
    ) -> TableResult<View<I>> {
        let scope = ObservationScope::with_fields(Event::TableReload.as_str(), &[("reason", reason)]);
        match self.build_view(sort, filter, columns, unicode) {
            Ok(view) => {
                self.metrics.increment_reloads();
                let rows = view.index.len().to_string();
                scope.complete_with_fields(&[("rows", rows.as_str())]);
                Ok(view)
            }
            Err(e) => {
                scope.fail(e.code());
                Err(e)
            }
        }
    }

    /// Populate once, on first use
    fn ensure_populated(&self, state: &mut TableState<I>) -> TableResult<()> {
        if state.populated {
            return Ok(());
        }
        log_event(Event::PopulateBegin, &[]);
        let view = self.build_view(
            &state.sort,
            state.filter.as_ref(),
            &state.columns,
            state.unicode,
        )?;
        let rows = view.index.len().to_string();
        let categories = view.categories.len().to_string();
        state.view = view;
        state.populated = true;
        log_event(
            Event::PopulateComplete,
            &[("categories", categories.as_str()), ("rows", rows.as_str())],
        );
        Ok(())
    }

    // =========================================================================
    // Columns, sort order, restriction
    // =========================================================================

    /// Replace the column projection. Does not change membership unless the
    /// multi-valued instance column changes.
    pub fn set_columns(&self, columns: Vec<PropTag>) -> TableResult<()> {
        let mut instances = columns.iter().filter(|tag| tag.is_instance());
        let column_instance = instances.next().copied();
        if instances.any(|tag| Some(*tag) != column_instance) {
            return Err(TableError::too_complex(
                "more than one multi-valued instance column",
            ));
        }

        let mut state = self.write()?;
        let sort_instance = state.sort.instance_column();
        if let (Some(sort_tag), Some(column_tag)) = (sort_instance, column_instance) {
            if sort_tag.normalized() != column_tag.normalized() {
                return Err(TableError::too_complex(
                    "instance column differs from the instance sort column",
                ));
            }
        }

        let old_instance = sort_instance
            .or_else(|| state.columns.iter().copied().find(|tag| tag.is_instance()));
        let new_instance = sort_instance.or(column_instance);
        if state.populated && old_instance != new_instance {
            let view = self.rebuild(
                "columns",
                &state.sort,
                state.filter.as_ref(),
                &columns,
                state.unicode,
            )?;
            state.view = view;
        }
        state.columns = columns;
        Ok(())
    }

    pub fn columns(&self) -> TableResult<Vec<PropTag>> {
        Ok(self.read()?.columns.clone())
    }

    /// Report string columns as unicode or as 8-bit strings
    pub fn set_unicode_output(&self, unicode: bool) -> TableResult<()> {
        self.write()?.unicode = unicode;
        Ok(())
    }

    /// Install a sort order. Identical orders are a no-op; anything else
    /// rebuilds the table.
    pub fn set_sort_order(
        &self,
        columns: Vec<SortColumn>,
        category_depth: usize,
        expand_depth: usize,
    ) -> TableResult<()> {
        let sort = match SortOrderSet::new(columns, category_depth, expand_depth) {
            Ok(sort) => sort,
            Err(e) => {
                log_event(Event::SortRejected, &[("code", e.code())]);
                return Err(e);
            }
        };

        let mut state = self.write()?;
        if state.sort == sort {
            return Ok(());
        }
        if let (Some(sort_tag), Some(column_tag)) = (
            sort.instance_column(),
            state.columns.iter().find(|tag| tag.is_instance()),
        ) {
            if sort_tag.normalized() != column_tag.normalized() {
                let e = TableError::too_complex("instance sort column differs from the instance column");
                log_event(Event::SortRejected, &[("code", e.code())]);
                return Err(e);
            }
        }

        state.view = if state.populated {
            self.rebuild(
                "sort",
                &sort,
                state.filter.as_ref(),
                &state.columns,
                state.unicode,
            )?
        } else {
            View::new(&sort)
        };

        let columns = sort.columns().len().to_string();
        let depth = sort.category_depth().to_string();
        state.sort = sort;
        log_event(
            Event::SortApplied,
            &[("category_depth", depth.as_str()), ("columns", columns.as_str())],
        );
        Ok(())
    }

    pub fn sort_order(&self) -> TableResult<SortOrderSet> {
        Ok(self.read()?.sort.clone())
    }

    /// Replace the restriction (`None` clears it) and re-filter. The cursor
    /// returns to the beginning. A malformed restriction leaves the table
    /// unchanged.
    pub fn restrict(&self, restriction: Option<Restriction>) -> TableResult<()> {
        let max_depth = self.config.max_restriction_depth;
        let filter = match restriction.map(|r| Filter::new(r, max_depth)).transpose() {
            Ok(filter) => filter,
            Err(e) => {
                log_event(Event::RestrictionRejected, &[("code", e.code())]);
                return Err(e);
            }
        };

        let mut state = self.write()?;
        state.view = if state.populated {
            self.rebuild(
                "restriction",
                &state.sort,
                filter.as_ref(),
                &state.columns,
                state.unicode,
            )?
        } else {
            View::new(&state.sort)
        };

        let active = if filter.is_some() { "true" } else { "false" };
        let subs = filter
            .as_ref()
            .map_or(0, |f| f.matcher.restriction().sub_restriction_count())
            .to_string();
        state.filter = filter;
        log_event(
            Event::RestrictionApplied,
            &[("active", active), ("sub_restrictions", subs.as_str())],
        );
        Ok(())
    }

    pub fn restriction(&self) -> TableResult<Option<Restriction>> {
        Ok(self
            .read()?
            .filter
            .as_ref()
            .map(|f| f.matcher.restriction().clone()))
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Read up to `max` rows from the cursor
    pub fn query_rows(&self, max: usize, flags: QueryFlags) -> TableResult<Vec<TableRow>> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;

        let TableState {
            columns,
            sort,
            filter,
            unicode,
            view,
            ..
        } = &mut *state;
        let keys = view.index.query_rows(max, flags.reverse, !flags.no_advance);
        let p = self.pipeline(sort, filter.as_ref(), columns, *unicode, false);
        view.project_rows(&p, &keys)
    }

    /// Move the cursor to the first row matching `restriction`, scanning
    /// from `origin`. A backward scan examines the rows before `origin`.
    ///
    /// On failure the cursor is left where it was.
    pub fn find_row(
        &self,
        restriction: Restriction,
        origin: Bookmark,
        backward: bool,
    ) -> TableResult<RowKey> {
        let filter = Filter::new(restriction, self.config.max_restriction_depth)?;

        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;

        let TableState {
            columns,
            sort,
            filter: current,
            unicode,
            view,
            ..
        } = &mut *state;

        match self.fast_path(view, filter.matcher.restriction())? {
            FastPath::Row(key) if view.is_visible(key) => {
                self.metrics.increment_find_row_fast_path();
                log_event(Event::FindRowFastPath, &[("found", "true")]);
                view.index.seek_to_row(key)?;
                return Ok(key);
            }
            FastPath::Row(_) | FastPath::Missing => {
                self.metrics.increment_find_row_fast_path();
                log_event(Event::FindRowFastPath, &[("found", "false")]);
                return Err(TableError::not_found("no row matches"));
            }
            FastPath::NotApplicable => {}
        }

        self.metrics.increment_find_row_scans();
        let p = self.pipeline(sort, current.as_ref(), columns, *unicode, false);
        let saved = view.index.create_bookmark()?;
        let result = view.scan(&p, &filter, origin, backward);

        let found = match result {
            Ok(Some(key)) => {
                view.index.seek_to_row(key)?;
                Ok(key)
            }
            Ok(None) => {
                view.index.seek(Bookmark::Id(saved), 0)?;
                Err(TableError::not_found("no row matches"))
            }
            Err(e) => {
                view.index.seek(Bookmark::Id(saved), 0)?;
                Err(e)
            }
        };
        view.index.free_bookmark(saved)?;

        let outcome = if found.is_ok() { "true" } else { "false" };
        log_event(Event::FindRowScan, &[("found", outcome)]);
        found
    }

    /// Single-value equality on the instance key or entry id
    fn fast_path(&self, view: &View<I>, restriction: &Restriction) -> TableResult<FastPath> {
        let Restriction::Property {
            relop: RelOp::Eq,
            tag,
            value,
        } = restriction
        else {
            return Ok(FastPath::NotApplicable);
        };
        let PropValue::Binary(bytes) = &value.value else {
            return Ok(FastPath::NotApplicable);
        };

        match *tag {
            PR_INSTANCE_KEY => Ok(match RowKey::from_instance_key(bytes) {
                Some(key) => FastPath::Row(key),
                None => FastPath::Missing,
            }),
            PR_ENTRYID => match self.loader.object_id_for_entry_id(bytes) {
                Ok(object_id) => Ok(view
                    .members
                    .get(&object_id)
                    .and_then(|orders| {
                        orders
                            .iter()
                            .map(|&order| RowKey::new(object_id, order))
                            .find(|&key| view.is_visible(key))
                    })
                    .map_or(FastPath::Missing, FastPath::Row)),
                Err(TableError::NoSupport(_)) => Ok(FastPath::NotApplicable),
                Err(TableError::NotFound(_)) => Ok(FastPath::Missing),
                Err(e) => Err(e),
            },
            _ => Ok(FastPath::NotApplicable),
        }
    }

    /// Move the cursor `delta` rows from `origin`; returns rows moved
    pub fn seek_row(&self, origin: Bookmark, delta: i64) -> TableResult<i64> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;
        state.view.index.seek(origin, delta)
    }

    /// (visible rows, cursor position)
    pub fn row_count(&self) -> TableResult<(usize, usize)> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;
        Ok(state.view.index.row_count())
    }

    pub fn create_bookmark(&self) -> TableResult<u32> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;
        state.view.index.create_bookmark()
    }

    pub fn free_bookmark(&self, id: u32) -> TableResult<()> {
        self.write()?.view.index.free_bookmark(id)
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// Show a category's rows. Returns up to `max` of the rows that became
    /// visible and whether more did.
    pub fn expand_row(&self, key: RowKey, max: usize) -> TableResult<(Vec<TableRow>, bool)> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;

        let TableState {
            columns,
            sort,
            filter,
            unicode,
            view,
            ..
        } = &mut *state;
        let id = view
            .categories
            .id_for_row(key)
            .ok_or_else(|| TableError::not_found(format!("category {:?}", key)))?;

        let shown = view.expand(id)?;
        let more = shown.len() > max;
        let p = self.pipeline(sort, filter.as_ref(), columns, *unicode, false);
        let rows = view.project_rows(&p, &shown[..shown.len().min(max)])?;
        Ok((rows, more))
    }

    /// Hide a category's rows. Returns the number of rows hidden.
    pub fn collapse_row(&self, key: RowKey) -> TableResult<usize> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;

        let id = state
            .view
            .categories
            .id_for_row(key)
            .ok_or_else(|| TableError::not_found(format!("category {:?}", key)))?;
        state.view.collapse(id)
    }

    /// Every category, in creation order
    pub fn categories(&self) -> TableResult<Vec<CategoryInfo>> {
        let mut state = self.write()?;
        self.ensure_populated(&mut state)?;

        let registry = &state.view.categories;
        let mut infos: Vec<CategoryInfo> = registry
            .iter()
            .filter_map(|(id, _)| registry.info(id))
            .collect();
        infos.sort_by_key(|info| info.key);
        Ok(infos)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Apply a membership change.
    ///
    /// Add and Modify consult the permission check; denied objects are
    /// dropped silently. Before the table is populated only an `initial`
    /// load is applied; other changes are picked up by the populate.
    pub fn update_rows(
        &self,
        kind: ChangeKind,
        ids: &[ObjectId],
        notify: bool,
        initial: bool,
    ) -> TableResult<()> {
        let mut state = self.write()?;
        if !state.populated && !initial {
            return Ok(());
        }

        if kind == ChangeKind::WholeTableInvalidated {
            let view = self.rebuild(
                kind.as_str(),
                &state.sort,
                state.filter.as_ref(),
                &state.columns,
                state.unicode,
            )?;
            state.view = view;
            state.populated = true;
            log_event(Event::TableInvalidated, &[]);
            if notify && !initial {
                self.sink.emit(TableNotification::reload());
                self.metrics.increment_notifications();
            }
            return Ok(());
        }

        let TableState {
            columns,
            sort,
            filter,
            unicode,
            view,
            populated,
        } = &mut *state;
        let p = self.pipeline(sort, filter.as_ref(), columns, *unicode, notify && !initial);

        match kind {
            ChangeKind::Delete => {
                for &object_id in ids {
                    view.delete_object(&p, object_id)?;
                }
            }
            ChangeKind::Add | ChangeKind::Modify => {
                let allowed: Vec<ObjectId> = ids
                    .iter()
                    .copied()
                    .filter(|&id| self.permissions.can_access(id))
                    .collect();
                view.add_objects(&p, &allowed)?;
            }
            ChangeKind::WholeTableInvalidated => {}
        }

        if initial {
            *populated = true;
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Table over the in-memory index
pub type Table = GenericTable<MemoryIndex>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::config::TableConfig;
    use crate::props::tags::{PR_MESSAGE_DELIVERY_TIME, PR_SENDER_NAME, PR_SUBJECT};
    use crate::restriction::{ContentFlags, FuzzyLevel, SubObject};
    use crate::table::loader::AllowAll;

    struct Store {
        rows: Mutex<HashMap<ObjectId, PropertyBag>>,
    }

    impl Store {
        fn new(rows: &[(ObjectId, &str, &str, i64)]) -> Arc<Self> {
            let rows = rows
                .iter()
                .map(|&(id, subject, sender, time)| {
                    (
                        id,
                        PropertyBag::new()
                            .with(PR_OBJECT_ID, PropValue::Long(id as i32))
                            .with(PR_SUBJECT, PropValue::string(subject))
                            .with(PR_SENDER_NAME, PropValue::string(sender))
                            .with(PR_MESSAGE_DELIVERY_TIME, PropValue::SysTime(time)),
                    )
                })
                .collect();
            Arc::new(Self {
                rows: Mutex::new(rows),
            })
        }

        fn remove(&self, id: ObjectId) {
            self.rows.lock().unwrap().remove(&id);
        }
    }

    impl RowLoader for Store {
        fn fetch_rows(
            &self,
            ids: &[ObjectId],
            _tags: &[PropTag],
        ) -> TableResult<Vec<TableResult<PropertyBag>>> {
            let rows = self.rows.lock().unwrap();
            Ok(ids
                .iter()
                .map(|id| {
                    rows.get(id)
                        .cloned()
                        .ok_or_else(|| TableError::not_found(id.to_string()))
                })
                .collect())
        }

        fn fetch_child_ids(&self, _parent: ObjectId, _kind: SubObject) -> TableResult<Vec<ObjectId>> {
            Ok(Vec::new())
        }

        fn fan_out_count(&self, _object_id: ObjectId, _tag: PropTag) -> TableResult<u32> {
            Err(TableError::NoSupport("fan-out count".into()))
        }

        fn list_all_object_ids(&self) -> TableResult<Vec<ObjectId>> {
            let mut ids: Vec<_> = self.rows.lock().unwrap().keys().copied().collect();
            ids.sort_unstable();
            Ok(ids)
        }
    }

    fn table(store: Arc<Store>) -> Table {
        Table::new(
            store,
            Arc::new(AllowAll),
            Arc::new(super::super::loader::DiscardSink),
            TableConfig::default(),
        )
    }

    fn subjects(rows: &[TableRow]) -> Vec<String> {
        rows.iter()
            .filter_map(|r| r.get(PR_SUBJECT).and_then(PropValue::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_lazy_populate_and_sort() {
        let t = table(Store::new(&[(1, "b", "x", 1), (2, "a", "x", 2), (3, "c", "y", 3)]));
        t.set_columns(vec![PR_SUBJECT]).unwrap();
        t.set_sort_order(vec![SortColumn::asc(PR_SUBJECT)], 0, 0).unwrap();
        assert_eq!(t.metrics().reloads, 0);

        let rows = t.query_rows(10, QueryFlags::default()).unwrap();
        assert_eq!(subjects(&rows), vec!["a", "b", "c"]);
        assert_eq!(t.row_count().unwrap(), (3, 3));
    }

    #[test]
    fn test_identical_sort_is_noop() {
        let t = table(Store::new(&[(1, "a", "x", 1)]));
        t.row_count().unwrap();
        t.set_sort_order(vec![SortColumn::asc(PR_SUBJECT)], 0, 0).unwrap();
        t.set_sort_order(vec![SortColumn::asc(PR_SUBJECT)], 0, 0).unwrap();
        assert_eq!(t.metrics().reloads, 1);
    }

    #[test]
    fn test_bad_restriction_keeps_table() {
        let t = table(Store::new(&[(1, "a", "x", 1), (2, "b", "x", 2)]));
        t.row_count().unwrap();
        let bad = Restriction::property(RelOp::Eq, PR_SUBJECT, PropValue::Long(3));
        assert!(matches!(t.restrict(Some(bad)), Err(TableError::InvalidType(_))));
        assert_eq!(t.row_count().unwrap().0, 2);
        assert!(t.restriction().unwrap().is_none());
    }

    #[test]
    fn test_soft_delete_on_vanished_row() {
        let store = Store::new(&[(1, "a", "x", 1), (2, "b", "x", 2)]);
        let t = table(store.clone());
        t.row_count().unwrap();
        store.remove(2);
        t.update_rows(ChangeKind::Modify, &[2], false, false).unwrap();
        assert_eq!(t.row_count().unwrap().0, 1);
    }

    #[test]
    fn test_find_row_restores_cursor() {
        let t = table(Store::new(&[(1, "a", "x", 1), (2, "b", "x", 2), (3, "c", "x", 3)]));
        t.set_sort_order(vec![SortColumn::asc(PR_SUBJECT)], 0, 0).unwrap();
        t.seek_row(Bookmark::Beginning, 1).unwrap();

        let missing = Restriction::content(
            PR_SUBJECT,
            "zzz",
            FuzzyLevel::Full,
            ContentFlags::default(),
        );
        assert!(matches!(
            t.find_row(missing, Bookmark::Beginning, false),
            Err(TableError::NotFound(_))
        ));
        assert_eq!(t.row_count().unwrap().1, 1);

        let c = Restriction::content(PR_SUBJECT, "c", FuzzyLevel::Full, ContentFlags::default());
        assert_eq!(t.find_row(c, Bookmark::Beginning, false).unwrap(), RowKey::new(3, 0));
        assert_eq!(t.row_count().unwrap().1, 2);
        assert_eq!(t.metrics().find_row_scans, 2);
    }

    #[test]
    fn test_collapse_and_expand() {
        let t = table(Store::new(&[(1, "a", "x", 1), (2, "b", "x", 2), (3, "c", "y", 3)]));
        t.set_columns(vec![PR_SUBJECT]).unwrap();
        t.set_sort_order(
            vec![SortColumn::asc(PR_SENDER_NAME), SortColumn::asc(PR_SUBJECT)],
            1,
            1,
        )
        .unwrap();
        assert_eq!(t.row_count().unwrap().0, 5);

        let x = t.categories().unwrap()[0].key;
        assert_eq!(t.collapse_row(x).unwrap(), 2);
        assert_eq!(t.row_count().unwrap().0, 3);
        assert_eq!(t.collapse_row(x).unwrap(), 0);

        let (rows, more) = t.expand_row(x, 1).unwrap();
        assert_eq!(subjects(&rows), vec!["a"]);
        assert!(more);
        assert_eq!(t.row_count().unwrap().0, 5);
    }
}
