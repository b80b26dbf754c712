use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::board::{self, BoardSection};
use crate::calendar::{self, CalendarCell, DayDetail, YearMonth};
use crate::clock::{format_date, Clock, SystemClock};
use crate::completion::{validate_id, CompletionKey, TaskScope};
use crate::error::{Result, RoutineError};
use crate::model::{Collection, Habit, Progress, RoutineGroup, Snapshot};
use crate::notifications::{Notice, NotificationSink};
use crate::ordering::{self, MoveDirection, OrderAssignment};
use crate::progress::{self, DailyProgress};
use crate::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, FieldValue, Fields, Filter,
    SnapshotListener, Subscription, WriteBatch,
};
use crate::tasks::TaskUniverse;

pub const DEFAULT_APP_ID: &str = "default-app-id";
pub const DEFAULT_PROGRESS_WINDOW_DAYS: u32 = 30;

const NOTIFICATION_TIME_FORMAT: &str = "%H:%M";

pub type ChangeListener = Arc<dyn Fn(Collection) + Send + Sync>;

struct Shared {
    state: RwLock<Snapshot>,
    listeners: RwLock<Vec<ChangeListener>>,
}

/// Input of the routine builder, for both new and edited routines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutineDraft {
    pub name: String,
    pub habit_ids: Vec<String>,
    pub group_id: Option<String>,
    pub notification_time: Option<String>,
}

impl RoutineDraft {
    pub fn new(name: impl Into<String>, habit_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            habit_ids,
            ..Self::default()
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn notify_at(mut self, time: impl Into<String>) -> Self {
        self.notification_time = Some(time.into());
        self
    }
}

/// Live view of one user's habits, routines, groups and recent progress.
///
/// The store pushes snapshots into the service; every read is computed from
/// the latest one and every write goes back through the store.
pub struct RoutineService {
    app_id: String,
    user_id: String,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    progress_window_days: u32,
    shared: Arc<Shared>,
    subscriptions: Mutex<Vec<Subscription>>,
    progress_subscription: Mutex<Option<(NaiveDate, Subscription)>>,
    notification_sink: Option<Box<dyn NotificationSink>>,
}

pub struct RoutineServiceBuilder {
    app_id: String,
    user_id: Option<String>,
    store: Option<Arc<dyn DocumentStore>>,
    clock: Arc<dyn Clock>,
    progress_window_days: u32,
    notification_sink: Option<Box<dyn NotificationSink>>,
    listeners: Vec<ChangeListener>,
}

impl Default for RoutineServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutineServiceBuilder {
    pub fn new() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            user_id: None,
            store: None,
            clock: Arc::new(SystemClock),
            progress_window_days: DEFAULT_PROGRESS_WINDOW_DAYS,
            notification_sink: None,
            listeners: Vec::new(),
        }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn progress_window_days(mut self, days: u32) -> Self {
        self.progress_window_days = days;
        self
    }

    pub fn with_notification_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    /// Registered before the first snapshots arrive, so it sees the initial load.
    pub fn on_change(mut self, listener: impl Fn(Collection) + Send + Sync + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn build(self) -> Result<RoutineService> {
        let user_id = self
            .user_id
            .filter(|user_id| !user_id.trim().is_empty())
            .ok_or_else(|| RoutineError::Config("a signed-in user id is required".to_string()))?;
        if user_id.contains('/') || self.app_id.is_empty() || self.app_id.contains('/') {
            return Err(RoutineError::Config(format!(
                "invalid store location for app `{}` and user `{}`",
                self.app_id, user_id
            )));
        }
        let store = self
            .store
            .ok_or_else(|| RoutineError::Config("no document store configured".to_string()))?;

        let service = RoutineService {
            app_id: self.app_id,
            user_id,
            store,
            clock: self.clock,
            progress_window_days: self.progress_window_days,
            shared: Arc::new(Shared {
                state: RwLock::new(Snapshot::default()),
                listeners: RwLock::new(self.listeners),
            }),
            subscriptions: Mutex::new(Vec::new()),
            progress_subscription: Mutex::new(None),
            notification_sink: self.notification_sink,
        };
        service.subscribe_all()?;
        Ok(service)
    }
}

impl RoutineService {
    pub fn builder() -> RoutineServiceBuilder {
        RoutineServiceBuilder::new()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn collection(&self, collection: Collection) -> CollectionPath {
        collection.path(&self.app_id, &self.user_id)
    }

    pub fn on_change(&self, listener: impl Fn(Collection) + Send + Sync + 'static) {
        self.shared.listeners.write().push(Arc::new(listener));
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.read().clone()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// First date covered by the live progress feed.
    pub fn progress_window_start(&self) -> NaiveDate {
        let today = self.clock.today();
        today
            .checked_sub_days(Days::new(u64::from(self.progress_window_days)))
            .unwrap_or(today)
    }

    /// Moves the progress feed forward after the local date rolls over.
    /// Returns `false` when the current window is still correct.
    #[instrument(skip(self))]
    pub fn refresh_progress_window(&self) -> Result<bool> {
        let start = self.progress_window_start();
        let mut slot = self.progress_subscription.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == start) {
            return Ok(false);
        }
        let subscription = self.store.subscribe(
            &self.collection(Collection::Progress),
            Some(Filter::DocumentIdAtLeast(format_date(start))),
            feed(&self.shared, Collection::Progress),
        )?;
        debug!(%start, "progress window subscribed");
        // The previous guard drops here and closes the old feed.
        *slot = Some((start, subscription));
        Ok(true)
    }

    pub fn today_progress(&self) -> DailyProgress {
        let today = self.clock.today();
        let state = self.shared.state.read();
        let universe = TaskUniverse::resolve(self.clock.day(today), &state.habits, &state.routines);
        progress::aggregate(&universe, state.completed_on(today))
    }

    /// Today's checklist, grouped the same way as the calendar day detail.
    pub fn dashboard(&self) -> DayDetail {
        self.day_detail(self.clock.today())
    }

    pub fn day_detail(&self, date: NaiveDate) -> DayDetail {
        calendar::day_detail(date, self.clock.as_ref(), &self.shared.state.read())
    }

    pub fn calendar_month(&self, month: YearMonth) -> Vec<CalendarCell> {
        calendar::build_month(month, self.clock.as_ref(), &self.shared.state.read())
    }

    pub fn routine_board(&self) -> Vec<BoardSection> {
        board::routine_board(&self.shared.state.read())
    }

    pub fn habits(&self) -> Vec<Habit> {
        board::habit_list(&self.shared.state.read())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Flips one habit's completion for today. Returns whether it is now completed.
    #[instrument(skip(self))]
    pub fn toggle_habit(&self, habit_id: &str, scope: TaskScope) -> Result<bool> {
        let key = CompletionKey::new(scope, habit_id);
        key.validate()?;
        let encoded = key.encode();
        let today = self.clock.today();
        let was_completed = self
            .shared
            .state
            .read()
            .completed_on(today)
            .iter()
            .any(|existing| *existing == encoded);

        let mut fields = Fields::new();
        fields.insert("date".into(), FieldValue::of(format_date(today)));
        fields.insert("lastUpdated".into(), FieldValue::ServerTimestamp);
        let change = vec![Value::String(encoded.clone())];
        fields.insert(
            "completedHabits".into(),
            if was_completed {
                FieldValue::ArrayRemove(change)
            } else {
                FieldValue::ArrayUnion(change)
            },
        );

        let path = self.progress_path(today);
        match self.store.set(&path, fields, true) {
            Ok(()) => {
                info!(key = %encoded, completed = !was_completed, "progress updated");
                Ok(!was_completed)
            }
            Err(err) => {
                warn!(key = %encoded, %err, "failed to update progress");
                self.report(Notice::ProgressUpdateFailed);
                Err(err.into())
            }
        }
    }

    /// Adds a habit named after the trimmed `input`.
    ///
    /// The buffer is cleared once the name is accepted and restored if the
    /// store rejects the write. Empty input is ignored without a notice.
    #[instrument(skip(self, input))]
    pub fn add_habit(&self, input: &mut String) -> Result<String> {
        let name = input.trim().to_string();
        if name.is_empty() {
            return Err(RoutineError::EmptyHabitName);
        }
        let lowered = name.to_lowercase();
        let duplicate = self
            .shared
            .state
            .read()
            .habits
            .iter()
            .any(|habit| habit.name.trim().to_lowercase() == lowered);
        if duplicate {
            self.report(Notice::DuplicateHabit);
            return Err(RoutineError::DuplicateHabit(name));
        }

        input.clear();
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(name.as_str()));
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        fields.insert("userId".into(), FieldValue::of(self.user_id.as_str()));
        match self.store.add(&self.collection(Collection::Habits), fields) {
            Ok(id) => {
                info!(%id, %name, "habit added");
                Ok(id)
            }
            Err(err) => {
                warn!(%name, %err, "failed to add habit");
                *input = name;
                self.report(Notice::HabitAddFailed);
                Err(err.into())
            }
        }
    }

    /// Deletes a habit and removes it from every routine in the same batch.
    /// Completion keys already stored for it are left in place.
    #[instrument(skip(self))]
    pub fn delete_habit(&self, habit_id: &str) -> Result<()> {
        let routines = self.collection(Collection::Routines);
        let mut batch = WriteBatch::new();
        for routine in self
            .shared
            .state
            .read()
            .routines
            .iter()
            .filter(|routine| routine.habit_ids.iter().any(|id| id == habit_id))
        {
            let mut fields = Fields::new();
            fields.insert(
                "habitIds".into(),
                FieldValue::ArrayRemove(vec![Value::String(habit_id.to_string())]),
            );
            batch.update(routines.doc(routine.id.as_str()), fields);
        }
        batch.delete(self.collection(Collection::Habits).doc(habit_id));

        let writes = batch.len();
        self.commit(batch, Notice::HabitDeleted, Notice::HabitDeleteFailed)?;
        info!(habit_id, writes, "habit deleted");
        Ok(())
    }

    /// Creates a routine, or updates `editing` in place. Returns the routine id.
    #[instrument(skip(self))]
    pub fn save_routine(&self, draft: &RoutineDraft, editing: Option<&str>) -> Result<String> {
        let name = draft.name.trim();
        if name.is_empty() || draft.habit_ids.is_empty() {
            self.report(Notice::RoutineValidation);
            return Err(RoutineError::InvalidRoutine);
        }
        for habit_id in &draft.habit_ids {
            validate_id(habit_id)?;
        }
        let notification_time = match draft.notification_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(time) => {
                NaiveTime::parse_from_str(time, NOTIFICATION_TIME_FORMAT)
                    .map_err(|_| RoutineError::InvalidNotificationTime(time.to_string()))?;
                Some(time.to_string())
            }
        };

        let (order, existing) = {
            let state = self.shared.state.read();
            if let Some(group_id) = draft.group_id.as_deref() {
                if state.group(group_id).is_none() {
                    return Err(RoutineError::UnknownGroup(group_id.to_string()));
                }
            }
            let existing = match editing {
                Some(id) => Some(
                    state
                        .routine(id)
                        .cloned()
                        .ok_or_else(|| RoutineError::UnknownRoutine(id.to_string()))?,
                ),
                None => None,
            };
            let moves_group = existing
                .as_ref()
                .map_or(true, |routine| routine.group_id != draft.group_id);
            let order = moves_group.then(|| {
                ordering::next_order(ordering::section_siblings(
                    &state.routines,
                    &state.groups,
                    draft.group_id.as_deref(),
                ))
            });
            (order, existing)
        };

        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(name));
        fields.insert(
            "habitIds".into(),
            FieldValue::of(draft.habit_ids.clone()),
        );
        fields.insert("groupId".into(), optional(draft.group_id.as_deref()));
        fields.insert("notificationTime".into(), optional(notification_time.as_deref()));
        if let Some(order) = order {
            fields.insert("order".into(), FieldValue::of(order));
        }

        let result = match existing {
            Some(routine) => {
                fields.insert("updatedAt".into(), FieldValue::ServerTimestamp);
                self.store
                    .set(&self.collection(Collection::Routines).doc(routine.id.as_str()), fields, true)
                    .map(|()| (routine.id, Notice::RoutineUpdated))
            }
            None => {
                fields.insert("userId".into(), FieldValue::of(self.user_id.as_str()));
                fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
                self.store
                    .add(&self.collection(Collection::Routines), fields)
                    .map(|id| (id, Notice::RoutineSaved))
            }
        };
        match result {
            Ok((id, notice)) => {
                info!(%id, name, "routine saved");
                self.report(notice);
                Ok(id)
            }
            Err(err) => {
                warn!(name, %err, "failed to save routine");
                self.report(Notice::RoutineSaveFailed);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub fn delete_routine(&self, routine_id: &str) -> Result<()> {
        let path = self.collection(Collection::Routines).doc(routine_id);
        match self.store.delete(&path) {
            Ok(()) => {
                info!(routine_id, "routine deleted");
                self.report(Notice::RoutineDeleted);
                Ok(())
            }
            Err(err) => {
                warn!(routine_id, %err, "failed to delete routine");
                self.report(Notice::RoutineDeleteFailed);
                Err(err.into())
            }
        }
    }

    /// Creates a group at the end of the group list.
    #[instrument(skip(self))]
    pub fn create_group(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoutineError::EmptyGroupName);
        }
        let order = ordering::next_order(self.shared.state.read().groups.iter());
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(name));
        fields.insert("userId".into(), FieldValue::of(self.user_id.as_str()));
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        fields.insert("order".into(), FieldValue::of(order));
        match self.store.add(&self.collection(Collection::RoutineGroups), fields) {
            Ok(id) => {
                info!(%id, name, order, "group created");
                self.report(Notice::GroupSaved);
                Ok(id)
            }
            Err(err) => {
                warn!(name, %err, "failed to create group");
                self.report(Notice::GroupSaveFailed);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub fn rename_group(&self, group_id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoutineError::EmptyGroupName);
        }
        if self.shared.state.read().group(group_id).is_none() {
            return Err(RoutineError::UnknownGroup(group_id.to_string()));
        }
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(name));
        let path = self.collection(Collection::RoutineGroups).doc(group_id);
        match self.store.update(&path, fields) {
            Ok(()) => {
                info!(group_id, name, "group renamed");
                self.report(Notice::GroupSaved);
                Ok(())
            }
            Err(err) => {
                warn!(group_id, %err, "failed to rename group");
                self.report(Notice::GroupSaveFailed);
                Err(err.into())
            }
        }
    }

    /// Deletes a group and ungroups its routines in one batch.
    #[instrument(skip(self))]
    pub fn delete_group(&self, group_id: &str) -> Result<()> {
        let routines = self.collection(Collection::Routines);
        let mut batch = WriteBatch::new();
        for routine in self
            .shared
            .state
            .read()
            .routines
            .iter()
            .filter(|routine| routine.group_id.as_deref() == Some(group_id))
        {
            let mut fields = Fields::new();
            fields.insert("groupId".into(), FieldValue::null());
            batch.update(routines.doc(routine.id.as_str()), fields);
        }
        batch.delete(self.collection(Collection::RoutineGroups).doc(group_id));

        let ungrouped = batch.len() - 1;
        self.commit(batch, Notice::GroupDeleted, Notice::GroupDeleteFailed)?;
        info!(group_id, ungrouped, "group deleted");
        Ok(())
    }

    /// Moves a routine within the section it is listed in. Returns the committed
    /// order changes, empty when the routine already sits at that edge.
    #[instrument(skip(self))]
    pub fn move_routine(&self, routine_id: &str, direction: MoveDirection) -> Result<Vec<OrderAssignment>> {
        let plan = {
            let state = self.shared.state.read();
            let routine = state
                .routine(routine_id)
                .ok_or_else(|| RoutineError::UnknownRoutine(routine_id.to_string()))?;
            let section = ordering::listed_group(routine, &state.groups);
            let siblings = ordering::section_siblings(&state.routines, &state.groups, section);
            ordering::plan_move(&siblings, routine_id, direction).unwrap_or_default()
        };
        self.commit_orders(
            Collection::Routines,
            plan,
            Notice::RoutineReordered,
            Notice::RoutineReorderFailed,
        )
    }

    #[instrument(skip(self))]
    pub fn move_group(&self, group_id: &str, direction: MoveDirection) -> Result<Vec<OrderAssignment>> {
        let plan = {
            let state = self.shared.state.read();
            let groups: Vec<&RoutineGroup> = state.groups.iter().collect();
            ordering::plan_move(&groups, group_id, direction)
                .ok_or_else(|| RoutineError::UnknownGroup(group_id.to_string()))?
        };
        self.commit_orders(
            Collection::RoutineGroups,
            plan,
            Notice::GroupReordered,
            Notice::GroupReorderFailed,
        )
    }

    fn commit_orders(
        &self,
        collection: Collection,
        plan: Vec<OrderAssignment>,
        success: Notice,
        failure: Notice,
    ) -> Result<Vec<OrderAssignment>> {
        if plan.is_empty() {
            debug!(?collection, "move is a no-op");
            return Ok(plan);
        }
        let path = self.collection(collection);
        let mut batch = WriteBatch::new();
        for assignment in &plan {
            let mut fields = Fields::new();
            fields.insert("order".into(), FieldValue::of(assignment.order));
            batch.update(path.doc(assignment.id.as_str()), fields);
        }
        self.commit(batch, success, failure)?;
        info!(?collection, writes = plan.len(), "order updated");
        Ok(plan)
    }

    fn commit(&self, batch: WriteBatch, success: Notice, failure: Notice) -> Result<()> {
        match self.store.commit(batch) {
            Ok(()) => {
                self.report(success);
                Ok(())
            }
            Err(err) => {
                warn!(%err, "batch commit failed");
                self.report(failure);
                Err(err.into())
            }
        }
    }

    fn progress_path(&self, date: NaiveDate) -> DocumentPath {
        self.collection(Collection::Progress).doc(format_date(date))
    }

    fn report(&self, notice: Notice) {
        if let Some(sink) = &self.notification_sink {
            sink.notify(notice);
        }
    }

    fn subscribe_all(&self) -> Result<()> {
        let mut subscriptions = Vec::new();
        for collection in [Collection::Habits, Collection::Routines, Collection::RoutineGroups] {
            subscriptions.push(self.store.subscribe(
                &self.collection(collection),
                None,
                feed(&self.shared, collection),
            )?);
        }
        *self.subscriptions.lock() = subscriptions;
        self.refresh_progress_window()?;
        Ok(())
    }
}

fn optional(value: Option<&str>) -> FieldValue {
    value.map_or_else(FieldValue::null, FieldValue::of)
}

/// Listener that installs a pushed collection into the snapshot, then fans out.
fn feed(shared: &Arc<Shared>, collection: Collection) -> SnapshotListener {
    let shared = Arc::clone(shared);
    Arc::new(move |docs: &[Document]| {
        {
            let mut state = shared.state.write();
            match collection {
                Collection::Habits => state.habits = decode_all(docs, "id"),
                Collection::Routines => state.routines = decode_all(docs, "id"),
                Collection::RoutineGroups => state.groups = decode_all(docs, "id"),
                Collection::Progress => {
                    state.progress = decode_all::<Progress>(docs, "date")
                        .into_iter()
                        .map(|progress| (progress.date, progress))
                        .collect();
                }
            }
        }
        debug!(?collection, documents = docs.len(), "snapshot applied");
        let listeners = shared.listeners.read().clone();
        for listener in listeners {
            listener(collection);
        }
    })
}

fn decode_all<T: DeserializeOwned>(docs: &[Document], id_field: &str) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode(id_field) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(id = %doc.id, %err, "skipping undecodable document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory_store::MemoryStore;
    use crate::notifications::NoticeLog;
    use crate::tasks::fixtures::at;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: MemoryStore,
        clock: Arc<FixedClock>,
        notices: Arc<NoticeLog>,
        service: RoutineService,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::utc(at(2025, 3, 10, 9)));
        let store_clock = clock.clone();
        let store = MemoryStore::with_clock(move || store_clock.now());
        let notices = Arc::new(NoticeLog::new());
        let service = RoutineService::builder()
            .user("u1")
            .store(Arc::new(store.clone()))
            .clock(clock.clone())
            .with_notification_sink(Box::new(notices.clone()))
            .build()
            .expect("service");
        Harness {
            store,
            clock,
            notices,
            service,
        }
    }

    fn add(h: &Harness, name: &str) -> String {
        let mut input = name.to_string();
        h.service.add_habit(&mut input).expect("add habit")
    }

    #[test]
    fn build_requires_user_and_store() {
        let missing_user = RoutineService::builder()
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(matches!(missing_user, Err(RoutineError::Config(_))));

        let missing_store = RoutineService::builder().user("u1").build();
        assert!(matches!(missing_store, Err(RoutineError::Config(_))));
    }

    #[test]
    fn add_habit_trims_rejects_duplicates_and_clears_input() {
        let h = harness();
        let mut input = "  Read  ".to_string();
        let id = h.service.add_habit(&mut input).unwrap();
        assert!(input.is_empty());
        let habit = h.service.snapshot().habit(&id).cloned().unwrap();
        assert_eq!(habit.name, "Read");
        assert_eq!(habit.user_id, "u1");
        assert_eq!(habit.created_at, Some(at(2025, 3, 10, 9)));

        let mut duplicate = "read".to_string();
        assert!(matches!(
            h.service.add_habit(&mut duplicate),
            Err(RoutineError::DuplicateHabit(_))
        ));
        assert_eq!(duplicate, "read");
        assert_eq!(h.notices.drain(), vec![Notice::DuplicateHabit]);

        let mut blank = "   ".to_string();
        assert!(matches!(h.service.add_habit(&mut blank), Err(RoutineError::EmptyHabitName)));
        assert!(h.notices.drain().is_empty());
    }

    #[test]
    fn failed_add_restores_input() {
        let h = harness();
        h.store.set_offline(true);
        let mut input = " Walk ".to_string();
        assert!(matches!(h.service.add_habit(&mut input), Err(RoutineError::Store(_))));
        assert_eq!(input, "Walk");
        assert_eq!(h.notices.drain(), vec![Notice::HabitAddFailed]);
        assert!(h.service.snapshot().habits.is_empty());
    }

    #[test]
    fn toggle_flips_and_twice_restores() {
        let h = harness();
        let a = add(&h, "A");
        assert!(h.service.toggle_habit(&a, TaskScope::Standalone).unwrap());
        let key = format!("standalone_{a}");
        let today = h.service.today();
        assert_eq!(h.service.snapshot().completed_on(today), &[key]);
        assert_eq!(h.service.today_progress().completed, 1);

        assert!(!h.service.toggle_habit(&a, TaskScope::Standalone).unwrap());
        assert!(h.service.snapshot().completed_on(today).is_empty());

        let doc = h.store.get(&h.service.progress_path(today)).unwrap();
        assert_eq!(doc["date"], json!("2025-03-10"));
        assert!(doc["lastUpdated"].is_string());
    }

    #[test]
    fn toggle_rejects_ambiguous_ids_and_reports_store_failures() {
        let h = harness();
        assert!(matches!(
            h.service.toggle_habit("bad_id", TaskScope::Standalone),
            Err(RoutineError::InvalidId(_))
        ));
        h.store.set_offline(true);
        assert!(h.service.toggle_habit("h1", TaskScope::routine("r1")).is_err());
        assert_eq!(h.notices.drain(), vec![Notice::ProgressUpdateFailed]);
    }

    #[test]
    fn save_routine_validates_and_appends_to_group() {
        let h = harness();
        let a = add(&h, "A");
        assert!(matches!(
            h.service.save_routine(&RoutineDraft::new(" ", vec![a.clone()]), None),
            Err(RoutineError::InvalidRoutine)
        ));
        assert!(matches!(
            h.service.save_routine(&RoutineDraft::new("Morning", vec![]), None),
            Err(RoutineError::InvalidRoutine)
        ));
        assert!(matches!(
            h.service.save_routine(&RoutineDraft::new("Morning", vec![a.clone()]).notify_at("25:00"), None),
            Err(RoutineError::InvalidNotificationTime(_))
        ));
        assert_eq!(
            h.notices.drain(),
            vec![Notice::RoutineValidation, Notice::RoutineValidation]
        );

        let first = h
            .service
            .save_routine(&RoutineDraft::new("Morning", vec![a.clone()]).notify_at("07:30"), None)
            .unwrap();
        let second = h
            .service
            .save_routine(&RoutineDraft::new("Evening", vec![a.clone()]), None)
            .unwrap();
        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.routine(&first).unwrap().order, 0);
        assert_eq!(snapshot.routine(&second).unwrap().order, 1);
        assert_eq!(
            snapshot.routine(&first).unwrap().notification_time.as_deref(),
            Some("07:30")
        );

        h.clock.set(at(2025, 3, 11, 9));
        let edited = h
            .service
            .save_routine(&RoutineDraft::new("Evening wind-down", vec![a]), Some(&second))
            .unwrap();
        assert_eq!(edited, second);
        let routine = h.service.snapshot().routine(&second).cloned().unwrap();
        assert_eq!(routine.name, "Evening wind-down");
        assert_eq!(routine.order, 1, "same group keeps its position");
        assert_eq!(routine.created_at, Some(at(2025, 3, 10, 9)));
        assert_eq!(routine.updated_at, Some(at(2025, 3, 11, 9)));
        assert_eq!(
            h.notices.drain(),
            vec![Notice::RoutineSaved, Notice::RoutineSaved, Notice::RoutineUpdated]
        );
    }

    #[test]
    fn moving_a_routine_into_a_group_puts_it_last() {
        let h = harness();
        let a = add(&h, "A");
        let group = h.service.create_group("Weekdays").unwrap();
        let grouped = h
            .service
            .save_routine(&RoutineDraft::new("Gym", vec![a.clone()]).in_group(&group), None)
            .unwrap();
        let loose = h
            .service
            .save_routine(&RoutineDraft::new("Read", vec![a.clone()]), None)
            .unwrap();
        h.service
            .save_routine(&RoutineDraft::new("Read", vec![a]).in_group(&group), Some(&loose))
            .unwrap();

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.routine(&grouped).unwrap().order, 0);
        let moved = snapshot.routine(&loose).unwrap();
        assert_eq!(moved.group_id.as_deref(), Some(group.as_str()));
        assert_eq!(moved.order, 1);
    }

    #[test]
    fn routines_with_a_deleted_group_reorder_with_the_ungrouped_ones() {
        let h = harness();
        let routines = h.service.collection(Collection::Routines);
        for (id, order, group) in [("R3", 0, None), ("R4", 5, Some("gone"))] {
            let mut fields = Fields::new();
            fields.insert("name".into(), FieldValue::of(id));
            fields.insert("habitIds".into(), FieldValue::of(json!([])));
            fields.insert("order".into(), FieldValue::of(order));
            fields.insert("groupId".into(), optional(group));
            h.store.set(&routines.doc(id), fields, false).unwrap();
        }

        let plan = h.service.move_routine("R4", MoveDirection::Up).unwrap();
        assert_eq!(
            plan,
            vec![
                OrderAssignment { id: "R4".into(), order: 0 },
                OrderAssignment { id: "R3".into(), order: 5 },
            ]
        );
        let board = h.service.routine_board();
        let ids: Vec<&str> = board[0].routines.iter().map(|r| r.routine_id.as_str()).collect();
        assert_eq!(ids, vec!["R4", "R3"]);

        let a = add(&h, "A");
        let loose = h
            .service
            .save_routine(&RoutineDraft::new("Walk", vec![a]), None)
            .unwrap();
        assert_eq!(h.service.snapshot().routine(&loose).unwrap().order, 6);
    }

    #[test]
    fn unknown_targets_are_errors() {
        let h = harness();
        assert!(matches!(
            h.service.move_routine("nope", MoveDirection::Up),
            Err(RoutineError::UnknownRoutine(_))
        ));
        assert!(matches!(
            h.service.move_group("nope", MoveDirection::Up),
            Err(RoutineError::UnknownGroup(_))
        ));
        assert!(matches!(
            h.service.rename_group("nope", "x"),
            Err(RoutineError::UnknownGroup(_))
        ));
        assert!(matches!(h.service.create_group("  "), Err(RoutineError::EmptyGroupName)));
    }

    #[test]
    fn groups_reorder_and_rename() {
        let h = harness();
        let first = h.service.create_group("Morning").unwrap();
        let second = h.service.create_group("Evening").unwrap();

        let plan = h.service.move_group(&second, MoveDirection::Up).unwrap();
        assert_eq!(plan.len(), 2);
        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.group(&second).unwrap().order, 0);
        assert_eq!(snapshot.group(&first).unwrap().order, 1);

        assert!(h.service.move_group(&second, MoveDirection::Up).unwrap().is_empty());

        h.service.rename_group(&first, " Dawn ").unwrap();
        assert_eq!(h.service.snapshot().group(&first).unwrap().name, "Dawn");
        assert_eq!(
            h.notices.drain(),
            vec![
                Notice::GroupSaved,
                Notice::GroupSaved,
                Notice::GroupReordered,
                Notice::GroupSaved
            ]
        );
    }

    #[test]
    fn change_listeners_see_initial_load_and_writes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = RoutineService::builder()
            .user("u1")
            .store(Arc::new(MemoryStore::new()))
            .on_change(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let mut input = "Stretch".to_string();
        service.add_habit(&mut input).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn progress_window_follows_the_date() {
        let h = harness();
        let progress = h.service.collection(Collection::Progress);
        for date in ["2025-02-07", "2025-02-08", "2025-03-10"] {
            let mut fields = Fields::new();
            fields.insert("completedHabits".into(), FieldValue::of(vec!["standalone_x"]));
            h.store.set(&progress.doc(date), fields, false).unwrap();
        }
        let dates: Vec<String> = h.service.snapshot().progress.keys().map(|d| format_date(*d)).collect();
        assert_eq!(dates, vec!["2025-02-08", "2025-03-10"]);
        assert!(!h.service.refresh_progress_window().unwrap());

        h.clock.set(at(2025, 3, 12, 9));
        assert!(h.service.refresh_progress_window().unwrap());
        let dates: Vec<String> = h.service.snapshot().progress.keys().map(|d| format_date(*d)).collect();
        assert_eq!(dates, vec!["2025-03-10"]);
    }

    #[test]
    fn undecodable_documents_are_skipped() {
        let h = harness();
        let habits = h.service.collection(Collection::Habits);
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(42));
        h.store.set(&habits.doc("broken"), fields, false).unwrap();
        let ok = add(&h, "Fine");
        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.habits.len(), 1);
        assert_eq!(snapshot.habits[0].id, ok);
    }
}
