//! Read-only views derived from day records: upcoming reminders and
//! per-space completion statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::authority::{Capability, RoleAuthority};
use crate::ids::{DateKey, SpaceId};
use crate::model::{Account, MediaKind, Role, Task};
use crate::records::PartitionedRecordStore;
use crate::spaces::SpaceRegistry;
use crate::TrackerError;

pub const DEFAULT_REMINDER_WINDOW_DAYS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reminder {
    pub space_id: SpaceId,
    pub date_key: DateKey,
    pub task: Task,
    pub days_left: i64,
}

/// Incomplete tasks dated within `[today, today + window_days]`, soonest first.
///
/// # Errors
/// Returns an access denial when the viewer may not see tasks in `space_id`.
pub fn reminders(
    store: &PartitionedRecordStore,
    viewer: &Account,
    space_id: &SpaceId,
    today: Date,
    window_days: i64,
) -> Result<Vec<Reminder>, TrackerError> {
    RoleAuthority::check(viewer, Capability::ViewTasks, space_id)?;

    let mut upcoming = Vec::new();
    let Some(partition) = store.partition(space_id) else {
        return Ok(upcoming);
    };
    for (date_key, record) in partition {
        let days_left = (date_key.date() - today).whole_days();
        if !(0..=window_days).contains(&days_left) {
            continue;
        }
        upcoming.extend(record.tasks.iter().filter(|task| !task.completed).map(|task| Reminder {
            space_id: space_id.clone(),
            date_key: *date_key,
            task: task.clone(),
            days_left,
        }));
    }
    upcoming.sort_by(|a, b| a.days_left.cmp(&b.days_left).then(a.date_key.cmp(&b.date_key)));
    Ok(upcoming)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpaceStatistics {
    pub space_id: SpaceId,
    pub display_name: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: u32,
    pub media: BTreeMap<MediaKind, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsReport {
    pub spaces: Vec<SpaceStatistics>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: u32,
    pub media: BTreeMap<MediaKind, usize>,
}

fn completion_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let rate = (completed * 200 + total) / (total * 2);
    u32::try_from(rate).unwrap_or(100)
}

/// Task and media totals for every space the viewer may see: all spaces for
/// root, otherwise only `active_space`.
///
/// # Errors
/// Returns an access denial when a non-root viewer may not see tasks in
/// `active_space`.
pub fn space_statistics(
    store: &PartitionedRecordStore,
    registry: &SpaceRegistry,
    viewer: &Account,
    active_space: &SpaceId,
) -> Result<StatisticsReport, TrackerError> {
    let visible = if viewer.role == Role::Root {
        registry.all().into_iter().map(|space| space.id).collect::<Vec<_>>()
    } else {
        RoleAuthority::check(viewer, Capability::ViewTasks, active_space)?;
        vec![active_space.clone()]
    };

    let mut report = StatisticsReport::default();
    for space_id in visible {
        let mut stats = SpaceStatistics {
            display_name: registry.display_name(&space_id),
            space_id: space_id.clone(),
            total_tasks: 0,
            completed_tasks: 0,
            completion_rate: 0,
            media: BTreeMap::new(),
        };
        for record in store.partition(&space_id).into_iter().flat_map(BTreeMap::values) {
            stats.total_tasks += record.tasks.len();
            stats.completed_tasks += record.tasks.iter().filter(|task| task.completed).count();
            for item in &record.media {
                *stats.media.entry(item.kind).or_default() += 1;
            }
        }
        stats.completion_rate = completion_rate(stats.completed_tasks, stats.total_tasks);

        report.total_tasks += stats.total_tasks;
        report.completed_tasks += stats.completed_tasks;
        for (kind, count) in &stats.media {
            *report.media.entry(*kind).or_default() += count;
        }
        report.spaces.push(stats);
    }
    report.completion_rate = completion_rate(report.completed_tasks, report.total_tasks);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use time::macros::date;
    use time::OffsetDateTime;

    use super::*;
    use crate::ids::AccountId;
    use crate::model::{DayRecord, MediaItem};
    use crate::secret::PasswordSecret;
    use crate::spaces::NewSpace;

    fn account(role: Role, home: &SpaceId) -> Account {
        Account {
            id: AccountId::generate(),
            username: "someone".to_string(),
            display_name: "Someone".to_string(),
            password_secret: PasswordSecret::from_stored("secret"),
            role,
            home_space_id: home.clone(),
            active: true,
            permission_overrides: BTreeMap::new(),
        }
    }

    fn record_with(space_id: &SpaceId, day: Date, tasks: &[(&str, bool)]) -> DayRecord {
        let mut record = DayRecord::empty(space_id.clone(), DateKey::new(day));
        for (text, completed) in tasks {
            let mut task = Task::new(*text);
            task.completed = *completed;
            record.tasks.push(task);
        }
        record
    }

    #[test]
    fn reminders_cover_the_window_and_skip_completed_tasks() -> Result<(), TrackerError> {
        let space_id = SpaceId::from_raw("riyadh");
        let mut store = PartitionedRecordStore::default();
        store.store(record_with(&space_id, date!(2024 - 05 - 03), &[("order cement", false)]));
        store.store(record_with(&space_id, date!(2024 - 05 - 01), &[("pay crew", false), ("done", true)]));
        store.store(record_with(&space_id, date!(2024 - 04 - 30), &[("overdue", false)]));
        store.store(record_with(&space_id, date!(2024 - 05 - 07), &[("too far", false)]));

        let member = account(Role::Member, &space_id);
        let upcoming = reminders(&store, &member, &space_id, date!(2024 - 05 - 01), 5)?;
        let texts = upcoming.iter().map(|r| r.task.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["pay crew", "order cement"]);
        assert_eq!(upcoming[1].days_left, 2);
        Ok(())
    }

    #[test]
    fn reminders_are_scoped_to_the_viewer_space() {
        let store = PartitionedRecordStore::default();
        let member = account(Role::Member, &SpaceId::from_raw("riyadh"));
        let result = reminders(&store, &member, &SpaceId::from_raw("jeddah"), date!(2024 - 05 - 01), 5);
        assert!(result.is_err_and(|err| err.is_scope_denied()));
    }

    #[test]
    fn statistics_aggregate_tasks_and_media() -> Result<(), TrackerError> {
        let mut registry = SpaceRegistry::default();
        let space = NewSpace { display_name: "Riyadh".to_string(), accent_color: None, seat_limit: 3 }
            .into_space(OffsetDateTime::UNIX_EPOCH)?;
        let space_id = space.id.clone();
        registry.insert(space)?;

        let mut store = PartitionedRecordStore::default();
        let mut record =
            record_with(&space_id, date!(2024 - 05 - 01), &[("a", true), ("b", false), ("c", true)]);
        record.attach_media(MediaItem::new(MediaKind::Audio, "blob:a", "memo.webm", OffsetDateTime::UNIX_EPOCH));
        store.store(record);
        store.store(record_with(&SpaceId::master(), date!(2024 - 05 - 02), &[("hq", false)]));

        let manager = account(Role::Manager, &space_id);
        let scoped = space_statistics(&store, &registry, &manager, &space_id)?;
        assert_eq!(scoped.spaces.len(), 1);
        assert_eq!(scoped.total_tasks, 3);
        assert_eq!(scoped.completed_tasks, 2);
        assert_eq!(scoped.completion_rate, 67);
        assert_eq!(scoped.media.get(&MediaKind::Audio), Some(&1));

        let root = account(Role::Root, &SpaceId::master());
        let global = space_statistics(&store, &registry, &root, &SpaceId::master())?;
        assert_eq!(global.spaces.len(), 2);
        assert_eq!(global.total_tasks, 4);
        assert_eq!(global.completion_rate, 50);
        Ok(())
    }
}
