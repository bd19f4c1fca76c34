use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::db::{DatabaseError, EventStore};

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteEventStore, SqlitePool, build_pool};
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "sqlite")]
    sqlite_pool: SqlitePool,
    event_store: Arc<dyn EventStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        #[cfg(feature = "sqlite")]
        {
            let path = config.sqlite_path().ok_or_else(|| {
                DatabaseError::Connection("database.url must point to a sqlite file".to_string())
            })?;

            let pool = build_pool(&path)?;
            let event_store = Arc::new(SqliteEventStore::new(pool.clone()));

            Ok(Self {
                sqlite_pool: pool,
                event_store,
            })
        }

        #[cfg(not(feature = "sqlite"))]
        {
            let _ = config;
            Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            ))
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        #[cfg(feature = "sqlite")]
        {
            Self::migrate_sqlite(&self.sqlite_pool).await
        }

        #[cfg(not(feature = "sqlite"))]
        {
            Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            ))
        }
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(pool: &SqlitePool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    event_id TEXT PRIMARY KEY NOT NULL,
                    title TEXT NOT NULL,
                    date_str TEXT NOT NULL,
                    time_str TEXT NOT NULL,
                    deadline_str TEXT,
                    teams TEXT NOT NULL,
                    color INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    message_id INTEGER NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    reminded INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    closed_at TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS registrations (
                    event_id TEXT NOT NULL,
                    user_id INTEGER NOT NULL,
                    username TEXT NOT NULL,
                    team TEXT NOT NULL,
                    role TEXT NOT NULL,
                    availability TEXT NOT NULL,
                    weapons TEXT,
                    joined_at TEXT NOT NULL,
                    PRIMARY KEY (event_id, user_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS attendance_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_id TEXT NOT NULL,
                    recorded_on TEXT NOT NULL,
                    user_id INTEGER NOT NULL,
                    username TEXT NOT NULL,
                    status TEXT NOT NULL
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_events_closed_at ON events(closed_at)",
                "CREATE INDEX IF NOT EXISTS idx_registrations_joined_at ON registrations(event_id, joined_at)",
                "CREATE INDEX IF NOT EXISTS idx_attendance_history_user ON attendance_history(user_id, status)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.event_store.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, Utc};
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{
        Availability, AvailabilityTag, DatabaseError, DeliveryLocation, EventStore, NewEvent,
        Registration, Role, Slot, Weapon,
    };

    /// Migrated store on a throwaway file; keep the file handle alive for the test.
    pub(crate) async fn temp_store() -> (NamedTempFile, Arc<dyn EventStore>) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            url: None,
            filename: Some(file.path().to_string_lossy().to_string()),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        (file, manager.event_store())
    }

    pub(crate) fn sample_event() -> NewEvent {
        NewEvent {
            title: "Guild War Roster".to_string(),
            date_expr: "Today".to_string(),
            match_time: "19:30".to_string(),
            deadline_time: None,
            teams: vec!["Team ATK".to_string(), "Team Flex".to_string()],
            color: 0x00f7ff,
            location: DeliveryLocation {
                channel_id: 10,
                message_id: 20,
            },
        }
    }

    pub(crate) fn team_registration(
        event_id: Uuid,
        user_id: u64,
        name: &str,
        team: &str,
        role: Role,
    ) -> Registration {
        Registration {
            event_id,
            user_id,
            display_name: name.to_string(),
            slot: Slot::Team {
                team: team.to_string(),
                role,
                availability: Availability::from_tags([AvailabilityTag::FullTime]),
                weapons: Vec::new(),
            },
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_event_roundtrip() {
        let (_file, store) = temp_store().await;

        let created = store.create_event(&sample_event()).await.expect("create");
        assert!(created.active);
        assert!(!created.reminded);

        let fetched = store.get_event(created.id).await.expect("get");
        assert_eq!(fetched, created);
        assert_eq!(fetched.teams, vec!["Team ATK", "Team Flex"]);

        store.set_active(created.id, false).await.expect("lock");
        assert!(store.get_event(created.id).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let (_file, store) = temp_store().await;
        let missing = Uuid::new_v4();

        assert!(matches!(
            store.get_event(missing).await,
            Err(DatabaseError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            store.set_active(missing, false).await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn upsert_replaces_instead_of_duplicating() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();

        let first = team_registration(event.id, 7, "Kai", "Team ATK", Role::Dps);
        store.upsert_registration(&first).await.expect("insert");

        let mut second = team_registration(event.id, 7, "Kai", "Team Flex", Role::Tank);
        second.joined_at = first.joined_at + Duration::minutes(5);
        if let Slot::Team { weapons, .. } = &mut second.slot {
            weapons.push(Weapon::Spear);
        }
        store.upsert_registration(&second).await.expect("replace");

        let rows = store.list_registrations(event.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slot, second.slot);
        // joined_at keeps the first sign-up time
        assert_eq!(
            rows[0].joined_at.timestamp_micros(),
            first.joined_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn absence_roundtrips_reason_through_role_column() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();

        let absence = Registration {
            event_id: event.id,
            user_id: 3,
            display_name: "Mali".to_string(),
            slot: Slot::Absence {
                reason: "working late".to_string(),
            },
            joined_at: Utc::now(),
        };
        store.upsert_registration(&absence).await.unwrap();

        let rows = store.list_registrations(event.id).await.unwrap();
        assert_eq!(
            rows[0].slot,
            Slot::Absence {
                reason: "working late".to_string()
            }
        );
    }

    #[tokio::test]
    async fn registrations_list_in_join_order() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        let base = Utc::now();

        for (offset, user) in [(2, 30u64), (0, 10), (1, 20)] {
            let mut reg = team_registration(event.id, user, "x", "Team ATK", Role::Dps);
            reg.joined_at = base + Duration::seconds(offset);
            store.upsert_registration(&reg).await.unwrap();
        }

        let users: Vec<u64> = store
            .list_registrations(event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn locked_event_rejects_writes_but_allows_reads() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        let reg = team_registration(event.id, 1, "A", "Team ATK", Role::Heal);
        store.upsert_registration(&reg).await.unwrap();

        store.set_active(event.id, false).await.unwrap();

        assert!(matches!(
            store.upsert_registration(&reg).await,
            Err(DatabaseError::Locked(_))
        ));
        assert!(matches!(
            store.remove_registration(event.id, 1).await,
            Err(DatabaseError::Locked(_))
        ));
        assert_eq!(store.list_registrations(event.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_event_cascades_registrations() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        store
            .upsert_registration(&team_registration(event.id, 1, "A", "Team ATK", Role::Tank))
            .await
            .unwrap();

        store.delete_event(event.id).await.expect("delete");

        assert!(matches!(
            store.get_event(event.id).await,
            Err(DatabaseError::NotFound(_))
        ));
        assert!(store.list_registrations(event.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reschedule_clears_reminder_flag() {
        let (_file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        store.set_reminded(event.id, true).await.unwrap();

        store
            .reschedule(event.id, "25/12", "20:00", Some("19:45"))
            .await
            .unwrap();

        let moved = store.get_event(event.id).await.unwrap();
        assert!(!moved.reminded);
        assert_eq!(moved.date_expr, "25/12");
        assert_eq!(moved.match_time, "20:00");
        assert_eq!(moved.deadline_time.as_deref(), Some("19:45"));
    }

    #[tokio::test]
    async fn closing_archives_attendance_and_feeds_leaderboard() {
        let (_file, store) = temp_store().await;
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        for _ in 0..2 {
            let event = store.create_event(&sample_event()).await.unwrap();
            store
                .upsert_registration(&team_registration(event.id, 1, "A", "Team ATK", Role::Tank))
                .await
                .unwrap();
            store
                .upsert_registration(&Registration {
                    event_id: event.id,
                    user_id: 2,
                    display_name: "B".to_string(),
                    slot: Slot::Absence {
                        reason: "sick".to_string(),
                    },
                    joined_at: Utc::now(),
                })
                .await
                .unwrap();
            assert_eq!(store.close_event(event.id, day, Utc::now()).await.unwrap(), 2);
        }

        assert!(store.list_live_events().await.unwrap().is_empty());

        let board = store.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, 1);
        assert_eq!(board[0].joined_count, 2);
    }

    #[tokio::test]
    async fn closing_twice_does_not_archive_again() {
        let (_file, store) = temp_store().await;
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let event = store.create_event(&sample_event()).await.unwrap();
        store
            .upsert_registration(&team_registration(event.id, 1, "A", "Team ATK", Role::Dps))
            .await
            .unwrap();

        assert_eq!(store.close_event(event.id, day, Utc::now()).await.unwrap(), 1);
        let closed = store.get_event(event.id).await.unwrap();
        assert!(closed.is_closed());
        assert!(closed.is_locked());

        assert!(matches!(
            store.close_event(event.id, day, Utc::now()).await,
            Err(DatabaseError::Closed(id)) if id == event.id
        ));
        assert!(matches!(
            store.close_event(Uuid::new_v4(), day, Utc::now()).await,
            Err(DatabaseError::NotFound(_))
        ));
        assert_eq!(store.leaderboard(10).await.unwrap()[0].joined_count, 1);
    }
}
