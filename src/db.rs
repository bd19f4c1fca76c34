pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    ABSENCE_TEAM, Availability, AvailabilityTag, DeliveryLocation, Event, LeaderboardEntry,
    NewEvent, Registration, Role, RosterBucket, Slot, Weapon,
};
pub use self::stores::EventStore;

pub mod error;
pub mod manager;
pub mod models;
pub mod stores;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
