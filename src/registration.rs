//! Interactive sign-up flow: role, team, availability and an optional weapon
//! loadout, committed as a single registration write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::RegistrationConfig;
use crate::db::{Availability, AvailabilityTag, Event, Registration, Role, Weapon};
use crate::roster::{RosterError, RosterService, SignUp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    RoleSelect,
    TeamSelect {
        role: Role,
    },
    AvailabilitySelect {
        role: Role,
        team: String,
    },
    AwaitingCustomAvailability {
        role: Role,
        team: String,
    },
    WeaponSelect {
        role: Role,
        team: String,
        availability: Availability,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowInput {
    Role(Role),
    Team(String),
    Availability(Vec<AvailabilityTag>),
    /// "Other" was picked; a free-text answer follows.
    RequestCustomAvailability,
    CustomAvailability(String),
    Weapons(Vec<Weapon>),
    SkipWeapons,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(FlowState),
    Ready(SignUp),
}

fn invalid(message: &str) -> RosterError {
    RosterError::Validation(message.to_string())
}

/// Pure step function. Errors leave the caller's state untouched.
pub fn advance(
    state: &FlowState,
    input: FlowInput,
    event: &Event,
    weapon_select: bool,
) -> Result<Transition, RosterError> {
    match (state, input) {
        (FlowState::RoleSelect, FlowInput::Role(role)) => {
            if !Role::SELECTABLE.contains(&role) {
                return Err(invalid("Pick DPS, Tank or Heal."));
            }
            Ok(Transition::Next(FlowState::TeamSelect { role }))
        }
        (FlowState::TeamSelect { role }, FlowInput::Team(team)) => {
            if !event.has_team(&team) {
                return Err(RosterError::Validation(format!(
                    "Team `{team}` is not part of this war."
                )));
            }
            Ok(Transition::Next(FlowState::AvailabilitySelect {
                role: role.clone(),
                team,
            }))
        }
        (FlowState::AvailabilitySelect { role, team }, FlowInput::Availability(tags)) => {
            if tags.is_empty() {
                return Err(invalid("Pick at least one availability option."));
            }
            Ok(after_availability(
                role,
                team,
                Availability::from_tags(tags),
                weapon_select,
            ))
        }
        (FlowState::AvailabilitySelect { role, team }, FlowInput::RequestCustomAvailability) => {
            Ok(Transition::Next(FlowState::AwaitingCustomAvailability {
                role: role.clone(),
                team: team.clone(),
            }))
        }
        (
            FlowState::AwaitingCustomAvailability { role, team },
            FlowInput::CustomAvailability(text),
        ) => {
            let availability = Availability::custom(&text);
            if availability.is_empty() {
                return Err(invalid("Describe when you can join."));
            }
            Ok(after_availability(role, team, availability, weapon_select))
        }
        (
            FlowState::WeaponSelect {
                role,
                team,
                availability,
            },
            input @ (FlowInput::Weapons(_) | FlowInput::SkipWeapons),
        ) => {
            let weapons = match input {
                FlowInput::Weapons(weapons) => {
                    if weapons.is_empty() || weapons.len() > Weapon::MAX_LOADOUT {
                        return Err(RosterError::Validation(format!(
                            "Choose 1 to {} weapons, or skip.",
                            Weapon::MAX_LOADOUT
                        )));
                    }
                    Some(weapons)
                }
                _ => None,
            };
            Ok(Transition::Ready(SignUp {
                team: team.clone(),
                role: role.clone(),
                availability: availability.clone(),
                weapons,
            }))
        }
        // the note prompt was dismissed and the availability menu used again
        (
            FlowState::AwaitingCustomAvailability { role, team },
            input @ (FlowInput::Availability(_) | FlowInput::RequestCustomAvailability),
        ) => advance(
            &FlowState::AvailabilitySelect {
                role: role.clone(),
                team: team.clone(),
            },
            input,
            event,
            weapon_select,
        ),
        (_, FlowInput::Weapons(_) | FlowInput::SkipWeapons) => Err(invalid(
            "Pick a role, a team and your availability before confirming.",
        )),
        _ => Err(invalid("That option is not available at this step.")),
    }
}

fn after_availability(
    role: &Role,
    team: &str,
    availability: Availability,
    weapon_select: bool,
) -> Transition {
    if weapon_select {
        Transition::Next(FlowState::WeaponSelect {
            role: role.clone(),
            team: team.to_string(),
            availability,
        })
    } else {
        Transition::Ready(SignUp {
            team: team.to_string(),
            role: role.clone(),
            availability,
            weapons: None,
        })
    }
}

type FlowKey = (Uuid, u64);

struct FlowEntry {
    state: FlowState,
    touched: Instant,
}

/// In-flight flows keyed by (event, user). Nothing here is persisted.
pub struct FlowRegistry {
    flows: Mutex<HashMap<FlowKey, FlowEntry>>,
    ttl: Duration,
}

impl FlowRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            flows: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn put(&self, key: FlowKey, state: FlowState, now: Instant) {
        self.flows
            .lock()
            .insert(key, FlowEntry { state, touched: now });
    }

    /// Current state, or `None` when absent or idle longer than the TTL.
    pub fn get(&self, key: FlowKey, now: Instant) -> Option<FlowState> {
        let mut flows = self.flows.lock();
        let expired = flows
            .get(&key)
            .is_some_and(|entry| now.duration_since(entry.touched) > self.ttl);
        if expired {
            flows.remove(&key);
            return None;
        }
        flows.get(&key).map(|entry| entry.state.clone())
    }

    pub fn discard(&self, key: FlowKey) {
        self.flows.lock().remove(&key);
    }

    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut flows = self.flows.lock();
        let before = flows.len();
        flows.retain(|_, entry| now.duration_since(entry.touched) <= self.ttl);
        before - flows.len()
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Show the next prompt in place of the previous one.
    Prompt { event: Event, state: FlowState },
    Committed(Registration),
}

pub struct RegistrationFlow {
    roster: Arc<RosterService>,
    registry: FlowRegistry,
    weapon_select: bool,
}

impl RegistrationFlow {
    pub fn new(roster: Arc<RosterService>, config: &RegistrationConfig) -> Self {
        Self {
            roster,
            registry: FlowRegistry::new(config.flow_timeout()),
            weapon_select: config.weapon_select,
        }
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    pub async fn start(&self, event_id: Uuid, user_id: u64) -> Result<FlowOutcome, RosterError> {
        let event = self.roster.mutable_event(event_id).await?;
        self.registry
            .put((event_id, user_id), FlowState::RoleSelect, Instant::now());
        debug!(%event_id, user_id, "registration flow started");
        Ok(FlowOutcome::Prompt {
            event,
            state: FlowState::RoleSelect,
        })
    }

    pub async fn handle(
        &self,
        event_id: Uuid,
        user_id: u64,
        display_name: &str,
        input: FlowInput,
    ) -> Result<FlowOutcome, RosterError> {
        let key = (event_id, user_id);
        let event = match self.roster.mutable_event(event_id).await {
            Ok(event) => event,
            Err(e) => {
                self.registry.discard(key);
                return Err(e);
            }
        };

        let state = self.registry.get(key, Instant::now()).ok_or_else(|| {
            invalid("This sign-up session expired. Press Join to start again.")
        })?;

        match advance(&state, input, &event, self.weapon_select)? {
            Transition::Next(next) => {
                self.registry.put(key, next.clone(), Instant::now());
                Ok(FlowOutcome::Prompt { event, state: next })
            }
            Transition::Ready(sign_up) => {
                let registration = self
                    .roster
                    .apply_registration(event_id, user_id, display_name, sign_up)
                    .await?;
                self.registry.discard(key);
                Ok(FlowOutcome::Committed(registration))
            }
        }
    }

    pub fn cancel(&self, event_id: Uuid, user_id: u64) {
        self.registry.discard((event_id, user_id));
    }

    /// One-step absence report; any open sign-up flow for the user is dropped.
    pub async fn absence(
        &self,
        event_id: Uuid,
        user_id: u64,
        display_name: &str,
        reason: &str,
    ) -> Result<Registration, RosterError> {
        let registration = self
            .roster
            .register_absence(event_id, user_id, display_name, reason)
            .await?;
        self.registry.discard((event_id, user_id));
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Actor;
    use crate::db::Slot;
    use crate::db::manager::tests::{sample_event, temp_store};
    use crate::roster::testing::{RecordingAudit, RecordingTransport};
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn event() -> Event {
        let new_event = sample_event();
        Event {
            id: Uuid::nil(),
            title: new_event.title,
            date_expr: new_event.date_expr,
            match_time: new_event.match_time,
            deadline_time: None,
            teams: new_event.teams,
            color: new_event.color,
            location: new_event.location,
            active: true,
            reminded: false,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    fn step(state: &FlowState, input: FlowInput, weapons: bool) -> Result<Transition, RosterError> {
        advance(state, input, &event(), weapons)
    }

    #[test]
    fn linear_flow_without_weapons_commits_after_availability() {
        let t = step(&FlowState::RoleSelect, FlowInput::Role(Role::Tank), false).unwrap();
        let Transition::Next(state) = t else { panic!() };
        let t = step(&state, FlowInput::Team("Team ATK".to_string()), false).unwrap();
        let Transition::Next(state) = t else { panic!() };
        let t = step(
            &state,
            FlowInput::Availability(vec![AvailabilityTag::Round(1), AvailabilityTag::Round(2)]),
            false,
        )
        .unwrap();

        assert_eq!(
            t,
            Transition::Ready(SignUp {
                team: "Team ATK".to_string(),
                role: Role::Tank,
                availability: Availability::from_tags([
                    AvailabilityTag::Round(1),
                    AvailabilityTag::Round(2)
                ]),
                weapons: None,
            })
        );
    }

    #[test]
    fn weapon_step_when_enabled() {
        let state = FlowState::AvailabilitySelect {
            role: Role::Dps,
            team: "Team Flex".to_string(),
        };
        let t = step(&state, FlowInput::Availability(vec![AvailabilityTag::FullTime]), true)
            .unwrap();
        let Transition::Next(state @ FlowState::WeaponSelect { .. }) = t else {
            panic!("expected weapon step");
        };

        assert!(matches!(
            step(&state, FlowInput::Weapons(vec![]), true),
            Err(RosterError::Validation(_))
        ));
        assert!(matches!(
            step(
                &state,
                FlowInput::Weapons(vec![Weapon::Bow, Weapon::Fan, Weapon::Blade]),
                true
            ),
            Err(RosterError::Validation(_))
        ));
        assert!(matches!(
            step(&state, FlowInput::SkipWeapons, true),
            Ok(Transition::Ready(SignUp { weapons: None, .. }))
        ));
        assert!(matches!(
            step(&state, FlowInput::Weapons(vec![Weapon::Bow]), true),
            Ok(Transition::Ready(SignUp { weapons: Some(ref w), .. })) if w == &vec![Weapon::Bow]
        ));
    }

    #[test]
    fn custom_availability_replaces_tags() {
        let state = FlowState::AvailabilitySelect {
            role: Role::Heal,
            team: "Team ATK".to_string(),
        };
        let Transition::Next(state) = step(&state, FlowInput::RequestCustomAvailability, false)
            .unwrap()
        else {
            panic!()
        };
        assert!(matches!(state, FlowState::AwaitingCustomAvailability { .. }));

        assert!(matches!(
            step(&state, FlowInput::CustomAvailability("  ".to_string()), false),
            Err(RosterError::Validation(_))
        ));
        let Transition::Ready(sign_up) =
            step(&state, FlowInput::CustomAvailability("after 21:00".to_string()), false).unwrap()
        else {
            panic!()
        };
        assert!(sign_up.availability.tags.is_empty());
        assert_eq!(sign_up.availability.note.as_deref(), Some("after 21:00"));
    }

    #[test]
    fn dismissed_note_prompt_falls_back_to_menu() {
        let state = FlowState::AwaitingCustomAvailability {
            role: Role::Dps,
            team: "Team ATK".to_string(),
        };
        assert!(matches!(
            step(&state, FlowInput::Availability(vec![AvailabilityTag::Standby]), false),
            Ok(Transition::Ready(_))
        ));
        assert_eq!(
            step(&state, FlowInput::RequestCustomAvailability, false).unwrap(),
            Transition::Next(state.clone())
        );
    }

    #[test]
    fn confirming_early_is_rejected() {
        for state in [
            FlowState::RoleSelect,
            FlowState::TeamSelect { role: Role::Dps },
            FlowState::AvailabilitySelect {
                role: Role::Dps,
                team: "Team ATK".to_string(),
            },
        ] {
            assert!(matches!(
                step(&state, FlowInput::SkipWeapons, true),
                Err(RosterError::Validation(_))
            ));
        }
    }

    #[test]
    fn unknown_team_and_empty_availability_are_rejected() {
        assert!(matches!(
            step(
                &FlowState::TeamSelect { role: Role::Dps },
                FlowInput::Team("Team Z".to_string()),
                false
            ),
            Err(RosterError::Validation(_))
        ));
        assert!(matches!(
            step(
                &FlowState::AvailabilitySelect {
                    role: Role::Dps,
                    team: "Team ATK".to_string()
                },
                FlowInput::Availability(vec![]),
                false
            ),
            Err(RosterError::Validation(_))
        ));
    }

    #[test]
    fn registry_expires_idle_flows() {
        let registry = FlowRegistry::new(Duration::from_secs(120));
        let key = (Uuid::nil(), 1);
        let t0 = Instant::now();
        registry.put(key, FlowState::RoleSelect, t0);

        assert_eq!(
            registry.get(key, t0 + Duration::from_secs(60)),
            Some(FlowState::RoleSelect)
        );
        assert_eq!(registry.get(key, t0 + Duration::from_secs(121)), None);
        assert_eq!(registry.len(), 0);

        registry.put(key, FlowState::RoleSelect, t0);
        registry.put((Uuid::nil(), 2), FlowState::RoleSelect, t0 + Duration::from_secs(100));
        assert_eq!(registry.purge_expired(t0 + Duration::from_secs(150)), 1);
        assert_eq!(registry.len(), 1);
    }

    async fn flow(weapon_select: bool) -> (NamedTempFile, RegistrationFlow, Arc<RosterService>, Event) {
        let (file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        let roster = Arc::new(RosterService::new(
            store,
            Arc::new(RecordingTransport::default()),
            Arc::new(RecordingAudit::default()),
            chrono_tz::Asia::Bangkok,
        ));
        let config = RegistrationConfig {
            weapon_select,
            ..RegistrationConfig::default()
        };
        (file, RegistrationFlow::new(roster.clone(), &config), roster, event)
    }

    #[tokio::test]
    async fn full_flow_writes_exactly_one_registration() {
        let (_file, flow, roster, event) = flow(true).await;

        flow.start(event.id, 5).await.unwrap();
        for input in [
            FlowInput::Role(Role::Dps),
            FlowInput::Team("Team ATK".to_string()),
            FlowInput::Availability(vec![AvailabilityTag::FullTime]),
        ] {
            assert!(matches!(
                flow.handle(event.id, 5, "Nok", input).await.unwrap(),
                FlowOutcome::Prompt { .. }
            ));
            // nothing is written before the final step
            assert_eq!(roster.missing_members(event.id, &[5]).await.unwrap(), vec![5]);
        }

        let outcome = flow
            .handle(event.id, 5, "Nok", FlowInput::Weapons(vec![Weapon::Spear]))
            .await
            .unwrap();
        let FlowOutcome::Committed(registration) = outcome else {
            panic!("expected commit");
        };
        assert!(matches!(registration.slot, Slot::Team { ref weapons, .. } if weapons == &vec![Weapon::Spear]));
        assert!(roster.missing_members(event.id, &[5]).await.unwrap().is_empty());
        assert_eq!(flow.registry().len(), 0);
    }

    #[tokio::test]
    async fn validation_error_keeps_flow_open() {
        let (_file, flow, _roster, event) = flow(false).await;
        flow.start(event.id, 5).await.unwrap();
        flow.handle(event.id, 5, "Nok", FlowInput::Role(Role::Heal))
            .await
            .unwrap();

        assert!(matches!(
            flow.handle(event.id, 5, "Nok", FlowInput::Team("Nope".to_string()))
                .await,
            Err(RosterError::Validation(_))
        ));
        assert!(matches!(
            flow.handle(event.id, 5, "Nok", FlowInput::Team("Team Flex".to_string()))
                .await,
            Ok(FlowOutcome::Prompt {
                state: FlowState::AvailabilitySelect { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn handling_without_start_reports_expiry() {
        let (_file, flow, _roster, event) = flow(false).await;
        assert!(matches!(
            flow.handle(event.id, 5, "Nok", FlowInput::Role(Role::Dps)).await,
            Err(RosterError::Validation(msg)) if msg.contains("expired")
        ));
    }

    #[tokio::test]
    async fn locking_mid_flow_rejects_next_step() {
        let (_file, flow, roster, event) = flow(false).await;
        flow.start(event.id, 5).await.unwrap();
        roster
            .set_locked(event.id, true, &Actor::new(1, "Admin"))
            .await
            .unwrap();

        assert!(matches!(
            flow.handle(event.id, 5, "Nok", FlowInput::Role(Role::Dps)).await,
            Err(RosterError::Locked(_))
        ));
        assert!(matches!(
            flow.start(event.id, 6).await,
            Err(RosterError::Locked(_))
        ));
        assert_eq!(flow.registry().len(), 0);
    }

    #[tokio::test]
    async fn absence_is_a_single_step() {
        let (_file, flow, roster, event) = flow(false).await;
        flow.start(event.id, 5).await.unwrap();

        flow.absence(event.id, 5, "Nok", "family trip").await.unwrap();

        let view = roster.render(event.id).await.unwrap();
        assert_eq!(view.absences.len(), 1);
        assert_eq!(flow.registry().len(), 0);
    }
}
