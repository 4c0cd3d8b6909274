//! Storage seam for the engine.
//!
//! Every mutation of a bracket entry goes through [`BracketStore::conditional_update`]:
//! the store checks all guards of a batch and applies every patch, or none.

use chrono::{DateTime, Utc};
use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard},
};

use crate::error::{BracketError, BracketResult};
use crate::types::{
  ClaimToken, Match, MatchId, MatchRef, MatchStatus, Participant, ParticipantId, ParticipantStatus, Slot,
  SlotPosition, Tournament, TournamentId, TournamentStatus,
};

/// Precondition a stored match must satisfy for its patch to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchGuard {
  /// Pending, unclaimed, both participants known.
  Unclaimed,
  /// In progress under this token, no winner yet.
  ClaimedBy(ClaimToken),
  /// In progress, no winner yet.
  Undecided,
  /// The slot still waits on `feeder`.
  AwaitingSlot { slot: SlotPosition, feeder: MatchRef },
  UnresolvedBye,
}

impl MatchGuard {
  pub fn admits(&self, entry: &Match) -> bool {
    match self {
      MatchGuard::Unclaimed => entry.is_playable(),
      MatchGuard::ClaimedBy(token) => {
        entry.status == MatchStatus::InProgress
          && entry.claim_token == Some(*token)
          && entry.winner_id.is_none()
      }
      MatchGuard::Undecided => entry.status == MatchStatus::InProgress && entry.winner_id.is_none(),
      MatchGuard::AwaitingSlot { slot, feeder } => match entry.slots[slot.index()] {
        Slot::WinnerOf(source) => source == *feeder,
        Slot::Empty => true,
        Slot::Participant(_) => false,
      },
      MatchGuard::UnresolvedBye => entry.is_unresolved_bye(),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPatch {
  Claim { token: ClaimToken, at: DateTime<Utc> },
  Release,
  Decide { winner: ParticipantId, at: DateTime<Utc> },
  FillSlot { slot: SlotPosition, participant: ParticipantId },
  ResolveBye { at: DateTime<Utc> },
}

impl MatchPatch {
  pub fn apply(&self, entry: &mut Match) {
    match *self {
      MatchPatch::Claim { token, at } => {
        entry.status = MatchStatus::InProgress;
        entry.claim_token = Some(token);
        entry.claimed_at = Some(at);
      }
      MatchPatch::Release => {
        entry.status = MatchStatus::Pending;
        entry.claim_token = None;
        entry.claimed_at = None;
      }
      MatchPatch::Decide { winner, at } => {
        entry.status = MatchStatus::Completed;
        entry.winner_id = Some(winner);
        entry.completed_at = Some(at);
      }
      MatchPatch::FillSlot { slot, participant } => {
        entry.slots[slot.index()] = Slot::Participant(participant);
      }
      MatchPatch::ResolveBye { at } => {
        entry.winner_id = entry.slots[0].participant();
        entry.completed_at = Some(at);
      }
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchUpdate {
  pub match_id: MatchId,
  pub guard: MatchGuard,
  pub patch: MatchPatch,
}

impl MatchUpdate {
  pub fn new(match_id: MatchId, guard: MatchGuard, patch: MatchPatch) -> Self {
    MatchUpdate { match_id, guard, patch }
  }
}

pub trait BracketStore: Send + Sync {
  fn insert_tournament(&self, tournament: Tournament) -> BracketResult<()>;
  fn load_tournament(&self, id: TournamentId) -> BracketResult<Tournament>;
  /// Runs `mutate` only while the tournament is still in `expected`.
  fn update_tournament_if(
    &self,
    id: TournamentId,
    expected: TournamentStatus,
    mutate: &mut dyn FnMut(&mut Tournament),
  ) -> BracketResult<bool>;

  /// Seed ascending.
  fn load_participants(&self, tournament_id: TournamentId) -> BracketResult<Vec<Participant>>;
  fn upsert_participants(&self, participants: &[Participant]) -> BracketResult<()>;
  /// Moves a participant to `to` only while its status is one of `from`.
  fn update_participant_status_if(
    &self,
    participant_id: ParticipantId,
    from: &[ParticipantStatus],
    to: ParticipantStatus,
  ) -> BracketResult<bool>;
  fn delete_participant(&self, tournament_id: TournamentId, participant_id: ParticipantId) -> BracketResult<bool>;

  /// Round then match ascending.
  fn load_matches(&self, tournament_id: TournamentId) -> BracketResult<Vec<Match>>;
  fn load_match(&self, id: MatchId) -> BracketResult<Match>;
  /// Replaces the tournament's brackets if it is still in `required`.
  fn insert_batch(
    &self,
    tournament_id: TournamentId,
    required: TournamentStatus,
    matches: Vec<Match>,
  ) -> BracketResult<bool>;
  fn delete_matches(&self, tournament_id: TournamentId) -> BracketResult<usize>;
  /// All-or-nothing. Returns the rows written, 0 when any guard rejected.
  fn conditional_update(&self, updates: &[MatchUpdate]) -> BracketResult<usize>;
}

// ── In-memory store ────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
  tournaments: HashMap<TournamentId, Tournament>,
  participants: HashMap<ParticipantId, Participant>,
  matches: HashMap<MatchId, Match>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    MemoryStore::default()
  }

  fn lock(&self) -> BracketResult<MutexGuard<'_, MemoryState>> {
    self.state.lock().map_err(|e| BracketError::Storage(e.to_string()))
  }
}

impl BracketStore for MemoryStore {
  fn insert_tournament(&self, tournament: Tournament) -> BracketResult<()> {
    let mut guard = self.lock()?;
    if guard.tournaments.contains_key(&tournament.id) {
      return Err(BracketError::Storage(format!("Tournament {} already exists.", tournament.id)));
    }
    guard.tournaments.insert(tournament.id, tournament);
    Ok(())
  }

  fn load_tournament(&self, id: TournamentId) -> BracketResult<Tournament> {
    let guard = self.lock()?;
    guard
      .tournaments
      .get(&id)
      .cloned()
      .ok_or_else(|| BracketError::not_found("Tournament", id))
  }

  fn update_tournament_if(
    &self,
    id: TournamentId,
    expected: TournamentStatus,
    mutate: &mut dyn FnMut(&mut Tournament),
  ) -> BracketResult<bool> {
    let mut guard = self.lock()?;
    let tournament = guard
      .tournaments
      .get_mut(&id)
      .ok_or_else(|| BracketError::not_found("Tournament", id))?;
    if tournament.status != expected {
      return Ok(false);
    }
    mutate(tournament);
    Ok(true)
  }

  fn load_participants(&self, tournament_id: TournamentId) -> BracketResult<Vec<Participant>> {
    let guard = self.lock()?;
    let mut participants = guard
      .participants
      .values()
      .filter(|p| p.tournament_id == tournament_id)
      .cloned()
      .collect::<Vec<_>>();
    participants.sort_by_key(|p| (p.seed, p.registered_at));
    Ok(participants)
  }

  fn upsert_participants(&self, participants: &[Participant]) -> BracketResult<()> {
    let mut guard = self.lock()?;
    for participant in participants {
      if !guard.tournaments.contains_key(&participant.tournament_id) {
        return Err(BracketError::not_found("Tournament", participant.tournament_id));
      }
    }
    for participant in participants {
      guard.participants.insert(participant.id, participant.clone());
    }
    Ok(())
  }

  fn update_participant_status_if(
    &self,
    participant_id: ParticipantId,
    from: &[ParticipantStatus],
    to: ParticipantStatus,
  ) -> BracketResult<bool> {
    let mut guard = self.lock()?;
    let participant = guard
      .participants
      .get_mut(&participant_id)
      .ok_or_else(|| BracketError::not_found("Participant", participant_id))?;
    if !from.contains(&participant.status) {
      return Ok(false);
    }
    participant.status = to;
    Ok(true)
  }

  fn delete_participant(&self, tournament_id: TournamentId, participant_id: ParticipantId) -> BracketResult<bool> {
    let mut guard = self.lock()?;
    let owned = guard
      .participants
      .get(&participant_id)
      .is_some_and(|p| p.tournament_id == tournament_id);
    if owned {
      guard.participants.remove(&participant_id);
    }
    Ok(owned)
  }

  fn load_matches(&self, tournament_id: TournamentId) -> BracketResult<Vec<Match>> {
    let guard = self.lock()?;
    let mut matches = guard
      .matches
      .values()
      .filter(|m| m.tournament_id == tournament_id)
      .cloned()
      .collect::<Vec<_>>();
    matches.sort_by_key(|m| (m.round_number, m.match_number));
    Ok(matches)
  }

  fn load_match(&self, id: MatchId) -> BracketResult<Match> {
    let guard = self.lock()?;
    guard
      .matches
      .get(&id)
      .cloned()
      .ok_or_else(|| BracketError::not_found("Match", id))
  }

  fn insert_batch(
    &self,
    tournament_id: TournamentId,
    required: TournamentStatus,
    matches: Vec<Match>,
  ) -> BracketResult<bool> {
    let mut guard = self.lock()?;
    let status = guard
      .tournaments
      .get(&tournament_id)
      .map(|t| t.status)
      .ok_or_else(|| BracketError::not_found("Tournament", tournament_id))?;
    if status != required {
      return Ok(false);
    }
    if let Some(stray) = matches.iter().find(|m| m.tournament_id != tournament_id) {
      return Err(BracketError::InvalidInput(format!(
        "Match {} belongs to tournament {}.",
        stray.id, stray.tournament_id
      )));
    }
    guard.matches.retain(|_, m| m.tournament_id != tournament_id);
    for entry in matches {
      guard.matches.insert(entry.id, entry);
    }
    Ok(true)
  }

  fn delete_matches(&self, tournament_id: TournamentId) -> BracketResult<usize> {
    let mut guard = self.lock()?;
    let before = guard.matches.len();
    guard.matches.retain(|_, m| m.tournament_id != tournament_id);
    Ok(before - guard.matches.len())
  }

  fn conditional_update(&self, updates: &[MatchUpdate]) -> BracketResult<usize> {
    let mut guard = self.lock()?;
    for update in updates {
      let entry = guard
        .matches
        .get(&update.match_id)
        .ok_or_else(|| BracketError::not_found("Match", update.match_id))?;
      if !update.guard.admits(entry) {
        return Ok(0);
      }
    }
    for update in updates {
      if let Some(entry) = guard.matches.get_mut(&update.match_id) {
        update.patch.apply(entry);
      }
    }
    Ok(updates.len())
  }
}
