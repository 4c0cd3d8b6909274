use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BracketError, BracketResult};
use crate::store::{BracketStore, MatchGuard, MatchPatch, MatchUpdate};
use crate::types::{ClaimToken, Match, MatchId, MatchStatus, Slot, TournamentId, TournamentStatus};

/// Lets exactly one game session own a pending match.
pub struct MatchClaimGuard<'a, S: BracketStore + ?Sized> {
  store: &'a S,
}

impl<'a, S: BracketStore + ?Sized> MatchClaimGuard<'a, S> {
  pub fn new(store: &'a S) -> Self {
    MatchClaimGuard { store }
  }

  pub fn claim(&self, match_id: MatchId) -> BracketResult<ClaimToken> {
    self.claim_at(match_id, Utc::now())
  }

  pub fn claim_at(&self, match_id: MatchId, now: DateTime<Utc>) -> BracketResult<ClaimToken> {
    let entry = self.store.load_match(match_id)?;
    let tournament = self.store.load_tournament(entry.tournament_id)?;
    if tournament.status != TournamentStatus::Active {
      return Err(BracketError::TournamentNotActive {
        tournament_id: tournament.id,
        status: tournament.status,
      });
    }
    if entry.is_bye_match {
      return Err(BracketError::InvalidInput(format!(
        "Match {match_id} is a bye and cannot be played."
      )));
    }

    let token = Uuid::new_v4();
    let update = MatchUpdate::new(match_id, MatchGuard::Unclaimed, MatchPatch::Claim { token, at: now });
    if self.store.conditional_update(&[update])? == 1 {
      info!(
        tournament_id = %entry.tournament_id,
        match_id = %match_id,
        round = entry.round_number,
        match_number = entry.match_number,
        "match claimed"
      );
      return Ok(token);
    }

    // Nothing written: find out why from the committed row.
    let current = self.store.load_match(match_id)?;
    debug!(match_id = %match_id, status = %current.status, "claim lost");
    Err(lost_claim_error(&current))
  }

  /// Claims for a session the caller already created, handing the session to
  /// `rollback` when the claim is lost.
  pub fn claim_with_rollback<T, F>(&self, match_id: MatchId, session: T, rollback: F) -> BracketResult<(ClaimToken, T)>
  where
    F: FnOnce(T),
  {
    match self.claim(match_id) {
      Ok(token) => Ok((token, session)),
      Err(err) => {
        rollback(session);
        Err(err)
      }
    }
  }

  /// Returns an undecided match to `pending`. Only the holder of `token` may release.
  pub fn release(&self, match_id: MatchId, token: ClaimToken) -> BracketResult<()> {
    let update = MatchUpdate::new(match_id, MatchGuard::ClaimedBy(token), MatchPatch::Release);
    if self.store.conditional_update(&[update])? == 1 {
      info!(match_id = %match_id, "claim released");
      return Ok(());
    }
    let current = self.store.load_match(match_id)?;
    match current.status {
      MatchStatus::Completed => Err(BracketError::AlreadyCompleted {
        match_id,
        recorded_winner: current.winner_id,
      }),
      MatchStatus::InProgress => Err(BracketError::AlreadyClaimed(match_id)),
      status => Err(BracketError::NotInProgress { match_id, status }),
    }
  }

  /// Releases claims older than `timeout`. With no timeout configured, claims never expire.
  pub fn release_stale(
    &self,
    tournament_id: TournamentId,
    timeout: Option<Duration>,
    now: DateTime<Utc>,
  ) -> BracketResult<Vec<MatchId>> {
    let Some(timeout) = timeout else {
      return Ok(Vec::new());
    };
    let mut released = Vec::new();
    for entry in self.store.load_matches(tournament_id)? {
      if entry.status != MatchStatus::InProgress || entry.winner_id.is_some() {
        continue;
      }
      let (Some(token), Some(claimed_at)) = (entry.claim_token, entry.claimed_at) else {
        continue;
      };
      if now - claimed_at < timeout {
        continue;
      }
      let update = MatchUpdate::new(entry.id, MatchGuard::ClaimedBy(token), MatchPatch::Release);
      if self.store.conditional_update(&[update])? == 1 {
        warn!(
          tournament_id = %tournament_id,
          match_id = %entry.id,
          claimed_at = %claimed_at,
          "stale claim released"
        );
        released.push(entry.id);
      }
    }
    Ok(released)
  }
}

/// A rejected claim on a match with both participants lost to another session,
/// even if that session has since released it.
fn lost_claim_error(current: &Match) -> BracketError {
  if current.slots.iter().all(Slot::is_filled) {
    BracketError::AlreadyClaimed(current.id)
  } else {
    BracketError::MatchNotReady(current.id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::types::{MatchRef, Tournament};
  use std::cell::Cell;

  fn active_match(store: &MemoryStore) -> (TournamentId, MatchId) {
    let tournament = Tournament::new("Claims", Utc::now());
    let tournament_id = tournament.id;
    store.insert_tournament(tournament).unwrap();
    let entry = Match::new(
      tournament_id,
      MatchRef::new(1, 1),
      [Slot::Participant(Uuid::new_v4()), Slot::Participant(Uuid::new_v4())],
    );
    let match_id = entry.id;
    store
      .insert_batch(tournament_id, TournamentStatus::Setup, vec![entry])
      .unwrap();
    store
      .update_tournament_if(tournament_id, TournamentStatus::Setup, &mut |t| {
        t.status = TournamentStatus::Active
      })
      .unwrap();
    (tournament_id, match_id)
  }

  #[test]
  fn test_second_claim_loses() {
    let store = MemoryStore::new();
    let (_, match_id) = active_match(&store);
    let guard = MatchClaimGuard::new(&store);

    let token = guard.claim(match_id).unwrap();
    assert_eq!(guard.claim(match_id), Err(BracketError::AlreadyClaimed(match_id)));
    assert_eq!(store.load_match(match_id).unwrap().claim_token, Some(token));
  }

  #[test]
  fn test_claim_requires_active_tournament() {
    let store = MemoryStore::new();
    let tournament = Tournament::new("Not started", Utc::now());
    let tournament_id = tournament.id;
    store.insert_tournament(tournament).unwrap();
    let entry = Match::new(
      tournament_id,
      MatchRef::new(1, 1),
      [Slot::Participant(Uuid::new_v4()), Slot::Participant(Uuid::new_v4())],
    );
    let match_id = entry.id;
    store.insert_batch(tournament_id, TournamentStatus::Setup, vec![entry]).unwrap();

    assert!(matches!(
      MatchClaimGuard::new(&store).claim(match_id),
      Err(BracketError::TournamentNotActive { .. })
    ));
  }

  #[test]
  fn test_lost_claim_rolls_back_session() {
    let store = MemoryStore::new();
    let (_, match_id) = active_match(&store);
    let guard = MatchClaimGuard::new(&store);
    guard.claim(match_id).unwrap();

    let discarded = Cell::new(None);
    let result = guard.claim_with_rollback(match_id, "session-2", |session| discarded.set(Some(session)));
    assert!(matches!(result, Err(BracketError::AlreadyClaimed(_))));
    assert_eq!(discarded.get(), Some("session-2"));
  }

  #[test]
  fn test_release_needs_matching_token() {
    let store = MemoryStore::new();
    let (_, match_id) = active_match(&store);
    let guard = MatchClaimGuard::new(&store);
    let token = guard.claim(match_id).unwrap();

    assert!(guard.release(match_id, Uuid::new_v4()).is_err());
    guard.release(match_id, token).unwrap();
    let entry = store.load_match(match_id).unwrap();
    assert_eq!(entry.status, MatchStatus::Pending);
    assert!(entry.claim_token.is_none());
    assert!(guard.claim(match_id).is_ok());
  }

  #[test]
  fn test_stale_claims_only_expire_when_configured() {
    let store = MemoryStore::new();
    let (tournament_id, match_id) = active_match(&store);
    let guard = MatchClaimGuard::new(&store);
    let claimed_at = Utc::now();
    guard.claim_at(match_id, claimed_at).unwrap();
    let later = claimed_at + Duration::minutes(30);

    assert!(guard.release_stale(tournament_id, None, later).unwrap().is_empty());
    assert!(guard
      .release_stale(tournament_id, Some(Duration::hours(1)), later)
      .unwrap()
      .is_empty());
    assert_eq!(
      guard
        .release_stale(tournament_id, Some(Duration::minutes(10)), later)
        .unwrap(),
      vec![match_id]
    );
    assert_eq!(store.load_match(match_id).unwrap().status, MatchStatus::Pending);
  }

  #[test]
  fn test_claim_on_tbd_slot_is_not_ready() {
    let store = MemoryStore::new();
    let (tournament_id, _) = active_match(&store);
    let shell = Match::new(
      tournament_id,
      MatchRef::new(2, 1),
      [Slot::Participant(Uuid::new_v4()), Slot::WinnerOf(MatchRef::new(1, 2))],
    );
    let shell_id = shell.id;
    let mut entries = store.load_matches(tournament_id).unwrap();
    entries.push(shell);
    store
      .update_tournament_if(tournament_id, TournamentStatus::Active, &mut |t| {
        t.status = TournamentStatus::Setup
      })
      .unwrap();
    store.insert_batch(tournament_id, TournamentStatus::Setup, entries).unwrap();
    store
      .update_tournament_if(tournament_id, TournamentStatus::Setup, &mut |t| {
        t.status = TournamentStatus::Active
      })
      .unwrap();

    assert_eq!(
      MatchClaimGuard::new(&store).claim(shell_id),
      Err(BracketError::MatchNotReady(shell_id))
    );
  }

  #[test]
  fn test_claimed_then_released_match_reports_lost_race() {
    // another session claimed and released between our rejected write and the reload
    let store = MemoryStore::new();
    let (_, match_id) = active_match(&store);
    let current = store.load_match(match_id).unwrap();
    assert_eq!(current.status, MatchStatus::Pending);
    assert!(current.claim_token.is_none());

    assert_eq!(lost_claim_error(&current), BracketError::AlreadyClaimed(match_id));
  }
}
