//! Winner and bye propagation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BracketError, BracketResult};
use crate::store::{BracketStore, MatchGuard, MatchPatch, MatchUpdate};
use crate::structure::advancement_destination;
use crate::types::{
  Match, MatchId, MatchRef, MatchStatus, ParticipantId, ParticipantStatus, SlotPosition, TournamentId,
  TournamentStatus, BYE_SWEEP_SAFETY_LIMIT,
};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancementResult {
  pub match_id: MatchId,
  pub position: MatchRef,
  pub winner_id: ParticipantId,
  pub loser_id: Option<ParticipantId>,
  pub destination: Option<(MatchRef, SlotPosition)>,
  /// The destination now has both participants and can be claimed.
  pub next_match_ready: bool,
  pub champion_id: Option<ParticipantId>,
  pub byes_advanced: usize,
  /// The same result was already committed; nothing was written.
  pub already_recorded: bool,
}

pub struct AdvancementEngine<'a, S: BracketStore + ?Sized> {
  store: &'a S,
}

impl<'a, S: BracketStore + ?Sized> AdvancementEngine<'a, S> {
  pub fn new(store: &'a S) -> Self {
    AdvancementEngine { store }
  }

  pub fn complete(&self, match_id: MatchId, winner_id: ParticipantId) -> BracketResult<AdvancementResult> {
    self.complete_at(match_id, winner_id, Utc::now())
  }

  pub fn complete_at(
    &self,
    match_id: MatchId,
    winner_id: ParticipantId,
    now: DateTime<Utc>,
  ) -> BracketResult<AdvancementResult> {
    let entry = self.store.load_match(match_id)?;
    if entry.status == MatchStatus::Completed {
      return self.recorded_outcome(&entry, winner_id, now);
    }
    if entry.status != MatchStatus::InProgress {
      return Err(BracketError::NotInProgress {
        match_id,
        status: entry.status,
      });
    }
    if !entry.has_participant(winner_id) {
      return Err(BracketError::InvalidInput(format!(
        "Participant {winner_id} is not playing in match {match_id}."
      )));
    }

    let tournament = self.store.load_tournament(entry.tournament_id)?;
    let position = entry.position();
    let is_final = position.round >= tournament.total_rounds;

    let mut updates = vec![MatchUpdate::new(
      match_id,
      MatchGuard::Undecided,
      MatchPatch::Decide { winner: winner_id, at: now },
    )];
    let destination = if is_final {
      None
    } else {
      let (to, slot) = advancement_destination(position);
      let target = self.find_entry(entry.tournament_id, to)?;
      updates.push(MatchUpdate::new(
        target.id,
        MatchGuard::AwaitingSlot { slot, feeder: position },
        MatchPatch::FillSlot { slot, participant: winner_id },
      ));
      Some((to, slot))
    };

    if self.store.conditional_update(&updates)? == 0 {
      let current = self.store.load_match(match_id)?;
      match current.status {
        MatchStatus::Completed => return self.recorded_outcome(&current, winner_id, now),
        MatchStatus::InProgress => {}
        status => return Err(BracketError::NotInProgress { match_id, status }),
      }
      return Err(BracketError::Structural(format!(
        "Destination of {position} in tournament {} is already occupied.",
        entry.tournament_id
      )));
    }

    let loser_id = entry.opponent_of(winner_id);
    info!(
      tournament_id = %entry.tournament_id,
      match_id = %match_id,
      round = position.round,
      match_number = position.match_number,
      winner_id = %winner_id,
      "match completed"
    );

    self.settle(&entry, winner_id, is_final, now)?;
    let champion_id = is_final.then_some(winner_id);

    let byes_advanced = self.advance_byes_at(entry.tournament_id, now)?;
    let next_match_ready = match destination {
      Some((to, _)) => self.find_entry(entry.tournament_id, to)?.is_playable(),
      None => false,
    };

    Ok(AdvancementResult {
      match_id,
      position,
      winner_id,
      loser_id,
      destination,
      next_match_ready,
      champion_id,
      byes_advanced,
      already_recorded: false,
    })
  }

  /// Writes every resolvable bye forward. Safe to call at any time; returns how many moved.
  pub fn advance_byes(&self, tournament_id: TournamentId) -> BracketResult<usize> {
    self.advance_byes_at(tournament_id, Utc::now())
  }

  pub fn advance_byes_at(&self, tournament_id: TournamentId, now: DateTime<Utc>) -> BracketResult<usize> {
    let mut advanced = 0usize;
    let mut safety = 0usize;
    loop {
      safety += 1;
      if safety > BYE_SWEEP_SAFETY_LIMIT {
        return Err(BracketError::Structural(format!(
          "Bye propagation for tournament {tournament_id} exceeded safety limit."
        )));
      }

      let matches = self.store.load_matches(tournament_id)?;
      let Some(bye) = matches.iter().find(|m| m.is_unresolved_bye()) else {
        break;
      };
      let Some(participant) = bye.slots[0].participant() else {
        break;
      };
      let position = bye.position();
      let (to, slot) = advancement_destination(position);
      let target = matches
        .iter()
        .find(|m| m.position() == to)
        .ok_or_else(|| {
          BracketError::Structural(format!("Bye at {position} has no destination {to}."))
        })?;

      let updates = [
        MatchUpdate::new(bye.id, MatchGuard::UnresolvedBye, MatchPatch::ResolveBye { at: now }),
        MatchUpdate::new(
          target.id,
          MatchGuard::AwaitingSlot { slot, feeder: position },
          MatchPatch::FillSlot { slot, participant },
        ),
      ];
      if self.store.conditional_update(&updates)? == 0 {
        // Another caller moved this bye first; the next sweep sees its result.
        debug!(tournament_id = %tournament_id, position = %position, "bye already advanced");
        continue;
      }
      self.promote(participant, ParticipantStatus::Advanced)?;
      info!(
        tournament_id = %tournament_id,
        round = position.round,
        participant_id = %participant,
        destination = %to,
        slot = slot.number(),
        "bye advanced"
      );
      advanced += 1;
    }
    Ok(advanced)
  }

  fn find_entry(&self, tournament_id: TournamentId, position: MatchRef) -> BracketResult<Match> {
    self
      .store
      .load_matches(tournament_id)?
      .into_iter()
      .find(|m| m.position() == position)
      .ok_or_else(|| {
        BracketError::Structural(format!(
          "Tournament {tournament_id} has no bracket entry at {position}."
        ))
      })
  }

  /// Applies the participant side of a decided match and crowns after the final.
  /// Statuses only move forward, so replaying this for a recorded result is harmless.
  fn settle(&self, entry: &Match, winner_id: ParticipantId, is_final: bool, now: DateTime<Utc>) -> BracketResult<()> {
    let winner_status = if is_final {
      ParticipantStatus::Champion
    } else {
      ParticipantStatus::Advanced
    };
    self.promote(winner_id, winner_status)?;
    if let Some(loser) = entry.opponent_of(winner_id) {
      self.promote(loser, ParticipantStatus::Eliminated)?;
    }
    if is_final {
      self.crown(entry.tournament_id, winner_id, now)?;
    }
    Ok(())
  }

  fn promote(&self, participant_id: ParticipantId, to: ParticipantStatus) -> BracketResult<()> {
    const STILL_PLAYING: [ParticipantStatus; 2] = [ParticipantStatus::Registered, ParticipantStatus::Advanced];
    if !self
      .store
      .update_participant_status_if(participant_id, &STILL_PLAYING, to)?
    {
      debug!(participant_id = %participant_id, to = ?to, "participant already out of play");
    }
    Ok(())
  }

  fn crown(&self, tournament_id: TournamentId, champion_id: ParticipantId, now: DateTime<Utc>) -> BracketResult<()> {
    let crowned = self
      .store
      .update_tournament_if(tournament_id, TournamentStatus::Active, &mut |t| {
        t.status = TournamentStatus::Completed;
        t.champion_id = Some(champion_id);
        t.completed_at = Some(now);
      })?;
    if crowned {
      info!(tournament_id = %tournament_id, champion_id = %champion_id, "champion crowned");
      return Ok(());
    }
    let tournament = self.store.load_tournament(tournament_id)?;
    if tournament.status == TournamentStatus::Completed && tournament.champion_id == Some(champion_id) {
      debug!(tournament_id = %tournament_id, "champion already crowned");
    } else {
      warn!(tournament_id = %tournament_id, status = %tournament.status, "final completed while tournament was not active");
    }
    Ok(())
  }

  /// Outcome for a match that is already decided. A matching winner replays the
  /// idempotent follow-up steps, so a retry after a partial failure finishes the job.
  fn recorded_outcome(&self, entry: &Match, winner_id: ParticipantId, now: DateTime<Utc>) -> BracketResult<AdvancementResult> {
    if entry.winner_id != Some(winner_id) {
      return Err(BracketError::AlreadyCompleted {
        match_id: entry.id,
        recorded_winner: entry.winner_id,
      });
    }
    let tournament = self.store.load_tournament(entry.tournament_id)?;
    let position = entry.position();
    let is_final = position.round >= tournament.total_rounds;
    self.settle(entry, winner_id, is_final, now)?;
    let byes_advanced = self.advance_byes_at(entry.tournament_id, now)?;

    Ok(AdvancementResult {
      match_id: entry.id,
      position,
      winner_id,
      loser_id: entry.opponent_of(winner_id),
      destination: (!is_final).then(|| advancement_destination(position)),
      next_match_ready: false,
      champion_id: is_final.then_some(winner_id),
      byes_advanced,
      already_recorded: true,
    })
  }
}
