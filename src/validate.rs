//! Structural checks for topologies and stored brackets.

use std::collections::HashSet;

use crate::error::{BracketError, BracketResult};
use crate::structure::Topology;
use crate::types::{Match, Participant, Tournament};

pub fn validate_structure(topology: &Topology) -> BracketResult<()> {
  let Some(first) = topology.rounds.first() else {
    return Err(structural("Topology has no rounds."));
  };
  if first.participants_entering != topology.participant_count {
    return Err(structural(format!(
      "Round 1 takes {} participants but the topology was planned for {}",
      first.participants_entering, topology.participant_count
    )));
  }
  if topology.total_rounds as usize != topology.rounds.len() {
    return Err(structural(format!(
      "Topology claims {} rounds but lists {}",
      topology.total_rounds,
      topology.rounds.len()
    )));
  }

  for (idx, round) in topology.rounds.iter().enumerate() {
    if round.number as usize != idx + 1 {
      return Err(structural(format!("Round at index {idx} is numbered {}", round.number)));
    }
    if round.match_count != round.participants_entering / 2 || round.bye_count != round.participants_entering % 2 {
      return Err(structural(format!(
        "Round {} has {} matches and {} byes for {} entrants",
        round.number, round.match_count, round.bye_count, round.participants_entering
      )));
    }
    let expected_advancing = round.match_count + round.bye_count;
    if round.participants_advancing != expected_advancing {
      return Err(structural(format!(
        "Round {} advances {} but its matches and byes produce {}",
        round.number, round.participants_advancing, expected_advancing
      )));
    }
    if let Some(next) = topology.rounds.get(idx + 1) {
      if expected_advancing != next.participants_entering {
        return Err(structural(format!(
          "Round {} advancement mismatch: {} advancing but {} entering next round",
          round.number, expected_advancing, next.participants_entering
        )));
      }
    }
  }

  let last = &topology.rounds[topology.rounds.len() - 1];
  if last.participants_advancing != 1 || last.match_count != 1 || last.bye_count != 0 {
    return Err(structural(format!(
      "Final round should advance 1 participant from a single match, but advances {}",
      last.participants_advancing
    )));
  }
  Ok(())
}

/// Checks stored entries against the topology they were generated from.
pub fn validate_bracket(topology: &Topology, matches: &[Match]) -> BracketResult<()> {
  for round in &topology.rounds {
    let in_round = matches
      .iter()
      .filter(|m| m.round_number == round.number)
      .collect::<Vec<_>>();
    let played = in_round.iter().filter(|m| !m.is_bye_match).count() as u32;
    let byes = in_round.iter().filter(|m| m.is_bye_match).count() as u32;
    if played != round.match_count || byes != round.bye_count {
      return Err(structural(format!(
        "Round {} stores {played} matches and {byes} byes, planned {} and {}",
        round.number, round.match_count, round.bye_count
      )));
    }
    let mut numbers = in_round.iter().map(|m| m.match_number).collect::<Vec<_>>();
    numbers.sort_unstable();
    if numbers != (1..=round.entry_count()).collect::<Vec<_>>() {
      return Err(structural(format!("Round {} match numbers are not contiguous", round.number)));
    }
    if let Some(bye) = in_round.iter().find(|m| m.is_bye_match) {
      if Some(bye.position()) != round.bye_position() {
        return Err(structural(format!("Round {} bye sits at {}", round.number, bye.position())));
      }
    }
  }
  if let Some(stray) = matches.iter().find(|m| topology.round(m.round_number).is_none()) {
    return Err(structural(format!("Entry {} is outside the planned rounds", stray.position())));
  }

  for entry in matches {
    if let Some(winner) = entry.winner_id {
      if !entry.has_participant(winner) {
        return Err(structural(format!(
          "Winner of {} is not one of its participants",
          entry.position()
        )));
      }
    }
  }

  let mut seen = HashSet::new();
  for participant in matches
    .iter()
    .filter(|m| m.round_number == 1)
    .flat_map(|m| m.slots.iter().filter_map(|slot| slot.participant()))
  {
    if !seen.insert(participant) {
      return Err(structural(format!("Participant {participant} is placed twice in round 1")));
    }
  }
  if seen.len() as u32 != topology.participant_count {
    return Err(structural(format!(
      "Round 1 places {} participants, planned {}",
      seen.len(),
      topology.participant_count
    )));
  }
  Ok(())
}

/// Fails when the registered field no longer matches the stored topology.
pub fn check_participant_drift(tournament: &Tournament, participants: &[Participant]) -> BracketResult<()> {
  let registered = participants
    .iter()
    .filter(|p| p.tournament_id == tournament.id)
    .count() as u32;
  if registered != tournament.participant_count {
    return Err(structural(format!(
      "Tournament {} was generated for {} participants but {} are registered",
      tournament.id, tournament.participant_count, registered
    )));
  }
  Ok(())
}

fn structural(message: impl Into<String>) -> BracketError {
  BracketError::Structural(message.into())
}
