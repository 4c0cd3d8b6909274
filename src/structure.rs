//! Bracket topology planning.
//!
//! A topology depends only on the participant count: each round pairs off
//! as many entrants as it can and passes the odd one out through a bye.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BracketError, BracketResult};
use crate::types::{MatchRef, SlotPosition, MIN_PARTICIPANTS};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundPlan {
  pub number: u32,
  pub match_count: u32,
  pub bye_count: u32,
  pub participants_entering: u32,
  pub participants_advancing: u32,
}

impl RoundPlan {
  pub fn has_bye(&self) -> bool {
    self.bye_count > 0
  }

  /// The bye sits on the position after the last real match.
  pub fn bye_position(&self) -> Option<MatchRef> {
    if self.has_bye() {
      Some(MatchRef::new(self.number, self.match_count + 1))
    } else {
      None
    }
  }

  /// Matches plus bye entries.
  pub fn entry_count(&self) -> u32 {
    self.match_count + self.bye_count
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancementEdge {
  pub from: MatchRef,
  pub to: MatchRef,
  pub slot: SlotPosition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByeEdge {
  pub from_round: u32,
  pub to: MatchRef,
  pub slot: SlotPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
  pub participant_count: u32,
  pub total_rounds: u32,
  pub rounds: Vec<RoundPlan>,
  pub advancement_edges: Vec<AdvancementEdge>,
  pub bye_edges: Vec<ByeEdge>,
}

/// Where the winner of `from` goes: round + 1, match ceil(m / 2), slot by parity.
/// Applies equally to a bye occupying the position after a round's last match.
pub fn advancement_destination(from: MatchRef) -> (MatchRef, SlotPosition) {
  let to = MatchRef::new(from.round + 1, (from.match_number + 1) / 2);
  (to, SlotPosition::for_feeder(from.match_number))
}

pub fn plan(participant_count: u32) -> BracketResult<Topology> {
  if participant_count < MIN_PARTICIPANTS {
    return Err(BracketError::InvalidInput(format!(
      "Tournament requires at least {MIN_PARTICIPANTS} participants, got {participant_count}."
    )));
  }

  let mut rounds = Vec::new();
  let mut remaining = participant_count;
  let mut number = 1u32;
  while remaining > 1 {
    let match_count = remaining / 2;
    let bye_count = remaining % 2;
    rounds.push(RoundPlan {
      number,
      match_count,
      bye_count,
      participants_entering: remaining,
      participants_advancing: match_count + bye_count,
    });
    remaining = match_count + bye_count;
    number += 1;
  }

  let total_rounds = rounds.len() as u32;
  let mut advancement_edges = Vec::new();
  let mut bye_edges = Vec::new();
  for round in rounds.iter().filter(|round| round.number < total_rounds) {
    for match_number in 1..=round.match_count {
      let from = MatchRef::new(round.number, match_number);
      let (to, slot) = advancement_destination(from);
      advancement_edges.push(AdvancementEdge { from, to, slot });
    }
    if let Some(bye) = round.bye_position() {
      let (to, slot) = advancement_destination(bye);
      bye_edges.push(ByeEdge {
        from_round: round.number,
        to,
        slot,
      });
    }
  }

  Ok(Topology {
    participant_count,
    total_rounds,
    rounds,
    advancement_edges,
    bye_edges,
  })
}

impl Topology {
  pub fn round(&self, number: u32) -> Option<&RoundPlan> {
    number
      .checked_sub(1)
      .and_then(|idx| self.rounds.get(idx as usize))
  }

  pub fn first_round(&self) -> Option<&RoundPlan> {
    self.rounds.first()
  }

  pub fn final_round(&self) -> Option<&RoundPlan> {
    self.rounds.last()
  }

  pub fn is_final(&self, round: u32) -> bool {
    round == self.total_rounds
  }

  /// Destination of a match winner, or `None` for the final or an unknown position.
  pub fn destination_of(&self, from: MatchRef) -> Option<(MatchRef, SlotPosition)> {
    if self.is_final(from.round) {
      return None;
    }
    let round = self.round(from.round)?;
    if from.match_number == 0 || from.match_number > round.match_count {
      return None;
    }
    Some(advancement_destination(from))
  }

  pub fn bye_destination(&self, round: u32) -> Option<(MatchRef, SlotPosition)> {
    self
      .bye_edges
      .iter()
      .find(|edge| edge.from_round == round)
      .map(|edge| (edge.to, edge.slot))
  }

  pub fn total_matches(&self) -> u32 {
    self.rounds.iter().map(|round| round.match_count).sum()
  }
}

impl fmt::Display for Topology {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Tournament structure for {} participants:", self.participant_count)?;
    writeln!(f)?;
    for round in &self.rounds {
      writeln!(
        f,
        "Round {}: {} matches, {} byes ({} -> {})",
        round.number,
        round.match_count,
        round.bye_count,
        round.participants_entering,
        round.participants_advancing
      )?;
    }
    writeln!(f)?;
    writeln!(f, "Total rounds: {}", self.total_rounds)?;
    writeln!(f)?;
    writeln!(f, "Advancement mappings:")?;
    for edge in &self.advancement_edges {
      writeln!(f, "  {} winner -> {} slot {}", edge.from, edge.to, edge.slot.number())?;
    }
    writeln!(f)?;
    writeln!(f, "Bye placements:")?;
    for edge in &self.bye_edges {
      writeln!(
        f,
        "  Round {} bye -> {} slot {}",
        edge.from_round,
        edge.to,
        edge.slot.number()
      )?;
    }
    Ok(())
  }
}
