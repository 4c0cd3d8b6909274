//! Round-1 placement and the empty shells of later rounds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{BracketError, BracketResult};
use crate::sim::SimRng;
use crate::structure::Topology;
use crate::types::{Match, MatchRef, Participant, Slot, TournamentId};

/// How round-1 pairings are drawn. The bye always goes to the top seed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PairingPolicy {
  /// Seed 2 vs 3, 4 vs 5, ... in increasing match order.
  #[default]
  Seeded,
  /// Same bye, remaining entrants shuffled with a fixed RNG seed.
  Shuffled { seed: u64 },
}

pub fn populate(
  topology: &Topology,
  tournament_id: TournamentId,
  seeded: &[Participant],
) -> BracketResult<Vec<Match>> {
  populate_with(topology, tournament_id, seeded, PairingPolicy::Seeded)
}

pub fn populate_with(
  topology: &Topology,
  tournament_id: TournamentId,
  seeded: &[Participant],
  policy: PairingPolicy,
) -> BracketResult<Vec<Match>> {
  let first = topology
    .first_round()
    .ok_or_else(|| BracketError::Structural("Topology has no rounds.".to_string()))?;
  let ordered = normalize_seeds(seeded, topology.participant_count)?;

  let (bye_entrant, mut pool) = if first.has_bye() {
    (Some(ordered[0].id), ordered[1..].iter().map(|p| p.id).collect::<Vec<_>>())
  } else {
    (None, ordered.iter().map(|p| p.id).collect::<Vec<_>>())
  };

  if let PairingPolicy::Shuffled { seed } = policy {
    SimRng::new(seed).shuffle(&mut pool);
  }

  let mut entries = Vec::with_capacity(first.entry_count() as usize);
  for (idx, pair) in pool.chunks_exact(2).enumerate() {
    let position = MatchRef::new(1, idx as u32 + 1);
    entries.push(Match::new(
      tournament_id,
      position,
      [Slot::Participant(pair[0]), Slot::Participant(pair[1])],
    ));
  }
  if let (Some(entrant), Some(position)) = (bye_entrant, first.bye_position()) {
    entries.push(Match::new_bye(tournament_id, position, Slot::Participant(entrant)));
  }
  Ok(entries)
}

/// Round-1 entries plus every later round, with feeder placeholders in each slot.
pub fn layout(
  topology: &Topology,
  tournament_id: TournamentId,
  seeded: &[Participant],
  policy: PairingPolicy,
) -> BracketResult<Vec<Match>> {
  let mut entries = populate_with(topology, tournament_id, seeded, policy)?;
  entries.extend(later_round_shells(topology, tournament_id));
  Ok(entries)
}

fn later_round_shells(topology: &Topology, tournament_id: TournamentId) -> Vec<Match> {
  let mut shells = Vec::new();
  for round in topology.rounds.iter().skip(1) {
    let feeder = |match_number: u32| Slot::WinnerOf(MatchRef::new(round.number - 1, match_number));
    for k in 1..=round.match_count {
      shells.push(Match::new(
        tournament_id,
        MatchRef::new(round.number, k),
        [feeder(2 * k - 1), feeder(2 * k)],
      ));
    }
    if let Some(position) = round.bye_position() {
      shells.push(Match::new_bye(
        tournament_id,
        position,
        feeder(2 * position.match_number - 1),
      ));
    }
  }
  shells
}

fn normalize_seeds(seeded: &[Participant], expected: u32) -> BracketResult<Vec<&Participant>> {
  if seeded.len() != expected as usize {
    return Err(BracketError::InvalidInput(format!(
      "Topology was planned for {expected} participants but {} were supplied.",
      seeded.len()
    )));
  }
  let mut ordered = seeded.iter().collect::<Vec<_>>();
  ordered.sort_by_key(|p| p.seed);

  let mut seen_seeds = HashSet::new();
  let mut seen_ids = HashSet::new();
  for participant in &ordered {
    if participant.seed == 0 {
      return Err(BracketError::InvalidInput(format!(
        "Participant {} has no seed.",
        participant.name
      )));
    }
    if !seen_seeds.insert(participant.seed) {
      return Err(BracketError::InvalidInput(format!(
        "Seed {} is assigned more than once.",
        participant.seed
      )));
    }
    if !seen_ids.insert(participant.id) {
      return Err(BracketError::InvalidInput(format!(
        "Participant {} is listed more than once.",
        participant.id
      )));
    }
  }
  Ok(ordered)
}
