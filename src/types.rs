use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ── Constants ──────────────────────────────────────────────────────────

pub const MIN_PARTICIPANTS: u32 = 2;
pub const BYE_SWEEP_SAFETY_LIMIT: usize = 1000;

// ── Identifiers ────────────────────────────────────────────────────────

pub type TournamentId = Uuid;
pub type ParticipantId = Uuid;
pub type MatchId = Uuid;
/// Identifies the game session that owns an in-progress match.
pub type ClaimToken = Uuid;

// ── Statuses ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    #[default]
    Setup,
    Registration,
    Active,
    Completed,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::Setup => "setup",
            TournamentStatus::Registration => "registration",
            TournamentStatus::Active => "active",
            TournamentStatus::Completed => "completed",
        }
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, TournamentStatus::Setup | TournamentStatus::Registration)
    }
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Registered,
    Eliminated,
    Advanced,
    Champion,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Bye,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Completed => "completed",
            MatchStatus::Bye => "bye",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Bracket positions ──────────────────────────────────────────────────

/// A (round, match) coordinate inside a bracket. Both numbers are 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRef {
    pub round: u32,
    pub match_number: u32,
}

impl MatchRef {
    pub fn new(round: u32, match_number: u32) -> Self {
        MatchRef { round, match_number }
    }
}

impl fmt::Display for MatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}M{}", self.round, self.match_number)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPosition {
    One,
    Two,
}

impl SlotPosition {
    /// Odd feeder positions land in slot 1, even ones in slot 2.
    pub fn for_feeder(match_number: u32) -> Self {
        if match_number % 2 == 1 {
            SlotPosition::One
        } else {
            SlotPosition::Two
        }
    }

    pub fn index(self) -> usize {
        match self {
            SlotPosition::One => 0,
            SlotPosition::Two => 1,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            SlotPosition::One => 1,
            SlotPosition::Two => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Slot {
    Participant(ParticipantId),
    /// Filled once the winner (or bye participant) of the feeder position is known.
    WinnerOf(MatchRef),
    Empty,
}

impl Slot {
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Slot::Participant(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, Slot::Participant(_))
    }
}

// ── Entities ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub status: TournamentStatus,
    /// Participant count the stored brackets were generated for (0 before generation).
    pub participant_count: u32,
    pub total_rounds: u32,
    pub champion_id: Option<ParticipantId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Tournament {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Tournament {
            id: Uuid::new_v4(),
            name: name.into(),
            status: TournamentStatus::Setup,
            participant_count: 0,
            total_rounds: 0,
            champion_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub tournament_id: TournamentId,
    pub name: String,
    pub seed: u32,
    pub status: ParticipantStatus,
    pub registered_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(tournament_id: TournamentId, name: impl Into<String>, seed: u32, now: DateTime<Utc>) -> Self {
        Participant {
            id: Uuid::new_v4(),
            tournament_id,
            name: name.into(),
            seed,
            status: ParticipantStatus::Registered,
            registered_at: now,
        }
    }
}

/// One bracket entry: a pairing within a round, or a round's bye.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round_number: u32,
    pub match_number: u32,
    pub slots: [Slot; 2],
    pub winner_id: Option<ParticipantId>,
    pub status: MatchStatus,
    pub is_bye_match: bool,
    pub claim_token: Option<ClaimToken>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn new(tournament_id: TournamentId, position: MatchRef, slots: [Slot; 2]) -> Self {
        Match {
            id: Uuid::new_v4(),
            tournament_id,
            round_number: position.round,
            match_number: position.match_number,
            slots,
            winner_id: None,
            status: MatchStatus::Pending,
            is_bye_match: false,
            claim_token: None,
            claimed_at: None,
            completed_at: None,
        }
    }

    pub fn new_bye(tournament_id: TournamentId, position: MatchRef, entrant: Slot) -> Self {
        let mut entry = Match::new(tournament_id, position, [entrant, Slot::Empty]);
        entry.status = MatchStatus::Bye;
        entry.is_bye_match = true;
        entry
    }

    pub fn position(&self) -> MatchRef {
        MatchRef::new(self.round_number, self.match_number)
    }

    pub fn participant1_id(&self) -> Option<ParticipantId> {
        self.slots[0].participant()
    }

    pub fn participant2_id(&self) -> Option<ParticipantId> {
        self.slots[1].participant()
    }

    pub fn has_participant(&self, id: ParticipantId) -> bool {
        self.slots.iter().any(|slot| slot.participant() == Some(id))
    }

    pub fn opponent_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        if !self.has_participant(id) {
            return None;
        }
        self.slots
            .iter()
            .filter_map(|slot| slot.participant())
            .find(|other| *other != id)
    }

    /// Both slots are known and nobody has claimed it yet.
    pub fn is_playable(&self) -> bool {
        !self.is_bye_match
            && self.status == MatchStatus::Pending
            && self.claim_token.is_none()
            && self.slots.iter().all(Slot::is_filled)
    }

    /// A bye entry whose participant is known but not yet written forward.
    pub fn is_unresolved_bye(&self) -> bool {
        self.is_bye_match && self.winner_id.is_none() && self.slots[0].is_filled()
    }
}

/// Flat persisted shape of a bracket entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRow {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round_number: u32,
    pub match_number: u32,
    pub participant1_id: Option<ParticipantId>,
    pub participant2_id: Option<ParticipantId>,
    pub winner_id: Option<ParticipantId>,
    pub status: MatchStatus,
    pub is_bye_match: bool,
    pub claim_token: Option<ClaimToken>,
}

impl From<&Match> for MatchRow {
    fn from(entry: &Match) -> Self {
        MatchRow {
            id: entry.id,
            tournament_id: entry.tournament_id,
            round_number: entry.round_number,
            match_number: entry.match_number,
            participant1_id: entry.participant1_id(),
            participant2_id: entry.participant2_id(),
            winner_id: entry.winner_id,
            status: entry.status,
            is_bye_match: entry.is_bye_match,
            claim_token: entry.claim_token,
        }
    }
}
