use thiserror::Error;
use uuid::Uuid;

use crate::types::{MatchId, MatchStatus, ParticipantId, TournamentId, TournamentStatus};

pub type BracketResult<T> = Result<T, BracketError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
  #[error("Invalid input: {0}")]
  InvalidInput(String),

  #[error("Tournament {tournament_id} is {status} and no longer accepts this change")]
  TournamentLocked {
    tournament_id: TournamentId,
    status: TournamentStatus,
  },

  #[error("Tournament {tournament_id} is {status}, not active")]
  TournamentNotActive {
    tournament_id: TournamentId,
    status: TournamentStatus,
  },

  #[error("Match {0} already started")]
  AlreadyClaimed(MatchId),

  #[error("Result already recorded for match {match_id}")]
  AlreadyCompleted {
    match_id: MatchId,
    recorded_winner: Option<ParticipantId>,
  },

  #[error("Match {match_id} is {status}, not in progress")]
  NotInProgress { match_id: MatchId, status: MatchStatus },

  #[error("Match {0} is missing participants")]
  MatchNotReady(MatchId),

  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: Uuid },

  #[error("Structural error: {0}")]
  Structural(String),

  #[error("Storage error: {0}")]
  Storage(String),
}

impl BracketError {
  pub fn not_found(kind: &'static str, id: Uuid) -> Self {
    BracketError::NotFound { kind, id }
  }

  /// Lost races the caller is expected to surface and move on from.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self,
      BracketError::AlreadyClaimed(_) | BracketError::AlreadyCompleted { .. }
    )
  }

  pub fn user_message(&self) -> String {
    match self {
      BracketError::AlreadyClaimed(_) => "Match already started on another device.".to_string(),
      BracketError::AlreadyCompleted { .. } => "Result already recorded.".to_string(),
      BracketError::Structural(_) | BracketError::Storage(_) => {
        "Something went wrong with this tournament. Please contact an administrator.".to_string()
      }
      other => other.to_string(),
    }
  }
}
