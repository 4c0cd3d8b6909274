use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::advance::{AdvancementEngine, AdvancementResult};
use crate::claim::MatchClaimGuard;
use crate::config::EngineConfig;
use crate::error::{BracketError, BracketResult};
use crate::populate::{layout, populate_with};
use crate::store::{BracketStore, MemoryStore};
use crate::structure::{plan, Topology};
use crate::types::{
    ClaimToken, Match, MatchId, MatchRow, Participant, ParticipantId, ParticipantStatus, Tournament,
    TournamentId, TournamentStatus, MIN_PARTICIPANTS,
};
use crate::validate::{check_participant_drift, validate_bracket};

/// TournamentDesk is the entry point the surrounding application talks to.
/// It owns the tournament lifecycle and hands match-level work to the
/// claim guard and the advancement engine.
pub struct TournamentDesk<S: BracketStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl TournamentDesk<MemoryStore> {
    pub fn in_memory(config: EngineConfig) -> Self {
        TournamentDesk::new(Arc::new(MemoryStore::new()), config)
    }
}

impl<S: BracketStore> TournamentDesk<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        TournamentDesk { store, config }
    }

    pub fn store(&self) -> &S {
        self.store.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    pub fn create_tournament(&self, name: &str) -> BracketResult<Tournament> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BracketError::InvalidInput("Tournament name is required.".to_string()));
        }
        let tournament = Tournament::new(name, Utc::now());
        self.store.insert_tournament(tournament.clone())?;
        info!(tournament_id = %tournament.id, name = %tournament.name, "tournament created");
        Ok(tournament)
    }

    pub fn tournament(&self, tournament_id: TournamentId) -> BracketResult<Tournament> {
        self.store.load_tournament(tournament_id)
    }

    pub fn participants(&self, tournament_id: TournamentId) -> BracketResult<Vec<Participant>> {
        self.store.load_participants(tournament_id)
    }

    pub fn matches(&self, tournament_id: TournamentId) -> BracketResult<Vec<Match>> {
        self.store.load_matches(tournament_id)
    }

    pub fn open_registration(&self, tournament_id: TournamentId) -> BracketResult<()> {
        self.transition(tournament_id, TournamentStatus::Setup, TournamentStatus::Registration)
    }

    pub fn close_registration(&self, tournament_id: TournamentId) -> BracketResult<()> {
        self.transition(tournament_id, TournamentStatus::Registration, TournamentStatus::Setup)
    }

    /// Moves a tournament with generated, drift-free brackets into play.
    pub fn start_tournament(&self, tournament_id: TournamentId) -> BracketResult<Tournament> {
        let tournament = self.store.load_tournament(tournament_id)?;
        if !tournament.status.accepts_registrations() {
            return Err(locked(&tournament));
        }
        if self.store.load_matches(tournament_id)?.is_empty() {
            return Err(BracketError::InvalidInput(
                "Generate brackets before starting the tournament.".to_string(),
            ));
        }
        check_participant_drift(&tournament, &self.store.load_participants(tournament_id)?)?;

        let now = Utc::now();
        let started = self.store.update_tournament_if(tournament_id, tournament.status, &mut |t| {
            t.status = TournamentStatus::Active;
            t.started_at = Some(now);
        })?;
        if !started {
            return Err(locked(&self.store.load_tournament(tournament_id)?));
        }
        AdvancementEngine::new(self.store()).advance_byes_at(tournament_id, now)?;
        info!(tournament_id = %tournament_id, "tournament started");
        self.store.load_tournament(tournament_id)
    }

    // ── Registration and seeding ───────────────────────────────────────

    pub fn register_participant(&self, tournament_id: TournamentId, name: &str) -> BracketResult<Participant> {
        let tournament = self.editable(tournament_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(BracketError::InvalidInput("Participant name is required.".to_string()));
        }
        let existing = self.store.load_participants(tournament_id)?;
        if existing.iter().any(|p| p.name.eq_ignore_ascii_case(name)) {
            return Err(BracketError::InvalidInput(format!(
                "A participant named \"{name}\" is already registered."
            )));
        }

        let seed = next_seed(&existing);
        let participant = Participant::new(tournament_id, name, seed, Utc::now());
        self.store.upsert_participants(std::slice::from_ref(&participant))?;
        info!(tournament_id = %tournament_id, participant_id = %participant.id, seed, "participant registered");
        self.warn_on_drift(&tournament)?;
        Ok(participant)
    }

    /// Registers every new name, silently skipping blanks and names already taken.
    pub fn register_participants<T: AsRef<str>>(
        &self,
        tournament_id: TournamentId,
        names: &[T],
    ) -> BracketResult<Vec<Participant>> {
        let tournament = self.editable(tournament_id)?;
        let existing = self.store.load_participants(tournament_id)?;
        let mut taken = existing
            .iter()
            .map(|p| p.name.to_ascii_lowercase())
            .collect::<HashSet<_>>();
        let mut seed = next_seed(&existing);
        let now = Utc::now();

        let mut added = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || !taken.insert(name.to_ascii_lowercase()) {
                continue;
            }
            added.push(Participant::new(tournament_id, name, seed, now));
            seed += 1;
        }
        self.store.upsert_participants(&added)?;
        info!(
            tournament_id = %tournament_id,
            added = added.len(),
            skipped = names.len() - added.len(),
            "bulk registration"
        );
        self.warn_on_drift(&tournament)?;
        Ok(added)
    }

    /// Reseeds from `ordered` (first = seed 1). Discards any generated brackets.
    pub fn assign_seeds(&self, tournament_id: TournamentId, ordered: &[ParticipantId]) -> BracketResult<Vec<Participant>> {
        let tournament = self.store.load_tournament(tournament_id)?;
        if tournament.status != TournamentStatus::Setup {
            return Err(locked(&tournament));
        }
        let mut participants = self.store.load_participants(tournament_id)?;
        let unique = ordered.iter().collect::<HashSet<_>>();
        if ordered.len() != participants.len()
            || unique.len() != ordered.len()
            || participants.iter().any(|p| !unique.contains(&p.id))
        {
            return Err(BracketError::InvalidInput(
                "Seeding must list every registered participant exactly once.".to_string(),
            ));
        }

        self.discard_brackets(&tournament)?;
        for participant in participants.iter_mut() {
            if let Some(idx) = ordered.iter().position(|id| *id == participant.id) {
                participant.seed = idx as u32 + 1;
            }
        }
        self.store.upsert_participants(&participants)?;
        info!(tournament_id = %tournament_id, count = participants.len(), "seeds assigned");
        self.store.load_participants(tournament_id)
    }

    /// Removes a participant before play. Brackets are discarded first.
    pub fn remove_participant(&self, tournament_id: TournamentId, participant_id: ParticipantId) -> BracketResult<()> {
        let tournament = self.editable(tournament_id)?;
        self.discard_brackets(&tournament)?;
        if !self.store.delete_participant(tournament_id, participant_id)? {
            return Err(BracketError::not_found("Participant", participant_id));
        }
        info!(tournament_id = %tournament_id, participant_id = %participant_id, "participant removed");
        Ok(())
    }

    // ── Brackets ───────────────────────────────────────────────────────

    pub fn plan_structure(&self, participant_count: u32) -> BracketResult<Topology> {
        plan(participant_count)
    }

    /// Round-1 entries for `seeded` under the configured pairing policy. Nothing is stored.
    pub fn populate_brackets(
        &self,
        topology: &Topology,
        tournament_id: TournamentId,
        seeded: &[Participant],
    ) -> BracketResult<Vec<Match>> {
        populate_with(topology, tournament_id, seeded, self.config.pairing)
    }

    pub fn validate_structure(&self, topology: &Topology) -> BracketResult<()> {
        crate::validate::validate_structure(topology)
    }

    /// Plans, lays out and stores the full bracket, replacing any earlier one.
    /// Only allowed while the tournament is in setup.
    pub fn generate_brackets(&self, tournament_id: TournamentId) -> BracketResult<Vec<Match>> {
        let tournament = self.store.load_tournament(tournament_id)?;
        if tournament.status != TournamentStatus::Setup {
            return Err(locked(&tournament));
        }
        let mut participants = self.store.load_participants(tournament_id)?;
        if (participants.len() as u32) < MIN_PARTICIPANTS {
            return Err(BracketError::InvalidInput(format!(
                "At least {MIN_PARTICIPANTS} participants are needed to generate brackets, found {}.",
                participants.len()
            )));
        }

        let topology = plan(participants.len() as u32)?;
        self.validate_structure(&topology)?;
        let entries = layout(&topology, tournament_id, &participants, self.config.pairing)?;
        validate_bracket(&topology, &entries)?;

        let entry_count = entries.len();
        if !self.store.insert_batch(tournament_id, TournamentStatus::Setup, entries)? {
            return Err(locked(&self.store.load_tournament(tournament_id)?));
        }
        let recorded = self.store.update_tournament_if(tournament_id, TournamentStatus::Setup, &mut |t| {
            t.participant_count = topology.participant_count;
            t.total_rounds = topology.total_rounds;
        })?;
        if !recorded {
            return Err(locked(&self.store.load_tournament(tournament_id)?));
        }

        for participant in participants.iter_mut() {
            participant.status = ParticipantStatus::Registered;
        }
        self.store.upsert_participants(&participants)?;
        let byes = AdvancementEngine::new(self.store()).advance_byes(tournament_id)?;

        info!(
            tournament_id = %tournament_id,
            participants = topology.participant_count,
            rounds = topology.total_rounds,
            entries = entry_count,
            byes_advanced = byes,
            "brackets generated"
        );
        self.store.load_matches(tournament_id)
    }

    /// Regenerates when the registered field drifted from the stored brackets.
    /// Returns whether anything was regenerated.
    pub fn resync_brackets(&self, tournament_id: TournamentId) -> BracketResult<bool> {
        let tournament = self.store.load_tournament(tournament_id)?;
        let participants = self.store.load_participants(tournament_id)?;
        let Err(drift) = check_participant_drift(&tournament, &participants) else {
            return Ok(false);
        };
        if tournament.status != TournamentStatus::Setup {
            return Err(drift);
        }
        warn!(tournament_id = %tournament_id, "participant drift detected, regenerating brackets");
        self.generate_brackets(tournament_id)?;
        Ok(true)
    }

    /// Rounds recomputed from the stored participant count.
    pub fn topology(&self, tournament_id: TournamentId) -> BracketResult<Topology> {
        let tournament = self.store.load_tournament(tournament_id)?;
        plan(tournament.participant_count)
    }

    pub fn bracket_rows(&self, tournament_id: TournamentId) -> BracketResult<Vec<MatchRow>> {
        Ok(self
            .store
            .load_matches(tournament_id)?
            .iter()
            .map(MatchRow::from)
            .collect())
    }

    // ── Play ───────────────────────────────────────────────────────────

    pub fn claim_match(&self, match_id: MatchId) -> BracketResult<ClaimToken> {
        MatchClaimGuard::new(self.store()).claim(match_id)
    }

    /// Claims on behalf of an already created session; `rollback` receives the
    /// session when the claim is lost.
    pub fn claim_match_with_rollback<T, F>(&self, match_id: MatchId, session: T, rollback: F) -> BracketResult<(ClaimToken, T)>
    where
        F: FnOnce(T),
    {
        MatchClaimGuard::new(self.store()).claim_with_rollback(match_id, session, rollback)
    }

    pub fn release_claim(&self, match_id: MatchId, token: ClaimToken) -> BracketResult<()> {
        MatchClaimGuard::new(self.store()).release(match_id, token)
    }

    /// Returns abandoned claims to pending when `claimTimeoutSecs` is configured.
    pub fn release_stale_claims(&self, tournament_id: TournamentId) -> BracketResult<Vec<MatchId>> {
        MatchClaimGuard::new(self.store()).release_stale(tournament_id, self.config.claim_timeout(), Utc::now())
    }

    pub fn complete_match(&self, match_id: MatchId, winner_id: ParticipantId) -> BracketResult<AdvancementResult> {
        AdvancementEngine::new(self.store()).complete(match_id, winner_id)
    }

    pub fn advance_byes(&self, tournament_id: TournamentId) -> BracketResult<usize> {
        AdvancementEngine::new(self.store()).advance_byes(tournament_id)
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn transition(&self, tournament_id: TournamentId, from: TournamentStatus, to: TournamentStatus) -> BracketResult<()> {
        if self.store.update_tournament_if(tournament_id, from, &mut |t| t.status = to)? {
            info!(tournament_id = %tournament_id, from = %from, to = %to, "tournament status changed");
            return Ok(());
        }
        Err(locked(&self.store.load_tournament(tournament_id)?))
    }

    fn editable(&self, tournament_id: TournamentId) -> BracketResult<Tournament> {
        let tournament = self.store.load_tournament(tournament_id)?;
        if !tournament.status.accepts_registrations() {
            return Err(locked(&tournament));
        }
        Ok(tournament)
    }

    fn discard_brackets(&self, tournament: &Tournament) -> BracketResult<()> {
        let removed = self.store.delete_matches(tournament.id)?;
        if removed == 0 && tournament.participant_count == 0 {
            return Ok(());
        }
        self.store.update_tournament_if(tournament.id, tournament.status, &mut |t| {
            t.participant_count = 0;
            t.total_rounds = 0;
        })?;
        info!(tournament_id = %tournament.id, removed, "brackets discarded");
        Ok(())
    }

    fn warn_on_drift(&self, tournament: &Tournament) -> BracketResult<()> {
        if tournament.participant_count == 0 {
            return Ok(());
        }
        let participants = self.store.load_participants(tournament.id)?;
        if let Err(err) = check_participant_drift(tournament, &participants) {
            warn!(tournament_id = %tournament.id, error = %err, "brackets need a resync");
        }
        Ok(())
    }
}

fn next_seed(existing: &[Participant]) -> u32 {
    existing.iter().map(|p| p.seed).max().unwrap_or(0) + 1
}

fn locked(tournament: &Tournament) -> BracketError {
    BracketError::TournamentLocked {
        tournament_id: tournament.id,
        status: tournament.status,
    }
}
