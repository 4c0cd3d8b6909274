use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use trivia_bracket::store::MatchUpdate;
use trivia_bracket::types::{
    Match, MatchId, MatchRef, MatchStatus, Participant, ParticipantId, ParticipantStatus, Slot, SlotPosition,
    Tournament, TournamentId, TournamentStatus,
};
use trivia_bracket::{
    plan, validate_structure, AdvancementEngine, BracketError, BracketResult, BracketStore, EngineConfig,
    MatchClaimGuard, MemoryStore, TournamentDesk,
};

fn started_desk(n: usize) -> (TournamentDesk<MemoryStore>, TournamentId) {
    let desk = TournamentDesk::in_memory(EngineConfig::default());
    let tournament = desk.create_tournament("Thursday Trivia").unwrap();
    let names = (1..=n).map(|i| format!("Team {i}")).collect::<Vec<_>>();
    desk.register_participants(tournament.id, &names).unwrap();
    desk.generate_brackets(tournament.id).unwrap();
    desk.start_tournament(tournament.id).unwrap();
    (desk, tournament.id)
}

fn entry_at(desk: &TournamentDesk<MemoryStore>, tournament_id: TournamentId, round: u32, match_number: u32) -> Match {
    desk.matches(tournament_id)
        .unwrap()
        .into_iter()
        .find(|m| m.position() == MatchRef::new(round, match_number))
        .unwrap()
}

/// Plays every match with the better seed winning. Returns the number of matches played.
fn play_chalk(desk: &TournamentDesk<MemoryStore>, tournament_id: TournamentId) -> usize {
    let seeds = desk
        .participants(tournament_id)
        .unwrap()
        .into_iter()
        .map(|p| (p.id, p.seed))
        .collect::<HashMap<ParticipantId, u32>>();
    let mut played = 0;
    while let Some(next) = desk.matches(tournament_id).unwrap().into_iter().find(|m| m.is_playable()) {
        let a = next.participant1_id().unwrap();
        let b = next.participant2_id().unwrap();
        let winner = if seeds[&a] < seeds[&b] { a } else { b };
        desk.claim_match(next.id).unwrap();
        desk.complete_match(next.id, winner).unwrap();
        played += 1;
    }
    played
}

#[test]
fn test_five_participants() {
    let topology = plan(5).unwrap();
    let shape = topology
        .rounds
        .iter()
        .map(|r| (r.match_count, r.bye_count))
        .collect::<Vec<_>>();
    assert_eq!(shape, vec![(2, 1), (1, 0), (1, 0)]);
    assert_eq!(topology.total_rounds, 3);

    let (desk, id) = started_desk(5);
    assert_eq!(play_chalk(&desk, id), 4);
    let tournament = desk.tournament(id).unwrap();
    let field = desk.participants(id).unwrap();
    assert_eq!(tournament.status, TournamentStatus::Completed);
    assert_eq!(tournament.champion_id, Some(field[0].id));
    assert_eq!(field[0].status, ParticipantStatus::Champion);
    assert!(field[1..].iter().all(|p| p.status == ParticipantStatus::Eliminated));
}

#[test]
fn test_nineteen_participants() {
    let topology = plan(19).unwrap();
    let shape = topology
        .rounds
        .iter()
        .map(|r| (r.match_count, r.bye_count))
        .collect::<Vec<_>>();
    assert_eq!(shape, vec![(9, 1), (5, 0), (2, 1), (1, 1), (1, 0)]);
    assert_eq!(topology.total_rounds, 5);
    assert!(validate_structure(&topology).is_ok());
    assert_eq!(
        topology.destination_of(MatchRef::new(2, 2)),
        Some((MatchRef::new(3, 1), SlotPosition::Two))
    );
    assert_eq!(
        topology.bye_destination(4),
        Some((MatchRef::new(5, 1), SlotPosition::Two))
    );

    let (desk, id) = started_desk(19);
    assert_eq!(play_chalk(&desk, id), 18);

    let r2m2 = entry_at(&desk, id, 2, 2);
    let r3m1 = entry_at(&desk, id, 3, 1);
    assert_eq!(r3m1.slots[1].participant(), r2m2.winner_id);

    let round_four_bye = entry_at(&desk, id, 4, 2);
    assert!(round_four_bye.is_bye_match);
    let final_entry = entry_at(&desk, id, 5, 1);
    assert_eq!(final_entry.slots[1].participant(), round_four_bye.winner_id);
    assert_eq!(final_entry.status, MatchStatus::Completed);
}

#[test]
fn test_thirty_two_participants() {
    let topology = plan(32).unwrap();
    assert_eq!(topology.total_rounds, 5);
    assert!(topology.rounds.iter().all(|r| r.bye_count == 0));
    assert!(topology.bye_edges.is_empty());

    let (desk, id) = started_desk(32);
    let entries = desk.matches(id).unwrap();
    assert_eq!(entries.len(), 31);
    assert!(entries.iter().all(|m| !m.is_bye_match));
    assert_eq!(play_chalk(&desk, id), 31);
}

#[test]
fn test_round_one_covers_every_seed_once() {
    for n in 2..=64usize {
        let (desk, id) = started_desk(n);
        let mut seen = desk
            .matches(id)
            .unwrap()
            .iter()
            .filter(|m| m.round_number == 1)
            .flat_map(|m| m.slots.iter().filter_map(Slot::participant).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        seen.sort();
        let mut field = desk.participants(id).unwrap().iter().map(|p| p.id).collect::<Vec<_>>();
        field.sort();
        assert_eq!(seen, field, "n = {n}");
    }
}

#[test]
fn test_advance_byes_twice_changes_nothing() {
    let (desk, id) = started_desk(11);
    desk.advance_byes(id).unwrap();
    let before = desk.matches(id).unwrap();
    assert_eq!(desk.advance_byes(id).unwrap(), 0);
    assert_eq!(desk.matches(id).unwrap(), before);
}

#[test]
fn test_regeneration_refused_after_start() {
    let (desk, id) = started_desk(6);
    let before = desk.matches(id).unwrap();
    let err = desk.generate_brackets(id).unwrap_err();
    assert!(matches!(err, BracketError::TournamentLocked { .. }));
    assert_eq!(desk.matches(id).unwrap(), before);
}

#[test]
fn test_simultaneous_claims_have_one_winner() {
    for _ in 0..50 {
        let (desk, id) = started_desk(4);
        let desk = Arc::new(desk);
        let match_id = entry_at(&desk, id, 1, 1).id;
        let barrier = Arc::new(Barrier::new(2));

        let handles = (0..2)
            .map(|_| {
                let desk = Arc::clone(&desk);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    desk.claim_match(match_id)
                })
            })
            .collect::<Vec<_>>();
        let results = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find(|r| r.is_err()).unwrap();
        assert_eq!(loser, &Err(BracketError::AlreadyClaimed(match_id)));
        assert!(loser.as_ref().unwrap_err().is_recoverable());
    }
}

#[test]
fn test_simultaneous_completions_advance_once() {
    for _ in 0..50 {
        let (desk, id) = started_desk(4);
        let desk = Arc::new(desk);
        let entry = entry_at(&desk, id, 1, 1);
        let (match_id, winner) = (entry.id, entry.participant1_id().unwrap());
        desk.claim_match(match_id).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles = (0..2)
            .map(|_| {
                let desk = Arc::clone(&desk);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    desk.complete_match(match_id, winner)
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| !r.already_recorded).count(), 1);
        let destination = entry_at(&desk, id, 2, 1);
        assert_eq!(destination.slots[0], Slot::Participant(winner));
        assert_eq!(destination.slots[1], Slot::WinnerOf(MatchRef::new(1, 2)));
    }
}

#[test]
fn test_lost_claim_discards_speculative_session() {
    let (desk, id) = started_desk(2);
    let match_id = entry_at(&desk, id, 1, 1).id;
    desk.claim_match(match_id).unwrap();

    let mut discarded = Vec::new();
    let result = desk.claim_match_with_rollback(match_id, "game-session-7", |session| discarded.push(session));
    assert!(matches!(result, Err(BracketError::AlreadyClaimed(_))));
    assert_eq!(discarded, vec!["game-session-7"]);
}

#[test]
fn test_persisted_rows_expose_claim_token() {
    let (desk, id) = started_desk(3);
    let match_id = entry_at(&desk, id, 1, 1).id;
    let token = desk.claim_match(match_id).unwrap();

    let rows = desk.bracket_rows(id).unwrap();
    let row = rows.iter().find(|r| r.id == match_id).unwrap();
    assert_eq!(row.claim_token, Some(token));
    assert_eq!(row.status, MatchStatus::InProgress);

    let json = serde_json::to_value(row).unwrap();
    assert_eq!(json["status"], "in_progress");
    assert_eq!(json["isByeMatch"], false);
    assert!(json.get("participant1Id").is_some());
}

/// Delegates to a `MemoryStore`, running `interleave` once just before the next
/// participant status write. Lets a test slot another request handler into the
/// gap between a committed result and its follow-up writes.
struct InterleavingStore {
    inner: MemoryStore,
    interleave: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl InterleavingStore {
    fn arm(&self, handler: impl FnOnce() + Send + 'static) {
        *self.interleave.lock().unwrap() = Some(Box::new(handler));
    }
}

impl BracketStore for InterleavingStore {
    fn insert_tournament(&self, tournament: Tournament) -> BracketResult<()> {
        self.inner.insert_tournament(tournament)
    }

    fn load_tournament(&self, id: TournamentId) -> BracketResult<Tournament> {
        self.inner.load_tournament(id)
    }

    fn update_tournament_if(
        &self,
        id: TournamentId,
        expected: TournamentStatus,
        mutate: &mut dyn FnMut(&mut Tournament),
    ) -> BracketResult<bool> {
        self.inner.update_tournament_if(id, expected, mutate)
    }

    fn load_participants(&self, tournament_id: TournamentId) -> BracketResult<Vec<Participant>> {
        self.inner.load_participants(tournament_id)
    }

    fn upsert_participants(&self, participants: &[Participant]) -> BracketResult<()> {
        self.inner.upsert_participants(participants)
    }

    fn update_participant_status_if(
        &self,
        participant_id: ParticipantId,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
    ) -> BracketResult<bool> {
        let handler = self.interleave.lock().unwrap().take();
        if let Some(handler) = handler {
            handler();
        }
        self.inner.update_participant_status_if(participant_id, from, to)
    }

    fn delete_participant(&self, tournament_id: TournamentId, participant_id: ParticipantId) -> BracketResult<bool> {
        self.inner.delete_participant(tournament_id, participant_id)
    }

    fn load_matches(&self, tournament_id: TournamentId) -> BracketResult<Vec<Match>> {
        self.inner.load_matches(tournament_id)
    }

    fn load_match(&self, id: MatchId) -> BracketResult<Match> {
        self.inner.load_match(id)
    }

    fn insert_batch(&self, tournament_id: TournamentId, required: TournamentStatus, matches: Vec<Match>) -> BracketResult<bool> {
        self.inner.insert_batch(tournament_id, required, matches)
    }

    fn delete_matches(&self, tournament_id: TournamentId) -> BracketResult<usize> {
        self.inner.delete_matches(tournament_id)
    }

    fn conditional_update(&self, updates: &[MatchUpdate]) -> BracketResult<usize> {
        self.inner.conditional_update(updates)
    }
}

#[test]
fn test_late_status_write_cannot_revive_final_loser() {
    let inner = MemoryStore::new();
    let store = Arc::new(InterleavingStore {
        inner: inner.clone(),
        interleave: Mutex::new(None),
    });
    let desk = TournamentDesk::new(Arc::clone(&store), EngineConfig::default());
    let id = desk.create_tournament("Interleaved").unwrap().id;
    desk.register_participants(id, &["Seed 1", "Seed 2", "Seed 3", "Seed 4"]).unwrap();
    desk.generate_brackets(id).unwrap();
    desk.start_tournament(id).unwrap();
    let field = desk.participants(id).unwrap();
    let seed = |n: usize| field[n - 1].id;
    let at = |round: u32, match_number: u32| {
        desk.matches(id)
            .unwrap()
            .into_iter()
            .find(|m| m.position() == MatchRef::new(round, match_number))
            .unwrap()
    };

    let r1m2 = at(1, 2).id;
    desk.claim_match(r1m2).unwrap();
    desk.complete_match(r1m2, seed(3)).unwrap();

    // A second handler plays the final after seed 1's result commits but before its status lands.
    let final_id = at(2, 1).id;
    let third = seed(3);
    store.arm(move || {
        MatchClaimGuard::new(&inner).claim(final_id).unwrap();
        AdvancementEngine::new(&inner).complete(final_id, third).unwrap();
    });
    let r1m1 = at(1, 1).id;
    desk.claim_match(r1m1).unwrap();
    desk.complete_match(r1m1, seed(1)).unwrap();

    let tournament = desk.tournament(id).unwrap();
    assert_eq!(tournament.status, TournamentStatus::Completed);
    assert_eq!(tournament.champion_id, Some(seed(3)));
    let statuses = desk
        .participants(id)
        .unwrap()
        .into_iter()
        .map(|p| (p.seed, p.status))
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![
            (1, ParticipantStatus::Eliminated),
            (2, ParticipantStatus::Eliminated),
            (3, ParticipantStatus::Champion),
            (4, ParticipantStatus::Eliminated),
        ]
    );
}

#[test]
fn test_racing_handlers_leave_one_champion() {
    for n in [8usize, 11, 16] {
        for _ in 0..10 {
            let (desk, id) = started_desk(n);
            let desk = Arc::new(desk);
            let seeds = desk
                .participants(id)
                .unwrap()
                .into_iter()
                .map(|p| (p.id, p.seed))
                .collect::<HashMap<ParticipantId, u32>>();
            let seeds = Arc::new(seeds);
            let barrier = Arc::new(Barrier::new(4));

            let handles = (0..4)
                .map(|worker| {
                    let desk = Arc::clone(&desk);
                    let seeds = Arc::clone(&seeds);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        let mut played = 0usize;
                        for _ in 0..100_000 {
                            if desk.tournament(id).unwrap().status == TournamentStatus::Completed {
                                break;
                            }
                            let playable = desk
                                .matches(id)
                                .unwrap()
                                .into_iter()
                                .filter(|m| m.is_playable())
                                .collect::<Vec<_>>();
                            let Some(next) = playable.get(worker % playable.len().max(1)) else {
                                thread::yield_now();
                                continue;
                            };
                            match desk.claim_match(next.id) {
                                Ok(_) => {}
                                Err(BracketError::AlreadyClaimed(_)) => continue,
                                Err(other) => panic!("unexpected claim failure: {other}"),
                            }
                            let a = next.participant1_id().unwrap();
                            let b = next.participant2_id().unwrap();
                            // upsets on odd workers so the champion is not always seed 1
                            let better = if seeds[&a] < seeds[&b] { a } else { b };
                            let worse = if better == a { b } else { a };
                            let winner = if worker % 2 == 0 { better } else { worse };
                            assert!(!desk.complete_match(next.id, winner).unwrap().already_recorded);
                            played += 1;
                        }
                        played
                    })
                })
                .collect::<Vec<_>>();
            let played: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

            assert_eq!(played, n - 1, "n = {n}");
            let tournament = desk.tournament(id).unwrap();
            assert_eq!(tournament.status, TournamentStatus::Completed);
            let champion = tournament.champion_id.unwrap();
            for participant in desk.participants(id).unwrap() {
                let expected = if participant.id == champion {
                    ParticipantStatus::Champion
                } else {
                    ParticipantStatus::Eliminated
                };
                assert_eq!(participant.status, expected, "n = {n}, seed {}", participant.seed);
            }
        }
    }
}
