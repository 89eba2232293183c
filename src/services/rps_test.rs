use super::*;

fn seated_pair() -> (RpsGame, Uuid, Uuid) {
    let mut game = RpsGame::default();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    game.join(a).unwrap();
    game.join(b).unwrap();
    (game, a, b)
}

// =============================================================================
// winner
// =============================================================================

#[test]
fn winner_follows_cyclic_rule() {
    assert_eq!(winner(Choice::Rock, Choice::Scissors), 1);
    assert_eq!(winner(Choice::Scissors, Choice::Paper), 1);
    assert_eq!(winner(Choice::Paper, Choice::Rock), 1);
    assert_eq!(winner(Choice::Scissors, Choice::Rock), 2);
    assert_eq!(winner(Choice::Rock, Choice::Rock), 0);
}

#[test]
fn choice_parses_only_exact_tokens() {
    assert_eq!("paper".parse::<Choice>(), Ok(Choice::Paper));
    assert_eq!("Rock".parse::<Choice>(), Err(RpsError::InvalidChoice("Rock".into())));
    assert!("lizard".parse::<Choice>().is_err());
}

// =============================================================================
// join
// =============================================================================

#[test]
fn first_joiner_waits_in_seat_one() {
    let mut game = RpsGame::default();
    let a = Uuid::new_v4();

    let events = game.join(a).unwrap();

    assert_eq!(events, vec![(a, RpsEvent::Waiting { player_number: 1 })]);
    assert_eq!(game.slot_of(a), Some(1));
    assert!(!game.is_active());
}

#[test]
fn second_joiner_starts_game_for_both() {
    let mut game = RpsGame::default();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    game.join(a).unwrap();

    let events = game.join(b).unwrap();

    assert!(game.is_active());
    assert_eq!(events.len(), 2);
    let (to_a, start_a) = &events[0];
    let (to_b, start_b) = &events[1];
    assert_eq!(*to_a, a);
    assert_eq!(*to_b, b);
    let (
        RpsEvent::GameStart { player_number: 1, player_token: tok_a, opponent_token: opp_a },
        RpsEvent::GameStart { player_number: 2, player_token: tok_b, opponent_token: opp_b },
    ) = (start_a, start_b)
    else {
        panic!("expected game_start for both seats, got {events:?}");
    };
    assert_eq!(tok_a, opp_b);
    assert_eq!(tok_b, opp_a);
    assert_ne!(*tok_a, a);
}

#[test]
fn third_joiner_is_rejected() {
    let (mut game, _, _) = seated_pair();
    assert_eq!(game.join(Uuid::new_v4()), Err(RpsError::Full));
}

#[test]
fn rejoin_is_noop() {
    let (mut game, a, _) = seated_pair();
    let before = game.clone();

    assert_eq!(game.join(a), Ok(Vec::new()));
    assert_eq!(game, before);
}

// =============================================================================
// choose
// =============================================================================

#[test]
fn first_choice_notifies_only_opponent() {
    let (mut game, a, b) = seated_pair();

    let events = game.choose(a, "rock").unwrap();

    assert_eq!(events, vec![(b, RpsEvent::OpponentChosen { your_position: 2 })]);
    assert_eq!(game.choice(1), Some(Choice::Rock));
}

#[test]
fn changing_a_choice_does_not_renotify() {
    let (mut game, a, _) = seated_pair();
    game.choose(a, "rock").unwrap();

    assert_eq!(game.choose(a, "paper"), Ok(Vec::new()));
    assert_eq!(game.choice(1), Some(Choice::Paper));
}

#[test]
fn rock_beats_scissors_reveals_player_one() {
    let (mut game, a, b) = seated_pair();
    game.choose(a, "rock").unwrap();

    let events = game.choose(b, "scissors").unwrap();

    let expected = RpsEvent::Reveal {
        player1_choice: Choice::Rock,
        player2_choice: Choice::Scissors,
        winner: 1,
        result: "Player 1 wins!".into(),
    };
    assert_eq!(events, vec![(a, expected.clone()), (b, expected)]);
    assert!(!game.is_active());
}

#[test]
fn same_choice_is_a_tie_regardless_of_order() {
    let (mut game, a, b) = seated_pair();
    game.choose(b, "rock").unwrap();
    let events = game.choose(a, "rock").unwrap();

    let RpsEvent::Reveal { winner, result, .. } = &events[0].1 else {
        panic!("expected reveal, got {events:?}");
    };
    assert_eq!(*winner, 0);
    assert_eq!(result, "It's a tie!");
}

#[test]
fn choice_after_reveal_is_refused() {
    let (mut game, a, b) = seated_pair();
    game.choose(a, "paper").unwrap();
    game.choose(b, "rock").unwrap();

    assert_eq!(game.choose(a, "scissors"), Err(RpsError::NotActive));
    assert_eq!(game.choice(1), Some(Choice::Paper));
}

#[test]
fn choice_checks_seat_then_round_then_token() {
    let mut game = RpsGame::default();
    let a = Uuid::new_v4();
    assert_eq!(game.choose(a, "rock"), Err(RpsError::NotSeated));

    game.join(a).unwrap();
    assert_eq!(game.choose(a, "nope"), Err(RpsError::NotActive));

    game.join(Uuid::new_v4()).unwrap();
    assert_eq!(game.choose(a, "nope"), Err(RpsError::InvalidChoice("nope".into())));
    assert_eq!(game.choice(1), None);
}

// =============================================================================
// reset / release
// =============================================================================

#[test]
fn reset_clears_everything() {
    let (mut game, a, _) = seated_pair();
    game.choose(a, "rock").unwrap();

    game.reset();

    assert_eq!(game, RpsGame::default());
    assert_eq!(game.slot_of(a), None);
}

#[test]
fn release_of_seated_player_resets_game() {
    let (mut game, a, b) = seated_pair();

    assert!(!game.release(Uuid::new_v4()));
    assert!(game.is_active());

    assert!(game.release(b));
    assert_eq!(game.occupant(1), None);
    assert_eq!(game.join(a).unwrap(), vec![(a, RpsEvent::Waiting { player_number: 1 })]);
}

// =============================================================================
// wire shape
// =============================================================================

#[test]
fn events_serialize_with_camel_case_fields() {
    let value = serde_json::to_value(RpsEvent::OpponentChosen { your_position: 2 }).unwrap();
    assert_eq!(value, serde_json::json!({"event": "opponent_chosen", "yourPosition": 2}));

    let value = serde_json::to_value(RpsEvent::Reset {}).unwrap();
    assert_eq!(value, serde_json::json!({"event": "reset"}));

    let value = serde_json::to_value(RpsEvent::error(&RpsError::Full)).unwrap();
    assert_eq!(value["code"], "E_RPS_FULL");
    assert_eq!(value["message"], "RPS game is full");
}

#[test]
fn seats_are_not_persisted() {
    let (mut game, a, _) = seated_pair();
    game.choose(a, "rock").unwrap();

    let value = serde_json::to_value(&game).unwrap();
    assert!(value.get("seats").is_none());

    let restored: RpsGame = serde_json::from_value(value).unwrap();
    assert_eq!(restored.occupant(1), None);
    assert_eq!(restored.choice(1), Some(Choice::Rock));
}
