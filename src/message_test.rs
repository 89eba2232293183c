use super::*;
use crate::services::rps::RpsError;
use crate::services::rooms::RoomError;
use serde_json::json;

// =============================================================================
// parse
// =============================================================================

#[test]
fn parse_board_update() {
    let inbound = Inbound::parse(r#"{"type":"update","data":{"todo":[{"id":"1","text":"a"}]}}"#).unwrap();
    let Inbound::Update { data } = inbound else {
        panic!("expected update");
    };
    assert_eq!(data.todo.unwrap()[0].id, "1");
    assert!(data.done.is_none());
}

#[test]
fn parse_messages_without_payload() {
    assert!(matches!(Inbound::parse(r#"{"type":"get_rooms"}"#), Ok(Inbound::GetRooms)));
    assert!(matches!(Inbound::parse(r#"{"type":"rps_join","extra":1}"#), Ok(Inbound::RpsJoin)));
    assert!(matches!(
        Inbound::parse(r#"{"type":"update"}"#),
        Ok(Inbound::Update { data }) if data.is_empty()
    ));
}

#[test]
fn parse_top_level_fields() {
    let Ok(Inbound::DeleteRoomRequest { room }) = Inbound::parse(r#"{"type":"delete_room_request","room":"x"}"#) else {
        panic!("expected delete_room_request");
    };
    assert_eq!(room.as_deref(), Some("x"));

    let Ok(Inbound::RpsChoice { choice }) = Inbound::parse(r#"{"type":"rps_choice"}"#) else {
        panic!("expected rps_choice");
    };
    assert_eq!(choice, None);
}

#[test]
fn parse_errors_are_classified() {
    assert!(matches!(Inbound::parse("not json"), Err(MessageError::InvalidJson(_))));
    assert!(matches!(Inbound::parse(r#"{"data":{}}"#), Err(MessageError::MissingType)));
    assert!(matches!(Inbound::parse(r#"{"type":5}"#), Err(MessageError::MissingType)));
    assert!(matches!(
        Inbound::parse(r#"{"type":"dance"}"#),
        Err(MessageError::UnknownType(kind)) if kind == "dance"
    ));
    assert!(matches!(
        Inbound::parse(r#"{"type":"timer","data":{"isRunning":"yes"}}"#),
        Err(MessageError::InvalidPayload { kind, .. }) if kind == "timer"
    ));
}

#[test]
fn kind_matches_every_inbound_tag() {
    for tag in INBOUND_TYPES {
        let inbound = Inbound::parse(&json!({"type": tag}).to_string()).unwrap();
        assert_eq!(inbound.kind(), *tag);
    }
}

// =============================================================================
// outbound
// =============================================================================

#[test]
fn full_update_shape() {
    let mut room = RoomState::default();
    room.board.current_task = Some(json!({"id": "3"}));

    let value = serde_json::to_value(Outbound::full_update(&room)).unwrap();

    assert_eq!(value["type"], "full_update");
    let data = &value["data"];
    assert_eq!(data["currentTask"], json!({"id": "3"}));
    assert_eq!(data["board"]["inProgress"], json!([]));
    assert_eq!(data["timer"]["isRunning"], false);
    assert_eq!(data["timer"]["endTime"], json!(null));
    assert_eq!(data["workflow"]["stateIdCounter"], 4);
    assert_eq!(data["workItems"], json!([]));
}

#[test]
fn rps_update_nests_event_under_data() {
    let value = serde_json::to_value(Outbound::rps(crate::services::rps::RpsEvent::Waiting { player_number: 1 })).unwrap();
    assert_eq!(value, json!({"type": "rps_update", "data": {"event": "waiting", "playerNumber": 1}}));
}

#[test]
fn error_envelopes_carry_code() {
    let value = serde_json::to_value(Outbound::error_from(&RoomError::MissingRoom)).unwrap();
    assert_eq!(
        value,
        json!({"type": "error", "message": "No room specified for deletion", "code": "E_ROOM_REQUIRED"})
    );

    let failed = Outbound::room_deletion_failed("default", &RoomError::Protected("default".into()));
    assert_eq!(failed.kind(), "room_deletion_failed");
    let value = serde_json::to_value(failed).unwrap();
    assert_eq!(value["room"], "default");
    assert_eq!(value["code"], "E_PROTECTED_ROOM");

    assert_eq!(Outbound::error_from(&RpsError::Full).kind(), "error");
}
