/// HTTP surface tests over the in-memory store.
/// Each test wires the full route table behind the bearer middleware.
#[macro_use]
mod common;

use actix_web::{http::StatusCode, test};
use common::{bearer, harness, harness_with};
use marketplace_chat_service::models::{Message, MessageType};
use marketplace_chat_service::store::ChatStore;
use serde_json::{json, Value};
use uuid::Uuid;

macro_rules! create_conversation {
    ($app:expr, $requester:expr, $participants:expr) => {{
        let req = test::TestRequest::post()
            .uri("/conversations")
            .insert_header(bearer($requester))
            .set_json(json!({ "participants": $participants }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

macro_rules! send_text {
    ($app:expr, $sender:expr, $conversation_id:expr, $content:expr) => {{
        let req = test::TestRequest::post()
            .uri("/messages")
            .insert_header(bearer($sender))
            .set_json(json!({
                "conversationId": $conversation_id,
                "senderId": $sender,
                "content": $content,
            }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

fn id_of(body: &Value) -> String {
    body["id"].as_str().expect("response has an id").to_string()
}

#[actix_web::test]
async fn health_needs_no_token() {
    let h = harness();
    let app = chat_app!(h.state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn guarded_routes_reject_missing_token() {
    let h = harness();
    let app = chat_app!(h.state);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/user/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn guarded_routes_fail_closed_without_verification_key() {
    let h = harness_with(None);
    let app = chat_app!(h.state);
    let user = Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/user/{user}"))
        .insert_header(bearer(user))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "SERVER_CONFIG_ERROR");
}

#[actix_web::test]
async fn create_conversation_is_idempotent_per_participant_set() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, first) = create_conversation!(app, a, [a, b]);
    assert_eq!(status, StatusCode::CREATED);

    // Same set, other order, other requester.
    let (status, second) = create_conversation!(app, b, [b, a]);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&first), id_of(&second));
    assert_eq!(first["unreadCount"][a.to_string()], 0);
    assert_eq!(first["unreadCount"][b.to_string()], 0);
}

#[actix_web::test]
async fn shrunken_conversation_takes_over_set_once_original_is_gone() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (_, pair) = create_conversation!(app, a, [a, b]);
    let (_, trio) = create_conversation!(app, a, [a, b, c]);

    for (user, conversation) in [(c, &trio), (a, &pair), (b, &pair)] {
        let req = test::TestRequest::delete()
            .uri(&format!("/conversations/{}", id_of(conversation)))
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let (status, found) = create_conversation!(app, a, [a, b]);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&found), id_of(&trio));
}

#[actix_web::test]
async fn create_conversation_requires_requester_and_two_members() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (status, body) = create_conversation!(app, a, [b, c]);
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = create_conversation!(app, a, [a, a]);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn sent_message_is_readable_and_counts_as_unread() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);

    let (status, sent) = send_text!(app, a, conversation_id, "hello");
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["content"], "hello");
    assert_eq!(sent["readBy"], json!([a]));

    // Stored form is an envelope, never the plaintext.
    let message_id: Uuid = id_of(&sent).parse().unwrap();
    let stored = h.store.get_message(message_id).await.unwrap().unwrap();
    assert_ne!(stored.content, "hello");
    assert!(crypto_core::EnvelopeCipher::looks_like_envelope(&stored.content));

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{message_id}"))
        .insert_header(bearer(b))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: Value = test::read_body_json(resp).await;
    assert_eq!(fetched["content"], "hello");

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{conversation_id}"))
        .insert_header(bearer(b))
        .to_request();
    let conv: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(conv["unreadCount"][b.to_string()], 1);
    assert_eq!(conv["unreadCount"][a.to_string()], 0);
    assert_eq!(conv["lastMessage"], "hello");
}

#[actix_web::test]
async fn reading_a_conversation_resets_unread_and_marks_messages() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);
    let (_, sent) = send_text!(app, a, conversation_id, "hello");
    let message_id = id_of(&sent);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/read"))
        .insert_header(bearer(b))
        .set_json(json!({ "userId": b }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let conv: Value = test::read_body_json(resp).await;
    assert_eq!(conv["unreadCount"][b.to_string()], 0);

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{message_id}"))
        .insert_header(bearer(b))
        .to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched["readBy"], json!([a, b]));

    // Marking again does not duplicate the reader.
    let req = test::TestRequest::post()
        .uri(&format!("/messages/{message_id}/read"))
        .insert_header(bearer(b))
        .set_json(json!({ "userId": b }))
        .to_request();
    let again: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(again["readBy"], json!([a, b]));
}

#[actix_web::test]
async fn mark_read_on_behalf_of_someone_else_is_forbidden() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/read"))
        .insert_header(bearer(a))
        .set_json(json!({ "userId": b }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn empty_message_is_rejected_and_not_stored() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);

    let (status, body) = send_text!(app, a, conversation_id, "   ");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(h.store.message_count().await, 0);

    let req = test::TestRequest::get()
        .uri(&format!("/messages/conversation/{conversation_id}"))
        .insert_header(bearer(a))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["items"], json!([]));
    assert_eq!(page["pagination"]["total"], 0);
}

#[actix_web::test]
async fn sending_as_someone_else_is_forbidden() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let req = test::TestRequest::post()
        .uri("/messages")
        .insert_header(bearer(a))
        .set_json(json!({
            "conversationId": id_of(&conversation),
            "senderId": b,
            "content": "spoofed",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.store.message_count().await, 0);
}

#[actix_web::test]
async fn outsiders_cannot_see_conversations_or_messages() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);
    let (_, sent) = send_text!(app, a, conversation_id, "private");

    for uri in [
        format!("/conversations/{conversation_id}"),
        format!("/messages/conversation/{conversation_id}"),
        format!("/messages/{}", id_of(&sent)),
        format!("/conversations/user/{a}"),
    ] {
        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(bearer(c))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
    }
}

#[actix_web::test]
async fn unknown_ids_are_not_found_and_bad_ids_are_validation_errors() {
    let h = harness();
    let app = chat_app!(h.state);
    let a = Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{}", Uuid::new_v4()))
        .insert_header(bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{}", Uuid::new_v4()))
        .insert_header(bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri("/conversations/not-a-uuid")
        .insert_header(bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn corrupt_message_fails_alone_but_not_the_page() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id: Uuid = id_of(&conversation).parse().unwrap();
    send_text!(app, a, conversation_id, "fine");

    let corrupt = Message::new(
        conversation_id,
        b,
        "a:b:c:d".to_string(),
        MessageType::Text,
        vec![],
    );
    let corrupt = h.store.insert_message_and_touch(corrupt, "?").await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{}", corrupt.id))
        .insert_header(bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "DECRYPTION_ERROR");
    assert_eq!(body["message"], "Message could not be decrypted");

    let req = test::TestRequest::get()
        .uri(&format!("/messages/conversation/{conversation_id}"))
        .insert_header(bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page["items"][0]["content"], "fine");
    assert_eq!(page["items"][1]["content"], "a:b:c:d");
}

#[actix_web::test]
async fn message_pages_are_oldest_first() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);
    for text in ["one", "two", "three"] {
        let (status, _) = send_text!(app, a, conversation_id, text);
        assert_eq!(status, StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/messages/conversation/{conversation_id}?page=2&limit=2"))
        .insert_header(bearer(b))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(page["items"][0]["content"], "three");
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["totalPages"], 2);
}

#[actix_web::test]
async fn only_the_sender_may_delete_a_message() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let (_, sent) = send_text!(app, a, id_of(&conversation), "oops");
    let message_id = id_of(&sent);

    let req = test::TestRequest::delete()
        .uri(&format!("/messages/{message_id}"))
        .insert_header(bearer(b))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&format!("/messages/{message_id}"))
        .insert_header(bearer(a))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "deleted");
    assert_eq!(h.store.message_count().await, 0);
}

#[actix_web::test]
async fn last_participant_out_deletes_the_conversation() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let conversation_id = id_of(&conversation);
    send_text!(app, a, conversation_id, "bye");

    let req = test::TestRequest::delete()
        .uri(&format!("/conversations/{conversation_id}"))
        .insert_header(bearer(a))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "left");

    let req = test::TestRequest::delete()
        .uri(&format!("/conversations/{conversation_id}"))
        .insert_header(bearer(b))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "deleted");
    assert_eq!(h.store.message_count().await, 0);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{conversation_id}"))
        .insert_header(bearer(b))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn rest_send_notifies_offline_participants() {
    let h = harness();
    let app = chat_app!(h.state);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (_, conversation) = create_conversation!(app, a, [a, b]);
    let (_, sent) = send_text!(app, a, id_of(&conversation), "are you there?");

    let seen = h.notifier.wait_for(1).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].user_id, b);
    assert_eq!(seen[0].sender_id, a);
    assert_eq!(seen[0].message_id.to_string(), id_of(&sent));
    assert_eq!(seen[0].preview, "are you there?");
}
