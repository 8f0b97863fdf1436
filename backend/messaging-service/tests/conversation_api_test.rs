mod common;

use common::{conversation_id, spawn_app};
use uuid::Uuid;

#[tokio::test]
async fn direct_conversation_is_idempotent_per_pair() {
    let app = spawn_app().await;
    let (alice, alice_tok) = app.register_user("alice").await;
    let (bob, bob_tok) = app.register_user("bob").await;

    let first = app.create_direct(&alice_tok, bob).await;
    // Same pair again, same caller.
    let second = app.create_direct(&alice_tok, bob).await;
    // Same pair, opposite direction.
    let third = app.create_direct(&bob_tok, alice).await;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["id"], third["id"]);
    assert_eq!(first["kind"], "direct");
    assert!(first["title"].is_null());
    assert_eq!(first["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn direct_conversation_rejects_wrong_member_count() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;
    let (carol, _) = app.register_user("carol").await;

    for member_ids in [vec![], vec![bob, carol]] {
        let resp = app
            .client
            .post(format!("{}/conversations", app.base_url))
            .bearer_auth(&alice_tok)
            .json(&serde_json::json!({ "kind": "direct", "member_ids": member_ids }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_PARTICIPANTS");
    }
}

#[tokio::test]
async fn non_member_gets_not_a_member_everywhere() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;
    let (_mallory, mallory_tok) = app.register_user("mallory").await;

    let conv = app.create_direct(&alice_tok, bob).await;
    let conv_id = conversation_id(&conv);

    let get = app
        .client
        .get(format!("{}/conversations/{conv_id}", app.base_url))
        .bearer_auth(&mallory_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), 403);
    let body: serde_json::Value = get.json().await.unwrap();
    assert_eq!(body["code"], "NOT_CONVERSATION_MEMBER");

    let send = app
        .client
        .post(format!("{}/conversations/{conv_id}/messages", app.base_url))
        .bearer_auth(&mallory_tok)
        .json(&serde_json::json!({ "body": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(send.status(), 403);

    let unread = app
        .client
        .get(format!("{}/conversations/{conv_id}/unread", app.base_url))
        .bearer_auth(&mallory_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(unread.status(), 403);
}

#[tokio::test]
async fn listing_orders_by_last_activity_and_skips_archived() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;
    let (carol, _) = app.register_user("carol").await;

    let with_bob = conversation_id(&app.create_direct(&alice_tok, bob).await);
    let with_carol = conversation_id(&app.create_direct(&alice_tok, carol).await);
    let group = conversation_id(&app.create_group(&alice_tok, "team", &[bob, carol]).await);

    // Activity order: bob conversation last.
    app.send_text(&alice_tok, group, "g").await;
    app.send_text(&alice_tok, with_carol, "c").await;
    app.send_text(&alice_tok, with_bob, "b").await;

    let list: serde_json::Value = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<Uuid> = list
        .as_array()
        .unwrap()
        .iter()
        .map(conversation_id)
        .collect();
    assert_eq!(ids, vec![with_bob, with_carol, group]);

    // Archive one; it disappears from the listing but members still read it.
    let archive = app
        .client
        .post(format!("{}/conversations/{with_carol}/archive", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(archive.status(), 204);

    let list: serde_json::Value = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<Uuid> = list
        .as_array()
        .unwrap()
        .iter()
        .map(conversation_id)
        .collect();
    assert_eq!(ids, vec![with_bob, group]);

    let get = app
        .client
        .get(format!("{}/conversations/{with_carol}", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap();
    assert!(get.status().is_success());
}

#[tokio::test]
async fn added_member_starts_with_no_backlog_then_counts_new_messages() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;
    let (carol, carol_tok) = app.register_user("carol").await;

    let group = conversation_id(&app.create_group(&alice_tok, "team", &[bob]).await);
    app.send_text(&alice_tok, group, "before carol").await;
    app.send_text(&alice_tok, group, "also before carol").await;

    let resp = app
        .client
        .post(format!("{}/conversations/{group}/members", app.base_url))
        .bearer_auth(&alice_tok)
        .json(&serde_json::json!({ "user_ids": [carol] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["added"].as_array().unwrap().len(), 1);

    // Carol's read position starts at join time, so history that predates
    // her does not count as unread.
    assert_eq!(app.unread_count(&carol_tok, group).await, 0);

    app.send_text(&alice_tok, group, "after carol").await;
    assert_eq!(app.unread_count(&carol_tok, group).await, 1);

    // The conversation shows up in her listing with that count.
    let list: serde_json::Value = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .bearer_auth(&carol_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entry = list
        .as_array()
        .unwrap()
        .iter()
        .find(|c| conversation_id(c) == group)
        .expect("carol sees the group");
    assert_eq!(entry["unread_count"], 1);
}

#[tokio::test]
async fn add_members_skips_existing_and_requires_admin() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, bob_tok) = app.register_user("bob").await;
    let (carol, _) = app.register_user("carol").await;

    let group = conversation_id(&app.create_group(&alice_tok, "team", &[bob]).await);

    // Bob is a plain member; he cannot add.
    let forbidden = app
        .client
        .post(format!("{}/conversations/{group}/members", app.base_url))
        .bearer_auth(&bob_tok)
        .json(&serde_json::json!({ "user_ids": [carol] }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    // Re-adding bob is a silent no-op; carol actually lands.
    let resp = app
        .client
        .post(format!("{}/conversations/{group}/members", app.base_url))
        .bearer_auth(&alice_tok)
        .json(&serde_json::json!({ "user_ids": [bob, carol] }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let added: Vec<&str> = body["added"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(added, vec![carol.to_string().as_str()]);

    let members: serde_json::Value = app
        .client
        .get(format!("{}/conversations/{group}/members", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn remove_member_rules() {
    let app = spawn_app().await;
    let (_alice, alice_tok) = app.register_user("alice").await;
    let (bob, bob_tok) = app.register_user("bob").await;
    let (carol, carol_tok) = app.register_user("carol").await;

    let group = conversation_id(&app.create_group(&alice_tok, "team", &[bob, carol]).await);

    // A plain member cannot remove someone else.
    let forbidden = app
        .client
        .delete(format!(
            "{}/conversations/{group}/members/{carol}",
            app.base_url
        ))
        .bearer_auth(&bob_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    // Self-leave is always allowed.
    let leave = app
        .client
        .delete(format!(
            "{}/conversations/{group}/members/{bob}",
            app.base_url
        ))
        .bearer_auth(&bob_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(leave.status(), 204);

    // Membership (and with it, read state) is gone.
    let unread = app
        .client
        .get(format!("{}/conversations/{group}/unread", app.base_url))
        .bearer_auth(&bob_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(unread.status(), 403);

    // Admin removes carol.
    let removed = app
        .client
        .delete(format!(
            "{}/conversations/{group}/members/{carol}",
            app.base_url
        ))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);

    let listing: serde_json::Value = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .bearer_auth(&carol_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listing.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn direct_membership_is_immutable() {
    let app = spawn_app().await;
    let (alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;
    let (carol, _) = app.register_user("carol").await;

    let conv = conversation_id(&app.create_direct(&alice_tok, bob).await);

    let add = app
        .client
        .post(format!("{}/conversations/{conv}/members", app.base_url))
        .bearer_auth(&alice_tok)
        .json(&serde_json::json!({ "user_ids": [carol] }))
        .send()
        .await
        .unwrap();
    assert_eq!(add.status(), 400);

    let remove = app
        .client
        .delete(format!(
            "{}/conversations/{conv}/members/{alice}",
            app.base_url
        ))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap();
    assert_eq!(remove.status(), 400);
}

#[tokio::test]
async fn mute_flag_round_trips() {
    let app = spawn_app().await;
    let (alice, alice_tok) = app.register_user("alice").await;
    let (bob, _) = app.register_user("bob").await;

    let conv = conversation_id(&app.create_direct(&alice_tok, bob).await);

    let mute = app
        .client
        .put(format!("{}/conversations/{conv}/mute", app.base_url))
        .bearer_auth(&alice_tok)
        .json(&serde_json::json!({ "muted": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(mute.status(), 204);

    let members: serde_json::Value = app
        .client
        .get(format!("{}/conversations/{conv}/members", app.base_url))
        .bearer_auth(&alice_tok)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let me = members
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["user_id"] == alice.to_string())
        .unwrap();
    assert_eq!(me["is_muted"], true);
}

#[tokio::test]
async fn requests_without_a_principal_are_unauthorized() {
    let app = spawn_app().await;

    let resp = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = app
        .client
        .get(format!("{}/conversations", app.base_url))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
