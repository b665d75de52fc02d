use std::sync::Arc;

use super::*;

fn manager(dir: &tempfile::TempDir) -> SessionManager {
    let store = JsonlConversationStore::load(dir.path().join(DEFAULT_CONVERSATIONS_FILE))
        .expect("store");
    SessionManager::new(Arc::new(store))
}

#[test]
fn token_estimate_rounds_up_quarters() {
    assert_eq!(estimate_text_tokens(""), 0);
    assert_eq!(estimate_text_tokens("a"), 1);
    assert_eq!(estimate_text_tokens("abcd"), 1);
    assert_eq!(estimate_text_tokens("abcde"), 2);
}

#[test]
fn get_or_create_persists_a_fresh_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    let session = manager.get_or_create("conv-1").expect("session");
    assert_eq!(session.conversation_id, "conv-1");
    assert_eq!(session.context_tokens, 0);
    assert_eq!(manager.store().session_count().expect("count"), 1);
}

#[test]
fn persisted_session_id_wins_over_caller_override() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    manager.get_or_create("conv-1").expect("session");
    manager.store_session_id("conv-1", "sess-a").expect("store id");

    let session = manager.get_or_create("conv-1").expect("session");
    let continuity = manager.continuity(&session, Some("sess-b"));
    assert_eq!(
        continuity,
        SessionContinuity::Resume {
            session_id: "sess-a".to_string()
        }
    );
}

#[test]
fn session_id_is_set_at_most_once_per_epoch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    manager.store_session_id("conv-1", "sess-a").expect("first");
    manager.store_session_id("conv-1", "sess-b").expect("second is a no-op");
    let session = manager.get_or_create("conv-1").expect("session");
    assert_eq!(session.agent_session_id.as_deref(), Some("sess-a"));
}

#[test]
fn continuity_modes_cover_new_resume_continue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    let fresh = manager.get_or_create("conv-1").expect("session");
    assert_eq!(manager.continuity(&fresh, None), SessionContinuity::New);
    assert_eq!(
        manager.continuity(&fresh, Some("sess-x")),
        SessionContinuity::Resume {
            session_id: "sess-x".to_string()
        }
    );

    manager.record_token_usage("conv-1", 50);
    let mid_epoch = manager.get_or_create("conv-1").expect("session");
    assert_eq!(manager.continuity(&mid_epoch, None), SessionContinuity::Continue);
}

#[test]
fn compaction_threshold_and_age_trigger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    let mut session = manager.get_or_create("conv-1").expect("session");
    assert!(!manager.should_compact(&session, 0));

    session.context_tokens = COMPACT_THRESHOLD_TOKENS + 1;
    assert!(manager.should_compact(&session, 0));

    session.context_tokens = 10;
    session.last_compacted_unix_ms = Some(0);
    assert!(!manager.should_compact(&session, COMPACT_MAX_AGE_MS));
    assert!(manager.should_compact(&session, COMPACT_MAX_AGE_MS + 1));
}

#[test]
fn second_turn_of_a_fresh_conversation_does_not_compact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    manager.store_session_id("conv-1", "sess-a").expect("id");
    manager.record_token_usage("conv-1", 19);

    // First-turn state: tokens and an id, never compacted.
    let session = manager.get_or_create("conv-1").expect("session");
    assert_eq!(session.last_compacted_unix_ms, None);
    assert!(!manager.should_compact(&session, session.created_unix_ms + 60_000));

    // Age still applies, measured from creation.
    assert!(manager.should_compact(
        &session,
        session.created_unix_ms + COMPACT_MAX_AGE_MS + 1
    ));
}

#[test]
fn compaction_resets_epoch_and_applies_retention_estimate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    manager.store_session_id("conv-1", "sess-a").expect("id");
    manager.record_token_usage("conv-1", 100_000);

    let session = manager.get_or_create("conv-1").expect("session");
    let request = manager.prepare_compaction(&session).expect("request");
    assert_eq!(request.session_id, "sess-a");
    assert!(request.instruction.contains("Summarize"));

    manager.complete_compaction("conv-1", 5_000).expect("compact");
    let after = manager.get_or_create("conv-1").expect("session");
    assert_eq!(after.context_tokens, 30_000);
    assert_eq!(after.last_compacted_unix_ms, Some(5_000));
    assert_eq!(after.agent_session_id, None);

    // New epoch accepts a fresh continuity token.
    manager.store_session_id("conv-1", "sess-b").expect("new epoch id");
    let next = manager.get_or_create("conv-1").expect("session");
    assert_eq!(next.agent_session_id.as_deref(), Some("sess-b"));
}

#[test]
fn grants_survive_reload_and_are_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(DEFAULT_CONVERSATIONS_FILE);
    {
        let store = JsonlConversationStore::load(&path).expect("store");
        let manager = SessionManager::new(Arc::new(store));
        manager.grant_tool("conv-1", "Write").expect("grant");
        manager.grant_tool("conv-1", "Write").expect("duplicate grant");
        assert!(manager.has_grant("conv-1", "Write").expect("check"));
        assert!(!manager.has_grant("conv-1", "Bash").expect("check"));
    }
    let store = JsonlConversationStore::load(&path).expect("reload");
    let manager = SessionManager::new(Arc::new(store));
    assert!(manager.has_grant("conv-1", "Write").expect("check"));
    assert_eq!(
        manager.store().list_grants("conv-1").expect("grants").len(),
        1
    );
}

#[test]
fn reset_drops_session_and_grants() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(&dir);
    manager.store_session_id("conv-1", "sess-a").expect("id");
    manager.grant_tool("conv-1", "Write").expect("grant");

    assert!(manager.reset_conversation("conv-1").expect("reset"));
    assert_eq!(manager.store().session_count().expect("count"), 0);
    assert!(manager.store().list_grants("conv-1").expect("grants").is_empty());
    assert!(!manager.reset_conversation("conv-1").expect("second reset"));
}
