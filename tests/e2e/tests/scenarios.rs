//! End-to-end scenarios driven entirely through `rekall_core::Core`, the
//! same surface the CLI and agent server use.

use chrono::Utc;
use rekall_core::entry::{Entry, EntryKind, Relation};
use rekall_core::storage::Direction;
use rekall_core::Core;

fn open() -> (tempfile::TempDir, Core) {
    let dir = tempfile::tempdir().unwrap();
    let core = Core::open(dir.path()).unwrap();
    (dir, core)
}

#[test]
fn hybrid_search_ranks_by_fts_with_embeddings_disabled() {
    let (_dir, core) = open();

    let a = Entry::new(
        rekall_core::ids::new_id(),
        EntryKind::Bug,
        "CORS fails on Safari".into(),
        "credentials: include is missing from the fetch call".into(),
        Utc::now(),
    );
    let b = Entry::new(
        rekall_core::ids::new_id(),
        EntryKind::Pattern,
        "Cross-origin handling pattern".into(),
        "standard approach for browser API calls across origins".into(),
        Utc::now(),
    );
    let c = Entry::new(
        rekall_core::ids::new_id(),
        EntryKind::Reference,
        "MDN CORS guide".into(),
        "reference documentation".into(),
        Utc::now(),
    );

    let a_id = core.add_entry(a).unwrap().value;
    let b_id = core.add_entry(b).unwrap().value;
    let c_id = core.add_entry(c).unwrap().value;

    let result = core.search("browser blocking API calls", 10, false).unwrap();
    assert!(!result.degraded);
    let ranked: Vec<&str> = result.value.hits.iter().map(|h| h.entry.id.as_str()).collect();

    assert!(ranked.contains(&a_id.as_str()));
    assert!(ranked.contains(&b_id.as_str()));
    let c_pos = ranked.iter().position(|id| *id == c_id);
    let a_pos = ranked.iter().position(|id| *id == a_id).unwrap();
    let b_pos = ranked.iter().position(|id| *id == b_id).unwrap();
    if let Some(c_pos) = c_pos {
        assert!(a_pos < c_pos && b_pos < c_pos, "C has no lexical overlap with the query and should rank last");
    }
}

#[test]
fn promotion_then_demotion_restores_eligibility() {
    use rekall_core::config::PromotionConfig;
    use rekall_core::entry::{ContentType, StagingEntry};
    use rekall_core::pipeline::{promote_auto, score};
    use rekall_core::storage::Storage;
    use std::collections::BTreeSet;

    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
    let config = PromotionConfig::default();
    let now = Utc::now();

    let mut projects = BTreeSet::new();
    projects.insert("alpha".to_string());
    projects.insert("beta".to_string());
    projects.insert("gamma".to_string());
    let mut staging = StagingEntry {
        id: rekall_core::ids::new_id(),
        url: "https://docs.example.org/guide".into(),
        domain: "docs.example.org".into(),
        title: None,
        description: None,
        content_type: ContentType::Documentation,
        language: None,
        is_accessible: true,
        http_status: Some(200),
        citation_count: 3,
        project_count: 3,
        projects_list: projects,
        first_seen: now,
        last_seen: now,
        promotion_score: 0.0,
        inbox_ids: BTreeSet::new(),
        enriched_at: Some(now),
        promoted_at: None,
        promoted_to: None,
    };
    staging.promotion_score = score(&staging, &config, now);
    storage.put_staging_entry(&staging).unwrap();

    let sources = promote_auto(&storage, &config, now).unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].is_promoted);
    assert_eq!(sources[0].url_pattern, staging.url);

    storage.demote_source(&sources[0].id).unwrap();
    let after_demote = storage.get_staging(&staging.id).unwrap();
    assert!(after_demote.promoted_to.is_none());
    assert!(after_demote.promoted_at.is_none());

    let sources_again = promote_auto(&storage, &config, now).unwrap();
    assert_eq!(sources_again.len(), 1, "demotion should restore eligibility for re-promotion");
}

#[test]
fn cycle_refusal_leaves_earlier_links_intact() {
    let (_dir, core) = open();

    let ids: Vec<String> = ["A", "B", "C"]
        .iter()
        .map(|t| {
            core.add_entry(Entry::new(
                rekall_core::ids::new_id(),
                EntryKind::Decision,
                t.to_string(),
                "body".into(),
                Utc::now(),
            ))
            .unwrap()
            .value
        })
        .collect();
    let (a, b, c) = (&ids[0], &ids[1], &ids[2]);

    core.link(a, b, Relation::Supersedes, None).unwrap();
    core.link(b, c, Relation::Supersedes, None).unwrap();
    let err = core.link(c, a, Relation::Supersedes, None);
    assert!(err.is_err());

    assert_eq!(core.related(a, Direction::Outgoing, Some(Relation::Supersedes)).unwrap(), vec![b.clone()]);
    assert_eq!(core.related(b, Direction::Outgoing, Some(Relation::Supersedes)).unwrap(), vec![c.clone()]);
}

#[test]
fn deleting_an_entry_removes_incident_links() {
    let (_dir, core) = open();
    let a = core
        .add_entry(Entry::new(rekall_core::ids::new_id(), EntryKind::Bug, "a".into(), "body".into(), Utc::now()))
        .unwrap()
        .value;
    let b = core
        .add_entry(Entry::new(rekall_core::ids::new_id(), EntryKind::Bug, "b".into(), "body".into(), Utc::now()))
        .unwrap()
        .value;
    core.link(&a, &b, Relation::Related, None).unwrap();

    core.delete_entry(&a).unwrap();

    assert!(core.related(&b, Direction::Both, None).unwrap().is_empty());
}
