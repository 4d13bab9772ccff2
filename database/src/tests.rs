use crate::{Database, TargetAnalysis, ThreadRecord};
use aggregator::{BucketAccumulator, StanceRow, WeightPolicy};
use chrono::{NaiveDate, TimeZone, Utc};
use stance_core::{
    Comment, DetectionSource, ListingSort, MatchKind, Mention, PullCounters, PullRun, PullStatus,
    Stance, StanceLabel, Submission, TargetRef, TimeWindow,
};
use std::env;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_ticker_stance_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    Database::open(&db_url)
        .await
        .expect("Failed to open test database")
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
}

fn pull_run(source: &str) -> PullRun {
    PullRun {
        id: None,
        source: source.to_string(),
        pulled_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
        day_bucket: day(),
        sort: ListingSort::Hot,
        window: TimeWindow::Day,
        limit: 25,
        status: PullStatus::Running,
        note: None,
        counters: PullCounters::default(),
    }
}

fn submission(id: &str, score: i64) -> Submission {
    Submission {
        id: id.to_string(),
        source: "stocks".to_string(),
        created_utc: Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
        title: format!("Thoughts on $AAPL ({})", id),
        selftext: "Earnings next week".to_string(),
        score,
        num_comments: 2,
        permalink: format!("/r/stocks/comments/{}/", id),
        url: None,
    }
}

fn comment(id: &str, submission_id: &str, parent: Option<&str>, depth: u32, score: i64) -> Comment {
    Comment {
        id: id.to_string(),
        submission_id: submission_id.to_string(),
        parent_id: parent.map(str::to_string),
        depth,
        author: Some("someone".to_string()),
        body: format!("comment {}", id),
        score,
        permalink: Some(format!("/r/stocks/comments/{}/_/{}/", submission_id, id)),
        created_utc: None,
    }
}

fn analysis(target: TargetRef, ticker: &str, label: StanceLabel, score: f64) -> TargetAnalysis {
    TargetAnalysis {
        target,
        mentions: vec![Mention {
            ticker: ticker.to_string(),
            confidence: 0.85,
            detection: DetectionSource::Direct,
            match_kind: MatchKind::Cashtag,
            span: Some((0, ticker.len() + 1)),
        }],
        stances: vec![Stance {
            ticker: ticker.to_string(),
            label,
            stance_score: score,
            confidence: 0.7,
            classifier_version: "deterministic-v1".to_string(),
            context_text: format!("TEXT: ${}", ticker),
        }],
    }
}

#[tokio::test]
async fn test_pull_run_lifecycle() {
    let db = setup_test_db().await;

    let id = db.insert_pull_run(&pull_run("stocks")).await.unwrap();
    let counters = PullCounters {
        submissions: 3,
        comments: 10,
        mentions: 4,
        stance_rows: 4,
    };
    db.finish_pull_run(id, PullStatus::Success, Some("partial errors: 1"), &counters)
        .await
        .unwrap();

    let runs = db.pull_runs(Some(day()), Some("stocks")).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, Some(id));
    assert_eq!(runs[0].status, PullStatus::Success);
    assert_eq!(runs[0].note.as_deref(), Some("partial errors: 1"));
    assert_eq!(runs[0].counters, counters);
    assert_eq!(runs[0].sort, ListingSort::Hot);

    assert!(db.pull_runs(None, Some("investing")).await.unwrap().is_empty());
    assert!(db
        .finish_pull_run(id + 100, PullStatus::Failed, None, &counters)
        .await
        .is_err());
}

#[tokio::test]
async fn test_save_thread_round_trips_in_tree_order() {
    let db = setup_test_db().await;
    let run_id = db.insert_pull_run(&pull_run("stocks")).await.unwrap();

    let post = submission("abc", 120);
    let comments = vec![
        comment("c1", "abc", None, 0, 5),
        comment("c2", "abc", Some("c1"), 1, 3),
        comment("c3", "abc", None, 0, 1),
    ];
    let analyses = vec![
        analysis(TargetRef::submission("abc"), "AAPL", StanceLabel::Bullish, 0.6),
        analysis(TargetRef::comment("c2"), "AAPL", StanceLabel::Bearish, -0.4),
    ];

    let summary = db
        .save_thread(&ThreadRecord {
            pull_run_id: run_id,
            submission: &post,
            comments: &comments,
            incomplete: true,
            failed_batches: 1,
            analyses: &analyses,
        })
        .await
        .unwrap();
    assert_eq!(summary.comments, 3);
    assert_eq!(summary.mentions, 2);
    assert_eq!(summary.stance_rows, 2);

    let stored = db.thread("abc").await.unwrap().unwrap();
    assert_eq!(stored.submission, post);
    assert!(stored.incomplete);
    assert_eq!(stored.failed_batches, 1);
    let ids: Vec<&str> = stored.comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert_eq!(stored.comments[1].depth, 1);
    assert_eq!(stored.mentions.len(), 2);
    assert_eq!(stored.stances.len(), 2);
    assert_eq!(stored.stances[0].target, TargetRef::submission("abc"));
    assert_eq!(stored.mentions[0].mention.span, Some((0, 5)));
    assert_eq!(stored.mentions[0].mention.detection, DetectionSource::Direct);
    assert_eq!(stored.mentions[0].mention.match_kind, MatchKind::Cashtag);

    assert!(db.thread("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_repull_replaces_analysis_and_drops_stale_comments() {
    let db = setup_test_db().await;
    let first_run = db.insert_pull_run(&pull_run("stocks")).await.unwrap();
    let post = submission("abc", 120);

    let first_comments = vec![
        comment("c1", "abc", None, 0, 5),
        comment("c2", "abc", None, 0, 2),
    ];
    let first_analyses = vec![
        analysis(TargetRef::submission("abc"), "AAPL", StanceLabel::Bullish, 0.6),
        analysis(TargetRef::comment("c2"), "TSLA", StanceLabel::Bearish, -0.5),
    ];
    db.save_thread(&ThreadRecord {
        pull_run_id: first_run,
        submission: &post,
        comments: &first_comments,
        incomplete: false,
        failed_batches: 0,
        analyses: &first_analyses,
    })
    .await
    .unwrap();

    let second_run = db.insert_pull_run(&pull_run("stocks")).await.unwrap();
    let second_comments = vec![comment("c1", "abc", None, 0, 9)];
    let second_analyses = vec![analysis(
        TargetRef::submission("abc"),
        "AAPL",
        StanceLabel::Neutral,
        0.0,
    )];
    let summary = db
        .save_thread(&ThreadRecord {
            pull_run_id: second_run,
            submission: &post,
            comments: &second_comments,
            incomplete: false,
            failed_batches: 0,
            analyses: &second_analyses,
        })
        .await
        .unwrap();
    assert_eq!(summary.stale_comments_removed, 1);

    let stored = db.thread("abc").await.unwrap().unwrap();
    assert_eq!(stored.pull_run_id, second_run);
    assert_eq!(stored.comments.len(), 1);
    assert_eq!(stored.comments[0].score, 9);
    assert_eq!(stored.stances.len(), 1);
    assert_eq!(stored.stances[0].stance.label, StanceLabel::Neutral);

    let (mentions, stances) = db
        .count_for_target(&TargetRef::comment("c2"))
        .await
        .unwrap();
    assert_eq!((mentions, stances), (0, 0));
    assert_eq!(db.comment_ids("abc").await.unwrap(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn test_bucket_rows_exclude_current_run() {
    let db = setup_test_db().await;
    let old_run = db.insert_pull_run(&pull_run("stocks")).await.unwrap();
    let new_run = db.insert_pull_run(&pull_run("stocks")).await.unwrap();

    let untouched = submission("old", 40);
    let untouched_comments = vec![comment("k1", "old", None, 0, 7)];
    let untouched_analyses = vec![
        analysis(TargetRef::submission("old"), "AAPL", StanceLabel::Bearish, -0.5),
        analysis(TargetRef::comment("k1"), "NVDA", StanceLabel::Bullish, 0.8),
    ];
    db.save_thread(&ThreadRecord {
        pull_run_id: old_run,
        submission: &untouched,
        comments: &untouched_comments,
        incomplete: false,
        failed_batches: 0,
        analyses: &untouched_analyses,
    })
    .await
    .unwrap();

    let fresh = submission("new", 10);
    let fresh_analyses = vec![analysis(
        TargetRef::submission("new"),
        "AAPL",
        StanceLabel::Bullish,
        0.5,
    )];
    db.save_thread(&ThreadRecord {
        pull_run_id: new_run,
        submission: &fresh,
        comments: &[],
        incomplete: false,
        failed_batches: 0,
        analyses: &fresh_analyses,
    })
    .await
    .unwrap();

    let mut rows = db
        .bucket_stance_rows(day(), "stocks", Some(new_run))
        .await
        .unwrap();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "AAPL");
    assert_eq!(rows[0].1.upvotes, 40);
    assert_eq!(rows[0].1.depth, 0);
    assert_eq!(rows[1].0, "NVDA");
    assert_eq!(rows[1].1.upvotes, 7);

    let all = db.bucket_stance_rows(day(), "stocks", None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(db
        .bucket_stance_rows(day(), "investing", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_daily_scores_replace_bucket() {
    let db = setup_test_db().await;

    let mut acc = BucketAccumulator::new(day(), "stocks", WeightPolicy::default());
    for (ticker, label, score) in [
        ("AAPL", StanceLabel::Bullish, 0.6),
        ("AAPL", StanceLabel::Bearish, -0.2),
        ("TSLA", StanceLabel::Unclear, 0.0),
    ] {
        acc.fold(
            ticker,
            &StanceRow {
                label,
                score,
                confidence: 0.7,
                upvotes: 4,
                depth: 0,
            },
        )
        .unwrap();
    }
    let scores = acc.into_scores();
    db.replace_daily_scores(day(), "stocks", &scores).await.unwrap();

    let stored = db.daily_scores(day(), day(), None, None).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].ticker, "AAPL");
    assert_eq!(stored[0].stats, scores[0].stats);
    assert!((stored[0].derived.score_unweighted - 0.2).abs() < 1e-9);

    db.replace_daily_scores(day(), "stocks", &scores[..1]).await.unwrap();
    let stored = db
        .daily_scores(day(), day(), Some("stocks"), None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    let only_tsla = db
        .daily_scores(day(), day(), None, Some("TSLA"))
        .await
        .unwrap();
    assert!(only_tsla.is_empty());
}

#[tokio::test]
async fn test_legacy_daily_rows_are_coalesced() {
    let db = setup_test_db().await;

    sqlx::query(
        "INSERT INTO daily_scores (
            day_bucket, source, ticker, mention_count, bullish_count, bearish_count,
            neutral_count, unclear_count, score_unweighted, score_weighted,
            stddev, ci95_low, ci95_high, unclear_rate
         ) VALUES (?, 'stocks', 'GME', 5, 3, 1, 0, 1, 0.25, 0.3, 0, 0, 0, 0.2)",
    )
    .bind(day())
    .execute(db.pool())
    .await
    .unwrap();

    let stored = db.daily_scores(day(), day(), None, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].stats.stats_exact);
    assert_eq!(stored[0].stats.valid_count, 4);
    assert!((stored[0].derived.score_unweighted - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_example_mentions_ranked_by_upvotes() {
    let db = setup_test_db().await;
    let run_id = db.insert_pull_run(&pull_run("stocks")).await.unwrap();

    let post = submission("abc", 50);
    let comments = vec![
        comment("c1", "abc", None, 0, 300),
        comment("c2", "abc", None, 0, 2),
    ];
    let analyses = vec![
        analysis(TargetRef::submission("abc"), "AAPL", StanceLabel::Bullish, 0.6),
        analysis(TargetRef::comment("c1"), "AAPL", StanceLabel::Bullish, 0.9),
        analysis(TargetRef::comment("c2"), "AAPL", StanceLabel::Bearish, -0.7),
    ];
    db.save_thread(&ThreadRecord {
        pull_run_id: run_id,
        submission: &post,
        comments: &comments,
        incomplete: false,
        failed_batches: 0,
        analyses: &analyses,
    })
    .await
    .unwrap();

    let bullish = db
        .example_mentions("AAPL", StanceLabel::Bullish, day(), day(), None, 5)
        .await
        .unwrap();
    assert_eq!(bullish.len(), 2);
    assert_eq!(bullish[0].target, TargetRef::comment("c1"));
    assert_eq!(bullish[0].upvotes, 300);
    assert_eq!(bullish[0].submission_id, "abc");
    assert_eq!(bullish[1].target, TargetRef::submission("abc"));
    assert!(bullish[1].text.starts_with("Thoughts on $AAPL"));

    let bearish = db
        .example_mentions("AAPL", StanceLabel::Bearish, day(), day(), Some("stocks"), 5)
        .await
        .unwrap();
    assert_eq!(bearish.len(), 1);
    assert_eq!(bearish[0].text, "comment c2");

    let limited = db
        .example_mentions("AAPL", StanceLabel::Bullish, day(), day(), None, 1)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}
