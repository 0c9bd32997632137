//! Job control: challenge suspension, resolution, cancellation and resume.

mod common;

use common::{harness, lead, source_id, test_config, Harness, RobotsServer, ScriptedSource};
use leadscout_core::{Query, Region, TileId, UnitKey};
use leadscout_db::{scan_jobs, Database, ScanJobStatus};
use leadscout_scanner::{FailureReason, JobCheckpoint, JobManager, JobState, ScanError};
use leadscout_sources::Cursor;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Four tiles per source. `maps@r0c2` has two pages; the second one is
/// behind a challenge when `challenged` is set.
fn tiled_sources(challenged: bool) -> (Arc<ScriptedSource>, Arc<ScriptedSource>) {
    let mut maps = ScriptedSource::new("maps")
        .page("r0c0", vec![lead("maps", "Espresso Lab", "12 Main Boulevard")])
        .page("r0c1", vec![lead("maps", "Cuppa", "5 MM Alam Road")])
        .page(
            "r0c2",
            vec![
                lead("maps", "Gloria Jeans", "88 Mall Road"),
                lead("maps", "Tim Hortons", "1 Packages Mall"),
            ],
        )
        .page(
            "r0c2",
            vec![
                lead("maps", "Butlers Chocolate Cafe", "14 Y Block DHA"),
                lead("maps", "Chaye Khana", "3 Hali Road"),
            ],
        )
        .page("r0c3", vec![lead("maps", "Second Cup", "9 Zahoor Elahi Road")]);
    if challenged {
        maps = maps.challenge_on("r0c2", 1);
    }
    let yelp = ScriptedSource::new("yelp")
        .page("r0c0", vec![lead("yelp", "Coffee Planet", "21 Jail Road")])
        .page("r0c1", vec![lead("yelp", "Mocca Coffee", "40 Sector C Bahria Town")])
        .page("r0c2", vec![lead("yelp", "Jade Cafe", "7 Canal Bank")])
        .page("r0c3", vec![lead("yelp", "Hot Spot", "2 Fortress Stadium")]);
    (Arc::new(maps), Arc::new(yelp))
}

fn tiled_query() -> Query {
    Query::new("coffee shop", "Lahore", "Pakistan", 100)
        .with_source(source_id("maps"))
        .with_source(source_id("yelp"))
        .with_region(Region::new(0.0, 0.0, 0.1, 0.4))
}

fn challenged_unit() -> UnitKey {
    UnitKey::new(source_id("maps"), TileId::grid(0, 2))
}

fn setup(challenged: bool) -> (Harness, Arc<ScriptedSource>, Arc<ScriptedSource>) {
    let (maps, yelp) = tiled_sources(challenged);
    let h = harness(
        &[Arc::clone(&maps), Arc::clone(&yelp)],
        RobotsServer::new(),
        test_config(),
    );
    (h, maps, yelp)
}

/// Wait until every other unit is done and one challenge is pending.
async fn wait_until_suspended(jobs: &JobManager, job_id: &str, processed: usize) {
    let control = jobs.control(job_id).expect("job control");
    let mut progress = control.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let settled = progress.borrow_and_update().units_processed == processed;
            if settled && !control.pending_challenges().is_empty() {
                return;
            }
            progress.changed().await.expect("job still running");
        }
    })
    .await
    .expect("job suspends on the challenge");
}

#[tokio::test]
async fn test_challenge_suspends_unit_until_resolved() {
    let (h, maps, _yelp) = setup(true);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    wait_until_suspended(&jobs, &job_id, 7).await;

    let status = jobs.status(&job_id).expect("status");
    assert_eq!(status.state, JobState::Suspended);
    assert_eq!(status.pending_challenges.len(), 1);
    assert_eq!(status.pending_challenges[0].unit, challenged_unit());
    assert_eq!(status.progress.leads_found, 9);

    // The suspension is durable before anyone resolves it.
    let checkpoint = JobCheckpoint::load(h.checkpoints.as_ref(), &job_id)
        .await
        .expect("load checkpoint")
        .expect("checkpoint saved");
    assert!(checkpoint.suspended_units.contains(&challenged_unit()));
    assert_eq!(checkpoint.cursors.get(&challenged_unit()), Some(&Cursor::position(1)));
    assert_eq!(checkpoint.yielded.get(&challenged_unit()), Some(&2));

    maps.clear_challenges();
    assert_eq!(jobs.resolve_challenge(&job_id).expect("resolve"), 1);

    let result = jobs.wait(&job_id).await.expect("job result");
    assert_eq!(result.total_found, 11);
    assert_eq!(result.inserted, 11);
    assert_eq!(result.units_completed, 8);
    assert!(result.failed_units.is_empty());
    assert!(!result.cancelled);
    // Three single-page tiles, then r0c2 page 0, the challenged page and its retry.
    assert_eq!(maps.fetches(), 6);

    let status = jobs.status(&job_id).expect("status");
    assert_eq!(status.state, JobState::Completed);
    assert!(status.pending_challenges.is_empty());
}

#[tokio::test]
async fn test_resume_after_cancel_never_duplicates_leads() {
    let (h, maps, yelp) = setup(true);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    wait_until_suspended(&jobs, &job_id, 7).await;

    jobs.cancel(&job_id).expect("cancel");
    let cancelled = jobs.wait(&job_id).await.expect("job result");
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.inserted, 9);
    assert_eq!(jobs.status(&job_id).expect("status").state, JobState::Cancelled);
    assert_eq!(h.store.leads().len(), 9);

    let maps_before = maps.fetches();
    let yelp_before = yelp.fetches();
    maps.clear_challenges();

    let resumed_id = jobs.resume(&job_id).await.expect("resume job");
    assert_eq!(resumed_id, job_id);
    let result = jobs.wait(&job_id).await.expect("job result");

    assert!(!result.cancelled);
    assert_eq!(result.total_found, 11);
    assert_eq!(result.inserted, 11);
    assert_eq!(result.units_completed, 8);
    // Only the interrupted page is fetched again.
    assert_eq!(maps.fetches(), maps_before + 1);
    assert_eq!(yelp.fetches(), yelp_before);

    let inserted = h.store.inserted();
    let unique: BTreeSet<&String> = inserted.iter().collect();
    assert_eq!(inserted.len(), 11);
    assert_eq!(unique.len(), 11);
    assert_eq!(h.store.leads().len(), 11);

    let checkpoint = JobCheckpoint::load(h.checkpoints.as_ref(), &job_id)
        .await
        .expect("load checkpoint");
    assert!(checkpoint.is_none());
}

#[tokio::test]
async fn test_resume_of_running_job_is_rejected() {
    let (h, _maps, _yelp) = setup(true);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    wait_until_suspended(&jobs, &job_id, 7).await;

    let err = jobs.resume(&job_id).await.expect_err("job is running");
    assert!(matches!(err, ScanError::JobRunning(_)), "{err}");

    jobs.cancel(&job_id).expect("cancel");
    jobs.wait(&job_id).await.expect("job result");
}

#[tokio::test(start_paused = true)]
async fn test_limit_reached_while_suspended_completes_without_pending_challenges() {
    let maps = Arc::new(ScriptedSource::new("maps").challenge_on("city", 0));
    let yelp = Arc::new(
        ScriptedSource::new("yelp")
            .page(
                "city",
                vec![
                    lead("yelp", "Coffee Planet", "21 Jail Road"),
                    lead("yelp", "Jade Cafe", "7 Canal Bank"),
                ],
            )
            .fail_first(1),
    );
    let h = harness(
        &[Arc::clone(&maps), Arc::clone(&yelp)],
        RobotsServer::new(),
        test_config(),
    );
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    // yelp backs off while maps sits on its challenge, then fills the limit.
    let query = Query::new("coffee shop", "Lahore", "Pakistan", 2)
        .with_source(source_id("maps"))
        .with_source(source_id("yelp"));
    let job_id = jobs.start(query).await.expect("start job");
    let result = jobs.wait(&job_id).await.expect("job result");

    assert!(result.limit_reached);
    assert!(!result.cancelled);
    assert_eq!(result.inserted, 2);
    assert!(result.failed_units.is_empty());
    assert_eq!(maps.fetches(), 1);
    assert!(result.duration < Duration::from_secs(600));

    let status = jobs.status(&job_id).expect("status");
    assert_eq!(status.state, JobState::Completed);
    assert!(status.pending_challenges.is_empty());
    let control = jobs.control(&job_id).expect("job control");
    assert!(control.pending_challenges().is_empty());
}

#[tokio::test]
async fn test_cancelled_job_still_reports_its_challenge() {
    let (h, _maps, _yelp) = setup(true);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    wait_until_suspended(&jobs, &job_id, 7).await;
    jobs.cancel(&job_id).expect("cancel");
    jobs.wait(&job_id).await.expect("job result");

    let status = jobs.status(&job_id).expect("status");
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(status.pending_challenges.len(), 1);
    assert_eq!(status.pending_challenges[0].unit, challenged_unit());
}

#[tokio::test]
async fn test_forget_drops_only_finished_jobs() {
    let (h, _maps, _yelp) = setup(true);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    wait_until_suspended(&jobs, &job_id, 7).await;
    let err = jobs.forget(&job_id).expect_err("job is running");
    assert!(matches!(err, ScanError::JobRunning(_)), "{err}");

    jobs.cancel(&job_id).expect("cancel");
    jobs.wait(&job_id).await.expect("job result");

    assert!(jobs.forget(&job_id).expect("forget finished job"));
    assert!(jobs.job_ids().is_empty());
    assert!(matches!(jobs.status(&job_id), Err(ScanError::JobNotFound(_))));
    assert!(!jobs.forget(&job_id).expect("forget unknown job"));

    // The checkpoint outlives the table entry, so the job can still resume.
    let checkpoint = JobCheckpoint::load(h.checkpoints.as_ref(), &job_id)
        .await
        .expect("load checkpoint");
    assert!(checkpoint.is_some());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (h, _maps, _yelp) = setup(false);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    assert!(matches!(jobs.status("nope"), Err(ScanError::JobNotFound(_))));
    assert!(matches!(jobs.cancel("nope"), Err(ScanError::JobNotFound(_))));
    assert!(matches!(
        jobs.resolve_challenge("nope"),
        Err(ScanError::JobNotFound(_))
    ));
    assert!(matches!(
        jobs.resume("nope").await,
        Err(ScanError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_query_is_rejected_before_start() {
    let (h, maps, _yelp) = setup(false);
    let jobs = JobManager::new(Arc::clone(&h.orchestrator));

    let err = jobs
        .start(tiled_query().with_source(source_id("bing")))
        .await
        .expect_err("unknown source");
    assert!(matches!(err, ScanError::InvalidQuery(_)), "{err}");
    assert!(jobs.job_ids().is_empty());
    assert_eq!(maps.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_challenge_times_out() {
    let (h, _maps, _yelp) = setup(true);

    let result = h.orchestrator.run(tiled_query()).await.expect("run job");

    assert_eq!(result.inserted, 9);
    assert_eq!(result.units_completed, 7);
    assert_eq!(result.failed_units.len(), 1);
    assert_eq!(result.failed_units[0].unit, challenged_unit());
    assert_eq!(result.failed_units[0].reason, FailureReason::ChallengeTimeout);
    assert!(result.duration >= Duration::from_secs(600));
}

#[tokio::test]
async fn test_jobs_are_recorded_in_the_database() {
    let (h, _maps, _yelp) = setup(false);
    let db = Database::open(":memory:").await.expect("open database");
    let jobs = JobManager::new(Arc::clone(&h.orchestrator)).with_database(db.clone());

    let job_id = jobs.start(tiled_query()).await.expect("start job");
    let result = jobs.wait(&job_id).await.expect("job result");
    assert_eq!(result.inserted, 11);

    let record = scan_jobs::get_scan_job(db.pool(), &job_id)
        .await
        .expect("get scan job")
        .expect("scan job recorded");
    assert_eq!(record.status, ScanJobStatus::Completed);
    assert_eq!(record.query.niche, "coffee shop");
    assert_eq!(record.counters.units_total, 8);
    assert_eq!(record.counters.units_processed, 8);
    assert_eq!(record.counters.total_found, 11);
    assert_eq!(record.counters.inserted, 11);
    assert!(record.completed_at.is_some());
}
