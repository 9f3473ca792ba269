mod common;

use futures::StreamExt;
use quack_translate::jobs::{
    ArtifactKind, EventStream, JobError, JobId, JobState, ProgressEvent, SubmitRequest,
};
use quack_translate::overrides::Overrides;
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;

fn script(events: Vec<anyhow::Result<ProgressEvent>>) -> EventStream {
    futures::stream::iter(events).boxed()
}

/// Reports progress once, then waits for cancellation.
fn hang_after_progress(cancel: tokio_util::sync::CancellationToken) -> EventStream {
    async_stream::stream! {
        yield Ok::<_, anyhow::Error>(ProgressEvent::progress("parse", 0.3, 1, 3));
        cancel.cancelled().await;
    }
    .boxed()
}

#[tokio::test]
async fn progress_then_finish_succeeds_with_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |spec, _cancel| {
        async_stream::stream! {
            yield Ok::<_, anyhow::Error>(ProgressEvent::progress("parse", 0.3, 1, 3));
            yield Ok(ProgressEvent::progress("render", 0.9, 3, 3));
            let mono = spec.output_dir.join("paper.mono.pdf");
            tokio::fs::write(&mono, b"%PDF-1.4").await.unwrap();
            yield Ok(ProgressEvent::Finish(BTreeMap::from([(ArtifactKind::Mono, mono)])));
        }
        .boxed()
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&svc, &id).await;

    assert_eq!(rec.state(), JobState::Success);
    let artifacts = rec.artifacts().unwrap();
    assert_eq!(artifacts.len(), 1);
    let mono = &artifacts[&ArtifactKind::Mono];
    assert!(mono.ends_with("paper.mono.pdf"));
    assert_eq!(svc.artifact(&id, ArtifactKind::Mono).await.unwrap(), *mono);
}

#[tokio::test]
async fn observed_states_follow_the_state_machine() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        script(vec![
            Ok(ProgressEvent::progress("parse", 0.3, 1, 3)),
            Ok(ProgressEvent::progress("render", 0.9, 3, 3)),
            Ok(ProgressEvent::Error("backend timeout".into())),
        ])
    });
    let mut changes = svc.subscribe();

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();

    let mut seen = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), changes.recv()).await {
            Ok(Ok(rec)) if rec.id == id => {
                let done = rec.state().is_terminal();
                seen.push(rec.state());
                if done {
                    break;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(_))) => panic!("feed lagged"),
            Ok(Err(RecvError::Closed)) | Err(_) => panic!("feed ended early"),
        }
    }

    assert_eq!(seen.first(), Some(&JobState::Pending));
    for pair in seen.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal step {} -> {}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(seen.last(), Some(&JobState::Error));
}

#[tokio::test]
async fn missing_output_is_omitted_but_job_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |spec, _cancel| {
        async_stream::stream! {
            let mono = spec.output_dir.join("paper.mono.pdf");
            tokio::fs::write(&mono, b"%PDF-1.4").await.unwrap();
            let dual = spec.output_dir.join("never-written.dual.pdf");
            yield Ok::<_, anyhow::Error>(ProgressEvent::Finish(BTreeMap::from([
                (ArtifactKind::Mono, mono),
                (ArtifactKind::Dual, dual),
            ])));
        }
        .boxed()
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&svc, &id).await;

    assert_eq!(rec.state(), JobState::Success);
    let artifacts = rec.artifacts().unwrap();
    assert!(artifacts.contains_key(&ArtifactKind::Mono));
    assert!(!artifacts.contains_key(&ArtifactKind::Dual));
    assert!(matches!(
        svc.artifact(&id, ArtifactKind::Dual).await,
        Err(JobError::Gone { kind: ArtifactKind::Dual, .. })
    ));
}

#[tokio::test]
async fn error_event_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Error("backend timeout".into()))])
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&svc, &id).await;

    assert_eq!(rec.state(), JobState::Error);
    assert_eq!(rec.error(), Some("backend timeout"));
    assert!(matches!(
        svc.artifact(&id, ArtifactKind::Mono).await,
        Err(JobError::Conflict { state: JobState::Error, .. })
    ));
}

#[tokio::test]
async fn stream_fault_and_early_end_become_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());

    let faulty = common::service(&cfg, |_spec, _cancel| {
        script(vec![
            Ok(ProgressEvent::progress("parse", 0.1, 0, 1)),
            Err(anyhow::anyhow!("runner pipe closed")),
        ])
    });
    let id = faulty
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&faulty, &id).await;
    assert_eq!(rec.state(), JobState::Error);
    assert!(rec.error().unwrap().contains("runner pipe closed"));

    let silent = common::service(&cfg, |_spec, _cancel| script(vec![]));
    let id = silent
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&silent, &id).await;
    assert_eq!(rec.state(), JobState::Error);
    assert_eq!(rec.error(), Some("translation ended without a result"));
}

#[tokio::test]
async fn panicking_engine_marks_job_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        async_stream::stream! {
            yield Ok::<_, anyhow::Error>(ProgressEvent::progress("parse", 0.1, 0, 1));
            panic!("layout model exploded");
        }
        .boxed()
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let rec = common::wait_terminal(&svc, &id).await;
    assert_eq!(rec.state(), JobState::Error);
    assert!(rec.error().unwrap().contains("layout model exploded"));
}

#[tokio::test]
async fn immediate_cancel_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| {
        async_stream::stream! {
            cancel.cancelled().await;
            yield Ok::<_, anyhow::Error>(ProgressEvent::Error("should not be seen".into()));
        }
        .boxed()
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    assert!(svc.cancel(&id).await.unwrap());

    let rec = svc.status(&id).unwrap();
    assert_eq!(rec.state(), JobState::Cancelled);
    assert_eq!(svc.active(), 0);
    // Idempotent.
    assert!(!svc.cancel(&id).await.unwrap());
    assert_eq!(svc.status(&id).unwrap().state(), JobState::Cancelled);
}

#[tokio::test]
async fn concurrent_cancels_take_effect_once() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| hang_after_progress(cancel));

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let (a, b) = tokio::join!(svc.cancel(&id), svc.cancel(&id));
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|c| **c).count(), 1);
    assert_eq!(svc.status(&id).unwrap().state(), JobState::Cancelled);
}

#[tokio::test]
async fn dropped_cancel_still_settles_the_job() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| hang_after_progress(cancel));

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while svc.status(&id).unwrap().state() != JobState::Progress {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Poll once, then give up on the call as a disconnecting client would.
    let mut pending = Box::pin(svc.cancel(&id));
    let _ = futures::poll!(pending.as_mut());
    drop(pending);

    let rec = common::wait_terminal(&svc, &id).await;
    assert_eq!(rec.state(), JobState::Cancelled);
    assert_eq!(svc.active(), 0);
    assert!(!svc.cancel(&id).await.unwrap());
}

#[tokio::test]
async fn cancel_after_finish_keeps_the_outcome() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let ok = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Finish(BTreeMap::new()))])
    });
    let failed = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Error("bad font table".into()))])
    });

    for (svc, expected) in [(&ok, JobState::Success), (&failed, JobState::Error)] {
        let id = svc
            .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
            .await
            .unwrap();
        assert_eq!(common::wait_terminal(svc, &id).await.state(), expected);

        assert!(!svc.cancel(&id).await.unwrap());
        assert_eq!(svc.status(&id).unwrap().state(), expected);
    }
}

#[tokio::test]
async fn finish_racing_cancel_settles_once() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Finish(BTreeMap::new()))])
    });

    let mut seen = Vec::new();
    for round in 0..20 {
        let id = svc
            .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
            .await
            .unwrap();
        // Give the job task a varying head start.
        for _ in 0..round % 4 {
            tokio::task::yield_now().await;
        }
        let cancelled = svc.cancel(&id).await.unwrap();
        let rec = common::wait_terminal(&svc, &id).await;
        let expected = if cancelled {
            JobState::Cancelled
        } else {
            JobState::Success
        };
        assert_eq!(rec.state(), expected);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(svc.status(&id).unwrap().state(), expected);
        seen.push(expected);
    }
    assert!(seen.contains(&JobState::Cancelled), "{seen:?}");
    assert!(seen.contains(&JobState::Success), "{seen:?}");
}

#[tokio::test]
async fn artifact_conflicts_while_running() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| hang_after_progress(cancel));

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while svc.status(&id).unwrap().progress().map(|p| p.stage.as_str()) != Some("parse") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let rec = svc.status(&id).unwrap();
    assert_eq!(rec.state(), JobState::Progress);
    assert!((rec.progress().unwrap().overall - 0.3).abs() < 1e-9);
    assert!(matches!(
        svc.artifact(&id, ArtifactKind::Dual).await,
        Err(JobError::Conflict { state: JobState::Progress, .. })
    ));

    svc.cancel(&id).await.unwrap();
}

#[tokio::test]
async fn never_produced_glossary_is_gone() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |spec, _cancel| {
        async_stream::stream! {
            let mono = spec.output_dir.join("paper.mono.pdf");
            tokio::fs::write(&mono, b"%PDF-1.4").await.unwrap();
            yield Ok::<_, anyhow::Error>(ProgressEvent::Finish(BTreeMap::from([(ArtifactKind::Mono, mono)])));
        }
        .boxed()
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    common::wait_terminal(&svc, &id).await;

    assert!(matches!(
        svc.artifact(&id, ArtifactKind::Glossary).await,
        Err(JobError::Gone { kind: ArtifactKind::Glossary, .. })
    ));

    // Deleted after the fact.
    let mono = svc.artifact(&id, ArtifactKind::Mono).await.unwrap();
    std::fs::remove_file(&mono).unwrap();
    assert!(matches!(
        svc.artifact(&id, ArtifactKind::Mono).await,
        Err(JobError::Gone { .. })
    ));
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| hang_after_progress(cancel));

    let running = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    let unknown = JobId::new();

    assert!(matches!(svc.status(&unknown), Err(JobError::NotFound(id)) if id == unknown));
    assert!(matches!(svc.cancel(&unknown).await, Err(JobError::NotFound(_))));
    assert!(matches!(
        svc.artifact(&unknown, ArtifactKind::Mono).await,
        Err(JobError::NotFound(_))
    ));

    svc.cancel(&running).await.unwrap();
}

#[tokio::test]
async fn invalid_settings_register_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| script(vec![]));

    let overrides = Overrides::from_json(&serde_json::json!({
        "pdf.no_mono": true,
        "pdf.no_dual": true,
    }))
    .unwrap();
    let res = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())).with_overrides(overrides))
        .await;

    assert!(matches!(res, Err(JobError::Validation(_))));
    assert!(svc.registry().is_empty());
    assert!(!tmp.path().join("jobs").exists());

    let missing = svc
        .submit(SubmitRequest::new(tmp.path().join("nope.pdf")))
        .await;
    assert!(matches!(missing, Err(JobError::Validation(_))));
    let url = svc
        .submit(SubmitRequest::new("https://example.com/paper.pdf"))
        .await;
    assert!(matches!(url, Err(JobError::Validation(_))));
    assert!(svc.registry().is_empty());
}

#[tokio::test]
async fn sweep_evicts_only_expired_terminal_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = common::config(tmp.path());
    cfg.jobs.retention_seconds = 60;
    cfg.jobs.purge_artifacts = true;
    let svc = common::service(&cfg, |spec, cancel| {
        let hang = spec
            .input_pdf
            .file_name()
            .is_some_and(|n| n == "slow.pdf");
        async_stream::stream! {
            if hang {
                cancel.cancelled().await;
            }
            yield Ok::<_, anyhow::Error>(ProgressEvent::Finish(BTreeMap::new()));
        }
        .boxed()
    });
    let pdf = common::sample_pdf(tmp.path());

    let done = svc.submit(SubmitRequest::new(&pdf)).await.unwrap();
    common::wait_terminal(&svc, &done).await;
    let running = svc
        .submit(SubmitRequest::new(&pdf).with_file_name("slow.pdf"))
        .await
        .unwrap();

    assert!(svc.sweep_expired(OffsetDateTime::now_utc()).await.is_empty());

    let later = OffsetDateTime::now_utc() + Duration::from_secs(120);
    assert_eq!(svc.sweep_expired(later).await, vec![done]);
    assert!(matches!(svc.status(&done), Err(JobError::NotFound(_))));
    assert!(!cfg.jobs_dir().join(done.to_string()).exists());
    assert!(!svc.status(&running).unwrap().state().is_terminal());

    svc.cancel(&running).await.unwrap();
}

#[tokio::test]
async fn retention_disabled_keeps_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Finish(BTreeMap::new()))])
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    common::wait_terminal(&svc, &id).await;

    let far = OffsetDateTime::now_utc() + Duration::from_secs(365 * 24 * 3600);
    assert!(svc.retention().is_none());
    assert!(svc.sweep_expired(far).await.is_empty());
    assert!(svc.status(&id).is_ok());
}

#[tokio::test]
async fn shutdown_cancels_running_jobs_and_refuses_new_ones() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, cancel| hang_after_progress(cancel));
    let pdf = common::sample_pdf(tmp.path());

    let a = svc.submit(SubmitRequest::new(&pdf)).await.unwrap();
    let b = svc.submit(SubmitRequest::new(&pdf)).await.unwrap();
    assert_eq!(svc.list().len(), 2);

    svc.shutdown().await;

    assert_eq!(svc.status(&a).unwrap().state(), JobState::Cancelled);
    assert_eq!(svc.status(&b).unwrap().state(), JobState::Cancelled);
    assert_eq!(svc.active(), 0);
    assert!(matches!(
        svc.submit(SubmitRequest::new(&pdf)).await,
        Err(JobError::Unavailable)
    ));
}

#[tokio::test]
async fn finished_jobs_release_their_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = common::config(tmp.path());
    let svc = common::service(&cfg, |_spec, _cancel| {
        script(vec![Ok(ProgressEvent::Finish(BTreeMap::new()))])
    });

    let id = svc
        .submit(SubmitRequest::new(common::sample_pdf(tmp.path())))
        .await
        .unwrap();
    common::wait_terminal(&svc, &id).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while svc.active() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
