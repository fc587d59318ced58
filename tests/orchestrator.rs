mod common;

use bulk_partition::{
    checkpoint::{CheckpointState, CheckpointStore},
    error::ExtractError,
    orchestrator::{FixedPrompt, Orchestrator, ResumeDecision},
    report::RunState,
    shutdown::CancelToken,
};
use common::{test_config, touch, FakeEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Dirs {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    work: PathBuf,
}

fn dirs() -> Dirs {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("library");
    std::fs::create_dir_all(&root).unwrap();
    let root = root.canonicalize().unwrap();
    let work = tmp.path().join("work");
    Dirs {
        _tmp: tmp,
        root,
        work,
    }
}

fn orchestrator(d: &Dirs, engine: Arc<FakeEngine>, shutdown: CancelToken) -> Orchestrator {
    Orchestrator::new(&test_config(&d.work), &d.root, engine, shutdown).unwrap()
}

fn store(root: &Path) -> CheckpointStore {
    CheckpointStore::in_dir(root, "progress.json")
}

#[test]
fn pdf_and_large_epub_both_complete() {
    let d = dirs();
    touch(&d.root, "a.pdf", 4_000_000);
    touch(&d.root, "b.epub", 12_000_000);
    let engine = Arc::new(FakeEngine {
        item_count: 30,
        ..FakeEngine::new()
    });

    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(orch.state(), RunState::Completed);
    assert_eq!((report.succeeded, report.failed), (2, 0));
    assert_eq!(report.files[0].parts, 1);
    assert_eq!(report.files[1].parts, 10);
    assert!(report.files.iter().all(|f| f.status == 100));

    assert!(d.root.join("a").join("a_0.json").is_file());
    for i in 0..10 {
        assert!(d.root.join("b").join(format!("b_{i}.json")).is_file());
    }
    assert!(!d.root.join("b").join("b_10.json").exists());
    assert!(!store(&d.root).path().exists(), "checkpoint cleared");
    assert!(d.root.join("extract-report.json").is_file());
    assert!(orch.pools().active().is_empty());
}

#[test]
fn segment_holds_partitioned_elements() {
    let d = dirs();
    touch(&d.root, "vol.1.html", 10);
    let engine = Arc::new(FakeEngine::new());

    let mut orch = orchestrator(&d, engine, CancelToken::new());
    orch.run(&mut FixedPrompt::default()).unwrap();

    let raw = std::fs::read_to_string(d.root.join("vol_1").join("vol_1_0.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json[0]["text"], "vol.1.html");
}

#[test]
fn resume_processes_only_the_tail() {
    let d = dirs();
    let files: Vec<PathBuf> = ["w.html", "x.html", "y.html", "z.html"]
        .iter()
        .map(|n| touch(&d.root, n, 10))
        .collect();
    store(&d.root)
        .save(&CheckpointState {
            files: files.clone(),
            progress_index: 2,
        })
        .unwrap();
    let engine = Arc::new(FakeEngine::new());

    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();

    assert_eq!(engine.partitioned(), vec!["y.html", "z.html"]);
    assert_eq!(report.resumed_at, 2);
    assert_eq!(report.progress_index, 4);
    assert_eq!(report.processed(), 2);
    assert!(!d.root.join("w").exists());
}

#[test]
fn failed_file_still_advances() {
    let d = dirs();
    for n in ["a.html", "bad.html", "c.html"] {
        touch(&d.root, n, 10);
    }
    let engine = Arc::new(FakeEngine {
        fail_on: vec!["bad".into()],
        ..FakeEngine::new()
    });

    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!((report.succeeded, report.failed), (2, 1));
    assert_eq!(report.files[1].status, -1);
    assert!(report.files[1].error.is_some());
    assert!(!d.root.join("bad").exists());
    assert!(d.root.join("c").join("c_0.json").is_file());
    assert!(!store(&d.root).path().exists());
}

#[test]
fn interrupt_keeps_checkpoint_at_completed_count() {
    let d = dirs();
    for n in ["a.html", "b.html", "c.html", "d.html"] {
        touch(&d.root, n, 10);
    }
    let shutdown = CancelToken::new();
    let engine = Arc::new(FakeEngine {
        cancel_on: Some(("c.html".into(), shutdown.clone())),
        ..FakeEngine::new()
    });

    let mut orch = orchestrator(&d, engine.clone(), shutdown);
    let report = orch.run(&mut FixedPrompt::default()).unwrap();

    assert_eq!(report.state, RunState::Interrupted);
    assert_eq!(report.succeeded, 2);
    assert!(orch.pools().active().is_empty());
    let saved = store(&d.root).load().unwrap();
    assert_eq!(saved.files.len(), 4);
    assert_eq!(saved.progress_index, 2);
    assert!(!d.root.join("c").exists());
    assert!(!engine.partitioned().contains(&"d.html".to_string()));

    // next run picks up at c.html
    let engine = Arc::new(FakeEngine::new());
    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(engine.partitioned(), vec!["c.html", "d.html"]);
}

#[test]
fn rescan_appends_new_files_and_keeps_index() {
    let d = dirs();
    let a = touch(&d.root, "a.html", 10);
    store(&d.root)
        .save(&CheckpointState {
            files: vec![a.clone()],
            progress_index: 1,
        })
        .unwrap();
    touch(&d.root, "nested/b.pdf", 10);
    let engine = Arc::new(FakeEngine::new());

    let mut prompt = FixedPrompt {
        decision: ResumeDecision::Rescan,
        confirm: true,
    };
    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut prompt).unwrap();

    assert_eq!(report.total_files, 2);
    assert_eq!(report.resumed_at, 1);
    assert_eq!(engine.partitioned(), vec!["b.pdf"]);
    assert!(d.root.join("nested").join("b").join("b_0.json").is_file());
}

#[test]
fn resume_without_rescan_ignores_new_files() {
    let d = dirs();
    let a = touch(&d.root, "a.html", 10);
    store(&d.root)
        .save(&CheckpointState {
            files: vec![a],
            progress_index: 0,
        })
        .unwrap();
    touch(&d.root, "late.html", 10);
    let engine = Arc::new(FakeEngine::new());

    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(engine.partitioned(), vec!["a.html"]);
}

#[test]
fn declined_run_touches_nothing() {
    let d = dirs();
    touch(&d.root, "a.pdf", 10);
    let engine = Arc::new(FakeEngine::new());

    let mut prompt = FixedPrompt {
        decision: ResumeDecision::Resume,
        confirm: false,
    };
    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut prompt).unwrap();

    assert_eq!(report.state, RunState::Declined);
    assert!(engine.calls().is_empty());
    assert!(!store(&d.root).path().exists());
}

#[test]
fn corrupt_checkpoint_triggers_fresh_scan() {
    let d = dirs();
    touch(&d.root, "a.html", 10);
    touch(&d.root, "b.html", 10);
    std::fs::write(store(&d.root).path(), "{ not json").unwrap();
    let engine = Arc::new(FakeEngine::new());

    let mut orch = orchestrator(&d, engine.clone(), CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();
    assert_eq!(report.resumed_at, 0);
    assert_eq!(engine.partitioned(), vec!["a.html", "b.html"]);
}

#[test]
fn segments_and_reports_are_not_rescanned() {
    let d = dirs();
    touch(&d.root, "a.html", 10);
    let engine = Arc::new(FakeEngine::new());
    orchestrator(&d, engine, CancelToken::new())
        .run(&mut FixedPrompt::default())
        .unwrap();

    let engine = Arc::new(FakeEngine::new());
    let report = orchestrator(&d, engine.clone(), CancelToken::new())
        .run(&mut FixedPrompt::default())
        .unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(engine.partitioned(), vec!["a.html"]);
}

#[test]
fn missing_root_is_fatal() {
    let d = dirs();
    let missing = d.root.join("does-not-exist");
    let engine = Arc::new(FakeEngine::new());
    let err = Orchestrator::new(&test_config(&d.work), &missing, engine, CancelToken::new())
        .err()
        .unwrap();
    assert!(matches!(err, ExtractError::DirectoryNotFound { .. }));
    assert!(err.is_fatal());
}

#[test]
fn djvu_text_is_saved_verbatim() {
    let d = dirs();
    touch(&d.root, "hymns.djvu", 10);
    let text = "Chorus\nverse one\nChorus\nverse two\nChorus\n\x0cPage 7\n";
    let engine = Arc::new(FakeEngine {
        djvu_text: Some(text.into()),
        ..FakeEngine::new()
    });

    let mut orch = orchestrator(&d, engine, CancelToken::new());
    let report = orch.run(&mut FixedPrompt::default()).unwrap();
    assert_eq!(report.succeeded, 1);

    let raw = std::fs::read_to_string(d.root.join("hymns").join("hymns_0.json")).unwrap();
    let saved: String = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved, text);
}

#[test]
fn work_dir_inside_root_is_not_scanned() {
    let d = dirs();
    touch(&d.root, "b.epub", 12_000_000);
    let work = d.root.join(".work");
    let mut cfg = test_config(&work);
    cfg.global.keep_intermediates = true;

    let engine = Arc::new(FakeEngine::new());
    let report = Orchestrator::new(&cfg, &d.root, engine, CancelToken::new())
        .unwrap()
        .run(&mut FixedPrompt::default())
        .unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(report.succeeded, 1);
    let leftovers = walkdir::WalkDir::new(&work)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count();
    assert!(leftovers > 0, "split parts kept under the work dir");

    let engine = Arc::new(FakeEngine::new());
    let report = Orchestrator::new(&cfg, &d.root, engine.clone(), CancelToken::new())
        .unwrap()
        .run(&mut FixedPrompt::default())
        .unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.files[0].path, d.root.join("b.epub"));
}
