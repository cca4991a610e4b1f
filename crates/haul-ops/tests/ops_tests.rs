use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use haul_core::EngineConfig;
use haul_ops::{
    AutoResponder, ChangeSink, Choice, ConflictResponse, DirectoryTrash, Engine, JobEvent,
    MessagePrompt, OperationComplete, OperationProgress, Prompt, Reply, Responder, TrashStore,
    UndoInfo, UndoState,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    added: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl ChangeSink for RecordingSink {
    fn files_added(&self, paths: &[PathBuf]) {
        self.added.lock().unwrap().extend_from_slice(paths);
    }

    fn files_removed(&self, paths: &[PathBuf]) {
        self.removed.lock().unwrap().extend_from_slice(paths);
    }
}

struct Fixture {
    temp: TempDir,
    engine: Engine,
    sink: Arc<RecordingSink>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_progress_interval(100)
    }

    fn with_progress_interval(millis: u64) -> Self {
        let temp = TempDir::new().unwrap();
        let trash_root = temp.path().join("trash");
        let config = EngineConfig::builder()
            .trash_dir(trash_root.clone())
            .progress_interval_ms(millis)
            .build()
            .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let engine = Engine::with_parts(config, Arc::new(DirectoryTrash::new(trash_root)), sink.clone());
        Self { temp, engine, sink }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    fn dir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn file(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }
}

async fn run(handle: haul_ops::JobHandle) -> OperationComplete {
    handle.run_with(&mut AutoResponder::skip_all()).await
}

/// Answers conflicts with a fixed response and messages with the first
/// offered choice from `preferred`, keeping everything it saw.
struct Recorder {
    conflict: ConflictResponse,
    preferred: Vec<Choice>,
    messages: Vec<MessagePrompt>,
    statuses: Vec<String>,
}

impl Recorder {
    fn new(conflict: ConflictResponse, preferred: &[Choice]) -> Self {
        Self {
            conflict,
            preferred: preferred.to_vec(),
            messages: Vec::new(),
            statuses: Vec::new(),
        }
    }
}

impl Responder for Recorder {
    fn respond(&mut self, prompt: &Prompt) -> Reply {
        match prompt {
            Prompt::Conflict(_) => Reply::Conflict(self.conflict.clone()),
            Prompt::Message(message) => {
                self.messages.push(message.clone());
                let choice = self
                    .preferred
                    .iter()
                    .find(|c| message.choices.contains(c))
                    .copied()
                    .unwrap_or(Choice::Cancel);
                Reply::Choice(choice)
            }
        }
    }

    fn progress(&mut self, progress: &OperationProgress) {
        self.statuses.push(progress.status.clone());
    }
}

/// The `(n, total)` of a "... file n of total ..." status.
fn file_counter(status: &str) -> Option<(usize, usize)> {
    let words: Vec<&str> = status.split_whitespace().collect();
    words.windows(4).find_map(|w| match w {
        ["file", n, "of", total] => Some((n.parse().ok()?, total.parse().ok()?)),
        _ => None,
    })
}

fn mode(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_produces_identical_files() {
    let fx = Fixture::new();
    let a = fx.file("src/a.txt", b"alpha");
    let tree = fx.dir("src/tree");
    fx.file("src/tree/inner/b.bin", &[0u8, 1, 2, 3, 255]);
    let dest = fx.dir("dest");

    let complete = run(fx.engine.copy(vec![a.clone(), tree.clone()], dest.clone())).await;

    assert!(complete.is_success(), "{complete:?}");
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(
        fs::read(dest.join("tree/inner/b.bin")).unwrap(),
        fs::read(tree.join("inner/b.bin")).unwrap()
    );
    assert_eq!(complete.debuting, vec![dest.join("a.txt"), dest.join("tree")]);
    assert!(a.exists());
    assert!(fx.sink.added.lock().unwrap().contains(&dest.join("a.txt")));
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Undo);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_conflict_replace_overwrites_destination() {
    let fx = Fixture::new();
    let src = fx.file("src/report", b"new");
    let dest = fx.dir("dest");
    fx.file("dest/report", b"old");

    let mut asked = 0;
    let mut responder = |prompt: &Prompt| match prompt {
        Prompt::Conflict(_) => {
            asked += 1;
            Reply::Conflict(ConflictResponse::replace(false))
        }
        Prompt::Message(_) => Reply::Choice(Choice::Cancel),
    };
    let complete = fx
        .engine
        .copy(vec![src], dest.clone())
        .run_with(&mut responder)
        .await;

    assert!(complete.success);
    assert_eq!(asked, 1);
    assert_eq!(fs::read(dest.join("report")).unwrap(), b"new");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undo_move_then_redo() {
    let fx = Fixture::new();
    let a = fx.file("src/a", b"a");
    let b = fx.file("src/sub/b", b"b");
    let sub = b.parent().unwrap().to_path_buf();
    let dest = fx.dir("dest");

    let complete = run(fx.engine.move_files(vec![a.clone(), sub.clone()], dest.clone())).await;
    assert!(complete.success);
    assert!(dest.join("a").exists() && dest.join("sub/b").exists());
    assert!(!a.exists() && !sub.exists());

    let undo = fx.engine.undo().expect("nothing to undo");
    let complete = run(undo).await;
    assert!(complete.success, "{complete:?}");
    assert_eq!(fs::read(&a).unwrap(), b"a");
    assert_eq!(fs::read(&b).unwrap(), b"b");
    assert!(!dest.join("a").exists());
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Redo);

    let redo = fx.engine.redo().expect("nothing to redo");
    let complete = run(redo).await;
    assert!(complete.success);
    assert!(dest.join("a").exists() && dest.join("sub/b").exists());
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Undo);

    // Undo again lands on the same state as the first undo.
    run(fx.engine.undo().unwrap()).await;
    assert!(a.exists() && b.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_move_merge_keeps_both_trees() {
    let fx = Fixture::new();
    fx.file("src/docs/one", b"1");
    fx.file("src/docs/shared", b"new");
    fx.file("dest/docs/two", b"2");
    fx.file("dest/docs/shared", b"old");
    let dest = fx.path("dest");

    let mut responder = AutoResponder::replace_all();
    let complete = fx
        .engine
        .move_files(vec![fx.path("src/docs")], dest.clone())
        .run_with(&mut responder)
        .await;

    assert!(complete.success, "{complete:?}");
    assert_eq!(fs::read(dest.join("docs/one")).unwrap(), b"1");
    assert_eq!(fs::read(dest.join("docs/two")).unwrap(), b"2");
    assert_eq!(fs::read(dest.join("docs/shared")).unwrap(), b"new");
    assert!(!fx.path("src/docs").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trash_then_undo_restores() {
    let fx = Fixture::new();
    let file = fx.file("work/notes.txt", b"keep");

    let complete = run(fx.engine.trash_or_delete(vec![file.clone()])).await;
    assert!(complete.success, "{complete:?}");
    assert!(!file.exists());
    assert_eq!(fx.engine.trash().list().unwrap().len(), 1);
    assert!(matches!(
        fx.engine.undo_manager().action(),
        Some(UndoInfo::Trash { ref items }) if items.len() == 1
    ));

    let complete = run(fx.engine.undo().unwrap()).await;
    assert!(complete.success, "{complete:?}");
    assert_eq!(fs::read(&file).unwrap(), b"keep");
    assert!(fx.engine.trash().list().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permanent_delete_denied_changes_nothing() {
    let fx = Fixture::new();
    let file = fx.file("work/keep", b"x");

    let mut refuse = |_: &Prompt| Reply::Choice(Choice::Cancel);
    let complete = fx
        .engine
        .delete(vec![file.clone()])
        .run_with(&mut refuse)
        .await;

    assert!(!complete.success);
    assert!(complete.user_cancel);
    assert!(file.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permanent_delete_confirmed_through_events() {
    let fx = Fixture::new();
    let file = fx.file("work/gone", b"x");

    let mut handle = fx.engine.delete(vec![file.clone()]);
    let mut complete = None;
    while let Some(event) = handle.recv().await {
        match event {
            JobEvent::Prompt(request) => {
                let Prompt::Message(message) = &request.prompt else {
                    panic!("unexpected conflict prompt");
                };
                assert!(message.choices.contains(&Choice::Delete));
                request.choose(Choice::Delete);
            }
            JobEvent::Complete(done) => complete = Some(done),
            JobEvent::Progress(_) => {}
        }
    }

    let complete = complete.unwrap();
    assert!(complete.success, "{complete:?}");
    assert!(!file.exists());
    assert_eq!(fx.engine.undo_manager().state(), UndoState::None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recursive_permissions_undo() {
    let fx = Fixture::new();
    let root = fx.dir("tree");
    let file = fx.file("tree/sub/f", b"f");
    fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
    fs::set_permissions(root.join("sub"), fs::Permissions::from_mode(0o700)).unwrap();

    let complete = run(fx.engine.set_permissions_recursive(root.clone(), 0o044, 0o044, 0o055, 0o055)).await;
    assert!(complete.success);
    assert_eq!(mode(&file), 0o644);
    assert_eq!(mode(&root.join("sub")), 0o755);

    run(fx.engine.undo().unwrap()).await;
    assert_eq!(mode(&file), 0o600);
    assert_eq!(mode(&root.join("sub")), 0o700);

    run(fx.engine.redo().unwrap()).await;
    assert_eq!(mode(&file), 0o644);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_job_discards_redo_but_not_undo() {
    let fx = Fixture::new();
    let old = fx.file("a/old", b"x");

    run(fx.engine.rename(old.clone(), "new")).await;
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Undo);

    // A job that records nothing leaves the pending undo alone.
    let complete = run(fx.engine.rename(fx.path("a/missing"), "other")).await;
    assert!(!complete.success);
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Undo);

    run(fx.engine.undo().unwrap()).await;
    assert!(old.exists());
    assert_eq!(fx.engine.undo_manager().state(), UndoState::Redo);

    let complete = run(fx.engine.rename(fx.path("a/missing"), "other")).await;
    assert!(!complete.success);
    assert_eq!(fx.engine.undo_manager().state(), UndoState::None);
    assert!(fx.engine.redo().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_then_undo_removes_item() {
    let fx = Fixture::new();
    let parent = fx.dir("work");

    let complete = run(fx.engine.new_folder(parent.clone(), None)).await;
    let created = complete.new_file.clone().unwrap();
    assert_eq!(created, parent.join("Untitled Folder"));
    assert!(created.is_dir());

    let complete = run(fx.engine.undo().unwrap()).await;
    assert!(complete.success, "{complete:?}");
    assert!(!created.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_job_completes_once() {
    let fx = Fixture::new();
    let src = fx.dir("many");
    for i in 0..200 {
        fx.file(&format!("many/f{i}"), b"data");
    }
    let dest = fx.dir("dest");

    let mut handle = fx.engine.copy(vec![src], dest);
    handle.cancel();

    let mut completions = Vec::new();
    while let Some(event) = handle.recv().await {
        match event {
            JobEvent::Complete(complete) => completions.push(complete),
            JobEvent::Prompt(request) => panic!("prompted after cancel: {:?}", request.prompt),
            JobEvent::Progress(_) => {}
        }
    }

    assert_eq!(completions.len(), 1);
    let complete = &completions[0];
    if !complete.success {
        assert!(complete.user_cancel);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_and_link() {
    let fx = Fixture::new();
    let file = fx.file("dir/foo.txt", b"x");
    let dir = fx.path("dir");

    let complete = run(fx.engine.duplicate(vec![file.clone()])).await;
    assert!(complete.success);
    assert!(dir.join("foo (copy).txt").exists());

    let complete = run(fx.engine.link(vec![file.clone()], dir.clone())).await;
    assert!(complete.success);
    let link = dir.join("Link to foo.txt");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(fs::read_link(&link).unwrap().is_absolute());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_move_fallback_counts_against_its_own_scan() {
    let fx = Fixture::with_progress_interval(0);
    let mut sources = Vec::new();
    for name in ["a", "b", "c"] {
        sources.push(fx.file(&format!("src/{name}"), name.as_bytes()));
    }
    fx.file("src/docs/one", b"1");
    sources.push(fx.path("src/docs"));
    fx.file("dest/docs/two", b"2");
    let dest = fx.path("dest");

    let mut recorder = Recorder::new(ConflictResponse::replace(true), &[Choice::Skip]);
    let complete = fx
        .engine
        .move_files(sources, dest.clone())
        .run_with(&mut recorder)
        .await;

    assert!(complete.success, "{complete:?}");
    assert!(dest.join("a").exists() && dest.join("docs/one").exists());
    assert!(dest.join("docs/two").exists());
    // Three renames, then the merged folder and its one file.
    assert_eq!(complete.files_processed, 5);

    assert!(
        recorder
            .statuses
            .iter()
            .any(|status| status == "Moving file 1 of 2 to \"dest\""),
        "{:?}",
        recorder.statuses
    );
    for status in &recorder.statuses {
        if let Some((n, total)) = file_counter(status) {
            assert!(n <= total, "{status}");
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_destination_fails_before_scanning() {
    let fx = Fixture::new();
    let missing = fx.path("src/missing");
    let not_a_folder = fx.file("dest", b"plain file");

    let mut recorder = Recorder::new(ConflictResponse::cancel(), &[Choice::Skip]);
    let complete = fx
        .engine
        .copy(vec![missing], not_a_folder)
        .run_with(&mut recorder)
        .await;

    assert!(!complete.success);
    assert_eq!(recorder.messages.len(), 1, "{:?}", recorder.messages);
    assert_eq!(recorder.messages[0].secondary, "The destination is not a folder.");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_all_offered_only_with_files_left() {
    let fx = Fixture::new();
    let a = fx.file("dir/a", b"a");
    let b = fx.file("dir/b", b"b");
    let dir = fx.path("dir");

    let mut recorder = Recorder::new(ConflictResponse::cancel(), &[Choice::SkipAll, Choice::Skip]);
    let complete = fx
        .engine
        .copy(vec![a.clone(), b], dir.clone())
        .run_with(&mut recorder)
        .await;
    assert!(complete.success, "{complete:?}");
    // Skip All answers the second file too.
    assert_eq!(recorder.messages.len(), 1);
    assert!(recorder.messages[0].choices.contains(&Choice::SkipAll));
    assert_eq!(complete.errors.len(), 2);

    let mut recorder = Recorder::new(ConflictResponse::cancel(), &[Choice::SkipAll, Choice::Skip]);
    fx.engine
        .copy(vec![a], dir)
        .run_with(&mut recorder)
        .await;
    assert_eq!(recorder.messages.len(), 1);
    assert_eq!(recorder.messages[0].choices, vec![Choice::Cancel, Choice::Skip]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_conflict_rename_on_copy_and_move() {
    let fx = Fixture::new();
    let report = fx.file("src/report", b"new");
    let notes = fx.file("src/notes", b"moved");
    let dest = fx.dir("dest");
    fx.file("dest/report", b"old");
    fx.file("dest/notes", b"kept");

    let mut recorder = Recorder::new(ConflictResponse::rename("report (new)"), &[]);
    let complete = fx
        .engine
        .copy(vec![report.clone()], dest.clone())
        .run_with(&mut recorder)
        .await;
    assert!(complete.success, "{complete:?}");
    assert_eq!(fs::read(dest.join("report")).unwrap(), b"old");
    assert_eq!(fs::read(dest.join("report (new)")).unwrap(), b"new");
    assert_eq!(complete.debuting, vec![dest.join("report (new)")]);
    assert!(report.exists());

    let mut recorder = Recorder::new(ConflictResponse::rename("notes.old"), &[]);
    let complete = fx
        .engine
        .move_files(vec![notes.clone()], dest.clone())
        .run_with(&mut recorder)
        .await;
    assert!(complete.success, "{complete:?}");
    assert_eq!(fs::read(dest.join("notes")).unwrap(), b"kept");
    assert_eq!(fs::read(dest.join("notes.old")).unwrap(), b"moved");
    assert!(!notes.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_non_ascii_names_keep_extension() {
    let fx = Fixture::new();
    let accented = fx.file("dir/é.txt", b"x");
    let japanese = fx.file("dir/日本語.md", b"y");
    let dir = fx.path("dir");

    let complete = run(fx.engine.duplicate(vec![accented, japanese])).await;

    assert!(complete.success, "{complete:?}");
    assert!(dir.join("é (copy).txt").exists());
    assert!(dir.join("日本語 (copy).md").exists());
}
