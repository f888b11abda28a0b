//! End-to-end semantics of the tag projection, driven straight at the
//! planner and engine against a temporary datastore. The FUSE transport is
//! a thin shim over these calls and carries no semantics of its own.

use std::collections::BTreeSet;

use tagfs::content;
use tagfs::core::path as tagpath;
use tagfs::engine::index::TagIndex;
use tagfs::engine::project::{self, EntryKind};
use tagfs::engine::query::{self, Node};
use tagfs::state::MountState;
use tagfs::TagError;
use tempfile::TempDir;

fn mount() -> (TempDir, MountState) {
    let dir = TempDir::new().unwrap();
    let state = MountState::open(dir.path()).unwrap();
    (dir, state)
}

fn comps(path: &str) -> Vec<String> {
    tagpath::parse(path)
}

fn split(path: &str) -> (Vec<String>, String) {
    let mut parts = comps(path);
    let leaf = parts.pop().expect("path needs a leaf");
    (parts, leaf)
}

fn mkdir(state: &mut MountState, path: &str) {
    let (prefix, name) = split(path);
    state.plan_mkdir(&prefix, &name).unwrap();
}

fn create(state: &mut MountState, path: &str) -> i64 {
    let (prefix, name) = split(path);
    state.plan_create(&prefix, &name, 0o644).unwrap()
}

fn rename(state: &mut MountState, src: &str, dst: &str) -> tagfs::Result<()> {
    let (src_prefix, src_name) = split(src);
    let (dst_prefix, dst_name) = split(dst);
    state.plan_rename(&src_prefix, &src_name, &dst_prefix, &dst_name)
}

fn unlink(state: &mut MountState, path: &str) -> tagfs::Result<()> {
    let (prefix, name) = split(path);
    state.plan_unlink(&prefix, &name)
}

fn visible(state: &MountState, path: &str) -> BTreeSet<String> {
    project::listing(&state.index, &comps(path))
        .into_iter()
        .filter(|e| !e.hidden)
        .map(|e| e.name)
        .collect()
}

fn hidden(state: &MountState, path: &str) -> BTreeSet<String> {
    project::listing(&state.index, &comps(path))
        .into_iter()
        .filter(|e| e.hidden)
        .map(|e| e.name)
        .collect()
}

fn tags_of(state: &MountState, name: &str) -> BTreeSet<String> {
    state.index.by_name(name).unwrap().tags.clone()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn readlink_at(state: &MountState, path: &str) -> String {
    let parts = comps(path);
    let Node::File(id) = query::resolve(&state.index, &parts).unwrap() else {
        panic!("{path} is not a file");
    };
    let entry = state.index.get(id).unwrap();
    content::translate_target(entry.target.as_deref().unwrap(), parts.len() - 1)
}

#[test]
fn s1_paths_are_tag_intersections() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/peru2018");
    mkdir(&mut state, "/paperwork");
    let id = create(&mut state, "/peru2018/paperwork/ticket.pdf");
    state.content.write_at(id, 0, b"PDF").unwrap();

    assert_eq!(visible(&state, "/"), set(&["peru2018", "paperwork"]));
    assert_eq!(hidden(&state, "/"), set(&["ticket.pdf"]));
    assert_eq!(visible(&state, "/peru2018"), set(&["paperwork"]));
    assert_eq!(hidden(&state, "/peru2018"), set(&["ticket.pdf"]));
    assert_eq!(visible(&state, "/paperwork/peru2018"), set(&["ticket.pdf"]));
    assert!(hidden(&state, "/paperwork/peru2018").is_empty());

    // Hidden is a presentation artifact; either spelling reaches the file.
    assert_eq!(
        query::resolve(&state.index, &comps("/paperwork/.ticket.pdf")).unwrap(),
        Node::File(id)
    );
    assert_eq!(state.content.read_at(id, 0, 16).unwrap(), b"PDF".to_vec());
}

#[test]
fn s2_moving_a_hidden_file_adds_tags() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/peru2018");
    mkdir(&mut state, "/paperwork");
    create(&mut state, "/peru2018/paperwork/ticket.pdf");

    // At /peru2018 the file shows as .ticket.pdf; moving it into portraits
    // must keep the tags the path did not account for.
    rename(
        &mut state,
        "/peru2018/.ticket.pdf",
        "/peru2018/portraits/ticket.pdf",
    )
    .unwrap();
    assert_eq!(
        tags_of(&state, "ticket.pdf"),
        set(&["peru2018", "paperwork", "portraits"])
    );
}

#[test]
fn s3_moving_a_plain_file_replaces_tags() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/peru2018");
    mkdir(&mut state, "/paperwork");
    create(&mut state, "/peru2018/paperwork/ticket.pdf");

    rename(
        &mut state,
        "/peru2018/paperwork/ticket.pdf",
        "/archive/ticket.pdf",
    )
    .unwrap();
    assert_eq!(tags_of(&state, "ticket.pdf"), set(&["archive"]));
    // The old tags lost their last bearer and vanish from the root.
    assert_eq!(visible(&state, "/"), set(&["archive"]));
}

#[test]
fn s4_unlink_depth_decides_scope() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/a");
    let id = create(&mut state, "/a/x");

    // Below the root only the last path tag comes off.
    unlink(&mut state, "/a/x").unwrap();
    assert_eq!(tags_of(&state, "x"), set(&[]));
    assert!(visible(&state, "/").contains("x"));

    // At the root the file is destroyed for real.
    unlink(&mut state, "/x").unwrap();
    assert!(state.index.by_name("x").is_none());
    assert!(!state.content.exists(id));
}

#[test]
fn s5_deleteme_sentinel_removes_empty_tags() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/empty");
    rename(&mut state, "/empty", "/..deleteme").unwrap();
    assert!(!visible(&state, "/").contains("empty"));
    assert!(!state.index.is_marker("empty"));

    // A borne tag refuses the sentinel just like rmdir would.
    mkdir(&mut state, "/t");
    create(&mut state, "/t/f");
    let err = rename(&mut state, "/t", "/..deleteme").unwrap_err();
    assert!(matches!(err, TagError::NotEmpty(_)));
}

#[test]
fn s6_symlink_targets_translate_with_depth() {
    let (_dir, mut state) = mount();
    state.plan_symlink(&[], "link", "target").unwrap();
    assert_eq!(readlink_at(&state, "/link"), "target");

    rename(&mut state, "/link", "/a/link").unwrap();
    assert_eq!(readlink_at(&state, "/a/link"), "../target");

    rename(&mut state, "/a/link", "/a/b/link").unwrap();
    assert_eq!(readlink_at(&state, "/a/b/link"), "../../target");

    // Absolute targets are never rewritten.
    state.plan_symlink(&[], "abs", "/etc/hosts").unwrap();
    rename(&mut state, "/abs", "/a/abs").unwrap();
    assert_eq!(readlink_at(&state, "/a/abs"), "/etc/hosts");
}

#[test]
fn index_stays_the_inverted_view_of_the_store() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/a");
    mkdir(&mut state, "/b");
    create(&mut state, "/a/one");
    create(&mut state, "/a/b/two");
    create(&mut state, "/three");
    rename(&mut state, "/a/one", "/b/one").unwrap();
    rename(&mut state, "/b", "/c").unwrap();
    unlink(&mut state, "/c/.two").unwrap();
    unlink(&mut state, "/three").unwrap();

    assert!(state.index.is_consistent());

    // The in-memory view must equal a cold rebuild from the store.
    let (entries, markers) = state.store.load().unwrap();
    let rebuilt = TagIndex::rebuild(entries, markers);
    assert_eq!(rebuilt.file_count(), state.index.file_count());
    for entry in rebuilt.files() {
        assert_eq!(
            state.index.by_name(&entry.name).map(|e| &e.tags),
            Some(&entry.tags),
            "tags diverged for {}",
            entry.name
        );
    }
}

#[test]
fn names_are_unique_mount_wide() {
    let (_dir, mut state) = mount();
    create(&mut state, "/x");
    mkdir(&mut state, "/a");

    let (prefix, name) = split("/a/x");
    let err = state.plan_create(&prefix, &name, 0o644).unwrap_err();
    assert!(matches!(err, TagError::Exists(_)));

    // A file may not take the name of a tag shown plain at its depth.
    let err = state.plan_create(&[], "a", 0o644).unwrap_err();
    assert!(matches!(err, TagError::Exists(_)));
}

#[test]
fn rename_round_trip_restores_state() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/a");
    create(&mut state, "/a/f");
    let before = tags_of(&state, "f");

    rename(&mut state, "/a/f", "/b/f").unwrap();
    assert_eq!(tags_of(&state, "f"), set(&["b"]));
    rename(&mut state, "/b/f", "/a/f").unwrap();
    assert_eq!(tags_of(&state, "f"), before);
    assert!(state.index.is_consistent());
}

#[test]
fn mkdir_is_idempotent_on_existing_tags() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/a");
    create(&mut state, "/a/f");
    mkdir(&mut state, "/b");
    create(&mut state, "/b/g");

    // Below the root, mkdir of a tag that already exists changes nothing.
    let before_tags = state.index.tag_count();
    let (prefix, name) = split("/a/b");
    state.plan_mkdir(&prefix, &name).unwrap();
    assert_eq!(state.index.tag_count(), before_tags);
    assert!(!state.index.is_marker("b"));

    // At the root an existing tag is EEXIST, also without a state change.
    let err = state.plan_mkdir(&[], "a").unwrap_err();
    assert!(matches!(err, TagError::Exists(_)));
    assert_eq!(state.index.tag_count(), before_tags);
}

#[test]
fn markers_surface_only_at_root() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/m");
    mkdir(&mut state, "/a");
    create(&mut state, "/a/f");

    assert!(visible(&state, "/").contains("m"));
    let below = project::listing(&state.index, &comps("/a"));
    assert!(!below.iter().any(|e| e.name == "m"));

    // The marker still resolves as a (vacuously empty) directory.
    assert_eq!(query::resolve(&state.index, &comps("/m")).unwrap(), Node::Dir);
    assert!(query::matching_files(&state.index, &comps("/m")).is_empty());

    state.plan_rmdir(&[], "m").unwrap();
    assert!(!visible(&state, "/").contains("m"));
}

#[test]
fn file_wins_listing_collisions() {
    let (_dir, mut state) = mount();
    mkdir(&mut state, "/a");
    create(&mut state, "/a/f");
    mkdir(&mut state, "/t");
    create(&mut state, "/t/g");

    // A file named like the tag, created where the tag is not visible.
    let (prefix, name) = (comps("/a"), "t");
    state.plan_create(&prefix, name, 0o644).unwrap();

    let root = project::listing(&state.index, &[]);
    let hits: Vec<_> = root.iter().filter(|e| e.name == "t").collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, EntryKind::File);
}

#[test]
fn unlink_while_open_defers_object_deletion() {
    let (_dir, mut state) = mount();
    let id = create(&mut state, "/f");
    state.handles.lock().unwrap().acquire(id);

    unlink(&mut state, "/f").unwrap();
    assert!(state.index.by_name("f").is_none());
    assert!(state.content.exists(id));

    // The last release reports the object as deletable; the drive removes it.
    assert!(state.handles.lock().unwrap().release(id));
}

#[test]
fn grammar_gates_every_destination() {
    let (_dir, mut state) = mount();
    assert!(matches!(
        state.plan_create(&[], ".hidden", 0o644).unwrap_err(),
        TagError::IllegalName(_)
    ));
    assert!(matches!(
        state.plan_mkdir(&[], "trailing.").unwrap_err(),
        TagError::IllegalName(_)
    ));
    create(&mut state, "/f");
    assert!(matches!(
        rename(&mut state, "/f", "/..").unwrap_err(),
        TagError::IllegalName(_)
    ));
}

#[test]
fn state_survives_a_remount() {
    let dir = TempDir::new().unwrap();
    {
        let mut state = MountState::open(dir.path()).unwrap();
        mkdir(&mut state, "/trip");
        mkdir(&mut state, "/pending");
        let id = create(&mut state, "/trip/itinerary");
        state.content.write_at(id, 0, b"day one").unwrap();
    }
    let state = MountState::open(dir.path()).unwrap();
    assert_eq!(visible(&state, "/"), set(&["trip", "pending"]));
    assert_eq!(visible(&state, "/trip"), set(&["itinerary"]));
    assert!(state.index.is_marker("pending"));
    let Node::File(id) = query::resolve(&state.index, &comps("/trip/itinerary")).unwrap() else {
        panic!("itinerary did not survive the remount");
    };
    assert_eq!(state.content.read_at(id, 0, 32).unwrap(), b"day one".to_vec());
}
