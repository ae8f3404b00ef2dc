//! End to end: record the demo frame on one soft device, load and replay
//! it on another.

use crate::chunks::SoftChunk;
use crate::demo::{CLEAR_COLOUR, DEMO_WIDTH, Demo, DemoSchedule, PIPELINE_COLOURS, record_demo};
use crate::device::SoftDevice;
use crate::replay::{SoftReplayer, dispatch_table};
use bytes::{Bytes, BytesMut};
use framecap_chunk::{CaptureFile, ChunkClass, StreamReader};
use framecap_core::{CoreError, ResourceId};
use framecap_replay::{ActionDescription, ActionFlags, ReplayEngine, ReplayOptions, ReplayState};
use proptest::prelude::*;

fn engine() -> ReplayEngine<SoftReplayer> {
    ReplayEngine::new(
        SoftReplayer::new(SoftDevice::new()),
        dispatch_table().unwrap(),
        ReplayOptions::default(),
    )
}

fn loaded(demo: &Demo) -> ReplayEngine<SoftReplayer> {
    let mut engine = engine();
    engine.load(&demo.file).unwrap();
    engine
}

fn target_pixels(engine: &ReplayEngine<SoftReplayer>, demo: &Demo) -> Vec<u32> {
    let native = engine.resources().live_native(demo.target).unwrap();
    engine.backend().device().read_texture(native).unwrap()
}

/// Kind, scope and stream offset of every chunk recorded inside a scope
fn scoped_chunks(file: &CaptureFile) -> Vec<(SoftChunk, ResourceId, u64)> {
    let mut reader = StreamReader::open(file.frame_capture.clone()).unwrap();
    let mut chunks = Vec::new();
    while let Some(read) = reader.read_chunk().unwrap() {
        let Ok(ChunkClass::Driver(kind)) = read.chunk.kind().classify() else {
            continue;
        };
        let soft = SoftChunk::from_kind(kind).unwrap();
        if matches!(
            soft,
            SoftChunk::CreateBuffer
                | SoftChunk::CreateTexture
                | SoftChunk::CreatePipeline
                | SoftChunk::Present
        ) {
            continue;
        }
        let scope = read.chunk.reader().read_resource("scope").unwrap();
        chunks.push((soft, scope, read.offset));
    }
    chunks
}

fn find_action<'a>(actions: &'a [ActionDescription], name: &str) -> Option<&'a ActionDescription> {
    let mut found = None;
    for action in actions {
        action.walk(&mut |candidate| {
            if found.is_none() && candidate.name == name {
                found = Some(candidate);
            }
        });
    }
    found
}

#[test]
fn test_scopes_logged_in_submission_order() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let chunks = scoped_chunks(&demo.file);

    let commits: Vec<ResourceId> = chunks
        .iter()
        .filter(|(kind, _, _)| *kind == SoftChunk::Commit)
        .map(|(_, scope, _)| *scope)
        .collect();
    assert_eq!(commits, demo.scopes.to_vec());

    let mut owners: Vec<ResourceId> = chunks.iter().map(|(_, scope, _)| *scope).collect();
    owners.dedup();
    assert_eq!(owners, demo.scopes.to_vec(), "scope chunks must be contiguous");
}

#[test]
fn test_cpu_write_recorded_in_first_committed_scope() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let chunks = scoped_chunks(&demo.file);
    let diff = chunks
        .iter()
        .position(|(kind, _, _)| *kind == SoftChunk::BufferDidModify)
        .unwrap();
    assert_eq!(chunks[diff].1, demo.scopes[2]);
    assert_eq!(chunks[diff + 1].0, SoftChunk::Commit);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_log_identical_across_interleavings(seed in any::<u64>()) {
        let reference = record_demo(DemoSchedule::default()).unwrap().file.to_bytes().unwrap();
        let demo = record_demo(DemoSchedule::from_seed(seed)).unwrap();
        prop_assert_eq!(demo.file.to_bytes().unwrap(), reference);
    }
}

#[test]
fn test_load_builds_scope_timeline() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let engine = loaded(&demo);
    assert_eq!(engine.state(), ReplayState::ActiveReplaying);

    let infos: Vec<_> = demo
        .scopes
        .iter()
        .map(|scope| *engine.scope_info(*scope).unwrap())
        .collect();
    for pair in infos.windows(2) {
        assert_eq!(pair[1].start_event_id, pair[0].end_event_id + 1);
        assert!(!pair[1].interleaved);
    }
    // CaptureBegin, then A's start boundary
    assert_eq!(infos[0].start_event_id, 2);
    // Present and CaptureEnd follow C
    assert_eq!(engine.last_event(), infos[2].end_event_id + 2);

    let shading = find_action(engine.actions(), "shading").unwrap();
    assert!(shading.flags.contains(ActionFlags::PUSH_MARKER));
    let children: Vec<&str> = shading.children.iter().map(|c| c.name.as_str()).collect();
    assert!(children.contains(&"Draw(2, 3)"));
    assert!(children.contains(&"Draw(4, 1)"));
    assert!(find_action(engine.actions(), "Present").is_some());
    assert_eq!(engine.backend().frame_objects(), Some(7));
}

#[test]
fn test_full_replay_matches_capture() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let mut engine = loaded(&demo);
    assert_eq!(target_pixels(&engine, &demo), demo.pixels);

    let last = engine.last_event();
    engine.replay_log(1, last, false).unwrap();
    assert_eq!(target_pixels(&engine, &demo), demo.pixels);
    assert_eq!(engine.presented(), demo.target);
}

#[test]
fn test_full_replay_stops_inside_scope() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let mut engine = loaded(&demo);
    let a = *engine.scope_info(demo.scopes[0]).unwrap();
    let first_draw = (a.start_event_id..=a.end_event_id)
        .find(|event| {
            engine
                .action(*event)
                .is_some_and(|action| action.flags.contains(ActionFlags::DRAW))
        })
        .unwrap();
    engine.replay_log(1, first_draw - 1, false).unwrap();
    assert_eq!(
        target_pixels(&engine, &demo),
        vec![CLEAR_COLOUR; DEMO_WIDTH as usize]
    );

    engine.replay_log(1, first_draw, false).unwrap();
    let pixels = target_pixels(&engine, &demo);
    assert_eq!(pixels[..3], [PIPELINE_COLOURS[0], PIPELINE_COLOURS[0] + 1, PIPELINE_COLOURS[0] + 2]);
    assert_eq!(pixels[3], CLEAR_COLOUR);
}

#[test]
fn test_partial_replay_matches_full_replay_inside_second_scope() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let b = demo.scopes[1];
    let info = *loaded(&demo).scope_info(b).unwrap();

    for event in info.start_event_id..=info.end_event_id {
        let mut full = loaded(&demo);
        full.replay_log(1, event, false).unwrap();

        let mut partial = loaded(&demo);
        partial.replay_log(1, event - 1, false).unwrap();
        partial.replay_log(event, event, true).unwrap();

        assert_eq!(partial.tracker(b), full.tracker(b), "tracker at event {event}");
        assert_eq!(
            target_pixels(&partial, &demo),
            target_pixels(&full, &demo),
            "pixels at event {event}"
        );
    }
}

#[test]
fn test_partial_replay_through_second_scope() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let last_of_b = loaded(&demo).scope_info(demo.scopes[1]).unwrap().end_event_id;

    let mut full = loaded(&demo);
    full.replay_log(1, last_of_b, false).unwrap();
    let mut partial = loaded(&demo);
    partial.replay_log(1, last_of_b, true).unwrap();

    for scope in demo.scopes {
        assert_eq!(partial.tracker(scope), full.tracker(scope));
    }
    // C only ran during load, so only A and B's pixels are comparable
    assert_eq!(
        target_pixels(&partial, &demo)[..5],
        target_pixels(&full, &demo)[..5]
    );
}

#[test]
fn test_corrupted_scope_chunk_latches() {
    let demo = record_demo(DemoSchedule::default()).unwrap();
    let (_, _, offset) = scoped_chunks(&demo.file)
        .into_iter()
        .find(|(kind, scope, _)| *kind == SoftChunk::Draw && *scope == demo.scopes[1])
        .unwrap();

    let mut stream = BytesMut::from(demo.file.frame_capture.as_ref());
    stream[offset as usize + 20] ^= 0xff;
    let damaged = CaptureFile {
        frame_capture: Bytes::from(stream),
        ..demo.file.clone()
    };

    let mut engine = engine();
    let err = engine.load(&damaged).unwrap_err();
    assert!(matches!(err, CoreError::ApiDataCorrupted { .. }), "{err}");
    assert_eq!(engine.fatal_error(), Some(&err));
    assert_eq!(engine.replay_log(1, 1, false).unwrap_err(), err);
}
