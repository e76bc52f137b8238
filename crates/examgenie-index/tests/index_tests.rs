use std::fs;

use examgenie_core::error::Error;
use examgenie_core::types::{BackendKind, Chunk, IndexEntry, IndexManifest};
use examgenie_index::persist::{current_generation, CURRENT_FILE, ENTRIES_FILE, MANIFEST_FILE};
use examgenie_index::VectorIndex;

fn entry(doc: &str, i: usize, vector: Vec<f32>) -> IndexEntry {
    let text = format!("{} passage {}", doc, i);
    IndexEntry {
        chunk: Chunk {
            id: format!("{}_{}", doc, i),
            doc_id: doc.to_string(),
            chunk_index: i,
            start: i * 10,
            end: i * 10 + text.chars().count(),
            text,
        },
        vector,
    }
}

fn manifest(fingerprint: &str) -> IndexManifest {
    IndexManifest::new(BackendKind::Local, "local:hashing:d3", 3, fingerprint)
}

fn sample() -> Vec<IndexEntry> {
    vec![
        entry("a.txt", 0, vec![1.0, 0.0, 0.0]),
        entry("a.txt", 1, vec![0.0, 1.0, 0.0]),
        entry("b.txt", 0, vec![0.7, 0.7, 0.0]),
        entry("b.txt", 1, vec![0.0, 0.0, 1.0]),
    ]
}

fn ids(index: &VectorIndex, q: &[f32], k: usize) -> Vec<String> {
    index.query(q, k).unwrap().into_iter().map(|h| h.chunk.id).collect()
}

#[test]
fn exact_match_ranks_first_with_full_score() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path().join("db"));
    index.build(sample(), manifest("fp")).unwrap();

    let result = index.query(&[0.0, 1.0, 0.0], 2).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.hits[0].chunk.id, "a.txt_1");
    assert!((result.hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(result.hits[1].chunk.id, "b.txt_0");
    assert!(result.hits[0].score >= result.hits[1].score);
}

#[test]
fn k_caps_result_length() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();

    assert_eq!(index.query(&[1.0, 1.0, 1.0], 1).unwrap().len(), 1);
    assert_eq!(index.query(&[1.0, 1.0, 1.0], 50).unwrap().len(), 4);
    assert!(matches!(index.query(&[1.0, 1.0, 1.0], 0), Err(Error::Config(_))));
}

#[test]
fn ties_keep_insertion_order() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    let entries = vec![
        entry("z.txt", 0, vec![0.0, 1.0, 0.0]),
        entry("a.txt", 0, vec![1.0, 0.0, 0.0]),
        entry("m.txt", 0, vec![2.0, 0.0, 0.0]),
        entry("b.txt", 0, vec![0.5, 0.0, 0.0]),
    ];
    index.build(entries, manifest("fp")).unwrap();

    assert_eq!(ids(&index, &[1.0, 0.0, 0.0], 3), vec!["a.txt_0", "m.txt_0", "b.txt_0"]);
}

#[test]
fn empty_index_returns_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(tmp.path());
    assert!(index.is_empty());
    assert!(index.query(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());

    let mut built = VectorIndex::open(tmp.path().join("built"));
    built.build(Vec::new(), manifest("fp")).unwrap();
    assert!(built.query(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
    assert_eq!(built.manifest().unwrap().chunk_count, 0);
}

#[test]
fn wrong_dimensions_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());

    let mut entries = sample();
    entries.push(entry("c.txt", 0, vec![1.0, 2.0]));
    match index.build(entries, manifest("fp")) {
        Err(Error::DimensionMismatch { expected: 3, actual: 2 }) => {}
        other => panic!("expected DimensionMismatch, got {:?}", other),
    }
    assert!(current_generation(tmp.path()).unwrap().is_none());

    index.build(sample(), manifest("fp")).unwrap();
    assert!(matches!(
        index.query(&[1.0, 0.0], 2),
        Err(Error::DimensionMismatch { expected: 3, actual: 2 })
    ));
}

#[test]
fn reload_in_fresh_instance_gives_same_results() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();
    let before = index.query(&[0.2, 0.9, 0.1], 4).unwrap();

    let mut reopened = VectorIndex::open(tmp.path());
    let loaded = reopened.load().expect("index should load");
    assert_eq!(loaded.fingerprint, "fp");
    assert_eq!(loaded.chunk_count, 4);
    assert!(loaded.built_at.is_some());
    assert_eq!(reopened.len(), 4);

    let after = reopened.query(&[0.2, 0.9, 0.1], 4).unwrap();
    assert_eq!(before, after);
}

#[test]
fn validity_needs_matching_provenance() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    assert!(!index.is_valid(&manifest("fp")));

    index.build(sample(), manifest("fp")).unwrap();
    assert!(index.is_valid(&manifest("fp")));
    assert!(!index.is_valid(&manifest("other")));
    assert!(!index.is_valid(&IndexManifest::new(BackendKind::External, "local:hashing:d3", 3, "fp")));
    assert!(!index.is_valid(&IndexManifest::new(BackendKind::Local, "local:bge-m3:d1024", 3, "fp")));
}

#[test]
fn rebuild_replaces_previous_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("one")).unwrap();
    let first_gen = current_generation(tmp.path()).unwrap().unwrap();

    index.build(vec![entry("new.txt", 0, vec![0.0, 1.0, 0.0])], manifest("two")).unwrap();
    let second_gen = current_generation(tmp.path()).unwrap().unwrap();
    assert_ne!(first_gen, second_gen);
    assert!(!first_gen.exists());

    let mut reopened = VectorIndex::open(tmp.path());
    assert_eq!(reopened.load().unwrap().fingerprint, "two");
    assert_eq!(ids(&reopened, &[1.0, 0.0, 0.0], 10), vec!["new.txt_0"]);
}

#[test]
fn missing_pointer_is_no_index() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();
    fs::remove_file(tmp.path().join(CURRENT_FILE)).unwrap();

    let mut reopened = VectorIndex::open(tmp.path());
    assert!(reopened.load().is_none());
    assert!(reopened.is_empty());
}

#[test]
fn garbage_manifest_is_not_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();
    let gen = current_generation(tmp.path()).unwrap().unwrap();
    fs::write(gen.join(MANIFEST_FILE), b"{not json").unwrap();

    assert!(VectorIndex::open(tmp.path()).load().is_none());
}

#[test]
fn truncated_entries_are_not_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();
    let gen = current_generation(tmp.path()).unwrap().unwrap();
    let bytes = fs::read(gen.join(ENTRIES_FILE)).unwrap();
    fs::write(gen.join(ENTRIES_FILE), &bytes[..bytes.len() / 2]).unwrap();

    let mut reopened = VectorIndex::open(tmp.path());
    assert!(reopened.load().is_none());
    assert!(reopened.query(&[1.0, 0.0, 0.0], 2).unwrap().is_empty());
}

#[test]
fn pointer_to_missing_generation_is_not_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join(CURRENT_FILE), "gen-does-not-exist").unwrap();
    assert!(VectorIndex::open(tmp.path()).load().is_none());

    fs::write(tmp.path().join(CURRENT_FILE), "../elsewhere").unwrap();
    assert!(VectorIndex::open(tmp.path()).load().is_none());
}

#[test]
fn manifest_count_must_match_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("fp")).unwrap();
    let gen = current_generation(tmp.path()).unwrap().unwrap();

    let mut m: IndexManifest = serde_json::from_slice(&fs::read(gen.join(MANIFEST_FILE)).unwrap()).unwrap();
    m.chunk_count = 7;
    fs::write(gen.join(MANIFEST_FILE), serde_json::to_vec(&m).unwrap()).unwrap();

    assert!(VectorIndex::open(tmp.path()).load().is_none());
}

#[test]
fn uncommitted_generation_is_invisible() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("committed")).unwrap();
    let expected = index.query(&[0.2, 0.9, 0.1], 4).unwrap();

    // Leftover from a writer that died before writing its manifest.
    let stray = tmp.path().join("gen-01ARZ3NDEKTSV4RRFFQ69G5FAV");
    fs::create_dir(&stray).unwrap();
    fs::write(stray.join(ENTRIES_FILE), b"partial").unwrap();

    let mut reopened = VectorIndex::open(tmp.path());
    assert_eq!(reopened.load().expect("committed index").fingerprint, "committed");
    assert_eq!(reopened.query(&[0.2, 0.9, 0.1], 4).unwrap(), expected);
    assert_ne!(current_generation(tmp.path()).unwrap().unwrap(), stray);
}

#[test]
fn failed_build_keeps_previous_index() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = VectorIndex::open(tmp.path());
    index.build(sample(), manifest("first")).unwrap();
    let committed = current_generation(tmp.path()).unwrap().unwrap();

    let mut bad = sample();
    bad.push(entry("c.txt", 0, vec![1.0]));
    assert!(matches!(index.build(bad, manifest("second")), Err(Error::DimensionMismatch { .. })));

    assert_eq!(current_generation(tmp.path()).unwrap().unwrap(), committed);
    let mut reopened = VectorIndex::open(tmp.path());
    let loaded = reopened.load().expect("previous index");
    assert_eq!(loaded.fingerprint, "first");
    assert_eq!(loaded.chunk_count, 4);
    assert_eq!(ids(&reopened, &[0.0, 1.0, 0.0], 1), vec!["a.txt_1"]);
}
