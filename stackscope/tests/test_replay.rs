use std::io::Cursor;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use stackscope::calltree::{CallTree, CallTreeNode, Forest};
use stackscope::domain::Timestamp;
use stackscope::sampling::{ReplaySource, Sampler, SamplerConfig};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/replay_small.jsonl")
}

fn find<'a>(tree: &'a CallTree, name: &str) -> &'a CallTreeNode {
    tree.nodes()
        .iter()
        .find(|n| n.frame.as_ref().is_some_and(|m| m.name == name))
        .unwrap_or_else(|| panic!("no node named {name}"))
}

#[test]
fn test_sampler_replays_dump_file() {
    let source = ReplaySource::from_path(fixture()).expect("Failed to load fixture");
    assert_eq!(source.len(), 7);

    let config = SamplerConfig {
        interval: Duration::from_millis(1),
        ..SamplerConfig::default()
    };
    let sampler = Sampler::start(source, config).expect("Failed to start sampler");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !sampler.is_finished() {
        assert!(Instant::now() < deadline, "sampler did not drain the fixture");
        std::thread::sleep(Duration::from_millis(5));
    }
    let result = sampler.stop().expect("Failed to stop sampler");

    assert_eq!(result.stats.ticks, 6);
    assert_eq!(result.stats.ticks_abandoned, 1);
    assert_eq!(result.stats.thread_samples, 4);
    assert_eq!(result.stats.empty_stacks, 1);

    let forest = result.forest;
    assert_eq!(forest.thread_names().collect::<Vec<_>>(), vec!["main"]);
    let tree = forest.get("main").unwrap();
    assert!(tree.is_closed());

    let a = find(tree, "A");
    assert_eq!((a.start, a.end), (Timestamp(5), Some(Timestamp(45))));
    let b = find(tree, "B");
    assert_eq!((b.start, b.end), (Timestamp(5), Some(Timestamp(25))));
    let c = find(tree, "C");
    assert_eq!((c.start, c.end), (Timestamp(15), Some(Timestamp(25))));
    let d = find(tree, "D");
    assert_eq!((d.start, d.end), (Timestamp(45), Some(Timestamp(45))));
    assert_eq!(d.frame.as_ref().unwrap().namespace, "com.example.Main");
}

#[test]
fn test_children_nest_inside_parents() {
    let source = ReplaySource::from_path(fixture()).unwrap();
    let sampler = Sampler::start(source, SamplerConfig::default()).unwrap();
    while !sampler.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let forest = sampler.stop().unwrap().forest;

    assert_nested(&forest);
}

fn assert_nested(forest: &Forest) {
    for tree in forest.trees() {
        for (_, node) in tree.walk() {
            let Some(parent) = node.parent.and_then(|p| tree.node(p)) else {
                continue;
            };
            assert_eq!(node.depth, parent.depth + 1);
            assert!(node.start >= parent.start);
            assert!(node.end.unwrap() <= parent.end.unwrap());
        }
    }
}

fn replay_to_forest(dumps: &str) -> Forest {
    let source = ReplaySource::from_reader(Cursor::new(dumps.to_string())).unwrap();
    let sampler = Sampler::start(source, SamplerConfig::default()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !sampler.is_finished() {
        assert!(Instant::now() < deadline, "sampler did not drain the dumps");
        std::thread::sleep(Duration::from_millis(5));
    }
    sampler.stop().unwrap().forest
}

#[test]
fn test_untimed_dump_after_recorded_time_keeps_nesting() {
    let forest = replay_to_forest(concat!(
        r#"{"time_ns": 1000000000000, "threads": [{"name": "main", "frames": [{"method": "A"}]}]}"#,
        "\n",
        r#"{"threads": [{"name": "main", "frames": [{"method": "B"}, {"method": "A"}]}]}"#,
        "\n",
    ));

    let tree = forest.get("main").unwrap();
    let a = find(tree, "A");
    let b = find(tree, "B");
    assert!(b.start >= a.start);
    assert!(b.start >= Timestamp(1_000_000_000_000));
    assert_nested(&forest);
}

#[test]
fn test_backwards_dump_time_keeps_nesting() {
    let forest = replay_to_forest(concat!(
        r#"{"time_ns": 1000, "threads": [{"name": "main", "frames": [{"method": "A"}]}]}"#,
        "\n",
        r#"{"time_ns": 10, "threads": [{"name": "main", "frames": [{"method": "B"}, {"method": "A"}]}]}"#,
        "\n",
        r#"{"time_ns": 2000, "threads": [{"name": "main", "frames": [{"method": "A"}]}]}"#,
        "\n",
    ));

    let tree = forest.get("main").unwrap();
    let a = find(tree, "A");
    let b = find(tree, "B");
    assert!(b.start >= a.start);
    assert_eq!(b.start, Timestamp(1000));
    assert_nested(&forest);
}
