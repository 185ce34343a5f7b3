use lsmlite::iterator::KvIterator;
use lsmlite::redis::dispatch;
use lsmlite::{Config, LsmEngine, RedisStore};
use std::sync::Arc;
use std::time::Duration;

fn small_config() -> Config {
    Config {
        per_mem_size_limit: 4096,
        total_mem_size_limit: 16384,
        sst_level_ratio: 4,
        block_size: 1024,
        ..Config::default()
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:04}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("v{:04}", i).into_bytes()
}

#[test]
fn test_flush_all_round_trip() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

    for i in 0..10_000 {
        engine.put(&key(i % 10_000), &value(i)).unwrap();
    }
    engine.flush_all().unwrap();

    for i in (0..10_000).step_by(113) {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
    }

    let mut iter = engine.scan().unwrap();
    let mut count = 0;
    let mut prev: Option<Vec<u8>> = None;
    while iter.is_valid() {
        if let Some(p) = &prev {
            assert!(p.as_slice() < iter.key());
        }
        prev = Some(iter.key().to_vec());
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 10_000);
}

#[test]
fn test_tombstone_masks_older_levels() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

    engine.put(b"k", b"a").unwrap();
    engine.flush().unwrap();
    engine.put(b"k", b"b").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"b".to_vec()));

    engine.remove(b"k").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn test_compaction_keeps_latest_values() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = small_config();
    config.per_mem_size_limit = 1 << 16;
    config.total_mem_size_limit = 1 << 20;
    let engine = LsmEngine::open_with_config(dir.path(), config).unwrap();

    for round in 0..5 {
        for i in 0..1000 {
            engine
                .put(&key(i), format!("r{}_{:04}", round, i).as_bytes())
                .unwrap();
        }
        engine.flush().unwrap();
    }

    assert!(engine.sst_count(0) <= 4);
    assert!(engine.sst_count(1) >= 1);
    for i in (0..1000).step_by(17) {
        assert_eq!(
            engine.get(&key(i)).unwrap(),
            Some(format!("r4_{:04}", i).into_bytes())
        );
    }
}

#[test]
fn test_reopen_after_drop() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    {
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();
        for i in 0..3000 {
            engine.put(&key(i), &value(i)).unwrap();
        }
    }
    let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();
    for i in (0..3000).step_by(59) {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
    }
}

#[test]
fn test_ttl_lazy_expiry() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    assert_eq!(dispatch(&store, &to_args(&["SET", "a", "1"])), "+OK\r\n");
    assert_eq!(dispatch(&store, &to_args(&["EXPIRE", "a", "1"])), ":1\r\n");
    std::thread::sleep(Duration::from_secs(2));

    assert_eq!(dispatch(&store, &to_args(&["GET", "a"])), "$-1\r\n");
    assert_eq!(dispatch(&store, &to_args(&["TTL", "a"])), ":-2\r\n");
    // stays gone, and the expire record was cleaned by the GET above
    assert_eq!(dispatch(&store, &to_args(&["GET", "a"])), "$-1\r\n");
}

#[test]
fn test_hash_lifecycle_end_to_end() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    dispatch(&store, &to_args(&["HSET", "h", "f1", "v1"]));
    dispatch(&store, &to_args(&["HSET", "h", "f2", "v2"]));
    assert_eq!(
        dispatch(&store, &to_args(&["HKEYS", "h"])),
        "*2\r\n$2\r\nf1\r\n$2\r\nf2\r\n"
    );

    assert_eq!(dispatch(&store, &to_args(&["HDEL", "h", "f1"])), ":1\r\n");
    assert_eq!(
        dispatch(&store, &to_args(&["HKEYS", "h"])),
        "*1\r\n$2\r\nf2\r\n"
    );

    assert_eq!(dispatch(&store, &to_args(&["HDEL", "h", "f2"])), ":1\r\n");
    assert_eq!(dispatch(&store, &to_args(&["GET", "h"])), "$-1\r\n");
}

#[test]
fn test_zset_scenario() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    assert_eq!(
        dispatch(&store, &to_args(&["ZADD", "z", "10", "a", "5", "b", "20", "c"])),
        ":3\r\n"
    );
    assert_eq!(
        dispatch(&store, &to_args(&["ZRANGE", "z", "0", "-1"])),
        "*3\r\n$1\r\nb\r\n$1\r\na\r\n$1\r\nc\r\n"
    );
    assert_eq!(dispatch(&store, &to_args(&["ZRANK", "z", "a"])), ":1\r\n");

    assert_eq!(dispatch(&store, &to_args(&["ZINCRBY", "z", "100", "b"])), ":105\r\n");
    assert_eq!(
        dispatch(&store, &to_args(&["ZRANGE", "z", "0", "-1"])),
        "*3\r\n$1\r\na\r\n$1\r\nc\r\n$1\r\nb\r\n"
    );
}

#[test]
fn test_zset_survives_flush() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    for i in 0..200 {
        dispatch(
            &store,
            &to_args(&["ZADD", "big", &i.to_string(), &format!("m{:03}", i)]),
        );
    }
    store.flush_all().unwrap();

    assert_eq!(dispatch(&store, &to_args(&["ZCARD", "big"])), ":200\r\n");
    assert_eq!(
        dispatch(&store, &to_args(&["ZRANGE", "big", "0", "2"])),
        "*3\r\n$4\r\nm000\r\n$4\r\nm001\r\n$4\r\nm002\r\n"
    );
    assert_eq!(dispatch(&store, &to_args(&["ZSCORE", "big", "m123"])), "$3\r\n123\r\n");
}

#[test]
fn test_list_boundaries() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    assert_eq!(dispatch(&store, &to_args(&["LPOP", "missing"])), "$-1\r\n");
    assert_eq!(dispatch(&store, &to_args(&["LLEN", "missing"])), ":0\r\n");

    dispatch(&store, &to_args(&["RPUSH", "l", "x"]));
    dispatch(&store, &to_args(&["RPUSH", "l", "y"]));
    dispatch(&store, &to_args(&["RPUSH", "l", "z"]));
    assert_eq!(
        dispatch(&store, &to_args(&["LRANGE", "l", "-100", "100"])),
        "*3\r\n$1\r\nx\r\n$1\r\ny\r\n$1\r\nz\r\n"
    );
    assert_eq!(dispatch(&store, &to_args(&["LRANGE", "l", "2", "1"])), "*0\r\n");
}

#[test]
fn test_del_hash_removes_fields() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store = RedisStore::open_with_config(dir.path(), small_config()).unwrap();

    dispatch(&store, &to_args(&["HSET", "h", "f", "v"]));
    assert_eq!(dispatch(&store, &to_args(&["DEL", "h"])), ":1\r\n");
    assert_eq!(dispatch(&store, &to_args(&["HGET", "h", "f"])), "$-1\r\n");
}

#[test]
fn test_concurrent_incr() {
    let _ = env_logger::try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let store =
        Arc::new(RedisStore::open_with_config(dir.path(), small_config()).unwrap());

    let threads = 8;
    let per_thread = 25;
    let mut handles = Vec::new();
    for _ in 0..threads {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..per_thread {
                dispatch(&store, &to_args(&["INCR", "counter"]));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        dispatch(&store, &to_args(&["GET", "counter"])),
        format!("${}\r\n{}\r\n", 3, threads * per_thread)
    );
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
