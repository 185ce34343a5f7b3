//! Maps argv-style command lines onto store operations, with arity checks.

use super::{resp, RedisStore};

fn wrong_arity(cmd: &str) -> String {
    resp::err(&format!(
        "wrong number of arguments for '{}' command",
        cmd
    ))
}

/// Execute one command and return the RESP-framed reply. Engine failures
/// surface as `-ERR` replies rather than panics.
pub fn dispatch(store: &RedisStore, args: &[String]) -> String {
    if args.is_empty() {
        return resp::err("empty command");
    }
    let cmd = args[0].to_ascii_uppercase();
    let result = match (cmd.as_str(), args.len()) {
        ("SET", 3) => store.set(&args[1], &args[2]),
        ("SET", _) => Ok(wrong_arity("set")),
        ("GET", 2) => store.get(&args[1]),
        ("GET", _) => Ok(wrong_arity("get")),
        ("DEL", n) if n >= 2 => store.del(&args[1..]),
        ("DEL", _) => Ok(wrong_arity("del")),
        ("INCR", 2) => store.incr(&args[1]),
        ("INCR", _) => Ok(wrong_arity("incr")),
        ("DECR", 2) => store.decr(&args[1]),
        ("DECR", _) => Ok(wrong_arity("decr")),
        ("EXPIRE", 3) => store.expire(&args[1], &args[2]),
        ("EXPIRE", _) => Ok(wrong_arity("expire")),
        ("TTL", 2) => store.ttl(&args[1]),
        ("TTL", _) => Ok(wrong_arity("ttl")),

        ("HSET", 4) => store.hset(&args[1], &args[2], &args[3]),
        ("HSET", _) => Ok(wrong_arity("hset")),
        ("HGET", 3) => store.hget(&args[1], &args[2]),
        ("HGET", _) => Ok(wrong_arity("hget")),
        ("HDEL", 3) => store.hdel(&args[1], &args[2]),
        ("HDEL", _) => Ok(wrong_arity("hdel")),
        ("HKEYS", 2) => store.hkeys(&args[1]),
        ("HKEYS", _) => Ok(wrong_arity("hkeys")),

        ("LPUSH", 3) => store.lpush(&args[1], &args[2]),
        ("LPUSH", _) => Ok(wrong_arity("lpush")),
        ("RPUSH", 3) => store.rpush(&args[1], &args[2]),
        ("RPUSH", _) => Ok(wrong_arity("rpush")),
        ("LPOP", 2) => store.lpop(&args[1]),
        ("LPOP", _) => Ok(wrong_arity("lpop")),
        ("RPOP", 2) => store.rpop(&args[1]),
        ("RPOP", _) => Ok(wrong_arity("rpop")),
        ("LLEN", 2) => store.llen(&args[1]),
        ("LLEN", _) => Ok(wrong_arity("llen")),
        ("LRANGE", 4) => store.lrange(&args[1], &args[2], &args[3]),
        ("LRANGE", _) => Ok(wrong_arity("lrange")),

        ("ZADD", n) if n >= 4 && n % 2 == 0 => store.zadd(&args[1], &args[2..]),
        ("ZADD", _) => Ok(wrong_arity("zadd")),
        ("ZREM", n) if n >= 3 => store.zrem(&args[1], &args[2..]),
        ("ZREM", _) => Ok(wrong_arity("zrem")),
        ("ZRANGE", 4) => store.zrange(&args[1], &args[2], &args[3]),
        ("ZRANGE", _) => Ok(wrong_arity("zrange")),
        ("ZCARD", 2) => store.zcard(&args[1]),
        ("ZCARD", _) => Ok(wrong_arity("zcard")),
        ("ZSCORE", 3) => store.zscore(&args[1], &args[2]),
        ("ZSCORE", _) => Ok(wrong_arity("zscore")),
        ("ZINCRBY", 4) => store.zincrby(&args[1], &args[2], &args[3]),
        ("ZINCRBY", _) => Ok(wrong_arity("zincrby")),
        ("ZRANK", 3) => store.zrank(&args[1], &args[2]),
        ("ZRANK", _) => Ok(wrong_arity("zrank")),

        _ => Ok(resp::err(&format!("unknown command '{}'", args[0]))),
    };
    match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!("command {:?} failed: {}", cmd, e);
            resp::err(&e.to_string())
        }
    }
}
