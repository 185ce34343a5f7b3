//! Richer data models (strings with TTL, hashes, lists, sorted sets)
//! projected onto the ordered key-value store through encoded key prefixes.
//!
//! Every operation coordinates through one process-wide reader/writer lock,
//! separate from the engine's internal lock. Expiry is lazy: a reader that
//! notices an expired structure releases its shared lock, takes the
//! exclusive one, re-verifies, and only then cleans up.

mod command;
pub mod resp;

pub use command::dispatch;

use crate::config::{
    Config, EXPIRE_PREFIX, FIELD_PREFIX, HASH_FIELD_SEPARATOR, HASH_VALUE_PREFIX, LIST_SEPARATOR,
    ZSET_ELEM_INFIX, ZSET_PREFIX, ZSET_SCORE_INFIX, ZSET_SCORE_WIDTH,
};
use crate::db::LsmEngine;
use crate::error::LsmLiteError;
use crate::iterator::KvIterator;
use crate::Result;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn expire_key(key: &str) -> String {
    format!("{}{}", EXPIRE_PREFIX, key)
}

fn hash_field_key(key: &str, field: &str) -> String {
    format!("{}{}_{}", FIELD_PREFIX, key, field)
}

fn fields_from_directory(value: Option<&str>) -> Vec<String> {
    match value.and_then(|v| v.strip_prefix(HASH_VALUE_PREFIX)) {
        Some(list) if !list.is_empty() => list
            .split(HASH_FIELD_SEPARATOR)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn directory_from_fields(fields: &[String]) -> String {
    let mut out = String::from(HASH_VALUE_PREFIX);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(HASH_FIELD_SEPARATOR);
        }
        out.push_str(field);
    }
    out
}

fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(LIST_SEPARATOR).map(str::to_string).collect()
    }
}

fn join_list(elements: &[String]) -> String {
    let mut out = String::new();
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            out.push(LIST_SEPARATOR);
        }
        out.push_str(element);
    }
    out
}

fn zset_prefix(key: &str) -> String {
    format!("{}{}_", ZSET_PREFIX, key)
}

fn zset_score_prefix(key: &str) -> String {
    format!("{}{}{}", ZSET_PREFIX, key, ZSET_SCORE_INFIX)
}

fn zset_score_key(key: &str, score: i64) -> String {
    format!(
        "{}{}{}{:0width$}",
        ZSET_PREFIX,
        key,
        ZSET_SCORE_INFIX,
        score,
        width = ZSET_SCORE_WIDTH
    )
}

fn zset_elem_key(key: &str, member: &str) -> String {
    format!("{}{}{}{}", ZSET_PREFIX, key, ZSET_ELEM_INFIX, member)
}

/// Three-valued classifier for "starts with `prefix`", monotone over the
/// key order: negative below the prefix range, zero within, positive above.
fn prefix_pred(key: &[u8], prefix: &[u8]) -> i32 {
    let head = &key[..key.len().min(prefix.len())];
    match head.cmp(prefix) {
        Ordering::Less => -1,
        Ordering::Greater => 1,
        Ordering::Equal => {
            if key.len() >= prefix.len() {
                0
            } else {
                -1
            }
        }
    }
}

fn is_expired(expire_value: Option<&str>, now: i64) -> bool {
    match expire_value.and_then(|v| v.parse::<i64>().ok()) {
        Some(at) => at < now,
        None => false,
    }
}

fn parse_int(value: &str) -> std::result::Result<i64, String> {
    value
        .parse::<i64>()
        .map_err(|_| "value is not an integer or out of range".to_string())
}

/// Negative indices count from the end; the range is clamped to the
/// collection. `None` means the resulting range is empty.
fn clamp_range(mut start: i64, mut stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    if start < 0 {
        start += len;
    }
    if stop < 0 {
        stop += len;
    }
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

pub struct RedisStore {
    lsm: LsmEngine,
    lock: RwLock<()>,
}

impl RedisStore {
    pub fn open(path: impl AsRef<Path>) -> Result<RedisStore> {
        Ok(RedisStore {
            lsm: LsmEngine::open(path)?,
            lock: RwLock::new(()),
        })
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<RedisStore> {
        Ok(RedisStore {
            lsm: LsmEngine::open_with_config(path, config)?,
            lock: RwLock::new(()),
        })
    }

    pub fn flush_all(&self) -> Result<()> {
        self.lsm.flush_all()
    }

    pub fn clear(&self) -> Result<()> {
        let _w = self.lock.write().unwrap();
        self.lsm.clear()
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lsm
            .get(key.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        self.lsm.put(key.as_bytes(), value.as_bytes())
    }

    fn kv_remove(&self, key: &str) -> Result<()> {
        self.lsm.remove(key.as_bytes())
    }

    /// Whether `key` carries an expire record that has passed.
    fn expired_now(&self, key: &str) -> Result<bool> {
        let expire = self.kv_get(&expire_key(key))?;
        Ok(is_expired(expire.as_deref(), now_secs()))
    }

    // ---------------------------------------------------------------
    // lazy expiry
    //
    // Callers observe expiry under the shared lock, drop it, and call one
    // of these. The state is re-verified under the exclusive lock: another
    // writer may have cleaned up or refreshed the key in between.
    // ---------------------------------------------------------------

    fn clean_expired_string(&self, key: &str) -> Result<bool> {
        let _w = self.lock.write().unwrap();
        if !self.expired_now(key)? {
            return Ok(false);
        }
        self.kv_remove(key)?;
        self.kv_remove(&expire_key(key))?;
        Ok(true)
    }

    fn clean_expired_hash(&self, key: &str) -> Result<bool> {
        let _w = self.lock.write().unwrap();
        if !self.expired_now(key)? {
            return Ok(false);
        }
        let fields = fields_from_directory(self.kv_get(key)?.as_deref());
        for field in &fields {
            self.kv_remove(&hash_field_key(key, field))?;
        }
        self.kv_remove(key)?;
        self.kv_remove(&expire_key(key))?;
        Ok(true)
    }

    fn clean_expired_zset(&self, key: &str) -> Result<bool> {
        let _w = self.lock.write().unwrap();
        if !self.expired_now(key)? {
            return Ok(false);
        }
        self.kv_remove(key)?;
        self.kv_remove(&expire_key(key))?;
        let prefix = zset_prefix(key).into_bytes();
        let pred = move |k: &[u8]| prefix_pred(k, &prefix);
        if let Some(mut iter) = self.lsm.scan_where(&pred)? {
            let mut doomed = Vec::new();
            while iter.is_valid() {
                if !iter.value().is_empty() {
                    doomed.push(iter.key().to_vec());
                }
                iter.next()?;
            }
            self.lsm.remove_batch(&doomed)?;
        }
        Ok(true)
    }

    // ---------------------------------------------------------------
    // strings
    // ---------------------------------------------------------------

    pub fn set(&self, key: &str, value: &str) -> Result<String> {
        let _w = self.lock.write().unwrap();
        self.kv_put(key, value)?;
        if self.kv_get(&expire_key(key))?.is_some() {
            self.kv_remove(&expire_key(key))?;
        }
        Ok(resp::ok())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let value = self.kv_get(key)?;
        let expire = self.kv_get(&expire_key(key))?;

        match value {
            Some(value) => {
                if is_expired(expire.as_deref(), now_secs()) {
                    drop(rlock);
                    self.clean_expired_string(key)?;
                    Ok(resp::nil())
                } else {
                    Ok(resp::bulk(&value))
                }
            }
            None => {
                if expire.is_some() {
                    // stale expire record without a key
                    drop(rlock);
                    let _w = self.lock.write().unwrap();
                    if self.kv_get(key)?.is_none() {
                        self.kv_remove(&expire_key(key))?;
                    }
                }
                Ok(resp::nil())
            }
        }
    }

    pub fn del(&self, keys: &[String]) -> Result<String> {
        let _w = self.lock.write().unwrap();
        let mut removed = 0i64;
        for key in keys {
            if let Some(value) = self.kv_get(key)? {
                if value.starts_with(HASH_VALUE_PREFIX) {
                    for field in fields_from_directory(Some(&value)) {
                        self.kv_remove(&hash_field_key(key, &field))?;
                    }
                }
                self.kv_remove(key)?;
                removed += 1;
            }
            if self.kv_get(&expire_key(key))?.is_some() {
                self.kv_remove(&expire_key(key))?;
            }
        }
        Ok(resp::integer(removed))
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<String> {
        let _w = self.lock.write().unwrap();
        let current = match self.kv_get(key)? {
            Some(value) => match parse_int(&value) {
                Ok(n) => n,
                Err(msg) => return Ok(resp::err(&msg)),
            },
            None => 0,
        };
        let next = current + delta;
        self.kv_put(key, &next.to_string())?;
        Ok(resp::integer(next))
    }

    pub fn incr(&self, key: &str) -> Result<String> {
        self.incr_by(key, 1)
    }

    pub fn decr(&self, key: &str) -> Result<String> {
        self.incr_by(key, -1)
    }

    pub fn expire(&self, key: &str, seconds: &str) -> Result<String> {
        let seconds = match parse_int(seconds) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };
        let _w = self.lock.write().unwrap();
        self.kv_put(&expire_key(key), &(now_secs() + seconds).to_string())?;
        Ok(resp::integer(1))
    }

    /// `:-2` when the key is missing or already expired (nothing is deleted
    /// here; cleanup belongs to the next read or write), `:-1` without an
    /// expiry, remaining seconds otherwise.
    pub fn ttl(&self, key: &str) -> Result<String> {
        let _r = self.lock.read().unwrap();
        if self.kv_get(key)?.is_none() {
            return Ok(resp::integer(-2));
        }
        match self
            .kv_get(&expire_key(key))?
            .and_then(|v| v.parse::<i64>().ok())
        {
            None => Ok(resp::integer(-1)),
            Some(at) => {
                let now = now_secs();
                if at < now {
                    Ok(resp::integer(-2))
                } else {
                    Ok(resp::integer(at - now))
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // hashes
    // ---------------------------------------------------------------

    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_hash(key)?;
        }

        let _w = self.lock.write().unwrap();
        self.kv_put(&hash_field_key(key, field), value)?;
        let mut fields = fields_from_directory(self.kv_get(key)?.as_deref());
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
            self.kv_put(key, &directory_from_fields(&fields))?;
        }
        Ok(resp::ok())
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_hash(key)?;
            return Ok(resp::nil());
        }
        match self.kv_get(&hash_field_key(key, field))? {
            Some(value) => Ok(resp::bulk(&value)),
            None => Ok(resp::nil()),
        }
    }

    pub fn hdel(&self, key: &str, field: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_hash(key)?;
            return Ok(resp::integer(0));
        }

        let _w = self.lock.write().unwrap();
        let mut removed = 0i64;
        let field_key = hash_field_key(key, field);
        if self.kv_get(&field_key)?.is_some() {
            self.kv_remove(&field_key)?;
            removed += 1;
        }
        let mut fields = fields_from_directory(self.kv_get(key)?.as_deref());
        if let Some(pos) = fields.iter().position(|f| f == field) {
            fields.remove(pos);
            if fields.is_empty() {
                self.kv_remove(key)?;
            } else {
                self.kv_put(key, &directory_from_fields(&fields))?;
            }
        }
        Ok(resp::integer(removed))
    }

    pub fn hkeys(&self, key: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_hash(key)?;
            return Ok(resp::array(&[]));
        }
        let fields = fields_from_directory(self.kv_get(key)?.as_deref());
        Ok(resp::array(&fields))
    }

    // ---------------------------------------------------------------
    // lists
    // ---------------------------------------------------------------

    fn push(&self, key: &str, value: &str, front: bool) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_string(key)?;
        }

        let _w = self.lock.write().unwrap();
        let mut elements = self.kv_get(key)?.map(|v| split_list(&v)).unwrap_or_default();
        if front {
            elements.insert(0, value.to_string());
        } else {
            elements.push(value.to_string());
        }
        self.kv_put(key, &join_list(&elements))?;
        Ok(resp::integer(elements.len() as i64))
    }

    pub fn lpush(&self, key: &str, value: &str) -> Result<String> {
        self.push(key, value, true)
    }

    pub fn rpush(&self, key: &str, value: &str) -> Result<String> {
        self.push(key, value, false)
    }

    fn pop(&self, key: &str, front: bool) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_string(key)?;
            return Ok(resp::nil());
        }

        let _w = self.lock.write().unwrap();
        let mut elements = match self.kv_get(key)? {
            Some(value) => split_list(&value),
            None => return Ok(resp::nil()),
        };
        if elements.is_empty() {
            return Ok(resp::nil());
        }
        let value = if front {
            elements.remove(0)
        } else {
            elements.pop().unwrap()
        };
        if elements.is_empty() {
            self.kv_remove(key)?;
        } else {
            self.kv_put(key, &join_list(&elements))?;
        }
        Ok(resp::bulk(&value))
    }

    pub fn lpop(&self, key: &str) -> Result<String> {
        self.pop(key, true)
    }

    pub fn rpop(&self, key: &str) -> Result<String> {
        self.pop(key, false)
    }

    pub fn llen(&self, key: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_string(key)?;
            return Ok(resp::integer(0));
        }
        match self.kv_get(key)? {
            Some(value) => Ok(resp::integer(split_list(&value).len() as i64)),
            None => Ok(resp::integer(0)),
        }
    }

    pub fn lrange(&self, key: &str, start: &str, stop: &str) -> Result<String> {
        let start = match parse_int(start) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };
        let stop = match parse_int(stop) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };

        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_string(key)?;
            return Ok(resp::array(&[]));
        }
        let elements = match self.kv_get(key)? {
            Some(value) => split_list(&value),
            None => return Ok(resp::array(&[])),
        };
        match clamp_range(start, stop, elements.len()) {
            Some((from, to)) => Ok(resp::array(&elements[from..=to])),
            None => Ok(resp::array(&[])),
        }
    }

    // ---------------------------------------------------------------
    // sorted sets
    // ---------------------------------------------------------------

    /// Members in ascending score order, read from the SCORE records.
    /// Tombstones are skipped: an empty value means the record was removed.
    fn zset_members_by_score(&self, key: &str) -> Result<Vec<(String, String)>> {
        let prefix = zset_score_prefix(key).into_bytes();
        let pred = move |k: &[u8]| prefix_pred(k, &prefix);
        let mut members = Vec::new();
        if let Some(mut iter) = self.lsm.scan_where(&pred)? {
            while iter.is_valid() {
                if !iter.value().is_empty() {
                    members.push((
                        String::from_utf8_lossy(iter.key()).into_owned(),
                        String::from_utf8_lossy(iter.value()).into_owned(),
                    ));
                }
                iter.next()?;
            }
        }
        Ok(members)
    }

    /// `args` is a flat `score member [score member ...]` list. Counts only
    /// members that were newly added; re-scoring an existing member updates
    /// both of its records without counting.
    pub fn zadd(&self, key: &str, args: &[String]) -> Result<String> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Ok(resp::err("syntax error"));
        }
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for chunk in args.chunks(2) {
            let score = match parse_int(&chunk[0]) {
                Ok(n) => n,
                Err(msg) => return Ok(resp::err(&msg)),
            };
            pairs.push((score, chunk[1].as_str()));
        }

        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_zset(key)?;
        }

        let _w = self.lock.write().unwrap();
        let mut put_kvs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut del_keys: Vec<Vec<u8>> = Vec::new();

        if self.kv_get(key)?.is_none() {
            put_kvs.push((key.as_bytes().to_vec(), zset_prefix(key).into_bytes()));
        }

        let mut added = 0i64;
        for (score, member) in pairs {
            let elem_key = zset_elem_key(key, member);
            match self.kv_get(&elem_key)? {
                Some(old) => {
                    let old_score = parse_score(&old, member)?;
                    if old_score == score {
                        continue;
                    }
                    del_keys.push(zset_score_key(key, old_score).into_bytes());
                }
                None => added += 1,
            }
            put_kvs.push((zset_score_key(key, score).into_bytes(), member.as_bytes().to_vec()));
            put_kvs.push((elem_key.into_bytes(), score.to_string().into_bytes()));
        }
        self.lsm.remove_batch(&del_keys)?;
        self.lsm.put_batch(put_kvs)?;
        Ok(resp::integer(added))
    }

    pub fn zrem(&self, key: &str, members: &[String]) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_zset(key)?;
            return Ok(resp::integer(0));
        }

        let _w = self.lock.write().unwrap();
        let mut removed = 0i64;
        for member in members {
            let elem_key = zset_elem_key(key, member);
            if let Some(old) = self.kv_get(&elem_key)? {
                let score = parse_score(&old, member)?;
                self.kv_remove(&zset_score_key(key, score))?;
                self.kv_remove(&elem_key)?;
                removed += 1;
            }
        }
        Ok(resp::integer(removed))
    }

    pub fn zrange(&self, key: &str, start: &str, stop: &str) -> Result<String> {
        let start = match parse_int(start) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };
        let stop = match parse_int(stop) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };

        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_zset(key)?;
            return Ok(resp::array(&[]));
        }
        let members = self.zset_members_by_score(key)?;
        match clamp_range(start, stop, members.len()) {
            Some((from, to)) => {
                let out: Vec<String> =
                    members[from..=to].iter().map(|(_, m)| m.clone()).collect();
                Ok(resp::array(&out))
            }
            None => Ok(resp::array(&[])),
        }
    }

    pub fn zcard(&self, key: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_zset(key)?;
            return Ok(resp::integer(0));
        }
        Ok(resp::integer(self.zset_members_by_score(key)?.len() as i64))
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_zset(key)?;
            return Ok(resp::nil());
        }
        match self.kv_get(&zset_elem_key(key, member))? {
            Some(score) => Ok(resp::bulk(&score)),
            None => Ok(resp::nil()),
        }
    }

    pub fn zincrby(&self, key: &str, increment: &str, member: &str) -> Result<String> {
        let increment = match parse_int(increment) {
            Ok(n) => n,
            Err(msg) => return Ok(resp::err(&msg)),
        };

        let rlock = self.lock.read().unwrap();
        let expired = self.expired_now(key)?;
        drop(rlock);
        if expired {
            self.clean_expired_zset(key)?;
        }

        let _w = self.lock.write().unwrap();
        let elem_key = zset_elem_key(key, member);
        let new_score = match self.kv_get(&elem_key)? {
            Some(old) => {
                let old_score = parse_score(&old, member)?;
                self.kv_remove(&zset_score_key(key, old_score))?;
                old_score + increment
            }
            None => increment,
        };
        self.kv_put(&elem_key, &new_score.to_string())?;
        self.kv_put(&zset_score_key(key, new_score), member)?;
        Ok(resp::integer(new_score))
    }

    /// Rank by ascending score. Replies with a nil bulk string (not an
    /// integer) when the member is absent.
    pub fn zrank(&self, key: &str, member: &str) -> Result<String> {
        let rlock = self.lock.read().unwrap();
        if self.expired_now(key)? {
            drop(rlock);
            self.clean_expired_zset(key)?;
            return Ok(resp::nil());
        }
        let score = match self.kv_get(&zset_elem_key(key, member))? {
            Some(score) => parse_score(&score, member)?,
            None => return Ok(resp::nil()),
        };
        let target = zset_score_key(key, score);
        for (rank, (score_key, _)) in self.zset_members_by_score(key)?.iter().enumerate() {
            if score_key == &target {
                return Ok(resp::integer(rank as i64));
            }
        }
        Ok(resp::nil())
    }
}

fn parse_score(value: &str, member: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| LsmLiteError::Custom(format!("malformed score {:?} for member {:?}", value, member)))
}
