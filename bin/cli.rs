//! Interactive front-end: reads whitespace-separated commands from stdin and
//! prints the raw RESP reply for each.

use lsmlite::redis::{dispatch, RedisStore};
use std::io::{self, BufRead, Write};

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "lsmlite_data".to_string());
    let store = match RedisStore::open(&path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to open store at {}: {}", path, e);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            continue;
        }
        if parts[0].eq_ignore_ascii_case("quit") {
            break;
        }
        let reply = dispatch(&store, &parts);
        stdout.write_all(reply.as_bytes()).unwrap();
        stdout.flush().unwrap();
    }

    if let Err(e) = store.flush_all() {
        eprintln!("flush on exit failed: {}", e);
    }
}
