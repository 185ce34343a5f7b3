//! RESP reply builders, CRLF-framed.

pub fn ok() -> String {
    "+OK\r\n".to_string()
}

pub fn nil() -> String {
    "$-1\r\n".to_string()
}

pub fn integer(n: i64) -> String {
    format!(":{}\r\n", n)
}

pub fn bulk(s: &str) -> String {
    format!("${}\r\n{}\r\n", s.len(), s)
}

pub fn array(items: &[String]) -> String {
    let mut out = format!("*{}\r\n", items.len());
    for item in items {
        out.push_str(&bulk(item));
    }
    out
}

pub fn err(msg: &str) -> String {
    format!("-ERR {}\r\n", msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing() {
        assert_eq!(ok(), "+OK\r\n");
        assert_eq!(nil(), "$-1\r\n");
        assert_eq!(integer(-2), ":-2\r\n");
        assert_eq!(bulk("ab"), "$2\r\nab\r\n");
        assert_eq!(
            array(&["a".to_string(), "bc".to_string()]),
            "*2\r\n$1\r\na\r\n$2\r\nbc\r\n"
        );
        assert_eq!(err("boom"), "-ERR boom\r\n");
    }
}
