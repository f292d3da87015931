//! POSIX shell quoting for command lines handed to `/bin/sh -c` style interpreters.

/// Quote `word` for a POSIX shell. Words made only of safe characters are
/// returned as-is.
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_owned();
    }
    let safe = word.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(b, b'-' | b'_' | b'.' | b'/' | b'=' | b':' | b'@' | b'+' | b',' | b'%')
    });
    if safe {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

pub fn join(argv: &[String]) -> String {
    argv.iter()
        .map(|w| quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}
