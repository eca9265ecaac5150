use crate::{MULTI_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD, TOPIC_SEPARATOR};

/// Returns true if `topic` is matched by `filter`.
///
/// Both strings are walked in lock-step, one byte at a time. `+` swallows the
/// current topic level (which may be empty) and `#` accepts whatever remains of
/// the topic, as long as something remains. Wildcards are not required to sit
/// on their own level: `a#` matches `ab/c` but not `a`.
pub fn matches(filter: &str, topic: &str) -> bool {
    let filter = filter.as_bytes();
    let topic = topic.as_bytes();

    let mut f = 0;
    let mut t = 0;

    loop {
        match filter.get(f) {
            None => return t == topic.len(),
            Some(&MULTI_LEVEL_WILDCARD) => return t < topic.len(),
            Some(&SINGLE_LEVEL_WILDCARD) => {
                while t < topic.len() && topic[t] != TOPIC_SEPARATOR {
                    t += 1;
                }

                f += 1;
            },
            Some(&c) => {
                if topic.get(t) != Some(&c) {
                    return false;
                }

                f += 1;
                t += 1;
            },
        }
    }
}

/// Returns the level of `topic` at `index`, or an empty string if the topic
/// has fewer levels.
pub fn element_at(topic: &str, index: usize) -> &str {
    topic.split(TOPIC_SEPARATOR as char).nth(index).unwrap_or("")
}

/// A published topic may not contain wildcards or NUL bytes.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && !topic.bytes().any(|b| {
            b == SINGLE_LEVEL_WILDCARD || b == MULTI_LEVEL_WILDCARD || b == b'\0'
        })
}
