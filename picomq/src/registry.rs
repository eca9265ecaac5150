use crate::topic;
use log::trace;
use std::{collections::BTreeMap, fmt};

/// The canonical subscription callback, invoked with the topic a message was
/// published to and its payload.
pub type Callback = Box<dyn FnMut(&str, &[u8])>;

/// Wraps a callback that wants the payload as text. Invalid UTF-8 is replaced
/// rather than dropped.
pub fn text_callback<F>(mut callback: F) -> Callback
where
    F: FnMut(&str, &str) + 'static,
{
    Box::new(move |topic: &str, payload: &[u8]| {
        callback(topic, &*String::from_utf8_lossy(payload))
    })
}

/// Wraps a callback that only cares about the payload.
pub fn payload_callback<F>(mut callback: F) -> Callback
where
    F: FnMut(&[u8]) + 'static,
{
    Box::new(move |_topic: &str, payload: &[u8]| callback(payload))
}

pub fn payload_text_callback<F>(mut callback: F) -> Callback
where
    F: FnMut(&str) + 'static,
{
    Box::new(move |_topic: &str, payload: &[u8]| callback(&*String::from_utf8_lossy(payload)))
}

/// Topic filters mapped to their callbacks, one callback per filter.
///
/// Dispatch walks the filters in lexicographic order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<String, Callback>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `filter`, returning the callback it replaced.
    pub fn insert(&mut self, filter: impl Into<String>, callback: Callback) -> Option<Callback> {
        self.subscriptions.insert(filter.into(), callback)
    }

    pub fn remove(&mut self, filter: &str) -> Option<Callback> {
        self.subscriptions.remove(filter)
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.subscriptions.contains_key(filter)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &mut Callback),
    {
        for (filter, callback) in self.subscriptions.iter_mut() {
            f(filter, callback);
        }
    }

    /// Invokes every callback whose filter matches `topic` and returns how many
    /// were invoked.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;

        self.for_each(|filter, callback| {
            if topic::matches(filter, topic) {
                trace!("Delivering message on \"{}\" to subscription \"{}\"", topic, filter);
                callback(topic, payload);
                delivered += 1;
            }
        });

        delivered
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.filters()).finish()
    }
}
