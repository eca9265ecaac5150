use crate::{
    config::{Config, MalformedPolicy},
    decoder, encoder,
    registry::{payload_callback, payload_text_callback, text_callback, SubscriptionRegistry},
    topic,
    transport::MulticastTransport,
    types::{PollStats, TransportError},
    MAX_DATAGRAM_LEN, MIN_DATAGRAM_LEN,
};
use bytes::{BufMut, BytesMut};
use log::{debug, trace, warn};
use std::{fmt, io, net::SocketAddrV4};

/// Upper bound on datagrams handled by one `poll_once`, so a flood of traffic
/// can't starve the caller's loop.
pub const MAX_DATAGRAMS_PER_POLL: usize = 16;

/// A PicoMQ node: owns a transport and the subscriptions made through it.
///
/// Nothing happens in the background. Inbound messages are only read and
/// dispatched when the owner calls [`PicoMq::poll_once`].
pub struct PicoMq<T> {
    transport: T,
    config: Config,
    subscriptions: SubscriptionRegistry,
    buffer: Box<[u8]>,
}

impl<T: MulticastTransport> PicoMq<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            config,
            subscriptions: SubscriptionRegistry::new(),
            buffer: vec![0u8; MAX_DATAGRAM_LEN].into_boxed_slice(),
        }
    }

    /// Joins the configured multicast group.
    pub fn begin(&mut self) -> Result<(), TransportError> {
        self.transport.join_multicast_group(self.config.group, self.config.port)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Reads and dispatches up to [`MAX_DATAGRAMS_PER_POLL`] pending datagrams.
    ///
    /// Our own transmissions are skipped. A transport failure ends the cycle, as
    /// does a malformed frame unless the config says to skip it.
    pub fn poll_once(&mut self) -> PollStats {
        let mut stats = PollStats::default();
        let local_address = self.transport.local_address();

        for _ in 0..MAX_DATAGRAMS_PER_POLL {
            let (source, len) = match self.transport.receive_nonblocking(&mut self.buffer) {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from transport, ending poll cycle - {}", e);
                    stats.aborted = true;
                    break;
                },
            };

            stats.received += 1;

            if Some(source) == local_address {
                trace!("Ignoring our own datagram");
                stats.discarded += 1;
                continue;
            }

            match decoder::decode(&self.buffer[..len]) {
                Ok(frame) => {
                    stats.delivered += self.subscriptions.dispatch(frame.topic, frame.payload);
                },
                Err(e) => {
                    debug!("Discarding {} byte datagram from {} - {}", len, source, e);
                    stats.discarded += 1;

                    if self.config.malformed == MalformedPolicy::AbortCycle {
                        stats.aborted = true;
                        break;
                    }
                },
            }
        }

        stats
    }

    /// Starts a message whose payload is written incrementally. The message is
    /// sent by [`Publish::send`] or when the handle is dropped.
    pub fn begin_publish(&mut self, topic: &str) -> Publish<'_, T> {
        if !topic::is_valid_topic(topic) {
            warn!("Publishing to \"{}\", which is not a valid topic name", topic);
        }

        let mut buffer = BytesMut::with_capacity(MAX_DATAGRAM_LEN);
        encoder::encode_header(topic, &mut buffer);

        Publish {
            transport: &mut self.transport,
            destination: self.config.multicast_addr(),
            ttl: self.config.ttl,
            buffer,
            send_pending: true,
        }
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl AsRef<[u8]>,
    ) -> Result<(), TransportError> {
        let mut publish = self.begin_publish(topic);
        publish.buffer.put_slice(payload.as_ref());
        publish.send()
    }

    /// Publishes the `Display` rendering of `value`.
    pub fn publish_display(
        &mut self,
        topic: &str,
        value: impl fmt::Display,
    ) -> Result<(), TransportError> {
        let mut publish = self.begin_publish(topic);

        // A failing `Display` impl leaves a partial payload, which is never sent.
        if let Err(e) = fmt::Write::write_fmt(&mut publish, format_args!("{}", value)) {
            publish.send_pending = false;
            return Err(e.into());
        }

        publish.send()
    }

    /// Registers `callback` for messages matching `filter`, replacing any
    /// callback already registered for the same filter.
    pub fn subscribe<F>(&mut self, filter: impl Into<String>, callback: F)
    where
        F: FnMut(&str, &[u8]) + 'static,
    {
        let filter = filter.into();
        debug!("Subscribing to \"{}\"", filter);

        if self.subscriptions.insert(filter, Box::new(callback)).is_some() {
            debug!("Replaced an existing subscription");
        }
    }

    /// Like [`PicoMq::subscribe`], with the payload decoded as (lossy) UTF-8.
    pub fn subscribe_str<F>(&mut self, filter: impl Into<String>, callback: F)
    where
        F: FnMut(&str, &str) + 'static,
    {
        let filter = filter.into();
        debug!("Subscribing to \"{}\"", filter);
        self.subscriptions.insert(filter, text_callback(callback));
    }

    pub fn subscribe_payload<F>(&mut self, filter: impl Into<String>, callback: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        let filter = filter.into();
        debug!("Subscribing to \"{}\"", filter);
        self.subscriptions.insert(filter, payload_callback(callback));
    }

    pub fn subscribe_payload_str<F>(&mut self, filter: impl Into<String>, callback: F)
    where
        F: FnMut(&str) + 'static,
    {
        let filter = filter.into();
        debug!("Subscribing to \"{}\"", filter);
        self.subscriptions.insert(filter, payload_text_callback(callback));
    }

    pub fn unsubscribe(&mut self, filter: &str) {
        if self.subscriptions.remove(filter).is_some() {
            debug!("Unsubscribed from \"{}\"", filter);
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.filters()
    }
}

impl<T: fmt::Debug> fmt::Debug for PicoMq<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PicoMq")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// A message being built. The header is already written; the payload is
/// appended through `io::Write` or `fmt::Write`.
///
/// The datagram goes out exactly once: on the first [`Publish::send`], or on
/// drop if `send` was never called.
pub struct Publish<'a, T: MulticastTransport> {
    transport: &'a mut T,
    destination: SocketAddrV4,
    ttl: u8,
    buffer: BytesMut,
    send_pending: bool,
}

impl<'a, T: MulticastTransport> Publish<'a, T> {
    /// Calls after the first are no-ops.
    pub fn send(&mut self) -> Result<(), TransportError> {
        if !self.send_pending {
            return Ok(());
        }

        self.send_pending = false;

        let len = self.buffer.len();

        if len <= MIN_DATAGRAM_LEN {
            return Err(TransportError::DatagramTooShort { len });
        }

        if len >= MAX_DATAGRAM_LEN {
            return Err(TransportError::DatagramTooLarge { len });
        }

        self.transport.send_multicast(
            &self.buffer,
            *self.destination.ip(),
            self.destination.port(),
            self.ttl,
        )
    }

    pub fn is_sent(&self) -> bool {
        !self.send_pending
    }

    pub fn datagram(&self) -> &[u8] {
        &self.buffer
    }
}

impl<'a, T: MulticastTransport> io::Write for Publish<'a, T> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.send_pending {
            return Err(io::Error::new(io::ErrorKind::Other, "message already sent"));
        }

        self.buffer.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a, T: MulticastTransport> fmt::Write for Publish<'a, T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if !self.send_pending {
            return Err(fmt::Error);
        }

        self.buffer.put_slice(s.as_bytes());
        Ok(())
    }
}

impl<'a, T: MulticastTransport> Drop for Publish<'a, T> {
    fn drop(&mut self) {
        if let Err(e) = self.send() {
            warn!("Failed to send message on drop - {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::{Config, MalformedPolicy},
        encoder,
        engine::{PicoMq, MAX_DATAGRAMS_PER_POLL},
        transport::MulticastTransport,
        types::{PollStats, TransportError},
        DEFAULT_GROUP, DEFAULT_PORT, MAX_DATAGRAM_LEN,
    };
    use bytes::BytesMut;
    use std::{
        cell::RefCell,
        collections::VecDeque,
        fmt,
        io::{self, Write},
        net::{IpAddr, Ipv4Addr},
        rc::Rc,
    };

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[derive(Debug, Default)]
    struct MockTransport {
        joined: Option<(Ipv4Addr, u16)>,
        inbound: VecDeque<(IpAddr, Vec<u8>)>,
        sent: Vec<(Vec<u8>, Ipv4Addr, u16, u8)>,
        fail_receive: bool,
        fail_send: bool,
    }

    impl MockTransport {
        fn push(&mut self, source: IpAddr, datagram: &[u8]) {
            self.inbound.push_back((source, datagram.to_vec()));
        }

        fn push_message(&mut self, source: IpAddr, topic: &str, payload: &[u8]) {
            let mut bytes = BytesMut::new();
            encoder::encode(topic, payload, &mut bytes);
            self.push(source, &bytes);
        }
    }

    impl MulticastTransport for MockTransport {
        fn join_multicast_group(
            &mut self,
            group: Ipv4Addr,
            port: u16,
        ) -> Result<(), TransportError> {
            self.joined = Some((group, port));
            Ok(())
        }

        fn receive_nonblocking(
            &mut self,
            buf: &mut [u8],
        ) -> Result<Option<(IpAddr, usize)>, TransportError> {
            if self.fail_receive {
                return Err(io::Error::new(io::ErrorKind::Other, "receive failed").into());
            }

            Ok(self.inbound.pop_front().map(|(source, datagram)| {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                (source, len)
            }))
        }

        fn send_multicast(
            &mut self,
            datagram: &[u8],
            group: Ipv4Addr,
            port: u16,
            ttl: u8,
        ) -> Result<(), TransportError> {
            if self.fail_send {
                return Err(io::Error::new(io::ErrorKind::Other, "send failed").into());
            }

            self.sent.push((datagram.to_vec(), group, port, ttl));
            Ok(())
        }

        fn local_address(&self) -> Option<IpAddr> {
            Some(LOCAL)
        }
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn engine() -> PicoMq<MockTransport> {
        PicoMq::new(MockTransport::default(), Config::default())
    }

    fn record(engine: &mut PicoMq<MockTransport>, filter: &'static str, log: &Log) {
        let log = log.clone();
        engine.subscribe(filter, move |topic: &str, payload: &[u8]| {
            let payload = String::from_utf8_lossy(payload);
            log.borrow_mut().push(format!("{} {} {}", filter, topic, payload));
        });
    }

    #[test]
    fn test_begin_joins_configured_group() {
        let mut engine = PicoMq::new(
            MockTransport::default(),
            Config::default().with_group(Ipv4Addr::new(239, 0, 0, 1)).with_port(4000),
        );
        engine.begin().unwrap();

        assert_eq!(engine.transport().joined, Some((Ipv4Addr::new(239, 0, 0, 1), 4000)));
    }

    #[test]
    fn test_dispatch_overlapping_filters() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "x/+", &log);
        record(&mut engine, "x/#", &log);

        engine.transport_mut().push_message(PEER, "x/y", b"1");
        engine.transport_mut().push_message(PEER, "z", b"2");

        let stats = engine.poll_once();

        assert_eq!(*log.borrow(), vec!["x/# x/y 1", "x/+ x/y 1"]);
        assert_eq!(
            stats,
            PollStats { received: 2, delivered: 2, discarded: 0, aborted: false }
        );
    }

    #[test]
    fn test_poll_cycle_is_bounded() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "#", &log);

        for i in 0..(MAX_DATAGRAMS_PER_POLL + 4) {
            engine.transport_mut().push_message(PEER, "t", i.to_string().as_bytes());
        }

        assert_eq!(engine.poll_once().received, MAX_DATAGRAMS_PER_POLL);
        assert_eq!(log.borrow().len(), MAX_DATAGRAMS_PER_POLL);
        assert_eq!(engine.transport().inbound.len(), 4);

        assert_eq!(engine.poll_once().received, 4);
        assert_eq!(log.borrow().last().unwrap(), &format!("# t {}", MAX_DATAGRAMS_PER_POLL + 3));

        assert_eq!(engine.poll_once(), PollStats::default());
    }

    #[test]
    fn test_own_datagrams_are_ignored() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "#", &log);

        engine.transport_mut().push_message(LOCAL, "t", b"mine");
        engine.transport_mut().push_message(PEER, "t", b"theirs");

        let stats = engine.poll_once();

        assert_eq!(*log.borrow(), vec!["# t theirs"]);
        assert_eq!(stats.discarded, 1);
        assert!(!stats.aborted);
    }

    #[test]
    fn test_malformed_frame_aborts_cycle() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "#", &log);

        engine.transport_mut().push_message(PEER, "t", b"before");
        engine.transport_mut().push(PEER, b"Xt\0bad");
        engine.transport_mut().push_message(PEER, "t", b"after");

        let stats = engine.poll_once();

        assert_eq!(*log.borrow(), vec!["# t before"]);
        assert_eq!(stats, PollStats { received: 2, delivered: 1, discarded: 1, aborted: true });

        // The rest waits for the next cycle.
        engine.poll_once();
        assert_eq!(*log.borrow(), vec!["# t before", "# t after"]);
    }

    #[test]
    fn test_malformed_frame_skipped() {
        let log = Log::default();
        let mut engine = PicoMq::new(
            MockTransport::default(),
            Config::default().with_malformed_policy(MalformedPolicy::SkipFrame),
        );
        record(&mut engine, "#", &log);

        engine.transport_mut().push(PEER, b"P");
        engine.transport_mut().push(PEER, b"Pno-terminator");
        engine.transport_mut().push_message(PEER, "t", b"ok");

        let stats = engine.poll_once();

        assert_eq!(*log.borrow(), vec!["# t ok"]);
        assert_eq!(stats, PollStats { received: 3, delivered: 1, discarded: 2, aborted: false });
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "#", &log);

        let mut datagram = vec![b'a'; MAX_DATAGRAM_LEN + 100];
        datagram[0] = b'P';
        datagram[2] = b'\0';
        engine.transport_mut().push(PEER, &datagram);

        assert!(engine.poll_once().aborted);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_receive_failure_aborts_cycle() {
        let mut engine = engine();
        engine.transport_mut().push_message(PEER, "t", b"x");
        engine.transport_mut().fail_receive = true;

        let stats = engine.poll_once();

        assert!(stats.aborted);
        assert_eq!(stats.received, 0);
    }

    #[test]
    fn test_unsubscribe() {
        let log = Log::default();
        let mut engine = engine();
        record(&mut engine, "a", &log);
        record(&mut engine, "b", &log);

        engine.unsubscribe("a");
        engine.unsubscribe("missing");

        assert_eq!(engine.subscriptions().collect::<Vec<_>>(), vec!["b"]);

        engine.transport_mut().push_message(PEER, "a", b"");
        assert_eq!(engine.poll_once().delivered, 0);
    }

    #[test]
    fn test_subscribe_adapters() {
        let log = Log::default();
        let mut engine = engine();

        let text_log = log.clone();
        engine.subscribe_str("temp/+", move |topic, payload| {
            text_log.borrow_mut().push(format!("{}={}", topic, payload));
        });

        let payload_log = log.clone();
        engine.subscribe_payload("raw", move |payload| {
            payload_log.borrow_mut().push(format!("{} bytes", payload.len()));
        });

        engine.transport_mut().push_message(PEER, "temp/kitchen", b"21.5");
        engine.transport_mut().push_message(PEER, "raw", &[0, 1, 2]);
        engine.poll_once();

        assert_eq!(*log.borrow(), vec!["temp/kitchen=21.5", "3 bytes"]);
    }

    #[test]
    fn test_subscribe_payload_str() {
        let log = Log::default();
        let mut engine = engine();

        let text_log = log.clone();
        engine.subscribe_payload_str("status", move |payload| {
            text_log.borrow_mut().push(payload.to_string());
        });

        engine.transport_mut().push_message(PEER, "status", b"online");
        engine.transport_mut().push_message(PEER, "status", b"bad \xff byte");
        engine.poll_once();

        assert_eq!(*log.borrow(), vec!["online", "bad \u{fffd} byte"]);
    }

    #[test]
    fn test_publish() {
        let mut engine = PicoMq::new(MockTransport::default(), Config::default().with_ttl(3));
        engine.publish("a/b", b"hi").unwrap();

        assert_eq!(
            engine.transport().sent,
            vec![(b"Pa/b\0hi".to_vec(), DEFAULT_GROUP, DEFAULT_PORT, 3)]
        );
    }

    #[test]
    fn test_publish_display() {
        let mut engine = engine();
        engine.publish_display("count", 42).unwrap();
        engine.publish_display("temp", 21.5).unwrap();

        let sent: Vec<_> = engine.transport().sent.iter().map(|s| s.0.clone()).collect();
        assert_eq!(sent, vec![b"Pcount\x0042".to_vec(), b"Ptemp\x0021.5".to_vec()]);
    }

    #[test]
    fn test_publish_display_failure_is_not_sent() {
        struct Broken;

        impl fmt::Display for Broken {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("partial")?;
                Err(fmt::Error)
            }
        }

        let mut engine = engine();

        match engine.publish_display("t", Broken) {
            Err(TransportError::Format(_)) => {},
            other => panic!("expected Format, got {:?}", other),
        }

        assert!(engine.transport().sent.is_empty());
    }

    #[test]
    fn test_publish_too_short() {
        let mut engine = engine();

        match engine.publish("", b"") {
            Err(TransportError::DatagramTooShort { len }) => assert_eq!(len, 2),
            other => panic!("expected DatagramTooShort, got {:?}", other),
        }

        // Dropping an empty handle doesn't send either.
        drop(engine.begin_publish(""));
        assert!(engine.transport().sent.is_empty());

        // Shortest frame receivers accept.
        engine.publish("", b"x").unwrap();
        assert_eq!(engine.transport().sent[0].0, b"P\0x".to_vec());
    }

    #[test]
    fn test_streaming_publish() {
        let mut engine = engine();

        {
            let mut publish = engine.begin_publish("log");
            publish.write_all(b"level=").unwrap();
            write!(publish, "{}", "info").unwrap();
            assert_eq!(publish.datagram(), b"Plog\0level=info");
            publish.send().unwrap();
        }

        assert_eq!(engine.transport().sent.len(), 1);
        assert_eq!(engine.transport().sent[0].0, b"Plog\0level=info".to_vec());
    }

    #[test]
    fn test_send_is_idempotent() {
        let mut engine = engine();

        {
            let mut publish = engine.begin_publish("t");
            publish.send().unwrap();
            publish.send().unwrap();
            assert!(publish.is_sent());
            assert!(publish.write_all(b"late").is_err());
        }

        assert_eq!(engine.transport().sent.len(), 1);
        assert_eq!(engine.transport().sent[0].0, b"Pt\0".to_vec());
    }

    #[test]
    fn test_publish_sent_on_drop() {
        let mut engine = engine();

        {
            let mut publish = engine.begin_publish("t");
            publish.write_all(b"body").unwrap();
        }

        assert_eq!(engine.transport().sent.len(), 1);
        assert_eq!(engine.transport().sent[0].0, b"Pt\0body".to_vec());
    }

    #[test]
    fn test_publish_too_large() {
        let mut engine = engine();
        let payload = vec![0u8; MAX_DATAGRAM_LEN];

        match engine.publish("t", &payload) {
            Err(TransportError::DatagramTooLarge { len }) => {
                assert_eq!(len, MAX_DATAGRAM_LEN + 3)
            },
            other => panic!("expected DatagramTooLarge, got {:?}", other),
        }

        assert!(engine.transport().sent.is_empty());

        // Largest frame receivers accept.
        let payload = vec![0u8; MAX_DATAGRAM_LEN - 4];
        engine.publish("t", &payload).unwrap();
        assert_eq!(engine.transport().sent[0].0.len(), MAX_DATAGRAM_LEN - 1);
    }

    #[test]
    fn test_publish_failure_is_reported_once() {
        let mut engine = engine();
        engine.transport_mut().fail_send = true;

        let mut publish = engine.begin_publish("t");
        assert!(publish.send().is_err());
        assert!(publish.send().is_ok());
    }
}
