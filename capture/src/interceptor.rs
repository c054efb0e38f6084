use std::fmt;
use std::io;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::warn;

use crate::decoder::Utf8StreamDecoder;
use crate::entry::StreamKind;

/// Receives the decoded text of every observed write, in write order.
///
/// Handlers run on the writing thread and must not write to the stream they
/// observe.
pub type WriteHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Shadows writes to one output stream into an observable text feed.
///
/// Cloning yields another handle to the same interceptor.
#[derive(Clone)]
pub struct StreamInterceptor {
    inner: Arc<InterceptorInner>,
}

struct InterceptorInner {
    kind: StreamKind,
    attached: AtomicBool,
    handler: Mutex<Option<WriteHandler>>,
    /// Held while a write is delivered so observers see writes in order.
    delivery: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StreamInterceptor {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            inner: Arc::new(InterceptorInner {
                kind,
                attached: AtomicBool::new(false),
                handler: Mutex::new(None),
                delivery: Mutex::new(()),
            }),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    /// Installs the observer, replacing any previous one.
    pub fn on_write<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *lock(&self.inner.handler) = Some(Arc::new(handler));
    }

    /// Wraps `sink` so that every write to it is also observed. Each writer
    /// decodes its own bytes, so writers on different threads never mix
    /// partial UTF-8 sequences.
    pub fn attach<W: Write>(&self, sink: W) -> InterceptedWriter<W> {
        self.inner.attached.store(true, Ordering::SeqCst);
        InterceptedWriter {
            sink,
            interceptor: self.clone(),
            decoder: Utf8StreamDecoder::new(),
        }
    }

    /// Stops observing. Writers handed out by [`attach`](Self::attach) keep
    /// forwarding to their sink. Returns whether this call did the detaching.
    pub fn detach(&self) -> bool {
        self.inner.attached.swap(false, Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    fn deliver(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _order = lock(&self.inner.delivery);
        let Some(handler) = lock(&self.inner.handler).clone() else {
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(text)));
        if outcome.is_err() {
            warn!(stream = %self.inner.kind, "write observer panicked; output was still forwarded");
        }
    }
}

impl fmt::Debug for StreamInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterceptor")
            .field("kind", &self.inner.kind)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// A sink decorated by a [`StreamInterceptor`].
///
/// Writes go to the sink first; only the bytes the sink accepted are
/// observed. Sink errors reach the caller unchanged.
pub struct InterceptedWriter<W> {
    sink: W,
    interceptor: StreamInterceptor,
    decoder: Utf8StreamDecoder,
}

impl<W> InterceptedWriter<W> {
    fn observe_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if !self.interceptor.is_attached() {
            // Bytes held back from before the detach belong to no one now.
            if self.decoder.has_pending() {
                let _ = self.decoder.finish();
            }
            return;
        }
        let text = self.decoder.decode(bytes);
        self.interceptor.deliver(&text);
    }
}

impl<W: Write> InterceptedWriter<W> {
    /// Writes already-decoded text, bypassing the byte decoder.
    pub fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.sink.write_all(text.as_bytes())?;
        if self.interceptor.is_attached() {
            self.interceptor.deliver(text);
        }
        Ok(())
    }

    pub fn interceptor(&self) -> &StreamInterceptor {
        &self.interceptor
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for InterceptedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.sink.write(buf)?;
        self.observe_bytes(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<W> fmt::Debug for InterceptedWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedWriter")
            .field("interceptor", &self.interceptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn recording(interceptor: &StreamInterceptor) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        interceptor.on_write(move |text| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(text.to_string());
            }
        });
        seen
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts at most `limit` bytes per call.
    struct ShortSink {
        data: Vec<u8>,
        limit: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn forwards_bytes_unchanged_without_observer() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let mut writer = interceptor.attach(Vec::new());
        writer.write_all(b"one\n").expect("write");
        writer.write_all(&[0xff, 0x00, b'z']).expect("write");
        assert_eq!(writer.into_inner(), b"one\n\xff\x00z".to_vec());
    }

    #[test]
    fn observer_sees_writes_in_order() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let mut writer = interceptor.attach(Vec::new());
        for line in ["a\n", "b\n", "c\n"] {
            writer.write_all(line.as_bytes()).expect("write");
        }
        writer.write_text("d\n").expect("write text");
        assert_eq!(writer.get_ref().as_slice(), b"a\nb\nc\nd\n");
        assert_eq!(
            *seen.lock().expect("seen"),
            vec!["a\n", "b\n", "c\n", "d\n"]
        );
    }

    #[test]
    fn split_multibyte_write_is_decoded_once_complete() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let mut writer = interceptor.attach(Vec::new());
        let euro = "€".as_bytes();
        writer.write_all(&euro[..1]).expect("write");
        writer.write_all(&euro[1..]).expect("write");
        assert_eq!(*seen.lock().expect("seen"), vec!["€"]);
    }

    #[test]
    fn writers_on_one_interceptor_decode_independently() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let mut first = interceptor.attach(Vec::new());
        let mut second = interceptor.attach(Vec::new());
        let euro = "€".as_bytes();
        first.write_all(&euro[..1]).expect("write");
        second.write_all(b"x").expect("write");
        first.write_all(&euro[1..]).expect("write");
        assert_eq!(*seen.lock().expect("seen"), vec!["x", "€"]);
    }

    #[test]
    fn writers_from_many_threads_never_mix_partial_characters() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut writer = interceptor.attach(Vec::new());
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        for byte in "é€\n".as_bytes() {
                            writer.write_all(std::slice::from_ref(byte)).expect("write");
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        let observed = seen.lock().expect("seen").concat();
        assert!(!observed.contains(char::REPLACEMENT_CHARACTER));
        assert_eq!(observed.matches('€').count(), 400);
    }

    #[test]
    fn partial_sink_writes_observe_only_accepted_bytes() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let mut writer = interceptor.attach(ShortSink {
            data: Vec::new(),
            limit: 2,
        });
        writer.write_all(b"hello").expect("write");
        assert_eq!(writer.get_ref().data, b"hello".to_vec());
        assert_eq!(seen.lock().expect("seen").concat(), "hello");
    }

    #[test]
    fn sink_errors_propagate_and_are_not_observed() {
        let interceptor = StreamInterceptor::new(StreamKind::Stderr);
        let seen = recording(&interceptor);
        let mut writer = interceptor.attach(FailingSink);
        let err = writer.write(b"lost").expect_err("sink error");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(seen.lock().expect("seen").is_empty());
    }

    #[test]
    fn detach_stops_observation_and_is_idempotent() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        let seen = recording(&interceptor);
        let mut writer = interceptor.attach(Vec::new());
        writer.write_all(b"before").expect("write");
        assert!(interceptor.detach());
        assert!(!interceptor.detach());
        writer.write_all(b"after").expect("write");
        assert_eq!(writer.get_ref().as_slice(), b"beforeafter");
        assert_eq!(*seen.lock().expect("seen"), vec!["before"]);
    }

    #[traced_test]
    #[test]
    fn panicking_observer_does_not_fail_the_write() {
        let interceptor = StreamInterceptor::new(StreamKind::Stdout);
        interceptor.on_write(|_| panic!("observer exploded"));
        let mut writer = interceptor.attach(Vec::new());
        writer.write_all(b"still here").expect("write survives");
        writer.write_all(b" and again").expect("write survives");
        assert_eq!(writer.get_ref().as_slice(), b"still here and again");
        assert!(logs_contain("write observer panicked"));
    }
}
