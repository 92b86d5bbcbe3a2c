//! Lazy, replayable labeled streams.
//!
//! A [`ReplayableStream`] wraps a producer that can yield a finite sequence
//! of labeled instances. With caching enabled the producer runs at most once:
//! the first cursor to reach an element materializes it into a shared buffer
//! and every other cursor replays it from there. With caching disabled each
//! cursor runs its own producer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::data::{Labeled, Payload, StreamItem};

type BoxedProducer<T> = Box<dyn Iterator<Item = StreamItem<T>> + Send>;
type ProducerFactory<T> = Arc<dyn Fn() -> BoxedProducer<T> + Send + Sync>;

/// Producer lifecycle behind the memo's single-writer lock.
enum MemoProducer<T> {
    Pending(ProducerFactory<T>),
    Running(BoxedProducer<T>),
    Finished,
}

/// Shared materialization state for a caching stream.
///
/// Items are appended only while `producer` is locked, so readers that find
/// their position already materialized never touch the producer lock.
struct Memo<T> {
    items: RwLock<Vec<StreamItem<T>>>,
    producer: Mutex<MemoProducer<T>>,
}

impl<T: Payload> Memo<T> {
    fn new(factory: ProducerFactory<T>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            producer: Mutex::new(MemoProducer::Pending(factory)),
        }
    }

    fn materialized(&self, position: usize) -> Option<StreamItem<T>> {
        let items = self.items.read().expect("stream buffer poisoned");
        items.get(position).cloned()
    }

    fn len(&self) -> usize {
        self.items.read().expect("stream buffer poisoned").len()
    }

    fn get(&self, position: usize) -> Option<StreamItem<T>> {
        if let Some(item) = self.materialized(position) {
            return Some(item);
        }
        let mut producer = self.producer.lock().expect("stream producer poisoned");
        // Another cursor may have produced this position while we waited.
        if let Some(item) = self.materialized(position) {
            return Some(item);
        }
        let pending = match &*producer {
            MemoProducer::Pending(factory) => Some(Arc::clone(factory)),
            _ => None,
        };
        if let Some(factory) = pending {
            *producer = MemoProducer::Running(factory());
        }
        let MemoProducer::Running(source) = &mut *producer else {
            return None;
        };
        match source.next() {
            Some(item) => {
                let failed = item.is_err();
                self.items
                    .write()
                    .expect("stream buffer poisoned")
                    .push(item.clone());
                if failed {
                    *producer = MemoProducer::Finished;
                }
                Some(item)
            }
            None => {
                *producer = MemoProducer::Finished;
                None
            }
        }
    }
}

/// Finite, lazily evaluated, replayable sequence of labeled instances.
///
/// Construction is O(1); nothing is produced until a cursor advances. A
/// producer failure ends the sequence: it is the last item any cursor sees,
/// and with caching enabled every cursor sees the same failure at the same
/// position.
pub struct ReplayableStream<T: Payload> {
    factory: ProducerFactory<T>,
    memo: Option<Arc<Memo<T>>>,
    invocations: Arc<AtomicUsize>,
}

impl<T: Payload> Clone for ReplayableStream<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            memo: self.memo.clone(),
            invocations: Arc::clone(&self.invocations),
        }
    }
}

impl<T: Payload> ReplayableStream<T> {
    /// Wrap `producer`, which yields the sequence once per call.
    ///
    /// With `caching` the producer is called at most once over the stream's
    /// lifetime; without it, once per cursor that is advanced.
    pub fn new<F, I>(producer: F, caching: bool) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = StreamItem<T>>,
        I::IntoIter: Send + 'static,
    {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let factory: ProducerFactory<T> = Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Box::new(producer().into_iter()) as BoxedProducer<T>
        });
        let memo = caching.then(|| Arc::new(Memo::new(Arc::clone(&factory))));
        Self {
            factory,
            memo,
            invocations,
        }
    }

    /// Stream over fixed, already materialized samples.
    pub fn from_samples(samples: Vec<Labeled<T>>, caching: bool) -> Self {
        let samples = Arc::new(samples);
        Self::new(
            move || {
                let samples = Arc::clone(&samples);
                (0..samples.len()).map(move |idx| Ok(samples[idx].clone()))
            },
            caching,
        )
    }

    /// Cursor over the full sequence from the start, independent of every
    /// other outstanding cursor.
    pub fn fresh(&self) -> StreamCursor<T> {
        let state = match &self.memo {
            Some(memo) => CursorState::Replay {
                memo: Arc::clone(memo),
                position: 0,
            },
            None => CursorState::Direct {
                factory: Arc::clone(&self.factory),
                source: None,
                finished: false,
            },
        };
        StreamCursor { state }
    }

    /// Returns `true` when replays share one materialized buffer.
    pub fn is_caching(&self) -> bool {
        self.memo.is_some()
    }

    /// Number of times the underlying producer has been started.
    pub fn producer_invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Number of items materialized so far (always 0 without caching).
    pub fn materialized_len(&self) -> usize {
        self.memo.as_ref().map(|memo| memo.len()).unwrap_or(0)
    }
}

enum CursorState<T> {
    Replay {
        memo: Arc<Memo<T>>,
        position: usize,
    },
    Direct {
        factory: ProducerFactory<T>,
        source: Option<BoxedProducer<T>>,
        finished: bool,
    },
}

/// Iterator over one replay of a [`ReplayableStream`].
pub struct StreamCursor<T> {
    state: CursorState<T>,
}

impl<T: Payload> Iterator for StreamCursor<T> {
    type Item = StreamItem<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            CursorState::Replay { memo, position } => {
                let item = memo.get(*position)?;
                *position += 1;
                Some(item)
            }
            CursorState::Direct {
                factory,
                source,
                finished,
            } => {
                if *finished {
                    return None;
                }
                let source = source.get_or_insert_with(|| factory());
                match source.next() {
                    Some(Err(err)) => {
                        *finished = true;
                        Some(Err(err))
                    }
                    Some(item) => Some(item),
                    None => {
                        *finished = true;
                        None
                    }
                }
            }
        }
    }
}
