//! Step-aware forward iteration over a series.
//!
//! Streaming backends expose iterations in steps; random-access backends
//! expose everything at once, which is handled as a single step. Both
//! feed the same cursor: the iterations of the current step are queued,
//! each one is closed when the cursor moves past it, and the next step is
//! requested once the queue runs dry.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{Error, Result};
use crate::iteration::IndexedIteration;
use crate::series::{Series, SeriesId, StepStatus};

/// Cursor over the iterations of one series.
///
/// The cursor does not borrow the series; every call takes it explicitly
/// and checks that it is the series the cursor was created for.
#[derive(Debug, Clone)]
pub struct SeriesIterator {
    series: Option<SeriesId>,
    pending: VecDeque<u64>,
    current: u64,
}

impl SeriesIterator {
    /// The terminal cursor.
    pub fn end() -> Self {
        Self {
            series: None,
            pending: VecDeque::new(),
            current: 0,
        }
    }

    /// Bind to `series` and settle on its first iteration.
    pub fn new(series: &mut Series) -> Result<Self> {
        let mut cursor = Self {
            series: Some(series.id()),
            pending: VecDeque::new(),
            current: 0,
        };
        let status = series.begin_step()?;
        cursor.enter_step(series, status, true)?;
        Ok(cursor)
    }

    pub fn is_end(&self) -> bool {
        self.series.is_none()
    }

    /// Index of the current iteration, `None` at the end.
    pub fn index(&self) -> Option<u64> {
        self.series.map(|_| self.current)
    }

    /// Iteration indices still queued in the current step, current first.
    pub fn pending(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.iter().copied()
    }

    fn check(&self, series: &Series) -> Result<()> {
        match self.series {
            None => Err(Error::EndIterator),
            Some(id) if id != series.id() => Err(Error::ForeignSeries),
            Some(_) => Ok(()),
        }
    }

    /// The current iteration, opened (and read, if deferred) on first access.
    pub fn get<'s>(&self, series: &'s mut Series) -> Result<IndexedIteration<'s>> {
        self.check(series)?;
        let iteration = series.open_iteration(self.current)?;
        Ok(IndexedIteration::new(self.current, iteration))
    }

    /// Close the current iteration and move to the next one, requesting a
    /// new step from the backend when the current step is used up.
    pub fn advance(&mut self, series: &mut Series) -> Result<()> {
        self.check(series)?;
        series.close_iteration(self.current)?;
        self.pending.pop_front();
        while self.pending.front().is_some_and(|&i| series.is_closed(i)) {
            self.pending.pop_front();
        }
        if let Some(&front) = self.pending.front() {
            self.current = front;
            return Ok(());
        }
        let status = series.next_step()?;
        self.enter_step(series, status, false)
    }

    /// Queue the iterations of a freshly begun step.
    fn enter_step(&mut self, series: &mut Series, mut status: StepStatus, initial: bool) -> Result<()> {
        loop {
            let indices = match status {
                StepStatus::Over => break,
                StepStatus::RandomAccess if initial => series.open_indices(),
                StepStatus::RandomAccess => break,
                StepStatus::Iterations(indices) if indices.is_empty() => {
                    series.report_empty_step();
                    break;
                }
                StepStatus::Iterations(indices) => indices,
            };
            self.pending = indices
                .into_iter()
                .filter(|&i| !series.is_closed(i))
                .collect();
            if let Some(&front) = self.pending.front() {
                self.current = front;
                debug!(current = front, queued = self.pending.len(), "iterator entered step");
                return Ok(());
            }
            if !series.supports_steps() {
                break;
            }
            status = series.next_step()?;
        }
        *self = Self::end();
        Ok(())
    }
}

impl Default for SeriesIterator {
    fn default() -> Self {
        Self::end()
    }
}

impl PartialEq for SeriesIterator {
    fn eq(&self, other: &Self) -> bool {
        match (self.series, other.series) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b && self.current == other.current,
            _ => false,
        }
    }
}

impl Eq for SeriesIterator {}

/// Foreach-style reader over a series.
///
/// ```
/// use rustypmd::{Access, MemoryBackend, MemoryStore, Series, SeriesOptions};
///
/// let store = MemoryStore::new();
/// let mut writer = Series::new(MemoryBackend::new(store.clone()), SeriesOptions::new(Access::Create))?;
/// for index in [0, 2, 5] {
///     writer.iteration_mut(index)?;
/// }
/// writer.close()?;
///
/// let mut reader = Series::new(MemoryBackend::new(store), SeriesOptions::new(Access::ReadOnly))?;
/// let mut iterations = reader.read_iterations();
/// let mut seen = Vec::new();
/// while let Some(iteration) = iterations.next() {
///     seen.push(iteration?.index);
/// }
/// assert_eq!(seen, vec![0, 2, 5]);
/// # Ok::<(), rustypmd::Error>(())
/// ```
pub struct ReadIterations<'s> {
    series: &'s mut Series,
    cursor: SeriesIterator,
    started: bool,
}

impl<'s> ReadIterations<'s> {
    pub(crate) fn new(series: &'s mut Series) -> Self {
        Self {
            series,
            cursor: SeriesIterator::end(),
            started: false,
        }
    }

    /// A cursor on the first iteration.
    pub fn begin(&mut self) -> Result<SeriesIterator> {
        SeriesIterator::new(self.series)
    }

    /// The terminal cursor.
    pub fn end(&self) -> SeriesIterator {
        SeriesIterator::end()
    }

    pub fn series(&mut self) -> &mut Series {
        self.series
    }

    /// Advance and return the next iteration. The previously returned
    /// iteration is closed first. After an error, iteration stops.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<IndexedIteration<'_>>> {
        if !self.started {
            self.started = true;
            match SeriesIterator::new(self.series) {
                Ok(cursor) => self.cursor = cursor,
                Err(e) => return Some(Err(e)),
            }
        } else if !self.cursor.is_end() {
            if let Err(e) = self.cursor.advance(self.series) {
                self.cursor = SeriesIterator::end();
                return Some(Err(e));
            }
        }
        if self.cursor.is_end() {
            return None;
        }
        match self.cursor.get(self.series) {
            Ok(iteration) => Some(Ok(iteration)),
            Err(e) => {
                self.cursor = SeriesIterator::end();
                Some(Err(e))
            }
        }
    }
}
